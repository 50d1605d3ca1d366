//! 前端认证闸门：Loading / Unauthenticated / Authenticated 三态。
//!
//! 认证状态只存在内存里，离开后台的每条路径都要显式登出，
//! 否则残留 Cookie 会让刷新后的匿名页面继承后台权限。

use std::sync::{Arc, RwLock};
use tokio::runtime::{Builder, Handle};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::auth::{AdminUser, is_login_path};
use crate::client::api::AdminApi;
use crate::config::LOGIN_PATH;

/// 页面跳转能力。
pub trait Navigator: Send + Sync {
    fn current_path(&self) -> String;

    /// 替换当前历史记录。
    fn replace(&self, target: &str);

    fn push(&self, target: &str);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub user: Option<AdminUser>,
    pub loading: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    Loading,
    Unauthenticated,
    Authenticated,
}

impl AuthPhase {
    pub fn of(state: &AuthState) -> Self {
        if state.loading {
            AuthPhase::Loading
        } else if state.user.is_some() {
            AuthPhase::Authenticated
        } else {
            AuthPhase::Unauthenticated
        }
    }
}

/// 仅存于内存的认证上下文，页面刷新即丢失。
#[derive(Debug, Default)]
pub struct AuthContext {
    state: RwLock<AuthState>,
}

impl AuthContext {
    pub fn loading() -> Self {
        Self {
            state: RwLock::new(AuthState {
                user: None,
                loading: true,
            }),
        }
    }

    pub fn snapshot(&self) -> AuthState {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_user(&self, user: Option<AdminUser>) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.user = user;
        state.loading = false;
    }

    pub fn clear(&self) {
        self.set_user(None);
    }
}

/// 闸门的纯状态部分：一次性重定向标记与登出待命标记。
#[derive(Debug, Default)]
pub struct AuthGate {
    redirected: bool,
    logout_armed: bool,
}

impl AuthGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 处理一次状态变化，需要跳转时返回目标地址（每个闸门最多一次）。
    pub fn observe(&mut self, state: &AuthState, route: &str) -> Option<&'static str> {
        match AuthPhase::of(state) {
            AuthPhase::Loading => None,
            AuthPhase::Unauthenticated => {
                if self.redirected || is_login_path(route) {
                    return None;
                }
                self.redirected = true;
                Some(LOGIN_PATH)
            }
            AuthPhase::Authenticated => {
                self.logout_armed = true;
                None
            }
        }
    }

    pub fn is_armed(&self) -> bool {
        self.logout_armed
    }

    /// 卸载时调用：已待命且仍有用户则需要登出；调用后解除待命。
    pub fn take_teardown(&mut self, state: &AuthState) -> bool {
        let fire = self.logout_armed && state.user.is_some();
        self.logout_armed = false;
        fire
    }
}

/// 卸载时登出请求的去向。
#[derive(Debug)]
pub enum Teardown {
    /// 未待命或已卸载过，没有发起登出。
    Skipped,
    /// 已交给挂载时所在的运行时。
    Spawned(JoinHandle<()>),
    /// 没有可用运行时，已在临时运行时上同步完成。
    Completed,
}

/// 挂载期间持有的闸门；`Drop` 保证任何退出路径都会执行卸载逻辑。
pub struct GateSession {
    gate: AuthGate,
    context: Arc<AuthContext>,
    api: Arc<dyn AdminApi>,
    navigator: Arc<dyn Navigator>,
    runtime: Option<Handle>,
    torn_down: bool,
}

impl GateSession {
    pub fn mount(
        context: Arc<AuthContext>,
        api: Arc<dyn AdminApi>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let mut session = Self {
            gate: AuthGate::new(),
            context,
            api,
            navigator,
            runtime: Handle::try_current().ok(),
            torn_down: false,
        };
        session.sync();
        session
    }

    /// 重新执行认证检查；发生跳转时返回 `true`。
    pub fn sync(&mut self) -> bool {
        let state = self.context.snapshot();
        let route = self.navigator.current_path();
        match self.gate.observe(&state, &route) {
            Some(target) => {
                debug!(route, target, "redirecting to admin login");
                self.navigator.replace(target);
                true
            }
            None => false,
        }
    }

    pub fn gate(&self) -> &AuthGate {
        &self.gate
    }

    /// 显式卸载，返回登出请求的去向。
    pub fn unmount(mut self) -> Teardown {
        self.teardown()
    }

    /// 登出请求先于清空上下文发出；失败一律忽略。
    fn teardown(&mut self) -> Teardown {
        if self.torn_down {
            return Teardown::Skipped;
        }
        self.torn_down = true;

        let state = self.context.snapshot();
        if !self.gate.take_teardown(&state) {
            return Teardown::Skipped;
        }

        let api = self.api.clone();
        let runtime = self.runtime.clone().or_else(|| Handle::try_current().ok());
        let outcome = match runtime {
            Some(handle) => Teardown::Spawned(handle.spawn(async move {
                let _ = api.logout().await;
            })),
            None => match Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => {
                    let _ = runtime.block_on(api.logout());
                    Teardown::Completed
                }
                Err(err) => {
                    warn!(error = %err, "no runtime available for admin logout");
                    Teardown::Skipped
                }
            },
        };
        self.context.clear();
        outcome
    }
}

impl Drop for GateSession {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}
