//! 后台登录流程：提交凭据、保存用户、跳转到图库。

use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::AdminUser;
use crate::client::api::{AdminApi, ClientError};
use crate::client::gate::{AuthContext, Navigator};
use crate::config::GALLERY_PATH;

pub const USER_STORAGE_KEY: &str = "adminUser";

/// 标签页级别的会话存储。
pub trait SessionStorage: Send + Sync {
    fn set_item(&self, key: &str, value: String);

    fn get_item(&self, key: &str) -> Option<String>;

    fn remove_item(&self, key: &str);
}

pub struct LoginFlow {
    api: Arc<dyn AdminApi>,
    storage: Arc<dyn SessionStorage>,
    navigator: Arc<dyn Navigator>,
    context: Arc<AuthContext>,
}

impl LoginFlow {
    pub fn new(
        api: Arc<dyn AdminApi>,
        storage: Arc<dyn SessionStorage>,
        navigator: Arc<dyn Navigator>,
        context: Arc<AuthContext>,
    ) -> Self {
        Self {
            api,
            storage,
            navigator,
            context,
        }
    }

    /// 提交登录；失败时不写入任何状态，错误信息交给表单展示。
    pub async fn submit(&self, email: &str, password: &str) -> Result<AdminUser, ClientError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(ClientError::Rejected(
                "Email and password are required".into(),
            ));
        }

        let user = match self.api.login(email, password).await {
            Ok(user) => user,
            Err(err) => {
                warn!(error = %err, "admin login failed");
                return Err(err);
            }
        };

        let encoded =
            serde_json::to_string(&user).map_err(|err| ClientError::Decode(err.to_string()))?;
        self.storage.set_item(USER_STORAGE_KEY, encoded);
        self.context.set_user(Some(user.clone()));
        info!(email = user.email, "admin signed in");
        self.navigator.push(GALLERY_PATH);
        Ok(user)
    }

    /// 读取已保存的用户。
    pub fn stored_user(&self) -> Option<AdminUser> {
        self.storage
            .get_item(USER_STORAGE_KEY)
            .and_then(|value| serde_json::from_str(&value).ok())
    }

    /// 显式登出：清空内存与会话存储，服务端失败不影响本地清理。
    pub async fn logout(&self) {
        self.storage.remove_item(USER_STORAGE_KEY);
        self.context.clear();
        if let Err(err) = self.api.logout().await {
            warn!(error = %err, "admin logout request failed");
        }
    }
}
