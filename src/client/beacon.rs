//! 离开后台时的尽力登出通知。

use std::sync::atomic::{AtomicBool, Ordering};
use url::Url;

use crate::auth::is_admin_path;
use crate::client::api::ClientError;
use crate::config::LOGOUT_ENDPOINT;

/// 页面卸载后仍能送达的发送通道。
pub trait BeaconTransport: Send + Sync {
    /// 信标发送；返回 `false` 表示不可用或被拒绝。
    fn send_beacon(&self, url: &Url) -> bool;

    /// 信标不可用时的 keep-alive 请求，不等待结果。
    fn send_keepalive(&self, url: &Url) -> Result<(), ClientError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkClick {
    pub href: String,
    pub target: Option<String>,
    pub download: bool,
    /// 0 为主键。
    pub button: i16,
    pub modified: bool,
    pub default_prevented: bool,
}

impl LinkClick {
    pub fn primary(href: &str) -> Self {
        Self {
            href: href.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitSignal {
    PageHide,
    VisibilityHidden,
    LinkClick(LinkClick),
}

/// 每个页面生命周期最多发送一次登出通知。
pub struct LogoutBeacon<T> {
    transport: T,
    page: Url,
    endpoint: Url,
    sent: AtomicBool,
}

impl<T: BeaconTransport> LogoutBeacon<T> {
    pub fn new(transport: T, page: Url) -> Result<Self, url::ParseError> {
        let endpoint = page.join(LOGOUT_ENDPOINT)?;
        Ok(Self {
            transport,
            page,
            endpoint,
            sent: AtomicBool::new(false),
        })
    }

    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::SeqCst)
    }

    /// 处理退出信号，实际发起发送时返回 `true`。
    pub fn handle(&self, signal: &ExitSignal) -> bool {
        let triggers = match signal {
            ExitSignal::PageHide | ExitSignal::VisibilityHidden => true,
            ExitSignal::LinkClick(click) => self.leaves_admin(click),
        };
        triggers && self.fire()
    }

    fn fire(&self) -> bool {
        if self.sent.swap(true, Ordering::SeqCst) {
            return false;
        }
        if !self.transport.send_beacon(&self.endpoint) {
            let _ = self.transport.send_keepalive(&self.endpoint);
        }
        true
    }

    /// 同标签页的普通点击，且目标离开 `/admin` 或离开当前站点。
    fn leaves_admin(&self, click: &LinkClick) -> bool {
        if click.default_prevented || click.button != 0 || click.modified || click.download {
            return false;
        }
        if let Some(target) = click.target.as_deref()
            && !target.is_empty()
            && !target.eq_ignore_ascii_case("_self")
        {
            return false;
        }
        let Ok(destination) = self.page.join(&click.href) else {
            return false;
        };
        destination.origin() != self.page.origin() || !is_admin_path(destination.path())
    }
}
