//! Studio 后台服务。
//!
//! 提供 `/admin` 页面的会话闸门、后台登录接口，以及上传到 Cloudflare R2
//! （未配置时回退到本地 `public/uploads`）的上传接口；`client` 模块描述
//! 浏览器端的内存认证状态、登出信标与登录流程。

pub mod app;
pub mod atomic;
pub mod auth;
pub mod background;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod r2;
pub mod tls;
pub mod upload;
pub mod version;

use shadow_rs::shadow;

shadow!(build);
