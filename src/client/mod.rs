//! 后台前端的认证模型：内存态认证闸门、登出信标与登录流程。
//!
//! 浏览器相关的能力（跳转、会话存储、信标发送）都通过 trait 注入，
//! 这里只保留状态机与调用顺序。

pub mod api;
pub mod beacon;
pub mod gate;
pub mod login;

pub use api::{AdminApi, AdminApiClient, ClientError};
pub use beacon::{BeaconTransport, ExitSignal, LinkClick, LogoutBeacon};
pub use gate::{AuthContext, AuthGate, AuthPhase, AuthState, GateSession, Navigator, Teardown};
pub use login::{LoginFlow, SessionStorage};
