//! 后台认证接口客户端。

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::auth::AdminUser;
use crate::client::beacon::BeaconTransport;

const REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// 服务端拒绝，携带返回的错误信息。
    Rejected(String),
    Transport(String),
    Decode(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Rejected(msg) => f.write_str(msg),
            ClientError::Transport(msg) => write!(f, "request failed: {msg}"),
            ClientError::Decode(msg) => write!(f, "invalid response: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}

#[async_trait]
pub trait AdminApi: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<AdminUser, ClientError>;

    /// 幂等；重复调用不会出错。
    async fn logout(&self) -> Result<(), ClientError>;

    async fn session(&self) -> Result<bool, ClientError>;
}

#[derive(Deserialize)]
struct LoginBody {
    user: AdminUser,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// 基于 reqwest 的接口实现。
#[derive(Clone, Debug)]
pub struct AdminApiClient {
    http: reqwest::Client,
    base: Url,
}

impl AdminApiClient {
    pub fn new(base: Url) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { http, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base
            .join(path)
            .map_err(|err| ClientError::Transport(err.to_string()))
    }
}

#[async_trait]
impl AdminApi for AdminApiClient {
    async fn login(&self, email: &str, password: &str) -> Result<AdminUser, ClientError> {
        let response = self
            .http
            .post(self.endpoint("/api/admin-login")?)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            let body: LoginBody = response.json().await?;
            return Ok(body.user);
        }
        let message = response
            .json::<ErrorBody>()
            .await
            .map(|body| body.error)
            .unwrap_or_else(|_| format!("login failed ({status})"));
        Err(ClientError::Rejected(message))
    }

    async fn logout(&self) -> Result<(), ClientError> {
        self.http
            .post(self.endpoint(crate::config::LOGOUT_ENDPOINT)?)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn session(&self) -> Result<bool, ClientError> {
        let response = self
            .http
            .get(self.endpoint("/api/admin-session")?)
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::UNAUTHORIZED => Ok(false),
            status => Err(ClientError::Rejected(format!(
                "unexpected session status {status}"
            ))),
        }
    }
}

impl BeaconTransport for AdminApiClient {
    /// 浏览器外没有 sendBeacon，总是交给 keep-alive 请求。
    fn send_beacon(&self, _url: &Url) -> bool {
        false
    }

    fn send_keepalive(&self, url: &Url) -> Result<(), ClientError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|err| ClientError::Transport(err.to_string()))?;
        let request = self.http.post(url.clone());
        handle.spawn(async move {
            if let Err(err) = request.send().await {
                debug!(error = %err, "logout keep-alive request failed");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Extension;
    use std::net::SocketAddr;
    use std::path::Path;
    use std::sync::Arc;

    use crate::app::{AppContext, build_router};
    use crate::auth::{AdminCredentials, AuthConfig};
    use crate::http::RequestScheme;
    use crate::upload::{LocalUploads, UploadBackend};

    async fn spawn_server(public_dir: &Path) -> Url {
        let auth = Arc::new(AuthConfig::new(
            Some(AdminCredentials {
                email: "admin@studio.test".into(),
                password: "hunter2".into(),
            }),
            Duration::from_secs(60),
        ));
        let context = AppContext {
            auth,
            uploads: Arc::new(UploadBackend::Local(LocalUploads::new(public_dir))),
            public_dir: public_dir.to_path_buf(),
            upload_max_size: 1024 * 1024,
        };
        let app = build_router(context).layer(Extension(RequestScheme::Http));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await;
        });
        Url::parse(&format!("http://{addr}/")).expect("base url")
    }

    #[tokio::test]
    async fn client_talks_to_auth_endpoints() {
        let temp = tempfile::tempdir().expect("tempdir");
        let client = AdminApiClient::new(spawn_server(temp.path()).await).expect("client");

        let user = client
            .login("admin@studio.test", "hunter2")
            .await
            .expect("login");
        assert_eq!(user.email, "admin@studio.test");

        let err = client
            .login("admin@studio.test", "nope")
            .await
            .expect_err("wrong password");
        assert_eq!(err, ClientError::Rejected("invalid credentials".into()));

        // 客户端不保存 Cookie，探测结果为未登录。
        assert!(!client.session().await.expect("session"));
        client.logout().await.expect("logout");
        client.logout().await.expect("logout twice");
    }

    #[tokio::test]
    async fn keepalive_requires_runtime_context() {
        let client =
            AdminApiClient::new(Url::parse("http://127.0.0.1:9/").expect("url")).expect("client");
        let url = client.endpoint(crate::config::LOGOUT_ENDPOINT).expect("url");
        assert!(!client.send_beacon(&url));
        assert!(client.send_keepalive(&url).is_ok());

        let outside = std::thread::spawn(move || client.send_keepalive(&url).is_err())
            .join()
            .expect("thread");
        assert!(outside);
    }
}
