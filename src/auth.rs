//! 后台会话闸门、登录接口与登录限流。

use axum::extract::{Extension, Json, connect_info::ConnectInfo};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::{body::Body as AxumBody, middleware};
use axum_extra::extract::{
    CookieJar,
    cookie::{Cookie, SameSite},
};
use cookie::time::Duration as CookieDuration;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ADMIN_PREFIX, LOGIN_PATH, SESSION_COOKIE_NAME, SESSION_COOKIE_PATH};
use crate::error::ApiError;
use crate::http::{RequestScheme, is_https_request, resolve_client_ip};

#[derive(Debug, Clone)]
pub struct AdminCredentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug)]
pub struct AuthConfig {
    pub credentials: Option<AdminCredentials>,
    pub sessions: Mutex<HashMap<String, SessionEntry>>,
    pub session_ttl: Duration,
    pub login_attempts: Mutex<HashMap<IpAddr, LoginAttempt>>,
    pub login_window: Duration,
    pub login_max_attempts: u32,
    pub login_lockout: Duration,
}

#[derive(Debug)]
pub struct SessionEntry {
    pub email: String,
    pub expires_at: Instant,
}

#[derive(Debug)]
pub struct LoginAttempt {
    pub window_start: Instant,
    pub failures: u32,
    pub locked_until: Option<Instant>,
}

impl AuthConfig {
    pub fn new(credentials: Option<AdminCredentials>, session_ttl: Duration) -> Self {
        Self {
            credentials,
            sessions: Mutex::new(HashMap::new()),
            session_ttl,
            login_attempts: Mutex::new(HashMap::new()),
            login_window: Duration::from_secs(crate::config::DEFAULT_LOGIN_WINDOW_SECS),
            login_max_attempts: crate::config::DEFAULT_LOGIN_MAX_ATTEMPTS,
            login_lockout: Duration::from_secs(crate::config::DEFAULT_LOGIN_LOCKOUT_SECS),
        }
    }

    pub fn with_login_limits(
        mut self,
        max_attempts: u32,
        window: Duration,
        lockout: Duration,
    ) -> Self {
        self.login_max_attempts = max_attempts;
        self.login_window = window;
        self.login_lockout = lockout;
        self
    }
}

/// 会话闸门对单个请求的判定结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Pass,
    /// 放行，但在响应上清除会话 Cookie。
    PassAndClear,
    Redirect(String),
}

/// 以 `/admin` 开头的路径，按字符串前缀匹配（`/administrator` 同样受保护）。
pub fn is_admin_path(path: &str) -> bool {
    path.starts_with(ADMIN_PREFIX)
}

/// 以 `/admin/login` 开头的路径，包括 `/admin/login-help` 这类延伸页面。
pub fn is_login_path(path: &str) -> bool {
    path.starts_with(LOGIN_PATH)
}

/// 登录页地址，附带编码后的原始路径。
pub fn login_redirect_target(next: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(next.as_bytes()).collect();
    format!("{LOGIN_PATH}?next={encoded}")
}

/// 纯判定：根据路径与是否持有会话决定放行、清除或重定向。
pub fn gate_request(path: &str, has_session: bool) -> GateDecision {
    if !is_admin_path(path) {
        return GateDecision::Pass;
    }
    if is_login_path(path) {
        return if has_session {
            GateDecision::PassAndClear
        } else {
            GateDecision::Pass
        };
    }
    if has_session {
        GateDecision::Pass
    } else {
        GateDecision::Redirect(login_redirect_target(path))
    }
}

/// 清除用 Cookie；无论请求是否携带会话都下发。
fn removal_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, ""))
        .path(SESSION_COOKIE_PATH)
        .http_only(true)
        .max_age(CookieDuration::ZERO)
        .build()
}

/// 会话中间件：未登录访问后台页面时重定向到登录页。
pub async fn session_middleware(
    Extension(auth): Extension<Arc<AuthConfig>>,
    jar: CookieJar,
    req: Request<AxumBody>,
    next: middleware::Next,
) -> Response {
    let path = req.uri().path().to_string();
    if !is_admin_path(&path) {
        return next.run(req).await;
    }

    let token = jar
        .get(SESSION_COOKIE_NAME)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty());

    if is_login_path(&path) {
        // 任何残留 Cookie 都视为隐式登出。
        return match gate_request(&path, token.is_some()) {
            GateDecision::PassAndClear => {
                if let Some(token) = token.as_deref() {
                    remove_session(&auth, token).await;
                }
                debug!(path, "clearing session cookie on login page");
                let response = next.run(req).await;
                (jar.add(removal_cookie()), response).into_response()
            }
            _ => next.run(req).await,
        };
    }

    let live = match token.as_deref() {
        Some(token) => session_email(&auth, token).await.is_some(),
        None => false,
    };
    match gate_request(&path, live) {
        GateDecision::Redirect(location) => {
            debug!(path, "redirecting unauthenticated admin request");
            Redirect::temporary(&location).into_response()
        }
        _ => next.run(req).await,
    }
}

#[derive(Deserialize)]
pub struct AdminLoginRequest {
    email: String,
    password: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AdminUser {
    pub email: String,
}

#[derive(Serialize)]
pub struct AdminLoginResponse {
    user: AdminUser,
}

/// 登录接口：校验凭据、创建会话并写入 Cookie。
pub async fn admin_login(
    Extension(auth): Extension<Arc<AuthConfig>>,
    Extension(scheme): Extension<RequestScheme>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(payload): Json<AdminLoginRequest>,
) -> Result<(CookieJar, Json<AdminLoginResponse>), ApiError> {
    let client_ip = resolve_client_ip(&headers, Some(addr.ip())).unwrap_or_else(|| addr.ip());

    if let Some(retry_after) = check_login_rate_limit(&auth, client_ip).await {
        return Err(ApiError::TooManyRequests(retry_after));
    }

    let Some(credentials) = auth.credentials.as_ref() else {
        warn!("admin login attempted but no admin credentials are configured");
        return Err(ApiError::Unauthorized("invalid credentials".into()));
    };

    let email_ok = payload.email.trim().eq_ignore_ascii_case(&credentials.email);
    let password_ok =
        constant_time_eq(payload.password.as_bytes(), credentials.password.as_bytes());
    if !(email_ok && password_ok) {
        register_login_failure(&auth, client_ip).await;
        return Err(ApiError::Unauthorized("invalid credentials".into()));
    }

    clear_login_failures(&auth, client_ip).await;

    let token = Uuid::new_v4().to_string();
    let expires_at = Instant::now() + auth.session_ttl;
    auth.sessions.lock().await.insert(
        token.clone(),
        SessionEntry {
            email: credentials.email.clone(),
            expires_at,
        },
    );

    let cookie = Cookie::build((SESSION_COOKIE_NAME, token))
        .path(SESSION_COOKIE_PATH)
        .http_only(true)
        .secure(is_https_request(&headers, scheme))
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::seconds(auth.session_ttl.as_secs() as i64))
        .build();
    info!(client_ip = %client_ip, "admin logged in");

    Ok((
        jar.add(cookie),
        Json(AdminLoginResponse {
            user: AdminUser {
                email: credentials.email.clone(),
            },
        }),
    ))
}

/// 登出接口：幂等，总是返回 `{ok:true}` 并清除 Cookie。
pub async fn admin_logout(
    Extension(auth): Extension<Arc<AuthConfig>>,
    jar: CookieJar,
) -> (CookieJar, Json<serde_json::Value>) {
    if let Some(cookie) = jar.get(SESSION_COOKIE_NAME) {
        remove_session(&auth, cookie.value()).await;
        debug!("admin session removed");
    }

    (jar.add(removal_cookie()), Json(json!({ "ok": true })))
}

/// 会话探测：有效会话返回 200 与当前用户，否则 401。
pub async fn admin_session(
    Extension(auth): Extension<Arc<AuthConfig>>,
    jar: CookieJar,
) -> (StatusCode, Json<serde_json::Value>) {
    match require_session(&auth, &jar).await {
        Ok(user) => (StatusCode::OK, Json(json!({ "ok": true, "user": user }))),
        Err(_) => (StatusCode::UNAUTHORIZED, Json(json!({ "ok": false }))),
    }
}

/// 要求请求携带有效会话，返回会话所属用户。
pub async fn require_session(auth: &AuthConfig, jar: &CookieJar) -> Result<AdminUser, ApiError> {
    let token = jar
        .get(SESSION_COOKIE_NAME)
        .map(|cookie| cookie.value())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("admin session required".into()))?;
    match session_email(auth, token).await {
        Some(email) => Ok(AdminUser { email }),
        None => Err(ApiError::Unauthorized("admin session required".into())),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// 有效会话的邮箱；过期或未知的令牌顺带从表中移除。
async fn session_email(auth: &AuthConfig, token: &str) -> Option<String> {
    let mut sessions = auth.sessions.lock().await;
    let now = Instant::now();
    match sessions.get(token) {
        Some(entry) if entry.expires_at > now => Some(entry.email.clone()),
        _ => {
            sessions.remove(token);
            None
        }
    }
}

async fn remove_session(auth: &AuthConfig, token: &str) {
    auth.sessions.lock().await.remove(token);
}

async fn check_login_rate_limit(auth: &AuthConfig, ip: IpAddr) -> Option<u64> {
    if auth.login_max_attempts == 0 {
        return None;
    }

    let mut attempts = auth.login_attempts.lock().await;
    let now = Instant::now();
    let entry = attempts.entry(ip).or_insert(LoginAttempt {
        window_start: now,
        failures: 0,
        locked_until: None,
    });

    if let Some(locked_until) = entry.locked_until {
        if now < locked_until {
            return Some(locked_until.saturating_duration_since(now).as_secs().max(1));
        }
        entry.locked_until = None;
        entry.failures = 0;
        entry.window_start = now;
    }

    if now.duration_since(entry.window_start) > auth.login_window {
        entry.window_start = now;
        entry.failures = 0;
    }

    None
}

async fn register_login_failure(auth: &AuthConfig, ip: IpAddr) {
    if auth.login_max_attempts == 0 {
        return;
    }

    let mut attempts = auth.login_attempts.lock().await;
    let now = Instant::now();
    let entry = attempts.entry(ip).or_insert(LoginAttempt {
        window_start: now,
        failures: 0,
        locked_until: None,
    });

    entry.failures = entry.failures.saturating_add(1);
    if entry.failures >= auth.login_max_attempts {
        entry.locked_until = Some(now + auth.login_lockout);
        warn!(client_ip = %ip, "admin login locked out");
    }
}

async fn clear_login_failures(auth: &AuthConfig, ip: IpAddr) {
    auth.login_attempts.lock().await.remove(&ip);
}

/// 清理过期会话。
pub async fn prune_expired_sessions(auth: &AuthConfig) {
    let mut sessions = auth.sessions.lock().await;
    let now = Instant::now();
    sessions.retain(|_, entry| entry.expires_at > now);
}

/// 清理过期的登录失败记录。
pub async fn prune_login_attempts(auth: &AuthConfig) {
    let mut attempts = auth.login_attempts.lock().await;
    let now = Instant::now();
    attempts.retain(|_, entry| match entry.locked_until {
        Some(locked_until) => locked_until > now,
        None => now.duration_since(entry.window_start) <= auth.login_window,
    });
}
