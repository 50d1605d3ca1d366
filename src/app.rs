//! 路由装配：认证接口、上传接口、会话闸门与静态资源。

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{delete, get, post};
use axum::{Router, middleware};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info_span};

use crate::auth::{self, AuthConfig};
use crate::config::ADMIN_UPLOAD_ENDPOINT;
use crate::http::add_security_headers;
use crate::upload::{self, UploadBackend};
use crate::version;

/// 路由共享的运行时状态。
#[derive(Clone, Debug)]
pub struct AppContext {
    pub auth: Arc<AuthConfig>,
    pub uploads: Arc<UploadBackend>,
    pub public_dir: PathBuf,
    pub upload_max_size: usize,
}

/// 构建完整路由；`RequestScheme` 由调用方按监听器注入。
pub fn build_router(context: AppContext) -> Router {
    Router::new()
        .route("/api/admin-login", post(auth::admin_login))
        .route("/api/admin-logout", post(auth::admin_logout))
        .route("/api/admin-session", get(auth::admin_session))
        .route(
            "/api/upload",
            post(upload::upload_file)
                .delete(upload::delete_upload)
                .layer(DefaultBodyLimit::max(context.upload_max_size)),
        )
        .route(ADMIN_UPLOAD_ENDPOINT, delete(upload::delete_upload))
        .route("/api/version", get(version::get_version_info))
        .fallback_service(ServeDir::new(&context.public_dir))
        .layer(middleware::from_fn(auth::session_middleware))
        .layer(middleware::from_fn(add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip());
                    let client_ip = crate::http::resolve_client_ip(request.headers(), connect_ip)
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(context.auth))
        .layer(Extension(context.uploads))
}
