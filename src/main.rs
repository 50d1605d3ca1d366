//! Studio 后台服务入口。
//!
//! 解析配置、探测上传后端、装配路由并启动 HTTP/HTTPS 监听。

use axum::extract::Extension;
use axum_server::Handle;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

use studio_admin::app::{AppContext, build_router};
use studio_admin::auth::{AdminCredentials, AuthConfig};
use studio_admin::background::spawn_background_tasks;
use studio_admin::config::Args;
use studio_admin::http::{RequestScheme, build_cors_layer};
use studio_admin::r2::R2Config;
use studio_admin::upload::UploadBackend;
use studio_admin::{logging, tls};

/// 启动服务并阻塞直到收到退出信号。
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let public_dir = PathBuf::from(&args.public_dir);

    let credentials = match (args.admin_email.clone(), args.admin_password.clone()) {
        (Some(email), Some(password)) if !email.trim().is_empty() && !password.is_empty() => {
            Some(AdminCredentials {
                email: email.trim().to_string(),
                password,
            })
        }
        _ => {
            warn!("ADMIN_EMAIL/ADMIN_PASSWORD not set; admin login is disabled");
            None
        }
    };
    let auth = Arc::new(
        AuthConfig::new(credentials, Duration::from_secs(args.session_ttl_secs))
            .with_login_limits(
                args.login_max_attempts,
                Duration::from_secs(args.login_window_secs),
                Duration::from_secs(args.login_lockout_secs),
            ),
    );
    let uploads = Arc::new(UploadBackend::detect(R2Config::from_args(&args), &public_dir));
    info!(storage = ?uploads.storage_kind(), "upload backend selected");

    let context = AppContext {
        auth: auth.clone(),
        uploads,
        public_dir,
        upload_max_size: args.upload_max_size,
    };
    let mut app = build_router(context);
    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let tls_config = tls::load_rustls_config(&args).await?;
    let handle = Handle::new();

    spawn_background_tasks(auth);
    tokio::spawn(shutdown_signal(handle.clone()));

    match tls_config {
        Some(tls_config) => {
            info!("Starting HTTPS server at {}", addr);
            let app = app.layer(Extension(RequestScheme::Https));
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                .await
        }
        None => {
            info!("Starting HTTP server at {}", addr);
            let app = app.layer(Extension(RequestScheme::Http));
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                .await
        }
    }
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
