//! 可选的 TLS 配置加载。

use axum_server::tls_rustls::RustlsConfig;
use std::io;
use tracing::info;

use crate::config::Args;

/// 证书与私钥都提供时返回 Rustls 配置，否则以纯 HTTP 运行。
pub async fn load_rustls_config(args: &Args) -> io::Result<Option<RustlsConfig>> {
    match (&args.tls_cert, &args.tls_key) {
        (Some(cert), Some(key)) => {
            info!(cert, "loading tls certificate");
            RustlsConfig::from_pem_file(cert, key).await.map(Some)
        }
        (None, None) => Ok(None),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "both --tls-cert and --tls-key are required for https",
        )),
    }
}
