//! 命令行参数与服务配置默认值。

use clap::Parser;
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const SESSION_COOKIE_NAME: &str = "adminSession";
pub const SESSION_COOKIE_PATH: &str = "/admin";
pub const ADMIN_PREFIX: &str = "/admin";
pub const LOGIN_PATH: &str = "/admin/login";
pub const GALLERY_PATH: &str = "/admin/gallery";
pub const LOGOUT_ENDPOINT: &str = "/api/admin-logout";
/// 会话 Cookie 只在 `/admin` 下发送，浏览器端删除上传走这个地址。
pub const ADMIN_UPLOAD_ENDPOINT: &str = "/admin/api/upload";
pub const DEFAULT_UPLOAD_PREFIX: &str = "uploads";
pub const LOCAL_UPLOAD_DIR: &str = "uploads";
pub const LOCAL_FALLBACK_WARNING: &str =
    "R2 not configured; file saved to local public/uploads (development only)";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 8 * 60 * 60;
pub const DEFAULT_LOGIN_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_LOGIN_WINDOW_SECS: u64 = 5 * 60;
pub const DEFAULT_LOGIN_LOCKOUT_SECS: u64 = 10 * 60;
pub const DEFAULT_UPLOAD_MAX_SIZE: usize = 50 * 1024 * 1024;
pub const SESSION_PRUNE_INTERVAL_SECS: u64 = 300;

/// 服务端命令行参数与环境变量配置。
#[derive(Parser, Debug, Clone)]
#[command(name = "studio-admin", version = VERSION_INFO, about = "Studio admin server")]
pub struct Args {
    #[arg(
        short = 'b',
        long,
        env = "STUDIO_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "STUDIO_PORT",
        default_value_t = 3000,
        help = "Listen port"
    )]
    pub port: u16,
    #[arg(
        short = 'd',
        long,
        env = "STUDIO_PUBLIC_DIR",
        default_value = "public",
        help = "Public directory served as static files"
    )]
    pub public_dir: String,
    #[arg(short = 'c', long, env = "STUDIO_TLS_CERT", help = "TLS cert path")]
    pub tls_cert: Option<String>,
    #[arg(short = 'k', long, env = "STUDIO_TLS_KEY", help = "TLS key path")]
    pub tls_key: Option<String>,
    #[arg(long, env = "STUDIO_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(long, env = "ADMIN_EMAIL", help = "Admin login email")]
    pub admin_email: Option<String>,
    #[arg(long, env = "ADMIN_PASSWORD", help = "Admin login password")]
    pub admin_password: Option<String>,
    #[arg(
        long,
        env = "STUDIO_SESSION_TTL_SECS",
        default_value_t = DEFAULT_SESSION_TTL_SECS,
        help = "Session expiration in seconds"
    )]
    pub session_ttl_secs: u64,
    #[arg(
        long,
        env = "STUDIO_LOGIN_MAX_ATTEMPTS",
        default_value_t = DEFAULT_LOGIN_MAX_ATTEMPTS,
        help = "Max login attempts before lockout (0 to disable)"
    )]
    pub login_max_attempts: u32,
    #[arg(
        long,
        env = "STUDIO_LOGIN_WINDOW_SECS",
        default_value_t = DEFAULT_LOGIN_WINDOW_SECS,
        help = "Login attempt window in seconds"
    )]
    pub login_window_secs: u64,
    #[arg(
        long,
        env = "STUDIO_LOGIN_LOCKOUT_SECS",
        default_value_t = DEFAULT_LOGIN_LOCKOUT_SECS,
        help = "Login lockout time after max attempts"
    )]
    pub login_lockout_secs: u64,
    #[arg(
        long,
        env = "STUDIO_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max upload request body in bytes"
    )]
    pub upload_max_size: usize,
    #[arg(long, env = "R2_ACCOUNT_ID", help = "Cloudflare R2 account id")]
    pub r2_account_id: Option<String>,
    #[arg(long, env = "R2_ACCESS_KEY_ID", help = "R2 access key id")]
    pub r2_access_key_id: Option<String>,
    #[arg(long, env = "R2_SECRET_ACCESS_KEY", help = "R2 secret access key")]
    pub r2_secret_access_key: Option<String>,
    #[arg(long, env = "R2_BUCKET_NAME", help = "R2 bucket name")]
    pub r2_bucket_name: Option<String>,
    #[arg(long, env = "R2_PUBLIC_URL", help = "Public base URL of the R2 bucket")]
    pub r2_public_url: Option<String>,
}
