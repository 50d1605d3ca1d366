//! Cloudflare R2 对象存储客户端（S3 兼容接口）。

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use std::fmt;
use tracing::{debug, info};

use crate::config::Args;

/// R2 连接配置；仅当四个必需项都存在时才可构建。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct R2Config {
    pub account_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub public_url: Option<String>,
}

impl R2Config {
    /// 检查远程存储所需配置是否齐全，缺任意一项返回 `None`。
    pub fn detect(
        account_id: Option<&str>,
        access_key_id: Option<&str>,
        secret_access_key: Option<&str>,
        bucket: Option<&str>,
        public_url: Option<&str>,
    ) -> Option<Self> {
        Some(Self {
            account_id: non_empty(account_id)?,
            access_key_id: non_empty(access_key_id)?,
            secret_access_key: non_empty(secret_access_key)?,
            bucket: non_empty(bucket)?,
            public_url: non_empty(public_url),
        })
    }

    pub fn from_args(args: &Args) -> Option<Self> {
        Self::detect(
            args.r2_account_id.as_deref(),
            args.r2_access_key_id.as_deref(),
            args.r2_secret_access_key.as_deref(),
            args.r2_bucket_name.as_deref(),
            args.r2_public_url.as_deref(),
        )
    }

    pub fn endpoint(&self) -> String {
        format!("https://{}.r2.cloudflarestorage.com", self.account_id)
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// 拼接对象的公开访问地址；未配置公开域名时返回原始 key。
pub fn public_url_for(public_base: Option<&str>, key: &str) -> String {
    match public_base {
        Some(base) => format!("{}/{}", base.trim_end_matches('/'), key),
        None => key.to_string(),
    }
}

#[derive(Debug)]
pub enum R2Error {
    Upload(String),
    Delete(String),
}

impl fmt::Display for R2Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            R2Error::Upload(msg) => write!(f, "r2 upload failed: {msg}"),
            R2Error::Delete(msg) => write!(f, "r2 delete failed: {msg}"),
        }
    }
}

impl std::error::Error for R2Error {}

/// 上传处理器依赖的对象存储能力。
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 上传完整内容并返回公开地址。
    async fn upload(
        &self,
        body: Vec<u8>,
        key: &str,
        content_type: &str,
    ) -> Result<String, R2Error>;

    async fn delete(&self, key: &str) -> Result<(), R2Error>;

    fn public_url(&self, key: &str) -> String;

    /// 是否配置了可解析的公开域名。
    fn has_public_base(&self) -> bool;
}

/// 基于 aws-sdk-s3 的 R2 客户端。
#[derive(Clone, Debug)]
pub struct R2Client {
    client: Client,
    bucket: String,
    public_url: Option<String>,
}

impl R2Client {
    pub fn new(config: &R2Config) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "r2-static",
        );
        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("auto"))
            .endpoint_url(config.endpoint())
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        info!(bucket = config.bucket, "r2 client configured");
        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket.clone(),
            public_url: config.public_url.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for R2Client {
    async fn upload(
        &self,
        body: Vec<u8>,
        key: &str,
        content_type: &str,
    ) -> Result<String, R2Error> {
        let size = body.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| R2Error::Upload(DisplayErrorContext(&err).to_string()))?;
        debug!(key, size, "r2 object stored");
        Ok(self.public_url(key))
    }

    async fn delete(&self, key: &str) -> Result<(), R2Error> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| R2Error::Delete(DisplayErrorContext(&err).to_string()))?;
        debug!(key, "r2 object deleted");
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        public_url_for(self.public_url.as_deref(), key)
    }

    fn has_public_base(&self) -> bool {
        self.public_url.is_some()
    }
}
