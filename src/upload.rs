//! 后台文件上传：优先写入 R2，未配置时回退到本地 `public/uploads`。

use axum::extract::{Extension, Multipart, Query};
use axum::response::Json as JsonResponse;
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::atomic::write_atomic;
use crate::auth::{AuthConfig, require_session};
use crate::config::{DEFAULT_UPLOAD_PREFIX, LOCAL_FALLBACK_WARNING, LOCAL_UPLOAD_DIR};
use crate::error::ApiError;
use crate::r2::{ObjectStore, R2Client, R2Config};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    R2,
    Local,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadResult {
    pub key: String,
    pub url: String,
    pub storage: StorageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// 本地回退目录 `<public_dir>/uploads`，只取 key 的最后一段作为文件名。
#[derive(Clone, Debug)]
pub struct LocalUploads {
    root: PathBuf,
}

impl LocalUploads {
    pub fn new(public_dir: &Path) -> Self {
        Self {
            root: public_dir.join(LOCAL_UPLOAD_DIR),
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 写入文件并返回站点内可访问的地址。
    pub async fn save(&self, key: &str, bytes: &[u8]) -> std::io::Result<String> {
        let name = local_file_name(key).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid upload key")
        })?;
        fs::create_dir_all(&self.root).await?;
        write_atomic(&self.root.join(name), bytes).await?;
        Ok(format!("/{LOCAL_UPLOAD_DIR}/{name}"))
    }

    pub async fn remove(&self, key: &str) -> Result<(), ApiError> {
        let name =
            local_file_name(key).ok_or_else(|| ApiError::BadRequest("invalid key".into()))?;
        fs::remove_file(self.root.join(name)).await?;
        Ok(())
    }
}

/// 上传目标：由配置探测一次性决定。
#[derive(Clone)]
pub enum UploadBackend {
    Remote(Arc<dyn ObjectStore>),
    Local(LocalUploads),
}

impl fmt::Debug for UploadBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadBackend::Remote(_) => f.write_str("UploadBackend::Remote"),
            UploadBackend::Local(local) => {
                f.debug_tuple("UploadBackend::Local").field(local).finish()
            }
        }
    }
}

impl UploadBackend {
    /// 根据 R2 配置是否齐全选择远程或本地存储。
    pub fn detect(r2: Option<R2Config>, public_dir: &Path) -> Self {
        match r2 {
            Some(config) => {
                if config.public_url.is_none() {
                    warn!("R2_PUBLIC_URL not set; upload urls will be bare object keys");
                }
                UploadBackend::Remote(Arc::new(R2Client::new(&config)))
            }
            None => {
                warn!(
                    dir = %public_dir.join(LOCAL_UPLOAD_DIR).display(),
                    "R2 not configured; uploads fall back to local disk"
                );
                UploadBackend::Local(LocalUploads::new(public_dir))
            }
        }
    }

    pub fn storage_kind(&self) -> StorageKind {
        match self {
            UploadBackend::Remote(_) => StorageKind::R2,
            UploadBackend::Local(_) => StorageKind::Local,
        }
    }

    /// 保存内容；本地路径即最终兜底，不再继续回退。
    pub async fn store(
        &self,
        key: String,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<UploadResult, ApiError> {
        match self {
            UploadBackend::Remote(store) => {
                let size = bytes.len();
                let url = store.upload(bytes, &key, content_type).await?;
                if !store.has_public_base() {
                    warn!(key, "upload url is a bare key; R2_PUBLIC_URL missing");
                }
                info!(key, size, content_type, "upload stored in r2");
                Ok(UploadResult {
                    key,
                    url,
                    storage: StorageKind::R2,
                    warning: None,
                })
            }
            UploadBackend::Local(local) => {
                let url = local
                    .save(&key, &bytes)
                    .await
                    .map_err(|err| ApiError::Internal(err.to_string()))?;
                info!(key, size = bytes.len(), url, "upload stored locally");
                Ok(UploadResult {
                    key,
                    url,
                    storage: StorageKind::Local,
                    warning: Some(LOCAL_FALLBACK_WARNING.to_string()),
                })
            }
        }
    }

    pub async fn remove(&self, key: &str) -> Result<(), ApiError> {
        match self {
            UploadBackend::Remote(store) => Ok(store.delete(key).await?),
            UploadBackend::Local(local) => local.remove(key).await,
        }
    }
}

/// 将 `[A-Za-z0-9._-]` 以外的每个字符替换为 `_`。
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// 前缀去掉首尾 `/`，为空时使用默认值。
pub fn normalize_prefix(prefix: Option<&str>) -> String {
    let trimmed = prefix.unwrap_or_default().trim().trim_matches('/');
    if trimmed.is_empty() {
        DEFAULT_UPLOAD_PREFIX.to_string()
    } else {
        trimmed.to_string()
    }
}

/// `{prefix}/{unixMillis}_{sanitizedName}`。
pub fn build_key(prefix: &str, unix_millis: i64, file_name: &str) -> String {
    format!("{prefix}/{unix_millis}_{}", sanitize_file_name(file_name))
}

fn local_file_name(key: &str) -> Option<&str> {
    let name = key.rsplit('/').next()?;
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    valid.then_some(name)
}

struct UploadedFile {
    name: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

/// 上传接口：multipart 字段 `file`（必填）与 `prefix`（可选）。
pub async fn upload_file(
    Extension(backend): Extension<Arc<UploadBackend>>,
    mut multipart: Multipart,
) -> Result<JsonResponse<UploadResult>, ApiError> {
    let mut file: Option<UploadedFile> = None;
    let mut prefix: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "file" => {
                let Some(name) = field.file_name().filter(|name| !name.is_empty()) else {
                    continue;
                };
                let name = name.to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await?;
                file = Some(UploadedFile {
                    name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            "prefix" => {
                prefix = Some(field.text().await?);
            }
            _ => {}
        }
    }

    let Some(file) = file else {
        return Err(ApiError::BadRequest("No file provided".into()));
    };

    let prefix = normalize_prefix(prefix.as_deref());
    let key = build_key(&prefix, chrono::Utc::now().timestamp_millis(), &file.name);
    let content_type = file
        .content_type
        .filter(|value| !value.is_empty())
        .or_else(|| {
            mime_guess::from_path(&file.name)
                .first()
                .map(|mime| mime.essence_str().to_string())
        })
        .unwrap_or_else(|| "application/octet-stream".to_string());
    debug!(key, content_type, size = file.bytes.len(), "upload received");

    let result = backend.store(key, file.bytes, &content_type).await?;
    Ok(JsonResponse(result))
}

#[derive(Deserialize)]
pub struct DeleteUploadQuery {
    key: String,
}

/// 删除已上传的对象；需要有效的后台会话。
pub async fn delete_upload(
    Extension(backend): Extension<Arc<UploadBackend>>,
    Extension(auth): Extension<Arc<AuthConfig>>,
    jar: CookieJar,
    Query(DeleteUploadQuery { key }): Query<DeleteUploadQuery>,
) -> Result<JsonResponse<serde_json::Value>, ApiError> {
    let user = require_session(&auth, &jar).await?;
    let key = key.trim();
    if key.is_empty() {
        return Err(ApiError::BadRequest("key is required".into()));
    }
    backend.remove(key).await?;
    info!(key, storage = ?backend.storage_kind(), email = %user.email, "upload deleted");
    Ok(JsonResponse(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::Router;
    use axum::body::Body as AxumBody;
    use axum::http::{Request, StatusCode, header};
    use axum::routing::{delete, post};
    use axum_extra::extract::cookie::Cookie;
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use tempfile::tempdir;
    use tower::ServiceExt;

    use crate::auth::SessionEntry;
    use crate::config::SESSION_COOKIE_NAME;
    use crate::r2::{R2Error, public_url_for};

    const BOUNDARY: &str = "studio-boundary";

    #[derive(Default)]
    struct RecordingStore {
        public_base: Option<String>,
        fail: bool,
        uploads: Mutex<Vec<(String, String, usize)>>,
        deletes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn upload(
            &self,
            body: Vec<u8>,
            key: &str,
            content_type: &str,
        ) -> Result<String, R2Error> {
            if self.fail {
                return Err(R2Error::Upload("bucket unreachable".into()));
            }
            self.uploads.lock().expect("lock").push((
                key.to_string(),
                content_type.to_string(),
                body.len(),
            ));
            Ok(self.public_url(key))
        }

        async fn delete(&self, key: &str) -> Result<(), R2Error> {
            self.deletes.lock().expect("lock").push(key.to_string());
            Ok(())
        }

        fn public_url(&self, key: &str) -> String {
            public_url_for(self.public_base.as_deref(), key)
        }

        fn has_public_base(&self) -> bool {
            self.public_base.is_some()
        }
    }

    fn multipart_body(prefix: Option<&str>, file: Option<(&str, &str, &[u8])>) -> Vec<u8> {
        let mut body = Vec::new();
        if let Some(prefix) = prefix {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"prefix\"\r\n\r\n{prefix}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((name, content_type, bytes)) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\nContent-Type: {content_type}\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    async fn post_upload(backend: UploadBackend, body: Vec<u8>) -> (StatusCode, serde_json::Value) {
        let app = Router::new()
            .route("/api/upload", post(upload_file))
            .layer(Extension(Arc::new(backend)));
        let request = Request::post("/api/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(AxumBody::from(body))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    #[test]
    fn sanitize_replaces_each_disallowed_char() {
        assert_eq!(sanitize_file_name("my file (1).png"), "my_file__1_.png");
        assert_eq!(sanitize_file_name("Pic 1.JPG"), "Pic_1.JPG");
        assert_eq!(sanitize_file_name("ok-name_2.tar.gz"), "ok-name_2.tar.gz");
        assert_eq!(sanitize_file_name("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize_file_name("café.jpg"), "caf_.jpg");
        for name in ["a b/c\\d", "ünï cødé?.txt", "\t\n"] {
            let sanitized = sanitize_file_name(name);
            assert_eq!(sanitized.chars().count(), name.chars().count());
            assert!(
                sanitized
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            );
        }
    }

    #[test]
    fn key_uses_prefix_timestamp_and_sanitized_name() {
        assert_eq!(
            build_key("gallery", 1_700_000_000_000, "Pic 1.JPG"),
            "gallery/1700000000000_Pic_1.JPG"
        );
        assert_eq!(normalize_prefix(None), "uploads");
        assert_eq!(normalize_prefix(Some("  ")), "uploads");
        assert_eq!(normalize_prefix(Some("/projects/")), "projects");
    }

    #[test]
    fn local_file_name_takes_last_segment_only() {
        assert_eq!(local_file_name("gallery/1_a.png"), Some("1_a.png"));
        assert_eq!(local_file_name("1_a.png"), Some("1_a.png"));
        assert_eq!(local_file_name("gallery/"), None);
        assert_eq!(local_file_name("gallery/.."), None);
        assert_eq!(local_file_name("gallery/a\\b"), None);
    }

    #[tokio::test]
    async fn missing_file_is_bad_request_without_writes() {
        let temp = tempdir().expect("tempdir");
        let local = LocalUploads::new(temp.path());
        let (status, body) = post_upload(
            UploadBackend::Local(local.clone()),
            multipart_body(Some("gallery"), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No file provided");
        assert!(!local.root_path().exists());

        let store = Arc::new(RecordingStore::default());
        let (status, _) = post_upload(
            UploadBackend::Remote(store.clone()),
            multipart_body(None, None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(store.uploads.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn local_fallback_writes_last_segment_under_uploads() {
        let temp = tempdir().expect("tempdir");
        let backend = UploadBackend::Local(LocalUploads::new(temp.path()));
        let (status, body) = post_upload(
            backend,
            multipart_body(Some("gallery"), Some(("Pic 1.JPG", "image/jpeg", b"jpeg-bytes"))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let result: UploadResult = serde_json::from_value(body).expect("upload result");
        assert_eq!(result.storage, StorageKind::Local);
        assert!(result.key.starts_with("gallery/"));
        assert!(result.key.ends_with("_Pic_1.JPG"));
        let file_name = result.key.trim_start_matches("gallery/");
        assert_eq!(result.url, format!("/uploads/{file_name}"));
        assert!(result.warning.as_deref().is_some_and(|w| w.starts_with("R2 not configured")));

        let written = std::fs::read(temp.path().join("uploads").join(file_name)).expect("file");
        assert_eq!(written, b"jpeg-bytes");
    }

    #[tokio::test]
    async fn remote_upload_returns_public_url() {
        let store = Arc::new(RecordingStore {
            public_base: Some("https://cdn.studio.test".into()),
            ..Default::default()
        });
        let (status, body) = post_upload(
            UploadBackend::Remote(store.clone()),
            multipart_body(None, Some(("my file (1).png", "image/png", b"png"))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["storage"], "r2");
        assert!(body.get("warning").is_none());

        let key = body["key"].as_str().expect("key");
        assert!(key.starts_with("uploads/"));
        assert!(key.ends_with("_my_file__1_.png"));
        assert_eq!(body["url"], format!("https://cdn.studio.test/{key}"));

        let uploads = store.uploads.lock().expect("lock");
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, key);
        assert_eq!(uploads[0].1, "image/png");
        assert_eq!(uploads[0].2, 3);
    }

    #[tokio::test]
    async fn remote_upload_without_public_base_returns_key() {
        let store = Arc::new(RecordingStore::default());
        let (_, body) = post_upload(
            UploadBackend::Remote(store),
            multipart_body(Some("projects"), Some(("a.png", "image/png", b"x"))),
        )
        .await;
        assert_eq!(body["url"], body["key"]);
    }

    #[tokio::test]
    async fn remote_failure_is_internal_error_without_fallback() {
        let temp = tempdir().expect("tempdir");
        let store = Arc::new(RecordingStore {
            fail: true,
            ..Default::default()
        });
        let (status, body) = post_upload(
            UploadBackend::Remote(store),
            multipart_body(Some("gallery"), Some(("a.png", "image/png", b"x"))),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().is_some_and(|msg| msg.contains("bucket unreachable")));
        assert!(!temp.path().join("uploads").exists());
    }

    #[tokio::test]
    async fn detect_selects_backend_from_config() {
        let temp = tempdir().expect("tempdir");
        let local = UploadBackend::detect(None, temp.path());
        assert_eq!(local.storage_kind(), StorageKind::Local);

        let config = R2Config::detect(Some("acct"), Some("ak"), Some("sk"), Some("bucket"), None);
        let remote = UploadBackend::detect(config, temp.path());
        assert_eq!(remote.storage_kind(), StorageKind::R2);
    }

    async fn signed_in() -> (Arc<AuthConfig>, CookieJar) {
        let auth = Arc::new(AuthConfig::new(None, std::time::Duration::from_secs(60)));
        auth.sessions.lock().await.insert(
            "tok".into(),
            SessionEntry {
                email: "admin@studio.test".into(),
                expires_at: std::time::Instant::now() + std::time::Duration::from_secs(60),
            },
        );
        let jar = CookieJar::new().add(Cookie::new(SESSION_COOKIE_NAME, "tok"));
        (auth, jar)
    }

    fn delete_query(key: &str) -> Query<DeleteUploadQuery> {
        Query(DeleteUploadQuery { key: key.into() })
    }

    #[tokio::test]
    async fn delete_removes_local_file() {
        let temp = tempdir().expect("tempdir");
        let local = LocalUploads::new(temp.path());
        local.save("gallery/1_a.png", b"x").await.expect("save");
        let backend = Arc::new(UploadBackend::Local(local.clone()));
        let (auth, jar) = signed_in().await;

        let result = delete_upload(
            Extension(backend.clone()),
            Extension(auth.clone()),
            jar.clone(),
            delete_query("gallery/1_a.png"),
        )
        .await;
        assert!(result.is_ok());
        assert!(!local.root_path().join("1_a.png").exists());

        let result = delete_upload(
            Extension(backend),
            Extension(auth),
            jar,
            delete_query("gallery/1_a.png"),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_forwards_to_object_store() {
        let store = Arc::new(RecordingStore::default());
        let backend = Arc::new(UploadBackend::Remote(store.clone()));
        let (auth, jar) = signed_in().await;
        let result = delete_upload(
            Extension(backend),
            Extension(auth),
            jar,
            delete_query("gallery/1_a.png"),
        )
        .await;
        let Ok(JsonResponse(body)) = result else {
            panic!("delete failed");
        };
        assert_eq!(body, json!({ "ok": true }));
        assert_eq!(*store.deletes.lock().expect("lock"), vec!["gallery/1_a.png".to_string()]);
    }

    #[tokio::test]
    async fn anonymous_delete_is_unauthorized_and_keeps_file() {
        let temp = tempdir().expect("tempdir");
        let local = LocalUploads::new(temp.path());
        local.save("gallery/1_a.png", b"x").await.expect("save");
        let auth = Arc::new(AuthConfig::new(None, std::time::Duration::from_secs(60)));
        let app = Router::new()
            .route("/api/upload", delete(delete_upload))
            .layer(Extension(Arc::new(UploadBackend::Local(local.clone()))))
            .layer(Extension(auth));

        for cookie in [None, Some("adminSession=forged")] {
            let mut request = Request::delete("/api/upload?key=gallery/1_a.png");
            if let Some(cookie) = cookie {
                request = request.header(header::COOKIE, cookie);
            }
            let response = app
                .clone()
                .oneshot(request.body(AxumBody::empty()).expect("request"))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{cookie:?}");
        }
        assert!(local.root_path().join("1_a.png").exists());

        let store = Arc::new(RecordingStore::default());
        let result = delete_upload(
            Extension(Arc::new(UploadBackend::Remote(store.clone()))),
            Extension(Arc::new(AuthConfig::new(None, std::time::Duration::from_secs(60)))),
            CookieJar::new(),
            delete_query("gallery/1_a.png"),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Unauthorized(_))));
        assert!(store.deletes.lock().expect("lock").is_empty());
    }
}
