//! 本地回退写入：同目录临时文件 + 原子重命名。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// 写入完成前对外不可见的临时文件。
pub struct AtomicFile {
    target: PathBuf,
    temp_path: PathBuf,
    file: File,
}

impl AtomicFile {
    /// 在目标路径同目录创建隐藏临时文件。
    pub async fn create(target: &Path) -> io::Result<Self> {
        let parent = target
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no parent"))?;
        let base = target
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| "upload".into());
        let temp_path = parent.join(format!(".{base}.tmp.{}", Uuid::new_v4()));
        let file = File::create(&temp_path).await?;
        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            file,
        })
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes).await
    }

    /// 放弃写入并删除临时文件。
    pub async fn discard(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// 刷盘后重命名到目标路径，失败时清理临时文件。
    pub async fn commit(self) -> io::Result<()> {
        let Self {
            target,
            temp_path,
            file,
        } = self;
        if let Err(err) = file.sync_all().await {
            drop(file);
            let _ = fs::remove_file(&temp_path).await;
            return Err(err);
        }
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &target).await {
            #[cfg(windows)]
            {
                if fs::remove_file(&target).await.is_ok() {
                    return fs::rename(&temp_path, &target).await;
                }
            }
            let _ = fs::remove_file(&temp_path).await;
            return Err(err);
        }
        Ok(())
    }
}

/// 一次性写入完整内容。
pub async fn write_atomic(target: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = AtomicFile::create(target).await?;
    if let Err(err) = file.write_all(bytes).await {
        file.discard().await;
        return Err(err);
    }
    file.commit().await
}
