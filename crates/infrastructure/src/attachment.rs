use std::path::PathBuf;

use application::{AttachmentError, AttachmentStore};
use async_trait::async_trait;
use domain::AttachmentRef;

/// 附件写入本地上传目录，HTTP 层从同一目录提供静态文件
#[derive(Debug, Clone)]
pub struct FsAttachmentStore {
    root: PathBuf,
}

impl FsAttachmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_of(&self, name: &AttachmentRef) -> PathBuf {
        self.root.join(name.as_str())
    }
}

#[async_trait]
impl AttachmentStore for FsAttachmentStore {
    async fn write(&self, name: &AttachmentRef, bytes: Vec<u8>) -> Result<(), AttachmentError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|err| AttachmentError::write(format!("{}: {err}", self.root.display())))?;

        let path = self.path_of(name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|err| AttachmentError::write(format!("{}: {err}", path.display())))?;

        tracing::debug!(path = %path.display(), "附件已写入磁盘");
        Ok(())
    }
}
