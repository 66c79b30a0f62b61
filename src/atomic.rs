//! 临时写入与原子替换：下载方永远看不到写了一半的文件。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::storage::StorageError;

pub const TEMP_MARKER: &str = ".tmp.";

/// 存储目录内的隐藏临时文件，提交时 rename 到位。
///
/// 未提交就被丢弃（包括请求中途断开）时，临时文件随之删除。
pub struct AtomicFile {
    temp_path: PathBuf,
    file: Option<File>,
    written: u64,
    settled: bool,
}

impl AtomicFile {
    /// 在 `dir` 下创建 `.{label}.tmp.{uuid}`。
    pub async fn create(dir: &Path, label: &str) -> Result<Self, StorageError> {
        let temp_path = dir.join(format!(".{label}{TEMP_MARKER}{}", Uuid::new_v4()));
        let file = File::create(&temp_path).await?;
        Ok(Self {
            temp_path,
            file: Some(file),
            written: 0,
            settled: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.temp_path
    }

    /// 已写入的字节数。
    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<(), StorageError> {
        let file = self.file.as_mut().ok_or_else(closed)?;
        file.write_all(data).await?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// 刷盘，之后可以按路径重新打开读取。
    pub async fn sync(&mut self) -> Result<(), StorageError> {
        let file = self.file.as_mut().ok_or_else(closed)?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    /// 放弃并清理临时文件。
    pub async fn discard(mut self) {
        self.file.take();
        self.settled = true;
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// 同步落盘后原子替换目标文件，失败时临时文件在 drop 时清理。
    pub async fn commit(mut self, target: &Path) -> Result<(), StorageError> {
        self.sync().await?;
        self.file.take();
        fs::rename(&self.temp_path, target).await?;
        self.settled = true;

        if let Some(parent) = target.parent() {
            let _ = sync_dir(parent).await;
        }
        Ok(())
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if !self.settled {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

fn closed() -> StorageError {
    StorageError::Io(io::Error::other("temp file already closed"))
}

async fn sync_dir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = std::fs::File::open(path)?;
        dir.sync_all()
    })
    .await
    .map_err(|err| io::Error::other(err.to_string()))?
}
