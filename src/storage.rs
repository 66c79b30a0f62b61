use std::fmt;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::ErrorKind;
use tracing::{debug, info};

use crate::atomic::{AtomicFile, TEMP_MARKER};
use crate::config::OBJECT_EXTENSION;
use crate::ident::is_well_formed;

const STAGING_LABEL: &str = "upload";

/// Local directory holding one `<id>.zip` blob per stored world.
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, id: &str) -> Result<PathBuf, StorageError> {
        if !is_well_formed(id) {
            return Err(StorageError::InvalidId);
        }
        Ok(self.root.join(format!("{id}.{OBJECT_EXTENSION}")))
    }

    /// Removes blobs and temp files left behind by a previous process.
    ///
    /// Registry metadata does not survive a restart, so anything found here is
    /// unreachable. Only files this store could have written are touched.
    pub async fn purge(&self) -> io::Result<usize> {
        let mut dir = fs::read_dir(&self.root).await?;
        let suffix = format!(".{OBJECT_EXTENSION}");
        let mut removed = 0;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let is_blob = name
                .strip_suffix(&suffix)
                .is_some_and(is_well_formed);
            let is_temp = name.starts_with('.') && name.contains(TEMP_MARKER);
            if is_blob || is_temp {
                fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, root = ?self.root, "purged leftover objects");
        }
        Ok(removed)
    }

    /// 在存储目录内建立上传用的临时文件。
    pub async fn stage(&self) -> Result<AtomicFile, StorageError> {
        AtomicFile::create(&self.root, STAGING_LABEL).await
    }

    /// 把已写完的临时文件以 `<id>.zip` 落位。
    pub async fn commit_object(&self, id: &str, staged: AtomicFile) -> Result<(), StorageError> {
        let target = self.object_path(id)?;
        let bytes = staged.written();
        staged.commit(&target).await?;
        debug!(id, bytes, "object written");
        Ok(())
    }

    #[cfg(test)]
    pub async fn write_object(&self, id: &str, data: &[u8]) -> Result<(), StorageError> {
        self.object_path(id)?;
        let mut staged = self.stage().await?;
        staged.write_all(data).await?;
        self.commit_object(id, staged).await
    }

    pub async fn open_object(&self, id: &str) -> Result<(File, Metadata), StorageError> {
        let path = self.object_path(id)?;
        let file = File::open(&path).await?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(StorageError::Io(io::Error::from(ErrorKind::NotFound)));
        }
        Ok((file, metadata))
    }

    /// Deletes a blob; returns false when it was already gone.
    pub async fn delete_object(&self, id: &str) -> Result<bool, StorageError> {
        let path = self.object_path(id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug)]
pub enum StorageError {
    InvalidId,
    Io(io::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::Io(err) if err.kind() == ErrorKind::NotFound)
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::InvalidId => f.write_str("invalid object id"),
            StorageError::Io(err) => write!(f, "storage io: {err}"),
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}
