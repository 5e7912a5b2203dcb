use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Raw byte storage for one JSON document.
#[async_trait]
pub trait DocumentBackend: Send + Sync + 'static {
    /// `Ok(None)` when no document has been written yet.
    async fn read(&self) -> io::Result<Option<Vec<u8>>>;
    async fn write(&self, bytes: &[u8]) -> io::Result<()>;
}

/// Document on disk. Writes land in a sibling temp file that is fsynced and
/// renamed over the target, so readers see either the old or the new file.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "events.json".to_string());
        self.path
            .with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()))
    }
}

#[async_trait]
impl DocumentBackend for FileBackend {
    async fn read(&self) -> io::Result<Option<Vec<u8>>> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let temp = self.temp_path();
        let result = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp, &self.path).await
        }
        .await;
        if result.is_err() {
            let _ = fs::remove_file(&temp).await;
        }
        result
    }
}

/// In-process document, for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryBackend {
    document: Mutex<Option<Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(bytes: Vec<u8>) -> Self {
        Self {
            document: Mutex::new(Some(bytes)),
        }
    }
}

#[async_trait]
impl DocumentBackend for MemoryBackend {
    async fn read(&self) -> io::Result<Option<Vec<u8>>> {
        let guard = self
            .document
            .lock()
            .map_err(|_| io::Error::other("memory document lock poisoned"))?;
        Ok(guard.clone())
    }

    async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let mut guard = self
            .document
            .lock()
            .map_err(|_| io::Error::other("memory document lock poisoned"))?;
        *guard = Some(bytes.to_vec());
        Ok(())
    }
}

#[async_trait]
impl<B: DocumentBackend + ?Sized> DocumentBackend for std::sync::Arc<B> {
    async fn read(&self) -> io::Result<Option<Vec<u8>>> {
        (**self).read().await
    }

    async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        (**self).write(bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_backend_reads_none_before_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("data.json"));
        assert!(backend.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_backend_replaces_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("nested").join("data.json"));
        backend.write(b"[1]").await.unwrap();
        backend.write(b"[2]").await.unwrap();
        assert_eq!(backend.read().await.unwrap().unwrap(), b"[2]".to_vec());

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
    }
}
