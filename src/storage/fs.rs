//! Filesystem store for extracted content

use crate::storage::traits::Store;
use crate::StoreError;
use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::io::Write;
use std::path::Path;

/// [`Store`] backed by the local filesystem
///
/// Writes go to a uniquely named temporary file in the target's directory that is
/// synced and then renamed over the target, so readers never observe a half-written
/// file and concurrent writers to one path never share a temporary file.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStore;

impl FsStore {
    pub fn new() -> Self {
        Self
    }
}

fn write_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Write {
        path: path.display().to_string(),
        source,
    }
}

fn temp_prefix(path: &Path) -> OsString {
    let mut prefix = OsString::from(".");
    prefix.push(path.file_name().unwrap_or_else(|| OsStr::new("output")));
    prefix.push(".");
    prefix
}

fn replace_blocking(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(&temp_prefix(path))
        .suffix(".part")
        .tempfile_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

async fn replace(path: &Path, bytes: Vec<u8>) -> Result<(), StoreError> {
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || replace_blocking(&target, &bytes))
        .await
        .map_err(|e| write_error(path, std::io::Error::new(std::io::ErrorKind::Other, e)))?
        .map_err(|e| write_error(path, e))
}

#[async_trait]
impl Store for FsStore {
    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        replace(path, bytes.to_vec()).await
    }

    async fn append_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let mut content = match tokio::fs::read(path).await {
            Ok(existing) => existing,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => {
                return Err(StoreError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        content.extend_from_slice(bytes);
        replace(path, content).await
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a/b/page.html");

        FsStore.write_atomic(&target, b"<p>hi</p>").await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"<p>hi</p>");
        assert!(FsStore.exists(&target).await);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("a/b"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![OsString::from("page.html")]);
    }

    #[tokio::test]
    async fn test_write_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("page.html");

        FsStore.write_atomic(&target, b"old").await.unwrap();
        FsStore.write_atomic(&target, b"new").await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_append() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("list.html");

        FsStore.append_atomic(&target, b"one\n").await.unwrap();
        FsStore.append_atomic(&target, b"two\n").await.unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "one\ntwo\n");
    }

    #[tokio::test]
    async fn test_exists_is_false_for_directories() {
        let dir = TempDir::new().unwrap();
        assert!(!FsStore.exists(dir.path()).await);
        assert!(!FsStore.exists(&dir.path().join("missing")).await);
    }

    #[tokio::test]
    async fn test_concurrent_writes_to_one_path_stay_whole() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("shared.html");
        let first = vec![b'a'; 256 * 1024];
        let second = vec![b'b'; 256 * 1024];

        let (a, b) = tokio::join!(
            FsStore.write_atomic(&target, &first),
            FsStore.write_atomic(&target, &second)
        );
        a.unwrap();
        b.unwrap();

        let written = std::fs::read(&target).unwrap();
        assert!(written == first || written == second);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_file_where_directory_is_needed_is_not_transient() {
        let dir = TempDir::new().unwrap();
        FsStore.write_atomic(&dir.path().join("x"), b"file").await.unwrap();

        let err = FsStore
            .write_atomic(&dir.path().join("x/a"), b"child")
            .await
            .unwrap_err();
        assert!(!err.is_transient(), "{}", err);
    }
}
