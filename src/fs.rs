//! Filesystem capability
//!
//! Upload-from-disk and download-to-disk paths go through [`Filesystem`] so the
//! engine can be exercised without touching a real disk. [`LocalFs`] is the
//! `tokio::fs` implementation used by default.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};

/// Boxed reader returned by [`Filesystem::open_read`]
pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed writer returned by [`Filesystem::open_write`]
pub type FileWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Result of [`Filesystem::stat`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub is_dir: bool,
}

/// Local storage operations used by the transfer engine
#[async_trait]
pub trait Filesystem: Send + Sync {
    async fn stat(&self, path: &Path) -> io::Result<FileStat>;

    /// Read a whole file into memory
    async fn read(&self, path: &Path) -> io::Result<Bytes>;

    /// Open a file for incremental reading
    async fn open_read(&self, path: &Path) -> io::Result<FileReader>;

    /// Replace a file's contents
    async fn write(&self, path: &Path, data: Bytes) -> io::Result<()>;

    /// Create (or truncate) a file for incremental writing
    async fn open_write(&self, path: &Path) -> io::Result<FileWriter>;

    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Every regular file below `root`, sorted, symlinks not followed
    async fn walk_files(&self, root: &Path) -> io::Result<Vec<PathBuf>>;
}

/// [`Filesystem`] backed by the local disk
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

#[async_trait]
impl Filesystem for LocalFs {
    async fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let metadata = tokio::fs::metadata(path).await?;
        Ok(FileStat {
            size: metadata.len(),
            is_dir: metadata.is_dir(),
        })
    }

    async fn read(&self, path: &Path) -> io::Result<Bytes> {
        Ok(Bytes::from(tokio::fs::read(path).await?))
    }

    async fn open_read(&self, path: &Path) -> io::Result<FileReader> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Box::new(tokio::io::BufReader::new(file)))
    }

    async fn write(&self, path: &Path, data: Bytes) -> io::Result<()> {
        tokio::fs::write(path, &data).await
    }

    async fn open_write(&self, path: &Path) -> io::Result<FileWriter> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Box::new(tokio::io::BufWriter::new(file)))
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn walk_files(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            for entry in walkdir::WalkDir::new(&root).follow_links(false) {
                let entry = entry.map_err(io::Error::from)?;
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
            files.sort();
            Ok(files)
        })
        .await
        .map_err(io::Error::other)?
    }
}
