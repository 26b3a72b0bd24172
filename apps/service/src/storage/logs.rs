//! Append-only log segments.
//!
//! Every check has one active segment `{log_dir}/{id}.log`. Rotation copies
//! it into a gzip archive `{log_dir}/{archive_id}.gz` and then truncates the
//! copied prefix. Between the two steps a `{id}.log.pending` marker records
//! how many bytes were archived, so an interrupted rotation can finish the
//! truncation later without archiving the same lines twice. A crash after
//! the archive is written but before the marker is can still archive a
//! prefix twice.
//!
//! Per-log locks only serialise callers inside one process. Two processes
//! rotating the same directory, such as the `rotate` command next to a
//! running daemon, can archive the same prefix under two archive names.

use async_trait::async_trait;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tracing::{debug, warn};

use super::{KeyedLocks, is_safe_name};
use crate::error::LogError;

const ACTIVE_EXT: &str = ".log";
const ARCHIVE_EXT: &str = ".gz";
const PENDING_EXT: &str = ".log.pending";

#[async_trait]
pub trait LogStore: Send + Sync {
    /// Append one line to the active segment, creating it if needed
    async fn append(&self, log_name: &str, line: &str) -> Result<(), LogError>;

    /// Names of active segments, plus archives when `include_compressed`
    async fn list(&self, include_compressed: bool) -> Result<Vec<String>, LogError>;

    /// Archive the current content of `log_id` as `archive_id`.
    ///
    /// Returns the number of bytes archived. Leaves a pending truncation
    /// for that many bytes until [`LogStore::truncate`] runs.
    async fn compress(&self, log_id: &str, archive_id: &str) -> Result<u64, LogError>;

    /// Empty the active segment in place.
    ///
    /// After a `compress` only the archived prefix is removed, lines
    /// appended since stay in the segment.
    async fn truncate(&self, log_id: &str) -> Result<(), LogError>;

    /// Bytes archived by a `compress` whose truncation has not completed
    async fn pending_truncation(&self, log_id: &str) -> Result<Option<u64>, LogError>;

    /// Full text of an active segment
    async fn read(&self, log_id: &str) -> Result<String, LogError>;

    /// Full text of an archive
    async fn decompress(&self, archive_id: &str) -> Result<String, LogError>;
}

pub struct FileLogStore {
    log_dir: PathBuf,
    locks: KeyedLocks,
}

impl FileLogStore {
    pub async fn new(log_dir: impl Into<PathBuf>) -> Result<Self, LogError> {
        let log_dir = log_dir.into();
        fs::create_dir_all(&log_dir).await?;
        debug!("FileLogStore initialized at {:?}", log_dir);
        Ok(Self { log_dir, locks: KeyedLocks::new() })
    }

    fn path(&self, name: &str, ext: &str) -> Result<PathBuf, LogError> {
        if !is_safe_name(name) {
            return Err(LogError::InvalidName(name.to_string()));
        }
        Ok(self.log_dir.join(format!("{name}{ext}")))
    }

    async fn read_pending(&self, log_id: &str) -> Result<Option<u64>, LogError> {
        let marker = self.path(log_id, PENDING_EXT)?;
        let raw = match fs::read_to_string(&marker).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        raw.trim().parse::<u64>().map(Some).map_err(|e| {
            LogError::Io(std::io::Error::new(
                ErrorKind::InvalidData,
                format!("corrupt pending marker {marker:?}: {e}"),
            ))
        })
    }
}

fn missing_as(name: &str) -> impl FnOnce(std::io::Error) -> LogError + '_ {
    move |e| {
        if e.kind() == ErrorKind::NotFound {
            LogError::NotFound(name.to_string())
        } else {
            LogError::Io(e)
        }
    }
}

#[async_trait]
impl LogStore for FileLogStore {
    async fn append(&self, log_name: &str, line: &str) -> Result<(), LogError> {
        let path = self.path(log_name, ACTIVE_EXT)?;
        let _guard = self.locks.lock(log_name).await;

        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        let mut entry = String::with_capacity(line.len() + 1);
        entry.push_str(line);
        entry.push('\n');
        file.write_all(entry.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn list(&self, include_compressed: bool) -> Result<Vec<String>, LogError> {
        let mut entries = fs::read_dir(&self.log_dir).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                warn!("Skipping non UTF-8 file name in {:?}", self.log_dir);
                continue;
            };
            if let Some(id) = name.strip_suffix(ACTIVE_EXT) {
                names.push(id.to_string());
            } else if include_compressed {
                if let Some(id) = name.strip_suffix(ARCHIVE_EXT) {
                    names.push(id.to_string());
                }
            }
        }
        Ok(names)
    }

    async fn compress(&self, log_id: &str, archive_id: &str) -> Result<u64, LogError> {
        let source = self.path(log_id, ACTIVE_EXT)?;
        let target = self.path(archive_id, ARCHIVE_EXT)?;

        let content = {
            let _guard = self.locks.lock(log_id).await;
            fs::read(&source).await.map_err(missing_as(log_id))?
        };

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&content)?;
        let compressed = encoder.finish()?;

        let mut archive = match OpenOptions::new().write(true).create_new(true).open(&target).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(LogError::ArchiveExists(archive_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        archive.write_all(&compressed).await?;
        archive.sync_all().await?;

        let archived = content.len() as u64;
        let _guard = self.locks.lock(log_id).await;
        // Several compresses before one truncate all cover the same prefix
        let pending = self.read_pending(log_id).await?.unwrap_or(0).max(archived);
        fs::write(self.path(log_id, PENDING_EXT)?, pending.to_string()).await?;

        debug!("Archived {} bytes of {} as {}", archived, log_id, archive_id);
        Ok(archived)
    }

    async fn truncate(&self, log_id: &str) -> Result<(), LogError> {
        let path = self.path(log_id, ACTIVE_EXT)?;
        let _guard = self.locks.lock(log_id).await;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .await
            .map_err(missing_as(log_id))?;

        match self.read_pending(log_id).await? {
            Some(archived) => {
                let mut content = Vec::new();
                file.read_to_end(&mut content).await?;
                let start = usize::try_from(archived).unwrap_or(usize::MAX).min(content.len());
                let keep = content.split_off(start);

                file.set_len(0).await?;
                file.seek(SeekFrom::Start(0)).await?;
                file.write_all(&keep).await?;
                file.flush().await?;
            }
            None => file.set_len(0).await?,
        }

        match fs::remove_file(self.path(log_id, PENDING_EXT)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn pending_truncation(&self, log_id: &str) -> Result<Option<u64>, LogError> {
        self.read_pending(log_id).await
    }

    async fn read(&self, log_id: &str) -> Result<String, LogError> {
        let path = self.path(log_id, ACTIVE_EXT)?;
        fs::read_to_string(&path).await.map_err(missing_as(log_id))
    }

    async fn decompress(&self, archive_id: &str) -> Result<String, LogError> {
        let path = self.path(archive_id, ARCHIVE_EXT)?;
        let compressed = fs::read(&path).await.map_err(missing_as(archive_id))?;

        let mut text = String::new();
        GzDecoder::new(compressed.as_slice()).read_to_string(&mut text)?;
        Ok(text)
    }
}
