//! Request-scoped spill stores for fetched guide documents
//!
//! Each store is an anonymous temporary file: it has no name on disk and is
//! released when the last handle is dropped. Writers append through a
//! [`SpillSink`]; readers always start from the beginning, so a store can be
//! read any number of times.

use std::fs::File;
use std::io::{self, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;

use crate::errors::UpstreamError;
use crate::proxy::sink::{ResponseSink, SinkControl};

#[derive(Debug)]
pub struct SpillStore {
    provider_id: i64,
    file: File,
}

impl SpillStore {
    /// Create an empty store in `dir`, or the system temp dir
    pub async fn create(provider_id: i64, dir: Option<&Path>) -> io::Result<Self> {
        let dir: Option<PathBuf> = dir.map(Path::to_path_buf);
        let file = tokio::task::spawn_blocking(move || match dir {
            Some(dir) => tempfile::tempfile_in(dir),
            None => tempfile::tempfile(),
        })
        .await
        .map_err(io::Error::other)??;
        Ok(Self { provider_id, file })
    }

    /// Store pre-existing content
    pub fn from_bytes(provider_id: i64, content: &[u8]) -> io::Result<Self> {
        let mut file = tempfile::tempfile()?;
        file.write_all(content)?;
        file.flush()?;
        Ok(Self { provider_id, file })
    }

    pub fn provider_id(&self) -> i64 {
        self.provider_id
    }

    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Append-only sink for the fetch client
    pub fn sink(&self) -> io::Result<SpillSink> {
        Ok(SpillSink {
            file: tokio::fs::File::from_std(self.file.try_clone()?),
            status: None,
        })
    }

    /// Buffered reader positioned at the start of the content
    pub fn reader(&self) -> io::Result<BufReader<File>> {
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(0))?;
        Ok(BufReader::new(file))
    }
}

/// Writes an upstream body into a [`SpillStore`]
pub struct SpillSink {
    file: tokio::fs::File,
    status: Option<StatusCode>,
}

impl SpillSink {
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }
}

#[async_trait]
impl ResponseSink for SpillSink {
    fn on_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    async fn write_chunk(&mut self, chunk: Bytes) -> Result<SinkControl, UpstreamError> {
        self.file.write_all(&chunk).await?;
        Ok(SinkControl::Continue)
    }

    async fn finish(&mut self) -> Result<(), UpstreamError> {
        self.file.flush().await?;
        Ok(())
    }
}
