//! Compressed report artifacts on disk.
//!
//! Reports are brotli-compressed and laid out by instance and month:
//! `<root>/<inst_id>/<YYYYMM>/<YYYYMMDD_HHMMSS>.html.br`.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Local};

use crate::report::ReportError;

/// File suffix of stored artifacts.
pub const ARTIFACT_SUFFIX: &str = ".html.br";

/// Brotli quality (0-11).
const BROTLI_QUALITY: u32 = 6;

/// Brotli window size (log2).
const BROTLI_LGWIN: u32 = 22;

const BUFFER_SIZE: usize = 64 * 1024;

/// Identity of one report artifact.
///
/// `inst_id` must be positive. A negative id puts a `-` in the key, which
/// [`FsArtifactWriter::path_for`] rejects; the central store skips
/// non-positive ids when listing instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactKey {
    pub inst_id: i64,
    pub captured_at: DateTime<Local>,
}

impl ArtifactKey {
    pub fn new(inst_id: i64, captured_at: DateTime<Local>) -> Self {
        Self {
            inst_id,
            captured_at,
        }
    }

    /// `<instId>/<YYYYMM>/<YYYYMMDD_HHMMSS>`
    pub fn partition_key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.inst_id,
            self.captured_at.format("%Y%m"),
            self.captured_at.format("%Y%m%d_%H%M%S")
        )
    }
}

/// Destination for rendered reports.
#[async_trait]
pub trait ArtifactWriter: Send + Sync {
    async fn write(&self, key: &ArtifactKey, html: String) -> Result<(), ReportError>;
}

/// Writes brotli-compressed reports below a root directory.
#[derive(Debug, Clone)]
pub struct FsArtifactWriter {
    root: PathBuf,
}

impl FsArtifactWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding the artifact for `partition_key`.
    ///
    /// Keys must have exactly three non-empty segments of ASCII
    /// alphanumerics and underscores, so no key can escape the root.
    pub fn path_for(&self, partition_key: &str) -> Result<PathBuf, ReportError> {
        let segments: Vec<&str> = partition_key.split('/').collect();
        let valid = segments.len() == 3
            && segments.iter().all(|s| {
                !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            });
        if !valid {
            return Err(ReportError::InvalidKey(partition_key.to_string()));
        }

        let mut path = self.root.clone();
        path.push(segments[0]);
        path.push(segments[1]);
        path.push(format!("{}{ARTIFACT_SUFFIX}", segments[2]));
        Ok(path)
    }

    /// Stored (compressed) bytes of an artifact.
    pub async fn read_compressed(&self, partition_key: &str) -> Result<Vec<u8>, ReportError> {
        let path = self.path_for(partition_key)?;
        Ok(tokio::fs::read(path).await?)
    }

    /// Decompressed HTML of an artifact.
    pub async fn read_html(&self, partition_key: &str) -> Result<String, ReportError> {
        let compressed = self.read_compressed(partition_key).await?;
        let html = tokio::task::spawn_blocking(move || decompress(&compressed))
            .await
            .map_err(std::io::Error::other)??;
        Ok(html)
    }
}

#[async_trait]
impl ArtifactWriter for FsArtifactWriter {
    async fn write(&self, key: &ArtifactKey, html: String) -> Result<(), ReportError> {
        let path = self.path_for(&key.partition_key())?;
        tokio::task::spawn_blocking(move || write_compressed(&path, html.as_bytes()))
            .await
            .map_err(std::io::Error::other)??;
        Ok(())
    }
}

fn write_compressed(path: &Path, data: &[u8]) -> Result<(), ReportError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let file = std::fs::File::create(path)?;
    let buffered = std::io::BufWriter::with_capacity(BUFFER_SIZE, file);
    let mut compressor =
        brotli::CompressorWriter::new(buffered, BUFFER_SIZE, BROTLI_QUALITY, BROTLI_LGWIN);
    compressor.write_all(data)?;
    compressor.flush()?;

    // into_inner finishes the brotli stream.
    let mut buffered = compressor.into_inner();
    buffered.flush()?;
    Ok(())
}

fn decompress(data: &[u8]) -> Result<String, ReportError> {
    let mut html = String::new();
    brotli::Decompressor::new(data, BUFFER_SIZE).read_to_string(&mut html)?;
    Ok(html)
}
