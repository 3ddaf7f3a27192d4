//! Report Layer
//!
//! Turns one capture's tables into a self-contained HTML document and stores
//! it compressed for later serving.
//!
//! - [`Report`] / [`Section`] / [`Cell`]: document model with in-page links
//! - [`render_report`]: askama rendering with inline CSS
//! - [`ArtifactWriter`] / [`FsArtifactWriter`]: brotli artifacts on disk

mod model;
mod render;
mod writer;

use thiserror::Error;

pub use model::{Cell, MetricCell, MetricLabels, Report, ReportHeader, ReportIssue, Section};
pub use render::render_report;
pub use writer::{ARTIFACT_SUFFIX, ArtifactKey, ArtifactWriter, FsArtifactWriter};

/// Errors while rendering or storing a report.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Template rendering failed.
    #[error("render error: {0}")]
    Render(#[from] askama::Error),

    /// Artifact I/O failed.
    #[error("artifact I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Partition key doesn't name a valid artifact.
    #[error("invalid artifact key: {0}")]
    InvalidKey(String),
}
