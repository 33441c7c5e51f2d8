//! Photo file sink.
//!
//! Writes decoded photo bytes into the configured directory. The directory
//! is created once at startup, not per write. Writing to an existing
//! filename silently replaces it; the identifier-derived name is the only
//! uniqueness in play.

use crate::config::FilenamePolicy;
use crate::model::Reading;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur while persisting a photo
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("failed to create photo directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write photo {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Derive the storage filename for a reading's photo.
///
/// Deployments have used both shapes; the policy is explicit configuration,
/// not an implicit behavior change.
pub fn derive_filename(policy: FilenamePolicy, reading: &Reading) -> String {
    match policy {
        FilenamePolicy::PointAndId => format!(
            "{} - {}.jpg",
            sanitize_component(reading.point_code()),
            sanitize_component(&reading.id)
        ),
        FilenamePolicy::IdOnly => format!("{}.jpg", sanitize_component(&reading.id)),
    }
}

/// Keep derived names inside the photo directory: path separators and NUL
/// become underscores. Spaces and dots are legitimate in point codes.
fn sanitize_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            _ => c,
        })
        .collect()
}

/// File writer rooted at the configured photo directory
pub struct PhotoWriter {
    root: PathBuf,
}

impl PhotoWriter {
    /// Create the writer, creating the destination directory if absent
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, WriteError> {
        let root = root.into();

        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| WriteError::CreateDir {
                path: root.clone(),
                source,
            })?;

        // Absolute root so references in the outbound document are stable
        // regardless of the working directory
        let root = root.canonicalize().map_err(|source| WriteError::CreateDir {
            path: root.clone(),
            source,
        })?;

        info!(path = %root.display(), "Photo directory ready");

        Ok(Self { root })
    }

    /// Write photo bytes, replacing any existing file with the same name
    pub async fn write(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf, WriteError> {
        let path = self.root.join(filename);

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| WriteError::Io {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), size_bytes = bytes.len(), "Photo written");
        metrics::counter!("bridge.photos.bytes_written").increment(bytes.len() as u64);

        Ok(path)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
