//! The reconciliation engine.
//!
//! Merges the pending reading batch with independently-arrived photos into
//! one outbound document. Both arrival orders are valid: a reading with no
//! matching photo goes out with a null reference, and a photo with no
//! matching reading stays pending for a future batch. A failure while
//! handling one reading's photo never blocks the other readings of the
//! batch.

use crate::config::FilenamePolicy;
use crate::merge_buffer::MergeBuffer;
use crate::model::{
    normalize_comment, strip_embedded_photo_fields, MergedDocument, MergedReading, Reading,
    ReadingBatch,
};
use crate::photo_index::PhotoIndex;
use crate::photo_writer::{derive_filename, PhotoWriter};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

/// Result of one merge pass
#[derive(Debug)]
pub struct MergeOutcome {
    pub document: MergedDocument,
    pub photos_written: usize,
    pub photos_failed: usize,
}

/// How one reading's photo resolved
enum Resolution {
    /// No photo was pending for the reading
    NoPhoto,
    /// Written and referenced
    Resolved(String),
    /// Pending photo could not be consumed this pass
    Failed,
}

/// Merges reading batches with pending photos and persists the side effects
pub struct Reconciler {
    writer: PhotoWriter,
    index: Option<PhotoIndex>,
    filename_policy: FilenamePolicy,
    public_base_url: Option<String>,
}

impl Reconciler {
    pub fn new(
        writer: PhotoWriter,
        index: Option<PhotoIndex>,
        filename_policy: FilenamePolicy,
        public_base_url: Option<String>,
    ) -> Self {
        Self {
            writer,
            index,
            filename_policy,
            public_base_url: public_base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    /// Run one merge pass over a drained batch.
    ///
    /// Category structure, 1:1 reading correspondence, and order within each
    /// category are preserved.
    #[instrument(skip(self, batch, buffer), fields(readings = batch.reading_count()))]
    pub async fn reconcile(&self, batch: ReadingBatch, buffer: &mut MergeBuffer) -> MergeOutcome {
        info!(
            categories = batch.campo.len(),
            readings = batch.reading_count(),
            pending_photos = buffer.pending_photos(),
            "Reconciling field data"
        );

        let mut photos_written = 0;
        let mut photos_failed = 0;
        let mut campo = BTreeMap::new();

        for (category, readings) in batch.campo {
            let mut merged = Vec::with_capacity(readings.len());

            for reading in readings {
                let foto = match self.resolve_photo(&reading, buffer).await {
                    Resolution::Resolved(reference) => {
                        photos_written += 1;
                        Some(reference)
                    }
                    Resolution::Failed => {
                        photos_failed += 1;
                        None
                    }
                    Resolution::NoPhoto => None,
                };

                merged.push(assemble(reading, foto));
            }

            campo.insert(category, merged);
        }

        metrics::counter!("bridge.photos.written").increment(photos_written as u64);

        MergeOutcome {
            document: MergedDocument {
                campo,
                extra: batch.extra,
            },
            photos_written,
            photos_failed,
        }
    }

    /// Consume the pending photo for one reading, if any.
    ///
    /// Write failures keep the payload pending so a later merge can retry;
    /// an undecodable payload is dropped outright since no retry can help.
    async fn resolve_photo(&self, reading: &Reading, buffer: &mut MergeBuffer) -> Resolution {
        let Some(photo) = buffer.claim_photo(&reading.id) else {
            return Resolution::NoPhoto;
        };

        // Field app payloads occasionally arrive with embedded line breaks
        let compact: String = photo
            .base64
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();

        let bytes = match STANDARD.decode(compact.as_bytes()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(reading_id = %reading.id, error = %e, "Dropping undecodable photo payload");
                metrics::counter!("bridge.photos.undecodable").increment(1);
                return Resolution::Failed;
            }
        };

        let filename = derive_filename(self.filename_policy, reading);

        match self.writer.write(&filename, &bytes).await {
            Ok(path) => {
                let reference = match &self.public_base_url {
                    Some(base) => format!("{}/{}", base, filename),
                    None => path.display().to_string(),
                };

                if let Some(index) = &self.index {
                    // Best-effort record; the document goes out regardless
                    if let Err(e) = index
                        .record_photo(reading.point_code(), &filename, &reference)
                        .await
                    {
                        warn!(reading_id = %reading.id, error = %e, "Photo record insert failed");
                        metrics::counter!("bridge.photos.record_failed").increment(1);
                    }
                }

                Resolution::Resolved(reference)
            }
            Err(e) => {
                warn!(
                    reading_id = %reading.id,
                    error = %e,
                    "Photo write failed, keeping payload for a later merge"
                );
                metrics::counter!("bridge.photos.write_failed").increment(1);
                buffer.restore_photo(reading.id.clone(), photo);
                Resolution::Failed
            }
        }
    }
}

fn assemble(reading: Reading, foto: Option<String>) -> MergedReading {
    let Reading {
        id,
        poco,
        observacao,
        mut extra,
    } = reading;

    strip_embedded_photo_fields(&mut extra);

    MergedReading {
        id,
        poco,
        observacao: normalize_comment(observacao.as_deref()),
        foto,
        extra,
    }
}
