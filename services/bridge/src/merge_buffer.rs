//! Pending-merge buffer.
//!
//! Holds the most recent reading-batch snapshot and the photos that have
//! arrived independently of it, keyed by reading id. The dispatcher task is
//! the single owner; ingress mutates it only through that task, so the
//! drain-and-clear sequence of a merge pass never races an arrival.

use crate::ingress::IngressEvent;
use crate::model::ReadingBatch;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A photo payload waiting to be claimed by a reading
#[derive(Debug, Clone)]
pub struct PendingPhoto {
    /// Transport-encoded image bytes as received
    pub base64: String,
    /// Arrival time, used for TTL eviction
    pub received_at: Instant,
}

impl PendingPhoto {
    pub fn new(base64: String) -> Self {
        Self {
            base64,
            received_at: Instant::now(),
        }
    }
}

/// Buffer of un-merged inbound state
pub struct MergeBuffer {
    batch: Option<ReadingBatch>,
    photos: HashMap<String, PendingPhoto>,
    photo_ttl: Duration,
}

impl MergeBuffer {
    pub fn new(photo_ttl: Duration) -> Self {
        Self {
            batch: None,
            photos: HashMap::new(),
            photo_ttl,
        }
    }

    /// Fold one classified event into the buffer.
    ///
    /// A new reading batch replaces the prior one wholesale (last writer
    /// wins); a photo for an id already pending overwrites the old payload.
    pub fn apply(&mut self, event: IngressEvent) {
        match event {
            IngressEvent::Readings(batch) => {
                if let Some(old) = self.batch.replace(batch) {
                    warn!(
                        readings = old.reading_count(),
                        "Reading batch superseded before it was merged"
                    );
                    metrics::counter!("bridge.buffer.batches_superseded").increment(1);
                }
            }
            IngressEvent::Photo {
                reading_id,
                payload,
            } => {
                if self
                    .photos
                    .insert(reading_id.clone(), PendingPhoto::new(payload.foto_base64))
                    .is_some()
                {
                    debug!(reading_id = %reading_id, "Pending photo overwritten");
                }
            }
        }
    }

    /// True when a reading batch is waiting to be merged
    pub fn has_batch(&self) -> bool {
        self.batch.is_some()
    }

    /// Number of photos waiting for a matching reading
    pub fn pending_photos(&self) -> usize {
        self.photos.len()
    }

    pub fn contains_photo(&self, reading_id: &str) -> bool {
        self.photos.contains_key(reading_id)
    }

    /// Remove and return the pending batch, if any
    pub fn take_batch(&mut self) -> Option<ReadingBatch> {
        self.batch.take()
    }

    /// Remove and return the pending photo for a reading id.
    ///
    /// Callers that fail to consume the photo should put it back with
    /// [`restore_photo`](Self::restore_photo) so a later merge can retry.
    pub fn claim_photo(&mut self, reading_id: &str) -> Option<PendingPhoto> {
        self.photos.remove(reading_id)
    }

    /// Return an unconsumed photo to the buffer
    pub fn restore_photo(&mut self, reading_id: String, photo: PendingPhoto) {
        self.photos.insert(reading_id, photo);
    }

    /// Drop photos that have waited longer than the configured TTL.
    ///
    /// Returns the number of evicted entries.
    pub fn evict_stale_photos(&mut self) -> usize {
        let ttl = self.photo_ttl;
        let before = self.photos.len();
        let now = Instant::now();

        self.photos.retain(|reading_id, photo| {
            let keep = now.duration_since(photo.received_at) <= ttl;
            if !keep {
                warn!(reading_id = %reading_id, "Evicting orphaned photo past TTL");
            }
            keep
        });

        let evicted = before - self.photos.len();
        if evicted > 0 {
            metrics::counter!("bridge.buffer.photos_evicted").increment(evicted as u64);
        }
        evicted
    }
}
