//! Event dispatcher: the single owner of the pending-merge buffer.
//!
//! One task receives classified events from the MQTT listener, folds them
//! into the buffer, re-arms the debounce timer, and runs the merge pass when
//! the quiet period elapses. Because buffer, timer, and merge all live in
//! this one task, the drain-and-clear sequence is a single critical section
//! and a photo arriving mid-merge is simply the next event in the queue.

use crate::debounce::Debounce;
use crate::ingress::IngressEvent;
use crate::merge_buffer::MergeBuffer;
use crate::reconciler::Reconciler;
use crate::webhook::DeliverySink;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

/// Counters surfaced through the status endpoint
#[derive(Debug, Default)]
pub struct BridgeStats {
    pub batches_received: AtomicU64,
    pub photos_received: AtomicU64,
    pub merges_completed: AtomicU64,
    pub deliveries_failed: AtomicU64,
    pub photos_written: AtomicU64,
    pub photos_pending: AtomicU64,
    /// Unix seconds of the last completed merge pass, 0 before the first
    pub last_merge_unix: AtomicI64,
}

impl BridgeStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let last = self.last_merge_unix.load(Ordering::Relaxed);
        StatsSnapshot {
            batches_received: self.batches_received.load(Ordering::Relaxed),
            photos_received: self.photos_received.load(Ordering::Relaxed),
            merges_completed: self.merges_completed.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
            photos_written: self.photos_written.load(Ordering::Relaxed),
            photos_pending: self.photos_pending.load(Ordering::Relaxed),
            last_merge_at: (last > 0).then(|| Utc.timestamp_opt(last, 0).single()).flatten(),
        }
    }
}

/// Point-in-time view of the bridge counters
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub batches_received: u64,
    pub photos_received: u64,
    pub merges_completed: u64,
    pub deliveries_failed: u64,
    pub photos_written: u64,
    pub photos_pending: u64,
    pub last_merge_at: Option<DateTime<Utc>>,
}

/// Owns the buffer and debounce, drives merge passes
pub struct Dispatcher {
    events: mpsc::Receiver<IngressEvent>,
    buffer: MergeBuffer,
    debounce: Debounce,
    reconciler: Reconciler,
    sink: Arc<dyn DeliverySink>,
    stats: Arc<BridgeStats>,
}

impl Dispatcher {
    pub fn new(
        events: mpsc::Receiver<IngressEvent>,
        quiet_period: Duration,
        photo_ttl: Duration,
        reconciler: Reconciler,
        sink: Arc<dyn DeliverySink>,
        stats: Arc<BridgeStats>,
    ) -> Self {
        Self {
            events,
            buffer: MergeBuffer::new(photo_ttl),
            debounce: Debounce::new(quiet_period),
            reconciler,
            sink,
            stats,
        }
    }

    /// Run until the event channel closes
    pub async fn run(mut self) {
        info!("Dispatcher started");

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.apply(event),
                    None => {
                        info!("Event channel closed, dispatcher stopping");
                        break;
                    }
                },
                _ = self.debounce.fired() => self.merge_pass().await,
            }
        }

        if self.buffer.has_batch() {
            warn!("Stopping with an unmerged reading batch pending");
        }
    }

    /// Fold one event into the buffer and restart the quiet period
    fn apply(&mut self, event: IngressEvent) {
        match &event {
            IngressEvent::Readings(_) => {
                self.stats.batches_received.fetch_add(1, Ordering::Relaxed);
            }
            IngressEvent::Photo { .. } => {
                self.stats.photos_received.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.buffer.apply(event);
        self.debounce.rearm();

        self.stats
            .photos_pending
            .store(self.buffer.pending_photos() as u64, Ordering::Relaxed);
        metrics::gauge!("bridge.buffer.photos_pending").set(self.buffer.pending_photos() as f64);
    }

    /// One merge pass: evict stale photos, drain the batch, reconcile,
    /// deliver. The batch is consumed either way; delivery failure after the
    /// bounded retry drops it loudly.
    #[instrument(skip(self))]
    async fn merge_pass(&mut self) {
        let evicted = self.buffer.evict_stale_photos();
        if evicted > 0 {
            debug!(evicted, "Evicted stale pending photos");
        }

        let Some(batch) = self.buffer.take_batch() else {
            debug!("Quiet period elapsed with no pending batch");
            return;
        };

        let outcome = self.reconciler.reconcile(batch, &mut self.buffer).await;

        self.stats
            .photos_written
            .fetch_add(outcome.photos_written as u64, Ordering::Relaxed);
        self.stats.merges_completed.fetch_add(1, Ordering::Relaxed);
        self.stats
            .last_merge_unix
            .store(Utc::now().timestamp(), Ordering::Relaxed);
        self.stats
            .photos_pending
            .store(self.buffer.pending_photos() as u64, Ordering::Relaxed);
        metrics::counter!("bridge.merges.completed").increment(1);
        metrics::gauge!("bridge.buffer.photos_pending").set(self.buffer.pending_photos() as f64);

        match self.sink.deliver(&outcome.document).await {
            Ok(()) => {
                metrics::counter!("bridge.deliveries.completed").increment(1);
            }
            Err(e) => {
                error!(
                    error = %e,
                    category = e.category(),
                    readings = outcome.document.reading_count(),
                    "Delivery failed, merged batch dropped"
                );
                self.stats.deliveries_failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("bridge.deliveries.failed").increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilenamePolicy;
    use crate::model::{MergedDocument, PhotoEnvelope, Reading, ReadingBatch};
    use crate::photo_writer::PhotoWriter;
    use crate::webhook::DeliveryError;
    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde_json::Map;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    const QUIET: Duration = Duration::from_secs(2);

    /// Captures delivered documents; optionally fails the first N attempts
    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<MergedDocument>>,
        fail_first: AtomicUsize,
    }

    #[async_trait]
    impl DeliverySink for RecordingSink {
        async fn deliver(&self, document: &MergedDocument) -> Result<(), DeliveryError> {
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(DeliveryError::Status {
                    status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                    body: "boom".to_string(),
                });
            }
            self.delivered.lock().unwrap().push(document.clone());
            Ok(())
        }
    }

    fn batch_event(ids: &[&str]) -> IngressEvent {
        let readings = ids
            .iter()
            .map(|id| Reading {
                id: id.to_string(),
                poco: format!("PB-01 - {}", id),
                observacao: None,
                extra: Map::new(),
            })
            .collect();

        let mut campo = BTreeMap::new();
        campo.insert("PP".to_string(), readings);
        IngressEvent::Readings(ReadingBatch {
            campo,
            extra: Map::new(),
        })
    }

    fn photo_event(id: &str) -> IngressEvent {
        IngressEvent::Photo {
            reading_id: id.to_string(),
            payload: PhotoEnvelope {
                foto_base64: STANDARD.encode(b"fake-jpeg"),
            },
        }
    }

    async fn spawn_dispatcher(
        dir: &std::path::Path,
        sink: Arc<RecordingSink>,
        stats: Arc<BridgeStats>,
    ) -> (mpsc::Sender<IngressEvent>, tokio::task::JoinHandle<()>) {
        let reconciler = Reconciler::new(
            PhotoWriter::new(dir).await.unwrap(),
            None,
            FilenamePolicy::PointAndId,
            None,
        );

        let (tx, rx) = mpsc::channel(16);
        let dispatcher = Dispatcher::new(
            rx,
            QUIET,
            Duration::from_secs(900),
            reconciler,
            sink,
            stats,
        );

        (tx, tokio::spawn(dispatcher.run()))
    }

    /// The paused clock auto-advances while the blocking pool is still doing
    /// filesystem work, so assertions poll instead of sleeping a fixed span.
    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_merge() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let stats = Arc::new(BridgeStats::default());
        let (tx, handle) = spawn_dispatcher(dir.path(), sink.clone(), stats.clone()).await;

        tx.send(batch_event(&["1", "2"])).await.unwrap();
        tx.send(photo_event("1")).await.unwrap();
        tx.send(photo_event("2")).await.unwrap();

        let observed = stats.clone();
        wait_for(move || observed.merges_completed.load(Ordering::Relaxed) == 1).await;

        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
        assert_eq!(stats.photos_written.load(Ordering::Relaxed), 2);

        // quiet stream: no further passes fire
        tokio::time::sleep(QUIET * 4).await;
        assert_eq!(stats.merges_completed.load(Ordering::Relaxed), 1);
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_photo_only_quiet_period_delivers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let stats = Arc::new(BridgeStats::default());
        let (tx, handle) = spawn_dispatcher(dir.path(), sink.clone(), stats.clone()).await;

        tx.send(photo_event("5")).await.unwrap();

        let observed = stats.clone();
        wait_for(move || observed.photos_pending.load(Ordering::Relaxed) == 1).await;
        tokio::time::sleep(QUIET * 3).await;

        assert!(sink.delivered.lock().unwrap().is_empty());
        assert_eq!(stats.merges_completed.load(Ordering::Relaxed), 0);
        // the photo stays pending for a batch that may still come
        assert_eq!(stats.photos_pending.load(Ordering::Relaxed), 1);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delivery_drops_batch_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        sink.fail_first.store(1, Ordering::SeqCst);
        let stats = Arc::new(BridgeStats::default());
        let (tx, handle) = spawn_dispatcher(dir.path(), sink.clone(), stats.clone()).await;

        tx.send(batch_event(&["1"])).await.unwrap();

        let observed = stats.clone();
        wait_for(move || observed.deliveries_failed.load(Ordering::Relaxed) == 1).await;
        assert!(sink.delivered.lock().unwrap().is_empty());

        // the dropped batch is not retried; the next one goes through alone
        tx.send(batch_event(&["2"])).await.unwrap();

        let observed = sink.clone();
        wait_for(move || !observed.delivered.lock().unwrap().is_empty()).await;

        let delivered = sink.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].campo["PP"][0].id, "2");

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_batch_claims_earlier_photo() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let stats = Arc::new(BridgeStats::default());
        let (tx, handle) = spawn_dispatcher(dir.path(), sink.clone(), stats.clone()).await;

        // photo first, its quiet period elapses without a batch
        tx.send(photo_event("5")).await.unwrap();
        let observed = stats.clone();
        wait_for(move || observed.photos_pending.load(Ordering::Relaxed) == 1).await;
        tokio::time::sleep(QUIET * 2).await;
        assert!(sink.delivered.lock().unwrap().is_empty());

        // the batch arrives much later and still claims the photo
        tx.send(batch_event(&["5"])).await.unwrap();
        let observed = sink.clone();
        wait_for(move || !observed.delivered.lock().unwrap().is_empty()).await;

        let delivered = sink.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].campo["PP"][0].foto.is_some());
        assert_eq!(stats.photos_pending.load(Ordering::Relaxed), 0);

        drop(tx);
        handle.await.unwrap();
    }
}
