//! Ordered persistence queue for points and gaps.
//!
//! Writes are handed to a single consumer task so the event loop never waits
//! on storage, while capture order is preserved and a gap is always inserted
//! before it is closed. Failures are logged and dropped.

use chrono::{DateTime, Utc};
use shift_tracker_protocol::GpsPoint;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::ports::{Notice, Notifier, TrackingStore};
use crate::types::GpsGap;

enum WriteOp {
    Point(GpsPoint),
    OpenGap(GpsGap),
    CloseGap {
        gap_id: String,
        shift_id: String,
        ended_at: DateTime<Utc>,
    },
    Flush(oneshot::Sender<()>),
}

pub struct StoreWriter {
    sender: mpsc::UnboundedSender<WriteOp>,
    worker: JoinHandle<()>,
}

impl StoreWriter {
    pub fn spawn(store: Arc<dyn TrackingStore>, notifier: Arc<dyn Notifier>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_writer(store, notifier, receiver));
        Self { sender, worker }
    }

    pub fn write_point(&self, point: GpsPoint) {
        self.enqueue(WriteOp::Point(point));
    }

    pub fn open_gap(&self, gap: GpsGap) {
        self.enqueue(WriteOp::OpenGap(gap));
    }

    pub fn close_gap(&self, gap_id: String, shift_id: String, ended_at: DateTime<Utc>) {
        self.enqueue(WriteOp::CloseGap {
            gap_id,
            shift_id,
            ended_at,
        });
    }

    /// Wait until every write queued so far has been attempted.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        self.enqueue(WriteOp::Flush(done));
        let _ = wait.await;
    }

    fn enqueue(&self, op: WriteOp) {
        if self.sender.send(op).is_err() {
            warn!("Store writer is gone; dropping write");
        }
    }
}

impl Drop for StoreWriter {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_writer(
    store: Arc<dyn TrackingStore>,
    notifier: Arc<dyn Notifier>,
    mut receiver: mpsc::UnboundedReceiver<WriteOp>,
) {
    while let Some(op) = receiver.recv().await {
        match op {
            WriteOp::Point(point) => match store.insert_point(&point).await {
                Ok(()) => notifier.notify(Notice::PointsChanged {
                    shift_id: point.shift_id,
                }),
                Err(err) => warn!(
                    error = %err,
                    shift_id = %point.shift_id,
                    captured_at = %point.captured_at.to_rfc3339(),
                    "Failed to persist GPS point"
                ),
            },
            WriteOp::OpenGap(gap) => {
                if let Err(err) = store.insert_gap(&gap).await {
                    warn!(error = %err, gap_id = %gap.id, "Failed to persist GPS gap");
                }
            }
            WriteOp::CloseGap {
                gap_id,
                shift_id,
                ended_at,
            } => match store.close_gap(&gap_id, ended_at).await {
                Ok(()) => notifier.notify(Notice::SyncRequested { shift_id }),
                Err(err) => warn!(error = %err, gap_id = %gap_id, "Failed to close GPS gap"),
            },
            WriteOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
