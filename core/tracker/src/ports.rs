//! Collaborator seams for the coordinator.
//!
//! Everything the coordinator talks to is injected as a trait object at
//! construction: the background sampler, local storage, the remote shift
//! authority, the shift-management component, notification and diagnostic
//! sinks, OS wake hooks and the clock. Nothing is reached through globals.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, Utc};
use shift_tracker_protocol::{GpsPoint, SamplerCommand};

use crate::diagnostics::LifecycleEntry;
use crate::error::Result;
use crate::types::{GpsGap, Shift, ShiftStatus};

/// What the sampler reports about itself when probed at process start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamplerProbe {
    pub is_running: bool,
    pub shift_id: Option<String>,
}

/// Command sink for the long-running background sampler.
#[async_trait]
pub trait Sampler: Send + Sync {
    async fn dispatch(&self, command: SamplerCommand) -> Result<()>;

    async fn probe(&self) -> Result<SamplerProbe>;
}

/// Durable local storage for points, gaps and shift records.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    async fn insert_point(&self, point: &GpsPoint) -> Result<()>;

    async fn point_count(&self, shift_id: &str) -> Result<u64>;

    /// Points for a shift in capture order.
    async fn points(&self, shift_id: &str) -> Result<Vec<GpsPoint>>;

    async fn latest_point(&self, shift_id: &str) -> Result<Option<GpsPoint>>;

    async fn insert_gap(&self, gap: &GpsGap) -> Result<()>;

    async fn close_gap(&self, gap_id: &str, ended_at: DateTime<Utc>) -> Result<()>;

    async fn open_gap(&self, shift_id: &str) -> Result<Option<GpsGap>>;

    async fn shift_by_id(&self, shift_id: &str) -> Result<Option<Shift>>;
}

/// Server-side source of truth for whether a shift is open.
#[async_trait]
pub trait ShiftAuthority: Send + Sync {
    async fn ping_heartbeat(&self, server_shift_id: &str) -> Result<()>;

    /// `Ok(None)` when the authority does not know the shift.
    async fn shift_status(&self, server_shift_id: &str) -> Result<Option<ShiftStatus>>;
}

/// The surrounding shift-management component.
#[async_trait]
pub trait ShiftDirectory: Send + Sync {
    async fn active_shift(&self) -> Result<Option<Shift>>;

    /// Ask the component to reload the shift because the authority closed it.
    async fn refresh(&self, shift_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    PointsChanged { shift_id: String },
    SyncRequested { shift_id: String },
    MidnightWarning { shift_id: String },
    MidnightWarningCleared { shift_id: String },
    TrackingStartFailed { shift_id: String },
    ShiftClosedRemotely { shift_id: String },
}

/// Fire-and-forget sink for sync requests and user-facing notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

pub trait DiagnosticSink: Send + Sync {
    fn record(&self, entry: LifecycleEntry);
}

/// OS hooks scoped to the running state.
pub trait WakePlatform: Send + Sync {
    /// Low-power significant-change monitoring that can relaunch the process.
    fn start_significant_changes(&self) -> Result<()>;

    fn stop_significant_changes(&self) -> Result<()>;

    /// Ask to be told on resume when the background context died unexpectedly.
    fn watch_service_death(&self) -> Result<()>;

    fn unwatch_service_death(&self);
}

pub trait Clock: Send + Sync {
    /// Current time in the device's local offset.
    fn now(&self) -> DateTime<FixedOffset>;

    fn now_utc(&self) -> DateTime<Utc> {
        self.now().with_timezone(&Utc)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }
}

/// Notifier that only logs. Used when no UI is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        tracing::debug!(notice = ?notice, "Notice");
    }
}

/// Wake platform for hosts without significant-change support.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopWakePlatform;

impl WakePlatform for NoopWakePlatform {
    fn start_significant_changes(&self) -> Result<()> {
        Ok(())
    }

    fn stop_significant_changes(&self) -> Result<()> {
        Ok(())
    }

    fn watch_service_death(&self) -> Result<()> {
        Ok(())
    }

    fn unwatch_service_death(&self) {}
}
