//! Signal-gap bookkeeping.
//!
//! At most one gap is open per shift. The tracker only decides what to write;
//! the coordinator hands the resulting records to the store writer, where a
//! failed write is logged and dropped.

use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::types::{GapReason, GpsGap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedGap {
    pub id: String,
    pub shift_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct GapTracker {
    open: Option<GpsGap>,
}

impl GapTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_gap(&self) -> Option<&GpsGap> {
        self.open.as_ref()
    }

    pub fn has_open_gap(&self) -> bool {
        self.open.is_some()
    }

    /// Open a gap unless one is already open. Returns the record to persist.
    pub fn on_lost(
        &mut self,
        shift_id: &str,
        employee_id: &str,
        started_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<GpsGap> {
        if let Some(open) = &self.open {
            tracing::debug!(gap_id = %open.id, "GPS gap already open; ignoring repeated loss");
            return None;
        }

        let gap = GpsGap {
            id: Ulid::new().to_string(),
            shift_id: shift_id.to_string(),
            employee_id: employee_id.to_string(),
            started_at: started_at.unwrap_or(now),
            ended_at: None,
            reason: GapReason::SignalLoss,
        };
        self.open = Some(gap.clone());
        Some(gap)
    }

    /// Close the open gap, if any. The end never precedes the start even when
    /// the sampler's clock disagrees with ours.
    pub fn on_restored(
        &mut self,
        ended_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<ClosedGap> {
        let open = self.open.take()?;
        let ended_at = ended_at.unwrap_or(now).max(open.started_at);
        Some(ClosedGap {
            id: open.id,
            shift_id: open.shift_id,
            started_at: open.started_at,
            ended_at,
        })
    }

    /// Resume a gap left open by a previous process.
    pub fn restore(&mut self, gap: GpsGap) {
        if gap.is_open() {
            self.open = Some(gap);
        }
    }

    pub fn clear(&mut self) {
        self.open = None;
    }
}
