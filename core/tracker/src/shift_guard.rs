//! Confirms a reported shift closure against local storage before acting.
//!
//! The shift-management component can briefly report "no active shift" while
//! it reloads, so a null shift alone never stops tracking. The stored record
//! decides; if storage cannot answer, stop anyway.

use tracing::{debug, warn};

use crate::ports::TrackingStore;
use crate::types::ShiftStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardVerdict {
    /// Store shows the shift completed.
    Completed,
    /// Store no longer has the shift.
    Missing,
    /// Store read failed; stop to avoid tracking past a real clock-out.
    Unverifiable,
    /// Store still shows the shift active; the transition was transient.
    Transient,
}

impl GuardVerdict {
    pub fn should_stop(&self) -> bool {
        !matches!(self, GuardVerdict::Transient)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GuardVerdict::Completed => "completed",
            GuardVerdict::Missing => "missing",
            GuardVerdict::Unverifiable => "unverifiable",
            GuardVerdict::Transient => "transient",
        }
    }
}

pub async fn confirm_shift_closed(store: &dyn TrackingStore, shift_id: &str) -> GuardVerdict {
    match store.shift_by_id(shift_id).await {
        Ok(Some(shift)) if shift.status == ShiftStatus::Completed => GuardVerdict::Completed,
        Ok(Some(_)) => {
            debug!(shift_id = %shift_id, "Shift still active in store; ignoring transient null");
            GuardVerdict::Transient
        }
        Ok(None) => GuardVerdict::Missing,
        Err(err) => {
            warn!(error = %err, shift_id = %shift_id, "Failed to confirm shift closure; stopping");
            GuardVerdict::Unverifiable
        }
    }
}
