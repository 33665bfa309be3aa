//! Authoritative shift-status validation against the remote authority.
//!
//! Validation never stops tracking. A completed shift is reported to the
//! shift-management component, and tracking stops later through the normal
//! shift-transition path. Network trouble is fail-open.

use std::sync::Arc;
use tracing::{info, warn};

use crate::ports::{Notice, Notifier, ShiftAuthority, ShiftDirectory};
use crate::types::ShiftStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    StillActive,
    ClosedRemotely,
    UnknownToServer,
    Unreachable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationTrigger {
    Periodic,
    Escalation,
    Midnight,
}

impl ValidationTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationTrigger::Periodic => "periodic",
            ValidationTrigger::Escalation => "escalation",
            ValidationTrigger::Midnight => "midnight",
        }
    }
}

pub struct StatusValidator {
    authority: Arc<dyn ShiftAuthority>,
    shifts: Arc<dyn ShiftDirectory>,
    notifier: Arc<dyn Notifier>,
}

impl StatusValidator {
    pub fn new(
        authority: Arc<dyn ShiftAuthority>,
        shifts: Arc<dyn ShiftDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            authority,
            shifts,
            notifier,
        }
    }

    pub async fn validate(
        &self,
        shift_id: &str,
        server_shift_id: &str,
        trigger: ValidationTrigger,
    ) -> ValidationOutcome {
        let status = match self.authority.shift_status(server_shift_id).await {
            Ok(status) => status,
            Err(err) => {
                warn!(
                    error = %err,
                    shift_id = %shift_id,
                    trigger = trigger.as_str(),
                    "Shift status validation failed; continuing to track"
                );
                return ValidationOutcome::Unreachable(err.to_string());
            }
        };

        match status {
            Some(ShiftStatus::Active) => ValidationOutcome::StillActive,
            Some(ShiftStatus::Completed) => {
                info!(
                    shift_id = %shift_id,
                    server_shift_id = %server_shift_id,
                    trigger = trigger.as_str(),
                    "Authority reports shift completed; requesting local refresh"
                );
                self.notifier.notify(Notice::ShiftClosedRemotely {
                    shift_id: shift_id.to_string(),
                });
                if let Err(err) = self.shifts.refresh(shift_id).await {
                    warn!(error = %err, shift_id = %shift_id, "Shift refresh request failed");
                }
                ValidationOutcome::ClosedRemotely
            }
            None => {
                warn!(
                    shift_id = %shift_id,
                    server_shift_id = %server_shift_id,
                    "Authority does not know this shift; leaving tracking untouched"
                );
                ValidationOutcome::UnknownToServer
            }
        }
    }
}
