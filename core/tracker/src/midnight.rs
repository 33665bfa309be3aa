//! Local-midnight boundary handling.
//!
//! The authority closes every open shift at local midnight from a scheduled
//! job of its own. Shortly before, the worker gets a single warning; shortly
//! after, the coordinator validates immediately instead of waiting for the
//! next periodic validation.

use chrono::{NaiveTime, Timelike};

use crate::config::MidnightConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidnightAction {
    None,
    ShowWarning,
    ClearWarningAndValidate,
}

#[derive(Debug)]
pub struct MidnightWatcher {
    warning_from_minute: u32,
    grace_until_minute: u32,
    warning_shown: bool,
}

const MINUTES_PER_DAY: u32 = 24 * 60;

impl MidnightWatcher {
    pub fn new(config: &MidnightConfig) -> Self {
        Self {
            warning_from_minute: MINUTES_PER_DAY.saturating_sub(config.warning_lead_minutes),
            grace_until_minute: config.grace_minutes,
            warning_shown: false,
        }
    }

    pub fn warning_shown(&self) -> bool {
        self.warning_shown
    }

    pub fn reset(&mut self) {
        self.warning_shown = false;
    }

    /// Called once per heartbeat with the device-local time of day.
    pub fn check(&mut self, local: NaiveTime) -> MidnightAction {
        let minute = local.hour() * 60 + local.minute();

        if minute >= self.warning_from_minute {
            if self.warning_shown {
                return MidnightAction::None;
            }
            self.warning_shown = true;
            return MidnightAction::ShowWarning;
        }

        if minute <= self.grace_until_minute && self.warning_shown {
            self.warning_shown = false;
            return MidnightAction::ClearWarningAndValidate;
        }

        // Heartbeats missed the whole grace window; forget the warning so the
        // next night warns again.
        if minute > self.grace_until_minute {
            self.warning_shown = false;
        }
        MidnightAction::None
    }
}
