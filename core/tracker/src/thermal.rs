//! Device thermal pressure as a coarse three-level stream.
//!
//! Platforms report their own thermal vocabularies; `classify` folds them
//! into `ThermalLevel`. The monitor only publishes actual level changes.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThermalLevel {
    #[default]
    Normal,
    Elevated,
    Critical,
}

impl ThermalLevel {
    /// Factor applied to the sampling intervals. The distance filter is
    /// deliberately left alone so motion-adaptive sampling still works.
    pub fn multiplier(&self) -> u32 {
        match self {
            ThermalLevel::Normal => 1,
            ThermalLevel::Elevated => 2,
            ThermalLevel::Critical => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThermalLevel::Normal => "normal",
            ThermalLevel::Elevated => "elevated",
            ThermalLevel::Critical => "critical",
        }
    }

    /// Map a platform thermal state name onto a level.
    ///
    /// Covers the iOS `ProcessInfo.ThermalState` names and the Android
    /// `PowerManager.THERMAL_STATUS_*` names. Unknown values read as normal.
    pub fn classify(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "serious" | "moderate" | "severe" | "elevated" => ThermalLevel::Elevated,
            "critical" | "emergency" | "shutdown" => ThermalLevel::Critical,
            _ => ThermalLevel::Normal,
        }
    }
}

/// Publishes thermal levels to any number of observers.
#[derive(Debug, Clone)]
pub struct ThermalMonitor {
    sender: watch::Sender<ThermalLevel>,
}

impl Default for ThermalMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ThermalMonitor {
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(ThermalLevel::Normal);
        Self { sender }
    }

    /// Report a platform reading. Returns true when the level changed.
    pub fn report(&self, level: ThermalLevel) -> bool {
        let changed = self.sender.send_if_modified(|current| {
            if *current == level {
                false
            } else {
                *current = level;
                true
            }
        });
        if changed {
            tracing::info!(level = level.as_str(), "Thermal level changed");
        }
        changed
    }

    pub fn report_raw(&self, raw: &str) -> bool {
        self.report(ThermalLevel::classify(raw))
    }

    pub fn current(&self) -> ThermalLevel {
        *self.sender.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ThermalLevel> {
        self.sender.subscribe()
    }
}
