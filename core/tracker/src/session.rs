//! In-memory tracking session owned by the coordinator.
//!
//! The session is never persisted. After a process restart it is rebuilt
//! from the sampler's own view of whether it is running plus the point count
//! stored for the bound shift.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shift_tracker_protocol::{GpsPoint, TrackingConfig};

use crate::thermal::ThermalLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl TrackingStatus {
    /// States in which the session is bound to a shift.
    pub fn is_bound(&self) -> bool {
        matches!(
            self,
            TrackingStatus::Starting | TrackingStatus::Running | TrackingStatus::Stopping
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingStatus::Stopped => "stopped",
            TrackingStatus::Starting => "starting",
            TrackingStatus::Running => "running",
            TrackingStatus::Stopping => "stopping",
            TrackingStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSession {
    pub status: TrackingStatus,
    pub active_shift_id: Option<String>,
    pub points_captured: u64,
    pub last_position: Option<LastPosition>,
    pub is_stationary: bool,
    pub gps_signal_lost: bool,
    pub tracking_verified: bool,
    pub tracking_start_failed: bool,
    pub config: TrackingConfig,
    pub thermal_level: ThermalLevel,
    pub error_message: Option<String>,
}

impl TrackingSession {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            status: TrackingStatus::Stopped,
            active_shift_id: None,
            points_captured: 0,
            last_position: None,
            is_stationary: false,
            gps_signal_lost: false,
            tracking_verified: false,
            tracking_start_failed: false,
            config: config.with_thermal_multiplier(1),
            thermal_level: ThermalLevel::Normal,
            error_message: None,
        }
    }

    pub fn is_bound_to(&self, shift_id: &str) -> bool {
        self.status.is_bound() && self.active_shift_id.as_deref() == Some(shift_id)
    }

    pub fn is_running_for(&self, shift_id: &str) -> bool {
        self.status == TrackingStatus::Running && self.active_shift_id.as_deref() == Some(shift_id)
    }

    /// Bind to a shift for a fresh start attempt. The caller seeds the point
    /// count from the store afterwards.
    pub fn begin_start(&mut self, shift_id: &str, config: TrackingConfig) {
        self.status = TrackingStatus::Starting;
        self.active_shift_id = Some(shift_id.to_string());
        self.points_captured = 0;
        self.last_position = None;
        self.is_stationary = false;
        self.gps_signal_lost = false;
        self.tracking_verified = false;
        self.tracking_start_failed = false;
        self.config = config.with_thermal_multiplier(1);
        self.thermal_level = ThermalLevel::Normal;
        self.error_message = None;
    }

    /// Unbind and return to `Stopped`. Last-fix fields and the count are kept
    /// for display until the next start.
    pub fn reset_to_stopped(&mut self) {
        self.status = TrackingStatus::Stopped;
        self.active_shift_id = None;
        self.gps_signal_lost = false;
        self.tracking_verified = false;
        self.tracking_start_failed = false;
        self.config = self.config.with_thermal_multiplier(1);
        self.thermal_level = ThermalLevel::Normal;
    }

    pub fn enter_error(&mut self, message: String) {
        self.reset_to_stopped();
        self.status = TrackingStatus::Error;
        self.error_message = Some(message);
    }

    pub fn record_position(&mut self, point: &GpsPoint) {
        self.points_captured = self.points_captured.saturating_add(1);
        self.last_position = Some(LastPosition {
            latitude: point.latitude,
            longitude: point.longitude,
            captured_at: point.captured_at,
        });
    }

    /// Merge a count reported by a possibly stale message. Never lowers it.
    pub fn merge_point_count(&mut self, reported: u64) {
        if reported > self.points_captured {
            self.points_captured = reported;
        }
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            status: self.status,
            active_shift_id: self.active_shift_id.clone(),
            points_captured: self.points_captured,
            is_stationary: self.is_stationary,
            gps_signal_lost: self.gps_signal_lost,
            last_position: self.last_position.clone(),
            error_message: self.error_message.clone(),
            tracking_verified: self.tracking_verified,
            tracking_start_failed: self.tracking_start_failed,
            thermal_level: self.thermal_level,
        }
    }
}

/// Read-only snapshot published to the UI after every processed input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub status: TrackingStatus,
    pub active_shift_id: Option<String>,
    pub points_captured: u64,
    pub is_stationary: bool,
    pub gps_signal_lost: bool,
    pub last_position: Option<LastPosition>,
    pub error_message: Option<String>,
    pub tracking_verified: bool,
    pub tracking_start_failed: bool,
    pub thermal_level: ThermalLevel,
}

impl Default for SessionView {
    fn default() -> Self {
        TrackingSession::new(TrackingConfig::default()).view()
    }
}
