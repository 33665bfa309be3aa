//! Message types and validation for the sampler <-> coordinator channel.
//!
//! The background sampler and the tracking coordinator share no memory; every
//! piece of cross-context state travels as one of these payloads. Both sides
//! depend on this crate so the schema cannot drift. The coordinator remains
//! the authority on validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024;

const MAX_ID_LEN: usize = 128;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// A single location fix captured by the sampler for a shift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpsPoint {
    pub shift_id: String,
    pub employee_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy_meters: Option<f64>,
    #[serde(default)]
    pub altitude_meters: Option<f64>,
    #[serde(default)]
    pub speed_mps: Option<f64>,
    #[serde(default)]
    pub heading_degrees: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

/// Sampling parameters pushed to the sampler; `thermal_multiplier` scales the intervals only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingConfig {
    pub active_interval_secs: u32,
    pub stationary_interval_secs: u32,
    pub distance_filter_meters: f64,
    #[serde(default = "default_thermal_multiplier")]
    pub thermal_multiplier: u32,
}

fn default_thermal_multiplier() -> u32 {
    1
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            active_interval_secs: 10,
            stationary_interval_secs: 60,
            distance_filter_meters: 10.0,
            thermal_multiplier: default_thermal_multiplier(),
        }
    }
}

impl TrackingConfig {
    pub fn with_thermal_multiplier(&self, multiplier: u32) -> Self {
        Self {
            thermal_multiplier: multiplier.max(1),
            ..self.clone()
        }
    }

    /// Interval the sampler actually uses for the given motion state.
    pub fn effective_interval_secs(&self, is_stationary: bool) -> u64 {
        let base = if is_stationary {
            self.stationary_interval_secs
        } else {
            self.active_interval_secs
        };
        u64::from(base).saturating_mul(u64::from(self.thermal_multiplier.max(1)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub shift_id: String,
    pub employee_id: String,
    pub shift_started_at: DateTime<Utc>,
    pub initial_point_count: u64,
    pub config: TrackingConfig,
}

/// Commands flowing from the coordinator to the sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SamplerCommand {
    Start(StartRequest),
    Stop,
    UpdateConfig { config: TrackingConfig },
    RecoverStream,
    GetStatus,
}

impl SamplerCommand {
    pub fn name(&self) -> &'static str {
        match self {
            SamplerCommand::Start(_) => "start",
            SamplerCommand::Stop => "stop",
            SamplerCommand::UpdateConfig { .. } => "update_config",
            SamplerCommand::RecoverStream => "recover_stream",
            SamplerCommand::GetStatus => "get_status",
        }
    }
}

/// Events flowing from the sampler to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SamplerEvent {
    Started {
        shift_id: String,
    },
    Stopped,
    Position {
        point: GpsPoint,
    },
    Heartbeat {
        is_stationary: bool,
        point_count: u64,
        #[serde(default)]
        last_capture_at: Option<DateTime<Utc>>,
    },
    Status {
        point_count: u64,
        is_stationary: bool,
    },
    Error {
        message: String,
        #[serde(default)]
        fatal: bool,
    },
    GpsLost {
        #[serde(default)]
        gap_started_at: Option<DateTime<Utc>>,
    },
    GpsRestored {
        #[serde(default)]
        gap_ended_at: Option<DateTime<Utc>>,
    },
}

impl SamplerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SamplerEvent::Started { .. } => "started",
            SamplerEvent::Stopped => "stopped",
            SamplerEvent::Position { .. } => "position",
            SamplerEvent::Heartbeat { .. } => "heartbeat",
            SamplerEvent::Status { .. } => "status",
            SamplerEvent::Error { .. } => "error",
            SamplerEvent::GpsLost { .. } => "gps_lost",
            SamplerEvent::GpsRestored { .. } => "gps_restored",
        }
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        match self {
            SamplerEvent::Started { shift_id } => require_id(shift_id, "shiftId"),
            SamplerEvent::Position { point } => validate_point(point),
            SamplerEvent::Error { message, .. } => {
                if message.trim().is_empty() {
                    Err(ErrorInfo::new("missing_field", "message is required"))
                } else {
                    Ok(())
                }
            }
            SamplerEvent::Stopped
            | SamplerEvent::Heartbeat { .. }
            | SamplerEvent::Status { .. }
            | SamplerEvent::GpsLost { .. }
            | SamplerEvent::GpsRestored { .. } => Ok(()),
        }
    }
}

pub fn parse_event(payload: Value) -> Result<SamplerEvent, ErrorInfo> {
    let event: SamplerEvent = serde_json::from_value(payload).map_err(|err| {
        ErrorInfo::new(
            "invalid_payload",
            format!("sampler event is invalid: {}", err),
        )
    })?;
    event.validate()?;
    Ok(event)
}

pub fn parse_event_line(line: &str) -> Result<SamplerEvent, ErrorInfo> {
    if line.len() > MAX_MESSAGE_BYTES {
        return Err(ErrorInfo::new(
            "message_too_large",
            format!("sampler message exceeds {} bytes", MAX_MESSAGE_BYTES),
        ));
    }
    let value: Value = serde_json::from_str(line).map_err(|err| {
        ErrorInfo::new("invalid_json", format!("sampler message is not JSON: {}", err))
    })?;
    parse_event(value)
}

fn validate_point(point: &GpsPoint) -> Result<(), ErrorInfo> {
    require_id(&point.shift_id, "shiftId")?;
    require_id(&point.employee_id, "employeeId")?;

    if !point.latitude.is_finite() || !(-90.0..=90.0).contains(&point.latitude) {
        return Err(ErrorInfo::new(
            "invalid_coordinate",
            format!("latitude out of range: {}", point.latitude),
        ));
    }
    if !point.longitude.is_finite() || !(-180.0..=180.0).contains(&point.longitude) {
        return Err(ErrorInfo::new(
            "invalid_coordinate",
            format!("longitude out of range: {}", point.longitude),
        ));
    }
    if let Some(accuracy) = point.accuracy_meters {
        if !accuracy.is_finite() || accuracy < 0.0 {
            return Err(ErrorInfo::new(
                "invalid_accuracy",
                "accuracyMeters must be a non-negative number",
            ));
        }
    }
    Ok(())
}

fn require_id(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    if value.len() > MAX_ID_LEN {
        return Err(ErrorInfo::new(
            "invalid_id",
            format!("{} must be {} characters or fewer", field, MAX_ID_LEN),
        ));
    }
    Ok(())
}
