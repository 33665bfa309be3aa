use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShiftStatus {
    Active,
    Completed,
}

impl ShiftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftStatus::Active => "active",
            ShiftStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(ShiftStatus::Active),
            "completed" => Some(ShiftStatus::Completed),
            _ => None,
        }
    }
}

/// A work shift as known locally. `server_id` stays empty until the shift
/// has been synced to the remote authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shift {
    pub id: String,
    #[serde(default)]
    pub server_id: Option<String>,
    pub employee_id: String,
    pub started_at: DateTime<Utc>,
    pub status: ShiftStatus,
}

impl Shift {
    pub fn is_active(&self) -> bool {
        self.status == ShiftStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapReason {
    SignalLoss,
}

impl GapReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GapReason::SignalLoss => "signal_loss",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "signal_loss" => Some(GapReason::SignalLoss),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpsGap {
    pub id: String,
    pub shift_id: String,
    pub employee_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub reason: GapReason,
}

impl GpsGap {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Why tracking was stopped. Recorded for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    ClockOut,
    ForceLogout,
    AppClosed,
    ServerClosedShift,
    ShiftSwitch,
    SamplerFailure,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::ClockOut => "clock_out",
            StopReason::ForceLogout => "force_logout",
            StopReason::AppClosed => "app_closed",
            StopReason::ServerClosedShift => "server_closed_shift",
            StopReason::ShiftSwitch => "shift_switch",
            StopReason::SamplerFailure => "sampler_failure",
        }
    }

    /// Reasons after which the shift itself is over, so self-healing must not
    /// bring tracking back for it.
    pub fn ends_shift(&self) -> bool {
        matches!(
            self,
            StopReason::ClockOut | StopReason::ForceLogout | StopReason::ServerClosedShift
        )
    }
}
