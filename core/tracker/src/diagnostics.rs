//! Lifecycle diagnostics for post-hoc incident analysis.
//!
//! Every start attempt, stop, adoption and self-heal leaves one entry. The
//! default sink writes them to the `lifecycle` tracing target; the binary
//! routes that target to a rolling file.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ports::DiagnosticSink;

pub const LIFECYCLE_TARGET: &str = "lifecycle";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleKind {
    StartAttempt,
    StartSucceeded,
    StartFailed,
    StartSkipped,
    Stop,
    Adopted,
    SelfHeal,
    ServiceDied,
    VerificationTimeout,
    SamplerFailure,
}

impl LifecycleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleKind::StartAttempt => "start_attempt",
            LifecycleKind::StartSucceeded => "start_succeeded",
            LifecycleKind::StartFailed => "start_failed",
            LifecycleKind::StartSkipped => "start_skipped",
            LifecycleKind::Stop => "stop",
            LifecycleKind::Adopted => "adopted",
            LifecycleKind::SelfHeal => "self_heal",
            LifecycleKind::ServiceDied => "service_died",
            LifecycleKind::VerificationTimeout => "verification_timeout",
            LifecycleKind::SamplerFailure => "sampler_failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleEntry {
    pub at: DateTime<Utc>,
    pub kind: LifecycleKind,
    pub shift_id: Option<String>,
    pub attempt: Option<u64>,
    pub detail: Option<String>,
}

impl LifecycleEntry {
    pub fn new(kind: LifecycleKind, at: DateTime<Utc>) -> Self {
        Self {
            at,
            kind,
            shift_id: None,
            attempt: None,
            detail: None,
        }
    }

    pub fn shift(mut self, shift_id: impl Into<String>) -> Self {
        self.shift_id = Some(shift_id.into());
        self
    }

    pub fn attempt(mut self, attempt: u64) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl DiagnosticSink for TracingDiagnostics {
    fn record(&self, entry: LifecycleEntry) {
        tracing::info!(
            target: LIFECYCLE_TARGET,
            kind = entry.kind.as_str(),
            at = %entry.at.to_rfc3339(),
            shift_id = entry.shift_id.as_deref().unwrap_or(""),
            attempt = entry.attempt.unwrap_or(0),
            detail = entry.detail.as_deref().unwrap_or(""),
            "Lifecycle"
        );
    }
}
