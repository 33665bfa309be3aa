//! Heartbeat-driven liveness pings and stream self-healing.
//!
//! Cadences are counted in heartbeat messages, not wall-clock time. Pings go
//! out regardless of whether GPS points are flowing so the authority never
//! reaps a shift just because the signal dropped for a while.

use chrono::{DateTime, Duration, Utc};

use crate::config::HeartbeatConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatActions {
    pub ping: bool,
    pub recover_stream: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingFollowUp {
    None,
    /// Periodic full validation after a run of successful pings.
    Validate,
    /// Too many consecutive failures; validate now and start counting again.
    Escalate,
}

#[derive(Debug)]
pub struct HeartbeatReconciler {
    policy: HeartbeatConfig,
    counter: u64,
    consecutive_failures: u32,
    successful_pings: u64,
    last_background_capture_at: Option<DateTime<Utc>>,
    last_self_heal_attempt_at: Option<DateTime<Utc>>,
    armed_at: Option<DateTime<Utc>>,
}

impl HeartbeatReconciler {
    pub fn new(policy: HeartbeatConfig) -> Self {
        Self {
            policy,
            counter: 0,
            consecutive_failures: 0,
            successful_pings: 0,
            last_background_capture_at: None,
            last_self_heal_attempt_at: None,
            armed_at: None,
        }
    }

    /// Start a fresh reconciliation window for a new tracking run.
    pub fn arm(&mut self, now: DateTime<Utc>) {
        self.reset();
        self.armed_at = Some(now);
    }

    pub fn reset(&mut self) {
        self.counter = 0;
        self.consecutive_failures = 0;
        self.successful_pings = 0;
        self.last_background_capture_at = None;
        self.last_self_heal_attempt_at = None;
        self.armed_at = None;
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_background_capture_at(&self) -> Option<DateTime<Utc>> {
        self.last_background_capture_at
    }

    /// Process one heartbeat. `expected_interval` is the sampler's current
    /// effective interval; the quiet threshold stretches to twice that when it
    /// is longer than the configured threshold.
    pub fn on_heartbeat(
        &mut self,
        last_capture_at: Option<DateTime<Utc>>,
        expected_interval: Duration,
        now: DateTime<Utc>,
    ) -> HeartbeatActions {
        self.counter = self.counter.saturating_add(1);

        if let Some(captured) = last_capture_at {
            if self
                .last_background_capture_at
                .map(|previous| captured > previous)
                .unwrap_or(true)
            {
                self.last_background_capture_at = Some(captured);
            }
        }

        HeartbeatActions {
            ping: self.counter % self.policy.ping_every == 0,
            recover_stream: self.should_recover(expected_interval, now),
        }
    }

    /// Rate-limited check for a stream that has gone quiet. Also used for
    /// wake-on-move deliveries, which share the same limiter.
    pub fn should_recover(&mut self, expected_interval: Duration, now: DateTime<Utc>) -> bool {
        let Some(reference) = self.last_background_capture_at.or(self.armed_at) else {
            return false;
        };

        let threshold = self.quiet_threshold(expected_interval);
        if now.signed_duration_since(reference) <= threshold {
            return false;
        }

        if let Some(last_attempt) = self.last_self_heal_attempt_at {
            if now.signed_duration_since(last_attempt) < threshold {
                return false;
            }
        }

        self.last_self_heal_attempt_at = Some(now);
        true
    }

    fn quiet_threshold(&self, expected_interval: Duration) -> Duration {
        let stretched = expected_interval * 2;
        self.policy.self_heal_quiet().max(stretched)
    }

    pub fn on_ping_result(&mut self, succeeded: bool) -> PingFollowUp {
        if succeeded {
            self.consecutive_failures = 0;
            self.successful_pings = self.successful_pings.saturating_add(1);
            if self.successful_pings % self.policy.validate_every_successful_pings == 0 {
                return PingFollowUp::Validate;
            }
            return PingFollowUp::None;
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.policy.escalate_after_failures {
            self.consecutive_failures = 0;
            return PingFollowUp::Escalate;
        }
        PingFollowUp::None
    }
}
