//! Offline replay of a recorded JSON-lines transcript.
//!
//! Each line is one step: a sampler event, a clock-in or clock-out from the
//! shift-management side, a thermal reading or an OS signal. Steps are fed
//! to a coordinator backed by the SQLite store, a sampler that only records
//! commands and an authority that is always offline. Background work is
//! drained after every step so the outcome is deterministic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shift_tracker_protocol::{ErrorInfo, SamplerCommand, SamplerEvent};
use std::io::BufRead;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::TrackerConfig;
use crate::coordinator::{Collaborators, Coordinator, Inbound};
use crate::db::Db;
use crate::diagnostics::{LifecycleEntry, TracingDiagnostics};
use crate::error::{Result, TrackerError};
use crate::ports::{
    DiagnosticSink, LogNotifier, NoopWakePlatform, Sampler, SamplerProbe, ShiftAuthority,
    ShiftDirectory, SystemClock,
};
use crate::session::SessionView;
use crate::thermal::{ThermalLevel, ThermalMonitor};
use crate::types::{Shift, ShiftStatus};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplayStep {
    Sampler {
        event: SamplerEvent,
    },
    ClockIn {
        shift_id: String,
        employee_id: String,
        #[serde(default)]
        server_id: Option<String>,
        #[serde(default)]
        started_at: Option<DateTime<Utc>>,
    },
    ClockOut,
    Thermal {
        level: String,
    },
    ServiceDied,
    WokeOnMove,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub steps: usize,
    pub session: SessionView,
    pub commands: Vec<SamplerCommand>,
    pub lifecycle: Vec<LifecycleEntry>,
}

pub fn parse_step(line: &str) -> std::result::Result<ReplayStep, ErrorInfo> {
    serde_json::from_str(line)
        .map_err(|err| ErrorInfo::new("invalid_step", format!("replay step is invalid: {}", err)))
}

/// Parse every non-empty line of a transcript, stopping at the first bad one.
pub fn read_transcript(reader: impl BufRead) -> Result<Vec<ReplayStep>> {
    let mut steps = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|err| {
            TrackerError::InvalidEvent(ErrorInfo::new("io_error", err.to_string()))
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let step = parse_step(trimmed).map_err(|info| {
            TrackerError::InvalidEvent(ErrorInfo::new(
                &info.code,
                format!("line {}: {}", index + 1, info.message),
            ))
        })?;
        steps.push(step);
    }
    Ok(steps)
}

pub async fn replay(steps: Vec<ReplayStep>, db: Db, config: TrackerConfig) -> Result<ReplayReport> {
    let sampler = Arc::new(RecordingSampler::default());
    let directory = Arc::new(ReplayDirectory::default());
    let diagnostics = Arc::new(RecordingDiagnostics::default());
    let thermal = ThermalMonitor::new();

    let deps = Collaborators {
        sampler: sampler.clone(),
        store: Arc::new(db.clone()),
        authority: Arc::new(OfflineAuthority),
        shifts: directory.clone(),
        notifier: Arc::new(LogNotifier),
        diagnostics: diagnostics.clone(),
        wake: Arc::new(NoopWakePlatform),
        thermal: thermal.clone(),
        clock: Arc::new(SystemClock),
    };

    let (sender, mut inbox) = mpsc::unbounded_channel();
    let mut coordinator = Coordinator::new(deps, config, sender)?;
    coordinator.reconcile_on_startup();
    coordinator.drain_pending().await;

    let total = steps.len();
    for step in steps {
        debug!(step = ?step, "Replaying step");
        match step {
            ReplayStep::Sampler { event } => {
                coordinator.handle(Inbound::Sampler(event));
            }
            ReplayStep::ClockIn {
                shift_id,
                employee_id,
                server_id,
                started_at,
            } => {
                let shift = Shift {
                    id: shift_id,
                    server_id,
                    employee_id,
                    started_at: started_at.unwrap_or_else(Utc::now),
                    status: ShiftStatus::Active,
                };
                save_shift(&db, &shift).await?;
                let previous = directory.replace(Some(shift.clone()));
                coordinator.handle(Inbound::ShiftChanged {
                    previous,
                    current: Some(shift),
                });
            }
            ReplayStep::ClockOut => {
                let previous = directory.replace(None);
                if let Some(shift) = &previous {
                    let mut closed = shift.clone();
                    closed.status = ShiftStatus::Completed;
                    save_shift(&db, &closed).await?;
                }
                coordinator.handle(Inbound::ShiftChanged {
                    previous,
                    current: None,
                });
            }
            ReplayStep::Thermal { level } => {
                let level = ThermalLevel::classify(&level);
                thermal.report(level);
                coordinator.handle(Inbound::Thermal(level));
            }
            ReplayStep::ServiceDied => coordinator.handle(Inbound::ServiceDied),
            ReplayStep::WokeOnMove => coordinator.handle(Inbound::WokeOnMove),
        }

        coordinator.drain_pending().await;
        while let Ok(inbound) = inbox.try_recv() {
            coordinator.handle(inbound);
            coordinator.drain_pending().await;
        }
    }

    let report = ReplayReport {
        steps: total,
        session: coordinator.session().view(),
        commands: sampler.commands(),
        lifecycle: diagnostics.entries(),
    };
    coordinator.shutdown();
    info!(
        steps = total,
        commands = report.commands.len(),
        status = report.session.status.as_str(),
        "Replay finished"
    );
    Ok(report)
}

async fn save_shift(db: &Db, shift: &Shift) -> Result<()> {
    let db = db.clone();
    let shift = shift.clone();
    tokio::task::spawn_blocking(move || db.upsert_shift(&shift))
        .await
        .map_err(|err| TrackerError::Persistence(format!("Store task failed: {}", err)))?
        .map_err(TrackerError::Persistence)
}

/// Sampler stand-in that accepts every command and remembers it.
#[derive(Default)]
struct RecordingSampler {
    commands: Mutex<Vec<SamplerCommand>>,
}

impl RecordingSampler {
    fn commands(&self) -> Vec<SamplerCommand> {
        match self.commands.lock() {
            Ok(commands) => commands.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Sampler for RecordingSampler {
    async fn dispatch(&self, command: SamplerCommand) -> Result<()> {
        match self.commands.lock() {
            Ok(mut commands) => commands.push(command),
            Err(poisoned) => poisoned.into_inner().push(command),
        }
        Ok(())
    }

    async fn probe(&self) -> Result<SamplerProbe> {
        Ok(SamplerProbe::default())
    }
}

struct OfflineAuthority;

#[async_trait]
impl ShiftAuthority for OfflineAuthority {
    async fn ping_heartbeat(&self, _server_shift_id: &str) -> Result<()> {
        Err(TrackerError::Network("offline replay".to_string()))
    }

    async fn shift_status(&self, _server_shift_id: &str) -> Result<Option<ShiftStatus>> {
        Err(TrackerError::Network("offline replay".to_string()))
    }
}

#[derive(Default)]
struct ReplayDirectory {
    active: Mutex<Option<Shift>>,
}

impl ReplayDirectory {
    fn replace(&self, shift: Option<Shift>) -> Option<Shift> {
        match self.active.lock() {
            Ok(mut active) => std::mem::replace(&mut *active, shift),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), shift),
        }
    }
}

#[async_trait]
impl ShiftDirectory for ReplayDirectory {
    async fn active_shift(&self) -> Result<Option<Shift>> {
        match self.active.lock() {
            Ok(active) => Ok(active.clone()),
            Err(poisoned) => Ok(poisoned.into_inner().clone()),
        }
    }

    async fn refresh(&self, _shift_id: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingDiagnostics {
    entries: Mutex<Vec<LifecycleEntry>>,
}

impl RecordingDiagnostics {
    fn entries(&self) -> Vec<LifecycleEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl DiagnosticSink for RecordingDiagnostics {
    fn record(&self, entry: LifecycleEntry) {
        TracingDiagnostics.record(entry.clone());
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}
