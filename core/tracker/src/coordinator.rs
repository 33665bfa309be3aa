//! Tracking coordinator: the single writer of the tracking session.
//!
//! Every input (sampler events, API commands, shift changes, thermal levels,
//! OS signals and completions of background I/O) arrives as one `Inbound`
//! value and is handled to completion before the next. Handling never
//! awaits a collaborator: sampler commands go through the outbox, writes go
//! through the writer, and reads run as tasks whose results come back as
//! further `Inbound` values. A hung sampler or store therefore delays only
//! the work that needs its answer.
//!
//! ```text
//! Sampler ──events──▶ Inbound ──▶ Coordinator ──commands──▶ SamplerOutbox ──▶ Sampler
//!                                   │    ▲
//!                 points/gaps ◀─────┘    └── seeds / pings / validation / guard results (JoinSet)
//! ```
//!
//! Starting is two-phase. `start_tracking` binds the shift and enters
//! `Starting`; the seed read and the sampler's answer to `start` arrive
//! later as `StartSeeded` and `StartCompleted`, tagged with the attempt
//! number so that a result overtaken by a stop or a newer start is dropped.

use chrono::{DateTime, Duration, Utc};
use shift_tracker_protocol::{GpsPoint, SamplerCommand, SamplerEvent, StartRequest, TrackingConfig};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::diagnostics::{LifecycleEntry, LifecycleKind};
use crate::error::{Result, TrackerError};
use crate::gaps::GapTracker;
use crate::heartbeat::{HeartbeatReconciler, PingFollowUp};
use crate::midnight::{MidnightAction, MidnightWatcher};
use crate::outbox::SamplerOutbox;
use crate::ports::{
    Clock, DiagnosticSink, Notice, Notifier, Sampler, SamplerProbe, ShiftAuthority,
    ShiftDirectory, TrackingStore, WakePlatform,
};
use crate::session::{SessionView, TrackingSession, TrackingStatus};
use crate::shift_guard::{confirm_shift_closed, GuardVerdict};
use crate::thermal::{ThermalLevel, ThermalMonitor};
use crate::types::{GpsGap, Shift, StopReason};
use crate::validation::{StatusValidator, ValidationOutcome, ValidationTrigger};
use crate::wake::{ServiceDeathWatch, WakeOnMoveMonitor};
use crate::writer::StoreWriter;

/// Everything the coordinator depends on, injected once at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub sampler: Arc<dyn Sampler>,
    pub store: Arc<dyn TrackingStore>,
    pub authority: Arc<dyn ShiftAuthority>,
    pub shifts: Arc<dyn ShiftDirectory>,
    pub notifier: Arc<dyn Notifier>,
    pub diagnostics: Arc<dyn DiagnosticSink>,
    pub wake: Arc<dyn WakePlatform>,
    pub thermal: ThermalMonitor,
    pub clock: Arc<dyn Clock>,
}

type StartReply = oneshot::Sender<Result<()>>;

#[derive(Debug)]
pub enum Command {
    StartTracking {
        shift: Shift,
        config: Option<TrackingConfig>,
        reply: StartReply,
    },
    StopTracking {
        reason: StopReason,
        reply: oneshot::Sender<()>,
    },
    UpdateConfig {
        config: TrackingConfig,
        reply: oneshot::Sender<Result<()>>,
    },
    ClearError {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionView>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingOutcome {
    Delivered { server_shift_id: String },
    Failed { server_shift_id: String, error: String },
    /// The shift has no server-side id yet.
    Skipped,
}

/// Stored state a start or an adoption resumes from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartSeed {
    pub points: u64,
    pub open_gap: Option<GpsGap>,
}

/// What the process-start lookups found.
#[derive(Debug, Clone, PartialEq)]
pub enum StartupPlan {
    Adopt { shift: Shift, seed: StartSeed },
    StopOrphan { shift_id: Option<String> },
    Heal(HealCheck),
    Idle,
}

/// Stored facts consulted before restarting a shift the OS stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct HealCheck {
    pub shift: Shift,
    pub stored_active: bool,
    pub last_capture_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub enum Inbound {
    Sampler(SamplerEvent),
    Command(Command),
    ShiftChanged {
        previous: Option<Shift>,
        current: Option<Shift>,
    },
    Thermal(ThermalLevel),
    /// The OS reported on resume that the background context died.
    ServiceDied,
    /// A significant-change delivery woke the process.
    WokeOnMove,
    StartSeeded {
        attempt: u64,
        seed: StartSeed,
    },
    StartCompleted {
        attempt: u64,
        result: Result<()>,
    },
    Reconciled(StartupPlan),
    HealChecked {
        source: &'static str,
        check: Option<HealCheck>,
    },
    PingCompleted {
        shift_id: String,
        outcome: PingOutcome,
    },
    StatusValidated {
        shift_id: String,
        trigger: ValidationTrigger,
        outcome: Option<ValidationOutcome>,
    },
    ClosureChecked {
        shift_id: String,
        verdict: GuardVerdict,
    },
    VerificationExpired {
        attempt: u64,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
struct Verification {
    attempt: u64,
    deadline: Instant,
}

/// A start that has been requested but not yet answered by the sampler.
struct PendingStart {
    attempt: u64,
    open_gap: Option<GpsGap>,
    waiters: Vec<StartReply>,
}

impl PendingStart {
    fn answer(self, result: &Result<()>) {
        for waiter in self.waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

enum StartPlan {
    AlreadyRunning,
    Pending,
}

/// OS registrations that exist only while tracking runs. Dropping the scope
/// releases all of them.
struct RunningScope {
    _death_watch: ServiceDeathWatch,
    thermal_forwarder: JoinHandle<()>,
}

impl Drop for RunningScope {
    fn drop(&mut self) {
        self.thermal_forwarder.abort();
    }
}

pub struct Coordinator {
    deps: Collaborators,
    config: TrackerConfig,
    base_config: TrackingConfig,
    session: TrackingSession,
    bound: Option<Shift>,
    heartbeat: HeartbeatReconciler,
    gaps: GapTracker,
    midnight: MidnightWatcher,
    wake: WakeOnMoveMonitor,
    running: Option<RunningScope>,
    verification: Option<Verification>,
    starting: Option<PendingStart>,
    start_attempts: u64,
    ended_shift: Option<String>,
    closed_remotely: Option<String>,
    tasks: JoinSet<Inbound>,
    outbox: SamplerOutbox,
    writer: StoreWriter,
    validator: Arc<StatusValidator>,
    inbox: mpsc::UnboundedSender<Inbound>,
    view: watch::Sender<SessionView>,
}

impl Coordinator {
    /// Must be called inside a tokio runtime; the outbox and writer tasks are
    /// spawned here. Rejects a config that fails [`TrackerConfig::validate`].
    pub fn new(
        deps: Collaborators,
        config: TrackerConfig,
        inbox: mpsc::UnboundedSender<Inbound>,
    ) -> Result<Self> {
        config.validate().map_err(TrackerError::InvalidConfig)?;

        let base_config = config.tracking_config();
        let session = TrackingSession::new(base_config.clone());
        let (view, _) = watch::channel(session.view());
        let validator = Arc::new(StatusValidator::new(
            Arc::clone(&deps.authority),
            Arc::clone(&deps.shifts),
            Arc::clone(&deps.notifier),
        ));

        Ok(Self {
            outbox: SamplerOutbox::spawn(Arc::clone(&deps.sampler)),
            writer: StoreWriter::spawn(Arc::clone(&deps.store), Arc::clone(&deps.notifier)),
            wake: WakeOnMoveMonitor::new(Arc::clone(&deps.wake)),
            heartbeat: HeartbeatReconciler::new(config.heartbeat.clone()),
            midnight: MidnightWatcher::new(&config.midnight),
            gaps: GapTracker::new(),
            base_config,
            session,
            bound: None,
            running: None,
            verification: None,
            starting: None,
            start_attempts: 0,
            ended_shift: None,
            closed_remotely: None,
            tasks: JoinSet::new(),
            validator,
            inbox,
            view,
            deps,
            config,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.subscribe()
    }

    pub fn session(&self) -> &TrackingSession {
        &self.session
    }

    pub fn consecutive_ping_failures(&self) -> u32 {
        self.heartbeat.consecutive_failures()
    }

    pub fn has_pending_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    pub(crate) fn verification_deadline(&self) -> Option<(u64, Instant)> {
        self.verification
            .map(|verification| (verification.attempt, verification.deadline))
    }

    pub(crate) async fn join_next_task(&mut self) -> Option<Inbound> {
        loop {
            match self.tasks.join_next().await? {
                Ok(inbound) => return Some(inbound),
                Err(err) => warn!(error = %err, "Background coordinator task failed"),
            }
        }
    }

    pub fn handle(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Sampler(event) => self.on_sampler_event(event),
            Inbound::Command(command) => self.on_command(command),
            Inbound::ShiftChanged { previous, current } => {
                self.on_shift_state_change(previous, current)
            }
            Inbound::Thermal(level) => self.on_thermal_level(level),
            Inbound::ServiceDied => self.on_service_died("service_died"),
            Inbound::WokeOnMove => self.on_woke_on_move(),
            Inbound::StartSeeded { attempt, seed } => self.on_start_seeded(attempt, seed),
            Inbound::StartCompleted { attempt, result } => {
                self.on_start_completed(attempt, result)
            }
            Inbound::Reconciled(plan) => self.on_reconciled(plan),
            Inbound::HealChecked { source, check } => self.on_heal_checked(source, check),
            Inbound::PingCompleted { shift_id, outcome } => {
                self.on_ping_completed(&shift_id, outcome)
            }
            Inbound::StatusValidated {
                shift_id,
                trigger,
                outcome,
            } => self.on_status_validated(&shift_id, trigger, outcome),
            Inbound::ClosureChecked { shift_id, verdict } => {
                self.on_closure_checked(&shift_id, verdict)
            }
            Inbound::VerificationExpired { attempt } => self.on_verification_expired(attempt),
            Inbound::Shutdown => {}
        }
        self.publish();
    }

    /// Run queued commands, writes and background tasks to completion,
    /// feeding every task result back through `handle`.
    pub async fn drain_pending(&mut self) {
        loop {
            self.outbox.flush().await;
            self.writer.flush().await;
            match self.join_next_task().await {
                Some(inbound) => self.handle(inbound),
                None => break,
            }
        }
        self.outbox.flush().await;
        self.writer.flush().await;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Bind `shift` and ask the sampler to start. `Ok` means the request was
    /// accepted; the outcome lands in the session once the sampler answers.
    pub fn start_tracking(&mut self, shift: Shift, config: Option<TrackingConfig>) -> Result<()> {
        self.begin_start(shift, config).map(|_| ())
    }

    fn begin_start(&mut self, shift: Shift, config: Option<TrackingConfig>) -> Result<StartPlan> {
        self.start_attempts = self.start_attempts.saturating_add(1);
        let attempt = self.start_attempts;
        let now = self.deps.clock.now_utc();
        self.record(
            LifecycleEntry::new(LifecycleKind::StartAttempt, now)
                .shift(&shift.id)
                .attempt(attempt)
                .detail(self.session.status.as_str()),
        );

        if matches!(
            self.session.status,
            TrackingStatus::Starting | TrackingStatus::Running
        ) && self.session.active_shift_id.as_deref() == Some(shift.id.as_str())
        {
            debug!(shift_id = %shift.id, attempt, "Tracking already active for shift");
            self.record(
                LifecycleEntry::new(LifecycleKind::StartSkipped, now)
                    .shift(&shift.id)
                    .attempt(attempt),
            );
            return Ok(match self.session.status {
                TrackingStatus::Starting => StartPlan::Pending,
                _ => StartPlan::AlreadyRunning,
            });
        }

        if let Some(config) = config {
            validate_tracking_config(&config)?;
            self.base_config = config.with_thermal_multiplier(1);
        }

        if self.session.status.is_bound() {
            info!(
                from = self.session.active_shift_id.as_deref().unwrap_or(""),
                to = %shift.id,
                "Switching shifts; restarting sampler"
            );
            self.stop_tracking(StopReason::ShiftSwitch);
        }

        if self.ended_shift.as_deref() == Some(shift.id.as_str()) {
            self.ended_shift = None;
        }
        self.session.begin_start(&shift.id, self.base_config.clone());
        self.bound = Some(shift.clone());
        self.starting = Some(PendingStart {
            attempt,
            open_gap: None,
            waiters: Vec::new(),
        });

        let store = Arc::clone(&self.deps.store);
        self.tasks.spawn(async move {
            let seed = load_seed(store.as_ref(), &shift.id).await;
            Inbound::StartSeeded { attempt, seed }
        });
        Ok(StartPlan::Pending)
    }

    fn current_start(&mut self, attempt: u64) -> Option<&mut PendingStart> {
        self.starting
            .as_mut()
            .filter(|pending| pending.attempt == attempt)
    }

    fn on_start_seeded(&mut self, attempt: u64, seed: StartSeed) {
        let Some(shift) = self.bound.clone() else {
            return;
        };
        let Some(pending) = self.current_start(attempt) else {
            debug!(attempt, "Seed for a start that was superseded");
            return;
        };
        pending.open_gap = seed.open_gap;
        self.session.points_captured = seed.points;

        let request = StartRequest {
            shift_id: shift.id,
            employee_id: shift.employee_id,
            shift_started_at: shift.started_at,
            initial_point_count: seed.points,
            config: self.session.config.clone(),
        };
        let receipt = self.outbox.submit(SamplerCommand::Start(request));
        self.tasks.spawn(async move {
            let result = receipt.await.unwrap_or_else(|_| {
                Err(TrackerError::Service(
                    "sampler dispatch was dropped".to_string(),
                ))
            });
            Inbound::StartCompleted { attempt, result }
        });
    }

    fn on_start_completed(&mut self, attempt: u64, result: Result<()>) {
        if self.current_start(attempt).is_none() {
            debug!(attempt, "Sampler answered a start that was superseded");
            return;
        }
        let (Some(pending), Some(shift)) = (self.starting.take(), self.bound.clone()) else {
            return;
        };
        let now = self.deps.clock.now_utc();
        let seeded = self.session.points_captured;

        match &result {
            Ok(()) => {
                self.session.status = TrackingStatus::Running;
                self.verification = Some(Verification {
                    attempt,
                    deadline: Instant::now() + self.config.verification_timeout(),
                });
                self.heartbeat.arm(now);
                self.midnight.reset();
                if let Some(gap) = pending.open_gap.clone() {
                    self.resume_gap(gap);
                }
                self.enter_running_scope();
                self.record(
                    LifecycleEntry::new(LifecycleKind::StartSucceeded, now)
                        .shift(&shift.id)
                        .attempt(attempt)
                        .detail(format!("seeded_points={}", seeded)),
                );
                info!(shift_id = %shift.id, attempt, seeded, "Tracking started");
            }
            Err(err) => {
                self.record(
                    LifecycleEntry::new(LifecycleKind::StartFailed, now)
                        .shift(&shift.id)
                        .attempt(attempt)
                        .detail(err.to_string()),
                );
                warn!(error = %err, shift_id = %shift.id, attempt, "Failed to start tracking");
                self.bound = None;
                self.gaps.clear();
                if err.is_permission() {
                    self.session.enter_error(err.user_message());
                } else {
                    self.session.reset_to_stopped();
                    self.session.error_message = Some(err.user_message());
                }
            }
        }
        pending.answer(&result);
    }

    /// Always safe to call. Ends in `Stopped` whatever the prior state, and
    /// cancels a start the sampler has not answered yet.
    pub fn stop_tracking(&mut self, reason: StopReason) {
        let now = self.deps.clock.now_utc();
        let shift_id = self.session.active_shift_id.clone();

        let mut entry = LifecycleEntry::new(LifecycleKind::Stop, now).detail(reason.as_str());
        if let Some(shift_id) = &shift_id {
            entry = entry.shift(shift_id.as_str());
            if reason.ends_shift() {
                self.ended_shift = Some(shift_id.clone());
            }
        }
        self.record(entry);

        if let Some(pending) = self.starting.take() {
            info!(attempt = pending.attempt, reason = reason.as_str(), "Cancelling pending start");
            pending.answer(&Err(TrackerError::StartCancelled(
                reason.as_str().to_string(),
            )));
        }

        if self.session.status.is_bound() {
            self.session.status = TrackingStatus::Stopping;
            self.publish();
        }

        self.outbox.send(SamplerCommand::Stop);

        if let Some(closed) = self.gaps.on_restored(None, now) {
            self.writer
                .close_gap(closed.id, closed.shift_id, closed.ended_at);
        }
        self.teardown_running_state();
        self.session.reset_to_stopped();

        info!(
            shift_id = shift_id.as_deref().unwrap_or(""),
            reason = reason.as_str(),
            "Tracking stopped"
        );
    }

    pub fn update_config(&mut self, config: TrackingConfig) -> Result<()> {
        validate_tracking_config(&config)?;
        self.base_config = config.with_thermal_multiplier(1);

        if self.session.status == TrackingStatus::Running {
            let multiplier = self.session.thermal_level.multiplier();
            self.session.config = self.base_config.with_thermal_multiplier(multiplier);
            self.outbox.send(SamplerCommand::UpdateConfig {
                config: self.session.config.clone(),
            });
        } else if !self.session.status.is_bound() {
            self.session.config = self.base_config.clone();
        }
        Ok(())
    }

    pub fn clear_error(&mut self) {
        if self.session.status == TrackingStatus::Error {
            self.session.status = TrackingStatus::Stopped;
        }
        self.session.error_message = None;
    }

    /// Rebuild the session after a process start. The sampler probe and the
    /// store lookups run in the background; their findings arrive as
    /// `Inbound::Reconciled`.
    pub fn reconcile_on_startup(&mut self) {
        let sampler = Arc::clone(&self.deps.sampler);
        let store = Arc::clone(&self.deps.store);
        let shifts = Arc::clone(&self.deps.shifts);
        self.tasks.spawn(async move {
            let plan = plan_startup(sampler.as_ref(), store.as_ref(), shifts.as_ref()).await;
            Inbound::Reconciled(plan)
        });
    }

    fn on_reconciled(&mut self, plan: StartupPlan) {
        if self.session.status.is_bound() {
            debug!("Tracking was started before startup reconciliation finished");
            return;
        }
        match plan {
            StartupPlan::Adopt { shift, seed } => self.adopt_running(shift, seed),
            StartupPlan::StopOrphan { shift_id } => {
                warn!(
                    shift_id = shift_id.as_deref().unwrap_or(""),
                    "Sampler running without an active shift; stopping it"
                );
                self.outbox.send(SamplerCommand::Stop);
            }
            StartupPlan::Heal(check) => self.on_heal_checked("process_restart", Some(check)),
            StartupPlan::Idle => debug!("No active shift at startup"),
        }
    }

    fn adopt_running(&mut self, shift: Shift, seed: StartSeed) {
        let now = self.deps.clock.now_utc();
        self.session.begin_start(&shift.id, self.base_config.clone());
        self.session.status = TrackingStatus::Running;
        self.session.points_captured = seed.points;
        self.bound = Some(shift.clone());
        self.heartbeat.arm(now);
        self.midnight.reset();
        if let Some(gap) = seed.open_gap {
            self.resume_gap(gap);
        }
        self.enter_running_scope();
        self.outbox.send(SamplerCommand::GetStatus);

        self.record(
            LifecycleEntry::new(LifecycleKind::Adopted, now)
                .shift(&shift.id)
                .detail(format!("points={}", seed.points)),
        );
        info!(shift_id = %shift.id, points = seed.points, "Adopted running sampler");
    }

    fn on_service_died(&mut self, source: &'static str) {
        if self.session.status == TrackingStatus::Starting {
            debug!(source, "Background context died while a start is in flight");
            return;
        }

        let now = self.deps.clock.now_utc();
        let known = self.bound.clone();
        let mut entry = LifecycleEntry::new(LifecycleKind::ServiceDied, now).detail(source);
        if let Some(shift) = &known {
            entry = entry.shift(shift.id.as_str());
        }
        self.record(entry);

        // The background context is already gone: reset locally, no stop command.
        self.gaps.clear();
        self.teardown_running_state();
        self.session.reset_to_stopped();

        self.spawn_self_heal(known, source);
    }

    /// Restart tracking for a shift the OS stopped behind our back, unless the
    /// shift was deliberately ended, storage shows it completed, or tracking
    /// has been started again in the meantime.
    fn on_heal_checked(&mut self, source: &'static str, check: Option<HealCheck>) {
        let Some(check) = check else {
            debug!(source, "Background context died with no open shift");
            return;
        };
        let shift = check.shift;

        if self.ended_shift.as_deref() == Some(shift.id.as_str()) {
            info!(shift_id = %shift.id, source, "Shift was ended locally; not restarting");
            return;
        }
        if self.session.status.is_bound() {
            debug!(shift_id = %shift.id, source, "Tracking already resumed; not restarting");
            return;
        }
        if !check.stored_active {
            info!(shift_id = %shift.id, source, "Stored shift is completed; not restarting");
            return;
        }

        let now = self.deps.clock.now_utc();
        let dead_for = check
            .last_capture_at
            .map(|captured_at| now.signed_duration_since(captured_at).num_seconds());
        self.record(
            LifecycleEntry::new(LifecycleKind::SelfHeal, now)
                .shift(&shift.id)
                .detail(match dead_for {
                    Some(seconds) => format!("{} dead_for_secs={}", source, seconds),
                    None => format!("{} dead_for_secs=unknown", source),
                }),
        );
        warn!(
            shift_id = %shift.id,
            source,
            dead_for_secs = dead_for.unwrap_or(-1),
            "Tracking was not running for an open shift; restarting"
        );

        if let Err(err) = self.start_tracking(shift, None) {
            warn!(error = %err, "Self-heal restart failed");
        }
    }

    fn enter_running_scope(&mut self) {
        self.running = None;

        let death_watch = self.wake.watch_service_death();
        let mut levels = self.deps.thermal.subscribe();
        let current = *levels.borrow_and_update();
        let inbox = self.inbox.clone();
        let thermal_forwarder = tokio::spawn(async move {
            while levels.changed().await.is_ok() {
                let level = *levels.borrow_and_update();
                if inbox.send(Inbound::Thermal(level)).is_err() {
                    break;
                }
            }
        });

        self.running = Some(RunningScope {
            _death_watch: death_watch,
            thermal_forwarder,
        });

        if current != ThermalLevel::Normal {
            self.apply_thermal_level(current);
        }
    }

    fn teardown_running_state(&mut self) {
        self.running = None;
        self.wake.deactivate_fallback();
        self.verification = None;
        self.heartbeat.reset();
        if self.midnight.warning_shown() {
            if let Some(shift_id) = self.session.active_shift_id.clone() {
                self.deps
                    .notifier
                    .notify(Notice::MidnightWarningCleared { shift_id });
            }
        }
        self.midnight.reset();
        self.bound = None;
    }

    fn resume_gap(&mut self, gap: GpsGap) {
        info!(gap_id = %gap.id, shift_id = %gap.shift_id, "Resuming open GPS gap");
        self.gaps.restore(gap);
        self.session.gps_signal_lost = true;
        self.wake.activate_fallback();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Inputs
    // ─────────────────────────────────────────────────────────────────────

    fn on_command(&mut self, command: Command) {
        match command {
            Command::StartTracking {
                shift,
                config,
                reply,
            } => match self.begin_start(shift, config) {
                Ok(StartPlan::AlreadyRunning) => {
                    let _ = reply.send(Ok(()));
                }
                Ok(StartPlan::Pending) => match self.starting.as_mut() {
                    Some(pending) => pending.waiters.push(reply),
                    None => {
                        let _ = reply.send(Ok(()));
                    }
                },
                Err(err) => {
                    let _ = reply.send(Err(err));
                }
            },
            Command::StopTracking { reason, reply } => {
                self.stop_tracking(reason);
                self.publish();
                let _ = reply.send(());
            }
            Command::UpdateConfig { config, reply } => {
                let result = self.update_config(config);
                self.publish();
                let _ = reply.send(result);
            }
            Command::ClearError { reply } => {
                self.clear_error();
                self.publish();
                let _ = reply.send(());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.session.view());
            }
        }
    }

    pub fn on_sampler_event(&mut self, event: SamplerEvent) {
        if let Err(info) = event.validate() {
            warn!(
                kind = event.kind(),
                code = %info.code,
                message = %info.message,
                "Dropping invalid sampler event"
            );
            return;
        }

        match event {
            SamplerEvent::Started { shift_id } => {
                if self.session.is_bound_to(&shift_id) {
                    debug!(shift_id = %shift_id, "Sampler confirmed start");
                } else {
                    warn!(shift_id = %shift_id, "Sampler reports start for an unbound shift");
                }
            }
            SamplerEvent::Stopped => self.on_sampler_stopped(),
            SamplerEvent::Position { point } => self.on_position(point),
            SamplerEvent::Heartbeat {
                is_stationary,
                point_count,
                last_capture_at,
            } => self.on_heartbeat(is_stationary, point_count, last_capture_at),
            SamplerEvent::Status {
                point_count,
                is_stationary,
            } => self.on_status(point_count, is_stationary),
            SamplerEvent::Error { message, fatal } => self.on_sampler_error(message, fatal),
            SamplerEvent::GpsLost { gap_started_at } => self.on_gps_lost(gap_started_at),
            SamplerEvent::GpsRestored { gap_ended_at } => self.on_gps_restored(gap_ended_at),
        }
    }

    fn on_position(&mut self, point: GpsPoint) {
        let counts = self.session.is_running_for(&point.shift_id);
        self.writer.write_point(point.clone());

        if !counts {
            debug!(shift_id = %point.shift_id, "Persisted point for a shift that is not being tracked");
            return;
        }

        self.session.record_position(&point);
        if !self.session.tracking_verified {
            self.session.tracking_verified = true;
            self.session.tracking_start_failed = false;
            self.verification = None;
            info!(shift_id = %point.shift_id, "Tracking verified by first point");
        }
    }

    fn on_heartbeat(
        &mut self,
        is_stationary: bool,
        point_count: u64,
        last_capture_at: Option<DateTime<Utc>>,
    ) {
        if self.session.status != TrackingStatus::Running {
            debug!("Heartbeat while not running; ignoring");
            return;
        }
        let Some(shift) = self.bound.clone() else {
            return;
        };

        self.session.is_stationary = is_stationary;
        self.session.merge_point_count(point_count);

        let now = self.deps.clock.now_utc();
        let actions = self
            .heartbeat
            .on_heartbeat(last_capture_at, self.expected_interval(), now);
        if actions.ping {
            self.spawn_ping(&shift);
        }
        if actions.recover_stream {
            self.request_recover_stream(&shift.id, "quiet_stream", now);
        }

        let local = self.deps.clock.now().time();
        match self.midnight.check(local) {
            MidnightAction::None => {}
            MidnightAction::ShowWarning => {
                info!(shift_id = %shift.id, "Shift will be closed at midnight");
                self.deps.notifier.notify(Notice::MidnightWarning {
                    shift_id: shift.id.clone(),
                });
            }
            MidnightAction::ClearWarningAndValidate => {
                self.deps.notifier.notify(Notice::MidnightWarningCleared {
                    shift_id: shift.id.clone(),
                });
                self.spawn_validation(&shift, ValidationTrigger::Midnight);
            }
        }
    }

    fn on_status(&mut self, point_count: u64, is_stationary: bool) {
        if !self.session.status.is_bound() {
            debug!("Status snapshot while unbound; ignoring");
            return;
        }
        self.session.points_captured = point_count;
        self.session.is_stationary = is_stationary;
    }

    fn on_sampler_error(&mut self, message: String, fatal: bool) {
        warn!(message = %message, fatal, "Sampler reported an error");
        if !fatal {
            self.session.error_message = Some(message);
            return;
        }

        let now = self.deps.clock.now_utc();
        let mut entry = LifecycleEntry::new(LifecycleKind::SamplerFailure, now).detail(&message);
        if let Some(shift_id) = &self.session.active_shift_id {
            entry = entry.shift(shift_id.as_str());
        }
        self.record(entry);

        self.stop_tracking(StopReason::SamplerFailure);
        self.session.enter_error(message);
    }

    fn on_sampler_stopped(&mut self) {
        if self.session.status == TrackingStatus::Running {
            warn!(
                shift_id = self.session.active_shift_id.as_deref().unwrap_or(""),
                "Sampler stopped on its own while tracking"
            );
            self.on_service_died("sampler_stopped");
        } else {
            debug!("Sampler stop acknowledged");
        }
    }

    fn on_gps_lost(&mut self, gap_started_at: Option<DateTime<Utc>>) {
        if self.session.status != TrackingStatus::Running {
            debug!("GPS loss while not running; ignoring");
            return;
        }
        let Some(shift) = &self.bound else {
            return;
        };

        let now = self.deps.clock.now_utc();
        if let Some(gap) = self
            .gaps
            .on_lost(&shift.id, &shift.employee_id, gap_started_at, now)
        {
            info!(gap_id = %gap.id, shift_id = %gap.shift_id, "GPS signal lost; gap opened");
            self.writer.open_gap(gap);
        }
        self.session.gps_signal_lost = true;
        self.wake.activate_fallback();
    }

    fn on_gps_restored(&mut self, gap_ended_at: Option<DateTime<Utc>>) {
        let now = self.deps.clock.now_utc();
        if let Some(closed) = self.gaps.on_restored(gap_ended_at, now) {
            info!(
                gap_id = %closed.id,
                shift_id = %closed.shift_id,
                gap_secs = closed.ended_at.signed_duration_since(closed.started_at).num_seconds(),
                "GPS signal restored; gap closed"
            );
            self.writer
                .close_gap(closed.id, closed.shift_id, closed.ended_at);
        }
        self.session.gps_signal_lost = false;
        self.wake.deactivate_fallback();
    }

    fn on_thermal_level(&mut self, level: ThermalLevel) {
        if self.session.status != TrackingStatus::Running {
            return;
        }
        self.apply_thermal_level(level);
    }

    fn apply_thermal_level(&mut self, level: ThermalLevel) {
        self.session.thermal_level = level;
        let multiplier = level.multiplier();
        if multiplier == self.session.config.thermal_multiplier {
            return;
        }

        self.session.config = self.session.config.with_thermal_multiplier(multiplier);
        info!(
            level = level.as_str(),
            multiplier, "Adjusting sampling for thermal level"
        );
        self.outbox.send(SamplerCommand::UpdateConfig {
            config: self.session.config.clone(),
        });
    }

    fn on_woke_on_move(&mut self) {
        if self.session.status != TrackingStatus::Running || !self.gaps.has_open_gap() {
            debug!("Wake-on-move delivery outside a GPS gap; ignoring");
            return;
        }
        let Some(shift_id) = self.session.active_shift_id.clone() else {
            return;
        };
        let now = self.deps.clock.now_utc();
        if self.heartbeat.should_recover(self.expected_interval(), now) {
            self.request_recover_stream(&shift_id, "wake_on_move", now);
        }
    }

    fn on_shift_state_change(&mut self, previous: Option<Shift>, current: Option<Shift>) {
        match current {
            Some(shift) if shift.is_active() => {
                if self.session.is_bound_to(&shift.id) {
                    // Same shift; pick up a server id learned by sync.
                    self.bound = Some(shift);
                    return;
                }
                if let Err(err) = self.start_tracking(shift, None) {
                    warn!(error = %err, "Auto-start on clock-in failed");
                }
            }
            other => {
                let Some(bound_id) = self.session.active_shift_id.clone() else {
                    return;
                };
                let reported = other.or(previous).map(|shift| shift.id);
                if reported.as_deref().map(|id| id != bound_id).unwrap_or(false) {
                    debug!("Closed shift is not the tracked one; ignoring");
                    return;
                }
                self.spawn_closure_check(bound_id);
            }
        }
    }

    fn on_closure_checked(&mut self, shift_id: &str, verdict: GuardVerdict) {
        if !self.session.is_bound_to(shift_id) {
            debug!(shift_id = %shift_id, "Closure check for a shift no longer tracked");
            return;
        }
        if !verdict.should_stop() {
            info!(shift_id = %shift_id, "Ignoring transient loss of active shift");
            return;
        }

        let reason = if self.closed_remotely.as_deref() == Some(shift_id) {
            StopReason::ServerClosedShift
        } else {
            StopReason::ClockOut
        };
        info!(shift_id = %shift_id, verdict = verdict.as_str(), "Shift closure confirmed");
        self.stop_tracking(reason);
    }

    fn on_ping_completed(&mut self, shift_id: &str, outcome: PingOutcome) {
        if !self.session.is_bound_to(shift_id) {
            return;
        }

        let follow_up = match outcome {
            PingOutcome::Skipped => {
                debug!(shift_id = %shift_id, "Heartbeat ping skipped; shift not synced yet");
                return;
            }
            PingOutcome::Delivered { server_shift_id } => {
                self.learn_server_id(server_shift_id);
                self.heartbeat.on_ping_result(true)
            }
            PingOutcome::Failed {
                server_shift_id,
                error,
            } => {
                self.learn_server_id(server_shift_id);
                let follow_up = self.heartbeat.on_ping_result(false);
                warn!(
                    shift_id = %shift_id,
                    error = %error,
                    consecutive_failures = self.heartbeat.consecutive_failures(),
                    "Heartbeat ping failed"
                );
                follow_up
            }
        };

        let Some(shift) = self.bound.clone() else {
            return;
        };
        match follow_up {
            PingFollowUp::None => {}
            PingFollowUp::Validate => self.spawn_validation(&shift, ValidationTrigger::Periodic),
            PingFollowUp::Escalate => {
                warn!(shift_id = %shift.id, "Heartbeat pings keep failing; validating shift status");
                self.spawn_validation(&shift, ValidationTrigger::Escalation);
            }
        }
    }

    fn on_status_validated(
        &mut self,
        shift_id: &str,
        trigger: ValidationTrigger,
        outcome: Option<ValidationOutcome>,
    ) {
        match outcome {
            Some(ValidationOutcome::ClosedRemotely) => {
                self.closed_remotely = Some(shift_id.to_string());
            }
            Some(outcome) => {
                debug!(shift_id = %shift_id, trigger = trigger.as_str(), outcome = ?outcome, "Shift status validated");
            }
            None => {
                debug!(shift_id = %shift_id, "Validation skipped; shift not synced yet");
            }
        }
    }

    fn on_verification_expired(&mut self, attempt: u64) {
        match self.verification {
            Some(verification) if verification.attempt == attempt => {}
            _ => return,
        }
        self.verification = None;

        if self.session.status != TrackingStatus::Running || self.session.tracking_verified {
            return;
        }
        let Some(shift_id) = self.session.active_shift_id.clone() else {
            return;
        };

        self.session.tracking_start_failed = true;
        let now = self.deps.clock.now_utc();
        self.record(
            LifecycleEntry::new(LifecycleKind::VerificationTimeout, now)
                .shift(shift_id.as_str())
                .attempt(attempt),
        );
        warn!(shift_id = %shift_id, attempt, "No GPS point received after start");
        self.deps
            .notifier
            .notify(Notice::TrackingStartFailed { shift_id });
    }

    // ─────────────────────────────────────────────────────────────────────
    // Background work
    // ─────────────────────────────────────────────────────────────────────

    fn spawn_ping(&mut self, shift: &Shift) {
        let shift_id = shift.id.clone();
        let known = shift.server_id.clone();
        let store = Arc::clone(&self.deps.store);
        let authority = Arc::clone(&self.deps.authority);

        self.tasks.spawn(async move {
            let outcome = match resolve_server_id(store.as_ref(), &shift_id, known).await {
                None => PingOutcome::Skipped,
                Some(server_shift_id) => match authority.ping_heartbeat(&server_shift_id).await {
                    Ok(()) => PingOutcome::Delivered { server_shift_id },
                    Err(err) => PingOutcome::Failed {
                        server_shift_id,
                        error: err.to_string(),
                    },
                },
            };
            Inbound::PingCompleted { shift_id, outcome }
        });
    }

    fn spawn_validation(&mut self, shift: &Shift, trigger: ValidationTrigger) {
        let shift_id = shift.id.clone();
        let known = shift.server_id.clone();
        let store = Arc::clone(&self.deps.store);
        let validator = Arc::clone(&self.validator);

        self.tasks.spawn(async move {
            let outcome = match resolve_server_id(store.as_ref(), &shift_id, known).await {
                Some(server_shift_id) => {
                    Some(validator.validate(&shift_id, &server_shift_id, trigger).await)
                }
                None => None,
            };
            Inbound::StatusValidated {
                shift_id,
                trigger,
                outcome,
            }
        });
    }

    fn spawn_closure_check(&mut self, shift_id: String) {
        let store = Arc::clone(&self.deps.store);
        self.tasks.spawn(async move {
            let verdict = confirm_shift_closed(store.as_ref(), &shift_id).await;
            Inbound::ClosureChecked { shift_id, verdict }
        });
    }

    fn spawn_self_heal(&mut self, known: Option<Shift>, source: &'static str) {
        let store = Arc::clone(&self.deps.store);
        let shifts = Arc::clone(&self.deps.shifts);
        self.tasks.spawn(async move {
            let shift = match known {
                Some(shift) => Some(shift),
                None => match shifts.active_shift().await {
                    Ok(shift) => shift.filter(Shift::is_active),
                    Err(err) => {
                        warn!(error = %err, "Failed to read active shift after service death");
                        None
                    }
                },
            };
            let check = match shift {
                Some(shift) => Some(check_heal(store.as_ref(), shift).await),
                None => None,
            };
            Inbound::HealChecked { source, check }
        });
    }

    fn request_recover_stream(&mut self, shift_id: &str, source: &str, now: DateTime<Utc>) {
        warn!(shift_id = %shift_id, source, "Position stream quiet; asking sampler to recover");
        self.record(
            LifecycleEntry::new(LifecycleKind::SelfHeal, now)
                .shift(shift_id)
                .detail(format!("recover_stream {}", source)),
        );
        self.outbox.send(SamplerCommand::RecoverStream);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────

    fn expected_interval(&self) -> Duration {
        let secs = self
            .session
            .config
            .effective_interval_secs(self.session.is_stationary);
        Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000))
    }

    fn learn_server_id(&mut self, server_shift_id: String) {
        if let Some(shift) = self.bound.as_mut() {
            if shift.server_id.is_none() {
                shift.server_id = Some(server_shift_id);
            }
        }
    }

    fn record(&self, entry: LifecycleEntry) {
        self.deps.diagnostics.record(entry);
    }

    fn publish(&self) {
        self.view.send_replace(self.session.view());
    }

    pub(crate) fn shutdown(&mut self) {
        self.teardown_running_state();
        self.tasks.abort_all();
    }
}

async fn load_seed(store: &dyn TrackingStore, shift_id: &str) -> StartSeed {
    let points = match store.point_count(shift_id).await {
        Ok(count) => count,
        Err(err) => {
            warn!(error = %err, shift_id = %shift_id, "Failed to seed point count; starting from zero");
            0
        }
    };
    let open_gap = match store.open_gap(shift_id).await {
        Ok(gap) => gap,
        Err(err) => {
            warn!(error = %err, shift_id = %shift_id, "Failed to look up open GPS gap");
            None
        }
    };
    StartSeed { points, open_gap }
}

async fn plan_startup(
    sampler: &dyn Sampler,
    store: &dyn TrackingStore,
    shifts: &dyn ShiftDirectory,
) -> StartupPlan {
    let probe = match sampler.probe().await {
        Ok(probe) => probe,
        Err(err) => {
            warn!(error = %err, "Failed to probe sampler at startup; assuming stopped");
            SamplerProbe::default()
        }
    };

    if probe.is_running {
        return match resolve_probe_shift(store, shifts, probe.shift_id.as_deref()).await {
            Some(shift) if shift.is_active() => {
                let seed = load_seed(store, &shift.id).await;
                StartupPlan::Adopt { shift, seed }
            }
            _ => StartupPlan::StopOrphan {
                shift_id: probe.shift_id,
            },
        };
    }

    match shifts.active_shift().await {
        Ok(Some(shift)) if shift.is_active() => StartupPlan::Heal(check_heal(store, shift).await),
        Ok(_) => StartupPlan::Idle,
        Err(err) => {
            warn!(error = %err, "Failed to read active shift at startup");
            StartupPlan::Idle
        }
    }
}

async fn resolve_probe_shift(
    store: &dyn TrackingStore,
    shifts: &dyn ShiftDirectory,
    probe_shift_id: Option<&str>,
) -> Option<Shift> {
    if let Some(shift_id) = probe_shift_id {
        match store.shift_by_id(shift_id).await {
            Ok(Some(shift)) => return Some(shift),
            Ok(None) => {}
            Err(err) => warn!(error = %err, shift_id = %shift_id, "Failed to load sampler's shift"),
        }
    }

    match shifts.active_shift().await {
        Ok(Some(shift))
            if probe_shift_id
                .map(|shift_id| shift_id == shift.id)
                .unwrap_or(true) =>
        {
            Some(shift)
        }
        Ok(_) => None,
        Err(err) => {
            warn!(error = %err, "Failed to read active shift");
            None
        }
    }
}

/// A failed or empty store read counts as still active.
async fn check_heal(store: &dyn TrackingStore, shift: Shift) -> HealCheck {
    let stored_active = match store.shift_by_id(&shift.id).await {
        Ok(Some(stored)) => stored.is_active(),
        Ok(None) => true,
        Err(err) => {
            warn!(error = %err, shift_id = %shift.id, "Failed to confirm shift before self-heal");
            true
        }
    };
    let last_capture_at = match store.latest_point(&shift.id).await {
        Ok(point) => point.map(|point| point.captured_at),
        Err(err) => {
            warn!(error = %err, shift_id = %shift.id, "Failed to read points for dead-time estimate");
            None
        }
    };
    HealCheck {
        shift,
        stored_active,
        last_capture_at,
    }
}

async fn resolve_server_id(
    store: &dyn TrackingStore,
    shift_id: &str,
    known: Option<String>,
) -> Option<String> {
    if known.is_some() {
        return known;
    }
    match store.shift_by_id(shift_id).await {
        Ok(shift) => shift.and_then(|shift| shift.server_id),
        Err(err) => {
            debug!(error = %err, shift_id = %shift_id, "Failed to resolve server shift id");
            None
        }
    }
}

fn validate_tracking_config(config: &TrackingConfig) -> Result<()> {
    if config.active_interval_secs == 0 || config.stationary_interval_secs == 0 {
        return Err(TrackerError::InvalidConfig(
            "sampling intervals must be positive".to_string(),
        ));
    }
    if !config.distance_filter_meters.is_finite() || config.distance_filter_meters < 0.0 {
        return Err(TrackerError::InvalidConfig(
            "distance filter must be a non-negative number".to_string(),
        ));
    }
    Ok(())
}
