//! In-memory fakes for coordinator tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use shift_tracker_protocol::{GpsPoint, SamplerCommand};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use crate::diagnostics::{LifecycleEntry, LifecycleKind};
use crate::error::{Result, TrackerError};
use crate::ports::{
    Clock, DiagnosticSink, Notice, Notifier, Sampler, SamplerProbe, ShiftAuthority,
    ShiftDirectory, TrackingStore, WakePlatform,
};
use crate::types::{GpsGap, Shift, ShiftStatus};

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0)
        .single()
        .expect("valid base time")
}

pub fn shift(id: &str, status: ShiftStatus) -> Shift {
    Shift {
        id: id.to_string(),
        server_id: Some(format!("srv-{}", id)),
        employee_id: "emp-1".to_string(),
        started_at: base_time() - Duration::hours(1),
        status,
    }
}

pub fn point_at(shift_id: &str, second: i64) -> GpsPoint {
    GpsPoint {
        shift_id: shift_id.to_string(),
        employee_id: "emp-1".to_string(),
        latitude: 47.6 + second as f64 * 0.0001,
        longitude: -122.3,
        accuracy_meters: Some(5.0),
        altitude_meters: None,
        speed_mps: None,
        heading_degrees: None,
        captured_at: base_time() + Duration::seconds(second),
    }
}

#[derive(Default)]
pub struct FakeSampler {
    commands: Mutex<Vec<SamplerCommand>>,
    start_error: Mutex<Option<TrackerError>>,
    probe: Mutex<SamplerProbe>,
    start_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeSampler {
    pub fn commands(&self) -> Vec<SamplerCommand> {
        self.commands.lock().expect("commands lock").clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.commands()
            .iter()
            .filter(|command| command.name() == name)
            .count()
    }

    pub fn last_start(&self) -> Option<shift_tracker_protocol::StartRequest> {
        self.commands().into_iter().rev().find_map(|command| match command {
            SamplerCommand::Start(request) => Some(request),
            _ => None,
        })
    }

    pub fn set_start_error(&self, error: Option<TrackerError>) {
        *self.start_error.lock().expect("start error lock") = error;
    }

    pub fn set_probe(&self, probe: SamplerProbe) {
        *self.probe.lock().expect("probe lock") = probe;
    }

    /// Park every `start` dispatch until [`FakeSampler::release_start`].
    pub fn hold_start(&self) {
        *self.start_gate.lock().expect("start gate lock") = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_start(&self) {
        if let Some(gate) = self.start_gate.lock().expect("start gate lock").take() {
            gate.close();
        }
    }
}

#[async_trait]
impl Sampler for FakeSampler {
    async fn dispatch(&self, command: SamplerCommand) -> Result<()> {
        if matches!(command, SamplerCommand::Start(_)) {
            if let Some(err) = self.start_error.lock().expect("start error lock").clone() {
                return Err(err);
            }
            let gate = self.start_gate.lock().expect("start gate lock").clone();
            if let Some(gate) = gate {
                let _ = gate.acquire().await;
            }
        }
        self.commands.lock().expect("commands lock").push(command);
        Ok(())
    }

    async fn probe(&self) -> Result<SamplerProbe> {
        Ok(self.probe.lock().expect("probe lock").clone())
    }
}

#[derive(Default)]
pub struct FakeStore {
    shifts: Mutex<HashMap<String, Shift>>,
    points: Mutex<Vec<GpsPoint>>,
    gaps: Mutex<Vec<GpsGap>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    count_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeStore {
    pub fn put_shift(&self, shift: Shift) {
        self.shifts
            .lock()
            .expect("shifts lock")
            .insert(shift.id.clone(), shift);
    }

    pub fn set_shift_status(&self, shift_id: &str, status: ShiftStatus) {
        if let Some(shift) = self.shifts.lock().expect("shifts lock").get_mut(shift_id) {
            shift.status = status;
        }
    }

    pub fn remove_shift(&self, shift_id: &str) {
        self.shifts.lock().expect("shifts lock").remove(shift_id);
    }

    pub fn seed_points(&self, shift_id: &str, count: i64) {
        let mut points = self.points.lock().expect("points lock");
        for second in 0..count {
            points.push(point_at(shift_id, second - count));
        }
    }

    pub fn put_gap(&self, gap: GpsGap) {
        self.gaps.lock().expect("gaps lock").push(gap);
    }

    pub fn inserted_points(&self) -> Vec<GpsPoint> {
        self.points.lock().expect("points lock").clone()
    }

    pub fn gaps(&self) -> Vec<GpsGap> {
        self.gaps.lock().expect("gaps lock").clone()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Park every `point_count` read until [`FakeStore::release_reads`].
    pub fn hold_reads(&self) {
        *self.count_gate.lock().expect("count gate lock") = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_reads(&self) {
        if let Some(gate) = self.count_gate.lock().expect("count gate lock").take() {
            gate.close();
        }
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TrackerError::Persistence("disk full".to_string()));
        }
        Ok(())
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(TrackerError::Persistence("database locked".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TrackingStore for FakeStore {
    async fn insert_point(&self, point: &GpsPoint) -> Result<()> {
        self.check_write()?;
        self.points.lock().expect("points lock").push(point.clone());
        Ok(())
    }

    async fn point_count(&self, shift_id: &str) -> Result<u64> {
        let gate = self.count_gate.lock().expect("count gate lock").clone();
        if let Some(gate) = gate {
            let _ = gate.acquire().await;
        }
        self.check_read()?;
        Ok(self
            .points
            .lock()
            .expect("points lock")
            .iter()
            .filter(|point| point.shift_id == shift_id)
            .count() as u64)
    }

    async fn points(&self, shift_id: &str) -> Result<Vec<GpsPoint>> {
        self.check_read()?;
        Ok(self
            .points
            .lock()
            .expect("points lock")
            .iter()
            .filter(|point| point.shift_id == shift_id)
            .cloned()
            .collect())
    }

    async fn latest_point(&self, shift_id: &str) -> Result<Option<GpsPoint>> {
        Ok(self.points(shift_id).await?.into_iter().last())
    }

    async fn insert_gap(&self, gap: &GpsGap) -> Result<()> {
        self.check_write()?;
        self.gaps.lock().expect("gaps lock").push(gap.clone());
        Ok(())
    }

    async fn close_gap(&self, gap_id: &str, ended_at: DateTime<Utc>) -> Result<()> {
        self.check_write()?;
        let mut gaps = self.gaps.lock().expect("gaps lock");
        match gaps.iter_mut().find(|gap| gap.id == gap_id) {
            Some(gap) => {
                gap.ended_at = Some(ended_at);
                Ok(())
            }
            None => Err(TrackerError::Persistence(format!("gap {} not found", gap_id))),
        }
    }

    async fn open_gap(&self, shift_id: &str) -> Result<Option<GpsGap>> {
        self.check_read()?;
        Ok(self
            .gaps
            .lock()
            .expect("gaps lock")
            .iter()
            .find(|gap| gap.shift_id == shift_id && gap.ended_at.is_none())
            .cloned())
    }

    async fn shift_by_id(&self, shift_id: &str) -> Result<Option<Shift>> {
        self.check_read()?;
        Ok(self.shifts.lock().expect("shifts lock").get(shift_id).cloned())
    }
}

#[derive(Default)]
pub struct FakeAuthority {
    ping_failing: AtomicBool,
    status_unreachable: AtomicBool,
    status: Mutex<Option<ShiftStatus>>,
    pings: Mutex<Vec<String>>,
    status_calls: AtomicUsize,
}

impl FakeAuthority {
    pub fn set_ping_failing(&self, failing: bool) {
        self.ping_failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_status(&self, status: Option<ShiftStatus>) {
        *self.status.lock().expect("status lock") = status;
    }

    pub fn set_status_unreachable(&self, unreachable: bool) {
        self.status_unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn pings(&self) -> Vec<String> {
        self.pings.lock().expect("pings lock").clone()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShiftAuthority for FakeAuthority {
    async fn ping_heartbeat(&self, server_shift_id: &str) -> Result<()> {
        self.pings
            .lock()
            .expect("pings lock")
            .push(server_shift_id.to_string());
        if self.ping_failing.load(Ordering::SeqCst) {
            return Err(TrackerError::Network("connection reset".to_string()));
        }
        Ok(())
    }

    async fn shift_status(&self, _server_shift_id: &str) -> Result<Option<ShiftStatus>> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.status_unreachable.load(Ordering::SeqCst) {
            return Err(TrackerError::Network("offline".to_string()));
        }
        Ok(*self.status.lock().expect("status lock"))
    }
}

#[derive(Default)]
pub struct FakeShiftDirectory {
    active: Mutex<Option<Shift>>,
    refreshes: Mutex<Vec<String>>,
}

impl FakeShiftDirectory {
    pub fn set_active(&self, shift: Option<Shift>) {
        *self.active.lock().expect("active lock") = shift;
    }

    pub fn refreshes(&self) -> Vec<String> {
        self.refreshes.lock().expect("refreshes lock").clone()
    }
}

#[async_trait]
impl ShiftDirectory for FakeShiftDirectory {
    async fn active_shift(&self) -> Result<Option<Shift>> {
        Ok(self.active.lock().expect("active lock").clone())
    }

    async fn refresh(&self, shift_id: &str) -> Result<()> {
        self.refreshes
            .lock()
            .expect("refreshes lock")
            .push(shift_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().expect("notices lock").clone()
    }

    pub fn count_points_changed(&self, shift_id: &str) -> usize {
        self.notices()
            .iter()
            .filter(|notice| {
                matches!(notice, Notice::PointsChanged { shift_id: id } if id == shift_id)
            })
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().expect("notices lock").push(notice);
    }
}

#[derive(Default)]
pub struct RecordingDiagnostics {
    entries: Mutex<Vec<LifecycleEntry>>,
}

impl RecordingDiagnostics {
    pub fn entries(&self) -> Vec<LifecycleEntry> {
        self.entries.lock().expect("entries lock").clone()
    }

    pub fn kinds(&self) -> Vec<LifecycleKind> {
        self.entries().iter().map(|entry| entry.kind).collect()
    }
}

impl DiagnosticSink for RecordingDiagnostics {
    fn record(&self, entry: LifecycleEntry) {
        self.entries.lock().expect("entries lock").push(entry);
    }
}

#[derive(Default)]
pub struct FakeWake {
    significant_starts: AtomicUsize,
    significant_stops: AtomicUsize,
    significant_active: AtomicBool,
    watching: AtomicBool,
}

impl FakeWake {
    pub fn significant_starts(&self) -> usize {
        self.significant_starts.load(Ordering::SeqCst)
    }

    pub fn significant_stops(&self) -> usize {
        self.significant_stops.load(Ordering::SeqCst)
    }

    pub fn significant_active(&self) -> bool {
        self.significant_active.load(Ordering::SeqCst)
    }

    pub fn watching_service_death(&self) -> bool {
        self.watching.load(Ordering::SeqCst)
    }
}

impl WakePlatform for FakeWake {
    fn start_significant_changes(&self) -> Result<()> {
        self.significant_starts.fetch_add(1, Ordering::SeqCst);
        self.significant_active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_significant_changes(&self) -> Result<()> {
        self.significant_stops.fetch_add(1, Ordering::SeqCst);
        self.significant_active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn watch_service_death(&self) -> Result<()> {
        self.watching.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn unwatch_service_death(&self) {
        self.watching.store(false, Ordering::SeqCst);
    }
}

/// Clock pinned to a local offset that tests move by hand.
pub struct ManualClock {
    now: Mutex<DateTime<FixedOffset>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        let offset = FixedOffset::east_opt(0).expect("valid offset");
        Self {
            now: Mutex::new(start.with_timezone(&offset)),
        }
    }

    pub fn set(&self, now: DateTime<FixedOffset>) {
        *self.now.lock().expect("clock lock") = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<FixedOffset> {
        *self.now.lock().expect("clock lock")
    }
}

/// Every collaborator fake, already shared.
pub struct Fakes {
    pub sampler: Arc<FakeSampler>,
    pub store: Arc<FakeStore>,
    pub authority: Arc<FakeAuthority>,
    pub shifts: Arc<FakeShiftDirectory>,
    pub notifier: Arc<RecordingNotifier>,
    pub diagnostics: Arc<RecordingDiagnostics>,
    pub wake: Arc<FakeWake>,
    pub clock: Arc<ManualClock>,
}

impl Default for Fakes {
    fn default() -> Self {
        Self {
            sampler: Arc::new(FakeSampler::default()),
            store: Arc::new(FakeStore::default()),
            authority: Arc::new(FakeAuthority::default()),
            shifts: Arc::new(FakeShiftDirectory::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            diagnostics: Arc::new(RecordingDiagnostics::default()),
            wake: Arc::new(FakeWake::default()),
            clock: Arc::new(ManualClock::new(base_time())),
        }
    }
}
