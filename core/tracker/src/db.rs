//! SQLite persistence for shift-tracker.
//!
//! Holds the shift records, captured points and signal gaps. One connection
//! is opened per operation; the async `TrackingStore` impl moves each call
//! onto the blocking pool so the event loop never waits on disk.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use shift_tracker_protocol::GpsPoint;
use std::path::{Path, PathBuf};

use crate::error::{Result as TrackerResult, TrackerError};
use crate::ports::TrackingStore;
use crate::types::{GapReason, GpsGap, Shift, ShiftStatus};

const DEFAULT_DB_RELATIVE_PATH: &str = ".shift-tracker/tracker.db";

#[derive(Debug, Clone)]
pub struct Db {
    path: PathBuf,
}

pub fn default_db_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(DEFAULT_DB_RELATIVE_PATH))
}

impl Db {
    pub fn new(path: PathBuf) -> Result<Self, String> {
        let db = Self { path };
        db.init_schema()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn upsert_shift(&self, shift: &Shift) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO shifts (id, server_id, employee_id, started_at, status) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(id) DO UPDATE SET \
                    server_id = COALESCE(excluded.server_id, shifts.server_id), \
                    employee_id = excluded.employee_id, \
                    started_at = excluded.started_at, \
                    status = excluded.status",
                params![
                    shift.id,
                    shift.server_id,
                    shift.employee_id,
                    format_time(&shift.started_at),
                    shift.status.as_str()
                ],
            )
            .map_err(|err| format!("Failed to upsert shift: {}", err))?;
            Ok(())
        })
    }

    pub fn get_shift(&self, shift_id: &str) -> Result<Option<Shift>, String> {
        self.with_connection(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, server_id, employee_id, started_at, status \
                     FROM shifts WHERE id = ?1",
                    params![shift_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    },
                )
                .optional()
                .map_err(|err| format!("Failed to query shift: {}", err))?;

            let Some((id, server_id, employee_id, started_at, status)) = row else {
                return Ok(None);
            };
            let started_at = parse_rfc3339(&started_at)
                .ok_or_else(|| format!("Invalid started_at for shift {}: {}", id, started_at))?;
            let status = ShiftStatus::parse(&status)
                .ok_or_else(|| format!("Invalid status for shift {}: {}", id, status))?;

            Ok(Some(Shift {
                id,
                server_id,
                employee_id,
                started_at,
                status,
            }))
        })
    }

    pub fn insert_point(&self, point: &GpsPoint) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO points \
                    (shift_id, employee_id, latitude, longitude, accuracy_meters, \
                     altitude_meters, speed_mps, heading_degrees, captured_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    point.shift_id,
                    point.employee_id,
                    point.latitude,
                    point.longitude,
                    point.accuracy_meters,
                    point.altitude_meters,
                    point.speed_mps,
                    point.heading_degrees,
                    format_time(&point.captured_at)
                ],
            )
            .map_err(|err| format!("Failed to insert point: {}", err))?;
            Ok(())
        })
    }

    pub fn point_count(&self, shift_id: &str) -> Result<u64, String> {
        let count = self.with_connection(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM points WHERE shift_id = ?1",
                params![shift_id],
                |row| row.get::<_, i64>(0),
            )
            .map_err(|err| format!("Failed to count points: {}", err))
        })?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    pub fn list_points(&self, shift_id: &str) -> Result<Vec<GpsPoint>, String> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT shift_id, employee_id, latitude, longitude, accuracy_meters, \
                            altitude_meters, speed_mps, heading_degrees, captured_at \
                     FROM points WHERE shift_id = ?1 \
                     ORDER BY captured_at ASC, rowid ASC",
                )
                .map_err(|err| format!("Failed to prepare points query: {}", err))?;

            let rows = stmt
                .query_map(params![shift_id], point_from_row)
                .map_err(|err| format!("Failed to read point rows: {}", err))?;

            let mut points = Vec::new();
            for row in rows {
                let row = row.map_err(|err| format!("Failed to decode point row: {}", err))?;
                points.push(row.into_point()?);
            }
            Ok(points)
        })
    }

    pub fn latest_point(&self, shift_id: &str) -> Result<Option<GpsPoint>, String> {
        self.with_connection(|conn| {
            let row = conn
                .query_row(
                    "SELECT shift_id, employee_id, latitude, longitude, accuracy_meters, \
                            altitude_meters, speed_mps, heading_degrees, captured_at \
                     FROM points WHERE shift_id = ?1 \
                     ORDER BY captured_at DESC, rowid DESC LIMIT 1",
                    params![shift_id],
                    point_from_row,
                )
                .optional()
                .map_err(|err| format!("Failed to query latest point: {}", err))?;
            row.map(PointRow::into_point).transpose()
        })
    }

    pub fn insert_gap(&self, gap: &GpsGap) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO gps_gaps (id, shift_id, employee_id, started_at, ended_at, reason) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT(id) DO NOTHING",
                params![
                    gap.id,
                    gap.shift_id,
                    gap.employee_id,
                    format_time(&gap.started_at),
                    gap.ended_at.as_ref().map(format_time),
                    gap.reason.as_str()
                ],
            )
            .map_err(|err| format!("Failed to insert gap: {}", err))?;
            Ok(())
        })
    }

    pub fn close_gap(&self, gap_id: &str, ended_at: DateTime<Utc>) -> Result<(), String> {
        self.with_connection(|conn| {
            let updated = conn
                .execute(
                    "UPDATE gps_gaps SET ended_at = ?2 WHERE id = ?1",
                    params![gap_id, format_time(&ended_at)],
                )
                .map_err(|err| format!("Failed to close gap: {}", err))?;
            if updated == 0 {
                return Err(format!("Gap {} not found", gap_id));
            }
            Ok(())
        })
    }

    pub fn open_gap(&self, shift_id: &str) -> Result<Option<GpsGap>, String> {
        self.with_connection(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, shift_id, employee_id, started_at, ended_at, reason \
                     FROM gps_gaps WHERE shift_id = ?1 AND ended_at IS NULL \
                     ORDER BY started_at DESC LIMIT 1",
                    params![shift_id],
                    gap_from_row,
                )
                .optional()
                .map_err(|err| format!("Failed to query open gap: {}", err))?;
            row.map(GapRow::into_gap).transpose()
        })
    }

    pub fn list_gaps(&self, shift_id: &str) -> Result<Vec<GpsGap>, String> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, shift_id, employee_id, started_at, ended_at, reason \
                     FROM gps_gaps WHERE shift_id = ?1 ORDER BY started_at ASC, id ASC",
                )
                .map_err(|err| format!("Failed to prepare gaps query: {}", err))?;

            let rows = stmt
                .query_map(params![shift_id], gap_from_row)
                .map_err(|err| format!("Failed to read gap rows: {}", err))?;

            let mut gaps = Vec::new();
            for row in rows {
                let row = row.map_err(|err| format!("Failed to decode gap row: {}", err))?;
                gaps.push(row.into_gap()?);
            }
            Ok(gaps)
        })
    }

    fn init_schema(&self) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS shifts (
                    id TEXT PRIMARY KEY,
                    server_id TEXT,
                    employee_id TEXT NOT NULL,
                    started_at TEXT NOT NULL,
                    status TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS points (
                    shift_id TEXT NOT NULL,
                    employee_id TEXT NOT NULL,
                    latitude REAL NOT NULL,
                    longitude REAL NOT NULL,
                    accuracy_meters REAL,
                    altitude_meters REAL,
                    speed_mps REAL,
                    heading_degrees REAL,
                    captured_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS points_by_shift
                    ON points (shift_id, captured_at);
                 CREATE TABLE IF NOT EXISTS gps_gaps (
                    id TEXT PRIMARY KEY,
                    shift_id TEXT NOT NULL,
                    employee_id TEXT NOT NULL,
                    started_at TEXT NOT NULL,
                    ended_at TEXT,
                    reason TEXT NOT NULL
                 );
                 COMMIT;",
            )
            .map_err(|err| format!("Failed to initialize schema: {}", err))?;
            Ok(())
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, String>,
    ) -> Result<T, String> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection, String> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| format!("Failed to create tracker data dir: {}", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| format!("Failed to open sqlite db: {}", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| format!("Failed to enable WAL: {}", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| format!("Failed to set synchronous: {}", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| format!("Failed to set busy_timeout: {}", err))?;

        Ok(conn)
    }

    async fn blocking<T, F>(&self, op: F) -> TrackerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Db) -> Result<T, String> + Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|err| TrackerError::Persistence(format!("Store task failed: {}", err)))?
            .map_err(TrackerError::Persistence)
    }
}

#[async_trait]
impl TrackingStore for Db {
    async fn insert_point(&self, point: &GpsPoint) -> TrackerResult<()> {
        let point = point.clone();
        self.blocking(move |db| db.insert_point(&point)).await
    }

    async fn point_count(&self, shift_id: &str) -> TrackerResult<u64> {
        let shift_id = shift_id.to_string();
        self.blocking(move |db| db.point_count(&shift_id)).await
    }

    async fn points(&self, shift_id: &str) -> TrackerResult<Vec<GpsPoint>> {
        let shift_id = shift_id.to_string();
        self.blocking(move |db| db.list_points(&shift_id)).await
    }

    async fn latest_point(&self, shift_id: &str) -> TrackerResult<Option<GpsPoint>> {
        let shift_id = shift_id.to_string();
        self.blocking(move |db| db.latest_point(&shift_id)).await
    }

    async fn insert_gap(&self, gap: &GpsGap) -> TrackerResult<()> {
        let gap = gap.clone();
        self.blocking(move |db| db.insert_gap(&gap)).await
    }

    async fn close_gap(&self, gap_id: &str, ended_at: DateTime<Utc>) -> TrackerResult<()> {
        let gap_id = gap_id.to_string();
        self.blocking(move |db| db.close_gap(&gap_id, ended_at)).await
    }

    async fn open_gap(&self, shift_id: &str) -> TrackerResult<Option<GpsGap>> {
        let shift_id = shift_id.to_string();
        self.blocking(move |db| db.open_gap(&shift_id)).await
    }

    async fn shift_by_id(&self, shift_id: &str) -> TrackerResult<Option<Shift>> {
        let shift_id = shift_id.to_string();
        self.blocking(move |db| db.get_shift(&shift_id)).await
    }
}

struct PointRow {
    shift_id: String,
    employee_id: String,
    latitude: f64,
    longitude: f64,
    accuracy_meters: Option<f64>,
    altitude_meters: Option<f64>,
    speed_mps: Option<f64>,
    heading_degrees: Option<f64>,
    captured_at: String,
}

impl PointRow {
    fn into_point(self) -> Result<GpsPoint, String> {
        let captured_at = parse_rfc3339(&self.captured_at)
            .ok_or_else(|| format!("Invalid captured_at: {}", self.captured_at))?;
        Ok(GpsPoint {
            shift_id: self.shift_id,
            employee_id: self.employee_id,
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy_meters: self.accuracy_meters,
            altitude_meters: self.altitude_meters,
            speed_mps: self.speed_mps,
            heading_degrees: self.heading_degrees,
            captured_at,
        })
    }
}

fn point_from_row(row: &Row<'_>) -> rusqlite::Result<PointRow> {
    Ok(PointRow {
        shift_id: row.get(0)?,
        employee_id: row.get(1)?,
        latitude: row.get(2)?,
        longitude: row.get(3)?,
        accuracy_meters: row.get(4)?,
        altitude_meters: row.get(5)?,
        speed_mps: row.get(6)?,
        heading_degrees: row.get(7)?,
        captured_at: row.get(8)?,
    })
}

struct GapRow {
    id: String,
    shift_id: String,
    employee_id: String,
    started_at: String,
    ended_at: Option<String>,
    reason: String,
}

impl GapRow {
    fn into_gap(self) -> Result<GpsGap, String> {
        let started_at = parse_rfc3339(&self.started_at)
            .ok_or_else(|| format!("Invalid started_at for gap {}", self.id))?;
        let ended_at = match self.ended_at {
            Some(value) => Some(
                parse_rfc3339(&value)
                    .ok_or_else(|| format!("Invalid ended_at for gap {}", self.id))?,
            ),
            None => None,
        };
        let reason = GapReason::parse(&self.reason)
            .ok_or_else(|| format!("Invalid reason for gap {}: {}", self.id, self.reason))?;
        Ok(GpsGap {
            id: self.id,
            shift_id: self.shift_id,
            employee_id: self.employee_id,
            started_at,
            ended_at,
            reason,
        })
    }
}

fn gap_from_row(row: &Row<'_>) -> rusqlite::Result<GapRow> {
    Ok(GapRow {
        id: row.get(0)?,
        shift_id: row.get(1)?,
        employee_id: row.get(2)?,
        started_at: row.get(3)?,
        ended_at: row.get(4)?,
        reason: row.get(5)?,
    })
}

// Fixed-width UTC timestamps so text ordering matches time ordering.
fn format_time(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
