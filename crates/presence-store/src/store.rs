use std::path::Path;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use serde::Serialize;
use thiserror::Error;
use tokio_rusqlite::Connection;

use presence_core::{
    local_day, AttendanceLedger, AttendanceRecord, Descriptor, EnrollmentStore, EnrolledIdentity,
    NewAttendance,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("identity already registered: {0}")]
    DuplicateIdentity(String),
    #[error("identity id and display name must not be empty")]
    EmptyField,
    #[error("descriptor must not be empty")]
    EmptyDescriptor,
    #[error("invalid descriptor value (NaN/Inf)")]
    InvalidDescriptorValue,
    #[error("invalid descriptor blob size: {0} bytes")]
    InvalidBlob(usize),
}

/// SQLite-backed enrollment store and attendance ledger.
///
/// Descriptors are stored as little-endian `f32` blobs. Attendance rows carry
/// both the RFC 3339 event instant and the local calendar day it fell on,
/// which is what daily dedup and the per-day report query.
#[derive(Clone)]
pub struct AttendanceStore {
    conn: Connection,
}

impl AttendanceStore {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 CREATE TABLE IF NOT EXISTS identities (
                     id TEXT PRIMARY KEY,
                     display_name TEXT NOT NULL,
                     descriptor BLOB NOT NULL,
                     created_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS attendance (
                     id TEXT PRIMARY KEY,
                     identity_id TEXT NOT NULL,
                     display_name TEXT NOT NULL,
                     marked_at TEXT NOT NULL,
                     day TEXT NOT NULL,
                     verified INTEGER NOT NULL DEFAULT 1,
                     liveness_score REAL NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_attendance_day ON attendance(day, identity_id);",
            )?;
            Ok(())
        })
        .await?;

        tracing::debug!(path = %db_path.display(), "attendance store opened");
        Ok(Self { conn })
    }

    /// Register a new identity. Re-using an existing id is rejected.
    pub async fn register(
        &self,
        id: &str,
        display_name: &str,
        descriptor: &Descriptor,
    ) -> Result<EnrolledIdentity, StoreError> {
        let id = id.trim().to_string();
        let display_name = display_name.trim().to_string();
        if id.is_empty() || display_name.is_empty() {
            return Err(StoreError::EmptyField);
        }
        validate_descriptor(&descriptor.values)?;

        let blob = descriptor_to_bytes(&descriptor.values);
        let enrolled_at = Utc::now();
        let created_at = to_text(enrolled_at);

        let row_id = id.clone();
        let row_name = display_name.clone();
        let inserted = self
            .conn
            .call(move |conn| {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM identities WHERE id = ?1)",
                    [&row_id],
                    |row| row.get(0),
                )?;
                if exists {
                    return Ok(false);
                }
                conn.execute(
                    "INSERT INTO identities (id, display_name, descriptor, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![row_id, row_name, blob, created_at],
                )?;
                Ok(true)
            })
            .await?;

        if !inserted {
            return Err(StoreError::DuplicateIdentity(id));
        }

        tracing::info!(
            identity = %id,
            name = %display_name,
            dim = descriptor.len(),
            "identity registered"
        );
        Ok(EnrolledIdentity {
            id,
            display_name,
            descriptor: descriptor.clone(),
            enrolled_at,
        })
    }

    /// Look up one identity by id.
    pub async fn get(&self, id: &str) -> Result<Option<EnrolledIdentity>, StoreError> {
        let id = id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, display_name, descriptor, created_at
                     FROM identities WHERE id = ?1",
                )?;
                let mut rows = stmt.query_map([&id], identity_row)?;
                Ok(rows.next().transpose()?)
            })
            .await?;

        row.map(into_identity).transpose()
    }

    /// All identities, oldest registration first.
    pub async fn list(&self) -> Result<Vec<EnrolledIdentity>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, display_name, descriptor, created_at
                     FROM identities ORDER BY created_at, rowid",
                )?;
                let rows = stmt.query_map([], identity_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        rows.into_iter().map(into_identity).collect()
    }

    /// Remove an identity. Its past attendance records are kept.
    pub async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let affected = conn.execute("DELETE FROM identities WHERE id = ?1", [&id])?;
                Ok(affected > 0)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Attendance events on a local calendar day, most recent first.
    pub async fn records_on(&self, day: NaiveDate) -> Result<Vec<AttendanceRecord>, StoreError> {
        let day = day.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, identity_id, display_name, marked_at, verified, liveness_score
                     FROM attendance WHERE day = ?1 ORDER BY marked_at DESC",
                )?;
                let rows = stmt.query_map([&day], |row| {
                    Ok(AttendanceRecord {
                        id: row.get(0)?,
                        identity_id: row.get(1)?,
                        display_name: row.get(2)?,
                        marked_at: parse_instant(&row.get::<_, String>(3)?, 3)?,
                        verified: row.get(4)?,
                        liveness_score: row.get::<_, f64>(5)? as f32,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Number of attendance events on a local calendar day.
    pub async fn count_on(&self, day: NaiveDate) -> Result<u64, StoreError> {
        let day = day.to_string();
        self.conn
            .call(move |conn| {
                let count: u64 = conn.query_row(
                    "SELECT COUNT(*) FROM attendance WHERE day = ?1",
                    [&day],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Who was present and who was absent on a day, for reporting.
    pub async fn summary(&self, day: NaiveDate) -> Result<DaySummary, StoreError> {
        let records = self.records_on(day).await?;
        let identities = self.list().await?;
        let enrolled = identities.len();
        let absent = identities
            .into_iter()
            .filter(|identity| !records.iter().any(|r| r.identity_id == identity.id))
            .collect();
        Ok(DaySummary {
            day,
            enrolled,
            present: records.len(),
            records,
            absent,
        })
    }
}

impl EnrollmentStore for AttendanceStore {
    type Error = StoreError;

    async fn list_identities(&self) -> Result<Vec<EnrolledIdentity>, StoreError> {
        self.list().await
    }
}

impl AttendanceLedger for AttendanceStore {
    type Error = StoreError;

    async fn has_recorded_on(&self, identity_id: &str, day: NaiveDate) -> Result<bool, StoreError> {
        let identity_id = identity_id.to_string();
        let day = day.to_string();
        self.conn
            .call(move |conn| {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM attendance WHERE identity_id = ?1 AND day = ?2)",
                    [&identity_id, &day],
                    |row| row.get(0),
                )?;
                Ok(exists)
            })
            .await
            .map_err(StoreError::from)
    }

    async fn record(&self, attendance: NewAttendance) -> Result<AttendanceRecord, StoreError> {
        let record = AttendanceRecord {
            id: uuid::Uuid::new_v4().to_string(),
            identity_id: attendance.identity_id,
            display_name: attendance.display_name,
            marked_at: attendance.marked_at,
            verified: true,
            liveness_score: attendance.liveness_score,
        };

        let row = record.clone();
        let marked_at = to_text(row.marked_at);
        let day = local_day(row.marked_at).to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO attendance (id, identity_id, display_name, marked_at, day, verified, liveness_score)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![
                        row.id,
                        row.identity_id,
                        row.display_name,
                        marked_at,
                        day,
                        row.verified,
                        row.liveness_score as f64
                    ],
                )?;
                Ok(())
            })
            .await?;

        tracing::debug!(record = %record.id, identity = %record.identity_id, "attendance recorded");
        Ok(record)
    }
}

/// One day's attendance.
#[derive(Debug, Clone, Serialize)]
pub struct DaySummary {
    pub day: NaiveDate,
    pub enrolled: usize,
    pub present: usize,
    /// Attendance events on `day`, newest first.
    pub records: Vec<AttendanceRecord>,
    /// Registered identities with no event on `day`, in registration order.
    pub absent: Vec<EnrolledIdentity>,
}

impl DaySummary {
    pub fn is_present(&self, identity_id: &str) -> bool {
        self.records.iter().any(|r| r.identity_id == identity_id)
    }

    /// Keep only records and absentees whose id or name contains `query`.
    ///
    /// Counts stay whole-day totals.
    pub fn filtered(mut self, query: &str) -> Self {
        self.records.retain(|r| matches_search(&r.identity_id, &r.display_name, query));
        self.absent.retain(|i| matches_search(&i.id, &i.display_name, query));
        self
    }
}

/// Case-insensitive substring match on id or display name. An empty or
/// blank query matches everything.
pub fn matches_search(id: &str, display_name: &str, query: &str) -> bool {
    let query = query.trim().to_lowercase();
    query.is_empty()
        || id.to_lowercase().contains(&query)
        || display_name.to_lowercase().contains(&query)
}

// ── Row helpers ───────────────────────────────────────────────────────────────

type IdentityRow = (String, String, Vec<u8>, DateTime<Utc>);

fn identity_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IdentityRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        parse_instant(&row.get::<_, String>(3)?, 3)?,
    ))
}

fn into_identity(
    (id, display_name, blob, enrolled_at): IdentityRow,
) -> Result<EnrolledIdentity, StoreError> {
    Ok(EnrolledIdentity {
        id,
        display_name,
        descriptor: Descriptor::new(bytes_to_descriptor(&blob)?),
        enrolled_at,
    })
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn to_text(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_instant(text: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

// ── Serialization helpers ─────────────────────────────────────────────────────

fn descriptor_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for &v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn bytes_to_descriptor(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(StoreError::InvalidBlob(bytes.len()));
    }

    let mut values = Vec::with_capacity(bytes.len() / 4);
    for chunk in bytes.chunks_exact(4) {
        let arr: [u8; 4] = chunk
            .try_into()
            .map_err(|_| StoreError::InvalidBlob(bytes.len()))?;
        let v = f32::from_le_bytes(arr);
        if !v.is_finite() {
            return Err(StoreError::InvalidDescriptorValue);
        }
        values.push(v);
    }
    Ok(values)
}

fn validate_descriptor(values: &[f32]) -> Result<(), StoreError> {
    if values.is_empty() {
        return Err(StoreError::EmptyDescriptor);
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(StoreError::InvalidDescriptorValue);
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
