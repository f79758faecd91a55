//! rollcall-store — SQLite persistence for students and attendance records.
//!
//! The `attendance` table carries a UNIQUE (student_id, day, subject)
//! constraint; [`Store::mark_present`] inserts with `OR IGNORE`, so a second
//! mark for the same student, day and subject is a no-op even when the daemon
//! and the CLI write concurrently.

use chrono::{DateTime, NaiveDate, Utc};
use rollcall_core::{AttendanceRecord, AttendanceStatus, Descriptor, Student};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

const SCHEMA_VERSION: i64 = 1;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA_V1: &str = "
    CREATE TABLE students (
        id            TEXT PRIMARY KEY,
        name          TEXT NOT NULL,
        course        TEXT NOT NULL,
        descriptor    BLOB,
        model_version TEXT,
        photo         BLOB,
        registered_at TEXT NOT NULL
    );
    CREATE TABLE attendance (
        id           TEXT PRIMARY KEY,
        student_id   TEXT NOT NULL REFERENCES students(id) ON DELETE CASCADE,
        student_name TEXT NOT NULL,
        day          TEXT NOT NULL,
        marked_at    TEXT NOT NULL,
        marked_at_ms INTEGER NOT NULL,
        subject      TEXT NOT NULL,
        subject_name TEXT NOT NULL,
        status       TEXT NOT NULL,
        UNIQUE (student_id, day, subject)
    );
    CREATE INDEX attendance_day_subject ON attendance (day, subject);
";

const DAY_FORMAT: &str = "%Y-%m-%d";

const STUDENT_COLUMNS: &str =
    "id, name, course, descriptor, model_version, photo, registered_at";
const ATTENDANCE_COLUMNS: &str =
    "id, student_id, student_name, day, marked_at, subject, subject_name, status";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("student id already exists: {0}")]
    DuplicateStudent(String),
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Handle to the attendance database.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) the database file and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        tracing::debug!(journal_mode = %mode, "configured connection");

        let store = Self::init(conn)?;
        tracing::info!(path = %path.display(), "opened attendance store");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version < 1 {
            tracing::info!(from = version, to = SCHEMA_VERSION, "migrating schema");
            self.conn.execute_batch(SCHEMA_V1)?;
            self.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        Ok(())
    }

    /// Insert a newly registered student.
    pub fn insert_student(&self, student: &Student) -> Result<()> {
        let (descriptor, model_version) = match &student.descriptor {
            Some(d) => (Some(d.to_le_bytes()), d.model_version.clone()),
            None => (None, None),
        };

        let inserted = self.conn.execute(
            "INSERT INTO students (id, name, course, descriptor, model_version, photo, registered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                student.id,
                student.name,
                student.course,
                descriptor,
                model_version,
                student.photo,
                student.registered_at.to_rfc3339(),
            ],
        );

        match inserted {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::DuplicateStudent(student.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// All students in registration order.
    pub fn students(&self) -> Result<Vec<Student>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {STUDENT_COLUMNS} FROM students ORDER BY rowid"))?;
        let rows = stmt.query_map([], StudentRow::from_row)?;
        rows.map(|r| r?.into_student()).collect()
    }

    /// Students with a descriptor, in registration order, without photos.
    pub fn gallery(&self) -> Result<Vec<Student>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, course, descriptor, model_version, NULL, registered_at
             FROM students WHERE descriptor IS NOT NULL ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], StudentRow::from_row)?;
        rows.map(|r| r?.into_student()).collect()
    }

    pub fn student(&self, id: &str) -> Result<Option<Student>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?1"),
                [id],
                StudentRow::from_row,
            )
            .optional()?;
        row.map(StudentRow::into_student).transpose()
    }

    pub fn student_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM students", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Delete a student together with every attendance record of theirs.
    ///
    /// Returns the removed student, or `None` if the id was unknown.
    pub fn remove_student(&mut self, id: &str) -> Result<Option<Student>> {
        let Some(student) = self.student(id)? else {
            return Ok(None);
        };

        let tx = self.conn.transaction()?;
        let records = tx.execute("DELETE FROM attendance WHERE student_id = ?1", [id])?;
        tx.execute("DELETE FROM students WHERE id = ?1", [id])?;
        tx.commit()?;

        tracing::info!(student = id, records, "removed student");
        Ok(Some(student))
    }

    /// Record a Present mark unless one already exists for the record's
    /// student, day and subject.
    ///
    /// Returns `true` when a new row was written.
    pub fn mark_present(&self, record: &AttendanceRecord) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO attendance
                (id, student_id, student_name, day, marked_at, marked_at_ms, subject, subject_name, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id.to_string(),
                record.student_id,
                record.student_name,
                record.date.format(DAY_FORMAT).to_string(),
                record.marked_at.to_rfc3339(),
                record.marked_at.timestamp_millis(),
                record.subject,
                record.subject_name,
                record.status.as_str(),
            ],
        )?;
        Ok(changed == 1)
    }

    /// Records for `date`, optionally limited to one subject, most recent first.
    pub fn attendance_on(&self, date: NaiveDate, subject: Option<&str>) -> Result<Vec<AttendanceRecord>> {
        let day = date.format(DAY_FORMAT).to_string();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendance
             WHERE day = ?1 AND (?2 IS NULL OR subject = ?2)
             ORDER BY marked_at_ms DESC"
        ))?;
        let rows = stmt.query_map(params![day, subject], AttendanceRow::from_row)?;
        rows.map(|r| r?.into_record()).collect()
    }

    /// Every record, oldest first.
    pub fn attendance(&self) -> Result<Vec<AttendanceRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendance ORDER BY marked_at_ms"
        ))?;
        let rows = stmt.query_map([], AttendanceRow::from_row)?;
        rows.map(|r| r?.into_record()).collect()
    }

    /// Delete every student and attendance record.
    pub fn clear_all(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        let records = tx.execute("DELETE FROM attendance", [])?;
        let students = tx.execute("DELETE FROM students", [])?;
        tx.commit()?;
        tracing::warn!(students, records, "cleared all data");
        Ok(())
    }
}

struct StudentRow {
    id: String,
    name: String,
    course: String,
    descriptor: Option<Vec<u8>>,
    model_version: Option<String>,
    photo: Option<Vec<u8>>,
    registered_at: String,
}

impl StudentRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            course: row.get(2)?,
            descriptor: row.get(3)?,
            model_version: row.get(4)?,
            photo: row.get(5)?,
            registered_at: row.get(6)?,
        })
    }

    fn into_student(self) -> Result<Student> {
        let descriptor = match self.descriptor {
            Some(bytes) => Some(Descriptor::from_le_bytes(&bytes, self.model_version).ok_or_else(|| {
                StoreError::Corrupt(format!("student {}: descriptor length {}", self.id, bytes.len()))
            })?),
            None => None,
        };

        Ok(Student {
            registered_at: parse_timestamp(&self.registered_at)?,
            id: self.id,
            name: self.name,
            course: self.course,
            descriptor,
            photo: self.photo,
        })
    }
}

struct AttendanceRow {
    id: String,
    student_id: String,
    student_name: String,
    day: String,
    marked_at: String,
    subject: String,
    subject_name: String,
    status: String,
}

impl AttendanceRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            student_id: row.get(1)?,
            student_name: row.get(2)?,
            day: row.get(3)?,
            marked_at: row.get(4)?,
            subject: row.get(5)?,
            subject_name: row.get(6)?,
            status: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<AttendanceRecord> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| StoreError::Corrupt(format!("record id {}: {e}", self.id)))?;
        let date = NaiveDate::parse_from_str(&self.day, DAY_FORMAT)
            .map_err(|e| StoreError::Corrupt(format!("record {id}: day {}: {e}", self.day)))?;
        let status: AttendanceStatus = self
            .status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("record {id}: {e}")))?;

        Ok(AttendanceRecord {
            id,
            student_id: self.student_id,
            student_name: self.student_name,
            date,
            marked_at: parse_timestamp(&self.marked_at)?,
            subject: self.subject,
            subject_name: self.subject_name,
            status,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {s}: {e}")))
}
