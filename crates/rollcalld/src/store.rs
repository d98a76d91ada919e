//! SQLite persistence: persons, face samples, attendance, logins and
//! evacuation events.
//!
//! All writes that touch more than one row run in a transaction. Uniqueness
//! violations are reported as [`StoreError::Duplicate`] (or folded into a
//! `false` return where the caller expects them); every other SQLite failure
//! surfaces as [`StoreError::Sqlite`].

use crate::schema::{SCHEMA, SCHEMA_VERSION};
use chrono::{NaiveDate, NaiveDateTime};
use rollcall_core::{FaceImage, LabeledFace, PersonId};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S";
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} already exists")]
    Duplicate(String),
    #[error("face sample {sample_id} has {len} bytes; expected a 200x200 image")]
    CorruptSample { sample_id: i64, len: usize },
    #[error("evacuation event {0} not found")]
    UnknownEvent(String),
    #[error("storage unavailable: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to create database directory: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Person {
    pub id: PersonId,
    pub name: String,
    pub employee_id: String,
    pub registered_date: String,
}

/// A training sample loaded back from storage, with its owner's name.
#[derive(Debug, Clone)]
pub struct StoredSample {
    pub person_id: PersonId,
    pub name: String,
    pub image: FaceImage,
}

impl From<StoredSample> for LabeledFace {
    fn from(s: StoredSample) -> Self {
        LabeledFace {
            person_id: s.person_id,
            image: s.image,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceEntry {
    pub person: Person,
    pub entry_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoginEntry {
    pub person_id: PersonId,
    pub name: String,
    pub employee_id: String,
    pub login_time: String,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvacuationEvent {
    pub event_id: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub total_building: u32,
    pub total_evacuated: u32,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.migrate()?;
        tracing::info!(path = %path.display(), "database opened");
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn.pragma_update(None, "foreign_keys", true)?;
        let version: i32 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version < SCHEMA_VERSION {
            self.conn.execute_batch(SCHEMA)?;
            tracing::info!(from = version, to = SCHEMA_VERSION, "schema applied");
        }
        Ok(())
    }

    /// Insert a person and all of their samples as one unit.
    ///
    /// A name or employee id that already exists yields
    /// [`StoreError::Duplicate`]; any failure leaves no rows behind.
    pub fn register_person(
        &mut self,
        name: &str,
        employee_id: &str,
        registered: NaiveDateTime,
        samples: &[(String, FaceImage)],
    ) -> Result<PersonId, StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO persons (name, employee_id, registered_date) VALUES (?1, ?2, ?3)",
            params![name, employee_id, registered.format(DATETIME_FORMAT).to_string()],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Duplicate(format!("person with name {name:?} or employee id {employee_id:?}"))
            } else {
                StoreError::Sqlite(e)
            }
        })?;
        let person_id = tx.last_insert_rowid();

        {
            let mut stmt =
                tx.prepare("INSERT INTO face_samples (person_id, image, angle) VALUES (?1, ?2, ?3)")?;
            for (angle, image) in samples {
                stmt.execute(params![person_id, image.pixels(), angle])?;
            }
        }
        tx.commit()?;

        tracing::info!(person_id, name, samples = samples.len(), "person registered");
        Ok(person_id)
    }

    /// Every stored sample joined with its owner's name, in insertion order.
    pub fn load_all_samples(&self) -> Result<Vec<StoredSample>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.person_id, p.name, s.image
             FROM face_samples s JOIN persons p ON p.id = s.person_id
             ORDER BY s.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, PersonId>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?;

        let mut samples = Vec::new();
        for row in rows {
            let (sample_id, person_id, name, blob) = row?;
            let len = blob.len();
            let image =
                FaceImage::from_pixels(blob).ok_or(StoreError::CorruptSample { sample_id, len })?;
            samples.push(StoredSample {
                person_id,
                name,
                image,
            });
        }
        Ok(samples)
    }

    pub fn sample_count(&self, person_id: PersonId) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM face_samples WHERE person_id = ?1",
            [person_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Record attendance for `at`'s date. Returns `false` when the person
    /// already has a record for that date.
    pub fn insert_attendance_if_absent(
        &self,
        person_id: PersonId,
        at: NaiveDateTime,
    ) -> Result<bool, StoreError> {
        let inserted = self.conn.execute(
            "INSERT INTO attendance (person_id, date, entry_time) VALUES (?1, ?2, ?3)",
            params![
                person_id,
                at.date().format(DATE_FORMAT).to_string(),
                at.format(DATETIME_FORMAT).to_string()
            ],
        );
        match inserted {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Attendance for `date`, earliest arrival first.
    pub fn today_attendance(&self, date: NaiveDate) -> Result<Vec<AttendanceEntry>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.name, p.employee_id, p.registered_date, a.entry_time
             FROM attendance a JOIN persons p ON p.id = a.person_id
             WHERE a.date = ?1
             ORDER BY a.entry_time, a.id",
        )?;
        let rows = stmt.query_map([date.format(DATE_FORMAT).to_string()], |row| {
            Ok(AttendanceEntry {
                person: Person {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    employee_id: row.get(2)?,
                    registered_date: row.get(3)?,
                },
                entry_time: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn attendance_ids(&self, date: NaiveDate) -> Result<HashSet<PersonId>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT person_id FROM attendance WHERE date = ?1")?;
        let rows = stmt.query_map([date.format(DATE_FORMAT).to_string()], |row| row.get(0))?;
        Ok(rows.collect::<Result<HashSet<_>, _>>()?)
    }

    pub fn all_persons(&self) -> Result<Vec<Person>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, employee_id, registered_date FROM persons ORDER BY id")?;
        let rows = stmt.query_map([], person_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn person(&self, id: PersonId) -> Result<Option<Person>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, employee_id, registered_date FROM persons WHERE id = ?1",
                [id],
                person_from_row,
            )
            .optional()?)
    }

    /// Append a login log row for `person`.
    pub fn append_login(&self, person: &Person, at: NaiveDateTime) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO login_logs (person_id, name, employee_id, login_time, date)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                person.id,
                person.name,
                person.employee_id,
                at.format(TIME_FORMAT).to_string(),
                at.date().format(DATE_FORMAT).to_string()
            ],
        )?;
        Ok(())
    }

    pub fn latest_login(&self) -> Result<Option<LoginEntry>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT person_id, name, employee_id, login_time, date
                 FROM login_logs ORDER BY id DESC LIMIT 1",
                [],
                login_from_row,
            )
            .optional()?)
    }

    /// Every login row, newest first.
    pub fn login_history(&self) -> Result<Vec<LoginEntry>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT person_id, name, employee_id, login_time, date
             FROM login_logs ORDER BY id DESC",
        )?;
        let rows = stmt.query_map([], login_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    #[cfg(test)]
    pub(crate) fn login_count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM login_logs", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn insert_evacuation_event(
        &self,
        event_id: &str,
        start: NaiveDateTime,
        total_building: u32,
    ) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO evacuation_events (event_id, start_time, total_building, total_evacuated)
                 VALUES (?1, ?2, ?3, 0)",
                params![event_id, start.format(DATETIME_FORMAT).to_string(), total_building],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Duplicate(format!("evacuation event {event_id}"))
                } else {
                    StoreError::Sqlite(e)
                }
            })?;
        Ok(())
    }

    pub fn update_evacuation_count(&self, event_id: &str, count: u32) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE evacuation_events SET total_evacuated = ?2 WHERE event_id = ?1",
            params![event_id, count],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownEvent(event_id.to_string()));
        }
        Ok(())
    }

    pub fn end_evacuation_event(&self, event_id: &str, end: NaiveDateTime) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE evacuation_events SET end_time = ?2 WHERE event_id = ?1",
            params![event_id, end.format(DATETIME_FORMAT).to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownEvent(event_id.to_string()));
        }
        Ok(())
    }

    pub fn evacuation_event(&self, event_id: &str) -> Result<Option<EvacuationEvent>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT event_id, start_time, end_time, total_building, total_evacuated
                 FROM evacuation_events WHERE event_id = ?1",
                [event_id],
                |row| {
                    Ok(EvacuationEvent {
                        event_id: row.get(0)?,
                        start_time: row.get(1)?,
                        end_time: row.get(2)?,
                        total_building: row.get(3)?,
                        total_evacuated: row.get(4)?,
                    })
                },
            )
            .optional()?)
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn login_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LoginEntry> {
    Ok(LoginEntry {
        person_id: row.get(0)?,
        name: row.get(1)?,
        employee_id: row.get(2)?,
        login_time: row.get(3)?,
        date: row.get(4)?,
    })
}

fn person_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Person> {
    Ok(Person {
        id: row.get(0)?,
        name: row.get(1)?,
        employee_id: row.get(2)?,
        registered_date: row.get(3)?,
    })
}

/// UNIQUE or PRIMARY KEY violation. Foreign key and NOT NULL failures are
/// storage faults, not duplicates.
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::SAMPLE_SIZE;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{date}T{time}"), DATETIME_FORMAT).unwrap()
    }

    fn face(value: u8) -> FaceImage {
        FaceImage::from_pixels(vec![value; SAMPLE_SIZE * SAMPLE_SIZE]).unwrap()
    }

    fn five_angles() -> Vec<(String, FaceImage)> {
        ["front", "left", "right", "up", "down"]
            .iter()
            .enumerate()
            .map(|(i, a)| (a.to_string(), face(i as u8 * 10)))
            .collect()
    }

    fn row_count(db: &Database, table: &str) -> i64 {
        db.connection()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_schema_version_set() {
        let db = Database::open_in_memory().unwrap();
        let version: i32 = db
            .connection()
            .query_row("PRAGMA user_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
        // Re-running is a no-op
        db.migrate().unwrap();
    }

    #[test]
    fn test_register_person_with_samples() {
        let mut db = Database::open_in_memory().unwrap();
        let id = db
            .register_person("Asha", "E100", at("2024-03-01", "09:00:00"), &five_angles())
            .unwrap();

        assert_eq!(db.sample_count(id).unwrap(), 5);
        let samples = db.load_all_samples().unwrap();
        assert_eq!(samples.len(), 5);
        assert!(samples.iter().all(|s| s.person_id == id && s.name == "Asha"));
        assert_eq!(samples[1].image.pixel(0, 0), 10);

        let person = db.person(id).unwrap().unwrap();
        assert_eq!(person.employee_id, "E100");
        assert_eq!(person.registered_date, "2024-03-01T09:00:00");
    }

    #[test]
    fn test_duplicate_person_rejected_without_rows() {
        let mut db = Database::open_in_memory().unwrap();
        db.register_person("Asha", "E100", at("2024-03-01", "09:00:00"), &five_angles())
            .unwrap();

        let by_name = db.register_person("Asha", "E200", at("2024-03-01", "09:05:00"), &five_angles());
        assert!(matches!(by_name, Err(StoreError::Duplicate(_))));
        let by_employee = db.register_person("Ravi", "E100", at("2024-03-01", "09:05:00"), &five_angles());
        assert!(matches!(by_employee, Err(StoreError::Duplicate(_))));

        assert_eq!(row_count(&db, "persons"), 1);
        assert_eq!(row_count(&db, "face_samples"), 5);
    }

    #[test]
    fn test_storage_fault_is_not_duplicate_and_rolls_back() {
        let mut db = Database::open_in_memory().unwrap();
        db.connection().execute_batch("DROP TABLE face_samples").unwrap();

        let result = db.register_person("Asha", "E100", at("2024-03-01", "09:00:00"), &five_angles());
        assert!(matches!(result, Err(StoreError::Sqlite(_))));
        assert_eq!(row_count(&db, "persons"), 0);
    }

    #[test]
    fn test_corrupt_sample_reported() {
        let mut db = Database::open_in_memory().unwrap();
        let id = db
            .register_person("Asha", "E100", at("2024-03-01", "09:00:00"), &[])
            .unwrap();
        db.connection()
            .execute(
                "INSERT INTO face_samples (person_id, image, angle) VALUES (?1, ?2, 'front')",
                params![id, vec![0u8; 16]],
            )
            .unwrap();
        assert!(matches!(
            db.load_all_samples(),
            Err(StoreError::CorruptSample { len: 16, .. })
        ));
    }

    #[test]
    fn test_attendance_once_per_day() {
        let mut db = Database::open_in_memory().unwrap();
        let id = db
            .register_person("Asha", "E100", at("2024-03-01", "08:00:00"), &[])
            .unwrap();

        assert!(db.insert_attendance_if_absent(id, at("2024-03-01", "09:00:00")).unwrap());
        assert!(!db.insert_attendance_if_absent(id, at("2024-03-01", "17:00:00")).unwrap());
        assert!(db.insert_attendance_if_absent(id, at("2024-03-02", "09:00:00")).unwrap());

        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let today = db.today_attendance(day).unwrap();
        assert_eq!(today.len(), 1);
        assert_eq!(today[0].entry_time, "2024-03-01T09:00:00");
        assert_eq!(db.attendance_ids(day).unwrap(), HashSet::from([id]));
    }

    #[test]
    fn test_attendance_for_unknown_person_is_storage_fault() {
        let db = Database::open_in_memory().unwrap();
        let result = db.insert_attendance_if_absent(42, at("2024-03-01", "09:00:00"));
        assert!(matches!(result, Err(StoreError::Sqlite(_))));
    }

    #[test]
    fn test_login_log_appends() {
        let mut db = Database::open_in_memory().unwrap();
        let id = db
            .register_person("Asha", "E100", at("2024-03-01", "08:00:00"), &[])
            .unwrap();
        let person = db.person(id).unwrap().unwrap();

        assert!(db.latest_login().unwrap().is_none());
        db.append_login(&person, at("2024-03-01", "09:00:00")).unwrap();
        db.append_login(&person, at("2024-03-01", "09:00:05")).unwrap();

        assert_eq!(db.login_count().unwrap(), 2);
        let latest = db.latest_login().unwrap().unwrap();
        assert_eq!(latest.login_time, "09:00:05");
        assert_eq!(latest.date, "2024-03-01");
        assert_eq!(latest.employee_id, "E100");
    }

    #[test]
    fn test_login_history_newest_first() {
        let mut db = Database::open_in_memory().unwrap();
        let asha = db
            .register_person("Asha", "E100", at("2024-03-01", "08:00:00"), &[])
            .unwrap();
        let ravi = db
            .register_person("Ravi", "E101", at("2024-03-01", "08:00:00"), &[])
            .unwrap();
        assert!(db.login_history().unwrap().is_empty());

        let asha = db.person(asha).unwrap().unwrap();
        let ravi = db.person(ravi).unwrap().unwrap();
        db.append_login(&asha, at("2024-03-01", "09:00:00")).unwrap();
        db.append_login(&ravi, at("2024-03-01", "09:05:00")).unwrap();
        db.append_login(&asha, at("2024-03-02", "08:55:00")).unwrap();

        let history = db.login_history().unwrap();
        let seen: Vec<_> = history
            .iter()
            .map(|e| (e.name.as_str(), e.date.as_str(), e.login_time.as_str()))
            .collect();
        assert_eq!(
            seen,
            vec![
                ("Asha", "2024-03-02", "08:55:00"),
                ("Ravi", "2024-03-01", "09:05:00"),
                ("Asha", "2024-03-01", "09:00:00"),
            ]
        );
    }

    #[test]
    fn test_evacuation_event_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        db.insert_evacuation_event("a1b2c3d4", at("2024-03-01", "11:00:00"), 3)
            .unwrap();
        db.update_evacuation_count("a1b2c3d4", 2).unwrap();

        let event = db.evacuation_event("a1b2c3d4").unwrap().unwrap();
        assert_eq!((event.total_building, event.total_evacuated), (3, 2));
        assert_eq!(event.end_time, None);

        db.end_evacuation_event("a1b2c3d4", at("2024-03-01", "11:20:00"))
            .unwrap();
        let event = db.evacuation_event("a1b2c3d4").unwrap().unwrap();
        assert_eq!(event.end_time.as_deref(), Some("2024-03-01T11:20:00"));

        assert!(matches!(
            db.update_evacuation_count("missing", 1),
            Err(StoreError::UnknownEvent(_))
        ));
    }

    #[test]
    fn test_all_persons_in_registration_order() {
        let mut db = Database::open_in_memory().unwrap();
        db.register_person("Asha", "E100", at("2024-03-01", "08:00:00"), &[])
            .unwrap();
        db.register_person("Ravi", "E101", at("2024-03-01", "08:10:00"), &[])
            .unwrap();
        let names: Vec<_> = db.all_persons().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, ["Asha", "Ravi"]);
    }
}
