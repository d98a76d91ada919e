//! SQL schema for the attendance store.
//!
//! Applied once per database, gated on `PRAGMA user_version`.

/// Version written by [`SCHEMA`].
pub const SCHEMA_VERSION: i32 = 1;

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS persons (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    name             TEXT NOT NULL UNIQUE,
    employee_id      TEXT NOT NULL UNIQUE,
    registered_date  TEXT NOT NULL
);

-- Raw 200x200 8-bit grayscale pixels.
CREATE TABLE IF NOT EXISTS face_samples (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    person_id  INTEGER NOT NULL REFERENCES persons(id),
    image      BLOB NOT NULL,
    angle      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    person_id   INTEGER NOT NULL REFERENCES persons(id),
    date        TEXT NOT NULL,   -- YYYY-MM-DD, local
    entry_time  TEXT NOT NULL,
    UNIQUE (person_id, date)
);

-- Append-only; one row per successful login recognition.
CREATE TABLE IF NOT EXISTS login_logs (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    person_id    INTEGER NOT NULL REFERENCES persons(id),
    name         TEXT NOT NULL,
    employee_id  TEXT NOT NULL,
    login_time   TEXT NOT NULL,  -- HH:MM:SS, local
    date         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS evacuation_events (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id         TEXT NOT NULL UNIQUE,
    start_time       TEXT NOT NULL,
    end_time         TEXT,
    total_building   INTEGER NOT NULL,
    total_evacuated  INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS face_samples_person_idx ON face_samples(person_id);
CREATE INDEX IF NOT EXISTS attendance_date_idx      ON attendance(date);

PRAGMA user_version = 1;
";
