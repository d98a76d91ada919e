use crate::store::{Database, StoreError};
use chrono::NaiveDateTime;
use rollcall_core::PersonId;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkOutcome {
    Marked,
    AlreadyMarkedToday,
    /// Seen within the cooldown window; storage was not touched.
    Suppressed,
}

/// Daily attendance with a per-person write cooldown.
pub struct AttendanceLedger {
    cooldown: Duration,
    last_marked: HashMap<PersonId, Instant>,
}

impl AttendanceLedger {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_marked: HashMap::new(),
        }
    }

    /// Mark `person_id` present for `at`'s date unless seen within the cooldown.
    pub fn consider_mark(
        &mut self,
        person_id: PersonId,
        now: Instant,
        at: NaiveDateTime,
        store: &Database,
    ) -> Result<MarkOutcome, StoreError> {
        if let Some(last) = self.last_marked.get(&person_id) {
            if now.saturating_duration_since(*last) <= self.cooldown {
                tracing::debug!(person_id, "attendance suppressed by cooldown");
                return Ok(MarkOutcome::Suppressed);
            }
        }

        let inserted = store.insert_attendance_if_absent(person_id, at)?;
        self.last_marked.insert(person_id, now);
        if inserted {
            tracing::info!(person_id, "attendance marked");
            Ok(MarkOutcome::Marked)
        } else {
            Ok(MarkOutcome::AlreadyMarkedToday)
        }
    }

    pub fn reset(&mut self) {
        self.last_marked.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn store_with_person() -> (Database, PersonId) {
        let mut db = Database::open_in_memory().unwrap();
        let id = db.register_person("Asha", "E100", at(8, 0, 0), &[]).unwrap();
        (db, id)
    }

    #[test]
    fn test_mark_then_suppress_then_already_marked() {
        let (db, id) = store_with_person();
        let mut ledger = AttendanceLedger::new(Duration::from_secs(30));
        let t0 = Instant::now();

        assert_eq!(ledger.consider_mark(id, t0, at(9, 0, 0), &db).unwrap(), MarkOutcome::Marked);
        assert_eq!(
            ledger
                .consider_mark(id, t0 + Duration::from_secs(10), at(9, 0, 10), &db)
                .unwrap(),
            MarkOutcome::Suppressed
        );
        assert_eq!(
            ledger
                .consider_mark(id, t0 + Duration::from_secs(31), at(9, 0, 31), &db)
                .unwrap(),
            MarkOutcome::AlreadyMarkedToday
        );

        let day = at(0, 0, 0).date();
        assert_eq!(db.today_attendance(day).unwrap().len(), 1);
    }

    #[test]
    fn test_cooldown_boundary_is_suppressed() {
        let (db, id) = store_with_person();
        let mut ledger = AttendanceLedger::new(Duration::from_secs(30));
        let t0 = Instant::now();
        ledger.consider_mark(id, t0, at(9, 0, 0), &db).unwrap();
        assert_eq!(
            ledger
                .consider_mark(id, t0 + Duration::from_secs(30), at(9, 0, 30), &db)
                .unwrap(),
            MarkOutcome::Suppressed
        );
    }

    #[test]
    fn test_restart_reports_already_marked() {
        let (db, id) = store_with_person();
        let t0 = Instant::now();
        AttendanceLedger::new(Duration::from_secs(30))
            .consider_mark(id, t0, at(9, 0, 0), &db)
            .unwrap();

        // A fresh ledger has no cooldown entry; the store rejects the duplicate.
        let mut restarted = AttendanceLedger::new(Duration::from_secs(30));
        assert_eq!(
            restarted.consider_mark(id, t0, at(9, 5, 0), &db).unwrap(),
            MarkOutcome::AlreadyMarkedToday
        );
    }

    #[test]
    fn test_storage_fault_propagates_without_cooldown() {
        let (db, id) = store_with_person();
        db.connection().execute_batch("DROP TABLE attendance").unwrap();
        let mut ledger = AttendanceLedger::new(Duration::from_secs(30));
        let t0 = Instant::now();
        assert!(matches!(
            ledger.consider_mark(id, t0, at(9, 0, 0), &db),
            Err(StoreError::Sqlite(_))
        ));
        assert!(ledger.last_marked.is_empty());
    }
}
