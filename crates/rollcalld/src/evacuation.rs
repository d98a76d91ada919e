//! Evacuation head count.
//!
//! An event snapshots how many people were marked present today, then counts
//! each of them once as they are recognized at the assembly point.

use crate::store::{Database, StoreError};
use chrono::NaiveDateTime;
use rollcall_core::PersonId;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum EvacuationError {
    #[error("nobody is marked present today; nothing to evacuate")]
    NothingToEvacuate,
    #[error("no evacuation in progress")]
    NotActive,
    #[error("evacuation {0} is already in progress")]
    AlreadyActive(String),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Inactive,
    Active,
    Concluded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvacuationStats {
    pub event_id: Option<String>,
    pub phase: Phase,
    pub total: u32,
    pub evacuated: u32,
    pub remaining: u32,
}

/// What an observation did to the tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sighting {
    Counted,
    AlreadyCounted,
    LowConfidence,
    NotPresentToday,
    Cooldown,
}

pub struct EvacuationTally {
    cooldown: Duration,
    min_confidence: f32,
    phase: Phase,
    event_id: Option<String>,
    total_building: u32,
    evacuated: HashSet<PersonId>,
    last_seen: HashMap<PersonId, Instant>,
}

impl EvacuationTally {
    pub fn new(cooldown: Duration, min_confidence: f32) -> Self {
        Self {
            cooldown,
            min_confidence,
            phase: Phase::Inactive,
            event_id: None,
            total_building: 0,
            evacuated: HashSet::new(),
            last_seen: HashMap::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Open a new event for `total_building` people. Returns the event id.
    pub fn start(
        &mut self,
        total_building: u32,
        store: &Database,
        at: NaiveDateTime,
    ) -> Result<String, EvacuationError> {
        if self.phase == Phase::Active {
            return Err(EvacuationError::AlreadyActive(
                self.event_id.clone().unwrap_or_default(),
            ));
        }
        if total_building == 0 {
            return Err(EvacuationError::NothingToEvacuate);
        }

        let event_id = new_event_id();
        store.insert_evacuation_event(&event_id, at, total_building)?;

        self.phase = Phase::Active;
        self.event_id = Some(event_id.clone());
        self.total_building = total_building;
        self.evacuated.clear();
        self.last_seen.clear();
        tracing::info!(event_id = %event_id, total_building, "evacuation started");
        Ok(event_id)
    }

    /// Count a recognized person, if they were present today and not seen recently.
    pub fn observe(
        &mut self,
        person_id: PersonId,
        confidence: f32,
        present_today: &HashSet<PersonId>,
        now: Instant,
        store: &Database,
    ) -> Result<Sighting, EvacuationError> {
        if self.phase != Phase::Active {
            return Err(EvacuationError::NotActive);
        }
        if confidence <= self.min_confidence {
            return Ok(Sighting::LowConfidence);
        }
        if !present_today.contains(&person_id) {
            return Ok(Sighting::NotPresentToday);
        }
        if let Some(last) = self.last_seen.get(&person_id) {
            if now.saturating_duration_since(*last) <= self.cooldown {
                return Ok(Sighting::Cooldown);
            }
        }

        if self.evacuated.contains(&person_id) {
            self.last_seen.insert(person_id, now);
            return Ok(Sighting::AlreadyCounted);
        }

        // Persist first so a failed write leaves the tally untouched
        let event_id = self.event_id.as_deref().unwrap_or_default();
        store.update_evacuation_count(event_id, self.evacuated_count() + 1)?;
        self.evacuated.insert(person_id);
        self.last_seen.insert(person_id, now);

        let remaining = self.remaining();
        tracing::info!(event_id, person_id, remaining, "person evacuated");
        if remaining == 0 {
            tracing::info!(event_id, "all accounted for");
        }
        Ok(Sighting::Counted)
    }

    pub fn stats(&self) -> EvacuationStats {
        EvacuationStats {
            event_id: self.event_id.clone(),
            phase: self.phase,
            total: self.total_building,
            evacuated: self.evacuated_count(),
            remaining: self.remaining(),
        }
    }

    /// End the active event and record its end time.
    ///
    /// The tally is concluded even when the end time cannot be written; the
    /// storage error is still returned.
    pub fn stop(&mut self, store: &Database, at: NaiveDateTime) -> Result<EvacuationStats, EvacuationError> {
        if self.phase != Phase::Active {
            return Err(EvacuationError::NotActive);
        }
        self.phase = Phase::Concluded;
        let event_id = self.event_id.as_deref().unwrap_or_default();
        store.end_evacuation_event(event_id, at)?;

        let stats = self.stats();
        tracing::info!(
            event_id,
            evacuated = stats.evacuated,
            remaining = stats.remaining,
            "evacuation concluded"
        );
        Ok(stats)
    }

    fn evacuated_count(&self) -> u32 {
        self.evacuated.len() as u32
    }

    fn remaining(&self) -> u32 {
        self.total_building.saturating_sub(self.evacuated_count())
    }
}

/// First 8 hex characters of a random v4 UUID.
fn new_event_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
