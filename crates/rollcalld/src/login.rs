use crate::store::{Database, Person, StoreError};
use crate::vision::{FaceObservation, Vision};
use chrono::NaiveDateTime;
use rollcall_core::detector::DetectorError;
use rollcall_hw::{Frame, FrameError};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    #[error("camera produced no frame; try again")]
    CameraNotReady,
    #[error("unreadable image: {0}")]
    Image(#[from] FrameError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LoginOutcome {
    Authorized { person: Person, confidence: f32 },
    /// Faces were visible but none matched an enrolled person well enough.
    Unauthorized,
    NoFace,
}

/// Authenticate against the latest camera frame.
pub fn check_login(
    frame: Option<&Frame>,
    vision: &mut Vision,
    store: &Database,
    min_confidence: f32,
    at: NaiveDateTime,
) -> Result<LoginOutcome, LoginError> {
    let frame = frame.ok_or(LoginError::CameraNotReady)?;
    let observations = vision.analyze(Some(frame))?;
    authorize(&observations, store, min_confidence, at)
}

/// Authenticate against an encoded still image (PNG, JPEG, ...).
pub fn authenticate_image(
    bytes: &[u8],
    vision: &mut Vision,
    store: &Database,
    min_confidence: f32,
    at: NaiveDateTime,
) -> Result<LoginOutcome, LoginError> {
    let frame = Frame::decode(bytes)?;
    let observations = vision.analyze(Some(&frame))?;
    authorize(&observations, store, min_confidence, at)
}

/// Log in the first observation that clears the gate.
pub fn authorize(
    observations: &[FaceObservation],
    store: &Database,
    min_confidence: f32,
    at: NaiveDateTime,
) -> Result<LoginOutcome, LoginError> {
    if observations.is_empty() {
        return Ok(LoginOutcome::NoFace);
    }

    for obs in observations {
        if !obs.identity.passes(min_confidence) {
            continue;
        }
        let Some(person_id) = obs.identity.person_id else {
            continue;
        };
        let Some(person) = store.person(person_id)? else {
            continue;
        };
        store.append_login(&person, at)?;
        tracing::info!(person_id, name = %person.name, confidence = obs.identity.confidence, "login authorized");
        return Ok(LoginOutcome::Authorized {
            person,
            confidence: obs.identity.confidence,
        });
    }

    tracing::info!(faces = observations.len(), "login unauthorized");
    Ok(LoginOutcome::Unauthorized)
}
