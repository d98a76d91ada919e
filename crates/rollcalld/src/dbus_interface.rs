use crate::engine::{EngineError, EngineHandle};
use crate::enrollment::Angle;
use serde::Serialize;
use zbus::interface;

pub const BUS_NAME: &str = "org.rollcall.Rollcall1";
pub const OBJECT_PATH: &str = "/org/rollcall/Rollcall1";

/// D-Bus interface for the rollcall daemon.
///
/// Bus name: org.rollcall.Rollcall1
/// Object path: /org/rollcall/Rollcall1
///
/// Structured replies are JSON strings.
pub struct RollcallService {
    engine: EngineHandle,
}

impl RollcallService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

fn failed(e: EngineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.rollcall.Rollcall1")]
impl RollcallService {
    /// Start a guided enrollment and turn the camera on.
    async fn begin_enrollment(&self, name: &str, employee_id: &str) -> zbus::fdo::Result<()> {
        tracing::info!(name, employee_id, "begin_enrollment requested");
        self.engine
            .begin_enrollment(name, employee_id)
            .await
            .map_err(failed)
    }

    /// Capture one head pose (front, left, right, up, down). Returns samples held.
    async fn capture_angle(&self, angle: &str) -> zbus::fdo::Result<u32> {
        let angle: Angle = angle
            .parse()
            .map_err(|e| failed(EngineError::Enroll(e)))?;
        let count = self.engine.capture_angle(angle).await.map_err(failed)?;
        Ok(count as u32)
    }

    async fn capture_sweep(&self, index: u16) -> zbus::fdo::Result<String> {
        let outcome = self.engine.capture_sweep(index).await.map_err(failed)?;
        to_json(&outcome)
    }

    /// Persist the enrollment. Returns the new person id.
    async fn finalize_enrollment(&self) -> zbus::fdo::Result<i64> {
        let id = self.engine.finalize_enrollment().await.map_err(failed)?;
        tracing::info!(person_id = id, "enrollment finalized over D-Bus");
        Ok(id)
    }

    async fn cancel_enrollment(&self) -> zbus::fdo::Result<bool> {
        self.engine.cancel_enrollment().await.map_err(failed)
    }

    async fn start_attendance(&self) -> zbus::fdo::Result<()> {
        self.engine.start_attendance().await.map_err(failed)
    }

    async fn start_login(&self) -> zbus::fdo::Result<()> {
        self.engine.start_login().await.map_err(failed)
    }

    /// Authenticate the face currently in view.
    async fn check_login(&self) -> zbus::fdo::Result<String> {
        let outcome = self.engine.check_login().await.map_err(failed)?;
        to_json(&outcome)
    }

    /// Authenticate an encoded still image (PNG, JPEG, ...).
    async fn authenticate_image(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(bytes = image.len(), "authenticate_image requested");
        let outcome = self
            .engine
            .authenticate_image(image)
            .await
            .map_err(failed)?;
        to_json(&outcome)
    }

    /// Declare an evacuation. Returns the event id.
    async fn start_evacuation(&self) -> zbus::fdo::Result<String> {
        self.engine.start_evacuation().await.map_err(failed)
    }

    async fn evacuation_stats(&self) -> zbus::fdo::Result<String> {
        let stats = self.engine.evacuation_stats().await.map_err(failed)?;
        to_json(&stats)
    }

    async fn stop_evacuation(&self) -> zbus::fdo::Result<String> {
        let stats = self.engine.stop_evacuation().await.map_err(failed)?;
        to_json(&stats)
    }

    /// Return to idle and release the camera. Returns the mode that was left.
    async fn stop(&self) -> zbus::fdo::Result<String> {
        let previous = self.engine.stop().await.map_err(failed)?;
        to_json(&previous)
    }

    async fn today_attendance(&self) -> zbus::fdo::Result<String> {
        let entries = self.engine.today_attendance().await.map_err(failed)?;
        to_json(&entries)
    }

    async fn list_persons(&self) -> zbus::fdo::Result<String> {
        let persons = self.engine.persons().await.map_err(failed)?;
        to_json(&persons)
    }

    async fn latest_login(&self) -> zbus::fdo::Result<String> {
        let login = self.engine.latest_login().await.map_err(failed)?;
        to_json(&login)
    }

    /// Every recorded login, newest first.
    async fn login_history(&self) -> zbus::fdo::Result<String> {
        let logins = self.engine.login_history().await.map_err(failed)?;
        to_json(&logins)
    }

    /// Boxes and recognition results of the last processed frame.
    async fn last_report(&self) -> zbus::fdo::Result<String> {
        let report = self.engine.last_report().await.map_err(failed)?;
        to_json(&report)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(failed)?;
        to_json(&status)
    }
}
