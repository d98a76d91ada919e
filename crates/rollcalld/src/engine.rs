//! The engine owns every piece of mutable state: camera source, models,
//! store, enrollment session, attendance ledger and evacuation tally.
//!
//! It runs on a dedicated OS thread. D-Bus handlers reach it through
//! [`EngineHandle`], so each request (and each processed frame) is handled
//! to completion before the next one starts.

use crate::attendance::{AttendanceLedger, MarkOutcome};
use crate::config::Config;
use crate::enrollment::{
    Angle, CapturePolicy, EnrollError, EnrollProgress, EnrollmentSession, SweepOutcome,
};
use crate::evacuation::{EvacuationError, EvacuationStats, EvacuationTally, Sighting};
use crate::login::{self, LoginError, LoginOutcome};
use crate::store::{AttendanceEntry, Database, LoginEntry, Person, StoreError};
use crate::vision::{FaceObservation, Vision};
use chrono::{Local, NaiveDateTime};
use rollcall_core::PersonId;
use rollcall_hw::{CameraError, FrameSource};
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Enroll(#[from] EnrollError),
    #[error(transparent)]
    Evacuation(#[from] EvacuationError),
    #[error(transparent)]
    Login(#[from] LoginError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// What the camera is currently being used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Idle,
    Registration,
    Attendance,
    Login,
    Evacuation,
}

impl Mode {
    /// Process one out of every `n` polled frames; `None` when frames are not processed.
    fn frame_stride(self) -> Option<u64> {
        match self {
            Mode::Attendance | Mode::Login => Some(3),
            Mode::Evacuation => Some(2),
            Mode::Idle | Mode::Registration => None,
        }
    }
}

/// One face in a processed frame, in pixel coordinates.
#[derive(Debug, Clone, Serialize)]
pub struct ReportFace {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub person_id: Option<PersonId>,
    pub name: Option<String>,
    pub confidence: f32,
    pub status: String,
}

impl ReportFace {
    fn new(obs: &FaceObservation, status: String) -> Self {
        let (left, top, right, bottom) = obs.face.edges();
        Self {
            left,
            top,
            right,
            bottom,
            person_id: obs.identity.person_id,
            name: obs.name.clone(),
            confidence: obs.identity.confidence,
            status,
        }
    }
}

/// Boxes, identities and status text of the most recently processed frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    pub mode: Mode,
    pub faces: Vec<ReportFace>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub version: &'static str,
    pub mode: Mode,
    pub camera_running: bool,
    pub trained: bool,
    pub samples: usize,
    pub sweep_attempts: usize,
    pub sweep_required: usize,
    pub enrollment: Option<EnrollProgress>,
    pub evacuation: EvacuationStats,
}

pub struct Engine {
    source: Box<dyn FrameSource + Send>,
    vision: Vision,
    store: Database,
    mode: Mode,
    enrollment: EnrollmentSession,
    ledger: AttendanceLedger,
    tally: EvacuationTally,
    attendance_min_confidence: f32,
    login_min_confidence: f32,
    sweep_attempts: usize,
    frames_polled: u64,
    last_report: Option<FrameReport>,
}

impl Engine {
    pub fn new(
        config: &Config,
        source: Box<dyn FrameSource + Send>,
        vision: Vision,
        store: Database,
    ) -> Self {
        Self {
            source,
            vision,
            store,
            mode: Mode::Idle,
            enrollment: EnrollmentSession::new(CapturePolicy {
                attempts: config.capture_attempts,
                retry: config.capture_retry(),
                sweep_min_samples: config.sweep_min_samples,
            }),
            ledger: AttendanceLedger::new(config.attendance_cooldown()),
            tally: EvacuationTally::new(
                config.evacuation_cooldown(),
                config.evacuation_min_confidence,
            ),
            attendance_min_confidence: config.attendance_min_confidence,
            login_min_confidence: config.login_min_confidence,
            sweep_attempts: config.sweep_attempts,
            frames_polled: 0,
            last_report: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn begin_enrollment(&mut self, name: &str, employee_id: &str) -> Result<(), EngineError> {
        EnrollmentSession::validate(name, employee_id)?;
        self.leave_mode();
        self.enrollment
            .begin(name, employee_id, self.source.as_mut())?;
        self.mode = Mode::Registration;
        Ok(())
    }

    pub fn capture_angle(&mut self, angle: Angle) -> Result<usize, EngineError> {
        Ok(self
            .enrollment
            .capture_angle(angle, self.source.as_ref(), &mut self.vision)?)
    }

    pub fn capture_sweep(&mut self, index: u16) -> Result<SweepOutcome, EngineError> {
        Ok(self
            .enrollment
            .capture_sweep(index, self.source.as_ref(), &mut self.vision)?)
    }

    pub fn finalize_enrollment(&mut self) -> Result<PersonId, EngineError> {
        let result = self.enrollment.finalize(
            &mut self.store,
            &mut self.vision,
            self.source.as_mut(),
            Local::now().naive_local(),
        );
        if self.mode == Mode::Registration && !self.enrollment.is_collecting() {
            self.mode = Mode::Idle;
        }
        Ok(result?)
    }

    pub fn cancel_enrollment(&mut self) -> bool {
        if self.mode != Mode::Registration {
            return false;
        }
        let cancelled = self.enrollment.cancel(self.source.as_mut());
        self.mode = Mode::Idle;
        cancelled
    }

    pub fn start_attendance(&mut self) -> Result<(), EngineError> {
        self.enter_recognition(Mode::Attendance)?;
        self.ledger.reset();
        Ok(())
    }

    pub fn start_login(&mut self) -> Result<(), EngineError> {
        self.enter_recognition(Mode::Login)
    }

    /// Declare an evacuation for everyone marked present today.
    pub fn start_evacuation(&mut self) -> Result<String, EngineError> {
        self.leave_mode();
        self.vision.reload(&self.store)?;

        let now = Local::now().naive_local();
        let total = self.store.attendance_ids(now.date())?.len() as u32;
        let event_id = self.tally.start(total, &self.store, now)?;
        if let Err(e) = self.source.start() {
            if let Err(stop_err) = self.tally.stop(&self.store, now) {
                tracing::warn!(error = %stop_err, "failed to close evacuation after camera error");
            }
            return Err(e.into());
        }
        self.mode = Mode::Evacuation;
        Ok(event_id)
    }

    pub fn evacuation_stats(&self) -> EvacuationStats {
        self.tally.stats()
    }

    pub fn stop_evacuation(&mut self) -> Result<EvacuationStats, EngineError> {
        if self.mode != Mode::Evacuation {
            return Err(EvacuationError::NotActive.into());
        }
        let stats = self.tally.stop(&self.store, Local::now().naive_local());
        self.source.stop();
        self.reset_mode();
        Ok(stats?)
    }

    /// Return to idle from whatever mode is active. Returns the mode that was left.
    pub fn stop(&mut self) -> Mode {
        let previous = self.mode;
        self.leave_mode();
        previous
    }

    /// Authenticate against the current camera frame.
    pub fn check_login(&mut self) -> Result<LoginOutcome, EngineError> {
        let frame = self.source.latest_frame();
        Ok(login::check_login(
            frame.as_ref(),
            &mut self.vision,
            &self.store,
            self.login_min_confidence,
            Local::now().naive_local(),
        )?)
    }

    pub fn authenticate_image(&mut self, image: &[u8]) -> Result<LoginOutcome, EngineError> {
        Ok(login::authenticate_image(
            image,
            &mut self.vision,
            &self.store,
            self.login_min_confidence,
            Local::now().naive_local(),
        )?)
    }

    pub fn today_attendance(&self) -> Result<Vec<AttendanceEntry>, EngineError> {
        Ok(self.store.today_attendance(Local::now().date_naive())?)
    }

    pub fn persons(&self) -> Result<Vec<Person>, EngineError> {
        Ok(self.store.all_persons()?)
    }

    pub fn latest_login(&self) -> Result<Option<LoginEntry>, EngineError> {
        Ok(self.store.latest_login()?)
    }

    pub fn login_history(&self) -> Result<Vec<LoginEntry>, EngineError> {
        Ok(self.store.login_history()?)
    }

    pub fn last_report(&self) -> Option<FrameReport> {
        self.last_report.clone()
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            version: env!("CARGO_PKG_VERSION"),
            mode: self.mode,
            camera_running: self.source.is_running(),
            trained: self.vision.is_trained(),
            samples: self.vision.sample_count(),
            sweep_attempts: self.sweep_attempts,
            sweep_required: self.enrollment.sweep_required(),
            enrollment: self.enrollment.progress(),
            evacuation: self.tally.stats(),
        }
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now(), Local::now().naive_local());
    }

    /// Poll the latest frame and, when due, process it for the current mode.
    pub fn tick_at(&mut self, now: Instant, at: NaiveDateTime) {
        let Some(stride) = self.mode.frame_stride() else {
            return;
        };
        let Some(frame) = self.source.latest_frame() else {
            return;
        };
        let due = self.frames_polled % stride == 0;
        self.frames_polled += 1;
        if !due {
            return;
        }

        let observations = match self.vision.analyze(Some(&frame)) {
            Ok(obs) => obs,
            Err(e) => {
                tracing::warn!(error = %e, "frame analysis failed");
                return;
            }
        };

        let report = match self.mode {
            Mode::Attendance => self.process_attendance(&observations, now, at),
            Mode::Login => self.process_login(&observations),
            Mode::Evacuation => self.process_evacuation(&observations, now, at),
            Mode::Idle | Mode::Registration => return,
        };
        self.last_report = Some(report);
    }

    fn process_attendance(
        &mut self,
        observations: &[FaceObservation],
        now: Instant,
        at: NaiveDateTime,
    ) -> FrameReport {
        let mut faces = Vec::with_capacity(observations.len());
        for obs in observations {
            let status = match recognized(obs, self.attendance_min_confidence) {
                None => "unknown".to_string(),
                Some((person_id, name)) => {
                    match self.ledger.consider_mark(person_id, now, at, &self.store) {
                        Ok(MarkOutcome::Marked) => format!("marked: {name}"),
                        Ok(MarkOutcome::AlreadyMarkedToday) => format!("already marked: {name}"),
                        Ok(MarkOutcome::Suppressed) => format!("recognized: {name}"),
                        Err(e) => {
                            tracing::warn!(error = %e, person_id, "attendance write failed");
                            "storage error".to_string()
                        }
                    }
                }
            };
            faces.push(ReportFace::new(obs, status));
        }

        FrameReport {
            mode: Mode::Attendance,
            status: format!("{} face(s) in view", faces.len()),
            faces,
        }
    }

    /// Annotate only. Login rows are written by explicit login requests.
    fn process_login(&self, observations: &[FaceObservation]) -> FrameReport {
        let mut authorized = None;
        let faces = observations
            .iter()
            .map(|obs| {
                let status = match recognized(obs, self.login_min_confidence) {
                    Some((_, name)) => {
                        authorized.get_or_insert_with(|| name.to_string());
                        format!("recognized: {name}")
                    }
                    None => "unauthorized".to_string(),
                };
                ReportFace::new(obs, status)
            })
            .collect();

        let status = match authorized {
            Some(name) => format!("recognized: {name}"),
            None if observations.is_empty() => "no face".to_string(),
            None => "unauthorized".to_string(),
        };

        FrameReport {
            mode: Mode::Login,
            faces,
            status,
        }
    }

    fn process_evacuation(
        &mut self,
        observations: &[FaceObservation],
        now: Instant,
        at: NaiveDateTime,
    ) -> FrameReport {
        // Once per frame, not per face.
        let present = match self.store.attendance_ids(at.date()) {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load today's attendance");
                return FrameReport {
                    mode: Mode::Evacuation,
                    faces: observations
                        .iter()
                        .map(|obs| ReportFace::new(obs, "storage error".to_string()))
                        .collect(),
                    status: "storage error".to_string(),
                };
            }
        };

        let mut faces = Vec::with_capacity(observations.len());
        for obs in observations {
            let name = obs.name.clone().unwrap_or_else(|| "unknown".to_string());
            let status = match obs.identity.person_id {
                None => "unknown".to_string(),
                Some(person_id) => {
                    let sighting = self.tally.observe(
                        person_id,
                        obs.identity.confidence,
                        &present,
                        now,
                        &self.store,
                    );
                    match sighting {
                        Ok(Sighting::Counted) => format!("evacuated: {name}"),
                        Ok(Sighting::AlreadyCounted | Sighting::Cooldown) => {
                            format!("already counted: {name}")
                        }
                        Ok(Sighting::NotPresentToday) => format!("not checked in today: {name}"),
                        Ok(Sighting::LowConfidence) => "unknown".to_string(),
                        Err(e) => {
                            tracing::warn!(error = %e, person_id, "evacuation update failed");
                            "storage error".to_string()
                        }
                    }
                }
            };
            faces.push(ReportFace::new(obs, status));
        }

        let stats = self.tally.stats();
        FrameReport {
            mode: Mode::Evacuation,
            faces,
            status: format!(
                "evacuated {}/{}, remaining {}",
                stats.evacuated, stats.total, stats.remaining
            ),
        }
    }

    fn enter_recognition(&mut self, mode: Mode) -> Result<(), EngineError> {
        self.leave_mode();
        self.vision.reload(&self.store)?;
        self.source.start()?;
        self.mode = mode;
        tracing::info!(?mode, "mode entered");
        Ok(())
    }

    fn leave_mode(&mut self) {
        match self.mode {
            Mode::Registration => {
                self.enrollment.cancel(self.source.as_mut());
            }
            Mode::Evacuation => {
                if let Err(e) = self.tally.stop(&self.store, Local::now().naive_local()) {
                    tracing::warn!(error = %e, "failed to close evacuation");
                }
            }
            Mode::Idle | Mode::Attendance | Mode::Login => {}
        }
        self.source.stop();
        self.reset_mode();
    }

    fn reset_mode(&mut self) {
        if self.mode != Mode::Idle {
            tracing::info!(mode = ?self.mode, "mode left");
        }
        self.mode = Mode::Idle;
        self.frames_polled = 0;
        self.last_report = None;
    }
}

/// Identity and display name of a face that clears `min_confidence`.
fn recognized(obs: &FaceObservation, min_confidence: f32) -> Option<(PersonId, String)> {
    if !obs.identity.passes(min_confidence) {
        return None;
    }
    let person_id = obs.identity.person_id?;
    let name = obs.name.clone().unwrap_or_else(|| format!("#{person_id}"));
    Some((person_id, name))
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    BeginEnrollment {
        name: String,
        employee_id: String,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    CaptureAngle {
        angle: Angle,
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    CaptureSweep {
        index: u16,
        reply: oneshot::Sender<Result<SweepOutcome, EngineError>>,
    },
    FinalizeEnrollment {
        reply: oneshot::Sender<Result<PersonId, EngineError>>,
    },
    CancelEnrollment {
        reply: oneshot::Sender<bool>,
    },
    StartAttendance {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    StartLogin {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    CheckLogin {
        reply: oneshot::Sender<Result<LoginOutcome, EngineError>>,
    },
    AuthenticateImage {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<LoginOutcome, EngineError>>,
    },
    StartEvacuation {
        reply: oneshot::Sender<Result<String, EngineError>>,
    },
    EvacuationStats {
        reply: oneshot::Sender<EvacuationStats>,
    },
    StopEvacuation {
        reply: oneshot::Sender<Result<EvacuationStats, EngineError>>,
    },
    Stop {
        reply: oneshot::Sender<Mode>,
    },
    TodayAttendance {
        reply: oneshot::Sender<Result<Vec<AttendanceEntry>, EngineError>>,
    },
    Persons {
        reply: oneshot::Sender<Result<Vec<Person>, EngineError>>,
    },
    LatestLogin {
        reply: oneshot::Sender<Result<Option<LoginEntry>, EngineError>>,
    },
    LoginHistory {
        reply: oneshot::Sender<Result<Vec<LoginEntry>, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    LastReport {
        reply: oneshot::Sender<Option<FrameReport>>,
    },
}

fn handle_request(engine: &mut Engine, req: EngineRequest) {
    // A dropped receiver means the caller went away; nothing to report.
    match req {
        EngineRequest::BeginEnrollment {
            name,
            employee_id,
            reply,
        } => {
            let _ = reply.send(engine.begin_enrollment(&name, &employee_id));
        }
        EngineRequest::CaptureAngle { angle, reply } => {
            let _ = reply.send(engine.capture_angle(angle));
        }
        EngineRequest::CaptureSweep { index, reply } => {
            let _ = reply.send(engine.capture_sweep(index));
        }
        EngineRequest::FinalizeEnrollment { reply } => {
            let _ = reply.send(engine.finalize_enrollment());
        }
        EngineRequest::CancelEnrollment { reply } => {
            let _ = reply.send(engine.cancel_enrollment());
        }
        EngineRequest::StartAttendance { reply } => {
            let _ = reply.send(engine.start_attendance());
        }
        EngineRequest::StartLogin { reply } => {
            let _ = reply.send(engine.start_login());
        }
        EngineRequest::CheckLogin { reply } => {
            let _ = reply.send(engine.check_login());
        }
        EngineRequest::AuthenticateImage { image, reply } => {
            let _ = reply.send(engine.authenticate_image(&image));
        }
        EngineRequest::StartEvacuation { reply } => {
            let _ = reply.send(engine.start_evacuation());
        }
        EngineRequest::EvacuationStats { reply } => {
            let _ = reply.send(engine.evacuation_stats());
        }
        EngineRequest::StopEvacuation { reply } => {
            let _ = reply.send(engine.stop_evacuation());
        }
        EngineRequest::Stop { reply } => {
            let _ = reply.send(engine.stop());
        }
        EngineRequest::TodayAttendance { reply } => {
            let _ = reply.send(engine.today_attendance());
        }
        EngineRequest::Persons { reply } => {
            let _ = reply.send(engine.persons());
        }
        EngineRequest::LatestLogin { reply } => {
            let _ = reply.send(engine.latest_login());
        }
        EngineRequest::LoginHistory { reply } => {
            let _ = reply.send(engine.login_history());
        }
        EngineRequest::Status { reply } => {
            let _ = reply.send(engine.status());
        }
        EngineRequest::LastReport { reply } => {
            let _ = reply.send(engine.last_report());
        }
    }
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn begin_enrollment(&self, name: &str, employee_id: &str) -> Result<(), EngineError> {
        let (name, employee_id) = (name.to_string(), employee_id.to_string());
        self.request(|reply| EngineRequest::BeginEnrollment {
            name,
            employee_id,
            reply,
        })
        .await?
    }

    pub async fn capture_angle(&self, angle: Angle) -> Result<usize, EngineError> {
        self.request(|reply| EngineRequest::CaptureAngle { angle, reply })
            .await?
    }

    pub async fn capture_sweep(&self, index: u16) -> Result<SweepOutcome, EngineError> {
        self.request(|reply| EngineRequest::CaptureSweep { index, reply })
            .await?
    }

    pub async fn finalize_enrollment(&self) -> Result<PersonId, EngineError> {
        self.request(|reply| EngineRequest::FinalizeEnrollment { reply })
            .await?
    }

    pub async fn cancel_enrollment(&self) -> Result<bool, EngineError> {
        self.request(|reply| EngineRequest::CancelEnrollment { reply })
            .await
    }

    pub async fn start_attendance(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::StartAttendance { reply })
            .await?
    }

    pub async fn start_login(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::StartLogin { reply })
            .await?
    }

    pub async fn check_login(&self) -> Result<LoginOutcome, EngineError> {
        self.request(|reply| EngineRequest::CheckLogin { reply })
            .await?
    }

    pub async fn authenticate_image(&self, image: Vec<u8>) -> Result<LoginOutcome, EngineError> {
        self.request(|reply| EngineRequest::AuthenticateImage { image, reply })
            .await?
    }

    pub async fn start_evacuation(&self) -> Result<String, EngineError> {
        self.request(|reply| EngineRequest::StartEvacuation { reply })
            .await?
    }

    pub async fn evacuation_stats(&self) -> Result<EvacuationStats, EngineError> {
        self.request(|reply| EngineRequest::EvacuationStats { reply })
            .await
    }

    pub async fn stop_evacuation(&self) -> Result<EvacuationStats, EngineError> {
        self.request(|reply| EngineRequest::StopEvacuation { reply })
            .await?
    }

    pub async fn stop(&self) -> Result<Mode, EngineError> {
        self.request(|reply| EngineRequest::Stop { reply }).await
    }

    pub async fn today_attendance(&self) -> Result<Vec<AttendanceEntry>, EngineError> {
        self.request(|reply| EngineRequest::TodayAttendance { reply })
            .await?
    }

    pub async fn persons(&self) -> Result<Vec<Person>, EngineError> {
        self.request(|reply| EngineRequest::Persons { reply })
            .await?
    }

    pub async fn latest_login(&self) -> Result<Option<LoginEntry>, EngineError> {
        self.request(|reply| EngineRequest::LatestLogin { reply })
            .await?
    }

    pub async fn login_history(&self) -> Result<Vec<LoginEntry>, EngineError> {
        self.request(|reply| EngineRequest::LoginHistory { reply })
            .await?
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }

    pub async fn last_report(&self) -> Result<Option<FrameReport>, EngineError> {
        self.request(|reply| EngineRequest::LastReport { reply })
            .await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// While idle or enrolling the thread blocks on the request channel. In the
/// recognition modes it drains pending requests, processes one frame, then
/// sleeps for `poll_interval`.
pub fn spawn_engine(mut engine: Engine, poll_interval: Duration) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            'run: loop {
                if engine.mode().frame_stride().is_none() {
                    match rx.blocking_recv() {
                        Some(req) => handle_request(&mut engine, req),
                        None => break 'run,
                    }
                    continue;
                }

                loop {
                    match rx.try_recv() {
                        Ok(req) => handle_request(&mut engine, req),
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => break 'run,
                    }
                }
                engine.tick();
                std::thread::sleep(poll_interval);
            }
            engine.stop();
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
