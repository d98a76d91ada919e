//! Latest-frame delivery.
//!
//! [`FrameGrabber`] owns the camera on a background thread that keeps
//! replacing a single shared slot with the newest frame. Readers get a copy
//! of whatever is in the slot and never wait on the camera; a slow reader
//! sees a stale frame, never a blocked one.

use crate::camera::{Camera, CameraError};
use crate::frame::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Supplies the most recent camera frame on demand.
pub trait FrameSource {
    /// Begin acquisition. Calling it while already running is a no-op.
    fn start(&mut self) -> Result<(), CameraError>;

    /// Stop acquisition and release the device. Later reads return `None`.
    fn stop(&mut self);

    /// Copy of the latest frame, or `None` if no frame has arrived yet.
    fn latest_frame(&self) -> Option<Frame>;

    fn is_running(&self) -> bool;
}

type FrameSlot = Arc<Mutex<Option<Frame>>>;

/// Background V4L2 acquisition into a shared latest-frame slot.
pub struct FrameGrabber {
    device_path: String,
    width: u32,
    height: u32,
    poll_interval: Duration,
    slot: FrameSlot,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FrameGrabber {
    pub fn new(device_path: &str, width: u32, height: u32, poll_interval: Duration) -> Self {
        Self {
            device_path: device_path.to_string(),
            width,
            height,
            poll_interval,
            slot: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

impl FrameSource for FrameGrabber {
    fn start(&mut self) -> Result<(), CameraError> {
        if self.handle.is_some() {
            return Ok(());
        }

        self.running.store(true, Ordering::SeqCst);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CameraError>>();
        let device_path = self.device_path.clone();
        let (width, height) = (self.width, self.height);
        let poll_interval = self.poll_interval;
        let slot = Arc::clone(&self.slot);
        let running = Arc::clone(&self.running);

        let spawned = std::thread::Builder::new()
            .name("rollcall-grabber".into())
            .spawn(move || {
                // The camera is opened and dropped on this thread; dropping it releases the device.
                let camera = match Camera::open(&device_path, width, height) {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let mut stream = match camera.stream(poll_interval) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                tracing::info!(device = %device_path, "frame acquisition started");

                // Dequeue waits at most one poll interval, so `running` is rechecked that often.
                while running.load(Ordering::SeqCst) {
                    match stream.next_frame() {
                        Ok(frame) => store_frame(&slot, frame),
                        Err(CameraError::Timeout(_)) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "frame grab failed");
                            std::thread::sleep(poll_interval);
                        }
                    }
                }
                tracing::info!(device = %device_path, "frame acquisition stopped");
            });

        let handle = match spawned {
            Ok(h) => h,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(CameraError::CaptureFailed(format!("failed to spawn grabber: {e}")));
            }
        };

        let ready = ready_rx.recv().unwrap_or_else(|_| {
            Err(CameraError::CaptureFailed("grabber exited during startup".into()))
        });
        if let Err(e) = ready {
            self.running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            return Err(e);
        }

        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!(device = %self.device_path, "grabber thread panicked");
            }
        }
        clear_slot(&self.slot);
    }

    fn latest_frame(&self) -> Option<Frame> {
        read_slot(&self.slot)
    }

    fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for FrameGrabber {
    fn drop(&mut self) {
        self.stop();
    }
}

fn store_frame(slot: &FrameSlot, frame: Frame) {
    let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = Some(frame);
}

fn read_slot(slot: &FrameSlot) -> Option<Frame> {
    let guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.clone()
}

fn clear_slot(slot: &FrameSlot) {
    let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = None;
}
