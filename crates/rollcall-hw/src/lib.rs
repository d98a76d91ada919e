//! rollcall-hw: camera capture and frame delivery.
//!
//! Provides V4L2-based camera access, grayscale frames, and a background
//! grabber that keeps the most recent frame available to any reader.

pub mod camera;
pub mod frame;
pub mod grabber;

pub use camera::{Camera, CameraError, PixelFormat};
pub use frame::{Frame, FrameError};
pub use grabber::{FrameGrabber, FrameSource};
