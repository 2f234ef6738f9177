//! Still-image capture.
//!
//! A capture device is started once per detection cycle and reports back
//! asynchronously through [`CaptureSignal`]s on the bridge signal channel.
//! Devices write the image to local disk; the workflow reads it from there.

pub mod raspistill;

pub use raspistill::{command_on_path, CameraSettings, RaspistillCamera};

/// Lifecycle notifications from a capture device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureSignal {
    /// The device began taking a photo.
    Started,
    /// A photo was written as `filename` under the device's output directory.
    Ready { filename: String },
    /// The capture finished without producing an image.
    Failed { reason: String },
    /// The capture process is gone.
    Exited,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureError {
    /// A capture is already running.
    Busy,
    /// The capture process could not be launched.
    Spawn(String),
    /// The device reported a failed capture.
    Failed(String),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Busy => write!(f, "capture already in progress"),
            Self::Spawn(msg) => write!(f, "failed to start capture: {}", msg),
            Self::Failed(msg) => write!(f, "capture failed: {}", msg),
        }
    }
}

impl std::error::Error for CaptureError {}

pub trait CaptureDevice: Send {
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Abort any running capture. Safe to call when nothing is running.
    fn stop(&mut self);
}
