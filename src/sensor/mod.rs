//! PIR motion sensing.
//!
//! A PIR output line is high while it sees motion. [`MotionDetector`] turns raw
//! line levels into calibration and motion edge signals; `gpio` feeds it from
//! a sysfs GPIO pin.

pub mod gpio;

use std::time::Duration;

pub use gpio::{GpioMotionSensor, GpioSettings};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SensorSignal {
    /// Warm-up finished; readings are meaningful from here on.
    Calibrated,
    MotionStart,
    MotionEnd,
}

/// Edge detector with a warm-up window.
///
/// PIR modules report garbage while they settle after power-up, so nothing is
/// emitted until `calibration` has elapsed.
#[derive(Debug)]
pub struct MotionDetector {
    calibration: Duration,
    calibrated: bool,
    motion: bool,
}

impl MotionDetector {
    pub fn new(calibration: Duration) -> Self {
        Self {
            calibration,
            calibrated: false,
            motion: false,
        }
    }

    /// Feed one line sample taken `elapsed` after the sensor was opened.
    pub fn observe(&mut self, level: bool, elapsed: Duration) -> Vec<SensorSignal> {
        let mut signals = Vec::new();
        if !self.calibrated {
            if elapsed < self.calibration {
                return signals;
            }
            self.calibrated = true;
            signals.push(SensorSignal::Calibrated);
        }
        if level != self.motion {
            self.motion = level;
            signals.push(if level {
                SensorSignal::MotionStart
            } else {
                SensorSignal::MotionEnd
            });
        }
        signals
    }
}
