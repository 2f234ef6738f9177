//! PIR sensor on a Linux sysfs GPIO line.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::MotionDetector;
use crate::workflow::Signal;

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";

/// Give udev a moment to create the pin directory after export.
const EXPORT_SETTLE: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct GpioSettings {
    /// BCM pin number (GPIO 4 is header pin P1-7).
    pub pin: u32,
    pub poll_interval: Duration,
    pub calibration: Duration,
    pub sysfs_root: PathBuf,
}

pub struct GpioMotionSensor {
    settings: GpioSettings,
    value_path: PathBuf,
}

impl GpioMotionSensor {
    /// Export the pin if needed and configure it as an input.
    pub fn open(settings: GpioSettings) -> Result<Self> {
        let pin_dir = settings.sysfs_root.join(format!("gpio{}", settings.pin));
        if !pin_dir.is_dir() {
            let export = settings.sysfs_root.join("export");
            std::fs::write(&export, settings.pin.to_string())
                .with_context(|| format!("failed to export GPIO {}", settings.pin))?;
            std::thread::sleep(EXPORT_SETTLE);
            if !pin_dir.is_dir() {
                return Err(anyhow!(
                    "GPIO {} did not appear at {} after export",
                    settings.pin,
                    pin_dir.display()
                ));
            }
        }
        std::fs::write(pin_dir.join("direction"), "in")
            .with_context(|| format!("failed to set GPIO {} direction", settings.pin))?;

        let value_path = pin_dir.join("value");
        read_level(&value_path)
            .with_context(|| format!("failed to read GPIO {}", settings.pin))?;
        log::info!(
            "PIR sensor on GPIO {} (poll {}ms, warm-up {}s)",
            settings.pin,
            settings.poll_interval.as_millis(),
            settings.calibration.as_secs()
        );
        Ok(Self {
            settings,
            value_path,
        })
    }

    /// Poll the line until `stop` is set or the signal receiver goes away.
    pub fn spawn(self, signals: Sender<Signal>, stop: Arc<AtomicBool>) -> JoinHandle<()> {
        std::thread::spawn(move || {
            let mut detector = MotionDetector::new(self.settings.calibration);
            let opened_at = Instant::now();
            let mut read_failing = false;

            while !stop.load(Ordering::Relaxed) {
                match read_level(&self.value_path) {
                    Ok(level) => {
                        if read_failing {
                            log::info!("GPIO {} readable again", self.settings.pin);
                            read_failing = false;
                        }
                        for signal in detector.observe(level, opened_at.elapsed()) {
                            if signals.send(Signal::Sensor(signal)).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        if !read_failing {
                            log::warn!("GPIO {} read failed: {}", self.settings.pin, e);
                            read_failing = true;
                        }
                    }
                }
                std::thread::sleep(self.settings.poll_interval);
            }
            log::debug!("GPIO {} poller stopped", self.settings.pin);
        })
    }
}

fn read_level(path: &Path) -> Result<bool> {
    let raw = std::fs::read_to_string(path)?;
    match raw.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(anyhow!("unexpected GPIO value '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::SensorSignal;
    use std::sync::mpsc;

    fn fake_sysfs(pin: u32, level: &str) -> tempfile::TempDir {
        let root = tempfile::tempdir().expect("tempdir");
        let pin_dir = root.path().join(format!("gpio{}", pin));
        std::fs::create_dir_all(&pin_dir).expect("pin dir");
        std::fs::write(pin_dir.join("direction"), "out").expect("direction");
        std::fs::write(pin_dir.join("value"), level).expect("value");
        root
    }

    fn settings(root: &Path) -> GpioSettings {
        GpioSettings {
            pin: 4,
            poll_interval: Duration::from_millis(5),
            calibration: Duration::ZERO,
            sysfs_root: root.to_path_buf(),
        }
    }

    fn next_sensor(rx: &mpsc::Receiver<Signal>) -> Option<SensorSignal> {
        match rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Signal::Sensor(signal)) => Some(signal),
            _ => None,
        }
    }

    #[test]
    fn open_configures_pin_as_input() {
        let root = fake_sysfs(4, "0\n");
        GpioMotionSensor::open(settings(root.path())).expect("open");
        let direction =
            std::fs::read_to_string(root.path().join("gpio4/direction")).expect("direction");
        assert_eq!(direction, "in");
    }

    #[test]
    fn open_fails_when_export_does_not_create_pin() {
        let root = tempfile::tempdir().expect("tempdir");
        let err = GpioMotionSensor::open(settings(root.path())).err().expect("error");
        assert!(err.to_string().contains("GPIO 4"));
    }

    #[test]
    fn read_level_rejects_garbage() {
        let root = fake_sysfs(4, "x\n");
        assert!(read_level(&root.path().join("gpio4/value")).is_err());
    }

    #[test]
    fn poller_emits_calibration_and_edges() {
        let root = fake_sysfs(4, "0\n");
        let sensor = GpioMotionSensor::open(settings(root.path())).expect("open");
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let handle = sensor.spawn(tx, Arc::clone(&stop));

        assert_eq!(next_sensor(&rx), Some(SensorSignal::Calibrated));
        std::fs::write(root.path().join("gpio4/value"), "1\n").expect("raise");
        assert_eq!(next_sensor(&rx), Some(SensorSignal::MotionStart));
        std::fs::write(root.path().join("gpio4/value"), "0\n").expect("lower");
        assert_eq!(next_sensor(&rx), Some(SensorSignal::MotionEnd));

        stop.store(true, Ordering::Relaxed);
        handle.join().expect("join");
    }
}
