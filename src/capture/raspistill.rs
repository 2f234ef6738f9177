//! Raspberry Pi camera via the `raspistill` command.
//!
//! Each `start()` launches one photo-mode `raspistill` run writing a JPEG to
//! `<output_dir>/<filename>`. A watcher thread waits for the process and
//! reports the outcome as capture signals.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{CaptureDevice, CaptureError, CaptureSignal};
use crate::workflow::Signal;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug)]
pub struct CameraSettings {
    /// Capture executable, looked up on `PATH` unless it contains a `/`.
    pub command: String,
    pub output_dir: PathBuf,
    pub filename: String,
    /// Delay before the shot is taken, in milliseconds.
    pub timeout_ms: u64,
}

impl CameraSettings {
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.filename)
    }

    fn args(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            self.output_path().display().to_string(),
            "-e".to_string(),
            "jpg".to_string(),
            "-t".to_string(),
            self.timeout_ms.to_string(),
            "-n".to_string(),
        ]
    }
}

pub struct RaspistillCamera {
    settings: CameraSettings,
    signals: Sender<Signal>,
    child: Arc<Mutex<Option<Child>>>,
    watcher: Option<JoinHandle<()>>,
}

impl RaspistillCamera {
    pub fn new(settings: CameraSettings, signals: Sender<Signal>) -> Self {
        Self {
            settings,
            signals,
            child: Arc::new(Mutex::new(None)),
            watcher: None,
        }
    }

    /// Whether the capture command can be found on this machine.
    pub fn probe(settings: &CameraSettings) -> bool {
        command_on_path(&settings.command).is_some()
    }

    fn is_running(&self) -> bool {
        self.child
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }
}

impl CaptureDevice for RaspistillCamera {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.is_running() {
            return Err(CaptureError::Busy);
        }
        if let Some(handle) = self.watcher.take() {
            let _ = handle.join();
        }

        std::fs::create_dir_all(&self.settings.output_dir).map_err(|e| {
            CaptureError::Spawn(format!(
                "cannot create output dir {}: {}",
                self.settings.output_dir.display(),
                e
            ))
        })?;

        // The output name is reused every cycle; a leftover file would pass for a new photo.
        let output_path = self.settings.output_path();
        match std::fs::remove_file(&output_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CaptureError::Spawn(format!(
                    "cannot clear previous capture {}: {}",
                    output_path.display(),
                    e
                )))
            }
        }

        let child = Command::new(&self.settings.command)
            .args(self.settings.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CaptureError::Spawn(format!("{}: {}", self.settings.command, e)))?;
        log::debug!("{} started (pid {})", self.settings.command, child.id());

        {
            let mut guard = self
                .child
                .lock()
                .map_err(|_| CaptureError::Spawn("capture state poisoned".to_string()))?;
            *guard = Some(child);
        }
        let _ = self.signals.send(Signal::Capture(CaptureSignal::Started));

        let slot = Arc::clone(&self.child);
        let signals = self.signals.clone();
        let filename = self.settings.filename.clone();
        self.watcher = Some(std::thread::spawn(move || {
            watch_capture(slot, signals, output_path, filename)
        }));
        Ok(())
    }

    fn stop(&mut self) {
        let Ok(mut guard) = self.child.lock() else {
            return;
        };
        if let Some(mut child) = guard.take() {
            log::debug!("stopping capture (pid {})", child.id());
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for RaspistillCamera {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.watcher.take() {
            let _ = handle.join();
        }
    }
}

fn watch_capture(
    slot: Arc<Mutex<Option<Child>>>,
    signals: Sender<Signal>,
    output_path: PathBuf,
    filename: String,
) {
    let outcome = loop {
        {
            let Ok(mut guard) = slot.lock() else {
                break None;
            };
            let Some(child) = guard.as_mut() else {
                // stop() reaped it
                break None;
            };
            match child.try_wait() {
                Ok(Some(status)) => {
                    guard.take();
                    break Some(Ok(status));
                }
                Ok(None) => {}
                Err(e) => {
                    guard.take();
                    break Some(Err(e));
                }
            }
        }
        std::thread::sleep(WAIT_POLL_INTERVAL);
    };

    match outcome {
        Some(Ok(status)) if status.success() && output_path.is_file() => {
            let _ = signals.send(Signal::Capture(CaptureSignal::Ready { filename }));
        }
        Some(Ok(status)) => {
            let reason = if status.success() {
                format!("{} was not written", output_path.display())
            } else {
                format!("capture exited with {}", status)
            };
            let _ = signals.send(Signal::Capture(CaptureSignal::Failed { reason }));
        }
        Some(Err(e)) => {
            let _ = signals.send(Signal::Capture(CaptureSignal::Failed {
                reason: format!("lost track of capture process: {}", e),
            }));
        }
        None => {}
    }
    let _ = signals.send(Signal::Capture(CaptureSignal::Exited));
}

/// Resolve `command` the way a shell would, returning the executable path.
pub fn command_on_path(command: &str) -> Option<PathBuf> {
    if command.contains('/') {
        let path = PathBuf::from(command);
        return path.is_file().then_some(path);
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(command))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
