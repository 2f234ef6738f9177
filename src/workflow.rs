//! Detection cycle state machine.
//!
//! One cycle runs `Idle -> Capturing -> Uploading -> Idle`, driven entirely by
//! [`Signal`]s. Only one cycle is ever in flight: motion seen while a capture
//! or upload is pending is dropped, not queued. Without a camera a cycle is a
//! single bare-motion publish.

use chrono::{DateTime, Utc};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::capture::{CaptureDevice, CaptureSignal};
use crate::error::CycleError;
use crate::event::{format_detection_timestamp, CaptureArtifact, Clock, DetectionEvent, StorageRef};
use crate::sensor::SensorSignal;
use crate::storage::{
    public_url, ObjectAcl, ObjectStore, PutObjectOutput, PutObjectRequest, StoreError,
    IMAGE_CONTENT_TYPE,
};
use crate::transport::{NotificationChannel, DETECTION_TOPIC};

/// Everything the bridge reacts to, delivered over one channel.
#[derive(Debug)]
pub enum Signal {
    Sensor(SensorSignal),
    Capture(CaptureSignal),
    UploadFinished(Result<PutObjectOutput, StoreError>),
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct WorkflowSettings {
    pub bucket: String,
    /// Host used to build public image URLs.
    pub store_host: String,
    /// Directory the camera writes captures into.
    pub capture_dir: PathBuf,
    /// Ignore motion until the sensor reports it is calibrated.
    pub require_calibration: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Capturing,
    Uploading,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkflowStats {
    pub motions_handled: u64,
    pub published: u64,
    pub rejected_overlapping: u64,
    pub suppressed_uncalibrated: u64,
    pub aborted: u64,
}

#[derive(Debug)]
struct PendingUpload {
    bucket: String,
    key: String,
    captured_at: DateTime<Utc>,
}

#[derive(Debug)]
enum CycleState {
    Idle,
    Capturing,
    Uploading(PendingUpload),
}

pub struct DetectionWorkflow {
    settings: WorkflowSettings,
    camera: Option<Box<dyn CaptureDevice>>,
    store: Arc<dyn ObjectStore>,
    channel: Box<dyn NotificationChannel>,
    clock: Arc<dyn Clock>,
    completions: Sender<Signal>,
    state: CycleState,
    calibrated: bool,
    stats: WorkflowStats,
    upload_worker: Option<JoinHandle<()>>,
}

impl DetectionWorkflow {
    /// `completions` must feed the same channel the workflow is driven from;
    /// upload results come back through it.
    pub fn new(
        settings: WorkflowSettings,
        camera: Option<Box<dyn CaptureDevice>>,
        store: Arc<dyn ObjectStore>,
        channel: Box<dyn NotificationChannel>,
        clock: Arc<dyn Clock>,
        completions: Sender<Signal>,
    ) -> Self {
        Self {
            settings,
            camera,
            store,
            channel,
            clock,
            completions,
            state: CycleState::Idle,
            calibrated: false,
            stats: WorkflowStats::default(),
            upload_worker: None,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        match self.state {
            CycleState::Idle => CyclePhase::Idle,
            CycleState::Capturing => CyclePhase::Capturing,
            CycleState::Uploading(_) => CyclePhase::Uploading,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, CycleState::Idle)
    }

    pub fn has_camera(&self) -> bool {
        self.camera.is_some()
    }

    pub fn stats(&self) -> WorkflowStats {
        self.stats
    }

    /// Advance the cycle by one signal. On error the cycle is already back to
    /// `Idle`; whether to carry on is the caller's decision.
    pub fn handle(&mut self, signal: Signal) -> Result<(), CycleError> {
        match signal {
            Signal::Sensor(SensorSignal::Calibrated) => {
                log::info!("Motion detector calibrated and ready");
                self.calibrated = true;
                Ok(())
            }
            Signal::Sensor(SensorSignal::MotionStart) => self.on_motion_start(),
            Signal::Sensor(SensorSignal::MotionEnd) => {
                log::info!("Motion has stopped");
                Ok(())
            }
            Signal::Capture(capture) => self.on_capture(capture),
            Signal::UploadFinished(result) => self.on_upload_finished(result),
            Signal::Shutdown => Ok(()),
        }
    }

    fn on_motion_start(&mut self) -> Result<(), CycleError> {
        if self.settings.require_calibration && !self.calibrated {
            self.stats.suppressed_uncalibrated += 1;
            log::warn!("Motion ignored: sensor not calibrated yet");
            return Ok(());
        }
        if !self.is_idle() {
            self.stats.rejected_overlapping += 1;
            log::warn!("Motion ignored: detection already in progress ({:?})", self.phase());
            return Ok(());
        }

        self.stats.motions_handled += 1;
        let now = self.clock.now();
        let timestamp = format_detection_timestamp(now);
        log::info!("Motion Alert: something was spotted at: {}", timestamp);

        let Some(camera) = self.camera.as_mut() else {
            return self.publish(&DetectionEvent::motion_only(timestamp));
        };
        match camera.start() {
            Ok(()) => {
                self.state = CycleState::Capturing;
                Ok(())
            }
            Err(e) => {
                self.stats.aborted += 1;
                Err(CycleError::Capture(e))
            }
        }
    }

    fn on_capture(&mut self, signal: CaptureSignal) -> Result<(), CycleError> {
        match signal {
            CaptureSignal::Started => {
                log::info!("Camera is taking a photo!");
                Ok(())
            }
            CaptureSignal::Exited => {
                log::debug!("Camera is exiting");
                if matches!(self.state, CycleState::Capturing) {
                    log::warn!("Camera exited without producing an image");
                    self.abort();
                }
                Ok(())
            }
            CaptureSignal::Failed { reason } => {
                self.stop_camera();
                if matches!(self.state, CycleState::Capturing) {
                    self.abort();
                }
                Err(CycleError::Capture(crate::capture::CaptureError::Failed(
                    reason,
                )))
            }
            CaptureSignal::Ready { filename } => self.on_capture_ready(filename),
        }
    }

    fn on_capture_ready(&mut self, filename: String) -> Result<(), CycleError> {
        // One photo per cycle.
        self.stop_camera();
        if !matches!(self.state, CycleState::Capturing) {
            log::warn!("Ignoring capture {} outside of a detection cycle", filename);
            return Ok(());
        }
        log::info!("Image saved with filename: {}", filename);

        let artifact = match CaptureArtifact::read(&self.settings.capture_dir, &filename) {
            Ok(artifact) => artifact,
            Err(source) => {
                self.abort();
                return Err(CycleError::FileRead {
                    path: self.settings.capture_dir.join(&filename),
                    source,
                });
            }
        };

        let captured_at = self.clock.now();
        let key = artifact.upload_key(captured_at.timestamp_millis()).into_string();
        let request = PutObjectRequest {
            bucket: self.settings.bucket.clone(),
            key: key.clone(),
            body: artifact.bytes,
            content_type: IMAGE_CONTENT_TYPE.to_string(),
            acl: ObjectAcl::PublicRead,
        };
        log::debug!(
            "Uploading {} ({} bytes) as {}/{}",
            artifact.local_path.display(),
            request.body.len(),
            request.bucket,
            request.key
        );

        self.state = CycleState::Uploading(PendingUpload {
            bucket: request.bucket.clone(),
            key,
            captured_at,
        });
        self.dispatch_upload(request);
        Ok(())
    }

    fn dispatch_upload(&mut self, request: PutObjectRequest) {
        if let Some(previous) = self.upload_worker.take() {
            let _ = previous.join();
        }
        let store = Arc::clone(&self.store);
        let completions = self.completions.clone();
        self.upload_worker = Some(std::thread::spawn(move || {
            // The cycle stays in Uploading until this send happens, panic or not.
            let result = catch_unwind(AssertUnwindSafe(|| store.put_object(&request)))
                .unwrap_or_else(|_| {
                    log::error!("Upload of {}/{} panicked", request.bucket, request.key);
                    Err(StoreError::Interrupted)
                });
            let _ = completions.send(Signal::UploadFinished(result));
        }));
    }

    fn on_upload_finished(
        &mut self,
        result: Result<PutObjectOutput, StoreError>,
    ) -> Result<(), CycleError> {
        let pending = match std::mem::replace(&mut self.state, CycleState::Idle) {
            CycleState::Uploading(pending) => pending,
            other => {
                self.state = other;
                log::warn!("Ignoring upload result outside of a detection cycle");
                return Ok(());
            }
        };

        let output = result.map_err(|e| {
            self.stats.aborted += 1;
            CycleError::Upload(e)
        })?;
        log::info!(
            "Image successfully uploaded (etag: {})",
            output.etag.as_deref().unwrap_or("none")
        );

        let image_url = public_url(&self.settings.store_host, &pending.bucket, &pending.key);
        log::info!("{}", image_url);
        let event = DetectionEvent::with_image(
            format_detection_timestamp(pending.captured_at),
            image_url,
            StorageRef {
                bucket: pending.bucket,
                key: pending.key,
            },
        );
        self.publish(&event)
    }

    fn publish(&mut self, event: &DetectionEvent) -> Result<(), CycleError> {
        let payload = event.to_json().map_err(CycleError::Encode)?;
        self.channel
            .publish(DETECTION_TOPIC, payload.as_bytes())
            .map_err(CycleError::Publish)?;
        self.stats.published += 1;
        log::info!("Detection published to {}", DETECTION_TOPIC);
        Ok(())
    }

    fn stop_camera(&mut self) {
        if let Some(camera) = self.camera.as_mut() {
            camera.stop();
        }
    }

    fn abort(&mut self) {
        self.state = CycleState::Idle;
        self.stats.aborted += 1;
    }
}

impl Drop for DetectionWorkflow {
    fn drop(&mut self) {
        if let Some(worker) = self.upload_worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureError;
    use crate::transport::ChannelError;
    use chrono::TimeZone;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[derive(Clone, Default)]
    struct RecordingChannel(Arc<Mutex<Vec<(String, String)>>>);

    impl NotificationChannel for RecordingChannel {
        fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), ChannelError> {
            self.0.lock().unwrap().push((
                topic.to_string(),
                String::from_utf8(payload.to_vec()).unwrap(),
            ));
            Ok(())
        }
    }

    struct OkStore;

    impl ObjectStore for OkStore {
        fn put_object(&self, _: &PutObjectRequest) -> Result<PutObjectOutput, StoreError> {
            Ok(PutObjectOutput::default())
        }
    }

    struct PanickingStore;

    impl ObjectStore for PanickingStore {
        fn put_object(&self, _: &PutObjectRequest) -> Result<PutObjectOutput, StoreError> {
            panic!("signer blew up");
        }
    }

    struct FullChannel;

    impl NotificationChannel for FullChannel {
        fn publish(&self, _: &str, _: &[u8]) -> Result<(), ChannelError> {
            Err(ChannelError::QueueFull)
        }
    }

    #[derive(Clone, Default)]
    struct CountingCamera {
        starts: Arc<Mutex<u32>>,
        stops: Arc<Mutex<u32>>,
        refuse: bool,
    }

    impl CaptureDevice for CountingCamera {
        fn start(&mut self) -> Result<(), CaptureError> {
            if self.refuse {
                return Err(CaptureError::Spawn("no camera".to_string()));
            }
            *self.starts.lock().unwrap() += 1;
            Ok(())
        }

        fn stop(&mut self) {
            *self.stops.lock().unwrap() += 1;
        }
    }

    fn settings(require_calibration: bool) -> WorkflowSettings {
        WorkflowSettings {
            bucket: "kitty-detections".to_string(),
            store_host: "s3.amazonaws.com".to_string(),
            capture_dir: PathBuf::from("./does-not-exist"),
            require_calibration,
        }
    }

    fn workflow(
        camera: Option<CountingCamera>,
        channel: RecordingChannel,
        require_calibration: bool,
    ) -> (DetectionWorkflow, mpsc::Receiver<Signal>) {
        let (tx, rx) = mpsc::channel();
        let clock = FixedClock(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        let workflow = DetectionWorkflow::new(
            settings(require_calibration),
            camera.map(|c| Box::new(c) as Box<dyn CaptureDevice>),
            Arc::new(OkStore),
            Box::new(channel),
            Arc::new(clock),
            tx,
        );
        (workflow, rx)
    }

    #[test]
    fn motion_without_camera_publishes_bare_event() {
        let channel = RecordingChannel::default();
        let (mut wf, _rx) = workflow(None, channel.clone(), false);
        wf.handle(Signal::Sensor(SensorSignal::MotionStart))
            .expect("handle");

        let published = channel.0.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "kitty-detection");
        assert_eq!(
            published[0].1,
            r#"{"motion":true,"timestamp":"December 31, 2024 7:00 PM"}"#
        );
        assert!(wf.is_idle());
    }

    #[test]
    fn motion_before_calibration_is_suppressed() {
        let channel = RecordingChannel::default();
        let (mut wf, _rx) = workflow(None, channel.clone(), true);
        wf.handle(Signal::Sensor(SensorSignal::MotionStart))
            .expect("handle");
        assert!(channel.0.lock().unwrap().is_empty());
        assert_eq!(wf.stats().suppressed_uncalibrated, 1);

        wf.handle(Signal::Sensor(SensorSignal::Calibrated))
            .expect("calibrate");
        wf.handle(Signal::Sensor(SensorSignal::MotionStart))
            .expect("handle");
        assert_eq!(channel.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn overlapping_motion_is_rejected() {
        let camera = CountingCamera::default();
        let (mut wf, _rx) = workflow(Some(camera.clone()), RecordingChannel::default(), false);
        wf.handle(Signal::Sensor(SensorSignal::MotionStart))
            .expect("first");
        assert_eq!(wf.phase(), CyclePhase::Capturing);
        wf.handle(Signal::Sensor(SensorSignal::MotionStart))
            .expect("second");
        assert_eq!(*camera.starts.lock().unwrap(), 1);
        assert_eq!(wf.stats().rejected_overlapping, 1);
    }

    #[test]
    fn camera_start_failure_leaves_workflow_idle() {
        let camera = CountingCamera {
            refuse: true,
            ..CountingCamera::default()
        };
        let (mut wf, _rx) = workflow(Some(camera), RecordingChannel::default(), false);
        let err = wf
            .handle(Signal::Sensor(SensorSignal::MotionStart))
            .unwrap_err();
        assert!(!err.is_fatal());
        assert!(wf.is_idle());
    }

    #[test]
    fn missing_capture_file_is_fatal_and_stops_camera() {
        let camera = CountingCamera::default();
        let channel = RecordingChannel::default();
        let (mut wf, _rx) = workflow(Some(camera.clone()), channel.clone(), false);
        wf.handle(Signal::Sensor(SensorSignal::MotionStart))
            .expect("motion");
        let err = wf
            .handle(Signal::Capture(CaptureSignal::Ready {
                filename: "cat.jpg".to_string(),
            }))
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(wf.is_idle());
        assert_eq!(*camera.stops.lock().unwrap(), 1);
        assert!(channel.0.lock().unwrap().is_empty());
    }

    #[test]
    fn camera_exit_without_image_aborts_cycle() {
        let (mut wf, _rx) = workflow(
            Some(CountingCamera::default()),
            RecordingChannel::default(),
            false,
        );
        wf.handle(Signal::Sensor(SensorSignal::MotionStart))
            .expect("motion");
        wf.handle(Signal::Capture(CaptureSignal::Exited))
            .expect("exit");
        assert!(wf.is_idle());
        assert_eq!(wf.stats().aborted, 1);
    }

    #[test]
    fn capture_failure_is_not_fatal() {
        let (mut wf, _rx) = workflow(
            Some(CountingCamera::default()),
            RecordingChannel::default(),
            false,
        );
        wf.handle(Signal::Sensor(SensorSignal::MotionStart))
            .expect("motion");
        let err = wf
            .handle(Signal::Capture(CaptureSignal::Failed {
                reason: "exit 70".to_string(),
            }))
            .unwrap_err();
        assert!(!err.is_fatal());
        assert!(wf.is_idle());
    }

    #[test]
    fn stray_upload_result_is_ignored() {
        let channel = RecordingChannel::default();
        let (mut wf, _rx) = workflow(None, channel.clone(), false);
        wf.handle(Signal::UploadFinished(Ok(PutObjectOutput::default())))
            .expect("ignored");
        assert!(channel.0.lock().unwrap().is_empty());
    }

    #[test]
    fn upload_result_arrives_on_completion_channel() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("cat.jpg"), [0x01, 0x02]).expect("image");
        let (tx, rx) = mpsc::channel();
        let channel = RecordingChannel::default();
        let mut wf = DetectionWorkflow::new(
            WorkflowSettings {
                capture_dir: dir.path().to_path_buf(),
                ..settings(false)
            },
            Some(Box::new(CountingCamera::default())),
            Arc::new(OkStore),
            Box::new(channel.clone()),
            Arc::new(FixedClock(
                Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            )),
            tx,
        );
        wf.handle(Signal::Sensor(SensorSignal::MotionStart))
            .expect("motion");
        wf.handle(Signal::Capture(CaptureSignal::Ready {
            filename: "cat.jpg".to_string(),
        }))
        .expect("ready");
        assert_eq!(wf.phase(), CyclePhase::Uploading);

        let completion = rx.recv_timeout(Duration::from_secs(5)).expect("completion");
        assert!(matches!(completion, Signal::UploadFinished(Ok(_))));
        wf.handle(completion).expect("publish");

        let published = channel.0.lock().unwrap();
        assert_eq!(published.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&published[0].1).expect("json");
        assert_eq!(
            value["imageUrl"],
            "https://s3.amazonaws.com/kitty-detections/cat-1735689600000.jpg"
        );
        assert_eq!(value["s3"]["image"], "cat-1735689600000.jpg");
    }

    #[test]
    fn panicking_upload_reports_interrupted_and_frees_the_slot() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("cat.jpg"), [0x01, 0x02]).expect("image");
        let (tx, rx) = mpsc::channel();
        let camera = CountingCamera::default();
        let mut wf = DetectionWorkflow::new(
            WorkflowSettings {
                capture_dir: dir.path().to_path_buf(),
                ..settings(false)
            },
            Some(Box::new(camera.clone())),
            Arc::new(PanickingStore),
            Box::new(RecordingChannel::default()),
            Arc::new(FixedClock(
                Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            )),
            tx,
        );
        wf.handle(Signal::Sensor(SensorSignal::MotionStart))
            .expect("motion");
        wf.handle(Signal::Capture(CaptureSignal::Ready {
            filename: "cat.jpg".to_string(),
        }))
        .expect("ready");

        let completion = rx.recv_timeout(Duration::from_secs(5)).expect("completion");
        assert!(matches!(
            completion,
            Signal::UploadFinished(Err(StoreError::Interrupted))
        ));
        let err = wf.handle(completion).unwrap_err();
        assert!(err.is_fatal());
        assert!(wf.is_idle());

        wf.handle(Signal::Sensor(SensorSignal::MotionStart))
            .expect("next motion");
        assert_eq!(*camera.starts.lock().unwrap(), 2);
        assert_eq!(wf.stats().rejected_overlapping, 0);
    }

    #[test]
    fn full_notification_queue_is_not_fatal() {
        let (tx, _rx) = mpsc::channel();
        let mut wf = DetectionWorkflow::new(
            settings(false),
            None,
            Arc::new(OkStore),
            Box::new(FullChannel),
            Arc::new(FixedClock(
                Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            )),
            tx,
        );
        let err = wf
            .handle(Signal::Sensor(SensorSignal::MotionStart))
            .unwrap_err();
        assert!(!err.is_fatal());
        assert!(wf.is_idle());
        assert_eq!(wf.stats().published, 0);
    }
}
