//! Kitty detector
//!
//! Watches a PIR motion sensor, snaps a still with the board camera, uploads
//! the JPEG to S3 and announces the detection on an AWS IoT MQTT topic.
//!
//! # Architecture
//!
//! Every adapter runs on its own thread and talks to the rest of the bridge
//! only by sending [`Signal`]s down one channel. The [`Supervisor`] drains that
//! channel and hands each signal to the [`DetectionWorkflow`], the only piece
//! that knows how a detection cycle is sequenced:
//!
//! ```text
//! sensor -> workflow -> camera -> workflow -> object store -> workflow -> mqtt
//! ```
//!
//! # Module Structure
//!
//! - `sensor`: PIR edge detection and the sysfs GPIO poller
//! - `capture`: camera contract and the `raspistill` adapter
//! - `storage`: object store contract and the SigV4 S3 client
//! - `transport`: notification contract, MQTT endpoint/TLS handling and client
//! - `event`: detection payload, capture artifact, upload key, clock
//! - `workflow`: per-cycle state machine
//! - `supervisor`: signal loop, error policy and shutdown

pub mod capture;
pub mod config;
pub mod error;
pub mod event;
pub mod sensor;
pub mod storage;
pub mod supervisor;
pub mod transport;
pub mod workflow;

pub use capture::{CaptureDevice, CaptureError, CaptureSignal};
pub use error::{CycleError, ErrorKind};
pub use event::{
    format_detection_timestamp, CaptureArtifact, Clock, DetectionEvent, StorageRef, SystemClock,
    UploadKey, DETECTION_TIMEZONE,
};
pub use sensor::{MotionDetector, SensorSignal};
pub use storage::{
    public_url, ObjectAcl, ObjectStore, PutObjectOutput, PutObjectRequest, StoreError,
    IMAGE_CONTENT_TYPE,
};
pub use supervisor::{RunSummary, Supervisor};
pub use transport::{ChannelError, NotificationChannel, DETECTION_TOPIC};
pub use workflow::{CyclePhase, DetectionWorkflow, Signal, WorkflowSettings, WorkflowStats};
