//! Detection payloads and the data that flows through one detection cycle.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Zone used for every human-readable timestamp the bridge emits.
pub const DETECTION_TIMEZONE: Tz = chrono_tz::America::New_York;

/// Long localized date-time, e.g. "October 19, 2026 3:04 PM".
const TIMESTAMP_FORMAT: &str = "%B %-d, %Y %-I:%M %p";

/// Source of the current instant. Injected so cycles can be replayed in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Format an instant the way it appears in notifications and alerts.
pub fn format_detection_timestamp(instant: DateTime<Utc>) -> String {
    instant
        .with_timezone(&DETECTION_TIMEZONE)
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

/// Where an uploaded image lives in object storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StorageRef {
    pub bucket: String,
    #[serde(rename = "image")]
    pub key: String,
}

/// Notification published once per detection.
///
/// Image fields are absent when the bridge runs without a camera; consumers
/// must treat them as optional.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DetectionEvent {
    motion: bool,
    timestamp: String,
    #[serde(rename = "imageUrl", skip_serializing_if = "Option::is_none")]
    image_url: Option<String>,
    #[serde(rename = "s3", skip_serializing_if = "Option::is_none")]
    storage_ref: Option<StorageRef>,
}

impl DetectionEvent {
    /// Bare motion notification, used when no camera is configured.
    pub fn motion_only(timestamp: String) -> Self {
        Self {
            motion: true,
            timestamp,
            image_url: None,
            storage_ref: None,
        }
    }

    pub fn with_image(timestamp: String, image_url: String, storage_ref: StorageRef) -> Self {
        Self {
            motion: true,
            timestamp,
            image_url: Some(image_url),
            storage_ref: Some(storage_ref),
        }
    }

    pub fn motion(&self) -> bool {
        self.motion
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    pub fn storage_ref(&self) -> Option<&StorageRef> {
        self.storage_ref.as_ref()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Object key for an upload: `<stem>-<millis><.ext>`.
///
/// The camera overwrites the same output file on every capture, so the
/// upload instant is folded into the key to keep repeated detections apart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadKey(String);

impl UploadKey {
    pub fn derive(original_filename: &str, upload_millis: i64) -> Self {
        let path = Path::new(original_filename);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let key = match path.extension() {
            Some(ext) => format!("{}-{}.{}", stem, upload_millis, ext.to_string_lossy()),
            None => format!("{}-{}", stem, upload_millis),
        };
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for UploadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A finished capture read into memory. Consumed by value exactly once.
#[derive(Debug)]
pub struct CaptureArtifact {
    pub local_path: PathBuf,
    pub original_filename: String,
    pub bytes: Vec<u8>,
}

impl CaptureArtifact {
    /// Read the capture the camera reported as `filename` under `output_dir`.
    pub fn read(output_dir: &Path, filename: &str) -> std::io::Result<Self> {
        let local_path = output_dir.join(filename);
        let bytes = std::fs::read(&local_path)?;
        Ok(Self {
            local_path,
            original_filename: filename.to_string(),
            bytes,
        })
    }

    pub fn upload_key(&self, upload_millis: i64) -> UploadKey {
        UploadKey::derive(&self.original_filename, upload_millis)
    }
}
