use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::CameraSettings;
use crate::sensor::gpio::DEFAULT_SYSFS_ROOT;
use crate::sensor::GpioSettings;
use crate::storage::S3Settings;
use crate::transport::{parse_mqtt_endpoint, MqttEndpoint, MqttSettings};
use crate::workflow::WorkflowSettings;

const DEFAULT_CLIENT_ID: &str = "raspberry-kitty";
const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_CA_PATH: &str = "keys/root-CA.pem.crt";
const DEFAULT_CERT_PATH: &str = "keys/certificate.pem.crt";
const DEFAULT_KEY_PATH: &str = "keys/private.pem.key";
const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
const DEFAULT_RECONNECT_DELAY_SECS: u64 = 5;
const DEFAULT_BUCKET: &str = "kitty-detections";
const DEFAULT_STORE_HOST: &str = "s3.amazonaws.com";
const DEFAULT_STORE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CAMERA_COMMAND: &str = "raspistill";
const DEFAULT_CAMERA_OUTPUT_DIR: &str = "./tmp";
const DEFAULT_CAMERA_FILENAME: &str = "cat.jpg";
const DEFAULT_CAMERA_TIMEOUT_MS: u64 = 1;
const DEFAULT_GPIO_PIN: u32 = 4;
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_CALIBRATION_SECS: u64 = 2;

#[derive(Debug, Deserialize, Default)]
struct BridgeConfigFile {
    device: Option<DeviceConfigFile>,
    mqtt: Option<MqttConfigFile>,
    storage: Option<StorageConfigFile>,
    camera: Option<CameraConfigFile>,
    sensor: Option<SensorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DeviceConfigFile {
    client_id: Option<String>,
    region: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    endpoint: Option<String>,
    ca_path: Option<PathBuf>,
    cert_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
    keep_alive_secs: Option<u64>,
    reconnect_delay_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    bucket: Option<String>,
    host: Option<String>,
    region: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    enabled: Option<bool>,
    command: Option<String>,
    output_dir: Option<PathBuf>,
    filename: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SensorConfigFile {
    gpio_pin: Option<u32>,
    poll_interval_ms: Option<u64>,
    calibration_secs: Option<u64>,
    require_calibration: Option<bool>,
    sysfs_root: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub client_id: String,
    pub region: String,
    pub mqtt: MqttConfig,
    pub storage: StorageConfig,
    pub camera: CameraConfig,
    pub sensor: SensorConfig,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Explicit broker address; derived from the region when unset.
    pub endpoint: Option<String>,
    pub ca_path: PathBuf,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub keep_alive: Duration,
    pub reconnect_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub host: String,
    /// Signing region; the device region when unset.
    pub region: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub enabled: bool,
    pub command: String,
    pub output_dir: PathBuf,
    pub filename: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SensorConfig {
    pub gpio_pin: u32,
    pub poll_interval: Duration,
    pub calibration: Duration,
    pub require_calibration: bool,
    pub sysfs_root: PathBuf,
}

impl BridgeConfig {
    /// Load from `KITTY_CONFIG` (if set), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("KITTY_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: BridgeConfigFile) -> Self {
        let device = file.device.unwrap_or_default();
        let mqtt = file.mqtt.unwrap_or_default();
        let storage = file.storage.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let sensor = file.sensor.unwrap_or_default();

        Self {
            client_id: device
                .client_id
                .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            region: device.region.unwrap_or_else(|| DEFAULT_REGION.to_string()),
            mqtt: MqttConfig {
                endpoint: mqtt.endpoint,
                ca_path: mqtt.ca_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CA_PATH)),
                cert_path: mqtt
                    .cert_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CERT_PATH)),
                key_path: mqtt
                    .key_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_KEY_PATH)),
                keep_alive: Duration::from_secs(
                    mqtt.keep_alive_secs.unwrap_or(DEFAULT_KEEP_ALIVE_SECS),
                ),
                reconnect_delay: Duration::from_secs(
                    mqtt.reconnect_delay_secs
                        .unwrap_or(DEFAULT_RECONNECT_DELAY_SECS),
                ),
            },
            storage: StorageConfig {
                bucket: storage
                    .bucket
                    .unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
                host: storage
                    .host
                    .unwrap_or_else(|| DEFAULT_STORE_HOST.to_string()),
                region: storage.region,
                timeout: Duration::from_secs(
                    storage.timeout_secs.unwrap_or(DEFAULT_STORE_TIMEOUT_SECS),
                ),
            },
            camera: CameraConfig {
                enabled: camera.enabled.unwrap_or(true),
                command: camera
                    .command
                    .unwrap_or_else(|| DEFAULT_CAMERA_COMMAND.to_string()),
                output_dir: camera
                    .output_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CAMERA_OUTPUT_DIR)),
                filename: camera
                    .filename
                    .unwrap_or_else(|| DEFAULT_CAMERA_FILENAME.to_string()),
                timeout_ms: camera.timeout_ms.unwrap_or(DEFAULT_CAMERA_TIMEOUT_MS),
            },
            sensor: SensorConfig {
                gpio_pin: sensor.gpio_pin.unwrap_or(DEFAULT_GPIO_PIN),
                poll_interval: Duration::from_millis(
                    sensor.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
                ),
                calibration: Duration::from_secs(
                    sensor.calibration_secs.unwrap_or(DEFAULT_CALIBRATION_SECS),
                ),
                require_calibration: sensor.require_calibration.unwrap_or(false),
                sysfs_root: sensor
                    .sysfs_root
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SYSFS_ROOT)),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(client_id) = non_empty_env("AWS_IOT_CLIENTID") {
            self.client_id = client_id;
        }
        if let Some(region) = non_empty_env("AWS_REGION") {
            self.region = region;
        }
        if let Some(endpoint) = non_empty_env("AWS_IOT_ENDPOINT") {
            self.mqtt.endpoint = Some(endpoint);
        }
        if let Some(path) = non_empty_env("AWS_IOT_CA_PATH") {
            self.mqtt.ca_path = PathBuf::from(path);
        }
        if let Some(path) = non_empty_env("AWS_IOT_CERT_PATH") {
            self.mqtt.cert_path = PathBuf::from(path);
        }
        if let Some(path) = non_empty_env("AWS_IOT_KEY_PATH") {
            self.mqtt.key_path = PathBuf::from(path);
        }
        if let Some(bucket) = non_empty_env("KITTY_BUCKET") {
            self.storage.bucket = bucket;
        }
        if let Some(host) = non_empty_env("KITTY_STORE_HOST") {
            self.storage.host = host;
        }
        if let Some(enabled) = non_empty_env("KITTY_CAMERA_ENABLED") {
            self.camera.enabled = parse_bool(&enabled)
                .ok_or_else(|| anyhow!("KITTY_CAMERA_ENABLED must be true or false"))?;
        }
        if let Some(pin) = non_empty_env("KITTY_GPIO_PIN") {
            self.sensor.gpio_pin = pin
                .parse()
                .map_err(|_| anyhow!("KITTY_GPIO_PIN must be a GPIO number"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(anyhow!("device client_id must not be empty"));
        }
        if self.storage.bucket.trim().is_empty() {
            return Err(anyhow!("storage bucket must not be empty"));
        }
        if self.storage.bucket.contains('/') {
            return Err(anyhow!(
                "storage bucket '{}' must not contain '/'",
                self.storage.bucket
            ));
        }
        if self.camera.filename.trim().is_empty() || self.camera.filename.contains('/') {
            return Err(anyhow!(
                "camera filename '{}' must be a bare file name",
                self.camera.filename
            ));
        }
        if self.sensor.poll_interval.is_zero() {
            return Err(anyhow!("sensor poll interval must be greater than zero"));
        }
        self.iot_endpoint()?;
        Ok(())
    }

    /// Broker endpoint, falling back to the regional AWS IoT data endpoint.
    pub fn iot_endpoint(&self) -> Result<MqttEndpoint> {
        let addr = self
            .mqtt
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("mqtts://data.iot.{}.amazonaws.com:8883", self.region));
        parse_mqtt_endpoint(&addr).with_context(|| format!("invalid AWS IoT endpoint '{}'", addr))
    }

    pub fn storage_region(&self) -> &str {
        self.storage.region.as_deref().unwrap_or(&self.region)
    }

    pub fn mqtt_settings(&self) -> Result<MqttSettings> {
        Ok(MqttSettings {
            client_id: self.client_id.clone(),
            endpoint: self.iot_endpoint()?,
            keep_alive: self.mqtt.keep_alive,
            reconnect_delay: self.mqtt.reconnect_delay,
        })
    }

    pub fn s3_settings(&self) -> S3Settings {
        S3Settings {
            host: self.storage.host.clone(),
            region: self.storage_region().to_string(),
            timeout: self.storage.timeout,
        }
    }

    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            bucket: self.storage.bucket.clone(),
            store_host: self.storage.host.clone(),
            capture_dir: self.camera.output_dir.clone(),
            require_calibration: self.sensor.require_calibration,
        }
    }

    pub fn camera_settings(&self) -> CameraSettings {
        CameraSettings {
            command: self.camera.command.clone(),
            output_dir: self.camera.output_dir.clone(),
            filename: self.camera.filename.clone(),
            timeout_ms: self.camera.timeout_ms,
        }
    }

    pub fn gpio_settings(&self) -> GpioSettings {
        GpioSettings {
            pin: self.sensor.gpio_pin,
            poll_interval: self.sensor.poll_interval,
            calibration: self.sensor.calibration,
            sysfs_root: self.sensor.sysfs_root.clone(),
        }
    }
}

fn read_config_file(path: &Path) -> Result<BridgeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
