//! Notification transport.
//!
//! Detections are announced on a single MQTT topic. The workflow only sees the
//! [`NotificationChannel`] contract; `mqtt` provides the AWS IoT client and
//! `tls` the endpoint and certificate handling it needs.

pub mod mqtt;
mod tls;

pub use mqtt::{ChannelSignal, MqttChannel, MqttSettings};
pub use tls::{build_transport, parse_mqtt_endpoint, MqttEndpoint, TlsMaterials, DEFAULT_TLS_PORT};

/// Topic every detection is published on.
pub const DETECTION_TOPIC: &str = "kitty-detection";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelError {
    /// The client's request queue is gone; nothing more can be published.
    Closed(String),
    /// The request queue refused the message without waiting: it is full of
    /// publishes held back by an unreachable broker, or the client is gone.
    QueueFull,
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed(msg) => write!(f, "notification channel closed: {}", msg),
            Self::QueueFull => write!(f, "notification queue unavailable, detection dropped"),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Fire-and-forget publishing. Implementations queue the message and return
/// without waiting for the broker to acknowledge it.
pub trait NotificationChannel: Send {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), ChannelError>;
}
