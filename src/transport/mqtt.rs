//! MQTT notification channel for AWS IoT Core.
//!
//! The rumqttc event loop runs on a background thread for the life of the
//! bridge. Connection trouble is only logged: the loop keeps polling after an
//! error, which makes rumqttc reconnect, and publishes queue up meanwhile.

use anyhow::Result;
use rumqttc::v5::{
    mqttbytes::QoS, Client, ClientError, Connection, Event, Incoming, MqttOptions,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::tls::{build_transport, MqttEndpoint, TlsMaterials};
use super::{ChannelError, NotificationChannel};

const REQUEST_QUEUE_CAPACITY: usize = 10;

#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub client_id: String,
    pub endpoint: MqttEndpoint,
    pub keep_alive: Duration,
    pub reconnect_delay: Duration,
}

/// Connection lifecycle as seen by the bridge. Observational only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelSignal {
    Connected,
    Message { topic: String, len: usize },
    Closed,
    Offline(String),
    Reconnecting,
}

impl ChannelSignal {
    pub fn describe(&self) -> String {
        match self {
            Self::Connected => "connected to AWS IoT".to_string(),
            Self::Message { topic, len } => {
                format!("message received on {} ({} bytes)", topic, len)
            }
            Self::Closed => "broker closed the connection".to_string(),
            Self::Offline(reason) => format!("AWS IoT connection error: {}", reason),
            Self::Reconnecting => "attempting to reconnect to AWS IoT".to_string(),
        }
    }

    fn log(&self) {
        match self {
            Self::Connected | Self::Reconnecting => log::info!("{}", self.describe()),
            Self::Message { .. } | Self::Closed => log::debug!("{}", self.describe()),
            Self::Offline(_) => log::warn!("{}", self.describe()),
        }
    }
}

fn classify_incoming(packet: &Incoming) -> Option<ChannelSignal> {
    match packet {
        Incoming::ConnAck(_) => Some(ChannelSignal::Connected),
        Incoming::Publish(publish) => Some(ChannelSignal::Message {
            topic: String::from_utf8_lossy(&publish.topic).into_owned(),
            len: publish.payload.len(),
        }),
        Incoming::Disconnect(_) => Some(ChannelSignal::Closed),
        _ => None,
    }
}

pub struct MqttChannel {
    client: Client,
    stop: Arc<AtomicBool>,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttChannel {
    /// Create the client and start the connection thread.
    ///
    /// Returns as soon as the client exists; the actual connect happens in the
    /// background and is reported through the log.
    pub fn connect(settings: &MqttSettings, tls: &TlsMaterials) -> Result<Self> {
        let endpoint = &settings.endpoint;
        let mut options = MqttOptions::new(&settings.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_start(true);
        options.set_transport(build_transport(endpoint, tls)?);

        let (client, connection) = Client::new(options, REQUEST_QUEUE_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));
        let loop_stop = Arc::clone(&stop);
        let reconnect_delay = settings.reconnect_delay;
        let handle = std::thread::spawn(move || {
            run_connection(connection, loop_stop, reconnect_delay)
        });

        log::info!(
            "Connecting to AWS IoT at {}:{} as {} (TLS: {})",
            endpoint.host,
            endpoint.port,
            settings.client_id,
            endpoint.use_tls
        );
        Ok(Self {
            client,
            stop,
            connection_handle: Some(handle),
        })
    }

    pub fn disconnect(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(handle) = self.connection_handle.take() else {
            return Ok(());
        };
        self.stop.store(true, Ordering::SeqCst);
        let result = self.client.disconnect();
        let _ = handle.join();
        result?;
        Ok(())
    }
}

impl NotificationChannel for MqttChannel {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), ChannelError> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .map_err(|e| match &e {
                ClientError::TryRequest(_) => ChannelError::QueueFull,
                ClientError::Request(_) => ChannelError::Closed(e.to_string()),
            })
    }
}

impl Drop for MqttChannel {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::debug!("MQTT disconnect on drop failed: {}", e);
        }
    }
}

fn run_connection(mut connection: Connection, stop: Arc<AtomicBool>, reconnect_delay: Duration) {
    for notification in connection.iter() {
        match notification {
            Ok(Event::Incoming(packet)) => {
                if let Some(signal) = classify_incoming(&packet) {
                    signal.log();
                }
            }
            Ok(Event::Outgoing(_)) => {}
            Err(e) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                ChannelSignal::Offline(e.to_string()).log();
                std::thread::sleep(reconnect_delay);
                ChannelSignal::Reconnecting.log();
            }
        }
        if stop.load(Ordering::SeqCst) {
            break;
        }
    }
    log::debug!("MQTT connection loop finished");
}
