//! Broker endpoint parsing and TLS material handling.
//!
//! AWS IoT Core only accepts mutually authenticated TLS on 8883, so the device
//! certificate, its private key and the Amazon root CA are all required
//! whenever TLS is on. Plain TCP is kept for local brokers during bench tests.

use anyhow::{anyhow, Context, Result};
use rumqttc::Transport;
use std::path::Path;

pub const DEFAULT_TLS_PORT: u16 = 8883;

/// MQTT endpoint with TLS flag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

/// PEM-encoded device identity for mutual TLS.
#[derive(Clone, Default)]
pub struct TlsMaterials {
    pub ca: Option<Vec<u8>>,
    /// Client certificate and key, always provided together.
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl std::fmt::Debug for TlsMaterials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterials")
            .field("ca", &self.ca.as_ref().map(Vec::len))
            .field("client_auth", &self.client_auth.is_some())
            .finish()
    }
}

impl TlsMaterials {
    /// Load the root CA, device certificate and private key.
    pub fn load(ca_path: &Path, cert_path: &Path, key_path: &Path) -> Result<Self> {
        let ca = std::fs::read(ca_path)
            .with_context(|| format!("failed to read root CA '{}'", ca_path.display()))?;
        let cert = std::fs::read(cert_path).with_context(|| {
            format!("failed to read device certificate '{}'", cert_path.display())
        })?;
        let key = std::fs::read(key_path)
            .with_context(|| format!("failed to read device key '{}'", key_path.display()))?;
        Ok(Self {
            ca: Some(ca),
            client_auth: Some((cert, key)),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.ca.is_some() || self.client_auth.is_some()
    }
}

/// Build a rumqttc transport for `endpoint`.
pub fn build_transport(endpoint: &MqttEndpoint, materials: &TlsMaterials) -> Result<Transport> {
    if !endpoint.use_tls {
        return Ok(Transport::tcp());
    }
    if !materials.is_configured() {
        return Ok(Transport::tls_with_default_config());
    }
    let ca = materials.ca.clone().ok_or_else(|| {
        anyhow!("root CA certificate is required when a device certificate is configured")
    })?;
    Ok(Transport::tls(ca, materials.client_auth.clone(), None))
}

/// Parse a broker address.
///
/// Accepts `host:port`, `mqtt://host:port`, `mqtts://host:port`,
/// `tcp://`/`ssl://` aliases, `[ipv6]:port`, and a bare `mqtts://host` which
/// defaults to port 8883.
pub fn parse_mqtt_endpoint(addr: &str) -> Result<MqttEndpoint> {
    let mut use_tls = false;
    let mut remainder = addr.trim();

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }
    if remainder.is_empty() {
        return Err(anyhow!("missing MQTT host in '{}'", addr));
    }

    let (host, port) = match split_host_port(remainder)? {
        (host, Some(port)) => (host, port),
        (host, None) if use_tls => (host, DEFAULT_TLS_PORT),
        (_, None) => return Err(anyhow!("missing MQTT port in {}", addr)),
    };
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str) -> Result<(String, Option<u16>)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = match rest.strip_prefix(':') {
            Some(port) => Some(parse_port(port, addr)?),
            None if rest.is_empty() => None,
            None => return Err(anyhow!("invalid MQTT address: {}", addr)),
        };
        return Ok((host.to_string(), port));
    }

    match addr.rsplit_once(':') {
        Some((host, port)) => Ok((host.to_string(), Some(parse_port(port, addr)?))),
        None => Ok((addr.to_string(), None)),
    }
}

fn parse_port(port: &str, addr: &str) -> Result<u16> {
    port.parse()
        .with_context(|| format!("invalid MQTT port in {}", addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_endpoint_plain() {
        let ep = parse_mqtt_endpoint("127.0.0.1:1883").unwrap();
        assert_eq!(ep.host, "127.0.0.1");
        assert_eq!(ep.port, 1883);
        assert!(!ep.use_tls);
    }

    #[test]
    fn parse_endpoint_mqtts_scheme() {
        let ep = parse_mqtt_endpoint("mqtts://abc123-ats.iot.us-east-1.amazonaws.com:8883")
            .unwrap();
        assert_eq!(ep.host, "abc123-ats.iot.us-east-1.amazonaws.com");
        assert_eq!(ep.port, 8883);
        assert!(ep.use_tls);
    }

    #[test]
    fn parse_endpoint_tls_default_port() {
        let ep = parse_mqtt_endpoint("mqtts://data.iot.us-east-1.amazonaws.com").unwrap();
        assert_eq!(ep.port, DEFAULT_TLS_PORT);
    }

    #[test]
    fn parse_endpoint_plain_requires_port() {
        assert!(parse_mqtt_endpoint("mqtt://localhost").is_err());
        assert!(parse_mqtt_endpoint("localhost").is_err());
    }

    #[test]
    fn parse_endpoint_ipv6() {
        let ep = parse_mqtt_endpoint("[::1]:1883").unwrap();
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.port, 1883);
    }

    #[test]
    fn parse_endpoint_rejects_unknown_scheme() {
        let err = parse_mqtt_endpoint("http://broker:1883").unwrap_err();
        assert!(err.to_string().contains("unsupported MQTT scheme"));
    }

    #[test]
    fn tls_materials_load_reports_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ca = dir.path().join("root-CA.pem.crt");
        std::fs::write(&ca, b"ca").expect("ca");
        let err = TlsMaterials::load(
            &ca,
            &dir.path().join("certificate.pem.crt"),
            &dir.path().join("private.pem.key"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("device certificate"));
    }

    #[test]
    fn tls_materials_load_all_three() {
        let dir = tempfile::tempdir().expect("tempdir");
        for (name, body) in [
            ("root-CA.pem.crt", "ca"),
            ("certificate.pem.crt", "cert"),
            ("private.pem.key", "key"),
        ] {
            std::fs::write(dir.path().join(name), body).expect("write");
        }
        let materials = TlsMaterials::load(
            &dir.path().join("root-CA.pem.crt"),
            &dir.path().join("certificate.pem.crt"),
            &dir.path().join("private.pem.key"),
        )
        .expect("load");
        assert_eq!(materials.ca.as_deref(), Some(&b"ca"[..]));
        assert_eq!(
            materials.client_auth,
            Some((b"cert".to_vec(), b"key".to_vec()))
        );
    }

    #[test]
    fn plain_endpoint_builds_tcp_transport() {
        let ep = parse_mqtt_endpoint("127.0.0.1:1883").unwrap();
        assert!(matches!(
            build_transport(&ep, &TlsMaterials::default()).unwrap(),
            Transport::Tcp
        ));
    }
}
