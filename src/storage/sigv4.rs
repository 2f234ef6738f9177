//! AWS Signature Version 4 for single-shot S3 requests.

use hmac_sha256::HMAC;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Derive the per-day signing key for `region`/`service`.
pub fn signing_key(secret_access_key: &str, date: &str, region: &str, service: &str) -> [u8; 32] {
    let k_date = HMAC::mac(date, format!("AWS4{}", secret_access_key));
    let k_region = HMAC::mac(region, k_date);
    let k_service = HMAC::mac(service, k_region);
    HMAC::mac("aws4_request", k_service)
}

/// Percent-encode an object path. Unreserved characters and `/` pass through.
pub fn uri_encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// A request as seen by the signer: method, encoded path, headers, payload hash.
///
/// Query strings are not supported; object uploads never carry one.
#[derive(Clone, Debug)]
pub struct SigV4Request {
    method: String,
    canonical_uri: String,
    headers: BTreeMap<String, String>,
    payload_hash: String,
}

impl SigV4Request {
    pub fn new(method: &str, canonical_uri: &str, payload_hash: &str) -> Self {
        Self {
            method: method.to_string(),
            canonical_uri: canonical_uri.to_string(),
            headers: BTreeMap::new(),
            payload_hash: payload_hash.to_string(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.trim().to_string());
        self
    }

    pub fn signed_headers(&self) -> String {
        self.headers
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(";")
    }

    pub fn canonical_request(&self) -> String {
        let canonical_headers: String = self
            .headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value))
            .collect();
        format!(
            "{}\n{}\n\n{}\n{}\n{}",
            self.method,
            self.canonical_uri,
            canonical_headers,
            self.signed_headers(),
            self.payload_hash
        )
    }

    pub fn string_to_sign(&self, amz_date: &str, scope: &str) -> String {
        format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            sha256_hex(self.canonical_request().as_bytes())
        )
    }

    pub fn signature(
        &self,
        secret_access_key: &str,
        amz_date: &str,
        region: &str,
        service: &str,
    ) -> String {
        let date = &amz_date[..amz_date.len().min(8)];
        let scope = credential_scope(date, region, service);
        let key = signing_key(secret_access_key, date, region, service);
        hex::encode(HMAC::mac(self.string_to_sign(amz_date, &scope), key))
    }

    /// Value for the `Authorization` header.
    pub fn authorization(
        &self,
        access_key_id: &str,
        secret_access_key: &str,
        amz_date: &str,
        region: &str,
        service: &str,
    ) -> String {
        let date = &amz_date[..amz_date.len().min(8)];
        format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM,
            access_key_id,
            credential_scope(date, region, service),
            self.signed_headers(),
            self.signature(secret_access_key, amz_date, region, service)
        )
    }
}

fn credential_scope(date: &str, region: &str, service: &str) -> String {
    format!("{}/{}/{}/aws4_request", date, region, service)
}
