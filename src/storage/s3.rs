//! S3 object store over plain HTTPS with SigV4 request signing.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use std::io::Read;
use std::time::Duration;
use url::Url;

use super::sigv4::{sha256_hex, uri_encode_path, SigV4Request};
use super::{ObjectStore, PutObjectOutput, PutObjectRequest, StoreError};

const SERVICE: &str = "s3";
const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const MAX_ERROR_BODY_BYTES: u64 = 4096;

#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    /// Read the standard `AWS_*` credential variables.
    pub fn from_env() -> Result<Self> {
        let access_key_id = non_empty_env("AWS_ACCESS_KEY_ID")
            .ok_or_else(|| anyhow!("AWS_ACCESS_KEY_ID must be set"))?;
        let secret_access_key = non_empty_env("AWS_SECRET_ACCESS_KEY")
            .ok_or_else(|| anyhow!("AWS_SECRET_ACCESS_KEY must be set"))?;
        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token: non_empty_env("AWS_SESSION_TOKEN"),
        })
    }
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Clone, Debug)]
pub struct S3Settings {
    /// Endpoint host, also used for public object URLs.
    pub host: String,
    /// Signing region.
    pub region: String,
    pub timeout: Duration,
}

pub struct S3Client {
    settings: S3Settings,
    credentials: AwsCredentials,
    agent: ureq::Agent,
}

impl S3Client {
    pub fn new(settings: S3Settings, credentials: AwsCredentials) -> Result<Self> {
        let base = Url::parse(&format!("https://{}/", settings.host))
            .with_context(|| format!("invalid object store host '{}'", settings.host))?;
        if base.host_str().is_none() || base.path() != "/" {
            return Err(anyhow!(
                "object store host must be a bare host name: '{}'",
                settings.host
            ));
        }
        let agent = ureq::AgentBuilder::new().timeout(settings.timeout).build();
        Ok(Self {
            settings,
            credentials,
            agent,
        })
    }

    pub fn host(&self) -> &str {
        &self.settings.host
    }

    fn signed_headers(
        &self,
        request: &PutObjectRequest,
        canonical_uri: &str,
        now: DateTime<Utc>,
    ) -> Vec<(String, String)> {
        let amz_date = now.format(AMZ_DATE_FORMAT).to_string();
        let payload_hash = sha256_hex(&request.body);

        let mut signer = SigV4Request::new("PUT", canonical_uri, &payload_hash)
            .header("host", &self.settings.host)
            .header("content-type", &request.content_type)
            .header("x-amz-acl", request.acl.as_header_value())
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);
        if let Some(token) = &self.credentials.session_token {
            signer = signer.header("x-amz-security-token", token);
        }

        let authorization = signer.authorization(
            &self.credentials.access_key_id,
            &self.credentials.secret_access_key,
            &amz_date,
            &self.settings.region,
            SERVICE,
        );

        let mut headers = vec![
            ("Content-Type".to_string(), request.content_type.clone()),
            (
                "x-amz-acl".to_string(),
                request.acl.as_header_value().to_string(),
            ),
            ("x-amz-content-sha256".to_string(), payload_hash),
            ("x-amz-date".to_string(), amz_date),
            ("Authorization".to_string(), authorization),
        ];
        if let Some(token) = &self.credentials.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers
    }
}

impl ObjectStore for S3Client {
    fn put_object(&self, request: &PutObjectRequest) -> Result<PutObjectOutput, StoreError> {
        let canonical_uri = uri_encode_path(&format!("/{}/{}", request.bucket, request.key));
        let url = format!("https://{}{}", self.settings.host, canonical_uri);

        let mut call = self.agent.put(&url);
        for (name, value) in self.signed_headers(request, &canonical_uri, Utc::now()) {
            call = call.set(&name, &value);
        }

        log::debug!(
            "PUT {} ({} bytes, acl={})",
            url,
            request.body.len(),
            request.acl.as_header_value()
        );
        match call.send_bytes(&request.body) {
            Ok(response) => Ok(PutObjectOutput {
                etag: response
                    .header("ETag")
                    .map(|etag| etag.trim_matches('"').to_string()),
            }),
            Err(ureq::Error::Status(code, response)) => {
                let mut body = String::new();
                let _ = response
                    .into_reader()
                    .take(MAX_ERROR_BODY_BYTES)
                    .read_to_string(&mut body);
                Err(StoreError::Status {
                    code,
                    body: body.trim().to_string(),
                })
            }
            Err(ureq::Error::Transport(transport)) => {
                Err(StoreError::Transport(transport.to_string()))
            }
        }
    }
}
