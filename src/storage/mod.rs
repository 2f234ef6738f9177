//! Object storage for captured images.
//!
//! The workflow only needs a single `put_object`; anything that can take a
//! JPEG and make it reachable at `https://<host>/<bucket>/<key>` fits.

mod s3;
mod sigv4;

pub use s3::{AwsCredentials, S3Client, S3Settings};
pub use sigv4::{signing_key, uri_encode_path, SigV4Request};

/// Content type for every capture upload.
pub const IMAGE_CONTENT_TYPE: &str = "image/jpeg";

/// Canned object ACL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectAcl {
    PublicRead,
}

impl ObjectAcl {
    pub fn as_header_value(&self) -> &'static str {
        match self {
            Self::PublicRead => "public-read",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PutObjectRequest {
    pub bucket: String,
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
    pub acl: ObjectAcl,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PutObjectOutput {
    pub etag: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// Request never produced an HTTP response.
    Transport(String),
    /// Store answered with a non-success status.
    Status { code: u16, body: String },
    /// Upload stage went away before reporting back.
    Interrupted,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "object store unreachable: {}", msg),
            Self::Status { code, body } => {
                write!(f, "object store returned status {}: {}", code, body)
            }
            Self::Interrupted => write!(f, "upload interrupted before completion"),
        }
    }
}

impl std::error::Error for StoreError {}

pub trait ObjectStore: Send + Sync {
    /// Single attempt; no retries and no multipart.
    fn put_object(&self, request: &PutObjectRequest) -> Result<PutObjectOutput, StoreError>;
}

/// Public address of an uploaded object.
pub fn public_url(host: &str, bucket: &str, key: &str) -> String {
    format!("https://{}/{}/{}", host, bucket, key)
}
