//! S3 types and response structures

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest part number accepted by the multipart protocol
pub const MIN_PART_NUMBER: u32 = 1;

/// Highest part number accepted by the multipart protocol
pub const MAX_PART_NUMBER: u32 = 10_000;

/// Smallest part size the service accepts for any part but the last (5 MiB)
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Access key pair used to sign every request.
///
/// Immutable for the lifetime of a client. Neither `Debug` nor any
/// serialization exposes the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access_key: String,
    secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Identifies a remote object. Carries no cached state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Names the object an operation targets.
///
/// A bare key resolves against the client's bucket; an [`ObjectRef`]
/// carries its own.
pub trait ObjectKey {
    fn key(&self) -> &str;

    /// Bucket override, `None` for the client's bucket
    fn bucket(&self) -> Option<&str> {
        None
    }
}

impl ObjectKey for str {
    fn key(&self) -> &str {
        self
    }
}

impl ObjectKey for String {
    fn key(&self) -> &str {
        self
    }
}

impl ObjectKey for ObjectRef {
    fn key(&self) -> &str {
        &self.key
    }

    fn bucket(&self) -> Option<&str> {
        Some(&self.bucket)
    }
}

impl<K: ObjectKey + ?Sized> ObjectKey for &K {
    fn key(&self) -> &str {
        (**self).key()
    }

    fn bucket(&self) -> Option<&str> {
        (**self).bucket()
    }
}

/// Object metadata as reported by a HEAD request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Object key
    pub key: String,
    /// Object size in bytes
    pub size: u64,
    /// Quoted content-tag exactly as the service reported it
    pub etag: String,
    /// Content type (optional)
    pub content_type: Option<String>,
    /// Last modified timestamp (optional, HTTP date format)
    pub last_modified: Option<String>,
}

impl ObjectMetadata {
    /// Create metadata with only the mandatory fields
    pub fn new(key: String, size: u64, etag: String) -> Self {
        Self {
            key,
            size,
            etag,
            content_type: None,
            last_modified: None,
        }
    }

    /// True when the content-tag has the `<hex>-<count>` multipart form
    pub fn is_multipart(&self) -> bool {
        crate::s3::etag::part_count(&self.etag).is_some()
    }
}

// =============================================================================
// Multipart Upload Types
// =============================================================================

/// A part accepted by the service for an open multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    /// Part number (1-10000)
    pub part_number: u32,
    /// Quoted content-tag returned by UploadPart
    pub etag: String,
    /// Number of bytes uploaded for this part
    pub size: u64,
}

impl Part {
    pub fn new(part_number: u32, etag: String, size: u64) -> Self {
        Self {
            part_number,
            etag,
            size,
        }
    }
}

/// Part information for CompleteMultipartUpload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    /// Part number (1-10000)
    pub part_number: u32,
    /// ETag returned from UploadPart
    pub etag: String,
}

impl CompletedPart {
    /// Create a new completed part
    pub fn new(part_number: u32, etag: impl Into<String>) -> Self {
        Self {
            part_number,
            etag: etag.into(),
        }
    }
}

impl From<&Part> for CompletedPart {
    fn from(part: &Part) -> Self {
        Self::new(part.part_number, part.etag.clone())
    }
}

/// Response from CompleteMultipartUpload operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedUpload {
    /// Location URL of the completed object
    pub location: Option<String>,
    /// Bucket name
    pub bucket: String,
    /// Object key
    pub key: String,
    /// Quoted ETag of the completed object
    pub etag: String,
}

impl CompletedUpload {
    pub fn new(bucket: String, key: String, etag: String) -> Self {
        Self {
            location: None,
            bucket,
            key,
            etag,
        }
    }
}

/// Lifecycle state of a multipart upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Initiated and accepting parts
    Open,
    /// Completed; the object is readable
    Completed,
    /// Aborted; all parts discarded
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionState::Open)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Open => "open",
            SessionState::Completed => "completed",
            SessionState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Configuration for chunked uploads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Part size in bytes (default: 8MB, never below the 5MB service minimum)
    pub part_size: usize,
    /// Maximum concurrent part uploads (default: 4)
    pub concurrency: usize,
    /// Payloads of at least this many bytes use multipart (default: 16MB)
    pub threshold: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            part_size: 8 * 1024 * 1024,
            concurrency: 4,
            threshold: 16 * 1024 * 1024,
        }
    }
}

impl UploadConfig {
    /// Set the part size, clamped to the 5MB service minimum
    pub fn with_part_size(mut self, size: usize) -> Self {
        self.part_size = size.max(MIN_PART_SIZE);
        self
    }

    /// Set the number of parts uploaded in parallel (at least 1)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the multipart threshold
    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Number of parts a payload of `total` bytes is split into
    pub fn part_count(&self, total: usize) -> usize {
        if total == 0 {
            return 0;
        }
        total.div_ceil(self.part_size.max(1))
    }
}
