//! S3 protocol client
//!
//! This module provides:
//! - A typed error taxonomy and the response classifier
//! - Pluggable request signing (AWS Signature V4 by default)
//! - Pluggable HTTP transport (pooled hyper client by default)
//! - Object operations: exists, metadata, range read, put, delete
//! - Multipart upload sessions and a concurrent chunked uploader

pub mod client;
pub mod error;
pub mod etag;
pub mod multipart;
pub mod signer;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use client::ObjectClient;
pub use error::{ErrorDetail, ErrorKind, Result, S3Error};
pub use multipart::MultipartSession;
pub use signer::{Payload, RequestSigner, SigV4Signer, SigningRequest};
pub use transport::{HttpRequest, HttpResponse, HyperTransport, Transport, TransportConfig};
pub use types::{
    CompletedPart, CompletedUpload, Credentials, ObjectKey, ObjectMetadata, ObjectRef, Part, SessionState,
    UploadConfig,
};
