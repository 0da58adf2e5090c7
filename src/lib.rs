//! s3multipart - async client for S3-compatible object storage with a typed
//! multipart-upload protocol

pub mod config;
pub mod s3;

pub use config::ClientConfig;
pub use s3::{ObjectClient, S3Error};
