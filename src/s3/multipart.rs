//! Multipart upload sessions
//!
//! A [`MultipartSession`] owns one upload from initiation to completion or
//! abort. Its part set is private to the session; `upload_part` takes
//! `&self`, so parts with distinct numbers can be uploaded concurrently
//! from several tasks. Once the session is completed or aborted every
//! further operation fails with `Conflict` without contacting the service.
//!
//! The chunked uploader (`ObjectClient::upload` / `multipart_upload`) splits
//! a payload into fixed-size parts and uploads them with bounded
//! parallelism, aborting the session if any part fails.

use crate::s3::client::ObjectClient;
use crate::s3::error::{ErrorDetail, Result, S3Error};
use crate::s3::transport::{HyperTransport, Transport};
use crate::s3::types::{
    CompletedPart, CompletedUpload, Part, SessionState, UploadConfig, MAX_PART_NUMBER,
    MIN_PART_NUMBER,
};
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Reject part numbers outside 1..=10000
pub fn validate_part_number(part_number: u32) -> Result<()> {
    if (MIN_PART_NUMBER..=MAX_PART_NUMBER).contains(&part_number) {
        return Ok(());
    }
    Err(S3Error::Validation(ErrorDetail::local(format!(
        "part number {} outside {}..={}",
        part_number, MIN_PART_NUMBER, MAX_PART_NUMBER
    ))))
}

/// Check a completion list: non-empty, valid numbers, strictly ascending
pub fn validate_completion(parts: &[CompletedPart]) -> Result<()> {
    if parts.is_empty() {
        return Err(S3Error::Validation(ErrorDetail::local(
            "cannot complete a multipart upload without parts",
        )));
    }
    let mut previous = 0u32;
    for part in parts {
        validate_part_number(part.part_number)?;
        if part.part_number <= previous {
            return Err(S3Error::Validation(ErrorDetail::local(format!(
                "part {} listed after part {}: parts must be strictly ascending",
                part.part_number, previous
            ))));
        }
        previous = part.part_number;
    }
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One multipart upload and the parts accepted for it so far
pub struct MultipartSession<T = HyperTransport> {
    client: ObjectClient<T>,
    key: String,
    upload_id: String,
    parts: Mutex<BTreeMap<u32, Part>>,
    state: Mutex<SessionState>,
}

impl<T: Transport> MultipartSession<T> {
    /// Wrap an upload that was already initiated
    pub fn new(client: ObjectClient<T>, key: String, upload_id: String) -> Self {
        Self {
            client,
            key,
            upload_id,
            parts: Mutex::new(BTreeMap::new()),
            state: Mutex::new(SessionState::Open),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Parts accepted so far, ascending by part number
    pub fn parts(&self) -> Vec<Part> {
        lock(&self.parts).values().cloned().collect()
    }

    /// Sum of the byte lengths of the accepted parts
    pub fn uploaded_bytes(&self) -> u64 {
        lock(&self.parts).values().map(|p| p.size).sum()
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        let state = self.state();
        if state.is_terminal() {
            return Err(S3Error::Conflict(ErrorDetail::local(format!(
                "cannot {} upload {}: session is {}",
                operation, self.upload_id, state
            ))));
        }
        Ok(())
    }

    /// Upload one part and record it, replacing any earlier part with the same number
    pub async fn upload_part(&self, part_number: u32, data: impl Into<Bytes>) -> Result<Part> {
        validate_part_number(part_number)?;
        self.ensure_open("upload part to")?;

        let part = self
            .client
            .upload_part(&self.key, &self.upload_id, part_number, data)
            .await?;

        // The session may have been completed or aborted while the part was in flight
        let mut parts = lock(&self.parts);
        self.ensure_open("record part for")?;
        parts.insert(part_number, part.clone());
        Ok(part)
    }

    /// Complete with every recorded part, ascending by part number
    pub async fn complete(&self) -> Result<CompletedUpload> {
        let parts: Vec<CompletedPart> = lock(&self.parts).values().map(CompletedPart::from).collect();
        self.complete_with(&parts).await
    }

    /// Complete with a caller-asserted part list
    pub async fn complete_with(&self, parts: &[CompletedPart]) -> Result<CompletedUpload> {
        self.ensure_open("complete")?;

        let completed = self
            .client
            .complete_multipart_upload(&self.key, &self.upload_id, parts)
            .await?;
        *lock(&self.state) = SessionState::Completed;
        Ok(completed)
    }

    /// Abort the upload, discarding its parts.
    ///
    /// Repeating an abort succeeds; aborting a completed session is a conflict.
    pub async fn abort(&self) -> Result<()> {
        match self.state() {
            SessionState::Aborted => return Ok(()),
            SessionState::Completed => return self.ensure_open("abort"),
            SessionState::Open => {}
        }

        self.client
            .abort_multipart_upload(&self.key, &self.upload_id)
            .await?;
        *lock(&self.state) = SessionState::Aborted;
        lock(&self.parts).clear();
        Ok(())
    }
}

impl<T: Transport> ObjectClient<T> {
    /// Upload a payload, choosing single-shot or multipart by `config.threshold`.
    ///
    /// Returns the quoted content-tag of the stored object.
    pub async fn upload(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        config: &UploadConfig,
    ) -> Result<String> {
        let data = data.into();
        if (data.len() as u64) < config.threshold {
            return self.put_object(key, data).await;
        }
        Ok(self.multipart_upload(key, data, config).await?.etag)
    }

    /// Split `data` into `config.part_size` chunks and upload them as one
    /// multipart object, `config.concurrency` parts at a time.
    ///
    /// If any part fails the session is aborted and the part's error returned.
    pub async fn multipart_upload(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        config: &UploadConfig,
    ) -> Result<CompletedUpload> {
        let data = data.into();
        let part_size = config.part_size.max(1);
        let num_parts = config.part_count(data.len()).max(1);
        if num_parts > MAX_PART_NUMBER as usize {
            return Err(S3Error::Validation(ErrorDetail::local(format!(
                "{} bytes in {} byte parts needs {} parts, more than {}",
                data.len(),
                part_size,
                num_parts,
                MAX_PART_NUMBER
            ))));
        }

        let session = self.begin_multipart(key).await?;

        let chunks = (0..num_parts).map(|index| {
            let start = index * part_size;
            let end = std::cmp::min(start + part_size, data.len());
            ((index + 1) as u32, data.slice(start..end))
        });

        let uploaded: Result<Vec<Part>> = stream::iter(chunks)
            .map(|(part_number, chunk)| session.upload_part(part_number, chunk))
            .buffer_unordered(config.concurrency.max(1))
            .try_collect()
            .await;

        if let Err(err) = uploaded {
            tracing::warn!(
                key = %key,
                upload_id = %session.upload_id(),
                error = %err,
                "part upload failed, aborting multipart upload"
            );
            if let Err(abort_err) = session.abort().await {
                tracing::warn!(
                    upload_id = %session.upload_id(),
                    error = %abort_err,
                    "abort after failed part upload also failed"
                );
            }
            return Err(err);
        }

        session.complete().await
    }
}
