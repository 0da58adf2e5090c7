//! Object client
//!
//! [`ObjectClient`] builds each logical request, has the signer attach
//! authentication, sends it through the [`Transport`], and classifies the
//! response into a typed result. It never retries: every failure reaches the
//! caller as exactly one [`S3Error`].
//!
//! Path-style URLs are used throughout: `<endpoint>/<bucket>/<key>`.

use crate::config::ClientConfig;
use crate::s3::error::{self, ErrorDetail, Result, S3Error};
use crate::s3::etag;
use crate::s3::multipart::{self, MultipartSession};
use crate::s3::signer::{Payload, RequestSigner, SigV4Signer, SigningRequest};
use crate::s3::transport::{HttpRequest, HttpResponse, HyperTransport, Transport};
use crate::s3::types::{
    CompletedPart, CompletedUpload, Credentials, ObjectKey, ObjectMetadata, ObjectRef, Part,
};
use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use hyper::{Method, StatusCode};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::sync::Arc;

/// Hex lookup table for URI encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Client for one bucket of an S3-compatible service.
///
/// Clone is cheap - transport, signer and credentials are shared.
pub struct ObjectClient<T = HyperTransport> {
    transport: Arc<T>,
    signer: Arc<dyn RequestSigner>,
    credentials: Arc<Credentials>,
    endpoint: String,
    bucket: String,
}

impl<T> Clone for ObjectClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            signer: Arc::clone(&self.signer),
            credentials: Arc::clone(&self.credentials),
            endpoint: self.endpoint.clone(),
            bucket: self.bucket.clone(),
        }
    }
}

impl ObjectClient<HyperTransport> {
    /// Build the default stack (pooled hyper transport, SigV4) from configuration
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let transport = HyperTransport::new(&config.transport_config())?;
        Ok(
            Self::new(transport, config.credentials(), &config.endpoint, &config.bucket)
                .with_signer(SigV4Signer::new(Some(config.region.clone()))),
        )
    }
}

impl<T: Transport> ObjectClient<T> {
    /// Create a client signing with SigV4 for us-east-1
    pub fn new(
        transport: T,
        credentials: Credentials,
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            transport: Arc::new(transport),
            signer: Arc::new(SigV4Signer::default()),
            credentials: Arc::new(credentials),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
        }
    }

    /// Replace the request signer
    pub fn with_signer<S: RequestSigner + 'static>(mut self, signer: S) -> Self {
        self.signer = Arc::new(signer);
        self
    }

    /// Override the bucket name
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn object_ref(&self, key: &str) -> ObjectRef {
        ObjectRef::new(self.bucket.clone(), key)
    }

    // =========================================================================
    // Request plumbing
    // =========================================================================

    /// Encode an S3 key, preserving forward slashes
    /// Returns Cow::Borrowed when no encoding is needed (common case = zero allocation)
    fn encode_s3_key(key: &str) -> Cow<'_, str> {
        let needs_encoding = key.bytes().any(|b| {
            !matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/')
        });

        if !needs_encoding {
            return Cow::Borrowed(key);
        }

        let mut result = String::with_capacity(key.len() + 32);
        for byte in key.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                    result.push(byte as char);
                }
                _ => {
                    result.push('%');
                    result.push(HEX_UPPER[(byte >> 4) as usize] as char);
                    result.push(HEX_UPPER[(byte & 0xf) as usize] as char);
                }
            }
        }
        Cow::Owned(result)
    }

    /// Encode a string for use in a URL query parameter value (RFC 3986).
    fn url_encode_into(buf: &mut String, s: &str) {
        for byte in s.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    buf.push(byte as char);
                }
                _ => {
                    buf.push('%');
                    buf.push(HEX_UPPER[(byte >> 4) as usize] as char);
                    buf.push(HEX_UPPER[(byte & 0xf) as usize] as char);
                }
            }
        }
    }

    /// Build full S3 URL for a key in the client's bucket
    fn build_url(&self, key: &str) -> String {
        self.object_url(key)
    }

    /// Build full S3 URL for an object with pre-allocated capacity
    fn object_url<K: ObjectKey + ?Sized>(&self, object: &K) -> String {
        let bucket = object.bucket().unwrap_or(&self.bucket);
        let encoded_key = Self::encode_s3_key(object.key());
        let mut url = String::with_capacity(
            self.endpoint.len() + 1 + bucket.len() + 1 + encoded_key.len() + 64,
        );
        url.push_str(&self.endpoint);
        url.push('/');
        url.push_str(bucket);
        url.push('/');
        url.push_str(&encoded_key);
        url
    }

    /// Object URL addressing an upload session, optionally one of its parts.
    ///
    /// Parameters are ordered alphabetically so the signer's canonical query
    /// fast path applies.
    fn upload_url(&self, key: &str, upload_id: &str, part_number: Option<u32>) -> String {
        let mut url = self.build_url(key);
        url.push('?');
        if let Some(part_number) = part_number {
            let _ = write!(url, "partNumber={}&", part_number);
        }
        url.push_str("uploadId=");
        Self::url_encode_into(&mut url, upload_id);
        url
    }

    /// Sign, send and classify one request.
    ///
    /// Non-empty bodies are hashed into the signature when `sign_body` is set
    /// and sent as UNSIGNED-PAYLOAD otherwise.
    async fn execute(
        &self,
        method: Method,
        url: String,
        headers: BTreeMap<String, String>,
        body: Bytes,
        sign_body: bool,
    ) -> Result<HttpResponse> {
        let payload = if body.is_empty() {
            Payload::Empty
        } else if sign_body {
            Payload::Bytes(&body)
        } else {
            Payload::Unsigned(body.len() as u64)
        };

        let signed_headers = self.signer.sign(
            SigningRequest {
                method: method.as_str(),
                url: &url,
                headers,
                payload,
            },
            &self.credentials,
            Utc::now(),
        );

        tracing::debug!(method = %method, url = %url, bytes = body.len(), "s3 request");

        let response = self
            .transport
            .send(HttpRequest {
                method,
                url,
                headers: signed_headers,
                body,
            })
            .await?;

        tracing::debug!(status = response.status.as_u16(), "s3 response");
        error::classify(response)
    }

    fn content_md5(data: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(md5::compute(data).0)
    }

    // =========================================================================
    // Object Operations
    // =========================================================================

    async fn head<K: ObjectKey>(&self, object: &K) -> Result<HttpResponse> {
        let url = self.object_url(object);
        self.execute(Method::HEAD, url, BTreeMap::new(), Bytes::new(), true)
            .await
    }

    /// Object metadata (HEAD). Fails with `NotFound` if the object does not exist.
    pub async fn head_object(&self, object: impl ObjectKey) -> Result<ObjectMetadata> {
        let response = self.head(&object).await?;

        let size = response
            .header("content-length")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| {
                S3Error::InvalidResponse("missing or invalid Content-Length".to_string())
            })?;
        let etag = response
            .header("etag")
            .map(etag::quote)
            .ok_or_else(|| S3Error::InvalidResponse("missing ETag header".to_string()))?;

        let mut metadata = ObjectMetadata::new(object.key().to_string(), size, etag);
        metadata.content_type = response.header("content-type").map(str::to_string);
        metadata.last_modified = response.header("last-modified").map(str::to_string);
        Ok(metadata)
    }

    /// Returns `Ok(true)` if the HEAD request succeeds, whatever metadata it carries.
    ///
    /// A missing object is reported as `S3Error::NotFound`, not `Ok(false)`;
    /// callers wanting a boolean translate it with [`S3Error::is_not_found`].
    pub async fn exists(&self, object: impl ObjectKey) -> Result<bool> {
        self.head(&object).await.map(|_| true)
    }

    /// Object size in bytes
    pub async fn get_size(&self, object: impl ObjectKey) -> Result<u64> {
        Ok(self.head_object(object).await?.size)
    }

    /// Quoted content-tag of the object
    pub async fn get_etag(&self, object: impl ObjectKey) -> Result<String> {
        Ok(self.head_object(object).await?.etag)
    }

    /// Read exactly the bytes `[offset, offset + length)`.
    ///
    /// Range policy is strict: `offset >= size` fails with `Range`, and so
    /// does a range running past the end of the object even when the service
    /// clamps it. Partial data is never returned as success.
    pub async fn read(&self, object: impl ObjectKey, offset: u64, length: u64) -> Result<Bytes> {
        if length == 0 {
            // An empty range cannot be expressed in a Range header
            let size = self.get_size(&object).await?;
            if offset >= size {
                return Err(range_error(offset, length, Some(size)));
            }
            return Ok(Bytes::new());
        }

        let last = offset.checked_add(length - 1).ok_or_else(|| {
            S3Error::Validation(ErrorDetail::local(format!(
                "range offset {offset} + length {length} overflows"
            )))
        })?;

        let url = self.object_url(&object);
        let mut headers = BTreeMap::new();
        headers.insert("range".to_string(), format!("bytes={}-{}", offset, last));

        let response = self
            .execute(Method::GET, url, headers, Bytes::new(), true)
            .await?;

        if response.status == StatusCode::PARTIAL_CONTENT {
            if let Some(content_range) = response.header("content-range") {
                match parse_content_range(content_range) {
                    Some((start, end, _)) if start == offset && end == last => {}
                    Some((_, _, total)) => return Err(range_error(offset, length, total)),
                    None => {
                        return Err(S3Error::InvalidResponse(format!(
                            "unparseable Content-Range: {content_range}"
                        )))
                    }
                }
            }
            if response.body.len() as u64 != length {
                return Err(range_error(offset, length, None));
            }
            return Ok(response.body);
        }

        // The service ignored the Range header and sent the whole object
        let body = response.body;
        let total = body.len() as u64;
        if offset >= total || last >= total {
            return Err(range_error(offset, length, Some(total)));
        }
        Ok(body.slice(offset as usize..=last as usize))
    }

    /// Get the whole object
    pub async fn get_object(&self, object: impl ObjectKey) -> Result<Bytes> {
        let url = self.object_url(&object);
        let response = self
            .execute(Method::GET, url, BTreeMap::new(), Bytes::new(), true)
            .await?;
        Ok(response.body)
    }

    /// Single-shot upload. Returns the service-assigned quoted content-tag.
    pub async fn put_object(&self, key: &str, data: impl Into<Bytes>) -> Result<String> {
        let data = data.into();
        let url = self.build_url(key);

        let mut headers = BTreeMap::new();
        headers.insert(
            "content-type".to_string(),
            "application/octet-stream".to_string(),
        );
        headers.insert("content-length".to_string(), data.len().to_string());
        headers.insert("content-md5".to_string(), Self::content_md5(&data));

        let response = self.execute(Method::PUT, url, headers, data, false).await?;

        let etag = response
            .header("etag")
            .map(etag::quote)
            .ok_or_else(|| S3Error::InvalidResponse("missing ETag header".to_string()))?;
        tracing::debug!(key = %key, etag = %etag, "object uploaded");
        Ok(etag)
    }

    /// Delete an object.
    ///
    /// S3 answers DELETE with 204 whether or not the key existed, so the
    /// object is checked with HEAD first: a missing object fails with `NotFound`.
    pub async fn remove(&self, object: impl ObjectKey) -> Result<bool> {
        self.head(&object).await?;

        let url = self.object_url(&object);
        self.execute(Method::DELETE, url, BTreeMap::new(), Bytes::new(), true)
            .await?;
        tracing::debug!(key = %object.key(), "object removed");
        Ok(true)
    }

    // =========================================================================
    // Multipart Upload Operations
    // =========================================================================

    /// Initiate a multipart upload (CreateMultipartUpload).
    ///
    /// Returns the upload ID that subsequent UploadPart, Complete and Abort
    /// calls must reference.
    pub async fn initiate_multipart_upload(&self, key: &str) -> Result<String> {
        let url = format!("{}?uploads", self.build_url(key));

        let mut headers = BTreeMap::new();
        headers.insert(
            "content-type".to_string(),
            "application/octet-stream".to_string(),
        );

        let response = self
            .execute(Method::POST, url, headers, Bytes::new(), true)
            .await?;
        let upload_id = parse_initiate_response(&response.body)?;

        tracing::info!(key = %key, upload_id = %upload_id, "multipart upload initiated");
        Ok(upload_id)
    }

    /// Upload one part of a multipart upload (UploadPart).
    ///
    /// `part_number` must be within 1..=10000; anything else fails with
    /// `Validation` before a request is sent. Re-uploading a part number
    /// replaces the earlier part.
    pub async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: impl Into<Bytes>,
    ) -> Result<Part> {
        multipart::validate_part_number(part_number)?;
        let data = data.into();
        let size = data.len() as u64;
        let url = self.upload_url(key, upload_id, Some(part_number));

        let mut headers = BTreeMap::new();
        headers.insert("content-length".to_string(), data.len().to_string());
        headers.insert("content-md5".to_string(), Self::content_md5(&data));

        // UNSIGNED-PAYLOAD avoids a SHA256 pass over large parts
        let response = self.execute(Method::PUT, url, headers, data, false).await?;

        let etag = response
            .header("etag")
            .map(etag::quote)
            .ok_or_else(|| {
                S3Error::InvalidResponse(format!("missing ETag for part {}", part_number))
            })?;

        tracing::debug!(
            key = %key,
            upload_id = %upload_id,
            part_number = part_number,
            bytes = size,
            "part uploaded"
        );
        Ok(Part::new(part_number, etag, size))
    }

    /// Complete a multipart upload (CompleteMultipartUpload).
    ///
    /// `parts` must be non-empty and strictly ascending by part number;
    /// otherwise the call fails with `Validation` without contacting the
    /// service.
    pub async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompletedUpload> {
        multipart::validate_completion(parts)?;
        let url = self.upload_url(key, upload_id, None);

        let mut xml = String::with_capacity(parts.len() * 100 + 100);
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
        xml.push_str("<CompleteMultipartUpload>");
        for part in parts {
            xml.push_str("<Part><PartNumber>");
            let _ = write!(xml, "{}", part.part_number);
            xml.push_str("</PartNumber><ETag>");
            xml_escape_into(&mut xml, &etag::quote(&part.etag));
            xml.push_str("</ETag></Part>");
        }
        xml.push_str("</CompleteMultipartUpload>");

        let xml_bytes = Bytes::from(xml.into_bytes());

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/xml".to_string());
        headers.insert("content-length".to_string(), xml_bytes.len().to_string());
        headers.insert("content-md5".to_string(), Self::content_md5(&xml_bytes));

        // XML is small: sign with the actual body hash
        let response = self.execute(Method::POST, url, headers, xml_bytes, true).await?;

        if let Some(err) = error::embedded_error(response.status, &response.body) {
            return Err(err);
        }

        let mut completed = parse_complete_response(&response.body)?;
        if completed.bucket.is_empty() {
            completed.bucket = self.bucket.clone();
        }
        if completed.key.is_empty() {
            completed.key = key.to_string();
        }

        tracing::info!(
            key = %key,
            upload_id = %upload_id,
            parts = parts.len(),
            etag = %completed.etag,
            "multipart upload completed"
        );
        Ok(completed)
    }

    /// Abort a multipart upload (AbortMultipartUpload).
    ///
    /// An upload the service no longer knows, because it was completed,
    /// aborted or never existed, fails with `Conflict`.
    pub async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        let url = self.upload_url(key, upload_id, None);
        self.execute(Method::DELETE, url, BTreeMap::new(), Bytes::new(), true)
            .await?;
        tracing::info!(key = %key, upload_id = %upload_id, "multipart upload aborted");
        Ok(())
    }

    /// Initiate a multipart upload and return a session owning its lifecycle
    pub async fn begin_multipart(&self, key: &str) -> Result<MultipartSession<T>> {
        let upload_id = self.initiate_multipart_upload(key).await?;
        Ok(MultipartSession::new(self.clone(), key.to_string(), upload_id))
    }
}

fn range_error(offset: u64, length: u64, size: Option<u64>) -> S3Error {
    let message = match size {
        Some(size) => format!("bytes {offset}+{length} outside object of {size} bytes"),
        None => format!("service returned a short read for bytes {offset}+{length}"),
    };
    S3Error::Range(ErrorDetail::local(message))
}

/// Parse `bytes <start>-<end>/<total|*>`
fn parse_content_range(value: &str) -> Option<(u64, u64, Option<u64>)> {
    let spec = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = spec.split_once('/')?;
    let (start, end) = range.split_once('-')?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?, total))
}

fn xml_error(err: impl std::fmt::Display) -> S3Error {
    S3Error::InvalidResponse(format!("XML parse error: {}", err))
}

/// Escape XML special characters into an existing buffer (no intermediate allocation)
fn xml_escape_into(buf: &mut String, s: &str) {
    for ch in s.chars() {
        match ch {
            '&' => buf.push_str("&amp;"),
            '<' => buf.push_str("&lt;"),
            '>' => buf.push_str("&gt;"),
            '"' => buf.push_str("&quot;"),
            '\'' => buf.push_str("&apos;"),
            _ => buf.push(ch),
        }
    }
}

/// Parse CreateMultipartUpload XML response, returning the upload ID
fn parse_initiate_response(xml_data: &[u8]) -> Result<String> {
    let mut reader = Reader::from_reader(xml_data);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut upload_id = String::new();
    let mut current_text = String::with_capacity(256);

    loop {
        match reader.read_event() {
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape().map_err(xml_error)?);
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"UploadId" {
                    upload_id = std::mem::take(&mut current_text);
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
    }

    if upload_id.is_empty() {
        return Err(S3Error::InvalidResponse(
            "Missing UploadId in response".to_string(),
        ));
    }
    Ok(upload_id)
}

/// Parse CompleteMultipartUpload XML response
fn parse_complete_response(xml_data: &[u8]) -> Result<CompletedUpload> {
    let mut reader = Reader::from_reader(xml_data);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut location = None;
    let mut bucket = String::new();
    let mut key = String::new();
    let mut etag = String::new();
    let mut current_text = String::with_capacity(256);

    loop {
        match reader.read_event() {
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape().map_err(xml_error)?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Location" => location = Some(std::mem::take(&mut current_text)),
                    b"Bucket" => bucket = std::mem::take(&mut current_text),
                    b"Key" => key = std::mem::take(&mut current_text),
                    b"ETag" => etag = std::mem::take(&mut current_text),
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
    }

    if etag.is_empty() {
        return Err(S3Error::InvalidResponse(
            "Missing ETag in CompleteMultipartUpload response".to_string(),
        ));
    }

    let mut response = CompletedUpload::new(bucket, key, etag::quote(&etag));
    response.location = location;
    Ok(response)
}
