//! Error taxonomy and response classification
//!
//! Every non-success outcome surfaces as exactly one [`S3Error`] variant.
//! The status code decides the kind; a handful of S3 error codes found in
//! the response body refine it (an upload that was aborted answers
//! `NoSuchUpload`, which is a terminal-state conflict for this client).

use crate::s3::transport::HttpResponse;
use hyper::StatusCode;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fmt;
use thiserror::Error;

/// Details of a failed operation.
///
/// `status` is `None` when the client rejected the operation itself without
/// sending a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    pub status: Option<StatusCode>,
    /// S3 error code from the response body, e.g. `NoSuchKey`
    pub code: Option<String>,
    pub message: String,
    pub request_id: Option<String>,
}

impl ErrorDetail {
    /// Detail for an error detected locally, before or after the exchange
    pub fn local(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            request_id: None,
        }
    }

    /// Build from a service response, parsing the `<Error>` document if present
    pub fn from_response(status: StatusCode, body: &[u8]) -> Self {
        match parse_error_document(body) {
            Some(doc) => Self {
                status: Some(status),
                message: doc
                    .message
                    .or_else(|| doc.code.clone())
                    .unwrap_or_else(|| canonical_reason(status)),
                code: doc.code,
                request_id: doc.request_id,
            },
            None => {
                let text = String::from_utf8_lossy(body).trim().to_string();
                Self {
                    status: Some(status),
                    code: None,
                    message: if text.is_empty() { canonical_reason(status) } else { text },
                    request_id: None,
                }
            }
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status {
            write!(f, "{} ", status.as_u16())?;
        }
        if let Some(code) = &self.code {
            write!(f, "{code}: ")?;
        }
        f.write_str(&self.message)
    }
}

fn canonical_reason(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or("unknown status").to_string()
}

/// Error kind, one per taxonomy entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Range,
    Conflict,
    Validation,
    Auth,
    Server,
    Request,
    Transport,
    InvalidResponse,
}

/// S3 client errors
#[derive(Error, Debug)]
pub enum S3Error {
    #[error("not found: {0}")]
    NotFound(ErrorDetail),

    #[error("range not satisfiable: {0}")]
    Range(ErrorDetail),

    #[error("conflict: {0}")]
    Conflict(ErrorDetail),

    #[error("validation error: {0}")]
    Validation(ErrorDetail),

    #[error("access denied: {0}")]
    Auth(ErrorDetail),

    #[error("server error: {0}")]
    Server(ErrorDetail),

    /// Any other non-success status
    #[error("request failed: {0}")]
    Request(ErrorDetail),

    /// Network-level failure: connect, reset, timeout
    #[error("transport error: {0}")]
    Transport(String),

    /// A success response that could not be interpreted
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, S3Error>;

impl S3Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            S3Error::NotFound(_) => ErrorKind::NotFound,
            S3Error::Range(_) => ErrorKind::Range,
            S3Error::Conflict(_) => ErrorKind::Conflict,
            S3Error::Validation(_) => ErrorKind::Validation,
            S3Error::Auth(_) => ErrorKind::Auth,
            S3Error::Server(_) => ErrorKind::Server,
            S3Error::Request(_) => ErrorKind::Request,
            S3Error::Transport(_) => ErrorKind::Transport,
            S3Error::InvalidResponse(_) => ErrorKind::InvalidResponse,
        }
    }

    /// Service-side detail, absent for transport and decoding failures
    pub fn detail(&self) -> Option<&ErrorDetail> {
        match self {
            S3Error::NotFound(d)
            | S3Error::Range(d)
            | S3Error::Conflict(d)
            | S3Error::Validation(d)
            | S3Error::Auth(d)
            | S3Error::Server(d)
            | S3Error::Request(d) => Some(d),
            S3Error::Transport(_) | S3Error::InvalidResponse(_) => None,
        }
    }

    /// HTTP status that produced this error, if any
    pub fn status(&self) -> Option<StatusCode> {
        self.detail().and_then(|d| d.status)
    }

    /// S3 error code that produced this error, if any
    pub fn code(&self) -> Option<&str> {
        self.detail().and_then(|d| d.code.as_deref())
    }

    /// Server and transport failures may succeed when retried; nothing else will
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Server | ErrorKind::Transport)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Pass a success response through, or turn it into the matching error
pub fn classify(response: HttpResponse) -> Result<HttpResponse> {
    if response.status.is_success() {
        return Ok(response);
    }
    Err(error_for(response.status, &response.body))
}

/// Map a failed status and its body to an error
pub fn error_for(status: StatusCode, body: &[u8]) -> S3Error {
    from_detail(ErrorDetail::from_response(status, body))
}

/// Detect an `<Error>` document delivered with a success status.
///
/// CompleteMultipartUpload can fail after the service has already sent
/// `200 OK`; the failure then arrives in the body.
pub fn embedded_error(status: StatusCode, body: &[u8]) -> Option<S3Error> {
    let doc = parse_error_document(body)?;
    let detail = ErrorDetail {
        status: Some(status),
        message: doc
            .message
            .or_else(|| doc.code.clone())
            .unwrap_or_else(|| "error document in success response".to_string()),
        code: doc.code,
        request_id: doc.request_id,
    };
    Some(match code_kind(detail.code.as_deref()) {
        Some(kind) => with_kind(kind, detail),
        // Late failures are service-side by definition
        None => S3Error::Server(detail),
    })
}

fn from_detail(detail: ErrorDetail) -> S3Error {
    let kind = code_kind(detail.code.as_deref())
        .or_else(|| detail.status.map(status_kind))
        .unwrap_or(ErrorKind::Request);
    with_kind(kind, detail)
}

fn code_kind(code: Option<&str>) -> Option<ErrorKind> {
    match code? {
        "NoSuchUpload" => Some(ErrorKind::Conflict),
        "InvalidRange" => Some(ErrorKind::Range),
        "NoSuchKey" | "NoSuchBucket" => Some(ErrorKind::NotFound),
        "InvalidPart" | "InvalidPartOrder" | "EntityTooSmall" => Some(ErrorKind::Validation),
        "InternalError" | "SlowDown" | "ServiceUnavailable" => Some(ErrorKind::Server),
        _ => None,
    }
}

fn status_kind(status: StatusCode) -> ErrorKind {
    match status.as_u16() {
        404 => ErrorKind::NotFound,
        416 => ErrorKind::Range,
        409 => ErrorKind::Conflict,
        400 => ErrorKind::Validation,
        401 | 403 => ErrorKind::Auth,
        500..=599 => ErrorKind::Server,
        _ => ErrorKind::Request,
    }
}

fn with_kind(kind: ErrorKind, detail: ErrorDetail) -> S3Error {
    match kind {
        ErrorKind::NotFound => S3Error::NotFound(detail),
        ErrorKind::Range => S3Error::Range(detail),
        ErrorKind::Conflict => S3Error::Conflict(detail),
        ErrorKind::Validation => S3Error::Validation(detail),
        ErrorKind::Auth => S3Error::Auth(detail),
        ErrorKind::Server => S3Error::Server(detail),
        ErrorKind::Request => S3Error::Request(detail),
        ErrorKind::Transport => S3Error::Transport(detail.to_string()),
        ErrorKind::InvalidResponse => S3Error::InvalidResponse(detail.to_string()),
    }
}

#[derive(Debug, Default)]
struct ErrorDocument {
    code: Option<String>,
    message: Option<String>,
    request_id: Option<String>,
}

/// Parse an S3 `<Error>` document. Returns `None` unless the root element is `Error`.
fn parse_error_document(body: &[u8]) -> Option<ErrorDocument> {
    if body.is_empty() {
        return None;
    }

    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut doc = ErrorDocument::default();
    let mut seen_root = false;
    let mut current_text = String::with_capacity(128);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if !seen_root {
                    if e.local_name().as_ref() != b"Error" {
                        return None;
                    }
                    seen_root = true;
                }
            }
            Ok(Event::Empty(e)) if !seen_root => {
                if e.local_name().as_ref() != b"Error" {
                    return None;
                }
                seen_root = true;
            }
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape().ok()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Code" => doc.code = Some(std::mem::take(&mut current_text)),
                    b"Message" => doc.message = Some(std::mem::take(&mut current_text)),
                    b"RequestId" => doc.request_id = Some(std::mem::take(&mut current_text)),
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
    }

    seen_root.then_some(doc)
}
