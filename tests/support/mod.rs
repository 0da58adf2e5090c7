//! In-memory S3-compatible service for integration tests
//!
//! Speaks the subset of the S3 REST protocol the client uses: HEAD, ranged
//! GET, single-shot PUT, and the four multipart calls. Content-tags are real
//! MD5 digests and completion enforces part order, so tags and error kinds
//! match what a real service reports.

#![allow(dead_code)]

use base64::Engine;
use bytes::Bytes;
use hyper::header::{HeaderMap, HeaderValue};
use hyper::{Method, StatusCode};
use quick_xml::events::Event;
use quick_xml::Reader;
use s3multipart::s3::etag;
use s3multipart::s3::{
    Credentials, HttpRequest, HttpResponse, ObjectClient, Result, S3Error, Transport,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

pub const ENDPOINT: &str = "http://s3.test";
pub const BUCKET: &str = "test-bucket";

/// Install a tracing subscriber honoring RUST_LOG, once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct Upload {
    key: String,
    parts: BTreeMap<u32, (Bytes, String)>,
}

#[derive(Default)]
struct State {
    objects: HashMap<String, (Bytes, String)>,
    uploads: HashMap<String, Upload>,
    next_upload: u64,
    failing_parts: HashSet<u32>,
    requests: Vec<(Method, String)>,
}

/// Shared handle to one in-memory bucket. Clones see the same state.
#[derive(Clone)]
pub struct FakeS3 {
    state: Arc<Mutex<State>>,
    min_part_size: usize,
    ignore_range: bool,
    offline: bool,
    part_gate: Option<Arc<Semaphore>>,
}

impl Default for FakeS3 {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeS3 {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            min_part_size: s3multipart::s3::types::MIN_PART_SIZE,
            ignore_range: false,
            offline: false,
            part_gate: None,
        }
    }

    /// Accept non-final parts smaller than 5 MiB
    pub fn with_min_part_size(mut self, size: usize) -> Self {
        self.min_part_size = size;
        self
    }

    /// Answer ranged GETs with the whole object and 200, like services that ignore Range
    pub fn ignoring_range(mut self) -> Self {
        self.ignore_range = true;
        self
    }

    /// Fail every request at the network level
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    /// Hold every part upload response until the gate hands out a permit.
    /// The part is stored when the request arrives.
    pub fn with_part_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.part_gate = Some(gate);
        self
    }

    /// Answer uploads of this part number with 500 InternalError
    pub fn fail_part(&self, part_number: u32) {
        self.state.lock().unwrap().failing_parts.insert(part_number);
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(key)
            .map(|(data, _)| data.clone())
    }

    pub fn open_uploads(&self) -> usize {
        self.state.lock().unwrap().uploads.len()
    }

    /// Method and URL of every request received, in order
    pub fn requests(&self) -> Vec<(Method, String)> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn count(&self, method: &Method) -> usize {
        self.requests().iter().filter(|(m, _)| m == method).count()
    }

    pub fn client(&self) -> ObjectClient<FakeS3> {
        ObjectClient::new(
            self.clone(),
            Credentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY"),
            ENDPOINT,
            BUCKET,
        )
    }

    fn handle(&self, request: HttpRequest) -> HttpResponse {
        let mut state = self.state.lock().unwrap();
        state
            .requests
            .push((request.method.clone(), request.url.clone()));

        let authorized = request
            .headers
            .get("authorization")
            .is_some_and(|v| v.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
        if !authorized {
            return error(StatusCode::FORBIDDEN, "AccessDenied", "missing signature");
        }

        let Some((bucket, key, query)) = split_url(&request.url) else {
            return error(StatusCode::BAD_REQUEST, "InvalidURI", &request.url);
        };
        if bucket != BUCKET {
            return error(StatusCode::NOT_FOUND, "NoSuchBucket", &bucket);
        }

        let has_uploads = query.contains_key("uploads");
        let upload_id = query.get("uploadId").cloned();
        let part_number = query.get("partNumber").cloned();

        match (request.method.clone(), upload_id, part_number) {
            (Method::POST, None, None) if has_uploads => state.initiate(&key),
            (Method::PUT, Some(id), Some(n)) => self.upload_part(&mut state, &id, &n, &request),
            (Method::POST, Some(id), None) => self.complete(&mut state, &key, &id, &request.body),
            (Method::DELETE, Some(id), None) => match state.uploads.remove(&id) {
                Some(_) => empty(StatusCode::NO_CONTENT),
                None => error(StatusCode::NOT_FOUND, "NoSuchUpload", &id),
            },
            (Method::HEAD, None, None) => match state.objects.get(&key) {
                Some((data, tag)) => {
                    let mut response = empty(StatusCode::OK);
                    set(&mut response, "content-length", &data.len().to_string());
                    set(&mut response, "etag", tag);
                    set(&mut response, "content-type", "application/octet-stream");
                    response
                }
                // HEAD responses carry no body
                None => empty(StatusCode::NOT_FOUND),
            },
            (Method::GET, None, None) => self.get(&state, &key, request.headers.get("range")),
            (Method::PUT, None, None) => {
                if let Some(md5) = request.headers.get("content-md5") {
                    if *md5 != content_md5(&request.body) {
                        return error(StatusCode::BAD_REQUEST, "BadDigest", &key);
                    }
                }
                let tag = etag::content_etag(&request.body);
                state
                    .objects
                    .insert(key, (request.body.clone(), tag.clone()));
                let mut response = empty(StatusCode::OK);
                set(&mut response, "etag", &tag);
                response
            }
            (Method::DELETE, None, None) => {
                state.objects.remove(&key);
                empty(StatusCode::NO_CONTENT)
            }
            _ => error(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed", &request.url),
        }
    }

    fn get(&self, state: &State, key: &str, range: Option<&String>) -> HttpResponse {
        let Some((data, tag)) = state.objects.get(key) else {
            return error(StatusCode::NOT_FOUND, "NoSuchKey", key);
        };

        let requested = range.and_then(|r| parse_range(r));
        let Some((start, end)) = requested.filter(|_| !self.ignore_range) else {
            let mut response = body(StatusCode::OK, data.clone());
            set(&mut response, "etag", tag);
            return response;
        };

        let size = data.len() as u64;
        if start >= size {
            return error(StatusCode::RANGE_NOT_SATISFIABLE, "InvalidRange", key);
        }
        let end = end.min(size - 1);

        let mut response = body(
            StatusCode::PARTIAL_CONTENT,
            data.slice(start as usize..=end as usize),
        );
        set(
            &mut response,
            "content-range",
            &format!("bytes {}-{}/{}", start, end, size),
        );
        set(&mut response, "etag", tag);
        response
    }

    fn upload_part(
        &self,
        state: &mut State,
        upload_id: &str,
        part_number: &str,
        request: &HttpRequest,
    ) -> HttpResponse {
        let Ok(part_number) = part_number.parse::<u32>() else {
            return error(StatusCode::BAD_REQUEST, "InvalidArgument", part_number);
        };
        if state.failing_parts.contains(&part_number) {
            return error(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", "injected");
        }
        let Some(upload) = state.uploads.get_mut(upload_id) else {
            return error(StatusCode::NOT_FOUND, "NoSuchUpload", upload_id);
        };
        if let Some(md5) = request.headers.get("content-md5") {
            if *md5 != content_md5(&request.body) {
                return error(StatusCode::BAD_REQUEST, "BadDigest", upload_id);
            }
        }

        let tag = etag::content_etag(&request.body);
        upload
            .parts
            .insert(part_number, (request.body.clone(), tag.clone()));

        let mut response = empty(StatusCode::OK);
        set(&mut response, "etag", &tag);
        response
    }

    fn complete(&self, state: &mut State, key: &str, upload_id: &str, xml: &[u8]) -> HttpResponse {
        let Some(upload) = state.uploads.get(upload_id) else {
            return error(StatusCode::NOT_FOUND, "NoSuchUpload", upload_id);
        };
        if upload.key != key {
            return error(StatusCode::NOT_FOUND, "NoSuchUpload", upload_id);
        }
        let Some(listed) = parse_part_list(xml) else {
            return error(StatusCode::BAD_REQUEST, "MalformedXML", upload_id);
        };
        if listed.is_empty() {
            return error(StatusCode::BAD_REQUEST, "MalformedXML", "no parts");
        }
        if listed.windows(2).any(|w| w[0].0 >= w[1].0) {
            return error(StatusCode::BAD_REQUEST, "InvalidPartOrder", upload_id);
        }

        let mut content = Vec::new();
        let mut tags = Vec::new();
        for (index, (number, tag)) in listed.iter().enumerate() {
            let Some((data, stored)) = upload.parts.get(number) else {
                return error(StatusCode::BAD_REQUEST, "InvalidPart", &number.to_string());
            };
            if etag::unquote(stored) != etag::unquote(tag) {
                return error(StatusCode::BAD_REQUEST, "InvalidPart", &number.to_string());
            }
            if index + 1 < listed.len() && data.len() < self.min_part_size {
                return error(StatusCode::BAD_REQUEST, "EntityTooSmall", &number.to_string());
            }
            content.extend_from_slice(data);
            tags.push(stored.clone());
        }

        // Independent of the client's helper: md5 over the raw part digests
        let mut digests = Vec::new();
        for tag in &tags {
            digests.extend(hex::decode(etag::unquote(tag)).unwrap());
        }
        let tag = format!("\"{:x}-{}\"", md5::compute(&digests), tags.len());

        state.uploads.remove(upload_id);
        state
            .objects
            .insert(key.to_string(), (Bytes::from(content), tag.clone()));

        let xml = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <CompleteMultipartUploadResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
             <Location>{ENDPOINT}/{BUCKET}/{key}</Location><Bucket>{BUCKET}</Bucket>\
             <Key>{key}</Key><ETag>{}</ETag></CompleteMultipartUploadResult>",
            tag.replace('"', "&quot;")
        );
        body(StatusCode::OK, Bytes::from(xml))
    }
}

impl State {
    fn initiate(&mut self, key: &str) -> HttpResponse {
        self.next_upload += 1;
        let upload_id = format!("upload-{}", self.next_upload);
        self.uploads.insert(
            upload_id.clone(),
            Upload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        let xml = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <InitiateMultipartUploadResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
             <Bucket>{BUCKET}</Bucket><Key>{key}</Key><UploadId>{upload_id}</UploadId>\
             </InitiateMultipartUploadResult>"
        );
        body(StatusCode::OK, Bytes::from(xml))
    }
}

impl Transport for FakeS3 {
    fn send(&self, request: HttpRequest) -> impl Future<Output = Result<HttpResponse>> + Send {
        let gate = self
            .part_gate
            .clone()
            .filter(|_| request.method == Method::PUT && request.url.contains("partNumber="));
        let result = if self.offline {
            Err(S3Error::Transport("connection refused".to_string()))
        } else {
            Ok(self.handle(request))
        };
        async move {
            if let Some(gate) = gate {
                let _permit = gate.acquire().await;
            }
            result
        }
    }
}

fn content_md5(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(md5::compute(data).0)
}

/// Split `<endpoint>/<bucket>/<key>?<query>` into decoded parts
fn split_url(url: &str) -> Option<(String, String, HashMap<String, String>)> {
    let path = url.strip_prefix(ENDPOINT)?.strip_prefix('/')?;
    let (path, query) = path.split_once('?').unwrap_or((path, ""));
    let (bucket, key) = path.split_once('/').unwrap_or((path, ""));

    let mut params = HashMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.insert(
            name.to_string(),
            urlencoding::decode(value).ok()?.into_owned(),
        );
    }

    Some((
        bucket.to_string(),
        urlencoding::decode(key).ok()?.into_owned(),
        params,
    ))
}

/// Parse `bytes=<start>-<end>`
fn parse_range(value: &str) -> Option<(u64, u64)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

fn parse_part_list(xml: &[u8]) -> Option<Vec<(u32, String)>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut parts = Vec::new();
    let mut number = None;
    let mut tag = None;
    let mut text = String::new();
    loop {
        match reader.read_event().ok()? {
            Event::Text(e) => text = e.unescape().ok()?.into_owned(),
            Event::End(e) => {
                match e.local_name().as_ref() {
                    b"PartNumber" => number = Some(text.parse().ok()?),
                    b"ETag" => tag = Some(std::mem::take(&mut text)),
                    b"Part" => parts.push((number.take()?, tag.take()?)),
                    _ => {}
                }
                text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Some(parts)
}

fn empty(status: StatusCode) -> HttpResponse {
    body(status, Bytes::new())
}

fn body(status: StatusCode, body: Bytes) -> HttpResponse {
    HttpResponse {
        status,
        headers: HeaderMap::new(),
        body,
    }
}

fn set(response: &mut HttpResponse, name: &'static str, value: &str) {
    response
        .headers
        .insert(name, HeaderValue::from_str(value).unwrap());
}

fn error(status: StatusCode, code: &str, message: &str) -> HttpResponse {
    let xml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <Error><Code>{code}</Code><Message>{message}</Message>\
         <RequestId>fake-request</RequestId></Error>"
    );
    body(status, Bytes::from(xml))
}
