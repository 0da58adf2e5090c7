//! HTTP transport
//!
//! [`Transport`] is the seam between the protocol client and the network.
//! [`HyperTransport`] is the production implementation:
//! - HTTP/1.1 only (S3 workloads gain nothing from HTTP/2 multiplexing)
//! - Pooled keep-alive connections shared by every clone
//! - TCP_NODELAY for low latency
//! - native-tls (OpenSSL) for TLS
//! - Per-request timeout covering the whole exchange, body included

use crate::s3::error::{ErrorDetail, Result, S3Error};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::HeaderMap;
use hyper::{Method, Request, StatusCode};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use native_tls::TlsConnector;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

/// A fully signed request ready to send
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    /// Lowercase header names
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

/// Status, headers and collected body of a response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    /// Header value as a string, if present and valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Sends one request and returns the complete response.
///
/// Implementations report network-level failures (connect, reset, timeout)
/// as [`S3Error::Transport`] and return every HTTP response, whatever its
/// status, as `Ok`.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: HttpRequest) -> impl Future<Output = Result<HttpResponse>> + Send;
}

/// Connection and timeout settings for [`HyperTransport`]
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Deadline for one request/response exchange
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub pool_idle_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    /// Skip certificate verification (test endpoints only)
    pub insecure_tls: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 256,
            insecure_tls: false,
        }
    }
}

/// Pooled hyper client.
///
/// Clone is cheap - the underlying HTTP client uses Arc internally.
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    request_timeout: Duration,
}

impl HyperTransport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.enforce_http(false);
        http.set_connect_timeout(Some(config.connect_timeout));
        http.set_keepalive(Some(config.pool_idle_timeout));

        let tls = if config.insecure_tls {
            tracing::warn!("INSECURE TLS MODE ENABLED: Certificate verification is disabled!");
            TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
        } else {
            TlsConnector::new()
        }
        .map_err(|e| S3Error::Transport(format!("failed to build TLS connector: {}", e)))?;

        let https = HttpsConnector::from((http, tls.into()));

        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .set_host(true)
            .build(https);

        Ok(Self {
            client,
            request_timeout: config.request_timeout,
        })
    }

    async fn exchange(&self, request: Request<Full<Bytes>>) -> Result<HttpResponse> {
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| S3Error::Transport(format!("request failed: {}", e)))?;

        let (parts, body) = response.into_parts();
        // Always drain the body so the connection returns to the pool
        let body = body
            .collect()
            .await
            .map_err(|e| S3Error::Transport(format!("body error: {}", e)))?
            .to_bytes();

        Ok(HttpResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

impl Transport for HyperTransport {
    fn send(&self, request: HttpRequest) -> impl Future<Output = Result<HttpResponse>> + Send {
        async move {
            let mut req = Request::builder().method(request.method).uri(&request.url);
            for (key, value) in request.headers.iter() {
                req = req.header(key, value);
            }
            let req = req.body(Full::new(request.body)).map_err(|e| {
                S3Error::Validation(ErrorDetail::local(format!("request build error: {}", e)))
            })?;

            match tokio::time::timeout(self.request_timeout, self.exchange(req)).await {
                Ok(result) => result,
                Err(_) => Err(S3Error::Transport(format!(
                    "request timed out after {:?}",
                    self.request_timeout
                ))),
            }
        }
    }
}
