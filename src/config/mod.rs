use crate::s3::transport::TransportConfig;
use crate::s3::types::{Credentials, UploadConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Connection settings for one bucket on an S3-compatible service
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Service endpoint URL, e.g. `https://s3.example.com`
    pub endpoint: String,

    /// Bucket every operation targets
    pub bucket: String,

    /// AWS access key ID
    pub access_key: String,

    /// AWS secret access key
    pub secret_key: String,

    /// AWS region (default: us-east-1)
    #[serde(default = "default_region")]
    pub region: String,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Disable certificate verification
    #[serde(default)]
    pub insecure_tls: bool,

    /// Chunked upload settings
    #[serde(default)]
    pub multipart: UploadConfig,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .field("request_timeout", &self.request_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("insecure_tls", &self.insecure_tls)
            .field("multipart", &self.multipart)
            .finish()
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    10
}

impl ClientConfig {
    /// Configuration with default timeouts and upload settings
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: default_region(),
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            insecure_tls: false,
            multipart: UploadConfig::default(),
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.access_key.clone(), self.secret_key.clone())
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            request_timeout: Duration::from_secs(self.request_timeout),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            insecure_tls: self.insecure_tls,
            ..TransportConfig::default()
        }
    }

    /// Upload settings with the part size clamped to the service minimum
    pub fn upload_config(&self) -> UploadConfig {
        self.multipart
            .clone()
            .with_part_size(self.multipart.part_size)
            .with_concurrency(self.multipart.concurrency)
    }
}

/// Prefix a bare host with `https://`
fn normalize_endpoint(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<ClientConfig> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let mut config: ClientConfig =
        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;
    config.endpoint = normalize_endpoint(&config.endpoint);

    Ok(config)
}

/// Load configuration from environment variables
///
/// - S3HOST (endpoint URL or bare host; bare hosts get https://)
/// - S3ACCESSKEY
/// - S3SECRETKEY
/// - S3BUCKET
/// - S3REGION (optional, defaults to us-east-1)
/// - S3TIMEOUT (optional request timeout in seconds)
pub fn load_from_env() -> Result<ClientConfig> {
    // Try to load .env file if it exists (don't fail if it doesn't)
    let _ = dotenvy::dotenv();

    let host = std::env::var("S3HOST").context("S3HOST environment variable not set")?;
    if host.trim().is_empty() {
        anyhow::bail!("S3HOST is empty");
    }

    let access_key =
        std::env::var("S3ACCESSKEY").context("S3ACCESSKEY environment variable not set")?;
    let secret_key =
        std::env::var("S3SECRETKEY").context("S3SECRETKEY environment variable not set")?;
    let bucket = std::env::var("S3BUCKET").context("S3BUCKET environment variable not set")?;

    let mut config = ClientConfig::new(normalize_endpoint(&host), bucket, access_key, secret_key);

    if let Ok(region) = std::env::var("S3REGION") {
        config.region = region;
    }

    if let Ok(timeout) = std::env::var("S3TIMEOUT") {
        config.request_timeout = timeout
            .parse()
            .context(format!("S3TIMEOUT is not a number of seconds: {}", timeout))?;
    }

    Ok(config)
}

/// Load configuration from a YAML file if given, otherwise from the environment
pub fn load_config(config_path: Option<&str>) -> Result<ClientConfig> {
    match config_path {
        Some(path) => load_from_yaml(path),
        None => load_from_env(),
    }
}
