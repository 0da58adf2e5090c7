//! Request signing
//!
//! [`RequestSigner`] turns a logical request plus credentials into the header
//! set to send. [`SigV4Signer`] implements AWS Signature Version 4:
//! - Constant empty payload hash (avoids SHA256 for empty bodies)
//! - UNSIGNED-PAYLOAD for large part uploads (skips SHA256 of the body)
//! - Zero-allocation URI encoding (hex lookup table, no format!())
//! - Fixed-size [u8; 32] arrays instead of Vec<u8> for HMAC results
//!
//! Signing is a pure function of its inputs and the timestamp passed in.

use crate::s3::types::Credentials;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

/// Hex lookup table for zero-allocation percent encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// SHA256 of the empty payload
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Payload hash marker for bodies that are not hashed
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// How the request body takes part in the signature
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    Empty,
    /// Body bytes, hashed into the signature
    Bytes(&'a [u8]),
    /// Body of the given length sent without a content hash
    Unsigned(u64),
}

impl Payload<'_> {
    fn hash(&self) -> String {
        match self {
            Payload::Empty => EMPTY_SHA256.to_string(),
            Payload::Bytes(data) if data.is_empty() => EMPTY_SHA256.to_string(),
            Payload::Bytes(data) => hex::encode(Sha256::digest(data)),
            Payload::Unsigned(_) => UNSIGNED_PAYLOAD.to_string(),
        }
    }
}

/// Logical request handed to a signer
#[derive(Debug, Clone)]
pub struct SigningRequest<'a> {
    pub method: &'a str,
    /// Full URL; its path and query must already be percent-encoded
    pub url: &'a str,
    /// Extra headers to sign, lowercase names
    pub headers: BTreeMap<String, String>,
    pub payload: Payload<'a>,
}

/// Produces the authenticated header set for an outgoing request
pub trait RequestSigner: Send + Sync {
    fn sign(
        &self,
        request: SigningRequest<'_>,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> BTreeMap<String, String>;
}

/// AWS Signature Version 4 signer
#[derive(Debug, Clone)]
pub struct SigV4Signer {
    region: String,
    service: String,
}

impl Default for SigV4Signer {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SigV4Signer {
    /// Create a new S3 signer (region defaults to us-east-1)
    pub fn new(region: Option<String>) -> Self {
        Self {
            region: region.unwrap_or_else(|| "us-east-1".to_string()),
            service: "s3".to_string(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Fast URL component extraction without heap allocation.
    ///
    /// Returns (host_with_port, path, query) as `&str` slices into the original URL.
    /// Strips default ports (:443 for https, :80 for http) from the host.
    fn parse_url_fast(url: &str) -> (&str, &str, &str) {
        let after_scheme = if let Some(rest) = url.strip_prefix("https://") {
            rest
        } else if let Some(rest) = url.strip_prefix("http://") {
            rest
        } else {
            url
        };

        let (authority, path_and_query) = match after_scheme.find('/') {
            Some(pos) => (&after_scheme[..pos], &after_scheme[pos..]),
            None => (after_scheme, "/"),
        };

        let (path, query) = match path_and_query.find('?') {
            Some(pos) => (&path_and_query[..pos], &path_and_query[pos + 1..]),
            None => (path_and_query, ""),
        };

        let host = if url.starts_with("https") {
            authority.strip_suffix(":443").unwrap_or(authority)
        } else {
            authority.strip_suffix(":80").unwrap_or(authority)
        };

        (host, path, query)
    }

    /// Create canonical query string (sorted by parameter name)
    ///
    /// Fast path: if all characters are already in canonical form, parameters
    /// are sorted, and all params have `=`, returns as-is.
    /// Valueless params (like `?uploads`) are normalized to `uploads=`.
    fn canonical_query_string(query: &str) -> String {
        if query.is_empty() {
            return String::new();
        }

        let all_canonical = query.bytes().all(|b| {
            matches!(b,
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9'
                | b'-' | b'_' | b'.' | b'~'
                | b'=' | b'&' | b'%'
            )
        });

        if all_canonical {
            let mut sorted = true;
            let mut all_have_equals = true;
            let mut last_key: &str = "";
            for pair in query.split('&') {
                let key = match pair.find('=') {
                    Some(pos) => &pair[..pos],
                    None => {
                        all_have_equals = false;
                        pair
                    }
                };
                if key < last_key {
                    sorted = false;
                    break;
                }
                last_key = key;
            }
            if sorted && all_have_equals {
                return query.to_string();
            }
        }

        // Slow path: decode, re-encode, sort
        let mut params: Vec<(String, String)> = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                let key = urlencoding::decode(key).unwrap_or_else(|_| key.into());
                let value = urlencoding::decode(value).unwrap_or_else(|_| value.into());
                (Self::uri_encode(&key, true), Self::uri_encode(&value, true))
            })
            .collect();

        params.sort_unstable();

        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Canonical headers - keys are lowercase and sorted by BTreeMap
    fn canonical_headers(headers: &BTreeMap<String, String>) -> String {
        let mut result = String::with_capacity(headers.len() * 64);
        for (k, v) in headers {
            result.push_str(k);
            result.push(':');
            result.push_str(v.trim());
            result.push('\n');
        }
        result
    }

    /// Signed headers list, `;`-separated
    fn signed_headers(headers: &BTreeMap<String, String>) -> String {
        headers.keys().map(String::as_str).collect::<Vec<_>>().join(";")
    }

    /// Derive signing key from date stamp (4 chained HMAC operations)
    fn derive_signing_key(&self, secret_key: &str, date_stamp: &str) -> [u8; 32] {
        let aws4_key = format!("AWS4{}", secret_key);
        let k_date = Self::hmac_sha256(aws4_key.as_bytes(), date_stamp.as_bytes());
        let k_region = Self::hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = Self::hmac_sha256(&k_region, self.service.as_bytes());
        Self::hmac_sha256(&k_service, b"aws4_request")
    }

    /// HMAC-SHA256 returning fixed-size array (no heap allocation)
    fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(msg);
        let result = mac.finalize().into_bytes();
        let mut output = [0u8; 32];
        output.copy_from_slice(&result);
        output
    }

    /// URI encode a string (RFC 3986) using hex lookup table
    pub(crate) fn uri_encode(s: &str, encode_slash: bool) -> String {
        let mut result = String::with_capacity(s.len() + 16);
        for byte in s.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    result.push(byte as char);
                }
                b'/' if !encode_slash => {
                    result.push('/');
                }
                _ => {
                    result.push('%');
                    result.push(HEX_UPPER[(byte >> 4) as usize] as char);
                    result.push(HEX_UPPER[(byte & 0xf) as usize] as char);
                }
            }
        }
        result
    }
}

impl RequestSigner for SigV4Signer {
    fn sign(
        &self,
        request: SigningRequest<'_>,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> BTreeMap<String, String> {
        let SigningRequest {
            method,
            url,
            mut headers,
            payload,
        } = request;

        let (host, path, query) = Self::parse_url_fast(url);
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let payload_hash = payload.hash();

        headers.insert("host".to_string(), host.to_string());
        headers.insert("x-amz-date".to_string(), amz_date.clone());
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        if let Payload::Unsigned(len) = payload {
            headers
                .entry("content-length".to_string())
                .or_insert_with(|| len.to_string());
        }

        let canonical_query = Self::canonical_query_string(query);
        let canonical_headers = Self::canonical_headers(&headers);
        let signed_headers = Self::signed_headers(&headers);

        // Path is used as-is: callers hand over an already URI-encoded URL
        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, path, canonical_query, canonical_headers, signed_headers, payload_hash
        );
        tracing::trace!(canonical_request = %canonical_request, "sigv4 canonical request");

        let credential_scope =
            format!("{}/{}/{}/aws4_request", date_stamp, self.region, self.service);
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            credential_scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signing_key = self.derive_signing_key(credentials.secret_key(), &date_stamp);
        let signature = hex::encode(Self::hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM,
            credentials.access_key(),
            credential_scope,
            signed_headers,
            signature
        );
        headers.insert("authorization".to_string(), authorization);

        headers
    }
}
