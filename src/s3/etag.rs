//! Content-tag (ETag) helpers
//!
//! Single-shot objects carry the quoted hex MD5 of their bytes. Multipart
//! objects carry the MD5 of the concatenated binary part digests, suffixed
//! with `-<part count>`: `"<32 hex chars>-<n>"`.

use crate::s3::error::{ErrorDetail, Result, S3Error};

/// Hex-encoded MD5 of `data`
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Quoted hex MD5 of `data`, the content-tag of a single-shot upload
pub fn content_etag(data: &[u8]) -> String {
    quote(&md5_hex(data))
}

/// Wrap a tag in double quotes unless it already is
pub fn quote(etag: &str) -> String {
    format!("\"{}\"", unquote(etag))
}

/// Strip surrounding double quotes (and a weak `W/` prefix)
pub fn unquote(etag: &str) -> &str {
    etag.trim().trim_start_matches("W/").trim_matches('"')
}

/// Decode a plain (non-multipart) content-tag into its 16-byte digest
pub fn digest(etag: &str) -> Option<[u8; 16]> {
    let hex_str = unquote(etag);
    if hex_str.len() != 32 {
        return None;
    }
    let mut out = [0u8; 16];
    hex::decode_to_slice(hex_str, &mut out).ok()?;
    Some(out)
}

/// Part count encoded in a multipart content-tag, `None` for plain tags
pub fn part_count(etag: &str) -> Option<usize> {
    let (hex_str, count) = unquote(etag).rsplit_once('-')?;
    if hex_str.len() != 32 || !hex_str.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    count.parse().ok()
}

/// Compute the content-tag a completed multipart upload must carry.
///
/// `part_etags` are the part content-tags in ascending part-number order.
/// Fails with a validation error if any tag is not a plain MD5 tag.
pub fn multipart_etag<I, S>(part_etags: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut combined = Vec::new();
    let mut count = 0usize;
    for etag in part_etags {
        let etag = etag.as_ref();
        let part_digest = digest(etag).ok_or_else(|| {
            S3Error::Validation(ErrorDetail::local(format!(
                "part content-tag {etag} is not an MD5 digest"
            )))
        })?;
        combined.extend_from_slice(&part_digest);
        count += 1;
    }
    Ok(format!("\"{}-{}\"", md5_hex(&combined), count))
}
