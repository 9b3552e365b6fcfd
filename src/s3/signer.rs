//! Shared-secret request signing (the classic `AWS <id>:<sig>` scheme)
//!
//! Pure string assembly plus one HMAC-SHA1; no I/O, no state beyond the
//! key pair. The string to sign is
//!
//! ```text
//! METHOD \n Content-MD5 \n Content-Type \n Date-or-Expires \n
//! CanonicalizedAmzHeaders CanonicalizedResource
//! ```
//!
//! The canonicalized resource is always the path-style `/bucket/key`,
//! independent of how the actual request addresses the host. Signing is
//! deterministic: identical inputs yield identical signatures.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::collections::BTreeMap;

use crate::config::Credentials;

type HmacSha1 = Hmac<Sha1>;

/// Header prefix whose entries participate in the canonical string.
pub const AMZ_HEADER_PREFIX: &str = "x-amz-";

/// Signs canonical request strings with a fixed credential pair.
#[derive(Debug, Clone)]
pub struct Signer {
    access_key_id: String,
    secret_access_key: String,
}

impl Signer {
    pub fn new(credentials: &Credentials) -> Self {
        Self {
            access_key_id: credentials.access_key_id.clone(),
            secret_access_key: credentials.secret_access_key.clone(),
        }
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    /// Authorization header value for a dated request.
    pub fn authorization(
        &self,
        method: &str,
        resource: &str,
        headers: &BTreeMap<String, String>,
        date: &str,
    ) -> String {
        format!(
            "AWS {}:{}",
            self.access_key_id,
            self.signature(method, resource, headers, date)
        )
    }

    /// Raw base64 signature for a pre-signed URL. The absolute Unix
    /// `expires` timestamp takes the Date slot in the canonical string.
    pub fn query_signature(
        &self,
        method: &str,
        resource: &str,
        headers: &BTreeMap<String, String>,
        expires: i64,
    ) -> String {
        self.signature(method, resource, headers, &expires.to_string())
    }

    fn signature(
        &self,
        method: &str,
        resource: &str,
        headers: &BTreeMap<String, String>,
        date_or_expires: &str,
    ) -> String {
        let string_to_sign = Self::string_to_sign(method, resource, headers, date_or_expires);
        let mac = Self::hmac_sha1(self.secret_access_key.as_bytes(), string_to_sign.as_bytes());
        BASE64.encode(mac)
    }

    fn string_to_sign(
        method: &str,
        resource: &str,
        headers: &BTreeMap<String, String>,
        date_or_expires: &str,
    ) -> String {
        let content_md5 = Self::header_value(headers, "content-md5");
        let content_type = Self::header_value(headers, "content-type");
        let amz_headers = Self::canonicalized_amz_headers(headers);

        format!("{method}\n{content_md5}\n{content_type}\n{date_or_expires}\n{amz_headers}{resource}")
    }

    /// Case-insensitive single-header lookup.
    fn header_value<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> &'a str {
        headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .unwrap_or("")
    }

    /// Provider headers (`x-amz-*`), lower-cased and sorted by name, each
    /// rendered `name:value\n`. Names that collide after lower-casing have
    /// their values joined by commas.
    fn canonicalized_amz_headers(headers: &BTreeMap<String, String>) -> String {
        let mut amz: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for (name, value) in headers {
            let lower = name.to_ascii_lowercase();
            if lower.starts_with(AMZ_HEADER_PREFIX) {
                amz.entry(lower).or_default().push(value.trim());
            }
        }

        let mut result = String::with_capacity(amz.len() * 32);
        for (name, values) in &amz {
            result.push_str(name);
            result.push(':');
            result.push_str(&values.join(","));
            result.push('\n');
        }
        result
    }

    /// HMAC-SHA1 returning a fixed-size array (no heap allocation)
    fn hmac_sha1(key: &[u8], msg: &[u8]) -> [u8; 20] {
        let mut mac = HmacSha1::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(msg);
        let result = mac.finalize().into_bytes();
        let mut output = [0u8; 20];
        output.copy_from_slice(&result);
        output
    }
}

/// HTTP-date rendering used for the `date` header (RFC 7231 fixdate).
pub fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn signer() -> Signer {
        Signer::new(&Credentials::new("abc", "123"))
    }

    #[test]
    fn test_get_signature_known_answer() {
        let headers = BTreeMap::new();
        let auth = signer().authorization(
            "GET",
            "/bucket/the-key",
            &headers,
            "Thu, 25 Feb 2010 12:06:33 GMT",
        );
        assert_eq!(auth, "AWS abc:3OEcVbE//maUUmqh3A5ETEcr9TE=");
    }

    #[test]
    fn test_delete_signature_known_answer() {
        let headers = BTreeMap::new();
        let auth = signer().authorization(
            "DELETE",
            "/bucket/the-key",
            &headers,
            "Thu, 25 Feb 2010 10:00:00 GMT",
        );
        assert_eq!(auth, "AWS abc:nvkrlq4wor1qbFXZh6rHnAbiRjk=");
    }

    #[test]
    fn test_put_signature_known_answer() {
        let headers = BTreeMap::new();
        let auth = signer().authorization(
            "PUT",
            "/bucket/the-key",
            &headers,
            "Thu, 25 Feb 2010 10:00:00 GMT",
        );
        assert_eq!(auth, "AWS abc:lZMKxGDKcQ1PH8yjbpyN7o2sPWg=");
    }

    #[test]
    fn test_put_signature_includes_amz_headers() {
        let mut headers = BTreeMap::new();
        headers.insert("x-amz-acl".to_string(), "public-read".to_string());

        let auth = signer().authorization(
            "PUT",
            "/bucket/the-key",
            &headers,
            "Thu, 25 Feb 2010 10:00:00 GMT",
        );
        assert_eq!(auth, "AWS abc:cqkfX+nC7WIkYD+yWaUFuoRuePA=");
    }

    #[test]
    fn test_non_amz_headers_stay_out_of_the_canonical_string() {
        // Cache-Control and Expires travel on the wire but are not part of
        // the signed string; only the x-amz-* pair changes the signature.
        let mut headers = BTreeMap::new();
        headers.insert("x-amz-acl".to_string(), "public-read".to_string());
        headers.insert("Cache-Control".to_string(), "max-age=252460800".to_string());
        headers.insert(
            "Expires".to_string(),
            "Fri, 16 Nov 2018 22:09:29 GMT".to_string(),
        );
        headers.insert("x-amz-meta-abc".to_string(), "ABC".to_string());

        let auth = signer().authorization(
            "PUT",
            "/bucket/the-key",
            &headers,
            "Thu, 25 Feb 2010 10:00:00 GMT",
        );
        assert_eq!(auth, "AWS abc:wrPkGKrlwH2AtNzBVS80vU73TDc=");
    }

    #[test]
    fn test_signing_is_deterministic() {
        let mut headers = BTreeMap::new();
        headers.insert("x-amz-meta-tag".to_string(), "v1".to_string());

        let a = signer().authorization("GET", "/b/k", &headers, "Thu, 25 Feb 2010 10:00:00 GMT");
        let b = signer().authorization("GET", "/b/k", &headers, "Thu, 25 Feb 2010 10:00:00 GMT");
        assert_eq!(a, b);
    }

    #[test]
    fn test_canonicalized_amz_headers_sorted_and_joined() {
        let mut headers = BTreeMap::new();
        headers.insert("x-amz-meta-b".to_string(), "2".to_string());
        headers.insert("X-Amz-Meta-A".to_string(), "1".to_string());
        headers.insert("Content-Type".to_string(), "text/plain".to_string());

        let canonical = Signer::canonicalized_amz_headers(&headers);
        assert_eq!(canonical, "x-amz-meta-a:1\nx-amz-meta-b:2\n");
    }

    #[test]
    fn test_query_signature_uses_expires_slot() {
        let headers = BTreeMap::new();
        let sig = signer().query_signature("GET", "/bucket/the-key", &headers, 1288872500);

        // Same inputs through the generic path must agree
        let recomputed = signer().signature("GET", "/bucket/the-key", &headers, "1288872500");
        assert_eq!(sig, recomputed);
    }

    #[test]
    fn test_http_date_format() {
        let time = Utc.with_ymd_and_hms(2010, 2, 25, 10, 0, 0).unwrap();
        assert_eq!(http_date(time), "Thu, 25 Feb 2010 10:00:00 GMT");
    }
}
