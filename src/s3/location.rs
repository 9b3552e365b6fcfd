//! Object addressing: bucket/key to concrete URL
//!
//! DNS-compatible bucket names with no server override become a subdomain
//! of the default endpoint (virtual-hosted style); everything else renders
//! as a path segment under the configured host (path style). The choice is
//! fixed at construction and stable for the lifetime of the operation.

use std::borrow::Cow;

use crate::config::{ClientConfig, Protocol, DEFAULT_SERVER};
use crate::s3::request::StorageError;

/// Hex lookup table for URI encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Resolved address of one remote object.
#[derive(Debug, Clone)]
pub struct Location {
    bucket: String,
    key: String,
    protocol: Protocol,
    server: Option<String>,
    port: Option<u16>,
}

impl Location {
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let bucket = bucket.into();
        let key = key.into();
        if bucket.is_empty() {
            return Err(StorageError::Validation("bucket must not be empty".into()));
        }
        if key.is_empty() {
            return Err(StorageError::Validation("key must not be empty".into()));
        }

        Ok(Self {
            bucket,
            key,
            protocol: Protocol::default(),
            server: None,
            port: None,
        })
    }

    /// Apply server/protocol/port defaults from a client config.
    pub fn from_config(
        bucket: impl Into<String>,
        key: impl Into<String>,
        config: &ClientConfig,
    ) -> Result<Self, StorageError> {
        let mut location = Self::new(bucket, key)?;
        location.protocol = config.protocol;
        location.server = config.server.clone();
        location.port = config.port;
        Ok(location)
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Point at an explicit server; this forces path-style addressing.
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Address of a stored variant of the same object: the style name is
    /// appended to the base key (`the-key` -> `the-key_thumbnail`).
    pub fn variant(&self, style: &str) -> Location {
        let mut other = self.clone();
        other.key = format!("{}_{}", self.key, style);
        other
    }

    /// Full URL with scheme, host, explicit port, and encoded key path.
    pub fn url(&self) -> String {
        let port = self.port.unwrap_or(self.protocol.default_port());
        let key = Self::encode_key(&self.key);

        if self.virtual_hosted() {
            format!(
                "{}://{}.{}:{}/{}",
                self.protocol, self.bucket, DEFAULT_SERVER, port, key
            )
        } else {
            let server = self.server.as_deref().unwrap_or(DEFAULT_SERVER);
            format!(
                "{}://{}:{}/{}/{}",
                self.protocol, server, port, self.bucket, key
            )
        }
    }

    /// Path used inside the signed string: always `/bucket/key`, raw key,
    /// independent of the addressing style.
    pub fn canonical_resource(&self) -> String {
        format!("/{}/{}", self.bucket, self.key)
    }

    pub fn virtual_hosted(&self) -> bool {
        self.server.is_none() && Self::dns_compatible(&self.bucket)
    }

    /// Valid DNS label: at most 63 chars of lowercase alphanumerics and
    /// hyphens, neither leading nor trailing with a hyphen.
    fn dns_compatible(bucket: &str) -> bool {
        if bucket.is_empty() || bucket.len() > 63 {
            return false;
        }
        if bucket.starts_with('-') || bucket.ends_with('-') {
            return false;
        }
        bucket
            .bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'-'))
    }

    /// Encode a key for the URL path, preserving forward slashes.
    /// Returns Cow::Borrowed when no encoding is needed (common case).
    fn encode_key(key: &str) -> Cow<'_, str> {
        let needs_encoding = key
            .bytes()
            .any(|b| !matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/'));

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
}

/// Encode a string for use in a URL query parameter value (RFC 3986).
/// Writes directly into the target buffer.
pub(crate) fn url_encode_into(buf: &mut String, s: &str) {
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
