//! Per-object handle: composes a resolved [`Location`] with an optional
//! [`Signer`] and exposes the object operations, each producing one
//! [`Request`]. Link construction (`url`, `expiring_url`) never touches
//! the network.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hyper::{Method, StatusCode};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ClientConfig, Credentials, Protocol, SslOptions, SslOverride};
use crate::s3::location::{url_encode_into, Location};
use crate::s3::request::{Request, RequestSpec, Response, Result, StorageError};
use crate::s3::signer::{self, Signer, AMZ_HEADER_PREFIX};
use crate::transport::{Body, Transport};

/// Item-level settings layered over the client config at construction.
#[derive(Debug, Clone, Default)]
pub struct ItemOptions {
    pub credentials: Option<Credentials>,
    pub server: Option<String>,
    pub protocol: Option<Protocol>,
    pub port: Option<u16>,
    /// Canned ACL sent as `x-amz-acl` on writes
    pub permissions: Option<String>,
    pub ssl: SslOverride,
    pub timeout: Option<Duration>,
    pub retry_budget: Option<u32>,
}

/// Per-call settings layered over the item at operation time.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Extra headers, passed through verbatim after validation
    pub headers: BTreeMap<String, String>,
    pub ssl: SslOverride,
    pub timeout: Option<Duration>,
    pub retry_budget: Option<u32>,
    /// Content-Type for uploads
    pub content_type: Option<String>,
    /// Compute and attach a Content-MD5 header (in-memory bodies only)
    pub content_md5: bool,
}

/// Handle on one remote object. Location and credentials are fixed at
/// construction; every operation builds a fresh signed request.
#[derive(Clone)]
pub struct Item {
    location: Location,
    signer: Option<Signer>,
    permissions: Option<String>,
    ssl: SslOptions,
    timeout: Duration,
    retry_budget: u32,
    retry_delay: Duration,
    transport: Arc<dyn Transport>,
}

impl Item {
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        config: &ClientConfig,
        options: ItemOptions,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let mut location = Location::from_config(bucket, key, config)?;
        if let Some(server) = options.server {
            location = location.with_server(server);
        }
        if let Some(protocol) = options.protocol {
            location = location.with_protocol(protocol);
        }
        if let Some(port) = options.port {
            location = location.with_port(port);
        }

        Ok(Self {
            location,
            signer: options.credentials.as_ref().map(Signer::new),
            permissions: options.permissions,
            ssl: options.ssl.apply(&config.ssl),
            timeout: options.timeout.unwrap_or_else(|| config.timeout()),
            retry_budget: options.retry_budget.unwrap_or(config.retry_budget),
            retry_delay: config.retry_delay(),
            transport,
        })
    }

    /// Handle on a stored variant of this object (`key_<style>`).
    pub fn variant(&self, style: &str) -> Item {
        let mut other = self.clone();
        other.location = self.location.variant(style);
        other
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Plain URL of the object, no network call.
    pub fn url(&self) -> String {
        self.location.url()
    }

    /// Time-limited pre-signed URL. The signature travels as query
    /// parameters, so the link works without an Authorization header.
    pub fn expiring_url(&self, expires_at: DateTime<Utc>) -> Result<String> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            StorageError::Validation("expiring_url requires credentials".to_string())
        })?;

        let expires = expires_at.timestamp();
        let signature = signer.query_signature(
            "GET",
            &self.location.canonical_resource(),
            &BTreeMap::new(),
            expires,
        );

        let mut url = self.location.url();
        url.push_str("?AWSAccessKeyId=");
        url_encode_into(&mut url, signer.access_key_id());
        url.push_str("&Expires=");
        url.push_str(&expires.to_string());
        url.push_str("&Signature=");
        url_encode_into(&mut url, &signature);
        Ok(url)
    }

    /// Fetch the object, buffering the body.
    pub async fn get(&self) -> Result<Response> {
        self.get_with(RequestOptions::default()).await
    }

    pub async fn get_with(&self, options: RequestOptions) -> Result<Response> {
        self.request(Method::GET, Body::Empty, options)?.execute().await
    }

    /// Fetch the object, delivering body chunks to `sink` as they arrive.
    pub async fn get_streaming<F>(&self, mut sink: F) -> Result<Response>
    where
        F: FnMut(Bytes) + Send,
    {
        self.request(Method::GET, Body::Empty, RequestOptions::default())?
            .execute_streaming(&mut sink)
            .await
    }

    /// Upload an in-memory body.
    pub async fn put(&self, data: impl Into<Bytes>) -> Result<Response> {
        self.put_with(data, RequestOptions::default()).await
    }

    pub async fn put_with(&self, data: impl Into<Bytes>, options: RequestOptions) -> Result<Response> {
        self.request(Method::PUT, Body::Bytes(data.into()), options)?
            .execute()
            .await
    }

    /// Upload a file from disk (read at submit time, sent as one body).
    pub async fn put_file(&self, path: impl Into<PathBuf>, options: RequestOptions) -> Result<Response> {
        self.request(Method::PUT, Body::File(path.into()), options)?
            .execute()
            .await
    }

    /// Load the object headers.
    pub async fn head(&self) -> Result<Response> {
        self.head_with(RequestOptions::default()).await
    }

    pub async fn head_with(&self, options: RequestOptions) -> Result<Response> {
        self.request(Method::HEAD, Body::Empty, options)?.execute().await
    }

    /// Delete the object.
    pub async fn delete(&self) -> Result<Response> {
        self.delete_with(RequestOptions::default()).await
    }

    pub async fn delete_with(&self, options: RequestOptions) -> Result<Response> {
        self.request(Method::DELETE, Body::Empty, options)?
            .execute()
            .await
    }

    /// Probe the object: 2xx means present, a terminal 404 means absent,
    /// anything else is surfaced as the error it is.
    pub async fn exists(&self) -> Result<bool> {
        match self.head().await {
            Ok(_) => Ok(true),
            Err(StorageError::Response { status, .. }) if status == StatusCode::NOT_FOUND => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Assemble the signed request for one operation.
    fn request(&self, method: Method, body: Body, options: RequestOptions) -> Result<Request> {
        let headers = self.build_headers(&method, &body, &options)?;

        let spec = RequestSpec {
            method,
            url: self.location.url(),
            headers,
            body,
            ssl: options.ssl.apply(&self.ssl),
            timeout: options.timeout.unwrap_or(self.timeout),
            retry_budget: options.retry_budget.unwrap_or(self.retry_budget),
            retry_delay: self.retry_delay,
        };

        Ok(Request::new(spec, Arc::clone(&self.transport)))
    }

    fn build_headers(
        &self,
        method: &Method,
        body: &Body,
        options: &RequestOptions,
    ) -> Result<BTreeMap<String, String>> {
        let mut headers = BTreeMap::new();

        for (name, value) in &options.headers {
            validate_header_name(name)?;
            headers.insert(name.clone(), value.clone());
        }

        if let Some(acl) = &self.permissions {
            if *method == Method::PUT {
                headers.insert("x-amz-acl".to_string(), acl.clone());
            }
        }

        if let Some(content_type) = &options.content_type {
            headers.insert("content-type".to_string(), content_type.clone());
        }

        if options.content_md5 {
            let Body::Bytes(data) = body else {
                return Err(StorageError::Validation(
                    "content_md5 requires an in-memory body".to_string(),
                ));
            };
            let digest = md5::compute(data);
            headers.insert("content-md5".to_string(), BASE64.encode(&digest[..]));
        }

        // Anonymous items send no Authorization and no date
        if let Some(signer) = &self.signer {
            let date = signer::http_date(Utc::now());
            let authorization = signer.authorization(
                method.as_str(),
                &self.location.canonical_resource(),
                &headers,
                &date,
            );
            headers.insert("authorization".to_string(), authorization);
            headers.insert("date".to_string(), date);
        }

        Ok(headers)
    }
}

/// Accept provider metadata headers (`x-amz-*`, lower-case) and standard
/// headers in canonical `Token-Token` casing. Everything else is rejected
/// before any network activity.
fn validate_header_name(name: &str) -> Result<()> {
    if name.to_ascii_lowercase().starts_with(AMZ_HEADER_PREFIX) {
        // Provider headers are conventionally all lower-case on the wire
        let rest = name.strip_prefix(AMZ_HEADER_PREFIX).unwrap_or("");
        let valid = !rest.is_empty()
            && rest
                .bytes()
                .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'-'));
        if valid {
            return Ok(());
        }
        return Err(StorageError::Validation(format!(
            "invalid header name: {name}"
        )));
    }

    let canonical = !name.is_empty()
        && name.split('-').all(|token| {
            let mut bytes = token.bytes();
            match bytes.next() {
                Some(b'A'..=b'Z') => bytes.all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9')),
                _ => false,
            }
        });

    if canonical {
        Ok(())
    } else {
        Err(StorageError::Validation(format!(
            "invalid header name: {name}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_name_validation() {
        assert!(validate_header_name("Cache-Control").is_ok());
        assert!(validate_header_name("Expires").is_ok());
        assert!(validate_header_name("x-amz-acl").is_ok());
        assert!(validate_header_name("x-amz-meta-abc").is_ok());

        assert!(validate_header_name("expires").is_err());
        assert!(validate_header_name("cache_control").is_err());
        assert!(validate_header_name("x-amz-").is_err());
        assert!(validate_header_name("X-Amz-Acl").is_err());
        assert!(validate_header_name("").is_err());
    }
}
