use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default storage endpoint when no server override is configured.
pub const DEFAULT_SERVER: &str = "s3.amazonaws.com";

/// Wire protocol for object URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    /// Default port for the scheme (80 / 443).
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }

    pub fn scheme(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Https
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            other => Err(format!("unsupported protocol: {other}")),
        }
    }
}

/// Resolved AWS credentials. Operations without credentials go out unsigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// AWS access key ID
    pub access_key_id: String,

    /// AWS secret access key
    pub secret_access_key: String,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }
}

/// TLS settings applied to every request unless shadowed per call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SslOptions {
    /// Verify the peer certificate chain
    #[serde(default = "default_verify_peer")]
    pub verify_peer: bool,

    /// Optional CA bundle used in addition to the system roots
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_chain_file: Option<PathBuf>,
}

fn default_verify_peer() -> bool {
    true
}

impl Default for SslOptions {
    fn default() -> Self {
        Self {
            verify_peer: default_verify_peer(),
            cert_chain_file: None,
        }
    }
}

/// Per-call TLS override. Set fields shadow the configured [`SslOptions`]
/// key-by-key; unset fields fall through to the configured value.
#[derive(Debug, Clone, Default)]
pub struct SslOverride {
    pub verify_peer: Option<bool>,
    pub cert_chain_file: Option<PathBuf>,
}

impl SslOverride {
    /// Merge this override over `base`, field by field.
    pub fn apply(&self, base: &SslOptions) -> SslOptions {
        SslOptions {
            verify_peer: self.verify_peer.unwrap_or(base.verify_peer),
            cert_chain_file: self
                .cert_chain_file
                .clone()
                .or_else(|| base.cert_chain_file.clone()),
        }
    }
}

/// Client-wide defaults. Constructed explicitly and passed where needed;
/// per-call options shadow individual fields without mutating the config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server override. When unset, DNS-compatible buckets address
    /// `<bucket>.s3.amazonaws.com` and other buckets fall back to path style.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,

    /// URL scheme (default: https)
    #[serde(default)]
    pub protocol: Protocol,

    /// Port override (default: 443 for https, 80 for http)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Additional same-target attempts after the first failure
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    /// Per-attempt timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Base delay before a same-target retry, in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Outer bound on whole-batch flush attempts
    #[serde(default = "default_flush_attempts")]
    pub flush_attempts: u32,

    /// TLS defaults
    #[serde(default)]
    pub ssl: SslOptions,
}

fn default_retry_budget() -> u32 {
    4
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_retry_delay_ms() -> u64 {
    100
}

fn default_flush_attempts() -> u32 {
    5
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: None,
            protocol: Protocol::default(),
            port: None,
            retry_budget: default_retry_budget(),
            timeout_secs: default_timeout_secs(),
            retry_delay_ms: default_retry_delay_ms(),
            flush_attempts: default_flush_attempts(),
            ssl: SslOptions::default(),
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Settings resolved from the process environment.
#[derive(Debug, Clone)]
pub struct EnvSettings {
    pub config: ClientConfig,
    pub credentials: Credentials,
    pub bucket: String,
}

/// Load client settings from environment variables.
///
/// Supports both AWS standard variables and the legacy S3_* format:
/// - AWS_ACCESS_KEY_ID / S3_KEY
/// - AWS_SECRET_ACCESS_KEY / S3_SECRET
/// - S3_BUCKET
/// - S3_SERVER (optional endpoint override)
/// - S3_PROTOCOL (optional, http or https)
/// - S3_PORT (optional)
pub fn load_from_env() -> Result<EnvSettings> {
    // Try to load .env file if it exists (don't fail if it doesn't)
    let _ = dotenvy::dotenv();

    let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
        .or_else(|_| std::env::var("S3_KEY"))
        .context("Neither AWS_ACCESS_KEY_ID nor S3_KEY environment variable is set")?;

    let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .or_else(|_| std::env::var("S3_SECRET"))
        .context("Neither AWS_SECRET_ACCESS_KEY nor S3_SECRET environment variable is set")?;

    let bucket = std::env::var("S3_BUCKET").context("S3_BUCKET environment variable not set")?;

    let mut config = ClientConfig::default();

    if let Ok(server) = std::env::var("S3_SERVER") {
        if !server.is_empty() {
            config.server = Some(server);
        }
    }

    if let Ok(protocol) = std::env::var("S3_PROTOCOL") {
        config.protocol = protocol
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .context("Failed to parse S3_PROTOCOL")?;
    }

    if let Ok(port) = std::env::var("S3_PORT") {
        config.port = Some(port.parse().context("Failed to parse S3_PORT")?);
    }

    Ok(EnvSettings {
        config,
        credentials: Credentials::new(access_key_id, secret_access_key),
        bucket,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = ClientConfig::default();

        assert!(config.server.is_none());
        assert_eq!(config.protocol, Protocol::Https);
        assert_eq!(config.retry_budget, 4);
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.retry_delay_ms, 100);
        assert_eq!(config.flush_attempts, 5);
        assert!(config.ssl.verify_peer);
        assert!(config.ssl.cert_chain_file.is_none());
    }

    #[test]
    fn test_protocol_parsing() {
        assert_eq!("http".parse::<Protocol>().unwrap(), Protocol::Http);
        assert_eq!("https".parse::<Protocol>().unwrap(), Protocol::Https);
        assert!("lulul".parse::<Protocol>().is_err());

        assert_eq!(Protocol::Http.default_port(), 80);
        assert_eq!(Protocol::Https.default_port(), 443);
        assert_eq!(Protocol::Https.to_string(), "https");
    }

    #[test]
    fn test_ssl_override_merges_key_by_key() {
        let base = SslOptions {
            verify_peer: true,
            cert_chain_file: Some(PathBuf::from("/etc/foo.ca")),
        };

        // Unset override fields fall through to the base
        let merged = SslOverride::default().apply(&base);
        assert!(merged.verify_peer);
        assert_eq!(merged.cert_chain_file, Some(PathBuf::from("/etc/foo.ca")));

        // Set fields shadow the base without touching the rest
        let merged = SslOverride {
            verify_peer: Some(false),
            cert_chain_file: None,
        }
        .apply(&base);
        assert!(!merged.verify_peer);
        assert_eq!(merged.cert_chain_file, Some(PathBuf::from("/etc/foo.ca")));
    }

    #[test]
    fn test_timeout_conversion() {
        let config = ClientConfig {
            timeout_secs: 4,
            retry_delay_ms: 250,
            ..ClientConfig::default()
        };
        assert_eq!(config.timeout(), Duration::from_secs(4));
        assert_eq!(config.retry_delay(), Duration::from_millis(250));
    }
}
