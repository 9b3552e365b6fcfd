//! Configured entry point shared by library callers and the CLI.
//!
//! A `Store` wires one bucket, its resolved credentials, the client
//! config, and a transport. Clones share the same transport, so every
//! item minted from the same store reuses one HTTP connection pool.

use anyhow::Result as AnyResult;
use std::sync::Arc;

use crate::batch::BatchCoordinator;
use crate::config::{self, ClientConfig, Credentials};
use crate::s3::item::{Item, ItemOptions};
use crate::s3::request::Result;
use crate::transport::{HyperTransport, Transport};

#[derive(Clone)]
pub struct Store {
    config: ClientConfig,
    credentials: Option<Credentials>,
    bucket: String,
    transport: Arc<dyn Transport>,
}

impl Store {
    pub fn new(
        config: ClientConfig,
        credentials: Option<Credentials>,
        bucket: impl Into<String>,
    ) -> Self {
        Self::with_transport(config, credentials, bucket, Arc::new(HyperTransport::new()))
    }

    /// Construct over an explicit transport (tests pass a scripted one).
    pub fn with_transport(
        config: ClientConfig,
        credentials: Option<Credentials>,
        bucket: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            config,
            credentials,
            bucket: bucket.into(),
            transport,
        }
    }

    /// Resolve credentials, bucket, and overrides from the environment.
    pub fn from_env() -> AnyResult<Self> {
        let settings = config::load_from_env()?;
        Ok(Self::new(
            settings.config,
            Some(settings.credentials),
            settings.bucket,
        ))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Handle on one object in this store's bucket.
    pub fn item(&self, key: impl Into<String>) -> Result<Item> {
        self.item_with(key, ItemOptions::default())
    }

    pub fn item_with(&self, key: impl Into<String>, mut options: ItemOptions) -> Result<Item> {
        if options.credentials.is_none() {
            options.credentials = self.credentials.clone();
        }
        Item::new(
            self.bucket.as_str(),
            key,
            &self.config,
            options,
            Arc::clone(&self.transport),
        )
    }

    /// Coordinator for batched flushes against this bucket.
    pub fn coordinator(&self) -> BatchCoordinator {
        BatchCoordinator::new(
            self.config.clone(),
            self.credentials.clone(),
            self.bucket.as_str(),
            Arc::clone(&self.transport),
        )
    }
}
