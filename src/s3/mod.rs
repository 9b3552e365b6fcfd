//! S3 client module: addressing, signing, and the request engine
//!
//! This module provides:
//! - Classic shared-secret request signing and pre-signed URLs
//! - Virtual-hosted / path-style URL resolution
//! - The retry/redirect request engine behind every item operation

pub mod item;
pub mod location;
pub mod request;
pub mod signer;

// Re-export main types for convenience
pub use item::{Item, ItemOptions, RequestOptions};
pub use location::Location;
pub use request::{Request, RequestSpec, Response, Result, StorageError, DEFAULT_RETRY_BUDGET};
pub use signer::Signer;
