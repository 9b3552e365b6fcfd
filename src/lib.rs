//! s3porter - asynchronous S3 object client with signed requests,
//! redirect/retry handling, and batched flushes

pub mod batch;
pub mod config;
pub mod s3;
pub mod store;
pub mod transport;

pub use batch::{BatchCoordinator, DeleteQueue, FlushReport, WriteQueue, DEFAULT_FLUSH_ATTEMPTS};
pub use config::{ClientConfig, Credentials, Protocol, SslOptions, SslOverride};
pub use s3::{Item, ItemOptions, RequestOptions, Response, Result, StorageError};
pub use store::Store;
pub use transport::{Body, HyperTransport, Transport};
