//! Batch coordinator: drive a queue of pending writes or deletes to
//! completion in one concurrent pass, retrying the whole batch on failure.
//!
//! Queues are borrowed read-only for the duration of a flush. Entries are
//! not removed as they succeed, so an outer retry resubmits the entire
//! original batch, already-completed operations included. That matches the
//! long-standing flush semantics this client reproduces; remote writes and
//! deletes are idempotent, so the repeats are safe if wasteful.
//!
//! An entry may carry an error hook. A failing entry with a hook counts as
//! handled: the hook observes the error and the batch proceeds. A failing
//! entry without a hook fails the round loudly and triggers the outer
//! retry; after the configured bound the flush surfaces
//! [`StorageError::FlushExhausted`].

use bytes::Bytes;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{ClientConfig, Credentials};
use crate::s3::item::{Item, ItemOptions, RequestOptions};
use crate::s3::request::{Response, Result, StorageError};
use crate::transport::{Body, Transport};

/// Outer bound on whole-batch attempts.
pub const DEFAULT_FLUSH_ATTEMPTS: u32 = 5;

/// Observer for a failing entry. Presence means the failure is handled;
/// absence means it fails the batch round.
pub type ErrorHook = Arc<dyn Fn(&StorageError) + Send + Sync>;

/// One pending upload.
pub struct WriteOp {
    pub key: String,
    pub body: Body,
    pub options: RequestOptions,
    pub on_error: Option<ErrorHook>,
}

/// One pending deletion.
pub struct DeleteOp {
    pub key: String,
    pub on_error: Option<ErrorHook>,
}

/// Pending writes for one flush. With a base key set, style entries derive
/// their stored-variant keys from it.
#[derive(Default)]
pub struct WriteQueue {
    base_key: Option<String>,
    entries: Vec<WriteOp>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue for the stored variants of a single object.
    pub fn for_object(base_key: impl Into<String>) -> Self {
        Self {
            base_key: Some(base_key.into()),
            entries: Vec::new(),
        }
    }

    pub fn enqueue(&mut self, key: impl Into<String>, body: Body) {
        self.enqueue_with(key, body, RequestOptions::default(), None);
    }

    pub fn enqueue_with(
        &mut self,
        key: impl Into<String>,
        body: Body,
        options: RequestOptions,
        on_error: Option<ErrorHook>,
    ) {
        self.entries.push(WriteOp {
            key: key.into(),
            body,
            options,
            on_error,
        });
    }

    /// Queue a style -> content pair against the base key: `None` is the
    /// original, a named style stores under `<base>_<style>`.
    pub fn enqueue_style(&mut self, style: Option<&str>, body: Body) -> Result<()> {
        let base = self.base_key.as_ref().ok_or_else(|| {
            StorageError::Validation("style entries need a queue built with for_object".to_string())
        })?;
        let key = match style {
            Some(style) => format!("{base}_{style}"),
            None => base.clone(),
        };
        self.enqueue(key, body);
        Ok(())
    }

    /// Queue a style -> file pair against the base key.
    pub fn enqueue_style_file(
        &mut self,
        style: Option<&str>,
        path: impl Into<PathBuf>,
    ) -> Result<()> {
        self.enqueue_style(style, Body::File(path.into()))
    }

    pub fn entries(&self) -> &[WriteOp] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Pending deletions for one flush.
#[derive(Default)]
pub struct DeleteQueue {
    entries: Vec<DeleteOp>,
}

impl DeleteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, key: impl Into<String>) {
        self.enqueue_with(key, None);
    }

    pub fn enqueue_with(&mut self, key: impl Into<String>, on_error: Option<ErrorHook>) {
        self.entries.push(DeleteOp {
            key: key.into(),
            on_error,
        });
    }

    pub fn entries(&self) -> &[DeleteOp] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of a completed flush.
#[derive(Debug, Clone)]
pub struct FlushReport {
    /// Entries that completed against the remote end
    pub completed: usize,
    /// Entries that failed but were absorbed by their error hook
    pub handled_errors: usize,
    /// Rounds it took (0 for an empty queue)
    pub attempts: u32,
}

/// Runs queued operations concurrently and retries the batch as a unit.
pub struct BatchCoordinator {
    config: ClientConfig,
    credentials: Option<Credentials>,
    bucket: String,
    attempts: u32,
    transport: Arc<dyn Transport>,
}

impl BatchCoordinator {
    pub fn new(
        config: ClientConfig,
        credentials: Option<Credentials>,
        bucket: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let attempts = config.flush_attempts.max(1);
        Self {
            config,
            credentials,
            bucket: bucket.into(),
            attempts,
            transport,
        }
    }

    /// Upload every queued write, all concurrently, retrying the whole
    /// batch up to the configured bound.
    pub async fn flush_writes(&self, queue: &WriteQueue) -> Result<FlushReport> {
        if queue.is_empty() {
            return Ok(FlushReport {
                completed: 0,
                handled_errors: 0,
                attempts: 0,
            });
        }

        let mut last_error = None;
        for round in 1..=self.attempts {
            let results = join_all(queue.entries().iter().map(|op| async move {
                let item = self.item(&op.key)?;
                match &op.body {
                    Body::Bytes(data) => item.put_with(data.clone(), op.options.clone()).await,
                    Body::File(path) => item.put_file(path.clone(), op.options.clone()).await,
                    Body::Empty => item.put_with(Bytes::new(), op.options.clone()).await,
                }
            }))
            .await;

            let hooks = queue.entries().iter().map(|op| op.on_error.as_ref());
            match self.tally(queue.len(), hooks, results, round, "write") {
                Ok(report) => return Ok(report),
                Err(e) => last_error = Some(e),
            }
        }

        Err(StorageError::FlushExhausted {
            attempts: self.attempts,
            source: Box::new(last_error.expect("at least one flush round ran")),
        })
    }

    /// Delete every queued key, all concurrently, retrying the whole batch
    /// up to the configured bound.
    pub async fn flush_deletes(&self, queue: &DeleteQueue) -> Result<FlushReport> {
        if queue.is_empty() {
            return Ok(FlushReport {
                completed: 0,
                handled_errors: 0,
                attempts: 0,
            });
        }

        let mut last_error = None;
        for round in 1..=self.attempts {
            let results = join_all(queue.entries().iter().map(|op| async move {
                self.item(&op.key)?.delete().await
            }))
            .await;

            let hooks = queue.entries().iter().map(|op| op.on_error.as_ref());
            match self.tally(queue.len(), hooks, results, round, "delete") {
                Ok(report) => return Ok(report),
                Err(e) => last_error = Some(e),
            }
        }

        Err(StorageError::FlushExhausted {
            attempts: self.attempts,
            source: Box::new(last_error.expect("at least one flush round ran")),
        })
    }

    /// Count completions for one round. Returns the report when nothing
    /// failed unhandled, otherwise the error that forces a batch retry.
    fn tally<'a>(
        &self,
        queued: usize,
        hooks: impl Iterator<Item = Option<&'a ErrorHook>>,
        results: Vec<Result<Response>>,
        round: u32,
        kind: &str,
    ) -> Result<FlushReport> {
        let mut completed = 0usize;
        let mut handled_errors = 0usize;
        let mut unhandled = None;

        for (hook, result) in hooks.zip(results) {
            match result {
                Ok(_) => completed += 1,
                Err(e) => match hook {
                    Some(hook) => {
                        hook(&e);
                        handled_errors += 1;
                    }
                    None => unhandled = Some(e),
                },
            }
        }
        debug_assert!(completed + handled_errors <= queued);

        match unhandled {
            None => {
                debug!(kind, completed, handled_errors, round, "flush finished");
                Ok(FlushReport {
                    completed,
                    handled_errors,
                    attempts: round,
                })
            }
            Some(e) => {
                warn!(
                    kind,
                    round,
                    bound = self.attempts,
                    error = %e,
                    "flush round failed, resubmitting entire batch"
                );
                Err(e)
            }
        }
    }

    fn item(&self, key: &str) -> Result<Item> {
        Item::new(
            self.bucket.as_str(),
            key,
            &self.config,
            ItemOptions {
                credentials: self.credentials.clone(),
                ..ItemOptions::default()
            },
            Arc::clone(&self.transport),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_style_entries_derive_variant_keys() {
        let mut queue = WriteQueue::for_object("avatars/42/face.png");
        queue
            .enqueue_style(None, Body::Bytes(Bytes::from_static(b"orig")))
            .unwrap();
        queue
            .enqueue_style(Some("thumbnail"), Body::Bytes(Bytes::from_static(b"thumb")))
            .unwrap();

        let keys: Vec<&str> = queue.entries().iter().map(|op| op.key.as_str()).collect();
        assert_eq!(keys, ["avatars/42/face.png", "avatars/42/face.png_thumbnail"]);
    }

    #[test]
    fn test_style_entries_require_a_base_key() {
        let mut queue = WriteQueue::new();
        let result = queue.enqueue_style(Some("thumbnail"), Body::Empty);
        assert!(matches!(result, Err(StorageError::Validation(_))));
    }
}
