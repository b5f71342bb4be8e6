//! Event pipeline: the per-event state machine and the loop that feeds it.
//!
//! Created events go `Idle -> Debouncing -> Dispatching -> (Postprocessing |
//! Done) -> Idle`. Modified, Deleted and Moved events are logged and nothing
//! else.
//!
//! `run` keeps at most `max_in_flight` events in progress. With the default
//! of 1, events are handled strictly one after another and a slow service
//! call holds back delivery of every later event. Above 1, events finish in
//! whatever order their service calls complete. Either way a failed event
//! is logged and dropped, with no retry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::chunker::{self, TextExtractor};
use crate::core::config::WatchConfig;
use crate::core::error::PipelineError;
use crate::core::file_handler;
use crate::core::models::{ChangeEvent, CreatedOutcome, PathState, Payload};
use crate::core::tracker::{FilenameLocks, PathTracker, Settle, Ticket};
use crate::service::client::Dispatch;

/// One method per event kind. The observer's events are routed here through
/// `deliver`.
pub trait EventSink {
    fn on_created(&self, path: PathBuf) -> impl Future<Output = CreatedOutcome> + Send;
    fn on_modified(&self, path: &Path);
    fn on_deleted(&self, path: &Path);
    fn on_moved(&self, source: &Path, destination: &Path);
}

pub struct EventPipeline<D> {
    config: Arc<WatchConfig>,
    client: D,
    extractor: TextExtractor,
    tracker: PathTracker,
    locks: FilenameLocks,
    shutdown: CancellationToken,
}

impl<D: Dispatch> EventPipeline<D> {
    pub fn new(config: Arc<WatchConfig>, client: D, shutdown: CancellationToken) -> Self {
        Self {
            config,
            client,
            extractor: chunker::extract_text,
            tracker: PathTracker::new(shutdown.clone()),
            locks: FilenameLocks::default(),
            shutdown,
        }
    }

    /// Replace the default `text`/`segments` extractor.
    pub fn with_extractor(mut self, extractor: TextExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn state_of(&self, path: &Path) -> PathState {
        self.tracker.state_of(path)
    }

    /// Consume events until shutdown or until the observer side closes.
    ///
    /// On shutdown, pending debounces are cancelled but dispatches and chunk
    /// writes already under way run to completion before this returns.
    pub async fn run(&self, mut events: mpsc::Receiver<ChangeEvent>) {
        let max_in_flight = self.config.max_in_flight;
        let mut in_flight = FuturesUnordered::new();
        info!(max_in_flight, "Pipeline started");

        loop {
            if in_flight.len() >= max_in_flight {
                in_flight.next().await;
                continue;
            }

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested, no longer accepting events");
                    break;
                }
                Some(_) = in_flight.next(), if !in_flight.is_empty() => {}
                event = events.recv() => match event {
                    Some(event) => in_flight.push(deliver(self, event)),
                    None => {
                        info!("Event source closed");
                        break;
                    }
                },
            }
        }

        let draining = in_flight.len();
        if draining > 0 {
            info!(draining, "Waiting for in-flight events");
        }
        while in_flight.next().await.is_some() {}
        if !events.is_empty() {
            warn!(dropped = events.len(), "Discarding undelivered events");
        }
        debug!(tracked = self.tracker.in_flight(), "Tracker state at stop");
        info!("Pipeline stopped");
    }

    async fn process_created(&self, path: PathBuf) -> CreatedOutcome {
        let ticket = self.tracker.begin(&path);
        debug!(path = %path.display(), state = ?PathState::Debouncing, "Created event received");

        match self.tracker.settle(&ticket, self.config.debounce()).await {
            Settle::Elapsed => {}
            Settle::Superseded => {
                debug!(path = %path.display(), "Debounce superseded by a newer create");
                self.tracker.finish(ticket);
                return CreatedOutcome::Superseded;
            }
            Settle::Cancelled => {
                info!(path = %path.display(), "Debounce cancelled by shutdown");
                self.tracker.finish(ticket);
                return CreatedOutcome::Cancelled;
            }
        }

        let outcome = self.dispatch_settled(&ticket).await;
        self.tracker.finish(ticket);
        outcome
    }

    async fn dispatch_settled(&self, ticket: &Ticket) -> CreatedOutcome {
        let path = ticket.path();
        let resolved = file_handler::resolve(&path.to_string_lossy());
        // A repeated create during the lock wait must not count as a restart.
        self.tracker.advance(ticket, PathState::Dispatching);
        let _guard = self.locks.acquire(&resolved.filename).await;

        let payload = match self.client.dispatch(&resolved.canonical_path).await {
            Ok(payload) => payload,
            Err(e) => {
                let err = PipelineError::from(e);
                error!(path = %path.display(), kind = ?err.kind(), error = %err, "Dispatch failed");
                return CreatedOutcome::Failed(err);
            }
        };
        info!(path = %path.display(), filename = %resolved.filename, "Dispatch succeeded");

        if !self.config.postprocess_enabled {
            self.tracker.advance(ticket, PathState::Done);
            let result = Value::Object(payload.clone());
            info!(path = %path.display(), %result, "Service result");
            return CreatedOutcome::Delivered(payload);
        }

        self.tracker.advance(ticket, PathState::Postprocessing);
        let outcome = match self.write_chunks(payload, resolved.filename.clone()).await {
            Ok(count) => {
                info!(path = %path.display(), filename = %resolved.filename, count, "Wrote chunks");
                CreatedOutcome::Chunked {
                    filename: resolved.filename,
                    count,
                }
            }
            Err(err) => {
                error!(path = %path.display(), kind = ?err.kind(), error = %err, "Post-processing failed");
                CreatedOutcome::Failed(err)
            }
        };
        self.tracker.advance(ticket, PathState::Done);
        outcome
    }

    async fn write_chunks(&self, payload: Payload, filename: String) -> Result<usize, PipelineError> {
        let destination = self.config.destination_path.clone();
        let chunk_size = self.config.chunk_size;
        let extractor = self.extractor;

        tokio::task::spawn_blocking(move || {
            chunker::chunk(&payload, &filename, &destination, chunk_size, extractor)
        })
        .await
        .map_err(|e| PipelineError::Worker(e.to_string()))?
        .map_err(PipelineError::from)
    }
}

impl<D: Dispatch> EventSink for EventPipeline<D> {
    fn on_created(&self, path: PathBuf) -> impl Future<Output = CreatedOutcome> + Send {
        self.process_created(path)
    }

    fn on_modified(&self, path: &Path) {
        info!(path = %path.display(), "path has been modified");
    }

    fn on_deleted(&self, path: &Path) {
        info!(path = %path.display(), "path has been deleted");
    }

    fn on_moved(&self, source: &Path, destination: &Path) {
        info!(
            source = %source.display(),
            destination = %destination.display(),
            "path has been moved"
        );
    }
}

/// Route any event to the matching `EventSink` method.
///
/// Only Created events produce an outcome.
pub async fn deliver<S: EventSink>(sink: &S, event: ChangeEvent) -> Option<CreatedOutcome> {
    match event {
        ChangeEvent::Created { source_path } => return Some(sink.on_created(source_path).await),
        ChangeEvent::Modified { source_path } => sink.on_modified(&source_path),
        ChangeEvent::Deleted { source_path } => sink.on_deleted(&source_path),
        ChangeEvent::Moved {
            source_path,
            destination_path,
        } => sink.on_moved(&source_path, &destination_path),
    }
    None
}
