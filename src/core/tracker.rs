//! Bookkeeping for in-flight Created events.
//!
//! `PathTracker` holds one entry per watched path that is somewhere between
//! Debouncing and Done. Each entry carries a ticket id so a superseded event
//! can never move or clear the entry of the event that replaced it.
//!
//! `FilenameLocks` serializes dispatch and chunk writes per resolved filename.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::models::PathState;

/// Handle for one Created event's pass through the state machine.
#[derive(Debug)]
pub struct Ticket {
    id: u64,
    path: PathBuf,
    timer: CancellationToken,
}

impl Ticket {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// How a debounce wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    Elapsed,
    Superseded,
    Cancelled,
}

struct Entry {
    id: u64,
    state: PathState,
    timer: CancellationToken,
}

pub struct PathTracker {
    shutdown: CancellationToken,
    next_id: AtomicU64,
    entries: Mutex<HashMap<PathBuf, Entry>>,
}

impl PathTracker {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            next_id: AtomicU64::new(0),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<PathBuf, Entry>> {
        // The map is only touched in short non-panicking sections.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enter Debouncing for `path`.
    ///
    /// A pending debounce for the same path is cancelled and ends as
    /// `Superseded`. Entries already past Debouncing are left running.
    pub fn begin(&self, path: &Path) -> Ticket {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timer = self.shutdown.child_token();
        let previous = self.entries().insert(
            path.to_path_buf(),
            Entry {
                id,
                state: PathState::Debouncing,
                timer: timer.clone(),
            },
        );
        if let Some(previous) = previous {
            if previous.state == PathState::Debouncing {
                debug!(path = %path.display(), "Restarting debounce for repeated create");
                previous.timer.cancel();
            }
        }
        Ticket {
            id,
            path: path.to_path_buf(),
            timer,
        }
    }

    /// Sleep for `delay` unless superseded or shut down first.
    pub async fn settle(&self, ticket: &Ticket, delay: Duration) -> Settle {
        tokio::select! {
            _ = tokio::time::sleep(delay) => Settle::Elapsed,
            _ = ticket.timer.cancelled() => {
                if self.shutdown.is_cancelled() {
                    Settle::Cancelled
                } else {
                    Settle::Superseded
                }
            }
        }
    }

    /// Move the ticket's entry to `state`. Ignored if the ticket was replaced.
    pub fn advance(&self, ticket: &Ticket, state: PathState) {
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(&ticket.path) {
            if entry.id == ticket.id {
                debug!(path = %ticket.path.display(), from = ?entry.state, to = ?state, "Path state");
                entry.state = state;
            }
        }
    }

    /// Return the path to Idle. Ignored if the ticket was replaced.
    pub fn finish(&self, ticket: Ticket) {
        let mut entries = self.entries();
        if entries.get(&ticket.path).is_some_and(|entry| entry.id == ticket.id) {
            entries.remove(&ticket.path);
            debug!(path = %ticket.path.display(), to = ?PathState::Idle, "Path state");
        }
    }

    pub fn state_of(&self, path: &Path) -> PathState {
        self.entries()
            .get(path)
            .map(|entry| entry.state)
            .unwrap_or(PathState::Idle)
    }

    pub fn in_flight(&self) -> usize {
        self.entries().len()
    }
}

/// Async mutex per resolved filename, created on first use.
#[derive(Default)]
pub struct FilenameLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl FilenameLocks {
    pub async fn acquire(&self, filename: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // Drop locks nobody else holds so the map does not grow without bound.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(filename.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_settle_elapses() {
        let tracker = PathTracker::new(CancellationToken::new());
        let ticket = tracker.begin(Path::new("/in/a.wav"));
        assert_eq!(tracker.state_of(Path::new("/in/a.wav")), PathState::Debouncing);

        assert_eq!(tracker.settle(&ticket, Duration::from_millis(5)).await, Settle::Elapsed);
        tracker.advance(&ticket, PathState::Dispatching);
        assert_eq!(tracker.state_of(ticket.path()), PathState::Dispatching);

        tracker.finish(ticket);
        assert_eq!(tracker.state_of(Path::new("/in/a.wav")), PathState::Idle);
        assert_eq!(tracker.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_repeated_create_supersedes_pending_debounce() {
        let tracker = PathTracker::new(CancellationToken::new());
        let first = tracker.begin(Path::new("/in/a.wav"));
        let second = tracker.begin(Path::new("/in/a.wav"));

        assert_eq!(
            tracker.settle(&first, Duration::from_secs(60)).await,
            Settle::Superseded
        );
        // The superseded ticket must not clear the newer entry.
        tracker.finish(first);
        assert_eq!(tracker.state_of(Path::new("/in/a.wav")), PathState::Debouncing);

        assert_eq!(tracker.settle(&second, Duration::from_millis(5)).await, Settle::Elapsed);
        tracker.finish(second);
        assert_eq!(tracker.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_create_during_dispatch_does_not_cancel() {
        let tracker = PathTracker::new(CancellationToken::new());
        let first = tracker.begin(Path::new("/in/a.wav"));
        tracker.settle(&first, Duration::from_millis(1)).await;
        tracker.advance(&first, PathState::Dispatching);

        let second = tracker.begin(Path::new("/in/a.wav"));
        assert!(!first.timer.is_cancelled());

        // Stale ticket cannot move the newer entry.
        tracker.advance(&first, PathState::Done);
        assert_eq!(tracker.state_of(Path::new("/in/a.wav")), PathState::Debouncing);
        tracker.finish(second);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_debounce() {
        let shutdown = CancellationToken::new();
        let tracker = PathTracker::new(shutdown.clone());
        let ticket = tracker.begin(Path::new("/in/a.wav"));

        shutdown.cancel();
        assert_eq!(
            tracker.settle(&ticket, Duration::from_secs(60)).await,
            Settle::Cancelled
        );
    }

    #[tokio::test]
    async fn test_filename_locks_serialize() {
        let locks = Arc::new(FilenameLocks::default());
        let guard = locks.acquire("note.wav").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("note.wav").await;
            })
        };
        // Other names are independent.
        drop(locks.acquire("other.wav").await);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }
}
