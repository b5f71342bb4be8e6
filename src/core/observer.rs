use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use glob::{MatchOptions, Pattern};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, error, info};

use crate::core::config::WatchConfig;
use crate::core::error::ObserverError;
use crate::core::models::ChangeEvent;

/// Include/exclude glob filter applied before events reach the pipeline.
///
/// Patterns match the full path string, `*` crosses separators. A moved
/// event matches if either of its paths does.
#[derive(Debug, Clone)]
pub struct EventFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
    ignore_directories: bool,
    options: MatchOptions,
}

impl EventFilter {
    pub fn from_config(config: &WatchConfig) -> Result<Self, ObserverError> {
        let compile = |patterns: &[String]| -> Result<Vec<Pattern>, ObserverError> {
            patterns
                .iter()
                .map(|p| {
                    Pattern::new(p).map_err(|source| ObserverError::Pattern {
                        pattern: p.clone(),
                        source,
                    })
                })
                .collect()
        };

        Ok(Self {
            include: compile(config.include_patterns.as_slice())?,
            exclude: compile(config.exclude_patterns.as_slice())?,
            ignore_directories: config.ignore_directories,
            options: MatchOptions {
                case_sensitive: config.case_sensitive,
                require_literal_separator: false,
                require_literal_leading_dot: false,
            },
        })
    }

    pub fn allows(&self, event: &ChangeEvent, is_dir: bool) -> bool {
        if is_dir && self.ignore_directories {
            return false;
        }
        let paths = event.paths();
        let matches_any = |patterns: &[Pattern]| {
            paths
                .iter()
                .any(|path| patterns.iter().any(|p| p.matches_path_with(path, self.options)))
        };
        if matches_any(self.exclude.as_slice()) {
            return false;
        }
        self.include.is_empty() || matches_any(self.include.as_slice())
    }
}

/// How long a rename's `From` half waits for its `To` half before it is
/// reported as a deletion.
const RENAME_WINDOW: Duration = Duration::from_millis(500);

/// Map a raw notify event onto a `ChangeEvent`, plus whether it concerns a directory.
///
/// Stateless: rename halves other than `Both` are left to `RenamePairer`.
pub fn classify(event: &Event) -> Option<(ChangeEvent, bool)> {
    let first = event.paths.first()?.to_path_buf();
    match &event.kind {
        EventKind::Create(kind) => {
            let is_dir = match kind {
                CreateKind::Folder => true,
                CreateKind::File => false,
                _ => first.is_dir(),
            };
            Some((ChangeEvent::Created { source_path: first }, is_dir))
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let destination_path = event.paths.get(1)?.to_path_buf();
            let is_dir = destination_path.is_dir();
            Some((
                ChangeEvent::Moved {
                    source_path: first,
                    destination_path,
                },
                is_dir,
            ))
        }
        EventKind::Modify(ModifyKind::Name(_)) => None,
        EventKind::Modify(_) => {
            let is_dir = first.is_dir();
            Some((ChangeEvent::Modified { source_path: first }, is_dir))
        }
        EventKind::Remove(kind) => {
            let is_dir = matches!(kind, RemoveKind::Folder);
            Some((ChangeEvent::Deleted { source_path: first }, is_dir))
        }
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

struct PendingRename {
    source_path: PathBuf,
    destination_path: Option<PathBuf>,
    seen: Instant,
}

impl PendingRename {
    fn resolve(self) -> (ChangeEvent, bool) {
        match self.destination_path {
            Some(destination_path) => {
                let is_dir = destination_path.is_dir();
                (
                    ChangeEvent::Moved {
                        source_path: self.source_path,
                        destination_path,
                    },
                    is_dir,
                )
            }
            // Moved out of the watched tree.
            None => (
                ChangeEvent::Deleted {
                    source_path: self.source_path,
                },
                false,
            ),
        }
    }
}

/// Pairs the two halves of a rename using notify's tracker id.
///
/// A `To` half with no known `From` is a file moved in from outside and is
/// reported as `Created`. A `From` half still unpaired after `RENAME_WINDOW`
/// was moved out and is reported as `Deleted`. When the backend follows the
/// halves with a `Both` event, that event alone yields the `Moved`.
#[derive(Default)]
pub struct RenamePairer {
    pending: HashMap<usize, PendingRename>,
}

impl RenamePairer {
    pub fn accept(&mut self, event: &Event, now: Instant) -> Option<(ChangeEvent, bool)> {
        let EventKind::Modify(ModifyKind::Name(mode)) = event.kind else {
            return classify(event);
        };
        let path = event.paths.first()?.to_path_buf();
        match (mode, event.tracker()) {
            (RenameMode::Both, tracker) => {
                if let Some(tracker) = tracker {
                    self.pending.remove(&tracker);
                }
                classify(event)
            }
            (RenameMode::From, Some(tracker)) => {
                self.pending.insert(
                    tracker,
                    PendingRename {
                        source_path: path,
                        destination_path: None,
                        seen: now,
                    },
                );
                None
            }
            (RenameMode::To, Some(tracker)) => match self.pending.get_mut(&tracker) {
                Some(pending) => {
                    pending.destination_path = Some(path);
                    None
                }
                None => Some(created(path)),
            },
            (RenameMode::To, None) => Some(created(path)),
            (RenameMode::From, None) => Some((ChangeEvent::Deleted { source_path: path }, false)),
            // Backends that cannot tell the halves apart.
            (RenameMode::Any | RenameMode::Other, _) => {
                if path.exists() {
                    Some(created(path))
                } else {
                    Some((ChangeEvent::Deleted { source_path: path }, false))
                }
            }
        }
    }

    /// Resolve every rename older than `RENAME_WINDOW`.
    pub fn expire(&mut self, now: Instant) -> Vec<(ChangeEvent, bool)> {
        let expired: Vec<usize> = self
            .pending
            .iter()
            .filter(|(_, pending)| now.saturating_duration_since(pending.seen) >= RENAME_WINDOW)
            .map(|(tracker, _)| *tracker)
            .collect();
        expired
            .into_iter()
            .filter_map(|tracker| self.pending.remove(&tracker))
            .map(PendingRename::resolve)
            .collect()
    }

    pub fn drain(&mut self) -> Vec<(ChangeEvent, bool)> {
        self.pending
            .drain()
            .map(|(_, pending)| pending.resolve())
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|pending| pending.seen + RENAME_WINDOW)
            .min()
    }
}

fn created(source_path: PathBuf) -> (ChangeEvent, bool) {
    let is_dir = source_path.is_dir();
    (ChangeEvent::Created { source_path }, is_dir)
}

/// Filesystem source: a notify watcher plus the thread that filters its
/// events and forwards them into the pipeline's channel.
///
/// Delivery blocks when the channel is full, so a slow pipeline holds back
/// later events instead of dropping them.
pub struct Observer {
    watcher: Option<RecommendedWatcher>,
    bridge: Option<JoinHandle<()>>,
}

impl Observer {
    /// Start watching `config.watched_path` and deliver into `sink`.
    pub fn schedule(
        config: &WatchConfig,
        sink: tokio_mpsc::Sender<ChangeEvent>,
    ) -> Result<Self, ObserverError> {
        let filter = EventFilter::from_config(config)?;
        let (event_tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(event_tx)?;
        let mode = if config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(&config.watched_path, mode)?;
        info!(path = %config.watched_path.display(), recursive = config.recursive, "Watching path");

        let bridge = thread::Builder::new()
            .name("observer".to_string())
            .spawn(move || forward_events(rx, &filter, &sink))?;

        Ok(Self {
            watcher: Some(watcher),
            bridge: Some(bridge),
        })
    }

    /// Stop the OS watcher. The bridge thread exits once it drains.
    pub fn stop(&mut self) {
        if self.watcher.take().is_some() {
            info!("Observer stopped");
        }
    }

    /// Wait for the bridge thread to exit. Call after `stop`.
    pub fn join(mut self) {
        if let Some(bridge) = self.bridge.take() {
            if bridge.join().is_err() {
                error!("Observer thread panicked");
            }
        }
    }
}

fn forward_events(
    rx: mpsc::Receiver<notify::Result<Event>>,
    filter: &EventFilter,
    sink: &tokio_mpsc::Sender<ChangeEvent>,
) {
    let mut renames = RenamePairer::default();
    loop {
        let received = match renames.next_deadline() {
            Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        let mut changes = Vec::new();
        match received {
            Ok(Ok(event)) => changes.extend(renames.accept(&event, Instant::now())),
            Ok(Err(e)) => error!(error = ?e, "watch error"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                for (change, is_dir) in renames.drain() {
                    if !forward(filter, sink, change, is_dir) {
                        break;
                    }
                }
                return;
            }
        }
        changes.extend(renames.expire(Instant::now()));

        for (change, is_dir) in changes {
            if !forward(filter, sink, change, is_dir) {
                // Pipeline gone, nothing left to deliver to.
                return;
            }
        }
    }
}

/// Returns `false` once the pipeline side of the channel is closed.
fn forward(
    filter: &EventFilter,
    sink: &tokio_mpsc::Sender<ChangeEvent>,
    change: ChangeEvent,
    is_dir: bool,
) -> bool {
    if !filter.allows(&change, is_dir) {
        debug!(kind = change.kind_name(), path = %change.source_path().display(), "Filtered out");
        return true;
    }
    sink.blocking_send(change).is_ok()
}
