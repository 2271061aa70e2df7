//! File-system event source for the ingestion loop.
//!
//! The pipeline only sees [`FileWatcher`]; [`NotifyWatcher`] backs it with
//! either OS notifications or polling.

use crate::config::{WatchConfig, WatchMode};
use crate::error::WatchError;
use crate::scanner::is_candidate;
use notify::event::ModifyKind;
use notify::{Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchMessage {
    Event(WatchEvent),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchHandle(u64);

impl WatchHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Subscription-style source of create/modify events for one directory.
/// Messages keep flowing into `sink` until the handle is unsubscribed.
pub trait FileWatcher: Send + Sync {
    fn subscribe(
        &self,
        dir: &Path,
        sink: mpsc::Sender<WatchMessage>,
    ) -> Result<WatchHandle, WatchError>;

    fn unsubscribe(&self, handle: WatchHandle);
}

pub struct NotifyWatcher {
    mode: WatchMode,
    poll_interval: Duration,
    next_id: AtomicU64,
    active: Mutex<HashMap<u64, Box<dyn Watcher + Send>>>,
}

impl NotifyWatcher {
    pub fn new(mode: WatchMode, poll_interval: Duration) -> Self {
        Self {
            mode,
            poll_interval,
            next_id: AtomicU64::new(1),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(cfg: &WatchConfig) -> Self {
        Self::new(cfg.mode, cfg.poll_interval())
    }

    fn build(&self, sink: mpsc::Sender<WatchMessage>) -> notify::Result<Box<dyn Watcher + Send>> {
        let config = notify::Config::default().with_poll_interval(self.poll_interval);
        let handler = move |res: notify::Result<Event>| {
            let messages = match res {
                Ok(event) => translate(event).into_iter().map(WatchMessage::Event).collect(),
                Err(e) => vec![WatchMessage::Error(e.to_string())],
            };
            for msg in messages {
                // Receiver gone means the subscriber stopped listening.
                if sink.blocking_send(msg).is_err() {
                    break;
                }
            }
        };
        Ok(match self.mode {
            WatchMode::Native => Box::new(RecommendedWatcher::new(handler, config)?),
            WatchMode::Poll => Box::new(PollWatcher::new(handler, config)?),
        })
    }
}

impl FileWatcher for NotifyWatcher {
    fn subscribe(
        &self,
        dir: &Path,
        sink: mpsc::Sender<WatchMessage>,
    ) -> Result<WatchHandle, WatchError> {
        // The poll backend accepts a missing root and only reports it later.
        if !dir.is_dir() {
            return Err(WatchError::Init {
                dir: dir.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }
        let init = |e: notify::Error| WatchError::Init {
            dir: dir.to_path_buf(),
            reason: e.to_string(),
        };
        let mut watcher = self.build(sink).map_err(init)?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(init)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.active.lock() {
            Ok(mut active) => {
                active.insert(id, watcher);
            }
            Err(_) => {
                return Err(WatchError::Init {
                    dir: dir.to_path_buf(),
                    reason: "watch registry lock poisoned".to_string(),
                })
            }
        }
        debug!("watching {} ({:?}, handle {id})", dir.display(), self.mode);
        Ok(WatchHandle(id))
    }

    fn unsubscribe(&self, handle: WatchHandle) {
        let removed = match self.active.lock() {
            Ok(mut active) => active.remove(&handle.0),
            Err(poisoned) => poisoned.into_inner().remove(&handle.0),
        };
        if removed.is_none() {
            warn!("unsubscribe for unknown watch handle {}", handle.0);
        }
    }
}

/// Maps a raw notify event onto the create/modify events the pipeline
/// cares about, dropping paths that can never be processed.
fn translate(event: Event) -> Vec<WatchEvent> {
    let kind = match classify(&event.kind) {
        Some(kind) => kind,
        None => return Vec::new(),
    };
    event
        .paths
        .into_iter()
        .filter(|p| is_candidate(p) && p.is_file())
        .map(|path| WatchEvent { kind, path })
        .collect()
}

fn classify(kind: &EventKind) -> Option<WatchEventKind> {
    match kind {
        EventKind::Create(_) => Some(WatchEventKind::Created),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(WatchEventKind::Modified),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind, RenameMode};

    #[test]
    fn classifies_only_create_and_content_changes() {
        assert_eq!(
            classify(&EventKind::Create(CreateKind::File)),
            Some(WatchEventKind::Created)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(WatchEventKind::Modified)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Name(RenameMode::To))),
            Some(WatchEventKind::Modified)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any))),
            None
        );
        assert_eq!(classify(&EventKind::Remove(RemoveKind::File)), None);
        assert_eq!(classify(&EventKind::Access(AccessKind::Any)), None);
    }

    #[test]
    fn translate_filters_unsupported_hidden_and_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("cat.png");
        let hidden = dir.path().join(".cat.png");
        let text = dir.path().join("cat.txt");
        for p in [&good, &hidden, &text] {
            std::fs::write(p, b"x").unwrap();
        }
        let gone = dir.path().join("gone.png");

        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(good.clone())
            .add_path(hidden)
            .add_path(text)
            .add_path(gone)
            .add_path(dir.path().to_path_buf());
        assert_eq!(
            translate(event),
            vec![WatchEvent {
                kind: WatchEventKind::Created,
                path: good
            }]
        );
    }

    #[tokio::test]
    async fn subscribe_to_missing_directory_fails() {
        let watcher = NotifyWatcher::new(WatchMode::Poll, Duration::from_millis(50));
        let (tx, _rx) = mpsc::channel(8);
        let err = watcher
            .subscribe(Path::new("/no/such/upload/dir"), tx)
            .unwrap_err();
        assert!(matches!(err, WatchError::Init { .. }));
    }

    #[tokio::test]
    async fn poll_watcher_reports_new_images() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = NotifyWatcher::new(WatchMode::Poll, Duration::from_millis(50));
        let (tx, mut rx) = mpsc::channel(64);
        let handle = watcher.subscribe(dir.path(), tx).unwrap();

        let path = dir.path().join("fresh.png");
        std::fs::write(&path, b"pretend image").unwrap();

        let got = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(msg) = rx.recv().await {
                if let WatchMessage::Event(ev) = msg {
                    if ev.path.file_name() == path.file_name() {
                        return Some(ev);
                    }
                }
            }
            None
        })
        .await
        .ok()
        .flatten();
        watcher.unsubscribe(handle);
        assert!(got.is_some(), "poll watcher should report fresh.png");
    }
}
