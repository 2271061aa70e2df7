//! Ingestion orchestrator: startup sweep, watch loop, and per-file processing
//! (extract -> optimized derivative -> thumbnail -> manifest upsert + persist).

use crate::config::{AppConfig, PathsConfig, SizesConfig, UrlConfig, WatchConfig};
use crate::error::{PipelineError, ProcessError, WatchError};
use crate::extractor::{self, SourceMetadata};
use crate::manifest::{ManifestStats, ManifestStore};
use crate::models::{compression_percent, normalize_name, DimensionSet, ImageRecord, OUTPUT_EXTENSION};
use crate::resizer::{Derivative, Resizer};
use crate::scanner;
use crate::watcher::{FileWatcher, WatchHandle, WatchMessage};
use anyhow::Context;
use chrono::{DateTime, Utc};
use globset::GlobSet;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::{self, JoinSet};
use tracing::{debug, error, info, warn};

const EVENT_BUFFER: usize = 1024;
const RESTART_BACKOFF: Duration = Duration::from_millis(500);

/// Result of asking the pipeline to handle one path.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Processed(ImageRecord),
    /// Manifest record is at least as new as the file.
    Skipped { name: String },
    /// Another task is already processing a file with the same name.
    InFlight { path: PathBuf },
    /// Unsupported, hidden, or excluded path.
    Ignored { path: PathBuf },
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedFile {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub processed: Vec<String>,
    pub skipped: usize,
    pub ignored: usize,
    pub failed: Vec<FailedFile>,
}

impl BatchSummary {
    fn record(&mut self, path: PathBuf, result: Result<FileOutcome, ProcessError>) {
        match result {
            Ok(FileOutcome::Processed(record)) => self.processed.push(record.name),
            Ok(FileOutcome::Skipped { .. } | FileOutcome::InFlight { .. }) => self.skipped += 1,
            Ok(FileOutcome::Ignored { .. }) => self.ignored += 1,
            Err(e) => self.failed.push(FailedFile {
                path,
                error: e.to_string(),
            }),
        }
    }
}

/// Processing tasks, each remembered by the source path it was spawned for
/// so a task that panics still reports which file it was working on.
struct FileTasks {
    set: JoinSet<Result<FileOutcome, ProcessError>>,
    paths: HashMap<task::Id, PathBuf>,
}

impl FileTasks {
    fn new() -> Self {
        Self {
            set: JoinSet::new(),
            paths: HashMap::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    fn spawn<F>(&mut self, path: PathBuf, work: F)
    where
        F: Future<Output = Result<FileOutcome, ProcessError>> + Send + 'static,
    {
        let handle = self.set.spawn(work);
        self.paths.insert(handle.id(), path);
    }

    fn spawn_file(&mut self, pipeline: &Pipeline, path: PathBuf) {
        let pipeline = pipeline.clone();
        let source = path.clone();
        self.spawn(path, async move { pipeline.process_file(&source).await });
    }

    async fn join_next(&mut self) -> Option<(PathBuf, Result<FileOutcome, ProcessError>)> {
        match self.set.join_next_with_id().await? {
            Ok((id, result)) => Some((self.paths.remove(&id).unwrap_or_default(), result)),
            Err(e) => {
                let path = self.paths.remove(&e.id()).unwrap_or_default();
                error!("processing task for {} did not complete: {e}", path.display());
                let reason = e.to_string();
                Some((path.clone(), Err(ProcessError::Task { path, reason })))
            }
        }
    }
}

struct Derived {
    source: SourceMetadata,
    optimized: Derivative,
    thumbnail: Derivative,
}

#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    paths: PathsConfig,
    sizes: SizesConfig,
    urls: UrlConfig,
    watch: WatchConfig,
    prune_orphans: bool,
    excludes: GlobSet,
    resizer: Resizer,
    store: Mutex<ManifestStore>,
    in_flight: std::sync::Mutex<HashSet<String>>,
    permits: Semaphore,
}

/// Marks a normalized name as being processed until dropped.
struct InFlightGuard<'a> {
    set: &'a std::sync::Mutex<HashSet<String>>,
    name: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a std::sync::Mutex<HashSet<String>>, name: &str) -> Option<Self> {
        let mut guard = set.lock().unwrap_or_else(|p| p.into_inner());
        guard.insert(name.to_string()).then(|| Self {
            set,
            name: name.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut guard = self.set.lock().unwrap_or_else(|p| p.into_inner());
        guard.remove(&self.name);
    }
}

impl Pipeline {
    /// Validates `cfg`, creates the output directories and loads the manifest.
    pub async fn new(cfg: &AppConfig) -> anyhow::Result<Self> {
        cfg.validate()?;
        for dir in [&cfg.paths.optimized_dir, &cfg.paths.thumbnail_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("create output dir {}", dir.display()))?;
        }
        let excludes = scanner::build_globset(&cfg.scan.exclude).context("scan.exclude")?;
        let store = ManifestStore::load(&cfg.paths.manifest_path).await;
        info!(
            "loaded manifest {} with {} records",
            cfg.paths.manifest_path.display(),
            store.len()
        );

        Ok(Self {
            inner: Arc::new(PipelineInner {
                paths: cfg.paths.clone(),
                sizes: cfg.sizes.clone(),
                urls: cfg.urls.clone(),
                watch: cfg.watch.clone(),
                prune_orphans: cfg.manifest.prune_orphans,
                excludes,
                resizer: Resizer::new(cfg.encoding.quality),
                store: Mutex::new(store),
                in_flight: std::sync::Mutex::new(HashSet::new()),
                permits: Semaphore::new(cfg.watch.concurrency.max(1)),
            }),
        })
    }

    pub fn input_dir(&self) -> &Path {
        &self.inner.paths.input_dir
    }

    pub fn qualifies(&self, path: &Path) -> bool {
        scanner::is_candidate(path) && !scanner::is_excluded(path, &self.inner.excludes)
    }

    pub async fn stats(&self) -> ManifestStats {
        self.inner.store.lock().await.stats()
    }

    pub async fn record(&self, name: &str) -> Option<ImageRecord> {
        self.inner.store.lock().await.get(name).cloned()
    }

    /// Snapshot of every record, ordered by name.
    pub async fn records(&self) -> Vec<ImageRecord> {
        self.inner
            .store
            .lock()
            .await
            .records()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Processes one source file. Failures are logged here and leave any
    /// existing manifest record untouched.
    pub async fn process_file(&self, path: &Path) -> Result<FileOutcome, ProcessError> {
        let result = self.process_inner(path).await;
        match &result {
            Ok(FileOutcome::Processed(record)) => info!(
                "processed {} -> {} ({} -> {} bytes, {}%)",
                path.display(),
                record.name,
                record.original_size,
                record.optimized_size,
                record.compression
            ),
            Ok(FileOutcome::Skipped { name }) => debug!("{name} is up to date, skipping"),
            Ok(FileOutcome::InFlight { .. }) => debug!("{} already in flight", path.display()),
            Ok(FileOutcome::Ignored { .. }) => debug!("ignoring {}", path.display()),
            Err(e) => warn!("failed to process {}: {e}", path.display()),
        }
        result
    }

    async fn process_inner(&self, path: &Path) -> Result<FileOutcome, ProcessError> {
        if !self.qualifies(path) {
            return Ok(FileOutcome::Ignored {
                path: path.to_path_buf(),
            });
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(normalize_name)
            .ok_or_else(|| ProcessError::InvalidName {
                path: path.to_path_buf(),
            })?;

        let Some(_guard) = InFlightGuard::acquire(&self.inner.in_flight, &name) else {
            return Ok(FileOutcome::InFlight {
                path: path.to_path_buf(),
            });
        };
        let _permit = self
            .inner
            .permits
            .acquire()
            .await
            .map_err(|e| ProcessError::Task {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let modified =
            extractor::file_modified(path).map_err(|e| ProcessError::unreadable(path, e))?;
        let up_to_date = self
            .inner
            .store
            .lock()
            .await
            .get(&name)
            .map(|r| r.processed >= modified)
            .unwrap_or(false);
        if up_to_date {
            return Ok(FileOutcome::Skipped { name });
        }

        let started = Utc::now();
        let inner = Arc::clone(&self.inner);
        let source = path.to_path_buf();
        let file_name = format!("{name}.{OUTPUT_EXTENSION}");
        let derived = {
            let file_name = file_name.clone();
            tokio::task::spawn_blocking(move || inner.derive(&source, &file_name))
                .await
                .map_err(|e| ProcessError::Task {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })??
        };

        let record = self.inner.build_record(name, file_name, derived, started);
        let mut store = self.inner.store.lock().await;
        store.upsert(record.clone());
        if let Err(e) = store.persist().await {
            error!(
                "could not persist manifest {} (kept in memory, will retry): {e}",
                store.path().display()
            );
        }
        Ok(FileOutcome::Processed(record))
    }

    /// Processes every qualifying file currently in the input directory.
    pub async fn process_all(&self) -> BatchSummary {
        let dir = self.inner.paths.input_dir.clone();
        match scanner::list_candidates(&dir, &self.inner.excludes) {
            Ok(paths) => {
                debug!("sweep found {} candidates in {}", paths.len(), dir.display());
                self.process_paths(paths).await
            }
            Err(e) => {
                error!("cannot list {}: {e}", dir.display());
                BatchSummary {
                    failed: vec![FailedFile {
                        path: dir,
                        error: e.to_string(),
                    }],
                    ..BatchSummary::default()
                }
            }
        }
    }

    /// Processes `paths` concurrently (bounded by `watch.concurrency`) and
    /// collects every outcome; no per-file error escapes.
    pub async fn process_paths(&self, paths: Vec<PathBuf>) -> BatchSummary {
        let mut tasks = FileTasks::new();
        for path in paths {
            tasks.spawn_file(self, path);
        }

        let mut summary = BatchSummary::default();
        while let Some((path, result)) = tasks.join_next().await {
            summary.record(path, result);
        }
        summary.processed.sort();
        summary
    }

    /// Names of records with no matching source file left in the input directory.
    pub async fn find_orphans(&self) -> std::io::Result<Vec<String>> {
        let store = self.inner.store.lock().await;
        self.inner.orphans_in(&store)
    }

    /// Removes records with no matching source file left in the input
    /// directory. Returns the removed names.
    pub async fn prune(&self, delete_derivatives: bool) -> Vec<String> {
        let mut store = self.inner.store.lock().await;
        let orphans = match self.inner.orphans_in(&store) {
            Ok(orphans) => orphans,
            Err(e) => {
                warn!(
                    "cannot list {} ({e}); not pruning",
                    self.inner.paths.input_dir.display()
                );
                return Vec::new();
            }
        };
        for name in &orphans {
            store.remove(name);
            if delete_derivatives {
                self.inner.remove_derivatives(name).await;
            }
        }
        if !orphans.is_empty() {
            info!("pruned {} orphaned records", orphans.len());
            if let Err(e) = store.persist().await {
                error!("could not persist manifest after prune: {e}");
            }
        }
        orphans
    }

    /// Subscribes to the input directory, sweeps it, then processes watcher
    /// events until `shutdown` resolves. Events that arrive during the sweep
    /// are buffered and handled afterwards. In-flight work is awaited before
    /// returning.
    pub async fn run<W, F>(&self, watcher: &W, shutdown: F) -> Result<BatchSummary, PipelineError>
    where
        W: FileWatcher + ?Sized,
        F: Future<Output = ()>,
    {
        let dir = self.inner.paths.input_dir.clone();
        tokio::fs::create_dir_all(&dir).await?;
        tokio::pin!(shutdown);

        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let Some(mut handle) = self
            .establish_watch(watcher, &dir, &tx, shutdown.as_mut())
            .await?
        else {
            info!("shutdown requested before the watch was established");
            return Ok(BatchSummary::default());
        };
        info!("watching {} for new images", dir.display());

        let mut session = self.process_all().await;
        if self.inner.prune_orphans {
            self.prune(false).await;
        }
        info!(
            "startup sweep: {} processed, {} skipped, {} failed",
            session.processed.len(),
            session.skipped,
            session.failed.len()
        );

        let debounce = self.inner.watch.debounce();
        let mut tick = tokio::time::interval(tick_period(debounce));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
        let mut tasks = FileTasks::new();
        let mut rewatch = false;
        let mut subscribed = true;

        let exit = loop {
            tokio::select! {
                _ = &mut shutdown => break Ok(()),
                Some(msg) = rx.recv() => match msg {
                    WatchMessage::Event(ev) => {
                        debug!("{:?} {}", ev.kind, ev.path.display());
                        pending.insert(ev.path, Instant::now());
                    }
                    WatchMessage::Error(reason) => {
                        warn!("watcher error on {}: {reason}", dir.display());
                        rewatch = true;
                    }
                },
                Some((path, result)) = tasks.join_next(), if !tasks.is_empty() => match result {
                    // The running task may predate the latest write; check again once it finishes.
                    Ok(FileOutcome::InFlight { .. }) => {
                        pending.entry(path).or_insert_with(Instant::now);
                    }
                    result => session.record(path, result),
                },
                _ = tick.tick() => {
                    let now = Instant::now();
                    let ready: Vec<PathBuf> = pending
                        .iter()
                        .filter(|(_, seen)| now.duration_since(**seen) >= debounce)
                        .map(|(path, _)| path.clone())
                        .collect();
                    for path in ready {
                        pending.remove(&path);
                        tasks.spawn_file(self, path);
                    }

                    if !dir.is_dir() {
                        warn!("input directory {} disappeared", dir.display());
                        rewatch = true;
                    }
                    if rewatch {
                        rewatch = false;
                        watcher.unsubscribe(handle);
                        subscribed = false;
                        match self.establish_watch(watcher, &dir, &tx, shutdown.as_mut()).await {
                            Ok(Some(h)) => {
                                handle = h;
                                subscribed = true;
                            }
                            Ok(None) => break Ok(()),
                            Err(e) => break Err(e),
                        }
                    }

                    self.retry_persist().await;
                }
            }
        };

        if subscribed {
            watcher.unsubscribe(handle);
        }
        if !pending.is_empty() {
            info!("dropping {} queued events on shutdown", pending.len());
        }
        while let Some((path, result)) = tasks.join_next().await {
            session.record(path, result);
        }
        self.retry_persist().await;

        exit?;
        info!(
            "watch session ended: {} processed, {} skipped, {} failed",
            session.processed.len(),
            session.skipped,
            session.failed.len()
        );
        Ok(session)
    }

    /// Subscribes to `dir`, recreating it if needed. Failed attempts back off
    /// linearly; after `watch.max_restarts` of them in a row the watch is
    /// given up. Returns `None` if `shutdown` resolves while backing off.
    async fn establish_watch<W, F>(
        &self,
        watcher: &W,
        dir: &Path,
        tx: &mpsc::Sender<WatchMessage>,
        mut shutdown: Pin<&mut F>,
    ) -> Result<Option<WatchHandle>, WatchError>
    where
        W: FileWatcher + ?Sized,
        F: Future<Output = ()>,
    {
        let attempts = self.inner.watch.max_restarts.max(1);
        for attempt in 1..=attempts {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                warn!("cannot create {}: {e}", dir.display());
            }
            match watcher.subscribe(dir, tx.clone()) {
                Ok(handle) => {
                    if attempt > 1 {
                        info!("watch on {} established after {attempt} attempts", dir.display());
                    }
                    return Ok(Some(handle));
                }
                Err(e) => {
                    warn!("watch attempt {attempt}/{attempts} failed: {e}");
                    if attempt < attempts {
                        tokio::select! {
                            _ = shutdown.as_mut() => return Ok(None),
                            _ = tokio::time::sleep(RESTART_BACKOFF * attempt) => {}
                        }
                    }
                }
            }
        }
        Err(WatchError::Exhausted {
            dir: dir.to_path_buf(),
            attempts,
        })
    }

    async fn retry_persist(&self) {
        let mut store = self.inner.store.lock().await;
        if !store.is_dirty() {
            return;
        }
        match store.persist().await {
            Ok(()) => info!("manifest {} persisted after earlier failure", store.path().display()),
            Err(e) => debug!("manifest still not writable: {e}"),
        }
    }
}

impl PipelineInner {
    /// Blocking part of processing; runs on the blocking pool.
    fn derive(&self, source: &Path, file_name: &str) -> Result<Derived, ProcessError> {
        let meta = extractor::extract(source)?;
        let img = self.resizer.decode(source)?;
        let optimized = self.resizer.render(
            &img,
            self.sizes.optimized,
            &self.paths.optimized_dir.join(file_name),
        )?;
        let thumbnail = self.resizer.render(
            &img,
            self.sizes.thumbnail,
            &self.paths.thumbnail_dir.join(file_name),
        )?;
        Ok(Derived {
            source: meta,
            optimized,
            thumbnail,
        })
    }

    fn build_record(
        &self,
        name: String,
        file_name: String,
        derived: Derived,
        processed: DateTime<Utc>,
    ) -> ImageRecord {
        let Derived {
            source,
            optimized,
            thumbnail,
        } = derived;
        ImageRecord {
            url: public_url(&self.urls.optimized_prefix, &file_name),
            thumbnail_url: public_url(&self.urls.thumbnail_prefix, &file_name),
            name,
            filename: file_name,
            extension: format!(".{OUTPUT_EXTENSION}"),
            original_size: source.size,
            optimized_size: optimized.size,
            thumbnail_size: thumbnail.size,
            dimensions: DimensionSet {
                original: crate::models::Dimensions::new(source.width, source.height),
                optimized: optimized.dimensions(),
                thumbnail: thumbnail.dimensions(),
            },
            compression: compression_percent(source.size, optimized.size),
            processed,
        }
    }

    fn orphans_in(&self, store: &ManifestStore) -> std::io::Result<Vec<String>> {
        let live: HashSet<String> = scanner::list_candidates(&self.paths.input_dir, &self.excludes)?
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .filter_map(normalize_name)
            .collect();
        Ok(store
            .records()
            .into_iter()
            .filter(|r| !live.contains(&r.name))
            .map(|r| r.name.clone())
            .collect())
    }

    async fn remove_derivatives(&self, name: &str) {
        let file_name = format!("{name}.{OUTPUT_EXTENSION}");
        for dir in [&self.paths.optimized_dir, &self.paths.thumbnail_dir] {
            let path = dir.join(&file_name);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("could not remove {}: {e}", path.display()),
            }
        }
    }
}

fn public_url(prefix: &str, file_name: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), file_name)
}

fn tick_period(debounce: Duration) -> Duration {
    (debounce / 2).clamp(Duration::from_millis(10), Duration::from_millis(250))
}
