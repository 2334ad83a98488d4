//! Change monitor: turns raw filesystem notifications into debounced
//! reprocessing of files whose content has settled.
//!
//! The notification source is owned by the caller (the CLI wires `notify`);
//! this module only sees a stream of [`ChangeEvent`]s plus a
//! [`WatchRegistry`] used to follow newly created directories.

use crate::error::{MonitorError, ProcessError};
use crate::walker::walk_dirs;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
    Renamed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

pub type WatchEvent = Result<ChangeEvent, MonitorError>;

/// Registers directories with the notification source.
pub trait WatchRegistry: Send {
    fn watch(&mut self, dir: &Path) -> Result<(), MonitorError>;
}

/// Work done for a settled path.
#[async_trait::async_trait]
pub trait FileProcessor: Send + Sync {
    async fn process(&self, path: &Path) -> Result<(), ProcessError>;
    /// Called when a path disappears.
    async fn forget(&self, path: &Path) -> Result<(), ProcessError>;
}

/// Last-change timestamps per path. A path is settled once no change has
/// been seen for the settle window.
#[derive(Debug)]
pub struct Debouncer {
    pending: HashMap<PathBuf, Instant>,
    settle: Duration,
}

impl Debouncer {
    pub fn new(settle: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            settle,
        }
    }

    pub fn touch(&mut self, path: PathBuf, at: Instant) {
        self.pending.insert(path, at);
    }

    pub fn forget(&mut self, path: &Path) -> bool {
        self.pending.remove(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Removes and returns every path whose last change is at least the
    /// settle window before `now`, sorted for a stable dispatch order.
    pub fn take_settled(&mut self, now: Instant) -> Vec<PathBuf> {
        let settle = self.settle;
        let mut ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) >= settle)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &ready {
            self.pending.remove(path);
        }
        ready.sort();
        ready
    }
}

pub struct MonitorSettings {
    pub settle: Duration,
    pub tick: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(5),
            tick: Duration::from_secs(5),
        }
    }
}

pub struct ChangeMonitor<W, P> {
    registry: W,
    processor: Arc<P>,
    debouncer: Debouncer,
    tick: Duration,
}

impl<W: WatchRegistry, P: FileProcessor> ChangeMonitor<W, P> {
    pub fn new(registry: W, processor: Arc<P>, settings: MonitorSettings) -> Self {
        Self {
            registry,
            processor,
            debouncer: Debouncer::new(settings.settle),
            tick: settings.tick,
        }
    }

    /// Watches every directory under `root`, then reacts to `events` until
    /// the source closes. Only the initial registration is fatal.
    pub async fn run(
        mut self,
        root: &Path,
        mut events: mpsc::UnboundedReceiver<WatchEvent>,
    ) -> Result<(), MonitorError> {
        for dir in walk_dirs(root) {
            self.registry.watch(&dir?)?;
        }
        info!(root = %root.display(), "monitoring for changes");

        let mut ticker = time::interval_at(Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(Ok(change)) => self.on_change(change).await,
                    Some(Err(err)) => warn!("watch error: {err}"),
                    None => break,
                },
                now = ticker.tick() => self.dispatch_settled(now).await,
            }
        }
        info!("notification source closed; monitor stopped");
        Ok(())
    }

    async fn on_change(&mut self, change: ChangeEvent) {
        let ChangeEvent { kind, path } = change;
        debug!(?kind, path = %path.display(), "change");
        match kind {
            ChangeKind::Created => {
                if path.is_dir() {
                    self.follow_new_dir(&path);
                } else {
                    self.debouncer.touch(path, Instant::now());
                }
            }
            ChangeKind::Modified => {
                if !path.is_dir() {
                    self.debouncer.touch(path, Instant::now());
                }
            }
            ChangeKind::Renamed if path.exists() => {
                if path.is_dir() {
                    self.follow_new_dir(&path);
                } else {
                    self.debouncer.touch(path, Instant::now());
                }
            }
            ChangeKind::Renamed | ChangeKind::Removed => {
                self.debouncer.forget(&path);
                if let Err(err) = self.processor.forget(&path).await {
                    warn!("{err}");
                }
            }
        }
    }

    /// New directories may already hold files by the time the event arrives.
    fn follow_new_dir(&mut self, dir: &Path) {
        let now = Instant::now();
        for entry in walkdir::WalkDir::new(dir).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(dir = %dir.display(), "failed to enumerate new directory: {err}");
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                if let Err(err) = self.registry.watch(entry.path()) {
                    warn!("{err}");
                }
            } else if entry.file_type().is_file() {
                self.debouncer.touch(entry.into_path(), now);
            }
        }
    }

    async fn dispatch_settled(&mut self, now: Instant) {
        for path in self.debouncer.take_settled(now) {
            match std::fs::metadata(&path) {
                Ok(meta) if meta.is_file() => {}
                Ok(_) => continue,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    if let Err(err) = self.processor.forget(&path).await {
                        warn!("{err}");
                    }
                    continue;
                }
                Err(err) => {
                    warn!(path = %path.display(), "failed to stat changed file: {err}");
                    continue;
                }
            }
            info!(path = %path.display(), "processing settled file");
            if let Err(err) = self.processor.process(&path).await {
                warn!("{err}");
            }
        }
    }
}
