use anyhow::Result;
use notify::event::{EventKind, ModifyKind};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use smartdir_core::config::AppConfig;
use smartdir_core::monitor::{
    ChangeEvent, ChangeKind, ChangeMonitor, MonitorSettings, WatchEvent, WatchRegistry,
};
use smartdir_core::pipeline;
use smartdir_core::MonitorError;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Directory watches backed by the platform notifier. Each directory is
/// watched on its own so new subdirectories can be added as they appear.
pub struct NotifyRegistry {
    watcher: RecommendedWatcher,
}

impl NotifyRegistry {
    pub fn new(events: mpsc::UnboundedSender<WatchEvent>) -> Result<Self> {
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for change in change_events(&event) {
                        let _ = events.send(Ok(change));
                    }
                }
                Err(err) => {
                    let _ = events.send(Err(MonitorError::Source(err.to_string())));
                }
            },
            notify::Config::default(),
        )?;
        Ok(Self { watcher })
    }
}

impl WatchRegistry for NotifyRegistry {
    fn watch(&mut self, dir: &Path) -> Result<(), MonitorError> {
        self.watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|err| MonitorError::Watch {
                path: dir.to_path_buf(),
                reason: err.to_string(),
            })
    }
}

/// Translates one notifier event into monitor events. Access and
/// unclassified events are dropped.
pub fn change_events(event: &Event) -> Vec<ChangeEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Created,
        EventKind::Modify(ModifyKind::Name(_)) => ChangeKind::Renamed,
        EventKind::Modify(_) => ChangeKind::Modified,
        EventKind::Remove(_) => ChangeKind::Removed,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return Vec::new(),
    };
    event
        .paths
        .iter()
        .map(|path| ChangeEvent::new(kind, path.clone()))
        .collect()
}

pub async fn monitor_path(cfg: &AppConfig, root: &Path) -> Result<()> {
    let pipeline = pipeline::build_pipeline(cfg).await?;
    pipeline.prepare_index().await?;

    let (tx, rx) = mpsc::unbounded_channel();
    let registry = NotifyRegistry::new(tx)?;
    let settle = Duration::from_secs(cfg.monitor.settle_secs.max(1));
    let monitor = ChangeMonitor::new(
        registry,
        Arc::new(pipeline),
        MonitorSettings {
            settle,
            tick: settle,
        },
    );

    println!("Monitoring {} for changes (Ctrl-C to stop)...", root.display());
    tokio::select! {
        res = monitor.run(root, rx) => res?,
        _ = tokio::signal::ctrl_c() => println!("Stopping monitor"),
    }
    Ok(())
}
