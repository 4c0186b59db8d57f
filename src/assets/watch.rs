use anyhow::Result;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::{images, scripts, styles, AssetPaths};

#[derive(Debug, Clone, Copy)]
enum Kind {
    Styles,
    Scripts,
    Images,
}

impl Kind {
    async fn rebuild(self, paths: &AssetPaths) -> Result<()> {
        match self {
            Kind::Styles => styles::build(paths).await,
            Kind::Scripts => scripts::build(paths).await,
            Kind::Images => images::build(paths).await,
        }
    }
}

/// Filesystem events on `dir`, forwarded into the runtime as unit signals.
fn watch_dir(
    dir: &Path,
    mode: RecursiveMode,
) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<()>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(_) => {
            let _ = tx.send(());
        }
        Err(e) => warn!("Watch error: {}", e),
    })?;
    watcher.watch(dir, mode)?;
    Ok((watcher, rx))
}

async fn rebuild_loop(
    kind: Kind,
    paths: Arc<AssetPaths>,
    watcher: RecommendedWatcher,
    mut events: mpsc::UnboundedReceiver<()>,
) {
    let _watcher = watcher;
    while events.recv().await.is_some() {
        // Collapse a burst of events into one rebuild
        while events.try_recv().is_ok() {}

        info!("Change detected, rebuilding {:?}", kind);
        if let Err(e) = kind.rebuild(&paths).await {
            error!("Rebuilding {:?} failed: {:#}", kind, e);
        }
    }
}

/// Rebuild each asset class when its source directory changes. Runs until
/// interrupted.
pub async fn run(paths: Arc<AssetPaths>) -> Result<()> {
    let watched = [
        (Kind::Styles, paths.styles_dir.clone(), RecursiveMode::NonRecursive),
        (Kind::Scripts, paths.scripts_dir.clone(), RecursiveMode::NonRecursive),
        (Kind::Images, paths.images_dir.clone(), RecursiveMode::Recursive),
    ];

    let mut tasks = JoinSet::new();
    for (kind, dir, mode) in watched {
        let (watcher, events) = watch_dir(&dir, mode)?;
        info!("Watching {} for {:?}", dir.display(), kind);
        tasks.spawn(rebuild_loop(kind, paths.clone(), watcher, events));
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Stopping watch"),
        _ = tasks.join_next() => warn!("Watcher stopped unexpectedly"),
    }

    tasks.shutdown().await;
    Ok(())
}
