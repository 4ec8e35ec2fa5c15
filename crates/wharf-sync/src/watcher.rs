//! Live filesystem notifications driving incremental synchronization.

use std::sync::Arc;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{info, warn};
use wharf_core::{
    cancel::CancellationToken,
    error::{ErrorContext, FeedError},
    FeedResult,
};

use crate::synchronizer::Synchronizer;

/// Watches the package-file tree and reconciles single items as they
/// appear, change, or vanish. Kept alive for the lifetime of the feed;
/// dropping it stops the notifications.
pub struct PackageFileWatcher {
    _watcher: RecommendedWatcher,
}

impl PackageFileWatcher {
    /// Starts watching the synchronizer's package root.
    ///
    /// Events arrive on the OS watcher thread. Unambiguous file events
    /// reconcile just the affected manifest; anything ambiguous falls back
    /// to requesting a full (coalesced) pass.
    pub fn start(
        synchronizer: Arc<Synchronizer>,
        token: CancellationToken,
    ) -> FeedResult<Self> {
        let root = synchronizer.layout().root().to_path_buf();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("creating package directory {}", root.display()))?;

        let cb_token = token.clone();
        let cb_sync = Arc::clone(&synchronizer);
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if cb_token.is_cancelled() {
                    return;
                }
                match res {
                    Ok(event) => handle_event(&cb_sync, &cb_token, event),
                    Err(err) => warn!("file watcher error: {err}"),
                }
            },
            Config::default(),
        )
        .map_err(|err| FeedError::WatchError(err.to_string()))?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|err| FeedError::WatchError(err.to_string()))?;
        info!("watching {} for package file changes", root.display());

        Ok(Self { _watcher: watcher })
    }
}

fn handle_event(synchronizer: &Synchronizer, token: &CancellationToken, event: Event) {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {
            for path in &event.paths {
                if let Err(err) = synchronizer.sync_one(path) {
                    warn!("reconciling {} failed: {err}", path.display());
                }
            }
        }
        EventKind::Access(_) => {}
        // Catch-all kinds carry too little to reconcile a single item.
        _ => synchronizer.request_sync(token),
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, time::Duration};

    use tempfile::TempDir;
    use wharf_core::layout::PackageLayout;
    use wharf_index::PackageIndex;

    use super::*;

    /// Small delay to let OS file events propagate.
    fn settle() {
        std::thread::sleep(Duration::from_millis(500));
    }

    #[test]
    fn live_events_keep_the_index_current() {
        let dir = TempDir::new().unwrap();
        let index = PackageIndex::in_memory().unwrap();
        let layout = PackageLayout::new(dir.path().to_path_buf(), true);
        let sync = Arc::new(Synchronizer::new(index, layout));

        let _watcher = PackageFileWatcher::start(Arc::clone(&sync), CancellationToken::new()).unwrap();

        let pkg_dir = dir.path().join("live");
        fs::create_dir_all(&pkg_dir).unwrap();
        let path = pkg_dir.join("live-1.0.0.pkg.json");
        fs::write(&path, r#"{"id": "live", "version": "1.0.0"}"#).unwrap();
        settle();

        // The watcher indexed the new file, so a manual pass finds nothing.
        let report = sync.synchronize(&CancellationToken::new()).unwrap();
        assert!(report.is_clean(), "expected watcher to index the file: {report:?}");

        fs::remove_file(&path).unwrap();
        settle();
        let report = sync.synchronize(&CancellationToken::new()).unwrap();
        assert!(report.is_clean(), "expected watcher to drop the entry: {report:?}");
    }

    #[test]
    fn cancelled_token_stops_event_handling() {
        let dir = TempDir::new().unwrap();
        let index = PackageIndex::in_memory().unwrap();
        let layout = PackageLayout::new(dir.path().to_path_buf(), false);
        let sync = Arc::new(Synchronizer::new(index, layout));

        let controller = wharf_core::cancel::CancellationController::new();
        let token = controller.token();
        let _watcher = PackageFileWatcher::start(Arc::clone(&sync), token).unwrap();
        controller.cancel();

        fs::write(
            dir.path().join("late-1.0.0.pkg.json"),
            r#"{"id": "late", "version": "1.0.0"}"#,
        )
        .unwrap();
        settle();

        // The manual pass still sees the file; the watcher must not have.
        let report = sync.synchronize(&CancellationToken::new()).unwrap();
        assert_eq!(report.added.len(), 1);
    }
}
