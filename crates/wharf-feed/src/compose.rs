//! Explicit, ordered construction of the feed's object graph.
//!
//! Each component receives its dependencies as constructor arguments;
//! there is no container and no runtime wiring.

use std::{sync::Arc, thread};

use tracing::{info, warn};
use wharf_auth::{AuthenticationChain, FeedRequest, Principal};
use wharf_config::FeedSettings;
use wharf_core::{cancel::CancellationController, layout::PackageLayout, FeedResult};
use wharf_index::{PackageIndex, UserStore};
use wharf_mirror::{HttpRemoteFeed, MirroringRepository, RemoteFeed};
use wharf_sync::{PackageFileWatcher, SyncReport, Synchronizer};

/// A fully-wired package feed.
///
/// The HTTP layer holds one of these and issues catalog operations
/// against `repository` after resolving each request's principal through
/// `authenticate`.
pub struct Feed {
    pub settings: FeedSettings,
    pub repository: Arc<MirroringRepository>,
    pub synchronizer: Arc<Synchronizer>,
    pub users: UserStore,
    pub cancellation: Arc<CancellationController>,
    auth: AuthenticationChain,
    watcher: Option<PackageFileWatcher>,
    startup_sync: Option<thread::JoinHandle<()>>,
}

/// Builds the whole feed from a settings snapshot.
///
/// Construction order: index, user store (with administrator bootstrap),
/// synchronizer, upstream feed, mirroring repository, authentication
/// chain, cancellation controller, then the optional watcher and the
/// optional startup synchronization pass.
pub fn compose(settings: FeedSettings) -> FeedResult<Feed> {
    let index = PackageIndex::open(&settings.index_path)?;
    let users = UserStore::open(&settings.index_path)?;

    if let Some(key) = &settings.local_administrator_api_key {
        users.bootstrap_local_administrator(key)?;
    }

    let layout = PackageLayout::new(settings.packages_path.clone(), settings.group_packages_by_id);
    let synchronizer = Arc::new(Synchronizer::new(index.clone(), layout.clone()));

    let remote: Option<Arc<dyn RemoteFeed>> = match &settings.mirror_target_url {
        Some(url) => match HttpRemoteFeed::new(url, settings.mirror_timeout) {
            Ok(feed) => Some(Arc::new(feed)),
            Err(err) => {
                warn!("mirroring disabled: {err}");
                None
            }
        },
        None => None,
    };

    let repository = Arc::new(MirroringRepository::new(
        index,
        layout,
        remote,
        settings.always_check_mirror,
    ));

    let auth = AuthenticationChain::assemble(&settings, users.clone());
    let cancellation = Arc::new(CancellationController::new());

    let watcher = if settings.enable_package_file_watcher {
        match PackageFileWatcher::start(Arc::clone(&synchronizer), cancellation.token()) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!("live synchronization unavailable: {err}");
                None
            }
        }
    } else {
        None
    };

    let startup_sync = if settings.synchronize_on_start {
        let synchronizer = Arc::clone(&synchronizer);
        let token = cancellation.token();
        Some(thread::spawn(move || match synchronizer.synchronize(&token) {
            Ok(report) => info!(
                "startup synchronization: {} added, {} updated, {} removed, {} failed",
                report.added.len(),
                report.updated.len(),
                report.removed.len(),
                report.failures.len()
            ),
            Err(err) => warn!("startup synchronization failed: {err}"),
        }))
    } else {
        None
    };

    Ok(Feed {
        settings,
        repository,
        synchronizer,
        users,
        cancellation,
        auth,
        watcher,
        startup_sync,
    })
}

impl Feed {
    /// Resolves the principal for one inbound request.
    pub fn authenticate(&self, request: &FeedRequest) -> FeedResult<Principal> {
        self.auth.authenticate(request)
    }

    /// Runs a full synchronization pass under the current cancellation
    /// token.
    pub fn synchronize(&self) -> FeedResult<SyncReport> {
        let token = self.cancellation.token();
        self.synchronizer.synchronize(&token)
    }

    /// Cancels in-flight work and waits for the startup pass to finish.
    pub fn shutdown(mut self) {
        self.cancellation.cancel();
        self.watcher.take();
        if let Some(handle) = self.startup_sync.take() {
            let _ = handle.join();
        }
    }
}
