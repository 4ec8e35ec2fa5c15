//! The catalog surface served to the HTTP layer: a local package index
//! transparently overlaid with an optional upstream feed.

use std::{
    collections::{hash_map::Entry, HashMap},
    fs,
    sync::{Arc, Mutex},
};

use semver::Version;
use tracing::{info, warn};
use wharf_core::{
    checksum::file_checksum,
    error::{ErrorContext, FeedError},
    layout::PackageLayout,
    package::{Package, PackageId, PackageKey, PackageManifest},
    FeedResult,
};
use wharf_index::PackageIndex;

use crate::remote::RemoteFeed;

/// One upstream fetch shared by every concurrent caller of its key. The
/// outer `Option` stays empty until someone completes the fetch; the
/// inner one is the upstream answer.
type FetchSlot = Mutex<Option<Option<Package>>>;

/// Wraps the package index with mirroring, push and delete.
///
/// Lookup policy: local-first by default; with `always_check` the upstream
/// is queried first and any upstream failure falls back to the local copy
/// (fail-open). Packages fetched from upstream are materialized on disk
/// and indexed before being returned, so later lookups stay local.
pub struct MirroringRepository {
    index: PackageIndex,
    layout: PackageLayout,
    remote: Option<Arc<dyn RemoteFeed>>,
    always_check: bool,
    in_flight: Mutex<HashMap<PackageKey, Arc<FetchSlot>>>,
}

impl MirroringRepository {
    pub fn new(
        index: PackageIndex,
        layout: PackageLayout,
        remote: Option<Arc<dyn RemoteFeed>>,
        always_check: bool,
    ) -> Self {
        Self {
            index,
            layout,
            remote,
            always_check,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Looks up one package, consulting the upstream feed according to the
    /// configured policy. An unreachable upstream never turns a servable
    /// local package into an error; with no local copy either, the result
    /// is `PackageNotFound`.
    pub fn get(&self, id: &PackageId, version: &Version) -> FeedResult<Package> {
        let not_found = || {
            FeedError::PackageNotFound(PackageKey::new(id.clone(), version.clone()).to_string())
        };

        if self.remote.is_none() {
            return self.index.get(id, version)?.ok_or_else(not_found);
        }

        if !self.always_check {
            if let Some(local) = self.index.get(id, version)? {
                return Ok(local);
            }
            return self.fetch_coalesced(id, version)?.ok_or_else(not_found);
        }

        // Upstream-first: a miss or failure falls back to the local copy.
        match self.fetch_coalesced(id, version)? {
            Some(package) => Ok(package),
            None => self.index.get(id, version)?.ok_or_else(not_found),
        }
    }

    /// Full-text search over the local catalog. Listing operations never
    /// block on the upstream feed.
    pub fn search(&self, term: &str) -> FeedResult<Vec<Package>> {
        self.index.search(term)
    }

    /// Locally-known versions of a package, ascending.
    pub fn list_versions(&self, id: &PackageId) -> FeedResult<Vec<Version>> {
        self.index.list_versions(id)
    }

    /// Publishes a manifest into local storage: package file first, then
    /// the index entry. Duplicate (id, version) pairs are a conflict.
    pub fn push(&self, manifest: PackageManifest) -> FeedResult<Package> {
        let key = manifest.key();
        if self.index.get(&key.id, &key.version)?.is_some() {
            return Err(FeedError::PackageConflict(key.to_string()));
        }

        let package = self.write_manifest(&manifest)?;
        match self.index.add(&package) {
            Ok(()) => {}
            Err(FeedError::PackageConflict(_)) => {
                // The live watcher may index the file we just wrote before
                // our own add lands; that is still our push. Anything else
                // is a genuine concurrent push of the same key.
                let raced = self.index.get(&key.id, &key.version)?;
                let ours = raced.as_ref().is_some_and(|existing| {
                    existing.file_path == package.file_path
                        && existing.file_checksum == package.file_checksum
                });
                if !ours {
                    // The winner's entry points at this path; leave the
                    // file for the synchronizer to reconcile.
                    return Err(FeedError::PackageConflict(key.to_string()));
                }
            }
            Err(err) => {
                let _ = fs::remove_file(&package.file_path);
                return Err(err);
            }
        }
        info!("pushed {key}");
        Ok(package)
    }

    /// Removes a package from the index and deletes its backing file.
    pub fn delete(&self, id: &PackageId, version: &Version) -> FeedResult<()> {
        let key = PackageKey::new(id.clone(), version.clone());
        let package = self
            .index
            .get(id, version)?
            .ok_or_else(|| FeedError::PackageNotFound(key.to_string()))?;

        self.index.remove(id, version)?;
        if package.file_path.exists() {
            fs::remove_file(&package.file_path)
                .with_context(|| format!("deleting {}", package.file_path.display()))?;
        }
        info!("deleted {key}");
        Ok(())
    }

    /// Bumps the download counter for a served package.
    pub fn increment_downloads(&self, id: &PackageId, version: &Version) -> FeedResult<()> {
        self.index.increment_downloads(id, version)
    }

    /// Fetches one key from upstream with request coalescing: concurrent
    /// callers for the same (id, version) share a single in-flight fetch.
    /// Upstream failures are absorbed here (logged, `None`), which is what
    /// makes the lookup policy fail-open.
    fn fetch_coalesced(
        &self,
        id: &PackageId,
        version: &Version,
    ) -> FeedResult<Option<Package>> {
        let remote = match &self.remote {
            Some(remote) => Arc::clone(remote),
            None => return Ok(None),
        };
        let key = PackageKey::new(id.clone(), version.clone());

        let (slot, joined) = {
            let mut in_flight = self.in_flight.lock().map_err(|_| FeedError::PoisonError)?;
            match in_flight.entry(key.clone()) {
                Entry::Occupied(entry) => (Arc::clone(entry.get()), true),
                Entry::Vacant(entry) => (Arc::clone(entry.insert(Arc::default())), false),
            }
        };

        let result = (|| {
            let mut outcome = slot.lock().map_err(|_| FeedError::PoisonError)?;
            // Whoever held the slot before us already asked upstream;
            // positive or negative, their answer is ours.
            if let Some(shared) = outcome.as_ref() {
                return Ok(shared.clone());
            }
            // In local-first mode our pre-lock miss may be stale by now.
            if !self.always_check {
                if let Some(local) = self.index.get(id, version)? {
                    return Ok(Some(local));
                }
            }
            let fetched = match remote.fetch(id, version) {
                Ok(Some(manifest)) => Some(self.materialize(manifest)?),
                Ok(None) => None,
                Err(err) => {
                    warn!("upstream lookup for {key} failed: {err}");
                    None
                }
            };
            *outcome = Some(fetched.clone());
            Ok(fetched)
        })();
        // Only the creator tears the slot down; a joiner releasing could
        // remove an entry a newer fetch is already running under.
        if !joined {
            self.release(&key);
        }
        result
    }

    fn release(&self, key: &PackageKey) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(key);
        }
    }

    /// Persists an upstream manifest locally so subsequent lookups are
    /// served without a repeat network call.
    fn materialize(&self, manifest: PackageManifest) -> FeedResult<Package> {
        let key = manifest.key();
        let package = self.write_manifest(&manifest)?;
        self.index.upsert(&package)?;
        info!("materialized {key} from upstream feed");
        Ok(package)
    }

    fn write_manifest(&self, manifest: &PackageManifest) -> FeedResult<Package> {
        let path = self.layout.path_for(&manifest.id, &manifest.version);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating package directory {}", parent.display()))?;
        }
        fs::write(&path, manifest.to_json_vec()?)
            .with_context(|| format!("writing package file {}", path.display()))?;
        let checksum = file_checksum(&path)?;
        Ok(Package::from_manifest(manifest.clone(), path, checksum))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::Path,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use tempfile::TempDir;

    use super::*;

    fn manifest(id: &str, version: &str) -> PackageManifest {
        PackageManifest {
            id: PackageId::new(id).unwrap(),
            version: Version::parse(version).unwrap(),
            title: String::new(),
            authors: Vec::new(),
            description: format!("package {id}"),
            dependencies: Vec::new(),
            published: None,
            checksum: None,
        }
    }

    fn key_parts(id: &str, version: &str) -> (PackageId, Version) {
        (
            PackageId::new(id).unwrap(),
            Version::parse(version).unwrap(),
        )
    }

    /// Fails the test if the upstream is consulted at all.
    struct PanickingRemote;

    impl RemoteFeed for PanickingRemote {
        fn fetch(&self, id: &PackageId, version: &Version) -> FeedResult<Option<PackageManifest>> {
            panic!("unexpected upstream fetch for {id}@{version}");
        }
    }

    /// Serves a fixed manifest, counting fetches, with optional latency.
    struct CountingRemote {
        manifest: PackageManifest,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CountingRemote {
        fn new(manifest: PackageManifest) -> Self {
            Self {
                manifest,
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn slow(manifest: PackageManifest, delay: Duration) -> Self {
            Self {
                manifest,
                calls: AtomicUsize::new(0),
                delay,
            }
        }
    }

    impl RemoteFeed for CountingRemote {
        fn fetch(&self, id: &PackageId, version: &Version) -> FeedResult<Option<PackageManifest>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.manifest.id == *id && self.manifest.version == *version {
                Ok(Some(self.manifest.clone()))
            } else {
                Ok(None)
            }
        }
    }

    /// Simulates an unreachable or timed-out upstream.
    struct FailingRemote;

    impl RemoteFeed for FailingRemote {
        fn fetch(&self, _: &PackageId, _: &Version) -> FeedResult<Option<PackageManifest>> {
            Err(FeedError::UpstreamUnavailable("connection timed out".into()))
        }
    }

    fn repository(
        dir: &Path,
        remote: Option<Arc<dyn RemoteFeed>>,
        always_check: bool,
    ) -> MirroringRepository {
        let index = PackageIndex::in_memory().unwrap();
        let layout = PackageLayout::new(dir.to_path_buf(), true);
        MirroringRepository::new(index, layout, remote, always_check)
    }

    #[test]
    fn local_hit_never_consults_the_upstream() {
        let dir = TempDir::new().unwrap();
        let repo = repository(dir.path(), Some(Arc::new(PanickingRemote)), false);
        repo.push(manifest("local", "1.0.0")).unwrap();

        let (id, version) = key_parts("local", "1.0.0");
        let found = repo.get(&id, &version).unwrap();
        assert_eq!(found.id.as_str(), "local");
    }

    #[test]
    fn local_miss_fetches_and_materializes_once() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(CountingRemote::new(manifest("mirrored", "2.0.0")));
        let repo = repository(dir.path(), Some(remote.clone()), false);

        let (id, version) = key_parts("mirrored", "2.0.0");
        let fetched = repo.get(&id, &version).unwrap();
        assert_eq!(fetched.id.as_str(), "mirrored");

        // Manifest file landed where the layout expects it.
        let path = dir.path().join("mirrored").join("mirrored-2.0.0.pkg.json");
        assert!(path.exists());

        // Second lookup is served locally.
        repo.get(&id, &version).unwrap();
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unreachable_upstream_with_no_local_copy_is_not_found() {
        let dir = TempDir::new().unwrap();
        let repo = repository(dir.path(), Some(Arc::new(FailingRemote)), false);

        let (id, version) = key_parts("ghost", "1.0.0");
        let err = repo.get(&id, &version).unwrap_err();
        assert!(matches!(err, FeedError::PackageNotFound(_)));
    }

    #[test]
    fn always_check_falls_back_to_local_on_upstream_failure() {
        let dir = TempDir::new().unwrap();
        let repo = repository(dir.path(), Some(Arc::new(FailingRemote)), true);
        repo.push(manifest("resilient", "1.0.0")).unwrap();

        let (id, version) = key_parts("resilient", "1.0.0");
        let found = repo.get(&id, &version).unwrap();
        assert_eq!(found.id.as_str(), "resilient");
    }

    #[test]
    fn always_check_fallback_is_bounded_by_the_upstream_delay() {
        let dir = TempDir::new().unwrap();
        let delay = Duration::from_millis(200);
        // The remote only knows "other", so lookups for "slowpoke" stall
        // for the full delay before missing.
        let remote = Arc::new(CountingRemote::slow(manifest("other", "9.9.9"), delay));
        let repo = repository(dir.path(), Some(remote), true);
        repo.push(manifest("slowpoke", "1.0.0")).unwrap();

        let (id, version) = key_parts("slowpoke", "1.0.0");
        let started = std::time::Instant::now();
        let found = repo.get(&id, &version).unwrap();
        let elapsed = started.elapsed();

        assert_eq!(found.id.as_str(), "slowpoke");
        assert!(elapsed >= delay);
        assert!(elapsed < delay + Duration::from_secs(2));
    }

    #[test]
    fn always_check_materializes_upstream_only_packages() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(CountingRemote::new(manifest("fresh", "3.0.0")));
        let repo = repository(dir.path(), Some(remote.clone()), true);

        let (id, version) = key_parts("fresh", "3.0.0");
        repo.get(&id, &version).unwrap();
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
        assert!(repo.search("fresh").unwrap().len() == 1);
    }

    #[test]
    fn upstream_not_found_still_serves_the_local_copy() {
        let dir = TempDir::new().unwrap();
        // Remote only knows "other", so lookups for "kept" miss upstream.
        let remote = Arc::new(CountingRemote::new(manifest("other", "9.9.9")));
        let repo = repository(dir.path(), Some(remote), true);
        repo.push(manifest("kept", "1.0.0")).unwrap();

        let (id, version) = key_parts("kept", "1.0.0");
        let found = repo.get(&id, &version).unwrap();
        assert_eq!(found.id.as_str(), "kept");
    }

    #[test]
    fn concurrent_misses_share_one_upstream_fetch() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(CountingRemote::slow(
            manifest("contended", "1.0.0"),
            Duration::from_millis(150),
        ));
        let repo = Arc::new(repository(dir.path(), Some(remote.clone()), false));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = Arc::clone(&repo);
            handles.push(std::thread::spawn(move || {
                let (id, version) = key_parts("contended", "1.0.0");
                repo.get(&id, &version).map(|p| p.key())
            }));
        }
        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_misses_share_a_negative_answer_too() {
        let dir = TempDir::new().unwrap();
        // The remote knows only "other", so "absent" misses upstream.
        let remote = Arc::new(CountingRemote::slow(
            manifest("other", "9.9.9"),
            Duration::from_millis(150),
        ));
        let repo = Arc::new(repository(dir.path(), Some(remote.clone()), false));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = Arc::clone(&repo);
            handles.push(std::thread::spawn(move || {
                let (id, version) = key_parts("absent", "1.0.0");
                repo.get(&id, &version)
            }));
        }
        for handle in handles {
            assert!(matches!(
                handle.join().unwrap().unwrap_err(),
                FeedError::PackageNotFound(_)
            ));
        }
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn always_check_waiters_join_the_in_flight_fetch() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(CountingRemote::slow(
            manifest("shared", "1.0.0"),
            Duration::from_millis(150),
        ));
        let repo = Arc::new(repository(dir.path(), Some(remote.clone()), true));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = Arc::clone(&repo);
            handles.push(std::thread::spawn(move || {
                let (id, version) = key_parts("shared", "1.0.0");
                repo.get(&id, &version).map(|p| p.key())
            }));
        }
        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn push_conflicts_on_duplicate_key() {
        let dir = TempDir::new().unwrap();
        let repo = repository(dir.path(), None, false);
        repo.push(manifest("dup", "1.0.0")).unwrap();

        let err = repo.push(manifest("dup", "1.0.0")).unwrap_err();
        assert!(matches!(err, FeedError::PackageConflict(_)));
    }

    #[test]
    fn delete_removes_entry_and_file() {
        let dir = TempDir::new().unwrap();
        let repo = repository(dir.path(), None, false);
        let pushed = repo.push(manifest("gone", "1.0.0")).unwrap();
        assert!(pushed.file_path.exists());

        let (id, version) = key_parts("gone", "1.0.0");
        repo.delete(&id, &version).unwrap();
        assert!(!pushed.file_path.exists());
        assert!(matches!(
            repo.get(&id, &version).unwrap_err(),
            FeedError::PackageNotFound(_)
        ));

        let err = repo.delete(&id, &version).unwrap_err();
        assert!(matches!(err, FeedError::PackageNotFound(_)));
    }

    #[test]
    fn downloads_are_counted_per_package() {
        let dir = TempDir::new().unwrap();
        let repo = repository(dir.path(), None, false);
        repo.push(manifest("counted", "1.0.0")).unwrap();

        let (id, version) = key_parts("counted", "1.0.0");
        repo.increment_downloads(&id, &version).unwrap();
        repo.increment_downloads(&id, &version).unwrap();
        assert_eq!(repo.get(&id, &version).unwrap().downloads, 2);
    }
}
