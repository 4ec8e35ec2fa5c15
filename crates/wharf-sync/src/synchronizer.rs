//! Reconciliation of the package index against the package-file tree.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use tracing::{debug, info, warn};
use wharf_core::{
    cancel::CancellationToken,
    checksum::file_checksum,
    error::{ErrorContext, FeedError},
    layout::PackageLayout,
    package::{Package, PackageKey, PackageManifest},
    FeedResult,
};
use wharf_index::PackageIndex;

use crate::report::{SyncFailure, SyncReport};

/// Keeps the package index consistent with the authoritative package-file
/// directory.
///
/// Scans are serialized: a `synchronize` call arriving while another pass
/// runs queues behind it, and watcher-driven requests merge into at most
/// one pending re-run. Two full scans never interleave their writes.
pub struct Synchronizer {
    index: PackageIndex,
    layout: PackageLayout,
    run_lock: Mutex<()>,
    pending: AtomicBool,
}

impl Synchronizer {
    pub fn new(index: PackageIndex, layout: PackageLayout) -> Self {
        Self {
            index,
            layout,
            run_lock: Mutex::new(()),
            pending: AtomicBool::new(false),
        }
    }

    pub fn layout(&self) -> &PackageLayout {
        &self.layout
    }

    /// Runs a full reconciliation pass and returns its report.
    ///
    /// Cancellation is checked between items; a cancelled pass returns a
    /// partial report covering exactly what was committed. Running twice
    /// with no filesystem change in between yields a clean second report.
    pub fn synchronize(&self, token: &CancellationToken) -> FeedResult<SyncReport> {
        let _guard = self.run_lock.lock().map_err(|_| FeedError::PoisonError)?;
        loop {
            let report = self.scan_once(token)?;
            // A request that arrived mid-scan gets one merged re-run.
            if self.pending.swap(false, Ordering::SeqCst) && !token.is_cancelled() {
                debug!("re-running synchronization for requests merged mid-scan");
                continue;
            }
            return Ok(report);
        }
    }

    /// Coalescing entry point for watcher-driven full scans.
    ///
    /// If a pass is already running the request is merged into one pending
    /// re-run; otherwise the pass runs on the calling thread.
    pub fn request_sync(&self, token: &CancellationToken) {
        match self.run_lock.try_lock() {
            Ok(_guard) => loop {
                match self.scan_once(token) {
                    Ok(report) if !report.is_clean() => {
                        info!(
                            "synchronized: {} added, {} updated, {} removed, {} failed",
                            report.added.len(),
                            report.updated.len(),
                            report.removed.len(),
                            report.failures.len()
                        );
                    }
                    Ok(_) => {}
                    Err(err) => warn!("synchronization failed: {err}"),
                }
                if !self.pending.swap(false, Ordering::SeqCst) || token.is_cancelled() {
                    break;
                }
            },
            Err(_) => {
                self.pending.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Incremental reconciliation of a single package file, used by the
    /// live watcher. A present file is re-indexed, a missing one removed.
    pub fn sync_one(&self, path: &Path) -> FeedResult<()> {
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if PackageLayout::is_manifest_name(name) => name,
            _ => return Ok(()),
        };
        let (id, version) = match PackageLayout::parse_file_name(name) {
            Some(parsed) => parsed,
            None => {
                debug!("ignoring unparseable package file name {name}");
                return Ok(());
            }
        };

        if path.exists() {
            if !self.layout.is_well_placed(path, &id) {
                warn!("ignoring misplaced package file {}", path.display());
                return Ok(());
            }
            let package = load_package(path)?;
            self.index.upsert(&package)?;
            debug!("reconciled {}", package.key());
        } else if let Some(indexed) = self.index.get(&id, &version)? {
            // A vanished stray copy must not take the real entry with it.
            if indexed.file_path.as_path() == path {
                self.index.remove(&id, &version)?;
                debug!("removed vanished package {id}@{version}");
            }
        }
        Ok(())
    }

    fn scan_once(&self, token: &CancellationToken) -> FeedResult<SyncReport> {
        let mut report = SyncReport::default();

        let root = self.layout.root();
        fs::create_dir_all(root)
            .with_context(|| format!("creating package directory {}", root.display()))?;

        let mut on_disk: HashMap<PackageKey, PathBuf> = HashMap::new();
        discover(root, &self.layout, &mut on_disk, &mut report.failures);

        let mut indexed: HashMap<PackageKey, Package> = self
            .index
            .all()?
            .into_iter()
            .map(|pkg| (pkg.key(), pkg))
            .collect();

        for (key, path) in on_disk {
            if token.is_cancelled() {
                report.cancelled = true;
                return Ok(report);
            }
            let existing = indexed.remove(&key);
            if let Err(err) = self.reconcile_file(&key, &path, existing, &mut report) {
                report.failures.push(SyncFailure {
                    path,
                    key: Some(key),
                    reason: err.to_string(),
                });
            }
        }

        // Whatever is left in the index has no backing file anymore.
        for (key, package) in indexed {
            if token.is_cancelled() {
                report.cancelled = true;
                return Ok(report);
            }
            match self.index.remove(&key.id, &key.version) {
                Ok(()) => report.removed.push(key),
                Err(err) => report.failures.push(SyncFailure {
                    path: package.file_path,
                    key: Some(key),
                    reason: err.to_string(),
                }),
            }
        }

        Ok(report)
    }

    fn reconcile_file(
        &self,
        key: &PackageKey,
        path: &Path,
        existing: Option<Package>,
        report: &mut SyncReport,
    ) -> FeedResult<()> {
        let checksum = file_checksum(path)?;
        if let Some(existing) = existing {
            if existing.file_checksum == checksum && existing.file_path.as_path() == path {
                return Ok(());
            }
        }

        let package = load_package(path)?;
        if package.key() != *key {
            return Err(FeedError::InvalidManifest {
                path: path.to_path_buf(),
                reason: format!(
                    "manifest declares {} but the file name says {key}",
                    package.key()
                ),
            });
        }

        match self.index.upsert(&package)? {
            wharf_index::Upserted::Added => report.added.push(package.key()),
            wharf_index::Upserted::Updated => report.updated.push(package.key()),
        }
        Ok(())
    }
}

/// Walks the package tree collecting well-placed manifests; manifests in
/// unexpected locations or with unparseable names are recorded as
/// failures, everything else is ignored.
fn discover(
    dir: &Path,
    layout: &PackageLayout,
    found: &mut HashMap<PackageKey, PathBuf>,
    failures: &mut Vec<SyncFailure>,
) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            failures.push(SyncFailure {
                path: dir.to_path_buf(),
                key: None,
                reason: format!("reading directory: {err}"),
            });
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            discover(&path, layout, found, failures);
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };
        if !PackageLayout::is_manifest_name(name) {
            continue;
        }
        match PackageLayout::parse_file_name(name) {
            Some((id, version)) if layout.is_well_placed(&path, &id) => {
                found.insert(PackageKey::new(id, version), path);
            }
            Some((id, _)) => failures.push(SyncFailure {
                path: path.clone(),
                key: None,
                reason: format!("package file for '{id}' is in an unexpected location"),
            }),
            None => failures.push(SyncFailure {
                path: path.clone(),
                key: None,
                reason: "file name does not parse as <id>-<version>".into(),
            }),
        }
    }
}

fn load_package(path: &Path) -> FeedResult<Package> {
    let manifest = PackageManifest::from_file(path)?;
    let checksum = file_checksum(path)?;
    Ok(Package::from_manifest(manifest, path.to_path_buf(), checksum))
}
