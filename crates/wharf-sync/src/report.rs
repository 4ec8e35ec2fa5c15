use std::path::PathBuf;

use wharf_core::package::PackageKey;

/// Outcome of one synchronization pass.
///
/// A cancelled pass reports exactly the items committed before the signal
/// was observed; committed items are never rolled back.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub added: Vec<PackageKey>,
    pub updated: Vec<PackageKey>,
    pub removed: Vec<PackageKey>,
    pub failures: Vec<SyncFailure>,
    pub cancelled: bool,
}

impl SyncReport {
    /// Number of index mutations this pass committed.
    pub fn changes(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }

    /// True when the pass found nothing to do and nothing failed.
    pub fn is_clean(&self) -> bool {
        self.changes() == 0 && self.failures.is_empty()
    }
}

/// A single package file the synchronizer could not process.
///
/// Item failures never abort the pass; they are recorded here and the
/// remaining items are still processed.
#[derive(Debug)]
pub struct SyncFailure {
    pub path: PathBuf,
    pub key: Option<PackageKey>,
    pub reason: String,
}
