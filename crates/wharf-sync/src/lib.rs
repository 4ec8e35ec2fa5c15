//! Filesystem synchronization for the wharf feed.
//!
//! Reconciles the package index against the authoritative package-file
//! directory, either as explicit full passes or incrementally from live
//! filesystem notifications. Concurrent requests coalesce into at most
//! one in-flight pass.

pub mod report;
pub mod synchronizer;
pub mod watcher;

pub use report::{SyncFailure, SyncReport};
pub use synchronizer::Synchronizer;
pub use watcher::PackageFileWatcher;
