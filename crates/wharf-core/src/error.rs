//! Error types shared across the wharf feed.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;
use wharf_config::ConfigError;

/// Core error type for feed operations.
#[derive(Error, Diagnostic, Debug)]
pub enum FeedError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error("Error while {action}")]
    #[diagnostic(code(wharf::io), help("Check file permissions and disk space"))]
    IoError {
        action: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Database operation failed: {0}")]
    #[diagnostic(code(wharf::database))]
    Database(String),

    #[error("Package '{0}' not found")]
    #[diagnostic(code(wharf::package_not_found))]
    PackageNotFound(String),

    #[error("Package '{0}' already exists")]
    #[diagnostic(
        code(wharf::package_conflict),
        help("Delete the existing version first, or push a new version")
    )]
    PackageConflict(String),

    #[error("User not found")]
    #[diagnostic(code(wharf::user_not_found))]
    UserNotFound,

    #[error("A user with this API key already exists: {0}")]
    #[diagnostic(code(wharf::user_conflict))]
    UserConflict(String),

    #[error("Unrecognized API key")]
    #[diagnostic(
        code(wharf::invalid_api_key),
        help("Check the key, or register the user first")
    )]
    InvalidApiKey,

    #[error("Upstream feed unavailable: {0}")]
    #[diagnostic(
        code(wharf::upstream),
        help("Check the mirror target URL and your network connection")
    )]
    UpstreamUnavailable(String),

    #[error("Invalid package manifest at {path}: {reason}")]
    #[diagnostic(code(wharf::invalid_manifest))]
    InvalidManifest { path: PathBuf, reason: String },

    #[error("Invalid package id: {0}")]
    #[diagnostic(
        code(wharf::invalid_package_id),
        help("Package ids may contain letters, digits, '.', '_' and '-'")
    )]
    InvalidPackageId(String),

    #[error("File watcher error: {0}")]
    #[diagnostic(
        code(wharf::watcher),
        help("Live synchronization is unavailable; explicit synchronization still works")
    )]
    WatchError(String),

    #[error(transparent)]
    #[diagnostic(code(wharf::json))]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    #[diagnostic(code(wharf::semver))]
    SemverError(#[from] semver::Error),

    #[error("Thread lock poison error")]
    #[diagnostic(code(wharf::poison), help("This is an internal error, please report it"))]
    PoisonError,
}

impl<T> From<std::sync::PoisonError<T>> for FeedError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::PoisonError
    }
}

/// Trait for adding context to IO errors.
pub trait ErrorContext<T> {
    fn with_context<C>(self, context: C) -> std::result::Result<T, FeedError>
    where
        C: FnOnce() -> String;
}

impl<T> ErrorContext<T> for std::io::Result<T> {
    fn with_context<C>(self, context: C) -> std::result::Result<T, FeedError>
    where
        C: FnOnce() -> String,
    {
        self.map_err(|err| FeedError::IoError {
            action: context(),
            source: err,
        })
    }
}
