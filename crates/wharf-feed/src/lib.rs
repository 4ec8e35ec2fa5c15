//! The wharf package feed, assembled.
//!
//! This crate is the host-facing surface: load a [`FeedSettings`]
//! snapshot, [`compose`] the feed, and hand the resulting [`Feed`] to the
//! HTTP layer. Everything underneath lives in the focused crates
//! (`wharf-index`, `wharf-sync`, `wharf-mirror`, `wharf-auth`).

pub mod compose;
pub mod logging;

pub use compose::{compose, Feed};
pub use logging::setup_logging;
pub use wharf_auth::{AuthenticationChain, Claim, FeedRequest, Identity, Principal};
pub use wharf_config::FeedSettings;
pub use wharf_core::{cancel::CancellationController, error::FeedError, FeedResult};
pub use wharf_mirror::MirroringRepository;
pub use wharf_sync::SyncReport;
