//! Mirroring overlay for the wharf feed.
//!
//! Wraps the local package index with an optional upstream feed: lookups
//! missing locally can be fetched, materialized into local storage, and
//! served from there afterwards. Upstream failures are fail-open; they
//! never turn a servable local package into an error.

pub mod http_client;
pub mod remote;
pub mod repository;

pub use http_client::ClientConfig;
pub use remote::{HttpRemoteFeed, RemoteFeed};
pub use repository::MirroringRepository;
