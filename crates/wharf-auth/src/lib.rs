//! Authentication for the wharf feed.
//!
//! Every inbound request passes through an ordered chain of
//! identity-resolution strategies, assembled once from the settings
//! snapshot. Strategies are plain values behind a uniform trait; there is
//! no registration or runtime discovery.

pub mod chain;
pub mod principal;
pub mod request;
pub mod strategies;

pub use chain::AuthenticationChain;
pub use principal::{Claim, Identity, Principal};
pub use request::FeedRequest;
pub use strategies::AuthStrategy;
