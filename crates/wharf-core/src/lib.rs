use error::FeedError;

pub mod cancel;
pub mod checksum;
pub mod error;
pub mod layout;
pub mod package;

pub type FeedResult<T> = std::result::Result<T, FeedError>;
