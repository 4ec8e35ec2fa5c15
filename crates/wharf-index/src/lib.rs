//! SQLite-backed storage for the wharf feed: the searchable package
//! catalog and the user store, kept as separate databases under one
//! index root.

pub mod db;
pub mod packages;
pub mod users;

pub use packages::{PackageIndex, Upserted};
pub use users::{User, UserStore, ADMINISTRATOR_ROLE, LOCAL_ADMINISTRATOR};
