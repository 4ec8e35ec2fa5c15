//! Catalog of known principals, kept in a `users` sub-index beside the
//! package index.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::info;
use wharf_core::{error::FeedError, FeedResult};

use crate::db::{db_err, Database};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    username TEXT NOT NULL COLLATE NOCASE,
    api_key TEXT NOT NULL UNIQUE,
    roles TEXT NOT NULL DEFAULT '[]',
    admin INTEGER NOT NULL DEFAULT 0,
    created TEXT NOT NULL
)";

/// Username reserved for the administrator bootstrapped from settings.
pub const LOCAL_ADMINISTRATOR: &str = "LocalAdministrator";

/// Role name that marks a user as administrator.
pub const ADMINISTRATOR_ROLE: &str = "administrator";

/// A known principal: an API-key holder, possibly an administrator.
#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    pub api_key: String,
    pub roles: Vec<String>,
    pub admin: bool,
    pub created: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            api_key: api_key.into(),
            roles: Vec::new(),
            admin: false,
            created: Utc::now(),
        }
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    pub fn administrator(mut self) -> Self {
        self.admin = true;
        self
    }
}

/// User catalog backed by `users.db` under the index root.
///
/// Keys are unique and matched case-sensitively; usernames keep their
/// spelling and only compare case-insensitively for display lookups.
#[derive(Clone)]
pub struct UserStore {
    db: Database,
}

impl UserStore {
    pub fn open<P: AsRef<Path>>(index_root: P) -> FeedResult<Self> {
        let db = Database::open(index_root.as_ref().join("users.db"))?;
        let store = Self { db };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> FeedResult<Self> {
        let store = Self {
            db: Database::in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> FeedResult<()> {
        self.db.conn()?.execute(SCHEMA, []).map_err(db_err)?;
        Ok(())
    }

    /// Resolves a user from a presented API key (case-sensitive).
    pub fn authenticate(&self, api_key: &str) -> FeedResult<User> {
        self.find_by_key(api_key)?.ok_or(FeedError::UserNotFound)
    }

    /// Registers a new user; at most one user may hold any API key.
    pub fn register(&self, user: &User) -> FeedResult<()> {
        let mut conn = self.db.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        let taken = tx
            .query_row(
                "SELECT username FROM users WHERE api_key = ?1",
                params![user.api_key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(db_err)?;
        if let Some(existing) = taken {
            return Err(FeedError::UserConflict(existing));
        }
        tx.execute(
            "INSERT INTO users (username, api_key, roles, admin, created)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.username,
                user.api_key,
                serde_json::to_string(&user.roles)?,
                user.admin,
                user.created.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    pub fn is_administrator(&self, user: &User) -> bool {
        user.admin || user.roles.iter().any(|r| r.eq_ignore_ascii_case(ADMINISTRATOR_ROLE))
    }

    /// Case-insensitive username lookup, for display purposes only.
    pub fn find_by_username(&self, username: &str) -> FeedResult<Option<User>> {
        self.db
            .conn()?
            .query_row(
                "SELECT username, api_key, roles, admin, created FROM users WHERE username = ?1",
                params![username],
                read_row,
            )
            .optional()
            .map_err(db_err)?
            .map(into_user)
            .transpose()
    }

    /// Inserts the well-known administrator identity for the configured
    /// API key unless a user already holds that key. Idempotent across
    /// restarts.
    pub fn bootstrap_local_administrator(&self, api_key: &str) -> FeedResult<bool> {
        if self.find_by_key(api_key)?.is_some() {
            return Ok(false);
        }
        let admin = User::new(LOCAL_ADMINISTRATOR, api_key)
            .with_roles(vec![ADMINISTRATOR_ROLE.to_string()])
            .administrator();
        self.register(&admin)?;
        info!("bootstrapped local administrator identity");
        Ok(true)
    }

    fn find_by_key(&self, api_key: &str) -> FeedResult<Option<User>> {
        self.db
            .conn()?
            .query_row(
                "SELECT username, api_key, roles, admin, created FROM users WHERE api_key = ?1",
                params![api_key],
                read_row,
            )
            .optional()
            .map_err(db_err)?
            .map(into_user)
            .transpose()
    }
}

struct RawUser {
    username: String,
    api_key: String,
    roles: String,
    admin: bool,
    created: String,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawUser> {
    Ok(RawUser {
        username: row.get("username")?,
        api_key: row.get("api_key")?,
        roles: row.get("roles")?,
        admin: row.get("admin")?,
        created: row.get("created")?,
    })
}

fn into_user(raw: RawUser) -> FeedResult<User> {
    let created = DateTime::parse_from_rfc3339(&raw.created)
        .map_err(|err| FeedError::Database(format!("corrupt created timestamp: {err}")))?
        .with_timezone(&Utc);
    Ok(User {
        username: raw.username,
        api_key: raw.api_key,
        roles: serde_json::from_str(&raw.roles)?,
        admin: raw.admin,
        created,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticate_is_case_sensitive_on_keys() {
        let store = UserStore::in_memory().unwrap();
        store.register(&User::new("alice", "Secret-Key")).unwrap();

        assert_eq!(store.authenticate("Secret-Key").unwrap().username, "alice");
        assert!(matches!(
            store.authenticate("secret-key").unwrap_err(),
            FeedError::UserNotFound
        ));
    }

    #[test]
    fn at_most_one_user_per_api_key() {
        let store = UserStore::in_memory().unwrap();
        store.register(&User::new("alice", "key-1")).unwrap();

        let err = store.register(&User::new("bob", "key-1")).unwrap_err();
        assert!(matches!(err, FeedError::UserConflict(name) if name == "alice"));
    }

    #[test]
    fn username_lookup_ignores_case() {
        let store = UserStore::in_memory().unwrap();
        store.register(&User::new("Alice", "key-1")).unwrap();

        let found = store.find_by_username("alice").unwrap().unwrap();
        assert_eq!(found.username, "Alice");
    }

    #[test]
    fn administrator_via_flag_or_role() {
        let store = UserStore::in_memory().unwrap();
        let by_flag = User::new("root", "k1").administrator();
        let by_role = User::new("ops", "k2").with_roles(vec!["Administrator".into()]);
        let plain = User::new("dev", "k3");

        assert!(store.is_administrator(&by_flag));
        assert!(store.is_administrator(&by_role));
        assert!(!store.is_administrator(&plain));
    }

    #[test]
    fn bootstrap_is_idempotent() {
        let store = UserStore::in_memory().unwrap();
        assert!(store.bootstrap_local_administrator("admin-key").unwrap());
        assert!(!store.bootstrap_local_administrator("admin-key").unwrap());

        let admin = store.authenticate("admin-key").unwrap();
        assert_eq!(admin.username, LOCAL_ADMINISTRATOR);
        assert!(store.is_administrator(&admin));
    }
}
