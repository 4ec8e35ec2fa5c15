//! The durable, searchable package catalog.

use std::path::Path;

use rusqlite::{params, OptionalExtension, Transaction};
use semver::Version;
use tracing::debug;
use wharf_core::{
    error::FeedError,
    package::{Package, PackageId, PackageKey},
    FeedResult,
};

use crate::db::{db_err, Database};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS packages (
    id TEXT NOT NULL COLLATE NOCASE,
    version TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    authors TEXT NOT NULL DEFAULT '[]',
    description TEXT NOT NULL DEFAULT '',
    dependencies TEXT NOT NULL DEFAULT '[]',
    downloads INTEGER NOT NULL DEFAULT 0,
    published TEXT NOT NULL,
    checksum TEXT,
    file_path TEXT NOT NULL,
    file_checksum TEXT NOT NULL,
    PRIMARY KEY (id, version)
)";

const COLUMNS: &str = "id, version, title, authors, description, dependencies, \
                       downloads, published, checksum, file_path, file_checksum";

/// Outcome of a synchronization upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Added,
    Updated,
}

/// Durable, full-text-searchable catalog of package metadata.
///
/// Writes are serialized through the connection mutex and each mutation is
/// a single transaction, so concurrent readers never observe a partially
/// applied update.
#[derive(Clone)]
pub struct PackageIndex {
    db: Database,
}

impl PackageIndex {
    /// Opens the packages index under the given index root.
    pub fn open<P: AsRef<Path>>(index_root: P) -> FeedResult<Self> {
        let db = Database::open(index_root.as_ref().join("packages.db"))?;
        let index = Self { db };
        index.init_schema()?;
        Ok(index)
    }

    /// In-memory index for tests.
    pub fn in_memory() -> FeedResult<Self> {
        let index = Self {
            db: Database::in_memory()?,
        };
        index.init_schema()?;
        Ok(index)
    }

    fn init_schema(&self) -> FeedResult<()> {
        self.db.conn()?.execute(SCHEMA, []).map_err(db_err)?;
        Ok(())
    }

    /// Adds a new package. Fails with [`FeedError::PackageConflict`] when
    /// the (id, version) pair is already indexed; never overwrites.
    pub fn add(&self, package: &Package) -> FeedResult<()> {
        let mut conn = self.db.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        if exists(&tx, &package.id, &package.version)? {
            return Err(FeedError::PackageConflict(package.key().to_string()));
        }
        insert(&tx, package)?;
        tx.commit().map_err(db_err)?;
        debug!("indexed {}", package.key());
        Ok(())
    }

    /// Updates an existing entry, preserving its download counter.
    pub fn update(&self, package: &Package) -> FeedResult<()> {
        let mut conn = self.db.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        let changed = apply_update(&tx, package)?;
        if changed == 0 {
            return Err(FeedError::PackageNotFound(package.key().to_string()));
        }
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    /// Update-or-insert used by the synchronizer; one transaction per item.
    pub fn upsert(&self, package: &Package) -> FeedResult<Upserted> {
        let mut conn = self.db.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        let outcome = if apply_update(&tx, package)? > 0 {
            Upserted::Updated
        } else {
            insert(&tx, package)?;
            Upserted::Added
        };
        tx.commit().map_err(db_err)?;
        Ok(outcome)
    }

    /// Removes an entry; missing entries surface as `PackageNotFound`.
    pub fn remove(&self, id: &PackageId, version: &Version) -> FeedResult<()> {
        let removed = self
            .db
            .conn()?
            .execute(
                "DELETE FROM packages WHERE id = ?1 AND version = ?2",
                params![id.as_str(), version.to_string()],
            )
            .map_err(db_err)?;
        if removed == 0 {
            let key = PackageKey::new(id.clone(), version.clone());
            return Err(FeedError::PackageNotFound(key.to_string()));
        }
        Ok(())
    }

    /// Looks up one package; id comparison ignores case.
    pub fn get(&self, id: &PackageId, version: &Version) -> FeedResult<Option<Package>> {
        let raw = self
            .db
            .conn()?
            .query_row(
                &format!("SELECT {COLUMNS} FROM packages WHERE id = ?1 AND version = ?2"),
                params![id.as_str(), version.to_string()],
                read_row,
            )
            .optional()
            .map_err(db_err)?;
        raw.map(into_package).transpose()
    }

    /// Relevance-ordered full-text search over id, title, description and
    /// authors. A blank term lists the whole catalog, most downloaded
    /// first.
    pub fn search(&self, term: &str) -> FeedResult<Vec<Package>> {
        let term = term.trim();
        let conn = self.db.conn()?;

        let raw: Vec<RawRow> = if term.is_empty() {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {COLUMNS} FROM packages ORDER BY downloads DESC, id, version"
                ))
                .map_err(db_err)?;
            let rows = stmt.query_map([], read_row).map_err(db_err)?;
            rows.collect::<rusqlite::Result<_>>().map_err(db_err)?
        } else {
            let contains = like_contains(term);
            let prefix = format!("{}%", escape_like(term));
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {COLUMNS},
                        CASE
                            WHEN id = ?1 THEN 0
                            WHEN id LIKE ?2 ESCAPE '\\' THEN 1
                            WHEN id LIKE ?3 ESCAPE '\\' THEN 2
                            WHEN title LIKE ?3 ESCAPE '\\' THEN 3
                            ELSE 4
                        END AS score
                     FROM packages
                     WHERE id LIKE ?3 ESCAPE '\\'
                        OR title LIKE ?3 ESCAPE '\\'
                        OR description LIKE ?3 ESCAPE '\\'
                        OR authors LIKE ?3 ESCAPE '\\'
                     ORDER BY score, downloads DESC, id, version"
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![term, prefix, contains], read_row)
                .map_err(db_err)?;
            rows.collect::<rusqlite::Result<_>>().map_err(db_err)?
        };

        raw.into_iter().map(into_package).collect()
    }

    /// All indexed versions of a package, ascending by semver.
    pub fn list_versions(&self, id: &PackageId) -> FeedResult<Vec<Version>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare("SELECT version FROM packages WHERE id = ?1")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![id.as_str()], |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        let mut versions = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?
            .into_iter()
            .map(|v| Version::parse(&v).map_err(FeedError::from))
            .collect::<FeedResult<Vec<_>>>()?;
        versions.sort();
        Ok(versions)
    }

    /// Every indexed package; used by the synchronizer's diff pass.
    pub fn all(&self) -> FeedResult<Vec<Package>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {COLUMNS} FROM packages ORDER BY id, version"))
            .map_err(db_err)?;
        let rows = stmt.query_map([], read_row).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?
            .into_iter()
            .map(into_package)
            .collect()
    }

    /// Bumps the download counter for one package.
    pub fn increment_downloads(&self, id: &PackageId, version: &Version) -> FeedResult<()> {
        let changed = self
            .db
            .conn()?
            .execute(
                "UPDATE packages SET downloads = downloads + 1 WHERE id = ?1 AND version = ?2",
                params![id.as_str(), version.to_string()],
            )
            .map_err(db_err)?;
        if changed == 0 {
            let key = PackageKey::new(id.clone(), version.clone());
            return Err(FeedError::PackageNotFound(key.to_string()));
        }
        Ok(())
    }
}

fn exists(tx: &Transaction<'_>, id: &PackageId, version: &Version) -> FeedResult<bool> {
    tx.query_row(
        "SELECT 1 FROM packages WHERE id = ?1 AND version = ?2",
        params![id.as_str(), version.to_string()],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(db_err)
}

fn insert(tx: &Transaction<'_>, package: &Package) -> FeedResult<()> {
    tx.execute(
        "INSERT INTO packages (id, version, title, authors, description, dependencies,
                               downloads, published, checksum, file_path, file_checksum)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            package.id.as_str(),
            package.version.to_string(),
            package.title,
            serde_json::to_string(&package.authors)?,
            package.description,
            serde_json::to_string(&package.dependencies)?,
            package.downloads as i64,
            package.published.to_rfc3339(),
            package.checksum,
            package.file_path.to_string_lossy(),
            package.file_checksum,
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

fn apply_update(tx: &Transaction<'_>, package: &Package) -> FeedResult<usize> {
    tx.execute(
        "UPDATE packages
         SET id = ?1, title = ?3, authors = ?4, description = ?5, dependencies = ?6,
             published = ?7, checksum = ?8, file_path = ?9, file_checksum = ?10
         WHERE id = ?1 AND version = ?2",
        params![
            package.id.as_str(),
            package.version.to_string(),
            package.title,
            serde_json::to_string(&package.authors)?,
            package.description,
            serde_json::to_string(&package.dependencies)?,
            package.published.to_rfc3339(),
            package.checksum,
            package.file_path.to_string_lossy(),
            package.file_checksum,
        ],
    )
    .map_err(db_err)
}

struct RawRow {
    id: String,
    version: String,
    title: String,
    authors: String,
    description: String,
    dependencies: String,
    downloads: i64,
    published: String,
    checksum: Option<String>,
    file_path: String,
    file_checksum: String,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get("id")?,
        version: row.get("version")?,
        title: row.get("title")?,
        authors: row.get("authors")?,
        description: row.get("description")?,
        dependencies: row.get("dependencies")?,
        downloads: row.get("downloads")?,
        published: row.get("published")?,
        checksum: row.get("checksum")?,
        file_path: row.get("file_path")?,
        file_checksum: row.get("file_checksum")?,
    })
}

fn into_package(raw: RawRow) -> FeedResult<Package> {
    let published = chrono::DateTime::parse_from_rfc3339(&raw.published)
        .map_err(|err| FeedError::Database(format!("corrupt published timestamp: {err}")))?
        .with_timezone(&chrono::Utc);
    Ok(Package {
        id: PackageId::new(raw.id)?,
        version: Version::parse(&raw.version)?,
        title: raw.title,
        authors: serde_json::from_str(&raw.authors)?,
        description: raw.description,
        dependencies: serde_json::from_str(&raw.dependencies)?,
        downloads: raw.downloads.max(0) as u64,
        published,
        checksum: raw.checksum,
        file_path: raw.file_path.into(),
        file_checksum: raw.file_checksum,
    })
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn like_contains(term: &str) -> String {
    format!("%{}%", escape_like(term))
}
