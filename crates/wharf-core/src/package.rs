//! Package identity and metadata models.

use std::{
    cmp::Ordering,
    fmt::{self, Display},
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    str::FromStr,
};

use chrono::{DateTime, Utc};
use semver::{Version, VersionReq};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ErrorContext, FeedError};

type Result<T> = std::result::Result<T, FeedError>;

/// Case-insensitive package identifier.
///
/// The original spelling is preserved for display; equality, ordering and
/// hashing ignore ASCII case so `Newtonsoft.Json` and `newtonsoft.json`
/// name the same package.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let valid = !raw.is_empty()
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(FeedError::InvalidPackageId(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercased form used for case-insensitive storage keys.
    pub fn normalized(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl PartialEq for PackageId {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for PackageId {}

impl Hash for PackageId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl PartialOrd for PackageId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized().cmp(&other.normalized())
    }
}

impl Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PackageId {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for PackageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        PackageId::new(raw).map_err(serde::de::Error::custom)
    }
}

/// The (id, version) pair that uniquely names a package in the feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageKey {
    pub id: PackageId,
    pub version: Version,
}

impl PackageKey {
    pub fn new(id: PackageId, version: Version) -> Self {
        Self { id, version }
    }
}

impl Display for PackageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}

/// A dependency declared by a package manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub id: PackageId,
    pub requirement: VersionReq,
}

/// On-disk package manifest document.
///
/// Package files are JSON manifests named `<id>-<version>.pkg.json`; the
/// artifact itself is addressed by the `checksum` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageManifest {
    pub id: PackageId,
    pub version: Version,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub published: Option<DateTime<Utc>>,
    #[serde(default)]
    pub checksum: Option<String>,
}

impl PackageManifest {
    /// Parses a manifest from raw JSON bytes.
    pub fn from_slice(bytes: &[u8], origin: &Path) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|err| FeedError::InvalidManifest {
            path: origin.to_path_buf(),
            reason: err.to_string(),
        })
    }

    /// Reads and parses a manifest file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading package manifest {}", path.display()))?;
        Self::from_slice(&bytes, path)
    }

    pub fn to_json_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn key(&self) -> PackageKey {
        PackageKey::new(self.id.clone(), self.version.clone())
    }
}

/// A fully-indexed package: manifest metadata plus the backing file
/// reference and the feed-maintained download counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    pub version: Version,
    pub title: String,
    pub authors: Vec<String>,
    pub description: String,
    pub dependencies: Vec<Dependency>,
    pub downloads: u64,
    pub published: DateTime<Utc>,
    pub checksum: Option<String>,
    pub file_path: PathBuf,
    pub file_checksum: String,
}

impl Package {
    /// Builds an indexable package from a parsed manifest and its backing
    /// file. A manifest without a published timestamp is stamped now.
    pub fn from_manifest(manifest: PackageManifest, file_path: PathBuf, file_checksum: String) -> Self {
        Self {
            id: manifest.id,
            version: manifest.version,
            title: manifest.title,
            authors: manifest.authors,
            description: manifest.description,
            dependencies: manifest.dependencies,
            downloads: 0,
            published: manifest.published.unwrap_or_else(Utc::now),
            checksum: manifest.checksum,
            file_path,
            file_checksum,
        }
    }

    pub fn key(&self) -> PackageKey {
        PackageKey::new(self.id.clone(), self.version.clone())
    }
}
