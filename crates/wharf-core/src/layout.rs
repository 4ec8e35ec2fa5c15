//! Package-file naming and directory layout.

use std::path::{Path, PathBuf};

use semver::Version;

use crate::package::PackageId;

/// Extension carried by every package manifest file.
pub const MANIFEST_SUFFIX: &str = ".pkg.json";

/// Maps package identities to locations in the package-file tree.
///
/// With grouping enabled, each package lives in a per-id subdirectory
/// (`<root>/<id>/<id>-<version>.pkg.json`); otherwise all manifests sit
/// directly under the root.
#[derive(Debug, Clone)]
pub struct PackageLayout {
    root: PathBuf,
    group_by_id: bool,
}

impl PackageLayout {
    pub fn new(root: PathBuf, group_by_id: bool) -> Self {
        Self { root, group_by_id }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn group_by_id(&self) -> bool {
        self.group_by_id
    }

    pub fn file_name(id: &PackageId, version: &Version) -> String {
        format!("{id}-{version}{MANIFEST_SUFFIX}")
    }

    /// Location a package file is expected at under this layout.
    pub fn path_for(&self, id: &PackageId, version: &Version) -> PathBuf {
        let name = Self::file_name(id, version);
        if self.group_by_id {
            self.root.join(id.as_str()).join(name)
        } else {
            self.root.join(name)
        }
    }

    pub fn is_manifest_name(name: &str) -> bool {
        name.ends_with(MANIFEST_SUFFIX)
    }

    /// Recovers (id, version) from a manifest file name.
    ///
    /// Ids may themselves contain dashes, so candidate split points are
    /// tried right to left until the tail parses as a semantic version.
    pub fn parse_file_name(name: &str) -> Option<(PackageId, Version)> {
        let stem = name.strip_suffix(MANIFEST_SUFFIX)?;
        for (idx, _) in stem.match_indices('-').collect::<Vec<_>>().into_iter().rev() {
            let (id_part, ver_part) = (&stem[..idx], &stem[idx + 1..]);
            if let Ok(version) = Version::parse(ver_part) {
                if let Ok(id) = PackageId::new(id_part) {
                    return Some((id, version));
                }
            }
        }
        None
    }

    /// Checks that a discovered manifest sits where this layout expects it.
    pub fn is_well_placed(&self, path: &Path, id: &PackageId) -> bool {
        let parent = match path.parent() {
            Some(p) => p,
            None => return false,
        };
        if self.group_by_id {
            let group_matches = parent
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.eq_ignore_ascii_case(&id.normalized()))
                .unwrap_or(false);
            group_matches && parent.parent() == Some(self.root.as_path())
        } else {
            parent == self.root.as_path()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> PackageId {
        PackageId::new(s).unwrap()
    }

    fn ver(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn grouped_and_flat_paths() {
        let grouped = PackageLayout::new(PathBuf::from("/pkgs"), true);
        assert_eq!(
            grouped.path_for(&id("demo"), &ver("1.0.0")),
            PathBuf::from("/pkgs/demo/demo-1.0.0.pkg.json")
        );

        let flat = PackageLayout::new(PathBuf::from("/pkgs"), false);
        assert_eq!(
            flat.path_for(&id("demo"), &ver("1.0.0")),
            PathBuf::from("/pkgs/demo-1.0.0.pkg.json")
        );
    }

    #[test]
    fn parses_dashed_ids_and_prerelease_versions() {
        let (pkg, version) =
            PackageLayout::parse_file_name("my-lib-1.2.3-beta.1.pkg.json").unwrap();
        assert_eq!(pkg, id("my-lib"));
        assert_eq!(version, ver("1.2.3-beta.1"));

        assert!(PackageLayout::parse_file_name("no-version.pkg.json").is_none());
        assert!(PackageLayout::parse_file_name("demo-1.0.0.json").is_none());
    }

    #[test]
    fn placement_checks_respect_grouping() {
        let grouped = PackageLayout::new(PathBuf::from("/pkgs"), true);
        let well = PathBuf::from("/pkgs/demo/demo-1.0.0.pkg.json");
        let stray = PathBuf::from("/pkgs/demo-1.0.0.pkg.json");
        let misfiled = PathBuf::from("/pkgs/other/demo-1.0.0.pkg.json");
        assert!(grouped.is_well_placed(&well, &id("Demo")));
        assert!(!grouped.is_well_placed(&stray, &id("demo")));
        assert!(!grouped.is_well_placed(&misfiled, &id("demo")));

        let flat = PackageLayout::new(PathBuf::from("/pkgs"), false);
        assert!(flat.is_well_placed(&stray, &id("demo")));
        assert!(!flat.is_well_placed(&well, &id("demo")));
    }
}
