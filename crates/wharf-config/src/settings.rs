use std::{collections::HashMap, fs, path::Path, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::warn;

use crate::error::Result;

/// Default per-fetch timeout for upstream mirror lookups.
pub const DEFAULT_MIRROR_TIMEOUT: Duration = Duration::from_secs(15);

/// Raw settings file shape. Every field is optional; anything missing,
/// blank, or unparseable resolves to its documented default.
#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    index_path: Option<String>,
    packages_path: Option<String>,
    enable_package_file_watcher: Option<Toggle>,
    group_packages_by_id: Option<Toggle>,
    synchronize_on_start: Option<Toggle>,
    mirror_target_url: Option<String>,
    mirror_timeout: Option<String>,
    always_check_mirror: Option<Toggle>,
    local_administrator_api_key: Option<String>,
    handle_local_requests_as_admin: Option<Toggle>,
    allow_anonymous_package_changes: Option<Toggle>,
    role_mappings: Option<HashMap<String, Vec<String>>>,
}

/// A flag value that tolerates string spellings ("true"/"false") in
/// addition to native TOML booleans.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Toggle {
    Bool(bool),
    Text(String),
}

impl Toggle {
    fn resolve(opt: Option<Self>, key: &str, default: bool) -> bool {
        match opt {
            None => default,
            Some(Toggle::Bool(v)) => v,
            Some(Toggle::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => true,
                "false" => false,
                _ => {
                    warn!("ignoring invalid value {s:?} for `{key}`, using default {default}");
                    default
                }
            },
        }
    }
}

/// Immutable snapshot of all recognized settings.
///
/// Produced once at startup and threaded explicitly into every component
/// constructor. There is no process-global settings state.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Root directory for the package index and the user store.
    pub index_path: PathBuf,
    /// Root directory of the package-file tree.
    pub packages_path: PathBuf,
    /// Reconcile the index incrementally from filesystem-change events.
    pub enable_package_file_watcher: bool,
    /// Store and expect package files one directory per package id.
    pub group_packages_by_id: bool,
    /// Run a full synchronization when the feed is composed.
    pub synchronize_on_start: bool,
    /// Upstream feed base URL. `None` disables mirroring.
    pub mirror_target_url: Option<String>,
    /// Per-fetch timeout for upstream lookups.
    pub mirror_timeout: Duration,
    /// Query the upstream feed before the local index.
    pub always_check_mirror: bool,
    /// Bootstraps a well-known administrator identity in the user store.
    pub local_administrator_api_key: Option<String>,
    /// Resolve loopback-origin requests as an administrator.
    pub handle_local_requests_as_admin: bool,
    /// Grant package-modifying claims to anonymous callers.
    pub allow_anonymous_package_changes: bool,
    /// External role name to internal claim names.
    pub role_mappings: HashMap<String, Vec<String>>,
}

impl Default for FeedSettings {
    fn default() -> Self {
        SettingsFile::default().resolve()
    }
}

impl FeedSettings {
    /// Loads settings from a TOML file.
    ///
    /// A missing file yields the defaults. An unreadable or syntactically
    /// invalid file is an error; individual malformed values inside a valid
    /// file fall back to their defaults with a warning.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let file: SettingsFile = toml::from_str(&content)?;
        Ok(file.resolve())
    }

    /// True when an upstream feed is configured.
    pub fn mirroring_enabled(&self) -> bool {
        self.mirror_target_url.is_some()
    }

    /// True when at least one role mapping carries a non-blank claim.
    pub fn role_mappings_enabled(&self) -> bool {
        self.role_mappings
            .values()
            .flatten()
            .any(|claim| !claim.trim().is_empty())
    }
}

impl SettingsFile {
    fn resolve(self) -> FeedSettings {
        FeedSettings {
            index_path: path_or(self.index_path, "data/index"),
            packages_path: path_or(self.packages_path, "data/packages"),
            enable_package_file_watcher: Toggle::resolve(
                self.enable_package_file_watcher,
                "enable_package_file_watcher",
                true,
            ),
            group_packages_by_id: Toggle::resolve(
                self.group_packages_by_id,
                "group_packages_by_id",
                true,
            ),
            synchronize_on_start: Toggle::resolve(
                self.synchronize_on_start,
                "synchronize_on_start",
                true,
            ),
            mirror_target_url: self.mirror_target_url.and_then(non_blank),
            mirror_timeout: resolve_timeout(self.mirror_timeout),
            always_check_mirror: Toggle::resolve(
                self.always_check_mirror,
                "always_check_mirror",
                false,
            ),
            local_administrator_api_key: self.local_administrator_api_key.and_then(non_blank),
            handle_local_requests_as_admin: Toggle::resolve(
                self.handle_local_requests_as_admin,
                "handle_local_requests_as_admin",
                false,
            ),
            allow_anonymous_package_changes: Toggle::resolve(
                self.allow_anonymous_package_changes,
                "allow_anonymous_package_changes",
                false,
            ),
            role_mappings: self.role_mappings.unwrap_or_default(),
        }
    }
}

fn path_or(value: Option<String>, default: &str) -> PathBuf {
    match value.and_then(non_blank) {
        Some(v) => PathBuf::from(v),
        None => PathBuf::from(default),
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn resolve_timeout(value: Option<String>) -> Duration {
    match value.and_then(non_blank) {
        None => DEFAULT_MIRROR_TIMEOUT,
        Some(s) => match parse_duration(&s) {
            Some(ms) => Duration::from_millis(ms as u64),
            None => {
                warn!(
                    "ignoring invalid value {s:?} for `mirror_timeout`, using default {}s",
                    DEFAULT_MIRROR_TIMEOUT.as_secs()
                );
                DEFAULT_MIRROR_TIMEOUT
            }
        },
    }
}

/// Parses a duration string like `1d1h1m1s` into milliseconds.
///
/// Returns `None` for empty, malformed, or overflowing input.
pub fn parse_duration(input: &str) -> Option<u128> {
    let mut total: u128 = 0;
    let mut chars = input.chars().peekable();

    while chars.peek().is_some() {
        let mut number_str = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_digit() {
                number_str.push(chars.next()?);
            } else {
                break;
            }
        }

        if number_str.is_empty() {
            return None;
        }

        let number: u128 = number_str.parse().ok()?;
        let multiplier = match chars.next()? {
            's' => 1000,
            'm' => 60 * 1000,
            'h' => 60 * 60 * 1000,
            'd' => 24 * 60 * 60 * 1000,
            _ => return None,
        };

        total = total.checked_add(number.checked_mul(multiplier)?)?;
    }

    if total == 0 {
        None
    } else {
        Some(total)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn load_from(content: &str) -> FeedSettings {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        FeedSettings::load(file.path()).unwrap()
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = FeedSettings::load("/nonexistent/wharf.toml").unwrap();
        assert_eq!(settings.index_path, PathBuf::from("data/index"));
        assert_eq!(settings.packages_path, PathBuf::from("data/packages"));
        assert!(settings.enable_package_file_watcher);
        assert!(settings.group_packages_by_id);
        assert!(settings.synchronize_on_start);
        assert!(!settings.always_check_mirror);
        assert!(!settings.handle_local_requests_as_admin);
        assert!(!settings.allow_anonymous_package_changes);
        assert!(!settings.mirroring_enabled());
        assert!(!settings.role_mappings_enabled());
        assert_eq!(settings.mirror_timeout, DEFAULT_MIRROR_TIMEOUT);
    }

    #[test]
    fn explicit_values_are_honored() {
        let settings = load_from(
            r#"
            index_path = "/srv/feed/index"
            packages_path = "/srv/feed/packages"
            synchronize_on_start = false
            mirror_target_url = "https://upstream.example.com/feed"
            mirror_timeout = "30s"
            always_check_mirror = true

            [role_mappings]
            developers = ["package-manager"]
            "#,
        );
        assert_eq!(settings.index_path, PathBuf::from("/srv/feed/index"));
        assert!(!settings.synchronize_on_start);
        assert!(settings.always_check_mirror);
        assert!(settings.mirroring_enabled());
        assert!(settings.role_mappings_enabled());
        assert_eq!(settings.mirror_timeout, Duration::from_secs(30));
    }

    #[test]
    fn malformed_values_fall_back_to_defaults() {
        let settings = load_from(
            r#"
            synchronize_on_start = "yes please"
            mirror_timeout = "soon"
            "#,
        );
        assert!(settings.synchronize_on_start);
        assert_eq!(settings.mirror_timeout, DEFAULT_MIRROR_TIMEOUT);
    }

    #[test]
    fn string_flag_spellings_are_accepted() {
        let settings = load_from(r#"always_check_mirror = "TRUE""#);
        assert!(settings.always_check_mirror);
    }

    #[test]
    fn blank_strings_are_treated_as_unset() {
        let settings = load_from(
            r#"
            mirror_target_url = "  "
            local_administrator_api_key = ""
            index_path = ""
            "#,
        );
        assert!(!settings.mirroring_enabled());
        assert!(settings.local_administrator_api_key.is_none());
        assert_eq!(settings.index_path, PathBuf::from("data/index"));
    }

    #[test]
    fn blank_role_mappings_do_not_enable_the_strategy() {
        let settings = load_from(
            r#"
            [role_mappings]
            auditors = ["", "  "]
            "#,
        );
        assert!(!settings.role_mappings_enabled());
    }

    #[test]
    fn parse_duration_formats() {
        assert_eq!(parse_duration("15s"), Some(15_000));
        assert_eq!(parse_duration("1m30s"), Some(90_000));
        assert_eq!(parse_duration("1h"), Some(3_600_000));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration("10"), None);
    }
}
