//! TOML-based configuration for cmsync.
//!
//! Every section has defaults, so an empty file is a valid configuration.
//! The remote access token is never stored in the file: `repo.token_env`
//! names an environment variable that is resolved at runtime via
//! [`CmsyncConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classify::Classifier;
use crate::errors::ConfigError;
use crate::merge::{ContentMerger, Planner, DEFAULT_MAX_DEPTH, DEFAULT_PREVIEW_LEN};

/// Name of the config file looked up in the working tree and the user's
/// config directory.
pub const CONFIG_FILE_NAME: &str = "cmsync.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmsyncConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Local repository and remote settings.
    #[serde(default)]
    pub repo: RepoConfig,

    /// Merge and retry behaviour.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Working tree walk settings.
    #[serde(default)]
    pub tree: TreeConfig,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for CmsyncConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            repo: RepoConfig::default(),
            sync: SyncConfig::default(),
            tree: TreeConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Repo
// ---------------------------------------------------------------------------

/// Where the content lives and where it is published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Working tree root; also the root of the local Git repository.
    #[serde(default = "default_repo_path")]
    pub path: PathBuf,

    /// Name of the Git remote to sync with.
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Branch holding the synchronized content.
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Environment variable holding the remote access token.
    #[serde(default)]
    pub token_env: Option<String>,

    /// Author recorded on published revisions.
    #[serde(default = "default_author_name")]
    pub author_name: String,

    #[serde(default = "default_author_email")]
    pub author_email: String,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}
fn default_remote() -> String {
    "origin".into()
}
fn default_branch() -> String {
    "main".into()
}
fn default_author_name() -> String {
    "cmsync".into()
}
fn default_author_email() -> String {
    "cmsync@localhost".into()
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            path: default_repo_path(),
            remote: default_remote(),
            branch: default_branch(),
            token_env: None,
            author_name: default_author_name(),
            author_email: default_author_email(),
            token: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Sync behaviour
// ---------------------------------------------------------------------------

/// Merge and push-retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Publish attempts before a push gives up (default 5).
    #[serde(default = "default_max_push_attempts")]
    pub max_push_attempts: u32,

    /// Local reader tasks. 0 = available parallelism.
    #[serde(default)]
    pub read_workers: usize,

    /// Nesting depth up to which structured documents merge field by field.
    #[serde(default = "default_max_merge_depth")]
    pub max_merge_depth: usize,

    /// Characters kept in conflict value previews.
    #[serde(default = "default_preview_len")]
    pub preview_len: usize,

    /// Extensions (without the dot) merged as structured documents.
    #[serde(default = "default_structured_extensions")]
    pub structured_extensions: Vec<String>,
}

fn default_max_push_attempts() -> u32 {
    5
}
fn default_max_merge_depth() -> usize {
    DEFAULT_MAX_DEPTH
}
fn default_preview_len() -> usize {
    DEFAULT_PREVIEW_LEN
}
fn default_structured_extensions() -> Vec<String> {
    vec!["json".into()]
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_push_attempts: default_max_push_attempts(),
            read_workers: 0,
            max_merge_depth: default_max_merge_depth(),
            preview_len: default_preview_len(),
            structured_extensions: default_structured_extensions(),
        }
    }
}

impl SyncConfig {
    /// Build the planner these settings describe.
    pub fn planner(&self) -> Planner {
        let classifier = Classifier::new(self.structured_extensions.clone());
        Planner::new(ContentMerger::new(
            classifier,
            self.max_merge_depth,
            self.preview_len,
        ))
    }
}

// ---------------------------------------------------------------------------
// Working tree
// ---------------------------------------------------------------------------

/// Which files in the working tree are content and which are kept aside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Out-of-band marker files (matched by file name anywhere in the tree).
    /// Never synced; preserved across resets.
    #[serde(default = "default_marker_files")]
    pub marker_files: Vec<String>,

    /// Per-entity metadata subdirectory (relative to the root). Never synced;
    /// preserved across resets.
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: String,

    /// Glob patterns (relative paths) excluded from sync.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

fn default_marker_files() -> Vec<String> {
    vec![".cmsync".into()]
}
fn default_metadata_dir() -> String {
    "_meta".into()
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            marker_files: default_marker_files(),
            metadata_dir: default_metadata_dir(),
            ignore_patterns: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl CmsyncConfig {
    /// Load a [`CmsyncConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: CmsyncConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve `repo.token_env` into `repo.token`. A missing variable is
    /// logged, not an error: local remotes need no token.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(ref env_name) = self.repo.token_env {
            self.repo.token = resolve_optional_env(env_name, "repo.token_env");
        }
        Ok(())
    }

    /// Validate that all values are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repo.remote.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "repo.remote".into(),
                detail: "remote name must not be empty".into(),
            });
        }
        if self.repo.branch.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "repo.branch".into(),
                detail: "branch name must not be empty".into(),
            });
        }
        if self.sync.max_push_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.max_push_attempts".into(),
                detail: "must be at least 1".into(),
            });
        }
        if self.sync.max_merge_depth == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.max_merge_depth".into(),
                detail: "must be at least 1".into(),
            });
        }
        if self.tree.metadata_dir.contains("..") {
            return Err(ConfigError::InvalidValue {
                field: "tree.metadata_dir".into(),
                detail: "must stay inside the working tree".into(),
            });
        }
        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML and write to `path`.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// The default config location: `<config dir>/cmsync/cmsync.toml`,
    /// falling back to the current directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("cmsync").join(CONFIG_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
log_level = "debug"

[repo]
path = "/srv/content"
remote = "upstream"
branch = "content"
token_env = "CMSYNC_TEST_TOKEN"
author_name = "Site Bot"
author_email = "bot@example.com"

[sync]
max_push_attempts = 3
read_workers = 4
max_merge_depth = 2
preview_len = 40
structured_extensions = ["json", "jsonc"]

[tree]
marker_files = [".cms-marker"]
metadata_dir = ".entities"
ignore_patterns = ["**/*.tmp"]
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: CmsyncConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.repo.remote, "upstream");
        assert_eq!(config.repo.branch, "content");
        assert_eq!(config.sync.max_push_attempts, 3);
        assert_eq!(config.sync.structured_extensions, vec!["json", "jsonc"]);
        assert_eq!(config.tree.metadata_dir, ".entities");
        assert_eq!(config.tree.ignore_patterns, vec!["**/*.tmp"]);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmsync.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = CmsyncConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.repo.author_name, "Site Bot");
    }

    #[test]
    fn test_file_not_found() {
        let result = CmsyncConfig::load_from_file("/nonexistent/cmsync.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_defaults() {
        let config: CmsyncConfig = toml::from_str("").unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.repo.remote, "origin");
        assert_eq!(config.repo.branch, "main");
        assert_eq!(config.sync.max_push_attempts, 5);
        assert_eq!(config.sync.max_merge_depth, 5);
        assert_eq!(config.sync.structured_extensions, vec!["json"]);
        assert_eq!(config.tree.marker_files, vec![".cmsync"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = CmsyncConfig::default();
        config.sync.max_push_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "sync.max_push_attempts"
        ));
    }

    #[test]
    fn test_validate_rejects_escaping_metadata_dir() {
        let mut config = CmsyncConfig::default();
        config.tree.metadata_dir = "../outside".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "tree.metadata_dir"
        ));
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("CMSYNC_TEST_TOKEN_RESOLVE", "tok_123");
        let mut config = CmsyncConfig::default();
        config.repo.token_env = Some("CMSYNC_TEST_TOKEN_RESOLVE".into());
        config.resolve_env_vars().unwrap();
        assert_eq!(config.repo.token.as_deref(), Some("tok_123"));
        std::env::remove_var("CMSYNC_TEST_TOKEN_RESOLVE");
    }

    #[test]
    fn test_write_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmsync.toml");
        let mut config = CmsyncConfig::default();
        config.repo.branch = "published".into();
        config.write_to_file(&path).unwrap();

        let reloaded = CmsyncConfig::load_and_resolve(&path).unwrap();
        assert_eq!(reloaded.repo.branch, "published");
        assert_eq!(reloaded.sync.max_push_attempts, 5);
    }
}
