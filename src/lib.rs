pub mod api;
pub mod artifact;
pub mod command;
pub mod error;
pub mod event;
pub mod logging;
pub mod pipeline;
pub mod publish;
pub mod resolve;
pub mod run;
pub mod secrets;
pub mod source;
pub mod sync;
pub mod tags;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::{Mutex, broadcast};

use crate::error::{DeployError, Result};
use crate::resolve::DEFAULT_MAINLINE_BRANCH;
use crate::run::{RunEvent, RunStore};
use crate::secrets::SecretSpec;

pub const DEFAULT_CONFIG_PATH: &str = "docs_deploy.toml";
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8888";
pub const DEFAULT_MAX_RUNS: usize = 24;

#[derive(Debug, Deserialize, Clone)]
pub struct DeployConfig {
    pub source: SourceConfig,
    pub build: BuildConfig,
    pub site: SiteConfig,
    pub translations: Option<TranslationsConfig>,
    pub server: Option<ServerConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// `owner/name`, used in commit messages.
    #[serde(default)]
    pub repository: String,
    /// Checkout holding the tag history and the build inputs.
    #[serde(default = "default_repo_path")]
    pub repo_path: PathBuf,
    #[serde(default = "default_mainline_branch")]
    pub mainline_branch: String,
    /// Remote fetched before each webhook-triggered run.
    #[serde(default = "default_source_remote")]
    pub remote: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuildConfig {
    #[serde(default)]
    pub commands: Vec<String>,
    pub site_dir: PathBuf,
    pub translations_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    /// rclone remote name, or `file:///path` for a local mirror.
    pub remote: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_remote_root")]
    pub root: String,
    #[serde(default)]
    pub exclude: Vec<String>,
    pub credentials: Option<SecretSpec>,
}

impl SiteConfig {
    /// Local directory for `file://` remotes.
    pub fn local_root(&self) -> Option<PathBuf> {
        self.remote.strip_prefix("file://").map(PathBuf::from)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TranslationsConfig {
    pub repo_url: String,
    #[serde(default = "default_mainline_branch")]
    pub branch: String,
    pub target_dir: PathBuf,
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub reproducibility_files: Vec<PathBuf>,
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
    pub deploy_key: Option<SecretSpec>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    pub webhook_secret: Option<String>,
    #[serde(default = "default_max_runs")]
    pub max_runs: usize,
}

impl ServerConfig {
    /// Returns true if a valid (non-empty) webhook_secret is set.
    pub fn has_valid_secret(&self) -> bool {
        self.webhook_secret
            .as_ref()
            .map(|s| !s.is_empty())
            .unwrap_or(false)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            webhook_secret: None,
            max_runs: default_max_runs(),
        }
    }
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_mainline_branch() -> String {
    DEFAULT_MAINLINE_BRANCH.to_string()
}

fn default_source_remote() -> String {
    "origin".to_string()
}

fn default_remote_root() -> String {
    publish::DEFAULT_REMOTE_ROOT.to_string()
}

fn default_author_name() -> String {
    "Documentation Autodeploy".to_string()
}

fn default_author_email() -> String {
    "docs-deploy@localhost".to_string()
}

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

fn default_max_runs() -> usize {
    DEFAULT_MAX_RUNS
}

/// Load and parse the configuration file
pub fn load_config(path: &Path) -> Result<DeployConfig> {
    let config_str = fs::read_to_string(path).map_err(|e| {
        DeployError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;
    parse_config(&config_str).map_err(|e| {
        DeployError::ConfigError(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })
}

pub fn parse_config(contents: &str) -> Result<DeployConfig> {
    let config: DeployConfig = toml::from_str(contents)?;
    if config.site.remote.is_empty() {
        return Err(DeployError::ConfigError("[site] remote must not be empty".to_string()));
    }
    if config.site.local_root().is_none() && config.site.bucket.is_empty() {
        return Err(DeployError::ConfigError(format!(
            "[site] bucket is required for remote '{}'",
            config.site.remote
        )));
    }
    Ok(config)
}

pub struct AppState {
    /// Held for the whole of a pipeline run; one run at a time.
    pub execution_lock: Mutex<()>,
    pub runs: Mutex<RunStore>,
    pub run_events: broadcast::Sender<RunEvent>,
    pub config: DeployConfig,
    pub server: ServerConfig,
    pub dry_run: bool,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: DeployConfig, dry_run: bool) -> Self {
        let server = config.server.clone().unwrap_or_default();
        let (run_events, _) = broadcast::channel(64);
        Self {
            execution_lock: Mutex::new(()),
            runs: Mutex::new(RunStore::new(server.max_runs)),
            run_events,
            config,
            server,
            dry_run,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[build]
site_dir = "docs/_build/html"
translations_dir = "docs/locale"

[site]
remote = "IBMCOS"
bucket = "qiskit-org-web-resources"
exclude = ["locale/**", "stable/**", "dev/**"]

[source]
repository = "Qiskit/qiskit"
"#;

    #[test]
    fn defaults_fill_optional_fields() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.source.mainline_branch, "main");
        assert_eq!(config.source.repo_path, PathBuf::from("."));
        assert_eq!(config.source.remote, "origin");
        assert_eq!(config.site.root, "documentation");
        assert!(config.site.credentials.is_none());
        assert!(config.translations.is_none());
        assert!(config.build.commands.is_empty());
    }

    #[test]
    fn parses_translations_and_secrets() {
        let toml = format!(
            "{MINIMAL}\n{}",
            r#"
[site.credentials]
encrypted_file = "tools/rclone.conf.enc"
key_env = "encrypted_rclone_key"
iv_env = "encrypted_rclone_iv"

[translations]
repo_url = "git@github.com:Qiskit/qiskit-translations.git"
target_dir = "docs/locale/en"
ignore = ["stubs", "apidocs"]
reproducibility_files = ["setup.py"]

[translations.deploy_key]
encrypted_file = "tools/github_deploy_key.enc"
key_env = "encrypted_deploy_po_branch_key"
iv_env = "encrypted_deploy_po_branch_iv"
"#
        );
        let config = parse_config(&toml).unwrap();
        let creds = config.site.credentials.unwrap();
        assert_eq!(creds.key_env, "encrypted_rclone_key");
        let translations = config.translations.unwrap();
        assert_eq!(translations.branch, "main");
        assert_eq!(translations.ignore, vec!["stubs", "apidocs"]);
        assert!(translations.deploy_key.is_some());
    }

    #[test]
    fn object_store_remote_needs_a_bucket() {
        let toml = MINIMAL.replace("bucket = \"qiskit-org-web-resources\"\n", "");
        let err = parse_config(&toml).unwrap_err();
        assert!(matches!(err, DeployError::ConfigError(_)));
    }

    #[test]
    fn file_remote_needs_no_bucket() {
        let toml = MINIMAL
            .replace("remote = \"IBMCOS\"", "remote = \"file:///srv/docs\"")
            .replace("bucket = \"qiskit-org-web-resources\"\n", "");
        let config = parse_config(&toml).unwrap();
        assert_eq!(config.site.local_root(), Some(PathBuf::from("/srv/docs")));
    }

    #[test]
    fn missing_config_file_names_the_path() {
        let err = load_config(Path::new("/nonexistent/docs_deploy.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/docs_deploy.toml"));
    }
}
