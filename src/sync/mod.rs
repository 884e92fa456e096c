//! Remote object-store synchronisation.
//!
//! `ObjectStoreSync` is the one interface the site publisher talks to:
//! mirror a local directory into a remote path, skipping excluded paths on
//! both sides. Implementations must be safe to re-run with the same inputs.

mod mirror;
mod rclone;

use std::path::Path;

use async_trait::async_trait;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::info;

use crate::error::PublishError;

pub(crate) use mirror::list_files;
pub use mirror::{LocalMirror, MirrorStats};
pub use rclone::RcloneSync;

/// Glob patterns (gitignore syntax) of paths a sync must leave alone.
///
/// A pattern containing `/` is anchored at the synced root; one without
/// matches at any depth. Negations (`!pattern`) are rejected because
/// `rclone --exclude` cannot express them.
#[derive(Debug, Clone)]
pub struct ExcludeRules {
    patterns: Vec<String>,
    matcher: Gitignore,
}

impl ExcludeRules {
    pub fn new(patterns: &[String]) -> Result<Self, PublishError> {
        let mut builder = GitignoreBuilder::new("");
        for pattern in patterns {
            if pattern.starts_with('!') {
                return Err(PublishError::Exclude(format!(
                    "'{pattern}': negated patterns are not supported"
                )));
            }
            builder
                .add_line(None, pattern)
                .map_err(|e| PublishError::Exclude(format!("'{pattern}': {e}")))?;
        }
        let matcher = builder
            .build()
            .map_err(|e| PublishError::Exclude(e.to_string()))?;
        Ok(Self {
            patterns: patterns.to_vec(),
            matcher,
        })
    }

    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            matcher: Gitignore::empty(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// `relative` is a path inside the synced tree, relative to its root.
    pub fn is_excluded(&self, relative: &Path, is_dir: bool) -> bool {
        if relative.as_os_str().is_empty() {
            return false;
        }
        self.matcher
            .matched_path_or_any_parents(relative, is_dir)
            .is_ignore()
    }
}

#[async_trait]
pub trait ObjectStoreSync: Send + Sync {
    /// Where this syncer writes, for logs.
    fn describe(&self) -> String;

    /// Make `remote_path` mirror `local_dir`, except for excluded paths.
    async fn sync(
        &self,
        local_dir: &Path,
        remote_path: &str,
        excludes: &ExcludeRules,
    ) -> Result<(), PublishError>;
}

/// Logs what would be synced and touches nothing.
#[derive(Debug, Default)]
pub struct DryRunSync;

#[async_trait]
impl ObjectStoreSync for DryRunSync {
    fn describe(&self) -> String {
        "dry run".to_string()
    }

    async fn sync(
        &self,
        local_dir: &Path,
        remote_path: &str,
        excludes: &ExcludeRules,
    ) -> Result<(), PublishError> {
        info!(
            "[DRY_RUN] Would sync {} -> {} (excluding {:?})",
            local_dir.display(),
            remote_path,
            excludes.patterns()
        );
        Ok(())
    }
}
