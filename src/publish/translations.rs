use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::TranslationsConfig;
use crate::artifact::ArtifactBundle;
use crate::command::run_command;
use crate::error::PublishError;
use crate::event::RunContext;
use crate::secrets::TransientCredential;
use crate::sync::{ExcludeRules, list_files};

/// Marker that stops the translation repository's own CI from running on
/// the automated commit.
pub const SKIP_CI_MARKER: &str = "[skip ci]";

/// The git operations the translation publisher needs from the target
/// repository.
#[async_trait]
pub trait TranslationRepo: Send + Sync {
    async fn clone_repo(&self, url: &str, branch: &str, dest: &Path) -> Result<(), PublishError>;
    async fn add_all(&self, repo: &Path) -> Result<(), PublishError>;
    async fn has_staged_changes(&self, repo: &Path) -> Result<bool, PublishError>;
    async fn commit(&self, repo: &Path, message: &str) -> Result<(), PublishError>;
    async fn push(&self, repo: &Path, branch: &str) -> Result<(), PublishError>;
}

/// `TranslationRepo` over the git command line, authenticating with a
/// deploy key when one was decrypted.
#[derive(Debug)]
pub struct GitCli {
    ssh_key: Option<TransientCredential>,
    author_name: String,
    author_email: String,
}

impl GitCli {
    pub fn new(
        ssh_key: Option<TransientCredential>,
        author_name: impl Into<String>,
        author_email: impl Into<String>,
    ) -> Self {
        Self {
            ssh_key,
            author_name: author_name.into(),
            author_email: author_email.into(),
        }
    }

    fn ssh_command(&self) -> Option<String> {
        self.ssh_key.as_ref().map(|key| {
            format!(
                "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new",
                shell_quote(&key.path().to_string_lossy())
            )
        })
    }

    async fn git(&self, operation: &str, args: &[&str], cwd: Option<&Path>) -> Result<String, PublishError> {
        let ssh = self.ssh_command();
        let envs: Vec<(&str, &OsStr)> = ssh
            .as_deref()
            .map(|cmd| vec![("GIT_SSH_COMMAND", OsStr::new(cmd))])
            .unwrap_or_default();
        run_command("git", args, cwd, &envs)
            .await
            .map_err(|e| PublishError::Git {
                operation: operation.to_string(),
                source: e,
            })
    }
}

/// Single-quote `value` for the shell git runs `GIT_SSH_COMMAND` through.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[async_trait]
impl TranslationRepo for GitCli {
    async fn clone_repo(&self, url: &str, branch: &str, dest: &Path) -> Result<(), PublishError> {
        let dest = dest.to_string_lossy().into_owned();
        self.git(
            "clone",
            &["clone", "--depth", "1", "--branch", branch, url, dest.as_str()],
            None,
        )
        .await?;
        Ok(())
    }

    async fn add_all(&self, repo: &Path) -> Result<(), PublishError> {
        self.git("add", &["add", "-A"], Some(repo)).await?;
        Ok(())
    }

    async fn has_staged_changes(&self, repo: &Path) -> Result<bool, PublishError> {
        let status = self.git("status", &["status", "--porcelain"], Some(repo)).await?;
        Ok(!status.trim().is_empty())
    }

    async fn commit(&self, repo: &Path, message: &str) -> Result<(), PublishError> {
        let name = format!("user.name={}", self.author_name);
        let email = format!("user.email={}", self.author_email);
        self.git(
            "commit",
            &["-c", name.as_str(), "-c", email.as_str(), "commit", "-m", message],
            Some(repo),
        )
        .await?;
        Ok(())
    }

    async fn push(&self, repo: &Path, branch: &str) -> Result<(), PublishError> {
        let refspec = format!("HEAD:{branch}");
        self.git("push", &["push", "origin", refspec.as_str()], Some(repo)).await?;
        Ok(())
    }
}

/// Logs the commit it would make; never contacts a remote.
#[derive(Debug, Default)]
pub struct DryRunRepo;

#[async_trait]
impl TranslationRepo for DryRunRepo {
    async fn clone_repo(&self, url: &str, branch: &str, dest: &Path) -> Result<(), PublishError> {
        info!("[DRY_RUN] Would clone {} ({})", url, branch);
        fs::create_dir_all(dest).map_err(|e| PublishError::Io {
            context: format!("creating {}", dest.display()),
            source: e,
        })
    }

    async fn add_all(&self, _repo: &Path) -> Result<(), PublishError> {
        Ok(())
    }

    async fn has_staged_changes(&self, _repo: &Path) -> Result<bool, PublishError> {
        Ok(true)
    }

    async fn commit(&self, _repo: &Path, message: &str) -> Result<(), PublishError> {
        info!("[DRY_RUN] Would commit:\n{}", message);
        Ok(())
    }

    async fn push(&self, _repo: &Path, branch: &str) -> Result<(), PublishError> {
        info!("[DRY_RUN] Would push to {}", branch);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslationPublishReport {
    pub repository: String,
    pub branch: String,
    pub files: usize,
    pub committed: bool,
}

/// Commit message for the translation repository.
pub fn commit_message(ctx: &RunContext) -> String {
    let repository = if ctx.repository.is_empty() {
        "the source repository"
    } else {
        ctx.repository.as_str()
    };
    format!(
        "Automated documentation update to add translatable strings from {}\n\n{}\n\nCommit: {}\nRun: {}",
        repository,
        SKIP_CI_MARKER,
        ctx.commit_sha,
        ctx.run_url.as_deref().unwrap_or("n/a")
    )
}

pub struct TranslationPublisher {
    repo: Box<dyn TranslationRepo>,
    config: TranslationsConfig,
    source_dir: PathBuf,
}

impl TranslationPublisher {
    /// `source_dir` is the source checkout the reproducibility files are
    /// copied from.
    pub fn new(repo: Box<dyn TranslationRepo>, config: TranslationsConfig, source_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo,
            config,
            source_dir: source_dir.into(),
        }
    }

    /// Replace the translation directory of the target repository with the
    /// filtered bundle, commit and push. Steps run strictly in order and the
    /// first failure ends the publish.
    pub async fn publish(
        &self,
        bundle: &ArtifactBundle,
        ctx: &RunContext,
    ) -> Result<TranslationPublishReport, PublishError> {
        let bundle_root = bundle.ensure_present()?;
        let target_dir = checked_target_dir(&self.config.target_dir)?;
        let ignore = ExcludeRules::new(&self.config.ignore)?;

        let workdir = tempfile::TempDir::new().map_err(|e| io_error("creating work directory", e))?;
        let checkout = workdir.path().join("translations");

        self.repo
            .clone_repo(&self.config.repo_url, &self.config.branch, &checkout)
            .await?;

        let target = checkout.join(target_dir);
        if target.exists() {
            info!("Removing previous contents of {}", target.display());
            fs::remove_dir_all(&target)
                .map_err(|e| io_error(&format!("removing {}", target.display()), e))?;
        }
        let files = copy_filtered(bundle_root, &target, &ignore)?;
        info!("Staged {} translatable files into {}", files, target.display());

        self.copy_reproducibility_files(&checkout)?;

        self.repo.add_all(&checkout).await?;
        if !self.repo.has_staged_changes(&checkout).await? {
            info!("Translatable strings unchanged; nothing to commit");
            return Ok(self.report(files, false));
        }

        self.repo.commit(&checkout, &commit_message(ctx)).await?;
        self.repo.push(&checkout, &self.config.branch).await?;
        info!(
            "Pushed translatable strings to {} ({})",
            self.config.repo_url, self.config.branch
        );
        Ok(self.report(files, true))
    }

    fn copy_reproducibility_files(&self, checkout: &Path) -> Result<(), PublishError> {
        for file in &self.config.reproducibility_files {
            let source = self.source_dir.join(file);
            let Some(name) = file.file_name() else {
                warn!("Skipping reproducibility file {:?}: no file name", file);
                continue;
            };
            if !source.is_file() {
                warn!("Reproducibility file {} not found, skipping", source.display());
                continue;
            }
            fs::copy(&source, checkout.join(name))
                .map_err(|e| io_error(&format!("copying {}", source.display()), e))?;
        }
        Ok(())
    }

    fn report(&self, files: usize, committed: bool) -> TranslationPublishReport {
        TranslationPublishReport {
            repository: self.config.repo_url.clone(),
            branch: self.config.branch.clone(),
            files,
            committed,
        }
    }
}

/// The target directory is wiped before each publish, so it must stay
/// strictly inside the checkout.
fn checked_target_dir(dir: &Path) -> Result<&Path, PublishError> {
    let inside = !dir.as_os_str().is_empty()
        && dir.components().all(|c| matches!(c, Component::Normal(_)));
    if inside {
        Ok(dir)
    } else {
        Err(io_error(
            "translation target_dir",
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} must be a relative path inside the repository", dir.display()),
            ),
        ))
    }
}

fn copy_filtered(source: &Path, dest: &Path, ignore: &ExcludeRules) -> Result<usize, PublishError> {
    let files = list_files(source, ignore).map_err(|e| io_error("listing translatable strings", e))?;
    fs::create_dir_all(dest).map_err(|e| io_error(&format!("creating {}", dest.display()), e))?;
    for (relative, path) in &files {
        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| io_error(&format!("creating {}", parent.display()), e))?;
        }
        fs::copy(path, &target).map_err(|e| io_error(&format!("copying {}", path.display()), e))?;
    }
    Ok(files.len())
}

fn io_error(context: &str, source: io::Error) -> PublishError {
    PublishError::Io {
        context: context.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_message_carries_provenance_and_skip_marker() {
        let ctx = RunContext {
            repository: "Qiskit/qiskit".to_string(),
            commit_sha: "deadbeef".to_string(),
            run_url: Some("https://github.com/Qiskit/qiskit/actions/runs/7".to_string()),
        };
        let message = commit_message(&ctx);
        assert!(message.contains("Qiskit/qiskit"));
        assert!(message.contains(SKIP_CI_MARKER));
        assert!(message.contains("Commit: deadbeef"));
        assert!(message.contains("https://github.com/Qiskit/qiskit/actions/runs/7"));
    }

    #[test]
    fn target_dir_must_stay_inside_checkout() {
        assert!(checked_target_dir(Path::new("docs/locale/en")).is_ok());
        assert!(checked_target_dir(Path::new("")).is_err());
        assert!(checked_target_dir(Path::new("/etc")).is_err());
        assert!(checked_target_dir(Path::new("../outside")).is_err());
        assert!(checked_target_dir(Path::new("./docs")).is_err());
    }

    #[test]
    fn ssh_command_uses_deploy_key() {
        let key = TransientCredential::from_plaintext(b"-----BEGIN KEY-----").unwrap();
        let key_path = key.path().display().to_string();
        let git = GitCli::new(Some(key), "bot", "bot@example.com");
        let cmd = git.ssh_command().unwrap();
        assert!(cmd.starts_with(&format!("ssh -i '{key_path}' ")));
        assert!(GitCli::new(None, "bot", "bot@example.com").ssh_command().is_none());
    }

    #[test]
    fn quoting_survives_spaces_and_quotes() {
        assert_eq!(shell_quote("/tmp/deploy key"), "'/tmp/deploy key'");
        assert_eq!(shell_quote("/tmp/it's"), r"'/tmp/it'\''s'");
    }
}
