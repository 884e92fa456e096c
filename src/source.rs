//! Keeping the source checkout current in `serve` mode.
//!
//! A webhook arrives before the server's checkout knows about the pushed
//! commit or tag, so the tag history is fetched before planning and the
//! event's revision is checked out before the build.

use std::path::Path;

use tracing::info;

use crate::command::run_command;
use crate::error::DeployError;
use crate::event::{RefKind, RunContext, TriggerEvent};

/// `git fetch --tags --force <remote>`: remote branches plus every tag,
/// moved tags included.
pub async fn fetch_remote(repo_path: &Path, remote: &str) -> Result<(), DeployError> {
    run_command("git", &["fetch", "--tags", "--force", remote], Some(repo_path), &[])
        .await
        .map_err(DeployError::Checkout)?;
    Ok(())
}

/// Detach the working tree at `revision`, discarding local changes.
pub async fn checkout_revision(repo_path: &Path, revision: &str) -> Result<(), DeployError> {
    run_command(
        "git",
        &["checkout", "--force", "--detach", revision],
        Some(repo_path),
        &[],
    )
    .await
    .map_err(DeployError::Checkout)?;
    info!("Checked out {} in {}", revision, repo_path.display());
    Ok(())
}

/// The revision a run should build. The pushed commit wins; otherwise the
/// pushed ref, and the mainline branch for a manual dispatch.
pub fn revision_for(
    event: &TriggerEvent,
    ctx: &RunContext,
    remote: &str,
    mainline_branch: &str,
) -> Option<String> {
    if is_commit(&ctx.commit_sha) {
        return Some(ctx.commit_sha.clone());
    }
    match event {
        TriggerEvent::Push {
            ref_kind: RefKind::Tag,
            ref_name,
        } => Some(format!("refs/tags/{ref_name}")),
        TriggerEvent::Push {
            ref_kind: RefKind::Branch,
            ref_name,
        } => Some(format!("refs/remotes/{remote}/{ref_name}")),
        TriggerEvent::ManualDispatch { .. } => {
            Some(format!("refs/remotes/{remote}/{mainline_branch}"))
        }
        _ => None,
    }
}

// A deleted ref is pushed as the all-zero sha.
fn is_commit(sha: &str) -> bool {
    !sha.is_empty() && sha.bytes().all(|b| b.is_ascii_hexdigit()) && sha.bytes().any(|b| b != b'0')
}
