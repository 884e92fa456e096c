use std::ffi::OsString;
use std::path::Path;

use async_trait::async_trait;

use super::{ExcludeRules, ObjectStoreSync};
use crate::command::run_command;
use crate::error::PublishError;
use crate::secrets::TransientCredential;

/// Sync through `rclone sync`, which is itself an idempotent mirror.
///
/// The decrypted rclone config, when there is one, is owned by this value
/// and removed as soon as the syncer is dropped.
#[derive(Debug)]
pub struct RcloneSync {
    remote: String,
    bucket: String,
    credential: Option<TransientCredential>,
}

impl RcloneSync {
    pub fn new(
        remote: impl Into<String>,
        bucket: impl Into<String>,
        credential: Option<TransientCredential>,
    ) -> Self {
        Self {
            remote: remote.into(),
            bucket: bucket.into(),
            credential,
        }
    }

    /// `IBMCOS:bucket/documentation/dev`
    pub fn destination(&self, remote_path: &str) -> String {
        let path = remote_path.trim_start_matches('/');
        if self.bucket.is_empty() {
            format!("{}:{}", self.remote, path)
        } else {
            format!("{}:{}/{}", self.remote, self.bucket.trim_end_matches('/'), path)
        }
    }

    fn args(&self, local_dir: &Path, remote_path: &str, excludes: &ExcludeRules) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "sync".into(),
            local_dir.as_os_str().to_owned(),
            self.destination(remote_path).into(),
        ];
        if let Some(credential) = &self.credential {
            args.push("--config".into());
            args.push(credential.path().as_os_str().to_owned());
        }
        for pattern in excludes.patterns().iter().flat_map(|p| rclone_filters(p)) {
            args.push("--exclude".into());
            args.push(pattern.into());
        }
        args
    }
}

/// Translate one gitignore-style exclude into rclone filter patterns.
///
/// rclone anchors a pattern only when it starts with `/`, and a bare name
/// never matches a directory's contents, so `dev/**` becomes `/dev/**` and
/// `stubs` becomes `stubs` plus `stubs/**`.
fn rclone_filters(pattern: &str) -> Vec<String> {
    let dir_only = pattern.len() > 1 && pattern.ends_with('/');
    let body = pattern.trim_end_matches('/');
    let anchored = if body.starts_with('/') || body.starts_with("**/") {
        body.to_string()
    } else if body.contains('/') {
        format!("/{body}")
    } else {
        body.to_string()
    };
    if anchored.ends_with("**") {
        vec![anchored]
    } else if dir_only {
        vec![format!("{anchored}/**")]
    } else {
        vec![anchored.clone(), format!("{anchored}/**")]
    }
}

#[async_trait]
impl ObjectStoreSync for RcloneSync {
    fn describe(&self) -> String {
        format!("rclone {}:{}", self.remote, self.bucket)
    }

    async fn sync(
        &self,
        local_dir: &Path,
        remote_path: &str,
        excludes: &ExcludeRules,
    ) -> Result<(), PublishError> {
        let args = self.args(local_dir, remote_path, excludes);
        run_command("rclone", &args, None, &[])
            .await
            .map_err(|e| PublishError::Sync {
                remote: self.destination(remote_path),
                source: e,
            })?;
        Ok(())
    }
}
