use serde::Serialize;
use tracing::{error, info};

use crate::artifact::ArtifactBundle;
use crate::error::PublishError;
use crate::resolve::{DeploymentPrefixSet, remote_path};
use crate::sync::{ExcludeRules, ObjectStoreSync};

pub const DEFAULT_REMOTE_ROOT: &str = "documentation";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SitePublishReport {
    pub target: String,
    pub destinations: Vec<String>,
}

/// Mirrors the rendered site into every resolved prefix.
pub struct SitePublisher {
    syncer: Box<dyn ObjectStoreSync>,
    remote_root: String,
    excludes: ExcludeRules,
}

impl SitePublisher {
    pub fn new(
        syncer: Box<dyn ObjectStoreSync>,
        remote_root: impl Into<String>,
        excludes: ExcludeRules,
    ) -> Self {
        Self {
            syncer,
            remote_root: remote_root.into(),
            excludes,
        }
    }

    /// Sync `bundle` to `<remote_root>/<prefix>` for each prefix, in order.
    ///
    /// Stops at the first failing prefix; the remaining prefixes are not
    /// attempted. Each sync is a mirror, so re-running the whole publish is
    /// the recovery path.
    pub async fn publish(
        &self,
        bundle: &ArtifactBundle,
        prefixes: &DeploymentPrefixSet,
    ) -> Result<SitePublishReport, PublishError> {
        let local_dir = bundle.ensure_present()?;
        let target = self.syncer.describe();
        let mut destinations = Vec::with_capacity(prefixes.len());

        for prefix in prefixes.iter() {
            let destination = remote_path(&self.remote_root, prefix);
            info!(
                "Publishing '{}' to {} ({})",
                bundle.kind, destination, target
            );
            if let Err(e) = self
                .syncer
                .sync(local_dir, &destination, &self.excludes)
                .await
            {
                error!("Publishing to {} failed, aborting remaining prefixes: {}", destination, e);
                return Err(e);
            }
            destinations.push(destination);
        }

        Ok(SitePublishReport {
            target,
            destinations,
        })
    }
}
