//! One deployment run: latest tag, plan, build once, publish both branches
//! concurrently.

use std::path::Path;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::DeployConfig;
use crate::artifact::{ArtifactProducer, Artifacts};
use crate::error::{PublishError, Result};
use crate::event::{RunContext, TriggerEvent};
use crate::publish::{
    DryRunRepo, GitCli, SitePublishReport, SitePublisher, TranslationPublishReport,
    TranslationPublisher, TranslationRepo,
};
use crate::resolve::DeploymentPlan;
use crate::source::{checkout_revision, fetch_remote, revision_for};
use crate::sync::{DryRunSync, ExcludeRules, LocalMirror, ObjectStoreSync, RcloneSync};
use crate::tags::compute_latest_tag;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Reuse existing build output instead of running the build commands.
    pub skip_build: bool,
    /// Plan and build, but make no remote call.
    pub dry_run: bool,
}

/// Result of one publishing branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BranchOutcome<T> {
    Skipped { reason: String },
    Published(T),
    Failed { error: String },
}

impl<T> BranchOutcome<T> {
    pub fn skipped(reason: impl Into<String>) -> Self {
        BranchOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BranchOutcome::Failed { .. })
    }

    pub fn is_published(&self) -> bool {
        matches!(self, BranchOutcome::Published(_))
    }

    fn from_result(branch: &str, result: std::result::Result<T, PublishError>) -> Self {
        match result {
            Ok(report) => BranchOutcome::Published(report),
            Err(e) => {
                error!("{} publishing failed: {}", branch, e);
                BranchOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub plan: DeploymentPlan,
    /// False when nothing was gated on and the build was skipped.
    pub built: bool,
    pub site: BranchOutcome<SitePublishReport>,
    pub translations: BranchOutcome<TranslationPublishReport>,
}

impl PipelineReport {
    /// The run fails if either branch failed.
    pub fn is_success(&self) -> bool {
        !self.site.is_failed() && !self.translations.is_failed()
    }

    pub fn failures(&self) -> Vec<String> {
        let mut failures = Vec::new();
        if let BranchOutcome::Failed { error } = &self.site {
            failures.push(format!("site: {error}"));
        }
        if let BranchOutcome::Failed { error } = &self.translations {
            failures.push(format!("translations: {error}"));
        }
        failures
    }
}

fn site_skip_reason(plan: &DeploymentPlan) -> Option<&'static str> {
    if !plan.publish_site {
        Some("deployment disabled for this run")
    } else if plan.prefixes.is_empty() {
        Some("no deployment prefixes")
    } else {
        None
    }
}

fn translations_skip_reason(plan: &DeploymentPlan) -> Option<&'static str> {
    if plan.publish_translations {
        None
    } else {
        Some("not requested for this event")
    }
}

/// Run both publishing branches against the same artifacts.
///
/// Gating is re-checked here; a branch whose publisher is `None` is
/// reported as not configured and one whose publisher could not be set up
/// is reported as failed. Neither branch's failure affects the other.
pub async fn fan_out(
    plan: &DeploymentPlan,
    artifacts: &Artifacts,
    ctx: &RunContext,
    site: Option<std::result::Result<SitePublisher, PublishError>>,
    translations: Option<std::result::Result<TranslationPublisher, PublishError>>,
) -> (
    BranchOutcome<SitePublishReport>,
    BranchOutcome<TranslationPublishReport>,
) {
    let site_branch = async {
        if let Some(reason) = site_skip_reason(plan) {
            return BranchOutcome::skipped(reason);
        }
        match site {
            None => BranchOutcome::skipped("not configured"),
            Some(Err(e)) => BranchOutcome::from_result("Site", Err(e)),
            Some(Ok(publisher)) => {
                let result = publisher.publish(&artifacts.site, &plan.prefixes).await;
                BranchOutcome::from_result("Site", result)
            }
        }
    };

    let translations_branch = async {
        if let Some(reason) = translations_skip_reason(plan) {
            return BranchOutcome::skipped(reason);
        }
        match translations {
            None => BranchOutcome::skipped("not configured"),
            Some(Err(e)) => BranchOutcome::from_result("Translation", Err(e)),
            Some(Ok(publisher)) => {
                let result = publisher.publish(&artifacts.translations, ctx).await;
                BranchOutcome::from_result("Translation", result)
            }
        }
    };

    tokio::join!(site_branch, translations_branch)
}

pub struct Pipeline {
    config: DeployConfig,
    options: RunOptions,
}

impl Pipeline {
    pub fn new(config: DeployConfig, options: RunOptions) -> Self {
        Self { config, options }
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    fn repo_path(&self) -> &Path {
        &self.config.source.repo_path
    }

    /// Compute the latest release tag and resolve the event. Nothing is
    /// built or published yet, so resolver errors cost nothing.
    pub async fn plan(&self, event: TriggerEvent) -> Result<DeploymentPlan> {
        let latest_tag = compute_latest_tag(self.repo_path()).await?;
        let plan = DeploymentPlan::new(event, latest_tag, &self.config.source.mainline_branch)?;
        info!(
            "Plan for {}: prefixes {:?}, latest tag {:?}, site: {}, translations: {}",
            plan.event.describe(),
            plan.prefixes.as_slice(),
            plan.latest_tag,
            plan.publish_site,
            plan.publish_translations
        );
        Ok(plan)
    }

    /// Fetch branches and tags from the source remote so the tag history
    /// includes whatever the triggering push just created.
    pub async fn refresh_source(&self) -> Result<()> {
        fetch_remote(self.repo_path(), &self.config.source.remote).await
    }

    /// Move the source checkout to the revision the run is for. Events with
    /// no revision, and plans that build nothing, leave the checkout as it is.
    pub async fn checkout(&self, plan: &DeploymentPlan, ctx: &RunContext) -> Result<()> {
        if plan.is_noop() {
            return Ok(());
        }
        let source = &self.config.source;
        match revision_for(&plan.event, ctx, &source.remote, &source.mainline_branch) {
            Some(revision) => checkout_revision(self.repo_path(), &revision).await,
            None => {
                warn!("No revision for {}; building the current checkout", plan.event.describe());
                Ok(())
            }
        }
    }

    pub async fn run(&self, event: TriggerEvent, ctx: &RunContext) -> Result<PipelineReport> {
        let plan = self.plan(event).await?;
        self.execute(plan, ctx).await
    }

    /// Build once and publish according to an already resolved plan.
    pub async fn execute(&self, plan: DeploymentPlan, ctx: &RunContext) -> Result<PipelineReport> {
        if plan.is_noop() {
            info!("Nothing to publish for {}; skipping build", plan.event.describe());
            let site = BranchOutcome::skipped(site_skip_reason(&plan).unwrap_or("nothing to do"));
            let translations = BranchOutcome::skipped(
                translations_skip_reason(&plan).unwrap_or("nothing to do"),
            );
            return Ok(PipelineReport {
                plan,
                built: false,
                site,
                translations,
            });
        }

        let artifacts = self.artifacts().await?;

        // Credentials are decrypted only for branches that will run.
        let site = site_skip_reason(&plan)
            .is_none()
            .then(|| self.site_publisher());
        let translations = if translations_skip_reason(&plan).is_none() {
            self.translation_publisher()
        } else {
            None
        };

        let (site, translations) = fan_out(&plan, &artifacts, ctx, site, translations).await;
        let report = PipelineReport {
            plan,
            built: true,
            site,
            translations,
        };
        if report.is_success() {
            info!("Deployment finished");
        } else {
            warn!("Deployment finished with failures: {:?}", report.failures());
        }
        Ok(report)
    }

    async fn artifacts(&self) -> Result<Artifacts> {
        let producer = ArtifactProducer::new(&self.config.build, self.repo_path());
        if self.options.skip_build {
            info!("Skipping build, using existing output");
            producer.collect()
        } else {
            producer.build().await
        }
    }

    fn site_publisher(&self) -> std::result::Result<SitePublisher, PublishError> {
        let site = &self.config.site;
        let excludes = ExcludeRules::new(&site.exclude)?;
        let syncer: Box<dyn ObjectStoreSync> = if self.options.dry_run {
            Box::new(DryRunSync)
        } else if let Some(root) = site.local_root() {
            Box::new(LocalMirror::new(root))
        } else {
            let credential = site
                .credentials
                .as_ref()
                .map(|spec| spec.acquire(self.repo_path()))
                .transpose()?;
            Box::new(RcloneSync::new(&site.remote, &site.bucket, credential))
        };
        Ok(SitePublisher::new(syncer, &site.root, excludes))
    }

    fn translation_publisher(&self) -> Option<std::result::Result<TranslationPublisher, PublishError>> {
        let config = self.config.translations.as_ref()?;
        let repo: std::result::Result<Box<dyn TranslationRepo>, PublishError> = if self.options.dry_run {
            Ok(Box::new(DryRunRepo))
        } else {
            config
                .deploy_key
                .as_ref()
                .map(|spec| spec.acquire(self.repo_path()))
                .transpose()
                .map(|key| {
                    Box::new(GitCli::new(key, &config.author_name, &config.author_email))
                        as Box<dyn TranslationRepo>
                })
                .map_err(PublishError::from)
        };
        Some(repo.map(|repo| TranslationPublisher::new(repo, config.clone(), self.repo_path())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::DeploymentPrefixSet;

    fn plan(event: TriggerEvent, latest: Option<&str>) -> DeploymentPlan {
        DeploymentPlan::new(event, latest.map(String::from), "main").unwrap()
    }

    #[test]
    fn disabled_manual_dispatch_skips_both_branches() {
        let plan = plan(
            TriggerEvent::ManualDispatch {
                prefix: Some("dev".into()),
                deploy_enabled: false,
                translatables_enabled: false,
            },
            Some("1.2.3"),
        );
        assert_eq!(site_skip_reason(&plan), Some("deployment disabled for this run"));
        assert_eq!(translations_skip_reason(&plan), Some("not requested for this event"));
    }

    #[test]
    fn empty_prefix_set_skips_site() {
        let mut plan = plan(TriggerEvent::branch_push("main"), None);
        plan.prefixes = DeploymentPrefixSet::new(Vec::new());
        assert_eq!(site_skip_reason(&plan), Some("no deployment prefixes"));
    }

    #[test]
    fn report_fails_when_any_branch_failed() {
        let report = PipelineReport {
            plan: plan(TriggerEvent::tag_push("1.2.3"), Some("1.2.3")),
            built: true,
            site: BranchOutcome::Published(SitePublishReport {
                target: "file:///tmp".into(),
                destinations: vec!["documentation/".into()],
            }),
            translations: BranchOutcome::Failed {
                error: "push rejected".into(),
            },
        };
        assert!(!report.is_success());
        assert_eq!(report.failures(), vec!["translations: push rejected"]);
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome: BranchOutcome<SitePublishReport> = BranchOutcome::skipped("not configured");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "not configured");
    }
}
