//! Deployment target resolution.
//!
//! Pure decision logic: no I/O happens here. Given a trigger event and the
//! latest release tag, decide which documentation prefixes receive the site
//! and whether each publishing branch runs at all.

use serde::Serialize;

use crate::error::ResolveError;
use crate::event::{RefKind, TriggerEvent};
use crate::tags::ReleaseVersion;

pub const DEFAULT_MAINLINE_BRANCH: &str = "main";
pub const DEV_PREFIX: &str = "dev";
pub const STABLE_PREFIX: &str = "stable";

/// Ordered destination prefixes. The empty string is the site root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DeploymentPrefixSet(Vec<String>);

impl DeploymentPrefixSet {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self(prefixes)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a DeploymentPrefixSet {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Resolve the destination prefixes for `event`.
///
/// `mainline` is the only branch whose pushes deploy (to `dev`). A tag
/// push deploys to `stable/MAJOR.MINOR`, and additionally to the root when
/// the tag is byte-for-byte the latest release tag.
pub fn resolve(
    event: &TriggerEvent,
    latest_tag: Option<&str>,
    mainline: &str,
) -> Result<DeploymentPrefixSet, ResolveError> {
    let prefixes = match event {
        TriggerEvent::Push {
            ref_kind: RefKind::Branch,
            ref_name,
        } => {
            if ref_name != mainline {
                return Err(ResolveError::UnhandledBranch {
                    ref_name: ref_name.clone(),
                    mainline: mainline.to_string(),
                });
            }
            vec![DEV_PREFIX.to_string()]
        }
        TriggerEvent::Push {
            ref_kind: RefKind::Tag,
            ref_name,
        } => {
            let version = ReleaseVersion::parse(ref_name).ok_or_else(|| {
                ResolveError::MalformedTag {
                    tag: ref_name.clone(),
                }
            })?;
            let mut prefixes = vec![format!("{STABLE_PREFIX}/{}", version.minor_series())];
            if latest_tag == Some(ref_name.as_str()) {
                prefixes.push(String::new());
            }
            prefixes
        }
        TriggerEvent::Push {
            ref_kind: RefKind::Other(kind),
            ref_name,
        } => {
            return Err(ResolveError::UnhandledRefType {
                ref_type: kind.clone(),
                ref_name: ref_name.clone(),
            });
        }
        TriggerEvent::ManualDispatch { prefix, .. } => {
            vec![prefix.clone().unwrap_or_default()]
        }
        TriggerEvent::Unsupported { name } => {
            return Err(ResolveError::UnhandledEvent {
                event: name.clone(),
            });
        }
    };
    Ok(DeploymentPrefixSet(prefixes))
}

/// The site is published for every event except a manual dispatch that
/// did not ask for a real deployment.
pub fn site_publish_enabled(event: &TriggerEvent) -> bool {
    match event {
        TriggerEvent::ManualDispatch { deploy_enabled, .. } => *deploy_enabled,
        TriggerEvent::Push { .. } | TriggerEvent::Unsupported { .. } => true,
    }
}

/// Translatable strings are published on request, or when the latest
/// release tag itself is pushed.
pub fn translations_publish_enabled(event: &TriggerEvent, latest_tag: Option<&str>) -> bool {
    match event {
        TriggerEvent::ManualDispatch {
            translatables_enabled,
            ..
        } => *translatables_enabled,
        TriggerEvent::Push {
            ref_kind: RefKind::Tag,
            ref_name,
        } => latest_tag == Some(ref_name.as_str()),
        TriggerEvent::Push { .. } | TriggerEvent::Unsupported { .. } => false,
    }
}

/// Remote directory for a prefix, e.g. `documentation/stable/1.2`. The
/// empty prefix collapses to `documentation/`.
pub fn remote_path(root: &str, prefix: &str) -> String {
    let root = root.trim_end_matches('/');
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{root}/")
    } else {
        format!("{root}/{prefix}")
    }
}

/// Everything decided before any side effect happens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentPlan {
    pub event: TriggerEvent,
    pub latest_tag: Option<String>,
    pub prefixes: DeploymentPrefixSet,
    pub publish_site: bool,
    pub publish_translations: bool,
}

impl DeploymentPlan {
    /// Resolve prefixes and gating for `event`. Resolver errors are fatal
    /// and surface before anything is built or published.
    pub fn new(
        event: TriggerEvent,
        latest_tag: Option<String>,
        mainline: &str,
    ) -> Result<Self, ResolveError> {
        let prefixes = resolve(&event, latest_tag.as_deref(), mainline)?;
        let publish_site = site_publish_enabled(&event);
        let publish_translations = translations_publish_enabled(&event, latest_tag.as_deref());
        Ok(Self {
            event,
            latest_tag,
            prefixes,
            publish_site,
            publish_translations,
        })
    }

    /// Nothing will be published: the build can be skipped.
    pub fn is_noop(&self) -> bool {
        !self.publish_translations && (!self.publish_site || self.prefixes.is_empty())
    }
}
