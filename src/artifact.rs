//! Artifact production: build the documentation once, hand out two named
//! bundles.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info};

use crate::BuildConfig;
use crate::command::run_command_line;
use crate::error::{DeployError, PublishError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Site,
    Translations,
}

impl ArtifactKind {
    pub fn name(&self) -> &'static str {
        match self {
            ArtifactKind::Site => "site",
            ArtifactKind::Translations => "translations",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A built directory tree, addressed by its stable name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactBundle {
    pub kind: ArtifactKind,
    pub root: PathBuf,
}

impl ArtifactBundle {
    pub fn new(kind: ArtifactKind, root: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            root: root.into(),
        }
    }

    /// Fail unless the bundle directory exists.
    pub fn ensure_present(&self) -> Result<&Path, PublishError> {
        if self.root.is_dir() {
            Ok(&self.root)
        } else {
            Err(PublishError::MissingArtifact {
                name: self.kind.name().to_string(),
                path: self.root.clone(),
            })
        }
    }
}

/// Both outputs of a single build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifacts {
    pub site: ArtifactBundle,
    pub translations: ArtifactBundle,
}

impl Artifacts {
    pub fn get(&self, kind: ArtifactKind) -> &ArtifactBundle {
        match kind {
            ArtifactKind::Site => &self.site,
            ArtifactKind::Translations => &self.translations,
        }
    }
}

pub struct ArtifactProducer<'a> {
    config: &'a BuildConfig,
    source_dir: &'a Path,
}

impl<'a> ArtifactProducer<'a> {
    pub fn new(config: &'a BuildConfig, source_dir: &'a Path) -> Self {
        Self { config, source_dir }
    }

    /// Run every build command in order, then collect the outputs.
    /// The first failing command stops the build.
    pub async fn build(&self) -> Result<Artifacts, DeployError> {
        for line in &self.config.commands {
            info!("Build step: {}", line);
            run_command_line(line, Some(self.source_dir))
                .await
                .map_err(|e| {
                    error!("Build step '{}' failed", line);
                    DeployError::BuildFailure(e.to_string())
                })?;
        }
        self.collect()
    }

    /// Use outputs of an earlier build without running anything.
    pub fn collect(&self) -> Result<Artifacts, DeployError> {
        let artifacts = Artifacts {
            site: ArtifactBundle::new(ArtifactKind::Site, self.source_dir.join(&self.config.site_dir)),
            translations: ArtifactBundle::new(
                ArtifactKind::Translations,
                self.source_dir.join(&self.config.translations_dir),
            ),
        };
        for bundle in [&artifacts.site, &artifacts.translations] {
            bundle
                .ensure_present()
                .map_err(|e| DeployError::BuildFailure(e.to_string()))?;
            info!("Artifact '{}' at {}", bundle.kind, bundle.root.display());
        }
        Ok(artifacts)
    }
}
