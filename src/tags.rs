//! Release tag parsing and latest-release computation.
//!
//! The latest release tag is recomputed from the repository's tag history on
//! every run and never cached.

use std::cmp::Ordering;
use std::path::Path;

use tracing::{debug, info};

use crate::command::run_command;
use crate::error::DeployError;

/// A strict `MAJOR.MINOR.PATCH` release version.
///
/// The original text of each component is kept so that prefixes derived
/// from a tag reproduce it byte for byte.
#[derive(Debug, Clone)]
pub struct ReleaseVersion<'a> {
    major: &'a str,
    minor: &'a str,
    patch: &'a str,
}

impl<'a> ReleaseVersion<'a> {
    /// Parse a tag name. Returns `None` for anything other than three
    /// dot-separated runs of ASCII digits (pre-releases included).
    pub fn parse(tag: &'a str) -> Option<Self> {
        let mut parts = tag.split('.');
        let major = parts.next()?;
        let minor = parts.next()?;
        let patch = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        if ![major, minor, patch].iter().all(|p| is_numeric(p)) {
            return None;
        }
        Some(Self {
            major,
            minor,
            patch,
        })
    }

    /// `MAJOR.MINOR`, e.g. `1.2` for `1.2.3`.
    pub fn minor_series(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }

    fn numeric_key(&self) -> [u128; 3] {
        [
            numeric_value(self.major),
            numeric_value(self.minor),
            numeric_value(self.patch),
        ]
    }
}

impl PartialEq for ReleaseVersion<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.numeric_key() == other.numeric_key()
    }
}

impl Eq for ReleaseVersion<'_> {}

impl Ord for ReleaseVersion<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.numeric_key().cmp(&other.numeric_key())
    }
}

impl PartialOrd for ReleaseVersion<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn is_numeric(part: &str) -> bool {
    !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())
}

// Components longer than u128 saturate; such tags do not occur in practice.
fn numeric_value(part: &str) -> u128 {
    part.parse().unwrap_or(u128::MAX)
}

/// Pick the highest strict release tag. Ties on numeric value (`1.2.3` vs
/// `01.2.3`) are broken by the tag text so the result is deterministic.
pub fn latest_release_tag<'a, I>(tags: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    tags.into_iter()
        .filter_map(|tag| ReleaseVersion::parse(tag).map(|v| (v, tag)))
        .max_by(|(va, ta), (vb, tb)| va.cmp(vb).then_with(|| ta.cmp(tb)))
        .map(|(_, tag)| tag.to_string())
}

/// List every tag of the repository at `repo_path`.
pub async fn list_tags(repo_path: &Path) -> Result<Vec<String>, DeployError> {
    let stdout = run_command("git", &["tag", "--list"], Some(repo_path), &[])
        .await
        .map_err(DeployError::TagHistory)?;
    Ok(stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

/// Compute the latest release tag from the full tag history of `repo_path`.
pub async fn compute_latest_tag(repo_path: &Path) -> Result<Option<String>, DeployError> {
    let tags = list_tags(repo_path).await?;
    debug!("Found {} tags in {}", tags.len(), repo_path.display());
    let latest = latest_release_tag(tags.iter().map(String::as_str));
    match &latest {
        Some(tag) => info!("Latest release tag: {}", tag),
        None => info!("No tag matches MAJOR.MINOR.PATCH; there is no latest release"),
    }
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strict_versions_only() {
        assert!(ReleaseVersion::parse("1.2.3").is_some());
        assert!(ReleaseVersion::parse("10.20.30").is_some());
        assert!(ReleaseVersion::parse("1.2").is_none());
        assert!(ReleaseVersion::parse("1.2.3.4").is_none());
        assert!(ReleaseVersion::parse("1.2.3rc1").is_none());
        assert!(ReleaseVersion::parse("v1.2.3").is_none());
        assert!(ReleaseVersion::parse("1..3").is_none());
        assert!(ReleaseVersion::parse("").is_none());
    }

    #[test]
    fn minor_series_keeps_original_text() {
        let v = ReleaseVersion::parse("1.2.3").unwrap();
        assert_eq!(v.minor_series(), "1.2");
        let v = ReleaseVersion::parse("0.45.0").unwrap();
        assert_eq!(v.minor_series(), "0.45");
    }

    #[test]
    fn latest_uses_numeric_not_lexicographic_order() {
        let tags = ["1.9.0", "1.10.0", "1.2.3"];
        assert_eq!(latest_release_tag(tags), Some("1.10.0".to_string()));
    }

    #[test]
    fn prereleases_and_junk_are_ignored() {
        let tags = ["0.9.0", "1.0.0rc1", "1.0.0-beta", "nightly", "2.0"];
        assert_eq!(latest_release_tag(tags), Some("0.9.0".to_string()));
    }

    #[test]
    fn leading_zeros_tie_is_broken_by_text() {
        assert_eq!(
            ReleaseVersion::parse("01.2.3"),
            ReleaseVersion::parse("1.2.3")
        );
        assert_eq!(
            latest_release_tag(["1.2.3", "01.2.3"]),
            Some("1.2.3".to_string())
        );
    }

    #[test]
    fn no_matching_tags_yields_none() {
        let tags = ["v1.0.0", "1.0.0rc1"];
        assert_eq!(latest_release_tag(tags), None);
        assert_eq!(latest_release_tag(Vec::<&str>::new()), None);
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .args(["-c", "user.name=Docs Bot", "-c", "user.email=bot@example.com"])
            .args(["-c", "commit.gpgsign=false", "-c", "tag.gpgsign=false"])
            .args(args)
            .current_dir(dir)
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    fn repo_with_tags(tags: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::TempDir::new().unwrap();
        git(dir.path(), &["init", "-q"]);
        git(dir.path(), &["commit", "-q", "--allow-empty", "-m", "initial"]);
        for tag in tags {
            git(dir.path(), &["tag", *tag]);
        }
        dir
    }

    #[tokio::test]
    async fn lists_tags_from_a_repository() {
        let repo = repo_with_tags(&["1.2.0", "nightly"]);
        let mut tags = list_tags(repo.path()).await.unwrap();
        tags.sort();
        assert_eq!(tags, vec!["1.2.0", "nightly"]);
    }

    #[tokio::test]
    async fn latest_tag_of_a_repository_is_numeric_max() {
        let repo = repo_with_tags(&["1.2.0", "1.10.0", "1.9.3", "v2.0.0", "2.0.0rc1"]);
        assert_eq!(
            compute_latest_tag(repo.path()).await.unwrap(),
            Some("1.10.0".to_string())
        );
    }

    #[tokio::test]
    async fn repository_without_release_tags_has_no_latest() {
        let repo = repo_with_tags(&["v1.0.0", "nightly"]);
        assert_eq!(compute_latest_tag(repo.path()).await.unwrap(), None);
        let untagged = repo_with_tags(&[]);
        assert_eq!(compute_latest_tag(untagged.path()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_repository_is_a_tag_history_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = compute_latest_tag(&dir.path().join("absent")).await.unwrap_err();
        assert!(matches!(err, DeployError::TagHistory(_)));
    }
}
