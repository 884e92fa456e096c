use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ignore::WalkBuilder;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{ExcludeRules, ObjectStoreSync};
use crate::error::PublishError;

/// Mirror into a directory on the local filesystem.
///
/// Used for `file://` targets and as the reference implementation of the
/// mirror semantics: after `mirror`, every non-excluded file under the
/// destination is byte-identical to the source, non-excluded extras are
/// deleted and excluded destination paths are never touched.
#[derive(Debug, Clone)]
pub struct LocalMirror {
    root: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MirrorStats {
    pub copied: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl LocalMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mirror(
        &self,
        local_dir: &Path,
        remote_path: &str,
        excludes: &ExcludeRules,
    ) -> Result<MirrorStats, PublishError> {
        let dest = self.root.join(remote_path.trim_start_matches('/'));
        let wrap = |source: io::Error| PublishError::Mirror {
            remote: dest.display().to_string(),
            source,
        };

        if !local_dir.is_dir() {
            return Err(wrap(io::Error::new(
                io::ErrorKind::NotFound,
                format!("source directory {} does not exist", local_dir.display()),
            )));
        }
        fs::create_dir_all(&dest).map_err(wrap)?;

        let source_files = list_files(local_dir, excludes).map_err(wrap)?;
        let dest_files = list_files(&dest, excludes).map_err(wrap)?;
        let mut stats = MirrorStats::default();

        for (relative, path) in &dest_files {
            if !source_files.contains_key(relative) {
                debug!("Deleting {}", path.display());
                fs::remove_file(path).map_err(wrap)?;
                stats.deleted += 1;
            }
        }
        prune_empty_dirs(&dest, excludes).map_err(wrap)?;

        for (relative, source) in &source_files {
            let target = dest.join(relative);
            if target.is_file() && same_contents(source, &target).map_err(wrap)? {
                stats.unchanged += 1;
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(wrap)?;
            }
            fs::copy(source, &target).map_err(wrap)?;
            stats.copied += 1;
        }

        info!(
            "Mirrored {} -> {}: {} copied, {} deleted, {} unchanged",
            local_dir.display(),
            dest.display(),
            stats.copied,
            stats.deleted,
            stats.unchanged
        );
        Ok(stats)
    }
}

#[async_trait]
impl ObjectStoreSync for LocalMirror {
    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }

    async fn sync(
        &self,
        local_dir: &Path,
        remote_path: &str,
        excludes: &ExcludeRules,
    ) -> Result<(), PublishError> {
        let mirror = self.clone();
        let local_dir = local_dir.to_path_buf();
        let remote = remote_path.to_string();
        let excludes = excludes.clone();
        tokio::task::spawn_blocking(move || mirror.mirror(&local_dir, &remote, &excludes))
            .await
            .map_err(|e| PublishError::Mirror {
                remote: remote_path.to_string(),
                source: io::Error::other(e),
            })??;
        Ok(())
    }
}

/// Regular files under `root` keyed by relative path, skipping excluded
/// paths (and everything below excluded directories).
pub(crate) fn list_files(root: &Path, excludes: &ExcludeRules) -> io::Result<BTreeMap<PathBuf, PathBuf>> {
    let walk_root = root.to_path_buf();
    let filter = excludes.clone();
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            match entry.path().strip_prefix(&walk_root) {
                Ok(relative) => !filter.is_excluded(relative, is_dir),
                Err(_) => true,
            }
        })
        .sort_by_file_name(Ord::cmp)
        .build();

    let mut files = BTreeMap::new();
    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(io::Error::other)?
            .to_path_buf();
        files.insert(relative, entry.into_path());
    }
    Ok(files)
}

fn prune_empty_dirs(root: &Path, excludes: &ExcludeRules) -> io::Result<()> {
    let mut dirs = Vec::new();
    let walk_root = root.to_path_buf();
    let filter = excludes.clone();
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            match entry.path().strip_prefix(&walk_root) {
                Ok(relative) => !filter.is_excluded(relative, is_dir),
                Err(_) => true,
            }
        })
        .build();
    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        if entry.depth() > 0 && entry.file_type().is_some_and(|ft| ft.is_dir()) {
            dirs.push((entry.depth(), entry.into_path()));
        }
    }

    // Deepest first so parents emptied by their children go too.
    dirs.sort_by(|a, b| b.0.cmp(&a.0));
    for (_, dir) in dirs {
        if fs::read_dir(&dir)?.next().is_none() {
            fs::remove_dir(&dir)?;
        }
    }
    Ok(())
}

fn same_contents(a: &Path, b: &Path) -> io::Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }
    Ok(file_digest(a)? == file_digest(b)?)
}

fn file_digest(path: &Path) -> io::Result<Vec<u8>> {
    let bytes = fs::read(path)?;
    Ok(Sha256::digest(&bytes).to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn excludes(patterns: &[&str]) -> ExcludeRules {
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        ExcludeRules::new(&patterns).unwrap()
    }

    #[test]
    fn copies_new_files_and_removes_stale_ones() {
        let src = TempDir::new().unwrap();
        let remote = TempDir::new().unwrap();
        write(src.path(), "index.html", "new index");
        write(src.path(), "api/a.html", "a");
        write(remote.path(), "documentation/dev/old.html", "stale");
        write(remote.path(), "documentation/dev/gone/x.html", "stale");

        let mirror = LocalMirror::new(remote.path());
        let stats = mirror
            .mirror(src.path(), "documentation/dev", &ExcludeRules::empty())
            .unwrap();

        assert_eq!(stats.copied, 2);
        assert_eq!(stats.deleted, 2);
        let dest = remote.path().join("documentation/dev");
        assert_eq!(fs::read_to_string(dest.join("index.html")).unwrap(), "new index");
        assert!(!dest.join("old.html").exists());
        assert!(!dest.join("gone").exists());
    }

    #[test]
    fn excluded_destination_paths_survive_root_sync() {
        let src = TempDir::new().unwrap();
        let remote = TempDir::new().unwrap();
        write(src.path(), "index.html", "root");
        write(remote.path(), "documentation/dev/index.html", "dev");
        write(remote.path(), "documentation/stable/1.2/index.html", "stable");
        write(remote.path(), "documentation/obsolete.html", "old");

        let mirror = LocalMirror::new(remote.path());
        mirror
            .mirror(src.path(), "documentation/", &excludes(&["dev/**", "stable/**"]))
            .unwrap();

        let dest = remote.path().join("documentation");
        assert!(dest.join("dev/index.html").exists());
        assert!(dest.join("stable/1.2/index.html").exists());
        assert!(!dest.join("obsolete.html").exists());
        assert_eq!(fs::read_to_string(dest.join("index.html")).unwrap(), "root");
    }

    #[test]
    fn excluded_source_paths_are_not_uploaded() {
        let src = TempDir::new().unwrap();
        let remote = TempDir::new().unwrap();
        write(src.path(), "index.html", "root");
        write(src.path(), "locale/ja/index.html", "ja");

        LocalMirror::new(remote.path())
            .mirror(src.path(), "documentation/", &excludes(&["locale/**"]))
            .unwrap();

        assert!(!remote.path().join("documentation/locale").exists());
    }

    #[test]
    fn second_run_is_a_no_op() {
        let src = TempDir::new().unwrap();
        let remote = TempDir::new().unwrap();
        write(src.path(), "index.html", "root");
        write(src.path(), "a/b/c.html", "c");

        let mirror = LocalMirror::new(remote.path());
        let first = mirror.mirror(src.path(), "docs", &ExcludeRules::empty()).unwrap();
        let second = mirror.mirror(src.path(), "docs", &ExcludeRules::empty()).unwrap();

        assert_eq!(first.copied, 2);
        assert_eq!(
            second,
            MirrorStats {
                copied: 0,
                deleted: 0,
                unchanged: 2
            }
        );
    }

    #[test]
    fn changed_contents_are_rewritten() {
        let src = TempDir::new().unwrap();
        let remote = TempDir::new().unwrap();
        write(src.path(), "index.html", "v2");
        write(remote.path(), "docs/index.html", "v1");

        let stats = LocalMirror::new(remote.path())
            .mirror(src.path(), "docs", &ExcludeRules::empty())
            .unwrap();
        assert_eq!(stats.copied, 1);
        assert_eq!(
            fs::read_to_string(remote.path().join("docs/index.html")).unwrap(),
            "v2"
        );
    }

    #[test]
    fn missing_source_is_an_error() {
        let remote = TempDir::new().unwrap();
        let err = LocalMirror::new(remote.path())
            .mirror(&remote.path().join("nope"), "docs", &ExcludeRules::empty())
            .unwrap_err();
        assert!(matches!(err, PublishError::Mirror { .. }));
    }
}
