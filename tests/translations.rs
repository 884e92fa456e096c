use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use docs_deploy::artifact::{ArtifactProducer, Artifacts};
use docs_deploy::error::PublishError;
use docs_deploy::event::{RunContext, TriggerEvent};
use docs_deploy::pipeline::{BranchOutcome, fan_out};
use docs_deploy::publish::{SKIP_CI_MARKER, SitePublisher, TranslationPublisher, TranslationRepo};
use docs_deploy::resolve::DeploymentPlan;
use docs_deploy::sync::{ExcludeRules, LocalMirror};
use docs_deploy::{DeployConfig, parse_config};
use tempfile::TempDir;

#[derive(Default)]
struct Recorded {
    staged: Vec<String>,
    commits: Vec<String>,
    pushes: Vec<String>,
}

/// Fake translation repository: the "clone" holds a stale translation and
/// a README, `add_all` records every file in the working tree.
struct RecordingRepo {
    recorded: Arc<Mutex<Recorded>>,
    changed: bool,
    reject_push: bool,
}

#[async_trait]
impl TranslationRepo for RecordingRepo {
    async fn clone_repo(&self, _url: &str, _branch: &str, dest: &Path) -> Result<(), PublishError> {
        write(dest, "README.md", "translations");
        write(dest, "docs/locale/en/stale.po", "old");
        Ok(())
    }

    async fn add_all(&self, repo: &Path) -> Result<(), PublishError> {
        let mut files = Vec::new();
        collect(repo, repo, &mut files);
        files.sort();
        self.recorded.lock().unwrap().staged = files;
        Ok(())
    }

    async fn has_staged_changes(&self, _repo: &Path) -> Result<bool, PublishError> {
        Ok(self.changed)
    }

    async fn commit(&self, _repo: &Path, message: &str) -> Result<(), PublishError> {
        self.recorded.lock().unwrap().commits.push(message.to_string());
        Ok(())
    }

    async fn push(&self, _repo: &Path, branch: &str) -> Result<(), PublishError> {
        if self.reject_push {
            return Err(PublishError::Io {
                context: "push".to_string(),
                source: std::io::Error::other("rejected: non-fast-forward"),
            });
        }
        self.recorded.lock().unwrap().pushes.push(branch.to_string());
        Ok(())
    }
}

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn collect(root: &Path, dir: &Path, files: &mut Vec<String>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect(root, &path, files);
        } else {
            files.push(path.strip_prefix(root).unwrap().display().to_string());
        }
    }
}

fn source_tree() -> TempDir {
    let source = TempDir::new().unwrap();
    write(source.path(), "html/index.html", "site");
    write(source.path(), "locale/en/LC_MESSAGES/index.po", "msgid \"index\"");
    write(source.path(), "locale/en/stubs/qiskit.circuit.po", "stub");
    write(source.path(), "locale/en/apidocs/qiskit.po", "api");
    write(source.path(), "locale/en/apidoc/transpiler.po", "api");
    write(source.path(), "setup.py", "setup()");
    write(source.path(), "constraints.txt", "numpy<3");
    source
}

fn config(source: &Path) -> DeployConfig {
    parse_config(&format!(
        r#"
[source]
repository = "Qiskit/qiskit"
repo_path = "{source}"

[build]
site_dir = "html"
translations_dir = "locale/en"

[site]
remote = "file:///unused"

[translations]
repo_url = "git@github.com:Qiskit/qiskit-translations.git"
branch = "main"
target_dir = "docs/locale/en"
ignore = ["stubs", "apidocs", "apidoc"]
reproducibility_files = ["setup.py", "requirements-dev.txt", "constraints.txt"]
"#,
        source = source.display()
    ))
    .unwrap()
}

fn setup(changed: bool, reject_push: bool) -> (TempDir, Artifacts, TranslationPublisher, Arc<Mutex<Recorded>>) {
    let source = source_tree();
    let config = config(source.path());
    let artifacts = ArtifactProducer::new(&config.build, source.path())
        .collect()
        .unwrap();
    let recorded = Arc::new(Mutex::new(Recorded::default()));
    let repo = RecordingRepo {
        recorded: Arc::clone(&recorded),
        changed,
        reject_push,
    };
    let publisher = TranslationPublisher::new(
        Box::new(repo),
        config.translations.clone().unwrap(),
        source.path(),
    );
    (source, artifacts, publisher, recorded)
}

fn translatables_only() -> DeploymentPlan {
    DeploymentPlan::new(
        TriggerEvent::ManualDispatch {
            prefix: Some("dev".to_string()),
            deploy_enabled: false,
            translatables_enabled: true,
        },
        Some("1.2.3".to_string()),
        "main",
    )
    .unwrap()
}

fn context() -> RunContext {
    RunContext {
        repository: "Qiskit/qiskit".to_string(),
        commit_sha: "0123abcd".to_string(),
        run_url: Some("https://github.com/Qiskit/qiskit/actions/runs/42".to_string()),
    }
}

#[tokio::test]
async fn ignored_directories_never_reach_the_repository() {
    let (source, artifacts, publisher, recorded) = setup(true, false);

    let (site, translations) =
        fan_out(&translatables_only(), &artifacts, &context(), None, Some(Ok(publisher))).await;

    assert!(matches!(site, BranchOutcome::Skipped { .. }));
    match translations {
        BranchOutcome::Published(report) => {
            assert!(report.committed);
            assert_eq!(report.files, 1);
        }
        other => panic!("translations not published: {other:?}"),
    }

    let recorded = recorded.lock().unwrap();
    assert_eq!(
        recorded.staged,
        vec![
            "README.md",
            "constraints.txt",
            "docs/locale/en/LC_MESSAGES/index.po",
            "setup.py",
        ]
    );
    assert!(
        recorded
            .staged
            .iter()
            .all(|f| !f.contains("stubs") && !f.contains("apidoc"))
    );
    assert_eq!(recorded.pushes, vec!["main"]);

    let message = &recorded.commits[0];
    assert!(message.contains("Qiskit/qiskit"));
    assert!(message.contains(SKIP_CI_MARKER));
    assert!(message.contains("0123abcd"));
    assert!(message.contains("actions/runs/42"));

    // The shared bundle is left as built.
    assert!(source.path().join("locale/en/stubs/qiskit.circuit.po").exists());
}

#[tokio::test]
async fn unchanged_strings_make_no_commit() {
    let (_source, artifacts, publisher, recorded) = setup(false, false);

    let (_, translations) =
        fan_out(&translatables_only(), &artifacts, &context(), None, Some(Ok(publisher))).await;

    match translations {
        BranchOutcome::Published(report) => assert!(!report.committed),
        other => panic!("unexpected outcome: {other:?}"),
    }
    let recorded = recorded.lock().unwrap();
    assert!(recorded.commits.is_empty());
    assert!(recorded.pushes.is_empty());
}

#[tokio::test]
async fn rejected_push_fails_only_the_translation_branch() {
    let (_source, artifacts, rejecting, recorded) = setup(true, true);
    let site_root = TempDir::new().unwrap();
    let site = SitePublisher::new(
        Box::new(LocalMirror::new(site_root.path())),
        "documentation",
        ExcludeRules::empty(),
    );
    let plan = DeploymentPlan::new(
        TriggerEvent::tag_push("1.2.3"),
        Some("1.2.3".to_string()),
        "main",
    )
    .unwrap();

    let (site, translations) =
        fan_out(&plan, &artifacts, &context(), Some(Ok(site)), Some(Ok(rejecting))).await;

    assert!(site.is_published());
    assert!(translations.is_failed());
    assert!(site_root.path().join("documentation/index.html").exists());
    assert!(site_root.path().join("documentation/stable/1.2/index.html").exists());
    assert_eq!(recorded.lock().unwrap().commits.len(), 1);
}
