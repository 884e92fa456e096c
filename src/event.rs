//! Trigger events and where they come from.
//!
//! A run is triggered by a push (branch or tag), a manual dispatch carrying
//! deployment parameters, or anything else the CI platform delivers. Events
//! are read from the GitHub Actions environment, from a webhook payload, or
//! built directly from command-line flags.

use std::fmt;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::error::DeployError;

pub const PUSH_EVENT: &str = "push";
pub const MANUAL_DISPATCH_EVENT: &str = "workflow_dispatch";

/// The kind of git ref a push targeted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Branch,
    Tag,
    Other(String),
}

impl RefKind {
    /// Map a ref-type string (`branch`, `tag`, ...) to a `RefKind`.
    pub fn from_ref_type(ref_type: &str) -> Self {
        match ref_type {
            "branch" => RefKind::Branch,
            "tag" => RefKind::Tag,
            other => RefKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefKind::Branch => f.write_str("branch"),
            RefKind::Tag => f.write_str("tag"),
            RefKind::Other(kind) => f.write_str(kind),
        }
    }
}

/// What started this run. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TriggerEvent {
    Push {
        ref_kind: RefKind,
        ref_name: String,
    },
    ManualDispatch {
        prefix: Option<String>,
        deploy_enabled: bool,
        translatables_enabled: bool,
    },
    Unsupported {
        name: String,
    },
}

impl TriggerEvent {
    pub fn branch_push(name: impl Into<String>) -> Self {
        TriggerEvent::Push {
            ref_kind: RefKind::Branch,
            ref_name: name.into(),
        }
    }

    pub fn tag_push(name: impl Into<String>) -> Self {
        TriggerEvent::Push {
            ref_kind: RefKind::Tag,
            ref_name: name.into(),
        }
    }

    /// Build an event from the GitHub webhook event name and JSON payload.
    pub fn from_webhook(event_name: &str, payload: &Value) -> Result<Self, DeployError> {
        match event_name {
            PUSH_EVENT => {
                let full_ref = payload
                    .get("ref")
                    .and_then(Value::as_str)
                    .ok_or_else(|| DeployError::EventError("push payload has no ref".into()))?;
                let (ref_kind, ref_name) = parse_full_ref(full_ref);
                Ok(TriggerEvent::Push { ref_kind, ref_name })
            }
            MANUAL_DISPATCH_EVENT => manual_dispatch_from_inputs(payload.get("inputs")),
            other => Ok(TriggerEvent::Unsupported {
                name: other.to_string(),
            }),
        }
    }

    /// Build an event from the GitHub Actions runner environment.
    ///
    /// `lookup` is usually `|k| std::env::var(k).ok()`; the event payload
    /// (needed for dispatch inputs) is read from `GITHUB_EVENT_PATH`.
    pub fn from_github_env<F>(lookup: F) -> Result<Self, DeployError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let event_name = lookup("GITHUB_EVENT_NAME")
            .ok_or_else(|| DeployError::EventError("GITHUB_EVENT_NAME is not set".into()))?;

        match event_name.as_str() {
            PUSH_EVENT => {
                let ref_type = lookup("GITHUB_REF_TYPE").unwrap_or_default();
                let ref_name = lookup("GITHUB_REF_NAME").unwrap_or_default();
                Ok(TriggerEvent::Push {
                    ref_kind: RefKind::from_ref_type(&ref_type),
                    ref_name,
                })
            }
            MANUAL_DISPATCH_EVENT => {
                let payload = match lookup("GITHUB_EVENT_PATH") {
                    Some(path) => read_event_payload(Path::new(&path))?,
                    None => Value::Null,
                };
                manual_dispatch_from_inputs(payload.get("inputs"))
            }
            other => Ok(TriggerEvent::Unsupported {
                name: other.to_string(),
            }),
        }
    }

    /// Short human-readable label used in logs and run records.
    pub fn describe(&self) -> String {
        match self {
            TriggerEvent::Push { ref_kind, ref_name } => format!("push {ref_kind} '{ref_name}'"),
            TriggerEvent::ManualDispatch {
                prefix,
                deploy_enabled,
                translatables_enabled,
            } => format!(
                "manual dispatch (prefix: {:?}, deploy: {}, translatables: {})",
                prefix.as_deref().unwrap_or(""),
                deploy_enabled,
                translatables_enabled
            ),
            TriggerEvent::Unsupported { name } => format!("unsupported event '{name}'"),
        }
    }
}

/// Split `refs/heads/main` / `refs/tags/1.2.3` into kind and short name.
pub fn parse_full_ref(full_ref: &str) -> (RefKind, String) {
    if let Some(branch) = full_ref.strip_prefix("refs/heads/") {
        (RefKind::Branch, branch.to_string())
    } else if let Some(tag) = full_ref.strip_prefix("refs/tags/") {
        (RefKind::Tag, tag.to_string())
    } else if let Some(rest) = full_ref.strip_prefix("refs/") {
        match rest.split_once('/') {
            Some((kind, name)) => (RefKind::Other(kind.to_string()), name.to_string()),
            None => (RefKind::Other(rest.to_string()), String::new()),
        }
    } else {
        (RefKind::Other("unknown".to_string()), full_ref.to_string())
    }
}

fn manual_dispatch_from_inputs(inputs: Option<&Value>) -> Result<TriggerEvent, DeployError> {
    let input = |name: &str| inputs.and_then(|i| i.get(name));

    let prefix = match input("deploy_prefix") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            return Err(DeployError::EventError(format!(
                "deploy_prefix must be a string, got {other}"
            )));
        }
    };

    Ok(TriggerEvent::ManualDispatch {
        prefix,
        deploy_enabled: input_flag("do_deployment", input("do_deployment"))?,
        translatables_enabled: input_flag("do_translatables", input("do_translatables"))?,
    })
}

/// Dispatch inputs arrive as JSON booleans or as the strings "true"/"false".
fn input_flag(name: &str, value: Option<&Value>) -> Result<bool, DeployError> {
    match value {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" | "" => Ok(false),
            other => Err(DeployError::EventError(format!(
                "input {name} must be true or false, got '{other}'"
            ))),
        },
        Some(other) => Err(DeployError::EventError(format!(
            "input {name} must be a boolean, got {other}"
        ))),
    }
}

fn read_event_payload(path: &Path) -> Result<Value, DeployError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        DeployError::EventError(format!("Failed to read event payload '{}': {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        DeployError::EventError(format!("Failed to parse event payload '{}': {}", path.display(), e))
    })
}

/// Provenance of the run, embedded in the translation commit message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunContext {
    pub repository: String,
    pub commit_sha: String,
    pub run_url: Option<String>,
}

impl RunContext {
    pub fn from_github_env<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let repository = lookup("GITHUB_REPOSITORY").unwrap_or_default();
        let run_url = match (lookup("GITHUB_SERVER_URL"), lookup("GITHUB_RUN_ID")) {
            (Some(server), Some(run_id)) if !repository.is_empty() => {
                Some(format!("{server}/{repository}/actions/runs/{run_id}"))
            }
            _ => None,
        };
        Self {
            repository,
            commit_sha: lookup("GITHUB_SHA").unwrap_or_default(),
            run_url,
        }
    }

    /// Provenance from a webhook push payload (`repository.full_name`, `after`).
    pub fn from_webhook(payload: &Value) -> Self {
        let repository = payload
            .get("repository")
            .and_then(|r| r.get("full_name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let commit_sha = payload
            .get("after")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Self {
            repository,
            commit_sha,
            run_url: None,
        }
    }
}
