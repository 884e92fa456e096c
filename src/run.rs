use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::pipeline::PipelineReport;

/// Represents the status of a deployment run
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

/// One deployment triggered through the webhook listener.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: String,
    pub trigger: String,
    pub prefixes: Vec<String>,
    pub commit_sha: Option<String>,
    pub status: RunStatus,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub report: Option<PipelineReport>,
    pub error: Option<String>,
}

impl RunRecord {
    /// Create a new run in Queued status
    pub fn new(trigger: String, prefixes: Vec<String>, commit_sha: Option<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            trigger,
            prefixes,
            commit_sha,
            status: RunStatus::Queued,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            report: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Record the pipeline's report; the run succeeds only if no branch failed.
    pub fn mark_finished(&mut self, report: PipelineReport) {
        self.completed_at = Some(Utc::now());
        if report.is_success() {
            self.status = RunStatus::Success;
        } else {
            self.status = RunStatus::Failed;
            self.error = Some(report.failures().join("; "));
        }
        self.report = Some(report);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = RunStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, RunStatus::Success | RunStatus::Failed)
    }
}

/// State change broadcast to `/stream/runs` subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct RunEvent {
    pub event_type: String,
    pub run_id: String,
    pub trigger: String,
    pub timestamp: String,
}

impl RunEvent {
    pub fn from_record(record: &RunRecord) -> Self {
        let event_type = match record.status {
            RunStatus::Queued => "created",
            other => other.as_str(),
        };
        Self {
            event_type: event_type.to_string(),
            run_id: record.id.clone(),
            trigger: record.trigger.clone(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// In-memory history of recent runs, oldest evicted first.
#[derive(Debug)]
pub struct RunStore {
    runs: VecDeque<RunRecord>,
    max_runs: usize,
}

impl RunStore {
    pub fn new(max_runs: usize) -> Self {
        Self {
            runs: VecDeque::new(),
            max_runs: max_runs.max(1),
        }
    }

    pub fn insert(&mut self, record: RunRecord) {
        while self.runs.len() >= self.max_runs {
            self.runs.pop_front();
        }
        self.runs.push_back(record);
    }

    pub fn get(&self, id: &str) -> Option<&RunRecord> {
        self.runs.iter().find(|r| r.id == id)
    }

    /// Apply `f` to the run with `id`, returning the updated copy.
    pub fn update<F>(&mut self, id: &str, f: F) -> Option<RunRecord>
    where
        F: FnOnce(&mut RunRecord),
    {
        let record = self.runs.iter_mut().find(|r| r.id == id)?;
        f(record);
        Some(record.clone())
    }

    pub fn current(&self) -> Option<&RunRecord> {
        self.runs.iter().rev().find(|r| r.status == RunStatus::Running)
    }

    pub fn queued_count(&self) -> usize {
        self.runs
            .iter()
            .filter(|r| r.status == RunStatus::Queued)
            .count()
    }

    /// Most recent first.
    pub fn recent(&self, limit: usize) -> Vec<RunRecord> {
        self.runs.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
