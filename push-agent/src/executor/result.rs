//! Outcome of a push run.

use crate::diff::ChangeKind;
use crate::fs::walker::RelPath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Write};

/// Run-level state machine:
/// `Pending -> InProgress -> {Completed | PartiallyFailed | Aborted}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    InProgress,
    Completed,
    PartiallyFailed,
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::PartiallyFailed | RunStatus::Aborted
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStatus::Pending => "pending",
            RunStatus::InProgress => "in progress",
            RunStatus::Completed => "completed",
            RunStatus::PartiallyFailed => "partially failed",
            RunStatus::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Success,
    Failed,
    Skipped,
}

/// Whole-run precondition that failed before any entry was processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum AbortReason {
    CorruptManifest(String),
    TargetUnreachable(String),
    /// The target moved on since the manifest was generated
    StaleBase(String),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::CorruptManifest(detail) => write!(f, "corrupt manifest: {}", detail),
            AbortReason::TargetUnreachable(detail) => write!(f, "target unreachable: {}", detail),
            AbortReason::StaleBase(detail) => write!(f, "stale manifest: {}", detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOutcome {
    pub kind: ChangeKind,
    pub status: EntryStatus,
    /// Target operations attempted (0 when the entry never reached the target)
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EntryOutcome {
    pub fn success(kind: ChangeKind, attempts: u32) -> Self {
        Self {
            kind,
            status: EntryStatus::Success,
            attempts,
            error: None,
        }
    }

    pub fn failed(kind: ChangeKind, attempts: u32, error: impl Into<String>) -> Self {
        Self {
            kind,
            status: EntryStatus::Failed,
            attempts,
            error: Some(error.into()),
        }
    }

    pub fn skipped(kind: ChangeKind, attempts: u32, reason: impl Into<String>) -> Self {
        Self {
            kind,
            status: EntryStatus::Skipped,
            attempts,
            error: Some(reason.into()),
        }
    }
}

/// Per-entry and overall result of one push run.
///
/// Only the executor mutates a `PushResult`; once it reaches a terminal
/// status further updates are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResult {
    push_id: String,
    target: String,
    status: RunStatus,
    cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    abort_reason: Option<AbortReason>,
    started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    finished_at: Option<DateTime<Utc>>,
    entries: BTreeMap<RelPath, EntryOutcome>,
}

impl PushResult {
    pub(crate) fn new(push_id: String, target: String) -> Self {
        Self {
            push_id,
            target,
            status: RunStatus::Pending,
            cancelled: false,
            abort_reason: None,
            started_at: Utc::now(),
            finished_at: None,
            entries: BTreeMap::new(),
        }
    }

    pub(crate) fn start(&mut self) {
        if self.status == RunStatus::Pending {
            self.status = RunStatus::InProgress;
        }
    }

    pub(crate) fn record(&mut self, path: RelPath, outcome: EntryOutcome) {
        if self.status == RunStatus::InProgress {
            self.entries.insert(path, outcome);
        }
    }

    pub(crate) fn abort(&mut self, reason: AbortReason) {
        if self.status.is_terminal() {
            return;
        }
        self.status = RunStatus::Aborted;
        self.abort_reason = Some(reason);
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn finish(&mut self, cancelled: bool) {
        if self.status != RunStatus::InProgress {
            return;
        }
        let all_succeeded = self
            .entries
            .values()
            .all(|outcome| outcome.status == EntryStatus::Success);

        self.status = if all_succeeded {
            RunStatus::Completed
        } else {
            RunStatus::PartiallyFailed
        };
        self.cancelled = cancelled;
        self.finished_at = Some(Utc::now());
    }

    pub fn push_id(&self) -> &str {
        &self.push_id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        self.abort_reason.as_ref()
    }

    pub fn entries(&self) -> &BTreeMap<RelPath, EntryOutcome> {
        &self.entries
    }

    pub fn get(&self, path: &str) -> Option<&EntryOutcome> {
        RelPath::parse(path).ok().and_then(|p| self.entries.get(&p))
    }

    pub fn count(&self, status: EntryStatus) -> usize {
        self.entries.values().filter(|o| o.status == status).count()
    }

    /// Paths with the given status, in path order.
    pub fn paths_with(&self, status: EntryStatus) -> Vec<&RelPath> {
        self.entries
            .iter()
            .filter(|(_, outcome)| outcome.status == status)
            .map(|(path, _)| path)
            .collect()
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Human-readable report naming every failed and skipped path.
    pub fn report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Push {} to {}: {}", self.push_id, self.target, self.status);

        if let Some(reason) = &self.abort_reason {
            let _ = writeln!(out, "  aborted: {}", reason);
            return out;
        }

        let _ = writeln!(
            out,
            "  {} succeeded, {} failed, {} skipped{}",
            self.count(EntryStatus::Success),
            self.count(EntryStatus::Failed),
            self.count(EntryStatus::Skipped),
            if self.cancelled { " (cancelled)" } else { "" }
        );

        for (path, outcome) in &self.entries {
            let label = match outcome.status {
                EntryStatus::Success => continue,
                EntryStatus::Failed => "FAILED ",
                EntryStatus::Skipped => "SKIPPED",
            };
            let _ = writeln!(
                out,
                "  {} {} {} after {} attempt(s): {}",
                label,
                outcome.kind,
                path,
                outcome.attempts,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(p: &str) -> RelPath {
        RelPath::parse(p).unwrap()
    }

    #[test]
    fn test_state_transitions() {
        let mut result = PushResult::new("id".to_string(), "mock".to_string());
        assert_eq!(result.status(), RunStatus::Pending);

        // Entries are only recorded while in progress
        result.record(path("a.js"), EntryOutcome::success(ChangeKind::Added, 1));
        assert!(result.entries().is_empty());

        result.start();
        result.record(path("a.js"), EntryOutcome::success(ChangeKind::Added, 1));
        result.finish(false);
        assert_eq!(result.status(), RunStatus::Completed);

        // Terminal states are frozen
        result.record(path("b.js"), EntryOutcome::failed(ChangeKind::Added, 1, "late"));
        result.abort(AbortReason::TargetUnreachable("late".to_string()));
        assert_eq!(result.status(), RunStatus::Completed);
        assert_eq!(result.entries().len(), 1);
    }

    #[test]
    fn test_report_lists_every_problem_path() {
        let mut result = PushResult::new("id".to_string(), "mock".to_string());
        result.start();
        result.record(path("index.ios.js"), EntryOutcome::success(ChangeKind::Modified, 1));
        result.record(
            path("landscape.png"),
            EntryOutcome::failed(ChangeKind::Added, 4, "rejected by target: 500"),
        );
        result.record(
            path("components/CardView.js"),
            EntryOutcome::skipped(ChangeKind::Added, 0, "cancelled"),
        );
        result.finish(true);

        assert_eq!(result.status(), RunStatus::PartiallyFailed);
        assert!(result.cancelled());
        assert_eq!(result.paths_with(EntryStatus::Failed), vec![&path("landscape.png")]);

        let report = result.report();
        assert!(report.contains("FAILED  added landscape.png after 4 attempt(s)"));
        assert!(report.contains("SKIPPED added components/CardView.js"));
        assert!(!report.contains("index.ios.js"));
    }

    #[test]
    fn test_aborted_report() {
        let mut result = PushResult::new("id".to_string(), "mock".to_string());
        result.abort(AbortReason::CorruptManifest("digest mismatch".to_string()));

        assert_eq!(result.status(), RunStatus::Aborted);
        assert!(result.report().contains("aborted: corrupt manifest: digest mismatch"));

        let json = result.to_json().unwrap();
        assert!(json.contains("\"status\": \"aborted\""));
        assert!(json.contains("\"reason\": \"corrupt_manifest\""));
    }
}
