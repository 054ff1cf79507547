use serde::Serialize;
use std::io::Write;

use linkguard::{DirectoryCall, MetricsSnapshot};

/// Emit one JSON line on stdout (flushed immediately for piped output).
pub fn emit<T: Serialize>(event: &T) {
    if let Ok(json) = serde_json::to_string(event) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = writeln!(lock, "{json}");
        let _ = lock.flush();
    }
}

// ── Replay events ───────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventOutcome<T: Serialize> {
    pub event: &'static str,
    pub line: usize,
    pub outcome: T,
}

impl<T: Serialize> EventOutcome<T> {
    pub fn new(line: usize, outcome: T) -> Self {
        Self {
            event: "outcome",
            line,
            outcome,
        }
    }
}

#[derive(Serialize)]
pub struct EventRejected {
    pub event: &'static str,
    pub line: usize,
    pub error: String,
}

impl EventRejected {
    pub fn new(line: usize, error: impl ToString) -> Self {
        Self {
            event: "rejected",
            line,
            error: error.to_string(),
        }
    }
}

// ── Summary ─────────────────────────────────────────────────────

/// Final report: everything the service asked of the chat network.
#[derive(Serialize)]
pub struct EventSummary {
    pub event: &'static str,
    pub elapsed_ms: u64,
    pub calls: Vec<DirectoryCall>,
    pub metrics: MetricsSnapshot,
}

impl EventSummary {
    pub fn new(elapsed_ms: u64, calls: Vec<DirectoryCall>, metrics: MetricsSnapshot) -> Self {
        Self {
            event: "summary",
            elapsed_ms,
            calls,
            metrics,
        }
    }
}
