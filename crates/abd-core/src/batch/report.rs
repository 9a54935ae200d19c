//! Batch result record.
//!
//! Field names are a wire contract: the JSON is consumed by external CSV
//! tooling, so the serde renames here must not drift.

use serde::Serialize;

use crate::probe::ProbeSnapshot;

/// One per-URL observation, at the URL's original index.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PerFileRecord {
    pub url: String,
    /// Transfer seconds; -1 marks a failed URL.
    pub t: f64,
    pub bytes: u64,
    /// `"wifi"` or `"cell"` — the link active when the transfer completed.
    pub path: String,
    pub used_range: bool,
    pub retried: bool,
}

/// The concurrency schedule the batch ran with.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct SchedulerInfo {
    pub before: usize,
    pub weak: usize,
    pub after: usize,
}

/// Full result of one batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// Batch completion time, epoch milliseconds.
    pub ts: i64,
    #[serde(rename = "baseUrl")]
    pub base_url: String,
    pub count: usize,
    pub mode: String,
    /// Real elapsed seconds including any link-change wait.
    #[serde(rename = "wallTime")]
    pub wall_time: f64,
    #[serde(rename = "pausedMs")]
    pub paused_ms: u64,
    /// Wall time minus migration pause: the figure of merit.
    #[serde(rename = "totalTime")]
    pub total_time: f64,
    #[serde(rename = "totalBytes")]
    pub total_bytes: u64,
    #[serde(rename = "perFile")]
    pub per_file: Vec<PerFileRecord>,
    /// Sample index that triggered migration; -1 if it never fired.
    pub weak_detect_index: i64,
    /// Epoch ms of the migration trigger; 0 if it never fired.
    pub switch_trigger_ts: i64,
    pub scheduler: SchedulerInfo,
    pub probes: ProbeSnapshot,
}
