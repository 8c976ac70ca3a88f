//! Per-operation outcomes and the stage/run reports they roll up into.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::pipeline::Stage;

/// Result of one sub-operation (one asset, one part, one pruning rule).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "camelCase")]
pub enum Outcome {
    Applied,
    Skipped(String),
    Failed(String),
}

impl Outcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Applied => f.write_str("applied"),
            Outcome::Skipped(reason) => write!(f, "skipped ({reason})"),
            Outcome::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    pub operation: String,
    pub target: String,
    pub outcome: Outcome,
}

impl OperationRecord {
    pub fn new(operation: impl Into<String>, target: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            operation: operation.into(),
            target: target.into(),
            outcome,
        }
    }

    pub fn applied(operation: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(operation, target, Outcome::Applied)
    }

    pub fn skipped(
        operation: impl Into<String>,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(operation, target, Outcome::Skipped(reason.into()))
    }

    pub fn failed(
        operation: impl Into<String>,
        target: impl Into<String>,
        reason: impl fmt::Display,
    ) -> Self {
        Self::new(operation, target, Outcome::Failed(reason.to_string()))
    }
}

impl fmt::Display for OperationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.operation, self.target, self.outcome)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    pub stage: Stage,
    pub input: PathBuf,
    pub output: PathBuf,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub backup: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    /// One-line result, e.g. `total=2, kept=1, removed=1`.
    pub summary: String,
    pub records: Vec<OperationRecord>,
}

impl StageReport {
    pub fn saved_bytes(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub input: PathBuf,
    pub final_path: PathBuf,
    pub original_bytes: u64,
    pub final_bytes: u64,
    pub stages: Vec<StageReport>,
}

impl RunReport {
    pub fn saved_bytes(&self) -> u64 {
        self.original_bytes.saturating_sub(self.final_bytes)
    }

    pub fn saved_percent(&self) -> f64 {
        if self.original_bytes == 0 {
            return 0.0;
        }
        self.saved_bytes() as f64 * 100.0 / self.original_bytes as f64
    }

    pub fn failures(&self) -> impl Iterator<Item = &OperationRecord> {
        self.stages
            .iter()
            .flat_map(|stage| stage.records.iter())
            .filter(|record| record.outcome.is_failed())
    }
}

/// `1536` → `1.5KB`, the way sizes show up in logs.
pub fn human_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if value < 1024.0 {
            return format!("{value:.1}{unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1}TB")
}
