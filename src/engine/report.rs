//! Per-sku outcomes and the aggregated run report.
//!
//! The report is the contract of a run: one entry per scanned sku,
//! always sorted lexicographically by sku regardless of how execution
//! interleaved. Consumers (the CLI, tests, operators reading logs) can
//! rely on that ordering being stable between a sequential and a
//! parallel run over the same catalog.

use serde::Serialize;

/// Final outcome of one sku in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SkuOutcome {
    /// A new remote item was created and acknowledged.
    Created {
        /// Remote item identifier returned by the create.
        remote_id: u64,
    },
    /// An existing remote item was updated and acknowledged.
    Updated {
        /// Remote item identifier that was updated.
        remote_id: u64,
    },
    /// Manifest checksum matched the ledger; nothing was done.
    Unchanged,
    /// Dry run: no remote item exists, a real run would create one.
    WouldCreate,
    /// Dry run: a remote item exists, a real run would update it.
    WouldUpdate {
        /// Remote item identifier that would be updated.
        remote_id: u64,
    },
    /// The sku failed; `kind` is a stable machine-readable error class.
    Failed {
        /// Error class (e.g. `validation`, `exhausted`, `auth`).
        kind: String,
        /// Human-readable failure detail.
        message: String,
    },
    /// The sku was skipped this run (lock contention or shutdown);
    /// a later run will pick it up again.
    Skipped {
        /// Why the sku was skipped.
        reason: String,
    },
}

impl SkuOutcome {
    /// True for outcomes that make the whole run exit nonzero.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Short label used in log lines and the rendered report.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Updated { .. } => "updated",
            Self::Unchanged => "unchanged",
            Self::WouldCreate => "would-create",
            Self::WouldUpdate { .. } => "would-update",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// One line of the final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkuReport {
    /// The sku this entry describes.
    pub sku: String,
    /// What happened to it.
    #[serde(flatten)]
    pub outcome: SkuOutcome,
}

/// Aggregated counters over a run, for the completion log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Items created remotely.
    pub created: usize,
    /// Items updated remotely.
    pub updated: usize,
    /// Items skipped as unchanged.
    pub unchanged: usize,
    /// Dry-run creates.
    pub would_create: usize,
    /// Dry-run updates.
    pub would_update: usize,
    /// Items that failed.
    pub failed: usize,
    /// Items skipped (contention or shutdown).
    pub skipped: usize,
}

/// The deterministic result of one engine run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    entries: Vec<SkuReport>,
}

impl RunReport {
    /// Builds a report from per-sku entries, sorting them by sku.
    #[must_use]
    pub fn from_entries(mut entries: Vec<SkuReport>) -> Self {
        entries.sort_by(|a, b| a.sku.cmp(&b.sku));
        Self { entries }
    }

    /// The per-sku entries, in lexicographic sku order.
    #[must_use]
    pub fn entries(&self) -> &[SkuReport] {
        &self.entries
    }

    /// True when any sku ended failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(|e| e.outcome.is_failure())
    }

    /// Process exit code: 0 when every sku ended succeeded, unchanged,
    /// or skipped; 1 when any sku failed.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(self.has_failures())
    }

    /// Aggregated counters.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for entry in &self.entries {
            match &entry.outcome {
                SkuOutcome::Created { .. } => summary.created += 1,
                SkuOutcome::Updated { .. } => summary.updated += 1,
                SkuOutcome::Unchanged => summary.unchanged += 1,
                SkuOutcome::WouldCreate => summary.would_create += 1,
                SkuOutcome::WouldUpdate { .. } => summary.would_update += 1,
                SkuOutcome::Failed { .. } => summary.failed += 1,
                SkuOutcome::Skipped { .. } => summary.skipped += 1,
            }
        }
        summary
    }

    /// Renders the report as plain text, one line per sku.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.sku);
            out.push_str(": ");
            out.push_str(entry.outcome.label());
            match &entry.outcome {
                SkuOutcome::Created { remote_id }
                | SkuOutcome::Updated { remote_id }
                | SkuOutcome::WouldUpdate { remote_id } => {
                    out.push_str(&format!(" (remote id {remote_id})"));
                }
                SkuOutcome::Failed { kind, message } => {
                    out.push_str(&format!(" [{kind}] {message}"));
                }
                SkuOutcome::Skipped { reason } => {
                    out.push_str(&format!(" ({reason})"));
                }
                SkuOutcome::Unchanged | SkuOutcome::WouldCreate => {}
            }
            out.push('\n');
        }
        out
    }
}
