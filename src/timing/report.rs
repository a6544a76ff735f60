//! Run diagnostics reporting.
//!
//! Aggregates the reconciler's output into a `RunReport` and renders it
//! at the configured verbosity. Purely derived from the reconciled
//! sequence and summary; no decision-making happens here.

use serde::Serialize;

use crate::config::Verbosity;
use crate::timing::reconcile::{Origin, ReconciledRecord, RunSummary};

/// Aggregated per-run diagnostics.
///
/// Counts are recomputed from the reconciled sequence rather than copied,
/// so a report is always consistent with the records it describes; span
/// locations and flags come from the summary.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub total: usize,
    pub observed: usize,
    pub interpolated: usize,
    pub extrapolated: usize,
    pub rejected: usize,
    pub summary: RunSummary,
}

impl RunReport {
    /// Builds a report from the reconciler's output.
    pub fn new(records: &[ReconciledRecord], summary: &RunSummary) -> Self {
        let mut observed = 0;
        let mut interpolated = 0;
        let mut extrapolated = 0;
        let mut rejected = 0;

        for record in records {
            if !record.accepted {
                rejected += 1;
                continue;
            }
            match record.origin {
                Origin::Observed => observed += 1,
                Origin::Interpolated => interpolated += 1,
                Origin::Extrapolated => extrapolated += 1,
            }
        }

        Self {
            total: records.len(),
            observed,
            interpolated,
            extrapolated,
            rejected,
            summary: summary.clone(),
        }
    }

    /// Number of records that carry a usable reconstructed timestamp.
    #[allow(dead_code)]
    pub fn accepted(&self) -> usize {
        self.observed + self.interpolated + self.extrapolated
    }

    /// Renders the report at the given verbosity.
    pub fn render(&self, verbosity: Verbosity) -> String {
        match verbosity {
            Verbosity::Terse => self.render_terse(),
            Verbosity::Detailed => self.render_detailed(),
        }
    }

    /// One-line summary of counts plus degradation markers.
    fn render_terse(&self) -> String {
        let mut line = format!(
            "frames={} observed={} interpolated={} extrapolated={} rejected={}",
            self.total, self.observed, self.interpolated, self.extrapolated, self.rejected
        );
        if self.summary.failed_at_start {
            line.push_str(" failed-at-start");
        }
        if self.summary.unresolved_tail {
            line.push_str(" unresolved-tail");
        }
        line
    }

    /// Multi-line listing with the location of every degraded span.
    fn render_detailed(&self) -> String {
        let mut lines = vec![self.render_terse()];

        for span in &self.summary.rejected_spans {
            lines.push(format!(
                "  rejected: {} ({} record{}, no cadence-consistent bridge)",
                span,
                span.frame_count(),
                plural(span.frame_count())
            ));
        }
        for span in &self.summary.extrapolated_spans {
            lines.push(format!(
                "  extrapolated: {} ({} record{} at nominal cadence)",
                span,
                span.frame_count(),
                plural(span.frame_count())
            ));
        }
        for jump in &self.summary.cycle_jumps {
            lines.push(format!(
                "  cycle jump at frame {}: {} cycles over {} frames",
                jump.frame_number, jump.actual_cycles, jump.expected_cycles
            ));
        }
        if self.summary.failed_at_start {
            lines.push("  run failed at start: no anchor for leading records".to_string());
        }
        if self.summary.unresolved_tail {
            lines.push("  run ends in an unresolved tail".to_string());
        }

        lines.join("\n")
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}
