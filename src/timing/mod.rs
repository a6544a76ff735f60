//! Timing reconstruction engine.
//!
//! This module turns the raw per-frame timing blocks of an observing run
//! into a monotonic, gap-aware, correctly cycle-numbered timestamp for
//! every frame:
//! - decoding the fixed-layout blocks (`block`)
//! - classifying record quality (`classify`)
//! - reconciling cycle numbers across corrupt spans (`reconcile`)
//! - aggregating diagnostics (`report`)
//!
//! It also hosts the frame-by-frame comparison of two dumps of the same
//! run (`compare`), which bypasses reconstruction entirely.

mod block;
mod classify;
mod compare;
mod reconcile;
mod report;

pub use block::{
    decode, CalendarFields, DecodeError, FormatVersion, RawTimingBlock, TimestampRecord,
    BLOCK_MAGIC,
};
pub use classify::{classify, ClassifiedRecord, RecordStatus};
pub use compare::{compare_runs, FrameDifference, RunComparison};
pub use reconcile::{
    reconcile, CycleJump, FrameRange, Origin, ReconciledRecord, RunSummary, SequenceError,
};
pub use report::RunReport;

use crate::config::RunContext;

/// Everything produced by processing one run.
pub struct RunOutput {
    /// One reconciled record per input frame, in frame order.
    pub records: Vec<ReconciledRecord>,
    /// Statistics accumulated by the reconciliation sweep.
    pub summary: RunSummary,
    /// Renderable diagnostics derived from the two above.
    pub report: RunReport,
}

/// Runs the full pipeline over one run's timing blocks.
///
/// Blocks must be supplied in frame order; frame numbers are assigned
/// from the stream position. A block that fails to decode is replaced by
/// a corrupt placeholder and repaired (or rejected) downstream — only a
/// `SequenceError` aborts the run.
pub fn process_run(blocks: &[RawTimingBlock], ctx: &RunContext) -> Result<RunOutput, SequenceError> {
    let mut classified = Vec::with_capacity(blocks.len());
    let mut previous_valid: Option<ClassifiedRecord> = None;

    for (frame_number, raw) in blocks.iter().enumerate() {
        let frame_number = frame_number as u32;
        let record = match decode(raw, frame_number) {
            Ok(record) => record,
            Err(e) => {
                log::debug!("frame {}: {}, substituting corrupt placeholder", frame_number, e);
                TimestampRecord::corrupt_placeholder(frame_number, raw.format)
            }
        };

        let entry = classify(record, ctx, previous_valid.as_ref());
        if entry.is_valid() {
            previous_valid = Some(entry.clone());
        }
        classified.push(entry);
    }

    let (records, summary) = reconcile(&classified, ctx)?;
    log::info!(
        "run reconciled: {} frames, {} accepted, {} rejected",
        summary.total,
        summary.accepted(),
        summary.rejected
    );

    let report = RunReport::new(&records, &summary);
    Ok(RunOutput {
        records,
        summary,
        report,
    })
}
