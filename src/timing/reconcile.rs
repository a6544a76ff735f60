//! Cycle reconciliation: the central repair algorithm.
//!
//! A single forward sweep over the classified sequence maintains one
//! trusted anchor plus a pending buffer of consecutive SUSPECT/CORRUPT
//! records awaiting resolution. A later VALID record closes the buffer:
//! if the elapsed time between the two anchors uniquely determines the
//! frame count, the buffered records are interpolated; otherwise they are
//! rejected rather than guessed. Spans with no closing anchor in reach
//! are extrapolated from the last anchor at nominal cadence.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::RunContext;
use crate::timing::classify::{ClassifiedRecord, RecordStatus};

/// How a reconciled record's time was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    /// Taken directly from a VALID record.
    Observed,
    /// Linearly distributed between two anchors bounding a bad span.
    Interpolated,
    /// Projected forward from the last anchor at nominal cadence.
    Extrapolated,
}

/// Final per-frame output of the reconciliation sweep.
///
/// For accepted records the cycle numbers are strictly increasing, the
/// UTC times non-decreasing, and `utc_time` is always present. Rejected
/// records keep their raw derived time when one existed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledRecord {
    pub frame_number: u32,
    pub cycle_number: i64,
    pub utc_time: Option<DateTime<Utc>>,
    /// Meaningful only when `accepted`: rejected records carry the
    /// `Observed` placeholder whatever their classification was.
    pub origin: Origin,
    pub accepted: bool,
}

/// An inclusive range of frame numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRange {
    pub start: u32,
    pub end: u32,
}

impl FrameRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Number of frames covered (the range is inclusive).
    pub fn frame_count(&self) -> usize {
        (self.end - self.start + 1) as usize
    }
}

impl fmt::Display for FrameRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "frame {}", self.start)
        } else {
            write!(f, "frames {}-{}", self.start, self.end)
        }
    }
}

/// A cycle-number advance over a rejected span that disagrees with the
/// frame spacing (the hardware skipped cycles).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleJump {
    /// Frame at which the jump was applied (the closing anchor).
    pub frame_number: u32,
    /// Advance implied by frame spacing.
    pub expected_cycles: i64,
    /// Advance implied by elapsed-time evidence.
    pub actual_cycles: i64,
}

/// Per-run statistics accumulated by the sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Total number of frames in the run.
    pub total: usize,
    pub observed: usize,
    pub interpolated: usize,
    pub extrapolated: usize,
    pub rejected: usize,
    /// Frame ranges of spans that could not be reconciled.
    pub rejected_spans: Vec<FrameRange>,
    /// Frame ranges filled in at nominal cadence with no closing anchor.
    pub extrapolated_spans: Vec<FrameRange>,
    /// Cycle-number jumps applied across rejected spans.
    pub cycle_jumps: Vec<CycleJump>,
    /// The run began with records that could never be anchored.
    pub failed_at_start: bool,
    /// The run ended with extrapolated trailing records.
    pub unresolved_tail: bool,
}

impl RunSummary {
    fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Number of records accepted with a reconstructed timestamp.
    pub fn accepted(&self) -> usize {
        self.observed + self.interpolated + self.extrapolated
    }

    /// Whether the run produced any usable timestamps at all.
    pub fn has_usable_timestamps(&self) -> bool {
        self.accepted() > 0
    }
}

/// Fatal sequencing violation at the input boundary.
///
/// The reader guarantees frames arrive in order with contiguous frame
/// numbers; anything else means the stream itself is broken and the whole
/// run is abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceError {
    /// A frame number did not increase.
    OutOfOrder { previous: u32, current: u32 },
    /// Frame numbers skipped ahead.
    Gap { previous: u32, current: u32 },
}

impl fmt::Display for SequenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceError::OutOfOrder { previous, current } => {
                write!(f, "frames out of order: {} after {}", current, previous)
            }
            SequenceError::Gap { previous, current } => {
                write!(f, "gap in frame numbers: {} after {}", current, previous)
            }
        }
    }
}

impl std::error::Error for SequenceError {}

/// Walks the classified sequence and produces the reconciled output.
///
/// The only fatal outcome is a `SequenceError`; every timing problem
/// degrades into the `RunSummary` instead.
pub fn reconcile(
    records: &[ClassifiedRecord],
    ctx: &RunContext,
) -> Result<(Vec<ReconciledRecord>, RunSummary), SequenceError> {
    check_sequence(records)?;

    let mut sweep = Sweep::new(ctx, records.len());
    for record in records {
        sweep.push(record);
    }
    Ok(sweep.finish())
}

/// Rejects out-of-order delivery and frame-number gaps at the boundary.
fn check_sequence(records: &[ClassifiedRecord]) -> Result<(), SequenceError> {
    for pair in records.windows(2) {
        let previous = pair[0].frame_number();
        let current = pair[1].frame_number();
        if current <= previous {
            return Err(SequenceError::OutOfOrder { previous, current });
        }
        if current != previous + 1 {
            return Err(SequenceError::Gap { previous, current });
        }
    }
    Ok(())
}

/// The last accepted record, used as the trusted reference point.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    frame_number: u32,
    cycle_number: i64,
    utc: DateTime<Utc>,
}

/// State of the forward sweep.
struct Sweep<'a, 'c> {
    ctx: &'c RunContext,
    out: Vec<ReconciledRecord>,
    summary: RunSummary,
    anchor: Option<Anchor>,
    pending: Vec<&'a ClassifiedRecord>,
}

impl<'a, 'c> Sweep<'a, 'c> {
    fn new(ctx: &'c RunContext, total: usize) -> Self {
        Self {
            ctx,
            out: Vec::with_capacity(total),
            summary: RunSummary::new(total),
            anchor: None,
            pending: Vec::new(),
        }
    }

    fn push(&mut self, record: &'a ClassifiedRecord) {
        match (record.status, record.derived_utc) {
            (RecordStatus::Valid, Some(utc)) => self.on_valid(record, utc),
            _ => self.on_bad(record),
        }
    }

    fn on_valid(&mut self, record: &'a ClassifiedRecord, utc: DateTime<Utc>) {
        if self.pending.is_empty() {
            self.accept_observed(record, utc);
        } else if let Some(anchor) = self.anchor {
            self.close_span(anchor, record, utc);
        } else {
            // Anchorless prefix: a single closing anchor cannot distinguish
            // dropped cycles before lock from a clean prefix, so the prefix
            // is rejected rather than back-filled.
            self.reject_pending();
            self.summary.failed_at_start = true;
            self.accept_observed(record, utc);
        }
    }

    fn on_bad(&mut self, record: &'a ClassifiedRecord) {
        self.pending.push(record);
        if let Some(anchor) = self.anchor {
            if self.pending.len() > self.ctx.max_pending {
                // No closing anchor may ever arrive for a span this long;
                // stop waiting and fill it at nominal cadence.
                self.extrapolate_pending(anchor);
            }
        }
    }

    /// Accepts a VALID record directly against the current anchor.
    fn accept_observed(&mut self, record: &'a ClassifiedRecord, utc: DateTime<Utc>) {
        let frame = record.frame_number();
        let cycle = match self.anchor {
            Some(anchor) => {
                if utc < anchor.utc {
                    // Accepting would break UTC monotonicity; reject the
                    // record instead of inventing a time for it.
                    log::warn!("frame {}: timestamp steps backwards past anchor, rejecting", frame);
                    self.reject_single(record);
                    return;
                }
                anchor.cycle_number + (frame - anchor.frame_number) as i64
            }
            None => frame as i64,
        };

        self.out.push(ReconciledRecord {
            frame_number: frame,
            cycle_number: cycle,
            utc_time: Some(utc),
            origin: Origin::Observed,
            accepted: true,
        });
        self.summary.observed += 1;
        self.anchor = Some(Anchor {
            frame_number: frame,
            cycle_number: cycle,
            utc,
        });
    }

    /// Resolves the pending buffer against a closing VALID record.
    fn close_span(&mut self, anchor: Anchor, closing: &'a ClassifiedRecord, utc: DateTime<Utc>) {
        let frame = closing.frame_number();
        let span = (frame - anchor.frame_number) as i64;
        let elapsed_secs =
            (utc - anchor.utc).num_nanoseconds().unwrap_or(i64::MAX) as f64 / 1e9;

        if elapsed_secs <= 0.0 {
            // Time went backwards between the anchors; neither the buffer
            // nor the closing record can be trusted.
            let range = FrameRange::new(self.pending[0].frame_number(), frame);
            log::warn!("{}: closing timestamp precedes anchor, rejecting span", range);
            self.pending.push(closing);
            self.reject_pending();
            return;
        }

        let cycles_f = elapsed_secs / self.ctx.cadence_secs;
        let rounded = cycles_f.round() as i64;
        let frac_dev = (cycles_f - cycles_f.round()).abs();
        let unambiguous = frac_dev <= self.ctx.max_cycle_difference;

        if unambiguous && rounded == span {
            self.interpolate_pending(anchor, frame, utc, span);
        } else {
            let range = FrameRange::new(self.pending[0].frame_number(), frame - 1);
            if unambiguous {
                log::warn!(
                    "{}: elapsed time spans {} cycles over {} frames, rejecting span",
                    range,
                    rounded,
                    span
                );
            } else {
                log::warn!(
                    "{}: elapsed time is {:.3} cycles off any integer count, rejecting span",
                    range,
                    frac_dev
                );
            }
            self.reject_pending();

            // The closing record still becomes the new anchor. Elapsed-time
            // evidence drives the cycle advance when it rounds cleanly;
            // otherwise frame spacing is the only thing left to trust.
            let advance = if unambiguous { rounded.max(span) } else { span };
            if advance != span {
                self.summary.cycle_jumps.push(CycleJump {
                    frame_number: frame,
                    expected_cycles: span,
                    actual_cycles: advance,
                });
            }
            let cycle = anchor.cycle_number + advance;
            self.out.push(ReconciledRecord {
                frame_number: frame,
                cycle_number: cycle,
                utc_time: Some(utc),
                origin: Origin::Observed,
                accepted: true,
            });
            self.summary.observed += 1;
            self.anchor = Some(Anchor {
                frame_number: frame,
                cycle_number: cycle,
                utc,
            });
        }
    }

    /// Flushes the pending buffer as INTERPOLATED between the open anchor
    /// and the closing record, then accepts the closing record.
    fn interpolate_pending(
        &mut self,
        anchor: Anchor,
        closing_frame: u32,
        closing_utc: DateTime<Utc>,
        span: i64,
    ) {
        let total_nanos = (closing_utc - anchor.utc)
            .num_nanoseconds()
            .unwrap_or(i64::MAX) as f64;

        log::debug!(
            "frames {}-{}: interpolating {} records across {} cycles",
            self.pending[0].frame_number(),
            closing_frame - 1,
            self.pending.len(),
            span
        );

        for (i, record) in self.pending.iter().enumerate() {
            let step = (i + 1) as i64;
            let offset = TimeDelta::nanoseconds(
                (total_nanos * step as f64 / span as f64).round() as i64,
            );
            self.out.push(ReconciledRecord {
                frame_number: record.frame_number(),
                cycle_number: anchor.cycle_number + step,
                utc_time: Some(anchor.utc + offset),
                origin: Origin::Interpolated,
                accepted: true,
            });
            self.summary.interpolated += 1;
        }
        self.pending.clear();

        let cycle = anchor.cycle_number + span;
        self.out.push(ReconciledRecord {
            frame_number: closing_frame,
            cycle_number: cycle,
            utc_time: Some(closing_utc),
            origin: Origin::Observed,
            accepted: true,
        });
        self.summary.observed += 1;
        self.anchor = Some(Anchor {
            frame_number: closing_frame,
            cycle_number: cycle,
            utc: closing_utc,
        });
    }

    /// Flushes the pending buffer as EXTRAPOLATED from the open anchor at
    /// nominal cadence, advancing the anchor to the last projected record.
    fn extrapolate_pending(&mut self, anchor: Anchor) {
        let range = FrameRange::new(
            self.pending[0].frame_number(),
            self.pending[self.pending.len() - 1].frame_number(),
        );
        log::warn!("{}: no closing anchor, extrapolating at nominal cadence", range);

        let mut last = anchor;
        for record in self.pending.drain(..) {
            let frame = record.frame_number();
            let step = (frame - anchor.frame_number) as i64;
            let offset = TimeDelta::nanoseconds(
                (self.ctx.cadence_secs * step as f64 * 1e9).round() as i64,
            );
            let utc = anchor.utc + offset;
            let cycle = anchor.cycle_number + step;
            self.out.push(ReconciledRecord {
                frame_number: frame,
                cycle_number: cycle,
                utc_time: Some(utc),
                origin: Origin::Extrapolated,
                accepted: true,
            });
            self.summary.extrapolated += 1;
            last = Anchor {
                frame_number: frame,
                cycle_number: cycle,
                utc,
            };
        }
        self.summary.extrapolated_spans.push(range);
        self.anchor = Some(last);
    }

    /// Flushes the pending buffer as rejected.
    fn reject_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let range = FrameRange::new(
            self.pending[0].frame_number(),
            self.pending[self.pending.len() - 1].frame_number(),
        );

        let anchor = self.anchor;
        for record in self.pending.drain(..) {
            let frame = record.frame_number();
            let cycle = match anchor {
                Some(a) => a.cycle_number + (frame - a.frame_number) as i64,
                None => frame as i64,
            };
            self.out.push(ReconciledRecord {
                frame_number: frame,
                cycle_number: cycle,
                utc_time: record.derived_utc,
                origin: Origin::Observed,
                accepted: false,
            });
            self.summary.rejected += 1;
        }
        self.summary.rejected_spans.push(range);
    }

    /// Rejects one record outside the pending-buffer flow.
    fn reject_single(&mut self, record: &ClassifiedRecord) {
        let frame = record.frame_number();
        let cycle = match self.anchor {
            Some(a) => a.cycle_number + (frame - a.frame_number) as i64,
            None => frame as i64,
        };
        self.out.push(ReconciledRecord {
            frame_number: frame,
            cycle_number: cycle,
            utc_time: record.derived_utc,
            origin: Origin::Observed,
            accepted: false,
        });
        self.summary.rejected += 1;
        self.summary.rejected_spans.push(FrameRange::new(frame, frame));
    }

    /// Resolves whatever is still buffered at end of stream.
    fn finish(mut self) -> (Vec<ReconciledRecord>, RunSummary) {
        if !self.pending.is_empty() {
            if let Some(anchor) = self.anchor {
                self.extrapolate_pending(anchor);
                self.summary.unresolved_tail = true;
                log::warn!("run ends in an unresolved tail");
            } else {
                self.reject_pending();
                self.summary.failed_at_start = true;
                log::warn!("run produced no valid anchor at all");
            }
        }
        (self.out, self.summary)
    }
}
