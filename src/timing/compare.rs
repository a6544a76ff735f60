//! Run-file comparison.
//!
//! Compares the timing blocks of two dumps of the same run frame by
//! frame, the check used after re-dumping a run whose timing bytes were
//! manipulated on disk. Blocks are compared raw; only differing blocks
//! are decoded so the report can show both derived timestamps.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::timing::block::{decode, RawTimingBlock};

/// One frame whose raw timing bytes differ between the two streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameDifference {
    pub frame_number: u32,
    /// Timestamp derived from the first stream, when its block decodes.
    pub left: Option<DateTime<Utc>>,
    /// Timestamp derived from the second stream, when its block decodes.
    pub right: Option<DateTime<Utc>>,
}

impl fmt::Display for FrameDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame {}: {} vs {}",
            self.frame_number,
            render_time(self.left),
            render_time(self.right)
        )
    }
}

fn render_time(time: Option<DateTime<Utc>>) -> String {
    match time {
        Some(utc) => utc.to_rfc3339(),
        None => "undecodable".to_string(),
    }
}

/// Result of comparing two block streams of the same run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunComparison {
    /// Frames whose raw bytes differ, in frame order.
    pub differing: Vec<FrameDifference>,
    /// Number of frames present in both streams.
    pub frames_compared: usize,
    /// Block counts of the two streams when they disagree.
    pub length_mismatch: Option<(usize, usize)>,
}

impl RunComparison {
    pub fn difference_count(&self) -> usize {
        self.differing.len()
    }

    pub fn is_identical(&self) -> bool {
        self.differing.is_empty() && self.length_mismatch.is_none()
    }

    /// Per-difference listing with a closing count line.
    pub fn render(&self) -> String {
        let mut lines: Vec<String> = self.differing.iter().map(|d| d.to_string()).collect();
        if let Some((left, right)) = self.length_mismatch {
            lines.push(format!("block count differs: {} vs {} frames", left, right));
        }
        let count = self.difference_count();
        lines.push(format!(
            "{} timestamp difference{} in {} frames",
            count,
            if count == 1 { "" } else { "s" },
            self.frames_compared
        ));
        lines.join("\n")
    }
}

/// Compares two block streams frame by frame.
///
/// Frames whose raw bytes match are skipped without decoding. A differing
/// frame is decoded on both sides so the report can show the two derived
/// timestamps; a block that fails to decode or carries an illegal
/// calendar shows as undecodable. Streams of unequal length are compared
/// over their common prefix and the mismatch is recorded.
pub fn compare_runs(left: &[RawTimingBlock], right: &[RawTimingBlock]) -> RunComparison {
    let mut differing = Vec::new();

    for (frame_number, (l, r)) in left.iter().zip(right.iter()).enumerate() {
        if l.bytes == r.bytes {
            continue;
        }
        let frame_number = frame_number as u32;
        log::debug!("frame {}: timing bytes differ", frame_number);
        differing.push(FrameDifference {
            frame_number,
            left: derived_time(l, frame_number),
            right: derived_time(r, frame_number),
        });
    }

    let length_mismatch = if left.len() != right.len() {
        log::warn!("block count differs: {} vs {} frames", left.len(), right.len());
        Some((left.len(), right.len()))
    } else {
        None
    };

    RunComparison {
        differing,
        frames_compared: left.len().min(right.len()),
        length_mismatch,
    }
}

fn derived_time(block: &RawTimingBlock, frame_number: u32) -> Option<DateTime<Utc>> {
    decode(block, frame_number)
        .ok()
        .and_then(|record| record.calendar.to_utc())
}
