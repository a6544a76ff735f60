//! Record quality classification.
//!
//! Assigns each decoded `TimestampRecord` a status using local sanity
//! checks: calendar legality, satellite lock, and consistency of the
//! derived UTC instant with the run cadence relative to the last
//! confirmed valid record. Pure per-record logic; the previous anchor is
//! threaded explicitly by the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RunContext;
use crate::timing::block::TimestampRecord;

/// Years outside this window are treated as rollover garbage even when
/// the fields form a legal date.
const MIN_PLAUSIBLE_YEAR: u16 = 1990;
const MAX_PLAUSIBLE_YEAR: u16 = 2100;

/// Quality status assigned to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    /// Legal timestamp, consistent with the run cadence.
    Valid,
    /// Self-consistent timestamp that disagrees with the run cadence or
    /// was latched with a weak satellite lock.
    Suspect,
    /// Decode failure or an implausible timestamp; carries no usable time.
    Corrupt,
}

/// A timestamp record plus its quality status and derived UTC instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedRecord {
    pub record: TimestampRecord,
    pub status: RecordStatus,
    /// Absolute UTC instant, present whenever the calendar fields were
    /// legal (including for SUSPECT records).
    pub derived_utc: Option<DateTime<Utc>>,
}

impl ClassifiedRecord {
    pub fn frame_number(&self) -> u32 {
        self.record.frame_number
    }

    pub fn is_valid(&self) -> bool {
        self.status == RecordStatus::Valid
    }
}

/// Classifies one decoded record.
///
/// `previous_valid` is the last record that was classified VALID, used as
/// the cadence reference. Until one exists, any record with a legal
/// timestamp and sufficient satellite lock is accepted as VALID so the
/// reconciler can establish its first anchor.
pub fn classify(
    record: TimestampRecord,
    ctx: &RunContext,
    previous_valid: Option<&ClassifiedRecord>,
) -> ClassifiedRecord {
    let derived_utc = derive_utc(&record);

    let status = match derived_utc {
        None => RecordStatus::Corrupt,
        Some(_) if record.satellite_count == 0 => RecordStatus::Corrupt,
        Some(_) if record.satellite_count < ctx.min_satellites => RecordStatus::Suspect,
        Some(utc) => cadence_check(&record, utc, ctx, previous_valid),
    };

    // Corrupt records carry no usable time downstream.
    let derived_utc = match status {
        RecordStatus::Corrupt => None,
        _ => derived_utc,
    };

    ClassifiedRecord {
        record,
        status,
        derived_utc,
    }
}

/// Derives the UTC instant, applying the plausibility window on top of
/// calendar legality.
fn derive_utc(record: &TimestampRecord) -> Option<DateTime<Utc>> {
    if record.calendar.year < MIN_PLAUSIBLE_YEAR || record.calendar.year > MAX_PLAUSIBLE_YEAR {
        return None;
    }
    record.calendar.to_utc()
}

/// Compares elapsed time since the previous valid record against the
/// nominal cadence.
fn cadence_check(
    record: &TimestampRecord,
    utc: DateTime<Utc>,
    ctx: &RunContext,
    previous_valid: Option<&ClassifiedRecord>,
) -> RecordStatus {
    let Some(prev) = previous_valid else {
        return RecordStatus::Valid;
    };
    let Some(prev_utc) = prev.derived_utc else {
        return RecordStatus::Valid;
    };

    let frame_delta = record.frame_number.saturating_sub(prev.frame_number()) as f64;
    let elapsed = (utc - prev_utc).num_nanoseconds().unwrap_or(i64::MAX) as f64 / 1e9;
    let expected = ctx.cadence_secs * frame_delta;
    let deviation_cycles = (elapsed - expected).abs() / ctx.cadence_secs;

    if deviation_cycles <= ctx.trivial_tolerance {
        // Known hardware jitter; keep VALID rather than flag.
        RecordStatus::Valid
    } else if deviation_cycles > ctx.max_cycle_difference {
        log::debug!(
            "frame {}: timestamp off cadence by {:.3} cycles, flagging suspect",
            record.frame_number,
            deviation_cycles
        );
        RecordStatus::Suspect
    } else {
        RecordStatus::Valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::block::{CalendarFields, FormatVersion};

    /// A record stamped `secs` seconds after 2023-06-15T00:00:00Z.
    fn make_record(frame_number: u32, secs: f64, satellites: u8) -> TimestampRecord {
        let whole = secs as u32;
        TimestampRecord {
            frame_number,
            nominal_index: frame_number,
            calendar: CalendarFields {
                year: 2023,
                month: 6,
                day: 15,
                hour: (whole / 3600) as u8,
                minute: ((whole / 60) % 60) as u8,
                second: (whole % 60) as u8,
                nanosecond: ((secs - whole as f64) * 1e9).round() as u32,
            },
            satellite_count: satellites,
            gps_synced: true,
            format: FormatVersion::Current,
        }
    }

    fn valid_anchor(frame_number: u32, secs: f64) -> ClassifiedRecord {
        classify(make_record(frame_number, secs, 7), &RunContext::default(), None)
    }

    #[test]
    fn test_legal_record_without_anchor_is_valid() {
        let ctx = RunContext::default();
        let classified = classify(make_record(0, 0.0, 7), &ctx, None);

        assert_eq!(classified.status, RecordStatus::Valid);
        assert!(classified.derived_utc.is_some());
    }

    #[test]
    fn test_zero_satellites_is_corrupt() {
        let ctx = RunContext::default();
        let classified = classify(make_record(0, 0.0, 0), &ctx, None);

        assert_eq!(classified.status, RecordStatus::Corrupt);
        assert_eq!(classified.derived_utc, None);
    }

    #[test]
    fn test_weak_lock_is_suspect_with_derived_time() {
        let ctx = RunContext::default().with_min_satellites(4);
        let classified = classify(make_record(0, 0.0, 2), &ctx, None);

        assert_eq!(classified.status, RecordStatus::Suspect);
        assert!(classified.derived_utc.is_some());
    }

    #[test]
    fn test_placeholder_is_corrupt() {
        let ctx = RunContext::default();
        let record = TimestampRecord::corrupt_placeholder(3, FormatVersion::Current);
        let classified = classify(record, &ctx, None);

        assert_eq!(classified.status, RecordStatus::Corrupt);
    }

    #[test]
    fn test_implausible_year_is_corrupt() {
        let ctx = RunContext::default();
        let mut record = make_record(0, 0.0, 7);
        record.calendar.year = 1903; // rollover garbage, but a legal date

        let classified = classify(record, &ctx, None);
        assert_eq!(classified.status, RecordStatus::Corrupt);
    }

    #[test]
    fn test_on_cadence_record_stays_valid() {
        let ctx = RunContext::default();
        let anchor = valid_anchor(0, 10.0);
        let classified = classify(make_record(1, 11.0, 7), &ctx, Some(&anchor));

        assert_eq!(classified.status, RecordStatus::Valid);
    }

    #[test]
    fn test_trivial_jitter_suppressed() {
        let ctx = RunContext::default().with_trivial_tolerance(0.02);
        let anchor = valid_anchor(0, 10.0);
        // 10 ms early on a 1 s cadence: inside the trivial tolerance.
        let classified = classify(make_record(1, 10.99, 7), &ctx, Some(&anchor));

        assert_eq!(classified.status, RecordStatus::Valid);
    }

    #[test]
    fn test_trivial_tolerance_above_cadence_limit_accepts() {
        let anchor = valid_anchor(0, 10.0);

        // 0.3 cycles of drift is suspect under the default limits.
        let strict = RunContext::default();
        let classified = classify(make_record(1, 10.7, 7), &strict, Some(&anchor));
        assert_eq!(classified.status, RecordStatus::Suspect);

        // Raising the jitter allowance past max_cycle_difference is the
        // only setting where it changes the outcome.
        let loose = RunContext::default().with_trivial_tolerance(0.5);
        let classified = classify(make_record(1, 10.7, 7), &loose, Some(&anchor));
        assert_eq!(classified.status, RecordStatus::Valid);
    }

    #[test]
    fn test_cadence_breaking_drift_is_suspect() {
        let ctx = RunContext::default();
        let anchor = valid_anchor(0, 10.0);
        // Half a cycle late: well past max_cycle_difference.
        let classified = classify(make_record(1, 11.5, 7), &ctx, Some(&anchor));

        assert_eq!(classified.status, RecordStatus::Suspect);
    }

    #[test]
    fn test_deviation_scales_with_frame_gap() {
        let ctx = RunContext::default();
        let anchor = valid_anchor(0, 10.0);
        // Five frames later at exactly five cadence intervals.
        let classified = classify(make_record(5, 15.0, 7), &ctx, Some(&anchor));

        assert_eq!(classified.status, RecordStatus::Valid);
    }
}
