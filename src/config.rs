//! Per-run configuration for the timing reconstruction pipeline.
//!
//! A `RunContext` is built once by the caller (CLI or a pipeline driver),
//! is immutable for the lifetime of one run, and is threaded by reference
//! through the decoder, classifier and reconciler.

use serde::{Deserialize, Serialize};

/// Report verbosity selected by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verbosity {
    /// One-line summary of counts.
    Terse,
    /// Per-span listing of rejections, extrapolations and cycle jumps.
    Detailed,
}

/// Configuration for reconstructing one observing run.
///
/// Tolerances are expressed in cadence units (fractions of the nominal
/// frame interval) so the same thresholds apply to fast and slow runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    /// Nominal interval between consecutive frames, in seconds.
    pub cadence_secs: f64,

    /// Maximum deviation (in cadence units) before a timestamp is treated
    /// as inconsistent with the run cadence.
    pub max_cycle_difference: f64,

    /// Deviation (in cadence units) below which timing noise is accepted
    /// outright. Calibration parameter for known hardware jitter, not a
    /// correctness rule. Only changes the outcome when raised above
    /// `max_cycle_difference`; below that the ordinary cadence check
    /// already accepts the deviation.
    pub trivial_tolerance: f64,

    /// Maximum run of consecutive bad records held for interpolation
    /// before the span is extrapolated from the last anchor instead.
    pub max_pending: usize,

    /// Minimum satellite-lock count for a record to be a VALID candidate.
    pub min_satellites: u8,

    /// Report verbosity.
    pub verbosity: Verbosity,
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            cadence_secs: 1.0,
            max_cycle_difference: 0.2,
            trivial_tolerance: 0.02,
            max_pending: 64,
            min_satellites: 3,
            verbosity: Verbosity::Terse,
        }
    }
}

impl RunContext {
    /// Creates a context for the given nominal cadence with default tolerances.
    #[allow(dead_code)]
    pub fn new(cadence_secs: f64) -> Self {
        Self {
            cadence_secs,
            ..Self::default()
        }
    }

    /// Sets the maximum cycle deviation tolerance (cadence units).
    pub fn with_max_cycle_difference(mut self, tolerance: f64) -> Self {
        self.max_cycle_difference = tolerance;
        self
    }

    /// Sets the trivial-error tolerance (cadence units).
    pub fn with_trivial_tolerance(mut self, tolerance: f64) -> Self {
        self.trivial_tolerance = tolerance;
        self
    }

    /// Sets the maximum consecutive-bad-record run length.
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// Sets the minimum satellite-lock count.
    pub fn with_min_satellites(mut self, min_satellites: u8) -> Self {
        self.min_satellites = min_satellites;
        self
    }

    /// Sets the report verbosity.
    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }
}
