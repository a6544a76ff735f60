//! Raw timing block decoding.
//!
//! Each frame of a run carries one fixed-size timing block written by the
//! instrument's GPS-disciplined timing board. This module defines the wire
//! layout for both hardware generations and the pure decode step that
//! turns a block into a structured `TimestampRecord`.
//!
//! ## Block layout (little-endian)
//!
//! ```text
//! 0..2    magic "TB"
//! 2       format version byte (1 = legacy, 2 = current)
//! 3       flags (bit 0: GPS sync achieved)
//! 4..8    u32 frame counter as written by the timing board
//! 8..12   u32 timestamp tick counter (not used by the reconstruction)
//! 12..14  u16 year      14 u8 month    15 u8 day
//! 16      u8 hour       17 u8 minute   18 u8 second
//! 19      u8 satellite count
//! legacy:  20..22 u16 centiseconds, 22..24 reserved   (24 bytes)
//! current: 20..24 u32 nanoseconds,  24..32 reserved   (32 bytes)
//! ```
//!
//! Everything past byte 3 may be garbage: satellite-lock dropout, buffer
//! glitches and clock rollover all corrupt the payload without touching
//! the framing. The decoder only enforces framing; plausibility of the
//! decoded fields is the classifier's job.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Magic bytes opening every timing block.
pub const BLOCK_MAGIC: [u8; 2] = *b"TB";

/// Hardware/firmware generation of a timing block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatVersion {
    /// First-generation boards: 24-byte blocks, 10 ms time resolution.
    Legacy,
    /// Current boards: 32-byte blocks, nanosecond time resolution.
    Current,
}

impl FormatVersion {
    /// Fixed block length in bytes for this generation.
    pub fn block_len(&self) -> usize {
        match self {
            FormatVersion::Legacy => 24,
            FormatVersion::Current => 32,
        }
    }

    /// The version byte written at offset 2 of every block.
    pub fn version_byte(&self) -> u8 {
        match self {
            FormatVersion::Legacy => 1,
            FormatVersion::Current => 2,
        }
    }

    /// Maps a version byte back to a format, if recognised.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(FormatVersion::Legacy),
            2 => Some(FormatVersion::Current),
            _ => None,
        }
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatVersion::Legacy => write!(f, "legacy"),
            FormatVersion::Current => write!(f, "current"),
        }
    }
}

/// One raw timing block as delivered by the run-file reader.
///
/// The payload is opaque at this level; the format version is supplied
/// alongside it because the reader knows the run's hardware generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTimingBlock {
    /// Raw block bytes.
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
    /// Hardware generation the reader expects this block to be.
    pub format: FormatVersion,
}

impl RawTimingBlock {
    pub fn new(bytes: Vec<u8>, format: FormatVersion) -> Self {
        Self { bytes, format }
    }
}

/// Serde helper module for base64 encoding/decoding of byte vectors.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Calendar date and time-of-day fields as written by the timing board.
///
/// An all-zero value is the "unset" sentinel used by synthetic placeholder
/// records when a block failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarFields {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub nanosecond: u32,
}

impl CalendarFields {
    /// The sentinel value marking fields that could not be decoded.
    pub fn unset() -> Self {
        Self {
            year: 0,
            month: 0,
            day: 0,
            hour: 0,
            minute: 0,
            second: 0,
            nanosecond: 0,
        }
    }

    pub fn is_unset(&self) -> bool {
        *self == Self::unset()
    }

    /// Converts the fields to an absolute UTC instant.
    ///
    /// Returns `None` when the fields do not form a legal date/time
    /// (month 0, day 32, hour 25 and so on) or when they are unset.
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        if self.is_unset() {
            return None;
        }
        let date = NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)?;
        let datetime = date.and_hms_nano_opt(
            self.hour as u32,
            self.minute as u32,
            self.second as u32,
            self.nanosecond,
        )?;
        Some(datetime.and_utc())
    }
}

/// A decoded per-frame timestamp record.
///
/// `frame_number` is the position in the raw stream as counted by the
/// reader and is always trustworthy. Every other field comes from the
/// block payload and may be invalid or implausible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampRecord {
    /// Stream position of the frame this record belongs to.
    pub frame_number: u32,
    /// The timing board's own frame counter. May disagree with
    /// `frame_number` when records were dropped or duplicated.
    pub nominal_index: u32,
    /// Calendar fields, or the unset sentinel after a decode failure.
    pub calendar: CalendarFields,
    /// Number of satellites locked when the timestamp was latched.
    pub satellite_count: u8,
    /// Whether the board reported GPS sync at the time of the stamp.
    pub gps_synced: bool,
    /// Hardware generation the record was decoded from.
    pub format: FormatVersion,
}

impl TimestampRecord {
    /// Synthetic record substituted when a block fails to decode.
    ///
    /// All calendar fields are unset and the satellite count is zero, so
    /// the classifier will mark it CORRUPT without special-casing.
    pub fn corrupt_placeholder(frame_number: u32, format: FormatVersion) -> Self {
        Self {
            frame_number,
            nominal_index: 0,
            calendar: CalendarFields::unset(),
            satellite_count: 0,
            gps_synced: false,
            format,
        }
    }
}

/// Errors from decoding a single raw timing block.
///
/// All of these are fatal for the frame (the block cannot be repaired)
/// but never for the run: the pipeline substitutes a corrupt placeholder
/// record and carries on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The block is shorter than the fixed layout requires.
    Truncated { expected: usize, actual: usize },
    /// The block does not open with the timing-block magic.
    BadMagic { found: [u8; 2] },
    /// The version byte disagrees with the format the reader supplied.
    VersionMismatch { expected: u8, found: u8 },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated { expected, actual } => {
                write!(f, "truncated block: expected {} bytes, got {}", expected, actual)
            }
            DecodeError::BadMagic { found } => {
                write!(f, "bad block magic: {:02x}{:02x}", found[0], found[1])
            }
            DecodeError::VersionMismatch { expected, found } => {
                write!(f, "version byte {} does not match expected {}", found, expected)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decodes one raw timing block into a `TimestampRecord`.
///
/// Pure function of its input: enforces length, magic and version framing
/// and unpacks the payload fields without judging their plausibility.
/// `frame_number` is the stream position supplied by the reader.
pub fn decode(block: &RawTimingBlock, frame_number: u32) -> Result<TimestampRecord, DecodeError> {
    let expected = block.format.block_len();
    let bytes = &block.bytes;

    if bytes.len() < expected {
        return Err(DecodeError::Truncated {
            expected,
            actual: bytes.len(),
        });
    }
    if bytes[0..2] != BLOCK_MAGIC {
        return Err(DecodeError::BadMagic {
            found: [bytes[0], bytes[1]],
        });
    }
    if bytes[2] != block.format.version_byte() {
        return Err(DecodeError::VersionMismatch {
            expected: block.format.version_byte(),
            found: bytes[2],
        });
    }

    let nominal_index = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let year = u16::from_le_bytes([bytes[12], bytes[13]]);

    let nanosecond = match block.format {
        FormatVersion::Legacy => {
            // Legacy boards latch time in centiseconds.
            let centis = u16::from_le_bytes([bytes[20], bytes[21]]);
            centis as u32 * 10_000_000
        }
        FormatVersion::Current => u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]),
    };

    Ok(TimestampRecord {
        frame_number,
        nominal_index,
        calendar: CalendarFields {
            year,
            month: bytes[14],
            day: bytes[15],
            hour: bytes[16],
            minute: bytes[17],
            second: bytes[18],
            nanosecond,
        },
        satellite_count: bytes[19],
        gps_synced: bytes[3] & 0x01 != 0,
        format: block.format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a well-formed block for the given format and calendar fields.
    pub(crate) fn make_block(
        format: FormatVersion,
        board_frame: u32,
        tick: u32,
        calendar: CalendarFields,
        satellites: u8,
    ) -> RawTimingBlock {
        let mut bytes = vec![0u8; format.block_len()];
        bytes[0..2].copy_from_slice(&BLOCK_MAGIC);
        bytes[2] = format.version_byte();
        bytes[3] = 0x01; // synced
        bytes[4..8].copy_from_slice(&board_frame.to_le_bytes());
        bytes[8..12].copy_from_slice(&tick.to_le_bytes());
        bytes[12..14].copy_from_slice(&calendar.year.to_le_bytes());
        bytes[14] = calendar.month;
        bytes[15] = calendar.day;
        bytes[16] = calendar.hour;
        bytes[17] = calendar.minute;
        bytes[18] = calendar.second;
        bytes[19] = satellites;
        match format {
            FormatVersion::Legacy => {
                let centis = (calendar.nanosecond / 10_000_000) as u16;
                bytes[20..22].copy_from_slice(&centis.to_le_bytes());
            }
            FormatVersion::Current => {
                bytes[20..24].copy_from_slice(&calendar.nanosecond.to_le_bytes());
            }
        }
        RawTimingBlock::new(bytes, format)
    }

    fn midnight(nanosecond: u32) -> CalendarFields {
        CalendarFields {
            year: 2023,
            month: 6,
            day: 15,
            hour: 0,
            minute: 0,
            second: 0,
            nanosecond,
        }
    }

    #[test]
    fn test_decode_current_block() {
        let block = make_block(FormatVersion::Current, 41, 900, midnight(250_000_000), 7);
        let record = decode(&block, 42).unwrap();

        assert_eq!(record.frame_number, 42);
        assert_eq!(record.nominal_index, 41);
        assert_eq!(record.calendar, midnight(250_000_000));
        assert_eq!(record.satellite_count, 7);
        assert!(record.gps_synced);
        assert_eq!(record.format, FormatVersion::Current);
    }

    #[test]
    fn test_decode_legacy_block_quantizes_to_centiseconds() {
        let block = make_block(FormatVersion::Legacy, 0, 1, midnight(250_000_000), 5);
        let record = decode(&block, 0).unwrap();

        // 250 ms survives the centisecond round-trip exactly.
        assert_eq!(record.calendar.nanosecond, 250_000_000);
        assert_eq!(record.format, FormatVersion::Legacy);
    }

    #[test]
    fn test_decode_truncated_block() {
        let mut block = make_block(FormatVersion::Current, 0, 0, midnight(0), 7);
        block.bytes.truncate(20);

        let err = decode(&block, 0).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                expected: 32,
                actual: 20
            }
        );
    }

    #[test]
    fn test_decode_bad_magic() {
        let mut block = make_block(FormatVersion::Current, 0, 0, midnight(0), 7);
        block.bytes[0] = b'X';

        let err = decode(&block, 0).unwrap_err();
        assert_eq!(err, DecodeError::BadMagic { found: [b'X', b'B'] });
    }

    #[test]
    fn test_decode_version_mismatch() {
        let mut block = make_block(FormatVersion::Current, 0, 0, midnight(0), 7);
        block.bytes[2] = FormatVersion::Legacy.version_byte();

        let err = decode(&block, 0).unwrap_err();
        assert_eq!(
            err,
            DecodeError::VersionMismatch {
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn test_corrupt_placeholder_is_unset() {
        let record = TimestampRecord::corrupt_placeholder(9, FormatVersion::Legacy);
        assert_eq!(record.frame_number, 9);
        assert!(record.calendar.is_unset());
        assert_eq!(record.satellite_count, 0);
        assert_eq!(record.calendar.to_utc(), None);
    }

    #[test]
    fn test_calendar_to_utc_rejects_illegal_dates() {
        let mut fields = midnight(0);
        fields.month = 13;
        assert_eq!(fields.to_utc(), None);

        let mut fields = midnight(0);
        fields.day = 32;
        assert_eq!(fields.to_utc(), None);

        let mut fields = midnight(0);
        fields.hour = 24;
        assert_eq!(fields.to_utc(), None);
    }
}
