//! Run-file reader and writer collaborators.
//!
//! A run file is the raw timing bytes stripped out of an instrument data
//! stream: fixed-size blocks concatenated in frame order, all of one
//! hardware generation. The reader sniffs the generation from the first
//! block's version byte and chunks the stream accordingly; a trailing
//! partial block is passed through untouched so the decoder can flag it.
//!
//! File handles are scoped to these functions and released on every exit
//! path, including an abort from a `SequenceError` further down the
//! pipeline.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::timing::{FormatVersion, RawTimingBlock, ReconciledRecord};

/// Errors from reading or writing run files.
#[derive(Debug)]
pub enum RunFileError {
    /// Underlying I/O failure.
    Io(std::io::Error),
    /// The file contains no timing bytes at all.
    Empty,
    /// The file is too short to carry even one block header.
    TooShort(usize),
    /// The first block's version byte is not a known hardware generation.
    UnknownVersion(u8),
}

impl fmt::Display for RunFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunFileError::Io(e) => write!(f, "I/O error: {}", e),
            RunFileError::Empty => write!(f, "run file is empty"),
            RunFileError::TooShort(len) => {
                write!(f, "run file is too short to hold a block header ({} bytes)", len)
            }
            RunFileError::UnknownVersion(byte) => {
                write!(f, "unknown format version byte {}", byte)
            }
        }
    }
}

impl std::error::Error for RunFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunFileError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RunFileError {
    fn from(e: std::io::Error) -> Self {
        RunFileError::Io(e)
    }
}

/// Splits a raw timing byte stream into per-frame blocks.
///
/// The format version is taken from the first block and applies to the
/// whole file. A trailing partial block is kept (the decoder flags it as
/// truncated) rather than silently dropped.
pub fn split_blocks(bytes: &[u8]) -> Result<Vec<RawTimingBlock>, RunFileError> {
    if bytes.is_empty() {
        return Err(RunFileError::Empty);
    }
    if bytes.len() < 3 {
        return Err(RunFileError::TooShort(bytes.len()));
    }

    let version_byte = bytes[2];
    let format =
        FormatVersion::from_byte(version_byte).ok_or(RunFileError::UnknownVersion(version_byte))?;
    let block_len = format.block_len();

    let mut blocks = Vec::with_capacity(bytes.len() / block_len + 1);
    for chunk in bytes.chunks(block_len) {
        blocks.push(RawTimingBlock::new(chunk.to_vec(), format));
    }

    if bytes.len() % block_len != 0 {
        log::warn!(
            "run file ends in a partial block ({} of {} bytes)",
            bytes.len() % block_len,
            block_len
        );
    }
    log::debug!("split run file into {} {} blocks", blocks.len(), format);

    Ok(blocks)
}

/// Reads all timing blocks of one run file.
pub fn read_run_file(path: &Path) -> Result<Vec<RawTimingBlock>, RunFileError> {
    let bytes = std::fs::read(path)?;
    split_blocks(&bytes)
}

/// Writes the reconciled records as JSON lines.
///
/// One object per frame, in frame order; this is the corrected-timestamp
/// output consumed alongside the original frame data.
pub fn write_reconciled(path: &Path, records: &[ReconciledRecord]) -> Result<(), RunFileError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    for record in records {
        let line = serde_json::to_string(record)
            .map_err(|e| RunFileError::Io(std::io::Error::other(e)))?;
        writeln!(writer, "{}", line)?;
    }
    writer.flush()?;

    log::info!("wrote {} reconciled records to {}", records.len(), path.display());
    Ok(())
}
