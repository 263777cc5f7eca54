//! Driver-level error taxonomy (§7). Distinct from `pdbex_core::CoreError`:
//! these are failures in *getting a graph populated* in the first place, not
//! failures resolving or reconstructing an already-populated one.

use std::fmt;

/// Everything that can go wrong while opening a PDB and decoding its TPI
/// stream into a symbol graph.
#[derive(Debug)]
pub enum DriverError {
    /// The MSF container could not be opened (missing file, bad magic,
    /// truncated directory, ...). Wraps whatever `ms-pdb-msf` reported.
    FileNotFound { source: anyhow::Error },
    /// The MSF container opened, but its TPI stream (stream 2) could not be
    /// read. Wraps whatever `ms-pdb-msf` reported.
    StreamReadFailed { source: anyhow::Error },
    /// Stream 2 was shorter than the fixed 56-byte TPI header, or its
    /// `header_size` field disagreed with that.
    MalformedTpiHeader,
    /// A type record's declared length ran past the end of the stream, or
    /// its body was too short for the leaf kind it claimed to be.
    MalformedRecord { offset: usize },
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::FileNotFound { source } => write!(f, "failed to open PDB: {source}"),
            DriverError::StreamReadFailed { source } => {
                write!(f, "failed to read TPI stream: {source}")
            }
            DriverError::MalformedTpiHeader => write!(f, "malformed TPI stream header"),
            DriverError::MalformedRecord { offset } => {
                write!(f, "malformed type record at stream offset {offset:#x}")
            }
        }
    }
}

impl std::error::Error for DriverError {}

pub type DriverResult<T> = Result<T, DriverError>;
