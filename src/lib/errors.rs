//! The errors that may occur while decoding sample barcodes.
//!
//! Variants fall into three families:
//!
//! - format errors: a malformed barcode file, inconsistent barcode lengths, or a group/record that
//!   lacks a required field.  These are fatal and are raised before any record is processed when
//!   they concern the barcode file or header.
//! - data errors: a barcode and its quality string disagree in length on a single read.  These are
//!   never fatal; the read is classified with the uncleaned barcode.
//! - I/O errors: failing to open, read, or write a stream.  These are fatal.
use std::path::PathBuf;

use thiserror::Error;

/// The error type for the decoding library.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Io error occurred")]
    Io(#[from] std::io::Error),

    #[error("Io error occurred")]
    FgError(#[from] fgoxide::FgError),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("The barcode file {path:?} could not be read: the header line is missing")]
    MissingBarcodeHeader { path: PathBuf },

    #[error("The barcode on line {line} had {actual} fields, expected at least {expected} fields")]
    InvalidBarcodeLine { line: usize, actual: usize, expected: usize },

    #[error("Tag '{barcode}' is a different length ({actual}) to the previous tag(s) ({expected})")]
    UnequalBarcodeLengths { barcode: String, expected: usize, actual: usize },

    #[error("Duplicate barcode name found: {name}")]
    DuplicateBarcodeName { name: String },

    #[error("The barcode name '{name}' is reserved for unassigned reads (barcode '{barcode}')")]
    ReservedBarcodeName { name: String, barcode: String },

    #[error("A read group is missing its ID field: {group}")]
    MissingReadGroupId { group: String },

    #[error("Malformed header line: {line}")]
    MalformedHeader { line: String },

    #[error("Malformed record ({reason}): {record}")]
    MalformedRecord { record: String, reason: String },

    #[error(
        "Barcode and quality are different lengths ({barcode_len} vs {quality_len}) for barcode '{barcode}'"
    )]
    BarcodeQualityLengthMismatch { barcode: String, barcode_len: usize, quality_len: usize },

    #[error("The paired read '{name}' has no mate in the input")]
    MissingMate { name: String },

    #[error("Unsupported alignment format '{format}', expected one of: sam, bam")]
    UnsupportedFormat { format: String },
}

impl DecodeError {
    /// True if this error means that an input (barcode file, header, record) was malformed.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::MissingBarcodeHeader { .. }
                | Self::InvalidBarcodeLine { .. }
                | Self::UnequalBarcodeLengths { .. }
                | Self::DuplicateBarcodeName { .. }
                | Self::ReservedBarcodeName { .. }
                | Self::MissingReadGroupId { .. }
                | Self::MalformedHeader { .. }
                | Self::MalformedRecord { .. }
                | Self::UnsupportedFormat { .. }
        )
    }

    /// True if this error concerns the data of a single read and should not abort the run.
    pub fn is_data_error(&self) -> bool {
        matches!(self, Self::BarcodeQualityLengthMismatch { .. })
    }
}
