//! The record stream and grouping metadata seams between the decoder and a container format.
//!
//! The decoder never deals with a file format directly: it reads [`Record`]s from a
//! [`RecordReader`], writes them to a [`RecordWriter`], and rewrites the read groups of a
//! [`GroupingMetadata`] document before any record is written.

use crate::{
    errors::DecodeError,
    read_group::{Provenance, ReadGroup},
};

/// A single sequencing record with the fields the decoder reads and updates.
pub trait Record {
    /// The read identifier.
    fn name(&self) -> &[u8];

    /// Replace the read identifier.
    fn set_name(&mut self, name: Vec<u8>);

    /// The value of the optional field `tag`, if present.
    fn tag(&self, tag: &str) -> Option<&[u8]>;

    /// Set the optional field `tag` to the string `value`, adding it if absent.
    fn set_tag(&mut self, tag: &str, value: Vec<u8>);

    /// True if the read failed the instrument's quality filter.
    fn is_qc_fail(&self) -> bool;

    /// True if the read is one of a pair, in which case its mate immediately follows it.
    fn is_paired(&self) -> bool;
}

/// A source of records.
pub trait RecordReader {
    type Record: Record;

    /// Read the next record, or `None` at the end of the stream.
    fn read_record(&mut self) -> Result<Option<Self::Record>, DecodeError>;
}

/// A sink for records.
pub trait RecordWriter<R: Record> {
    /// Write a single record.
    fn write_record(&mut self, record: &R) -> Result<(), DecodeError>;

    /// Flush any buffered records.
    fn finish(&mut self) -> Result<(), DecodeError>;
}

/// The file level metadata declaring the read groups referenced by records.
pub trait GroupingMetadata {
    /// The read groups, in declaration order.
    fn read_groups(&self) -> Result<Vec<ReadGroup>, DecodeError>;

    /// Replace every read group with `groups`.
    fn replace_read_groups(&mut self, groups: Vec<ReadGroup>) -> Result<(), DecodeError>;

    /// Record that the output was produced by `provenance`.
    fn add_provenance(&mut self, provenance: &Provenance) -> Result<(), DecodeError>;
}
