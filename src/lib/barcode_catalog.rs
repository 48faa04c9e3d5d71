#![forbid(unsafe_code)]
#![allow(clippy::must_use_candidate)]
//! The catalogue of expected sample barcodes.
//!
//! The catalogue is read from a tab-delimited file with a header line followed by one line per
//! barcode:
//!
//! ```text
//! barcode_sequence<TAB>barcode_name<TAB>library_name<TAB>sample_name<TAB>description
//! ```
//!
//! All barcodes must have the same length.  The first entry of every catalogue is a synthetic
//! "unassigned" entry named `0` whose sequence is all no-calls; reads that cannot be confidently
//! assigned to a real barcode are assigned to it.

use std::{io::Read, path::Path};

use ahash::AHashSet;
use bstr::BString;
use csv::ReaderBuilder;
use fgoxide::io::Io;
use log::debug;

use crate::errors::DecodeError;

/// The name of the synthetic entry that collects unassigned reads.
pub const UNASSIGNED_NAME: &str = "0";

/// The symbol used to write a no-call base.
pub const NO_CALL: u8 = b'N';

/// The index of the unassigned entry in every [`BarcodeCatalog`].
pub const UNASSIGNED_INDEX: usize = 0;

/// The minimum number of tab-delimited fields on a barcode line.
const NUM_BARCODE_FIELDS: usize = 5;

/// Returns true if the base is a no-call (`N`, `n`, or `.`).
#[inline]
pub fn is_no_call(base: u8) -> bool {
    base == b'N' || base == b'n' || base == b'.'
}

/// A single expected barcode and the library/sample it identifies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BarcodeEntry {
    /// The barcode bases.
    pub sequence: BString,
    /// The human readable name of the barcode, used to build read group identifiers.
    pub name: String,
    /// The library the barcode belongs to.
    pub library: String,
    /// The sample the barcode belongs to.
    pub sample: String,
    /// Free text description.
    pub description: String,
}

impl BarcodeEntry {
    /// Create a new [`BarcodeEntry`].
    pub fn new(
        sequence: impl Into<BString>,
        name: impl Into<String>,
        library: impl Into<String>,
        sample: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            sequence: sequence.into(),
            name: name.into(),
            library: library.into(),
            sample: sample.into(),
            description: description.into(),
        }
    }

    /// The synthetic entry for unassigned reads, with an all no-call sequence of `tag_length`.
    fn unassigned(tag_length: usize) -> Self {
        Self::new(vec![NO_CALL; tag_length], UNASSIGNED_NAME, "", "", "")
    }
}

/// The ordered set of expected barcodes, with the unassigned entry first.
///
/// The catalogue is immutable once built; per-barcode counts are kept separately by
/// [`crate::metrics::MetricsAggregator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarcodeCatalog {
    entries: Vec<BarcodeEntry>,
    tag_length: usize,
}

impl BarcodeCatalog {
    /// Build a catalogue from the real (non-unassigned) entries, in order.
    ///
    /// The tag length is the length of the first entry, or zero if there are no entries.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::UnequalBarcodeLengths`] for the first entry whose length differs
    /// - [`DecodeError::DuplicateBarcodeName`] if two entries share a name
    /// - [`DecodeError::ReservedBarcodeName`] if an entry uses the unassigned name
    pub fn new(barcodes: Vec<BarcodeEntry>) -> Result<Self, DecodeError> {
        let tag_length = barcodes.first().map_or(0, |b| b.sequence.len());

        let mut names = AHashSet::with_capacity(barcodes.len());
        for barcode in &barcodes {
            if barcode.sequence.len() != tag_length {
                return Err(DecodeError::UnequalBarcodeLengths {
                    barcode: barcode.sequence.to_string(),
                    expected: tag_length,
                    actual: barcode.sequence.len(),
                });
            }
            if barcode.name == UNASSIGNED_NAME {
                return Err(DecodeError::ReservedBarcodeName {
                    name: barcode.name.clone(),
                    barcode: barcode.sequence.to_string(),
                });
            }
            if !names.insert(barcode.name.as_str()) {
                return Err(DecodeError::DuplicateBarcodeName { name: barcode.name.clone() });
            }
        }

        let mut entries = Vec::with_capacity(barcodes.len() + 1);
        entries.push(BarcodeEntry::unassigned(tag_length));
        entries.extend(barcodes);
        Ok(Self { entries, tag_length })
    }

    /// Reads the catalogue from the barcode file at the given path.
    ///
    /// The first line is a header and is ignored.  A file with only a header line is valid and
    /// yields a catalogue holding just the unassigned entry.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::MissingBarcodeHeader`] if the file is empty
    /// - [`DecodeError::InvalidBarcodeLine`] if a line has fewer than five fields
    /// - any error from [`BarcodeCatalog::new`]
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, DecodeError> {
        let io = Io::default();
        let lines = io.read_lines(&path)?;
        if lines.is_empty() {
            return Err(DecodeError::MissingBarcodeHeader { path: path.as_ref().to_path_buf() });
        }
        let catalog = Self::from_reader(lines.join("\n").as_bytes())?;
        debug!(
            "Read {} barcode(s) of length {} from {}",
            catalog.num_barcodes(),
            catalog.tag_length(),
            path.as_ref().to_string_lossy()
        );
        Ok(catalog)
    }

    /// Reads the catalogue from a reader positioned at the header line.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DecodeError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .quoting(false)
            .flexible(true)
            .from_reader(reader);

        let mut barcodes = vec![];
        for (index, record) in reader.records().enumerate() {
            let record = record?;
            // +2 to skip the header and convert to 1-based counting
            let line = record.position().map_or(index + 2, |p| p.line() as usize);
            if record.len() < NUM_BARCODE_FIELDS {
                return Err(DecodeError::InvalidBarcodeLine {
                    line,
                    actual: record.len(),
                    expected: NUM_BARCODE_FIELDS,
                });
            }
            barcodes.push(BarcodeEntry::new(
                record[0].as_bytes(),
                &record[1],
                &record[2],
                &record[3],
                &record[4],
            ));
        }
        Self::new(barcodes)
    }

    /// All entries, with the unassigned entry first.
    pub fn entries(&self) -> &[BarcodeEntry] {
        &self.entries
    }

    /// The real barcodes, in file order, excluding the unassigned entry.
    pub fn barcodes(&self) -> &[BarcodeEntry] {
        &self.entries[UNASSIGNED_INDEX + 1..]
    }

    /// The unassigned entry.
    pub fn unassigned(&self) -> &BarcodeEntry {
        &self.entries[UNASSIGNED_INDEX]
    }

    /// The entry at the given index.
    pub fn entry(&self, index: usize) -> &BarcodeEntry {
        &self.entries[index]
    }

    /// The length shared by every barcode.
    pub fn tag_length(&self) -> usize {
        self.tag_length
    }

    /// The number of entries including the unassigned entry.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false, as the unassigned entry is always present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The number of real barcodes.
    pub fn num_barcodes(&self) -> usize {
        self.entries.len() - 1
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use matches::assert_matches;
    use tempfile::tempdir;

    use super::*;

    const BARCODE_FILE: &str = "\
barcode_sequence\tbarcode_name\tlibrary_name\tsample_name\tdescription
ACGTACGT\ttag1\tlib1\tsample1\tfirst sample
TTTTGGGG\ttag2\tlib2\tsample2\tsecond sample
";

    #[test]
    fn test_from_path_valid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("barcodes.tsv");
        fs::write(&path, BARCODE_FILE).unwrap();

        let catalog = BarcodeCatalog::from_path(&path).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.num_barcodes(), 2);
        assert_eq!(catalog.tag_length(), 8);

        let unassigned = catalog.unassigned();
        assert_eq!(unassigned.name, UNASSIGNED_NAME);
        assert_eq!(unassigned.sequence, BString::from("NNNNNNNN"));
        assert_eq!(unassigned.library, "");

        assert_eq!(
            catalog.barcodes()[0],
            BarcodeEntry::new("ACGTACGT", "tag1", "lib1", "sample1", "first sample")
        );
        assert_eq!(catalog.entry(2).name, "tag2");
        assert_eq!(catalog.entry(2).description, "second sample");
    }

    #[test]
    fn test_header_only_is_valid() {
        let catalog = BarcodeCatalog::from_reader("seq\tname\tlib\tsample\tdesc\n".as_bytes())
            .unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.tag_length(), 0);
        assert!(catalog.barcodes().is_empty());
        assert_eq!(catalog.unassigned().sequence, BString::from(""));
    }

    #[test]
    fn test_empty_file_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("barcodes.tsv");
        fs::write(&path, "").unwrap();
        assert_matches!(
            BarcodeCatalog::from_path(&path),
            Err(DecodeError::MissingBarcodeHeader { .. })
        );
    }

    #[test]
    fn test_missing_file_fails() {
        let dir = tempdir().unwrap();
        let result = BarcodeCatalog::from_path(dir.path().join("missing.tsv"));
        assert_matches!(result, Err(DecodeError::FgError(_)));
    }

    #[test]
    fn test_too_few_fields() {
        let data = "\
header
ACGT\ttag1\tlib1\tsample1\tdesc
ACGA\ttag2\tlib2
";
        let result = BarcodeCatalog::from_reader(data.as_bytes());
        assert_matches!(
            result,
            Err(DecodeError::InvalidBarcodeLine { line: 3, actual: 3, expected: 5 })
        );
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let data = "header\nACGT\ttag1\tlib1\tsample1\tdesc\textra\n";
        let catalog = BarcodeCatalog::from_reader(data.as_bytes()).unwrap();
        assert_eq!(catalog.barcodes()[0].description, "desc");
    }

    #[test]
    fn test_unequal_lengths_report_first_offender() {
        let data = "\
header
ACGT\ttag1\tlib1\tsample1\tdesc
ACG\ttag2\tlib2\tsample2\tdesc
ACGTA\ttag3\tlib3\tsample3\tdesc
";
        let result = BarcodeCatalog::from_reader(data.as_bytes());
        assert_matches!(result, Err(DecodeError::UnequalBarcodeLengths { .. }));
        if let Err(DecodeError::UnequalBarcodeLengths { barcode, expected, actual }) = result {
            assert_eq!(barcode, "ACG");
            assert_eq!(expected, 4);
            assert_eq!(actual, 3);
        }
    }

    #[test]
    fn test_duplicate_and_reserved_names() {
        let duplicate = vec![
            BarcodeEntry::new("AAAA", "bc1", "", "", ""),
            BarcodeEntry::new("TTTT", "bc1", "", "", ""),
        ];
        assert_matches!(
            BarcodeCatalog::new(duplicate),
            Err(DecodeError::DuplicateBarcodeName { .. })
        );

        let reserved = vec![BarcodeEntry::new("AAAA", UNASSIGNED_NAME, "", "", "")];
        assert_matches!(
            BarcodeCatalog::new(reserved),
            Err(DecodeError::ReservedBarcodeName { .. })
        );
    }

    #[test]
    fn test_no_calls() {
        assert!(is_no_call(b'N'));
        assert!(is_no_call(b'n'));
        assert!(is_no_call(b'.'));
        assert!(!is_no_call(b'A'));
        assert!(!is_no_call(b'a'));
    }
}
