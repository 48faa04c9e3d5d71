//! The per-record decoding loop.
//!
//! For each record read from the input: if it carries a barcode it is cleaned, classified,
//! counted, and tagged with its new read group; the record is then written.  If the record is
//! paired its mate is read next and given the same read group (and read name suffix) without being
//! classified on its own.

use bstr::BString;
use log::warn;

use crate::{
    barcode_catalog::{BarcodeCatalog, UNASSIGNED_INDEX},
    classifier::{Classifier, ClassifierThresholds},
    errors::DecodeError,
    metrics::MetricsAggregator,
    quality::{fit_to_tag_length, QualityFilter},
    read_group::with_barcode_suffix,
    record::{Record, RecordReader, RecordWriter},
    utils::s,
};

/// The default tag holding the observed barcode.
pub const DEFAULT_BARCODE_TAG: &str = "BC";
/// The default tag holding the observed barcode qualities.
pub const DEFAULT_QUALITY_TAG: &str = "QT";
/// The tag holding the read group.
pub const READ_GROUP_TAG: &str = "RG";
/// The default quality at or below which barcode bases are converted to no-calls.
pub const DEFAULT_MAX_LOW_QUALITY_TO_CONVERT: u8 = 15;

/// The parameters that control decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeConfig {
    /// The tag holding the observed barcode.
    pub barcode_tag: String,
    /// The tag holding the observed barcode qualities.
    pub quality_tag: String,
    /// If true, low quality barcode bases are converted to no-calls before classification.
    pub convert_low_quality: bool,
    /// The quality filter applied when `convert_low_quality` is set.
    pub quality_filter: QualityFilter,
    /// The thresholds used to accept a barcode match.
    pub thresholds: ClassifierThresholds,
    /// If true, `#<barcode name>` is appended to every decoded read name.
    pub change_read_name: bool,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            barcode_tag: DEFAULT_BARCODE_TAG.to_string(),
            quality_tag: DEFAULT_QUALITY_TAG.to_string(),
            convert_low_quality: false,
            quality_filter: QualityFilter::new(DEFAULT_MAX_LOW_QUALITY_TO_CONVERT),
            thresholds: ClassifierThresholds::default(),
            change_read_name: false,
        }
    }
}

/// Whether [`RecordProcessor::process_next`] handled a record or hit the end of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Processed,
    EndOfStream,
}

/// Run level counts, logged when decoding completes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessSummary {
    /// Every record written, mates included.
    pub records: u64,
    /// Primary records that carried a barcode.
    pub records_with_barcode: u64,
    /// Records with a barcode assigned to a real barcode.
    pub assigned: u64,
    /// Records with a barcode that could not be assigned.
    pub unassigned: u64,
    /// Records whose barcode quality length did not match the barcode length.
    pub quality_length_mismatches: u64,
}

/// Decodes records one (or one pair) at a time, accumulating metrics.
pub struct RecordProcessor<'a, C: Classifier> {
    config: &'a DecodeConfig,
    catalog: &'a BarcodeCatalog,
    classifier: C,
    metrics: MetricsAggregator<'a>,
    summary: ProcessSummary,
}

impl<'a, C: Classifier> RecordProcessor<'a, C> {
    /// Create a new [`RecordProcessor`].  The classifier must classify against `catalog`.
    pub fn new(config: &'a DecodeConfig, catalog: &'a BarcodeCatalog, classifier: C) -> Self {
        Self {
            config,
            catalog,
            classifier,
            metrics: MetricsAggregator::new(catalog),
            summary: ProcessSummary::default(),
        }
    }

    /// The metrics accumulated so far.
    pub fn metrics(&self) -> &MetricsAggregator<'a> {
        &self.metrics
    }

    /// The counts accumulated so far.
    pub fn summary(&self) -> &ProcessSummary {
        &self.summary
    }

    /// Process every remaining record of `reader`, writing them to `writer`.
    pub fn run<R, W>(
        &mut self,
        reader: &mut R,
        writer: &mut W,
    ) -> Result<ProcessSummary, DecodeError>
    where
        R: RecordReader,
        W: RecordWriter<R::Record>,
    {
        while self.process_next(reader, writer)? == ProcessStatus::Processed {}
        writer.finish()?;
        Ok(self.summary)
    }

    /// Read, decode, and write the next record, and its mate if it is paired.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::MissingMate`] if a paired record is the last record in the input
    /// - any error reading or writing records
    pub fn process_next<R, W>(
        &mut self,
        reader: &mut R,
        writer: &mut W,
    ) -> Result<ProcessStatus, DecodeError>
    where
        R: RecordReader,
        W: RecordWriter<R::Record>,
    {
        let mut record = match reader.read_record()? {
            Some(record) => record,
            None => return Ok(ProcessStatus::EndOfStream),
        };
        let barcode_name = self.decode(&mut record);
        writer.write_record(&record)?;
        self.summary.records += 1;

        if record.is_paired() {
            let mut mate = reader.read_record()?.ok_or_else(|| DecodeError::MissingMate {
                name: s(record.name()),
            })?;
            if let Some(barcode_name) = &barcode_name {
                self.tag(&mut mate, barcode_name);
            }
            writer.write_record(&mate)?;
            self.summary.records += 1;
        }
        Ok(ProcessStatus::Processed)
    }

    /// Classify `record` by its barcode and tag it with the result.
    ///
    /// Returns the name of the assigned barcode, or `None` if the record has no barcode, in which
    /// case it is left untouched.
    fn decode<T: Record>(&mut self, record: &mut T) -> Option<String> {
        let raw = record.tag(&self.config.barcode_tag)?;
        self.summary.records_with_barcode += 1;

        let cleaned = if self.config.convert_low_quality {
            let quality = record.tag(&self.config.quality_tag);
            match self.config.quality_filter.clean(raw, quality) {
                Ok(cleaned) => cleaned,
                Err(err) => {
                    warn!("{} on read {}", err, s(record.name()));
                    self.summary.quality_length_mismatches += 1;
                    BString::from(raw)
                }
            }
        } else {
            BString::from(raw)
        };
        let observed = fit_to_tag_length(cleaned, self.catalog.tag_length());

        let index = self.classifier.classify(&observed);
        self.metrics.record(index, &observed, !record.is_qc_fail());
        if index == UNASSIGNED_INDEX {
            self.summary.unassigned += 1;
        } else {
            self.summary.assigned += 1;
        }

        let barcode_name = self.catalog.entry(index).name.clone();
        self.tag(record, &barcode_name);
        Some(barcode_name)
    }

    /// Append `#<barcode name>` to the read group, and to the read name if configured.
    fn tag<T: Record>(&self, record: &mut T, barcode_name: &str) {
        let read_group = record.tag(READ_GROUP_TAG).map(s);
        let read_group = with_barcode_suffix(read_group.as_deref().unwrap_or(""), barcode_name);
        record.set_tag(READ_GROUP_TAG, read_group.into_bytes());

        if self.config.change_read_name {
            let name = with_barcode_suffix(&s(record.name()), barcode_name);
            record.set_name(name.into_bytes());
        }
    }
}
