//! Functionality pertaining to the collection of metrics during decoding.
//!
//! A [`MetricsAggregator`] holds one [`BarcodeCounts`] per entry in the [`BarcodeCatalog`],
//! including the unassigned entry.  Counts are updated once per read that carries a barcode, after
//! the read has been classified.
//!
//! Once all reads are processed, [`MetricsAggregator::report`] derives one [`BarcodeMetric`] per
//! real barcode followed by a final row for the unassigned reads, and
//! [`MetricsAggregator::write_report`] writes them as a tab-delimited file preceded by a block of
//! `#` comment lines recording the thresholds used.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize, Serializer};

use crate::{
    barcode_catalog::{BarcodeCatalog, BarcodeEntry, UNASSIGNED_INDEX},
    classifier::count_mismatches,
    processor::DecodeConfig,
};

/// The raw counts for one catalogue entry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BarcodeCounts {
    /// The number of reads assigned to this entry.
    pub reads: u64,
    /// The number of assigned reads passing the instrument's quality filter.
    pub pf_reads: u64,
    /// The number of assigned reads whose barcode matched with no mismatches.
    pub perfect_matches: u64,
    /// The number of assigned pass-filter reads whose barcode matched with no mismatches.
    pub pf_perfect_matches: u64,
    /// The number of assigned reads whose barcode matched with one mismatch.
    pub one_mismatch_matches: u64,
    /// The number of assigned pass-filter reads whose barcode matched with one mismatch.
    pub pf_one_mismatch_matches: u64,
}

impl BarcodeCounts {
    /// Update the counts with one read at the given mismatch distance.
    pub fn update_with_read(&mut self, mismatches: usize, passes_filter: bool) {
        self.reads += 1;
        if passes_filter {
            self.pf_reads += 1;
        }
        if mismatches == 0 {
            self.perfect_matches += 1;
            if passes_filter {
                self.pf_perfect_matches += 1;
            }
        } else if mismatches == 1 {
            self.one_mismatch_matches += 1;
            if passes_filter {
                self.pf_one_mismatch_matches += 1;
            }
        }
    }
}

/// Accumulates [`BarcodeCounts`] for every entry of a catalogue.
#[derive(Debug, Clone)]
pub struct MetricsAggregator<'a> {
    catalog: &'a BarcodeCatalog,
    counts: Vec<BarcodeCounts>,
}

impl<'a> MetricsAggregator<'a> {
    /// Create a new [`MetricsAggregator`] with zeroed counts for every entry of `catalog`.
    pub fn new(catalog: &'a BarcodeCatalog) -> Self {
        Self { catalog, counts: vec![BarcodeCounts::default(); catalog.len()] }
    }

    /// Record a read assigned to the entry at `index` with the given observed barcode.
    ///
    /// The observed barcode must be the same sequence that was used to classify the read.  The
    /// mismatch distance is recomputed against the entry's sequence; for the unassigned entry the
    /// all no-call sequence makes it zero, and perfect matches are not reported for that entry.
    pub fn record(&mut self, index: usize, observed: &[u8], passes_filter: bool) {
        let mismatches = count_mismatches(&self.catalog.entry(index).sequence, observed);
        self.counts[index].update_with_read(mismatches, passes_filter);
    }

    /// The counts for the entry at `index`.
    pub fn counts(&self, index: usize) -> &BarcodeCounts {
        &self.counts[index]
    }

    /// The total number of reads recorded across all entries.
    pub fn total_reads(&self) -> u64 {
        self.counts.iter().map(|c| c.reads).sum()
    }

    /// The number of reads recorded for the real barcodes.
    pub fn assigned_reads(&self) -> u64 {
        self.total_reads() - self.counts[UNASSIGNED_INDEX].reads
    }

    /// Derive the per-barcode metrics, one row per real barcode in catalogue order followed by a
    /// row for the unassigned reads.
    pub fn report(&self) -> Vec<BarcodeMetric> {
        let assigned = &self.counts[UNASSIGNED_INDEX + 1..];
        let totals = ReportTotals {
            total_reads: self.counts.iter().map(|c| c.reads).sum(),
            total_pf_reads: self.counts.iter().map(|c| c.pf_reads).sum(),
            max_reads: assigned.iter().map(|c| c.reads).max().unwrap_or(0),
            max_pf_reads: assigned.iter().map(|c| c.pf_reads).max().unwrap_or(0),
            total_pf_reads_assigned: assigned.iter().map(|c| c.pf_reads).sum(),
            num_barcodes: assigned.len() as u64,
        };

        let mut metrics: Vec<BarcodeMetric> = self
            .catalog
            .entries()
            .iter()
            .zip(self.counts.iter())
            .skip(UNASSIGNED_INDEX + 1)
            .map(|(entry, counts)| {
                BarcodeMetric::from_counts(
                    entry.sequence.to_string(),
                    entry.name.clone(),
                    entry,
                    counts,
                    &totals,
                    totals.total_pf_reads_assigned,
                )
            })
            .collect();

        // The unassigned entry has no name, no meaningful perfect matches, and is not normalized
        let unassigned = self.catalog.unassigned();
        let counts = BarcodeCounts {
            perfect_matches: 0,
            pf_perfect_matches: 0,
            ..self.counts[UNASSIGNED_INDEX]
        };
        metrics.push(BarcodeMetric::from_counts(
            unassigned.sequence.to_string(),
            String::new(),
            unassigned,
            &counts,
            &totals,
            0,
        ));
        metrics
    }

    /// Write the report to `output`, preceded by a comment block listing the thresholds in
    /// `config`.
    pub fn write_report<P: AsRef<Path>>(&self, output: P, config: &DecodeConfig) -> Result<()> {
        let output = output.as_ref();
        let mut writer = BufWriter::new(
            File::create(output)
                .with_context(|| format!("Unable to create file: {}", output.to_string_lossy()))?,
        );
        writeln!(writer, "##")?;
        writeln!(
            writer,
            "# BARCODE_TAG_NAME={} MAX_MISMATCHES={} MIN_MISMATCH_DELTA={} MAX_NO_CALLS={} \
             CONVERT_LOW_QUALITY={} MAX_LOW_QUALITY_TO_CONVERT={}",
            config.barcode_tag,
            config.thresholds.max_mismatches,
            config.thresholds.min_mismatch_delta,
            config.thresholds.max_no_calls,
            config.convert_low_quality,
            config.quality_filter.max_low_quality_to_convert,
        )?;
        writeln!(writer, "##")?;

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .quote_style(csv::QuoteStyle::Never)
            .has_headers(true)
            .from_writer(writer);
        for metric in self.report() {
            writer.serialize(metric)?;
        }
        writer.flush().with_context(|| format!("Failed to write {}", output.to_string_lossy()))?;
        Ok(())
    }
}

/// Run level values used as denominators when deriving the per-barcode fractions.
struct ReportTotals {
    /// Reads across all entries, including unassigned.
    total_reads: u64,
    /// Pass-filter reads across all entries, including unassigned.
    total_pf_reads: u64,
    /// The most reads assigned to any real barcode.
    max_reads: u64,
    /// The most pass-filter reads assigned to any real barcode.
    max_pf_reads: u64,
    /// Pass-filter reads assigned to real barcodes.
    total_pf_reads_assigned: u64,
    /// The number of real barcodes.
    num_barcodes: u64,
}

/// `numerator / denominator`, or zero if the denominator is zero.
fn fraction(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Serialize a fraction with six decimal places.
fn six_decimals<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{:.6}", value))
}

/// The final per-barcode metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct BarcodeMetric {
    /// The barcode bases.
    pub barcode: String,
    /// The barcode name, empty for the unassigned reads.
    pub barcode_name: String,
    /// The library name from the barcode file.
    pub library_name: String,
    /// The sample name from the barcode file.
    pub sample_name: String,
    /// The description from the barcode file.
    pub description: String,
    /// The number of reads assigned to the barcode.
    pub reads: u64,
    /// The number of pass-filter reads assigned to the barcode.
    pub pf_reads: u64,
    /// The number of reads matching the barcode perfectly.
    pub perfect_matches: u64,
    /// The number of pass-filter reads matching the barcode perfectly.
    pub pf_perfect_matches: u64,
    /// The number of reads matching the barcode with one mismatch.
    pub one_mismatch_matches: u64,
    /// The number of pass-filter reads matching the barcode with one mismatch.
    pub pf_one_mismatch_matches: u64,
    /// The fraction of all reads assigned to this barcode.
    #[serde(serialize_with = "six_decimals")]
    pub pct_matches: f64,
    /// The reads for this barcode relative to the reads for the most prevalent barcode.  For the
    /// unassigned row this may exceed one.
    #[serde(serialize_with = "six_decimals")]
    pub ratio_to_best_pct: f64,
    /// The fraction of all pass-filter reads assigned to this barcode.
    #[serde(serialize_with = "six_decimals")]
    pub pf_pct_matches: f64,
    /// The pass-filter reads for this barcode relative to the most prevalent barcode.
    #[serde(serialize_with = "six_decimals")]
    pub pf_ratio_to_best_pct: f64,
    /// The pass-filter reads for this barcode relative to the mean pass-filter reads per barcode.
    /// This is exactly 1 for every barcode when reads are spread evenly.
    #[serde(serialize_with = "six_decimals")]
    pub pf_normalized_matches: f64,
}

impl BarcodeMetric {
    fn from_counts(
        barcode: String,
        barcode_name: String,
        entry: &BarcodeEntry,
        counts: &BarcodeCounts,
        totals: &ReportTotals,
        total_pf_reads_assigned: u64,
    ) -> Self {
        Self {
            barcode,
            barcode_name,
            library_name: entry.library.clone(),
            sample_name: entry.sample.clone(),
            description: entry.description.clone(),
            reads: counts.reads,
            pf_reads: counts.pf_reads,
            perfect_matches: counts.perfect_matches,
            pf_perfect_matches: counts.pf_perfect_matches,
            one_mismatch_matches: counts.one_mismatch_matches,
            pf_one_mismatch_matches: counts.pf_one_mismatch_matches,
            pct_matches: fraction(counts.reads, totals.total_reads),
            ratio_to_best_pct: fraction(counts.reads, totals.max_reads),
            pf_pct_matches: fraction(counts.pf_reads, totals.total_pf_reads),
            pf_ratio_to_best_pct: fraction(counts.pf_reads, totals.max_pf_reads),
            pf_normalized_matches: fraction(
                counts.pf_reads * totals.num_barcodes,
                total_pf_reads_assigned,
            ),
        }
    }
}
