use anyhow::{anyhow, ensure, Context, Result};
use bgzf::CompressionLevel;
use log::{debug, info};

use crate::{
    barcode_catalog::BarcodeCatalog,
    classifier::{CachedClassifier, Classifier, MismatchClassifier},
    metrics::MetricsAggregator,
    opts::{Opts, TOOL_NAME},
    processor::{DecodeConfig, ProcessSummary, RecordProcessor},
    read_group::{self, Provenance},
    sam::{open_input, open_output, AlignmentReader, AlignmentWriter},
    utils::built_info,
};

/// The largest supported BGZF compression level.
const MAX_COMPRESSION_LEVEL: u8 = 9;

/// The length of a record data field tag.
const TAG_LENGTH: usize = 2;

/// Run barcode decoding end to end.
pub fn run(opts: Opts) -> Result<(), anyhow::Error> {
    let input = opts.input_path()?.to_path_buf();
    let input_format = opts.input_format()?;
    let output_format = opts.output_format();
    let config = opts.as_decode_config();
    debug!("Decoding with {:?}", config);

    // Preflight checks
    ensure!(
        opts.compression_level <= MAX_COMPRESSION_LEVEL,
        "Compression level must be between 0 and {}, found {}",
        MAX_COMPRESSION_LEVEL,
        opts.compression_level
    );
    for tag in [&config.barcode_tag, &config.quality_tag] {
        ensure!(tag.len() == TAG_LENGTH, "Tag names must be two characters, found '{}'", tag);
    }
    let compression_level = CompressionLevel::new(opts.compression_level)
        .map_err(|_| anyhow!("Invalid compression level: {}", opts.compression_level))?;

    let catalog = BarcodeCatalog::from_path(&opts.barcode_file).with_context(|| {
        format!("Failed to load barcode file: {}", opts.barcode_file.to_string_lossy())
    })?;
    info!(
        "Loaded {} barcodes of length {} from {}",
        catalog.num_barcodes(),
        catalog.tag_length(),
        opts.barcode_file.to_string_lossy()
    );

    let reader = open_input(&input, input_format)
        .with_context(|| format!("Unable to open input: {}", input.to_string_lossy()))?;
    let mut reader = AlignmentReader::new(reader, input_format)
        .with_context(|| format!("Failed to read header from: {}", input.to_string_lossy()))?;

    let mut header = reader.header().clone();
    let provenance = Provenance {
        name: TOOL_NAME.to_string(),
        version: built_info::VERSION.clone(),
        command_line: opts.command_line.clone(),
    };
    let num_groups = read_group::rewrite(&mut header, &catalog, &provenance)
        .with_context(|| format!("Failed to rewrite read groups of: {}", input.to_string_lossy()))?;
    info!("Rewrote header with {} read groups", num_groups);

    let writer = open_output(&opts.output, output_format, compression_level)
        .with_context(|| format!("Unable to create output: {}", opts.output.to_string_lossy()))?;
    let mut writer = AlignmentWriter::new(writer, &header, output_format)
        .with_context(|| format!("Failed to write header to: {}", opts.output.to_string_lossy()))?;
    info!("Decoding {} input to {} output", input_format, output_format);

    if opts.classification_cache_size == 0 {
        let classifier = MismatchClassifier::new(&catalog, config.thresholds);
        decode_records(&opts, &config, &catalog, classifier, &mut reader, &mut writer)
    } else {
        let classifier =
            CachedClassifier::new(&catalog, config.thresholds, opts.classification_cache_size);
        decode_records(&opts, &config, &catalog, classifier, &mut reader, &mut writer)
    }
}

/// Decode every record from `reader` to `writer` with `classifier`, then log the summary and
/// write the metrics.
fn decode_records<C, R, W>(
    opts: &Opts,
    config: &DecodeConfig,
    catalog: &BarcodeCatalog,
    classifier: C,
    reader: &mut AlignmentReader<R>,
    writer: &mut AlignmentWriter<W>,
) -> Result<()>
where
    C: Classifier,
    R: std::io::BufRead,
    W: std::io::Write,
{
    info!("Decoding records");
    let mut processor = RecordProcessor::new(config, catalog, classifier);
    let summary = processor.run(reader, writer).with_context(|| {
        format!("Failed to decode records to: {}", opts.output.to_string_lossy())
    })?;
    log_summary(&summary, processor.metrics());

    if let Some(metrics_file) = &opts.metrics_file {
        processor.metrics().write_report(metrics_file, config)?;
        info!("Wrote metrics to {}", metrics_file.to_string_lossy());
    }
    Ok(())
}

fn log_summary(summary: &ProcessSummary, metrics: &MetricsAggregator) {
    info!("Processed {} records, {} with a barcode", summary.records, summary.records_with_barcode);
    info!(
        "Assigned {} of {} barcoded reads, {} unassigned",
        metrics.assigned_reads(),
        metrics.total_reads(),
        summary.unassigned
    );
    if summary.quality_length_mismatches > 0 {
        info!(
            "{} barcodes had a quality length mismatch and were matched without conversion",
            summary.quality_length_mismatches
        );
    }
}
