#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use clap::Parser;
use env_logger::Env;
use itertools::Itertools;

use crate::{
    classifier::{ClassifierThresholds, DEFAULT_CACHE_SIZE},
    processor::DecodeConfig,
    quality::QualityFilter,
    sam::{AlignmentFormat, STDIO_PATH},
    utils::built_info,
};

pub static TOOL_NAME: &str = "tagdecode";

static SHORT_USAGE: &str =
    "Decodes sample barcodes on SAM/BAM records and assigns reads to read groups.";

static LONG_USAGE: &str = "
Decodes sample barcodes on SAM/BAM records and assigns reads to read groups.

The observed barcode is read from the tag given by --barcode-tag-name (BC by default) and matched
against the barcodes in the barcode file.  A read is assigned to the closest barcode if it has at
most --max-mismatches mismatches, at most --max-no-calls no-calls, and the next closest barcode is
at least --min-mismatch-delta mismatches further away.  Otherwise the read is unassigned.

Every read group in the input header is replaced by one read group per barcode, with IDs of the
form <original ID>#<barcode name>; unassigned reads go to <original ID>#0.  The RG tag of each read
is updated to match.  Paired reads must be adjacent, and the mate of a read is given the same read
group as the read.

The barcode file is tab-separated with a header line followed by one line per barcode:

  barcode_sequence  barcode_name  library_name  sample_name  description

Input and output are SAM, or BAM when the path ends in .bam; --input-fmt and --output-fmt override
this, and are needed to read or write BAM through stdin/stdout (`-`).  SAM paths ending in .gz or
.bgz are BGZF compressed.

Example invocation:

tagdecode \\
  --barcode-file barcodes.tsv \\
  --metrics-file metrics.tsv \\
  --output decoded.bam \\
  input.bam
";

#[derive(Parser, Debug, Clone)]
#[clap(name = TOOL_NAME, version = built_info::VERSION.as_str(), about=SHORT_USAGE, long_about=LONG_USAGE, term_width=0)]
pub struct Opts {
    /// Path to the input SAM/BAM, or `-` for stdin.
    #[clap(value_name = "INPUT", conflicts_with = "input", display_order = 1)]
    pub input_positional: Option<PathBuf>,

    /// Path to the input SAM/BAM, or `-` for stdin.  May replace the positional argument.
    #[clap(long, short = 'i', display_order = 1)]
    pub input: Option<PathBuf>,

    /// Path to write the decoded SAM/BAM, or `-` for stdout.
    #[clap(long, short = 'o', default_value = STDIO_PATH, display_order = 2)]
    pub output: PathBuf,

    /// The input format (sam or bam).
    ///
    /// [default: bam if the input path ends in .bam, otherwise sam]
    #[clap(long, display_order = 2)]
    pub input_fmt: Option<AlignmentFormat>,

    /// The output format (sam or bam).
    ///
    /// [default: bam if the output path ends in .bam, otherwise sam]
    #[clap(long, display_order = 2)]
    pub output_fmt: Option<AlignmentFormat>,

    /// Path to the tab-separated barcode file.
    #[clap(long, short = 'b', display_order = 3)]
    pub barcode_file: PathBuf,

    /// Path to write the per-barcode metrics.
    ///
    /// [default: None]
    #[clap(long, display_order = 4)]
    pub metrics_file: Option<PathBuf>,

    /// Convert low quality barcode bases to no-calls before matching.
    #[clap(long, display_order = 11)]
    pub convert_low_quality: bool,

    /// Barcode bases with a quality less than or equal to this value are converted to no-calls.
    ///
    /// Only used with --convert-low-quality.
    #[clap(long, default_value = "15", display_order = 11)]
    pub max_low_quality_to_convert: u8,

    /// Max no-calls (N's) in a barcode before it is considered unmatchable.
    #[clap(long, default_value = "2", display_order = 11)]
    pub max_no_calls: usize,

    /// Number of allowed mismatches between the observed barcode and the expected barcode.
    #[clap(long, default_value = "1", display_order = 11)]
    pub max_mismatches: usize,

    /// The minimum difference in mismatches between the closest and the second closest barcode.
    #[clap(long, default_value = "1", display_order = 11)]
    pub min_mismatch_delta: usize,

    /// Append `#<barcode name>` to the name of every decoded read.
    #[clap(long, display_order = 21)]
    pub change_read_name: bool,

    /// The tag holding the observed barcode.
    #[clap(long, default_value = "BC", display_order = 21)]
    pub barcode_tag_name: String,

    /// The tag holding the observed barcode qualities.
    #[clap(long, default_value = "QT", display_order = 21)]
    pub quality_tag_name: String,

    /// The BGZF compression level (0-9) used for BAM output and SAM paths ending in .gz or .bgz.
    #[clap(long, default_value = "6", display_order = 31)]
    pub compression_level: u8,

    /// Number of distinct observed barcodes whose classification is cached.
    ///
    /// If set to 0 no caching is performed.
    #[clap(long, default_value = "100000", display_order = 31, hide = true)]
    pub classification_cache_size: usize,

    /// Log debug information.
    #[clap(long, short = 'v', display_order = 41)]
    pub verbose: bool,

    /// The command line this tool was invoked with.
    #[clap(skip)]
    pub command_line: String,
}

impl Opts {
    /// The input path, from either the positional argument or `--input`.
    pub fn input_path(&self) -> Result<&Path> {
        self.input_positional
            .as_deref()
            .or_else(|| self.input.as_deref())
            .ok_or_else(|| anyhow!("An input SAM/BAM must be given"))
    }

    /// The input format, from `--input-fmt` or else the input path.
    pub fn input_format(&self) -> Result<AlignmentFormat> {
        match self.input_fmt {
            Some(format) => Ok(format),
            None => Ok(AlignmentFormat::from_path(self.input_path()?)),
        }
    }

    /// The output format, from `--output-fmt` or else the output path.
    pub fn output_format(&self) -> AlignmentFormat {
        self.output_fmt.unwrap_or_else(|| AlignmentFormat::from_path(&self.output))
    }

    /// Extract a [`DecodeConfig`] from the CLI opts.
    pub fn as_decode_config(&self) -> DecodeConfig {
        DecodeConfig {
            barcode_tag: self.barcode_tag_name.clone(),
            quality_tag: self.quality_tag_name.clone(),
            convert_low_quality: self.convert_low_quality,
            quality_filter: QualityFilter::new(self.max_low_quality_to_convert),
            thresholds: ClassifierThresholds {
                max_no_calls: self.max_no_calls,
                max_mismatches: self.max_mismatches,
                min_mismatch_delta: self.min_mismatch_delta,
            },
            change_read_name: self.change_read_name,
        }
    }
}

/// Implement defaults that match the CLI options to allow for easier testing.
///
/// Note that these defaults exist only within test code.
#[cfg(test)]
impl Default for Opts {
    fn default() -> Self {
        Self {
            input_positional: None,
            input: None,
            output: PathBuf::from(STDIO_PATH),
            input_fmt: None,
            output_fmt: None,
            barcode_file: PathBuf::default(),
            metrics_file: None,
            convert_low_quality: false,
            max_low_quality_to_convert: 15,
            max_no_calls: 2,
            max_mismatches: 1,
            min_mismatch_delta: 1,
            change_read_name: false,
            barcode_tag_name: String::from("BC"),
            quality_tag_name: String::from("QT"),
            compression_level: 6,
            classification_cache_size: DEFAULT_CACHE_SIZE,
            verbose: false,
            command_line: String::from(TOOL_NAME),
        }
    }
}

/// Parse args and set up logging
pub fn setup() -> Opts {
    let mut opts = Opts::parse();
    opts.command_line = std::env::args().join(" ");

    let level = if opts.verbose { "debug" } else { "info" };
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", level);
    }
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    opts
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use clap::Parser;

    use super::Opts;
    use crate::{processor::DecodeConfig, sam::AlignmentFormat};

    #[test]
    fn test_defaults_match_decode_config_defaults() {
        let opts = Opts::try_parse_from(["tagdecode", "-b", "barcodes.tsv", "in.sam"]).unwrap();
        assert_eq!(opts.as_decode_config(), DecodeConfig::default());
        assert_eq!(opts.input_path().unwrap(), PathBuf::from("in.sam"));
        assert_eq!(opts.output, PathBuf::from("-"));
        assert_eq!(opts.classification_cache_size, 100_000);
        assert_eq!(opts.metrics_file, None);

        let default = Opts::default();
        assert_eq!(default.as_decode_config(), DecodeConfig::default());
        assert_eq!(default.compression_level, opts.compression_level);
    }

    #[test]
    fn test_input_flag() {
        let opts = Opts::try_parse_from(["tagdecode", "-b", "b.tsv", "-i", "in.sam"]).unwrap();
        assert_eq!(opts.input_path().unwrap(), PathBuf::from("in.sam"));
    }

    #[test]
    fn test_input_is_required() {
        let opts = Opts::try_parse_from(["tagdecode", "-b", "b.tsv"]).unwrap();
        assert!(opts.input_path().is_err());
    }

    #[test]
    fn test_input_given_twice_is_rejected() {
        let result = Opts::try_parse_from(["tagdecode", "-b", "b.tsv", "-i", "a.sam", "b.sam"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_formats_follow_paths() {
        let opts = Opts::try_parse_from(["tagdecode", "-b", "b.tsv", "-o", "out.bam", "in.sam"])
            .unwrap();
        assert_eq!(opts.input_format().unwrap(), AlignmentFormat::Sam);
        assert_eq!(opts.output_format(), AlignmentFormat::Bam);
    }

    #[test]
    fn test_formats_from_options() {
        let opts = Opts::try_parse_from([
            "tagdecode",
            "-b",
            "b.tsv",
            "--input-fmt",
            "bam",
            "--output-fmt",
            "sam",
            "-o",
            "out.bam",
            "-",
        ])
        .unwrap();
        assert_eq!(opts.input_format().unwrap(), AlignmentFormat::Bam);
        assert_eq!(opts.output_format(), AlignmentFormat::Sam);
    }

    #[test]
    fn test_unsupported_format_is_rejected() {
        let result = Opts::try_parse_from(["tagdecode", "-b", "b.tsv", "--input-fmt", "cram", "-"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_as_decode_config() {
        let opts = Opts::try_parse_from([
            "tagdecode",
            "-b",
            "b.tsv",
            "--convert-low-quality",
            "--max-low-quality-to-convert",
            "20",
            "--max-no-calls",
            "0",
            "--max-mismatches",
            "3",
            "--min-mismatch-delta",
            "2",
            "--change-read-name",
            "--barcode-tag-name",
            "B2",
            "--quality-tag-name",
            "Q2",
            "in.sam",
        ])
        .unwrap();
        let config = opts.as_decode_config();
        assert!(config.convert_low_quality);
        assert_eq!(config.quality_filter.max_low_quality_to_convert, 20);
        assert_eq!(config.thresholds.max_no_calls, 0);
        assert_eq!(config.thresholds.max_mismatches, 3);
        assert_eq!(config.thresholds.min_mismatch_delta, 2);
        assert!(config.change_read_name);
        assert_eq!(config.barcode_tag, "B2");
        assert_eq!(config.quality_tag, "Q2");
    }
}
