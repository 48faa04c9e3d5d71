//! SAM and BAM implementations of the record stream and grouping metadata traits, built on
//! `noodles`.
//!
//! SAM is read and written as text, BGZF compressed when the path ends in `.gz` or `.bgz`.  BAM is
//! always BGZF compressed.  `-` means standard input or output.

use std::{
    fmt::{self, Display},
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Read, Write},
    path::Path,
    str::FromStr,
};

use ahash::AHashSet;
use bgzf::CompressionLevel;
use bstr::BString;
use noodles::{
    bam,
    sam::{
        self,
        alignment::{
            io::Write as AlignmentWrite, record::data::field::Tag,
            record_buf::data::field::Value, RecordBuf,
        },
        header::record::value::{
            map::{self, program::tag as program_tag, Program},
            Map,
        },
    },
};

use crate::{
    errors::DecodeError,
    read_group::{Provenance, ReadGroup, ID_TAG},
    record::{GroupingMetadata, Record, RecordReader, RecordWriter},
    utils::s,
};

/// The path that means standard input or output.
pub const STDIO_PATH: &str = "-";

/// The container format of a record stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentFormat {
    Sam,
    Bam,
}

impl AlignmentFormat {
    /// The format implied by the extension of `path`: BAM for `.bam`, SAM for anything else.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        match path.as_ref().extension() {
            Some(ext) if ext.eq_ignore_ascii_case("bam") => Self::Bam,
            _ => Self::Sam,
        }
    }
}

impl FromStr for AlignmentFormat {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sam" => Ok(Self::Sam),
            "bam" => Ok(Self::Bam),
            _ => Err(DecodeError::UnsupportedFormat { format: s.to_string() }),
        }
    }
}

impl Display for AlignmentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sam => write!(f, "SAM"),
            Self::Bam => write!(f, "BAM"),
        }
    }
}

/// True if `path` names a block-compressed file.
pub fn is_bgzf_path<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().extension().map_or(false, |ext| ext == "gz" || ext == "bgz")
}

/// Open `path` for buffered reading, decompressing BGZF if the path or `format` requires it.
pub fn open_input<P: AsRef<Path>>(
    path: P,
    format: AlignmentFormat,
) -> Result<Box<dyn BufRead>, DecodeError> {
    let path = path.as_ref();
    let raw: Box<dyn Read> = if path.as_os_str() == STDIO_PATH {
        Box::new(io::stdin())
    } else {
        Box::new(File::open(path)?)
    };
    if format == AlignmentFormat::Bam || is_bgzf_path(path) {
        Ok(Box::new(BufReader::new(bgzf::Reader::new(BufReader::new(raw)))))
    } else {
        Ok(Box::new(BufReader::new(raw)))
    }
}

/// Open `path` for buffered writing, compressing with `level` if the path or `format` requires it.
pub fn open_output<P: AsRef<Path>>(
    path: P,
    format: AlignmentFormat,
    level: CompressionLevel,
) -> Result<Box<dyn Write>, DecodeError> {
    let path = path.as_ref();
    let raw: Box<dyn Write> = if path.as_os_str() == STDIO_PATH {
        Box::new(io::stdout())
    } else {
        Box::new(File::create(path)?)
    };
    if format == AlignmentFormat::Bam || is_bgzf_path(path) {
        Ok(Box::new(bgzf::Writer::new(BufWriter::new(raw), level)))
    } else {
        Ok(Box::new(BufWriter::new(raw)))
    }
}

fn invalid_header(err: io::Error) -> DecodeError {
    match err.kind() {
        io::ErrorKind::InvalidData => DecodeError::MalformedHeader { line: err.to_string() },
        _ => DecodeError::Io(err),
    }
}

fn invalid_record(err: io::Error, number: u64) -> DecodeError {
    match err.kind() {
        io::ErrorKind::InvalidData => DecodeError::MalformedRecord {
            record: format!("record {}", number),
            reason: err.to_string(),
        },
        _ => DecodeError::Io(err),
    }
}

/// The ID of the program at the end of the `@PG` chain: the first program no other program names
/// as its previous program.
fn last_program_id(header: &sam::Header) -> Option<String> {
    let programs = header.programs().as_ref();

    let mut referenced: AHashSet<&[u8]> = AHashSet::new();
    for program in programs.values() {
        if let Some(previous) = program.other_fields().get(&program_tag::PREVIOUS_PROGRAM_ID) {
            referenced.insert(previous.as_slice());
        }
    }

    programs
        .keys()
        .find(|id| !referenced.contains(id.as_slice()))
        .or_else(|| programs.keys().next())
        .map(|id| id.to_string())
}

/// `name`, or `name.1`, `name.2`, ... if already taken by a program in `header`.
fn unique_program_id(header: &sam::Header, name: &str) -> String {
    let programs = header.programs().as_ref();
    let mut id = name.to_string();
    let mut suffix = 0;
    while programs.contains_key(id.as_bytes()) {
        suffix += 1;
        id = format!("{}.{}", name, suffix);
    }
    id
}

/// The header of a SAM or BAM stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SamHeader(sam::Header);

impl SamHeader {
    /// Wrap a parsed header.
    pub fn new(header: sam::Header) -> Self {
        Self(header)
    }
}

impl AsRef<sam::Header> for SamHeader {
    fn as_ref(&self) -> &sam::Header {
        &self.0
    }
}

impl GroupingMetadata for SamHeader {
    fn read_groups(&self) -> Result<Vec<ReadGroup>, DecodeError> {
        Ok(self
            .0
            .read_groups()
            .iter()
            .map(|(id, group)| {
                let mut fields = vec![(ID_TAG.to_string(), id.to_string())];
                for (tag, value) in group.other_fields() {
                    let tag: &[u8; 2] = tag.as_ref();
                    fields.push((s(tag), value.to_string()));
                }
                ReadGroup::new(fields)
            })
            .collect())
    }

    fn replace_read_groups(&mut self, groups: Vec<ReadGroup>) -> Result<(), DecodeError> {
        let read_groups = self.0.read_groups_mut();
        read_groups.clear();
        for group in &groups {
            let id = group
                .id()
                .ok_or_else(|| DecodeError::MissingReadGroupId { group: group.to_string() })?;
            let mut map = Map::<map::ReadGroup>::default();
            for (tag, value) in group.fields().iter().filter(|(tag, _)| tag != ID_TAG) {
                let tag = <[u8; 2]>::try_from(tag.as_bytes())
                    .map_err(|_| DecodeError::MalformedHeader { line: format!("@RG\t{}", group) })?;
                let tag = map::tag::Other::try_from(tag)
                    .map_err(|_| DecodeError::MalformedHeader { line: format!("@RG\t{}", group) })?;
                map.other_fields_mut().insert(tag, BString::from(value.as_str()));
            }
            read_groups.insert(BString::from(id), map);
        }
        Ok(())
    }

    /// Adds a `@PG` line whose `ID` is unique within the header and whose `PP` references the end
    /// of the existing program chain.
    fn add_provenance(&mut self, provenance: &Provenance) -> Result<(), DecodeError> {
        let previous = last_program_id(&self.0);
        let id = unique_program_id(&self.0, &provenance.name);
        let invalid = |reason: String| DecodeError::MalformedHeader {
            line: format!("@PG\tID:{} ({})", id, reason),
        };

        let mut builder =
            Map::<Program>::builder().insert(program_tag::NAME, provenance.name.as_str());
        if let Some(previous) = &previous {
            builder = builder.insert(program_tag::PREVIOUS_PROGRAM_ID, previous.as_str());
        }
        let program = builder
            .insert(program_tag::VERSION, provenance.version.as_str())
            .insert(program_tag::COMMAND_LINE, provenance.command_line.as_str())
            .build()
            .map_err(|err| invalid(err.to_string()))?;

        self.0
            .programs_mut()
            .add(BString::from(id.as_str()), program)
            .map_err(|err| invalid(err.to_string()))?;
        Ok(())
    }
}

/// The two byte data field tag named by `tag`, if it is a valid tag.
fn field_tag(tag: &str) -> Option<Tag> {
    <[u8; 2]>::try_from(tag.as_bytes()).ok().map(Tag::from)
}

/// A single SAM or BAM record.
#[derive(Debug, Clone, PartialEq)]
pub struct SamRecord(RecordBuf);

impl From<RecordBuf> for SamRecord {
    fn from(record: RecordBuf) -> Self {
        Self(record)
    }
}

impl AsRef<RecordBuf> for SamRecord {
    fn as_ref(&self) -> &RecordBuf {
        &self.0
    }
}

impl Record for SamRecord {
    fn name(&self) -> &[u8] {
        match self.0.name() {
            Some(name) => name,
            None => &[],
        }
    }

    fn set_name(&mut self, name: Vec<u8>) {
        *self.0.name_mut() = Some(BString::from(name));
    }

    /// Only string (`Z`) fields are returned.
    fn tag(&self, tag: &str) -> Option<&[u8]> {
        match self.0.data().get(&field_tag(tag)?) {
            Some(Value::String(value)) => Some(value.as_slice()),
            _ => None,
        }
    }

    fn set_tag(&mut self, tag: &str, value: Vec<u8>) {
        if let Some(tag) = field_tag(tag) {
            self.0.data_mut().insert(tag, Value::String(BString::from(value)));
        }
    }

    fn is_qc_fail(&self) -> bool {
        self.0.flags().is_qc_fail()
    }

    fn is_paired(&self) -> bool {
        self.0.flags().is_segmented()
    }
}

enum RecordSource<R: BufRead> {
    Sam(sam::io::Reader<R>),
    Bam(bam::io::Reader<R>),
}

/// Reads a header and then records from a decompressed SAM or BAM stream.
pub struct AlignmentReader<R: BufRead> {
    source: RecordSource<R>,
    header: SamHeader,
    records_read: u64,
}

impl<R: BufRead> AlignmentReader<R> {
    /// Create a reader, consuming the header from `reader`.
    pub fn new(reader: R, format: AlignmentFormat) -> Result<Self, DecodeError> {
        let (source, header) = match format {
            AlignmentFormat::Sam => {
                let mut reader = sam::io::Reader::new(reader);
                let header = reader.read_header().map_err(invalid_header)?;
                (RecordSource::Sam(reader), header)
            }
            AlignmentFormat::Bam => {
                let mut reader = bam::io::Reader::from(reader);
                let header = reader.read_header().map_err(invalid_header)?;
                (RecordSource::Bam(reader), header)
            }
        };
        Ok(Self { source, header: SamHeader::new(header), records_read: 0 })
    }

    /// The header read from the input.
    pub fn header(&self) -> &SamHeader {
        &self.header
    }
}

impl<R: BufRead> RecordReader for AlignmentReader<R> {
    type Record = SamRecord;

    fn read_record(&mut self) -> Result<Option<SamRecord>, DecodeError> {
        let mut record = RecordBuf::default();
        let header = self.header.as_ref();
        let read = match &mut self.source {
            RecordSource::Sam(reader) => reader.read_record_buf(header, &mut record),
            RecordSource::Bam(reader) => reader.read_record_buf(header, &mut record),
        }
        .map_err(|err| invalid_record(err, self.records_read + 1))?;

        if read == 0 {
            return Ok(None);
        }
        self.records_read += 1;
        Ok(Some(SamRecord(record)))
    }
}

enum RecordSink<W: Write> {
    Sam(sam::io::Writer<W>),
    Bam(bam::io::Writer<W>),
}

/// Writes a header and then records to a SAM or BAM sink.
pub struct AlignmentWriter<W: Write> {
    sink: RecordSink<W>,
    header: sam::Header,
}

impl<W: Write> AlignmentWriter<W> {
    /// Create a writer, writing `header` to `writer` first.  BAM output must already be wrapped in
    /// a BGZF writer, as returned by [`open_output`].
    pub fn new(
        writer: W,
        header: &SamHeader,
        format: AlignmentFormat,
    ) -> Result<Self, DecodeError> {
        let header = header.as_ref().clone();
        let sink = match format {
            AlignmentFormat::Sam => {
                let mut writer = sam::io::Writer::new(writer);
                writer.write_header(&header)?;
                RecordSink::Sam(writer)
            }
            AlignmentFormat::Bam => {
                let mut writer = bam::io::Writer::from(writer);
                writer.write_header(&header)?;
                RecordSink::Bam(writer)
            }
        };
        Ok(Self { sink, header })
    }
}

impl<W: Write> RecordWriter<SamRecord> for AlignmentWriter<W> {
    fn write_record(&mut self, record: &SamRecord) -> Result<(), DecodeError> {
        match &mut self.sink {
            RecordSink::Sam(writer) => writer.write_alignment_record(&self.header, &record.0)?,
            RecordSink::Bam(writer) => writer.write_alignment_record(&self.header, &record.0)?,
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), DecodeError> {
        match &mut self.sink {
            RecordSink::Sam(writer) => {
                writer.finish(&self.header)?;
                writer.get_mut().flush()?;
            }
            RecordSink::Bam(writer) => {
                writer.finish(&self.header)?;
                writer.get_mut().flush()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use matches::assert_matches;
    use rstest::rstest;
    use tempfile::tempdir;

    use super::*;
    use crate::utils::test_commons::{header_lines, record_lines};

    const RECORD: &str = "q1\t77\t*\t0\t0\t*\t*\t0\t0\tACGT\tIIII\tBC:Z:AAAA\tRG:Z:1";

    fn provenance() -> Provenance {
        Provenance {
            name: String::from("tagdecode"),
            version: String::from("0.1.0"),
            command_line: String::from("tagdecode -b barcodes.tsv in.sam"),
        }
    }

    fn header(lines: &[&str]) -> SamHeader {
        let text: String = lines.iter().map(|line| format!("{}\n", line)).collect();
        SamHeader::new(text.parse().unwrap())
    }

    fn read_one(line: &str) -> SamRecord {
        let mut reader = AlignmentReader::new(line.as_bytes(), AlignmentFormat::Sam).unwrap();
        reader.read_record().unwrap().unwrap()
    }

    #[test]
    fn test_record_fields() {
        let record = read_one(RECORD);
        assert_eq!(record.name(), b"q1");
        assert!(record.is_paired());
        assert!(!record.is_qc_fail());
        assert_eq!(record.tag("BC"), Some(&b"AAAA"[..]));
        assert_eq!(record.tag("QT"), None);
        assert_eq!(record.tag("BCX"), None);
        assert_eq!(record_lines(&SamHeader::default(), &[record]), vec![RECORD]);
    }

    #[test]
    fn test_set_tag_and_name() {
        let mut record = read_one(RECORD);
        record.set_tag("RG", b"1#bc1".to_vec());
        record.set_tag("XX", b"new".to_vec());
        record.set_name(b"q1#bc1".to_vec());
        assert_eq!(
            record_lines(&SamHeader::default(), &[record]),
            vec!["q1#bc1\t77\t*\t0\t0\t*\t*\t0\t0\tACGT\tIIII\tBC:Z:AAAA\tRG:Z:1#bc1\tXX:Z:new"]
        );
    }

    #[rstest]
    #[case(4, false, false)]
    #[case(1, true, false)]
    #[case(512, false, true)]
    #[case(513, true, true)]
    fn test_flags(#[case] flag: u16, #[case] paired: bool, #[case] qc_fail: bool) {
        let record = read_one(&format!("q\t{}\t*\t0\t0\t*\t*\t0\t0\tA\tI", flag));
        assert_eq!(record.is_paired(), paired);
        assert_eq!(record.is_qc_fail(), qc_fail);
    }

    #[test]
    fn test_malformed_record() {
        let mut reader =
            AlignmentReader::new(&b"q\tx\t*\t0\t0\t*\t*\t0\t0\tA\tI\n"[..], AlignmentFormat::Sam)
                .unwrap();
        assert_matches!(reader.read_record(), Err(DecodeError::MalformedRecord { .. }));
    }

    #[test]
    fn test_reader() {
        let input = format!("@HD\tVN:1.6\n@RG\tID:1\tPL:ILLUMINA\n{}\n{}\n", RECORD, RECORD);
        let mut reader = AlignmentReader::new(input.as_bytes(), AlignmentFormat::Sam).unwrap();
        assert_eq!(header_lines(reader.header()), vec!["@HD\tVN:1.6", "@RG\tID:1\tPL:ILLUMINA"]);
        assert!(reader.read_record().unwrap().is_some());
        assert!(reader.read_record().unwrap().is_some());
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_reader_no_header() {
        let mut reader = AlignmentReader::new(RECORD.as_bytes(), AlignmentFormat::Sam).unwrap();
        assert!(header_lines(reader.header()).is_empty());
        assert!(reader.read_record().unwrap().is_some());
    }

    #[test]
    fn test_read_groups() {
        let header = header(&["@HD\tVN:1.6", "@RG\tID:1\tPU:unit\tDS:a:b", "@RG\tID:2"]);
        let groups = header.read_groups().unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].id(), Some("1"));
        assert_eq!(groups[0].get("PU"), Some("unit"));
        assert_eq!(groups[0].get("DS"), Some("a:b"));
        assert_eq!(groups[1].id(), Some("2"));
    }

    #[test]
    fn test_replace_read_groups() {
        let mut header = header(&["@HD\tVN:1.6", "@RG\tID:1", "@RG\tID:2", "@PG\tID:bwa"]);
        let groups = vec![
            ReadGroup::new(vec![(String::from("ID"), String::from("1#0"))]),
            ReadGroup::new(vec![
                (String::from("ID"), String::from("1#bc1")),
                (String::from("PU"), String::from("unit#bc1")),
            ]),
        ];
        header.replace_read_groups(groups).unwrap();
        assert_eq!(
            header_lines(&header),
            vec!["@HD\tVN:1.6", "@RG\tID:1#0", "@RG\tID:1#bc1\tPU:unit#bc1", "@PG\tID:bwa"]
        );
    }

    #[test]
    fn test_replace_read_groups_rejects_invalid_tag() {
        let mut header = header(&["@HD\tVN:1.6"]);
        let groups = vec![ReadGroup::new(vec![
            (String::from("ID"), String::from("x")),
            (String::from("LONG"), String::from("y")),
        ])];
        assert_matches!(
            header.replace_read_groups(groups),
            Err(DecodeError::MalformedHeader { .. })
        );
    }

    #[test]
    fn test_add_provenance_first_program() {
        let mut header = header(&["@HD\tVN:1.6"]);
        header.add_provenance(&provenance()).unwrap();
        assert_eq!(
            header_lines(&header)[1],
            "@PG\tID:tagdecode\tPN:tagdecode\tVN:0.1.0\tCL:tagdecode -b barcodes.tsv in.sam"
        );
    }

    #[test]
    fn test_add_provenance_unique_id_and_chain() {
        let mut header = header(&[
            "@PG\tID:tagdecode\tPN:tagdecode",
            "@PG\tID:tagdecode.1\tPN:tagdecode\tPP:tagdecode",
            "@PG\tID:samtools\tPN:samtools\tPP:tagdecode.1",
        ]);
        header.add_provenance(&provenance()).unwrap();
        let lines = header_lines(&header);
        assert!(lines
            .last()
            .unwrap()
            .starts_with("@PG\tID:tagdecode.2\tPN:tagdecode\tPP:samtools\tVN:0.1.0"));
    }

    #[test]
    fn test_add_provenance_chains_to_end_of_unordered_programs() {
        let mut header = header(&["@PG\tID:b\tPN:b\tPP:a", "@PG\tID:a\tPN:a"]);
        header.add_provenance(&provenance()).unwrap();
        let lines = header_lines(&header);
        assert!(lines.last().unwrap().starts_with("@PG\tID:tagdecode\tPN:tagdecode\tPP:b\t"));
    }

    #[rstest]
    #[case("out.sam", AlignmentFormat::Sam)]
    #[case("out.sam.gz", AlignmentFormat::Sam)]
    #[case("out.bam", AlignmentFormat::Bam)]
    #[case("OUT.BAM", AlignmentFormat::Bam)]
    #[case("-", AlignmentFormat::Sam)]
    fn test_format_from_path(#[case] path: &str, #[case] expected: AlignmentFormat) {
        assert_eq!(AlignmentFormat::from_path(path), expected);
    }

    #[rstest]
    #[case("sam", Some(AlignmentFormat::Sam))]
    #[case("BAM", Some(AlignmentFormat::Bam))]
    #[case("cram", None)]
    fn test_format_from_str(#[case] value: &str, #[case] expected: Option<AlignmentFormat>) {
        assert_eq!(value.parse::<AlignmentFormat>().ok(), expected);
    }

    #[rstest]
    #[case("out.sam", false)]
    #[case("out.sam.gz", true)]
    #[case("out.bgz", true)]
    #[case("-", false)]
    fn test_is_bgzf_path(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(is_bgzf_path(path), expected);
    }

    #[rstest]
    #[case("reads.sam", AlignmentFormat::Sam)]
    #[case("reads.sam.gz", AlignmentFormat::Sam)]
    #[case("reads.bam", AlignmentFormat::Bam)]
    fn test_round_trip_through_files(#[case] name: &str, #[case] format: AlignmentFormat) {
        let dir = tempdir().unwrap();
        let path = dir.path().join(name);
        let header = header(&["@HD\tVN:1.6", "@RG\tID:1"]);
        {
            let output = open_output(&path, format, CompressionLevel::new(2).unwrap()).unwrap();
            let mut writer = AlignmentWriter::new(output, &header, format).unwrap();
            writer.write_record(&read_one(RECORD)).unwrap();
            writer.finish().unwrap();
        }

        let compressed = format == AlignmentFormat::Bam || is_bgzf_path(&path);
        let raw = std::fs::read(&path).unwrap();
        assert_eq!(raw.starts_with(&[0x1f, 0x8b]), compressed);

        let mut reader = AlignmentReader::new(open_input(&path, format).unwrap(), format).unwrap();
        assert_eq!(reader.header(), &header);
        let record = reader.read_record().unwrap().unwrap();
        assert_eq!(record_lines(&header, &[record]), vec![RECORD]);
        assert!(reader.read_record().unwrap().is_none());
    }

    #[test]
    fn test_bam_is_not_read_as_text() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("in.bam");
        let header = header(&["@HD\tVN:1.6"]);
        let level = CompressionLevel::new(2).unwrap();
        {
            let output = open_output(&path, AlignmentFormat::Bam, level).unwrap();
            let mut writer = AlignmentWriter::new(output, &header, AlignmentFormat::Bam).unwrap();
            writer.write_record(&read_one(RECORD)).unwrap();
            writer.finish().unwrap();
        }
        let format = AlignmentFormat::from_path(&path);
        let mut reader = AlignmentReader::new(open_input(&path, format).unwrap(), format).unwrap();
        assert_eq!(reader.read_record().unwrap().unwrap().tag("BC"), Some(&b"AAAA"[..]));
    }
}
