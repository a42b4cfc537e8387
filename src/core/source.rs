use crate::core::error::{PipelineError, Result};
use crate::core::io::{self, InputKind, LineInput, RecordFormat};
use crate::core::metadata;
use noodles::{bam, bgzf};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};

const BAM_READ_BUF: usize = 1024 * 1024;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FormatHint {
    #[default]
    Auto,
    Fastq,
    Bam,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FastqEntry {
    pub header: Vec<u8>,
    pub seq: Vec<u8>,
    pub qual: Vec<u8>,
}

impl FastqEntry {
    pub fn id(&self) -> String {
        let header = self.header.strip_prefix(b"@").unwrap_or(&self.header);
        let end = header
            .iter()
            .position(|b| b.is_ascii_whitespace())
            .unwrap_or(header.len());
        String::from_utf8_lossy(&header[..end]).into_owned()
    }
}

#[derive(Clone, Debug)]
pub enum RawEntry {
    Fastq(FastqEntry),
    Bam(bam::Record),
}

type BamReader = bam::io::Reader<bgzf::io::Reader<BufReader<File>>>;

enum Reader {
    Fastq {
        input: LineInput,
        path: PathBuf,
        records: u64,
        line: Vec<u8>,
    },
    Bam {
        reader: BamReader,
        path: PathBuf,
    },
}

impl Reader {
    fn open(path: &Path, format: RecordFormat, threads: usize) -> Result<Self> {
        match format {
            RecordFormat::Fastq => {
                let kind = io::detect_input_kind(path)?;
                Ok(Reader::Fastq {
                    input: io::open_line_input(path, kind, threads)?,
                    path: path.to_path_buf(),
                    records: 0,
                    line: Vec::new(),
                })
            }
            RecordFormat::Bam => {
                let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
                let bgzf_reader = bgzf::io::Reader::new(BufReader::with_capacity(BAM_READ_BUF, file));
                let mut reader = bam::io::Reader::from(bgzf_reader);
                reader
                    .read_header()
                    .map_err(|e| PipelineError::format(path, format!("invalid BAM header: {e}")))?;
                Ok(Reader::Bam {
                    reader,
                    path: path.to_path_buf(),
                })
            }
        }
    }

    fn next_entry(&mut self) -> Result<Option<RawEntry>> {
        match self {
            Reader::Fastq {
                input,
                path,
                records,
                line,
            } => {
                let record_no = *records + 1;
                let locate = |what: &str| format!("{}:{} ({what})", path.display(), record_no);
                let read_line = |input: &mut LineInput, line: &mut Vec<u8>| {
                    input
                        .next_line(line)
                        .map_err(|e| PipelineError::io(path.as_path(), e))
                };

                // Skip blank lines between records and at end of file.
                loop {
                    if !read_line(input, line)? {
                        return Ok(None);
                    }
                    if !line.is_empty() {
                        break;
                    }
                }
                if line[0] != b'@' {
                    return Err(PipelineError::parse(
                        locate("header"),
                        "header line does not start with '@'",
                    ));
                }
                let header = std::mem::take(line);

                let mut fields: [Vec<u8>; 3] = Default::default();
                for (field, name) in fields.iter_mut().zip(["sequence", "separator", "quality"]) {
                    if !read_line(input, field)? {
                        return Err(PipelineError::parse(
                            locate(name),
                            "truncated record at end of input",
                        ));
                    }
                }
                let [seq, sep, qual] = fields;
                if sep.first() != Some(&b'+') {
                    return Err(PipelineError::parse(
                        locate("separator"),
                        "separator line does not start with '+'",
                    ));
                }
                *records = record_no;
                Ok(Some(RawEntry::Fastq(FastqEntry { header, seq, qual })))
            }
            Reader::Bam { reader, path } => {
                let mut record = bam::Record::default();
                match reader.read_record(&mut record) {
                    Ok(0) => Ok(None),
                    Ok(_) => Ok(Some(RawEntry::Bam(record))),
                    Err(e) => Err(PipelineError::io(path.as_path(), e)),
                }
            }
        }
    }
}

/// Opening validates the first record, so an unrecognised input fails before
/// any batch is produced.
pub struct RecordSource {
    pending: VecDeque<PathBuf>,
    current: Option<Reader>,
    peeked: Option<RawEntry>,
    format: RecordFormat,
    rich: bool,
    threads: usize,
    done: bool,
}

impl RecordSource {
    pub fn open(paths: &[PathBuf], hint: FormatHint, threads: usize) -> Result<Self> {
        let mut pending: VecDeque<PathBuf> = paths.iter().cloned().collect();
        let first = pending
            .pop_front()
            .ok_or_else(|| PipelineError::config("inputs", "at least one input file is required"))?;

        let format = resolve_format(&first, hint)?;
        let mut reader = Reader::open(&first, format, threads)?;
        let peeked = reader.next_entry().map_err(|e| match e {
            PipelineError::Parse { reason, .. } => PipelineError::format(
                &first,
                format!("first record is not valid {}: {reason}", format.as_str()),
            ),
            PipelineError::Io { source, .. }
                if format == RecordFormat::Bam
                    && matches!(
                        source.kind(),
                        ErrorKind::InvalidData | ErrorKind::UnexpectedEof
                    ) =>
            {
                PipelineError::format(&first, format!("first record is not valid BAM: {source}"))
            }
            other => other,
        })?;

        let rich = match &peeked {
            Some(RawEntry::Fastq(entry)) => metadata::parse_header(&entry.header).is_rich(),
            Some(RawEntry::Bam(record)) => metadata::bam_meta(record)
                .map(|m| m.is_rich())
                .unwrap_or(false),
            None => false,
        };
        log::debug!(
            "opened {} as {} (rich metadata: {})",
            first.display(),
            format.as_str(),
            rich
        );

        Ok(Self {
            pending,
            current: Some(reader),
            peeked,
            format,
            rich,
            threads,
            done: false,
        })
    }

    pub fn format(&self) -> RecordFormat {
        self.format
    }

    pub fn is_rich(&self) -> bool {
        self.rich
    }

    fn advance(&mut self) -> Result<Option<RawEntry>> {
        if let Some(entry) = self.peeked.take() {
            return Ok(Some(entry));
        }
        loop {
            if let Some(reader) = self.current.as_mut() {
                if let Some(entry) = reader.next_entry()? {
                    return Ok(Some(entry));
                }
                self.current = None;
            }
            let Some(path) = self.pending.pop_front() else {
                return Ok(None);
            };
            let format = resolve_format(&path, FormatHint::Auto)?;
            if format != self.format {
                return Err(PipelineError::format(
                    &path,
                    format!(
                        "input is {} but this run reads {}",
                        format.as_str(),
                        self.format.as_str()
                    ),
                ));
            }
            log::debug!("opening {}", path.display());
            self.current = Some(Reader::open(&path, format, self.threads)?);
        }
    }
}

impl Iterator for RecordSource {
    type Item = Result<RawEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn resolve_format(path: &Path, hint: FormatHint) -> Result<RecordFormat> {
    let kind = io::detect_input_kind(path)?;
    let sniffed = io::sniff_format(path, kind)?;
    let expected = match hint {
        FormatHint::Auto => return Ok(sniffed),
        FormatHint::Fastq => RecordFormat::Fastq,
        FormatHint::Bam => RecordFormat::Bam,
    };
    if sniffed != expected {
        return Err(PipelineError::format(
            path,
            format!(
                "expected {} records but content looks like {}",
                expected.as_str(),
                sniffed.as_str()
            ),
        ));
    }
    if expected == RecordFormat::Bam && kind != InputKind::Gzip {
        return Err(PipelineError::format(path, "BAM input must be BGZF compressed"));
    }
    Ok(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn fastq_file(content: &str) -> NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".fastq").tempfile().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    fn ids(source: RecordSource) -> Vec<String> {
        source
            .map(|r| match r.unwrap() {
                RawEntry::Fastq(e) => e.id(),
                RawEntry::Bam(_) => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn streams_records_across_files_in_order() {
        let a = fastq_file("@a1\nAC\n+\n!!\n@a2\nACG\n+\n!!!\n");
        let b = fastq_file("@b1 ch=3\nA\n+\n!\n\n");
        let source = RecordSource::open(
            &[a.path().to_path_buf(), b.path().to_path_buf()],
            FormatHint::Auto,
            1,
        )
        .unwrap();
        assert_eq!(source.format(), RecordFormat::Fastq);
        assert!(!source.is_rich());
        assert_eq!(ids(source), vec!["a1", "a2", "b1"]);
    }

    #[test]
    fn rich_flag_comes_from_first_record() {
        let f = fastq_file("@r1 ch=12 start_time=2020-01-01T00:00:00Z\nACGT\n+\n!!!!\n");
        let source = RecordSource::open(&[f.path().to_path_buf()], FormatHint::Auto, 1).unwrap();
        assert!(source.is_rich());
    }

    #[test]
    fn malformed_first_record_is_a_format_error() {
        let f = fastq_file("@r1\nACGT\n-\n!!!!\n");
        let err = RecordSource::open(&[f.path().to_path_buf()], FormatHint::Auto, 1)
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Format { .. }), "{err}");
    }

    #[test]
    fn undecodable_first_bam_record_is_a_format_error() {
        let f = tempfile::Builder::new().suffix(".bam").tempfile().unwrap();
        let mut writer = bgzf::io::Writer::new(File::create(f.path()).unwrap());
        writer.write_all(b"BAM\x01").unwrap();
        // Empty header text, no references.
        writer.write_all(&0i32.to_le_bytes()).unwrap();
        writer.write_all(&0i32.to_le_bytes()).unwrap();
        // A record whose block is far too short for the fixed fields.
        writer.write_all(&5u32.to_le_bytes()).unwrap();
        writer.write_all(b"abcde").unwrap();
        writer.finish().unwrap();

        let err = RecordSource::open(&[f.path().to_path_buf()], FormatHint::Auto, 1)
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Format { .. }), "{err}");
    }

    #[test]
    fn explicit_hint_must_match_content() {
        let f = fastq_file("@r1\nACGT\n+\n!!!!\n");
        let err = RecordSource::open(&[f.path().to_path_buf()], FormatHint::Bam, 1)
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Format { .. }));
    }

    #[test]
    fn truncated_later_record_is_a_parse_error() {
        let f = fastq_file("@r1\nACGT\n+\n!!!!\n@r2\nACGT\n");
        let mut source =
            RecordSource::open(&[f.path().to_path_buf()], FormatHint::Fastq, 1).unwrap();
        assert!(source.next().unwrap().is_ok());
        let err = source.next().unwrap().unwrap_err();
        assert!(err.is_parse());
        assert!(source.next().is_none());
    }

    #[test]
    fn no_inputs_is_a_config_error() {
        let err = RecordSource::open(&[], FormatHint::Auto, 1).err().unwrap();
        assert!(matches!(err, PipelineError::InvalidConfig { .. }));
    }
}
