use crate::core::batch::Batch;
use crate::core::error::{PipelineError, Result};
use crate::core::io::RecordFormat;
use crate::core::metadata::{self, ReadMeta};
use crate::core::quality;
use crate::core::source::{FastqEntry, RawEntry};
use noodles::bam;

#[derive(Clone, Debug, PartialEq)]
pub struct FeatureTuple {
    pub sequence_length: u32,
    /// `None` for an empty read.
    pub mean_qscore: Option<f32>,
    pub passes_filtering: bool,
    pub start_time: Option<f64>,
    pub channel: Option<i16>,
    pub duration: Option<f32>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParserKind {
    Fastq { rich: bool },
    Bam,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MalformedPolicy {
    #[default]
    Fail,
    Skip,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchOutput {
    pub rows: Vec<FeatureTuple>,
    pub unparsed: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct RecordParser {
    kind: ParserKind,
    threshold: f32,
}

impl RecordParser {
    pub fn new(kind: ParserKind, threshold: f32) -> Self {
        Self { kind, threshold }
    }

    pub fn for_source(format: RecordFormat, rich: bool, threshold: f32) -> Self {
        let kind = match format {
            RecordFormat::Fastq => ParserKind::Fastq { rich },
            RecordFormat::Bam => ParserKind::Bam,
        };
        Self::new(kind, threshold)
    }

    pub fn parse(&self, entry: &RawEntry) -> Result<FeatureTuple> {
        match (self.kind, entry) {
            (ParserKind::Fastq { rich }, RawEntry::Fastq(e)) => self.parse_fastq(e, rich),
            (ParserKind::Bam, RawEntry::Bam(record)) => self.parse_bam(record),
            (_, RawEntry::Fastq(e)) => Err(PipelineError::parse(e.id(), "FASTQ record in a BAM run")),
            (_, RawEntry::Bam(_)) => Err(PipelineError::parse("<bam>", "BAM record in a FASTQ run")),
        }
    }

    pub fn parse_batch(&self, batch: &Batch<RawEntry>, policy: MalformedPolicy) -> Result<BatchOutput> {
        let mut out = BatchOutput {
            rows: Vec::with_capacity(batch.len()),
            unparsed: 0,
        };
        for entry in &batch.entries {
            match self.parse(entry) {
                Ok(row) => out.rows.push(row),
                Err(e) if policy == MalformedPolicy::Skip && e.is_parse() => {
                    log::trace!("skipping malformed record: {e}");
                    out.unparsed += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    fn parse_fastq(&self, entry: &FastqEntry, rich: bool) -> Result<FeatureTuple> {
        if entry.seq.len() != entry.qual.len() {
            return Err(PipelineError::parse(
                entry.id(),
                format!(
                    "sequence length {} differs from quality length {}",
                    entry.seq.len(),
                    entry.qual.len()
                ),
            ));
        }
        let length = checked_length(&entry.id(), entry.seq.len())?;
        let mean_qscore = quality::mean_qscore_ascii(&entry.qual).map_err(|pos| {
            PipelineError::parse(
                entry.id(),
                format!(
                    "invalid quality character {:?} at position {pos}",
                    entry.qual[pos] as char
                ),
            )
        })?;
        let meta = if rich {
            metadata::parse_header(&entry.header)
        } else {
            ReadMeta::default()
        };
        Ok(self.assemble(length, mean_qscore, meta))
    }

    fn parse_bam(&self, record: &bam::Record) -> Result<FeatureTuple> {
        let name = record
            .name()
            .map(|n| String::from_utf8_lossy(n).into_owned())
            .unwrap_or_else(|| "*".to_string());
        let meta = metadata::bam_meta(record)
            .map_err(|e| PipelineError::parse(name.as_str(), format!("invalid aux data: {e}")))?;
        let quals = record.quality_scores();
        self.parse_bam_parts(&name, record.sequence().len(), quals.as_ref(), meta)
    }

    /// Falls back to the combined `qs` tag when per-base qualities are missing.
    pub fn parse_bam_parts(
        &self,
        name: &str,
        length: usize,
        quals: &[u8],
        meta: ReadMeta,
    ) -> Result<FeatureTuple> {
        let length = checked_length(name, length)?;
        let missing = quals.is_empty() || quals.iter().all(|&q| q == 0xff);
        let mean_qscore = if missing {
            meta.qscore.map(|q| quality::round2(q as f64))
        } else {
            quality::mean_qscore_phred(quals).map_err(|pos| {
                PipelineError::parse(
                    name,
                    format!("quality value {} at position {pos} exceeds {}", quals[pos], quality::MAX_Q),
                )
            })?
        };
        Ok(self.assemble(length, mean_qscore, meta))
    }

    fn assemble(&self, length: u32, mean_qscore: Option<f32>, meta: ReadMeta) -> FeatureTuple {
        FeatureTuple {
            sequence_length: length,
            mean_qscore,
            passes_filtering: mean_qscore.is_some_and(|q| q > self.threshold),
            start_time: meta.start_time,
            channel: meta.channel,
            duration: meta.duration,
        }
    }
}

fn checked_length(name: &str, len: usize) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| PipelineError::parse(name, format!("read length {len} exceeds u32")))
}
