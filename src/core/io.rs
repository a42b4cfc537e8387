use crate::core::error::{PipelineError, Result};
use flate2::read::MultiGzDecoder;
use gzp::deflate::{Bgzf, Mgzip};
use gzp::par::decompress::ParDecompressBuilder;
use memmap2::Mmap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

const GZIP_READ_BUF: usize = 8 * 1024 * 1024;
const BAM_MAGIC: &[u8; 4] = b"BAM\x01";
const SNIFF_LEN: usize = 256;

pub struct MmapSource {
    mmap: Mmap,
}

impl MmapSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
        // SAFETY: read-only file mapping.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| PipelineError::io(path, e))?;
        Ok(Self { mmap })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.mmap
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InputKind {
    Plain,
    Gzip,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordFormat {
    Fastq,
    Bam,
}

impl RecordFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordFormat::Fastq => "fastq",
            RecordFormat::Bam => "bam",
        }
    }
}

pub enum LineInput {
    Mmap { source: MmapSource, pos: usize },
    Stream(Box<dyn BufRead + Send>),
}

impl LineInput {
    // Strips the terminator; `false` at end of input.
    pub fn next_line(&mut self, buf: &mut Vec<u8>) -> io::Result<bool> {
        buf.clear();
        match self {
            LineInput::Mmap { source, pos } => {
                let bytes = source.bytes();
                if *pos >= bytes.len() {
                    return Ok(false);
                }
                let rest = &bytes[*pos..];
                let end = memchr::memchr(b'\n', rest).unwrap_or(rest.len());
                buf.extend_from_slice(&rest[..end]);
                *pos += (end + 1).min(rest.len());
            }
            LineInput::Stream(reader) => {
                if reader.read_until(b'\n', buf)? == 0 {
                    return Ok(false);
                }
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
            }
        }
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        Ok(true)
    }
}

pub fn detect_input_kind(path: &Path) -> Result<InputKind> {
    if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
        let ext = ext.to_ascii_lowercase();
        if ext == "gz" {
            return Ok(InputKind::Gzip);
        }
    }
    let mut file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut magic = [0u8; 2];
    let n = read_prefix(&mut file, &mut magic).map_err(|e| PipelineError::io(path, e))?;
    if n == 2 && magic == [0x1f, 0x8b] {
        Ok(InputKind::Gzip)
    } else {
        Ok(InputKind::Plain)
    }
}

pub fn sniff_format(path: &Path, kind: InputKind) -> Result<RecordFormat> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut prefix = [0u8; SNIFF_LEN];
    let n = match kind {
        InputKind::Plain => read_prefix(&mut BufReader::new(file), &mut prefix),
        InputKind::Gzip => read_prefix(&mut MultiGzDecoder::new(BufReader::new(file)), &mut prefix),
    }
    .map_err(|e| PipelineError::format(path, format!("cannot read leading bytes: {e}")))?;

    let prefix = &prefix[..n];
    if prefix.is_empty() {
        return Err(PipelineError::format(path, "input is empty"));
    }
    if prefix.starts_with(BAM_MAGIC) {
        return Ok(RecordFormat::Bam);
    }
    let start = prefix.iter().position(|&b| b != b'\n' && b != b'\r');
    match start {
        Some(i) if prefix[i] == b'@' => Ok(RecordFormat::Fastq),
        Some(i) => Err(PipelineError::format(
            path,
            format!(
                "first record starts with {:?}, expected '@' (FASTQ) or BAM magic",
                String::from_utf8_lossy(&prefix[i..n.min(i + 4)])
            ),
        )),
        None => Err(PipelineError::format(path, "no record found in leading blank lines")),
    }
}

fn read_prefix<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

pub fn open_line_input(path: &Path, kind: InputKind, threads: usize) -> Result<LineInput> {
    match kind {
        InputKind::Plain => {
            let source = MmapSource::open(path)?;
            Ok(LineInput::Mmap { source, pos: 0 })
        }
        InputKind::Gzip => {
            let reader = open_gzip_reader(path, threads)?;
            Ok(LineInput::Stream(Box::new(BufReader::with_capacity(
                GZIP_READ_BUF,
                reader,
            ))))
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum GzipVariant {
    Standard,
    Mgzip,
    Bgzf,
}

fn detect_gzip_variant(path: &Path) -> Result<GzipVariant> {
    let mut file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut header = [0u8; 20];
    let n = read_prefix(&mut file, &mut header).map_err(|e| PipelineError::io(path, e))?;
    if n < 14 {
        return Ok(GzipVariant::Standard);
    }
    if header[0] != 0x1f || header[1] != 0x8b {
        return Ok(GzipVariant::Standard);
    }
    if header[3] & 4 == 0 {
        return Ok(GzipVariant::Standard);
    }
    if header[12] == b'B' && header[13] == b'C' {
        return Ok(GzipVariant::Bgzf);
    }
    if header[12] == b'I' && header[13] == b'G' {
        return Ok(GzipVariant::Mgzip);
    }
    Ok(GzipVariant::Standard)
}

pub fn open_gzip_reader(path: &Path, threads: usize) -> Result<Box<dyn Read + Send>> {
    let variant = detect_gzip_variant(path)?;
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let reader = BufReader::new(file);
    let decompress_err = |e: gzp::GzpError| PipelineError::Decompress {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    let reader: Box<dyn Read + Send> = match variant {
        GzipVariant::Bgzf if threads > 1 => Box::new(
            ParDecompressBuilder::<Bgzf>::new()
                .num_threads(threads)
                .map_err(decompress_err)?
                .from_reader(reader),
        ),
        GzipVariant::Mgzip if threads > 1 => Box::new(
            ParDecompressBuilder::<Mgzip>::new()
                .num_threads(threads)
                .map_err(decompress_err)?
                .from_reader(reader),
        ),
        _ => Box::new(MultiGzDecoder::new(reader)),
    };
    Ok(reader)
}
