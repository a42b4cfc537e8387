use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "kira-nanoqc",
    version,
    about = "Read-level QC extraction for long-read FASTQ and unaligned BAM"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    Run(RunArgs),
}

#[derive(Parser)]
pub struct RunArgs {
    /// Input files of one run, read in the given order.
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    #[arg(long)]
    pub out: PathBuf,

    #[arg(long, value_enum, default_value_t = FormatArg::Auto)]
    pub format: FormatArg,

    /// Reads with a mean qscore strictly above this value pass.
    #[arg(long, default_value_t = 9.0)]
    pub threshold: f32,

    #[arg(long, default_value_t = num_cpus::get())]
    pub threads: usize,

    #[arg(long, default_value_t = 500)]
    pub batch_size: usize,

    /// Maximum batches in flight; defaults to twice --threads.
    #[arg(long)]
    pub queue_depth: Option<usize>,

    #[arg(long, default_value_t = 1)]
    pub decompress_threads: usize,

    #[arg(long, value_enum, default_value_t = MalformedArg::Fail)]
    pub malformed: MalformedArg,

    /// Keep rows in batch completion order instead of sorting by start time.
    #[arg(long, default_value_t = false)]
    pub no_sort: bool,

    /// NXX percentages to report.
    #[arg(long, value_delimiter = ',', default_value = "50")]
    pub nxx: Vec<f64>,

    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum FormatArg {
    #[value(name = "auto")]
    Auto,
    #[value(name = "fastq")]
    Fastq,
    #[value(name = "bam")]
    Bam,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum MalformedArg {
    #[value(name = "fail")]
    Fail,
    #[value(name = "skip")]
    Skip,
}
