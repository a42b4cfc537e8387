use crate::cli::args::{Cli, Commands, FormatArg, MalformedArg, RunArgs};
use crate::core::engine::{self, RunConfig, fmt_dur};
use crate::core::parser::MalformedPolicy;
use crate::core::source::FormatHint;
use crate::report;
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::fs;
use std::time::{Duration, Instant};

pub fn entry() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args),
    }
}

fn run(args: RunArgs) -> Result<()> {
    let t0 = Instant::now();

    stage("preflight", || {
        for input in &args.inputs {
            if input.as_os_str() == "-" {
                bail!("stdin is not supported; provide a FASTQ or BAM file path");
            }
            if !input.is_file() {
                bail!("input file not found: {}", input.display());
            }
        }
        if args.threads == 0 {
            bail!("--threads must be >= 1");
        }
        Ok(())
    })?;

    let t_out = Instant::now();
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create output dir {}", args.out.display()))?;
    stage_done("mkdir", t_out);

    let config = RunConfig {
        format: match args.format {
            FormatArg::Auto => FormatHint::Auto,
            FormatArg::Fastq => FormatHint::Fastq,
            FormatArg::Bam => FormatHint::Bam,
        },
        batch_size: args.batch_size,
        queue_depth: args.queue_depth,
        decompress_threads: args.decompress_threads,
        malformed: match args.malformed {
            MalformedArg::Fail => MalformedPolicy::Fail,
            MalformedArg::Skip => MalformedPolicy::Skip,
        },
        sort_by_start_time: !args.no_sort,
        nxx: args.nxx.clone(),
        timeout: args.timeout_secs.map(Duration::from_secs),
        ..RunConfig::new(args.inputs.clone(), args.threshold, args.threads)
    };

    let t_engine = Instant::now();
    let output = engine::run(config).context("extraction failed")?;
    stage_done("engine", t_engine);

    let data_path = args.out.join("report.data");
    let t_report = Instant::now();
    report::data::write(&data_path, &output.stats)
        .with_context(|| format!("failed to write {}", data_path.display()))?;
    stage_done("report", t_report);

    log::debug!(
        "{} input, {} rows, {} derived series, {} records in {} batches",
        output.format.as_str(),
        output.table.len(),
        output.series.len(),
        output.executor.records_processed,
        output.executor.batches_completed
    );
    if !output.rich {
        log::info!("inputs carry no channel/start-time metadata; occupancy and run duration skipped");
    }
    log::info!(
        "{} reads ({} pass) written to {} in {}",
        output.statistics.counts.total,
        output.statistics.counts.pass,
        data_path.display(),
        fmt_dur(t0.elapsed())
    );
    Ok(())
}

fn stage<F>(name: &str, f: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    let t = Instant::now();
    let res = f();
    stage_done(name, t);
    res
}

fn stage_done(name: &str, t: Instant) {
    log::debug!("stage={} time={}", name, fmt_dur(t.elapsed()));
}
