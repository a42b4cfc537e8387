use crate::core::aggregate::{self, Aggregator, ColumnarTable, SeriesMap};
use crate::core::batch::{Batcher, DEFAULT_BATCH_SIZE};
use crate::core::error::{PipelineError, Result};
use crate::core::executor::{BoundedExecutor, ExecutorConfig, ExecutorReport};
use crate::core::io::RecordFormat;
use crate::core::parser::{MalformedPolicy, RecordParser};
use crate::core::source::{FormatHint, RecordSource};
use crate::core::stats::{Statistics, StatsConfig, StatsMap, DEFAULT_NXX};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct RunConfig {
    pub inputs: Vec<PathBuf>,
    pub format: FormatHint,
    pub threshold: f32,
    pub batch_size: usize,
    pub threads: usize,
    /// Defaults to twice `threads`.
    pub queue_depth: Option<usize>,
    pub decompress_threads: usize,
    pub malformed: MalformedPolicy,
    pub sort_by_start_time: bool,
    pub nxx: Vec<f64>,
    pub timeout: Option<Duration>,
}

impl RunConfig {
    pub fn new(inputs: Vec<PathBuf>, threshold: f32, threads: usize) -> Self {
        Self {
            inputs,
            format: FormatHint::Auto,
            threshold,
            batch_size: DEFAULT_BATCH_SIZE,
            threads,
            queue_depth: None,
            decompress_threads: 1,
            malformed: MalformedPolicy::Fail,
            sort_by_start_time: true,
            nxx: vec![DEFAULT_NXX],
            timeout: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(PipelineError::config("inputs", "at least one input file is required"));
        }
        if !self.threshold.is_finite() {
            return Err(PipelineError::config("threshold", "must be a finite number"));
        }
        if self.batch_size == 0 {
            return Err(PipelineError::config("batch_size", "must be >= 1"));
        }
        if self.threads == 0 {
            return Err(PipelineError::config("threads", "must be >= 1"));
        }
        if self.queue_depth == Some(0) {
            return Err(PipelineError::config("queue_depth", "must be >= 1"));
        }
        if let Some(x) = self.nxx.iter().find(|x| !(**x > 0.0 && **x <= 100.0)) {
            return Err(PipelineError::config("nxx", format!("{x} is outside (0, 100]")));
        }
        Ok(())
    }

    fn executor_config(&self) -> ExecutorConfig {
        let cfg = ExecutorConfig::new(self.threads).with_timeout(self.timeout);
        match self.queue_depth {
            Some(depth) => cfg.with_queue_depth(depth),
            None => cfg,
        }
    }
}

pub struct RunOutput {
    pub format: RecordFormat,
    pub rich: bool,
    pub table: ColumnarTable,
    pub series: SeriesMap,
    pub statistics: Statistics,
    pub stats: StatsMap,
    pub executor: ExecutorReport,
}

pub fn run(cfg: RunConfig) -> Result<RunOutput> {
    cfg.validate()?;
    let t_total = Instant::now();

    let t_open = Instant::now();
    let source = RecordSource::open(&cfg.inputs, cfg.format, cfg.decompress_threads)?;
    let format = source.format();
    let rich = source.is_rich();
    let parser = RecordParser::for_source(format, rich, cfg.threshold);
    log_stage("engine.open", t_open);
    log::info!(
        "reading {} input(s) as {}{}",
        cfg.inputs.len(),
        format.as_str(),
        if rich { " with run metadata" } else { "" }
    );

    let t_extract = Instant::now();
    let executor = BoundedExecutor::new(cfg.executor_config())?;
    let mut aggregator = Aggregator::new();
    let policy = cfg.malformed;
    let report = executor.run(
        Batcher::new(source, cfg.batch_size),
        |batch| parser.parse_batch(batch, policy),
        |done| {
            log::trace!("merging batch {} ({} records)", done.index, done.records);
            aggregator.add_unparsed(done.output.unparsed);
            aggregator.push(done.output.rows);
        },
    )?;
    log_stage("engine.extract", t_extract);
    log::info!(
        "parsed {} records in {}/{} batches (peak in flight {})",
        executor.progress().records(),
        aggregator.batches(),
        report.batches_submitted,
        report.peak_in_flight
    );

    let t_agg = Instant::now();
    let unparsed = aggregator.unparsed();
    if unparsed > 0 {
        log::warn!("skipped {unparsed} malformed records");
    }
    let table = aggregator.finish(cfg.sort_by_start_time)?;
    let series = aggregate::derive_series(&table);
    log_stage("engine.aggregate", t_agg);

    let t_stats = Instant::now();
    let stats_cfg = StatsConfig {
        nxx: cfg.nxx.clone(),
    };
    let unparsed = (policy == MalformedPolicy::Skip).then_some(unparsed);
    let statistics = Statistics::compute(&table, &series, &stats_cfg, unparsed);
    let stats = statistics.to_map();
    log_stage("engine.stats", t_stats);
    log_stage("engine.total", t_total);

    Ok(RunOutput {
        format,
        rich,
        table,
        series,
        statistics,
        stats,
        executor: report,
    })
}

fn log_stage(name: &str, t: Instant) {
    log::debug!("stage={} time={}", name, fmt_dur(t.elapsed()));
}

pub fn fmt_dur(d: Duration) -> String {
    if d.as_secs_f64() < 1.0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.3}s", d.as_secs_f64())
    }
}
