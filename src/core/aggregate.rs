use crate::core::error::{PipelineError, Result};
use crate::core::parser::FeatureTuple;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnarTable {
    pub sequence_length: Vec<u32>,
    pub mean_qscore: Vec<Option<f32>>,
    pub passes_filtering: Vec<bool>,
    pub start_time: Vec<Option<f64>>,
    pub channel: Vec<Option<i16>>,
    pub duration: Vec<Option<f32>>,
}

impl ColumnarTable {
    pub fn len(&self) -> usize {
        self.sequence_length.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence_length.is_empty()
    }

    pub fn push(&mut self, row: FeatureTuple) {
        self.sequence_length.push(row.sequence_length);
        self.mean_qscore.push(row.mean_qscore);
        self.passes_filtering.push(row.passes_filtering);
        self.start_time.push(row.start_time);
        self.channel.push(row.channel);
        self.duration.push(row.duration);
    }

    pub fn has_start_time(&self) -> bool {
        self.start_time.iter().any(Option::is_some)
    }

    /// Stable reorder by start time; rows without one keep their relative
    /// order after all timed rows.
    pub fn sort_by_start_time(&mut self) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| match (self.start_time[a], self.start_time[b]) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        self.sequence_length = permute(&self.sequence_length, &order);
        self.mean_qscore = permute(&self.mean_qscore, &order);
        self.passes_filtering = permute(&self.passes_filtering, &order);
        self.start_time = permute(&self.start_time, &order);
        self.channel = permute(&self.channel, &order);
        self.duration = permute(&self.duration, &order);
    }
}

fn permute<T: Copy>(column: &[T], order: &[usize]) -> Vec<T> {
    order.iter().map(|&i| column[i]).collect()
}

#[derive(Clone, Debug, PartialEq)]
pub enum Series {
    U32(Vec<u32>),
    I16(Vec<i16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl Series {
    pub fn to_f64(&self) -> Vec<f64> {
        match self {
            Series::U32(v) => v.iter().map(|&x| x as f64).collect(),
            Series::I16(v) => v.iter().map(|&x| x as f64).collect(),
            Series::F32(v) => v.iter().map(|&x| x as f64).collect(),
            Series::F64(v) => v.clone(),
        }
    }
}

pub type SeriesMap = BTreeMap<String, Series>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Subset {
    All,
    Pass,
    Fail,
}

impl Subset {
    pub const ALL: [Subset; 3] = [Subset::All, Subset::Pass, Subset::Fail];

    pub fn as_str(self) -> &'static str {
        match self {
            Subset::All => "all",
            Subset::Pass => "pass",
            Subset::Fail => "fail",
        }
    }

    fn keeps(self, passes: bool) -> bool {
        match self {
            Subset::All => true,
            Subset::Pass => passes,
            Subset::Fail => !passes,
        }
    }
}

#[derive(Debug, Default)]
pub struct Aggregator {
    table: ColumnarTable,
    batches: usize,
    unparsed: u64,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, rows: Vec<FeatureTuple>) {
        self.batches += 1;
        for row in rows {
            self.table.push(row);
        }
    }

    pub fn add_unparsed(&mut self, n: u64) {
        self.unparsed += n;
    }

    pub fn unparsed(&self) -> u64 {
        self.unparsed
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn finish(self, sort_by_start_time: bool) -> Result<ColumnarTable> {
        let mut table = self.table;
        if table.is_empty() {
            return Err(PipelineError::EmptyResult);
        }
        if sort_by_start_time && table.has_start_time() {
            table.sort_by_start_time();
        }
        Ok(table)
    }
}

// Missing values are left out of every projection.
pub fn derive_series(table: &ColumnarTable) -> SeriesMap {
    let mut map = SeriesMap::new();
    for subset in Subset::ALL {
        let keep = |i: &usize| subset.keeps(table.passes_filtering[*i]);
        let rows: Vec<usize> = (0..table.len()).filter(keep).collect();
        let name = subset.as_str();

        map.insert(
            format!("{name}.sequence.length"),
            Series::U32(rows.iter().map(|&i| table.sequence_length[i]).collect()),
        );
        map.insert(
            format!("{name}.mean.qscore"),
            Series::F32(rows.iter().filter_map(|&i| table.mean_qscore[i]).collect()),
        );
        let durations: Vec<f32> = rows.iter().filter_map(|&i| table.duration[i]).collect();
        if !durations.is_empty() {
            map.insert(format!("{name}.duration"), Series::F32(durations));
        }
    }

    let channels: Vec<i16> = table.channel.iter().filter_map(|c| *c).collect();
    if !channels.is_empty() {
        map.insert("all.channel".to_string(), Series::I16(channels));
    }

    let mut starts: Vec<f64> = table.start_time.iter().filter_map(|t| *t).collect();
    if !starts.is_empty() {
        starts.sort_by(f64::total_cmp);
        let first = starts[0];
        for t in &mut starts {
            *t -= first;
        }
        map.insert("start.time.sorted".to_string(), Series::F64(starts));
    }
    map
}
