use crate::core::aggregate::{ColumnarTable, Series, SeriesMap, Subset};
use std::collections::BTreeMap;

pub type StatsMap = BTreeMap<String, f64>;

pub const DEFAULT_NXX: f64 = 50.0;

#[derive(Clone, Debug, PartialEq)]
pub struct Descriptor {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; `None` below two values.
    pub std: Option<f64>,
    pub min: f64,
    pub q25: f64,
    pub q50: f64,
    pub q75: f64,
    pub max: f64,
}

impl Descriptor {
    fn insert_into(&self, map: &mut StatsMap, prefix: &str, with_count: bool) {
        if with_count {
            map.insert(format!("{prefix}.count"), self.count as f64);
        }
        map.insert(format!("{prefix}.mean"), self.mean);
        if let Some(std) = self.std {
            map.insert(format!("{prefix}.std"), std);
        }
        map.insert(format!("{prefix}.min"), self.min);
        map.insert(format!("{prefix}.25%"), self.q25);
        map.insert(format!("{prefix}.50%"), self.q50);
        map.insert(format!("{prefix}.75%"), self.q75);
        map.insert(format!("{prefix}.max"), self.max);
    }
}

pub fn describe(values: &[f64]) -> Option<Descriptor> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let mean = sorted.iter().sum::<f64>() / n as f64;
    let std = (n > 1).then(|| {
        let ss: f64 = sorted.iter().map(|v| (v - mean).powi(2)).sum();
        (ss / (n - 1) as f64).sqrt()
    });
    Some(Descriptor {
        count: n,
        mean,
        std,
        min: sorted[0],
        q25: quantile_sorted(&sorted, 0.25),
        q50: quantile_sorted(&sorted, 0.50),
        q75: quantile_sorted(&sorted, 0.75),
        max: sorted[n - 1],
    })
}

pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

// Stable ascending sort, closed `>=` threshold; LXX is 1-based.
pub fn nxx_lxx(lengths: &[u32], x: f64) -> Option<(u32, usize)> {
    if lengths.is_empty() {
        return None;
    }
    let mut sorted = lengths.to_vec();
    sorted.sort();
    let total: u64 = sorted.iter().map(|&l| l as u64).sum();
    let target = x / 100.0 * total as f64;
    let mut running = 0u64;
    for (i, &len) in sorted.iter().enumerate() {
        running += len as u64;
        if running as f64 >= target {
            return Some((len, i + 1));
        }
    }
    sorted.last().map(|&l| (l, sorted.len()))
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReadCounts {
    pub total: u64,
    pub pass: u64,
    pub fail: u64,
}

impl ReadCounts {
    pub fn pass_ratio(&self) -> f64 {
        self.pass as f64 / self.total as f64
    }

    pub fn fail_ratio(&self) -> f64 {
        self.fail as f64 / self.total as f64
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NxxEntry {
    pub subset: Subset,
    pub x: f64,
    pub nxx: u32,
    pub lxx: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChannelOccupancy {
    pub channels: usize,
    pub missing: u64,
    pub occupancy: Descriptor,
}

/// Per-channel read counts; reads without a channel form one extra bucket.
pub fn channel_counts(channels: &[Option<i16>]) -> BTreeMap<Option<i16>, u64> {
    let mut counts = BTreeMap::new();
    for &ch in channels {
        *counts.entry(ch).or_insert(0u64) += 1;
    }
    counts
}

pub fn channel_occupancy(channels: &[Option<i16>]) -> Option<ChannelOccupancy> {
    let counts = channel_counts(channels);
    let present = counts.keys().filter(|k| k.is_some()).count();
    if present == 0 {
        return None;
    }
    let per_channel: Vec<f64> = counts.values().map(|&c| c as f64).collect();
    Some(ChannelOccupancy {
        channels: present,
        missing: counts.get(&None).copied().unwrap_or(0),
        occupancy: describe(&per_channel)?,
    })
}

#[derive(Clone, Debug)]
pub struct StatsConfig {
    pub nxx: Vec<f64>,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            nxx: vec![DEFAULT_NXX],
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Statistics {
    pub counts: ReadCounts,
    pub yields: [(Subset, u64); 3],
    pub length: Vec<(Subset, Descriptor)>,
    pub qscore: Vec<(Subset, Descriptor)>,
    pub duration: Vec<(Subset, Descriptor)>,
    pub nxx: Vec<NxxEntry>,
    pub channels: Option<ChannelOccupancy>,
    pub run_duration: Option<f64>,
    pub unparsed: Option<u64>,
}

impl Statistics {
    pub fn compute(
        table: &ColumnarTable,
        series: &SeriesMap,
        cfg: &StatsConfig,
        unparsed: Option<u64>,
    ) -> Self {
        let pass = table.passes_filtering.iter().filter(|&&p| p).count() as u64;
        let counts = ReadCounts {
            total: table.len() as u64,
            pass,
            fail: table.len() as u64 - pass,
        };

        let lengths_of = |subset: Subset| -> Vec<u32> {
            match series.get(&format!("{}.sequence.length", subset.as_str())) {
                Some(Series::U32(v)) => v.clone(),
                _ => Vec::new(),
            }
        };
        let values_of = |name: String| -> Vec<f64> {
            series.get(&name).map(Series::to_f64).unwrap_or_default()
        };

        let yields = Subset::ALL
            .map(|subset| (subset, lengths_of(subset).iter().map(|&l| l as u64).sum::<u64>()));

        let mut length = Vec::new();
        let mut qscore = Vec::new();
        let mut duration = Vec::new();
        let mut nxx = Vec::new();
        for subset in Subset::ALL {
            let lengths = lengths_of(subset);
            let as_f64: Vec<f64> = lengths.iter().map(|&l| l as f64).collect();
            if let Some(d) = describe(&as_f64) {
                length.push((subset, d));
            }
            if let Some(d) = describe(&values_of(format!("{}.mean.qscore", subset.as_str()))) {
                qscore.push((subset, d));
            }
            if let Some(d) = describe(&values_of(format!("{}.duration", subset.as_str()))) {
                duration.push((subset, d));
            }
            for &x in &cfg.nxx {
                if let Some((n, l)) = nxx_lxx(&lengths, x) {
                    nxx.push(NxxEntry {
                        subset,
                        x,
                        nxx: n,
                        lxx: l,
                    });
                }
            }
        }

        Self {
            counts,
            yields,
            length,
            qscore,
            duration,
            nxx,
            channels: channel_occupancy(&table.channel),
            run_duration: run_duration(table),
            unparsed,
        }
    }

    pub fn to_map(&self) -> StatsMap {
        let mut map = StatsMap::new();
        let c = &self.counts;
        map.insert("read.count".to_string(), c.total as f64);
        map.insert("read.pass.count".to_string(), c.pass as f64);
        map.insert("read.fail.count".to_string(), c.fail as f64);
        if c.total > 0 {
            map.insert("read.pass.ratio".to_string(), c.pass_ratio());
            map.insert("read.fail.ratio".to_string(), c.fail_ratio());
            map.insert("read.pass.frequency".to_string(), c.pass_ratio() * 100.0);
            map.insert("read.fail.frequency".to_string(), c.fail_ratio() * 100.0);
        }

        for (subset, total) in &self.yields {
            let key = match subset {
                Subset::All => "read.yield".to_string(),
                other => format!("read.{}.yield", other.as_str()),
            };
            map.insert(key, *total as f64);
        }
        for (subset, d) in &self.length {
            d.insert_into(&mut map, &format!("{}.read.length", subset.as_str()), true);
        }
        for (subset, d) in &self.qscore {
            // The global count duplicates read.count.
            let with_count = *subset != Subset::All;
            d.insert_into(&mut map, &format!("{}.read.qscore", subset.as_str()), with_count);
        }
        for (subset, d) in &self.duration {
            d.insert_into(&mut map, &format!("{}.read.duration", subset.as_str()), true);
        }
        for e in &self.nxx {
            let prefix = format!("{}.read.length", e.subset.as_str());
            map.insert(format!("{prefix}.n{}", fmt_pct(e.x)), e.nxx as f64);
            map.insert(format!("{prefix}.l{}", fmt_pct(e.x)), e.lxx as f64);
        }
        if let Some(ch) = &self.channels {
            map.insert("channel.count".to_string(), ch.channels as f64);
            map.insert("channel.missing.count".to_string(), ch.missing as f64);
            ch.occupancy
                .insert_into(&mut map, "channel.occupancy.statistics", true);
        }
        if let Some(secs) = self.run_duration {
            map.insert("run.duration".to_string(), secs);
        }
        if let Some(n) = self.unparsed {
            map.insert("unparsed.count".to_string(), n as f64);
        }
        map
    }
}

fn fmt_pct(x: f64) -> String {
    if x.fract() == 0.0 {
        format!("{}", x as u64)
    } else {
        format!("{x}")
    }
}

fn run_duration(table: &ColumnarTable) -> Option<f64> {
    let mut first = f64::INFINITY;
    let mut last = f64::NEG_INFINITY;
    for (start, duration) in table.start_time.iter().zip(&table.duration) {
        if let Some(start) = start {
            first = first.min(*start);
            last = last.max(start + duration.map_or(0.0, |d| d as f64));
        }
    }
    first.is_finite().then(|| last - first)
}
