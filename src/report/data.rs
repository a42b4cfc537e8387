use crate::core::stats::StatsMap;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub fn write(path: &Path, stats: &StatsMap) -> Result<()> {
    let file = File::create(path).with_context(|| "create report.data failed")?;
    let mut w = BufWriter::new(file);
    write_to(&mut w, stats)?;
    w.flush()?;
    Ok(())
}

pub fn write_to<W: Write>(w: &mut W, stats: &StatsMap) -> Result<()> {
    for (key, value) in stats {
        writeln!(w, "{key}={value}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_sorted_lines_with_compact_numbers() {
        let mut stats = StatsMap::new();
        stats.insert("read.pass.ratio".to_string(), 0.25);
        stats.insert("read.count".to_string(), 4.0);
        stats.insert("all.read.length.mean".to_string(), 1234.5);
        let mut out = Vec::new();
        write_to(&mut out, &stats).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "all.read.length.mean=1234.5\nread.count=4\nread.pass.ratio=0.25\n"
        );
    }

    #[test]
    fn write_creates_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.data");
        let mut stats = StatsMap::new();
        stats.insert("read.count".to_string(), 1.0);
        write(&path, &stats).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "read.count=1\n");
    }
}
