use chrono::DateTime;
use noodles::bam;
use noodles::sam::alignment::record::data::field::{Tag, Value};
use std::io;

const CHANNEL_TAG: Tag = Tag::new(b'c', b'h');
const START_TIME_TAG: Tag = Tag::new(b's', b't');
const DURATION_TAG: Tag = Tag::new(b'd', b'u');
const QSCORE_TAG: Tag = Tag::new(b'q', b's');

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReadMeta {
    pub channel: Option<i16>,
    /// Seconds since the Unix epoch.
    pub start_time: Option<f64>,
    pub duration: Option<f32>,
    pub qscore: Option<f32>,
}

impl ReadMeta {
    pub fn is_rich(&self) -> bool {
        self.channel.is_some() && self.start_time.is_some()
    }
}

// `key=value` tokens and SAM-style typed tags; anything unparseable is ignored.
pub fn parse_header(header: &[u8]) -> ReadMeta {
    let mut meta = ReadMeta::default();
    let Ok(text) = std::str::from_utf8(header) else {
        return meta;
    };
    for token in text.split_ascii_whitespace().skip(1) {
        if let Some((key, value)) = token.split_once('=') {
            match key {
                "ch" | "channel" => meta.channel = value.parse().ok(),
                "start_time" => meta.start_time = parse_start_time(value),
                "duration" => meta.duration = value.parse().ok(),
                _ => {}
            }
        } else if let Some((key, value)) = split_sam_tag(token) {
            match key {
                "ch" => meta.channel = value.parse().ok(),
                "st" => meta.start_time = parse_start_time(value),
                "du" => meta.duration = value.parse().ok(),
                "qs" => meta.qscore = value.parse().ok(),
                _ => {}
            }
        }
    }
    meta
}

fn split_sam_tag(token: &str) -> Option<(&str, &str)> {
    let bytes = token.as_bytes();
    if bytes.len() < 5 || bytes[2] != b':' || bytes[4] != b':' {
        return None;
    }
    Some((&token[..2], &token[5..]))
}

pub fn parse_start_time(value: &str) -> Option<f64> {
    if let Ok(secs) = value.parse::<f64>() {
        return secs.is_finite().then_some(secs);
    }
    let dt = DateTime::parse_from_rfc3339(value).ok()?;
    Some(dt.timestamp_micros() as f64 / 1_000_000.0)
}

pub fn bam_meta(record: &bam::Record) -> io::Result<ReadMeta> {
    let data = record.data();
    let mut meta = ReadMeta::default();
    if let Some(value) = data.get(&CHANNEL_TAG) {
        meta.channel = value_as_f64(&value?).and_then(|v| {
            (v >= i16::MIN as f64 && v <= i16::MAX as f64).then_some(v as i16)
        });
    }
    if let Some(value) = data.get(&START_TIME_TAG) {
        meta.start_time = match value? {
            Value::String(s) => std::str::from_utf8(s).ok().and_then(parse_start_time),
            other => value_as_f64(&other),
        };
    }
    if let Some(value) = data.get(&DURATION_TAG) {
        meta.duration = value_as_f64(&value?).map(|v| v as f32);
    }
    if let Some(value) = data.get(&QSCORE_TAG) {
        meta.qscore = value_as_f64(&value?).map(|v| v as f32);
    }
    Ok(meta)
}

fn value_as_f64(value: &Value<'_>) -> Option<f64> {
    match value {
        Value::Int8(n) => Some(*n as f64),
        Value::UInt8(n) => Some(*n as f64),
        Value::Int16(n) => Some(*n as f64),
        Value::UInt16(n) => Some(*n as f64),
        Value::Int32(n) => Some(*n as f64),
        Value::UInt32(n) => Some(*n as f64),
        Value::Float(n) => Some(*n as f64),
        Value::String(s) => std::str::from_utf8(s).ok()?.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_guppy_style_header() {
        let meta = parse_header(
            b"@0a1b runid=f00 read=17 ch=412 start_time=2019-11-26T13:14:15Z flow_cell_id=FAK1",
        );
        assert_eq!(meta.channel, Some(412));
        assert_eq!(meta.start_time, Some(1_574_774_055.0));
        assert_eq!(meta.duration, None);
        assert!(meta.is_rich());
    }

    #[test]
    fn parses_sam_style_tags() {
        let meta = parse_header(
            b"@0a1b\tqs:f:12.5\tdu:f:1.25\tch:i:7\tst:Z:2023-05-10T12:00:00.500+00:00",
        );
        assert_eq!(meta.channel, Some(7));
        assert_eq!(meta.duration, Some(1.25));
        assert_eq!(meta.qscore, Some(12.5));
        assert_eq!(meta.start_time, Some(1_683_720_000.5));
    }

    #[test]
    fn plain_header_is_not_rich() {
        let meta = parse_header(b"@SRR001666.1 071112_SLXA-EAS1_s_7:5:1:817:345 length=36");
        assert_eq!(meta, ReadMeta::default());
        assert!(!meta.is_rich());
    }

    #[test]
    fn malformed_values_degrade_to_missing() {
        let meta = parse_header(b"@r ch=abc start_time=yesterday");
        assert_eq!(meta.channel, None);
        assert_eq!(meta.start_time, None);
    }

    #[test]
    fn numeric_start_time_is_taken_as_seconds() {
        assert_eq!(parse_start_time("12.5"), Some(12.5));
        assert_eq!(parse_start_time("NaN"), None);
    }
}
