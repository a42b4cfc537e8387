use std::sync::LazyLock;

pub const PHRED_OFFSET: u8 = 33;
pub const MAX_Q: usize = 93;

static ERROR_PROB: LazyLock<[f64; MAX_Q + 1]> = LazyLock::new(|| {
    let mut table = [0f64; MAX_Q + 1];
    for (q, p) in table.iter_mut().enumerate() {
        *p = 10f64.powf(-(q as f64) / 10.0);
    }
    table
});

#[inline]
pub fn error_prob(q: u8) -> Option<f64> {
    ERROR_PROB.get(q as usize).copied()
}

/// Averages in error-probability space. `None` for an empty slice,
/// `Err(position)` for a value above `MAX_Q`.
pub fn mean_qscore_phred(quals: &[u8]) -> Result<Option<f32>, usize> {
    mean_over(quals.iter().copied())
}

pub fn mean_qscore_ascii(qual: &[u8]) -> Result<Option<f32>, usize> {
    // Characters below the offset wrap past MAX_Q and are rejected there.
    mean_over(qual.iter().map(|&c| c.wrapping_sub(PHRED_OFFSET)))
}

fn mean_over<I: Iterator<Item = u8>>(quals: I) -> Result<Option<f32>, usize> {
    let mut sum = 0f64;
    let mut n = 0usize;
    for q in quals {
        sum += error_prob(q).ok_or(n)?;
        n += 1;
    }
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(phred_from_prob(sum / n as f64)))
}

pub fn phred_from_prob(mean_prob: f64) -> f32 {
    round2(-10.0 * mean_prob.log10())
}

pub fn round2(v: f64) -> f32 {
    let r = ((v * 100.0).round() / 100.0) as f32;
    // All-Phred-0 reads land on -0.0.
    if r == 0.0 { 0.0 } else { r }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(4)]
    #[case(7)]
    #[case(20)]
    #[case(40)]
    #[case(93)]
    fn uniform_quality_round_trips(#[case] q: u8) {
        let ascii = vec![q + PHRED_OFFSET; 37];
        let raw = vec![q; 37];
        let from_ascii = mean_qscore_ascii(&ascii).unwrap().unwrap();
        let from_raw = mean_qscore_phred(&raw).unwrap().unwrap();
        assert!((from_ascii - q as f32).abs() < 1e-4, "{from_ascii} != {q}");
        assert_eq!(from_ascii, from_raw);
    }

    #[test]
    fn mean_is_taken_in_probability_space() {
        // Phred 10 and 30: probabilities 0.1 and 0.001, mean 0.0505.
        let q = mean_qscore_ascii(b"+?").unwrap().unwrap();
        assert!((q - 12.97).abs() < 1e-4);
    }

    #[test]
    fn all_zero_quality_is_positive_zero() {
        let q = mean_qscore_ascii(b"!!!!").unwrap().unwrap();
        assert_eq!(q, 0.0);
        assert!(q.is_sign_positive());
        assert!(round2(-0.001).is_sign_positive());
    }

    #[test]
    fn empty_quality_has_no_value() {
        assert_eq!(mean_qscore_ascii(b"").unwrap(), None);
        assert_eq!(mean_qscore_phred(&[]).unwrap(), None);
    }

    #[test]
    fn rejects_characters_outside_phred33() {
        assert_eq!(mean_qscore_ascii(b"!! !"), Err(2));
        assert_eq!(mean_qscore_ascii(b"!!\x7f"), Err(2));
        assert_eq!(mean_qscore_phred(&[10, 94]), Err(1));
    }
}
