//! Aggregate statistics over utilization series

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Percentile with linear interpolation between closest ranks
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// Round to 0.1 and clamp into [0, 100]
pub fn to_percent(value: f64) -> f64 {
    ((value * 10.0).round() / 10.0).clamp(0.0, 100.0)
}

/// (avg, p95) of a series, p95 never below avg
pub fn summarize(values: &[f64]) -> (f64, f64) {
    let avg = to_percent(mean(values));
    let p95 = to_percent(percentile(values, 95.0));
    (avg, p95.max(avg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_interpolates() {
        let values: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        // rank 8.55 between 9 and 10
        assert!((percentile(&values, 95.0) - 9.55).abs() < 1e-9);
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 100.0), 10.0);
    }

    #[test]
    fn test_empty_series() {
        assert_eq!(summarize(&[]), (0.0, 0.0));
    }

    #[test]
    fn test_single_value() {
        assert_eq!(summarize(&[42.04]), (42.0, 42.0));
    }

    #[test]
    fn test_summarize_rounds_and_clamps() {
        let (avg, p95) = summarize(&[10.0, 20.0, 30.0, 40.0]);
        assert_eq!(avg, 25.0);
        assert_eq!(p95, 38.5);

        let (avg, p95) = summarize(&[99.0, 104.0]);
        assert_eq!(avg, 100.0);
        assert_eq!(p95, 100.0);
    }
}
