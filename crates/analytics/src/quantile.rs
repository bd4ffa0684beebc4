//! Interpolated quantiles and quintile scoring shared by the RFM and
//! preference services.

/// Linear-interpolation quantile over unsorted values, matching the
/// behavior of the usual numeric libraries. Returns `None` on empty input.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    if lower == upper {
        return Some(sorted[lower]);
    }
    let fraction = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Quintile thresholds at 0.2/0.4/0.6/0.8.
pub fn quintile_thresholds(values: &[f64]) -> Option<[f64; 4]> {
    if values.is_empty() {
        return None;
    }
    Some([
        quantile(values, 0.2)?,
        quantile(values, 0.4)?,
        quantile(values, 0.6)?,
        quantile(values, 0.8)?,
    ])
}

/// Positive scoring: larger values earn larger scores (frequency, monetary).
/// `None` inputs score 0.
pub fn score_positive(values: &[Option<f64>]) -> Vec<i64> {
    let present: Vec<f64> = values.iter().filter_map(|v| *v).collect();
    let Some(thresholds) = quintile_thresholds(&present) else {
        return vec![0; values.len()];
    };
    values
        .iter()
        .map(|value| match value {
            None => 0,
            Some(v) if *v <= thresholds[0] => 1,
            Some(v) if *v <= thresholds[1] => 2,
            Some(v) if *v <= thresholds[2] => 3,
            Some(v) if *v <= thresholds[3] => 4,
            Some(_) => 5,
        })
        .collect()
}

/// Inverse scoring: smaller values earn larger scores (recency in days).
pub fn score_inverse(values: &[Option<f64>]) -> Vec<i64> {
    let present: Vec<f64> = values.iter().filter_map(|v| *v).collect();
    let Some(thresholds) = quintile_thresholds(&present) else {
        return vec![0; values.len()];
    };
    values
        .iter()
        .map(|value| match value {
            None => 0,
            Some(v) if *v <= thresholds[0] => 5,
            Some(v) if *v <= thresholds[1] => 4,
            Some(v) if *v <= thresholds[2] => 3,
            Some(v) if *v <= thresholds[3] => 2,
            Some(_) => 1,
        })
        .collect()
}
