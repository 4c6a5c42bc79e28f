use statrs::statistics::Statistics;

/// Sample standard deviation over a trailing window of up to `window`
/// points ending at each index. Positions with fewer than two points in the
/// window have no value.
pub fn rolling_std_dev(values: &[f64], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let slice = &values[start..=i];
            if slice.len() < 2 {
                None
            } else {
                Some(slice.iter().std_dev())
            }
        })
        .collect()
}
