//! Aggregate statistics over nullable numeric results.
//!
//! Absent values (`None`) mean "this job did not produce a comparable value"
//! and are excluded from both the mean and the deviation. An input with no
//! present values has no mean, so both functions return `None` for it.

/// Arithmetic mean of the present values.
pub fn mean<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let (sum, count) = values
        .into_iter()
        .flatten()
        .fold((0.0_f64, 0_usize), |(sum, count), v| (sum + v, count + 1));

    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Population standard deviation (divisor N, not N-1) of the present values.
///
/// `sqrt(mean((x - mean(x))^2))`
pub fn std_dev<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let present: Vec<f64> = values.into_iter().flatten().collect();
    let avg = mean(present.iter().copied().map(Some))?;
    let variance = mean(present.iter().map(|v| Some((v - avg).powi(2))))?;
    Some(variance.sqrt())
}
