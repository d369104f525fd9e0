//! Small numeric helpers shared by the scoring code.

/// Convert a count to f64 for ratio calculations.
///
/// Counts here are requirement, capability and token counts, far below the
/// 2^53 limit where the conversion would lose precision.
#[inline]
#[must_use]
pub fn count_to_f64(count: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    {
        count as f64
    }
}

/// `numerator / denominator`, or 0.0 when the denominator is zero
#[inline]
#[must_use]
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}
