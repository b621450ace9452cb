//! Small shared helpers.

/// Rounds a value to two decimal places for report output.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2() {
        assert!((round2(1.006) - 1.01).abs() < f64::EPSILON);
        assert!((round2(2.344) - 2.34).abs() < f64::EPSILON);
        assert!((round2(3.0) - 3.0).abs() < f64::EPSILON);
    }
}
