use std::time::Duration;

/// Exponential backoff: `base * 2^exponent`, capped at `ceiling`
///
/// Saturates instead of overflowing for large exponents.
pub fn backoff(base: Duration, exponent: u32, ceiling: Duration) -> Duration {
    let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(ceiling).min(ceiling)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_per_step() {
        let base = Duration::from_secs(30);
        let ceiling = Duration::from_secs(3600);
        assert_eq!(backoff(base, 0, ceiling), Duration::from_secs(30));
        assert_eq!(backoff(base, 1, ceiling), Duration::from_secs(60));
        assert_eq!(backoff(base, 3, ceiling), Duration::from_secs(240));
    }

    #[test]
    fn test_capped_at_ceiling() {
        let base = Duration::from_secs(30);
        let ceiling = Duration::from_secs(300);
        assert_eq!(backoff(base, 5, ceiling), ceiling);
        assert_eq!(backoff(base, 200, ceiling), ceiling);
    }

    #[test]
    fn test_zero_base() {
        assert_eq!(
            backoff(Duration::ZERO, 4, Duration::from_secs(1)),
            Duration::ZERO
        );
    }
}
