//! Retry back-off: exponential with full jitter between 50% and 100% of the
//! capped exponential value.

use std::time::Duration;

/// `min(base * 2^(retry_count-1), cap) * (0.5 + rand*0.5)`.
pub fn backoff_delay(retry_count: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = retry_count.saturating_sub(1).min(31);
    let raw = base.as_secs_f64() * f64::from(2u32.saturating_pow(exponent).min(1 << 30));
    let capped = raw.min(cap.as_secs_f64());
    let jitter = 0.5 + rand::random::<f64>() * 0.5;
    Duration::from_secs_f64(capped * jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_stays_within_jitter_band() {
        let base = Duration::from_secs(5);
        let cap = Duration::from_secs(300);
        for retry in 1..=10 {
            let expected = (5.0 * 2f64.powi(retry as i32 - 1)).min(300.0);
            for _ in 0..50 {
                let delay = backoff_delay(retry, base, cap).as_secs_f64();
                assert!(delay >= expected * 0.5 - 1e-9, "retry {}: {}", retry, delay);
                assert!(delay <= expected + 1e-9, "retry {}: {}", retry, delay);
            }
        }
    }

    #[test]
    fn large_retry_counts_cap_out() {
        let delay = backoff_delay(1000, Duration::from_secs(5), Duration::from_secs(300));
        assert!(delay <= Duration::from_secs(300));
    }
}
