use async_speed_limit::Limiter;

/// Builds the token-bucket limiter shared by every transfer of this
/// process. An infinite or non-positive rate means no throttling at all,
/// expressed as the absence of a limiter. Clones of the returned limiter
/// share one bucket, so passing it around caps global throughput.
pub fn rate_limiter(bytes_per_second: f64) -> Option<Limiter> {
    (bytes_per_second.is_finite() && bytes_per_second > 0.0).then(|| <Limiter>::new(bytes_per_second))
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use futures_util::AsyncReadExt as _;

    use super::rate_limiter;

    #[test]
    fn test_infinite_rate_disables_throttling() {
        assert!(rate_limiter(f64::INFINITY).is_none());
        assert!(rate_limiter(0.0).is_none());
        assert!(rate_limiter(-5.0).is_none());
        assert!(rate_limiter(f64::NAN).is_none());

        let limiter = rate_limiter(4096.0).unwrap();
        assert_eq!(limiter.speed_limit(), 4096.0);
    }

    #[tokio::test]
    async fn test_limited_read_takes_proportional_time() {
        // 48 KiB at 32 KiB/s has a lower time bound of roughly 1.5s minus
        // the initial bucket burst.
        let payload = vec![0u8; 48 * 1024];
        let limiter = rate_limiter(32.0 * 1024.0).unwrap();
        let mut reader = limiter.clone().limit(futures_util::io::Cursor::new(payload));

        let start = Instant::now();
        let mut total = 0;
        let mut buf = [0u8; 4096];

        loop {
            match reader.read(&mut buf).await.unwrap() {
                0 => break,
                n => total += n,
            }
        }

        assert_eq!(total, 48 * 1024);
        assert!(
            start.elapsed() >= Duration::from_millis(1000),
            "transfer finished implausibly fast: {:?}",
            start.elapsed()
        );
    }
}
