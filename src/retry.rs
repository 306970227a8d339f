//! Backoff and cancellable-sleep primitives.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

/// Exponential backoff delay for the given 1-based attempt number:
/// `base * 2^(attempt-1)`, capped, with ±20% jitter.
pub fn backoff_delay(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let attempt = attempt.max(1);
    let exp = base.saturating_mul(1u32 << (attempt - 1).min(16));
    let capped = exp.min(cap);

    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    let with_jitter = capped.mul_f64(jitter);
    with_jitter.min(cap.mul_f64(1.2))
}

/// Sleep that wakes early on cancellation.
///
/// Returns `true` when the full duration elapsed, `false` when the token was
/// cancelled first.
pub async fn sleep_cancellable(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially() {
        let base = Duration::from_secs(5);
        let cap = Duration::from_secs(600);
        // Jitter is ±20%, so compare midpoints via repeated sampling bounds.
        for attempt in 1..=4u32 {
            let expected = base * (1 << (attempt - 1));
            let delay = backoff_delay(base, attempt, cap);
            assert!(delay >= expected.mul_f64(0.8), "attempt {attempt}: {delay:?}");
            assert!(delay <= expected.mul_f64(1.2), "attempt {attempt}: {delay:?}");
        }
    }

    #[test]
    fn backoff_respects_cap() {
        let base = Duration::from_secs(30);
        let cap = Duration::from_secs(60);
        for _ in 0..20 {
            let delay = backoff_delay(base, 10, cap);
            assert!(delay <= cap.mul_f64(1.2));
        }
    }

    #[test]
    fn backoff_attempt_zero_treated_as_first() {
        let base = Duration::from_secs(5);
        let cap = Duration::from_secs(600);
        let delay = backoff_delay(base, 0, cap);
        assert!(delay >= base.mul_f64(0.8) && delay <= base.mul_f64(1.2));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_completes() {
        let cancel = CancellationToken::new();
        assert!(sleep_cancellable(Duration::from_secs(10), &cancel).await);
    }

    #[tokio::test]
    async fn sleep_interrupted_by_cancel() {
        let cancel = CancellationToken::new();
        let sleeper = sleep_cancellable(Duration::from_secs(60), &cancel);
        cancel.cancel();
        assert!(!sleeper.await);
    }
}
