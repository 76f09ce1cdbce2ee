use std::time::Duration;

/// Deterministic dispatcher job id for one scheduled firing. Encoding
/// `(job_id, current_repeat, current_retry)` in the id is what makes
/// re-enqueueing the same logical firing a no-op on a dispatcher with
/// idempotent `enqueue`/`enqueue_in`: crash recovery
/// and a live dispatcher racing to enqueue the same firing always agree
/// on this string.
pub fn dispatch_job_id(job_id: &str, current_repeat: u64, current_retry: u32) -> String {
  format!("sched-{job_id}-n{current_repeat}-rc{current_retry}")
}

/// Capped exponential backoff: `min(interval * 2^retry, 10 * interval)`.
/// `retry` is the retry count *after* incrementing for the failure just
/// observed (interval=10s: first failure -> retry=1 -> 20s, second
/// failure -> retry=2 -> 40s).
pub fn backoff(interval_seconds: u64, retry: u32) -> Duration {
  let scaled = interval_seconds.saturating_mul(1u64 << retry.min(32));
  Duration::from_secs(scaled.min(interval_seconds.saturating_mul(10)))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn job_id_encodes_repeat_and_retry() {
    assert_eq!(dispatch_job_id("j1", 3, 1), "sched-j1-n3-rc1");
  }

  #[test]
  fn backoff_matches_scenario_s5() {
    assert_eq!(backoff(10, 1), Duration::from_secs(20));
    assert_eq!(backoff(10, 2), Duration::from_secs(40));
  }

  #[test]
  fn backoff_is_capped_at_ten_times_interval() {
    assert_eq!(backoff(10, 10), Duration::from_secs(100));
  }
}
