//! Retry and backoff helpers
//!
//! Two flavours:
//! - [`retry_on_lock`]: short in-place retries for SQLite "database is locked"
//!   errors, exponential backoff until a wall-clock budget is spent.
//! - [`RetryPolicy`] / [`FailureTracker`]: per-item bookkeeping for
//!   downloads, where a failed item waits out a backoff window before the
//!   next cycle may try it again and is abandoned after a bounded number of
//!   attempts.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Retry a database operation with exponential backoff until `max_wait_ms` elapses.
///
/// Only lock contention is retried; any other error is returned immediately.
/// Backoff starts at 10ms and doubles up to 1000ms.
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = 10u64;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_lock_error(&err) {
                    return Err(err);
                }

                let elapsed = start_time.elapsed();
                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        max_wait_ms,
                        "Database operation failed: max retry time exceeded"
                    );
                    return Err(err);
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "Database locked, will retry after backoff"
                );

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(1000);
            }
        }
    }
}

fn is_lock_error(err: &sqlx::Error) -> bool {
    err.to_string().contains("database is locked")
}

/// Bounded retry policy with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts before the item is abandoned
    pub max_attempts: u32,
    /// Wait after the first failure
    pub base_backoff: Duration,
    /// Upper bound for any single wait
    pub max_backoff: Duration,
    /// How long an abandoned item stays out of rotation
    pub abandon_for: Duration,
}

impl RetryPolicy {
    /// Wait required after `failures` consecutive failures (1-based)
    pub fn backoff_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (failures - 1).min(16);
        let scaled = self.base_backoff.saturating_mul(1u32 << exponent);
        scaled.min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(600),
            abandon_for: Duration::from_secs(1800),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    failures: u32,
    last_failure: Instant,
}

/// Answer to "may this item be tried now?"
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// No recent failure blocks the attempt
    Ready,
    /// Still inside the backoff window
    Wait(Duration),
    /// Attempts exhausted; pick another item
    GiveUp,
}

/// Tracks consecutive failures per item id
#[derive(Debug, Default)]
pub struct FailureTracker {
    policy: RetryPolicy,
    records: HashMap<String, FailureRecord>,
}

impl FailureTracker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            records: HashMap::new(),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Record a failure, returning the consecutive failure count
    ///
    /// An abandonment that has run out starts a fresh count.
    pub fn record_failure(&mut self, item_id: &str) -> u32 {
        self.prune();
        let now = Instant::now();
        let record = self
            .records
            .entry(item_id.to_string())
            .or_insert(FailureRecord {
                failures: 0,
                last_failure: now,
            });
        record.failures += 1;
        record.last_failure = now;
        record.failures
    }

    /// Mark an item as not worth retrying (e.g. larger than the per-item cap)
    pub fn give_up(&mut self, item_id: &str) {
        let record = self
            .records
            .entry(item_id.to_string())
            .or_insert(FailureRecord {
                failures: 0,
                last_failure: Instant::now(),
            });
        record.failures = record.failures.max(self.policy.max_attempts);
        record.last_failure = Instant::now();
    }

    /// Ids currently abandoned
    pub fn given_up(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|(_, r)| self.is_abandoned(r))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Forget failures after a success
    pub fn record_success(&mut self, item_id: &str) {
        self.records.remove(item_id);
    }

    /// Give an abandoned item a fresh set of attempts
    pub fn forgive(&mut self, item_id: &str) -> bool {
        self.records.remove(item_id).is_some()
    }

    /// Drop records whose abandonment or backoff has run out
    pub fn prune(&mut self) {
        let policy = self.policy;
        self.records.retain(|_, r| {
            let horizon = if r.failures >= policy.max_attempts {
                policy.abandon_for
            } else {
                policy.backoff_for(r.failures).max(policy.abandon_for)
            };
            r.last_failure.elapsed() < horizon
        });
    }

    /// Items with a live failure record
    pub fn tracked(&self) -> usize {
        self.records.len()
    }

    fn is_abandoned(&self, record: &FailureRecord) -> bool {
        record.failures >= self.policy.max_attempts
            && record.last_failure.elapsed() < self.policy.abandon_for
    }

    pub fn failures(&self, item_id: &str) -> u32 {
        self.records.get(item_id).map(|r| r.failures).unwrap_or(0)
    }

    pub fn decide(&self, item_id: &str) -> RetryDecision {
        let Some(record) = self.records.get(item_id) else {
            return RetryDecision::Ready;
        };

        if record.failures >= self.policy.max_attempts {
            if self.is_abandoned(record) {
                return RetryDecision::GiveUp;
            }
            return RetryDecision::Ready;
        }

        let wait = self.policy.backoff_for(record.failures);
        let elapsed = record.last_failure.elapsed();
        if elapsed >= wait {
            RetryDecision::Ready
        } else {
            RetryDecision::Wait(wait - elapsed)
        }
    }
}
