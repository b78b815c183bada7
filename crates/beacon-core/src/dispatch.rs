//! Sink dispatch with bounded retry.
//!
//! Each active sink is driven through
//! `Idle -> Sending -> {Delivered | RetryWait -> Sending | Failed}` by
//! [`Dispatcher::deliver`]. Sinks run concurrently; the put only fails when a
//! primary sink fails.
//!
//! Backoff schedule with the default policy (before jitter):
//! - Retry 1: 1s
//! - Retry 2: 2s
//! - Retry 3: 4s
//! - Retry 4: 8s
//!
//! A `Retry-After` header lengthens the next wait, capped at `max_delay`.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rand::Rng;

use crate::config::SinkId;
use crate::error::BeaconError;
use crate::obs;
use crate::sink::{Sink, SinkError, SinkInput};

/// Retry schedule for one sink.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Wait after the first failed attempt.
    pub first_delay: Duration,
    /// Upper bound for any single wait.
    pub max_delay: Duration,
    /// Growth factor between consecutive waits.
    pub multiplier: f64,
    /// Scale each wait to a random 50-100% of its nominal value.
    pub jitter: bool,
    /// Bound on a single attempt, response body included.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            first_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
            attempt_timeout: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// `max_attempts` attempts with no wait in between.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            first_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
            attempt_timeout: Duration::from_secs(10),
        }
    }

    /// Nominal wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let secs = self.first_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Actual wait after failed attempt `attempt`, honouring `retry_after`.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let mut delay = self.backoff(attempt);
        if self.jitter && !delay.is_zero() {
            let factor = rand::thread_rng().gen_range(0.5..=1.0);
            delay = delay.mul_f64(factor);
        }
        if let Some(requested) = retry_after {
            delay = delay.max(requested);
        }
        delay.min(self.max_delay)
    }
}

/// Response pattern that marks an HTTP failure as worth retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientRule {
    pub statuses: RangeInclusive<u16>,
    /// Case-insensitive substring the response body must contain.
    pub body_contains: Option<String>,
}

impl TransientRule {
    pub fn status(status: u16) -> Self {
        Self {
            statuses: status..=status,
            body_contains: None,
        }
    }

    pub fn range(statuses: RangeInclusive<u16>) -> Self {
        Self {
            statuses,
            body_contains: None,
        }
    }

    pub fn with_body(status: u16, needle: &str) -> Self {
        Self {
            statuses: status..=status,
            body_contains: Some(needle.to_ascii_lowercase()),
        }
    }

    pub fn matches(&self, status: u16, body: &str) -> bool {
        if !self.statuses.contains(&status) {
            return false;
        }
        match &self.body_contains {
            Some(needle) => body.to_ascii_lowercase().contains(needle.as_str()),
            None => true,
        }
    }
}

/// Decides whether a failed attempt is transient.
///
/// Transport failures and timeouts are always transient; HTTP failures are
/// transient when any rule matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifier {
    rules: Vec<TransientRule>,
}

impl Default for Classifier {
    /// Rules for the GitHub API, also suitable for the chat webhook.
    fn default() -> Self {
        Self::new(vec![
            TransientRule::range(500..=599),
            TransientRule::status(429),
            TransientRule::with_body(403, "rate limit"),
            // A just-pushed commit can take a moment to become visible.
            TransientRule::with_body(422, "No commit found for SHA"),
            TransientRule::with_body(404, "No commit found"),
        ])
    }
}

impl Classifier {
    pub fn new(rules: Vec<TransientRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[TransientRule] {
        &self.rules
    }

    pub fn is_transient(&self, error: &SinkError) -> bool {
        match error {
            SinkError::Network(_) | SinkError::Timeout(_) => true,
            SinkError::Payload(_) => false,
            SinkError::Http { status, body, .. } => {
                self.rules.iter().any(|rule| rule.matches(*status, body))
            }
        }
    }
}

/// Terminal state of one sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkStatus {
    Delivered,
    Skipped(String),
    Failed {
        error: SinkError,
        /// True when the retry budget ran out on a transient failure.
        exhausted: bool,
    },
}

/// Result of driving one sink to a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkOutcome {
    pub sink: SinkId,
    pub primary: bool,
    pub status: SinkStatus,
    pub attempts: u32,
}

impl SinkOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, SinkStatus::Failed { .. })
    }

    /// Human-readable outcome for the response metadata.
    pub fn summary(&self) -> String {
        match &self.status {
            SinkStatus::Delivered => "delivered".to_string(),
            SinkStatus::Skipped(reason) => format!("skipped: {reason}"),
            SinkStatus::Failed {
                error,
                exhausted: true,
            } => format!("failed after {} attempts: {error}", self.attempts),
            SinkStatus::Failed { error, .. } => format!("failed: {error}"),
        }
    }

    /// Error for a failed outcome.
    pub fn error(&self) -> Option<BeaconError> {
        match &self.status {
            SinkStatus::Failed {
                error,
                exhausted: true,
            } => Some(BeaconError::SinkExhausted {
                sink: self.sink,
                attempts: self.attempts,
                source: error.clone(),
            }),
            SinkStatus::Failed { error, .. } => Some(BeaconError::SinkRejected {
                sink: self.sink,
                source: error.clone(),
            }),
            _ => None,
        }
    }
}

/// Outcomes of one dispatch, in dispatch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub outcomes: Vec<SinkOutcome>,
}

impl DispatchReport {
    pub fn outcome(&self, sink: SinkId) -> Option<&SinkOutcome> {
        self.outcomes.iter().find(|o| o.sink == sink)
    }

    /// Fails with the first failed primary sink. Secondary failures only count
    /// in the metadata.
    pub fn into_result(self) -> Result<Self, BeaconError> {
        let failure = self
            .outcomes
            .iter()
            .filter(|o| o.primary)
            .find_map(SinkOutcome::error);
        match failure {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// Drives sinks to completion under a retry policy.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    policy: RetryPolicy,
    classifier: Classifier,
}

impl Dispatcher {
    pub fn new(policy: RetryPolicy, classifier: Classifier) -> Self {
        Self { policy, classifier }
    }

    /// Deliver to every sink concurrently.
    pub async fn dispatch(&self, sinks: &[Arc<dyn Sink>], input: SinkInput<'_>) -> DispatchReport {
        let outcomes = join_all(sinks.iter().map(|sink| self.deliver(sink.as_ref(), &input))).await;
        let report = DispatchReport { outcomes };
        obs::emit_dispatch_finished(&report);
        report
    }

    /// Deliver to one sink, retrying transient failures.
    pub async fn deliver(&self, sink: &dyn Sink, input: &SinkInput<'_>) -> SinkOutcome {
        let id = sink.id();
        let primary = sink.is_primary();
        let finish = |status: SinkStatus, attempts: u32| SinkOutcome {
            sink: id,
            primary,
            status,
            attempts,
        };

        if let Some(reason) = sink.skip_reason(input) {
            obs::emit_sink_skipped(id, &reason);
            return finish(SinkStatus::Skipped(reason), 0);
        }

        let payload = match sink.build_payload(input) {
            Ok(payload) => payload,
            Err(error) => {
                obs::emit_sink_failed(id, primary, 0, &error);
                return finish(
                    SinkStatus::Failed {
                        error,
                        exhausted: false,
                    },
                    0,
                );
            }
        };
        let url = payload.redacted_url();

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            obs::emit_sink_attempt(id, attempt, &url);

            let result = tokio::time::timeout(self.policy.attempt_timeout, sink.send(&payload))
                .await
                .unwrap_or_else(|_| Err(SinkError::Timeout(self.policy.attempt_timeout)));

            let error = match result {
                Ok(delivery) => {
                    obs::emit_sink_delivered(id, attempt, delivery.status);
                    return finish(SinkStatus::Delivered, attempt);
                }
                Err(error) => error,
            };

            let transient = self.classifier.is_transient(&error);
            if !transient || attempt >= max_attempts {
                obs::emit_sink_failed(id, primary, attempt, &error);
                return finish(
                    SinkStatus::Failed {
                        error,
                        exhausted: transient,
                    },
                    attempt,
                );
            }

            let delay = self.policy.delay_for(attempt, error.retry_after());
            obs::emit_sink_retry(id, attempt, delay, &error);
            tokio::time::sleep(delay).await;
        }
    }
}
