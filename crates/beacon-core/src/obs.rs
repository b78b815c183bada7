//! Structured observability hooks for resource invocations.
//!
//! Every lifecycle point emits a `tracing` event with an `event` field so log
//! pipelines can filter on it regardless of the human-readable message.
//! Verbosity comes from `source.log_level` or `BEACON_LOG`; set
//! `BEACON_LOG_FORMAT=json` for JSON lines.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{SinkId, Verb};
use crate::dispatch::{DispatchReport, SinkStatus};
use crate::sink::SinkError;

/// RAII guard that enters an invocation-scoped span for a synchronous verb.
///
/// ```ignore
/// let _span = InvocationSpan::enter(Verb::Check);
/// // events below carry verb = "check"
/// ```
pub struct InvocationSpan {
    _span: tracing::span::EnteredSpan,
}

impl InvocationSpan {
    pub fn enter(verb: Verb) -> Self {
        Self {
            _span: Self::span(verb).entered(),
        }
    }

    /// The span itself, for instrumenting async verbs.
    pub fn span(verb: Verb) -> tracing::Span {
        tracing::info_span!("beacon.invocation", verb = %verb)
    }
}

/// Emit the startup banner.
pub fn emit_banner(version: &str) {
    info!(
        event = "resource.started",
        version = %version,
        "beacon: This is the Beacon commit status resource. {version}"
    );
}

pub fn emit_verb_finished(verb: Verb, duration_ms: u64, success: bool) {
    info!(
        event = "verb.finished",
        verb = %verb,
        duration_ms = duration_ms,
        success = success,
    );
}

pub fn emit_commit_resolved(commit: &str, checkout: &std::path::Path) {
    info!(event = "repo.commit_resolved", commit = %commit, checkout = %checkout.display());
}

pub fn emit_sinks_resolved(active: &[SinkId]) {
    let names: Vec<&str> = active.iter().map(SinkId::as_str).collect();
    info!(event = "sinks.resolved", sinks = ?names);
}

pub fn emit_sink_skipped(sink: SinkId, reason: &str) {
    info!(event = "sink.skipped", sink = %sink, reason = %reason);
}

/// `url` must already be redacted.
pub fn emit_sink_attempt(sink: SinkId, attempt: u32, url: &str) {
    debug!(event = "sink.attempt", sink = %sink, attempt = attempt, url = %url);
}

pub fn emit_sink_delivered(sink: SinkId, attempts: u32, status: u16) {
    info!(
        event = "sink.delivered",
        sink = %sink,
        attempts = attempts,
        http_status = status,
    );
}

pub fn emit_sink_retry(sink: SinkId, attempt: u32, delay: Duration, error: &SinkError) {
    warn!(
        event = "sink.retry",
        sink = %sink,
        attempt = attempt,
        delay_ms = delay.as_millis() as u64,
        error = %error,
    );
}

pub fn emit_sink_failed(sink: SinkId, primary: bool, attempts: u32, error: &SinkError) {
    if primary {
        tracing::error!(event = "sink.failed", sink = %sink, attempts = attempts, error = %error);
    } else {
        warn!(event = "sink.failed", sink = %sink, attempts = attempts, error = %error);
    }
}

pub fn emit_dispatch_finished(report: &DispatchReport) {
    let mut delivered = 0u32;
    let mut skipped = 0u32;
    let mut failed = 0u32;
    for outcome in &report.outcomes {
        match outcome.status {
            SinkStatus::Delivered => delivered += 1,
            SinkStatus::Skipped(_) => skipped += 1,
            SinkStatus::Failed { .. } => failed += 1,
        }
    }
    info!(
        event = "dispatch.finished",
        delivered = delivered,
        skipped = skipped,
        failed = failed,
    );
}
