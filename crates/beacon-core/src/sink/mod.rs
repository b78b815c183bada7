//! Notification sinks.
//!
//! A sink turns the put request into one HTTP call. The dispatcher never
//! branches on the kind of sink: it only sees the [`Sink`] trait, so adding a
//! destination means adding a [`SinkId`] variant and registering an
//! implementation in [`SinkRegistry`].

pub mod chat;
pub mod status;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Url};

use crate::config::{chat_webhook, dispatch_order, BuildState, Params, SinkId, Source};
use crate::context::BuildContext;
use crate::template::TemplateVars;

pub use chat::ChatSink;
pub use status::StatusSink;

/// Why a delivery attempt failed.
///
/// Whether a failure is worth retrying is decided by the dispatcher's
/// `Classifier`, not by the sink.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        body: String,
        retry_after: Option<Duration>,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("invalid payload: {0}")]
    Payload(String),
}

impl SinkError {
    /// Server-requested wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SinkError::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// A rendered request, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub url: Url,
    pub body: serde_json::Value,
}

impl Payload {
    /// URL without query string or credentials, safe to log.
    pub fn redacted_url(&self) -> String {
        redact_url(&self.url)
    }
}

/// Acknowledgement of a successful delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub status: u16,
}

/// Everything a sink may draw on to build its payload.
#[derive(Debug, Clone, Copy)]
pub struct SinkInput<'a> {
    pub source: &'a Source,
    pub params: &'a Params,
    pub build: &'a BuildContext,
    pub commit: &'a str,
    pub state: BuildState,
    /// Chat template from `chat_message` or the contents of `chat_message_file`.
    pub chat_template: Option<&'a str>,
}

impl SinkInput<'_> {
    /// First 7 characters of the commit.
    pub fn short_commit(&self) -> &str {
        let end = self
            .commit
            .char_indices()
            .nth(7)
            .map_or(self.commit.len(), |(i, _)| i);
        &self.commit[..end]
    }

    /// Web link to the commit, when the repository coordinates are known.
    pub fn commit_url(&self) -> Option<String> {
        if self.source.owner.is_empty() || self.source.repo.is_empty() {
            return None;
        }
        Some(format!(
            "{}/{}/{}/commit/{}",
            self.source.web_root(),
            self.source.owner,
            self.source.repo,
            self.commit
        ))
    }

    /// Placeholder values for chat templates.
    pub fn template_vars(&self) -> TemplateVars {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        let mut vars = TemplateVars::new();
        vars.set("BUILD_ID", self.build.build_id.clone())
            .set("BUILD_NAME", self.build.build_name.clone())
            .set("BUILD_JOB_NAME", self.build.job_name.clone())
            .set("BUILD_PIPELINE_NAME", self.build.pipeline_name.clone())
            .set("BUILD_TEAM_NAME", self.build.team_name.clone())
            .set("ATC_EXTERNAL_URL", self.build.atc_external_url.clone())
            .set("BUILD_URL", self.build.build_url())
            .set("STATE", Some(self.state.as_str()))
            .set("COMMIT", non_empty(self.commit))
            .set("SHORT_COMMIT", non_empty(self.short_commit()))
            .set("OWNER", non_empty(self.source.owner.as_str()))
            .set("REPO", non_empty(self.source.repo.as_str()));
        vars
    }
}

/// A destination for build-status notifications.
#[async_trait]
pub trait Sink: Send + Sync {
    fn id(&self) -> SinkId;

    /// Whether the outcome of the put depends on this sink.
    fn is_primary(&self) -> bool {
        false
    }

    /// Reason to skip delivery for this input, if any.
    fn skip_reason(&self, _input: &SinkInput<'_>) -> Option<String> {
        None
    }

    /// Render the request for this input. Pure.
    fn build_payload(&self, input: &SinkInput<'_>) -> Result<Payload, SinkError>;

    /// Perform one delivery attempt.
    async fn send(&self, payload: &Payload) -> Result<Delivery, SinkError>;
}

/// Sink implementations keyed by identifier.
#[derive(Default, Clone)]
pub struct SinkRegistry {
    sinks: BTreeMap<SinkId, Arc<dyn Sink>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the concrete sinks a put request can use.
    pub fn for_put(source: &Source, params: &Params, client: reqwest::Client) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(StatusSink::new(client.clone(), source)));
        if let Some(webhook) = chat_webhook(source, params) {
            registry.register(Arc::new(ChatSink::new(client, webhook)));
        }
        registry
    }

    /// Register `sink`, replacing any sink with the same id.
    pub fn register(&mut self, sink: Arc<dyn Sink>) -> &mut Self {
        self.sinks.insert(sink.id(), sink);
        self
    }

    pub fn contains(&self, id: SinkId) -> bool {
        self.sinks.contains_key(&id)
    }

    /// Registered sinks for `active`, in dispatch order.
    pub fn resolve(&self, active: &[SinkId]) -> Vec<Arc<dyn Sink>> {
        dispatch_order(active.to_vec())
            .into_iter()
            .filter_map(|id| {
                let sink = self.sinks.get(&id).cloned();
                if sink.is_none() {
                    tracing::warn!(event = "sink.unregistered", sink = %id);
                }
                sink
            })
            .collect()
    }
}

/// Send a JSON request and map the response to a delivery or a [`SinkError`].
///
/// `describe` turns a failing status and its body into a human-readable
/// message.
pub(crate) async fn send_json(
    request: RequestBuilder,
    body: &serde_json::Value,
    describe: impl Fn(reqwest::StatusCode, &str) -> String,
) -> Result<Delivery, SinkError> {
    let response = request.json(body).send().await.map_err(transport_error)?;
    let status = response.status();
    if status.is_success() {
        return Ok(Delivery {
            status: status.as_u16(),
        });
    }

    let retry_after = retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(SinkError::Http {
        status: status.as_u16(),
        message: describe(status, &body),
        body,
        retry_after,
    })
}

/// `Retry-After` in delay-seconds form. HTTP-date values are ignored.
fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn transport_error(err: reqwest::Error) -> SinkError {
    // reqwest embeds the full URL in its messages; webhook URLs carry secrets.
    let err = err.without_url();
    if err.is_timeout() {
        SinkError::Network(format!("request timed out: {err}"))
    } else {
        SinkError::Network(err.to_string())
    }
}

/// Strip query, fragment and credentials from `url`.
pub fn redact_url(url: &Url) -> String {
    let mut clean = url.clone();
    clean.set_query(None);
    clean.set_fragment(None);
    let _ = clean.set_username("");
    let _ = clean.set_password(None);
    clean.to_string()
}

/// `message` from a GitHub-style JSON error body.
pub(crate) fn api_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .or_else(|| value.get("error").and_then(|e| e.get("message")))
        .and_then(|m| m.as_str())
        .map(str::to_string)
}
