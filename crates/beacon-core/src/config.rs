//! Request and response model for the resource protocol.
//!
//! Every request type rejects unknown fields so that a typo in a pipeline
//! configuration fails loudly instead of silently doing nothing.

use serde::{Deserialize, Serialize};

/// The three resource entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Check,
    Get,
    Put,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Check => "check",
            Verb::Get => "get",
            Verb::Put => "put",
        }
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build state reported by `put`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BuildState {
    Pending,
    Success,
    Failure,
    Error,
    Abort,
}

impl BuildState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildState::Pending => "pending",
            BuildState::Success => "success",
            BuildState::Failure => "failure",
            BuildState::Error => "error",
            BuildState::Abort => "abort",
        }
    }

    /// State accepted by the GitHub commit status API, which has no `abort`.
    pub fn github_state(&self) -> &'static str {
        match self {
            BuildState::Abort => "error",
            other => other.as_str(),
        }
    }

    /// States that trigger a chat notification when none are configured.
    pub fn default_chat_states() -> Vec<BuildState> {
        vec![BuildState::Abort, BuildState::Error, BuildState::Failure]
    }
}

impl std::fmt::Display for BuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log verbosity selectable from `source.log_level`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Known sink identifiers.
///
/// Declaration order is the dispatch order: the status sink always goes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SinkId {
    /// GitHub commit status API.
    Github,
    /// Google Chat incoming webhook.
    Gchat,
}

impl SinkId {
    pub const ALL: [SinkId; 2] = [SinkId::Github, SinkId::Gchat];

    pub fn as_str(&self) -> &'static str {
        match self {
            SinkId::Github => "github",
            SinkId::Gchat => "gchat",
        }
    }

    pub fn parse(name: &str) -> Option<SinkId> {
        SinkId::ALL.into_iter().find(|id| id.as_str() == name)
    }
}

impl std::fmt::Display for SinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split sink names into known identifiers and unrecognized names.
pub fn parse_sinks(names: &[String]) -> (Vec<SinkId>, Vec<String>) {
    let mut known = Vec::new();
    let mut unknown = Vec::new();
    for name in names {
        match SinkId::parse(name) {
            Some(id) if !known.contains(&id) => known.push(id),
            Some(_) => {}
            None => unknown.push(name.clone()),
        }
    }
    (known, unknown)
}

/// Sort sink ids into dispatch order, keeping each once.
pub fn dispatch_order(mut ids: Vec<SinkId>) -> Vec<SinkId> {
    ids.sort();
    ids.dedup();
    ids
}

/// Resource configuration from the pipeline's `source:` block.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Source {
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub repo: String,
    #[serde(default)]
    pub access_token: String,
    /// `github.com` (default) or a GitHub Enterprise host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_prefix: Option<String>,
    #[serde(default)]
    pub omit_target_url: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sinks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gchat_webhook: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_notify_on_states: Option<Vec<BuildState>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_append_summary: Option<bool>,
    #[serde(default)]
    pub chat_always: bool,
}

impl Source {
    /// Sink names in effect when `sinks` is not set.
    pub fn default_sinks(&self) -> Vec<SinkId> {
        let mut ids = vec![SinkId::Github];
        if has_text(&self.gchat_webhook) {
            ids.push(SinkId::Gchat);
        }
        ids
    }

    /// Configured sinks, or the unrecognized names when any are present.
    pub fn configured_sinks(&self) -> std::result::Result<Vec<SinkId>, Vec<String>> {
        if self.sinks.is_empty() {
            return Ok(self.default_sinks());
        }
        match parse_sinks(&self.sinks) {
            (known, unknown) if unknown.is_empty() => Ok(dispatch_order(known)),
            (_, unknown) => Err(unknown),
        }
    }

    /// Root of the REST API for the configured host.
    pub fn api_root(&self) -> String {
        match self.github_hostname.as_deref().map(str::trim) {
            None | Some("") | Some("github.com") => "https://api.github.com".to_string(),
            Some(host) if has_scheme(host) => {
                format!("{}/api/v3", host.trim_end_matches('/'))
            }
            Some(host) => format!("https://{}/api/v3", host.trim_end_matches('/')),
        }
    }

    /// Root of the web UI for the configured host, used for commit links.
    pub fn web_root(&self) -> String {
        match self.github_hostname.as_deref().map(str::trim) {
            None | Some("") | Some("github.com") => "https://github.com".to_string(),
            Some(host) if has_scheme(host) => host.trim_end_matches('/').to_string(),
            Some(host) => format!("https://{}", host.trim_end_matches('/')),
        }
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("access_token", &redacted(&self.access_token))
            .field("github_hostname", &self.github_hostname)
            .field("context_prefix", &self.context_prefix)
            .field("omit_target_url", &self.omit_target_url)
            .field("log_level", &self.log_level)
            .field("sinks", &self.sinks)
            .field(
                "gchat_webhook",
                &self.gchat_webhook.as_deref().map(redacted),
            )
            .field("chat_notify_on_states", &self.chat_notify_on_states)
            .field("chat_append_summary", &self.chat_append_summary)
            .field("chat_always", &self.chat_always)
            .finish()
    }
}

/// Per-invocation parameters from the pipeline's `put` step.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Params {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<BuildState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_message: Option<String>,
    /// Path relative to the put input directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_message_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_append_summary: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_notify_on_states: Option<Vec<BuildState>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gchat_webhook: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sinks: Option<Vec<String>>,
}

impl std::fmt::Debug for Params {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Params")
            .field("state", &self.state)
            .field("context", &self.context)
            .field("description", &self.description)
            .field("chat_message", &self.chat_message)
            .field("chat_message_file", &self.chat_message_file)
            .field("chat_append_summary", &self.chat_append_summary)
            .field("chat_notify_on_states", &self.chat_notify_on_states)
            .field(
                "gchat_webhook",
                &self.gchat_webhook.as_deref().map(redacted),
            )
            .field("sinks", &self.sinks)
            .finish()
    }
}

/// Sinks active for a put: `params.sinks` narrows the source configuration.
///
/// Without an explicit `sinks` list on either side, a webhook from `params`
/// enables chat the same way one in `source` does.
pub fn active_sinks(source: &Source, params: &Params) -> Vec<SinkId> {
    match &params.sinks {
        Some(names) if !names.is_empty() => dispatch_order(parse_sinks(names).0),
        _ if source.sinks.is_empty() && chat_webhook(source, params).is_some() => {
            vec![SinkId::Github, SinkId::Gchat]
        }
        _ => source.configured_sinks().unwrap_or_default(),
    }
}

/// Webhook for the chat sink, `params` overriding `source`.
pub fn chat_webhook<'a>(source: &'a Source, params: &'a Params) -> Option<&'a str> {
    params
        .gchat_webhook
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| source.gchat_webhook.as_deref().filter(|s| !s.trim().is_empty()))
}

/// Opaque version token: the commit SHA a status was posted for.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(deny_unknown_fields)]
pub struct Version {
    #[serde(rename = "ref")]
    pub reference: String,
}

impl Version {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
        }
    }
}

/// Request body for `check`.
///
/// Concourse sends the last known version (or `null`) on every check.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CheckRequest {
    pub source: Source,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
}

/// Request body for `get` (`in`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GetRequest {
    pub source: Source,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
}

/// Request body for `put` (`out`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PutRequest {
    pub source: Source,
    #[serde(default)]
    pub params: Params,
}

/// One display pair in the response metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetadataField {
    pub name: String,
    pub value: String,
}

impl MetadataField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Response body for `get` and `put`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Output {
    pub version: Version,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<MetadataField>,
}

/// Read `source.log_level` without validating the rest of the request.
///
/// The logger is configured before the request is decoded for real, so a
/// malformed document simply yields `None` here.
pub fn peek_log_level(input: &[u8]) -> Option<LogLevel> {
    let value: serde_json::Value = serde_json::from_slice(input).ok()?;
    let level = value.get("source")?.get("log_level")?.clone();
    serde_json::from_value(level).ok()
}

fn has_text(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.trim().is_empty())
}

fn has_scheme(host: &str) -> bool {
    host.starts_with("http://") || host.starts_with("https://")
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "***REDACTED***"
    }
}
