//! Google Chat webhook sink.
//!
//! Messages for the same pipeline and commit share a thread. Chat is a
//! secondary sink: its failures are reported but never fail the put.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::json;

use super::{api_message, send_json, Delivery, Payload, Sink, SinkError, SinkInput};
use crate::config::{BuildState, SinkId};
use crate::template::render;

pub struct ChatSink {
    client: Client,
    webhook: String,
}

impl ChatSink {
    pub fn new(client: Client, webhook: &str) -> Self {
        Self {
            client,
            webhook: webhook.trim().to_string(),
        }
    }
}

/// States that trigger a notification for this input.
pub fn notify_states(input: &SinkInput<'_>) -> Vec<BuildState> {
    input
        .params
        .chat_notify_on_states
        .clone()
        .or_else(|| input.source.chat_notify_on_states.clone())
        .unwrap_or_else(BuildState::default_chat_states)
}

/// Thread key grouping every message about one commit of one pipeline.
pub fn thread_key(input: &SinkInput<'_>) -> String {
    let scope = match input.build.pipeline_name.as_deref() {
        Some(pipeline) => pipeline.to_string(),
        None => format!("{}/{}", input.source.owner, input.source.repo),
    };
    format!("{scope} {}", input.commit)
}

/// Message body: the rendered template, the summary, or both.
pub fn message_text(input: &SinkInput<'_>) -> String {
    let summary = summary(input);
    let append = input
        .params
        .chat_append_summary
        .or(input.source.chat_append_summary)
        .unwrap_or(true);
    match input.chat_template {
        Some(template) => {
            let rendered = render(template, &input.template_vars());
            if append {
                format!("{}\n\n{summary}", rendered.trim_end())
            } else {
                rendered
            }
        }
        None => summary,
    }
}

fn summary(input: &SinkInput<'_>) -> String {
    let mut lines = vec![format!(
        "{} *{}* {}",
        state_icon(input.state),
        input.build.job_path(),
        input.state
    )];

    let commit = match input.commit_url() {
        Some(url) => format!(
            "*commit* <{url}|{}> ({}/{})",
            input.short_commit(),
            input.source.owner,
            input.source.repo
        ),
        None => format!("*commit* {}", input.short_commit()),
    };
    lines.push(commit);

    if let Some(name) = input.build.build_name.as_deref() {
        match input.build.build_url() {
            Some(url) => lines.push(format!("*build* <{url}|#{name}>")),
            None => lines.push(format!("*build* #{name}")),
        }
    }
    lines.join("\n")
}

fn state_icon(state: BuildState) -> &'static str {
    match state {
        BuildState::Pending => "🟡",
        BuildState::Success => "🟢",
        BuildState::Failure => "🔴",
        BuildState::Error => "🟠",
        BuildState::Abort => "🟤",
    }
}

#[async_trait]
impl Sink for ChatSink {
    fn id(&self) -> SinkId {
        SinkId::Gchat
    }

    fn skip_reason(&self, input: &SinkInput<'_>) -> Option<String> {
        if input.source.chat_always || notify_states(input).contains(&input.state) {
            return None;
        }
        Some(format!("state {} not in chat_notify_on_states", input.state))
    }

    fn build_payload(&self, input: &SinkInput<'_>) -> Result<Payload, SinkError> {
        // Never echo the webhook: it embeds the space key and token.
        let mut url = Url::parse(&self.webhook)
            .map_err(|e| SinkError::Payload(format!("gchat_webhook is not a valid URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("threadKey", &thread_key(input))
            .append_pair("messageReplyOption", "REPLY_MESSAGE_FALLBACK_TO_NEW_THREAD");
        Ok(Payload {
            url,
            body: json!({ "text": message_text(input) }),
        })
    }

    async fn send(&self, payload: &Payload) -> Result<Delivery, SinkError> {
        let request = self.client.post(payload.url.clone());
        send_json(request, &payload.body, describe_failure).await
    }
}

fn describe_failure(status: StatusCode, body: &str) -> String {
    api_message(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unexpected response")
            .to_string()
    })
}
