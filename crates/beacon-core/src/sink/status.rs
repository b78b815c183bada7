//! GitHub commit status sink.
//!
//! Posts `{state, target_url, description, context}` to
//! `POST /repos/{owner}/{repo}/statuses/{sha}`. GitHub keeps the latest
//! status per context, so re-posting an identical status is harmless.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::json;

use super::{api_message, send_json, Delivery, Payload, Sink, SinkError, SinkInput};
use crate::config::{Params, SinkId, Source};
use crate::context::BuildContext;

/// GitHub limits status descriptions to 140 characters.
const MAX_DESCRIPTION: usize = 140;

pub struct StatusSink {
    client: Client,
    api_root: String,
    token: String,
}

impl StatusSink {
    pub fn new(client: Client, source: &Source) -> Self {
        Self {
            client,
            api_root: source.api_root(),
            token: source.access_token.clone(),
        }
    }
}

/// Status context: `params.context`, else the job name, with the optional
/// `context_prefix`.
pub fn status_context(source: &Source, params: &Params, build: &BuildContext) -> String {
    let base = non_blank(params.context.as_deref())
        .or_else(|| non_blank(build.job_name.as_deref()))
        .unwrap_or("default");
    match non_blank(source.context_prefix.as_deref()) {
        Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), base),
        None => base.to_string(),
    }
}

/// Status description: `params.description`, else `Build <name>`.
pub fn status_description(params: &Params, build: &BuildContext) -> String {
    let description = match non_blank(params.description.as_deref()) {
        Some(text) => text.to_string(),
        None => match build.build_name.as_deref() {
            Some(name) => format!("Build {name}"),
            None => "Build".to_string(),
        },
    };
    truncate_chars(&description, MAX_DESCRIPTION)
}

#[async_trait]
impl Sink for StatusSink {
    fn id(&self) -> SinkId {
        SinkId::Github
    }

    fn is_primary(&self) -> bool {
        true
    }

    fn build_payload(&self, input: &SinkInput<'_>) -> Result<Payload, SinkError> {
        let mut url = Url::parse(&self.api_root)
            .map_err(|e| SinkError::Payload(format!("{}: {e}", self.api_root)))?;
        url.path_segments_mut()
            .map_err(|()| SinkError::Payload(format!("{}: not a base URL", self.api_root)))?
            .pop_if_empty()
            .extend([
                "repos",
                input.source.owner.as_str(),
                input.source.repo.as_str(),
                "statuses",
                input.commit,
            ]);

        let mut body = json!({
            "state": input.state.github_state(),
            "description": status_description(input.params, input.build),
            "context": status_context(input.source, input.params, input.build),
        });
        if !input.source.omit_target_url {
            if let Some(target) = input.build.build_url() {
                body["target_url"] = json!(target);
            }
        }
        Ok(Payload { url, body })
    }

    async fn send(&self, payload: &Payload) -> Result<Delivery, SinkError> {
        let request = self
            .client
            .post(payload.url.clone())
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        send_json(request, &payload.body, describe_failure).await
    }
}

fn describe_failure(status: StatusCode, body: &str) -> String {
    let detail = api_message(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unexpected response")
            .to_string()
    });
    let hint = match status {
        StatusCode::UNAUTHORIZED => "access_token is invalid or expired",
        StatusCode::FORBIDDEN => {
            "access_token lacks permission to write commit statuses, or the rate limit is exhausted"
        }
        StatusCode::NOT_FOUND => {
            "check owner and repo, and that access_token can see the repository"
        }
        StatusCode::UNPROCESSABLE_ENTITY => "the commit may not be pushed to GitHub yet",
        _ => return detail,
    };
    format!("{detail} ({hint})")
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
