//! The three resource verbs.
//!
//! Each verb takes the raw request bytes and writes its response to `out`.
//! Errors come back as [`VerbError`], whose display is the single line the
//! CLI prints before exiting non-zero.

use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::Instrument;

use crate::config::{
    active_sinks, CheckRequest, GetRequest, Params, PutRequest, SinkId, Source, Verb,
};
use crate::context::BuildContext;
use crate::dispatch::{Classifier, Dispatcher, RetryPolicy};
use crate::error::{BeaconError, Result, VerbError};
use crate::obs::{self, InvocationSpan};
use crate::output;
use crate::repo::Checkout;
use crate::sink::status::status_context;
use crate::sink::{SinkInput, SinkRegistry};
use crate::validate::{validate, RequestShape};

const USER_AGENT: &str = concat!("beacon/", env!("CARGO_PKG_VERSION"));

/// Connection setup budget, separate from the per-attempt bound.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Verb runner for one invocation.
#[derive(Debug, Clone, Default)]
pub struct Resource {
    build: BuildContext,
    policy: RetryPolicy,
    classifier: Classifier,
}

impl Resource {
    pub fn new(build: BuildContext) -> Self {
        Self {
            build,
            ..Default::default()
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// `check`: validate the source and report no versions.
    pub fn check(&self, input: &[u8], out: &mut dyn Write) -> std::result::Result<(), VerbError> {
        let _span = InvocationSpan::enter(Verb::Check);
        timed(Verb::Check, || {
            let request: CheckRequest = decode(input)?;
            validate(&request.source, &RequestShape::Check).into_result()?;
            output::write_json(out, &output::check_output())
        })
    }

    /// `get` (`in`): echo the requested version.
    pub fn get(
        &self,
        input: &[u8],
        out: &mut dyn Write,
        dir: Option<&Path>,
    ) -> std::result::Result<(), VerbError> {
        let _span = InvocationSpan::enter(Verb::Get);
        timed(Verb::Get, || {
            let request: GetRequest = decode(input)?;
            let shape = RequestShape::Get {
                version: request.version.as_ref(),
            };
            validate(&request.source, &shape).into_result()?;
            output_dir(dir)?;

            let version = request.version.unwrap_or_default();
            output::write_json(out, &output::get_output(version))
        })
    }

    /// `put` (`out`): post the build status to every active sink.
    pub async fn put(
        &self,
        input: &[u8],
        out: &mut (dyn Write + Send),
        dir: Option<&Path>,
    ) -> std::result::Result<(), VerbError> {
        let started = Instant::now();
        let result = self
            .put_inner(input, out, dir)
            .instrument(InvocationSpan::span(Verb::Put))
            .await;
        obs::emit_verb_finished(Verb::Put, elapsed_ms(started), result.is_ok());
        result.map_err(|e| VerbError::new(Verb::Put, e))
    }

    async fn put_inner(
        &self,
        input: &[u8],
        out: &mut (dyn Write + Send),
        dir: Option<&Path>,
    ) -> Result<()> {
        let request: PutRequest = decode(input)?;
        let PutRequest { source, params } = request;
        validate(&source, &RequestShape::Put { params: &params }).into_result()?;
        let dir = output_dir(dir)?;
        let state = params.state.ok_or_else(|| {
            BeaconError::InvalidRequest(vec!["params: missing keys: state".to_string()])
        })?;

        let active = active_sinks(&source, &params);
        obs::emit_sinks_resolved(&active);

        let checkout = Checkout::discover(dir)?;
        let commit = checkout.commit()?;
        if active.contains(&SinkId::Github) {
            checkout.verify_origin(&source.owner, &source.repo)?;
        }
        obs::emit_commit_resolved(&commit, &checkout.path);

        let template = if active.contains(&SinkId::Gchat) {
            chat_template(&params, dir)?
        } else {
            None
        };

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(self.policy.attempt_timeout)
            .build()
            .map_err(|e| BeaconError::Client(e.to_string()))?;
        let sinks = SinkRegistry::for_put(&source, &params, client).resolve(&active);

        let sink_input = SinkInput {
            source: &source,
            params: &params,
            build: &self.build,
            commit: &commit,
            state,
            chat_template: template.as_deref(),
        };
        let report = Dispatcher::new(self.policy.clone(), self.classifier.clone())
            .dispatch(&sinks, sink_input)
            .await
            .into_result()?;

        let context = status_context_for(&source, &params, &self.build, &active);
        let response = output::put_output(&commit, state, context.as_deref(), &report);
        output::write_json(out, &response)
    }
}

fn decode<T: serde::de::DeserializeOwned>(input: &[u8]) -> Result<T> {
    serde_json::from_slice(input).map_err(BeaconError::Decode)
}

fn output_dir(dir: Option<&Path>) -> Result<&Path> {
    dir.ok_or_else(|| BeaconError::Arguments("missing output directory".to_string()))
}

/// Template from `chat_message`, else the contents of `chat_message_file`.
fn chat_template(params: &Params, dir: &Path) -> Result<Option<String>> {
    if let Some(message) = params.chat_message.as_deref().filter(|m| !m.trim().is_empty()) {
        return Ok(Some(message.to_string()));
    }
    let Some(file) = params.chat_message_file.as_deref().filter(|f| !f.trim().is_empty()) else {
        return Ok(None);
    };
    let path = dir.join(file);
    std::fs::read_to_string(&path)
        .map(Some)
        .map_err(|source| BeaconError::ChatMessageFile { path, source })
}

fn status_context_for(
    source: &Source,
    params: &Params,
    build: &BuildContext,
    active: &[SinkId],
) -> Option<String> {
    active
        .contains(&SinkId::Github)
        .then(|| status_context(source, params, build))
}

fn timed(verb: Verb, run: impl FnOnce() -> Result<()>) -> std::result::Result<(), VerbError> {
    let started = Instant::now();
    let result = run();
    obs::emit_verb_finished(verb, elapsed_ms(started), result.is_ok());
    result.map_err(|e| VerbError::new(verb, e))
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
