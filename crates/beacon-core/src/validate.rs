//! Request validation.
//!
//! Validation never stops at the first problem: every detectable violation
//! at a stage is collected so a misconfigured pipeline can be fixed in one
//! round-trip. Violations are reported in a fixed order so the resulting
//! message is deterministic.
//!
//! Two stages run in sequence:
//! 1. `source` - required keys of the enabled sinks and the sink whitelist
//! 2. request shape - verb-specific fields (`version` for get, `params` for put)
//!
//! Request-shape violations are only meaningful against a valid source, so
//! they are reported only when the source stage is clean.

use crate::config::{chat_webhook, parse_sinks, Params, SinkId, Source, Version};
use crate::error::BeaconError;

/// Verb-specific part of a request.
#[derive(Debug, Clone, Copy)]
pub enum RequestShape<'a> {
    Check,
    Get { version: Option<&'a Version> },
    Put { params: &'a Params },
}

/// Violations collected by [`validate`], grouped by stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Violations {
    pub source: Vec<String>,
    pub request: Vec<String>,
}

impl Violations {
    pub fn is_empty(&self) -> bool {
        self.source.is_empty() && self.request.is_empty()
    }

    /// Map the first failing stage to an error.
    pub fn into_result(self) -> Result<(), BeaconError> {
        if !self.source.is_empty() {
            return Err(BeaconError::InvalidSource(self.source));
        }
        if !self.request.is_empty() {
            return Err(BeaconError::InvalidRequest(self.request));
        }
        Ok(())
    }
}

/// Validate a decoded request. Pure: no I/O, no logging.
pub fn validate(source: &Source, shape: &RequestShape<'_>) -> Violations {
    let mut violations = Violations {
        source: validate_source(source),
        request: Vec::new(),
    };
    if violations.source.is_empty() {
        violations.request = validate_shape(source, shape);
    }
    violations
}

fn validate_source(source: &Source) -> Vec<String> {
    let mut problems = Vec::new();
    match source.configured_sinks() {
        Ok(enabled) => {
            let missing = missing_keys(source, &enabled, source.gchat_webhook.as_deref());
            if !missing.is_empty() {
                problems.push(format!("missing keys: {}", missing.join(", ")));
            }
        }
        // With unrecognized names the enabled set is undefined, so per-sink
        // required keys cannot be checked.
        Err(unknown) => problems.push(invalid_sinks(&unknown)),
    }
    problems
}

fn validate_shape(source: &Source, shape: &RequestShape<'_>) -> Vec<String> {
    let mut problems = Vec::new();
    match shape {
        RequestShape::Check => {}
        RequestShape::Get { version } => {
            if version.map_or(true, |v| v.reference.trim().is_empty()) {
                problems.push("empty 'version' field".to_string());
            }
        }
        RequestShape::Put { params } => {
            let mut missing = Vec::new();
            if params.state.is_none() {
                missing.push("state");
            }

            let mut selected = Vec::new();
            if let Some(names) = params.sinks.as_deref() {
                let (known, unknown) = parse_sinks(names);
                if !unknown.is_empty() {
                    problems.push(format!("params: {}", invalid_sinks(&unknown)));
                }
                selected = known;
            }

            if selected.contains(&SinkId::Gchat) && chat_webhook(source, params).is_none() {
                missing.push("gchat_webhook");
            }
            if !missing.is_empty() {
                problems.insert(0, format!("params: missing keys: {}", missing.join(", ")));
            }

            let repository_keys = missing_keys(source, &selected, None)
                .into_iter()
                .filter(|key| *key != "gchat_webhook")
                .collect::<Vec<_>>();
            if !repository_keys.is_empty() {
                problems.push(format!(
                    "params: sinks need source keys: {}",
                    repository_keys.join(", ")
                ));
            }
        }
    }
    problems
}

/// Required keys absent for the enabled sinks, in declaration order.
fn missing_keys(source: &Source, enabled: &[SinkId], webhook: Option<&str>) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if enabled.contains(&SinkId::Github) {
        for (key, value) in [
            ("owner", &source.owner),
            ("repo", &source.repo),
            ("access_token", &source.access_token),
        ] {
            if value.trim().is_empty() {
                missing.push(key);
            }
        }
    }
    if enabled.contains(&SinkId::Gchat) && webhook.map_or(true, |w| w.trim().is_empty()) {
        missing.push("gchat_webhook");
    }
    missing
}

fn invalid_sinks(unknown: &[String]) -> String {
    format!("invalid sink(s): [{}]", unknown.join(", "))
}
