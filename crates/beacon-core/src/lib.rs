//! Beacon Core - commit build-status resource for Concourse
//!
//! Implements the three resource entry points (`check`, `in`, `out`):
//! - decodes and validates the `source`/`params` configuration
//! - resolves the active sinks (GitHub commit status, Google Chat)
//! - dispatches each sink with bounded retry and aggregates the outcomes
//! - encodes the version/metadata response for the orchestrator

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod obs;
pub mod output;
pub mod repo;
pub mod resource;
pub mod sink;
pub mod telemetry;
pub mod template;
pub mod validate;

pub use config::{
    peek_log_level, BuildState, CheckRequest, GetRequest, LogLevel, MetadataField, Output,
    Params, PutRequest, SinkId, Source, Verb, Version,
};
pub use context::BuildContext;
pub use dispatch::{
    Classifier, DispatchReport, Dispatcher, RetryPolicy, SinkOutcome, SinkStatus, TransientRule,
};
pub use error::{BeaconError, RepoError, Result, VerbError};
pub use obs::{emit_banner, InvocationSpan};
pub use repo::Checkout;
pub use resource::Resource;
pub use sink::{Delivery, Payload, Sink, SinkError, SinkInput, SinkRegistry};
pub use telemetry::init_tracing;
pub use validate::{validate, RequestShape, Violations};
