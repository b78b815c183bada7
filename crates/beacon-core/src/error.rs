//! Error taxonomy for the Beacon resource.
//!
//! Every fatal error surfaces to the orchestrator as a single line prefixed
//! with the verb that produced it (`check:`, `get:`, `put:`), see [`VerbError`].

use std::path::PathBuf;

use crate::config::{SinkId, Verb};
use crate::sink::SinkError;

/// Errors produced while locating the git checkout for `put`.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("reading input directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("found no git checkout in {dir}; want exactly 1 (restrict the put step inputs to the repository)")]
    NoCheckout { dir: PathBuf },

    #[error("found {} git checkouts in {dir}: [{}]; want exactly 1 (restrict the put step inputs to the repository)", .found.len(), .found.join(", "))]
    TooManyCheckouts { dir: PathBuf, found: Vec<String> },

    #[error("{path}: no remote \"origin\" configured")]
    NoOrigin { path: PathBuf },

    #[error("git remote origin {url} does not match source {owner}/{repo}")]
    OriginMismatch {
        url: String,
        owner: String,
        repo: String,
    },

    #[error("{path}: invalid HEAD: {reason}")]
    InvalidHead { path: PathBuf, reason: String },

    #[error("{path}: reference {reference} not found")]
    RefNotFound { path: PathBuf, reference: String },
}

/// Errors produced by a single verb invocation.
#[derive(Debug, thiserror::Error)]
pub enum BeaconError {
    #[error("parsing JSON from stdin: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("source: {}", .0.join("; "))]
    InvalidSource(Vec<String>),

    #[error("{}", .0.join("; "))]
    InvalidRequest(Vec<String>),

    #[error("arguments: {0}")]
    Arguments(String),

    #[error("repository: {0}")]
    Repo(#[from] RepoError),

    #[error("reading chat_message_file {path}: {source}")]
    ChatMessageFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("building HTTP client: {0}")]
    Client(String),

    #[error("sink {sink}: {source}")]
    SinkRejected {
        sink: SinkId,
        #[source]
        source: SinkError,
    },

    #[error("sink {sink}: giving up after {attempts} attempts: {source}")]
    SinkExhausted {
        sink: SinkId,
        attempts: u32,
        #[source]
        source: SinkError,
    },

    #[error("preparing output: {0}")]
    Output(#[source] std::io::Error),
}

/// A [`BeaconError`] tagged with the verb that raised it.
#[derive(Debug, thiserror::Error)]
#[error("{verb}: {source}")]
pub struct VerbError {
    pub verb: Verb,
    #[source]
    pub source: BeaconError,
}

impl VerbError {
    pub fn new(verb: Verb, source: BeaconError) -> Self {
        Self { verb, source }
    }
}

/// Result type for Beacon operations.
pub type Result<T> = std::result::Result<T, BeaconError>;
