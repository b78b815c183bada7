//! Response encoding.
//!
//! Responses are written as one JSON document followed by a newline.

use std::io::{self, Write};

use serde::Serialize;

use crate::config::{BuildState, MetadataField, Output, Version};
use crate::dispatch::DispatchReport;
use crate::error::{BeaconError, Result};

/// Response for a successful put.
///
/// The version is the commit SHA, so repeating a put for the same commit
/// yields the same version.
pub fn put_output(
    commit: &str,
    state: BuildState,
    context: Option<&str>,
    report: &DispatchReport,
) -> Output {
    let mut metadata = vec![
        MetadataField::new("state", state.as_str()),
        MetadataField::new("commit", commit),
    ];
    if let Some(context) = context {
        metadata.push(MetadataField::new("context", context));
    }
    metadata.extend(
        report
            .outcomes
            .iter()
            .map(|o| MetadataField::new(format!("sink.{}", o.sink), o.summary())),
    );
    Output {
        version: Version::new(commit),
        metadata,
    }
}

/// Response for get: the requested version, unchanged.
pub fn get_output(version: Version) -> Output {
    Output {
        version,
        metadata: Vec::new(),
    }
}

/// Response for check. Statuses are write-only, so there is never a new
/// version to report.
pub fn check_output() -> Vec<Version> {
    Vec::new()
}

/// Serialize `value` to `out`.
pub fn write_json<W: Write + ?Sized, T: Serialize>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *out, value).map_err(|e| BeaconError::Output(io::Error::from(e)))?;
    out.write_all(b"\n").map_err(BeaconError::Output)?;
    out.flush().map_err(BeaconError::Output)
}
