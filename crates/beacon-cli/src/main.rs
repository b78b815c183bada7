//! Beacon - Concourse commit status resource
//!
//! One binary serves every resource entry point. Concourse runs
//! `/opt/resource/{check,in,out}`, which are links to `beacon`; the entry
//! point is picked from the name it was invoked under. `beacon check`,
//! `beacon in <dir>` and `beacon out <dir>` work as well.
//!
//! The request is read from stdin, the response written to stdout, and logs
//! go to stderr. Any failure is reported as one line on stderr with a
//! non-zero exit code.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};

use beacon_core::telemetry::json_requested;
use beacon_core::{emit_banner, init_tracing, peek_log_level, BuildContext, Resource, Verb};

#[derive(Parser, Debug, PartialEq)]
#[command(multicall = true)]
enum Applet {
    #[command(flatten)]
    Entry(Entry),

    /// Run an entry point by name
    Beacon {
        #[command(subcommand)]
        entry: Entry,
    },
}

impl Applet {
    fn into_entry(self) -> Entry {
        match self {
            Applet::Entry(entry) | Applet::Beacon { entry } => entry,
        }
    }
}

#[derive(Subcommand, Debug, PartialEq)]
enum Entry {
    /// Validate the source; statuses are write-only, so no versions are reported
    Check,

    /// Echo the requested version
    In {
        /// Destination directory provided by Concourse
        dir: Option<PathBuf>,
    },

    /// Post the build status for the checkout in the build directory
    Out {
        /// Build directory holding the put inputs
        dir: Option<PathBuf>,
    },
}

impl Entry {
    fn verb(&self) -> Verb {
        match self {
            Entry::Check => Verb::Check,
            Entry::In { .. } => Verb::Get,
            Entry::Out { .. } => Verb::Put,
        }
    }

    fn dir(&self) -> Option<&Path> {
        match self {
            Entry::Check => None,
            Entry::In { dir } | Entry::Out { dir } => dir.as_deref(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let entry = match Applet::try_parse() {
        Ok(applet) => applet.into_entry(),
        Err(err) => err.exit(),
    };

    let mut input = Vec::new();
    if let Err(err) = io::stdin().read_to_end(&mut input) {
        eprintln!("{}: reading stdin: {err}", entry.verb());
        return ExitCode::FAILURE;
    }

    init_tracing(json_requested(), peek_log_level(&input).unwrap_or_default());
    emit_banner(env!("CARGO_PKG_VERSION"));

    let resource = Resource::new(BuildContext::from_env());
    let mut stdout = io::stdout();
    match run_until_signal(&resource, &entry, &input, &mut stdout).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::debug!(event = "verb.failed", error = ?err);
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Run `entry`, abandoning it when SIGINT or SIGTERM arrives.
async fn run_until_signal(
    resource: &Resource,
    entry: &Entry,
    input: &[u8],
    out: &mut (dyn Write + Send),
) -> Result<()> {
    let verb = entry.verb();
    let interrupted = shutdown_signal()?;
    tokio::select! {
        result = run(resource, entry, input, out) => result,
        () = interrupted => {
            tracing::warn!(event = "verb.interrupted", verb = %verb);
            Err(anyhow!("{verb}: interrupted"))
        }
    }
}

async fn run(
    resource: &Resource,
    entry: &Entry,
    input: &[u8],
    out: &mut (dyn Write + Send),
) -> Result<()> {
    match entry {
        Entry::Check => resource.check(input, out)?,
        Entry::In { .. } => resource.get(input, out, entry.dir())?,
        Entry::Out { .. } => resource.put(input, out, entry.dir()).await?,
    }
    Ok(())
}

#[cfg(unix)]
fn shutdown_signal() -> Result<impl std::future::Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow!("registering SIGTERM handler: {e}"))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow!("registering SIGINT handler: {e}"))?;
    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl std::future::Future<Output = ()>> {
    Ok(async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    })
}
