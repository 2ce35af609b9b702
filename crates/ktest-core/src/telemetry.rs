//! Centralised tracing initialisation for the harness.
//!
//! Call [`init_tracing`] once at program start. Console output goes to
//! stderr (stdout is reserved for the run report) and honours `RUST_LOG`;
//! the optional execution log always records the harness at DEBUG.
//!
//! Only the first call in a process installs a subscriber.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::error::{HarnessError, Result};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialise the global tracing subscriber.
///
/// * `verbose` - default console level is DEBUG instead of INFO when
///   `RUST_LOG` is not set.
/// * `json` - emit newline-delimited JSON on the console.
/// * `exec_log` - also write plain-text DEBUG records to this file.
pub fn init_tracing(verbose: bool, json: bool, exec_log: Option<&Path>) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let console = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    let mut layers: Vec<BoxedLayer> = Vec::new();
    if json {
        layers.push(console.json().with_filter(env_filter).boxed());
    } else {
        layers.push(console.with_filter(env_filter).boxed());
    }

    if let Some(path) = exec_log {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| HarnessError::LogOpen {
                path: path.to_path_buf(),
                source,
            })?;
        let targets = Targets::new()
            .with_target("ktest_core", Level::DEBUG)
            .with_target("ktest", Level::DEBUG);
        layers.push(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(targets)
                .boxed(),
        );
    }

    tracing_subscriber::registry().with(layers).try_init().ok();
    Ok(())
}
