//! workcell - run a command in an ephemeral containerized workspace.
//!
//! ## Usage
//!
//! ```sh
//! workcell --dockerfile ./Dockerfile [--env K=V]... [--volume H:C]... \
//!          [--network NAME] [--] CMD [ARGS...]
//! ```
//!
//! Builds an image from the given build specification, creates a container
//! named after the session, streams a snapshot of the current repository into
//! it, and attaches the terminal. Inside the container, `git push origin
//! <session-branch>` lands back in the host working copy.
//!
//! Exits 0 when orchestration succeeded (the container's own exit status is
//! reported on stdout) and nonzero when any session step failed.

use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use workcell::{run, Output, StandardOutput};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let environment: Vec<String> = std::env::vars()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    let output: Arc<dyn Output> = Arc::new(StandardOutput::new());

    match run(&args, &environment, output).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
