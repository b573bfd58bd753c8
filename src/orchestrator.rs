//! Session orchestrator.
//!
//! Composes the loopback git server, the engine driver, the snapshot
//! pipeline, and the terminal bridge into one atomic session lifecycle.
//! Within a session, step `i + 1` never begins until step `i` succeeded; any
//! failure aborts the remaining steps and the cleanup ledger unwinds every
//! already-acquired resource in reverse order.
//!
//! Flow: identity → git server → engine → image build → container create →
//! snapshot → copy-in → start → attach → wait → teardown.

use std::future::Future;
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::cleanup::CleanupLedger;
use crate::config::RunConfig;
use crate::constants::GATEWAY_HOST;
use crate::engine::Engine;
use crate::error::{EngineError, Error, Result};
use crate::gitserver::GitServer;
use crate::output::Output;
use crate::session::SessionIdentity;
use crate::snapshot::Snapshot;

/// Runs one session from raw command-line arguments and environment.
///
/// Returns `Ok` when orchestration succeeded, regardless of the container's
/// own exit status, which is reported through the sink.
pub async fn run(args: &[String], environment: &[String], output: Arc<dyn Output>) -> Result<()> {
    let config = RunConfig::parse(args, environment)?;
    run_session(config, Engine::open, output).await
}

/// Runs one session with an injectable engine opener.
///
/// Production passes [`Engine::open`]; tests inject a double via
/// [`Engine::with_api`].
pub async fn run_session<F, Fut>(
    config: RunConfig,
    open_engine: F,
    output: Arc<dyn Output>,
) -> Result<()>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<Engine, EngineError>>,
{
    let ledger = CleanupLedger::new(Arc::clone(&output));
    let token = CancellationToken::new();
    install_interrupt_listener(&token);

    let result = execute(&config, &ledger, &token, open_engine, &output).await;

    // Cancellation is the normal end of the forwarding tasks; it also
    // releases the terminal before the ledger tears anything down.
    token.cancel();
    ledger.run().await;
    result
}

async fn execute<F, Fut>(
    config: &RunConfig,
    ledger: &CleanupLedger,
    token: &CancellationToken,
    open_engine: F,
    output: &Arc<dyn Output>,
) -> Result<()>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<Engine, EngineError>>,
{
    let identity = SessionIdentity::generate();
    tracing::debug!(session = %identity, "starting session");

    let workdir = std::env::current_dir().map_err(Error::Cwd)?;

    let server = GitServer::start(&workdir, Arc::clone(output)).await?;
    let port = server.port();
    ledger.push("git-server", move || async move {
        server.close().await.map_err(Error::from)
    });

    let engine = open_engine().await?;
    {
        let engine = engine.clone();
        ledger.push("engine-client", move || async move {
            engine.close().await;
            Ok(())
        });
    }

    let image = engine
        .build_image(&config.build_spec, &config.image_name, Arc::clone(output))
        .await?;

    let container = engine
        .create_container(
            &identity.container_name(),
            &image,
            &config.args,
            &config.env,
            &config.volumes,
            &config.working_dir,
            &config.network,
            config.stop_timeout,
            config.resize_retries,
            config.resize_delay,
        )
        .await?;
    {
        let container = container.clone();
        ledger.push("container", move || async move {
            container.force_remove().await.map_err(Error::from)
        });
    }

    let snapshot = Snapshot::create(
        &workdir,
        &format!("http://{GATEWAY_HOST}:{port}"),
        &identity.branch_name(),
        &config.git_user.name,
        &config.git_user.email,
    )
    .await?;
    let closer = snapshot.closer();
    ledger.push("snapshot", move || async move {
        closer.close();
        Ok(())
    });

    container.copy_into(snapshot, "/").await?;
    container.start().await?;
    container.attach(token, Arc::clone(output)).await?;
    container.wait(token, Arc::clone(output)).await?;

    Ok(())
}

/// Cancels the session token on SIGINT or SIGTERM.
fn install_interrupt_listener(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = ctrl_c.await;
            }
        }
        token.cancel();
    });
}
