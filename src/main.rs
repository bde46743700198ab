use anyhow::Context;
use clap::Parser;

use codejudge::config::CliArgs;
use codejudge::engine::Engine;
use codejudge::web_server::build_server;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let config = cli.to_config().context("Failed to load configuration")?;
    if config.sandbox.worker_count() == 0 {
        anyhow::bail!("The number of sandbox workers must not be 0");
    }

    let mut engine = Engine::start(&config).context("Failed to start execution engine")?;

    let server = build_server(
        config.server.clone(),
        config.sandbox.clone(),
        engine.pipeline().clone(),
        engine.judge().clone(),
    )
    .context("Failed to build server")?;

    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {res_server:?}");
        }
        Some(reason) = engine.worker_exited() => {
            log::error!("A sandbox worker terminated unexpectedly: {reason}");
        }
    }

    server_handle.stop(true).await;
    engine.shutdown().await;

    log::info!("Shutdown complete");
    Ok(())
}
