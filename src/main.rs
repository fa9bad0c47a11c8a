mod cli;
mod config;
mod fetch;
mod normalize;
mod scheduler;
mod server;
mod state;
mod storage;
mod worker;

#[cfg(test)]
mod testing;

use std::process::ExitCode;

use anyhow::Result;
use cli::Args;
use server::Server;
use state::State;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

fn set_up_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_regex(false)
                .with_default_directive(Level::INFO.into())
                .with_env_var("RSSAGG_LOG")
                .from_env_lossy(),
        )
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    set_up_logging();

    let cancel = CancellationToken::new();

    tokio::spawn({
        let cancel = cancel.clone();

        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received an interrupt; shutting down"),
                Err(e) => error!("Could not listen for the interrupt signal: {e:#}"),
            }

            cancel.cancel();
        }
    });

    let (mut tasks, scheduler) = match start(cancel.clone()).await {
        Ok(started) => started,

        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    let mut exit_code = ExitCode::SUCCESS;

    while let Some(task_result) = tasks.join_next().await {
        cancel.cancel();

        match task_result {
            Ok(Ok(())) => {}

            Ok(Err(e)) => {
                error!("{e:#}");
                exit_code = ExitCode::FAILURE;
            }

            Err(e) => {
                error!("{e:#}");
                exit_code = ExitCode::FAILURE;
            }
        }
    }

    // the poller has no shutdown path of its own; it stops with the process.
    scheduler.abort();

    exit_code
}

async fn start(cancel: CancellationToken) -> Result<(JoinSet<Result<()>>, JoinHandle<()>)> {
    let mut args = Args::parse();
    let config_paths = args
        .config_path
        .take()
        .into_iter()
        .chain(["./rssagg.toml".into(), "/etc/rssagg.toml".into()])
        .collect::<Vec<_>>();
    let mut config = config::load(&config_paths)?;
    config.update(args);
    config.validate()?;
    let state = State::new(config).await?;

    let scheduler = state.scheduler()?;
    let server = Server::new(state).await?;

    let mut tasks = JoinSet::new();
    tasks.spawn(server.serve(cancel));

    Ok((tasks, tokio::spawn(scheduler.run())))
}
