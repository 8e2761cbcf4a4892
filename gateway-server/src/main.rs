//! Entry path: load configuration, install logging, run the
//! orchestrator and perform the one, centralized process exit.

use std::process::ExitCode;

use envconfig::Envconfig;
use tracing::error;

use gateway::config::Config;
use gateway::error::GatewayError;
use gateway::lifecycle::{Orchestrator, TerminationTrigger};
use gateway::logging;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::init_from_env() {
        Ok(config) => config,
        Err(e) => {
            // no structured sink yet, this is the one pre-logger failure
            eprintln!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::setup(&config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "gateway terminated abnormally");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), GatewayError> {
    let mut orchestrator = Orchestrator::new(config);
    orchestrator.start().await?;

    let trigger = orchestrator.await_termination().await;
    let teardown = orchestrator.shutdown().await;

    match trigger {
        TerminationTrigger::ListenerError(error) => Err(error.into()),
        TerminationTrigger::Signal(_) => teardown.map_err(GatewayError::from),
    }
}
