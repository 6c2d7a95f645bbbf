use clap::{CommandFactory, Parser};
use mcpbridge::{logging, Bridge, BridgeConfig, Cli};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    let config = match BridgeConfig::load(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}\n");
            if let Err(help_err) = Cli::command().write_help(&mut std::io::stderr()) {
                eprintln!("error: could not print usage: {help_err}");
            }
            return ExitCode::from(2);
        }
    };

    if let Err(e) = logging::init(&config.debug, config.log_format) {
        eprintln!("error: {e:#}");
        return ExitCode::from(1);
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C");
            signal.cancel();
        }
    });

    match Bridge::new(config).run(shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "MCP bridge failed");
            ExitCode::from(1)
        }
    }
}
