mod capabilities;
mod cli;
mod config;
mod error;
mod executor;
mod pipeline;
mod stages;
#[cfg(test)]
mod testing;
mod web;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::io::BufReader;

/// Multi-stage investment report generator
#[derive(Parser)]
#[command(name = "advisor", version)]
struct Cli {
    #[command(flatten)]
    settings: config::Settings,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Ask for reports interactively (default)
    Chat,
    /// Serve the browser UI
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 7860)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "advisor=info,agent=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Ok(path) = dotenv {
        tracing::info!(path = %path.display(), "loaded environment file");
    }
    cli.settings.log_credentials();

    let pipeline = Arc::new(cli.settings.build_pipeline()?);

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => {
            let runner = cli::InteractiveRunner::new(pipeline);
            let mut interrupts = cli::interrupts();
            let stdin = BufReader::new(tokio::io::stdin());
            cli::repl(&runner, stdin, tokio::io::stdout(), &mut interrupts).await?;
            // A Ctrl-C at the prompt leaves stdin parked on a blocking read,
            // which would keep the runtime from shutting down.
            std::process::exit(0)
        }
        Command::Serve { host, port } => web::serve(pipeline, &host, port).await,
    }
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use clap::{CommandFactory, Parser};

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_subcommand() {
        let cli = Cli::try_parse_from(["advisor", "--model", "m", "serve", "--port", "8080"])
            .expect("valid arguments");

        assert_eq!(cli.settings.model, "m");
        assert!(matches!(cli.command, Some(Command::Serve { ref host, port: 8080 }) if host == "127.0.0.1"));
    }
}
