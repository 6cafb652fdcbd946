//! LocalForge CLI, the main entry point.
//!
//! Commands:
//! - `serve`   Start the HTTP/SSE server
//! - `chat`    Interactive chat or single-message mode
//! - `models`  List configured models
//! - `config`  Create or inspect the config file

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "localforge",
    about = "LocalForge: a local AI agent with filesystem, terminal and web search tools",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP/SSE server
    Serve {
        /// Override the bind address
        #[arg(long)]
        host: Option<String>,

        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat with the agent
    Chat {
        /// Model to use instead of the configured default
        #[arg(short, long)]
        model: Option<String>,

        /// Send a single message instead of entering interactive mode
        message: Option<String>,
    },

    /// List configured models and whether their keys are set
    Models,

    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration (secrets redacted)
    Show,

    /// Print the config file path
    Path,
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    match cli.command {
        Commands::Serve { host, port } => commands::serve::run(host, port).await?,
        Commands::Chat { model, message } => commands::chat::run(model, message).await?,
        Commands::Models => commands::models::run()?,
        Commands::Config { action } => match action {
            ConfigAction::Init { force } => commands::config_cmd::init(force)?,
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Path => commands::config_cmd::path(),
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_chat_with_model_and_message() {
        let cli = Cli::try_parse_from(["localforge", "chat", "-m", "gpt-4o", "hello there"]).unwrap();
        match cli.command {
            Commands::Chat { model, message } => {
                assert_eq!(model.as_deref(), Some("gpt-4o"));
                assert_eq!(message.as_deref(), Some("hello there"));
            }
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn parses_serve_overrides_and_global_flags() {
        let cli = Cli::try_parse_from([
            "localforge",
            "serve",
            "--host",
            "0.0.0.0",
            "--port",
            "9000",
            "--verbose",
            "--json-logs",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(cli.json_logs);
        match cli.command {
            Commands::Serve { host, port } => {
                assert_eq!(host.as_deref(), Some("0.0.0.0"));
                assert_eq!(port, Some(9000));
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn parses_config_init_force() {
        let cli = Cli::try_parse_from(["localforge", "config", "init", "--force"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Init { force: true }
            }
        ));
    }
}
