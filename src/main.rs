use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use takopi::config::Settings;
use takopi::transport::mock::MockTransport;
use takopi::transport::telegram::TelegramTransport;
use takopi::transport::Transport;
use takopi::{agents, lockfile::Lockfile, Handler};

#[derive(Parser)]
#[command(
    name = "takopi",
    about = "Chat-to-agent bridge for Codex, Claude, OpenCode, and Pi",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Transport backend to use (overrides config): telegram, mock
    #[arg(long, global = true)]
    transport: Option<String>,

    /// Path to a config file, used in place of the project/global discovery chain
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Force debug-level logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge (default if no subcommand given).
    Run,

    /// Inspect or bootstrap the configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the resolved configuration.
    Show,
    /// Write a template config file to the global config path.
    Init,
    /// Print the global config file path.
    Path,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => match run(cli.transport, cli.config).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, code = e.code(), "fatal startup error");
                ExitCode::FAILURE
            }
        },
        Commands::Config { action } => run_config_command(action),
    }
}

fn init_tracing(debug: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(transport_override: Option<String>, config_path: Option<PathBuf>) -> takopi::Result<()> {
    let project_root = config_path.as_deref().and_then(|p| p.parent());
    let mut settings = Settings::load(project_root)?;
    if let Some(transport) = transport_override {
        settings.transport = transport;
    }

    let bot_token = std::env::var("TAKOPI_BOT_TOKEN").unwrap_or_default();
    let _lock = if settings.transport == "telegram" {
        Some(Lockfile::acquire(&bot_token)?)
    } else {
        None
    };

    let registry = Arc::new(agents::build_registry(&settings, &settings.work_dir));
    if registry.is_empty() {
        return Err(takopi::Error::NoEngines);
    }

    let transport: Arc<dyn Transport> = match settings.transport.as_str() {
        "telegram" => Arc::new(TelegramTransport::new(bot_token, settings.allowed_chat_ids.clone())),
        "mock" => Arc::new(MockTransport::new()),
        other => return Err(takopi::Error::Config(format!("unknown transport `{other}`"))),
    };

    let handler = Handler::new(transport, registry, settings.default_engine.clone());

    tokio::select! {
        result = handler.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
            Ok(())
        }
        _ = wait_for_sigterm() => {
            tracing::info!("received SIGTERM, shutting down");
            Ok(())
        }
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    signal.recv().await;
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}

fn run_config_command(action: ConfigAction) -> ExitCode {
    match action {
        ConfigAction::Show => match Settings::load(None) {
            Ok(settings) => {
                println!("{settings:#?}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::FAILURE
            }
        },
        ConfigAction::Init => match global_config_path() {
            Some(path) => {
                if let Some(dir) = path.parent() {
                    if let Err(e) = std::fs::create_dir_all(dir) {
                        eprintln!("error: {e}");
                        return ExitCode::FAILURE;
                    }
                }
                if let Err(e) = std::fs::write(&path, Settings::template()) {
                    eprintln!("error: {e}");
                    return ExitCode::FAILURE;
                }
                println!("wrote {}", path.display());
                ExitCode::SUCCESS
            }
            None => {
                eprintln!("error: could not determine config directory");
                ExitCode::FAILURE
            }
        },
        ConfigAction::Path => match global_config_path() {
            Some(path) => {
                println!("{}", path.display());
                ExitCode::SUCCESS
            }
            None => {
                eprintln!("error: could not determine config directory");
                ExitCode::FAILURE
            }
        },
    }
}

fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("takopi").join("config.toml"))
}
