use clap::{CommandFactory, Parser, Subcommand};
use dingbridge::backend::create_backend;
use dingbridge::config::Config;
use dingbridge::{logging, runtime};
use tracing::info;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LONG_ABOUT: &str = concat!(
    "\x1b[1mdingbridge v",
    env!("CARGO_PKG_VERSION"),
    "\x1b[22m\n",
    "Relays DingTalk bot messages to an OpenAI-compatible completion backend.\n",
    "\n",
    "\x1b[1mQuick Start:\x1b[22m\n",
    "  1) export DINGTALK_APP_KEY=... DINGTALK_APP_SECRET=...\n",
    "  2) dingbridge check\n",
    "  3) dingbridge start",
);

#[derive(Debug, Parser)]
#[command(name = "dingbridge", version = VERSION, about = LONG_ABOUT)]
struct Cli {
    #[command(subcommand)]
    command: Option<MainCommand>,
}

#[derive(Debug, Subcommand)]
enum MainCommand {
    /// Start the bridge
    Start,
    /// Validate configuration and print it with secrets redacted
    Check,
    /// Show version
    Version,
}

fn print_version() {
    println!("dingbridge {VERSION}");
}

fn check_config() -> anyhow::Result<()> {
    let config = Config::load()?;
    create_backend(&config)?;
    match Config::resolve_config_path()? {
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("Config file: (none, defaults + environment)"),
    }
    for (key, value) in config.redacted_summary() {
        println!("  {key:<22} {value}");
    }
    println!("Config OK");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(MainCommand::Start) => {}
        Some(MainCommand::Check) => return check_config(),
        Some(MainCommand::Version) => {
            print_version();
            return Ok(());
        }
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
            return Ok(());
        }
    }

    let config = Config::load()?;

    if std::env::var("DINGBRIDGE_GATEWAY").is_ok() {
        logging::init_logging(&config.runtime_data_dir())?;
    } else {
        logging::init_console_logging();
    }
    info!("Starting dingbridge v{VERSION}...");

    runtime::run(config).await
}
