use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use fxc::core::HistoryPeriod;
use fxc::core::log::init_logging;
use rust_decimal::Decimal;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for fxc::AppCommand {
    fn from(cmd: Commands) -> fxc::AppCommand {
        match cmd {
            Commands::Convert {
                amount,
                from,
                to,
                json,
            } => fxc::AppCommand::Convert {
                amount,
                from,
                to,
                json,
            },
            Commands::Rates { codes } => fxc::AppCommand::Rates { codes },
            Commands::Refresh => fxc::AppCommand::Refresh,
            Commands::History {
                from,
                to,
                period,
                json,
            } => fxc::AppCommand::History {
                from,
                to,
                period,
                json,
            },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Convert an amount between two currencies
    Convert {
        #[arg(allow_negative_numbers = true)]
        amount: Decimal,
        /// Source currency code, e.g. USD
        from: String,
        /// Target currency code, e.g. JPY
        to: String,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Display exchange rates against the base currency
    Rates {
        /// Only show these currency codes
        codes: Vec<String>,
    },
    /// Fetch fresh rates from the providers
    Refresh,
    /// Show daily exchange rates for a currency pair
    History {
        /// Source currency code, e.g. EUR
        from: String,
        /// Target currency code, e.g. USD
        to: String,
        /// Look-back window: 1mo, 3mo, 6mo, 1y or 2y
        #[arg(short, long, default_value = "1mo")]
        period: HistoryPeriod,
        /// Print the history as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => match cli.config_path.as_deref() {
            Some(path) => fxc::cli::setup::setup_at_path(path),
            None => fxc::cli::setup::setup(),
        },
        Some(cmd) => fxc::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
