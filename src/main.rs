//! Technical analysis - main entry point
//!
//! This binary provides two subcommands:
//! - analyze: Refresh cached history and print the analysis (the default)
//! - cache: Inspect or clear the on-disk price cache

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use technical_analysis::{Config, Period};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "technical-analysis")]
#[command(about = "Technical indicators, support/resistance and trend for stocks, ETFs, crypto and forex", long_about = None)]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    analyze: AnalyzeArgs,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log to the console only
    #[arg(long, global = true)]
    no_log_file: bool,
}

#[derive(Args, Debug, Clone, Default)]
struct AnalyzeArgs {
    /// Tickers to analyze, optionally followed by a period. E.g. "AAPL", "AAPL 6mo", "AAPL MSFT BTC-USD"
    #[arg(value_name = "TICKER")]
    targets: Vec<String>,

    /// History window (1d, 5d, 1mo, 3mo, 6mo, 1y, 2y, 5y, 10y, ytd, max)
    #[arg(short, long)]
    period: Option<Period>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze one or more tickers
    Analyze(AnalyzeArgs),

    /// Inspect or clear the price cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// List cached series
    List,

    /// Delete cached series for one ticker (all periods), or everything
    Clear {
        /// Ticker to clear; omit to clear the whole cache
        ticker: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    #[default]
    Json,
    /// Aligned key/value table
    Table,
}

fn setup_logging(verbose: bool, command_name: &str, log_to_file: bool) -> Result<()> {
    // Set log level - filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    // Console layer on stderr; stdout carries the result
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    // File layer - same format but without ANSI colors
    let (file_layer, log_path) = if log_to_file {
        std::fs::create_dir_all("logs")?;
        let log_filename = format!(
            "{}_{}.log",
            command_name,
            chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
        );
        let log_path = PathBuf::from("logs").join(&log_filename);
        let file_appender = tracing_appender::rolling::never("logs", &log_filename);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);
        (Some(layer), Some(log_path))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_path {
        info!("Log file: {}", path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Some(Commands::Cache { .. }) => "cache",
        _ => "analyze",
    };
    setup_logging(cli.verbose, command_name, !cli.no_log_file)?;

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Cache { action }) => match action {
            CacheAction::List => commands::cache::list(&config),
            CacheAction::Clear { ticker } => commands::cache::clear(&config, ticker),
        },
        Some(Commands::Analyze(args)) => {
            commands::analyze::run(args.targets, args.period, args.format, config)
        }
        None => {
            let args = cli.analyze;
            commands::analyze::run(args.targets, args.period, args.format, config)
        }
    }
}
