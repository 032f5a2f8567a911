use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use pricelab::{
    commands::{evaluate, export_prices, indicators, merge_logs},
    context::{AppContext, SourceKind, TrainerKind},
    models::Interval,
};
use std::path::PathBuf;

const DEFAULT_SNAPSHOT_FILE: &str = "data/prices.bin";
const DEFAULT_MERGED_LOG: &str = "results/merged.csv";

#[derive(Parser)]
#[command(name = "pricelab")]
#[command(about = "Indicator, labeling and model evaluation pipeline for price series")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate every symbol against every feature set and append the runs to the log
    Evaluate {
        /// Comma separated symbols
        #[arg(long, value_delimiter = ',', required = true, num_args = 1..)]
        symbols: Vec<String>,
        #[arg(long, value_enum, default_value_t = Interval::Daily)]
        interval: Interval,
        /// Labeling rule set (pct, macd-cross, macd-direction, custom-macd, momentum-macd)
        #[arg(long = "rule-set")]
        rule_set: Option<String>,
        /// Comma separated feature set; repeat for several sets
        #[arg(long = "features", value_name = "LIST")]
        features: Vec<String>,
        /// Rows between the labeled row and the row it is compared with
        #[arg(long)]
        lookahead: Option<usize>,
        /// Base epoch budget (monthly runs multiply it)
        #[arg(long)]
        epochs: Option<usize>,
        #[arg(long, value_enum, default_value_t = TrainerKind::Gradient)]
        trainer: TrainerKind,
        #[arg(long, value_enum, default_value_t = SourceKind::Fmp)]
        source: SourceKind,
        /// CSV directory or snapshot file for offline sources
        #[arg(long, value_name = "PATH")]
        data: Option<PathBuf>,
        /// Run log CSV to append to
        #[arg(long, value_name = "PATH")]
        log: Option<PathBuf>,
    },
    /// Print the enriched indicator series for a symbol as JSON
    Indicators {
        symbol: String,
        #[arg(long, value_enum, default_value_t = Interval::Daily)]
        interval: Interval,
        #[arg(long, value_enum, default_value_t = SourceKind::Fmp)]
        source: SourceKind,
        #[arg(long, value_name = "PATH")]
        data: Option<PathBuf>,
        /// Write to a file instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Fetch daily prices and store them as a snapshot for offline runs
    ExportPrices {
        #[arg(long, value_delimiter = ',', required = true, num_args = 1..)]
        symbols: Vec<String>,
        #[arg(long, value_enum, default_value_t = SourceKind::Fmp)]
        source: SourceKind,
        #[arg(long, value_name = "PATH")]
        data: Option<PathBuf>,
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Merge run logs and batch result files into one de-duplicated CSV
    MergeLogs {
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app_context = AppContext::initialize()?;
    info!("Starting pricelab. Not financial advice.");

    match cli.command {
        Commands::Evaluate {
            symbols,
            interval,
            rule_set,
            features,
            lookahead,
            epochs,
            trainer,
            source,
            data,
            log,
        } => {
            let options = evaluate::EvaluateOptions {
                symbols,
                interval,
                rule_set,
                feature_sets: features,
                lookahead,
                epochs,
                trainer,
                source,
                data,
                log,
            };
            evaluate::run(&app_context, options).await?;
        }
        Commands::Indicators {
            symbol,
            interval,
            source,
            data,
            output,
        } => {
            indicators::run(
                &app_context,
                &symbol,
                interval,
                source,
                data.as_deref(),
                output,
            )
            .await?;
        }
        Commands::ExportPrices {
            symbols,
            source,
            data,
            output,
        } => {
            let output_path = output.unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_FILE));
            export_prices::run(&app_context, &symbols, source, data.as_deref(), &output_path)
                .await?;
        }
        Commands::MergeLogs { inputs, output } => {
            let output_path = output.unwrap_or_else(|| PathBuf::from(DEFAULT_MERGED_LOG));
            merge_logs::run(&inputs, &output_path).await?;
        }
    }

    Ok(())
}
