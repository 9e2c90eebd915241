use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use pipermail_runner::config::{ConfigError, LogFormat, Overrides, RunnerConfig};
use pipermail_runner::storage::{RunLogStore, SqliteRunLog, Store};

#[derive(Parser)]
#[command(
    name = "pipermail-runner",
    about = "Perpetual pipermail archive ingestion runner with a liveness watchdog",
    version,
    long_about = None
)]
struct Cli {
    /// Optional TOML config file; flags and environment override it
    #[arg(long, env = "PIPERMAIL_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the runner (scheduler loop + status server)
    Serve(ServeArgs),

    /// Show recently completed runs from the run log
    Runs {
        /// Storage location
        #[arg(long, env = "PIPERMAIL_DATABASE")]
        database: Option<String>,

        /// Number of runs to show
        #[arg(long, default_value = "20")]
        limit: usize,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// Archive root the ingestor reads from
    #[arg(long, env = "PIPERMAIL_SOURCE")]
    source: Option<String>,

    /// Storage location for ingested content and the run log
    #[arg(long, env = "PIPERMAIL_DATABASE")]
    database: Option<String>,

    /// HTTP(S) endpoint that accepts one JSON event per POST (not a Sentry
    /// DSN); `user:key@` in the URL is sent as basic auth
    #[arg(long, env = "PIPERMAIL_RAVEN")]
    error_tracker: Option<String>,

    /// Months fetched per run (default: 2 before the 5th of the month, else 1)
    #[arg(long, env = "PIPERMAIL_MONTHS")]
    months: Option<u32>,

    /// Months fetched concurrently
    #[arg(long, env = "PIPERMAIL_PARALLEL")]
    parallel: Option<u32>,

    /// Status server port
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Fetcher executable and arguments
    #[arg(long, env = "PIPERMAIL_COMMAND")]
    ingest_command: Option<String>,

    /// Log output format
    #[arg(long, env = "PIPERMAIL_LOG_FORMAT", value_enum)]
    log_format: Option<LogFormat>,
}

impl From<ServeArgs> for Overrides {
    fn from(args: ServeArgs) -> Self {
        Overrides {
            source: args.source,
            database: args.database,
            error_tracker_url: args.error_tracker,
            months: args.months,
            parallel: args.parallel,
            port: args.port,
            ingest_command: args.ingest_command,
            log_format: args.log_format,
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let file = RunnerConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve(args) => {
            let config = file.apply(args.into()).validate()?;
            init_tracing(config.log_format);

            tracing::info!(
                source = %config.source,
                port = config.port,
                months = ?config.months,
                parallel = ?config.parallel,
                "Starting pipermail-runner"
            );
            let reason = pipermail_runner::serve(config).await?;
            let code = reason.exit_code();
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Runs {
            database,
            limit,
            json,
        } => {
            init_tracing(file.log_format);
            let database = database
                .or(file.database)
                .ok_or(ConfigError::Missing("database"))?;
            let store = Store::open_existing(&database)?;
            let runs = SqliteRunLog::new(store.pool().clone()).recent(limit).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&runs)?);
            } else if runs.is_empty() {
                println!("No runs recorded.");
            } else {
                println!("{:<36} | {:<24} | {:<24} | Took", "Run", "Start", "End");
                println!("{:-<36}-|-{:-<24}-|-{:-<24}-|-{:-<6}", "", "", "", "");
                for run in runs {
                    println!(
                        "{:<36} | {:<24} | {:<24} | {}",
                        run.run_id.to_string(),
                        run.start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                        run.end.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                        pipermail_runner::humanize::delta(run.duration())
                    );
                }
            }
        }
    }

    Ok(())
}
