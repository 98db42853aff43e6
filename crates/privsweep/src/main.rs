use clap::{Parser, Subcommand};
use privsweep::{AppError, config, daemon, run};
use privsweep_store::Store;

/// Identify unused AWS IAM privileges by correlating OTLP traces against
/// IAM-assigned permissions. Requires read-only IAM access.
#[derive(Parser)]
#[command(name = "privsweep", version, about)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a default configuration file
    Init,

    /// Run a one-shot scrape + correlation analysis
    Analyze,

    /// Show the latest analysis results from the database
    Report,

    /// Generate output from the latest analysis results
    Generate {
        /// Output format: terraform, json or yaml
        format: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Run continuously, re-analyzing on an interval
    Daemon {
        /// Analysis interval (e.g. 30m, 24h, 7d)
        #[arg(long, default_value = "24h")]
        interval: String,

        /// Skip a tick while the previous analysis is still running
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        skip_if_running: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = dispatch(cli).await {
        eprintln!("ERROR {}", err);
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> Result<(), AppError> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);

    // init needs no config or database.
    if let Commands::Init = cli.command {
        return run::run_init(&config_path);
    }

    let config = config::Config::load(&config_path)?;
    let store = Store::open(&config.storage.path).await?;

    let result = match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Analyze => run::run_analyze_command(&config, &store).await,
        Commands::Report => run::run_report(&store).await,
        Commands::Generate { format, output } => {
            run::run_generate(&store, &format, output.as_deref()).await
        }
        Commands::Daemon {
            interval,
            skip_if_running,
        } => {
            let interval = daemon::parse_interval(&interval).map_err(AppError::Interval)?;
            daemon::run_daemon(config.clone(), store.clone(), interval, skip_if_running).await
        }
    };

    store.close().await;
    result
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}
