use crate::{
    helpers::{
        load_config::{Settings, load_env_file},
        targets::{ElasticsearchConfig, targets_from_env},
    },
    instrumentation::tracing::{LogFormat, LogOptions},
    parser::parser::INFO_FIELDS,
    metrics::metrics::write_textfile,
    runtime::runtime::{self, RunOptions},
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "redis-monitor",
    long_about = "Polls every configured Redis instance for INFO status once and indexes one snapshot document per instance into a daily Elasticsearch index.",
    about = "Redis status snapshots for Elasticsearch",
    version,
    term_width = 100,
    after_help = "\
    EXAMPLES:
        redis-monitor
        redis-monitor run --env-file /etc/redis-monitor/.env --metrics-textfile /var/lib/node_exporter/redis_monitor.prom
        redis-monitor validate --config ./redis_monitor.toml"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log output format on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Also write JSON logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Poll every Redis target once and index the snapshots (default)
    Run(RunArgs),

    /// Load and print the configuration without contacting any service
    Validate(ConfigArgs),

    /// Display version information
    Version,
}

#[derive(Debug, Args, Default)]
struct ConfigArgs {
    /// Env file to load; defaults to `.env` in the working directory
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// TOML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Args, Default)]
struct RunArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Write run metrics in Prometheus text format to this file
    #[arg(long)]
    metrics_textfile: Option<PathBuf>,
}

impl Cli {
    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            format: self.log_format,
            directory: self.log_dir.clone(),
        }
    }
}

/// Entry function for CLI
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run_monitor(args).await?,
        Commands::Validate(args) => validate_config(args)?,
        Commands::Version => show_version(),
    }

    Ok(())
}

//
// ------------------------ Command Implementations ------------------------------
//

async fn run_monitor(args: RunArgs) -> Result<()> {
    let options = RunOptions {
        env_file: args.config.env_file,
        settings_file: args.config.config,
    };

    let outcome = runtime::run_monitor(&options).await;

    if let Some(path) = &args.metrics_textfile {
        let written = write_textfile(path)
            .with_context(|| format!("Failed to write metrics text file {}", path.display()));
        match (&outcome, written) {
            (Ok(_), Err(e)) => return Err(e),
            (Err(_), Err(e)) => tracing::warn!(error = %format!("{e:#}"), "Metrics not written"),
            (_, Ok(())) => {}
        }
    }

    outcome.map(|_| ()).context("Monitoring run failed")
}

/// Validate configuration without network I/O
fn validate_config(args: ConfigArgs) -> Result<()> {
    let env_path = load_env_file(args.env_file.as_deref())?;
    let settings = Settings::load(args.config.as_deref())?;
    let targets = targets_from_env(&settings.redis);
    let elasticsearch = ElasticsearchConfig::from_env();

    println!("Env file: {}", env_path.display());
    println!("Elasticsearch: {elasticsearch:?}");
    println!("Redis targets ({}):", targets.len());
    for target in &targets {
        println!("  {target:?}");
    }
    println!("Snapshot fields: {}", INFO_FIELDS.join(", "));
    println!();
    println!(
        "{}",
        settings.to_toml().context("Failed to render settings as TOML")?
    );
    Ok(())
}

/// Show version information
fn show_version() {
    println!("redis-monitor {}", env!("CARGO_PKG_VERSION"));
}
