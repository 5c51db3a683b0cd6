use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use remedy::report::ReportFormat;
use remedy::session::SessionMode;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

mod cmd;

/// Env var holding a tracing filter directive, e.g. `remedy=debug`.
const LOG_ENV: &str = "REMEDY_LOG";

#[derive(Parser)]
#[command(name = "remedy")]
#[command(version, about = "Checkpointed vulnerability remediation for a project tree")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Approve every bug in confirm mode without prompting
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Step ceiling for this run. Overrides REMEDY_MAX_STEPS and remedy.toml.
    #[arg(long, global = true)]
    pub max_steps: Option<u32>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new remediation session
    Init {
        #[arg(long, default_value = "Fix security vulnerabilities")]
        goal: String,
        /// auto, confirm or scan-only
        #[arg(long, default_value = "auto")]
        mode: SessionMode,
        /// Replace an existing session
        #[arg(long)]
        force: bool,
    },
    /// Scan the project and record findings
    Scan {
        /// Comma-separated categories (security,auth,logic,quality)
        #[arg(long)]
        categories: Option<String>,
    },
    /// Draft and apply a fix for one bug
    Fix { id: String },
    /// Verify the applied fix for one bug
    Verify { id: String },
    /// Generate a regression test for a verified bug
    Test { id: String },
    /// Restore a bug's pre-fix checkpoint
    Rollback { id: String },
    /// Start a session and run the full pipeline
    Run {
        #[arg(long, default_value = "auto")]
        mode: SessionMode,
        #[arg(long, default_value = "Fix security vulnerabilities")]
        goal: String,
        #[arg(long)]
        categories: Option<String>,
    },
    /// Continue the existing session
    Resume,
    /// Show session progress
    Status,
    /// Render the session report
    Report {
        #[arg(long, value_enum, default_value_t = ReportFormat::Summary)]
        format: ReportFormat,
    },
    /// View, create or validate remedy.toml
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and exit non-zero on errors
    Validate,
    /// Initialize a default remedy.toml file
    Init,
}

fn init_tracing(verbose: bool) -> Result<()> {
    let directive = match std::env::var(LOG_ENV) {
        Ok(value) if !value.trim().is_empty() => value,
        _ if verbose => "debug".to_string(),
        _ => "warn".to_string(),
    };
    let filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("Invalid {LOG_ENV} filter '{directive}'"))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    // config must work even when remedy.toml is broken
    if let Commands::Config { command } = &cli.command {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        return cmd::cmd_config(&project_dir, command.clone(), cli.max_steps);
    }

    let config = remedy::config::Config::new(project_dir, cli.verbose, cli.yes, cli.max_steps)?;

    match &cli.command {
        Commands::Init { goal, mode, force } => cmd::cmd_init(&config, goal, *mode, *force)?,
        Commands::Scan { categories } => cmd::cmd_scan(&config, categories.as_deref())?,
        Commands::Fix { id } => cmd::cmd_fix(&config, id)?,
        Commands::Verify { id } => cmd::cmd_verify(&config, id)?,
        Commands::Test { id } => cmd::cmd_test(&config, id)?,
        Commands::Rollback { id } => cmd::cmd_rollback(&config, id)?,
        Commands::Run {
            mode,
            goal,
            categories,
        } => cmd::cmd_run(&config, goal, *mode, categories.as_deref())?,
        Commands::Resume => cmd::cmd_resume(&config)?,
        Commands::Status => cmd::cmd_status(&config)?,
        Commands::Report { format } => cmd::cmd_report(&config, *format)?,
        Commands::Config { .. } => {}
    }

    Ok(())
}
