use clap::{Parser, Subcommand, ValueEnum};
use pulse_core::ActivitySource;
use std::path::PathBuf;

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "pulse")]
#[command(
    author,
    version,
    about = "Resilient activity sync for Jira and GitHub"
)]
#[command(after_help = "Examples:
  pulse migrate
  pulse sync --source jira
  pulse sync --source github --tenant 42
  pulse schedule
  pulse jobs --hours 24

Tenants are read from ~/.config/pulse/tenants.toml unless --tenants is given.
API tokens are read from the environment variables named in that file.")]
pub struct Config {
    /// PostgreSQL database connection URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Custom path to tenants.toml
    #[arg(long, env = "PULSE_TENANTS_FILE", value_name = "PATH")]
    pub tenants: Option<PathBuf>,

    /// StatsD host; metrics are discarded when unset
    #[arg(long, env = "STATSD_HOST")]
    pub statsd_host: Option<String>,

    /// StatsD port
    #[arg(long, env = "STATSD_PORT", default_value = "8125")]
    pub statsd_port: u16,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one full sync for a source
    #[command(after_help = "Examples:
  pulse sync --source jira             # All eligible tenants
  pulse sync --source github -t 7      # A single tenant")]
    Sync {
        /// Source to sync
        #[arg(short, long, value_enum)]
        source: SourceArg,

        /// Sync a single tenant instead of every eligible one
        #[arg(short, long, value_name = "ID")]
        tenant: Option<i64>,
    },
    /// Run recurring syncs until interrupted
    Schedule,
    /// Show recent sync jobs
    Jobs {
        /// Look-back window in hours
        #[arg(long, default_value = "24")]
        hours: i64,

        /// Maximum number of jobs to list
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
    /// Create the database schema
    Migrate,
}

/// Source selector for the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SourceArg {
    Jira,
    Github,
}

impl From<SourceArg> for ActivitySource {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Jira => ActivitySource::Jira,
            SourceArg::Github => ActivitySource::Github,
        }
    }
}
