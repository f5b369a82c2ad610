mod commands;
mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tidemark_config::{AppConfig, ConfigLoader, LogFormat};

#[derive(Parser)]
#[command(name = "tidemark", version)]
#[command(about = "Apply and revert versioned SQLite schema migrations")]
struct Cli {
    /// Config file (TOML or YAML). Defaults to ./tidemark.{toml,yml,yaml} if present
    #[arg(long, global = true, env = "TIDEMARK_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, global = true, env = "TIDEMARK_DATABASE")]
    database: Option<PathBuf>,

    /// Directory of <version>_<description>.sql migration files
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Ledger table recording applied migrations
    #[arg(long, global = true)]
    table: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply all pending migrations
    Up,

    /// Revert the most recently applied migrations
    Down {
        /// How many migrations to revert
        #[arg(long, short = 'n', default_value_t = 1)]
        steps: usize,
    },

    /// Print the highest applied version (0 if none)
    Version,

    /// List migrations and whether each is applied
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

impl Cli {
    /// Command-line values take precedence over the config file.
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(database) = &self.database {
            config.database.path = database.clone();
        }
        if let Some(dir) = &self.dir {
            config.migrations.dir = dir.clone();
        }
        if let Some(table) = &self.table {
            config.database.migration_table = table.clone();
        }
        if let Some(format) = self.log_format {
            config.log.format = format.into();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = std::env::current_dir().context("failed to read working directory")?;
    let mut config = ConfigLoader::load_or_default(cli.config.as_deref(), &cwd)?;
    cli.apply_overrides(&mut config);

    logging::init(&config.log)?;

    match cli.command {
        Commands::Up => commands::up(&config),
        Commands::Down { steps } => commands::down(&config, steps),
        Commands::Version => commands::version(&config),
        Commands::Status { json } => commands::status(&config, json),
    }
}
