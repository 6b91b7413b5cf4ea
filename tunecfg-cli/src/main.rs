//! tunecfg CLI: inspect, override and validate fine-tuning recipe configs.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use tunecfg_core::{OutputFormat, RecipeKind};

/// tunecfg: recipe config toolkit
#[derive(Parser, Debug)]
#[command(name = "tunecfg", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Settings file (TOML or JSON) merged over user and workspace settings
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Print a config after overrides and interpolation
    Show {
        /// Recipe config file
        config: PathBuf,
        /// Overrides: key=value, ~key (delete), key=path.to.Component
        overrides: Vec<String>,
        /// Output format (defaults to the `output_format` setting)
        #[arg(long)]
        format: Option<OutputFormat>,
        /// Print one `key: value` line per leaf
        #[arg(long)]
        flat: bool,
        /// Skip interpolation
        #[arg(long)]
        raw: bool,
    },
    /// Print one resolved value
    Get {
        config: PathBuf,
        /// Dotted key, e.g. optimizer.lr or dataset[0]._component_
        key: String,
        overrides: Vec<String>,
    },
    /// Check a config and print diagnostics
    Validate {
        config: PathBuf,
        overrides: Vec<String>,
        /// Recipe kind: full, lora, ppo (detected when omitted)
        #[arg(long)]
        kind: Option<RecipeKind>,
        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,
    },
    /// Show the batch and step arithmetic a run would use
    Plan {
        config: PathBuf,
        overrides: Vec<String>,
        /// Number of samples in the dataset
        #[arg(long)]
        dataset_size: Option<u64>,
        /// Steps already completed (for resumed runs)
        #[arg(long, default_value_t = 0)]
        steps_run: u64,
    },
    /// List every `_component_` in a config
    Components {
        config: PathBuf,
        overrides: Vec<String>,
    },
    /// Compare two resolved configs key by key
    Diff { left: PathBuf, right: PathBuf },
    /// List recipe configs
    Ls {
        /// Directories to search (defaults to the `recipe_dirs` setting)
        dirs: Vec<PathBuf>,
    },
    /// Copy a recipe config, by path or catalog name
    Cp {
        src: String,
        dest: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Manage tunecfg settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum SettingsAction {
    /// Print the effective settings
    Show,
    /// Write default settings to <workspace>/.tunecfg/config.toml
    Init,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "tunecfg", "tunecfg")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "tunecfg.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let settings =
        tunecfg_core::load_settings(Some(&workspace), cli.settings.as_deref(), None)
            .map_err(|e| anyhow::anyhow!("Settings error: {}", e))?;
    for warning in settings.validate() {
        tracing::warn!("{}", warning);
    }

    commands::handle_command(cli.command, &workspace, &settings)
}
