mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use cutout::Config;
use cutout::logging::{LogSettings, init_logging};

#[derive(Parser)]
#[command(name = "cutout")]
#[command(about = "Remove image backgrounds in batches or as files arrive in a folder")]
struct Cli {
    /// Configuration file (default: ./cutout.toml, then ~/.cutout/config.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Log file, overrides logging.file
    #[arg(long, value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process every image in a folder once
    Process(commands::ProcessArgs),

    /// Watch a folder and process new images as they arrive
    Monitor(commands::MonitorArgs),

    /// Initialize and release a backend to check that it loads
    Test(commands::TestArgs),

    /// Run the same folder through several backends and qualities
    Compare(commands::CompareArgs),

    /// Group output files by original image and list the variants
    Analyze(commands::AnalyzeArgs),

    /// Show or change configuration
    #[command(subcommand)]
    Config(commands::ConfigCommand),

    /// Delete files from the output and processed folders
    Clean(commands::CleanArgs),

    /// Show configuration summary and available backends
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, config_path) = Config::load(cli.config.as_deref())?;

    let mut settings = LogSettings::from_config(&config.logging)?;
    if let Some(level) = cli.log_level {
        settings.level = level;
    }
    if let Some(file) = cli.log_file {
        settings.file = Some(file);
    }
    settings.verbose = cli.verbose;
    init_logging(settings)?;

    match cli.command {
        Command::Process(args) => commands::process(config, args).await,
        Command::Monitor(args) => commands::monitor(config, args).await,
        Command::Test(args) => commands::test_backend(config, args).await,
        Command::Compare(args) => commands::compare(config, args).await,
        Command::Analyze(args) => commands::analyze(&config, args),
        Command::Config(cmd) => commands::config(config, &config_path, cmd),
        Command::Clean(args) => commands::clean(&config, args),
        Command::Info => commands::info(&config, &config_path),
    }
}
