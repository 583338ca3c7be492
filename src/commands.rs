use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};

use cutout::core::{OutputName, parse_output_name};
use cutout::orchestrator::SharedProgress;
use cutout::{
    BackendRegistry, BatchSummary, Config, JobReport, Orchestrator, ProgressFn, ShutdownSignal,
    StatsSnapshot,
};

const STATS_INTERVAL_SECS: u64 = 30;

#[derive(Args)]
pub struct ProcessArgs {
    /// Input folder
    #[arg(short, long, value_name = "DIR")]
    input: Option<PathBuf>,

    /// Output folder
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Backend to use
    #[arg(short, long)]
    model: Option<String>,

    /// Device hint (auto, cpu, ...)
    #[arg(long)]
    device: Option<String>,

    /// Number of files processed in parallel
    #[arg(long)]
    batch_size: Option<usize>,

    /// Quality setting of the backend
    #[arg(long)]
    quality: Option<String>,

    /// Reprocess files that already have an output
    #[arg(long)]
    overwrite: bool,
}

#[derive(Args)]
pub struct MonitorArgs {
    /// Folder to watch
    #[arg(short, long, value_name = "DIR")]
    input: Option<PathBuf>,

    /// Backend to use
    #[arg(short, long)]
    model: Option<String>,

    /// Device hint (auto, cpu, ...)
    #[arg(long)]
    device: Option<String>,

    /// Watch subdirectories too
    #[arg(long)]
    recursive: bool,

    /// Skip files already in the folder
    #[arg(long)]
    new_only: bool,
}

#[derive(Args)]
pub struct TestArgs {
    /// Backend to test
    #[arg(short, long)]
    model: Option<String>,

    /// Device hint (auto, cpu, ...)
    #[arg(long)]
    device: Option<String>,
}

#[derive(Args)]
pub struct CompareArgs {
    /// Input folder
    #[arg(short, long, value_name = "DIR")]
    input: Option<PathBuf>,

    /// Output folder
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Backends to compare (default: all enabled)
    #[arg(long, value_delimiter = ',')]
    models: Vec<String>,

    /// Qualities to compare (default: each backend's configured quality)
    #[arg(long, value_delimiter = ',')]
    qualities: Vec<String>,
}

#[derive(Args)]
pub struct AnalyzeArgs {
    /// Output folder to analyze
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,

    /// Set a value by dotted key and save, e.g. `processing.batch_size 4`
    Set { key: String, value: String },
}

#[derive(Args)]
pub struct CleanArgs {
    /// Folders to clean: input, output, processed
    #[arg(long, value_delimiter = ',', default_values_t = ["output".to_string(), "processed".to_string()])]
    folders: Vec<String>,

    /// Do not ask for confirmation
    #[arg(short, long)]
    yes: bool,
}

fn apply_backend(config: &mut Config, model: Option<String>, device: Option<String>) {
    if let Some(model) = model {
        config.processing.model = model;
    }
    if let Some(device) = device {
        config.processing.device = device.clone();
        let model = config.processing.model.clone();
        if let Some(backend) = config.models.get_mut(&model) {
            backend.device = Some(device);
        }
    }
}

fn set_quality(config: &mut Config, quality: String) {
    let model = config.processing.model.clone();
    if let Some(backend) = config.models.get_mut(&model) {
        backend.quality = Some(quality);
    }
}

/// Run blocking pipeline work off the async runtime
async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .context("worker task panicked")?
}

fn shutdown_on_ctrl_c(orchestrator: Arc<Orchestrator>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nInterrupted, finishing files in progress...");
            let _ = tokio::task::spawn_blocking(move || orchestrator.shutdown()).await;
        }
    })
}

fn print_progress(report: &JobReport) {
    let name = report
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if report.success {
        println!("  done    {} ({:.1}s)", name, report.elapsed_secs());
    } else {
        println!("  failed  {}", name);
    }
}

fn print_summary(summary: &BatchSummary, stats: &StatsSnapshot) {
    println!("\n=== Processing Complete ===");
    println!("Processed: {}", summary.processed());
    println!("Failed:    {}", summary.failed);
    println!("Skipped:   {}", summary.skipped);
    if summary.cancelled > 0 {
        println!("Cancelled: {}", summary.cancelled);
    }
    if summary.processed() > 0 {
        println!("Average time: {:.2}s", summary.avg_time);
    }
    if stats.succeeded > 0 {
        println!("Fastest: {:.2}s  Slowest: {:.2}s", stats.min_time, stats.max_time);
    }
    println!("Data processed: {:.2} MB", stats.total_megabytes());
    println!("Success rate: {:.1}%", stats.success_rate);
}

fn print_stats_line(stats: &StatsSnapshot) {
    println!(
        "[stats] processed {} | failed {} | success {:.1}% | avg {:.2}s | {:.2} files/s | {:.1} MB",
        stats.succeeded,
        stats.failed,
        stats.success_rate,
        stats.avg_time,
        stats.files_per_second,
        stats.total_megabytes()
    );
}

pub async fn process(mut config: Config, args: ProcessArgs) -> Result<()> {
    if let Some(input) = args.input {
        config.processing.input_folder = input;
    }
    if let Some(output) = args.output {
        config.processing.output_folder = output;
    }
    apply_backend(&mut config, args.model, args.device);
    if let Some(batch_size) = args.batch_size {
        config.processing.batch_size = batch_size;
    }
    if let Some(quality) = args.quality {
        set_quality(&mut config, quality);
    }
    if args.overwrite {
        config.processing.overwrite_existing = true;
    }

    let orchestrator = Arc::new(Orchestrator::new(
        config,
        BackendRegistry::default(),
        ShutdownSignal::new(),
    )?);
    let processing = &orchestrator.config().processing;
    println!(
        "Processing {} with {} -> {}",
        processing.input_folder.display(),
        processing.model,
        processing.output_folder.display()
    );

    let ctrl_c = shutdown_on_ctrl_c(Arc::clone(&orchestrator));
    let worker = Arc::clone(&orchestrator);
    let summary = run_blocking(move || {
        let progress: &ProgressFn = &print_progress;
        Ok(worker.process_folder(None, Some(progress))?)
    })
    .await;
    ctrl_c.abort();

    print_summary(&summary?, &orchestrator.statistics());
    Ok(())
}

pub async fn monitor(mut config: Config, args: MonitorArgs) -> Result<()> {
    if let Some(input) = args.input {
        config.processing.input_folder = input;
    }
    apply_backend(&mut config, args.model, args.device);
    if args.recursive {
        config.monitoring.recursive = true;
    }
    if !config.monitoring.enabled {
        println!("Monitoring is disabled in configuration (monitoring.enabled = false)");
        return Ok(());
    }

    let orchestrator = Arc::new(Orchestrator::new(
        config,
        BackendRegistry::default(),
        ShutdownSignal::new(),
    )?);
    let processing = &orchestrator.config().processing;
    println!(
        "Monitoring {} with {} (Ctrl+C to stop)",
        processing.input_folder.display(),
        processing.model
    );

    let ctrl_c = shutdown_on_ctrl_c(Arc::clone(&orchestrator));

    let worker = Arc::clone(&orchestrator);
    let process_existing = !args.new_only;
    run_blocking(move || {
        let progress: SharedProgress = Arc::new(print_progress);
        Ok(worker.start_watching(process_existing, Some(progress))?)
    })
    .await?;

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut elapsed = 0u64;
    while !orchestrator.shutdown_signal().is_triggered() {
        ticker.tick().await;
        elapsed += 1;
        if elapsed % STATS_INTERVAL_SECS == 0 {
            print_stats_line(&orchestrator.statistics());
        }
    }
    let _ = ctrl_c.await;

    let stats = orchestrator.statistics();
    println!("\n=== Final Statistics ===");
    println!("Processed: {}", stats.succeeded);
    println!("Failed:    {}", stats.failed);
    println!("Success rate: {:.1}%", stats.success_rate);
    println!("Runtime: {:.1}s", stats.runtime);
    Ok(())
}

pub async fn test_backend(mut config: Config, args: TestArgs) -> Result<()> {
    apply_backend(&mut config, args.model, args.device);
    let model = config.processing.model.clone();

    let orchestrator = Arc::new(Orchestrator::new(
        config,
        BackendRegistry::default(),
        ShutdownSignal::new(),
    )?);

    println!("Testing backend: {}", model);
    let worker = Arc::clone(&orchestrator);
    let elapsed = run_blocking(move || {
        let start = Instant::now();
        worker.initialize_backend()?;
        let elapsed = start.elapsed();
        worker.release_backend();
        Ok(elapsed)
    })
    .await?;

    println!("Backend {} initialized in {:.2}s", model, elapsed.as_secs_f64());
    Ok(())
}

pub async fn compare(config: Config, args: CompareArgs) -> Result<()> {
    let registry = BackendRegistry::default();
    let models: Vec<String> = if args.models.is_empty() {
        config
            .models
            .iter()
            .filter(|(name, backend)| backend.enabled && registry.contains(name))
            .map(|(name, _)| name.clone())
            .collect()
    } else {
        args.models.clone()
    };

    let shutdown = ShutdownSignal::new();
    let ctrl_c = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\nInterrupted, finishing files in progress...");
                shutdown.trigger();
            }
        })
    };

    let mut rows = Vec::new();
    for model in &models {
        let qualities = if args.qualities.is_empty() {
            vec![config.quality_of(model)]
        } else {
            args.qualities.clone()
        };

        for quality in qualities {
            if shutdown.is_triggered() {
                break;
            }

            let mut run_config = config.clone();
            if let Some(input) = &args.input {
                run_config.processing.input_folder = input.clone();
            }
            if let Some(output) = &args.output {
                run_config.processing.output_folder = output.clone();
            }
            // Every run needs the same inputs.
            run_config.processing.preserve_original = false;
            run_config.processing.model = model.clone();
            set_quality(&mut run_config, quality.clone());

            println!("\n--- {} ({}) ---", model, quality);
            let registry = registry.clone();
            let shutdown = shutdown.clone();
            let result = run_blocking(move || {
                let orchestrator = Orchestrator::new(run_config, registry, shutdown)?;
                let progress: &ProgressFn = &print_progress;
                Ok(orchestrator.process_folder(None, Some(progress))?)
            })
            .await;

            match result {
                Ok(summary) => rows.push((model.clone(), quality, summary)),
                Err(e) => println!("  {:#}", e),
            }
        }
    }
    ctrl_c.abort();

    println!("\n=== Comparison ===");
    println!(
        "{:<20} {:<8} {:>9} {:>6} {:>7} {:>9}",
        "model", "quality", "processed", "failed", "skipped", "avg time"
    );
    for (model, quality, summary) in rows {
        println!(
            "{:<20} {:<8} {:>9} {:>6} {:>7} {:>8.2}s",
            model,
            quality,
            summary.processed(),
            summary.failed,
            summary.skipped,
            summary.avg_time
        );
    }
    Ok(())
}

pub fn analyze(config: &Config, args: AnalyzeArgs) -> Result<()> {
    let output = args
        .output
        .unwrap_or_else(|| config.processing.output_folder.clone());
    if !output.is_dir() {
        println!("Output folder not found: {}", output.display());
        return Ok(());
    }

    let registry = BackendRegistry::default();
    let backends = registry.available();

    let mut results: BTreeMap<String, Vec<(OutputName, f64)>> = BTreeMap::new();
    for entry in fs::read_dir(&output)? {
        let path = entry?.path();
        if !path.extension().is_some_and(|e| e.eq_ignore_ascii_case("png")) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(name) = parse_output_name(stem, &backends) else {
            continue;
        };
        let megabytes = fs::metadata(&path)?.len() as f64 / 1024.0 / 1024.0;
        results
            .entry(name.original.clone())
            .or_default()
            .push((name, megabytes));
    }

    println!("=== Processing Results Analysis ===\n");
    for (original, mut variants) in results {
        println!("Original: {}", original);
        variants.sort_by(|(a, _), (b, _)| (&a.backend, &a.quality).cmp(&(&b.backend, &b.quality)));
        for (variant, megabytes) in variants {
            let time = variant
                .elapsed
                .map(|t| format!("{:.1}s", t))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {:<20} {:<8} {:<8} {:>7} {:6.2}MB",
                variant.backend, variant.quality, variant.device, time, megabytes
            );
        }
        println!();
    }
    Ok(())
}

pub fn config(mut config: Config, path: &Path, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            println!("# {}", path.display());
            print!("{}", config.to_toml_string()?);
        }
        ConfigCommand::Set { key, value } => {
            config.set(&key, &value)?;
            config.save(path)?;
            println!("Set {} = {}", key, value);
        }
    }
    Ok(())
}

pub fn clean(config: &Config, args: CleanArgs) -> Result<()> {
    let mut targets = Vec::new();
    for folder in &args.folders {
        let dir = match folder.as_str() {
            "input" => &config.processing.input_folder,
            "output" => &config.processing.output_folder,
            "processed" => &config.processing.processed_folder,
            other => bail!("unknown folder '{}' (expected input, output or processed)", other),
        };
        if !dir.is_dir() {
            continue;
        }
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() {
                targets.push(path);
            }
        }
    }

    if targets.is_empty() {
        println!("Nothing to clean");
        return Ok(());
    }

    if !args.yes {
        print!(
            "Delete {} files from {}? [y/N] ",
            targets.len(),
            args.folders.join(", ")
        );
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        if !matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
            println!("Aborted");
            return Ok(());
        }
    }

    let mut removed = 0;
    for path in &targets {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Could not delete {}: {}", path.display(), e),
        }
    }
    println!("Deleted {} files", removed);
    Ok(())
}

pub fn info(config: &Config, path: &Path) -> Result<()> {
    let processing = &config.processing;
    let registry = BackendRegistry::default();

    println!("=== cutout ===");
    println!("Config file:      {}", path.display());
    println!("Input folder:     {}", processing.input_folder.display());
    println!("Output folder:    {}", processing.output_folder.display());
    println!("Processed folder: {}", processing.processed_folder.display());
    println!("Model:            {}", processing.model);
    println!("Device:           {}", processing.device);
    println!("Batch size:       {}", processing.batch_size);
    println!("Extensions:       {}", processing.file_extensions.join(", "));
    println!(
        "Monitoring:       {} (recursive: {}, debounce: {:.1}s)",
        if config.monitoring.enabled { "enabled" } else { "disabled" },
        config.monitoring.recursive,
        config.monitoring.debounce_seconds
    );

    println!("\nBackends:");
    for name in registry.available() {
        let enabled = config.backend(name).is_some_and(|b| b.enabled);
        println!(
            "  {:<10} {:<9} quality: {}",
            name,
            if enabled { "enabled" } else { "disabled" },
            config.quality_of(name)
        );
    }
    Ok(())
}
