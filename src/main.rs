//! levee_net CLI
//!
//! Trains LeveeNet as described by a TOML configuration file, saves the model
//! and reports the score on the held-out test split.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing::info;

use levee_net::backend::{self, TrainingBackend};
use levee_net::utils::logging::{init_logging, LogConfig};
use levee_net::utils::format_duration;
use levee_net::{preflight, run_training, LeveeConfig};

/// Train a levee detection CNN on labeled raster samples
#[derive(Parser, Debug)]
#[command(name = "levee_net")]
#[command(version)]
#[command(about = "Train a levee detection CNN with Burn", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Validate the configuration and dataset, then exit without training
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_config = if args.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    init_logging(&log_config)?;

    println!("{}", "levee_net".green().bold());

    let config = LeveeConfig::load(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;
    config.log_summary();

    if args.dry_run {
        let checked = preflight(&config).context("Dataset check failed")?;
        println!("{}", "Dry run".cyan().bold());
        println!(
            "  Samples:      {} ({} train / {} test)",
            checked.samples, checked.train_samples, checked.test_samples
        );
        println!(
            "  Rasters:      {}x{}x{}",
            checked.spatial_dims.0, checked.spatial_dims.1, checked.channels
        );
        println!("  Window:       {:?}", checked.output_size);
        println!(
            "  Batches:      {} train / {} test",
            checked.train_batches, checked.test_batches
        );
        println!("{}", "Configuration OK".green());
        return Ok(());
    }

    let device = backend::default_device();
    info!("Backend: {}", backend::describe(&device));

    let started = std::time::Instant::now();
    let report = run_training::<TrainingBackend>(&config, &device).context("Training failed")?;

    println!();
    println!("{}", "Training Complete!".green().bold());
    println!("  Epochs run:     {}", report.history.len());
    if let Some(best) = report.history.best() {
        println!("  Best epoch:     {} (val_loss {:.4})", best.epoch, best.val_loss);
    }
    if let Some(epoch) = report.stopped_epoch {
        println!("  Stopped early:  epoch {}", epoch);
    }
    println!("  Model:          {}", report.model_path.display());
    println!("  Test score:     {:.4}", report.test_score.loss);
    println!("  Test accuracy:  {:.4}", report.test_score.accuracy);
    println!("  Elapsed:        {}", format_duration(started.elapsed().as_secs_f64()));

    Ok(())
}
