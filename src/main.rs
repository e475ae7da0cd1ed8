mod analysis;
mod conversion;
mod export;
mod process;
mod results;
mod state;
mod taskstatus;

#[macro_use]
extern crate stump;

use analysis::builtin::BuiltinEngine;
use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use process::ImageProcessor;
use state::{Configuration, MeasurementKind, ThresholdMode};
use std::path::{Path, PathBuf};
use taskstatus::*;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Batch ROI measurement and colocalisation of multi-channel fluorescence micrographs"
)]
struct Cli {
    /// Configuration file (default: ~/.cellquant/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process every image under INPUT and write results to OUTPUT
    Run {
        input: PathBuf,
        output: PathBuf,

        /// Threshold selection for the main channel
        #[arg(long, value_enum)]
        threshold: Option<ThresholdMode>,

        /// Lower threshold used with `--threshold fixed`
        #[arg(long)]
        fixed_threshold: Option<f64>,

        /// Minimum ROI area in pixels
        #[arg(long)]
        min_size: Option<u32>,
    },

    /// Show or edit the stored configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,

    /// Rename an existing channel
    SetChannel { index: String, name: String },

    /// Append a channel
    AddChannel { name: String },

    /// Remove a channel; later channels are renumbered
    RemoveChannel { index: String },

    /// Channel thresholded for ROI detection
    MainChannel { index: String },

    MaskChannel { name: String },

    /// Colocalise INDEX against channel 1. Without INDEX colocalisation is disabled
    Coloc { index: Option<String> },

    /// Enable or disable a measurement
    Measurement {
        #[arg(value_enum)]
        kind: MeasurementKind,
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },

    /// Restore the default configuration
    Reset,
}

/// Configuration the command starts from. A reset never reads the stored
/// file, so it also recovers from a malformed one.
fn load_config(command: &Command, path: &Option<PathBuf>) -> Result<Configuration> {
    if let Command::Config {
        action: ConfigAction::Reset,
    } = command
    {
        return Ok(Configuration::default());
    }
    match path {
        Some(p) => Configuration::load_from_file(p),
        None => Configuration::load_from_userhome(),
    }
}

fn save_config(config: &Configuration, path: &Option<PathBuf>) -> Result<()> {
    config.validate()?;
    match path {
        Some(p) => config.save_to_file(p),
        None => config.save_to_userhome(),
    }
}

fn print_config(config: &Configuration) {
    println!("{}", "Channels".bold());
    for index in config.channel_indices() {
        let name = config.channel_name(&index).unwrap_or_default();
        let mut line = format!("  {} - {}", index, name.green());
        if index == config.main_channel {
            line.push_str(&format!(" {}", "(main)".yellow()));
        }
        if config.coloc_channel.as_deref() == Some(index.as_str()) {
            line.push_str(&format!(" {}", "(colocalisation)".cyan()));
        }
        println!("{}", line);
    }
    println!("{} {}", "Mask channel:".bold(), config.mask_channel);
    println!(
        "{} {}",
        "Colocalisation:".bold(),
        if config.colocalisation_enabled() {
            "enabled".green()
        } else {
            "disabled".red()
        }
    );
    println!("{} {:?}", "Header policy:".bold(), config.header_policy);

    let a = &config.analysis;
    println!("{}", "Analysis".bold());
    println!("  threshold: {:?} (fixed {}, max {})", a.threshold_mode, a.fixed_threshold, a.threshold_max);
    println!("  minimum particle size: {}", a.min_particle_size);
    println!(
        "  colocalisation: {} iterations, max shift {}, seed {}",
        a.coloc_iterations, a.coloc_max_shift, a.coloc_seed
    );

    let m = &config.measurements;
    println!("{}", "Measurements".bold());
    for (label, enabled) in [
        ("area", m.area),
        ("mean", m.mean),
        ("std-dev", m.std_dev),
        ("min-max", m.min_max),
        ("centroid", m.centroid),
        ("integrated-density", m.integrated_density),
    ] {
        let state = if enabled { "on".green() } else { "off".red() };
        println!("  {}: {}", label, state);
    }
}

fn print_instructions(config: &Configuration) {
    println!("Every file under the input folder is processed in turn.");
    if config.analysis.threshold_mode == ThresholdMode::Prompt {
        println!("For each image you will be asked to confirm a threshold.");
    }
    println!("Channels:");
    for index in config.channel_indices() {
        println!("  Channel {} - {}", index, config.channel_name(&index).unwrap_or_default());
    }
}

fn run(
    config: &mut Configuration,
    input: &Path,
    output: &Path,
    threshold: Option<ThresholdMode>,
    fixed_threshold: Option<f64>,
    min_size: Option<u32>,
) -> Result<()> {
    if let Some(mode) = threshold {
        config.analysis.threshold_mode = mode;
    }
    if let Some(t) = fixed_threshold {
        config.analysis.fixed_threshold = t;
    }
    if let Some(s) = min_size {
        config.analysis.min_particle_size = s;
    }
    config.validate()?;
    print_instructions(config);

    // Prompts share the terminal with the bar
    let pb = if config.analysis.threshold_mode == ThresholdMode::Prompt {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(0)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );

    let engine = BuiltinEngine::from_config(config);
    let mut processor = ImageProcessor::new(config, input, output, engine)?;
    let summary = processor.run(|tsc| match tsc.status {
        Some(TaskStatus::TaskPercentage(name, len, cnt)) => {
            pb.set_length(len as u64);
            pb.set_position(cnt as u64);
            pb.set_message(name);
        }
        None => pb.finish_and_clear(),
    })?;

    println!(
        "Processed {} image(s), {} ROI(s). {} file(s) written to {:?}",
        summary.images,
        summary.rois,
        summary.files_written.len(),
        output
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse_from(wild::args_os());

    if args.verbose {
        stump::set_min_log_level(stump::LogEntryLevel::DEBUG);
    }

    let mut config = load_config(&args.command, &args.config)?;

    match args.command {
        Command::Run {
            input,
            output,
            threshold,
            fixed_threshold,
            min_size,
        } => run(&mut config, &input, &output, threshold, fixed_threshold, min_size)?,
        Command::Config { action } => {
            match action {
                ConfigAction::Show => {
                    print_config(&config);
                    return Ok(());
                }
                ConfigAction::SetChannel { index, name } => config.set_channel(&index, &name)?,
                ConfigAction::AddChannel { name } => {
                    let index = config.add_channel(&name);
                    info!("Added channel {} - {}", index, name);
                }
                ConfigAction::RemoveChannel { index } => config.remove_channel(&index)?,
                ConfigAction::MainChannel { index } => config.set_main_channel(&index)?,
                ConfigAction::MaskChannel { name } => config.set_mask_channel(&name),
                ConfigAction::Coloc { index } => config.set_coloc_channel(index.as_deref())?,
                ConfigAction::Measurement { kind, enabled } => config.measurements.set(kind, enabled),
                ConfigAction::Reset => config = Configuration::default(),
            }
            save_config(&config, &args.config)?;
            print_config(&config);
        }
    }
    Ok(())
}
