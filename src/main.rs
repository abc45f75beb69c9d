//! # rusty-sif
//!
//! Command-line front end for Andor `.sif` spectrometer files.
//!
//! ```bash
//! # Print the decoded header
//! rusty-sif info scan.sif
//!
//! # One Wavelength,Counts CSV per input file
//! rusty-sif convert scan_*.sif --out-dir spectra/ --reduce-noise --window narrow
//!
//! # All inputs into a single Parquet (or CSV) dataset
//! rusty-sif batch scan_*.sif --output spectra.parquet
//!
//! # Integrated intensity map of a 5x5 raster scan with background subtraction
//! rusty-sif hyperspectrum map/ --shape 5x5 --background map/background.sif --output map.csv
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};

use rusty_sif::config::ProcessingConfig;
use rusty_sif::data::array::GridShape;
use rusty_sif::data::batch::process_batch;
use rusty_sif::data::export::{write_dataset, write_grid_csv, write_spectrum_csv};
use rusty_sif::data::hyperspectrum::{coordinates_from_filenames, HyperspectrumAssembler};
use rusty_sif::data::loader::{load_file_with, DecodeOptions};

/// rusty-sif - Andor SIF decoder and hyperspectral map builder
#[derive(Parser)]
#[command(name = "rusty-sif")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Processing options shared by every command that produces spectra.
/// Flags override the values of `--config`.
#[derive(Args)]
struct ProcessingArgs {
    /// JSON processing configuration
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Smooth each spectrum with the selected window
    #[arg(long)]
    reduce_noise: bool,

    /// Noise window: narrow, wide or pinched
    #[arg(long)]
    window: Option<String>,

    /// Axis to sum for 2-D frames: rows or columns
    #[arg(long)]
    reduction: Option<String>,

    /// Keep only the central band: reduced, narrow or pinched
    #[arg(long)]
    crop: Option<String>,

    /// Frame of a kinetic series to use
    #[arg(long)]
    frame: Option<usize>,

    /// Remove spikes beyond this many standard deviations of the gradient
    #[arg(long)]
    spike_sigma: Option<f64>,

    /// Keep the complete frames of truncated files
    #[arg(long)]
    ignore_corrupt: bool,
}

impl ProcessingArgs {
    fn resolve(&self) -> Result<ProcessingConfig> {
        let mut config = match &self.config {
            Some(path) => ProcessingConfig::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => ProcessingConfig::default(),
        };
        config.reduce_noise |= self.reduce_noise;
        config.ignore_corrupt |= self.ignore_corrupt;
        if let Some(window) = &self.window {
            config.window = window.clone();
        }
        if let Some(reduction) = &self.reduction {
            config.reduction = Some(reduction.clone());
        }
        if let Some(crop) = &self.crop {
            config.crop = Some(crop.clone());
        }
        if let Some(frame) = self.frame {
            config.frame = frame;
        }
        if let Some(sigma) = self.spike_sigma {
            config.spike_sigma = Some(sigma);
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the decoded header of a .sif file as JSON
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Write one Wavelength,Counts CSV per input file
    Convert {
        #[arg(value_name = "INPUT", required = true)]
        inputs: Vec<PathBuf>,

        /// Directory for the CSV files (defaults to next to each input)
        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,

        #[command(flatten)]
        processing: ProcessingArgs,
    },

    /// Decode many files into one dataset (.parquet or .csv)
    Batch {
        #[arg(value_name = "INPUT", required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long, value_name = "OUTPUT")]
        output: PathBuf,

        #[command(flatten)]
        processing: ProcessingArgs,
    },

    /// Assemble a spatial grid of spectra and write its intensity map
    Hyperspectrum {
        /// .sif files, or a single directory holding them
        #[arg(value_name = "INPUT", required = true)]
        inputs: Vec<PathBuf>,

        /// Grid shape, e.g. 5x5 (overrides grid_shape in the config)
        #[arg(long)]
        shape: Option<String>,

        /// Background .sif subtracted from every cell
        #[arg(long, value_name = "FILE")]
        background: Option<PathBuf>,

        /// Place files by the acquisition index in their names instead of input order
        #[arg(long)]
        from_names: bool,

        /// Scale the intensity map into [0, 1]
        #[arg(long)]
        normalize: bool,

        #[arg(short, long, value_name = "OUTPUT")]
        output: PathBuf,

        #[command(flatten)]
        processing: ProcessingArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match cli.command {
        Commands::Info { file } => run_info(&file),
        Commands::Convert {
            inputs,
            out_dir,
            processing,
        } => run_convert(&inputs, out_dir.as_deref(), &processing.resolve()?),
        Commands::Batch {
            inputs,
            output,
            processing,
        } => run_batch(&inputs, &output, &processing.resolve()?),
        Commands::Hyperspectrum {
            inputs,
            shape,
            background,
            from_names,
            normalize,
            output,
            processing,
        } => {
            let mut config = processing.resolve()?;
            if background.is_some() {
                config.background = background;
            }
            run_hyperspectrum(&inputs, shape.as_deref(), from_names, normalize, &output, &config)
        }
    }
}

fn run_info(file: &Path) -> Result<()> {
    let doc = load_file_with(file, DecodeOptions { ignore_corrupt: true })
        .with_context(|| format!("decoding {}", file.display()))?;
    println!("{}", serde_json::to_string_pretty(&doc.header)?);
    println!(
        "{} of {} frame(s) present",
        doc.frames.len(),
        doc.header.number_of_frames()
    );
    Ok(())
}

fn run_convert(inputs: &[PathBuf], out_dir: Option<&Path>, config: &ProcessingConfig) -> Result<()> {
    let pipeline = config.pipeline()?;
    let mut failed = 0;
    for input in inputs {
        let spectrum = match pipeline.load(input) {
            Ok(spectrum) => spectrum,
            Err(e) => {
                warn!("{}: {e}", input.display());
                failed += 1;
                continue;
            }
        };
        let target = match out_dir {
            Some(dir) => dir.join(input.file_name().unwrap_or_default()).with_extension("csv"),
            None => input.with_extension("csv"),
        };
        write_spectrum_csv(&target, &spectrum)
            .with_context(|| format!("writing {}", target.display()))?;
        info!("{} -> {}", input.display(), target.display());
    }
    if failed == inputs.len() {
        bail!("none of the {} input file(s) could be converted", inputs.len());
    }
    Ok(())
}

fn run_batch(inputs: &[PathBuf], output: &Path, config: &ProcessingConfig) -> Result<()> {
    let outcome = process_batch(inputs, &config.pipeline()?)?;
    for failure in &outcome.failures {
        eprintln!("skipped {}: {}", failure.label, failure.error);
    }
    let dataset = outcome.into_dataset();
    write_dataset(output, &dataset).with_context(|| format!("writing {}", output.display()))?;
    println!("Wrote {} spectra to {}", dataset.len(), output.display());
    Ok(())
}

fn run_hyperspectrum(
    inputs: &[PathBuf],
    shape: Option<&str>,
    from_names: bool,
    normalize: bool,
    output: &Path,
    config: &ProcessingConfig,
) -> Result<()> {
    let shape: GridShape = match shape {
        Some(text) => text.parse()?,
        None => config
            .grid_shape()?
            .context("grid shape required: pass --shape or set grid_shape in the config")?,
    };
    let background = config.background.clone();
    let files = expand_inputs(inputs, background.as_deref())?;
    let assembler = HyperspectrumAssembler::new(shape.clone(), config.pipeline()?);

    let outcome = if from_names {
        let names: Vec<String> = files
            .iter()
            .map(|f| f.file_name().unwrap_or_default().to_string_lossy().into_owned())
            .collect();
        let coordinates = coordinates_from_filenames(&names, &shape)?;
        let entries: Vec<_> = coordinates.into_iter().zip(files).collect();
        assembler.assemble_mapped(&entries, background.as_ref())?
    } else {
        assembler.assemble(&files, background.as_ref())?
    };

    for (coordinate, error) in &outcome.failures {
        eprintln!("cell {coordinate:?} left empty: {error}");
    }
    let map = if normalize {
        outcome.grid.normalized_intensity_map()
    } else {
        outcome.grid.intensity_map()
    };
    write_grid_csv(output, &map).with_context(|| format!("writing {}", output.display()))?;
    println!(
        "Wrote {} intensity map ({} of {} cells) to {}",
        shape,
        outcome.grid.filled(),
        shape.len(),
        output.display()
    );
    Ok(())
}

/// A single directory expands to its `.sif` files in name order, minus the background.
fn expand_inputs(inputs: &[PathBuf], background: Option<&Path>) -> Result<Vec<PathBuf>> {
    let [dir] = inputs else {
        return Ok(inputs.to_vec());
    };
    if !dir.is_dir() {
        return Ok(inputs.to_vec());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let path = entry?.path();
        let is_sif = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("sif"));
        let is_background = background.is_some_and(|bg| same_file(bg, &path));
        if is_sif && !is_background {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
