//! Decoding of Andor multi-channel (`.sif`) spectrometer files, wavelength
//! calibration, noise reduction, and assembly of hyperspectral maps.
//!
//! ```no_run
//! use std::path::Path;
//! use rusty_sif::data::loader::{load_file, SpectrumRequest};
//!
//! let doc = load_file(Path::new("scan.sif"))?;
//! let spectrum = doc.spectrum(&SpectrumRequest::default())?;
//! println!("{} samples, calibrated: {}", spectrum.len(), spectrum.calibrated);
//! # Ok::<(), rusty_sif::SifError>(())
//! ```

pub mod config;
pub mod data;
pub mod error;

pub use error::{Result, SifError};
