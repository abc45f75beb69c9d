use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::data::array;
use crate::error::Result;

// ---------------------------------------------------------------------------
// MetadataValue – a single cell in a metadata column
// ---------------------------------------------------------------------------

/// A loosely typed metadata value attached to a spectrum for export.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => write!(f, "{s}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Null => Ok(()),
        }
    }
}

impl MetadataValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(v) => Some(*v),
            MetadataValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::String(s)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Integer(v)
    }
}

// ---------------------------------------------------------------------------
// Header records
// ---------------------------------------------------------------------------

/// Everything the header decoder extracts from a `.sif` file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderMetadata {
    pub sif_version: u32,
    pub acquisition: AcquisitionInfo,
    pub detector: DetectorInfo,
    pub spectrograph: Option<String>,
    pub calibration: CalibrationInfo,
    pub axes: AxisLabels,
    pub geometry: FrameGeometry,
    /// One entry per frame, seconds relative to the experiment start.
    pub timestamps: Vec<i64>,
    /// Byte offset of the first payload sample.
    pub payload_offset: usize,
}

impl HeaderMetadata {
    pub fn frame_width(&self) -> usize {
        self.geometry.frame_width
    }

    pub fn frame_height(&self) -> usize {
        self.geometry.frame_height
    }

    pub fn number_of_frames(&self) -> usize {
        self.geometry.number_of_frames
    }
}

/// Timing and acquisition settings from the first header line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcquisitionInfo {
    /// Unix timestamp of the acquisition.
    pub experiment_time: i64,
    pub detector_temperature: f64,
    pub exposure_time: f64,
    pub cycle_time: f64,
    pub accumulated_cycle_time: f64,
    pub accumulated_cycles: u32,
    pub stack_cycle_time: f64,
    pub pixel_readout_time: f64,
    pub gain_dac: f64,
    pub gate_width: f64,
    pub grating_blaze: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectorInfo {
    pub detector_type: String,
    /// Sensor width in pixels.
    pub width: usize,
    /// Sensor height in pixels.
    pub height: usize,
    pub original_filename: String,
    pub shutter_time: (f64, f64),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationInfo {
    pub version: u32,
    /// Polynomial coefficients in ascending order (`c0 + c1*i + ...`).
    /// Empty when the file carries no usable calibration.
    pub coefficients: Vec<f64>,
    /// Per-frame coefficients, present only in files that embed them in the user text.
    pub frame_coefficients: Vec<Vec<f64>>,
    pub raman_excitation: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisLabels {
    pub frame_axis: String,
    pub data_type: String,
    pub image_axis: String,
}

/// Inclusive pixel rectangle as written in the header (`x0 y1 x1 y0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Area {
    pub x0: i64,
    pub y1: i64,
    pub x1: i64,
    pub y0: i64,
}

/// A region of interest read out of the sensor, with its binning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubImage {
    pub area: Area,
    pub xbin: i64,
    pub ybin: i64,
    pub width: usize,
    pub height: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameGeometry {
    pub image_area: Area,
    pub number_of_frames: usize,
    pub sub_images: Vec<SubImage>,
    pub total_length: usize,
    pub image_length: usize,
    pub frame_width: usize,
    pub frame_height: usize,
}

// ---------------------------------------------------------------------------
// Frame – one 2-D exposure
// ---------------------------------------------------------------------------

/// One exposure of a kinetic series, `height` rows of `width` samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: usize,
    pub height: usize,
    /// Row-major samples, `width * height` long.
    pub data: Vec<f32>,
}

impl Frame {
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row >= self.height || col >= self.width {
            return None;
        }
        self.data.get(row * self.width + col).copied()
    }

    pub fn row(&self, row: usize) -> Option<&[f32]> {
        if row >= self.height {
            return None;
        }
        self.data.get(row * self.width..(row + 1) * self.width)
    }
}

// ---------------------------------------------------------------------------
// Spectrum – (wavelength, intensity) pairs
// ---------------------------------------------------------------------------

/// A single spectrum: the unit handed to plotting and export.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    /// Wavelength axis (x), or raw pixel indices when `calibrated` is false.
    pub x: Vec<f64>,
    /// Intensity axis (y) – same length as `x`.
    pub y: Vec<f64>,
    pub calibrated: bool,
    /// Metadata columns: column_name → value.
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl Spectrum {
    pub fn new(x: Vec<f64>, y: Vec<f64>, calibrated: bool) -> Self {
        Spectrum {
            x,
            y,
            calibrated,
            metadata: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Element-wise `self.y - background.y`, keeping this spectrum's axis.
    pub fn subtract(&self, background: &Spectrum) -> Result<Spectrum> {
        let y = array::subtract(&self.y, &background.y)?;
        Ok(Spectrum {
            x: self.x.clone(),
            y,
            calibrated: self.calibrated,
            metadata: self.metadata.clone(),
        })
    }

    /// Iterate `(wavelength, intensity)` pairs.
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.x.iter().copied().zip(self.y.iter().copied())
    }
}

// ---------------------------------------------------------------------------
// SpectralDataset – an ordered collection of spectra
// ---------------------------------------------------------------------------

/// An ordered set of spectra with the union of their metadata columns.
#[derive(Debug, Clone, Default)]
pub struct SpectralDataset {
    pub spectra: Vec<Spectrum>,
    /// Ordered list of metadata column names (excludes x, y).
    pub column_names: Vec<String>,
}

impl SpectralDataset {
    /// Build the column index from the spectra.
    pub fn from_spectra(spectra: Vec<Spectrum>) -> Self {
        let column_names: BTreeSet<String> = spectra
            .iter()
            .flat_map(|sp| sp.metadata.keys().cloned())
            .collect();
        SpectralDataset {
            spectra,
            column_names: column_names.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.spectra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }
}
