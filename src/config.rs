use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::data::array::GridShape;
use crate::data::batch::Pipeline;
use crate::data::calibration::PixelOrigin;
use crate::data::filter::{NoiseWindow, SpectralCrop};
use crate::data::frames::Reduction;
use crate::data::loader::{DecodeOptions, SpectrumRequest};
use crate::error::{Result, SifError};

/// Processing options, usually read from a JSON file:
///
/// ```json
/// {
///   "reduce_noise": true,
///   "window": "pinched",
///   "background": "dark/background.sif",
///   "grid_shape": [5, 5]
/// }
/// ```
///
/// Every field is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    pub reduce_noise: bool,
    /// `narrow`, `wide` or `pinched`. Checked even when smoothing is off.
    pub window: String,
    pub background: Option<PathBuf>,
    pub grid_shape: Option<Vec<usize>>,
    pub frame: usize,
    /// `rows` or `columns`; needed for 2-D frames.
    pub reduction: Option<String>,
    /// `reduced`, `narrow` or `pinched`: keep only the central band.
    pub crop: Option<String>,
    pub spike_sigma: Option<f64>,
    pub one_based_pixels: bool,
    pub ignore_corrupt: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        ProcessingConfig {
            reduce_noise: false,
            window: NoiseWindow::Pinched.name().to_string(),
            background: None,
            grid_shape: None,
            frame: 0,
            reduction: None,
            crop: None,
            spike_sigma: None,
            one_based_pixels: false,
            ignore_corrupt: false,
        }
    }
}

impl ProcessingConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| SifError::io(path, e))?;
        Self::from_json_str(&text)
    }

    pub fn noise_window(&self) -> Result<NoiseWindow> {
        self.window.parse()
    }

    /// Validate and turn the options into a [`Pipeline`].
    pub fn pipeline(&self) -> Result<Pipeline> {
        let window = self.noise_window()?;
        let reduction = self
            .reduction
            .as_deref()
            .map(str::parse::<Reduction>)
            .transpose()?;
        let crop = self
            .crop
            .as_deref()
            .map(str::parse::<SpectralCrop>)
            .transpose()?;
        if let Some(sigma) = self.spike_sigma {
            if !(sigma.is_finite() && sigma > 0.0) {
                return Err(SifError::InvalidConfig(format!(
                    "spike_sigma must be a positive number, got {sigma}"
                )));
            }
        }

        Ok(Pipeline {
            request: SpectrumRequest {
                frame: self.frame,
                reduction,
                origin: if self.one_based_pixels {
                    PixelOrigin::One
                } else {
                    PixelOrigin::Zero
                },
            },
            crop,
            noise: self.reduce_noise.then_some(window),
            spike_sigma: self.spike_sigma,
            decode: DecodeOptions {
                ignore_corrupt: self.ignore_corrupt,
            },
            cancel: None,
        })
    }

    pub fn grid_shape(&self) -> Result<Option<GridShape>> {
        self.grid_shape.clone().map(GridShape::new).transpose()
    }
}
