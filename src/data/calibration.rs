use serde::{Deserialize, Serialize};

use super::model::HeaderMetadata;

/// Where pixel numbering starts when the polynomial is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelOrigin {
    /// First pixel is `0`.
    #[default]
    Zero,
    /// First pixel is `1`.
    One,
}

/// A wavelength polynomial `c0 + c1*p + c2*p^2 + ...` over pixel position `p`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Calibration {
    coefficients: Vec<f64>,
    origin: PixelOrigin,
}

/// The x-axis of a spectrum and whether it is in wavelength units.
#[derive(Debug, Clone, PartialEq)]
pub struct WavelengthAxis {
    pub values: Vec<f64>,
    pub calibrated: bool,
}

impl Calibration {
    pub fn new(coefficients: Vec<f64>) -> Self {
        Calibration {
            coefficients,
            origin: PixelOrigin::Zero,
        }
    }

    /// Calibration for `frame`: per-frame coefficients win over the file-level ones.
    pub fn from_header(header: &HeaderMetadata, frame: usize) -> Self {
        let info = &header.calibration;
        let coefficients = info
            .frame_coefficients
            .get(frame)
            .unwrap_or(&info.coefficients)
            .clone();
        Calibration::new(coefficients)
    }

    pub fn with_origin(mut self, origin: PixelOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// False when there are no coefficients or all of them are zero.
    pub fn is_calibrated(&self) -> bool {
        self.coefficients.iter().any(|&c| c != 0.0)
    }

    pub fn wavelength(&self, pixel: usize) -> f64 {
        let p = self.position(pixel);
        self.coefficients.iter().rev().fold(0.0, |acc, &c| acc * p + c)
    }

    /// Axis for `pixels` samples; falls back to pixel positions when uncalibrated.
    pub fn resolve(&self, pixels: usize) -> WavelengthAxis {
        let calibrated = self.is_calibrated();
        let values = (0..pixels)
            .map(|i| {
                if calibrated {
                    self.wavelength(i)
                } else {
                    self.position(i)
                }
            })
            .collect();
        WavelengthAxis { values, calibrated }
    }

    fn position(&self, pixel: usize) -> f64 {
        match self.origin {
            PixelOrigin::Zero => pixel as f64,
            PixelOrigin::One => (pixel + 1) as f64,
        }
    }
}

/// Convert wavelengths (nm) to Raman shift (cm⁻¹) relative to `excitation_nm`.
pub fn raman_shift(wavelengths: &[f64], excitation_nm: f64) -> Option<Vec<f64>> {
    if !(excitation_nm.is_finite() && excitation_nm > 0.0) {
        return None;
    }
    Some(
        wavelengths
            .iter()
            .map(|&w| 1e7 * (1.0 / excitation_nm - 1.0 / w))
            .collect(),
    )
}
