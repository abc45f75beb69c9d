use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::model::Spectrum;
use crate::error::SifError;

// ---------------------------------------------------------------------------
// Noise windows: named smoothing kernels
// ---------------------------------------------------------------------------

/// Smoothing kernel applied by [`reduce_noise`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseWindow {
    /// 3-point box.
    Narrow,
    /// 9-point box.
    Wide,
    /// 5-point triangle, weights `1 2 3 2 1`.
    Pinched,
}

impl NoiseWindow {
    pub const ALL: [NoiseWindow; 3] = [NoiseWindow::Narrow, NoiseWindow::Wide, NoiseWindow::Pinched];

    pub fn name(self) -> &'static str {
        match self {
            NoiseWindow::Narrow => "narrow",
            NoiseWindow::Wide => "wide",
            NoiseWindow::Pinched => "pinched",
        }
    }

    /// Unnormalised, symmetric, odd-length weights.
    pub fn kernel(self) -> &'static [f64] {
        match self {
            NoiseWindow::Narrow => &[1.0, 1.0, 1.0],
            NoiseWindow::Wide => &[1.0; 9],
            NoiseWindow::Pinched => &[1.0, 2.0, 3.0, 2.0, 1.0],
        }
    }
}

impl fmt::Display for NoiseWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NoiseWindow {
    type Err = SifError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        NoiseWindow::ALL
            .into_iter()
            .find(|w| w.name() == wanted)
            .ok_or_else(|| SifError::UnknownWindow(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Smoothing
// ---------------------------------------------------------------------------

/// Weighted moving average with `kernel` centred on each sample.
///
/// Near the ends the kernel is truncated and renormalised over the weights that
/// still fall inside the signal, so the output has the same length as the input.
pub fn smooth(values: &[f64], kernel: &[f64]) -> Vec<f64> {
    let half = kernel.len() / 2;
    let n = values.len();
    (0..n)
        .map(|i| {
            let centre = values[i];
            let mut deviation = 0.0;
            let mut weight = 0.0;
            for (k, &w) in kernel.iter().enumerate() {
                let Some(j) = (i + k).checked_sub(half) else {
                    continue;
                };
                if j >= n {
                    break;
                }
                // Deviations from the centre sample: flat input comes back unchanged.
                deviation += w * (values[j] - centre);
                weight += w;
            }
            if weight > 0.0 {
                centre + deviation / weight
            } else {
                centre
            }
        })
        .collect()
}

/// Smooth the intensities of `spectrum`; the x-axis is left untouched.
pub fn reduce_noise(spectrum: &Spectrum, window: NoiseWindow) -> Spectrum {
    Spectrum {
        x: spectrum.x.clone(),
        y: smooth(&spectrum.y, window.kernel()),
        calibrated: spectrum.calibrated,
        metadata: spectrum.metadata.clone(),
    }
    .with_metadata("noise_window", window.name())
}

// ---------------------------------------------------------------------------
// Cropping to the central band
// ---------------------------------------------------------------------------

/// How much of each end of a spectrum [`crop`] trims away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpectralCrop {
    /// A tenth from each end.
    Reduced,
    /// A quarter from each end.
    Narrow,
    /// A third from each end.
    Pinched,
}

impl SpectralCrop {
    pub const ALL: [SpectralCrop; 3] = [SpectralCrop::Reduced, SpectralCrop::Narrow, SpectralCrop::Pinched];

    pub fn name(self) -> &'static str {
        match self {
            SpectralCrop::Reduced => "reduced",
            SpectralCrop::Narrow => "narrow",
            SpectralCrop::Pinched => "pinched",
        }
    }

    /// Samples removed from each end of a spectrum of `len` samples.
    pub fn trim(self, len: usize) -> usize {
        match self {
            SpectralCrop::Reduced => len / 10,
            SpectralCrop::Narrow => len / 4,
            SpectralCrop::Pinched => len / 3,
        }
    }
}

impl fmt::Display for SpectralCrop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SpectralCrop {
    type Err = SifError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        SpectralCrop::ALL
            .into_iter()
            .find(|c| c.name() == wanted)
            .ok_or_else(|| {
                SifError::InvalidConfig(format!(
                    "unknown crop '{s}' (expected reduced, narrow or pinched)"
                ))
            })
    }
}

/// Keep the central band of `spectrum`, trimming the same number of samples
/// from both ends of both axes.
pub fn crop(spectrum: &Spectrum, band: SpectralCrop) -> Spectrum {
    let n = spectrum.len();
    let trim = band.trim(n);
    let band_of = |values: &[f64]| -> Vec<f64> {
        values.iter().skip(trim).take(n - 2 * trim).copied().collect()
    };
    Spectrum {
        x: band_of(&spectrum.x),
        y: band_of(&spectrum.y),
        calibrated: spectrum.calibrated,
        metadata: spectrum.metadata.clone(),
    }
    .with_metadata("crop", band.name())
}

// ---------------------------------------------------------------------------
// Spike removal
// ---------------------------------------------------------------------------

/// Drop samples that follow an outlying jump in intensity.
///
/// A gradient `y[i+1] - y[i]` is an outlier when it lies more than `sigma`
/// population standard deviations from the mean gradient; sample `i + 1` is then
/// removed from both axes. The result can be shorter than the input.
pub fn remove_spikes(spectrum: &Spectrum, sigma: f64) -> Spectrum {
    let y = &spectrum.y;
    if y.len() < 2 {
        return spectrum.clone();
    }
    let gradients: Vec<f64> = y.windows(2).map(|w| w[1] - w[0]).collect();
    let n = gradients.len() as f64;
    let mean = gradients.iter().sum::<f64>() / n;
    let std = (gradients.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / n).sqrt();
    let threshold = sigma * std;

    let mut keep = vec![true; y.len()];
    for (i, g) in gradients.iter().enumerate() {
        if (g - mean).abs() > threshold {
            keep[i + 1] = false;
        }
    }

    let pick = |values: &[f64]| -> Vec<f64> {
        values
            .iter()
            .zip(&keep)
            .filter(|(_, k)| **k)
            .map(|(&v, _)| v)
            .collect()
    };
    Spectrum {
        x: pick(&spectrum.x),
        y: pick(y),
        calibrated: spectrum.calibrated,
        metadata: spectrum.metadata.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrum(y: Vec<f64>) -> Spectrum {
        let x = (0..y.len()).map(|i| i as f64).collect();
        Spectrum::new(x, y, false)
    }

    #[test]
    fn window_names_round_trip() {
        for window in NoiseWindow::ALL {
            assert_eq!(window.name().parse::<NoiseWindow>().unwrap(), window);
        }
        assert!(matches!(
            "medium".parse::<NoiseWindow>(),
            Err(SifError::UnknownWindow(name)) if name == "medium"
        ));
    }

    #[test]
    fn constant_signal_is_unchanged_by_every_window() {
        let flat = spectrum(vec![3.7; 25]);
        for window in NoiseWindow::ALL {
            assert_eq!(reduce_noise(&flat, window).y, flat.y, "{window}");
        }
    }

    #[test]
    fn narrow_window_averages_neighbours() {
        let out = smooth(&[0.0, 3.0, 0.0, 3.0, 0.0], NoiseWindow::Narrow.kernel());
        assert_eq!(out, vec![1.5, 1.0, 2.0, 1.0, 1.5]);
    }

    #[test]
    fn smoothing_keeps_length_and_axis() {
        let sp = spectrum(vec![0.0, 10.0, 0.0, 10.0, 0.0, 10.0, 0.0]);
        let out = reduce_noise(&sp, NoiseWindow::Wide);
        assert_eq!(out.len(), sp.len());
        assert_eq!(out.x, sp.x);
        assert_eq!(
            out.metadata.get("noise_window").map(|v| v.to_string()),
            Some("wide".to_string())
        );
    }

    #[test]
    fn pinched_window_reduces_peak_height() {
        let mut y = vec![0.0; 11];
        y[5] = 9.0;
        let out = smooth(&y, NoiseWindow::Pinched.kernel());
        assert_eq!(out[5], 3.0);
        assert_eq!(out[4], 2.0);
        assert_eq!(out[3], 1.0);
        assert_eq!(out[2], 0.0);
    }

    #[test]
    fn crop_keeps_the_central_band() {
        let sp = spectrum((0..30).map(|i| i as f64).collect());
        let reduced = crop(&sp, SpectralCrop::Reduced);
        assert_eq!(reduced.x.first(), Some(&3.0));
        assert_eq!(reduced.len(), 24);
        assert_eq!(crop(&sp, SpectralCrop::Narrow).y, (7..23).map(f64::from).collect::<Vec<_>>());
        let pinched = crop(&sp, SpectralCrop::Pinched);
        assert_eq!((pinched.len(), pinched.x[0]), (10, 10.0));
        assert_eq!(
            pinched.metadata.get("crop").map(|v| v.to_string()),
            Some("pinched".to_string())
        );
    }

    #[test]
    fn crop_of_a_short_spectrum_keeps_everything() {
        let sp = spectrum(vec![1.0, 2.0]);
        assert_eq!(crop(&sp, SpectralCrop::Pinched).y, sp.y);
        assert!(matches!(
            "wide".parse::<SpectralCrop>(),
            Err(SifError::InvalidConfig(_))
        ));
    }

    #[test]
    fn spike_and_its_recovery_are_removed() {
        let mut y = vec![10.0; 20];
        y[4] = 500.0;
        let out = remove_spikes(&spectrum(y), 3.0);
        assert_eq!(out.len(), 18);
        assert_eq!(out.x.len(), 18);
        assert!(out.y.iter().all(|&v| v == 10.0));
        assert!(!out.x.contains(&4.0));
    }

    #[test]
    fn smooth_ramp_has_no_spikes() {
        let sp = spectrum((0..50).map(|i| i as f64 * 2.0).collect());
        assert_eq!(remove_spikes(&sp, 3.0), sp);
    }
}
