use std::path::Path;

use super::header::{spectrograph_layout, EXTENDED_TIMESTAMPS, MAGIC, POLYNOMIAL_CALIBRATION};
use crate::error::{Result, SifError};

/// Builds synthetic `.sif` files in the record layout [`decode_header`] reads.
///
/// Used by the sample generator and the tests. Frames must each hold
/// `width * height` samples; nothing is validated so that broken files can be
/// produced on purpose.
///
/// [`decode_header`]: super::header::decode_header
#[derive(Debug, Clone)]
pub struct SifWriter {
    version: u32,
    width: usize,
    height: usize,
    tracks: usize,
    frames: Vec<Vec<f32>>,
    coefficients: Vec<f64>,
    frame_coefficients: Vec<Vec<f64>>,
    spectrograph: String,
    detector_type: String,
    original_filename: String,
    exposure_time: f64,
    experiment_time: i64,
    raman_excitation: Option<f64>,
    padding: usize,
}

impl SifWriter {
    pub fn new(width: usize, height: usize) -> Self {
        SifWriter {
            version: EXTENDED_TIMESTAMPS,
            width,
            height,
            tracks: 1,
            frames: Vec::new(),
            coefficients: Vec::new(),
            frame_coefficients: Vec::new(),
            spectrograph: "SR-303i".to_string(),
            detector_type: "DU420_BVF".to_string(),
            original_filename: "C:\\data\\sample.sif".to_string(),
            exposure_time: 1.0,
            experiment_time: 1_540_956_289,
            raman_excitation: None,
            padding: 0,
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Split the frame height into `tracks` stacked sub-images.
    pub fn tracks(mut self, tracks: usize) -> Self {
        self.tracks = tracks.max(1);
        self
    }

    pub fn frame(mut self, samples: Vec<f32>) -> Self {
        self.frames.push(samples);
        self
    }

    /// Polynomial coefficients, ascending order. Empty writes an opaque calibration line.
    pub fn calibration(mut self, coefficients: &[f64]) -> Self {
        self.coefficients = coefficients.to_vec();
        self
    }

    /// Per-frame coefficients embedded in the user text.
    pub fn frame_calibration(mut self, per_frame: Vec<Vec<f64>>) -> Self {
        self.frame_coefficients = per_frame;
        self
    }

    /// Single-token spectrograph name.
    pub fn spectrograph(mut self, name: &str) -> Self {
        self.spectrograph = name.to_string();
        self
    }

    pub fn exposure_time(mut self, seconds: f64) -> Self {
        self.exposure_time = seconds;
        self
    }

    pub fn experiment_time(mut self, unix_seconds: i64) -> Self {
        self.experiment_time = unix_seconds;
        self
    }

    pub fn raman_excitation(mut self, nm: f64) -> Self {
        self.raman_excitation = Some(nm);
        self
    }

    /// Zero bytes appended after the payload.
    pub fn trailing_padding(mut self, bytes: usize) -> Self {
        self.padding = bytes;
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = MAGIC.to_vec();
        let frames = self.frames.len();
        let frame_len = self.width * self.height;

        text(&mut out, "65538 1\n");

        // acquisition
        text(
            &mut out,
            &format!("{} 0 0 1 {} -70 ", self.version, self.experiment_time),
        );
        out.extend_from_slice(&[b' '; 10]);
        text(&mut out, &format!("0 {0} {0} {0} 1 ", self.exposure_time));
        out.extend_from_slice(b"\x00 ");
        text(&mut out, &format!("{} 0.000001 0 1 1 0 0 0 ", self.exposure_time));
        text(&mut out, &"0 ".repeat(16));
        text(&mut out, "500 1 0 0\n");

        // detector, user text, shutter
        text(&mut out, &format!("{}\n", self.detector_type));
        text(
            &mut out,
            &format!("{} {} {}\n", self.width, self.height, self.original_filename.len()),
        );
        text(&mut out, &self.original_filename);
        text(&mut out, " \n");
        let user_text = self.user_text();
        text(&mut out, &format!("65538 {}\n", user_text.len()));
        text(&mut out, &user_text);
        text(&mut out, "\n65538 ");
        out.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 0]);
        text(&mut out, "0 0\n");

        // spectrograph
        let (before, named, after) = spectrograph_layout(self.version);
        text(&mut out, &"0\n".repeat(before));
        if named {
            text(&mut out, &format!("1 {} 0\n", self.spectrograph));
        }
        text(&mut out, &"0\n".repeat(after));

        // calibration
        if self.coefficients.is_empty() {
            text(&mut out, "65539 \x01 \x00 \x01 \x00\n");
        } else {
            text(&mut out, &format!("{POLYNOMIAL_CALIBRATION} \x01 \x00\n"));
            text(&mut out, &format!("{}\n", join(&self.coefficients, " ")));
        }
        text(&mut out, "0 1 0 0\n0 1 0 0\n");
        match self.raman_excitation {
            Some(nm) => text(&mut out, &format!("{nm}\n")),
            None => text(&mut out, "\n"),
        }
        text(&mut out, "422\n13\n13\n");

        // axes
        for label in ["Wavelength", "Counts", "Pixel number"] {
            text(&mut out, &format!("{}\n{label}", label.len()));
        }

        // geometry
        text(
            &mut out,
            &format!(
                "65541 1 {} {} 1 {frames} {} {} {frame_len}\n",
                self.height,
                self.width,
                self.tracks,
                frame_len * frames,
            ),
        );
        let track_height = self.height / self.tracks;
        for k in 0..self.tracks {
            text(
                &mut out,
                &format!(
                    "65538 1 {} {} {} 1 1 0 0\n",
                    (k + 1) * track_height,
                    self.width,
                    k * track_height + 1,
                ),
            );
        }

        // timestamps and flag
        for i in 0..frames {
            text(&mut out, &format!("{i}\n"));
        }
        if self.version == EXTENDED_TIMESTAMPS {
            text(&mut out, "1\n");
            text(&mut out, &"0\n".repeat(frames));
        } else {
            text(&mut out, "0\n");
        }

        for frame in &self.frames {
            for sample in frame {
                out.extend_from_slice(&sample.to_le_bytes());
            }
        }
        out.resize(out.len() + self.padding, 0);
        out
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes()).map_err(|e| SifError::io(path, e))
    }

    fn user_text(&self) -> String {
        self.frame_coefficients
            .iter()
            .enumerate()
            .map(|(i, c)| format!("Calibration data for frame {}: {}", i + 1, join(c, ",")))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn text(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
}

fn join(values: &[f64], sep: &str) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(sep)
}
