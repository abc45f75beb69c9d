//! Writes a synthetic 5x5 Raman raster scan (`map_NN_X_Y_.sif`) plus a dark
//! `background.sif` into the directory given as the first argument
//! (default `sample_map`).

use std::path::PathBuf;

use anyhow::{Context, Result};

use rusty_sif::data::fixture::SifWriter;

const PIXELS: usize = 1024;
const GRID: usize = 5;
/// Wavelength polynomial of the synthetic spectrograph (nm).
const CALIBRATION: [f64; 3] = [540.0, 0.085, -2.0e-6];
const DARK_LEVEL: f64 = 300.0;

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

fn wavelength(pixel: usize) -> f64 {
    let p = pixel as f64;
    CALIBRATION[0] + CALIBRATION[1] * p + CALIBRATION[2] * p * p
}

fn generate_spectrum(peaks: &[(f64, f64, f64)], noise_level: f64, rng: &mut SimpleRng) -> Vec<f32> {
    (0..PIXELS)
        .map(|pixel| {
            let wl = wavelength(pixel);
            let signal: f64 = peaks
                .iter()
                .map(|&(mu, sigma, amp)| gaussian(wl, mu, sigma, amp))
                .sum();
            (DARK_LEVEL + signal + rng.gauss(0.0, noise_level)) as f32
        })
        .collect()
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

fn writer(samples: Vec<f32>) -> SifWriter {
    SifWriter::new(PIXELS, 1)
        .calibration(&CALIBRATION)
        .raman_excitation(532.0)
        .exposure_time(0.5)
        .frame(samples)
}

fn main() -> Result<()> {
    let out_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sample_map"));
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let mut rng = SimpleRng::new(42);
    let step_um = 0.5;

    // Two Raman bands whose strength peaks at the centre of the raster.
    let centre = (GRID as f64 - 1.0) / 2.0;
    for row in 0..GRID {
        for col in 0..GRID {
            let r2 = (row as f64 - centre).powi(2) + (col as f64 - centre).powi(2);
            let strength = 0.2 + (-r2 / 3.0).exp();
            let peaks = [
                (563.0, 0.8, 2500.0 * strength),
                (578.0, 1.2, 1200.0 * strength),
            ];
            let samples = generate_spectrum(&peaks, 15.0, &mut rng);

            let index = row * GRID + col + 1;
            let name = format!(
                "map_{index:02}_{:.1}_{:.1}_.sif",
                col as f64 * step_um,
                row as f64 * step_um
            );
            let path = out_dir.join(name);
            writer(samples)
                .write_to(&path)
                .with_context(|| format!("writing {}", path.display()))?;
        }
    }

    let background = generate_spectrum(&[], 15.0, &mut rng);
    let bg_path = out_dir.join("background.sif");
    writer(background)
        .write_to(&bg_path)
        .with_context(|| format!("writing {}", bg_path.display()))?;

    println!(
        "Wrote {} map files ({} pixels each) and background.sif to {}",
        GRID * GRID,
        PIXELS,
        out_dir.display()
    );
    Ok(())
}
