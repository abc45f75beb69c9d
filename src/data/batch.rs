use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use rayon::prelude::*;

use super::filter::{crop, reduce_noise, remove_spikes, NoiseWindow, SpectralCrop};
use super::loader::{DecodeOptions, SifDocument, SpectrumRequest, SpectrumSource};
use super::model::{SpectralDataset, Spectrum};
use crate::error::{Result, SifError};

// ---------------------------------------------------------------------------
// Pipeline – decode, reduce, clean
// ---------------------------------------------------------------------------

/// Shared flag a caller can raise to abandon a running batch.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The per-file processing applied identically to every input (and to the background).
///
/// Processing runs in two stages. [`Pipeline::load_raw`] decodes, picks the
/// frame and crops; [`Pipeline::clean`] removes spikes and smooths. Background
/// subtraction sits between the two so that both operands still share one axis.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    pub request: SpectrumRequest,
    /// Keep only the central band of each spectrum.
    pub crop: Option<SpectralCrop>,
    /// Smooth with this window; `None` leaves intensities as decoded.
    pub noise: Option<NoiseWindow>,
    /// Remove spikes beyond this many standard deviations of the gradient.
    pub spike_sigma: Option<f64>,
    pub decode: DecodeOptions,
    pub cancel: Option<CancelFlag>,
}

impl Pipeline {
    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled)
    }

    /// Both stages on an already decoded document.
    pub fn process(&self, doc: &SifDocument) -> Result<Spectrum> {
        Ok(self.clean(self.extract(doc)?))
    }

    /// Requested frame of `doc`, cropped.
    pub fn extract(&self, doc: &SifDocument) -> Result<Spectrum> {
        let spectrum = doc.spectrum(&self.request)?;
        Ok(match self.crop {
            Some(band) => crop(&spectrum, band),
            None => spectrum,
        })
    }

    /// Spike removal, then smoothing.
    pub fn clean(&self, mut spectrum: Spectrum) -> Spectrum {
        if let Some(sigma) = self.spike_sigma {
            spectrum = remove_spikes(&spectrum, sigma);
        }
        if let Some(window) = self.noise {
            spectrum = reduce_noise(&spectrum, window);
        }
        spectrum
    }

    /// Decode `source` and run the first stage only.
    pub fn load_raw<S: SpectrumSource + ?Sized>(&self, source: &S) -> Result<Spectrum> {
        if self.is_cancelled() {
            return Err(SifError::Cancelled);
        }
        let doc = source.load(self.decode)?;
        self.extract(&doc)
    }

    pub fn load<S: SpectrumSource + ?Sized>(&self, source: &S) -> Result<Spectrum> {
        Ok(self.clean(self.load_raw(source)?))
    }
}

// ---------------------------------------------------------------------------
// Batch processing
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct BatchItem {
    /// Position of the source in the input slice.
    pub index: usize,
    pub label: String,
    pub spectrum: Spectrum,
}

#[derive(Debug)]
pub struct BatchFailure {
    pub index: usize,
    pub label: String,
    pub error: SifError,
}

/// Successes and failures of one batch, each in input order.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub spectra: Vec<BatchItem>,
    pub failures: Vec<BatchFailure>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_dataset(self) -> SpectralDataset {
        SpectralDataset::from_spectra(self.spectra.into_iter().map(|item| item.spectrum).collect())
    }
}

/// Decode and process every source in parallel.
///
/// A file that fails is reported in [`BatchOutcome::failures`] without stopping
/// the others. Only cancellation aborts the whole batch.
pub fn process_batch<S: SpectrumSource>(sources: &[S], pipeline: &Pipeline) -> Result<BatchOutcome> {
    let results: Vec<(usize, String, Result<Spectrum>)> = sources
        .par_iter()
        .enumerate()
        .map(|(index, source)| (index, source.label(), pipeline.load(source)))
        .collect();

    let mut outcome = BatchOutcome::default();
    for (index, label, result) in results {
        match result {
            Ok(spectrum) => outcome.spectra.push(BatchItem {
                index,
                label,
                spectrum,
            }),
            Err(SifError::Cancelled) => return Err(SifError::Cancelled),
            Err(error) => {
                warn!("{label}: {error}");
                outcome.failures.push(BatchFailure { index, label, error });
            }
        }
    }

    info!(
        "batch done: {} spectra, {} failure(s)",
        outcome.spectra.len(),
        outcome.failures.len()
    );
    Ok(outcome)
}
