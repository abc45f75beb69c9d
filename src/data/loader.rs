use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, warn};

use super::calibration::{Calibration, PixelOrigin};
use super::frames::{extract_frames, Reduction};
use super::header::decode_header;
use super::model::{Frame, HeaderMetadata, Spectrum};
use super::raw::RawDocument;
use crate::error::{Result, SifError};

// ---------------------------------------------------------------------------
// SifDocument – one decoded file
// ---------------------------------------------------------------------------

/// A fully decoded `.sif` file: its header and every frame of the payload.
#[derive(Debug, Clone)]
pub struct SifDocument {
    /// Where the bytes came from (file path or in-memory name).
    pub source: String,
    pub header: HeaderMetadata,
    pub frames: Vec<Frame>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Keep the complete frames of a truncated payload instead of failing.
    pub ignore_corrupt: bool,
}

/// Which frame to turn into a spectrum, and how.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpectrumRequest {
    pub frame: usize,
    /// Required for frames that are neither a single row nor a single column.
    pub reduction: Option<Reduction>,
    pub origin: PixelOrigin,
}

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

pub fn load_file(path: &Path) -> Result<SifDocument> {
    load_file_with(path, DecodeOptions::default())
}

pub fn load_file_with(path: &Path, options: DecodeOptions) -> Result<SifDocument> {
    let bytes = std::fs::read(path).map_err(|e| SifError::io(path, e))?;
    decode_bytes(&path.display().to_string(), &bytes, options)
}

/// Decode a complete `.sif` image held in memory.
pub fn decode_bytes(source: &str, bytes: &[u8], options: DecodeOptions) -> Result<SifDocument> {
    let mut doc = RawDocument::new(bytes);
    let header = decode_header(&mut doc)?;
    let payload = &bytes[header.payload_offset.min(bytes.len())..];

    let frames = match extract_frames(&header, payload) {
        Ok(frames) => frames,
        Err(SifError::TruncatedPayload {
            expected_frames,
            partial,
            ..
        }) if options.ignore_corrupt => {
            warn!(
                "{source}: payload truncated, keeping {} of {expected_frames} frame(s)",
                partial.len()
            );
            partial
        }
        Err(e) => return Err(e),
    };

    debug!(
        "{source}: decoded {} frame(s) of {}x{}",
        frames.len(),
        header.frame_width(),
        header.frame_height()
    );
    Ok(SifDocument {
        source: source.to_string(),
        header,
        frames,
    })
}

impl SifDocument {
    pub fn calibration(&self, frame: usize) -> Calibration {
        Calibration::from_header(&self.header, frame)
    }

    /// Reduce one frame to a spectrum on its calibrated (or pixel) axis.
    pub fn spectrum(&self, request: &SpectrumRequest) -> Result<Spectrum> {
        let frame = self
            .frames
            .get(request.frame)
            .ok_or(SifError::FrameOutOfRange {
                index: request.frame,
                frames: self.frames.len(),
            })?;
        let reduction = request
            .reduction
            .or_else(|| frame.inferred_reduction())
            .ok_or(SifError::AmbiguousGeometry {
                width: frame.width,
                height: frame.height,
            })?;

        let y = frame.reduce(reduction);
        let axis = self
            .calibration(request.frame)
            .with_origin(request.origin)
            .resolve(y.len());

        let acquisition = &self.header.acquisition;
        let mut spectrum = Spectrum::new(axis.values, y, axis.calibrated)
            .with_metadata("source", self.source.as_str())
            .with_metadata("frame", request.frame as i64)
            .with_metadata("sif_version", i64::from(self.header.sif_version))
            .with_metadata("detector", self.header.detector.detector_type.as_str())
            .with_metadata("exposure_time", acquisition.exposure_time)
            .with_metadata("experiment_time", acquisition.experiment_time);
        if let Some(nm) = self.header.calibration.raman_excitation {
            spectrum = spectrum.with_metadata("raman_excitation", nm);
        }
        Ok(spectrum)
    }

    /// Every frame as a spectrum, using `request` for everything but the frame index.
    pub fn spectra(&self, request: &SpectrumRequest) -> Result<Vec<Spectrum>> {
        (0..self.frames.len())
            .map(|frame| self.spectrum(&SpectrumRequest { frame, ..*request }))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// SpectrumSource – anything that yields a SifDocument
// ---------------------------------------------------------------------------

/// A file (or file-like blob) the batch and grid assemblers can decode.
pub trait SpectrumSource: Sync {
    /// Human-readable name used in logs and failure reports.
    fn label(&self) -> String;
    fn load(&self, options: DecodeOptions) -> Result<SifDocument>;
}

impl SpectrumSource for PathBuf {
    fn label(&self) -> String {
        self.display().to_string()
    }

    fn load(&self, options: DecodeOptions) -> Result<SifDocument> {
        load_file_with(self, options)
    }
}

/// `.sif` bytes that are already in memory.
#[derive(Debug, Clone)]
pub struct InMemorySource {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl InMemorySource {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        InMemorySource {
            name: name.into(),
            bytes,
        }
    }
}

impl SpectrumSource for InMemorySource {
    fn label(&self) -> String {
        self.name.clone()
    }

    fn load(&self, options: DecodeOptions) -> Result<SifDocument> {
        decode_bytes(&self.name, &self.bytes, options)
    }
}

// ---------------------------------------------------------------------------
// ParseCache – skip re-decoding unchanged files
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct CacheEntry {
    modified: SystemTime,
    len: u64,
    document: Arc<SifDocument>,
}

/// Decoded documents keyed by path, reused while the file's size and
/// modification time stay the same.
#[derive(Debug, Default)]
pub struct ParseCache {
    options: DecodeOptions,
    entries: HashMap<PathBuf, CacheEntry>,
}

impl ParseCache {
    pub fn new(options: DecodeOptions) -> Self {
        ParseCache {
            options,
            entries: HashMap::new(),
        }
    }

    pub fn get_or_load(&mut self, path: &Path) -> Result<Arc<SifDocument>> {
        let meta = std::fs::metadata(path).map_err(|e| SifError::io(path, e))?;
        let modified = meta.modified().map_err(|e| SifError::io(path, e))?;
        let len = meta.len();

        if let Some(entry) = self.entries.get(path) {
            if entry.modified == modified && entry.len == len {
                debug!("{}: cache hit", path.display());
                return Ok(Arc::clone(&entry.document));
            }
        }

        let document = Arc::new(load_file_with(path, self.options)?);
        self.entries.insert(
            path.to_path_buf(),
            CacheEntry {
                modified,
                len,
                document: Arc::clone(&document),
            },
        );
        Ok(document)
    }

    /// Forget `path`; returns whether it was cached.
    pub fn invalidate(&mut self, path: &Path) -> bool {
        self.entries.remove(path).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixture::SifWriter;
    use crate::data::model::MetadataValue;

    fn three_frames() -> Vec<u8> {
        SifWriter::new(3, 1)
            .calibration(&[400.0, 2.0])
            .exposure_time(0.5)
            .frame(vec![1.0, 2.0, 3.0])
            .frame(vec![4.0, 5.0, 6.0])
            .frame(vec![7.0, 8.0, 9.0])
            .to_bytes()
    }

    #[test]
    fn spectrum_carries_axis_and_metadata() {
        let doc = decode_bytes("mem.sif", &three_frames(), DecodeOptions::default()).unwrap();
        let sp = doc
            .spectrum(&SpectrumRequest {
                frame: 1,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(sp.x, vec![400.0, 402.0, 404.0]);
        assert_eq!(sp.y, vec![4.0, 5.0, 6.0]);
        assert!(sp.calibrated);
        assert_eq!(sp.metadata.get("frame"), Some(&MetadataValue::Integer(1)));
        assert_eq!(sp.metadata.get("exposure_time"), Some(&MetadataValue::Float(0.5)));
        assert_eq!(
            sp.metadata.get("source"),
            Some(&MetadataValue::String("mem.sif".into()))
        );
    }

    #[test]
    fn frame_index_is_checked() {
        let doc = decode_bytes("mem.sif", &three_frames(), DecodeOptions::default()).unwrap();
        let err = doc
            .spectrum(&SpectrumRequest {
                frame: 3,
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, SifError::FrameOutOfRange { index: 3, frames: 3 }));
        assert_eq!(doc.spectra(&SpectrumRequest::default()).unwrap().len(), 3);
    }

    #[test]
    fn two_dimensional_frame_needs_a_reduction() {
        let bytes = SifWriter::new(2, 2).frame(vec![1.0, 2.0, 3.0, 4.0]).to_bytes();
        let doc = decode_bytes("img.sif", &bytes, DecodeOptions::default()).unwrap();
        assert!(matches!(
            doc.spectrum(&SpectrumRequest::default()),
            Err(SifError::AmbiguousGeometry { width: 2, height: 2 })
        ));
        let sp = doc
            .spectrum(&SpectrumRequest {
                reduction: Some(Reduction::SumRows),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(sp.y, vec![4.0, 6.0]);
        assert!(!sp.calibrated);
        assert_eq!(sp.x, vec![0.0, 1.0]);
    }

    #[test]
    fn ignore_corrupt_keeps_complete_frames() {
        let bytes = three_frames();
        let cut = &bytes[..bytes.len() - 4];

        let err = decode_bytes("cut.sif", cut, DecodeOptions::default()).unwrap_err();
        assert_eq!(err.partial_frames().map(<[Frame]>::len), Some(2));

        let doc = decode_bytes("cut.sif", cut, DecodeOptions { ignore_corrupt: true }).unwrap();
        assert_eq!(doc.frames.len(), 2);
        assert_eq!(doc.header.number_of_frames(), 3);
    }

    #[test]
    fn cache_reuses_until_the_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.sif");
        SifWriter::new(2, 1).frame(vec![1.0, 2.0]).write_to(&path).unwrap();

        let mut cache = ParseCache::default();
        let first = cache.get_or_load(&path).unwrap();
        let second = cache.get_or_load(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        SifWriter::new(3, 1).frame(vec![1.0, 2.0, 3.0]).write_to(&path).unwrap();
        let third = cache.get_or_load(&path).unwrap();
        assert_eq!(third.header.frame_width(), 3);

        assert!(cache.invalidate(&path));
        assert!(cache.is_empty());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_file(Path::new("/definitely/not/here.sif")).unwrap_err();
        assert!(matches!(err, SifError::Io { .. }));
    }
}
