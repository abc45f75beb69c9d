/// Data layer: decoding, spectra, and grid assembly.
///
/// Architecture:
/// ```text
///  .sif bytes
///        │
///        ▼
///   ┌──────────┐
///   │  header   │  record decoders → HeaderMetadata (+ payload offset)
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  frames   │  little-endian f32 payload → Vec<Frame>
///   └──────────┘
///        │
///        ▼
///   ┌──────────────┐
///   │ loader        │  SifDocument: frame + calibration → Spectrum
///   └──────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  crop, spike removal, noise windows
///   └──────────┘
///        │
///        ▼
///   ┌──────────────────────┐
///   │ batch / hyperspectrum │  parallel decode → SpectralDataset / grid
///   └──────────────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  export   │  CSV / Parquet
///   └──────────┘
/// ```

pub mod array;
pub mod batch;
pub mod calibration;
pub mod export;
pub mod filter;
pub mod fixture;
pub mod frames;
pub mod header;
pub mod hyperspectrum;
pub mod loader;
pub mod model;
pub mod raw;
