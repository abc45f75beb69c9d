//! End-to-end tests: synthetic `.sif` files on disk through decoding, batch
//! processing, grid assembly and export.

use std::path::PathBuf;

use rusty_sif::config::ProcessingConfig;
use rusty_sif::data::array::GridShape;
use rusty_sif::data::batch::process_batch;
use rusty_sif::data::export::{write_dataset, write_grid_csv};
use rusty_sif::data::fixture::SifWriter;
use rusty_sif::data::hyperspectrum::{coordinates_from_filenames, HyperspectrumAssembler};
use rusty_sif::data::loader::{load_file, load_file_with, DecodeOptions, SpectrumRequest};
use rusty_sif::SifError;
use tempfile::tempdir;

fn write_raster(dir: &std::path::Path, rows: usize, cols: usize) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for i in 0..rows * cols {
        let level = (i + 1) as f32;
        let path = dir.join(format!("scan_{:02}_{}_{}_.sif", i + 1, i % cols, i / cols));
        SifWriter::new(4, 1)
            .calibration(&[600.0, 0.5])
            .frame(vec![100.0 + level, 100.0, 100.0, 100.0])
            .write_to(&path)
            .unwrap();
        files.push(path);
    }
    files
}

/// Test a full raster: background subtraction, intensity map, CSV export
#[test]
fn test_raster_with_background() {
    let dir = tempdir().unwrap();
    let files = write_raster(dir.path(), 2, 3);
    let background = dir.path().join("background.sif");
    SifWriter::new(4, 1)
        .calibration(&[600.0, 0.5])
        .frame(vec![100.0; 4])
        .write_to(&background)
        .unwrap();

    let config = ProcessingConfig::from_json_str(r#"{"grid_shape": [2, 3]}"#).unwrap();
    let assembler =
        HyperspectrumAssembler::new(config.grid_shape().unwrap().unwrap(), config.pipeline().unwrap());
    let outcome = assembler.assemble(&files, Some(&background)).unwrap();

    assert!(outcome.failures.is_empty());
    let map = outcome.grid.intensity_map();
    assert_eq!(map.cells(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

    let cell = outcome.grid.get(&[1, 2]).unwrap();
    assert_eq!(cell.x, vec![600.0, 600.5, 601.0, 601.5]);
    assert_eq!(cell.y, vec![6.0, 0.0, 0.0, 0.0]);

    let out = dir.path().join("map.csv");
    write_grid_csv(&out, &outcome.grid.normalized_intensity_map()).unwrap();
    let text = std::fs::read_to_string(&out).unwrap();
    assert_eq!(text.lines().count(), 2);
    assert!(text.starts_with("0,0.2,0.4\n"));
}

/// Test that names, not input order, decide placement when requested
#[test]
fn test_placement_from_file_names() {
    let dir = tempdir().unwrap();
    let mut files = write_raster(dir.path(), 2, 2);
    files.reverse();

    let shape = GridShape::new(vec![2, 2]).unwrap();
    let names: Vec<String> = files
        .iter()
        .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    let coords = coordinates_from_filenames(&names, &shape).unwrap();
    let entries: Vec<_> = coords.into_iter().zip(files).collect();

    let assembler = HyperspectrumAssembler::new(shape, ProcessingConfig::default().pipeline().unwrap());
    let outcome = assembler.assemble_mapped(&entries, None).unwrap();
    assert_eq!(outcome.grid.get(&[0, 0]).unwrap().y[0], 101.0);
    assert_eq!(outcome.grid.get(&[1, 1]).unwrap().y[0], 104.0);
}

/// Test that one corrupt file is reported while the rest of the grid fills
#[test]
fn test_corrupt_cell_is_isolated() {
    let dir = tempdir().unwrap();
    let mut files = write_raster(dir.path(), 1, 3);
    let bytes = std::fs::read(&files[1]).unwrap();
    std::fs::write(&files[1], &bytes[..bytes.len() - 2]).unwrap();
    files.push(dir.path().join("does_not_exist.sif"));

    let assembler = HyperspectrumAssembler::new(
        GridShape::new(vec![2, 2]).unwrap(),
        ProcessingConfig::default().pipeline().unwrap(),
    );
    let outcome = assembler.assemble(&files, None).unwrap();
    assert_eq!(outcome.grid.filled(), 2);
    assert!(matches!(
        outcome.failures.get(&vec![0, 1]),
        Some(SifError::TruncatedPayload { .. })
    ));
    assert!(matches!(outcome.failures.get(&vec![1, 1]), Some(SifError::Io { .. })));
}

/// Test that a truncated file can still be read when corruption is tolerated
#[test]
fn test_ignore_corrupt_from_config() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kinetic.sif");
    let bytes = SifWriter::new(2, 1)
        .frame(vec![1.0, 2.0])
        .frame(vec![3.0, 4.0])
        .to_bytes();
    std::fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();

    assert!(load_file(&path).is_err());

    let config = ProcessingConfig::from_json_str(r#"{"ignore_corrupt": true}"#).unwrap();
    let pipeline = config.pipeline().unwrap();
    let doc = load_file_with(&path, pipeline.decode).unwrap();
    assert_eq!(doc.frames.len(), 1);
    assert_eq!(doc.spectrum(&SpectrumRequest::default()).unwrap().y, vec![1.0, 2.0]);
}

/// Test batch decoding into a Parquet dataset
#[test]
fn test_batch_to_parquet() {
    let dir = tempdir().unwrap();
    let files = write_raster(dir.path(), 1, 4);
    let config = ProcessingConfig::from_json_str(r#"{"reduce_noise": true, "window": "narrow"}"#).unwrap();

    let outcome = process_batch(&files, &config.pipeline().unwrap()).unwrap();
    assert!(outcome.is_complete());
    let indices: Vec<usize> = outcome.spectra.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);

    let dataset = outcome.into_dataset();
    assert!(dataset.column_names.contains(&"noise_window".to_string()));
    let out = dir.path().join("batch.parquet");
    write_dataset(&out, &dataset).unwrap();
    assert!(std::fs::metadata(&out).unwrap().len() > 0);
}

/// Test that decode options pass through unchanged for in-range files
#[test]
fn test_default_decode_options() {
    let dir = tempdir().unwrap();
    let files = write_raster(dir.path(), 1, 1);
    let doc = load_file_with(&files[0], DecodeOptions::default()).unwrap();
    assert_eq!(doc.header.calibration.coefficients, vec![600.0, 0.5]);
    assert_eq!(doc.header.frame_width(), 4);
}
