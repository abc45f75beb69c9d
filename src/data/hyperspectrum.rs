use std::collections::BTreeMap;

use log::{info, warn};
use rayon::prelude::*;
use regex::Regex;

use super::array::{normalize, Coordinate, Grid, GridShape};
use super::batch::Pipeline;
use super::loader::SpectrumSource;
use super::model::Spectrum;
use crate::error::{Result, SifError};

// ---------------------------------------------------------------------------
// HyperspectrumGrid – one spectrum per spatial position
// ---------------------------------------------------------------------------

/// A spatial grid of spectra, background-subtracted when a background was given.
///
/// Cells whose file failed to decode are `None`; the reason is kept in
/// [`HyperspectrumOutcome::failures`].
#[derive(Debug, Clone)]
pub struct HyperspectrumGrid {
    pub cells: Grid<Option<Spectrum>>,
    /// Label of the file placed at each coordinate.
    pub sources: Grid<String>,
    pub background: Option<Spectrum>,
}

impl HyperspectrumGrid {
    pub fn shape(&self) -> &GridShape {
        self.cells.shape()
    }

    pub fn get(&self, coord: &[usize]) -> Option<&Spectrum> {
        self.cells.get(coord).and_then(Option::as_ref)
    }

    /// Number of cells holding a spectrum.
    pub fn filled(&self) -> usize {
        self.cells.cells().iter().filter(|c| c.is_some()).count()
    }

    /// Integrated positive intensity per cell; failed cells are NaN.
    pub fn intensity_map(&self) -> Grid<f64> {
        self.cells.map(|cell| match cell {
            Some(sp) => sp.y.iter().map(|v| v.max(0.0)).sum(),
            None => f64::NAN,
        })
    }

    /// [`intensity_map`](Self::intensity_map) min-max scaled into `[0, 1]`.
    pub fn normalized_intensity_map(&self) -> Grid<f64> {
        let map = self.intensity_map();
        let scaled = normalize(map.cells());
        Grid::from_fn(map.shape().clone(), |i| scaled[i])
    }
}

#[derive(Debug)]
pub struct HyperspectrumOutcome {
    pub grid: HyperspectrumGrid,
    /// Per-coordinate decode failures.
    pub failures: BTreeMap<Coordinate, SifError>,
}

// ---------------------------------------------------------------------------
// HyperspectrumAssembler
// ---------------------------------------------------------------------------

/// Places processed spectra onto a grid of fixed shape.
#[derive(Debug, Clone)]
pub struct HyperspectrumAssembler {
    shape: GridShape,
    pipeline: Pipeline,
}

impl HyperspectrumAssembler {
    pub fn new(shape: GridShape, pipeline: Pipeline) -> Self {
        HyperspectrumAssembler { shape, pipeline }
    }

    pub fn shape(&self) -> &GridShape {
        &self.shape
    }

    /// Fill the grid in row-major order from `files`.
    pub fn assemble<S: SpectrumSource>(
        &self,
        files: &[S],
        background: Option<&S>,
    ) -> Result<HyperspectrumOutcome> {
        // The first file past the last cell is reported by its flat index.
        if files.len() > self.shape.len() {
            return Err(SifError::CoordinateOutOfBounds {
                coordinate: vec![self.shape.len()],
                shape: self.shape.dims().to_vec(),
            });
        }
        self.run(files.iter().enumerate().collect(), background)
    }

    /// Fill the grid from explicit `(coordinate, file)` pairs.
    pub fn assemble_mapped<S: SpectrumSource>(
        &self,
        entries: &[(Coordinate, S)],
        background: Option<&S>,
    ) -> Result<HyperspectrumOutcome> {
        let mut taken = vec![false; self.shape.len()];
        let mut placements = Vec::with_capacity(entries.len());
        for (coordinate, source) in entries {
            let index = self.shape.index_of(coordinate).ok_or_else(|| {
                SifError::CoordinateOutOfBounds {
                    coordinate: coordinate.clone(),
                    shape: self.shape.dims().to_vec(),
                }
            })?;
            if std::mem::replace(&mut taken[index], true) {
                return Err(SifError::DuplicateCoordinate {
                    coordinate: coordinate.clone(),
                });
            }
            placements.push((index, source));
        }
        self.run(placements, background)
    }

    fn run<S: SpectrumSource>(
        &self,
        placements: Vec<(usize, &S)>,
        background: Option<&S>,
    ) -> Result<HyperspectrumOutcome> {
        // Subtraction happens before spike removal, which may shorten a cell.
        let background = match background {
            Some(source) => {
                let spectrum = self.pipeline.load_raw(source)?;
                info!("background {} has {} samples", source.label(), spectrum.len());
                Some(spectrum)
            }
            None => None,
        };

        let decoded: Vec<(usize, String, Result<Spectrum>)> = placements
            .par_iter()
            .map(|&(index, source)| (index, source.label(), self.pipeline.load_raw(source)))
            .collect();

        let n = self.shape.len();
        let mut cells: Vec<Option<Spectrum>> = vec![None; n];
        let mut sources: Vec<Option<String>> = vec![None; n];
        let mut failures = BTreeMap::new();

        for (index, label, result) in decoded {
            let coordinate = self.coordinate(index);
            match result {
                Ok(spectrum) => {
                    let spectrum = match &background {
                        Some(bg) => spectrum.subtract(bg)?,
                        None => spectrum,
                    };
                    cells[index] = Some(
                        self.pipeline
                            .clean(spectrum)
                            .with_metadata("coordinate", format!("{coordinate:?}")),
                    );
                }
                Err(SifError::Cancelled) => return Err(SifError::Cancelled),
                Err(error) => {
                    warn!("{label} at {coordinate:?}: {error}");
                    failures.insert(coordinate, error);
                }
            }
            sources[index] = Some(label);
        }

        let missing: Vec<Coordinate> = sources
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| self.coordinate(i))
            .collect();
        if !missing.is_empty() {
            return Err(SifError::IncompleteGrid {
                expected: n,
                missing,
            });
        }

        let sources = sources.into_iter().map(Option::unwrap_or_default).collect();
        let grid = HyperspectrumGrid {
            cells: Grid::from_cells(self.shape.clone(), cells)?,
            sources: Grid::from_cells(self.shape.clone(), sources)?,
            background: background.map(|bg| self.pipeline.clean(bg)),
        };
        info!(
            "assembled {} grid: {} of {} cells filled, {} failure(s)",
            self.shape,
            grid.filled(),
            n,
            failures.len()
        );
        Ok(HyperspectrumOutcome { grid, failures })
    }

    fn coordinate(&self, index: usize) -> Coordinate {
        self.shape.coordinate_of(index).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Positions encoded in file names
// ---------------------------------------------------------------------------

/// Map names like `scan_12_0.5_1.0_.sif` to grid coordinates.
///
/// The first number is the 1-based acquisition index, placed in row-major order;
/// the stage positions that follow are not used.
pub fn coordinates_from_filenames<S: AsRef<str>>(names: &[S], shape: &GridShape) -> Result<Vec<Coordinate>> {
    let pattern = Regex::new(r"_(\d+)_([0-9.]+)_([0-9.]+)[_.]")
        .map_err(|e| SifError::InvalidConfig(e.to_string()))?;
    names
        .iter()
        .map(|name| {
            let name = name.as_ref();
            let image: usize = pattern
                .captures(name)
                .and_then(|c| c[1].parse().ok())
                .ok_or_else(|| {
                    SifError::InvalidConfig(format!("no _<index>_<x>_<y>_ position in '{name}'"))
                })?;
            image
                .checked_sub(1)
                .and_then(|i| shape.coordinate_of(i))
                .ok_or_else(|| SifError::CoordinateOutOfBounds {
                    coordinate: vec![image],
                    shape: shape.dims().to_vec(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::filter::NoiseWindow;
    use crate::data::fixture::SifWriter;
    use crate::data::loader::InMemorySource;

    fn cell(name: &str, y: Vec<f32>) -> InMemorySource {
        InMemorySource::new(name, SifWriter::new(y.len(), 1).frame(y).to_bytes())
    }

    fn shape(dims: &[usize]) -> GridShape {
        GridShape::new(dims.to_vec()).unwrap()
    }

    #[test]
    fn fills_row_major_and_subtracts_background() {
        let files: Vec<InMemorySource> = (0..4)
            .map(|i| cell(&format!("c{i}.sif"), vec![10.0 + i as f32, 20.0]))
            .collect();
        let background = cell("bg.sif", vec![10.0, 20.0]);
        let assembler = HyperspectrumAssembler::new(shape(&[2, 2]), Pipeline::default());

        let outcome = assembler.assemble(&files, Some(&background)).unwrap();
        assert!(outcome.failures.is_empty());
        let grid = outcome.grid;
        assert_eq!(grid.shape().dims(), &[2, 2]);
        assert_eq!(grid.filled(), 4);
        assert_eq!(grid.get(&[1, 0]).unwrap().y, vec![2.0, 0.0]);
        assert_eq!(grid.sources.get(&[0, 1]).map(String::as_str), Some("c1.sif"));
        assert_eq!(grid.intensity_map().cells(), &[0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn background_is_processed_like_the_cells() {
        let files = vec![cell("a.sif", vec![0.0, 3.0, 0.0])];
        let pipeline = Pipeline {
            noise: Some(NoiseWindow::Narrow),
            ..Default::default()
        };
        let assembler = HyperspectrumAssembler::new(shape(&[1]), pipeline);
        let outcome = assembler.assemble(&files, Some(&files[0])).unwrap();
        assert_eq!(outcome.grid.get(&[0]).unwrap().y, vec![0.0, 0.0, 0.0]);
        assert_eq!(
            outcome.grid.background.as_ref().map(|b| b.y.clone()),
            Some(vec![1.5, 1.0, 1.5])
        );
    }

    #[test]
    fn spiky_cell_is_cleaned_after_background_subtraction() {
        let mut spiky = vec![10.0; 20];
        spiky[4] = 500.0;
        let files = vec![cell("a.sif", vec![12.0; 20]), cell("b.sif", spiky)];
        let background = cell("bg.sif", vec![10.0; 20]);
        let pipeline = Pipeline {
            spike_sigma: Some(3.0),
            ..Default::default()
        };
        let assembler = HyperspectrumAssembler::new(shape(&[2]), pipeline);

        let outcome = assembler.assemble(&files, Some(&background)).unwrap();
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.grid.get(&[0]).unwrap().y, vec![2.0; 20]);
        let cleaned = outcome.grid.get(&[1]).unwrap();
        assert_eq!(cleaned.len(), 18);
        assert!(cleaned.y.iter().all(|&v| v == 0.0));
        assert_eq!(outcome.grid.background.as_ref().map(Spectrum::len), Some(20));
    }

    #[test]
    fn cropped_band_is_what_the_map_integrates() {
        let files = vec![cell("a.sif", vec![100.0, 1.0, 1.0, 100.0])];
        let pipeline = Pipeline {
            crop: Some(crate::data::filter::SpectralCrop::Narrow),
            ..Default::default()
        };
        let assembler = HyperspectrumAssembler::new(shape(&[1]), pipeline);
        let outcome = assembler.assemble(&files, None).unwrap();
        assert_eq!(outcome.grid.intensity_map().cells(), &[2.0]);
    }

    #[test]
    fn failed_cell_is_recorded_not_fatal() {
        let files = vec![
            cell("a.sif", vec![1.0, 1.0]),
            InMemorySource::new("bad.sif", b"garbage".to_vec()),
        ];
        let assembler = HyperspectrumAssembler::new(shape(&[2]), Pipeline::default());
        let outcome = assembler.assemble(&files, None).unwrap();
        assert_eq!(outcome.grid.filled(), 1);
        assert!(outcome.grid.get(&[1]).is_none());
        assert!(outcome.failures.contains_key(&vec![1]));
        let map = outcome.grid.intensity_map();
        assert_eq!(map.cells()[0], 2.0);
        assert!(map.cells()[1].is_nan());
    }

    #[test]
    fn too_few_files_leave_the_grid_incomplete() {
        let files: Vec<InMemorySource> = (0..3).map(|i| cell(&format!("c{i}.sif"), vec![1.0])).collect();
        let assembler = HyperspectrumAssembler::new(shape(&[2, 2]), Pipeline::default());
        match assembler.assemble(&files, None) {
            Err(SifError::IncompleteGrid { expected, missing }) => {
                assert_eq!(expected, 4);
                assert_eq!(missing, vec![vec![1, 1]]);
            }
            other => panic!("expected IncompleteGrid, got {other:?}"),
        }
    }

    #[test]
    fn too_many_files_do_not_fit() {
        let files: Vec<InMemorySource> = (0..3).map(|i| cell(&format!("c{i}.sif"), vec![1.0])).collect();
        let assembler = HyperspectrumAssembler::new(shape(&[2]), Pipeline::default());
        assert!(matches!(
            assembler.assemble(&files, None),
            Err(SifError::CoordinateOutOfBounds { .. })
        ));
    }

    #[test]
    fn background_length_mismatch_is_fatal() {
        let files = vec![cell("a.sif", vec![1.0, 2.0, 3.0])];
        let background = cell("bg.sif", vec![1.0, 2.0]);
        let assembler = HyperspectrumAssembler::new(shape(&[1]), Pipeline::default());
        assert!(matches!(
            assembler.assemble(&files, Some(&background)),
            Err(SifError::ShapeMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn mapped_entries_are_validated_up_front() {
        let assembler = HyperspectrumAssembler::new(shape(&[2, 2]), Pipeline::default());
        let dup = vec![
            (vec![0, 0], cell("a.sif", vec![1.0])),
            (vec![0, 0], cell("b.sif", vec![1.0])),
        ];
        assert!(matches!(
            assembler.assemble_mapped(&dup, None),
            Err(SifError::DuplicateCoordinate { .. })
        ));
        let outside = vec![(vec![2, 0], cell("a.sif", vec![1.0]))];
        assert!(matches!(
            assembler.assemble_mapped(&outside, None),
            Err(SifError::CoordinateOutOfBounds { .. })
        ));
    }

    #[test]
    fn file_names_give_row_major_positions() {
        let names = ["map_1_0.0_0.0_.sif", "map_7_1.5_0.5_.sif", "run_25_4_4.sif"];
        let coords = coordinates_from_filenames(&names, &shape(&[5, 5])).unwrap();
        assert_eq!(coords, vec![vec![0, 0], vec![1, 1], vec![4, 4]]);
        assert!(coordinates_from_filenames(&["map_26_0_0_.sif"], &shape(&[5, 5])).is_err());
        assert!(coordinates_from_filenames(&["plain.sif"], &shape(&[5, 5])).is_err());
    }
}
