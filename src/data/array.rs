use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{Result, SifError};

/// An N-dimensional grid position, outermost axis first.
pub type Coordinate = Vec<usize>;

// ---------------------------------------------------------------------------
// GridShape – validated N-D extent with row-major addressing
// ---------------------------------------------------------------------------

/// Extent of an N-dimensional grid. Every dimension is positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridShape(Vec<usize>);

impl GridShape {
    /// Largest number of cells a grid may hold.
    pub const MAX_CELLS: usize = 1 << 22;

    pub fn new(dims: Vec<usize>) -> Result<Self> {
        if dims.is_empty() {
            return Err(SifError::InvalidConfig("grid shape has no dimensions".into()));
        }
        if dims.contains(&0) {
            return Err(SifError::InvalidConfig(format!(
                "grid shape {dims:?} has a zero-sized dimension"
            )));
        }
        let cells = dims
            .iter()
            .try_fold(1usize, |n, &d| n.checked_mul(d))
            .filter(|&n| n <= GridShape::MAX_CELLS);
        if cells.is_none() {
            return Err(SifError::InvalidConfig(format!(
                "grid shape {dims:?} exceeds {} cells",
                GridShape::MAX_CELLS
            )));
        }
        Ok(GridShape(dims))
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.0.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Row-major flat index of `coord`, or `None` when it lies outside the grid.
    pub fn index_of(&self, coord: &[usize]) -> Option<usize> {
        if coord.len() != self.0.len() {
            return None;
        }
        let mut index = 0;
        for (&c, &extent) in coord.iter().zip(&self.0) {
            if c >= extent {
                return None;
            }
            index = index * extent + c;
        }
        Some(index)
    }

    /// Inverse of [`GridShape::index_of`].
    pub fn coordinate_of(&self, mut index: usize) -> Option<Coordinate> {
        if index >= self.len() {
            return None;
        }
        let mut coord = vec![0; self.0.len()];
        for (slot, &extent) in coord.iter_mut().zip(&self.0).rev() {
            *slot = index % extent;
            index /= extent;
        }
        Some(coord)
    }

    /// All coordinates in row-major order.
    pub fn coordinates(&self) -> impl Iterator<Item = Coordinate> + '_ {
        (0..self.len()).filter_map(|i| self.coordinate_of(i))
    }
}

impl fmt::Display for GridShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|d| d.to_string()).collect();
        write!(f, "{}", parts.join("x"))
    }
}

/// Parses `"5x5"`, `"5,5"` or `"2x3x4"`.
impl FromStr for GridShape {
    type Err = SifError;

    fn from_str(s: &str) -> Result<Self> {
        let dims = s
            .split(|c: char| c == 'x' || c == 'X' || c == ',')
            .map(|tok| {
                tok.trim().parse::<usize>().map_err(|_| {
                    SifError::InvalidConfig(format!("grid shape '{s}': '{tok}' is not a positive integer"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        GridShape::new(dims)
    }
}

// ---------------------------------------------------------------------------
// Grid<T> – dense row-major storage over a GridShape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    shape: GridShape,
    cells: Vec<T>,
}

impl<T> Grid<T> {
    pub fn from_fn(shape: GridShape, mut f: impl FnMut(usize) -> T) -> Self {
        let cells = (0..shape.len()).map(&mut f).collect();
        Grid { shape, cells }
    }

    /// Wrap row-major `cells`; their count must match the shape.
    pub fn from_cells(shape: GridShape, cells: Vec<T>) -> Result<Self> {
        if cells.len() != shape.len() {
            return Err(SifError::ShapeMismatch {
                expected: shape.len(),
                actual: cells.len(),
            });
        }
        Ok(Grid { shape, cells })
    }

    pub fn shape(&self) -> &GridShape {
        &self.shape
    }

    pub fn get(&self, coord: &[usize]) -> Option<&T> {
        self.shape.index_of(coord).map(|i| &self.cells[i])
    }

    pub fn cells(&self) -> &[T] {
        &self.cells
    }

    /// `(coordinate, cell)` pairs in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (Coordinate, &T)> + '_ {
        self.shape.coordinates().zip(self.cells.iter())
    }

    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> Grid<U> {
        Grid {
            shape: self.shape.clone(),
            cells: self.cells.iter().map(f).collect(),
        }
    }

    /// Rows of the last axis, e.g. the lines of a 2-D heat map.
    pub fn rows(&self) -> std::slice::Chunks<'_, T> {
        let last = *self.shape.dims().last().unwrap_or(&1);
        self.cells.chunks(last)
    }
}

// ---------------------------------------------------------------------------
// Element-wise helpers
// ---------------------------------------------------------------------------

/// `a - b`, element by element. Lengths must match.
pub fn subtract(a: &[f64], b: &[f64]) -> Result<Vec<f64>> {
    if a.len() != b.len() {
        return Err(SifError::ShapeMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    Ok(a.iter().zip(b).map(|(x, y)| x - y).collect())
}

/// Min-max scale finite values into `[0, 1]`. A constant input maps to zeros;
/// non-finite values pass through untouched.
pub fn normalize(values: &[f64]) -> Vec<f64> {
    let (min, max) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = max - min;
    values
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                v
            } else if range.abs() < f64::EPSILON {
                0.0
            } else {
                (v - min) / range
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_and_coordinate_are_inverse() {
        let shape = GridShape::new(vec![2, 3, 4]).unwrap();
        for i in 0..shape.len() {
            let coord = shape.coordinate_of(i).unwrap();
            assert_eq!(shape.index_of(&coord), Some(i));
        }
        assert_eq!(shape.coordinate_of(5), Some(vec![0, 1, 1]));
        assert_eq!(shape.index_of(&[1, 3, 0]), None);
        assert_eq!(shape.index_of(&[1, 0]), None);
    }

    #[test]
    fn shape_parses_and_rejects_zero() {
        let shape: GridShape = "5x4".parse().unwrap();
        assert_eq!(shape.dims(), &[5, 4]);
        assert_eq!(shape.to_string(), "5x4");
        assert!("3,0".parse::<GridShape>().is_err());
        assert!("3xq".parse::<GridShape>().is_err());
        assert!(GridShape::new(vec![]).is_err());
    }

    #[test]
    fn oversized_shapes_are_rejected() {
        assert!(matches!(
            "99999999999x99999999999x99999".parse::<GridShape>(),
            Err(SifError::InvalidConfig(_))
        ));
        assert!(matches!(
            "100000x100000".parse::<GridShape>(),
            Err(SifError::InvalidConfig(_))
        ));
        let largest = GridShape::new(vec![2048, 2048]).unwrap();
        assert_eq!(largest.len(), GridShape::MAX_CELLS);
    }

    #[test]
    fn normalize_matches_min_max() {
        assert_eq!(normalize(&[1.0, 2.0, 3.0, 4.0, 5.0]), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(normalize(&[7.0, 7.0]), vec![0.0, 0.0]);
        let with_nan = normalize(&[0.0, f64::NAN, 2.0]);
        assert_eq!(with_nan[2], 1.0);
        assert!(with_nan[1].is_nan());
    }

    #[test]
    fn grid_rows_follow_last_axis() {
        let shape = GridShape::new(vec![2, 3]).unwrap();
        let grid = Grid::from_fn(shape, |i| i);
        let rows: Vec<&[usize]> = grid.rows().collect();
        assert_eq!(rows, vec![&[0, 1, 2][..], &[3, 4, 5][..]]);
        assert_eq!(grid.get(&[1, 2]), Some(&5));
    }
}
