use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, ListBuilder, StringBuilder,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use log::info;
use parquet::arrow::ArrowWriter;

use super::array::Grid;
use super::model::{MetadataValue, SpectralDataset, Spectrum};
use crate::error::{Result, SifError};

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Write a dataset, choosing the format from the extension.
///
/// * `.parquet` / `.pq` – `x`, `y` list columns plus one column per metadata key
/// * `.csv`             – `x`, `y` as semicolon-separated floats plus metadata columns
pub fn write_dataset(path: &Path, dataset: &SpectralDataset) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "parquet" | "pq" => write_dataset_parquet(path, dataset),
        "csv" => write_dataset_csv(path, dataset),
        other => Err(SifError::InvalidConfig(format!(
            "unsupported export extension: .{other}"
        ))),
    }
}

/// Two-column `Wavelength,Counts` table for a single spectrum.
pub fn write_spectrum_csv(path: &Path, spectrum: &Spectrum) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["Wavelength", "Counts"])?;
    for (x, y) in spectrum.points() {
        writer.write_record([x.to_string(), y.to_string()])?;
    }
    writer.flush().map_err(|e| SifError::io(path, e))?;
    Ok(())
}

/// One line per row of the last grid axis, no header.
pub fn write_grid_csv(path: &Path, grid: &Grid<f64>) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    for row in grid.rows() {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush().map_err(|e| SifError::io(path, e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

pub fn write_dataset_csv(path: &Path, dataset: &SpectralDataset) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec!["x".to_string(), "y".to_string()];
    header.extend(dataset.column_names.iter().cloned());
    writer.write_record(&header)?;

    for sp in &dataset.spectra {
        let mut record = vec![join_floats(&sp.x), join_floats(&sp.y)];
        record.extend(dataset.column_names.iter().map(|col| {
            sp.metadata
                .get(col)
                .map(|v| v.to_string())
                .unwrap_or_default()
        }));
        writer.write_record(&record)?;
    }
    writer.flush().map_err(|e| SifError::io(path, e))?;
    info!("wrote {} spectra to {}", dataset.len(), path.display());
    Ok(())
}

fn join_floats(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(";")
}

// ---------------------------------------------------------------------------
// Parquet
// ---------------------------------------------------------------------------

/// Arrow type chosen for a metadata column from the values it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Integer,
    Float,
    Bool,
    Text,
}

fn column_kind(dataset: &SpectralDataset, col: &str) -> ColumnKind {
    let values = dataset
        .spectra
        .iter()
        .filter_map(|sp| sp.metadata.get(col))
        .filter(|v| !matches!(v, MetadataValue::Null));

    let mut kind: Option<ColumnKind> = None;
    for value in values {
        let this = match value {
            MetadataValue::Integer(_) => ColumnKind::Integer,
            MetadataValue::Float(_) => ColumnKind::Float,
            MetadataValue::Bool(_) => ColumnKind::Bool,
            _ => ColumnKind::Text,
        };
        kind = Some(match (kind, this) {
            (None, k) => k,
            (Some(a), b) if a == b => a,
            (Some(ColumnKind::Integer), ColumnKind::Float)
            | (Some(ColumnKind::Float), ColumnKind::Integer) => ColumnKind::Float,
            _ => return ColumnKind::Text,
        });
    }
    kind.unwrap_or(ColumnKind::Text)
}

fn metadata_column(dataset: &SpectralDataset, col: &str) -> (Field, ArrayRef) {
    let values = || dataset.spectra.iter().map(|sp| sp.metadata.get(col));
    match column_kind(dataset, col) {
        ColumnKind::Integer => {
            let mut b = Int64Builder::new();
            for v in values() {
                match v {
                    Some(MetadataValue::Integer(i)) => b.append_value(*i),
                    _ => b.append_null(),
                }
            }
            (Field::new(col, DataType::Int64, true), Arc::new(b.finish()) as ArrayRef)
        }
        ColumnKind::Float => {
            let mut b = Float64Builder::new();
            for v in values() {
                b.append_option(v.and_then(MetadataValue::as_f64));
            }
            (Field::new(col, DataType::Float64, true), Arc::new(b.finish()) as ArrayRef)
        }
        ColumnKind::Bool => {
            let mut b = BooleanBuilder::new();
            for v in values() {
                match v {
                    Some(MetadataValue::Bool(flag)) => b.append_value(*flag),
                    _ => b.append_null(),
                }
            }
            (Field::new(col, DataType::Boolean, true), Arc::new(b.finish()) as ArrayRef)
        }
        ColumnKind::Text => {
            let mut b = StringBuilder::new();
            for v in values() {
                match v {
                    None | Some(MetadataValue::Null) => b.append_null(),
                    Some(other) => b.append_value(other.to_string()),
                }
            }
            (Field::new(col, DataType::Utf8, true), Arc::new(b.finish()) as ArrayRef)
        }
    }
}

fn list_column(rows: impl Iterator<Item = Vec<f64>>) -> ArrayRef {
    let mut builder = ListBuilder::new(Float64Builder::new());
    for row in rows {
        builder.values().append_slice(&row);
        builder.append(true);
    }
    Arc::new(builder.finish())
}

pub fn write_dataset_parquet(path: &Path, dataset: &SpectralDataset) -> Result<()> {
    let item = || Arc::new(Field::new("item", DataType::Float64, true));
    let mut fields = vec![
        Field::new("x", DataType::List(item()), false),
        Field::new("y", DataType::List(item()), false),
    ];
    let mut columns = vec![
        list_column(dataset.spectra.iter().map(|sp| sp.x.clone())),
        list_column(dataset.spectra.iter().map(|sp| sp.y.clone())),
    ];
    for col in &dataset.column_names {
        let (field, array) = metadata_column(dataset, col);
        fields.push(field);
        columns.push(array);
    }

    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), columns)?;

    let file = std::fs::File::create(path).map_err(|e| SifError::io(path, e))?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    info!("wrote {} spectra to {}", dataset.len(), path.display());
    Ok(())
}
