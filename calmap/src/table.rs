//! Surface-table ingestion from delimited text.
//!
//! A table has a header row naming its columns and, optionally, a units row
//! right below it. Three selected columns provide the X, Y and Z samples.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::CalmapError;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurfacePoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl SurfacePoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Names of the table columns mapped onto the X, Y and Z roles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumns {
    pub x: String,
    pub y: String,
    pub z: String,
}

impl TableColumns {
    pub fn new(x: impl Into<String>, y: impl Into<String>, z: impl Into<String>) -> Self {
        Self {
            x: x.into(),
            y: y.into(),
            z: z.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceTable {
    pub columns: TableColumns,
    pub points: Vec<SurfacePoint>,
    /// Units of the X, Y and Z columns when the table carried a units row.
    pub units: Option<[String; 3]>,
    pub rows_read: usize,
    pub rows_dropped: usize,
}

/// Header names of a delimited table.
pub fn read_columns<R: Read>(reader: R) -> Result<Vec<String>, CalmapError> {
    let mut rdr = table_reader(reader);
    Ok(rdr.headers()?.iter().map(str::to_string).collect())
}

pub fn read_surface_table_path(
    path: &Path,
    columns: &TableColumns,
) -> Result<SurfaceTable, CalmapError> {
    let id = path.display().to_string();
    let file = File::open(path).map_err(|e| CalmapError::from(e).in_source(&id))?;
    read_surface_table(file, columns).map_err(|e| e.in_source(id))
}

/// Read the (X, Y, Z) samples of a surface table.
///
/// Rows with an empty, non-numeric or non-finite value in any selected column
/// are dropped. A first data row whose selected fields fail numeric parsing is
/// taken as the units row and skipped.
pub fn read_surface_table<R: Read>(
    reader: R,
    columns: &TableColumns,
) -> Result<SurfaceTable, CalmapError> {
    let mut rdr = table_reader(reader);
    let headers = rdr.headers()?.clone();
    let position = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| CalmapError::MissingColumn(name.to_string()))
    };
    let indices = [
        position(&columns.x)?,
        position(&columns.y)?,
        position(&columns.z)?,
    ];

    let mut points = Vec::new();
    let mut units = None;
    let mut rows_read = 0usize;
    let mut rows_dropped = 0usize;

    for (row, record) in rdr.records().enumerate() {
        let record = record?;
        let fields = indices.map(|i| record.get(i).unwrap_or(""));
        if row == 0 && is_units_row(&fields) {
            units = Some(fields.map(str::to_string));
            continue;
        }
        rows_read += 1;
        match (
            parse_numeric(fields[0]),
            parse_numeric(fields[1]),
            parse_numeric(fields[2]),
        ) {
            (Some(x), Some(y), Some(z)) => points.push(SurfacePoint { x, y, z }),
            _ => rows_dropped += 1,
        }
    }

    if points.is_empty() {
        return Err(CalmapError::NoValidData);
    }
    debug!(
        points = points.len(),
        rows_dropped,
        units_row = units.is_some(),
        "surface table read"
    );

    Ok(SurfaceTable {
        columns: columns.clone(),
        points,
        units,
        rows_read,
        rows_dropped,
    })
}

pub(crate) fn table_reader<R: Read>(reader: R) -> csv::Reader<R> {
    delimited_reader(reader, b',')
}

pub(crate) fn delimited_reader<R: Read>(reader: R, delimiter: u8) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .delimiter(delimiter)
        .from_reader(reader)
}

pub(crate) fn parse_numeric(field: &str) -> Option<f64> {
    let value: f64 = field.trim().parse().ok()?;
    value.is_finite().then_some(value)
}

fn is_units_row(fields: &[&str; 3]) -> bool {
    fields
        .iter()
        .any(|f| !f.trim().is_empty() && f.trim().parse::<f64>().is_err())
}
