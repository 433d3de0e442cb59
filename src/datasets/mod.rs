/*!
Dataset adapters over tabular WSI manifests.

A manifest is a CSV file (or a pre-loaded polars [`DataFrame`]) with one row
per tile or per slide. The adapters in [`tiles`] and [`slides`] resolve the
manifest once at construction, validate the declared columns and then expose
pure indexed access to sample dictionaries.
 */
mod tiles;
mod slides;

pub use tiles::{TileSample, TileSchema, TilesDataset};
pub use slides::{SlideSample, SlideSchema, SlidesDataset};

use std::fmt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use polars::prelude::*;
use thiserror::Error;

/// Name of the manifest file looked up under the dataset root when no
/// explicit path or table is given.
pub const DEFAULT_CSV_FILENAME: &str = "dataset.csv";

/// Split-column value marking training rows.
pub const TRAIN_SPLIT_LABEL: &str = "train";
/// Split-column value marking test rows.
pub const TEST_SPLIT_LABEL: &str = "test";

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("expected column '{0}' not found in the manifest")]
    MissingColumn(String),
    #[error("train/test split was requested but the dataset has no split column")]
    NoSplitColumn,
    #[error("duplicate {column} '{key}' in the manifest")]
    DuplicateKey { column: String, key: String },
    #[error("column '{column}' does not hold a path string at row {row}")]
    NonStringPath { column: String, row: usize },
    #[error("row index {index} out of range for dataset of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("column '{column}' has {values} values but the table has {rows} rows")]
    ColumnLengthMismatch {
        column: String,
        values: usize,
        rows: usize,
    },
    #[error(transparent)]
    Polars(#[from] PolarsError),
}

/// A single manifest cell, converted once from polars on load.
///
/// Carries a total order (floats through `total_cmp`, integers comparable
/// with floats) so labels and IDs can be grouped and sorted without hashing.
#[derive(Debug, Clone)]
pub enum SampleValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl SampleValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SampleValue::Str(s) => Some(s),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SampleValue::Null => 0,
            SampleValue::Bool(_) => 1,
            SampleValue::Int(_) | SampleValue::Float(_) => 2,
            SampleValue::Str(_) => 3,
        }
    }

    fn from_any(value: AnyValue) -> Self {
        match value {
            AnyValue::Null => SampleValue::Null,
            AnyValue::Boolean(v) => SampleValue::Bool(v),
            AnyValue::Int8(v) => SampleValue::Int(v as i64),
            AnyValue::Int16(v) => SampleValue::Int(v as i64),
            AnyValue::Int32(v) => SampleValue::Int(v as i64),
            AnyValue::Int64(v) => SampleValue::Int(v),
            AnyValue::UInt8(v) => SampleValue::Int(v as i64),
            AnyValue::UInt16(v) => SampleValue::Int(v as i64),
            AnyValue::UInt32(v) => SampleValue::Int(v as i64),
            AnyValue::UInt64(v) => SampleValue::Int(v as i64),
            AnyValue::Float32(v) => SampleValue::Float(v as f64),
            AnyValue::Float64(v) => SampleValue::Float(v),
            AnyValue::Utf8(v) => SampleValue::Str(v.to_string()),
            other => SampleValue::Str(other.to_string()),
        }
    }
}

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleValue::Null => write!(f, "null"),
            SampleValue::Bool(v) => write!(f, "{}", v),
            SampleValue::Int(v) => write!(f, "{}", v),
            SampleValue::Float(v) => write!(f, "{}", v),
            SampleValue::Str(v) => write!(f, "{}", v),
        }
    }
}

impl PartialEq for SampleValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for SampleValue {}

impl PartialOrd for SampleValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SampleValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use SampleValue::*;
        match (self, other) {
            (Null, Null) => std::cmp::Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Int(a), Float(b)) => (*a as f64).total_cmp(b),
            (Float(a), Int(b)) => a.total_cmp(&(*b as f64)),
            (Str(a), Str(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl From<&str> for SampleValue {
    fn from(value: &str) -> Self {
        SampleValue::Str(value.to_string())
    }
}

impl From<i64> for SampleValue {
    fn from(value: i64) -> Self {
        SampleValue::Int(value)
    }
}

impl From<f64> for SampleValue {
    fn from(value: f64) -> Self {
        SampleValue::Float(value)
    }
}

/// Where a manifest comes from.
///
/// A pre-loaded frame takes precedence over any CSV path, so callers can
/// filter or derive columns with polars before handing the table over.
#[derive(Debug, Clone)]
pub enum ManifestSource {
    /// Read `<root>/dataset.csv`.
    Default,
    /// Read the CSV at this path.
    Path(PathBuf),
    /// Use an already-parsed table as-is.
    Frame(DataFrame),
}

/// Ordered column store holding the loaded manifest.
///
/// Immutable after the owning dataset is constructed; [`add_column`] exists
/// only for the two-phase construction window of [`SlidesDataset`].
///
/// [`add_column`]: ManifestTable::add_column
#[derive(Debug, Clone)]
pub struct ManifestTable {
    columns: IndexMap<String, Vec<SampleValue>>,
    rows: usize,
}

impl ManifestTable {
    pub fn from_frame(frame: &DataFrame) -> Self {
        let rows = frame.height();
        let columns = frame
            .get_columns()
            .iter()
            .map(|series| {
                let values = series.iter().map(SampleValue::from_any).collect();
                (series.name().to_string(), values)
            })
            .collect();
        ManifestTable { columns, rows }
    }

    pub fn read_csv(path: &Path) -> Result<Self, DatasetError> {
        let frame = CsvReader::from_path(path)?.has_header(true).finish()?;
        log::debug!("loaded manifest with {} rows from {:?}", frame.height(), path);
        Ok(Self::from_frame(&frame))
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|name| name.as_str())
    }

    pub fn column(&self, name: &str) -> Result<&[SampleValue], DatasetError> {
        self.columns
            .get(name)
            .map(|values| values.as_slice())
            .ok_or_else(|| DatasetError::MissingColumn(name.to_string()))
    }

    pub fn value(&self, row: usize, name: &str) -> Result<&SampleValue, DatasetError> {
        let column = self.column(name)?;
        column.get(row).ok_or(DatasetError::IndexOutOfRange {
            index: row,
            len: self.rows,
        })
    }

    /// Append a derived column. Only meaningful between [`SlidesDataset::load_table`]
    /// and [`SlidesDataset::from_table`].
    pub fn add_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<SampleValue>,
    ) -> Result<(), DatasetError> {
        let name = name.into();
        if values.len() != self.rows {
            return Err(DatasetError::ColumnLengthMismatch {
                column: name,
                values: values.len(),
                rows: self.rows,
            });
        }
        self.columns.insert(name, values);
        Ok(())
    }

    /// Check that every column in `required` is present, in the order given.
    pub fn validate_columns<'a>(
        &self,
        required: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), DatasetError> {
        for name in required {
            if !self.has_column(name) {
                return Err(DatasetError::MissingColumn(name.to_string()));
            }
        }
        Ok(())
    }

    /// Fail on repeated values in the index column.
    pub fn ensure_unique(&self, name: &str) -> Result<(), DatasetError> {
        let column = self.column(name)?;
        let mut seen: Vec<&SampleValue> = column.iter().collect();
        seen.sort();
        for pair in seen.windows(2) {
            if pair[0] == pair[1] {
                return Err(DatasetError::DuplicateKey {
                    column: name.to_string(),
                    key: pair[0].to_string(),
                });
            }
        }
        Ok(())
    }

    /// Retain only the rows of the requested split. `train == None` keeps
    /// everything; asking for a split without a declared split column is a
    /// construction-time error.
    pub fn filter_split(
        self,
        split_column: Option<&str>,
        train: Option<bool>,
    ) -> Result<Self, DatasetError> {
        let train = match train {
            None => return Ok(self),
            Some(train) => train,
        };
        let split_column = split_column.ok_or(DatasetError::NoSplitColumn)?;
        let wanted = if train {
            TRAIN_SPLIT_LABEL
        } else {
            TEST_SPLIT_LABEL
        };
        let keep: Vec<bool> = self
            .column(split_column)?
            .iter()
            .map(|value| value.as_str() == Some(wanted))
            .collect();
        let rows = keep.iter().filter(|flag| **flag).count();
        log::debug!("split '{}' retained {} of {} rows", wanted, rows, self.rows);
        let columns = self
            .columns
            .into_iter()
            .map(|(name, values)| {
                let filtered = values
                    .into_iter()
                    .zip(&keep)
                    .filter_map(|(value, keep)| keep.then_some(value))
                    .collect();
                (name, filtered)
            })
            .collect();
        Ok(ManifestTable { columns, rows })
    }
}

/// Resolve a manifest source to a loaded table.
pub(crate) fn resolve_manifest(
    root: &Path,
    source: ManifestSource,
) -> Result<ManifestTable, DatasetError> {
    match source {
        ManifestSource::Default => ManifestTable::read_csv(&root.join(DEFAULT_CSV_FILENAME)),
        ManifestSource::Path(path) => ManifestTable::read_csv(&path),
        ManifestSource::Frame(frame) => Ok(ManifestTable::from_frame(&frame)),
    }
}

/// Join a relative path cell against the dataset root.
pub(crate) fn resolve_path(
    root: &Path,
    table: &ManifestTable,
    row: usize,
    column: &str,
) -> Result<PathBuf, DatasetError> {
    let value = table.value(row, column)?;
    let relative = value.as_str().ok_or_else(|| DatasetError::NonStringPath {
        column: column.to_string(),
        row,
    })?;
    Ok(root.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;

    fn frame() -> DataFrame {
        df!(
            "id" => &["a", "b", "c"],
            "split" => &["train", "test", "train"],
            "score" => &[1.5f64, 2.0, 3.0],
        )
        .unwrap()
    }

    #[test]
    fn table_preserves_column_order_and_len() {
        let table = ManifestTable::from_frame(&frame());
        assert_eq!(table.len(), 3);
        let names: Vec<_> = table.column_names().collect();
        assert_eq!(names, vec!["id", "split", "score"]);
    }

    #[test]
    fn filter_split_keeps_matching_rows() {
        let table = ManifestTable::from_frame(&frame());
        let table = table.filter_split(Some("split"), Some(true)).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.column("id").unwrap()[1], SampleValue::from("c"));
    }

    #[test]
    fn filter_split_without_column_fails() {
        let table = ManifestTable::from_frame(&frame());
        let err = table.filter_split(None, Some(true)).unwrap_err();
        assert!(matches!(err, DatasetError::NoSplitColumn));
    }

    #[test]
    fn ensure_unique_reports_duplicate() {
        let frame = df!("id" => &["a", "b", "a"]).unwrap();
        let table = ManifestTable::from_frame(&frame);
        let err = table.ensure_unique("id").unwrap_err();
        match err {
            DatasetError::DuplicateKey { column, key } => {
                assert_eq!(column, "id");
                assert_eq!(key, "a");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn sample_value_order_mixes_ints_and_floats() {
        let mut values = vec![
            SampleValue::Float(2.5),
            SampleValue::Int(1),
            SampleValue::Int(3),
        ];
        values.sort();
        assert_eq!(values[0], SampleValue::Int(1));
        assert_eq!(values[1], SampleValue::Float(2.5));
    }
}
