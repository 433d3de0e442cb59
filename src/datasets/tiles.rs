use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tch::Tensor;

use super::{
    resolve_manifest, resolve_path, DatasetError, ManifestSource, ManifestTable, SampleValue,
};

/// Declared manifest columns for a tile-indexed dataset.
///
/// Datasets with a different CSV layout swap the names here instead of
/// subclassing; setting an optional column to `None` removes the capability
/// (a `split` of `None` makes train/test selection an error).
#[derive(Debug, Clone)]
pub struct TileSchema {
    pub tile_id: String,
    pub slide_id: String,
    pub image: String,
    /// Replica of the resolved image path, kept so it propagates into batches.
    pub image_path: String,
    pub label: String,
    pub split: Option<String>,
    pub tile_x: Option<String>,
    pub tile_y: Option<String>,
}

impl Default for TileSchema {
    fn default() -> Self {
        TileSchema {
            tile_id: "tile_id".to_string(),
            slide_id: "slide_id".to_string(),
            image: "image".to_string(),
            image_path: "image_path".to_string(),
            label: "label".to_string(),
            split: Some("split".to_string()),
            tile_x: Some("tile_x".to_string()),
            tile_y: Some("tile_y".to_string()),
        }
    }
}

impl TileSchema {
    fn required_columns(&self) -> Vec<&str> {
        let mut columns = vec![
            self.slide_id.as_str(),
            self.image.as_str(),
            self.label.as_str(),
        ];
        columns.extend(self.split.as_deref());
        columns.extend(self.tile_x.as_deref());
        columns.extend(self.tile_y.as_deref());
        columns
    }
}

/// One manifest row, keyed by raw column names. The image column holds the
/// absolute path and is replicated under the schema's path column.
pub type TileSample = IndexMap<String, SampleValue>;

/// Dataset of WSI tiles described by a manifest, one row per tile.
#[derive(Debug)]
pub struct TilesDataset {
    root_dir: PathBuf,
    schema: TileSchema,
    table: ManifestTable,
}

impl TilesDataset {
    /// Load with the default schema. `train == Some(true)` keeps only the
    /// training split, `Some(false)` the test split, `None` everything.
    pub fn new(
        root: impl Into<PathBuf>,
        source: ManifestSource,
        train: Option<bool>,
    ) -> Result<Self, DatasetError> {
        Self::with_schema(root, source, train, TileSchema::default())
    }

    pub fn with_schema(
        root: impl Into<PathBuf>,
        source: ManifestSource,
        train: Option<bool>,
        schema: TileSchema,
    ) -> Result<Self, DatasetError> {
        let root_dir = root.into();
        if schema.split.is_none() && train.is_some() {
            return Err(DatasetError::NoSplitColumn);
        }
        let table = resolve_manifest(&root_dir, source)?;
        table.validate_columns(schema.required_columns())?;
        table.ensure_unique(&schema.tile_id)?;
        let table = table.filter_split(schema.split.as_deref(), train)?;
        Ok(TilesDataset {
            root_dir,
            schema,
            table,
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn schema(&self) -> &TileSchema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Sample dictionary for the row at `index`: tile ID first, then every
    /// manifest column, with the image path resolved against the root and
    /// duplicated under the path column.
    pub fn get(&self, index: usize) -> Result<TileSample, DatasetError> {
        if index >= self.len() {
            return Err(DatasetError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        let mut sample = TileSample::new();
        let tile_id = self.table.value(index, &self.schema.tile_id)?;
        sample.insert(self.schema.tile_id.clone(), tile_id.clone());
        for name in self.table.column_names() {
            if name == self.schema.tile_id {
                continue;
            }
            sample.insert(name.to_string(), self.table.value(index, name)?.clone());
        }
        let image = resolve_path(&self.root_dir, &self.table, index, &self.schema.image)?;
        let image = SampleValue::Str(image.to_string_lossy().into_owned());
        sample.insert(self.schema.image.clone(), image.clone());
        sample.insert(self.schema.image_path.clone(), image);
        Ok(sample)
    }

    /// Slide-ID column view, aligned with row positions.
    pub fn slide_ids(&self) -> Result<&[SampleValue], DatasetError> {
        self.table.column(&self.schema.slide_id)
    }

    /// Per-slide label, reduced to the most frequent tile label. Ties go to
    /// the smallest label value; slides come out sorted by ID.
    pub fn slide_labels(&self) -> Result<BTreeMap<SampleValue, SampleValue>, DatasetError> {
        let slide_ids = self.table.column(&self.schema.slide_id)?;
        let labels = self.table.column(&self.schema.label)?;
        let mut grouped: BTreeMap<SampleValue, Vec<SampleValue>> = BTreeMap::new();
        for (slide_id, label) in slide_ids.iter().zip(labels) {
            grouped
                .entry(slide_id.clone())
                .or_default()
                .push(label.clone());
        }
        let reduced = grouped
            .into_iter()
            .map(|(slide_id, labels)| (slide_id, mode(labels)))
            .collect();
        Ok(reduced)
    }

    /// "Balanced" class weights over slide-level labels: one weight per
    /// distinct label, inversely proportional to its frequency, ordered by
    /// sorted label value.
    pub fn class_weights(&self) -> Result<Tensor, DatasetError> {
        let slide_labels = self.slide_labels()?;
        let mut counts: BTreeMap<SampleValue, usize> = BTreeMap::new();
        for label in slide_labels.values() {
            *counts.entry(label.clone()).or_default() += 1;
        }
        let samples = slide_labels.len() as f64;
        let classes = counts.len() as f64;
        let weights: Vec<f64> = counts
            .values()
            .map(|count| samples / (classes * *count as f64))
            .collect();
        Ok(Tensor::of_slice(&weights))
    }
}

/// Most frequent value; smallest wins ties. `values` must be non-empty.
fn mode(mut values: Vec<SampleValue>) -> SampleValue {
    values.sort();
    let mut best = values[0].clone();
    let mut best_count = 0;
    let mut run_start = 0;
    for i in 0..=values.len() {
        if i == values.len() || values[i] != values[run_start] {
            let count = i - run_start;
            if count > best_count {
                best = values[run_start].clone();
                best_count = count;
            }
            run_start = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use polars::df;
    use polars::prelude::{DataFrame, NamedFrom};

    fn manifest() -> DataFrame {
        df!(
            "tile_id" => &["t1", "t2", "t3", "t4"],
            "slide_id" => &["s1", "s1", "s1", "s2"],
            "image" => &["s1/t1.png", "s1/t2.png", "s1/t3.png", "s2/t4.png"],
            "label" => &[0i64, 0, 1, 1],
            "split" => &["train", "train", "test", "train"],
            "tile_x" => &[0i64, 224, 448, 0],
            "tile_y" => &[0i64, 0, 0, 0],
        )
        .unwrap()
    }

    fn dataset(train: Option<bool>) -> TilesDataset {
        TilesDataset::new("/data/tiles", ManifestSource::Frame(manifest()), train).unwrap()
    }

    #[test]
    fn len_matches_split_filtering() {
        assert_eq!(dataset(None).len(), 4);
        assert_eq!(dataset(Some(true)).len(), 3);
        assert_eq!(dataset(Some(false)).len(), 1);
    }

    #[test]
    fn sample_resolves_and_replicates_image_path() {
        let dataset = dataset(None);
        let sample = dataset.get(1).unwrap();
        assert_eq!(sample["tile_id"], SampleValue::from("t2"));
        let expected = Path::new("/data/tiles").join("s1/t2.png");
        assert_eq!(
            sample["image"],
            SampleValue::Str(expected.to_string_lossy().into_owned())
        );
        assert_eq!(sample["image"], sample["image_path"]);
        assert_eq!(sample["tile_x"], SampleValue::from(224i64));
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let dataset = dataset(Some(false));
        let err = dataset.get(1).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::IndexOutOfRange { index: 1, len: 1 }
        ));
    }

    #[test]
    fn split_request_without_split_column_fails() {
        let schema = TileSchema {
            split: None,
            ..TileSchema::default()
        };
        let err = TilesDataset::with_schema(
            "/data/tiles",
            ManifestSource::Frame(manifest()),
            Some(true),
            schema,
        )
        .unwrap_err();
        assert!(matches!(err, DatasetError::NoSplitColumn));
    }

    #[test]
    fn missing_required_column_names_the_column() {
        let frame = manifest().drop("label").unwrap();
        let err =
            TilesDataset::new("/data/tiles", ManifestSource::Frame(frame), None).unwrap_err();
        match err {
            DatasetError::MissingColumn(name) => assert_eq!(name, "label"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_tile_ids_are_rejected() {
        let frame = df!(
            "tile_id" => &["t1", "t1"],
            "slide_id" => &["s1", "s1"],
            "image" => &["a.png", "b.png"],
            "label" => &[0i64, 1],
            "split" => &["train", "train"],
            "tile_x" => &[0i64, 0],
            "tile_y" => &[0i64, 0],
        )
        .unwrap();
        let err =
            TilesDataset::new("/data/tiles", ManifestSource::Frame(frame), None).unwrap_err();
        assert!(matches!(err, DatasetError::DuplicateKey { .. }));
    }

    #[test]
    fn slide_labels_take_the_mode_per_slide() {
        let dataset = dataset(None);
        let labels = dataset.slide_labels().unwrap();
        assert_eq!(labels[&SampleValue::from("s1")], SampleValue::from(0i64));
        assert_eq!(labels[&SampleValue::from("s2")], SampleValue::from(1i64));
    }

    #[test]
    fn class_weights_are_inversely_proportional_to_frequency() {
        // s1 -> 0, s2 -> 1: one slide per class, both weights 1.
        let dataset = dataset(None);
        let weights = Vec::<f64>::from(&dataset.class_weights().unwrap());
        assert_eq!(weights, vec![1.0, 1.0]);

        // Three slides of class 0, one of class 1.
        let frame = df!(
            "tile_id" => &["t1", "t2", "t3", "t4"],
            "slide_id" => &["s1", "s2", "s3", "s4"],
            "image" => &["a", "b", "c", "d"],
            "label" => &[0i64, 0, 0, 1],
            "split" => &["train", "train", "train", "train"],
            "tile_x" => &[0i64, 0, 0, 0],
            "tile_y" => &[0i64, 0, 0, 0],
        )
        .unwrap();
        let dataset =
            TilesDataset::new("/data/tiles", ManifestSource::Frame(frame), None).unwrap();
        let weights = Vec::<f64>::from(&dataset.class_weights().unwrap());
        assert_eq!(weights.len(), 2);
        assert_abs_diff_eq!(weights[0], 2.0 / 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(weights[1], 2.0, epsilon = 1e-9);
    }

    #[test]
    fn mode_prefers_smallest_on_tie() {
        let values = vec![
            SampleValue::from(1i64),
            SampleValue::from(0i64),
            SampleValue::from(0i64),
            SampleValue::from(1i64),
        ];
        assert_eq!(mode(values), SampleValue::from(0i64));
    }
}
