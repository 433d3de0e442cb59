use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use super::{
    resolve_manifest, resolve_path, DatasetError, ManifestSource, ManifestTable, SampleValue,
};

/// Declared manifest columns for a slide-indexed dataset.
///
/// Unlike tiles, slides have no split column and no mask by default, and may
/// carry a fixed set of metadata columns that get nested into every sample.
#[derive(Debug, Clone)]
pub struct SlideSchema {
    pub slide_id: String,
    pub image: String,
    pub label: String,
    pub mask: Option<String>,
    pub split: Option<String>,
    pub metadata: Vec<String>,
}

impl Default for SlideSchema {
    fn default() -> Self {
        SlideSchema {
            slide_id: "slide_id".to_string(),
            image: "image".to_string(),
            label: "label".to_string(),
            mask: None,
            split: None,
            metadata: Vec::new(),
        }
    }
}

impl SlideSchema {
    fn required_columns(&self) -> Vec<&str> {
        let mut columns = vec![self.image.as_str(), self.label.as_str()];
        columns.extend(self.mask.as_deref());
        columns.extend(self.split.as_deref());
        columns.extend(self.metadata.iter().map(|name| name.as_str()));
        columns
    }
}

/// One slide row under a closed set of semantic keys.
///
/// `image` and `image_path` always hold the same resolved path; `mask` and
/// `mask_path` are populated only when the schema declares a mask column.
#[derive(Debug, Clone, PartialEq)]
pub struct SlideSample {
    pub slide_id: SampleValue,
    pub image: PathBuf,
    pub image_path: PathBuf,
    pub mask: Option<PathBuf>,
    pub mask_path: Option<PathBuf>,
    pub label: SampleValue,
    pub metadata: IndexMap<String, SampleValue>,
}

/// Dataset of whole-slide images described by a manifest, one row per slide.
#[derive(Debug)]
pub struct SlidesDataset {
    root_dir: PathBuf,
    schema: SlideSchema,
    table: ManifestTable,
}

impl SlidesDataset {
    pub fn new(
        root: impl Into<PathBuf>,
        source: ManifestSource,
        train: Option<bool>,
    ) -> Result<Self, DatasetError> {
        Self::with_schema(root, source, train, SlideSchema::default())
    }

    pub fn with_schema(
        root: impl Into<PathBuf>,
        source: ManifestSource,
        train: Option<bool>,
        schema: SlideSchema,
    ) -> Result<Self, DatasetError> {
        let root_dir = root.into();
        let table = Self::load_table(&root_dir, source, train, &schema)?;
        Self::from_table(root_dir, table, schema)
    }

    /// First phase of construction: resolve and split-filter the manifest
    /// without validating columns, so derived columns can still be added
    /// with [`ManifestTable::add_column`] before [`SlidesDataset::from_table`].
    pub fn load_table(
        root: &Path,
        source: ManifestSource,
        train: Option<bool>,
        schema: &SlideSchema,
    ) -> Result<ManifestTable, DatasetError> {
        if schema.split.is_none() && train.is_some() {
            return Err(DatasetError::NoSplitColumn);
        }
        let table = resolve_manifest(root, source)?;
        table.ensure_unique(&schema.slide_id)?;
        table.filter_split(schema.split.as_deref(), train)
    }

    /// Second phase: validate the declared columns and finish the dataset.
    pub fn from_table(
        root: impl Into<PathBuf>,
        table: ManifestTable,
        schema: SlideSchema,
    ) -> Result<Self, DatasetError> {
        table.validate_columns(schema.required_columns())?;
        Ok(SlidesDataset {
            root_dir: root.into(),
            schema,
            table,
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn schema(&self) -> &SlideSchema {
        &self.schema
    }

    /// Whether this dataset declares a tissue mask column.
    pub fn has_mask(&self) -> bool {
        self.schema.mask.is_some()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<SlideSample, DatasetError> {
        if index >= self.len() {
            return Err(DatasetError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        let slide_id = self.table.value(index, &self.schema.slide_id)?.clone();
        let image = resolve_path(&self.root_dir, &self.table, index, &self.schema.image)?;
        let mask = match &self.schema.mask {
            Some(column) => Some(resolve_path(&self.root_dir, &self.table, index, column)?),
            None => None,
        };
        let label = self.table.value(index, &self.schema.label)?.clone();
        let mut metadata = IndexMap::new();
        for column in &self.schema.metadata {
            metadata.insert(column.clone(), self.table.value(index, column)?.clone());
        }
        Ok(SlideSample {
            slide_id,
            image_path: image.clone(),
            image,
            mask_path: mask.clone(),
            mask,
            label,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;
    use polars::prelude::{DataFrame, NamedFrom};

    fn manifest() -> DataFrame {
        df!(
            "slide_id" => &["s1", "s2"],
            "image" => &["s1.tiff", "s2.tiff"],
            "mask" => &["s1_mask.tiff", "s2_mask.tiff"],
            "label" => &[0i64, 1],
            "stain" => &["HE", "HE"],
            "scanner" => &["aperio", "hamamatsu"],
        )
        .unwrap()
    }

    fn schema() -> SlideSchema {
        SlideSchema {
            mask: Some("mask".to_string()),
            metadata: vec!["stain".to_string(), "scanner".to_string()],
            ..SlideSchema::default()
        }
    }

    #[test]
    fn sample_uses_semantic_keys() {
        let dataset = SlidesDataset::with_schema(
            "/data/slides",
            ManifestSource::Frame(manifest()),
            None,
            schema(),
        )
        .unwrap();
        assert_eq!(dataset.len(), 2);
        assert!(dataset.has_mask());

        let sample = dataset.get(1).unwrap();
        assert_eq!(sample.slide_id, SampleValue::from("s2"));
        assert_eq!(sample.image, Path::new("/data/slides").join("s2.tiff"));
        assert_eq!(sample.image, sample.image_path);
        assert_eq!(
            sample.mask.as_deref(),
            Some(Path::new("/data/slides").join("s2_mask.tiff").as_path())
        );
        assert_eq!(sample.mask, sample.mask_path);
        assert_eq!(sample.label, SampleValue::from(1i64));
        assert_eq!(sample.metadata["scanner"], SampleValue::from("hamamatsu"));
    }

    #[test]
    fn default_schema_has_no_mask() {
        let frame = df!(
            "slide_id" => &["s1"],
            "image" => &["s1.tiff"],
            "label" => &[0i64],
        )
        .unwrap();
        let dataset =
            SlidesDataset::new("/data/slides", ManifestSource::Frame(frame), None).unwrap();
        assert!(!dataset.has_mask());
        let sample = dataset.get(0).unwrap();
        assert_eq!(sample.mask, None);
        assert_eq!(sample.mask_path, None);
    }

    #[test]
    fn split_request_without_split_column_fails() {
        let err = SlidesDataset::with_schema(
            "/data/slides",
            ManifestSource::Frame(manifest()),
            Some(false),
            schema(),
        )
        .unwrap_err();
        assert!(matches!(err, DatasetError::NoSplitColumn));
    }

    #[test]
    fn missing_metadata_column_names_the_column() {
        let frame = manifest().drop("scanner").unwrap();
        let err = SlidesDataset::with_schema(
            "/data/slides",
            ManifestSource::Frame(frame),
            None,
            schema(),
        )
        .unwrap_err();
        match err {
            DatasetError::MissingColumn(name) => assert_eq!(name, "scanner"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn two_phase_construction_allows_derived_columns() {
        let frame = df!(
            "slide_id" => &["s1", "s2"],
            "image" => &["s1.tiff", "s2.tiff"],
            "isup_grade" => &[3i64, 1],
        )
        .unwrap();
        let schema = SlideSchema::default();
        let root = Path::new("/data/slides");
        let mut table =
            SlidesDataset::load_table(root, ManifestSource::Frame(frame), None, &schema).unwrap();
        // Derive a binary label from the grade before validation.
        let labels = table
            .column("isup_grade")
            .unwrap()
            .iter()
            .map(|grade| SampleValue::Int((*grade >= SampleValue::Int(2)) as i64))
            .collect();
        table.add_column("label", labels).unwrap();
        let dataset = SlidesDataset::from_table(root, table, schema).unwrap();
        assert_eq!(dataset.get(0).unwrap().label, SampleValue::Int(1));
        assert_eq!(dataset.get(1).unwrap().label, SampleValue::Int(0));
    }
}
