/*!
Manifest-backed WSI datasets and a configurable image transform pipeline.

[`datasets`] exposes tile- and slide-indexed adapters over CSV manifests;
[`transforms`] composes tensor image transformations and builds them from a
configuration object.
 */
pub mod datasets;
pub mod transforms;

pub use datasets::{
    DatasetError, ManifestSource, ManifestTable, SampleValue, SlideSample, SlideSchema,
    SlidesDataset, TileSample, TileSchema, TilesDataset,
};
pub use transforms::{build_pipeline, ChannelMode, ImagePipeline, TransformConfig, TransformError};
