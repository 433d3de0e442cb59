/*!
Image transform pipeline for `(channel, depth, height, width)` tensors.

Transforms are small stateless structs behind the [`ImageTransform`] trait;
[`pipeline::ImagePipeline`] composes them and [`config::build_pipeline`]
assembles a pipeline from a configuration object.
 */
mod config;
mod geometry;
mod intensity;
mod pipeline;

pub use config::{
    build_pipeline, AugmentationConfig, ColorParams, ElasticParams, ErasingParams, FlipParams,
    GammaParams, GaussianNoiseParams, PreprocessConfig, RandomAffineParams, RandomCropParams,
    TransformConfig,
};
pub use geometry::{
    CenterCrop, ElasticTransform, RandomAffine, RandomHorizontalFlip, RandomResizedCrop, Resize,
};
pub use intensity::{
    AddGaussianNoise, ColorJitter, ExpandChannels, RandomErasing, RandomGamma, ToTensor,
};
pub use pipeline::{ChannelMode, ImagePipeline};

use image::DynamicImage;
use tch::{Kind, TchError, Tensor};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("configuration option '{0}' is required but missing")]
    MissingOption(&'static str),
    #[error("expected an image tensor of shape (C, Z, H, W), got {0:?}")]
    BadShape(Vec<i64>),
    #[error(transparent)]
    Tch(#[from] TchError),
}

/// An image flowing through the pipeline: either an already-built tensor or
/// a decoded image that still needs conversion.
pub enum ImageData {
    Pixels(DynamicImage),
    Tensor(Tensor),
}

impl ImageData {
    /// Convert to a tensor if necessary. Decoded images become float RGB
    /// `(3, H, W)` tensors in `[0, 1]`; tensors pass through untouched.
    pub fn into_tensor(self) -> Tensor {
        match self {
            ImageData::Pixels(image) => pixels_to_tensor(&image),
            ImageData::Tensor(tensor) => tensor,
        }
    }
}

impl From<Tensor> for ImageData {
    fn from(tensor: Tensor) -> Self {
        ImageData::Tensor(tensor)
    }
}

impl From<DynamicImage> for ImageData {
    fn from(image: DynamicImage) -> Self {
        ImageData::Pixels(image)
    }
}

/// A single configurable image transformation.
///
/// Implementations are statically parameterized at construction and hold no
/// mutable state; any randomness is drawn fresh on each call.
pub trait ImageTransform: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, image: ImageData) -> Result<ImageData, TransformError>;
}

pub(crate) fn pixels_to_tensor(image: &DynamicImage) -> Tensor {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    Tensor::of_slice(rgb.as_raw())
        .view([height as i64, width as i64, 3])
        .permute(&[2, 0, 1])
        .to_kind(Kind::Float)
        / 255.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn pixels_convert_to_unit_range_chw() {
        let mut image = RgbImage::new(4, 2);
        image.put_pixel(0, 0, image::Rgb([255, 0, 51]));
        let tensor = pixels_to_tensor(&DynamicImage::ImageRgb8(image));
        assert_eq!(tensor.size(), vec![3, 2, 4]);
        assert_eq!(tensor.kind(), Kind::Float);
        let red = tensor.double_value(&[0, 0, 0]);
        let blue = tensor.double_value(&[2, 0, 0]);
        assert!((red - 1.0).abs() < 1e-6);
        assert!((blue - 0.2).abs() < 1e-6);
    }
}
