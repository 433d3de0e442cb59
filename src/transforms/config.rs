use serde::{Deserialize, Serialize};

use super::{
    AddGaussianNoise, CenterCrop, ChannelMode, ColorJitter, ElasticTransform, ExpandChannels,
    ImagePipeline, ImageTransform, RandomAffine, RandomErasing, RandomGamma, RandomHorizontalFlip,
    RandomResizedCrop, Resize, ToTensor, TransformError,
};

/// Torchvision's default for random erasing; the configuration only carries
/// the box geometry.
const ERASING_PROB: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    pub preprocess: PreprocessConfig,
    #[serde(default)]
    pub augmentation: AugmentationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Shorter-edge target for plain resizing and the output size of the
    /// random resized crop.
    pub resize: i64,
    pub center_crop_size: i64,
}

/// Feature flags plus their parameter blocks. A flag whose block is absent
/// is a fatal setup error when the pipeline is built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AugmentationConfig {
    #[serde(default)]
    pub use_random_affine: bool,
    pub random_affine: Option<RandomAffineParams>,
    #[serde(default)]
    pub use_random_crop: bool,
    pub random_crop: Option<RandomCropParams>,
    #[serde(default)]
    pub use_random_horizontal_flip: bool,
    pub random_horizontal_flip: Option<FlipParams>,
    #[serde(default)]
    pub use_gamma_transform: bool,
    pub gamma: Option<GammaParams>,
    #[serde(default)]
    pub use_random_color: bool,
    pub random_color: Option<ColorParams>,
    #[serde(default)]
    pub use_elastic_transform: bool,
    pub elastic_transform: Option<ElasticParams>,
    #[serde(default)]
    pub use_random_erasing: bool,
    pub random_erasing: Option<ErasingParams>,
    #[serde(default)]
    pub add_gaussian_noise: bool,
    pub gaussian_noise: Option<GaussianNoiseParams>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomAffineParams {
    pub max_angle: f64,
    pub max_horizontal_shift: f64,
    pub max_vertical_shift: f64,
    pub max_shear: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomCropParams {
    pub scale: (f64, f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlipParams {
    pub prob: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GammaParams {
    pub scale: (f64, f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColorParams {
    pub brightness: f64,
    pub contrast: f64,
    pub saturation: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticParams {
    pub alpha: f64,
    pub sigma: f64,
    pub p_apply: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErasingParams {
    pub scale: (f64, f64),
    pub ratio: (f64, f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussianNoiseParams {
    pub p_apply: f64,
    pub std: f64,
}

fn params<'a, T>(block: &'a Option<T>, path: &'static str) -> Result<&'a T, TransformError> {
    block.as_ref().ok_or(TransformError::MissingOption(path))
}

type Step<'a> = (
    bool,
    Box<dyn FnOnce() -> Result<Box<dyn ImageTransform>, TransformError> + 'a>,
);

/// Assemble the transform pipeline described by `config`, in shared mode.
///
/// With `apply_augmentations == false` the pipeline is always resize →
/// center-crop → to-tensor → expand-channels. With augmentations the
/// decision table below runs in order; the ordering is significant:
/// geometric warps come before cropping, erasing and noise expect a tensor,
/// and channel expansion is always last.
pub fn build_pipeline(
    config: &TransformConfig,
    apply_augmentations: bool,
) -> Result<ImagePipeline, TransformError> {
    let preprocess = &config.preprocess;
    let augmentation = &config.augmentation;

    let steps: Vec<Step> = if apply_augmentations {
        vec![
            (
                augmentation.use_random_affine,
                Box::new(|| {
                    let p = params(&augmentation.random_affine, "augmentation.random_affine")?;
                    Ok(Box::new(RandomAffine {
                        max_angle: p.max_angle,
                        max_horizontal_shift: p.max_horizontal_shift,
                        max_vertical_shift: p.max_vertical_shift,
                        max_shear: p.max_shear,
                    }) as Box<dyn ImageTransform>)
                }),
            ),
            (
                augmentation.use_random_crop,
                Box::new(|| {
                    let p = params(&augmentation.random_crop, "augmentation.random_crop")?;
                    Ok(Box::new(RandomResizedCrop {
                        scale: p.scale,
                        size: preprocess.resize,
                    }) as Box<dyn ImageTransform>)
                }),
            ),
            (
                !augmentation.use_random_crop,
                Box::new(|| {
                    Ok(Box::new(Resize {
                        size: preprocess.resize,
                    }) as Box<dyn ImageTransform>)
                }),
            ),
            (
                augmentation.use_random_horizontal_flip,
                Box::new(|| {
                    let p = params(
                        &augmentation.random_horizontal_flip,
                        "augmentation.random_horizontal_flip",
                    )?;
                    Ok(Box::new(RandomHorizontalFlip { prob: p.prob }) as Box<dyn ImageTransform>)
                }),
            ),
            (
                augmentation.use_gamma_transform,
                Box::new(|| {
                    let p = params(&augmentation.gamma, "augmentation.gamma")?;
                    Ok(Box::new(RandomGamma { scale: p.scale }) as Box<dyn ImageTransform>)
                }),
            ),
            (
                augmentation.use_random_color,
                Box::new(|| {
                    let p = params(&augmentation.random_color, "augmentation.random_color")?;
                    Ok(Box::new(ColorJitter {
                        brightness: p.brightness,
                        contrast: p.contrast,
                        saturation: p.saturation,
                    }) as Box<dyn ImageTransform>)
                }),
            ),
            (
                augmentation.use_elastic_transform,
                Box::new(|| {
                    let p = params(
                        &augmentation.elastic_transform,
                        "augmentation.elastic_transform",
                    )?;
                    Ok(Box::new(ElasticTransform {
                        alpha: p.alpha,
                        sigma: p.sigma,
                        p_apply: p.p_apply,
                    }) as Box<dyn ImageTransform>)
                }),
            ),
            (
                true,
                Box::new(|| {
                    Ok(Box::new(CenterCrop {
                        size: preprocess.center_crop_size,
                    }) as Box<dyn ImageTransform>)
                }),
            ),
            (
                true,
                Box::new(|| Ok(Box::new(ToTensor) as Box<dyn ImageTransform>)),
            ),
            (
                augmentation.use_random_erasing,
                Box::new(|| {
                    let p = params(&augmentation.random_erasing, "augmentation.random_erasing")?;
                    Ok(Box::new(RandomErasing {
                        scale: p.scale,
                        ratio: p.ratio,
                        prob: ERASING_PROB,
                    }) as Box<dyn ImageTransform>)
                }),
            ),
            (
                augmentation.add_gaussian_noise,
                Box::new(|| {
                    let p = params(&augmentation.gaussian_noise, "augmentation.gaussian_noise")?;
                    Ok(Box::new(AddGaussianNoise {
                        p_apply: p.p_apply,
                        std: p.std,
                    }) as Box<dyn ImageTransform>)
                }),
            ),
        ]
    } else {
        vec![
            (
                true,
                Box::new(|| {
                    Ok(Box::new(Resize {
                        size: preprocess.resize,
                    }) as Box<dyn ImageTransform>)
                }),
            ),
            (
                true,
                Box::new(|| {
                    Ok(Box::new(CenterCrop {
                        size: preprocess.center_crop_size,
                    }) as Box<dyn ImageTransform>)
                }),
            ),
            (
                true,
                Box::new(|| Ok(Box::new(ToTensor) as Box<dyn ImageTransform>)),
            ),
        ]
    };

    let mut transforms: Vec<Box<dyn ImageTransform>> = Vec::new();
    for (enabled, factory) in steps {
        if enabled {
            transforms.push(factory()?);
        }
    }
    // Every consumer sees the same channel count, augmented or not.
    transforms.push(Box::new(ExpandChannels));

    Ok(ImagePipeline::new(transforms, ChannelMode::Shared))
}
