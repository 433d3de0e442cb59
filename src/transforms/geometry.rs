use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tch::{Device, Kind, Tensor};

use super::{ImageData, ImageTransform, TransformError};

// Torchvision's default aspect-ratio range for random resized crops.
const CROP_RATIO: (f64, f64) = (3.0 / 4.0, 4.0 / 3.0);
const CROP_ATTEMPTS: usize = 10;

/// Resize the shorter edge to `size`, preserving aspect ratio.
#[derive(Debug, Clone)]
pub struct Resize {
    pub size: i64,
}

impl ImageTransform for Resize {
    fn name(&self) -> &'static str {
        "resize"
    }

    fn apply(&self, image: ImageData) -> Result<ImageData, TransformError> {
        let tensor = image.into_tensor();
        let (_, _, height, width) = size4(&tensor)?;
        let (new_height, new_width) = if height <= width {
            let scaled = (self.size as f64 * width as f64 / height as f64).round() as i64;
            (self.size, scaled.max(1))
        } else {
            let scaled = (self.size as f64 * height as f64 / width as f64).round() as i64;
            (scaled.max(1), self.size)
        };
        Ok(resize_exact(&tensor, new_height, new_width).into())
    }
}

/// Crop the central `size`×`size` window, clamped to the input extent.
#[derive(Debug, Clone)]
pub struct CenterCrop {
    pub size: i64,
}

impl ImageTransform for CenterCrop {
    fn name(&self) -> &'static str {
        "center_crop"
    }

    fn apply(&self, image: ImageData) -> Result<ImageData, TransformError> {
        let tensor = image.into_tensor();
        let (_, _, height, width) = size4(&tensor)?;
        let crop_height = self.size.min(height);
        let crop_width = self.size.min(width);
        let top = (height - crop_height) / 2;
        let left = (width - crop_width) / 2;
        let cropped = tensor
            .narrow(2, top, crop_height)
            .narrow(3, left, crop_width);
        Ok(cropped.into())
    }
}

/// Crop a random window whose area fraction is drawn from `scale` and whose
/// aspect ratio is log-uniform in (3/4, 4/3), then resize to `size`×`size`.
/// Falls back to a center crop when no window fits.
#[derive(Debug, Clone)]
pub struct RandomResizedCrop {
    pub scale: (f64, f64),
    pub size: i64,
}

impl ImageTransform for RandomResizedCrop {
    fn name(&self) -> &'static str {
        "random_resized_crop"
    }

    fn apply(&self, image: ImageData) -> Result<ImageData, TransformError> {
        let tensor = image.into_tensor();
        let (_, _, height, width) = size4(&tensor)?;
        let mut rng = StdRng::from_entropy();
        let area = (height * width) as f64;
        let log_ratio = (CROP_RATIO.0.ln(), CROP_RATIO.1.ln());
        for _ in 0..CROP_ATTEMPTS {
            let target_area = area * rng.gen_range(self.scale.0..=self.scale.1);
            let ratio = rng.gen_range(log_ratio.0..=log_ratio.1).exp();
            let crop_width = (target_area * ratio).sqrt().round() as i64;
            let crop_height = (target_area / ratio).sqrt().round() as i64;
            if crop_height < 1 || crop_width < 1 || crop_height > height || crop_width > width {
                continue;
            }
            let top = rng.gen_range(0..=(height - crop_height));
            let left = rng.gen_range(0..=(width - crop_width));
            let crop = tensor.narrow(2, top, crop_height).narrow(3, left, crop_width);
            return Ok(resize_exact(&crop, self.size, self.size).into());
        }
        let fallback = height.min(width);
        let top = (height - fallback) / 2;
        let left = (width - fallback) / 2;
        let crop = tensor.narrow(2, top, fallback).narrow(3, left, fallback);
        Ok(resize_exact(&crop, self.size, self.size).into())
    }
}

/// Flip the width axis with probability `prob`.
#[derive(Debug, Clone)]
pub struct RandomHorizontalFlip {
    pub prob: f64,
}

impl ImageTransform for RandomHorizontalFlip {
    fn name(&self) -> &'static str {
        "random_horizontal_flip"
    }

    fn apply(&self, image: ImageData) -> Result<ImageData, TransformError> {
        let tensor = image.into_tensor();
        let mut rng = StdRng::from_entropy();
        if rng.gen::<f64>() < self.prob {
            Ok(tensor.flip(&[-1]).into())
        } else {
            Ok(tensor.into())
        }
    }
}

/// Random rotation, shear and translation, sampled once per invocation and
/// applied identically to every channel and depth slice.
///
/// Angles are in degrees, shifts are fractions of the image extent.
#[derive(Debug, Clone)]
pub struct RandomAffine {
    pub max_angle: f64,
    pub max_horizontal_shift: f64,
    pub max_vertical_shift: f64,
    pub max_shear: f64,
}

impl ImageTransform for RandomAffine {
    fn name(&self) -> &'static str {
        "random_affine"
    }

    fn apply(&self, image: ImageData) -> Result<ImageData, TransformError> {
        let tensor = image.into_tensor();
        let (channels, depth, height, width) = size4(&tensor)?;
        let device = tensor.device();
        let mut rng = StdRng::from_entropy();

        let angle = rng
            .gen_range(-self.max_angle..=self.max_angle)
            .to_radians();
        let shear = rng
            .gen_range(-self.max_shear..=self.max_shear)
            .to_radians()
            .tan();
        // Grid coordinates span [-1, 1], so a shift fraction doubles.
        let shift_x = rng.gen_range(-self.max_horizontal_shift..=self.max_horizontal_shift) * 2.0;
        let shift_y = rng.gen_range(-self.max_vertical_shift..=self.max_vertical_shift) * 2.0;
        let (sin, cos) = angle.sin_cos();

        // Rotation composed with shear, plus the translation column.
        let theta = Tensor::of_slice(&[
            cos as f32,
            (cos * shear - sin) as f32,
            shift_x as f32,
            sin as f32,
            (sin * shear + cos) as f32,
            shift_y as f32,
        ])
        .view([1, 2, 3])
        .to_device(device);

        let grid = Tensor::affine_grid_generator(
            &theta.expand(&[channels, 2, 3], false),
            &[channels, depth, height, width],
            false,
        );
        let kind = tensor.kind();
        let warped = tensor
            .to_kind(Kind::Float)
            .grid_sampler(&grid, 0, 0, false)
            .to_kind(kind);
        Ok(warped.into())
    }
}

/// Elastic deformation: gaussian-smoothed uniform displacement fields,
/// scaled by `alpha` pixels and applied with probability `p_apply`.
#[derive(Debug, Clone)]
pub struct ElasticTransform {
    pub alpha: f64,
    pub sigma: f64,
    pub p_apply: f64,
}

impl ImageTransform for ElasticTransform {
    fn name(&self) -> &'static str {
        "elastic_transform"
    }

    fn apply(&self, image: ImageData) -> Result<ImageData, TransformError> {
        let tensor = image.into_tensor();
        let mut rng = StdRng::from_entropy();
        if rng.gen::<f64>() >= self.p_apply {
            return Ok(tensor.into());
        }
        let (channels, _, height, width) = size4(&tensor)?;
        let device = tensor.device();

        let (kernel, radius) = gaussian_kernel(self.sigma, device);
        let kernel_size = 2 * radius + 1;
        let noise = Tensor::rand(&[2, 1, height, width], (Kind::Float, device)) * 2.0 - 1.0;
        let displacement = noise.conv2d(
            &kernel.view([1, 1, kernel_size, kernel_size]),
            None::<Tensor>,
            &[1, 1],
            &[radius, radius],
            &[1, 1],
            1,
        ) * self.alpha;

        // Pixel offsets to grid units: x by 2/W, y by 2/H.
        let scale = Tensor::of_slice(&[2.0 / width as f32, 2.0 / height as f32])
            .view([2, 1, 1])
            .to_device(device);
        let displacement = (displacement.squeeze_dim(1) * scale)
            .permute(&[1, 2, 0])
            .unsqueeze(0);

        let identity = Tensor::of_slice(&[1f32, 0.0, 0.0, 0.0, 1.0, 0.0])
            .view([1, 2, 3])
            .to_device(device);
        let grid = Tensor::affine_grid_generator(&identity, &[1, 1, height, width], false)
            + displacement;
        let grid = grid.expand(&[channels, height, width, 2], false);

        let kind = tensor.kind();
        let warped = tensor
            .to_kind(Kind::Float)
            .grid_sampler(&grid, 0, 0, false)
            .to_kind(kind);
        Ok(warped.into())
    }
}

fn size4(tensor: &Tensor) -> Result<(i64, i64, i64, i64), TransformError> {
    tensor
        .size4()
        .map_err(|_| TransformError::BadShape(tensor.size()))
}

/// Bilinear resize to an exact extent, preserving the element kind.
pub(crate) fn resize_exact(tensor: &Tensor, height: i64, width: i64) -> Tensor {
    let kind = tensor.kind();
    tensor
        .to_kind(Kind::Float)
        .upsample_bilinear2d(&[height, width], false, None, None)
        .to_kind(kind)
}

/// Normalized 2D gaussian kernel and its radius. The radius covers three
/// standard deviations.
fn gaussian_kernel(sigma: f64, device: Device) -> (Tensor, i64) {
    let sigma = sigma.max(1e-3);
    let radius = (3.0 * sigma).ceil().max(1.0) as i64;
    let mut values = Vec::with_capacity((2 * radius + 1) as usize);
    for i in -radius..=radius {
        let x = i as f64;
        values.push((-(x * x) / (2.0 * sigma * sigma)).exp() as f32);
    }
    let sum: f32 = values.iter().sum();
    let values: Vec<f32> = values.iter().map(|value| value / sum).collect();
    let kernel1d = Tensor::of_slice(&values).to_device(device);
    let kernel = kernel1d.unsqueeze(1).matmul(&kernel1d.unsqueeze(0));
    (kernel, radius)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(channels: i64, height: i64, width: i64) -> Tensor {
        Tensor::arange(channels * height * width, (Kind::Float, Device::Cpu))
            .view([channels, 1, height, width])
            / (channels * height * width) as f64
    }

    #[test]
    fn resize_scales_the_shorter_edge() {
        let resize = Resize { size: 8 };
        let out = resize.apply(ramp(1, 16, 32).into()).unwrap().into_tensor();
        assert_eq!(out.size(), vec![1, 1, 8, 16]);
    }

    #[test]
    fn center_crop_is_idempotent() {
        let crop = CenterCrop { size: 6 };
        let once = crop.apply(ramp(2, 10, 12).into()).unwrap().into_tensor();
        assert_eq!(once.size(), vec![2, 1, 6, 6]);
        let twice = crop
            .apply(once.copy().into())
            .unwrap()
            .into_tensor();
        assert_eq!(Vec::<f64>::from(&once.flatten(0, -1)), Vec::<f64>::from(&twice.flatten(0, -1)));
    }

    #[test]
    fn random_resized_crop_outputs_target_size() {
        let crop = RandomResizedCrop {
            scale: (0.5, 1.0),
            size: 7,
        };
        let out = crop.apply(ramp(3, 20, 20).into()).unwrap().into_tensor();
        assert_eq!(out.size(), vec![3, 1, 7, 7]);
    }

    #[test]
    fn flip_with_probability_one_reverses_width() {
        let flip = RandomHorizontalFlip { prob: 1.0 };
        let input = ramp(1, 1, 4);
        let expected = Vec::<f64>::from(&input.flip(&[3]).flatten(0, -1));
        let out = flip.apply(input.into()).unwrap().into_tensor();
        assert_eq!(Vec::<f64>::from(&out.flatten(0, -1)), expected);
    }

    #[test]
    fn affine_preserves_shape_and_kind() {
        let affine = RandomAffine {
            max_angle: 30.0,
            max_horizontal_shift: 0.1,
            max_vertical_shift: 0.1,
            max_shear: 10.0,
        };
        let out = affine.apply(ramp(3, 12, 12).into()).unwrap().into_tensor();
        assert_eq!(out.size(), vec![3, 1, 12, 12]);
        assert_eq!(out.kind(), Kind::Float);
    }

    #[test]
    fn elastic_is_identity_when_never_applied() {
        let elastic = ElasticTransform {
            alpha: 10.0,
            sigma: 3.0,
            p_apply: 0.0,
        };
        let input = ramp(2, 9, 9);
        let out = elastic.apply(input.copy().into()).unwrap().into_tensor();
        assert_eq!(
            Vec::<f64>::from(&input.flatten(0, -1)),
            Vec::<f64>::from(&out.flatten(0, -1))
        );
    }

    #[test]
    fn elastic_preserves_shape_when_applied() {
        let elastic = ElasticTransform {
            alpha: 5.0,
            sigma: 2.0,
            p_apply: 1.0,
        };
        let out = elastic.apply(ramp(2, 9, 9).into()).unwrap().into_tensor();
        assert_eq!(out.size(), vec![2, 1, 9, 9]);
    }

    #[test]
    fn gaussian_kernel_sums_to_one() {
        let (kernel, radius) = gaussian_kernel(2.0, Device::Cpu);
        assert_eq!(radius, 6);
        let sum = kernel.sum(Kind::Float).double_value(&[]);
        assert!((sum - 1.0).abs() < 1e-4);
    }
}
