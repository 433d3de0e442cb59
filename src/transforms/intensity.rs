use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tch::Tensor;

use super::{pixels_to_tensor, ImageData, ImageTransform, TransformError};

const ERASE_ATTEMPTS: usize = 10;

/// Raise the image to a gamma sampled uniformly from `scale`, after
/// clamping intensities to `[0, 1]`.
#[derive(Debug, Clone)]
pub struct RandomGamma {
    pub scale: (f64, f64),
}

impl ImageTransform for RandomGamma {
    fn name(&self) -> &'static str {
        "random_gamma"
    }

    fn apply(&self, image: ImageData) -> Result<ImageData, TransformError> {
        let tensor = image.into_tensor();
        let mut rng = StdRng::from_entropy();
        let gamma = rng.gen_range(self.scale.0..=self.scale.1);
        Ok(tensor.clamp(0.0, 1.0).pow_tensor_scalar(gamma).into())
    }
}

/// Brightness, contrast and saturation jitter. Each factor is sampled in
/// `[max(0, 1 - v), 1 + v]`; contrast blends with the global mean and
/// saturation with the channel mean.
#[derive(Debug, Clone)]
pub struct ColorJitter {
    pub brightness: f64,
    pub contrast: f64,
    pub saturation: f64,
}

impl ImageTransform for ColorJitter {
    fn name(&self) -> &'static str {
        "color_jitter"
    }

    fn apply(&self, image: ImageData) -> Result<ImageData, TransformError> {
        let mut tensor = image.into_tensor();
        let mut rng = StdRng::from_entropy();

        if self.brightness > 0.0 {
            let factor = sample_factor(&mut rng, self.brightness);
            tensor = (tensor * factor).clamp(0.0, 1.0);
        }
        if self.contrast > 0.0 {
            let factor = sample_factor(&mut rng, self.contrast);
            let mean = tensor.mean(tensor.kind());
            tensor = (tensor * factor + mean * (1.0 - factor)).clamp(0.0, 1.0);
        }
        if self.saturation > 0.0 {
            let factor = sample_factor(&mut rng, self.saturation);
            let gray = channel_mean(&tensor);
            tensor = (tensor * factor + gray * (1.0 - factor)).clamp(0.0, 1.0);
        }
        Ok(tensor.into())
    }
}

fn sample_factor(rng: &mut StdRng, strength: f64) -> f64 {
    let low = (1.0 - strength).max(0.0);
    rng.gen_range(low..=1.0 + strength)
}

/// Mean over the channel axis, kept broadcastable.
fn channel_mean(tensor: &Tensor) -> Tensor {
    let channels = tensor.size()[0];
    let mut acc = tensor.narrow(0, 0, 1);
    for channel in 1..channels {
        acc = acc + tensor.narrow(0, channel, 1);
    }
    acc / channels as f64
}

/// Zero a random rectangle whose area fraction and aspect ratio are sampled
/// from `scale` and `ratio`; applied with probability `prob`.
#[derive(Debug, Clone)]
pub struct RandomErasing {
    pub scale: (f64, f64),
    pub ratio: (f64, f64),
    pub prob: f64,
}

impl ImageTransform for RandomErasing {
    fn name(&self) -> &'static str {
        "random_erasing"
    }

    fn apply(&self, image: ImageData) -> Result<ImageData, TransformError> {
        let tensor = image.into_tensor();
        let mut rng = StdRng::from_entropy();
        if rng.gen::<f64>() >= self.prob {
            return Ok(tensor.into());
        }
        let size = tensor.size();
        let (height, width) = match size.as_slice() {
            [.., h, w] => (*h, *w),
            _ => return Err(TransformError::BadShape(size)),
        };
        let area = (height * width) as f64;
        let log_ratio = (self.ratio.0.ln(), self.ratio.1.ln());
        let output = tensor.copy();
        for _ in 0..ERASE_ATTEMPTS {
            let target_area = area * rng.gen_range(self.scale.0..=self.scale.1);
            let ratio = rng.gen_range(log_ratio.0..=log_ratio.1).exp();
            let erase_height = (target_area / ratio).sqrt().round() as i64;
            let erase_width = (target_area * ratio).sqrt().round() as i64;
            if erase_height < 1 || erase_width < 1 || erase_height > height || erase_width > width
            {
                continue;
            }
            let top = rng.gen_range(0..=(height - erase_height));
            let left = rng.gen_range(0..=(width - erase_width));
            let mut region = output
                .narrow(-2, top, erase_height)
                .narrow(-1, left, erase_width);
            let _ = region.fill_(0.0);
            break;
        }
        Ok(output.into())
    }
}

/// Additive gaussian noise with standard deviation `std`, applied with
/// probability `p_apply` and clamped back to `[0, 1]`.
#[derive(Debug, Clone)]
pub struct AddGaussianNoise {
    pub p_apply: f64,
    pub std: f64,
}

impl ImageTransform for AddGaussianNoise {
    fn name(&self) -> &'static str {
        "gaussian_noise"
    }

    fn apply(&self, image: ImageData) -> Result<ImageData, TransformError> {
        let tensor = image.into_tensor();
        let mut rng = StdRng::from_entropy();
        if rng.gen::<f64>() >= self.p_apply {
            return Ok(tensor.into());
        }
        let noise = tensor.randn_like() * self.std;
        Ok((tensor + noise).clamp(0.0, 1.0).into())
    }
}

/// Convert a decoded image to a float tensor; tensors pass through.
#[derive(Debug, Clone)]
pub struct ToTensor;

impl ImageTransform for ToTensor {
    fn name(&self) -> &'static str {
        "to_tensor"
    }

    fn apply(&self, image: ImageData) -> Result<ImageData, TransformError> {
        match image {
            ImageData::Pixels(pixels) => Ok(pixels_to_tensor(&pixels).into()),
            tensor @ ImageData::Tensor(_) => Ok(tensor),
        }
    }
}

/// Repeat the channel axis three times, so single-channel images come out
/// with the three channels downstream consumers expect.
#[derive(Debug, Clone)]
pub struct ExpandChannels;

impl ImageTransform for ExpandChannels {
    fn name(&self) -> &'static str {
        "expand_channels"
    }

    fn apply(&self, image: ImageData) -> Result<ImageData, TransformError> {
        let tensor = image.into_tensor();
        Ok(tensor.repeat_interleave_self_int(3, 0, None).into())
    }
}
