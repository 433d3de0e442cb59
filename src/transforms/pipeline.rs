use tch::Tensor;

use super::{ImageData, ImageTransform, TransformError};

/// How the composed transform list is invoked over the channel axis.
///
/// `Shared` runs the whole pipeline once on the full `(C, Z, H, W)` tensor,
/// so transforms draw their random parameters once and every channel sees
/// the same instantiation. `PerChannel` re-runs the pipeline on each
/// `(1, Z, H, W)` channel slice, giving every channel independent random
/// parameters, and concatenates the results back along the channel axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Shared,
    PerChannel,
}

/// An ordered, immutable composition of image transforms.
///
/// Input images may be `(C, Z, H, W)` tensors, `(C, H, W)` tensors (a
/// singleton depth axis is inserted) or decoded images (converted to float
/// tensors first). The output keeps the element kind of the converted input;
/// callers that passed a 3D image get a `depth == 1` tensor back. The
/// pipeline holds no RNG and performs no I/O.
pub struct ImagePipeline {
    transforms: Vec<Box<dyn ImageTransform>>,
    mode: ChannelMode,
}

impl ImagePipeline {
    pub fn new(transforms: Vec<Box<dyn ImageTransform>>, mode: ChannelMode) -> Self {
        ImagePipeline { transforms, mode }
    }

    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Names of the composed transforms, in application order.
    pub fn transform_names(&self) -> Vec<&'static str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }

    pub fn apply(&self, image: impl Into<ImageData>) -> Result<Tensor, TransformError> {
        let tensor = image.into().into_tensor();
        let kind = tensor.kind();
        let tensor = if tensor.dim() == 3 {
            tensor.unsqueeze(1)
        } else {
            tensor
        };
        let output = match self.mode {
            ChannelMode::Shared => self.apply_transforms(tensor)?,
            ChannelMode::PerChannel => self.apply_per_channel(tensor)?,
        };
        Ok(output.to_kind(kind))
    }

    fn apply_transforms(&self, tensor: Tensor) -> Result<Tensor, TransformError> {
        let mut current = tensor;
        for transform in &self.transforms {
            // Transforms may emit decoded images; normalize back to tensors.
            current = transform.apply(ImageData::Tensor(current))?.into_tensor();
        }
        Ok(current)
    }

    fn apply_per_channel(&self, tensor: Tensor) -> Result<Tensor, TransformError> {
        let size = tensor.size();
        let channels = *size.first().ok_or(TransformError::BadShape(size.clone()))?;
        let mut outputs = Vec::with_capacity(channels as usize);
        for channel in 0..channels {
            let slice = tensor.narrow(0, channel, 1);
            outputs.push(self.apply_transforms(slice)?);
        }
        Ok(Tensor::cat(&outputs, 0))
    }
}
