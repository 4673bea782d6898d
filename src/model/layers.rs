//! Small building blocks shared by the generation cell and the frame
//! encoder.

use crate::common::*;

/// Instance normalization with learned affine parameters.
///
/// tch ships no module wrapper for `Tensor::instance_norm`, so this thin one
/// holds the per-channel weight and bias.
#[derive(Debug)]
pub struct InstanceNorm2d {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl InstanceNorm2d {
    pub fn new<'p, P>(path: P, channels: i64, eps: f64) -> Self
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let weight = path.ones("weight", &[channels]);
        let bias = path.zeros("bias", &[channels]);
        Self { weight, bias, eps }
    }
}

impl Module for InstanceNorm2d {
    fn forward(&self, xs: &Tensor) -> Tensor {
        xs.instance_norm(
            Some(&self.weight),
            Some(&self.bias),
            None::<&Tensor>,
            None::<&Tensor>,
            true,
            0.1,
            self.eps,
            false,
        )
    }
}

/// Spatially tiles a flat `[batch, n]` code and concatenates it onto the
/// channel axis of a `[batch, c, h, w]` feature map.
pub fn tile_concat(features: &Tensor, code: &Tensor) -> Tensor {
    let (batch, _channels, height, width) = features.size4().unwrap();
    let tiled = code
        .reshape(&[batch, -1, 1, 1])
        .repeat(&[1, 1, height, width]);
    Tensor::cat(&[features, &tiled], 1)
}

/// Zero-pads or truncates a time-major sequence to `length` steps.
pub fn maybe_pad_or_slice(sequence: &Tensor, length: i64) -> Tensor {
    let current = sequence.size()[0];
    if current > length {
        sequence.narrow(0, 0, length)
    } else if current < length {
        let mut padding = vec![0_i64; 2 * sequence.dim()];
        // constant_pad_nd lists dimensions from the last, so the time axis
        // pad amount sits at the end
        padding[2 * sequence.dim() - 1] = length - current;
        sequence.constant_pad_nd(&padding)
    } else {
        sequence.shallow_clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_norm_keeps_shape_and_centers() {
        let vs = nn::VarStore::new(Device::Cpu);
        let norm = InstanceNorm2d::new(&vs.root() / "norm", 4, 1e-6);

        let xs = Tensor::rand(&[2, 4, 8, 8], (Kind::Float, Device::Cpu)) * 3.0 + 5.0;
        let ys = xs.apply(&norm);
        assert_eq!(ys.size(), xs.size());

        let mean = ys.mean_dim(&[2i64, 3][..], false, Kind::Float);
        assert!(mean.abs().max().double_value(&[]) < 1e-4);
    }

    #[test]
    fn tile_concat_appends_code_channels() {
        let features = Tensor::zeros(&[2, 3, 4, 4], (Kind::Float, Device::Cpu));
        let code = Tensor::ones(&[2, 5], (Kind::Float, Device::Cpu));
        let out = tile_concat(&features, &code);
        assert_eq!(out.size(), &[2, 8, 4, 4]);
        assert!((out.select(1, 7).min().double_value(&[]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn pad_or_slice_time_axis() {
        let sequence = Tensor::ones(&[3, 2, 1, 4, 4], (Kind::Float, Device::Cpu));
        assert_eq!(maybe_pad_or_slice(&sequence, 2).size()[0], 2);
        assert_eq!(maybe_pad_or_slice(&sequence, 3).size()[0], 3);

        let padded = maybe_pad_or_slice(&sequence, 5);
        assert_eq!(padded.size()[0], 5);
        let tail = padded.narrow(0, 3, 2);
        assert!(tail.abs().max().double_value(&[]) < 1e-6);
    }
}
