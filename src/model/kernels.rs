//! CDNA kernel utilities: identity-kernel construction and per-sample
//! application of dynamically predicted transformation kernels.

use crate::common::*;

/// Builds a normalized spatial kernel whose mass sits in the center block.
///
/// Odd dimensions get a single center index, even dimensions the two center
/// indices, so a 4x4 kernel has four entries of 0.25. The kernel always sums
/// to 1 and is used as an additive bias so freshly initialized transforms
/// default to copying the input pixel.
pub fn identity_kernel(kernel_size: (i64, i64), device: Device) -> Tensor {
    let (kh, kw) = kernel_size;
    let center = |k: i64| -> (i64, i64) {
        if k % 2 == 0 {
            (k / 2 - 1, 2)
        } else {
            (k / 2, 1)
        }
    };
    let (top, block_h) = center(kh);
    let (left, block_w) = center(kw);

    let kernel = Tensor::zeros(&[kh, kw], (Kind::Float, device));
    let _ = kernel
        .narrow(0, top, block_h)
        .narrow(1, left, block_w)
        .fill_(1.0);
    &kernel / kernel.sum(Kind::Float)
}

/// Applies per-sample transformation kernels to a list of source images.
///
/// `kernels` has shape `[batch, kh, kw, images.len() * num_transformed]` and
/// is partitioned into one contiguous chunk per source image along its last
/// axis. Each batch sample carries its own filter, applied to every color
/// channel with SAME padding, producing one output image per
/// (source image, kernel slot) pair in order.
pub fn apply_kernels(images: &[Tensor], kernels: &Tensor, dilation: i64) -> Vec<Tensor> {
    let total_kernels = match kernels.size().as_slice() {
        &[_batch, _kh, _kw, total] => total,
        other => panic!(
            "kernels must have shape [batch, kh, kw, n], got {:?}",
            other
        ),
    };
    assert_eq!(
        total_kernels % images.len() as i64,
        0,
        "kernel slots {} are not divisible by {} source images",
        total_kernels,
        images.len()
    );

    let kernels_per_image = total_kernels / images.len() as i64;
    let chunks = kernels.split(kernels_per_image, 3);

    images
        .iter()
        .zip_eq(chunks.iter())
        .flat_map(|(image, chunk)| apply_cdna_kernels(image, chunk, dilation))
        .collect()
}

/// Convolves one image with a per-sample kernel bank.
///
/// Per-sample filters rule out a plain depthwise convolution, so the batch
/// is folded into the channel axis and a single grouped convolution with
/// `groups = batch * channels` runs all samples at once.
fn apply_cdna_kernels(image: &Tensor, kernels: &Tensor, dilation: i64) -> Vec<Tensor> {
    let (batch, channels, height, width) = image.size4().unwrap();
    let (kernel_batch, kh, kw, num_kernels) = kernels.size4().unwrap();
    debug_assert_eq!(batch, kernel_batch);

    // [N, kh, kw, T] -> [N * C * T, 1, kh, kw], one filter per output slot
    let weight = kernels
        .permute(&[0, 3, 1, 2])
        .unsqueeze(1)
        .expand(&[batch, channels, num_kernels, kh, kw], false)
        .reshape(&[batch * channels * num_kernels, 1, kh, kw]);

    let input = image.reshape(&[1, batch * channels, height, width]);
    let padded = input.constant_pad_nd(&same_padding((kh, kw), dilation));
    let output = padded.conv2d::<&Tensor>(
        &weight,
        None,
        &[1, 1],
        &[0, 0],
        &[dilation, dilation],
        batch * channels,
    );

    let output = output.reshape(&[batch, channels, num_kernels, height, width]);
    (0..num_kernels)
        .map(|index| output.select(2, index))
        .collect()
}

/// SAME zero-padding `[left, right, top, bottom]` for a dilated kernel,
/// asymmetric when the effective extent is even.
fn same_padding(kernel_size: (i64, i64), dilation: i64) -> [i64; 4] {
    let pad = |k: i64| -> (i64, i64) {
        let total = dilation * (k - 1);
        (total / 2, total - total / 2)
    };
    let (top, bottom) = pad(kernel_size.0);
    let (left, right) = pad(kernel_size.1);
    [left, right, top, bottom]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel_sum(kernel: &Tensor) -> f64 {
        kernel.sum(Kind::Float).double_value(&[])
    }

    #[test]
    fn identity_kernel_is_normalized() {
        for size in [(3, 3), (5, 5), (4, 4), (3, 4), (1, 1)] {
            let kernel = identity_kernel(size, Device::Cpu);
            assert_eq!(kernel.size(), &[size.0, size.1]);
            assert!((kernel_sum(&kernel) - 1.0).abs() < 1e-6);
            assert!(kernel.min().double_value(&[]) >= 0.0);
        }
    }

    #[test]
    fn odd_identity_kernel_is_a_center_point_mass() {
        let kernel = identity_kernel((5, 5), Device::Cpu);
        assert!((kernel.double_value(&[2, 2]) - 1.0).abs() < 1e-6);
        assert!((kernel.max().double_value(&[]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn even_identity_kernel_is_a_center_block() {
        let kernel = identity_kernel((4, 4), Device::Cpu);
        let nonzero = kernel.gt(0.0).sum(Kind::Float).double_value(&[]);
        assert_eq!(nonzero as i64, 4);
        for row in 1..3 {
            for col in 1..3 {
                assert!((kernel.double_value(&[row, col]) - 0.25).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn identity_kernels_copy_the_input() {
        tch::manual_seed(42);
        let image = Tensor::rand(&[2, 3, 8, 8], (Kind::Float, Device::Cpu));
        let kernels = identity_kernel((5, 5), Device::Cpu)
            .view([1, 5, 5, 1])
            .repeat(&[2, 1, 1, 1]);

        let outputs = apply_kernels(&[image.shallow_clone()], &kernels, 1);
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].allclose(&image, 1e-5, 1e-6, false));
    }

    #[test]
    fn kernels_are_partitioned_per_source_image() {
        tch::manual_seed(42);
        let first = Tensor::rand(&[2, 3, 8, 8], (Kind::Float, Device::Cpu));
        let second = Tensor::rand(&[2, 3, 8, 8], (Kind::Float, Device::Cpu));

        // identity kernels for the first image, zero kernels for the second
        let identity = identity_kernel((3, 3), Device::Cpu)
            .view([1, 3, 3, 1])
            .repeat(&[2, 1, 1, 2]);
        let zeros = Tensor::zeros(&[2, 3, 3, 2], (Kind::Float, Device::Cpu));
        let kernels = Tensor::cat(&[identity, zeros], 3);

        let outputs = apply_kernels(
            &[first.shallow_clone(), second.shallow_clone()],
            &kernels,
            1,
        );
        assert_eq!(outputs.len(), 4);
        assert!(outputs[0].allclose(&first, 1e-5, 1e-6, false));
        assert!(outputs[1].allclose(&first, 1e-5, 1e-6, false));
        let second_sum = outputs[3].abs().sum(Kind::Float).double_value(&[]);
        assert!(second_sum < 1e-6);
    }

    #[test]
    #[should_panic(expected = "kernels must have shape [batch, kh, kw, n]")]
    fn malformed_kernel_shapes_are_rejected() {
        let image = Tensor::rand(&[1, 3, 8, 8], (Kind::Float, Device::Cpu));
        let kernels = Tensor::rand(&[1, 3, 3], (Kind::Float, Device::Cpu));
        apply_kernels(&[image], &kernels, 1);
    }

    #[test]
    fn output_size_is_preserved_with_even_kernels_and_dilation() {
        let image = Tensor::rand(&[1, 3, 16, 16], (Kind::Float, Device::Cpu));
        let kernels = Tensor::rand(&[1, 4, 4, 2], (Kind::Float, Device::Cpu));
        let outputs = apply_kernels(&[image], &kernels, 2);
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].size(), &[1, 3, 16, 16]);
    }
}
