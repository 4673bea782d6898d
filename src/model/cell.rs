//! One timestep of the SAVP generation cell: multi-scale encoder-decoder
//! with interleaved convolutional LSTMs, latent injection at every stage,
//! CDNA kernel synthesis, and mask compositing of candidate frames.

use super::{
    kernels,
    layers::{tile_concat, InstanceNorm2d},
    rnn::{ConvLstm, LatentLstm, LstmState},
};
use crate::{common::*, config::SavpHParams};

const CONV_RNN_KERNEL_SIZE: i64 = 5;
const FORGET_BIAS: f64 = 1.0;
const NORM_EPS: f64 = 1e-6;

// stage plans

#[derive(Debug, Clone, PartialEq, Eq)]
struct EncoderStagePlan {
    in_channels: i64,
    out_channels: i64,
    kernel_size: i64,
    conv_rnn: bool,
    height: i64,
    width: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DecoderStagePlan {
    in_channels: i64,
    out_channels: i64,
    kernel_size: i64,
    conv_rnn: bool,
    /// Encoder stage whose feature map joins this stage's input. The skip is
    /// resolved by stage identity, not by position in some flat layer list.
    skip_from: Option<usize>,
    height: i64,
    width: i64,
}

/// Lays out the encoder and decoder stages for the given image shape.
///
/// Each encoder stage halves the spatial resolution, each decoder stage
/// doubles it; the recorded heights and widths are the stage outputs. Only
/// the 128 tier is implemented.
fn plan_stages(
    hparams: &SavpHParams,
    image_channels: i64,
    image_height: i64,
    image_width: i64,
) -> Result<(Vec<EncoderStagePlan>, Vec<DecoderStagePlan>)> {
    let scale_size = image_height.min(image_width);
    ensure!(
        scale_size < 256,
        "{}x{} images are not supported, resolutions of 256 and above are unimplemented",
        image_height,
        image_width
    );
    ensure!(
        scale_size >= 128,
        "{}x{} images are not supported, the smaller spatial dimension must be at least 128",
        image_height,
        image_width
    );
    ensure!(
        image_height % 16 == 0 && image_width % 16 == 0,
        "image dimensions must be divisible by 16, got {}x{}",
        image_height,
        image_width
    );

    let nz = hparams.nz;
    let ngf = hparams.ngf;

    let encoder_specs: [(i64, i64, i64, bool); 4] = [
        (image_channels * 2 + nz, ngf, 5, false),
        (ngf + nz, ngf * 2, 3, true),
        (ngf * 2 + nz, ngf * 4, 3, true),
        (ngf * 4 + nz, ngf * 8, 3, true),
    ];
    let (mut height, mut width) = (image_height, image_width);
    let mut encoder = Vec::with_capacity(encoder_specs.len());
    for &(in_channels, out_channels, kernel_size, conv_rnn) in &encoder_specs {
        height /= 2;
        width /= 2;
        encoder.push(EncoderStagePlan {
            in_channels,
            out_channels,
            kernel_size,
            conv_rnn,
            height,
            width,
        });
    }

    let decoder_specs: [(i64, bool, Option<usize>); 4] = [
        (ngf * 8, true, None),
        (ngf * 4, true, Some(2)),
        (ngf * 2, false, Some(1)),
        (ngf, false, Some(0)),
    ];
    let mut decoder = Vec::with_capacity(decoder_specs.len());
    let mut prev_channels = encoder.last().unwrap().out_channels;
    for &(out_channels, conv_rnn, skip_from) in &decoder_specs {
        height *= 2;
        width *= 2;
        let skip_channels = skip_from.map_or(0, |source| encoder[source].out_channels);
        decoder.push(DecoderStagePlan {
            in_channels: prev_channels + skip_channels + nz,
            out_channels,
            kernel_size: 3,
            conv_rnn,
            skip_from,
            height,
            width,
        });
        prev_channels = out_channels;
    }

    Ok((encoder, decoder))
}

// stage modules

#[derive(Debug)]
struct EncoderStage {
    conv: Conv2D,
    norm: InstanceNorm2d,
    conv_rnn: Option<ConvLstm>,
}

#[derive(Debug)]
struct DecoderStage {
    conv: Conv2D,
    norm: InstanceNorm2d,
    conv_rnn: Option<ConvLstm>,
    skip_from: Option<usize>,
    height: i64,
    width: i64,
}

#[derive(Debug)]
struct ScratchHead {
    conv_h: Conv2D,
    norm: InstanceNorm2d,
    conv_image: Conv2D,
}

#[derive(Debug)]
struct MaskHead {
    conv_h: Conv2D,
    norm: InstanceNorm2d,
    conv_masks: Conv2D,
}

// cell

#[derive(Debug, Clone)]
pub struct SavpCellInit<'a> {
    pub hparams: &'a SavpHParams,
    pub image_channels: i64,
    pub image_height: i64,
    pub image_width: i64,
}

impl SavpCellInit<'_> {
    pub fn build<'p, P>(self, path: P) -> Result<SavpCell>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let Self {
            hparams,
            image_channels,
            image_height,
            image_width,
        } = self;

        hparams.validate()?;
        let (encoder_plans, decoder_plans) =
            plan_stages(hparams, image_channels, image_height, image_width)?;

        let nz = hparams.nz;
        let rnn_z = (nz > 0 && hparams.use_rnn_z)
            .then(|| LatentLstm::new(path / "rnn_z", nz, nz, FORGET_BIAS));

        let conv_config = |kernel_size: i64| ConvConfig {
            stride: 1,
            padding: (kernel_size - 1) / 2,
            ..Default::default()
        };

        let mut conv_rnn_shapes = Vec::new();
        let encoder_stages = encoder_plans
            .iter()
            .enumerate()
            .map(|(index, plan)| {
                let stage_path = path / format!("encoder_{}", index);
                let conv = nn::conv2d(
                    &stage_path / "conv",
                    plan.in_channels,
                    plan.out_channels,
                    plan.kernel_size,
                    conv_config(plan.kernel_size),
                );
                let norm = InstanceNorm2d::new(&stage_path / "norm", plan.out_channels, NORM_EPS);
                let conv_rnn = plan.conv_rnn.then(|| {
                    conv_rnn_shapes.push((plan.out_channels, plan.height, plan.width));
                    ConvLstm::new(
                        &stage_path / "conv_rnn",
                        plan.out_channels + nz,
                        plan.out_channels,
                        CONV_RNN_KERNEL_SIZE,
                        FORGET_BIAS,
                    )
                });
                EncoderStage {
                    conv,
                    norm,
                    conv_rnn,
                }
            })
            .collect::<Vec<_>>();

        let decoder_stages = decoder_plans
            .iter()
            .enumerate()
            .map(|(index, plan)| {
                let stage_path = path / format!("decoder_{}", index + encoder_plans.len());
                let conv = nn::conv2d(
                    &stage_path / "conv",
                    plan.in_channels,
                    plan.out_channels,
                    plan.kernel_size,
                    conv_config(plan.kernel_size),
                );
                let norm = InstanceNorm2d::new(&stage_path / "norm", plan.out_channels, NORM_EPS);
                let conv_rnn = plan.conv_rnn.then(|| {
                    conv_rnn_shapes.push((plan.out_channels, plan.height, plan.width));
                    ConvLstm::new(
                        &stage_path / "conv_rnn",
                        plan.out_channels + nz,
                        plan.out_channels,
                        CONV_RNN_KERNEL_SIZE,
                        FORGET_BIAS,
                    )
                });
                DecoderStage {
                    conv,
                    norm,
                    conv_rnn,
                    skip_from: plan.skip_from,
                    height: plan.height,
                    width: plan.width,
                }
            })
            .collect::<Vec<_>>();

        let (kernel_height, kernel_width) = hparams.kernel_size;
        let total_kernels = hparams.last_frames * hparams.num_transformed_images;
        let smallest = encoder_plans.last().unwrap();
        let cdna = nn::linear(
            path / "cdna",
            smallest.out_channels * smallest.height * smallest.width,
            kernel_height * kernel_width * total_kernels,
            Default::default(),
        );
        let identity_bias = kernels::identity_kernel(hparams.kernel_size, path.device())
            .view([1, kernel_height, kernel_width, 1]);

        let final_channels = decoder_plans.last().unwrap().out_channels;
        let scratch_head = hparams.generate_scratch_image.then(|| {
            let scratch_path = path / "scratch";
            ScratchHead {
                conv_h: nn::conv2d(
                    &scratch_path / "conv_h",
                    final_channels,
                    hparams.ngf,
                    3,
                    conv_config(3),
                ),
                norm: InstanceNorm2d::new(&scratch_path / "norm", hparams.ngf, NORM_EPS),
                conv_image: nn::conv2d(
                    &scratch_path / "conv_image",
                    hparams.ngf,
                    image_channels,
                    3,
                    conv_config(3),
                ),
            }
        });

        let num_masks = hparams.num_masks();
        let mask_path = path / "masks";
        let mask_head = MaskHead {
            conv_h: nn::conv2d(
                &mask_path / "conv_h",
                final_channels + num_masks * image_channels,
                hparams.ngf,
                3,
                conv_config(3),
            ),
            norm: InstanceNorm2d::new(&mask_path / "norm", hparams.ngf, NORM_EPS),
            conv_masks: nn::conv2d(&mask_path / "conv_masks", hparams.ngf, num_masks, 3, conv_config(3)),
        };

        info!(
            "built SAVP cell: {} encoder stages, {} decoder stages, {} conv-LSTM states, {} compositing masks",
            encoder_stages.len(),
            decoder_stages.len(),
            conv_rnn_shapes.len(),
            num_masks,
        );

        Ok(SavpCell {
            hparams: hparams.clone(),
            image_channels,
            image_height,
            image_width,
            num_masks,
            conv_rnn_shapes,
            device: path.device(),
            rnn_z,
            encoder_stages,
            decoder_stages,
            cdna,
            identity_bias,
            scratch_head,
            mask_head,
        })
    }
}

#[derive(Debug)]
pub struct SavpCell {
    hparams: SavpHParams,
    image_channels: i64,
    image_height: i64,
    image_width: i64,
    num_masks: i64,
    conv_rnn_shapes: Vec<(i64, i64, i64)>,
    device: Device,
    // modules
    rnn_z: Option<LatentLstm>,
    encoder_stages: Vec<EncoderStage>,
    decoder_stages: Vec<DecoderStage>,
    cdna: Linear,
    identity_bias: Tensor,
    scratch_head: Option<ScratchHead>,
    mask_head: MaskHead,
}

/// Inputs of one timestep: the scheduled input image and, when the latent
/// path is enabled, that step's latent code.
#[derive(Debug, Clone, Copy)]
pub struct SavpCellInput<'a> {
    pub image: &'a Tensor,
    pub zs: Option<&'a Tensor>,
}

#[derive(Debug)]
pub struct SavpCellOutput {
    /// Composited output frame, `[batch, channels, height, width]`.
    pub gen_image: Tensor,
    /// Candidate images in compositing order, `[batch, num_masks, channels,
    /// height, width]`.
    pub transformed_images: Tensor,
    /// Per-pixel convex weights, `[batch, num_masks, height, width]`.
    pub masks: Tensor,
}

/// State bundle threaded through the unroll, consumed and rebuilt per step.
#[derive(Debug)]
pub struct SavpCellState {
    pub time: i64,
    pub gen_image: Tensor,
    /// Sliding window of the last `last_frames` scheduled images, oldest
    /// first.
    pub last_images: Vec<Tensor>,
    pub rnn_z_state: Option<LstmState>,
    pub conv_rnn_states: Vec<LstmState>,
}

impl SavpCellState {
    pub fn shallow_clone(&self) -> Self {
        Self {
            time: self.time,
            gen_image: self.gen_image.shallow_clone(),
            last_images: self
                .last_images
                .iter()
                .map(Tensor::shallow_clone)
                .collect(),
            rnn_z_state: self.rnn_z_state.as_ref().map(LstmState::shallow_clone),
            conv_rnn_states: self
                .conv_rnn_states
                .iter()
                .map(LstmState::shallow_clone)
                .collect(),
        }
    }
}

impl SavpCell {
    pub fn num_masks(&self) -> i64 {
        self.num_masks
    }

    pub fn num_conv_rnn_layers(&self) -> usize {
        self.conv_rnn_shapes.len()
    }

    /// Initial state for a fresh sequence: zero image and recurrent states,
    /// the frame window pre-filled with the first context frame.
    pub fn zero_state(&self, first_image: &Tensor) -> SavpCellState {
        let (batch, _channels, _height, _width) = first_image.size4().unwrap();

        let gen_image = Tensor::zeros(
            &[batch, self.image_channels, self.image_height, self.image_width],
            (Kind::Float, self.device),
        );
        let last_images = (0..self.hparams.last_frames)
            .map(|_| first_image.shallow_clone())
            .collect();
        let rnn_z_state = self.rnn_z.as_ref().map(|rnn_z| rnn_z.zero_state(batch));
        let conv_rnn_states = self
            .conv_rnn_shapes
            .iter()
            .map(|&(channels, height, width)| LstmState {
                h: Tensor::zeros(&[batch, channels, height, width], (Kind::Float, self.device)),
                c: Tensor::zeros(&[batch, channels, height, width], (Kind::Float, self.device)),
            })
            .collect();

        SavpCellState {
            time: 0,
            gen_image,
            last_images,
            rnn_z_state,
            conv_rnn_states,
        }
    }

    /// Runs one timestep. `all_images` is the full (padded) input sequence,
    /// `[time, batch, channels, height, width]`; the cell reads its first
    /// frame, last frame, and context frames for the background candidates.
    pub fn step(
        &self,
        input: SavpCellInput,
        state: SavpCellState,
        all_images: &Tensor,
    ) -> (SavpCellOutput, SavpCellState) {
        let SavpCellState {
            time,
            gen_image: prev_gen_image,
            mut last_images,
            rnn_z_state,
            conv_rnn_states,
        } = state;

        assert_eq!(
            conv_rnn_states.len(),
            self.conv_rnn_shapes.len(),
            "conv-LSTM state count does not match the number of recurrent stages"
        );
        assert_eq!(
            input.zs.is_some(),
            self.hparams.nz > 0,
            "latent code presence does not match nz"
        );

        // scheduled input: ground truth during the context window, the
        // previous generated frame afterwards
        let image = if time < self.hparams.context_frames {
            input.image.shallow_clone()
        } else {
            prev_gen_image
        };
        last_images.remove(0);
        last_images.push(image.shallow_clone());

        // latent code update
        let (latent, next_rnn_z_state) = match (input.zs, &self.rnn_z) {
            (Some(zs), Some(rnn_z)) => {
                let prev = rnn_z_state
                    .as_ref()
                    .expect("latent LSTM state missing from cell state");
                let next = rnn_z.step(zs, prev);
                let code = next.h.shallow_clone();
                (Some(code), Some(next))
            }
            (Some(zs), None) => (Some(zs.shallow_clone()), None),
            (None, None) => (None, None),
            (None, Some(_)) => unreachable!("cell has a latent LSTM but no code was given"),
        };
        let inject = |features: &Tensor| -> Tensor {
            match &latent {
                Some(code) => tile_concat(features, code),
                None => features.shallow_clone(),
            }
        };

        // encoder
        let mut new_conv_rnn_states = Vec::with_capacity(conv_rnn_states.len());
        let mut stage_features = Vec::with_capacity(self.encoder_stages.len());
        let mut h = Tensor::cat(&[&image, &all_images.select(0, 0)], 1);
        for stage in &self.encoder_stages {
            h = inject(&h)
                .apply(&stage.conv)
                .avg_pool2d(&[2, 2], &[2, 2], &[0, 0], false, true, None)
                .apply(&stage.norm)
                .relu();
            if let Some(conv_rnn) = &stage.conv_rnn {
                let prev = &conv_rnn_states[new_conv_rnn_states.len()];
                let next = conv_rnn.step(&inject(&h), prev);
                h = next.h.shallow_clone();
                new_conv_rnn_states.push(next);
            }
            stage_features.push(h.shallow_clone());
        }

        // decoder
        for stage in &self.decoder_stages {
            if let Some(source) = stage.skip_from {
                h = Tensor::cat(&[&h, &stage_features[source]], 1);
            }
            h = inject(&h)
                .upsample_bilinear2d(&[stage.height, stage.width], false, None, None)
                .apply(&stage.conv)
                .apply(&stage.norm)
                .relu();
            if let Some(conv_rnn) = &stage.conv_rnn {
                let prev = &conv_rnn_states[new_conv_rnn_states.len()];
                let next = conv_rnn.step(&inject(&h), prev);
                h = next.h.shallow_clone();
                new_conv_rnn_states.push(next);
            }
        }
        assert_eq!(
            new_conv_rnn_states.len(),
            conv_rnn_states.len(),
            "conv-LSTM state count changed within a step"
        );

        // CDNA kernels from the smallest encoder feature, biased toward the
        // identity transform
        let (batch, _, _, _) = image.size4().unwrap();
        let (kernel_height, kernel_width) = self.hparams.kernel_size;
        let total_kernels = self.hparams.last_frames * self.hparams.num_transformed_images;
        let smallest = &stage_features[self.encoder_stages.len() - 1];
        let cdna_kernels = smallest
            .flatten(1, -1)
            .apply(&self.cdna)
            .view([batch, kernel_height, kernel_width, total_kernels])
            + &self.identity_bias;

        // candidate images, in mask order
        let mut candidates =
            kernels::apply_kernels(&last_images, &cdna_kernels, self.hparams.dilation_rate);
        let hparams = &self.hparams;
        if hparams.prev_image_background {
            candidates.push(image.shallow_clone());
        }
        let sequence_steps = all_images.size()[0];
        if hparams.first_image_background && !hparams.context_images_background {
            candidates.push(all_images.select(0, 0));
        }
        if hparams.last_image_background && !hparams.context_images_background {
            candidates.push(all_images.select(0, sequence_steps - 1));
        }
        if hparams.last_context_image_background && !hparams.context_images_background {
            candidates.push(all_images.select(0, hparams.context_frames - 1));
        }
        if hparams.context_images_background {
            for context_time in 0..hparams.context_frames {
                candidates.push(all_images.select(0, context_time));
            }
        }
        if let Some(scratch) = &self.scratch_head {
            let scratch_image = h
                .apply(&scratch.conv_h)
                .apply(&scratch.norm)
                .relu()
                .apply(&scratch.conv_image)
                .sigmoid();
            candidates.push(scratch_image);
        }
        assert_eq!(
            candidates.len() as i64,
            self.num_masks,
            "candidate image count does not match num_masks"
        );

        // compositing masks: one logit channel per candidate, softmax across
        // candidates so weights sum to 1 at every pixel
        let mut mask_inputs: Vec<&Tensor> = vec![&h];
        mask_inputs.extend(candidates.iter());
        let masks = Tensor::cat(&mask_inputs, 1)
            .apply(&self.mask_head.conv_h)
            .apply(&self.mask_head.norm)
            .relu()
            .apply(&self.mask_head.conv_masks)
            .softmax(1, Kind::Float);

        let transformed_images = Tensor::stack(&candidates, 1);
        let gen_image = (&transformed_images * &masks.unsqueeze(2)).sum_dim_intlist(
            &[1i64][..],
            false,
            Kind::Float,
        );

        let output = SavpCellOutput {
            gen_image: gen_image.shallow_clone(),
            transformed_images,
            masks,
        };
        let next_state = SavpCellState {
            time: time + 1,
            gen_image,
            last_images,
            rnn_z_state: next_rnn_z_state,
            conv_rnn_states: new_conv_rnn_states,
        };
        (output, next_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_hparams() -> SavpHParams {
        SavpHParams {
            context_frames: 2,
            sequence_length: 4,
            ngf: 4,
            nef: 8,
            last_frames: 1,
            num_transformed_images: 1,
            ..Default::default()
        }
    }

    fn build_cell(hparams: &SavpHParams) -> SavpCell {
        let vs = nn::VarStore::new(Device::Cpu);
        SavpCellInit {
            hparams,
            image_channels: 3,
            image_height: 128,
            image_width: 128,
        }
        .build(&vs.root() / "cell")
        .unwrap()
    }

    #[test]
    fn plans_have_five_conv_rnn_stages() {
        let hparams = test_hparams();
        let (encoder, decoder) = plan_stages(&hparams, 3, 128, 128).unwrap();

        assert_eq!(encoder.len(), 4);
        assert_eq!(decoder.len(), 4);
        let rnn_stages = encoder.iter().filter(|plan| plan.conv_rnn).count()
            + decoder.iter().filter(|plan| plan.conv_rnn).count();
        assert_eq!(rnn_stages, 5);

        // resolutions halve down to 8x8 and double back up
        assert_eq!((encoder[3].height, encoder[3].width), (8, 8));
        assert_eq!((decoder[3].height, decoder[3].width), (128, 128));
        assert_eq!(encoder[3].out_channels, hparams.ngf * 8);
        assert_eq!(decoder[3].out_channels, hparams.ngf);

        // skips pair decoder stages with encoder stages in reversed order
        assert_eq!(decoder[0].skip_from, None);
        assert_eq!(decoder[1].skip_from, Some(2));
        assert_eq!(decoder[2].skip_from, Some(1));
        assert_eq!(decoder[3].skip_from, Some(0));
    }

    #[test]
    fn unsupported_resolutions_are_rejected() {
        let hparams = test_hparams();
        assert!(plan_stages(&hparams, 3, 256, 256).is_err());
        assert!(plan_stages(&hparams, 3, 64, 64).is_err());
        assert!(plan_stages(&hparams, 3, 128, 128).is_ok());
    }

    #[test]
    fn step_composites_and_preserves_state_counts() {
        tch::manual_seed(42);
        let hparams = test_hparams();
        let cell = build_cell(&hparams);
        assert_eq!(cell.num_conv_rnn_layers(), 5);

        let all_images = Tensor::rand(&[3, 1, 3, 128, 128], (Kind::Float, Device::Cpu));
        let state = cell.zero_state(&all_images.select(0, 0));
        assert_eq!(state.conv_rnn_states.len(), 5);

        let image = all_images.select(0, 0);
        let zs = Tensor::rand(&[1, hparams.nz], (Kind::Float, Device::Cpu));
        let (output, next_state) = cell.step(
            SavpCellInput {
                image: &image,
                zs: Some(&zs),
            },
            state,
            &all_images,
        );

        // prev_image_background and generate_scratch_image are on by default
        let num_masks = hparams.num_masks();
        assert_eq!(num_masks, 3);
        assert_eq!(output.gen_image.size(), &[1, 3, 128, 128]);
        assert_eq!(output.transformed_images.size(), &[1, num_masks, 3, 128, 128]);
        assert_eq!(output.masks.size(), &[1, num_masks, 128, 128]);

        let mask_sums = output.masks.sum_dim_intlist(&[1i64][..], false, Kind::Float);
        let worst = (mask_sums - 1.0).abs().max().double_value(&[]);
        assert!(worst < 1e-4, "mask sums deviate from 1 by {}", worst);

        assert_eq!(next_state.time, 1);
        assert_eq!(next_state.conv_rnn_states.len(), 5);
        assert!(next_state.rnn_z_state.is_some());
        assert_eq!(next_state.last_images.len(), hparams.last_frames as usize);
    }

    #[test]
    fn background_flags_change_candidates_and_masks_together() {
        tch::manual_seed(42);
        let hparams = SavpHParams {
            context_images_background: true,
            first_image_background: true,
            ..test_hparams()
        };
        let cell = build_cell(&hparams);

        let all_images = Tensor::rand(&[3, 1, 3, 128, 128], (Kind::Float, Device::Cpu));
        let state = cell.zero_state(&all_images.select(0, 0));
        let image = all_images.select(0, 0);
        let zs = Tensor::rand(&[1, hparams.nz], (Kind::Float, Device::Cpu));
        let (output, _) = cell.step(
            SavpCellInput {
                image: &image,
                zs: Some(&zs),
            },
            state,
            &all_images,
        );

        // 1 kernel candidate + prev + 2 context frames + scratch; the
        // first_image flag is superseded by context_images_background
        assert_eq!(hparams.num_masks(), 5);
        assert_eq!(output.masks.size()[1], 5);
        assert_eq!(output.transformed_images.size()[1], 5);
    }

    #[test]
    fn raw_codes_are_injected_without_the_latent_lstm() {
        tch::manual_seed(42);
        let hparams = SavpHParams {
            use_rnn_z: false,
            ..test_hparams()
        };
        let cell = build_cell(&hparams);

        let all_images = Tensor::rand(&[3, 1, 3, 128, 128], (Kind::Float, Device::Cpu));
        let state = cell.zero_state(&all_images.select(0, 0));
        assert!(state.rnn_z_state.is_none());

        let image = all_images.select(0, 0);
        let zs = Tensor::rand(&[1, hparams.nz], (Kind::Float, Device::Cpu));
        let (output, next_state) = cell.step(
            SavpCellInput {
                image: &image,
                zs: Some(&zs),
            },
            state,
            &all_images,
        );
        assert_eq!(output.gen_image.size(), &[1, 3, 128, 128]);
        assert_eq!(output.masks.size()[1], hparams.num_masks());
        assert!(next_state.rnn_z_state.is_none());
        assert_eq!(next_state.conv_rnn_states.len(), 5);
    }

    #[test]
    fn latent_free_cell_runs_without_codes() {
        tch::manual_seed(42);
        let hparams = SavpHParams {
            nz: 0,
            ..test_hparams()
        };
        let cell = build_cell(&hparams);

        let all_images = Tensor::rand(&[3, 1, 3, 128, 128], (Kind::Float, Device::Cpu));
        let state = cell.zero_state(&all_images.select(0, 0));
        assert!(state.rnn_z_state.is_none());

        let image = all_images.select(0, 0);
        let (output, next_state) = cell.step(
            SavpCellInput {
                image: &image,
                zs: None,
            },
            state,
            &all_images,
        );
        assert_eq!(output.gen_image.size(), &[1, 3, 128, 128]);
        assert!(next_state.rnn_z_state.is_none());
    }
}
