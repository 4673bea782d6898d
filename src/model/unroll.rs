//! Unrolls the generation cell over the time axis.

use super::{
    cell::{SavpCell, SavpCellInit, SavpCellInput},
    layers::maybe_pad_or_slice,
};
use crate::{common::*, config::SavpHParams};

/// Time-major outputs of one unroll, `sequence_length - 1` steps each.
#[derive(Debug)]
pub struct SequenceOutputs {
    /// `[time, batch, channels, height, width]`
    pub gen_images: Tensor,
    /// `[time, batch, num_masks, channels, height, width]`
    pub transformed_images: Tensor,
    /// `[time, batch, num_masks, height, width]`
    pub masks: Tensor,
}

impl SequenceOutputs {
    pub fn into_map(self, suffix: &str) -> HashMap<String, Tensor> {
        let Self {
            gen_images,
            transformed_images,
            masks,
        } = self;

        let mut outputs = HashMap::new();
        outputs.insert(format!("gen_images{}", suffix), gen_images);
        outputs.insert(format!("transformed_images{}", suffix), transformed_images);
        outputs.insert(format!("masks{}", suffix), masks);
        outputs
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorGivenZInit<'a> {
    pub hparams: &'a SavpHParams,
    pub image_channels: i64,
    pub image_height: i64,
    pub image_width: i64,
}

impl GeneratorGivenZInit<'_> {
    pub fn build<'p, P>(self, path: P) -> Result<GeneratorGivenZ>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let Self {
            hparams,
            image_channels,
            image_height,
            image_width,
        } = self;

        let cell = SavpCellInit {
            hparams,
            image_channels,
            image_height,
            image_width,
        }
        .build(path.borrow() / "savp_cell")?;

        Ok(GeneratorGivenZ {
            sequence_length: hparams.sequence_length,
            nz: hparams.nz,
            cell,
        })
    }
}

/// Drives [`SavpCell`] across `sequence_length - 1` timesteps, threading the
/// state bundle by move and stacking the per-step outputs time-major.
#[derive(Debug)]
pub struct GeneratorGivenZ {
    sequence_length: i64,
    nz: i64,
    cell: SavpCell,
}

impl GeneratorGivenZ {
    pub fn cell(&self) -> &SavpCell {
        &self.cell
    }

    /// `images` is `[time, batch, channels, height, width]`; `zs` is
    /// `[time, batch, nz]` and required exactly when `nz > 0`. Both are
    /// zero-padded or truncated to `sequence_length - 1` steps.
    pub fn forward(&self, images: &Tensor, zs: Option<&Tensor>) -> SequenceOutputs {
        assert_eq!(
            zs.is_some(),
            self.nz > 0,
            "latent code presence does not match nz"
        );

        let steps = self.sequence_length - 1;
        let images = maybe_pad_or_slice(images, steps);
        let zs = zs.map(|zs| maybe_pad_or_slice(zs, steps));
        debug!("unrolling {} timesteps", steps);

        let mut state = self.cell.zero_state(&images.select(0, 0));
        let mut gen_images = Vec::with_capacity(steps as usize);
        let mut transformed_images = Vec::with_capacity(steps as usize);
        let mut masks = Vec::with_capacity(steps as usize);

        for time in 0..steps {
            let image = images.select(0, time);
            let code = zs.as_ref().map(|zs| zs.select(0, time));
            let (output, next_state) = self.cell.step(
                SavpCellInput {
                    image: &image,
                    zs: code.as_ref(),
                },
                state,
                &images,
            );

            gen_images.push(output.gen_image);
            transformed_images.push(output.transformed_images);
            masks.push(output.masks);
            state = next_state;
        }
        assert_eq!(gen_images.len() as i64, steps);

        SequenceOutputs {
            gen_images: Tensor::stack(&gen_images, 0),
            transformed_images: Tensor::stack(&transformed_images, 0),
            masks: Tensor::stack(&masks, 0),
        }
    }
}
