use crate::common::*;

/// Execution mode of the model. Anything other than `train` or `test` is a
/// configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Train,
    Test,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(text: &str) -> Result<Self> {
        let mode = match text {
            "train" => Mode::Train,
            "test" => Mode::Test,
            other => bail!("mode must be train or test, but {} given", other),
        };
        Ok(mode)
    }
}

/// Hyperparameters of the SAVP generator.
///
/// The struct is validated once by [`SavpHParams::validate`] and then shared
/// read-only by every component. `context_frames` and `sequence_length`
/// default to the `-1` sentinel and must be set by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SavpHParams {
    /// Number of ground-truth frames fed to the cell before prediction
    /// starts. Must be specified.
    pub context_frames: i64,
    /// Total number of frames in a sequence, context included; the model
    /// predicts `sequence_length - context_frames` future frames. Must be
    /// specified.
    pub sequence_length: i64,
    /// Latent code dimensionality. Zero disables the latent path.
    pub nz: i64,
    /// Base channel width of the generation cell.
    pub ngf: i64,
    /// Base channel width of the posterior/prior frame encoder.
    pub nef: i64,
    /// Spatial size of the CDNA transformation kernels.
    pub kernel_size: (i64, i64),
    /// Dilation applied when the CDNA kernels are convolved with a frame.
    pub dilation_rate: i64,
    /// Length of the sliding window of frames the CDNA kernels transform.
    pub last_frames: i64,
    /// Number of kernel-transformed candidates produced per window frame.
    pub num_transformed_images: i64,
    /// Number of parallel prior draws used to estimate prediction diversity.
    pub num_samples: i64,
    /// Learn the prior with a second frame encoder instead of sampling a
    /// standard normal.
    pub learn_prior: bool,
    /// Route the latent code through a single-step LSTM before injection.
    pub use_rnn_z: bool,
    /// Composite over the previous (input or generated) frame.
    pub prev_image_background: bool,
    /// Composite over the first frame of the input sequence.
    pub first_image_background: bool,
    /// Composite over the last frame of the input sequence.
    pub last_image_background: bool,
    /// Composite over the last context frame.
    pub last_context_image_background: bool,
    /// Composite over every context frame; supersedes the three
    /// single-frame background flags above.
    pub context_images_background: bool,
    /// Add a fully synthesized (non-transformed) candidate image.
    pub generate_scratch_image: bool,
}

impl Default for SavpHParams {
    fn default() -> Self {
        Self {
            context_frames: -1,
            sequence_length: -1,
            nz: 8,
            ngf: 32,
            nef: 64,
            kernel_size: (5, 5),
            dilation_rate: 1,
            last_frames: 1,
            num_transformed_images: 4,
            num_samples: 8,
            learn_prior: false,
            use_rnn_z: true,
            prev_image_background: true,
            first_image_background: false,
            last_image_background: false,
            last_context_image_background: false,
            context_images_background: false,
            generate_scratch_image: true,
        }
    }
}

impl SavpHParams {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let text = fs::read_to_string(path)?;
        let hparams: Self = json5::from_str(&text)?;
        hparams.validate()?;
        Ok(hparams)
    }

    /// Checks the hyperparameter set once, before any tensor computation.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.context_frames > 0,
            "invalid context_frames {}, it might have to be specified",
            self.context_frames
        );
        ensure!(
            self.sequence_length > 0,
            "invalid sequence_length {}, it might have to be specified",
            self.sequence_length
        );
        ensure!(
            self.sequence_length > self.context_frames,
            "sequence_length {} must exceed context_frames {}",
            self.sequence_length,
            self.context_frames
        );
        ensure!(self.nz >= 0, "nz must be non-negative, got {}", self.nz);
        ensure!(self.ngf > 0, "ngf must be positive, got {}", self.ngf);
        ensure!(self.nef > 0, "nef must be positive, got {}", self.nef);
        let (kh, kw) = self.kernel_size;
        ensure!(
            kh > 0 && kw > 0,
            "kernel_size must be positive, got ({}, {})",
            kh,
            kw
        );
        ensure!(
            self.dilation_rate >= 1,
            "dilation_rate must be at least 1, got {}",
            self.dilation_rate
        );
        ensure!(
            self.last_frames >= 1,
            "last_frames must be at least 1, got {}",
            self.last_frames
        );
        ensure!(
            self.num_transformed_images >= 1,
            "num_transformed_images must be at least 1, got {}",
            self.num_transformed_images
        );
        ensure!(
            self.num_samples >= 1,
            "num_samples must be at least 1, got {}",
            self.num_samples
        );
        Ok(())
    }

    /// Total number of compositing candidates, and therefore mask channels.
    ///
    /// The cell's candidate assembly must agree with this count exactly.
    pub fn num_masks(&self) -> i64 {
        let single_frame_backgrounds = if self.context_images_background {
            0
        } else {
            self.first_image_background as i64
                + self.last_image_background as i64
                + self.last_context_image_background as i64
        };
        let context_backgrounds = if self.context_images_background {
            self.context_frames
        } else {
            0
        };

        self.last_frames * self.num_transformed_images
            + self.prev_image_background as i64
            + single_frame_backgrounds
            + context_backgrounds
            + self.generate_scratch_image as i64
    }
}
