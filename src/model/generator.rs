//! Latent sampling orchestration: posterior/prior encoders over frame
//! pairs, reparameterized draws, and the three unrolls (posterior-,
//! prior-, and multi-sample-prior-conditioned) whose outputs are merged
//! into one named map.

use super::{
    layers::{maybe_pad_or_slice, InstanceNorm2d},
    unroll::{GeneratorGivenZ, GeneratorGivenZInit},
};
use crate::{
    common::*,
    config::{Mode, SavpHParams},
    dist::Normal,
};

/// Per-timestep latent mean/log-variance produced by a posterior or prior
/// encoder, `[time, batch, nz]` each.
#[derive(Debug)]
pub struct LatentDist {
    pub zs_mu: Tensor,
    pub zs_log_sigma_sq: Tensor,
}

impl LatentDist {
    /// Reparameterized draw `mu + sqrt(exp(log_sigma_sq)) * eps` with fresh
    /// standard-normal noise.
    pub fn sample(&self) -> Tensor {
        self.sample_with(&self.zs_mu.randn_like())
    }

    /// Same draw with caller-supplied noise, for reproducible tests.
    pub fn sample_with(&self, eps: &Tensor) -> Tensor {
        let std = (&self.zs_log_sigma_sq * 0.5).exp();
        Normal::new(&self.zs_mu, &std).sample_with(eps)
    }

    pub fn into_map(self, suffix: &str) -> HashMap<String, Tensor> {
        let Self {
            zs_mu,
            zs_log_sigma_sq,
        } = self;

        let mut outputs = HashMap::new();
        outputs.insert(format!("zs_mu{}", suffix), zs_mu);
        outputs.insert(format!("zs_log_sigma_sq{}", suffix), zs_log_sigma_sq);
        outputs
    }
}

/// Convolutional encoder over adjacent frame pairs producing one latent
/// mean/log-variance pair per frame transition. Used both as the posterior
/// encoder and, when the prior is learned, as the prior network.
#[derive(Debug)]
pub struct FrameEncoder {
    convs: Vec<(Conv2D, Option<InstanceNorm2d>)>,
    fc_mu: Linear,
    fc_log_sigma_sq: Linear,
    nz: i64,
}

impl FrameEncoder {
    const NORM_EPS: f64 = 1e-6;

    pub fn new<'p, P>(path: P, in_channels: i64, nef: i64, nz: i64) -> FrameEncoder
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        let conv_config = ConvConfig {
            stride: 2,
            padding: 1,
            ..Default::default()
        };
        let widths = [(in_channels, nef), (nef, nef * 2), (nef * 2, nef * 4)];
        let convs = widths
            .iter()
            .enumerate()
            .map(|(index, &(conv_in, conv_out))| {
                let layer_path = path / format!("layer_{}", index);
                let conv = nn::conv2d(&layer_path / "conv", conv_in, conv_out, 4, conv_config);
                // the first layer runs on raw pixels and is left unnormalized
                let norm = (index > 0)
                    .then(|| InstanceNorm2d::new(&layer_path / "norm", conv_out, Self::NORM_EPS));
                (conv, norm)
            })
            .collect();

        let fc_mu = nn::linear(path / "fc_mu", nef * 4, nz, Default::default());
        let fc_log_sigma_sq =
            nn::linear(path / "fc_log_sigma_sq", nef * 4, nz, Default::default());

        FrameEncoder {
            convs,
            fc_mu,
            fc_log_sigma_sq,
            nz,
        }
    }

    /// `images` is `[time, batch, channels, height, width]`; returns
    /// statistics for the `time - 1` adjacent-frame transitions.
    pub fn forward(&self, images: &Tensor) -> LatentDist {
        let (time, batch, channels, height, width) = images.size5().unwrap();

        let pairs = Tensor::cat(
            &[images.narrow(0, 0, time - 1), images.narrow(0, 1, time - 1)],
            2,
        )
        .view([(time - 1) * batch, channels * 2, height, width]);

        let mut features = pairs;
        for (conv, norm) in &self.convs {
            features = features.apply(conv);
            if let Some(norm) = norm {
                features = features.apply(norm);
            }
            features = features.relu();
        }
        let pooled = features.mean_dim(&[2i64, 3][..], false, Kind::Float);

        let zs_mu = pooled.apply(&self.fc_mu).view([time - 1, batch, self.nz]);
        let zs_log_sigma_sq = pooled
            .apply(&self.fc_log_sigma_sq)
            .view([time - 1, batch, self.nz]);

        LatentDist {
            zs_mu,
            zs_log_sigma_sq,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorInit<'a> {
    pub hparams: &'a SavpHParams,
    pub mode: Mode,
    pub image_channels: i64,
    pub image_height: i64,
    pub image_width: i64,
}

impl GeneratorInit<'_> {
    pub fn build<'p, P>(self, path: P) -> Result<Generator>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let Self {
            hparams,
            mode,
            image_channels,
            image_height,
            image_width,
        } = self;

        hparams.validate()?;
        let unroller = GeneratorGivenZInit {
            hparams,
            image_channels,
            image_height,
            image_width,
        }
        .build(path / "generator_given_z")?;

        let encoder = (hparams.nz > 0).then(|| {
            FrameEncoder::new(path / "encoder", image_channels * 2, hparams.nef, hparams.nz)
        });
        let prior = (hparams.nz > 0 && hparams.learn_prior).then(|| {
            FrameEncoder::new(path / "prior", image_channels * 2, hparams.nef, hparams.nz)
        });

        info!(
            "built SAVP generator in {:?} mode, nz {}, {} prior",
            mode,
            hparams.nz,
            if prior.is_some() { "learned" } else { "fixed" },
        );

        Ok(Generator {
            hparams: hparams.clone(),
            mode,
            unroller,
            encoder,
            prior,
        })
    }
}

#[derive(Debug)]
pub struct Generator {
    hparams: SavpHParams,
    mode: Mode,
    unroller: GeneratorGivenZ,
    encoder: Option<FrameEncoder>,
    prior: Option<FrameEncoder>,
}

impl Generator {
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn unroller(&self) -> &GeneratorGivenZ {
        &self.unroller
    }

    /// Posterior statistics and draw, plus the prior draw (learned prior
    /// statistics when one is configured). Without a learned prior the
    /// context-window steps reuse the posterior draws, so prior- and
    /// posterior-conditioned generation agree while ground truth is fed.
    fn latent_codes(&self, images: &Tensor) -> (LatentDist, Tensor, Option<LatentDist>, Tensor) {
        let hparams = &self.hparams;
        let encoder = self
            .encoder
            .as_ref()
            .expect("latent codes requested from a generator without an encoder");

        let outputs_enc = encoder.forward(images);
        let zs_enc = outputs_enc.sample();

        match &self.prior {
            Some(prior) => {
                let outputs_prior = prior.forward(images);
                let zs_prior = outputs_prior.sample();
                (outputs_enc, zs_enc, Some(outputs_prior), zs_prior)
            }
            None => {
                let batch = images.size()[1];
                let noise = Tensor::randn(
                    &[
                        hparams.sequence_length - hparams.context_frames,
                        batch,
                        hparams.nz,
                    ],
                    (Kind::Float, images.device()),
                );
                let zs_prior = Tensor::cat(
                    &[zs_enc.narrow(0, 0, hparams.context_frames - 1), noise],
                    0,
                );
                (outputs_enc, zs_enc, None, zs_prior)
            }
        }
    }

    /// Draws `num_samples` independent prior codes per sequence, tiled
    /// sample-major along the batch axis. A learned prior supplies the
    /// statistics for every draw; the fixed prior is a standard normal.
    fn sample_prior_codes(
        &self,
        outputs_prior: Option<&LatentDist>,
        batch: i64,
        device: Device,
    ) -> Tensor {
        let hparams = &self.hparams;
        match outputs_prior {
            Some(prior) => {
                let tiled = LatentDist {
                    zs_mu: prior.zs_mu.repeat(&[1, hparams.num_samples, 1]),
                    zs_log_sigma_sq: prior.zs_log_sigma_sq.repeat(&[1, hparams.num_samples, 1]),
                };
                tiled.sample()
            }
            None => Tensor::randn(
                &[
                    hparams.sequence_length - 1,
                    hparams.num_samples * batch,
                    hparams.nz,
                ],
                (Kind::Float, device),
            ),
        }
    }

    /// Runs the full generation pass over `images`,
    /// `[time, batch, channels, height, width]`.
    ///
    /// With `nz == 0` this short-circuits to a single deterministic unroll.
    /// Otherwise the returned map holds the prior-conditioned outputs
    /// (unsuffixed, the primary prediction), posterior-conditioned outputs
    /// (`_enc`), latent statistics (`zs_mu`, `zs_log_sigma_sq`, learned
    /// prior ones with `_prior`), and the multi-sample diversity estimates
    /// (`gen_images_samples`, `gen_images_samples_avg`).
    pub fn forward(&self, images: &Tensor) -> Result<HashMap<String, Tensor>> {
        let hparams = &self.hparams;
        let images = maybe_pad_or_slice(images, hparams.sequence_length);

        if hparams.nz == 0 {
            return Ok(self.unroller.forward(&images, None).into_map(""));
        }

        let (outputs_enc, zs_enc, outputs_prior, zs_prior) = self.latent_codes(&images);
        let gen_outputs_posterior = self.unroller.forward(&images, Some(&zs_enc));
        let gen_outputs = self.unroller.forward(&images, Some(&zs_prior));

        let batch = images.size()[1];
        let zs_samples = self.sample_prior_codes(outputs_prior.as_ref(), batch, images.device());

        let mut outputs = HashMap::new();
        if let Some(outputs_prior) = outputs_prior {
            merge_outputs(&mut outputs, outputs_prior.into_map("_prior"))?;
        }
        merge_outputs(&mut outputs, gen_outputs.into_map(""))?;
        merge_outputs(&mut outputs, outputs_enc.into_map(""))?;
        merge_outputs(&mut outputs, gen_outputs_posterior.into_map("_enc"))?;

        // parallel prior draws, flattened into the batch axis for a single
        // unroll and unflattened into a trailing sample axis
        let num_samples = hparams.num_samples;
        let images_samples = images.repeat(&[1, num_samples, 1, 1, 1]);
        let gen_images_samples = self
            .unroller
            .forward(&images_samples, Some(&zs_samples))
            .gen_images;
        let gen_images_samples = Tensor::stack(&gen_images_samples.chunk(num_samples, 1), 5);
        let gen_images_samples_avg = gen_images_samples.mean_dim(&[5i64][..], false, Kind::Float);

        let mut samples = HashMap::new();
        samples.insert("gen_images_samples".to_string(), gen_images_samples);
        samples.insert("gen_images_samples_avg".to_string(), gen_images_samples_avg);
        merge_outputs(&mut outputs, samples)?;

        Ok(outputs)
    }
}

/// Moves `additions` into `outputs`; a repeated key would silently drop an
/// output, so it is a fatal error.
fn merge_outputs(
    outputs: &mut HashMap<String, Tensor>,
    additions: HashMap<String, Tensor>,
) -> Result<()> {
    for (name, tensor) in additions {
        ensure!(
            !outputs.contains_key(&name),
            "output key {} would be overwritten during merge",
            name
        );
        outputs.insert(name, tensor);
    }
    Ok(())
}
