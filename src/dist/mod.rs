use tch::Tensor;

pub trait Rv {
    fn sample(&self) -> Tensor;
    fn log_prob(&self, value: &Tensor) -> Tensor;
}

pub struct Normal<'a> {
    mean: &'a Tensor,
    std: &'a Tensor,
}

impl<'a> Normal<'a> {
    pub fn new(mean: &'a Tensor, std: &'a Tensor) -> Normal<'a> {
        Normal { mean, std }
    }

    /// Reparameterized draw with a caller-supplied standard-normal noise
    /// tensor, so sampling stays differentiable and tests stay reproducible.
    pub fn sample_with(&self, eps: &Tensor) -> Tensor {
        self.mean + self.std * eps
    }
}

impl<'a> Rv for Normal<'a> {
    fn sample(&self) -> Tensor {
        let eps = self.mean.randn_like();
        self.sample_with(&eps)
    }

    fn log_prob(&self, value: &Tensor) -> Tensor {
        let var = self.std.pow_tensor_scalar(2);
        let log_scale = self.std.log();
        -(value - self.mean).pow_tensor_scalar(2) / (2.0 * var)
            - log_scale
            - (2_f64 * std::f64::consts::PI).sqrt().ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    #[test]
    fn sample_with_is_deterministic() {
        let mean = Tensor::full(&[4, 3], 2.0, (Kind::Float, Device::Cpu));
        let std = Tensor::full(&[4, 3], 0.5, (Kind::Float, Device::Cpu));
        let eps = Tensor::ones(&[4, 3], (Kind::Float, Device::Cpu));

        let sample = Normal::new(&mean, &std).sample_with(&eps);
        let expected = Tensor::full(&[4, 3], 2.5, (Kind::Float, Device::Cpu));
        assert!(sample.allclose(&expected, 1e-6, 1e-6, false));
    }

    #[test]
    fn log_prob_peaks_at_mean() {
        let mean = Tensor::zeros(&[1], (Kind::Float, Device::Cpu));
        let std = Tensor::ones(&[1], (Kind::Float, Device::Cpu));
        let normal = Normal::new(&mean, &std);

        let at_mean = normal.log_prob(&mean).double_value(&[0]);
        let away = normal
            .log_prob(&Tensor::full(&[1], 2.0, (Kind::Float, Device::Cpu)))
            .double_value(&[0]);
        assert!(at_mean > away);
    }
}
