use crate::common::*;

// hidden/cell pair shared by the convolutional and the dense cells

#[derive(Debug)]
pub struct LstmState {
    pub h: Tensor,
    pub c: Tensor,
}

impl LstmState {
    pub fn shallow_clone(&self) -> Self {
        Self {
            h: self.h.shallow_clone(),
            c: self.c.shallow_clone(),
        }
    }
}

/// Convolutional LSTM cell: hidden and cell state are spatial feature maps
/// updated one timestep per call.
#[derive(Debug)]
pub struct ConvLstm {
    conv_ih: Conv2D,
    conv_hh: Conv2D,
    out_channels: i64,
    forget_bias: f64,
    device: Device,
}

impl ConvLstm {
    pub fn new<'p, P>(
        path: P,
        in_channels: i64,
        out_channels: i64,
        kernel_size: i64,
        forget_bias: f64,
    ) -> ConvLstm
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        let hidden_channels = 4 * out_channels;
        let conv_config = ConvConfig {
            stride: 1,
            padding: (kernel_size - 1) / 2,
            ..Default::default()
        };

        let conv_ih = nn::conv2d(
            path / "conv_ih",
            in_channels,
            hidden_channels,
            kernel_size,
            conv_config,
        );
        let conv_hh = nn::conv2d(
            path / "conv_hh",
            out_channels,
            hidden_channels,
            kernel_size,
            conv_config,
        );
        let device = path.device();

        ConvLstm {
            conv_ih,
            conv_hh,
            out_channels,
            forget_bias,
            device,
        }
    }

    pub fn zero_state(&self, batch: i64, height: i64, width: i64) -> LstmState {
        let hidden_size = [batch, self.out_channels, height, width];

        let h = Tensor::zeros(&hidden_size, (Kind::Float, self.device));
        let c = Tensor::zeros(&hidden_size, (Kind::Float, self.device));

        LstmState { h, c }
    }

    pub fn step(&self, input: &Tensor, prev_state: &LstmState) -> LstmState {
        let LstmState { h: hx, c: cx } = prev_state;

        let gates = input.apply(&self.conv_ih) + hx.apply(&self.conv_hh);
        let in_gate = gates.narrow(1, 0, self.out_channels).sigmoid();
        let forget_gate = (gates.narrow(1, self.out_channels, self.out_channels)
            + self.forget_bias)
            .sigmoid();
        let cell_gate = gates.narrow(1, 2 * self.out_channels, self.out_channels).tanh();
        let out_gate = gates.narrow(1, 3 * self.out_channels, self.out_channels).sigmoid();

        let cy = forget_gate * cx + in_gate * cell_gate;
        let hy = out_gate * cy.tanh();

        LstmState { h: hy, c: cy }
    }
}

/// Dense LSTM cell for the flat latent code, same gate layout as
/// [`ConvLstm`] with linear maps in place of the convolutions.
#[derive(Debug)]
pub struct LatentLstm {
    linear_ih: Linear,
    linear_hh: Linear,
    out_features: i64,
    forget_bias: f64,
    device: Device,
}

impl LatentLstm {
    pub fn new<'p, P>(path: P, in_features: i64, out_features: i64, forget_bias: f64) -> LatentLstm
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        let hidden_features = 4 * out_features;
        let linear_ih = nn::linear(
            path / "linear_ih",
            in_features,
            hidden_features,
            Default::default(),
        );
        let linear_hh = nn::linear(
            path / "linear_hh",
            out_features,
            hidden_features,
            Default::default(),
        );
        let device = path.device();

        LatentLstm {
            linear_ih,
            linear_hh,
            out_features,
            forget_bias,
            device,
        }
    }

    pub fn zero_state(&self, batch: i64) -> LstmState {
        let hidden_size = [batch, self.out_features];

        let h = Tensor::zeros(&hidden_size, (Kind::Float, self.device));
        let c = Tensor::zeros(&hidden_size, (Kind::Float, self.device));

        LstmState { h, c }
    }

    pub fn step(&self, input: &Tensor, prev_state: &LstmState) -> LstmState {
        let LstmState { h: hx, c: cx } = prev_state;

        let gates = input.apply(&self.linear_ih) + hx.apply(&self.linear_hh);
        let in_gate = gates.narrow(1, 0, self.out_features).sigmoid();
        let forget_gate = (gates.narrow(1, self.out_features, self.out_features)
            + self.forget_bias)
            .sigmoid();
        let cell_gate = gates.narrow(1, 2 * self.out_features, self.out_features).tanh();
        let out_gate = gates.narrow(1, 3 * self.out_features, self.out_features).sigmoid();

        let cy = forget_gate * cx + in_gate * cell_gate;
        let hy = out_gate * cy.tanh();

        LstmState { h: hy, c: cy }
    }
}
