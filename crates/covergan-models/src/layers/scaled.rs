//! Equalized learning rate layers.
//!
//! Weights are drawn from N(0, 1) and rescaled on every forward pass by the
//! He constant `gain / sqrt(max(1, fan_in))`, so every layer sees updates of
//! comparable magnitude regardless of its fan-in. With the dynamic scale
//! disabled the constant is folded into the initial weights instead, which
//! yields an ordinary He-initialized layer.

use mlx_rs::{error::Exception, macros::ModuleParameters, module::Param, Array};

/// Default gain (He initialization for leaky/ReLU activations).
pub const DEFAULT_GAIN: f32 = std::f32::consts::SQRT_2;

/// He scaling constant for a layer with `fan_in` input connections.
pub fn he_scale(gain: f32, fan_in: i32) -> f32 {
    gain / (fan_in.max(1) as f32).sqrt()
}

/// 2D convolution with runtime weight scaling.
///
/// Stride 1 and "same" padding, as used by every convolution of the
/// progressive networks.
#[derive(Debug, ModuleParameters)]
pub struct ScaledConv2d {
    /// Weight [out_channels, in_channels, kernel, kernel].
    #[param]
    pub weight: Param<Array>,
    /// Bias [out_channels].
    #[param]
    pub bias: Param<Array>,
    /// Input channels.
    pub in_channels: i32,
    /// Output channels.
    pub out_channels: i32,
    /// Square kernel size.
    pub kernel_size: i32,
    /// Runtime weight multiplier (1.0 when the dynamic scale is disabled).
    pub scale: f32,
    /// Whether the weight is rescaled on every forward pass.
    pub dynamic: bool,
}

impl ScaledConv2d {
    /// Create a new scaled convolution.
    ///
    /// # Arguments
    /// * `gain` - He gain, defaults to sqrt(2)
    /// * `dynamic` - Rescale weights at runtime (equalized learning rate)
    pub fn new(
        in_channels: i32,
        out_channels: i32,
        kernel_size: i32,
        gain: Option<f32>,
        dynamic: bool,
    ) -> Result<Self, Exception> {
        let fan_in = kernel_size * kernel_size * in_channels;
        let he = he_scale(gain.unwrap_or(DEFAULT_GAIN), fan_in);

        let weight = mlx_rs::random::normal::<f32>(
            &[out_channels, in_channels, kernel_size, kernel_size],
            None,
            None,
            None,
        )?;
        let (weight, scale) = if dynamic {
            (weight, he)
        } else {
            (weight.multiply(&Array::from_f32(he))?, 1.0)
        };

        Ok(Self {
            weight: Param::new(weight),
            bias: Param::new(mlx_rs::ops::zeros::<f32>(&[out_channels])?),
            in_channels,
            out_channels,
            kernel_size,
            scale,
            dynamic,
        })
    }

    /// Number of input connections per output unit.
    pub fn fan_in(&self) -> i32 {
        self.kernel_size * self.kernel_size * self.in_channels
    }

    /// Constant applied to the stored weight on every forward pass.
    pub fn effective_gain(&self) -> f32 {
        self.scale
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// * `x` - Input [batch, in_channels, height, width] (NCHW)
    pub fn forward(&self, x: &Array) -> Result<Array, Exception> {
        let weight = if self.dynamic {
            self.weight.as_ref().multiply(&Array::from_f32(self.scale))?
        } else {
            self.weight.as_ref().clone()
        };

        // MLX conv2d works on NHWC input and [out, kh, kw, in] weights.
        let x_nhwc = x.transpose_axes(&[0, 2, 3, 1])?;
        let weight_ohwi = weight.transpose_axes(&[0, 2, 3, 1])?;

        let pad = self.kernel_size / 2;
        let y = mlx_rs::ops::conv2d(&x_nhwc, &weight_ohwi, (1, 1), (pad, pad), (1, 1), 1)?;
        let y = y.add(self.bias.as_ref())?;

        y.transpose_axes(&[0, 3, 1, 2])
    }
}

/// Dense layer with runtime weight scaling and an optional learning-rate
/// multiplier (used by the style mapping network).
#[derive(Debug, ModuleParameters)]
pub struct ScaledDense {
    /// Weight [out_features, in_features].
    #[param]
    pub weight: Param<Array>,
    /// Bias [out_features].
    #[param]
    pub bias: Param<Array>,
    /// Input features.
    pub in_features: i32,
    /// Output features.
    pub out_features: i32,
    /// He constant (1.0 when the dynamic scale is disabled).
    pub scale: f32,
    /// Learning-rate multiplier applied to weight and bias.
    pub lr_multiplier: f32,
    /// Whether the weight is rescaled on every forward pass.
    pub dynamic: bool,
}

impl ScaledDense {
    /// Create a new scaled dense layer.
    pub fn new(
        in_features: i32,
        out_features: i32,
        gain: Option<f32>,
        dynamic: bool,
        lr_multiplier: f32,
    ) -> Result<Self, Exception> {
        let he = he_scale(gain.unwrap_or(DEFAULT_GAIN), in_features);

        // Stored weights are divided by the multiplier so the effective
        // initial weight does not depend on it.
        let init_scale = if dynamic { 1.0 } else { he } / lr_multiplier;
        let weight = mlx_rs::random::normal::<f32>(&[out_features, in_features], None, None, None)?
            .multiply(&Array::from_f32(init_scale))?;

        Ok(Self {
            weight: Param::new(weight),
            bias: Param::new(mlx_rs::ops::zeros::<f32>(&[out_features])?),
            in_features,
            out_features,
            scale: if dynamic { he } else { 1.0 },
            lr_multiplier,
            dynamic,
        })
    }

    /// Constant applied to the stored weight on every forward pass,
    /// excluding the learning-rate multiplier.
    pub fn effective_gain(&self) -> f32 {
        self.scale
    }

    /// Forward pass on [batch, ..., in_features].
    pub fn forward(&self, x: &Array) -> Result<Array, Exception> {
        let weight = self
            .weight
            .as_ref()
            .multiply(&Array::from_f32(self.scale * self.lr_multiplier))?;
        let bias = self
            .bias
            .as_ref()
            .multiply(&Array::from_f32(self.lr_multiplier))?;

        x.matmul(&weight.transpose_axes(&[1, 0])?)?.add(&bias)
    }
}
