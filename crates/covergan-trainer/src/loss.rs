//! Wasserstein losses and the critic gradient penalty.
//!
//! The critic is trained on `labels · predictions` with label -1 for real and
//! +1 for generated images, so minimizing the loss pushes real scores up and
//! fake scores down. The gradient penalty keeps the critic close to
//! 1-Lipschitz on random interpolations between real and generated batches.

use mlx_rs::error::Exception;
use mlx_rs::Array;

/// Label attached to real images.
pub const REAL_LABEL: f32 = -1.0;

/// Label attached to generated images.
pub const FAKE_LABEL: f32 = 1.0;

/// Added under the square root of the gradient norm.
const NORM_EPS: f32 = 1e-12;

/// Mean of `labels · predictions`.
pub fn wasserstein_loss(labels: &Array, predictions: &Array) -> Result<Array, Exception> {
    labels.multiply(predictions)?.mean(None)
}

/// Wasserstein loss against a constant label.
pub fn wasserstein_loss_for(label: f32, predictions: &Array) -> Result<Array, Exception> {
    wasserstein_loss(&Array::from_f32(label), predictions)
}

/// Per-sample L2 norm of the gradient of `sum(critic(x))` with respect to `x`.
///
/// Returns an array of shape `[batch]`.
pub fn critic_gradient_norms<F>(critic: F, inputs: &Array) -> Result<Array, Exception>
where
    F: FnMut(&Array) -> Result<Array, Exception>,
{
    let mut critic = critic;
    let summed = move |x: &Array| -> Result<Array, Exception> { critic(x)?.sum(None) };
    let mut grad_fn = mlx_rs::transforms::grad(summed);
    let grads = grad_fn(inputs)?;

    let batch = grads.dim(0);
    grads
        .reshape(&[batch, -1])?
        .square()?
        .sum_axis(1, None)?
        .add(&Array::from_f32(NORM_EPS))?
        .sqrt()
}

/// `weight · mean((‖∇ₓ critic(x)‖₂ − 1)²)` over the batch of `interpolated` inputs.
pub fn gradient_penalty<F>(critic: F, interpolated: &Array, weight: f32) -> Result<Array, Exception>
where
    F: FnMut(&Array) -> Result<Array, Exception>,
{
    let norms = critic_gradient_norms(critic, interpolated)?;
    norms
        .subtract(&Array::from_f32(1.0))?
        .square()?
        .mean(None)?
        .multiply(&Array::from_f32(weight))
}

/// Random per-sample interpolation `eps·real + (1 − eps)·fake`, `eps ~ U(0, 1)`.
///
/// `eps` is drawn with `key` when given, from the global generator otherwise.
pub fn interpolate(real: &Array, fake: &Array, key: Option<&Array>) -> Result<Array, Exception> {
    let batch = real.dim(0);
    let eps = mlx_rs::random::uniform::<_, f32>(0.0, 1.0, &[batch, 1, 1, 1], key)?;
    let one_minus = Array::from_f32(1.0).subtract(&eps)?;
    real.multiply(&eps)?.add(&fake.multiply(&one_minus)?)
}

/// Components of one critic update.
#[derive(Debug, Clone)]
pub struct DiscriminatorLossOutput {
    /// Sum of the three components, the value that was minimized.
    pub total: Array,
    /// Loss on real images.
    pub positives: Array,
    /// Loss on generated images.
    pub negatives: Array,
    /// Weighted gradient penalty.
    pub gradient_penalty: Array,
}

impl DiscriminatorLossOutput {
    /// Combine the three components.
    pub fn new(positives: Array, negatives: Array, gradient_penalty: Array) -> Result<Self, Exception> {
        let total = positives.add(&negatives)?.add(&gradient_penalty)?;
        Ok(Self {
            total,
            positives,
            negatives,
            gradient_penalty,
        })
    }

    /// Evaluate and read back `(total, positives, negatives, gradient_penalty)`.
    pub fn scalars(&self) -> Result<[f32; 4], Exception> {
        let mut values = [0.0; 4];
        for (slot, array) in values.iter_mut().zip([
            &self.total,
            &self.positives,
            &self.negatives,
            &self.gradient_penalty,
        ]) {
            array.eval()?;
            *slot = array.item::<f32>();
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wasserstein_loss_signs() {
        let preds = Array::from_slice(&[1.0_f32, 3.0], &[2, 1]);
        let real = wasserstein_loss_for(REAL_LABEL, &preds).unwrap();
        let fake = wasserstein_loss_for(FAKE_LABEL, &preds).unwrap();
        assert!((real.item::<f32>() + 2.0).abs() < 1e-6);
        assert!((fake.item::<f32>() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_gradient_norm_of_linear_critic() {
        // critic(x) = k * sum(x) per sample has gradient k everywhere.
        let k = 0.5_f32;
        let x = mlx_rs::random::normal::<f32>(&[3, 2, 4, 4], None, None, None).unwrap();
        let critic = |x: &Array| -> Result<Array, Exception> {
            x.reshape(&[x.dim(0), -1])?
                .sum_axis(1, true)?
                .multiply(&Array::from_f32(k))
        };
        let norms = critic_gradient_norms(critic, &x).unwrap();
        assert_eq!(norms.shape(), &[3]);
        let expected = k * (2.0_f32 * 4.0 * 4.0).sqrt();
        for &n in norms.as_slice::<f32>() {
            assert!((n - expected).abs() < 1e-4, "{} != {}", n, expected);
        }
    }

    #[test]
    fn test_gradient_penalty_of_unit_critic_vanishes() {
        // Gradient norm is exactly 1 when k = 1 / sqrt(D).
        let x = mlx_rs::random::normal::<f32>(&[4, 1, 2, 2], None, None, None).unwrap();
        let critic = |x: &Array| -> Result<Array, Exception> {
            x.reshape(&[x.dim(0), -1])?
                .sum_axis(1, true)?
                .multiply(&Array::from_f32(0.5))
        };
        let gp = gradient_penalty(critic, &x, 10.0).unwrap();
        assert!(gp.item::<f32>().abs() < 1e-5);

        let doubled = |x: &Array| -> Result<Array, Exception> {
            x.reshape(&[x.dim(0), -1])?.sum_axis(1, true)
        };
        // Norm 2, penalty weight * (2 - 1)^2.
        let gp = gradient_penalty(doubled, &x, 10.0).unwrap();
        assert!((gp.item::<f32>() - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_interpolation_stays_between_inputs() {
        let real = mlx_rs::ops::ones::<f32>(&[5, 1, 2, 2]).unwrap();
        let fake = mlx_rs::ops::zeros::<f32>(&[5, 1, 2, 2]).unwrap();
        let mixed = interpolate(&real, &fake, None).unwrap();
        assert_eq!(mixed.shape(), &[5, 1, 2, 2]);
        for &v in mixed.as_slice::<f32>() {
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_keyed_interpolation_is_reproducible() {
        let real = mlx_rs::ops::ones::<f32>(&[6, 1, 2, 2]).unwrap();
        let fake = mlx_rs::ops::zeros::<f32>(&[6, 1, 2, 2]).unwrap();
        let key = mlx_rs::random::key(17).unwrap();
        let a = interpolate(&real, &fake, Some(&key)).unwrap();
        let b = interpolate(&real, &fake, Some(&key)).unwrap();
        assert_eq!(a.as_slice::<f32>(), b.as_slice::<f32>());

        let other = mlx_rs::random::key(18).unwrap();
        let c = interpolate(&real, &fake, Some(&other)).unwrap();
        assert_ne!(a.as_slice::<f32>(), c.as_slice::<f32>());
    }

    #[test]
    fn test_loss_output_total() {
        let out = DiscriminatorLossOutput::new(
            Array::from_f32(-1.0),
            Array::from_f32(0.5),
            Array::from_f32(2.0),
        )
        .unwrap();
        let [total, pos, neg, gp] = out.scalars().unwrap();
        assert!((total - 1.5).abs() < 1e-6);
        assert_eq!((pos, neg, gp), (-1.0, 0.5, 2.0));
    }
}
