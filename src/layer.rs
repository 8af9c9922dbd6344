//! The layer contract shared by every computation unit.
//!
//! A layer owns its learnable parameters (if any), the gradients of those
//! parameters, and a transient cache of whatever its backward pass needs.
//!
//! Call order:
//! - `forward` stores the cache (Idle -> Cached)
//! - `backward` consumes it (Cached -> Idle) and overwrites parameter gradients
//! - `clear_cache` drops it unconditionally
//!
//! Calling `backward` while Idle returns `Error::InvalidState`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

use crate::{
    Conv2d, Dropout, Error, Flatten, LeakyReLU, Linear, MaxPool2d, ReLU, Result, SiLU, Sigmoid,
    Softmax, Tensor,
};

/// Process-unique identity of a parametric layer.
///
/// Optimizers key their running statistics by this handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(u64);

impl ParamId {
    /// Allocate a fresh id.
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        ParamId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// A unit of forward/backward computation.
///
/// Parameter accessors return `None` for layers without that parameter.
pub trait Layer: fmt::Debug + fmt::Display + Send {
    /// Compute the layer output and cache what `backward` needs.
    fn forward(&mut self, input: &Tensor) -> Result<Tensor>;

    /// Given `dL/d(output)`, overwrite parameter gradients and return `dL/d(input)`.
    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor>;

    /// Hyperparameters of this layer as a closed tag.
    fn kind(&self) -> LayerKind;

    /// Identity used by optimizers; `None` for parameter-free layers.
    fn param_id(&self) -> Option<ParamId> {
        None
    }

    fn weights(&self) -> Option<&Tensor> {
        None
    }

    fn gradients(&self) -> Option<&Tensor> {
        None
    }

    /// Replace the weights with a copy of `weights` (same shape required).
    fn update_weights(&mut self, _weights: &Tensor) -> Result<()> {
        Err(Error::InvalidState(format!("{self} has no weights")))
    }

    fn biases(&self) -> Option<&Tensor> {
        None
    }

    fn bias_gradients(&self) -> Option<&Tensor> {
        None
    }

    /// Replace the biases with a copy of `biases` (same shape required).
    fn update_biases(&mut self, _biases: &Tensor) -> Result<()> {
        Err(Error::InvalidState(format!("{self} has no biases")))
    }

    /// Release transient forward state.
    fn clear_cache(&mut self);

    /// Switch between training and evaluation behavior. Default: no-op.
    fn set_training(&mut self, _training: bool) {}

    /// Number of learnable scalars.
    fn num_parameters(&self) -> usize {
        self.weights().map_or(0, Tensor::len) + self.biases().map_or(0, Tensor::len)
    }
}

/// Closed set of layer kinds together with their hyperparameters.
///
/// This is what the persistence layer writes next to the learnable tensors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LayerKind {
    Linear {
        in_features: usize,
        out_features: usize,
    },
    Conv2d {
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
    },
    MaxPool2d {
        pool_size: usize,
        stride: usize,
    },
    Flatten,
    Dropout {
        p: f64,
    },
    ReLU,
    LeakyReLU {
        alpha: f64,
    },
    Sigmoid,
    SiLU,
    Softmax,
}

impl LayerKind {
    /// Construct a freshly initialized layer of this kind.
    pub fn build_with_rng<R: Rng + ?Sized>(self, rng: &mut R) -> Result<Box<dyn Layer>> {
        let layer: Box<dyn Layer> = match self {
            LayerKind::Linear {
                in_features,
                out_features,
            } => Box::new(Linear::new_with_rng(in_features, out_features, rng)?),
            LayerKind::Conv2d {
                in_channels,
                out_channels,
                kernel_size,
                stride,
                padding,
            } => Box::new(Conv2d::new_with_rng(
                in_channels,
                out_channels,
                kernel_size,
                stride,
                padding,
                rng,
            )?),
            LayerKind::MaxPool2d { pool_size, stride } => {
                Box::new(MaxPool2d::new(pool_size, stride)?)
            }
            LayerKind::Flatten => Box::new(Flatten::new()),
            LayerKind::Dropout { p } => Box::new(Dropout::new_with_seed(p, rng.gen::<u64>())?),
            LayerKind::ReLU => Box::new(ReLU::new()),
            LayerKind::LeakyReLU { alpha } => Box::new(LeakyReLU::new(alpha)?),
            LayerKind::Sigmoid => Box::new(Sigmoid::new()),
            LayerKind::SiLU => Box::new(SiLU::new()),
            LayerKind::Softmax => Box::new(Softmax::new()),
        };
        Ok(layer)
    }

    /// Whether layers of this kind own weight/bias tensors.
    pub fn has_parameters(self) -> bool {
        matches!(self, LayerKind::Linear { .. } | LayerKind::Conv2d { .. })
    }
}

/// Xavier/Glorot uniform samples in `[-limit, limit)` with
/// `limit = sqrt(6 / (fan_in + fan_out))`.
pub(crate) fn xavier_uniform<R: Rng + ?Sized>(
    fan_in: usize,
    fan_out: usize,
    len: usize,
    rng: &mut R,
) -> Vec<f64> {
    let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
    (0..len).map(|_| rng.gen_range(-limit..limit)).collect()
}

/// Check that `replacement` has the same shape as `current`.
pub(crate) fn check_same_shape(what: &str, current: &Tensor, replacement: &Tensor) -> Result<()> {
    if current.shape() != replacement.shape() {
        return Err(Error::ShapeMismatch(format!(
            "{what} update has shape {:?}, expected {:?}",
            replacement.shape(),
            current.shape()
        )));
    }
    Ok(())
}

/// Check that an upstream gradient matches the shape the forward pass produced.
pub(crate) fn check_grad_shape(layer: &str, expected: &[usize], grad: &Tensor) -> Result<()> {
    if grad.shape() != expected {
        return Err(Error::ShapeMismatch(format!(
            "{layer} backward: gradient shape {:?} does not match forward output shape {expected:?}",
            grad.shape()
        )));
    }
    Ok(())
}

pub(crate) fn not_cached(layer: &str) -> Error {
    Error::InvalidState(format!("{layer} backward called without a preceding forward"))
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn param_ids_are_unique() {
        let a = ParamId::fresh();
        let b = ParamId::fresh();
        assert_ne!(a, b);
    }

    #[test]
    fn xavier_samples_stay_within_limit() {
        let mut rng = StdRng::seed_from_u64(7);
        let w = xavier_uniform(4, 2, 1000, &mut rng);
        let limit = 1.0_f64;
        assert!(w.iter().all(|v| v.abs() <= limit));
        assert!(w.iter().any(|&v| v != 0.0));
    }

    #[test]
    fn kinds_build_matching_layers() {
        let mut rng = StdRng::seed_from_u64(0);
        let kinds = [
            LayerKind::Linear {
                in_features: 3,
                out_features: 2,
            },
            LayerKind::Conv2d {
                in_channels: 1,
                out_channels: 2,
                kernel_size: 3,
                stride: 1,
                padding: 1,
            },
            LayerKind::MaxPool2d {
                pool_size: 2,
                stride: 2,
            },
            LayerKind::Flatten,
            LayerKind::Dropout { p: 0.5 },
            LayerKind::ReLU,
            LayerKind::LeakyReLU { alpha: 0.01 },
            LayerKind::Sigmoid,
            LayerKind::SiLU,
            LayerKind::Softmax,
        ];
        for kind in kinds {
            let layer = kind.build_with_rng(&mut rng).unwrap();
            assert_eq!(layer.kind(), kind);
            assert_eq!(layer.param_id().is_some(), kind.has_parameters());
        }
    }

    #[test]
    fn parameter_free_layers_reject_updates() {
        let mut relu = ReLU::new();
        let w = Tensor::zeros(vec![1, 1]).unwrap();
        assert!(matches!(
            relu.update_weights(&w),
            Err(Error::InvalidState(_))
        ));
        assert!(relu.update_biases(&w).is_err());
        assert_eq!(relu.num_parameters(), 0);
    }
}
