//! Inverted dropout.
//!
//! During training each element is zeroed with probability `p` and survivors
//! are scaled by `1 / (1 - p)`, so the expected activation is unchanged and
//! evaluation needs no rescaling. During evaluation the layer is the identity.

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::layer::{check_grad_shape, not_cached};
use crate::{Error, Layer, LayerKind, Result, Tensor};

#[derive(Debug, Clone)]
enum Cache {
    /// Realized `0` / `1/(1-p)` mask from a training-mode forward.
    Mask(Tensor),
    /// Evaluation-mode (or `p == 0`) forward: gradient passes through.
    Identity(Vec<usize>),
}

#[derive(Debug, Clone)]
pub struct Dropout {
    p: f64,
    training: bool,
    rng: StdRng,
    cache: Option<Cache>,
}

impl Dropout {
    /// Dropout seeded from system entropy.
    pub fn new(p: f64) -> Result<Self> {
        Self::with_rng(p, StdRng::from_entropy())
    }

    /// Dropout with a deterministic mask sequence.
    pub fn new_with_seed(p: f64, seed: u64) -> Result<Self> {
        Self::with_rng(p, StdRng::seed_from_u64(seed))
    }

    fn with_rng(p: f64, rng: StdRng) -> Result<Self> {
        if !(p.is_finite() && (0.0..1.0).contains(&p)) {
            return Err(Error::InvalidConfig(format!(
                "dropout probability must be finite and in [0,1), got {p}"
            )));
        }
        Ok(Self {
            p,
            training: true,
            rng,
            cache: None,
        })
    }

    #[inline]
    pub fn p(&self) -> f64 {
        self.p
    }

    #[inline]
    pub fn is_training(&self) -> bool {
        self.training
    }
}

impl Layer for Dropout {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        if !self.training || self.p == 0.0 {
            self.cache = Some(Cache::Identity(input.shape().to_vec()));
            return Ok(input.clone());
        }

        let scale = 1.0 / (1.0 - self.p);
        let mut mask = input.zeros_like();
        for m in mask.data_mut() {
            *m = if self.rng.gen_bool(self.p) { 0.0 } else { scale };
        }
        let out = input.mul(&mask)?;
        self.cache = Some(Cache::Mask(mask));
        Ok(out)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        match self.cache.take().ok_or_else(|| not_cached("Dropout"))? {
            Cache::Mask(mask) => {
                check_grad_shape("Dropout", mask.shape(), grad_output)?;
                grad_output.mul(&mask)
            }
            Cache::Identity(shape) => {
                check_grad_shape("Dropout", &shape, grad_output)?;
                Ok(grad_output.clone())
            }
        }
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Dropout { p: self.p }
    }

    fn clear_cache(&mut self) {
        self.cache = None;
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

impl fmt::Display for Dropout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dropout(p={})", self.p)
    }
}
