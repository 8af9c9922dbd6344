//! Optimizers.
//!
//! An optimizer turns `(parameter, gradient)` into an updated parameter and
//! may keep running statistics between calls (momentum velocity, Adam
//! moments). Those statistics are keyed according to [`StateKeying`].
//!
//! Design notes:
//! - The optimizer never mutates a parameter in place; it returns a new tensor
//!   which the caller hands back via `Layer::update_weights` / `update_biases`.
//! - Shapes are checked before any state is created or touched.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;

use log::debug;

use crate::{Error, ParamId, Result, Tensor};

/// How running statistics are associated with parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateKeying {
    /// One state entry per parameter tensor, keyed by its layer's [`ParamId`].
    #[default]
    PerParameter,
    /// One state entry per `(weights|biases, shape)` pair.
    ///
    /// Distinct parameters of identical shape share (and corrupt) each
    /// other's statistics. Only useful to reproduce models trained that way.
    ByShape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Weights,
    Biases,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum StateKey {
    Param(ParamId, Slot),
    Shape(Slot, Vec<usize>),
}

impl StateKeying {
    fn key(self, id: ParamId, slot: Slot, shape: &[usize]) -> StateKey {
        match self {
            StateKeying::PerParameter => StateKey::Param(id, slot),
            StateKeying::ByShape => StateKey::Shape(slot, shape.to_vec()),
        }
    }
}

/// Serializable optimizer hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(tag = "kind", rename_all = "snake_case")
)]
pub enum OptimizerConfig {
    Sgd {
        lr: f64,
    },
    SgdMomentum {
        lr: f64,
        momentum: f64,
    },
    Adam {
        lr: f64,
        beta1: f64,
        beta2: f64,
        eps: f64,
    },
}

impl OptimizerConfig {
    /// Validate hyperparameters.
    pub fn validate(&self) -> Result<()> {
        match *self {
            OptimizerConfig::Sgd { lr } => validate_lr(lr),
            OptimizerConfig::SgdMomentum { lr, momentum } => {
                validate_lr(lr)?;
                validate_unit("momentum", momentum)
            }
            OptimizerConfig::Adam {
                lr,
                beta1,
                beta2,
                eps,
            } => {
                validate_lr(lr)?;
                validate_unit("adam beta1", beta1)?;
                validate_unit("adam beta2", beta2)?;
                if !(eps.is_finite() && eps > 0.0) {
                    return Err(Error::InvalidConfig(format!(
                        "adam eps must be finite and > 0, got {eps}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Build a fresh optimizer (empty state, per-parameter keying).
    pub fn build(&self) -> Result<Box<dyn Optimizer>> {
        self.build_with_keying(StateKeying::default())
    }

    pub fn build_with_keying(&self, keying: StateKeying) -> Result<Box<dyn Optimizer>> {
        let optimizer: Box<dyn Optimizer> = match *self {
            OptimizerConfig::Sgd { lr } => Box::new(Sgd::new(lr)?),
            OptimizerConfig::SgdMomentum { lr, momentum } => {
                Box::new(SgdMomentum::new(lr, momentum)?.with_keying(keying))
            }
            OptimizerConfig::Adam {
                lr,
                beta1,
                beta2,
                eps,
            } => Box::new(Adam::new(lr, beta1, beta2, eps)?.with_keying(keying)),
        };
        Ok(optimizer)
    }
}

fn validate_lr(lr: f64) -> Result<()> {
    if !(lr.is_finite() && lr > 0.0) {
        return Err(Error::InvalidConfig(format!(
            "learning rate must be finite and > 0, got {lr}"
        )));
    }
    Ok(())
}

fn validate_unit(name: &str, v: f64) -> Result<()> {
    if !(v.is_finite() && (0.0..1.0).contains(&v)) {
        return Err(Error::InvalidConfig(format!(
            "{name} must be finite and in [0,1), got {v}"
        )));
    }
    Ok(())
}

fn check_pair(what: &str, param: &Tensor, grad: &Tensor) -> Result<()> {
    if param.shape() != grad.shape() {
        return Err(Error::ShapeMismatch(format!(
            "{what} shape {:?} does not match gradient shape {:?}",
            param.shape(),
            grad.shape()
        )));
    }
    Ok(())
}

/// Update rule for one parameter tensor at a time.
pub trait Optimizer: fmt::Debug + Send {
    /// Return the updated weights. Advances the shared step counter, if any,
    /// only when the update succeeds.
    fn step(&mut self, id: ParamId, weights: &Tensor, grad: &Tensor) -> Result<Tensor>;

    /// Return the updated biases. Uses the current step counter.
    fn step_bias(&mut self, id: ParamId, biases: &Tensor, grad: &Tensor) -> Result<Tensor>;

    /// Reset running statistics.
    fn zero_grad(&mut self);

    fn learning_rate(&self) -> f64;

    fn config(&self) -> OptimizerConfig;
}

/// Plain gradient descent: `w' = w - lr * g`.
#[derive(Debug, Clone)]
pub struct Sgd {
    lr: f64,
}

impl Sgd {
    pub fn new(lr: f64) -> Result<Self> {
        validate_lr(lr)?;
        Ok(Self { lr })
    }

    fn apply(&self, what: &str, param: &Tensor, grad: &Tensor) -> Result<Tensor> {
        check_pair(what, param, grad)?;
        let mut out = param.clone();
        for (w, &g) in out.data_mut().iter_mut().zip(grad.data()) {
            *w -= self.lr * g;
        }
        Ok(out)
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, _id: ParamId, weights: &Tensor, grad: &Tensor) -> Result<Tensor> {
        self.apply("weights", weights, grad)
    }

    fn step_bias(&mut self, _id: ParamId, biases: &Tensor, grad: &Tensor) -> Result<Tensor> {
        self.apply("biases", biases, grad)
    }

    fn zero_grad(&mut self) {}

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn config(&self) -> OptimizerConfig {
        OptimizerConfig::Sgd { lr: self.lr }
    }
}

/// Look up (or zero-initialize) the state buffers for `key`.
///
/// Stored state must have the incoming parameter's shape.
fn state_for<'a, S>(
    map: &'a mut HashMap<StateKey, S>,
    key: StateKey,
    param: &Tensor,
    shape_of: impl Fn(&S) -> &[usize],
    init: impl FnOnce() -> S,
) -> Result<&'a mut S> {
    match map.entry(key) {
        Entry::Occupied(e) => {
            let state = e.into_mut();
            if shape_of(state) != param.shape() {
                return Err(Error::ShapeMismatch(format!(
                    "optimizer state has shape {:?}, parameter has shape {:?}",
                    shape_of(state),
                    param.shape()
                )));
            }
            Ok(state)
        }
        Entry::Vacant(e) => Ok(e.insert(init())),
    }
}

/// Heavy-ball momentum (non-Nesterov):
///
/// - `v' = momentum * v + g`
/// - `w' = w - lr * v'`
#[derive(Debug, Clone)]
pub struct SgdMomentum {
    lr: f64,
    momentum: f64,
    keying: StateKeying,
    velocity: HashMap<StateKey, Tensor>,
}

impl SgdMomentum {
    pub fn new(lr: f64, momentum: f64) -> Result<Self> {
        OptimizerConfig::SgdMomentum { lr, momentum }.validate()?;
        Ok(Self {
            lr,
            momentum,
            keying: StateKeying::default(),
            velocity: HashMap::new(),
        })
    }

    /// `momentum = 0.9`.
    pub fn with_defaults(lr: f64) -> Result<Self> {
        Self::new(lr, 0.9)
    }

    pub fn with_keying(mut self, keying: StateKeying) -> Self {
        self.keying = keying;
        self
    }

    #[inline]
    pub fn momentum(&self) -> f64 {
        self.momentum
    }

    fn apply(&mut self, id: ParamId, slot: Slot, param: &Tensor, grad: &Tensor) -> Result<Tensor> {
        check_pair(if slot == Slot::Weights { "weights" } else { "biases" }, param, grad)?;
        let key = self.keying.key(id, slot, param.shape());
        let v = state_for(&mut self.velocity, key, param, Tensor::shape, || param.zeros_like())?;

        let mut out = param.clone();
        for ((w, v), &g) in out.data_mut().iter_mut().zip(v.data_mut()).zip(grad.data()) {
            *v = self.momentum.mul_add(*v, g);
            *w -= self.lr * *v;
        }
        Ok(out)
    }
}

impl Optimizer for SgdMomentum {
    fn step(&mut self, id: ParamId, weights: &Tensor, grad: &Tensor) -> Result<Tensor> {
        self.apply(id, Slot::Weights, weights, grad)
    }

    fn step_bias(&mut self, id: ParamId, biases: &Tensor, grad: &Tensor) -> Result<Tensor> {
        self.apply(id, Slot::Biases, biases, grad)
    }

    /// Zero every velocity in place; entries stay allocated.
    fn zero_grad(&mut self) {
        for v in self.velocity.values_mut() {
            v.data_mut().fill(0.0);
        }
        debug!("sgd-momentum: zeroed {} velocity buffers", self.velocity.len());
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn config(&self) -> OptimizerConfig {
        OptimizerConfig::SgdMomentum {
            lr: self.lr,
            momentum: self.momentum,
        }
    }
}

#[derive(Debug, Clone)]
struct Moments {
    shape: Vec<usize>,
    m: Vec<f64>,
    v: Vec<f64>,
}

/// Adam with bias correction.
///
/// `step` advances the shared counter `t`; `step_bias` reuses the current
/// `t` (treated as 1 before the first `step`).
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    t: u64,
    keying: StateKeying,
    moments: HashMap<StateKey, Moments>,
}

impl Adam {
    pub fn new(lr: f64, beta1: f64, beta2: f64, eps: f64) -> Result<Self> {
        OptimizerConfig::Adam {
            lr,
            beta1,
            beta2,
            eps,
        }
        .validate()?;
        Ok(Self {
            lr,
            beta1,
            beta2,
            eps,
            t: 0,
            keying: StateKeying::default(),
            moments: HashMap::new(),
        })
    }

    /// `beta1 = 0.9`, `beta2 = 0.999`, `eps = 1e-8`.
    pub fn with_defaults(lr: f64) -> Result<Self> {
        Self::new(lr, 0.9, 0.999, 1e-8)
    }

    pub fn with_keying(mut self, keying: StateKeying) -> Self {
        self.keying = keying;
        self
    }

    /// Number of `step` calls since construction or the last `zero_grad`.
    #[inline]
    pub fn timestep(&self) -> u64 {
        self.t
    }

    /// Update `param` with bias correction for step `t`.
    fn apply(
        &mut self,
        id: ParamId,
        slot: Slot,
        t: u64,
        param: &Tensor,
        grad: &Tensor,
    ) -> Result<Tensor> {
        check_pair(if slot == Slot::Weights { "weights" } else { "biases" }, param, grad)?;
        let key = self.keying.key(id, slot, param.shape());
        let state = state_for(
            &mut self.moments,
            key,
            param,
            |s: &Moments| s.shape.as_slice(),
            || Moments {
                shape: param.shape().to_vec(),
                m: vec![0.0; param.len()],
                v: vec![0.0; param.len()],
            },
        )?;

        let exp = i32::try_from(t.max(1)).unwrap_or(i32::MAX);
        let bias1 = 1.0 - self.beta1.powi(exp);
        let bias2 = 1.0 - self.beta2.powi(exp);
        let (b1, b2) = (self.beta1, self.beta2);

        let mut out = param.clone();
        for (i, (w, &g)) in out.data_mut().iter_mut().zip(grad.data()).enumerate() {
            let m = b1.mul_add(state.m[i], (1.0 - b1) * g);
            let v = b2.mul_add(state.v[i], (1.0 - b2) * g * g);
            state.m[i] = m;
            state.v[i] = v;
            let m_hat = m / bias1;
            let v_hat = v / bias2;
            *w -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
        }
        Ok(out)
    }
}

impl Optimizer for Adam {
    fn step(&mut self, id: ParamId, weights: &Tensor, grad: &Tensor) -> Result<Tensor> {
        let t = self.t + 1;
        let out = self.apply(id, Slot::Weights, t, weights, grad)?;
        self.t = t;
        Ok(out)
    }

    fn step_bias(&mut self, id: ParamId, biases: &Tensor, grad: &Tensor) -> Result<Tensor> {
        self.apply(id, Slot::Biases, self.t, biases, grad)
    }

    /// Drop every moment buffer and reset `t` to 0.
    fn zero_grad(&mut self) {
        debug!("adam: reset {} moment buffers at t={}", self.moments.len(), self.t);
        self.moments.clear();
        self.t = 0;
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn config(&self) -> OptimizerConfig {
        OptimizerConfig::Adam {
            lr: self.lr,
            beta1: self.beta1,
            beta2: self.beta2,
            eps: self.eps,
        }
    }
}
