//! Loss functions.
//!
//! A loss is used like:
//!
//! - run `model.forward(...)`
//! - compute the scalar loss via `loss.forward(pred, target)`
//! - seed the chain with `loss.backward()`
//! - run `model.backward(...)`
//!
//! Each loss keeps the last `(predictions, targets)` pair so `backward` needs
//! no arguments.

use std::fmt;

use crate::{Error, Result, Tensor};

/// Guards `ln(0)` in cross-entropy.
pub const CROSS_ENTROPY_EPS: f64 = 1e-9;

pub trait Loss: fmt::Debug {
    /// Compute the scalar loss and remember the pair for `backward`.
    ///
    /// `predictions` and `targets` must have identical shapes.
    fn forward(&mut self, predictions: &Tensor, targets: &Tensor) -> Result<f64>;

    /// `dL/d(predictions)` for the pair seen by the most recent `forward`.
    fn backward(&self) -> Result<Tensor>;
}

#[derive(Debug, Clone)]
struct Pair {
    predictions: Tensor,
    targets: Tensor,
}

impl Pair {
    fn record(predictions: &Tensor, targets: &Tensor, loss: &str) -> Result<Self> {
        if predictions.shape() != targets.shape() {
            return Err(Error::ShapeMismatch(format!(
                "{loss}: predictions shape {:?} does not match targets shape {:?}",
                predictions.shape(),
                targets.shape()
            )));
        }
        Ok(Self {
            predictions: predictions.clone(),
            targets: targets.clone(),
        })
    }
}

fn no_pair(loss: &str) -> Error {
    Error::InvalidState(format!("{loss} backward called without a preceding forward"))
}

/// Cross-entropy over probability rows, averaged over the batch.
///
/// `L = -(1/B) * sum_b sum_j t[b,j] * ln(p[b,j] + eps)`
///
/// `backward` returns `(p - t) / B`, which is the gradient w.r.t. the
/// *logits* when `p` came from a [`Softmax`](crate::Softmax) layer. That layer
/// passes the gradient through unchanged, so the pair is only correct when
/// used together.
///
/// Rank-2 inputs are `(batch, classes)`; a rank-1 input counts as a batch of one.
#[derive(Debug, Clone, Default)]
pub struct CrossEntropyLoss {
    last: Option<Pair>,
}

impl CrossEntropyLoss {
    pub fn new() -> Self {
        Self::default()
    }
}

fn batch_size(t: &Tensor) -> usize {
    if t.rank() >= 2 { t.shape()[0] } else { 1 }
}

impl Loss for CrossEntropyLoss {
    fn forward(&mut self, predictions: &Tensor, targets: &Tensor) -> Result<f64> {
        let pair = Pair::record(predictions, targets, "CrossEntropyLoss")?;
        let batch = batch_size(predictions) as f64;
        let mut sum = 0.0;
        for (&p, &t) in predictions.data().iter().zip(targets.data()) {
            if t != 0.0 {
                sum += t * (p + CROSS_ENTROPY_EPS).ln();
            }
        }
        self.last = Some(pair);
        Ok(-sum / batch)
    }

    fn backward(&self) -> Result<Tensor> {
        let pair = self.last.as_ref().ok_or_else(|| no_pair("CrossEntropyLoss"))?;
        let inv_batch = 1.0 / batch_size(&pair.predictions) as f64;
        Ok(pair.predictions.sub(&pair.targets)?.scale(inv_batch))
    }
}

/// Mean squared error over *all* elements.
///
/// `L = mean((p - t)^2)`, `dL/dp = 2 (p - t) / N` with `N` the element count
/// (not the batch size).
#[derive(Debug, Clone, Default)]
pub struct MseLoss {
    last: Option<Pair>,
}

impl MseLoss {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Loss for MseLoss {
    fn forward(&mut self, predictions: &Tensor, targets: &Tensor) -> Result<f64> {
        let pair = Pair::record(predictions, targets, "MseLoss")?;
        let mut sum_sq = 0.0_f64;
        for (&p, &t) in predictions.data().iter().zip(targets.data()) {
            let diff = p - t;
            sum_sq = diff.mul_add(diff, sum_sq);
        }
        self.last = Some(pair);
        Ok(sum_sq / predictions.len() as f64)
    }

    fn backward(&self) -> Result<Tensor> {
        let pair = self.last.as_ref().ok_or_else(|| no_pair("MseLoss"))?;
        let scale = 2.0 / pair.predictions.len() as f64;
        Ok(pair.predictions.sub(&pair.targets)?.scale(scale))
    }
}
