//! Metrics.
//!
//! Metrics are evaluation helpers (they do not participate in backprop).

use crate::{Error, Result, Tensor};

/// Supported evaluation metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Mean squared error.
    Mse,
    /// Mean absolute error.
    Mae,
    /// Fraction of rows whose prediction argmax equals the target argmax.
    ///
    /// Targets are one-hot (or any scores whose argmax is the class).
    Accuracy,
    /// Fraction of rows whose target argmax is among the `k` highest predictions.
    TopKAccuracy { k: usize },
}

impl Metric {
    /// Validate metric parameters.
    pub fn validate(self) -> Result<()> {
        match self {
            Metric::TopKAccuracy { k } => {
                if k == 0 {
                    return Err(Error::InvalidConfig(
                        "TopKAccuracy requires k > 0".to_owned(),
                    ));
                }
            }
            Metric::Mse | Metric::Mae | Metric::Accuracy => {}
        }
        Ok(())
    }

    /// Evaluate on a `(predictions, targets)` pair of identical shape.
    ///
    /// Accuracy metrics require rank-2 `(batch, classes)` tensors.
    pub fn compute(self, predictions: &Tensor, targets: &Tensor) -> Result<f64> {
        self.validate()?;
        if predictions.shape() != targets.shape() {
            return Err(Error::ShapeMismatch(format!(
                "metric: predictions shape {:?} does not match targets shape {:?}",
                predictions.shape(),
                targets.shape()
            )));
        }
        let n = predictions.len() as f64;
        let pairs = predictions.data().iter().zip(targets.data());

        match self {
            Metric::Mse => Ok(pairs.map(|(p, t)| (p - t) * (p - t)).sum::<f64>() / n),
            Metric::Mae => Ok(pairs.map(|(p, t)| (p - t).abs()).sum::<f64>() / n),
            Metric::Accuracy => top_k_accuracy(predictions, targets, 1),
            Metric::TopKAccuracy { k } => top_k_accuracy(predictions, targets, k),
        }
    }
}

/// Index of the first maximum of `row`.
pub fn argmax(row: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate().skip(1) {
        if v > row[best] {
            best = i;
        }
    }
    best
}

fn top_k_accuracy(predictions: &Tensor, targets: &Tensor, k: usize) -> Result<f64> {
    let (rows, classes) = predictions.dims2()?;
    if k > classes {
        return Err(Error::InvalidConfig(format!(
            "top-{k} accuracy needs at least {k} classes, got {classes}"
        )));
    }

    let mut hits = 0usize;
    for (pred, target) in predictions
        .data()
        .chunks(classes)
        .zip(targets.data().chunks(classes))
    {
        let label = argmax(target);
        // rank of the true class = number of strictly larger scores
        let above = pred.iter().filter(|&&p| p > pred[label]).count();
        if above < k {
            hits += 1;
        }
    }
    Ok(hits as f64 / rows as f64)
}
