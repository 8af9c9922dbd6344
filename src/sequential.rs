//! Ordered layer chain plus an optional optimizer.

use std::fmt;

use log::debug;

use crate::{Error, Layer, Optimizer, Result, Tensor};

/// A feed-forward model: layers applied in insertion order.
///
/// `backward` walks the layers in reverse and, when an optimizer is attached,
/// replaces every parameter tensor with the optimizer's update once the whole
/// chain has produced its gradients.
#[derive(Debug, Default)]
pub struct Sequential {
    layers: Vec<Box<dyn Layer>>,
    optimizer: Option<Box<dyn Optimizer>>,
}

impl Sequential {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer.
    pub fn add<L: Layer + 'static>(&mut self, layer: L) {
        self.add_boxed(Box::new(layer));
    }

    pub fn add_boxed(&mut self, layer: Box<dyn Layer>) {
        debug!("sequential: layer {} = {layer}", self.layers.len());
        self.layers.push(layer);
    }

    /// Builder-style [`add`](Self::add).
    pub fn with_layer<L: Layer + 'static>(mut self, layer: L) -> Self {
        self.add(layer);
        self
    }

    /// Builder-style [`set_optimizer`](Self::set_optimizer).
    pub fn with_optimizer(mut self, optimizer: Box<dyn Optimizer>) -> Self {
        self.set_optimizer(optimizer);
        self
    }

    /// Attach (or replace) the optimizer used by `backward`.
    pub fn set_optimizer(&mut self, optimizer: Box<dyn Optimizer>) {
        debug!("sequential: optimizer {:?}", optimizer.config());
        self.optimizer = Some(optimizer);
    }

    pub fn optimizer(&self) -> Option<&dyn Optimizer> {
        self.optimizer.as_deref()
    }

    pub fn optimizer_mut(&mut self) -> Option<&mut (dyn Optimizer + 'static)> {
        self.optimizer.as_deref_mut()
    }

    /// Detach the optimizer, returning it.
    pub fn take_optimizer(&mut self) -> Option<Box<dyn Optimizer>> {
        self.optimizer.take()
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [Box<dyn Layer>] {
        &mut self.layers
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Total learnable scalars across all layers.
    pub fn num_parameters(&self) -> usize {
        self.layers.iter().map(|l| l.num_parameters()).sum()
    }

    /// Thread `input` through every layer in order.
    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let mut out = input.clone();
        for layer in &mut self.layers {
            out = layer.forward(&out)?;
        }
        Ok(out)
    }

    /// Same as [`forward`](Self::forward). Call [`eval`](Self::eval) first for
    /// inference-mode dropout.
    pub fn predict(&mut self, input: &Tensor) -> Result<Tensor> {
        self.forward(input)
    }

    /// Backpropagate `grad_output` and, if an optimizer is attached, apply one
    /// update to every parameter. Returns `dL/d(input)`.
    pub fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let mut grad = grad_output.clone();
        for layer in self.layers.iter_mut().rev() {
            grad = layer.backward(&grad)?;
        }

        if let Some(opt) = self.optimizer.as_deref_mut() {
            // Every update is computed and shape-checked before any layer is
            // written, so a failing step leaves all parameters untouched.
            // Optimizer running statistics are not rolled back.
            let mut updates = Vec::new();
            for (i, layer) in self.layers.iter().enumerate() {
                let Some(id) = layer.param_id() else {
                    continue;
                };
                let weights = match (layer.weights(), layer.gradients()) {
                    (Some(w), Some(g)) => {
                        Some(checked_update("weights", w, opt.step(id, w, g)?)?)
                    }
                    _ => None,
                };
                let biases = match (layer.biases(), layer.bias_gradients()) {
                    (Some(b), Some(g)) => {
                        Some(checked_update("biases", b, opt.step_bias(id, b, g)?)?)
                    }
                    _ => None,
                };
                updates.push((i, weights, biases));
            }

            for (i, weights, biases) in updates {
                let layer = &mut self.layers[i];
                if let Some(w) = weights {
                    layer.update_weights(&w)?;
                }
                if let Some(b) = biases {
                    layer.update_biases(&b)?;
                }
            }
        }
        Ok(grad)
    }

    /// Drop the forward caches of every layer.
    pub fn clear_cache(&mut self) {
        for layer in &mut self.layers {
            layer.clear_cache();
        }
        debug!("sequential: cleared caches of {} layers", self.layers.len());
    }

    /// Put every layer in training mode.
    pub fn train(&mut self) {
        self.set_training(true);
    }

    /// Put every layer in evaluation mode.
    pub fn eval(&mut self) {
        self.set_training(false);
    }

    fn set_training(&mut self, training: bool) {
        for layer in &mut self.layers {
            layer.set_training(training);
        }
    }
}

fn checked_update(what: &str, current: &Tensor, updated: Tensor) -> Result<Tensor> {
    if updated.shape() != current.shape() {
        return Err(Error::ShapeMismatch(format!(
            "optimizer returned {what} of shape {:?}, expected {:?}",
            updated.shape(),
            current.shape()
        )));
    }
    Ok(updated)
}

impl fmt::Display for Sequential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sequential(")?;
        for (i, layer) in self.layers.iter().enumerate() {
            writeln!(f, "  ({i}): {layer}")?;
        }
        write!(f, ")")
    }
}
