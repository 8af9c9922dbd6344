use std::fmt;

use crate::layer::{check_grad_shape, not_cached};
use crate::{Error, Layer, LayerKind, Result, Tensor};

/// Reshape `(batch, d1, d2, ...)` to `(batch, d1 * d2 * ...)`.
///
/// The buffer order is unchanged in both directions; backward restores the
/// shape seen by the most recent forward.
#[derive(Debug, Clone, Default)]
pub struct Flatten {
    input_shape: Option<Vec<usize>>,
}

impl Flatten {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for Flatten {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let shape = input.shape();
        if shape.len() < 2 {
            return Err(Error::ShapeMismatch(format!(
                "Flatten expects at least a rank-2 tensor, got shape {shape:?}"
            )));
        }
        let batch = shape[0];
        let features = shape[1..].iter().product::<usize>();
        let out = input.reshape(vec![batch, features])?;
        self.input_shape = Some(shape.to_vec());
        Ok(out)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let shape = self.input_shape.take().ok_or_else(|| not_cached("Flatten"))?;
        let flat = [shape[0], shape[1..].iter().product()];
        check_grad_shape("Flatten", &flat, grad_output)?;
        grad_output.reshape(shape)
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Flatten
    }

    fn clear_cache(&mut self) {
        self.input_shape = None;
    }
}

impl fmt::Display for Flatten {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Flatten()")
    }
}
