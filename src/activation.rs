//! Elementwise and row-wise activation layers.
//!
//! None of these own learnable parameters. Each caches exactly what its
//! gradient rule needs:
//!
//! - `ReLU`, `LeakyReLU`, `SiLU`: the input `x`
//! - `Sigmoid`: the output `y`, since `dy/dx = y * (1 - y)`
//! - `Softmax`: only the output shape (its backward is a pass-through, see below)

use std::fmt;

use crate::layer::{check_grad_shape, not_cached};
use crate::{Error, Layer, LayerKind, Result, Tensor};

#[inline]
pub(crate) fn sigmoid(x: f64) -> f64 {
    // Numerically stable sigmoid.
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

/// Multiply `grad` elementwise by `f(cached)` after checking shapes.
fn scale_grad(
    layer: &str,
    cached: &Tensor,
    grad: &Tensor,
    f: impl Fn(f64) -> f64,
) -> Result<Tensor> {
    check_grad_shape(layer, cached.shape(), grad)?;
    let data = cached
        .data()
        .iter()
        .zip(grad.data())
        .map(|(&c, &g)| f(c) * g)
        .collect();
    Tensor::new(grad.shape().to_vec(), data)
}

/// `y = max(0, x)`.
#[derive(Debug, Clone, Default)]
pub struct ReLU {
    input: Option<Tensor>,
}

impl ReLU {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for ReLU {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        self.input = Some(input.clone());
        Ok(input.map(|x| x.max(0.0)))
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let input = self.input.take().ok_or_else(|| not_cached("ReLU"))?;
        scale_grad("ReLU", &input, grad_output, |x| if x > 0.0 { 1.0 } else { 0.0 })
    }

    fn kind(&self) -> LayerKind {
        LayerKind::ReLU
    }

    fn clear_cache(&mut self) {
        self.input = None;
    }
}

impl fmt::Display for ReLU {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReLU()")
    }
}

/// `y = x` for `x > 0`, else `alpha * x`.
#[derive(Debug, Clone)]
pub struct LeakyReLU {
    alpha: f64,
    input: Option<Tensor>,
}

impl LeakyReLU {
    /// Returns an error unless `alpha` is finite and `>= 0`.
    pub fn new(alpha: f64) -> Result<Self> {
        if !(alpha.is_finite() && alpha >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "leaky ReLU alpha must be finite and >= 0, got {alpha}"
            )));
        }
        Ok(Self { alpha, input: None })
    }

    #[inline]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl Layer for LeakyReLU {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        self.input = Some(input.clone());
        let alpha = self.alpha;
        Ok(input.map(|x| if x > 0.0 { x } else { alpha * x }))
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let input = self.input.take().ok_or_else(|| not_cached("LeakyReLU"))?;
        let alpha = self.alpha;
        scale_grad("LeakyReLU", &input, grad_output, |x| {
            if x > 0.0 { 1.0 } else { alpha }
        })
    }

    fn kind(&self) -> LayerKind {
        LayerKind::LeakyReLU { alpha: self.alpha }
    }

    fn clear_cache(&mut self) {
        self.input = None;
    }
}

impl fmt::Display for LeakyReLU {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LeakyReLU(alpha={})", self.alpha)
    }
}

/// `y = 1 / (1 + e^-x)`.
#[derive(Debug, Clone, Default)]
pub struct Sigmoid {
    output: Option<Tensor>,
}

impl Sigmoid {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for Sigmoid {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let out = input.map(sigmoid);
        self.output = Some(out.clone());
        Ok(out)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let output = self.output.take().ok_or_else(|| not_cached("Sigmoid"))?;
        scale_grad("Sigmoid", &output, grad_output, |y| y * (1.0 - y))
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Sigmoid
    }

    fn clear_cache(&mut self) {
        self.output = None;
    }
}

impl fmt::Display for Sigmoid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Sigmoid()")
    }
}

/// Sigmoid linear unit (swish): `y = x * sigmoid(x)`.
#[derive(Debug, Clone, Default)]
pub struct SiLU {
    input: Option<Tensor>,
}

impl SiLU {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for SiLU {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        self.input = Some(input.clone());
        Ok(input.map(|x| x * sigmoid(x)))
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let input = self.input.take().ok_or_else(|| not_cached("SiLU"))?;
        scale_grad("SiLU", &input, grad_output, |x| {
            let s = sigmoid(x);
            s + x * s * (1.0 - s)
        })
    }

    fn kind(&self) -> LayerKind {
        LayerKind::SiLU
    }

    fn clear_cache(&mut self) {
        self.input = None;
    }
}

impl fmt::Display for SiLU {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SiLU()")
    }
}

/// Row-wise softmax for rank-2 input, global softmax for rank-1 input.
///
/// `backward` passes the upstream gradient through unchanged. That is only the
/// correct gradient when this layer feeds `CrossEntropyLoss`, whose backward
/// already returns the fused `(softmax - target) / batch` gradient. A
/// standalone softmax would need the full Jacobian
/// `dx_i = sum_j g_j * y_i * (delta_ij - y_j)`.
#[derive(Debug, Clone, Default)]
pub struct Softmax {
    output_shape: Option<Vec<usize>>,
}

impl Softmax {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Numerically stable softmax of `row` in place.
fn softmax_in_place(row: &mut [f64]) {
    let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0;
    for v in row.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    let inv = 1.0 / sum;
    for v in row.iter_mut() {
        *v *= inv;
    }
}

impl Layer for Softmax {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let mut out = input.clone();
        match *input.shape() {
            [_] => softmax_in_place(out.data_mut()),
            [_, cols] => out
                .data_mut()
                .chunks_exact_mut(cols)
                .for_each(softmax_in_place),
            _ => {
                return Err(Error::ShapeMismatch(format!(
                    "Softmax expects a rank-1 or rank-2 tensor, got shape {:?}",
                    input.shape()
                )));
            }
        }
        self.output_shape = Some(input.shape().to_vec());
        Ok(out)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let shape = self.output_shape.take().ok_or_else(|| not_cached("Softmax"))?;
        check_grad_shape("Softmax", &shape, grad_output)?;
        Ok(grad_output.clone())
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Softmax
    }

    fn clear_cache(&mut self) {
        self.output_shape = None;
    }
}

impl fmt::Display for Softmax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Softmax()")
    }
}
