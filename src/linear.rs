use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::layer::{check_grad_shape, check_same_shape, not_cached, xavier_uniform};
use crate::{Error, Layer, LayerKind, ParamId, Result, Tensor};

/// Fully connected layer: `Y = X W + b`.
///
/// Shapes:
/// - input `X`: `(batch, in_features)`
/// - weights `W`: `(in_features, out_features)`
/// - biases `b`: `(1, out_features)`, broadcast over the batch
#[derive(Debug, Clone)]
pub struct Linear {
    id: ParamId,
    weights: Tensor,
    biases: Tensor,
    d_weights: Tensor,
    d_biases: Tensor,
    input: Option<Tensor>,
}

impl Linear {
    /// Xavier-uniform weights, zero biases, entropy-seeded RNG.
    pub fn new(in_features: usize, out_features: usize) -> Result<Self> {
        Self::new_with_rng(in_features, out_features, &mut StdRng::from_entropy())
    }

    pub fn new_with_seed(in_features: usize, out_features: usize, seed: u64) -> Result<Self> {
        Self::new_with_rng(in_features, out_features, &mut StdRng::seed_from_u64(seed))
    }

    pub fn new_with_rng<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if in_features == 0 || out_features == 0 {
            return Err(Error::InvalidConfig(format!(
                "linear dims must be > 0, got in_features={in_features} out_features={out_features}"
            )));
        }
        let w = xavier_uniform(in_features, out_features, in_features * out_features, rng);
        Self::from_parts(
            Tensor::new(vec![in_features, out_features], w)?,
            Tensor::zeros(vec![1, out_features])?,
        )
    }

    /// Build from explicit parameters.
    ///
    /// `weights` must be `(in, out)` and `biases` `(1, out)`.
    pub fn from_parts(weights: Tensor, biases: Tensor) -> Result<Self> {
        let (_, out_features) = weights.dims2()?;
        if biases.shape() != [1, out_features] {
            return Err(Error::ShapeMismatch(format!(
                "linear biases must have shape [1, {out_features}], got {:?}",
                biases.shape()
            )));
        }
        Ok(Self {
            id: ParamId::fresh(),
            d_weights: weights.zeros_like(),
            d_biases: biases.zeros_like(),
            weights,
            biases,
            input: None,
        })
    }

    #[inline]
    pub fn in_features(&self) -> usize {
        self.weights.shape()[0]
    }

    #[inline]
    pub fn out_features(&self) -> usize {
        self.weights.shape()[1]
    }
}

impl Layer for Linear {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let (_, cols) = input.dims2()?;
        if cols != self.in_features() {
            return Err(Error::ShapeMismatch(format!(
                "Linear expects {} input features, got {cols}",
                self.in_features()
            )));
        }
        let out = input.matmul(&self.weights)?.add_row(&self.biases)?;
        self.input = Some(input.clone());
        Ok(out)
    }

    /// `dW = X^T G`, `db = colsum(G)`, `dX = G W^T`.
    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let input = self.input.as_ref().ok_or_else(|| not_cached("Linear"))?;
        let batch = input.shape()[0];
        check_grad_shape("Linear", &[batch, self.out_features()], grad_output)?;

        let d_weights = input.transpose()?.matmul(grad_output)?;
        let d_biases = grad_output.sum_axis(0)?;
        let d_input = grad_output.matmul(&self.weights.transpose()?)?;

        self.d_weights = d_weights;
        self.d_biases = d_biases;
        self.input = None;
        Ok(d_input)
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Linear {
            in_features: self.in_features(),
            out_features: self.out_features(),
        }
    }

    fn param_id(&self) -> Option<ParamId> {
        Some(self.id)
    }

    fn weights(&self) -> Option<&Tensor> {
        Some(&self.weights)
    }

    fn gradients(&self) -> Option<&Tensor> {
        Some(&self.d_weights)
    }

    fn update_weights(&mut self, weights: &Tensor) -> Result<()> {
        check_same_shape("Linear weights", &self.weights, weights)?;
        self.weights = weights.clone();
        Ok(())
    }

    fn biases(&self) -> Option<&Tensor> {
        Some(&self.biases)
    }

    fn bias_gradients(&self) -> Option<&Tensor> {
        Some(&self.d_biases)
    }

    fn update_biases(&mut self, biases: &Tensor) -> Result<()> {
        check_same_shape("Linear biases", &self.biases, biases)?;
        self.biases = biases.clone();
        Ok(())
    }

    fn clear_cache(&mut self) {
        self.input = None;
    }
}

impl fmt::Display for Linear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Linear(in_features={}, out_features={})",
            self.in_features(),
            self.out_features()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(shape: &[usize], data: &[f64]) -> Tensor {
        Tensor::new(shape.to_vec(), data.to_vec()).unwrap()
    }

    fn fixed() -> Linear {
        Linear::from_parts(
            t(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
            t(&[1, 3], &[0.1, 0.2, 0.3]),
        )
        .unwrap()
    }

    #[test]
    fn forward_is_matmul_plus_broadcast_bias() {
        let mut l = fixed();
        let y = l.forward(&t(&[2, 2], &[1.0, 0.0, 0.0, 1.0])).unwrap();
        assert_eq!(y.shape(), &[2, 3]);
        assert_eq!(y.data(), &[1.1, 2.2, 3.3, 4.1, 5.2, 6.3]);
    }

    #[test]
    fn backward_matches_matrix_identities_for_batch_of_one() {
        let mut l = fixed();
        let x = t(&[1, 2], &[2.0, -1.0]);
        l.forward(&x).unwrap();

        let g = t(&[1, 3], &[1.0, 0.5, -1.0]);
        let dx = l.backward(&g).unwrap();

        // dW = x^T g
        assert_eq!(
            l.gradients().unwrap().data(),
            &[2.0, 1.0, -2.0, -1.0, -0.5, 1.0]
        );
        assert_eq!(l.bias_gradients().unwrap().shape(), &[1, 3]);
        assert_eq!(l.bias_gradients().unwrap().data(), &[1.0, 0.5, -1.0]);
        // dX = g W^T = [1*1 + 0.5*2 - 1*3, 1*4 + 0.5*5 - 1*6]
        assert_eq!(dx.data(), &[-1.0, 0.5]);
    }

    #[test]
    fn bias_gradient_sums_over_batch() {
        let mut l = fixed();
        l.forward(&t(&[3, 2], &[0.0; 6])).unwrap();
        l.backward(&t(&[3, 3], &[1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0, 2.0, 3.0]))
            .unwrap();
        assert_eq!(l.bias_gradients().unwrap().data(), &[3.0, 6.0, 9.0]);
    }

    #[test]
    fn rejects_wrong_input_width_and_rank() {
        let mut l = fixed();
        assert!(matches!(
            l.forward(&t(&[1, 3], &[0.0; 3])),
            Err(Error::ShapeMismatch(_))
        ));
        assert!(l.forward(&t(&[2], &[0.0; 2])).is_err());
    }

    #[test]
    fn update_weights_requires_matching_shape_and_copies() {
        let mut l = fixed();
        let mut w = t(&[2, 3], &[0.0; 6]);
        l.update_weights(&w).unwrap();
        w.data_mut()[0] = 42.0;
        assert_eq!(l.weights().unwrap().data()[0], 0.0);

        assert!(l.update_weights(&t(&[3, 2], &[0.0; 6])).is_err());
        assert!(l.update_biases(&t(&[3], &[0.0; 3])).is_err());
    }

    #[test]
    fn seeded_init_is_deterministic_with_zero_bias() {
        let a = Linear::new_with_seed(4, 3, 123).unwrap();
        let b = Linear::new_with_seed(4, 3, 123).unwrap();
        assert_eq!(a.weights(), b.weights());
        assert!(a.biases().unwrap().data().iter().all(|&v| v == 0.0));
        assert_ne!(a.param_id(), b.param_id());
        assert_eq!(a.num_parameters(), 15);
    }
}
