//! 2D convolution over channel-first rank-4 tensors.
//!
//! Shapes:
//! - input: `(batch, C, H, W)`
//! - weights: `(F, C, K, K)`, biases: `(F)`
//! - output: `(batch, F, OH, OW)` with `OH = floor((H + 2P - K) / S) + 1`
//!
//! Every batch item is an independent rayon task writing to its own
//! partition of the output. Backward gives each task private weight/bias
//! accumulators which are summed in batch order after the join.

use std::fmt;

use log::trace;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::layer::{check_grad_shape, check_same_shape, not_cached, xavier_uniform};
use crate::{Error, Layer, LayerKind, ParamId, Result, Tensor};

#[derive(Debug, Clone)]
struct Cache {
    /// Zero-padded copy of the forward input, `(batch, C, H + 2P, W + 2P)`.
    padded: Tensor,
    input_shape: [usize; 4],
    output_shape: [usize; 4],
}

#[derive(Debug, Clone)]
pub struct Conv2d {
    id: ParamId,
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    weights: Tensor,
    biases: Tensor,
    d_weights: Tensor,
    d_biases: Tensor,
    cache: Option<Cache>,
}

impl Conv2d {
    /// Xavier-uniform filters, zero biases, entropy-seeded RNG.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
    ) -> Result<Self> {
        Self::new_with_rng(
            in_channels,
            out_channels,
            kernel_size,
            stride,
            padding,
            &mut StdRng::from_entropy(),
        )
    }

    pub fn new_with_seed(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        seed: u64,
    ) -> Result<Self> {
        Self::new_with_rng(
            in_channels,
            out_channels,
            kernel_size,
            stride,
            padding,
            &mut StdRng::seed_from_u64(seed),
        )
    }

    pub fn new_with_rng<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if in_channels == 0 || out_channels == 0 || kernel_size == 0 {
            return Err(Error::InvalidConfig(format!(
                "conv2d channels and kernel size must be > 0, got in_channels={in_channels} \
                 out_channels={out_channels} kernel_size={kernel_size}"
            )));
        }
        let kk = kernel_size * kernel_size;
        let len = out_channels * in_channels * kk;
        let w = xavier_uniform(in_channels * kk, out_channels * kk, len, rng);
        Self::from_parts(
            Tensor::new(vec![out_channels, in_channels, kernel_size, kernel_size], w)?,
            Tensor::zeros(vec![out_channels])?,
            stride,
            padding,
        )
    }

    /// Build from explicit filters `(F, C, K, K)` and biases `(F)`.
    pub fn from_parts(weights: Tensor, biases: Tensor, stride: usize, padding: usize) -> Result<Self> {
        let [f, c, kh, kw] = weights.dims4()?;
        if kh != kw {
            return Err(Error::ShapeMismatch(format!(
                "conv2d kernels must be square, got {kh}x{kw}"
            )));
        }
        if biases.shape() != [f] {
            return Err(Error::ShapeMismatch(format!(
                "conv2d biases must have shape [{f}], got {:?}",
                biases.shape()
            )));
        }
        if stride == 0 {
            return Err(Error::InvalidConfig("conv2d stride must be > 0".to_owned()));
        }
        Ok(Self {
            id: ParamId::fresh(),
            in_channels: c,
            out_channels: f,
            kernel_size: kh,
            stride,
            padding,
            d_weights: weights.zeros_like(),
            d_biases: biases.zeros_like(),
            weights,
            biases,
            cache: None,
        })
    }

    #[inline]
    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    #[inline]
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    #[inline]
    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn padding(&self) -> usize {
        self.padding
    }

    /// Output spatial size for an `height x width` input.
    ///
    /// Fails with `InvalidConfig` when the kernel does not fit the padded input.
    pub fn output_size(&self, height: usize, width: usize) -> Result<(usize, usize)> {
        let axis = |len: usize| {
            (len + 2 * self.padding)
                .checked_sub(self.kernel_size)
                .map(|span| span / self.stride + 1)
        };
        match (axis(height), axis(width)) {
            (Some(oh), Some(ow)) => Ok((oh, ow)),
            _ => Err(Error::InvalidConfig(format!(
                "conv2d kernel {k} with padding {p} does not fit a {height}x{width} input",
                k = self.kernel_size,
                p = self.padding
            ))),
        }
    }
}

/// Copy `(n, c, h, w)` into the center of a zeroed `(n, c, h + 2p, w + 2p)` buffer.
fn pad(input: &Tensor, p: usize) -> Result<Tensor> {
    if p == 0 {
        return Ok(input.clone());
    }
    let [n, c, h, w] = input.dims4()?;
    let (ph, pw) = (h + 2 * p, w + 2 * p);
    let src = input.data();
    let mut out = vec![0.0; n * c * ph * pw];
    out.par_chunks_mut(c * ph * pw)
        .enumerate()
        .for_each(|(b, dst)| {
            for ch in 0..c {
                for y in 0..h {
                    let s = ((b * c + ch) * h + y) * w;
                    let d = (ch * ph + y + p) * pw + p;
                    dst[d..d + w].copy_from_slice(&src[s..s + w]);
                }
            }
        });
    Tensor::new(vec![n, c, ph, pw], out)
}

/// Inverse of [`pad`]: keep only the center `h x w` window of each channel.
fn unpad(padded: &[f64], shape: [usize; 4], p: usize) -> Result<Tensor> {
    let [n, c, h, w] = shape;
    if p == 0 {
        return Tensor::new(shape.to_vec(), padded.to_vec());
    }
    let (ph, pw) = (h + 2 * p, w + 2 * p);
    let mut out = vec![0.0; n * c * h * w];
    out.par_chunks_mut(c * h * w)
        .enumerate()
        .for_each(|(b, dst)| {
            let src = &padded[b * c * ph * pw..(b + 1) * c * ph * pw];
            for ch in 0..c {
                for y in 0..h {
                    let s = (ch * ph + y + p) * pw + p;
                    let d = (ch * h + y) * w;
                    dst[d..d + w].copy_from_slice(&src[s..s + w]);
                }
            }
        });
    Tensor::new(shape.to_vec(), out)
}

impl Layer for Conv2d {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let [n, c, h, w] = input.dims4()?;
        if c != self.in_channels {
            return Err(Error::ShapeMismatch(format!(
                "Conv2d expects {} input channels, got {c}",
                self.in_channels
            )));
        }
        let (oh, ow) = self.output_size(h, w)?;
        trace!("{self}: forward {:?} -> [{n}, {}, {oh}, {ow}]", input.shape(), self.out_channels);

        let padded = pad(input, self.padding)?;
        let (ph, pw) = (h + 2 * self.padding, w + 2 * self.padding);
        let (f, k, s) = (self.out_channels, self.kernel_size, self.stride);
        let x = padded.data();
        let wt = self.weights.data();
        let bias = self.biases.data();

        let mut out = vec![0.0; n * f * oh * ow];
        out.par_chunks_mut(f * oh * ow)
            .enumerate()
            .for_each(|(b, out_b)| {
                let x_b = &x[b * c * ph * pw..(b + 1) * c * ph * pw];
                for oc in 0..f {
                    for oy in 0..oh {
                        for ox in 0..ow {
                            let mut sum = bias[oc];
                            for ic in 0..c {
                                let w_base = (oc * c + ic) * k * k;
                                let x_base = ic * ph * pw;
                                for kh in 0..k {
                                    let row = x_base + (oy * s + kh) * pw + ox * s;
                                    let w_row = w_base + kh * k;
                                    for kw in 0..k {
                                        sum = x_b[row + kw].mul_add(wt[w_row + kw], sum);
                                    }
                                }
                            }
                            out_b[(oc * oh + oy) * ow + ox] = sum;
                        }
                    }
                }
            });

        let output_shape = [n, f, oh, ow];
        self.cache = Some(Cache {
            padded,
            input_shape: [n, c, h, w],
            output_shape,
        });
        Tensor::new(output_shape.to_vec(), out)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let cache = self.cache.as_ref().ok_or_else(|| not_cached("Conv2d"))?;
        check_grad_shape("Conv2d", &cache.output_shape, grad_output)?;

        let [n, c, h, w] = cache.input_shape;
        let [_, f, oh, ow] = cache.output_shape;
        let (k, s, p) = (self.kernel_size, self.stride, self.padding);
        let (ph, pw) = (h + 2 * p, w + 2 * p);
        let x = cache.padded.data();
        let wt = self.weights.data();
        let g = grad_output.data();
        let w_len = wt.len();

        let mut d_padded = vec![0.0; n * c * ph * pw];
        let partials: Vec<(Vec<f64>, Vec<f64>)> = d_padded
            .par_chunks_mut(c * ph * pw)
            .enumerate()
            .map(|(b, dx_b)| {
                let x_b = &x[b * c * ph * pw..(b + 1) * c * ph * pw];
                let g_b = &g[b * f * oh * ow..(b + 1) * f * oh * ow];
                let mut dw = vec![0.0; w_len];
                let mut db = vec![0.0; f];

                for oc in 0..f {
                    for oy in 0..oh {
                        for ox in 0..ow {
                            let gv = g_b[(oc * oh + oy) * ow + ox];
                            db[oc] += gv;
                            for ic in 0..c {
                                let w_base = (oc * c + ic) * k * k;
                                let x_base = ic * ph * pw;
                                for kh in 0..k {
                                    let row = x_base + (oy * s + kh) * pw + ox * s;
                                    let w_row = w_base + kh * k;
                                    for kw in 0..k {
                                        dw[w_row + kw] = x_b[row + kw].mul_add(gv, dw[w_row + kw]);
                                        dx_b[row + kw] = wt[w_row + kw].mul_add(gv, dx_b[row + kw]);
                                    }
                                }
                            }
                        }
                    }
                }
                (dw, db)
            })
            .collect();

        let mut d_weights = self.weights.zeros_like();
        let mut d_biases = self.biases.zeros_like();
        for (dw, db) in &partials {
            for (acc, v) in d_weights.data_mut().iter_mut().zip(dw) {
                *acc += v;
            }
            for (acc, v) in d_biases.data_mut().iter_mut().zip(db) {
                *acc += v;
            }
        }

        let d_input = unpad(&d_padded, cache.input_shape, p)?;
        self.d_weights = d_weights;
        self.d_biases = d_biases;
        self.cache = None;
        Ok(d_input)
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Conv2d {
            in_channels: self.in_channels,
            out_channels: self.out_channels,
            kernel_size: self.kernel_size,
            stride: self.stride,
            padding: self.padding,
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
        check_same_shape("Conv2d weights", &self.weights, weights)?;
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
        check_same_shape("Conv2d biases", &self.biases, biases)?;
        self.biases = biases.clone();
        Ok(())
    }

    fn clear_cache(&mut self) {
        self.cache = None;
    }
}

impl fmt::Display for Conv2d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Conv2d(in_channels={}, out_channels={}, kernel_size={}, stride={}, padding={})",
            self.in_channels, self.out_channels, self.kernel_size, self.stride, self.padding
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(shape: &[usize], data: &[f64]) -> Tensor {
        Tensor::new(shape.to_vec(), data.to_vec()).unwrap()
    }

    #[test]
    fn output_size_follows_floor_formula() {
        for h in 1..9 {
            for k in 1..5 {
                for s in 1..4 {
                    for p in 0..3 {
                        let conv = Conv2d::new_with_seed(1, 1, k, s, p, 0).unwrap();
                        let res = conv.output_size(h, h);
                        if h + 2 * p >= k {
                            let expected = (h + 2 * p - k) / s + 1;
                            assert_eq!(res.unwrap(), (expected, expected), "h={h} k={k} s={s} p={p}");
                        } else {
                            assert!(matches!(res, Err(Error::InvalidConfig(_))));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn oversized_kernel_fails_before_producing_output() {
        let mut conv = Conv2d::new_with_seed(1, 2, 5, 1, 0, 0).unwrap();
        let err = conv.forward(&Tensor::zeros(vec![1, 1, 3, 3]).unwrap()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(matches!(
            conv.backward(&Tensor::zeros(vec![1, 2, 1, 1]).unwrap()),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn rejects_zero_stride_wrong_rank_and_channel_count() {
        assert!(Conv2d::new(1, 1, 3, 0, 0).is_err());
        assert!(Conv2d::new(0, 1, 3, 1, 0).is_err());

        let mut conv = Conv2d::new_with_seed(2, 1, 1, 1, 0, 0).unwrap();
        assert!(matches!(
            conv.forward(&Tensor::zeros(vec![1, 2, 2]).unwrap()),
            Err(Error::ShapeMismatch(_))
        ));
        assert!(matches!(
            conv.forward(&Tensor::zeros(vec![1, 3, 2, 2]).unwrap()),
            Err(Error::ShapeMismatch(_))
        ));
    }

    #[test]
    fn forward_matches_hand_computed_valid_convolution() {
        // 3x3 input, 2x2 all-ones kernel, bias 0.5.
        let mut conv = Conv2d::from_parts(t(&[1, 1, 2, 2], &[1.0; 4]), t(&[1], &[0.5]), 1, 0)
            .unwrap();
        let x = t(&[1, 1, 3, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        let y = conv.forward(&x).unwrap();
        assert_eq!(y.shape(), &[1, 1, 2, 2]);
        assert_eq!(y.data(), &[12.5, 16.5, 24.5, 28.5]);
    }

    #[test]
    fn padding_keeps_spatial_size_and_pads_with_zeros() {
        let mut conv = Conv2d::from_parts(t(&[1, 1, 3, 3], &[1.0; 9]), t(&[1], &[0.0]), 1, 1)
            .unwrap();
        let x = t(&[1, 1, 2, 2], &[1.0, 1.0, 1.0, 1.0]);
        let y = conv.forward(&x).unwrap();
        assert_eq!(y.shape(), &[1, 1, 2, 2]);
        // Every 3x3 window around a 2x2 input covers all four ones.
        assert_eq!(y.data(), &[4.0, 4.0, 4.0, 4.0]);
    }

    #[test]
    fn backward_accumulates_over_batch_and_strips_padding() {
        let mut conv = Conv2d::from_parts(t(&[1, 1, 1, 1], &[2.0]), t(&[1], &[0.0]), 1, 1)
            .unwrap();
        let x = t(&[2, 1, 1, 1], &[3.0, 5.0]);
        let y = conv.forward(&x).unwrap();
        // 1x1 kernel over a 3x3 padded map: only the center sees the input.
        assert_eq!(y.shape(), &[2, 1, 3, 3]);
        assert_eq!(y.data()[4], 6.0);
        assert_eq!(y.data()[9 + 4], 10.0);

        let g = Tensor::new(vec![2, 1, 3, 3], vec![1.0; 18]).unwrap();
        let dx = conv.backward(&g).unwrap();
        assert_eq!(dx.shape(), &[2, 1, 1, 1]);
        assert_eq!(dx.data(), &[2.0, 2.0]);
        // dW = sum over all positions of x_padded * g = 3 + 5.
        assert_eq!(conv.gradients().unwrap().data(), &[8.0]);
        assert_eq!(conv.bias_gradients().unwrap().data(), &[18.0]);
    }

    #[test]
    fn gradients_are_overwritten_not_accumulated_across_calls() {
        let mut conv = Conv2d::new_with_seed(1, 2, 2, 1, 0, 9).unwrap();
        let x = Tensor::new(vec![1, 1, 3, 3], (0..9).map(f64::from).collect()).unwrap();
        let g = Tensor::new(vec![1, 2, 2, 2], vec![1.0; 8]).unwrap();

        conv.forward(&x).unwrap();
        conv.backward(&g).unwrap();
        let first = conv.gradients().unwrap().clone();

        conv.forward(&x).unwrap();
        conv.backward(&g).unwrap();
        assert_eq!(conv.gradients().unwrap(), &first);
    }

    #[test]
    fn strided_output_shape() {
        let mut conv = Conv2d::new_with_seed(3, 4, 3, 2, 1, 1).unwrap();
        let y = conv.forward(&Tensor::zeros(vec![2, 3, 7, 5]).unwrap()).unwrap();
        assert_eq!(y.shape(), &[2, 4, 4, 3]);
    }
}
