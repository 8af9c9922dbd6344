use std::fmt;

use log::trace;
use rayon::prelude::*;

use crate::layer::{check_grad_shape, not_cached};
use crate::{Error, Layer, LayerKind, Result, Tensor};

#[derive(Debug, Clone)]
struct Cache {
    input_shape: [usize; 4],
    output_shape: [usize; 4],
    /// For every output element, the flat offset of its maximum inside the
    /// owning `(H, W)` input plane.
    argmax: Vec<usize>,
}

/// Max pooling over `K x K` windows of a `(batch, C, H, W)` tensor.
///
/// Output size per axis is `floor((H - K) / S) + 1`. Backward routes each
/// upstream scalar to the input position that won its window.
#[derive(Debug, Clone)]
pub struct MaxPool2d {
    pool_size: usize,
    stride: usize,
    cache: Option<Cache>,
}

impl MaxPool2d {
    /// A `stride` of 0 means "same as `pool_size`".
    pub fn new(pool_size: usize, stride: usize) -> Result<Self> {
        if pool_size == 0 {
            return Err(Error::InvalidConfig("max pool size must be > 0".to_owned()));
        }
        Ok(Self {
            pool_size,
            stride: if stride == 0 { pool_size } else { stride },
            cache: None,
        })
    }

    #[inline]
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn output_size(&self, height: usize, width: usize) -> Result<(usize, usize)> {
        let axis = |len: usize| {
            len.checked_sub(self.pool_size)
                .map(|span| span / self.stride + 1)
        };
        match (axis(height), axis(width)) {
            (Some(oh), Some(ow)) => Ok((oh, ow)),
            _ => Err(Error::InvalidConfig(format!(
                "max pool window {} does not fit a {height}x{width} input",
                self.pool_size
            ))),
        }
    }
}

impl Layer for MaxPool2d {
    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let [n, c, h, w] = input.dims4()?;
        let (oh, ow) = self.output_size(h, w)?;
        trace!("{self}: forward {:?} -> [{n}, {c}, {oh}, {ow}]", input.shape());

        let (k, s) = (self.pool_size, self.stride);
        let x = input.data();
        let plane_out = oh * ow;
        let item_out = c * plane_out;

        let mut out = vec![0.0; n * item_out];
        let mut argmax = vec![0usize; n * item_out];
        out.par_chunks_mut(item_out)
            .zip(argmax.par_chunks_mut(item_out))
            .enumerate()
            .for_each(|(b, (out_b, idx_b))| {
                for ch in 0..c {
                    let plane = &x[(b * c + ch) * h * w..(b * c + ch + 1) * h * w];
                    for oy in 0..oh {
                        for ox in 0..ow {
                            let mut best = f64::NEG_INFINITY;
                            let mut best_idx = (oy * s) * w + ox * s;
                            for ky in 0..k {
                                let iy = oy * s + ky;
                                if iy >= h {
                                    break;
                                }
                                for kx in 0..k {
                                    let ix = ox * s + kx;
                                    if ix >= w {
                                        break;
                                    }
                                    let v = plane[iy * w + ix];
                                    if v > best {
                                        best = v;
                                        best_idx = iy * w + ix;
                                    }
                                }
                            }
                            let o = ch * plane_out + oy * ow + ox;
                            out_b[o] = best;
                            idx_b[o] = best_idx;
                        }
                    }
                }
            });

        let output_shape = [n, c, oh, ow];
        self.cache = Some(Cache {
            input_shape: [n, c, h, w],
            output_shape,
            argmax,
        });
        Tensor::new(output_shape.to_vec(), out)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let cache = self.cache.as_ref().ok_or_else(|| not_cached("MaxPool2d"))?;
        check_grad_shape("MaxPool2d", &cache.output_shape, grad_output)?;

        let [n, c, h, w] = cache.input_shape;
        let [_, _, oh, ow] = cache.output_shape;
        let plane_out = oh * ow;
        let g = grad_output.data();
        let argmax = &cache.argmax;

        let mut dx = vec![0.0; n * c * h * w];
        dx.par_chunks_mut(c * h * w)
            .enumerate()
            .for_each(|(b, dx_b)| {
                for ch in 0..c {
                    let base = (b * c + ch) * plane_out;
                    for o in 0..plane_out {
                        dx_b[ch * h * w + argmax[base + o]] += g[base + o];
                    }
                }
            });

        let d_input = Tensor::new(cache.input_shape.to_vec(), dx)?;
        self.cache = None;
        Ok(d_input)
    }

    fn kind(&self) -> LayerKind {
        LayerKind::MaxPool2d {
            pool_size: self.pool_size,
            stride: self.stride,
        }
    }

    fn clear_cache(&mut self) {
        self.cache = None;
    }
}

impl fmt::Display for MaxPool2d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MaxPool2d(kernel_size={}, stride={})",
            self.pool_size, self.stride
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_defaults_to_pool_size_and_zero_pool_is_rejected() {
        assert_eq!(MaxPool2d::new(3, 0).unwrap().stride(), 3);
        assert_eq!(MaxPool2d::new(3, 1).unwrap().stride(), 1);
        assert!(matches!(MaxPool2d::new(0, 2), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn picks_window_maxima_and_routes_gradient_back() {
        let mut pool = MaxPool2d::new(2, 2).unwrap();
        #[rustfmt::skip]
        let x = Tensor::new(vec![1, 1, 4, 4], vec![
            1.0, 3.0, 2.0, 0.0,
            4.0, 2.0, 1.0, 5.0,
            0.0, 1.0, 9.0, 8.0,
            6.0, 2.0, 7.0, 3.0,
        ])
        .unwrap();
        let y = pool.forward(&x).unwrap();
        assert_eq!(y.shape(), &[1, 1, 2, 2]);
        assert_eq!(y.data(), &[4.0, 5.0, 6.0, 9.0]);

        let g = Tensor::new(vec![1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let dx = pool.backward(&g).unwrap();
        #[rustfmt::skip]
        assert_eq!(dx.data(), &[
            0.0, 0.0, 0.0, 0.0,
            1.0, 0.0, 0.0, 2.0,
            0.0, 0.0, 4.0, 0.0,
            3.0, 0.0, 0.0, 0.0,
        ]);
    }

    #[test]
    fn overlapping_windows_accumulate_on_shared_maximum() {
        let mut pool = MaxPool2d::new(2, 1).unwrap();
        let x = Tensor::new(vec![1, 1, 2, 3], vec![0.0, 9.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
        let y = pool.forward(&x).unwrap();
        assert_eq!(y.data(), &[9.0, 9.0]);

        let g = Tensor::new(vec![1, 1, 1, 2], vec![1.5, 2.5]).unwrap();
        let dx = pool.backward(&g).unwrap();
        assert_eq!(dx.data(), &[0.0, 4.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn handles_all_negative_windows_and_multiple_channels() {
        let mut pool = MaxPool2d::new(2, 0).unwrap();
        let x = Tensor::new(
            vec![2, 2, 2, 2],
            vec![
                -4.0, -3.0, -2.0, -1.0, // b0 c0
                -1.0, -2.0, -3.0, -4.0, // b0 c1
                -9.0, -9.0, -9.0, -8.0, // b1 c0
                0.0, 1.0, 2.0, 3.0, // b1 c1
            ],
        )
        .unwrap();
        let y = pool.forward(&x).unwrap();
        assert_eq!(y.shape(), &[2, 2, 1, 1]);
        assert_eq!(y.data(), &[-1.0, -1.0, -8.0, 3.0]);
    }

    #[test]
    fn rejects_small_input_wrong_rank_and_uncached_backward() {
        let mut pool = MaxPool2d::new(3, 1).unwrap();
        assert!(matches!(
            pool.forward(&Tensor::zeros(vec![1, 1, 2, 5]).unwrap()),
            Err(Error::InvalidConfig(_))
        ));
        assert!(pool.forward(&Tensor::zeros(vec![1, 4, 4]).unwrap()).is_err());
        assert!(matches!(
            pool.backward(&Tensor::zeros(vec![1, 1, 1, 1]).unwrap()),
            Err(Error::InvalidState(_))
        ));
    }
}
