//! Dense row-major tensors.
//!
//! A `Tensor` is an owned, contiguous `f64` buffer plus an explicit shape. The
//! rightmost dimension varies fastest. Tensors are value-like: cloning copies
//! the buffer, so a layer that caches its input never aliases the caller's
//! live tensor.

use std::fmt;

use crate::matmul::gemm_f64;
use crate::{Error, Result};

#[derive(Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl Tensor {
    /// Build a tensor from a shape and a row-major buffer.
    ///
    /// Fails with `ShapeMismatch` if `data.len()` is not the product of `shape`,
    /// or if the shape is empty or contains a zero dimension.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<f64>) -> Result<Self> {
        let shape = shape.into();
        let expected = element_count(&shape)?;
        if data.len() != expected {
            return Err(Error::ShapeMismatch(format!(
                "shape {shape:?} requires {expected} elements, got {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// A zero-filled tensor. The shape is validated like [`Tensor::new`].
    pub fn zeros(shape: impl Into<Vec<usize>>) -> Result<Self> {
        let shape = shape.into();
        let len = element_count(&shape)?;
        Ok(Self {
            shape,
            data: vec![0.0; len],
        })
    }

    /// A tensor of the same shape as `self`, filled with zeros.
    pub fn zeros_like(&self) -> Self {
        Self {
            shape: self.shape.clone(),
            data: vec![0.0; self.data.len()],
        }
    }

    /// Build a rank-2 tensor from equally sized rows.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let Some(first) = rows.first() else {
            return Err(Error::ShapeMismatch("rows must not be empty".to_owned()));
        };
        let cols = first.len();
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(Error::ShapeMismatch(format!(
                    "row {i} has len {}, expected {cols}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }
        Self::new(vec![rows.len(), cols], data)
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    #[inline]
    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    /// `(rows, cols)` of a rank-2 tensor.
    pub fn dims2(&self) -> Result<(usize, usize)> {
        match self.shape[..] {
            [r, c] => Ok((r, c)),
            _ => Err(Error::ShapeMismatch(format!(
                "expected a rank-2 tensor, got shape {:?}",
                self.shape
            ))),
        }
    }

    /// `[batch, channels, height, width]` of a rank-4 tensor.
    pub fn dims4(&self) -> Result<[usize; 4]> {
        match self.shape[..] {
            [n, c, h, w] => Ok([n, c, h, w]),
            _ => Err(Error::ShapeMismatch(format!(
                "expected a rank-4 tensor, got shape {:?}",
                self.shape
            ))),
        }
    }

    /// Reinterpret the buffer under a new shape with the same element count.
    pub fn reshape(&self, shape: impl Into<Vec<usize>>) -> Result<Self> {
        self.clone().into_reshaped(shape)
    }

    /// Like [`Tensor::reshape`] but reuses the buffer.
    pub fn into_reshaped(self, shape: impl Into<Vec<usize>>) -> Result<Self> {
        let shape = shape.into();
        let n = element_count(&shape)?;
        if n != self.data.len() {
            return Err(Error::ShapeMismatch(format!(
                "cannot reshape {:?} ({} elements) into {shape:?} ({n} elements)",
                self.shape,
                self.data.len()
            )));
        }
        Ok(Self {
            shape,
            data: self.data,
        })
    }

    /// Matrix product of two rank-2 tensors.
    pub fn matmul(&self, rhs: &Tensor) -> Result<Tensor> {
        let (m, k1) = self.dims2()?;
        let (k2, n) = rhs.dims2()?;
        if k1 != k2 {
            return Err(Error::ShapeMismatch(format!(
                "matmul [{m}x{k1}] @ [{k2}x{n}]: inner dimensions must match"
            )));
        }
        let mut out = vec![0.0; m * n];
        gemm_f64(m, n, k1, &self.data, &rhs.data, &mut out);
        Ok(Tensor {
            shape: vec![m, n],
            data: out,
        })
    }

    /// Transpose of a rank-2 tensor.
    pub fn transpose(&self) -> Result<Tensor> {
        let (rows, cols) = self.dims2()?;
        let mut out = vec![0.0; rows * cols];
        for i in 0..rows {
            for j in 0..cols {
                out[j * rows + i] = self.data[i * cols + j];
            }
        }
        Ok(Tensor {
            shape: vec![cols, rows],
            data: out,
        })
    }

    /// Elementwise sum. Shapes must be equal.
    pub fn add(&self, rhs: &Tensor) -> Result<Tensor> {
        self.zip_with(rhs, "add", |a, b| a + b)
    }

    /// Elementwise difference. Shapes must be equal.
    pub fn sub(&self, rhs: &Tensor) -> Result<Tensor> {
        self.zip_with(rhs, "sub", |a, b| a - b)
    }

    /// Elementwise (Hadamard) product. Shapes must be equal.
    pub fn mul(&self, rhs: &Tensor) -> Result<Tensor> {
        self.zip_with(rhs, "mul", |a, b| a * b)
    }

    /// Add a `(1, cols)` row to every row of a `(rows, cols)` tensor.
    pub fn add_row(&self, row: &Tensor) -> Result<Tensor> {
        let (rows, cols) = self.dims2()?;
        if row.shape != [1, cols] {
            return Err(Error::ShapeMismatch(format!(
                "cannot broadcast {:?} over rows of {:?}",
                row.shape, self.shape
            )));
        }
        let mut out = self.data.clone();
        for r in 0..rows {
            for (o, &b) in out[r * cols..(r + 1) * cols].iter_mut().zip(&row.data) {
                *o += b;
            }
        }
        Ok(Tensor {
            shape: self.shape.clone(),
            data: out,
        })
    }

    /// Sum a rank-2 tensor along `axis`, keeping the reduced axis with size 1.
    ///
    /// `axis == 0` sums each column into a `(1, cols)` row;
    /// `axis == 1` sums each row into a `(rows, 1)` column.
    pub fn sum_axis(&self, axis: usize) -> Result<Tensor> {
        let (rows, cols) = self.dims2()?;
        match axis {
            0 => {
                let mut out = vec![0.0; cols];
                for r in 0..rows {
                    for (o, &v) in out.iter_mut().zip(&self.data[r * cols..(r + 1) * cols]) {
                        *o += v;
                    }
                }
                Ok(Tensor {
                    shape: vec![1, cols],
                    data: out,
                })
            }
            1 => {
                let out = self
                    .data
                    .chunks_exact(cols)
                    .map(|row| row.iter().sum())
                    .collect();
                Ok(Tensor {
                    shape: vec![rows, 1],
                    data: out,
                })
            }
            _ => Err(Error::ShapeMismatch(format!(
                "axis {axis} out of range for a rank-2 tensor"
            ))),
        }
    }

    /// Sum of all elements.
    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Apply `f` to every element.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Tensor {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Multiply every element by `s`.
    pub fn scale(&self, s: f64) -> Tensor {
        self.map(|v| v * s)
    }

    fn zip_with(&self, rhs: &Tensor, op: &str, f: impl Fn(f64, f64) -> f64) -> Result<Tensor> {
        if self.shape != rhs.shape {
            return Err(Error::ShapeMismatch(format!(
                "{op}: {:?} vs {:?}",
                self.shape, rhs.shape
            )));
        }
        Ok(Tensor {
            shape: self.shape.clone(),
            data: self
                .data
                .iter()
                .zip(&rhs.data)
                .map(|(&a, &b)| f(a, b))
                .collect(),
        })
    }
}

/// Number of elements a valid shape describes.
///
/// Shapes must be non-empty with positive dimensions and a product that fits
/// in `usize`.
fn element_count(shape: &[usize]) -> Result<usize> {
    if shape.is_empty() || shape.contains(&0) {
        return Err(Error::ShapeMismatch(format!(
            "shape must be non-empty with positive dimensions, got {shape:?}"
        )));
    }
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| Error::ShapeMismatch(format!("shape {shape:?} overflows usize")))
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const PREVIEW: usize = 8;
        write!(f, "Tensor{:?} ", self.shape)?;
        let mut list = f.debug_list();
        list.entries(self.data.iter().take(PREVIEW));
        if self.data.len() > PREVIEW {
            list.entry(&format_args!("... {} more", self.data.len() - PREVIEW));
        }
        list.finish()
    }
}
