//! Supervised datasets.
//!
//! A [`Dataset`] is a validated `(features, targets)` pair of tensors sharing
//! the leading (sample) dimension. Trailing dimensions are arbitrary, so the
//! same type carries `(N, D)` tabular data and `(N, C, H, W)` images.
//! Loading from files is left to callers.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::{Error, Result, Tensor};

/// Features and targets with a shared leading sample dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    features: Tensor,
    targets: Tensor,
}

impl Dataset {
    /// `features` is `(N, ...)` and `targets` is `(N, ...)`.
    pub fn new(features: Tensor, targets: Tensor) -> Result<Self> {
        if features.shape()[0] != targets.shape()[0] {
            return Err(Error::InvalidData(format!(
                "features have {} samples but targets have {}",
                features.shape()[0],
                targets.shape()[0]
            )));
        }
        Ok(Self { features, targets })
    }

    /// Build a rank-2 dataset from per-sample rows.
    ///
    /// This is a convenience constructor (it copies into contiguous storage).
    pub fn from_rows(features: &[Vec<f64>], targets: &[Vec<f64>]) -> Result<Self> {
        if features.len() != targets.len() {
            return Err(Error::InvalidData(format!(
                "features/targets length mismatch: {} vs {}",
                features.len(),
                targets.len()
            )));
        }
        let features = Tensor::from_rows(features).map_err(as_data_error)?;
        let targets = Tensor::from_rows(targets).map_err(as_data_error)?;
        Self::new(features, targets)
    }

    /// Number of samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.features.shape()[0]
    }

    /// Companion to [`len`](Self::len). Tensors have no zero dimensions, so
    /// this is always `false`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn features(&self) -> &Tensor {
        &self.features
    }

    #[inline]
    pub fn targets(&self) -> &Tensor {
        &self.targets
    }

    /// Gather the samples at `indices` (in that order) into a new batch.
    pub fn batch(&self, indices: &[usize]) -> Result<(Tensor, Tensor)> {
        Ok((
            gather(&self.features, indices)?,
            gather(&self.targets, indices)?,
        ))
    }

    /// Split into consecutive mini-batches; the last batch may be smaller.
    ///
    /// With `Some(seed)` the sample order is shuffled first.
    pub fn batches(&self, batch_size: usize, shuffle: Option<u64>) -> Result<Vec<(Tensor, Tensor)>> {
        if batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be > 0".to_owned()));
        }
        let mut order: Vec<usize> = (0..self.len()).collect();
        if let Some(seed) = shuffle {
            order.shuffle(&mut StdRng::seed_from_u64(seed));
        }
        order.chunks(batch_size).map(|idx| self.batch(idx)).collect()
    }

    /// Shuffle with `seed` and split into `(train, test)` with
    /// `floor(len * ratio)` training samples. Both parts must be non-empty.
    pub fn split(&self, ratio: f64, seed: u64) -> Result<(Dataset, Dataset)> {
        if !(ratio.is_finite() && ratio > 0.0 && ratio < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "split ratio must be in (0,1), got {ratio}"
            )));
        }
        let n_train = (self.len() as f64 * ratio) as usize;
        if n_train == 0 || n_train == self.len() {
            return Err(Error::InvalidConfig(format!(
                "split ratio {ratio} leaves an empty part for {} samples",
                self.len()
            )));
        }

        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));
        let (train_idx, test_idx) = order.split_at(n_train);

        let (xf, xt) = self.batch(train_idx)?;
        let (yf, yt) = self.batch(test_idx)?;
        Ok((Dataset::new(xf, xt)?, Dataset::new(yf, yt)?))
    }
}

fn as_data_error(err: Error) -> Error {
    match err {
        Error::InvalidData(msg) => Error::InvalidData(msg),
        other => Error::InvalidData(other.to_string()),
    }
}

/// Copy the rows `indices` of `src` (rows = slices along axis 0).
fn gather(src: &Tensor, indices: &[usize]) -> Result<Tensor> {
    let n = src.shape()[0];
    let row = src.len() / n;
    let mut data = Vec::with_capacity(indices.len() * row);
    for &i in indices {
        if i >= n {
            return Err(Error::InvalidData(format!(
                "sample index {i} out of range for {n} samples"
            )));
        }
        data.extend_from_slice(&src.data()[i * row..(i + 1) * row]);
    }
    let mut shape = src.shape().to_vec();
    shape[0] = indices.len();
    Tensor::new(shape, data)
}
