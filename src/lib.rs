//! A small neural-network training engine.
//!
//! `rust-nn` is a from-scratch implementation of the pieces needed to train
//! feed-forward and small convolutional networks: a dense tensor type, layers
//! with hand-derived gradients, losses, optimizers and a [`Sequential`]
//! container that wires them together. There is no autograd tape; every layer
//! implements its own `backward`.
//!
//! # Design goals
//!
//! - Clear contracts: shapes are validated at every layer boundary and all
//!   violations come back as [`Error`], never as a panic.
//! - Explicit state: a layer's forward cache lives exactly until its backward
//!   (or [`Layer::clear_cache`]); optimizers key running statistics by a
//!   per-layer [`ParamId`].
//! - Parallel where it pays: convolution and pooling process batch items on
//!   the rayon pool.
//!
//! # Data layout and shapes
//!
//! - Scalars are `f64`, stored row-major in [`Tensor`].
//! - [`Linear`] takes `(batch, in_features)`; weights are `(in, out)`.
//! - [`Conv2d`] and [`MaxPool2d`] take channel-first `(batch, C, H, W)`.
//! - [`Softmax`] is meant to be the last layer in front of
//!   [`CrossEntropyLoss`]; its backward passes the gradient through.
//!
//! # Quick start
//!
//! ```rust
//! use rust_nn::{Adam, Dataset, FitConfig, Linear, MseLoss, Sequential, Shuffle, Sigmoid, Tensor};
//!
//! # fn main() -> rust_nn::Result<()> {
//! let xs = vec![
//!     vec![0.0, 0.0],
//!     vec![0.0, 1.0],
//!     vec![1.0, 0.0],
//!     vec![1.0, 1.0],
//! ];
//! let ys = vec![vec![0.0], vec![1.0], vec![1.0], vec![0.0]];
//! let train = Dataset::from_rows(&xs, &ys)?;
//!
//! let mut model = Sequential::new()
//!     .with_layer(Linear::new_with_seed(2, 8, 0)?)
//!     .with_layer(Sigmoid::new())
//!     .with_layer(Linear::new_with_seed(8, 1, 1)?)
//!     .with_layer(Sigmoid::new())
//!     .with_optimizer(Box::new(Adam::with_defaults(0.05)?));
//!
//! let report = model.fit(
//!     &train,
//!     &mut MseLoss::new(),
//!     &FitConfig {
//!         epochs: 10,
//!         batch_size: 4,
//!         shuffle: Shuffle::None,
//!     },
//! )?;
//! assert_eq!(report.epoch_losses.len(), 10);
//!
//! let y = model.predict(&Tensor::from_rows(&[vec![1.0, 0.0]])?)?;
//! assert_eq!(y.shape(), &[1, 1]);
//! # Ok(())
//! # }
//! ```
//!
//! # Driving the chain by hand
//!
//! ```rust
//! use rust_nn::{CrossEntropyLoss, Linear, Loss, Sequential, Sgd, Softmax, Tensor};
//!
//! # fn main() -> rust_nn::Result<()> {
//! let mut model = Sequential::new()
//!     .with_layer(Linear::new_with_seed(3, 2, 7)?)
//!     .with_layer(Softmax::new())
//!     .with_optimizer(Box::new(Sgd::new(0.1)?));
//! let mut loss = CrossEntropyLoss::new();
//!
//! let x = Tensor::from_rows(&[vec![0.1, -0.2, 0.3]])?;
//! let t = Tensor::from_rows(&[vec![0.0, 1.0]])?;
//!
//! let p = model.forward(&x)?;
//! let _l = loss.forward(&p, &t)?;
//! model.backward(&loss.backward()?)?; // also applies the SGD update
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod conv;
pub mod data;
pub mod dropout;
pub mod error;
pub mod flatten;
pub mod layer;
pub mod linear;
pub mod loss;
pub(crate) mod matmul;
pub mod metrics;
pub mod optim;
pub mod pool;
pub mod sequential;
pub mod tensor;
pub mod train;

#[cfg(feature = "serde")]
pub mod persistence;

pub use activation::{LeakyReLU, ReLU, SiLU, Sigmoid, Softmax};
pub use conv::Conv2d;
pub use data::Dataset;
pub use dropout::Dropout;
pub use error::{Error, Result};
pub use flatten::Flatten;
pub use layer::{Layer, LayerKind, ParamId};
pub use linear::Linear;
pub use loss::{CrossEntropyLoss, Loss, MseLoss};
pub use metrics::Metric;
pub use optim::{Adam, Optimizer, OptimizerConfig, Sgd, SgdMomentum, StateKeying};
pub use pool::MaxPool2d;
pub use sequential::Sequential;
pub use tensor::Tensor;
pub use train::{FitConfig, FitReport, Shuffle};
