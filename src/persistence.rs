//! Model serialization/deserialization (feature: `serde`).
//!
//! This module defines a versioned, stable JSON format for [`Sequential`].
//!
//! Design notes:
//! - Layers are written as tagged records (`{"kind": "linear", ...}`) built
//!   from [`LayerKind`], not by serializing the layer structs, so the file
//!   format stays stable if internals change.
//! - Parametric layers carry `weights` / `biases` as `{shape, data}`.
//! - The optimizer is stored as hyperparameters only; running statistics
//!   start fresh after a load.
//! - Deserialization validates the version, tensor element counts, parameter
//!   shapes against the layer hyperparameters, and finiteness.

use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    Conv2d, Dropout, Error, Flatten, Layer, LayerKind, LeakyReLU, Linear, MaxPool2d,
    OptimizerConfig, ReLU, Result, Sequential, SiLU, Sigmoid, Softmax, Tensor,
};

pub const MODEL_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedModel {
    pub format_version: u32,
    pub layers: Vec<SerializedLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimizer: Option<OptimizerConfig>,
}

/// Row-major tensor payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SerializedLayer {
    Linear {
        in_features: usize,
        out_features: usize,
        /// `(in_features, out_features)`
        weights: SerializedTensor,
        /// `(1, out_features)`
        biases: SerializedTensor,
    },
    Conv2d {
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        /// `(out_channels, in_channels, kernel_size, kernel_size)`
        weights: SerializedTensor,
        /// `(out_channels)`
        biases: SerializedTensor,
    },
    MaxPool2d {
        pool_size: usize,
        stride: usize,
    },
    Flatten,
    Dropout {
        p: f64,
    },
    Relu,
    LeakyRelu {
        alpha: f64,
    },
    Sigmoid,
    Silu,
    Softmax,
}

impl From<&Tensor> for SerializedTensor {
    fn from(t: &Tensor) -> Self {
        Self {
            shape: t.shape().to_vec(),
            data: t.data().to_vec(),
        }
    }
}

impl SerializedTensor {
    /// Convert to a tensor, requiring `expected` as its shape.
    fn into_tensor(self, what: &str, expected: &[usize]) -> Result<Tensor> {
        if self.shape != expected {
            return Err(Error::InvalidData(format!(
                "{what} shape {:?} does not match expected {expected:?}",
                self.shape
            )));
        }
        if self.data.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidData(format!(
                "{what} must contain only finite values"
            )));
        }
        Tensor::new(self.shape, self.data).map_err(|e| Error::InvalidData(format!("{what}: {e}")))
    }
}

fn params(layer: &dyn Layer) -> Result<(SerializedTensor, SerializedTensor)> {
    match (layer.weights(), layer.biases()) {
        (Some(w), Some(b)) => Ok((w.into(), b.into())),
        _ => Err(Error::InvalidState(format!(
            "{layer} reports a parametric kind but exposes no parameters"
        ))),
    }
}

impl SerializedLayer {
    /// Snapshot hyperparameters and (copies of) parameters of `layer`.
    pub fn from_layer(layer: &dyn Layer) -> Result<Self> {
        Ok(match layer.kind() {
            LayerKind::Linear {
                in_features,
                out_features,
            } => {
                let (weights, biases) = params(layer)?;
                SerializedLayer::Linear {
                    in_features,
                    out_features,
                    weights,
                    biases,
                }
            }
            LayerKind::Conv2d {
                in_channels,
                out_channels,
                kernel_size,
                stride,
                padding,
            } => {
                let (weights, biases) = params(layer)?;
                SerializedLayer::Conv2d {
                    in_channels,
                    out_channels,
                    kernel_size,
                    stride,
                    padding,
                    weights,
                    biases,
                }
            }
            LayerKind::MaxPool2d { pool_size, stride } => {
                SerializedLayer::MaxPool2d { pool_size, stride }
            }
            LayerKind::Flatten => SerializedLayer::Flatten,
            LayerKind::Dropout { p } => SerializedLayer::Dropout { p },
            LayerKind::ReLU => SerializedLayer::Relu,
            LayerKind::LeakyReLU { alpha } => SerializedLayer::LeakyRelu { alpha },
            LayerKind::Sigmoid => SerializedLayer::Sigmoid,
            LayerKind::SiLU => SerializedLayer::Silu,
            LayerKind::Softmax => SerializedLayer::Softmax,
        })
    }

    fn into_layer(self) -> Result<Box<dyn Layer>> {
        let layer: Box<dyn Layer> = match self {
            SerializedLayer::Linear {
                in_features,
                out_features,
                weights,
                biases,
            } => {
                let w = weights.into_tensor("linear weights", &[in_features, out_features])?;
                let b = biases.into_tensor("linear biases", &[1, out_features])?;
                Box::new(Linear::from_parts(w, b)?)
            }
            SerializedLayer::Conv2d {
                in_channels,
                out_channels,
                kernel_size,
                stride,
                padding,
                weights,
                biases,
            } => {
                let w = weights.into_tensor(
                    "conv2d weights",
                    &[out_channels, in_channels, kernel_size, kernel_size],
                )?;
                let b = biases.into_tensor("conv2d biases", &[out_channels])?;
                Box::new(Conv2d::from_parts(w, b, stride, padding)?)
            }
            SerializedLayer::MaxPool2d { pool_size, stride } => {
                Box::new(MaxPool2d::new(pool_size, stride)?)
            }
            SerializedLayer::Flatten => Box::new(Flatten::new()),
            SerializedLayer::Dropout { p } => Box::new(Dropout::new(p)?),
            SerializedLayer::Relu => Box::new(ReLU::new()),
            SerializedLayer::LeakyRelu { alpha } => Box::new(LeakyReLU::new(alpha)?),
            SerializedLayer::Sigmoid => Box::new(Sigmoid::new()),
            SerializedLayer::Silu => Box::new(SiLU::new()),
            SerializedLayer::Softmax => Box::new(Softmax::new()),
        };
        Ok(layer)
    }
}

impl TryFrom<&Sequential> for SerializedModel {
    type Error = Error;

    fn try_from(model: &Sequential) -> Result<Self> {
        let layers = model
            .layers()
            .iter()
            .map(|l| SerializedLayer::from_layer(l.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            format_version: MODEL_FORMAT_VERSION,
            layers,
            optimizer: model.optimizer().map(|o| o.config()),
        })
    }
}

impl TryFrom<SerializedModel> for Sequential {
    type Error = Error;

    fn try_from(value: SerializedModel) -> Result<Self> {
        if value.format_version != MODEL_FORMAT_VERSION {
            return Err(Error::InvalidData(format!(
                "unsupported model format_version {}; expected {}",
                value.format_version, MODEL_FORMAT_VERSION
            )));
        }

        let mut model = Sequential::new();
        for (i, layer) in value.layers.into_iter().enumerate() {
            let l = layer
                .into_layer()
                .map_err(|e| Error::InvalidData(format!("layer {i} invalid: {e}")))?;
            model.add_boxed(l);
        }
        if let Some(cfg) = value.optimizer {
            let opt = cfg
                .build()
                .map_err(|e| Error::InvalidData(format!("invalid optimizer: {e}")))?;
            model.set_optimizer(opt);
        }
        Ok(model)
    }
}

impl Sequential {
    /// Serialize the model to a pretty-printed JSON string.
    pub fn to_json_string_pretty(&self) -> Result<String> {
        let ser = SerializedModel::try_from(self)?;
        serde_json::to_string_pretty(&ser)
            .map_err(|e| Error::InvalidData(format!("failed to serialize model: {e}")))
    }

    /// Serialize the model to a compact JSON string.
    pub fn to_json_string(&self) -> Result<String> {
        let ser = SerializedModel::try_from(self)?;
        serde_json::to_string(&ser)
            .map_err(|e| Error::InvalidData(format!("failed to serialize model: {e}")))
    }

    /// Parse a model from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let ser: SerializedModel = serde_json::from_str(s)
            .map_err(|e| Error::InvalidData(format!("failed to parse model json: {e}")))?;
        ser.try_into()
    }

    /// Save the model to a JSON file (pretty-printed).
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let s = self.to_json_string_pretty()?;
        let p = path.as_ref();
        std::fs::write(p, s)
            .map_err(|e| Error::InvalidData(format!("failed to write {}: {e}", p.display())))?;
        info!("saved model with {} layers to {}", self.len(), p.display());
        Ok(())
    }

    /// Load a model from a JSON file.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let s = std::fs::read_to_string(p)
            .map_err(|e| Error::InvalidData(format!("failed to read {}: {e}", p.display())))?;
        let model = Self::from_json_str(&s)?;
        info!("loaded model with {} layers from {}", model.len(), p.display());
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Adam;

    const GOLDEN: &str = r#"{
  "format_version": 1,
  "layers": [
    {
      "kind": "linear",
      "in_features": 2,
      "out_features": 1,
      "weights": { "shape": [2, 1], "data": [0.5, -1.5] },
      "biases": { "shape": [1, 1], "data": [0.25] }
    },
    { "kind": "sigmoid" }
  ],
  "optimizer": { "kind": "sgd_momentum", "lr": 0.1, "momentum": 0.9 }
}"#;

    #[test]
    fn parses_hand_written_model() {
        let mut model = Sequential::from_json_str(GOLDEN).unwrap();
        assert_eq!(model.len(), 2);
        assert_eq!(
            model.layers()[0].kind(),
            LayerKind::Linear {
                in_features: 2,
                out_features: 1
            }
        );
        assert_eq!(
            model.optimizer().unwrap().config(),
            OptimizerConfig::SgdMomentum {
                lr: 0.1,
                momentum: 0.9
            }
        );
        let y = model.forward(&Tensor::new(vec![1, 2], vec![2.0, 1.0]).unwrap()).unwrap();
        // sigmoid(1 - 1.5 + 0.25)
        assert!((y.data()[0] - crate::activation::sigmoid(-0.25)).abs() < 1e-15);
    }

    #[test]
    fn json_round_trip_is_stable() {
        let model = Sequential::new()
            .with_layer(Conv2d::new_with_seed(1, 2, 3, 1, 1, 4).unwrap())
            .with_layer(LeakyReLU::new(0.1).unwrap())
            .with_layer(MaxPool2d::new(2, 0).unwrap())
            .with_layer(Flatten::new())
            .with_layer(Dropout::new(0.25).unwrap())
            .with_layer(Linear::new_with_seed(8, 3, 5).unwrap())
            .with_layer(SiLU::new())
            .with_layer(ReLU::new())
            .with_layer(Softmax::new())
            .with_optimizer(Box::new(Adam::with_defaults(0.01).unwrap()));

        let json = model.to_json_string_pretty().unwrap();
        let loaded = Sequential::from_json_str(&json).unwrap();
        assert_eq!(loaded.to_json_string_pretty().unwrap(), json);
        let kinds: Vec<LayerKind> = loaded.layers().iter().map(|l| l.kind()).collect();
        let expected: Vec<LayerKind> = model.layers().iter().map(|l| l.kind()).collect();
        assert_eq!(kinds, expected);
        assert!(json.contains(r#""kind": "max_pool2d""#));
    }

    #[test]
    fn rejects_unknown_version() {
        let bad = r#"{"format_version":999,"layers":[]}"#;
        let err = Sequential::from_json_str(bad).unwrap_err();
        assert!(format!("{err}").contains("format_version"));
    }

    #[test]
    fn rejects_inconsistent_parameters() {
        let wrong_shape = GOLDEN.replace(r#""shape": [2, 1]"#, r#""shape": [1, 2]"#);
        assert!(matches!(
            Sequential::from_json_str(&wrong_shape),
            Err(Error::InvalidData(_))
        ));

        let wrong_len = GOLDEN.replace("[0.5, -1.5]", "[0.5]");
        assert!(matches!(
            Sequential::from_json_str(&wrong_len),
            Err(Error::InvalidData(_))
        ));

        let bad_opt = GOLDEN.replace(r#""momentum": 0.9"#, r#""momentum": 1.5"#);
        assert!(matches!(
            Sequential::from_json_str(&bad_opt),
            Err(Error::InvalidData(_))
        ));

        let bad_kind = GOLDEN.replace(r#""kind": "sigmoid""#, r#""kind": "tanh""#);
        assert!(Sequential::from_json_str(&bad_kind).is_err());
    }
}
