//! Classifier head: a small dense network `input_dim → hidden_dims… → 2`
//!
//! Hidden layers use ReLU; dropout (if the head was trained with it) is the
//! identity at inference. The two outputs go through a sigmoid and the score
//! is `out[1] / (out[0] + out[1])`.

use curator_common::db::{HeadConfig, HeadParams, LayerParams};
use curator_common::{Error, Result};

/// Number of head outputs (negative, positive)
pub const OUTPUT_DIM: usize = 2;

#[derive(Debug, Clone, PartialEq)]
struct DenseLayer {
    /// `weights[out][in]`
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

impl DenseLayer {
    fn from_params(index: usize, params: &LayerParams, in_dim: usize, out_dim: usize) -> Result<Self> {
        if params.weights.len() != out_dim || params.bias.len() != out_dim {
            return Err(Error::InvalidInput(format!(
                "layer {}: expected {} outputs, got {} weight rows and {} biases",
                index,
                out_dim,
                params.weights.len(),
                params.bias.len()
            )));
        }
        if let Some(row) = params.weights.iter().position(|r| r.len() != in_dim) {
            return Err(Error::InvalidInput(format!(
                "layer {}: weight row {} has {} inputs, expected {}",
                index,
                row,
                params.weights[row].len(),
                in_dim
            )));
        }

        Ok(Self {
            weights: params.weights.clone(),
            bias: params.bias.clone(),
        })
    }

    fn forward(&self, input: &[f32]) -> Vec<f32> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>() + b)
            .collect()
    }
}

fn relu(values: &mut [f32]) {
    for v in values {
        *v = v.max(0.0);
    }
}

/// `ln(sigmoid(x))` without underflowing to `ln(0)` for large negative `x`
fn log_sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        -(-x).exp().ln_1p()
    } else {
        x - x.exp().ln_1p()
    }
}

/// One curation mode's trained head
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierHead {
    config: HeadConfig,
    layers: Vec<DenseLayer>,
}

impl ClassifierHead {
    /// Build a head from stored parameters, checking every layer shape
    pub fn from_params(params: &HeadParams) -> Result<Self> {
        let config = &params.config;
        if config.input_dim == 0 {
            return Err(Error::InvalidInput("head input_dim must be positive".to_string()));
        }

        let expected_layers = config.hidden_dims.len() + 1;
        if params.layers.len() != expected_layers {
            return Err(Error::InvalidInput(format!(
                "head has {} layers, config needs {}",
                params.layers.len(),
                expected_layers
            )));
        }

        let mut dims = Vec::with_capacity(expected_layers + 1);
        dims.push(config.input_dim);
        dims.extend(&config.hidden_dims);
        dims.push(OUTPUT_DIM);

        let layers = params
            .layers
            .iter()
            .enumerate()
            .map(|(i, layer)| DenseLayer::from_params(i, layer, dims[i], dims[i + 1]))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            config: config.clone(),
            layers,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.config.input_dim
    }

    pub fn config(&self) -> &HeadConfig {
        &self.config
    }

    /// Score a feature vector, in [0, 1]
    pub fn score(&self, features: &[f32]) -> Result<f32> {
        if features.len() != self.config.input_dim {
            return Err(Error::InvalidInput(format!(
                "feature vector has {} values, head expects {}",
                features.len(),
                self.config.input_dim
            )));
        }

        let mut activations = features.to_vec();
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            activations = layer.forward(&activations);
            if i < last {
                relu(&mut activations);
            }
        }

        // sigmoid(p) / (sigmoid(n) + sigmoid(p)), taken in log space so two
        // saturated outputs do not divide 0 by 0
        let ratio = (log_sigmoid(activations[0]) - log_sigmoid(activations[1])).exp();
        Ok(1.0 / (1.0 + ratio))
    }
}
