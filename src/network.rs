//! Value-function approximators.
//!
//! The agent only talks to [`QFunction`]: a batch of states in, one value
//! per action out, plus a single optimisation step toward given targets.
//! [`MlpQNetwork`] is the default implementation, a small fully connected
//! network trained with plain mini-batch SGD on mean squared error.

use crate::error::{PlaylistError, Result};
use log::trace;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// State vector → value per action.
pub trait QFunction {
    fn state_size(&self) -> usize;

    fn action_size(&self) -> usize;

    /// `states` is `batch × state_size`; returns `batch × action_size`.
    fn predict(&self, states: ArrayView2<'_, f64>) -> Result<Array2<f64>>;

    /// One optimisation step toward `targets`; returns the loss before it.
    fn fit(&mut self, states: ArrayView2<'_, f64>, targets: ArrayView2<'_, f64>) -> Result<f64>;

    /// Overwrite this instance's parameters with `other`'s.
    fn copy_from(&mut self, other: &Self) -> Result<()>
    where
        Self: Sized;

    fn save(&self, path: &Path) -> Result<()>;

    fn load(&mut self, path: &Path) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DenseLayer {
    /// `inputs × outputs`
    weights: Array2<f64>,
    bias: Array1<f64>,
}

impl DenseLayer {
    /// He-uniform initialisation.
    fn new<R: Rng + ?Sized>(inputs: usize, outputs: usize, rng: &mut R) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let limit = (6.0 / inputs as f64).sqrt();
        Self {
            weights: Array2::from_shape_fn((inputs, outputs), |_| rng.gen_range(-limit..limit)),
            bias: Array1::zeros(outputs),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SavedNetwork {
    architecture: Vec<usize>,
    learning_rate: f64,
    layers: Vec<DenseLayer>,
}

/// ReLU hidden layers, linear output.
#[derive(Debug, Clone, PartialEq)]
pub struct MlpQNetwork {
    layers: Vec<DenseLayer>,
    learning_rate: f64,
}

impl MlpQNetwork {
    pub fn new<R: Rng + ?Sized>(
        state_size: usize,
        action_size: usize,
        hidden_layers: &[usize],
        learning_rate: f64,
        rng: &mut R,
    ) -> Result<Self> {
        if state_size == 0 || action_size == 0 || hidden_layers.contains(&0) {
            return Err(PlaylistError::InvalidConfig(format!(
                "network layers must be non-empty: {state_size} -> {hidden_layers:?} -> {action_size}"
            )));
        }
        if !(learning_rate.is_finite() && learning_rate > 0.0) {
            return Err(PlaylistError::InvalidConfig(format!(
                "learning rate must be positive, got {learning_rate}"
            )));
        }

        let sizes: Vec<usize> = std::iter::once(state_size)
            .chain(hidden_layers.iter().copied())
            .chain(std::iter::once(action_size))
            .collect();
        let layers = sizes
            .windows(2)
            .map(|pair| DenseLayer::new(pair[0], pair[1], rng))
            .collect();

        Ok(Self { layers, learning_rate })
    }

    /// Layer widths from input to output.
    #[must_use]
    pub fn architecture(&self) -> Vec<usize> {
        let mut sizes: Vec<usize> = self.layers.iter().map(|l| l.weights.nrows()).collect();
        if let Some(last) = self.layers.last() {
            sizes.push(last.weights.ncols());
        }
        sizes
    }

    #[must_use]
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn check_input(&self, states: &ArrayView2<'_, f64>) -> Result<()> {
        if states.ncols() != self.state_size() {
            return Err(PlaylistError::ShapeMismatch {
                expected: format!("batch x {}", self.state_size()),
                found: format!("{} x {}", states.nrows(), states.ncols()),
            });
        }
        Ok(())
    }

    /// Activations of every layer, input first.
    fn forward(&self, states: ArrayView2<'_, f64>) -> Vec<Array2<f64>> {
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(states.to_owned());

        for (i, layer) in self.layers.iter().enumerate() {
            let input = &activations[activations.len() - 1];
            let mut z = input.dot(&layer.weights) + &layer.bias;
            if i + 1 < self.layers.len() {
                z.mapv_inplace(|v| v.max(0.0));
            }
            activations.push(z);
        }
        activations
    }
}

impl QFunction for MlpQNetwork {
    fn state_size(&self) -> usize {
        self.layers.first().map_or(0, |l| l.weights.nrows())
    }

    fn action_size(&self) -> usize {
        self.layers.last().map_or(0, |l| l.weights.ncols())
    }

    fn predict(&self, states: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        self.check_input(&states)?;
        let mut activations = self.forward(states);
        let output = activations.pop().unwrap_or_default();

        if output.iter().any(|v| !v.is_finite()) {
            return Err(PlaylistError::NonFiniteOutput("prediction"));
        }
        Ok(output)
    }

    fn fit(&mut self, states: ArrayView2<'_, f64>, targets: ArrayView2<'_, f64>) -> Result<f64> {
        self.check_input(&states)?;
        if targets.nrows() != states.nrows() || targets.ncols() != self.action_size() || states.nrows() == 0 {
            return Err(PlaylistError::ShapeMismatch {
                expected: format!("{} x {}", states.nrows(), self.action_size()),
                found: format!("{} x {}", targets.nrows(), targets.ncols()),
            });
        }

        let activations = self.forward(states);
        let Some(output) = activations.last() else {
            return Err(PlaylistError::NonFiniteOutput("forward pass"));
        };

        let diff = output - &targets;
        #[allow(clippy::cast_precision_loss)]
        let count = diff.len() as f64;
        let loss = diff.mapv(|d| d * d).sum() / count;
        if !loss.is_finite() {
            return Err(PlaylistError::NonFiniteOutput("loss"));
        }

        // dL/d(output) for mean squared error over every element.
        let mut grad = diff * (2.0 / count);
        let mut updates = Vec::with_capacity(self.layers.len());

        for (i, layer) in self.layers.iter().enumerate().rev() {
            let input = &activations[i];
            let grad_w = input.t().dot(&grad);
            let grad_b = grad.sum_axis(Axis(0));

            if i > 0 {
                let mut grad_prev = grad.dot(&layer.weights.t());
                grad_prev.zip_mut_with(input, |g, &a| {
                    if a <= 0.0 {
                        *g = 0.0;
                    }
                });
                grad = grad_prev;
            }
            updates.push((i, grad_w, grad_b));
        }

        let finite = updates
            .iter()
            .all(|(_, w, b)| w.iter().chain(b.iter()).all(|v| v.is_finite()));
        if !finite {
            return Err(PlaylistError::NonFiniteOutput("gradient"));
        }

        let lr = self.learning_rate;
        for (i, grad_w, grad_b) in updates {
            let layer = &mut self.layers[i];
            layer.weights.scaled_add(-lr, &grad_w);
            layer.bias.scaled_add(-lr, &grad_b);
        }

        trace!("SGD step on {} samples, loss {loss:.6}", states.nrows());
        Ok(loss)
    }

    fn copy_from(&mut self, other: &Self) -> Result<()> {
        if self.architecture() != other.architecture() {
            return Err(PlaylistError::ShapeMismatch {
                expected: format!("{:?}", self.architecture()),
                found: format!("{:?}", other.architecture()),
            });
        }
        self.layers.clone_from(&other.layers);
        Ok(())
    }

    fn save(&self, path: &Path) -> Result<()> {
        let persistence = |reason: String| PlaylistError::Persistence {
            path: path.to_path_buf(),
            reason,
        };

        let saved = SavedNetwork {
            architecture: self.architecture(),
            learning_rate: self.learning_rate,
            layers: self.layers.clone(),
        };
        let json = serde_json::to_string(&saved).map_err(|e| persistence(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| persistence(e.to_string()))?;
        }
        fs::write(path, json).map_err(|e| persistence(e.to_string()))
    }

    /// Replace parameters from `path`. On any failure `self` is unchanged.
    fn load(&mut self, path: &Path) -> Result<()> {
        let persistence = |reason: String| PlaylistError::Persistence {
            path: path.to_path_buf(),
            reason,
        };

        let raw = fs::read_to_string(path).map_err(|e| persistence(e.to_string()))?;
        let saved: SavedNetwork = serde_json::from_str(&raw).map_err(|e| persistence(e.to_string()))?;

        let candidate = MlpQNetwork {
            layers: saved.layers,
            learning_rate: self.learning_rate,
        };
        if saved.architecture != self.architecture() || candidate.architecture() != self.architecture() {
            return Err(persistence(format!(
                "architecture mismatch: model has {:?}, file has {:?}",
                self.architecture(),
                saved.architecture
            )));
        }
        let shapes_ok = candidate.layers.iter().all(|l| l.bias.len() == l.weights.ncols())
            && candidate
                .layers
                .windows(2)
                .all(|pair| pair[0].weights.ncols() == pair[1].weights.nrows());
        if !shapes_ok {
            return Err(persistence("bias length does not match layer width".to_string()));
        }

        self.layers = candidate.layers;
        Ok(())
    }
}
