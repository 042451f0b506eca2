//! Multi-layer perceptron value estimator on ndarray
//!
//! ReLU hidden layers, linear output, Glorot-uniform initialisation and an
//! Adam optimiser on mean-squared error. Weights are persisted as JSON, the
//! live network at `path` and the target network at `<path>.target`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context};
use ndarray::{Array1, Array2, Axis, Zip};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use qroute_core::config::NetworkArchitecture;
use qroute_core::{Result, RouterError};

use crate::estimator::{EstimatorInfo, SyncMode, ValueEstimator};

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPSILON: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DenseLayer {
    /// inputs x outputs
    weights: Array2<f64>,
    bias: Array1<f64>,
}

impl DenseLayer {
    fn glorot(inputs: usize, outputs: usize, rng: &mut StdRng) -> Self {
        let limit = (6.0 / (inputs + outputs) as f64).sqrt();
        let dist = Uniform::new_inclusive(-limit, limit);
        Self {
            weights: Array2::from_shape_fn((inputs, outputs), |_| dist.sample(rng)),
            bias: Array1::zeros(outputs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Network {
    layers: Vec<DenseLayer>,
}

impl Network {
    fn new(sizes: &[usize], rng: &mut StdRng) -> Self {
        Self {
            layers: sizes
                .windows(2)
                .map(|w| DenseLayer::glorot(w[0], w[1], rng))
                .collect(),
        }
    }

    fn forward(&self, input: Array2<f64>) -> Array2<f64> {
        let last = self.layers.len().saturating_sub(1);
        let mut x = input;
        for (i, layer) in self.layers.iter().enumerate() {
            x = x.dot(&layer.weights) + &layer.bias;
            if i < last {
                x.mapv_inplace(relu);
            }
        }
        x
    }

    /// `activations[0]` is the input, `activations[i + 1]` the output of layer `i`
    fn forward_trace(&self, input: Array2<f64>) -> Vec<Array2<f64>> {
        let last = self.layers.len().saturating_sub(1);
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(input);
        for (i, layer) in self.layers.iter().enumerate() {
            let mut x = activations[i].dot(&layer.weights) + &layer.bias;
            if i < last {
                x.mapv_inplace(relu);
            }
            activations.push(x);
        }
        activations
    }

    fn param_count(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.weights.len() + l.bias.len())
            .sum()
    }

    fn same_shape(&self, other: &Network) -> bool {
        self.layers.len() == other.layers.len()
            && self
                .layers
                .iter()
                .zip(&other.layers)
                .all(|(a, b)| a.weights.dim() == b.weights.dim() && a.bias.len() == b.bias.len())
    }

    /// `self = tau * live + (1 - tau) * self`
    fn blend_from(&mut self, live: &Network, tau: f64) {
        for (target, source) in self.layers.iter_mut().zip(&live.layers) {
            Zip::from(&mut target.weights)
                .and(&source.weights)
                .for_each(|t, &s| *t = tau * s + (1.0 - tau) * *t);
            Zip::from(&mut target.bias)
                .and(&source.bias)
                .for_each(|t, &s| *t = tau * s + (1.0 - tau) * *t);
        }
    }
}

fn relu(x: f64) -> f64 {
    x.max(0.0)
}

/// Adam moment estimates, one pair per weight matrix and bias vector
#[derive(Debug, Clone)]
struct Adam {
    learning_rate: f64,
    step: u64,
    m_w: Vec<Array2<f64>>,
    v_w: Vec<Array2<f64>>,
    m_b: Vec<Array1<f64>>,
    v_b: Vec<Array1<f64>>,
}

impl Adam {
    fn new(network: &Network, learning_rate: f64) -> Self {
        let zeros_w: Vec<_> = network
            .layers
            .iter()
            .map(|l| Array2::zeros(l.weights.dim()))
            .collect();
        let zeros_b: Vec<_> = network
            .layers
            .iter()
            .map(|l| Array1::zeros(l.bias.len()))
            .collect();
        Self {
            learning_rate,
            step: 0,
            m_w: zeros_w.clone(),
            v_w: zeros_w,
            m_b: zeros_b.clone(),
            v_b: zeros_b,
        }
    }

    fn apply(&mut self, network: &mut Network, grads_w: &[Array2<f64>], grads_b: &[Array1<f64>]) {
        self.step += 1;
        let lr = self.learning_rate;
        let bc1 = 1.0 - BETA1.powf(self.step as f64);
        let bc2 = 1.0 - BETA2.powf(self.step as f64);

        for (i, layer) in network.layers.iter_mut().enumerate() {
            Zip::from(&mut layer.weights)
                .and(&mut self.m_w[i])
                .and(&mut self.v_w[i])
                .and(&grads_w[i])
                .for_each(|w, m, v, &g| {
                    *m = BETA1 * *m + (1.0 - BETA1) * g;
                    *v = BETA2 * *v + (1.0 - BETA2) * g * g;
                    *w -= lr * (*m / bc1) / ((*v / bc2).sqrt() + EPSILON);
                });
            Zip::from(&mut layer.bias)
                .and(&mut self.m_b[i])
                .and(&mut self.v_b[i])
                .and(&grads_b[i])
                .for_each(|b, m, v, &g| {
                    *m = BETA1 * *m + (1.0 - BETA1) * g;
                    *v = BETA2 * *v + (1.0 - BETA2) * g * g;
                    *b -= lr * (*m / bc1) / ((*v / bc2).sqrt() + EPSILON);
                });
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct NetworkSnapshot {
    architecture: NetworkArchitecture,
    state_size: usize,
    action_size: usize,
    network: Network,
}

/// Q-network / target-network pair backed by ndarray
#[derive(Debug, Clone)]
pub struct MlpEstimator {
    architecture: NetworkArchitecture,
    state_size: usize,
    action_size: usize,
    live: Network,
    target: Network,
    optimizer: Adam,
}

impl MlpEstimator {
    pub fn new(
        state_size: usize,
        action_size: usize,
        architecture: NetworkArchitecture,
        learning_rate: f64,
        seed: Option<u64>,
    ) -> Result<Self> {
        if state_size == 0 || action_size == 0 {
            return Err(RouterError::configuration(
                "estimator state_size and action_size must be positive",
            ));
        }
        if learning_rate.is_nan() || learning_rate <= 0.0 {
            return Err(RouterError::configuration("learning_rate must be positive"));
        }

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut sizes = Vec::with_capacity(architecture.hidden_layers().len() + 2);
        sizes.push(state_size);
        sizes.extend_from_slice(architecture.hidden_layers());
        sizes.push(action_size);

        let live = Network::new(&sizes, &mut rng);
        let target = live.clone();
        let optimizer = Adam::new(&live, learning_rate);

        debug!(
            "Created {} estimator {:?} with {} parameters",
            architecture.name(),
            sizes,
            live.param_count()
        );

        Ok(Self {
            architecture,
            state_size,
            action_size,
            live,
            target,
            optimizer,
        })
    }

    pub fn architecture(&self) -> NetworkArchitecture {
        self.architecture
    }

    fn to_matrix(rows: &[Vec<f64>], width: usize) -> Result<Array2<f64>> {
        let mut flat = Vec::with_capacity(rows.len() * width);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(RouterError::InvalidArgument(format!(
                    "row {i} has {} values, expected {width}",
                    row.len()
                )));
            }
            flat.extend_from_slice(row);
        }
        Array2::from_shape_vec((rows.len(), width), flat)
            .map_err(|e| RouterError::InvalidArgument(e.to_string()))
    }

    fn single(&self, state: &[f64]) -> Result<Array2<f64>> {
        if state.len() != self.state_size {
            return Err(RouterError::InvalidArgument(format!(
                "state has {} values, expected {}",
                state.len(),
                self.state_size
            )));
        }
        Array2::from_shape_vec((1, self.state_size), state.to_vec())
            .map_err(|e| RouterError::InvalidArgument(e.to_string()))
    }

    fn rows(output: &Array2<f64>) -> Vec<Vec<f64>> {
        output.outer_iter().map(|row| row.to_vec()).collect()
    }

    fn snapshot(&self, network: &Network) -> NetworkSnapshot {
        NetworkSnapshot {
            architecture: self.architecture,
            state_size: self.state_size,
            action_size: self.action_size,
            network: network.clone(),
        }
    }

    fn check_compatible(&self, snapshot: &NetworkSnapshot) -> anyhow::Result<()> {
        ensure!(
            snapshot.state_size == self.state_size && snapshot.action_size == self.action_size,
            "snapshot is {}x{}, estimator is {}x{}",
            snapshot.state_size,
            snapshot.action_size,
            self.state_size,
            self.action_size
        );
        if !snapshot.network.same_shape(&self.live) {
            bail!(
                "snapshot layers ({}) do not match the {} architecture",
                snapshot.architecture.name(),
                self.architecture.name()
            );
        }
        Ok(())
    }

    fn read_pair(&self, path: &Path) -> anyhow::Result<(Network, Network)> {
        let live = read_snapshot(path)?;
        self.check_compatible(&live)?;

        let target_path = target_path(path);
        let target = if target_path.exists() {
            let target = read_snapshot(&target_path)?;
            self.check_compatible(&target)?;
            target.network
        } else {
            live.network.clone()
        };

        Ok((live.network, target))
    }
}

impl ValueEstimator for MlpEstimator {
    fn state_size(&self) -> usize {
        self.state_size
    }

    fn action_size(&self) -> usize {
        self.action_size
    }

    fn predict(&self, state: &[f64]) -> Result<Vec<f64>> {
        let output = self.live.forward(self.single(state)?);
        Ok(output.row(0).to_vec())
    }

    fn predict_batch(&self, states: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        let input = Self::to_matrix(states, self.state_size)?;
        Ok(Self::rows(&self.live.forward(input)))
    }

    fn predict_target(&self, state: &[f64]) -> Result<Vec<f64>> {
        let output = self.target.forward(self.single(state)?);
        Ok(output.row(0).to_vec())
    }

    fn predict_target_batch(&self, states: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        let input = Self::to_matrix(states, self.state_size)?;
        Ok(Self::rows(&self.target.forward(input)))
    }

    fn train_step(&mut self, states: &[Vec<f64>], targets: &[Vec<f64>]) -> Result<f64> {
        if states.is_empty() {
            return Err(RouterError::InvalidArgument("empty training batch".to_string()));
        }
        if states.len() != targets.len() {
            return Err(RouterError::InvalidArgument(format!(
                "{} states but {} targets",
                states.len(),
                targets.len()
            )));
        }

        let input = Self::to_matrix(states, self.state_size)?;
        let expected = Self::to_matrix(targets, self.action_size)?;

        let activations = self.live.forward_trace(input);
        let Some(output) = activations.last() else {
            return Err(RouterError::Internal("network has no layers".to_string()));
        };

        let diff = output - &expected;
        let n = diff.len() as f64;
        let loss = diff.mapv(|d| d * d).sum() / n;
        if !loss.is_finite() {
            return Err(RouterError::Estimator(format!("non-finite loss: {loss}")));
        }

        // d(mean squared error)/d(output)
        let mut delta = diff * (2.0 / n);
        let layer_count = self.live.layers.len();
        let mut grads_w = Vec::with_capacity(layer_count);
        let mut grads_b = Vec::with_capacity(layer_count);

        for l in (0..layer_count).rev() {
            let input = &activations[l];
            grads_w.push(input.t().dot(&delta));
            grads_b.push(delta.sum_axis(Axis(0)));

            if l > 0 {
                let mut back = delta.dot(&self.live.layers[l].weights.t());
                Zip::from(&mut back).and(input).for_each(|d, &a| {
                    if a <= 0.0 {
                        *d = 0.0;
                    }
                });
                delta = back;
            }
        }
        grads_w.reverse();
        grads_b.reverse();

        self.optimizer.apply(&mut self.live, &grads_w, &grads_b);

        Ok(loss)
    }

    fn sync_target(&mut self, mode: SyncMode) -> Result<()> {
        mode.validate()?;
        match mode {
            SyncMode::Hard => self.target = self.live.clone(),
            SyncMode::Soft(tau) => self.target.blend_from(&self.live, tau),
        }
        Ok(())
    }

    fn save(&self, path: &Path) -> Result<()> {
        write_snapshot(path, &self.snapshot(&self.live))
            .and_then(|()| write_snapshot(&target_path(path), &self.snapshot(&self.target)))
            .map_err(|e| RouterError::Persistence(format!("{e:#}")))?;
        info!("Saved {} estimator weights to {}", self.architecture.name(), path.display());
        Ok(())
    }

    fn load(&mut self, path: &Path) -> bool {
        if !path.exists() {
            debug!("No estimator weights at {}", path.display());
            return false;
        }

        match self.read_pair(path) {
            Ok((live, target)) => {
                self.optimizer = Adam::new(&live, self.optimizer.learning_rate);
                self.live = live;
                self.target = target;
                info!("Loaded estimator weights from {}", path.display());
                true
            }
            Err(e) => {
                warn!("Failed to load estimator weights from {}: {:#}", path.display(), e);
                false
            }
        }
    }

    fn info(&self) -> EstimatorInfo {
        EstimatorInfo {
            param_count: self.live.param_count(),
            layer_count: self.live.layers.len(),
            architecture_name: self.architecture.name().to_string(),
            state_size: self.state_size,
            action_size: self.action_size,
        }
    }
}

/// Where the target network lives next to `path`
pub fn target_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".target");
    PathBuf::from(os)
}

fn write_snapshot(path: &Path, snapshot: &NetworkSnapshot) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_vec(snapshot).context("Failed to serialize network")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

fn read_snapshot(path: &Path) -> anyhow::Result<NetworkSnapshot> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse weights in {}", path.display()))
}
