//! Structural perturbations for the second (augmented) view of a batch, and
//! the controller that adapts their intensity while training.

use crate::{graph::CooGraph, sampler::neighbor::Adj};
use rand::{Rng, seq::index};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Node features and edges of one view of a batch.
#[derive(Clone, Debug)]
pub struct View {
    pub features: Vec<f32>,
    pub edges: CooGraph,
}

fn probability(rate: f64) -> f64 {
    rate.clamp(0.0, 1.0)
}

/// Removes `floor(E * rate)` uniformly chosen edges.
pub fn drop_edges<R: Rng>(edges: &CooGraph, rate: f64, rng: &mut R) -> CooGraph {
    let num_drop = (edges.num_edges as f64 * probability(rate)) as usize;
    let mut keep = vec![true; edges.num_edges];
    for i in index::sample(rng, edges.num_edges, num_drop) {
        keep[i] = false;
    }
    let mut out = edges.clone();
    let mut pos = 0;
    out.retain(|_, _| {
        pos += 1;
        keep[pos - 1]
    });
    out
}

/// Zeroes the feature rows of `floor(N * rate / 2)` random nodes.
pub fn mask_features<R: Rng>(features: &mut [f32], num_features: usize, rate: f64, rng: &mut R) {
    let n = features.len() / num_features.max(1);
    let num_mask = (n as f64 * probability(rate) / 2.0) as usize;
    for node in index::sample(rng, n, num_mask) {
        features[node * num_features..(node + 1) * num_features].fill(0.0);
    }
}

/// Cluster view: edge dropping plus feature masking at `rate`.
pub fn augment_subgraph<R: Rng>(
    features: &[f32],
    num_features: usize,
    edges: &CooGraph,
    rate: f64,
    rng: &mut R,
) -> View {
    let mut features = features.to_vec();
    mask_features(&mut features, num_features, rate, rng);
    View {
        features,
        edges: drop_edges(edges, rate, rng),
    }
}

/// Neighbour-sampling view: every hop drops each edge with probability
/// `rate`, except a target's edge from itself so no target loses its own
/// representation.
pub fn augment_adjs<R: Rng>(adjs: &[Adj], rate: f64, rng: &mut R) -> Vec<Adj> {
    let p = probability(rate);
    adjs.iter()
        .map(|adj| {
            let (src, dst) = adj
                .src
                .iter()
                .zip(&adj.dst)
                .filter(|(s, d)| s == d || !rng.random_bool(p))
                .map(|(&s, &d)| (s, d))
                .unzip();
            Adj {
                src,
                dst,
                size: adj.size,
            }
        })
        .collect()
}

/// Random-walk view: edges touching an anchor node are dropped with
/// probability `rate`, every other edge with `rate / 2`.
pub fn augment_anchored<R: Rng>(
    features: &[f32],
    edges: &CooGraph,
    rate: f64,
    anchors: &[usize],
    rng: &mut R,
) -> View {
    let mut is_anchor = vec![false; edges.num_nodes];
    for &a in anchors {
        is_anchor[a] = true;
    }
    let p = probability(rate);
    let mut out = edges.clone();
    out.retain(|r, c| {
        let drop_p = if is_anchor[r] || is_anchor[c] { p } else { p / 2.0 };
        !rng.random_bool(drop_p)
    });
    View {
        features: features.to_vec(),
        edges: out,
    }
}

/// How the controller turns a loss difference into a rate step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateRule {
    /// `rate ± step * sigmoid(|Δloss|)`.
    Sigmoid,
    /// `rate ± step * |Δloss|`.
    Linear,
}

/// Adapts the augmentation rate from consecutive batch losses.
///
/// When the loss of the latest batch fell below the previous one the
/// perturbation is strengthened; when it rose the perturbation is weakened.
/// The loss window restarts every epoch while the rate itself carries over.
#[derive(Clone, Debug)]
pub struct RateController {
    rate: f64,
    step: f64,
    rule: RateRule,
    bounds: (f64, f64),
    window: Vec<f64>,
    history: Vec<f64>,
}

impl RateController {
    pub fn new(initial: f64, step: f64, rule: RateRule, bounds: (f64, f64)) -> Self {
        Self {
            rate: initial.clamp(bounds.0, bounds.1),
            step,
            rule,
            bounds,
            window: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Rates recorded at the end of every epoch since the last reset.
    pub fn history(&self) -> &[f64] {
        &self.history
    }

    /// Losses observed so far in the current epoch.
    pub fn losses(&self) -> &[f64] {
        &self.window
    }

    /// Records the loss of a batch and updates the rate from the last two.
    pub fn observe(&mut self, loss: f64) -> f64 {
        self.window.push(loss);
        if let [.., before, last] = self.window.as_slice() {
            let (before, last) = (*before, *last);
            let delta = before - last;
            let magnitude = match self.rule {
                RateRule::Sigmoid => sigmoid(delta.abs()),
                RateRule::Linear => delta.abs(),
            };
            let proposed = if last < before {
                self.rate + self.step * magnitude
            } else if last > before {
                self.rate - self.step * magnitude
            } else {
                self.rate
            };
            let clamped = proposed.clamp(self.bounds.0, self.bounds.1);
            if clamped != proposed {
                warn!(proposed, clamped, "augmentation rate hit its bound");
            }
            self.rate = clamped;
        }
        self.rate
    }

    /// Closes the epoch: clears the loss window and records the rate.
    pub fn end_epoch(&mut self) -> f64 {
        self.window.clear();
        self.history.push(self.rate);
        self.rate
    }

    /// Starts a new run from `initial`.
    pub fn reset(&mut self, initial: f64) {
        self.rate = initial.clamp(self.bounds.0, self.bounds.1);
        self.window.clear();
        self.history.clear();
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
