//! Node-vs-neighbourhood contrast between a clean and an augmented view.
//!
//! Node representations of one view are scored against pooled neighbourhood
//! (or partition) representations of the other. Positives are a node's own
//! neighbourhood or partition, or nodes of the same class; everything else is
//! a negative.

use burn::{
    prelude::*,
    tensor::{Int, TensorData, activation::softplus},
};
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_2;

/// Which estimator scores the two views against each other.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ContrastiveObjective {
    /// Jensen-Shannon mutual-information estimator.
    Jsd,
    /// Temperature-scaled exponential similarity with a bounded negative sum.
    Temperature { tau: f64 },
}

/// Pairing masks between `N` node rows and `M` summary rows.
#[derive(Clone, Debug)]
pub struct ContrastMasks<B: Backend> {
    /// Exactly one 1 per row: the summary that belongs to the node itself.
    pub anchor: Tensor<B, 2>,
    pub pos: Tensor<B, 2>,
    pub neg: Tensor<B, 2>,
}

impl<B: Backend> ContrastMasks<B> {
    /// Positives are nodes with equal labels; the anchor is the diagonal.
    pub fn from_labels(labels: &[u32], device: &B::Device) -> Self {
        let n = labels.len();
        let mut pos = Vec::with_capacity(n * n);
        let mut anchor = vec![0.0f32; n * n];
        for (i, &a) in labels.iter().enumerate() {
            pos.extend(labels.iter().map(|&b| if a == b { 1.0f32 } else { 0.0 }));
            anchor[i * n + i] = 1.0;
        }
        Self::build(pos, anchor, [n, n], device)
    }

    /// Positive iff the summary row is the node's own cluster.
    pub fn from_assignment(cluster: &[usize], num_clusters: usize, device: &B::Device) -> Self {
        let n = cluster.len();
        let mut pos = vec![0.0f32; n * num_clusters];
        for (i, &c) in cluster.iter().enumerate() {
            pos[i * num_clusters + c] = 1.0;
        }
        Self::build(pos.clone(), pos, [n, num_clusters], device)
    }

    fn build(pos: Vec<f32>, anchor: Vec<f32>, shape: [usize; 2], device: &B::Device) -> Self {
        let pos = Tensor::<B, 2>::from_data(TensorData::new(pos, shape), device);
        let anchor = Tensor::from_data(TensorData::new(anchor, shape), device);
        let neg = pos.clone().neg().add_scalar(1.0);
        Self { anchor, pos, neg }
    }
}

/// Mean of the rows of `src` grouped by `index`; empty groups are zero.
pub fn scatter_mean<B: Backend>(src: Tensor<B, 2>, index: Tensor<B, 1, Int>, dim_size: usize) -> Tensor<B, 2> {
    let [n, d] = src.dims();
    let device = src.device();
    let sums = Tensor::zeros([dim_size, d], &device).select_assign(0, index.clone(), src);
    let counts = Tensor::<B, 2>::zeros([dim_size, 1], &device).select_assign(0, index, Tensor::ones([n, 1], &device));
    sums / counts.clamp_min(1.0)
}

/// Pools `g[neighbor[e]]` into row `cluster[e]` for every edge `e`.
pub fn neighbourhood_embedding<B: Backend>(
    g: Tensor<B, 2>,
    neighbor: Tensor<B, 1, Int>,
    cluster: Tensor<B, 1, Int>,
    dim_size: usize,
) -> Tensor<B, 2> {
    scatter_mean(g.select(0, neighbor), cluster, dim_size)
}

/// Jensen-Shannon estimator: `E_neg - E_pos` over the masked score matrix.
pub fn jsd_loss<B: Backend>(
    enc1: Tensor<B, 2>,
    enc2: Tensor<B, 2>,
    pos: Tensor<B, 2>,
    neg: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let logits = enc1.matmul(enc2.transpose());
    let sp = softplus(logits.clone().neg(), 1.0);
    let e_pos = sp.clone().neg().add_scalar(LN_2);
    let e_neg = sp + logits.sub_scalar(LN_2);

    let e_pos = (e_pos * pos.clone()).sum() / pos.sum().clamp_min(1.0);
    let e_neg = (e_neg * neg.clone()).sum() / neg.sum().clamp_min(1.0);
    e_neg - e_pos
}

/// Temperature-scaled contrast. The anchor entry of each row is the
/// positive; negatives come from the cross-view scores and, when both sides
/// have the same rows, from the intra-view scores as well. The negative sum
/// is floored at `|neg| * exp(-1 / tau)` per contributing view.
///
/// Evaluated in log space: `logsumexp(s_pos, log_neg) - s_pos`.
pub fn temperature_loss<B: Backend>(
    z1: Tensor<B, 2>,
    z2: Tensor<B, 2>,
    masks: &ContrastMasks<B>,
    tau: f64,
) -> Tensor<B, 1> {
    const MASKED: f64 = 1e30;
    const TINY: f64 = 1e-30;

    let same_rows = z1.dims()[0] == z2.dims()[0];
    let between = z1.clone().matmul(z2.transpose()).div_scalar(tau);
    let positive = (between.clone() * masks.anchor.clone()).sum_dim(1);

    let (scores, neg, views) = if same_rows {
        let within = z1.clone().matmul(z1.transpose()).div_scalar(tau);
        (
            Tensor::cat(vec![within, between], 1),
            Tensor::cat(vec![masks.neg.clone(), masks.neg.clone()], 1),
            2.0,
        )
    } else {
        (between, masks.neg.clone(), 1.0)
    };
    // Non-negatives sit at -MASKED so the row max is taken over negatives only.
    let masked = scores * neg.clone() + neg.clone().sub_scalar(1.0).mul_scalar(MASKED);
    let max = masked.clone().max_dim(1);
    let sum = ((masked - max.clone()).exp() * neg).sum_dim(1);
    let log_negative = max + sum.clamp_min(TINY).log();
    let log_floor = masks
        .neg
        .clone()
        .sum_dim(1)
        .mul_scalar(views)
        .clamp_min(TINY)
        .log()
        .sub_scalar(1.0 / tau);
    let log_negative = log_negative.max_pair(log_floor);

    let top = positive.clone().max_pair(log_negative.clone());
    let lse = top.clone() + ((positive.clone() - top.clone()).exp() + (log_negative - top).exp()).log();
    (lse - positive).mean()
}

impl ContrastiveObjective {
    pub fn loss<B: Backend>(&self, z1: Tensor<B, 2>, z2: Tensor<B, 2>, masks: &ContrastMasks<B>) -> Tensor<B, 1> {
        match *self {
            ContrastiveObjective::Jsd => jsd_loss(z1, z2, masks.pos.clone(), masks.neg.clone()),
            ContrastiveObjective::Temperature { tau } => temperature_loss(z1, z2, masks, tau),
        }
    }

    /// Symmetric two-view contrast, scaled by 1/10.
    pub fn two_view<B: Backend>(
        &self,
        (x1, g1): (Tensor<B, 2>, Tensor<B, 2>),
        (x2, g2): (Tensor<B, 2>, Tensor<B, 2>),
        masks: &ContrastMasks<B>,
    ) -> Tensor<B, 1> {
        (self.loss(x1, g2, masks) + self.loss(x2, g1, masks)).div_scalar(10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::ElementConversion;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type B = NdArray;

    fn tensor2(data: Vec<f32>, shape: [usize; 2]) -> Tensor<B, 2> {
        Tensor::from_data(TensorData::new(data, shape), &NdArrayDevice::Cpu)
    }

    fn scalar(t: Tensor<B, 1>) -> f32 {
        t.into_scalar().elem::<f32>()
    }

    #[test]
    fn scatter_mean_groups_rows() {
        let device = NdArrayDevice::Cpu;
        let src = tensor2(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [3, 2]);
        let index = Tensor::<B, 1, Int>::from_ints([0, 0, 2], &device);
        let out = scatter_mean(src, index, 3).into_data().to_vec::<f32>().unwrap();
        assert_eq!(out, vec![2.0, 3.0, 0.0, 0.0, 5.0, 6.0]);
    }

    #[test]
    fn label_masks_pair_equal_classes() {
        let masks = ContrastMasks::<B>::from_labels(&[1, 0, 1], &NdArrayDevice::Cpu);
        let pos = masks.pos.into_data().to_vec::<f32>().unwrap();
        assert_eq!(pos, vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0]);
        let anchor = masks.anchor.into_data().to_vec::<f32>().unwrap();
        assert_eq!(anchor, vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        let neg: f32 = masks.neg.into_data().to_vec::<f32>().unwrap().iter().sum();
        assert_eq!(neg, 4.0);
    }

    #[test]
    fn assignment_masks_are_one_hot() {
        let masks = ContrastMasks::<B>::from_assignment(&[1, 0, 1], 2, &NdArrayDevice::Cpu);
        assert_eq!(masks.pos.dims(), [3, 2]);
        let pos = masks.pos.into_data().to_vec::<f32>().unwrap();
        assert_eq!(pos, vec![0.0, 1.0, 1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn jsd_of_zero_logits_vanishes() {
        // logits = 0 gives E_pos = log2 - softplus(0) = 0 and E_neg = softplus(0) - log2 = 0.
        let z = tensor2(vec![0.0; 6], [3, 2]);
        let masks = ContrastMasks::<B>::from_labels(&[0, 1, 2], &NdArrayDevice::Cpu);
        let loss = scalar(jsd_loss(z.clone(), z, masks.pos, masks.neg));
        assert!(loss.abs() < 1e-6);
    }

    #[test]
    fn jsd_rewards_aligned_views() {
        let device = NdArrayDevice::Cpu;
        let masks = ContrastMasks::<B>::from_labels(&[0, 1], &device);
        let aligned = tensor2(vec![3.0, 0.0, 0.0, 3.0], [2, 2]);
        let crossed = tensor2(vec![0.0, 3.0, 3.0, 0.0], [2, 2]);
        let good = scalar(jsd_loss(aligned.clone(), aligned.clone(), masks.pos.clone(), masks.neg.clone()));
        let bad = scalar(jsd_loss(aligned, crossed, masks.pos, masks.neg));
        assert!(good < bad);
    }

    #[test]
    fn temperature_loss_is_finite_and_ordered() {
        let device = NdArrayDevice::Cpu;
        let masks = ContrastMasks::<B>::from_labels(&[0, 1], &device);
        let aligned = tensor2(vec![1.0, 0.0, 0.0, 1.0], [2, 2]);
        let crossed = tensor2(vec![0.0, 1.0, 1.0, 0.0], [2, 2]);
        let good = scalar(temperature_loss(aligned.clone(), aligned.clone(), &masks, 0.4));
        let bad = scalar(temperature_loss(aligned, crossed, &masks, 0.4));
        assert!(good.is_finite() && bad.is_finite());
        assert!(good < bad);
    }

    #[test]
    fn temperature_loss_matches_closed_form() {
        // Orthonormal rows: s_pos = 1 / tau and four zero-score negatives
        // over two views, so the loss is log(1 + 2 * exp(-1 / tau)).
        let masks = ContrastMasks::<B>::from_labels(&[0, 1], &NdArrayDevice::Cpu);
        let z = tensor2(vec![1.0, 0.0, 0.0, 1.0], [2, 2]);
        let loss = scalar(temperature_loss(z.clone(), z, &masks, 0.4));
        let expected = (1.0 + 2.0 * (-2.5f32).exp()).ln();
        assert!((loss - expected).abs() < 1e-5, "{loss} vs {expected}");
    }

    #[test]
    fn temperature_loss_survives_large_norms() {
        let device = NdArrayDevice::Cpu;
        let masks = ContrastMasks::<B>::from_labels(&[0, 1], &device);
        let z = tensor2(vec![7.0, 0.0, 0.0, 7.0], [2, 2]);
        let loss = scalar(temperature_loss(z.clone(), z, &masks, 0.4));
        assert!(loss.is_finite() && loss >= 0.0 && loss < 1e-6, "{loss}");

        let big = tensor2(vec![300.0, -40.0, 25.0, 280.0, 310.0, 0.0], [3, 2]);
        let clusters = tensor2(vec![200.0, 10.0, -5.0, 250.0], [2, 2]);
        let masks = ContrastMasks::<B>::from_assignment(&[0, 1, 0], 2, &device);
        let loss = scalar(temperature_loss(big, clusters, &masks, 0.4));
        assert!(loss.is_finite(), "{loss}");
    }

    #[test]
    fn temperature_loss_accepts_cluster_summaries() {
        let device = NdArrayDevice::Cpu;
        let masks = ContrastMasks::<B>::from_assignment(&[0, 0, 1], 2, &device);
        let nodes = tensor2(vec![1.0, 0.0, 0.9, 0.1, 0.0, 1.0], [3, 2]);
        let clusters = tensor2(vec![1.0, 0.0, 0.0, 1.0], [2, 2]);
        let loss = scalar(temperature_loss(nodes, clusters, &masks, 0.4));
        assert!(loss.is_finite() && loss > 0.0);
    }

    #[test]
    fn two_view_loss_is_scaled_sum() {
        let device = NdArrayDevice::Cpu;
        let masks = ContrastMasks::<B>::from_labels(&[0, 1], &device);
        let a = tensor2(vec![1.0, 0.5, -0.5, 1.0], [2, 2]);
        let b = tensor2(vec![0.2, 0.1, 0.3, -1.0], [2, 2]);
        let objective = ContrastiveObjective::Jsd;
        let single = scalar(objective.loss(a.clone(), b.clone(), &masks));
        let both = scalar(objective.two_view((a.clone(), b.clone()), (a, b), &masks));
        assert!((both - single / 5.0).abs() < 1e-6);
    }
}
