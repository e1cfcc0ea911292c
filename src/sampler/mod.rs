//! Mini-batch samplers.
//!
//! Three ways of cutting a large graph into trainable pieces:
//!
//! - [`cluster`]: partition once, then train on unions of partitions
//!   (Cluster-GCN).
//! - [`neighbor`]: expand seed nodes hop by hop with a fixed fan-out
//!   (GraphSAGE).
//! - [`saint`]: induce subgraphs on the nodes visited by short random walks
//!   (GraphSAINT-RW).

pub mod cluster;
pub mod neighbor;
pub mod saint;

use crate::{data::NodeDataset, graph::CooGraph};

/// An induced subgraph ready for a full-batch forward pass.
#[derive(Clone, Debug)]
pub struct SubgraphBatch {
    /// Global id of every local node.
    pub n_id: Vec<usize>,
    /// Local edge list.
    pub edges: CooGraph,
    /// Which local nodes belong to the training split.
    pub train_mask: Vec<bool>,
    /// Batch-local partition of every local node (cluster batches only).
    pub node_cluster: Option<Vec<usize>>,
}

impl SubgraphBatch {
    pub fn num_nodes(&self) -> usize {
        self.n_id.len()
    }

    /// Local ids of the training nodes, in local order.
    pub fn train_nodes(&self) -> Vec<usize> {
        self.train_mask
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| m.then_some(i))
            .collect()
    }

    /// Global ids of the training nodes, in local order.
    pub fn train_globals(&self) -> Vec<usize> {
        self.train_nodes().into_iter().map(|i| self.n_id[i]).collect()
    }

    pub fn num_clusters(&self) -> usize {
        self.node_cluster
            .as_ref()
            .and_then(|c| c.iter().max())
            .map_or(0, |&m| m + 1)
    }
}

pub(crate) fn train_mask_for(dataset_mask: &[bool], n_id: &[usize]) -> Vec<bool> {
    n_id.iter().map(|&n| dataset_mask[n]).collect()
}

/// Row-major features of the nodes of `batch`, in local order.
pub fn batch_features(dataset: &NodeDataset, batch: &SubgraphBatch) -> Vec<f32> {
    let mut out = Vec::with_capacity(batch.num_nodes() * dataset.num_features);
    for &n in &batch.n_id {
        out.extend_from_slice(dataset.feature_row(n));
    }
    out
}
