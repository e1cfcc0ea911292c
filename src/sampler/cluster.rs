use super::{SubgraphBatch, train_mask_for};
use crate::graph::{Csr, induced_subgraph};
use rand::{Rng, seq::SliceRandom};
use std::collections::VecDeque;
use tracing::debug;

/// Assigns every node of a graph to one of `num_parts` partitions.
pub trait GraphPartitioner {
    fn partition<R: Rng>(&self, csr: &Csr, num_parts: usize, rng: &mut R) -> Vec<usize>;
}

/// Balanced breadth-first region growing.
///
/// Each partition grows from a random unassigned seed until it holds
/// `ceil(N / num_parts)` nodes; when its frontier dries up before that, the
/// next unassigned node in a random order seeds it again. Neighbourhoods stay
/// mostly inside one part, which is what Cluster-GCN needs from METIS.
#[derive(Clone, Debug, Default)]
pub struct BfsPartitioner;

impl GraphPartitioner for BfsPartitioner {
    fn partition<R: Rng>(&self, csr: &Csr, num_parts: usize, rng: &mut R) -> Vec<usize> {
        let n = csr.num_nodes();
        let num_parts = num_parts.clamp(1, n.max(1));
        let cap = n.div_ceil(num_parts);

        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(rng);
        let mut next_seed = 0;

        const UNASSIGNED: usize = usize::MAX;
        let mut assignment = vec![UNASSIGNED; n];
        let mut queue = VecDeque::new();

        for part in 0..num_parts {
            let mut size = 0;
            queue.clear();
            while size < cap {
                if queue.is_empty() {
                    while next_seed < n && assignment[order[next_seed]] != UNASSIGNED {
                        next_seed += 1;
                    }
                    if next_seed == n {
                        break;
                    }
                    let seed = order[next_seed];
                    assignment[seed] = part;
                    queue.push_back(seed);
                    size += 1;
                }
                let Some(node) = queue.pop_front() else { break };
                for &nb in csr.neighbors(node) {
                    if size == cap {
                        break;
                    }
                    if assignment[nb] == UNASSIGNED {
                        assignment[nb] = part;
                        queue.push_back(nb);
                        size += 1;
                    }
                }
            }
        }
        // Anything left over (possible only through rounding) joins the last part.
        for a in assignment.iter_mut().filter(|a| **a == UNASSIGNED) {
            *a = num_parts - 1;
        }
        assignment
    }
}

/// A fixed partitioning of the full graph.
#[derive(Clone, Debug)]
pub struct ClusterData {
    pub assignment: Vec<usize>,
    pub parts: Vec<Vec<usize>>,
}

impl ClusterData {
    pub fn new<P: GraphPartitioner, R: Rng>(
        csr: &Csr,
        partitioner: &P,
        num_parts: usize,
        rng: &mut R,
    ) -> Self {
        let assignment = partitioner.partition(csr, num_parts, rng);
        let num = assignment.iter().max().map_or(0, |&m| m + 1);
        let mut parts = vec![Vec::new(); num];
        for (node, &p) in assignment.iter().enumerate() {
            parts[p].push(node);
        }
        parts.retain(|p| !p.is_empty());
        debug!(parts = parts.len(), "graph partitioned");
        Self { assignment, parts }
    }

    pub fn num_parts(&self) -> usize {
        self.parts.len()
    }
}

/// Yields induced subgraphs over random groups of `batch_size` partitions.
#[derive(Clone, Debug)]
pub struct ClusterLoader<'a> {
    csr: &'a Csr,
    data: &'a ClusterData,
    train_mask: &'a [bool],
    batch_size: usize,
}

impl<'a> ClusterLoader<'a> {
    pub fn new(csr: &'a Csr, data: &'a ClusterData, train_mask: &'a [bool], batch_size: usize) -> Self {
        Self {
            csr,
            data,
            train_mask,
            batch_size: batch_size.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.data.num_parts().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One epoch of batches in a fresh random order.
    pub fn epoch<R: Rng>(&self, rng: &mut R) -> impl Iterator<Item = SubgraphBatch> + 'a {
        let mut order: Vec<usize> = (0..self.data.num_parts()).collect();
        order.shuffle(rng);
        let groups: Vec<Vec<usize>> = order.chunks(self.batch_size).map(<[usize]>::to_vec).collect();
        let (csr, data, train_mask) = (self.csr, self.data, self.train_mask);
        groups.into_iter().map(move |group| {
            let mut nodes = Vec::new();
            let mut node_cluster = Vec::new();
            for (local_part, &p) in group.iter().enumerate() {
                nodes.extend_from_slice(&data.parts[p]);
                node_cluster.extend(std::iter::repeat_n(local_part, data.parts[p].len()));
            }
            let sub = induced_subgraph(csr, &nodes);
            SubgraphBatch {
                train_mask: train_mask_for(train_mask, &sub.n_id),
                n_id: sub.n_id,
                edges: sub.edges,
                node_cluster: Some(node_cluster),
            }
        })
    }
}
