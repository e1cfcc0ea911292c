use super::{SubgraphBatch, train_mask_for};
use crate::graph::{Csr, induced_subgraph};
use rand::{Rng, seq::IndexedRandom};

/// GraphSAINT random-walk sampler: every batch is the subgraph induced by the
/// nodes visited from `batch_size` uniformly chosen roots.
#[derive(Clone, Debug)]
pub struct RandomWalkSampler<'a> {
    csr: &'a Csr,
    train_mask: &'a [bool],
    batch_size: usize,
    walk_length: usize,
    num_steps: usize,
}

impl<'a> RandomWalkSampler<'a> {
    pub fn new(
        csr: &'a Csr,
        train_mask: &'a [bool],
        batch_size: usize,
        walk_length: usize,
        num_steps: usize,
    ) -> Self {
        Self {
            csr,
            train_mask,
            batch_size,
            walk_length,
            num_steps,
        }
    }

    pub fn len(&self) -> usize {
        self.num_steps
    }

    pub fn is_empty(&self) -> bool {
        self.num_steps == 0
    }

    /// Visits `walk_length` further nodes from every root.
    fn walk<R: Rng>(&self, rng: &mut R) -> Vec<usize> {
        let n = self.csr.num_nodes();
        let mut visited = vec![false; n];
        for _ in 0..self.batch_size {
            let mut curr = rng.random_range(0..n);
            visited[curr] = true;
            for _ in 0..self.walk_length {
                match self.csr.neighbors(curr).choose(rng) {
                    Some(&next) => {
                        curr = next;
                        visited[curr] = true;
                    }
                    None => break,
                }
            }
        }
        visited
            .into_iter()
            .enumerate()
            .filter_map(|(i, v)| v.then_some(i))
            .collect()
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> SubgraphBatch {
        let nodes = self.walk(rng);
        let sub = induced_subgraph(self.csr, &nodes);
        SubgraphBatch {
            train_mask: train_mask_for(self.train_mask, &sub.n_id),
            n_id: sub.n_id,
            edges: sub.edges,
            node_cluster: None,
        }
    }
}
