use crate::graph::Csr;
use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    tensor::backend::Backend,
};
use rand::{Rng, SeedableRng, seq::IndexedRandom};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, hash_map::Entry},
    sync::Arc,
};

/// How many neighbours to keep per target at one hop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fanout {
    All,
    Sample(usize),
}

impl From<i64> for Fanout {
    /// Negative sizes mean "every neighbour".
    fn from(size: i64) -> Self {
        if size < 0 {
            Fanout::All
        } else {
            Fanout::Sample(size as usize)
        }
    }
}

/// One hop of a sampled computation graph: a bipartite edge list from
/// `size.0` source nodes into the first `size.1` of them.
#[derive(Clone, Debug)]
pub struct Adj {
    pub src: Vec<usize>,
    pub dst: Vec<usize>,
    pub size: (usize, usize),
}

impl Adj {
    pub fn num_edges(&self) -> usize {
        self.src.len()
    }
}

/// A seed batch together with its sampled multi-hop neighbourhood.
///
/// `adjs[0]` is the outermost hop; the last entry feeds the seed nodes, which
/// occupy the first `batch_size` positions of `n_id`.
#[derive(Clone, Debug)]
pub struct NeighborBatch {
    pub batch_size: usize,
    pub n_id: Vec<usize>,
    pub adjs: Vec<Adj>,
}

/// GraphSAGE-style multi-hop neighbour sampler.
#[derive(Clone, Debug)]
pub struct NeighborSampler {
    csr: Arc<Csr>,
    sizes: Vec<Fanout>,
}

impl NeighborSampler {
    pub fn new(csr: Arc<Csr>, sizes: Vec<Fanout>) -> Self {
        Self { csr, sizes }
    }

    fn sample_hop(&self, targets: &[usize], fanout: Fanout, seed: u64) -> Vec<Vec<usize>> {
        targets
            .par_iter()
            .map(|&v| {
                let neighbors = self.csr.neighbors(v);
                match fanout {
                    Fanout::Sample(k) if neighbors.len() > k => {
                        let mut rng = ChaCha8Rng::seed_from_u64(seed ^ (v as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
                        neighbors.choose_multiple(&mut rng, k).copied().collect()
                    }
                    _ => neighbors.to_vec(),
                }
            })
            .collect()
    }

    /// Samples the computation graph of `seeds`.
    pub fn sample<R: Rng>(&self, seeds: &[usize], rng: &mut R) -> NeighborBatch {
        let mut nodes = seeds.to_vec();
        let mut adjs = Vec::with_capacity(self.sizes.len());

        for &fanout in &self.sizes {
            let sampled = self.sample_hop(&nodes, fanout, rng.random());
            let (frontier, src, dst) = reindex(&nodes, &sampled);
            adjs.push(Adj {
                src,
                dst,
                size: (frontier.len(), nodes.len()),
            });
            nodes = frontier;
        }
        adjs.reverse();

        NeighborBatch {
            batch_size: seeds.len(),
            n_id: nodes,
            adjs,
        }
    }
}

/// Targets keep their positions; newly reached nodes are appended in order of
/// first appearance.
fn reindex(targets: &[usize], sampled: &[Vec<usize>]) -> (Vec<usize>, Vec<usize>, Vec<usize>) {
    let mut local: HashMap<usize, usize> = targets.iter().enumerate().map(|(i, &n)| (n, i)).collect();
    let mut frontier = targets.to_vec();
    let total: usize = sampled.iter().map(Vec::len).sum();
    let mut src = Vec::with_capacity(total);
    let mut dst = Vec::with_capacity(total);

    for (t, neighbors) in sampled.iter().enumerate() {
        for &n in neighbors {
            let id = match local.entry(n) {
                Entry::Occupied(e) => *e.get(),
                Entry::Vacant(hole) => {
                    frontier.push(n);
                    *hole.insert(frontier.len() - 1)
                }
            };
            src.push(id);
            dst.push(t);
        }
    }
    (frontier, src, dst)
}

/// Seed nodes for neighbour-sampled training, exposed as a burn dataset so the
/// stock data loader handles shuffling, batching and workers.
#[derive(Clone, Debug)]
pub struct SeedNodes {
    nodes: Vec<usize>,
}

impl SeedNodes {
    pub fn new(nodes: Vec<usize>) -> Self {
        Self { nodes }
    }
}

impl Dataset<usize> for SeedNodes {
    fn get(&self, index: usize) -> Option<usize> {
        self.nodes.get(index).copied()
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }
}

#[derive(Clone, Debug)]
pub struct NeighborBatcher {
    sampler: NeighborSampler,
}

impl NeighborBatcher {
    pub fn new(sampler: NeighborSampler) -> Self {
        Self { sampler }
    }
}

impl<B: Backend> Batcher<B, usize, NeighborBatch> for NeighborBatcher {
    fn batch(&self, items: Vec<usize>, _device: &B::Device) -> NeighborBatch {
        self.sampler.sample(&items, &mut rand::rng())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CooGraph;

    fn star() -> Arc<Csr> {
        // 1..=5 all point into 0; 0 points into 1.
        let pairs = [(1, 0), (2, 0), (3, 0), (4, 0), (5, 0), (0, 1)];
        Arc::new(Csr::from_coo(&CooGraph::from_pairs(&pairs, 6).unwrap()))
    }

    #[test]
    fn fanout_from_size() {
        assert_eq!(Fanout::from(-1), Fanout::All);
        assert_eq!(Fanout::from(24), Fanout::Sample(24));
    }

    #[test]
    fn targets_come_first() {
        let sampler = NeighborSampler::new(star(), vec![Fanout::All]);
        let batch = sampler.sample(&[0], &mut ChaCha8Rng::seed_from_u64(0));
        assert_eq!(batch.batch_size, 1);
        assert_eq!(batch.n_id[0], 0);
        assert_eq!(batch.n_id.len(), 6);
        let adj = &batch.adjs[0];
        assert_eq!(adj.size, (6, 1));
        assert_eq!(adj.num_edges(), 5);
        assert!(adj.dst.iter().all(|&d| d == 0));
    }

    #[test]
    fn fanout_caps_sampled_neighbours() {
        let sampler = NeighborSampler::new(star(), vec![Fanout::Sample(2)]);
        let batch = sampler.sample(&[0], &mut ChaCha8Rng::seed_from_u64(1));
        assert_eq!(batch.adjs[0].num_edges(), 2);
        assert_eq!(batch.n_id.len(), 3);
        let mut src = batch.adjs[0].src.clone();
        src.sort();
        src.dedup();
        assert_eq!(src.len(), 2, "sampling is without replacement");
    }

    #[test]
    fn hops_are_outermost_first() {
        let sampler = NeighborSampler::new(star(), vec![Fanout::All, Fanout::All]);
        let batch = sampler.sample(&[1], &mut ChaCha8Rng::seed_from_u64(2));
        assert_eq!(batch.adjs.len(), 2);
        // Inner hop: 0 -> 1. Outer hop: 1..=5 -> 0 and 0 -> 1.
        assert_eq!(batch.adjs[1].size, (2, 1));
        assert_eq!(batch.adjs[0].size.1, 2);
        assert_eq!(batch.adjs[0].size.0, batch.n_id.len());
        assert_eq!(batch.n_id.len(), 6);
    }

    #[test]
    fn seed_dataset_indexes_nodes() {
        let seeds = SeedNodes::new(vec![4, 7]);
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds.get(1), Some(7));
        assert_eq!(seeds.get(2), None);
    }
}
