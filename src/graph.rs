use crate::error::{Error, Result};
use burn::tensor::{Int, Tensor, TensorData, backend::Backend};

/// A graph represented in Coordinate Format (COO).
/// Stores edges as pairs of indices (row, col); messages flow from `row` to `col`.
#[derive(Clone, Debug, Default)]
pub struct CooGraph {
    pub row_indices: Vec<usize>,
    pub col_indices: Vec<usize>,
    pub num_nodes: usize,
    pub num_edges: usize,
}

impl CooGraph {
    pub fn new(row_indices: Vec<usize>, col_indices: Vec<usize>, num_nodes: usize) -> Result<Self> {
        if row_indices.len() != col_indices.len() {
            return Err(Error::Graph(format!(
                "row and column indices must have same length ({} != {})",
                row_indices.len(),
                col_indices.len()
            )));
        }
        if let Some(&bad) = row_indices
            .iter()
            .chain(col_indices.iter())
            .find(|&&i| i >= num_nodes)
        {
            return Err(Error::Graph(format!(
                "node index {bad} out of range for {num_nodes} nodes"
            )));
        }
        let num_edges = row_indices.len();
        Ok(Self {
            row_indices,
            col_indices,
            num_nodes,
            num_edges,
        })
    }

    pub fn from_pairs(pairs: &[(usize, usize)], num_nodes: usize) -> Result<Self> {
        let (rows, cols) = pairs.iter().copied().unzip();
        Self::new(rows, cols, num_nodes)
    }

    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.row_indices
            .iter()
            .copied()
            .zip(self.col_indices.iter().copied())
    }

    /// Keeps only the edges for which `keep` returns true.
    pub fn retain<F: FnMut(usize, usize) -> bool>(&mut self, mut keep: F) {
        let (rows, cols): (Vec<usize>, Vec<usize>) = self.edges().filter(|&(r, c)| keep(r, c)).unzip();
        self.row_indices = rows;
        self.col_indices = cols;
        self.num_edges = self.row_indices.len();
    }

    /// Adds a self-loop `(i, i)` to every node that does not already have one.
    pub fn add_remaining_self_loops(&mut self) {
        let mut has_loop = vec![false; self.num_nodes];
        for (r, c) in self.edges() {
            if r == c {
                has_loop[r] = true;
            }
        }
        for (node, _) in has_loop.iter().enumerate().filter(|(_, l)| !**l) {
            self.row_indices.push(node);
            self.col_indices.push(node);
        }
        self.num_edges = self.row_indices.len();
    }

    /// Returns the `(row, col)` index tensors of this edge list.
    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> (Tensor<B, 1, Int>, Tensor<B, 1, Int>) {
        (index_tensor(&self.row_indices, device), index_tensor(&self.col_indices, device))
    }
}

/// Builds an `Int` tensor from host-side indices.
pub fn index_tensor<B: Backend>(indices: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let data: Vec<i64> = indices.iter().map(|&i| i as i64).collect();
    Tensor::from_data(TensorData::new(data, [indices.len()]), device)
}

/// Compressed sparse rows over incoming neighbours: `neighbors(v)` lists the
/// sources of every edge that points into `v`.
#[derive(Clone, Debug)]
pub struct Csr {
    offsets: Vec<usize>,
    sources: Vec<usize>,
}

impl Csr {
    pub fn from_coo(graph: &CooGraph) -> Self {
        let mut offsets = vec![0usize; graph.num_nodes + 1];
        for &c in &graph.col_indices {
            offsets[c + 1] += 1;
        }
        for i in 0..graph.num_nodes {
            offsets[i + 1] += offsets[i];
        }
        let mut cursor = offsets.clone();
        let mut sources = vec![0usize; graph.num_edges];
        for (r, c) in graph.edges() {
            sources[cursor[c]] = r;
            cursor[c] += 1;
        }
        Self { offsets, sources }
    }

    pub fn num_nodes(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn num_edges(&self) -> usize {
        self.sources.len()
    }

    pub fn neighbors(&self, node: usize) -> &[usize] {
        &self.sources[self.offsets[node]..self.offsets[node + 1]]
    }

    pub fn degree(&self, node: usize) -> usize {
        self.offsets[node + 1] - self.offsets[node]
    }
}

/// Induced subgraph over a node set. `n_id[local] = global`.
#[derive(Clone, Debug)]
pub struct Subgraph {
    pub n_id: Vec<usize>,
    pub edges: CooGraph,
}

/// Keeps every edge whose endpoints both lie in `nodes`, relabelled to the
/// position of each node in `nodes`.
pub fn induced_subgraph(csr: &Csr, nodes: &[usize]) -> Subgraph {
    const ABSENT: usize = usize::MAX;
    // Global to local id.
    let mut local = vec![ABSENT; csr.num_nodes()];
    for (i, &n) in nodes.iter().enumerate() {
        local[n] = i;
    }
    let mut rows = Vec::new();
    let mut cols = Vec::new();
    for (dst_local, &dst) in nodes.iter().enumerate() {
        for &src in csr.neighbors(dst) {
            let src_local = local[src];
            if src_local != ABSENT {
                rows.push(src_local);
                cols.push(dst_local);
            }
        }
    }
    let num_edges = rows.len();
    Subgraph {
        n_id: nodes.to_vec(),
        edges: CooGraph {
            row_indices: rows,
            col_indices: cols,
            num_nodes: nodes.len(),
            num_edges,
        },
    }
}
