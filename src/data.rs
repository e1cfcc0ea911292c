use crate::{
    error::{self, Error},
    graph::CooGraph,
};
use burn::{
    config::Config,
    tensor::{Int, Tensor, TensorData, backend::Backend},
};
use flate2::read::GzDecoder;
use rand::{Rng, SeedableRng, seq::SliceRandom};
use rand_chacha::ChaCha8Rng;
use serde::de::DeserializeOwned;
use std::{
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
};
use tracing::info;

/// Train / validation / test node indices.
#[derive(Clone, Debug, Default)]
pub struct SplitIdx {
    pub train: Vec<usize>,
    pub valid: Vec<usize>,
    pub test: Vec<usize>,
}

/// Boolean membership masks derived from a [`SplitIdx`].
#[derive(Clone, Debug)]
pub struct SplitMasks {
    pub train: Vec<bool>,
    pub valid: Vec<bool>,
    pub test: Vec<bool>,
}

impl SplitIdx {
    pub fn masks(&self, num_nodes: usize) -> SplitMasks {
        let to_mask = |idx: &[usize]| {
            let mut mask = vec![false; num_nodes];
            for &i in idx {
                mask[i] = true;
            }
            mask
        };
        SplitMasks {
            train: to_mask(&self.train),
            valid: to_mask(&self.valid),
            test: to_mask(&self.test),
        }
    }
}

/// A node-classification dataset: features, labels, edges and a split.
#[derive(Clone, Debug)]
pub struct NodeDataset {
    /// Row-major `[num_nodes, num_features]`.
    pub features: Vec<f32>,
    pub num_features: usize,
    pub labels: Vec<u32>,
    pub num_classes: usize,
    pub graph: CooGraph,
    pub split: SplitIdx,
}

impl NodeDataset {
    pub fn new(
        features: Vec<f32>,
        num_features: usize,
        labels: Vec<u32>,
        graph: CooGraph,
        split: SplitIdx,
    ) -> error::Result<Self> {
        let num_nodes = graph.num_nodes;
        if num_nodes == 0 {
            return Err(Error::Dataset("dataset has no nodes".into()));
        }
        if num_features == 0 || features.len() != num_nodes * num_features {
            return Err(Error::Dataset(format!(
                "expected {num_nodes} x {num_features} features, got {} values",
                features.len()
            )));
        }
        if labels.len() != num_nodes {
            return Err(Error::Dataset(format!(
                "expected {num_nodes} labels, got {}",
                labels.len()
            )));
        }
        for (name, idx) in [("train", &split.train), ("valid", &split.valid), ("test", &split.test)] {
            if let Some(bad) = idx.iter().find(|&&i| i >= num_nodes) {
                return Err(Error::Dataset(format!("{name} index {bad} out of range")));
            }
        }
        let num_classes = labels.iter().max().map_or(0, |&m| m as usize + 1);
        Ok(Self {
            features,
            num_features,
            labels,
            num_classes,
            graph,
            split,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.graph.num_nodes
    }

    pub fn feature_row(&self, node: usize) -> &[f32] {
        &self.features[node * self.num_features..(node + 1) * self.num_features]
    }

    /// Gathers the feature rows of `nodes` into a `[nodes.len(), num_features]` tensor.
    pub fn gather_features<B: Backend>(&self, nodes: &[usize], device: &B::Device) -> Tensor<B, 2> {
        let mut data = Vec::with_capacity(nodes.len() * self.num_features);
        for &n in nodes {
            data.extend_from_slice(self.feature_row(n));
        }
        Tensor::from_data(TensorData::new(data, [nodes.len(), self.num_features]), device)
    }

    /// Gathers the labels of `nodes` into an `Int` tensor.
    pub fn gather_labels<B: Backend>(&self, nodes: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
        let data: Vec<i64> = nodes.iter().map(|&n| self.labels[n] as i64).collect();
        Tensor::from_data(TensorData::new(data, [nodes.len()]), device)
    }

    /// Loads the OGB raw layout of a node property prediction dataset:
    ///
    /// ```text
    /// <root>/raw/node-feat.csv[.gz]    one feature row per node
    /// <root>/raw/node-label.csv[.gz]   one label per node
    /// <root>/raw/edge.csv[.gz]         src,dst per line
    /// <root>/split/<name>/{train,valid,test}.csv[.gz]
    /// ```
    ///
    /// Edges are stored in both directions.
    pub fn load_ogb(root: &Path, split_name: &str) -> error::Result<Self> {
        let raw = root.join("raw");
        info!(root = %root.display(), "loading OGB node dataset");

        let rows: Vec<Vec<f32>> = read_rows(&locate(&raw, "node-feat")?)?;
        let num_features = rows.first().map_or(0, Vec::len);
        if let Some(pos) = rows.iter().position(|r| r.len() != num_features) {
            return Err(Error::Dataset(format!(
                "feature row {pos} has {} columns, expected {num_features}",
                rows[pos].len()
            )));
        }
        let num_nodes = rows.len();
        let features: Vec<f32> = rows.into_iter().flatten().collect();

        let labels: Vec<(i64,)> = read_rows(&locate(&raw, "node-label")?)?;
        let labels = labels
            .into_iter()
            .map(|(l,)| {
                u32::try_from(l).map_err(|_| Error::Dataset(format!("invalid label {l}")))
            })
            .collect::<error::Result<Vec<_>>>()?;

        let edges: Vec<(usize, usize)> = read_rows(&locate(&raw, "edge")?)?;
        let mut rows = Vec::with_capacity(edges.len() * 2);
        let mut cols = Vec::with_capacity(edges.len() * 2);
        for (s, d) in edges {
            rows.push(s);
            cols.push(d);
            rows.push(d);
            cols.push(s);
        }
        let graph = CooGraph::new(rows, cols, num_nodes)?;

        let split_dir = root.join("split").join(split_name);
        let read_split = |name: &str| -> error::Result<Vec<usize>> {
            let idx: Vec<(usize,)> = read_rows(&locate(&split_dir, name)?)?;
            Ok(idx.into_iter().map(|(i,)| i).collect())
        };
        let split = SplitIdx {
            train: read_split("train")?,
            valid: read_split("valid")?,
            test: read_split("test")?,
        };

        let dataset = Self::new(features, num_features, labels, graph, split)?;
        info!(
            nodes = dataset.num_nodes(),
            edges = dataset.graph.num_edges,
            features = dataset.num_features,
            classes = dataset.num_classes,
            train = dataset.split.train.len(),
            "dataset loaded"
        );
        Ok(dataset)
    }

    /// Generates a planted-partition graph whose node features are noisy
    /// class centroids.
    pub fn synthetic(config: &SyntheticConfig) -> error::Result<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let n = config.num_nodes;
        let k = config.num_classes.max(1);

        let labels: Vec<u32> = (0..n).map(|i| (i % k) as u32).collect();
        let centroids: Vec<f32> = (0..k * config.num_features)
            .map(|_| rng.random::<f32>() * 2.0 - 1.0)
            .collect();
        let mut features = Vec::with_capacity(n * config.num_features);
        for &label in &labels {
            let c = &centroids[label as usize * config.num_features..][..config.num_features];
            features.extend(
                c.iter()
                    .map(|&v| v + (rng.random::<f32>() - 0.5) * 2.0 * config.noise),
            );
        }

        let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); k];
        for (i, &l) in labels.iter().enumerate() {
            by_class[l as usize].push(i);
        }
        let num_undirected = n * config.avg_degree / 2;
        let mut rows = Vec::with_capacity(num_undirected * 2);
        let mut cols = Vec::with_capacity(num_undirected * 2);
        for _ in 0..num_undirected {
            let u = rng.random_range(0..n);
            let v = if rng.random::<f64>() < config.p_intra {
                let peers = &by_class[labels[u] as usize];
                peers[rng.random_range(0..peers.len())]
            } else {
                rng.random_range(0..n)
            };
            if u != v {
                rows.extend([u, v]);
                cols.extend([v, u]);
            }
        }
        let graph = CooGraph::new(rows, cols, n)?;

        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut rng);
        let n_train = (n as f64 * config.train_fraction) as usize;
        let n_valid = (n as f64 * config.valid_fraction) as usize;
        let split = SplitIdx {
            train: order[..n_train].to_vec(),
            valid: order[n_train..n_train + n_valid].to_vec(),
            test: order[n_train + n_valid..].to_vec(),
        };
        Self::new(features, config.num_features, labels, graph, split)
    }
}

#[derive(Config, Debug)]
pub struct SyntheticConfig {
    #[config(default = 600)]
    pub num_nodes: usize,
    #[config(default = 4)]
    pub num_classes: usize,
    #[config(default = 16)]
    pub num_features: usize,
    #[config(default = 8)]
    pub avg_degree: usize,
    #[config(default = 0.8)]
    pub p_intra: f64,
    #[config(default = 0.5)]
    pub noise: f32,
    #[config(default = 0.5)]
    pub train_fraction: f64,
    #[config(default = 0.25)]
    pub valid_fraction: f64,
    #[config(default = 42)]
    pub seed: u64,
}

/// Finds `<dir>/<stem>.csv.gz` or `<dir>/<stem>.csv`.
fn locate(dir: &Path, stem: &str) -> error::Result<PathBuf> {
    [format!("{stem}.csv.gz"), format!("{stem}.csv")]
        .into_iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
        .ok_or_else(|| Error::Dataset(format!("{stem}.csv[.gz] not found in {}", dir.display())))
}

fn read_rows<T: DeserializeOwned>(path: &Path) -> error::Result<Vec<T>> {
    let file = BufReader::new(File::open(path)?);
    let reader: Box<dyn Read> = if path.extension().is_some_and(|e| e == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(reader);
    rdr.deserialize()
        .map(|record| record.map_err(Error::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(path: &Path, body: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        File::create(path).unwrap().write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn loads_plain_ogb_layout() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("raw/node-feat.csv"), "0.1,0.2\n0.3,0.4\n0.5,0.6\n");
        write(&root.join("raw/node-label.csv"), "0\n1\n1\n");
        write(&root.join("raw/edge.csv"), "0,1\n1,2\n");
        write(&root.join("split/sales_ranking/train.csv"), "0\n");
        write(&root.join("split/sales_ranking/valid.csv"), "1\n");
        write(&root.join("split/sales_ranking/test.csv"), "2\n");

        let ds = NodeDataset::load_ogb(root, "sales_ranking").unwrap();
        assert_eq!(ds.num_nodes(), 3);
        assert_eq!(ds.num_features, 2);
        assert_eq!(ds.num_classes, 2);
        assert_eq!(ds.graph.num_edges, 4);
        assert_eq!(ds.feature_row(2), &[0.5, 0.6]);
        assert_eq!(ds.split.test, vec![2]);
    }

    #[test]
    fn loads_gzipped_files() {
        use flate2::{Compression, write::GzEncoder};
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let gz = |path: &Path, body: &str| {
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            let mut enc = GzEncoder::new(File::create(path).unwrap(), Compression::default());
            enc.write_all(body.as_bytes()).unwrap();
            enc.finish().unwrap();
        };
        gz(&root.join("raw/node-feat.csv.gz"), "1.0\n2.0\n");
        gz(&root.join("raw/node-label.csv.gz"), "0\n0\n");
        gz(&root.join("raw/edge.csv.gz"), "0,1\n");
        write(&root.join("split/s/train.csv"), "0\n");
        write(&root.join("split/s/valid.csv"), "1\n");
        write(&root.join("split/s/test.csv"), "");

        let ds = NodeDataset::load_ogb(root, "s").unwrap();
        assert_eq!(ds.num_nodes(), 2);
        assert!(ds.split.test.is_empty());
    }

    #[test]
    fn rejects_out_of_range_split() {
        let graph = CooGraph::new(vec![], vec![], 2).unwrap();
        let split = SplitIdx {
            train: vec![3],
            ..Default::default()
        };
        let err = NodeDataset::new(vec![0.0; 2], 1, vec![0, 1], graph, split);
        assert!(matches!(err, Err(Error::Dataset(_))));
    }

    #[test]
    fn rejects_empty_dataset() {
        let graph = CooGraph::new(vec![], vec![], 0).unwrap();
        let err = NodeDataset::new(vec![], 1, vec![], graph, SplitIdx::default());
        assert!(matches!(err, Err(Error::Dataset(_))));
    }

    #[test]
    fn synthetic_config_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("synthetic.json");
        SyntheticConfig::new().with_num_nodes(50).save(&path).unwrap();
        let loaded = SyntheticConfig::load(&path).unwrap();
        assert_eq!(loaded.num_nodes, 50);
        assert_eq!(loaded.num_classes, 4);
    }

    #[test]
    fn synthetic_graph_is_consistent() {
        let config = SyntheticConfig::new().with_num_nodes(200).with_seed(7);
        let ds = NodeDataset::synthetic(&config).unwrap();
        assert_eq!(ds.num_nodes(), 200);
        assert_eq!(ds.features.len(), 200 * ds.num_features);
        assert_eq!(ds.num_classes, 4);
        let masks = ds.split.masks(200);
        assert_eq!(masks.train.iter().filter(|&&m| m).count(), 100);
        assert!(ds.graph.edges().all(|(r, c)| r != c));

        let again = NodeDataset::synthetic(&config).unwrap();
        assert_eq!(again.graph.row_indices, ds.graph.row_indices);
    }
}
