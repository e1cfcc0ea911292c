use crate::{
    contrastive::scatter_mean,
    error::{self, Error},
    graph::Csr,
};
use burn::{
    nn::{Dropout, DropoutConfig, Linear, LinearConfig},
    prelude::*,
    tensor::{
        Int, Tensor, TensorData,
        activation::{log_softmax, relu},
        backend::Backend,
    },
};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

/// GraphSAGE convolution with mean aggregation:
/// `out_i = W_l * mean_{j -> i} x_j + b_l + W_r * x_i`.
#[derive(Module, Debug)]
pub struct SageConv<B: Backend> {
    lin_l: Linear<B>,
    lin_r: Linear<B>,
}

#[derive(Config, Debug)]
pub struct SageConvConfig {
    pub d_input: usize,
    pub d_output: usize,
}

impl SageConvConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SageConv<B> {
        SageConv {
            lin_l: LinearConfig::new(self.d_input, self.d_output).init(device),
            lin_r: LinearConfig::new(self.d_input, self.d_output)
                .with_bias(false)
                .init(device),
        }
    }
}

impl<B: Backend> SageConv<B> {
    /// Messages flow from `x_src[src[e]]` into `x_dst[dst[e]]`.
    pub fn forward(
        &self,
        x_src: Tensor<B, 2>,
        x_dst: Tensor<B, 2>,
        src: Tensor<B, 1, Int>,
        dst: Tensor<B, 1, Int>,
    ) -> Tensor<B, 2> {
        let num_dst = x_dst.dims()[0];
        let aggr = scatter_mean(x_src.select(0, src), dst, num_dst);
        self.combine(aggr, x_dst)
    }

    /// Applies the layer to an already aggregated neighbourhood.
    pub fn combine(&self, aggr: Tensor<B, 2>, x_dst: Tensor<B, 2>) -> Tensor<B, 2> {
        self.lin_l.forward(aggr) + self.lin_r.forward(x_dst)
    }

    pub fn d_output(&self) -> usize {
        self.lin_r.weight.val().dims()[1]
    }
}

/// One hop of a sampled computation graph, on device.
#[derive(Clone, Debug)]
pub struct BlockAdj<B: Backend> {
    pub src: Tensor<B, 1, Int>,
    pub dst: Tensor<B, 1, Int>,
    pub num_dst: usize,
}

/// Everything one forward pass exposes to the losses.
#[derive(Clone, Debug)]
pub struct SageOutput<B: Backend> {
    /// `[nodes, classes]` log-probabilities.
    pub log_probs: Tensor<B, 2>,
    /// Node-level representation contrasted against the other view.
    pub node_repr: Tensor<B, 2>,
    /// Representation pooled into neighbourhood / partition summaries.
    pub hidden: Tensor<B, 2>,
}

#[derive(Config, Debug)]
pub struct SageConfig {
    pub in_channels: usize,
    pub hidden_channels: usize,
    pub out_channels: usize,
    #[config(default = 3)]
    pub num_layers: usize,
    #[config(default = 0.5)]
    pub dropout: f64,
    /// Projection head reads class logits instead of hidden features.
    #[config(default = false)]
    pub project_logits: bool,
}

#[derive(Module, Debug)]
pub struct Sage<B: Backend> {
    convs: Vec<SageConv<B>>,
    fc1: Linear<B>,
    fc2: Linear<B>,
    dropout: Dropout,
}

impl SageConfig {
    /// At least two layers: one hidden representation is always produced.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Sage<B> {
        let num_layers = self.num_layers.max(2);
        let mut convs = Vec::with_capacity(num_layers);
        convs.push(SageConvConfig::new(self.in_channels, self.hidden_channels).init(device));
        for _ in 0..num_layers - 2 {
            convs.push(SageConvConfig::new(self.hidden_channels, self.hidden_channels).init(device));
        }
        convs.push(SageConvConfig::new(self.hidden_channels, self.out_channels).init(device));

        let projection_in = if self.project_logits {
            self.out_channels
        } else {
            self.hidden_channels
        };
        Sage {
            convs,
            fc1: LinearConfig::new(projection_in, self.hidden_channels).init(device),
            fc2: LinearConfig::new(self.hidden_channels, self.hidden_channels).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

impl<B: Backend> Sage<B> {
    pub fn num_layers(&self) -> usize {
        self.convs.len()
    }

    /// Full-batch forward over a (sub)graph.
    ///
    /// `node_repr` is the pre-activation output of the last hidden layer and
    /// `hidden` the activated input of the output layer.
    pub fn forward_subgraph(
        &self,
        x: Tensor<B, 2>,
        src: Tensor<B, 1, Int>,
        dst: Tensor<B, 1, Int>,
    ) -> SageOutput<B> {
        let last = self.convs.len() - 1;
        let mut x = x;
        let mut node_repr = x.clone();
        let mut hidden = x.clone();
        for (i, conv) in self.convs.iter().enumerate() {
            if i == last {
                hidden = x.clone();
            }
            let out = conv.forward(x.clone(), x, src.clone(), dst.clone());
            if i == last {
                x = out;
            } else {
                node_repr = out.clone();
                x = self.dropout.forward(relu(out));
            }
        }
        SageOutput {
            log_probs: log_softmax(x, 1),
            node_repr,
            hidden,
        }
    }

    /// Layer-wise forward over sampled hops, outermost first. Targets of every
    /// hop are the leading rows of its sources.
    ///
    /// `node_repr` holds the seed logits and `hidden` the input of the final
    /// layer.
    pub fn forward_blocks(&self, x: Tensor<B, 2>, adjs: &[BlockAdj<B>]) -> SageOutput<B> {
        let last = self.convs.len() - 1;
        let mut x = x;
        let mut hidden = x.clone();
        for (i, (conv, adj)) in self.convs.iter().zip(adjs).enumerate() {
            let x_target = x.clone().narrow(0, 0, adj.num_dst);
            if i == last {
                hidden = x.clone();
            }
            x = conv.forward(x, x_target, adj.src.clone(), adj.dst.clone());
            if i != last {
                x = self.dropout.forward(relu(x));
            }
        }
        SageOutput {
            log_probs: log_softmax(x.clone(), 1),
            node_repr: x,
            hidden,
        }
    }

    /// Projection head: `fc2(elu(fc1(z)))`.
    pub fn project(&self, z: Tensor<B, 2>) -> Tensor<B, 2> {
        self.fc2.forward(elu(self.fc1.forward(z)))
    }

    /// Layer-by-layer inference over the full graph using every neighbour.
    ///
    /// Neighbour means are computed on the host one chunk of targets at a
    /// time, so memory stays bounded by `chunk` rows of aggregated features.
    /// Returns `[num_nodes, out_channels]` logits.
    pub fn inference(
        &self,
        features: &[f32],
        num_features: usize,
        csr: &Csr,
        chunk: usize,
        device: &B::Device,
    ) -> error::Result<Tensor<B, 2>> {
        let n = csr.num_nodes();
        let chunk = chunk.max(1);
        let pb = ProgressBar::new((n * self.convs.len()) as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} Evaluating [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let mut x_all = features.to_vec();
        let mut dim = num_features;
        let last = self.convs.len() - 1;
        for (i, conv) in self.convs.iter().enumerate() {
            let out_dim = conv.d_output();
            let mut next = Vec::with_capacity(n * out_dim);
            for start in (0..n).step_by(chunk) {
                let end = (start + chunk).min(n);
                let rows = end - start;
                let mut aggr = vec![0.0f32; rows * dim];
                aggr.par_chunks_mut(dim).enumerate().for_each(|(r, out)| {
                    let neighbors = csr.neighbors(start + r);
                    for &nb in neighbors {
                        for (o, v) in out.iter_mut().zip(&x_all[nb * dim..(nb + 1) * dim]) {
                            *o += v;
                        }
                    }
                    if !neighbors.is_empty() {
                        let inv = 1.0 / neighbors.len() as f32;
                        out.iter_mut().for_each(|o| *o *= inv);
                    }
                });
                let aggr = Tensor::<B, 2>::from_data(TensorData::new(aggr, [rows, dim]), device);
                let x_dst = Tensor::<B, 2>::from_data(
                    TensorData::new(x_all[start * dim..end * dim].to_vec(), [rows, dim]),
                    device,
                );
                let mut out = conv.combine(aggr, x_dst);
                if i != last {
                    out = relu(out);
                }
                next.extend(tensor_to_vec(out)?);
                pb.inc(rows as u64);
            }
            x_all = next;
            dim = out_dim;
        }
        pb.finish_and_clear();
        Ok(Tensor::from_data(TensorData::new(x_all, [n, dim]), device))
    }
}

/// Exponential linear unit with `alpha = 1`.
pub fn elu<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.clone().clamp_min(0.0) + x.clamp_max(0.0).exp().sub_scalar(1.0)
}

/// Scales every row to unit L2 norm.
pub fn normalize<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let norm = x.clone().powf_scalar(2.0).sum_dim(1).sqrt().clamp_min(1e-12);
    x / norm
}

/// Mean negative log-likelihood of `targets` under `log_probs`.
pub fn nll_loss<B: Backend>(log_probs: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
    let n = targets.dims()[0];
    log_probs.gather(1, targets.reshape([n, 1])).mean().neg()
}

pub(crate) fn tensor_to_vec<B: Backend, const D: usize>(t: Tensor<B, D>) -> error::Result<Vec<f32>> {
    t.into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| Error::Tensor(format!("{e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{CooGraph, index_tensor};
    use burn_ndarray::{NdArray, NdArrayDevice};

    type B = NdArray;

    fn config() -> SageConfig {
        SageConfig::new(4, 8, 3).with_dropout(0.0)
    }

    fn ring() -> CooGraph {
        let mut g = CooGraph::from_pairs(&[(0, 1), (1, 2), (2, 3), (3, 0), (1, 0), (2, 1), (3, 2), (0, 3)], 4).unwrap();
        g.add_remaining_self_loops();
        g
    }

    fn features() -> Vec<f32> {
        (0..16).map(|i| i as f32 / 16.0).collect()
    }

    #[test]
    fn subgraph_forward_shapes() {
        let device = NdArrayDevice::Cpu;
        let model: Sage<B> = config().init(&device);
        let g = ring();
        let (src, dst) = g.to_tensors::<B>(&device);
        let x = Tensor::from_data(TensorData::new(features(), [4, 4]), &device);
        let out = model.forward_subgraph(x, src, dst);
        assert_eq!(out.log_probs.dims(), [4, 3]);
        assert_eq!(out.node_repr.dims(), [4, 8]);
        assert_eq!(out.hidden.dims(), [4, 8]);
        let probs: Vec<f32> = tensor_to_vec(out.log_probs.exp().sum_dim(1)).unwrap();
        assert!(probs.iter().all(|p| (p - 1.0).abs() < 1e-4));
    }

    #[test]
    fn block_forward_returns_seed_rows() {
        let device = NdArrayDevice::Cpu;
        let model: Sage<B> = SageConfig::new(4, 8, 3)
            .with_num_layers(2)
            .with_dropout(0.0)
            .with_project_logits(true)
            .init(&device);
        // 4 sources -> 2 targets -> 1 seed.
        let adjs = vec![
            BlockAdj {
                src: index_tensor(&[0, 1, 2, 3], &device),
                dst: index_tensor(&[0, 0, 1, 1], &device),
                num_dst: 2,
            },
            BlockAdj {
                src: index_tensor(&[0, 1], &device),
                dst: index_tensor(&[0, 0], &device),
                num_dst: 1,
            },
        ];
        let x = Tensor::from_data(TensorData::new(features(), [4, 4]), &device);
        let out = model.forward_blocks(x, &adjs);
        assert_eq!(out.log_probs.dims(), [1, 3]);
        assert_eq!(out.node_repr.dims(), [1, 3]);
        assert_eq!(out.hidden.dims(), [2, 8]);
        assert_eq!(model.project(out.node_repr).dims(), [1, 8]);
    }

    #[test]
    fn inference_matches_full_batch_forward() {
        let device = NdArrayDevice::Cpu;
        let model: Sage<B> = config().init(&device);
        let g = ring();
        let csr = Csr::from_coo(&g);
        let (src, dst) = g.to_tensors::<B>(&device);
        let x = Tensor::from_data(TensorData::new(features(), [4, 4]), &device);
        let full = model.forward_subgraph(x, src, dst).log_probs;
        let layered = log_softmax(model.inference(&features(), 4, &csr, 3, &device).unwrap(), 1);
        let a = tensor_to_vec(full).unwrap();
        let b = tensor_to_vec(layered).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-4, "{x} vs {y}");
        }
    }

    #[test]
    fn elu_and_normalize() {
        let device = NdArrayDevice::Cpu;
        let x = Tensor::<B, 2>::from_data(TensorData::new(vec![3.0f32, -4.0], [1, 2]), &device);
        let e = tensor_to_vec(elu(x.clone())).unwrap();
        assert!((e[0] - 3.0).abs() < 1e-6);
        assert!((e[1] - ((-4.0f32).exp() - 1.0)).abs() < 1e-6);
        let n = tensor_to_vec(normalize(x)).unwrap();
        assert!((n[0] - 0.6).abs() < 1e-6 && (n[1] + 0.8).abs() < 1e-6);
    }

    #[test]
    fn nll_picks_target_log_probs() {
        let device = NdArrayDevice::Cpu;
        let lp = Tensor::<B, 2>::from_data(TensorData::new(vec![-1.0f32, -2.0, -3.0, -4.0], [2, 2]), &device);
        let targets = index_tensor::<B>(&[1, 0], &device);
        let loss = tensor_to_vec(nll_loss(lp, targets)).unwrap()[0];
        assert!((loss - 2.5).abs() < 1e-6);
    }
}
