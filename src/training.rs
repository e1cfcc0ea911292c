use crate::{
    augment::{RateController, RateRule, augment_adjs, augment_anchored, augment_subgraph, drop_edges},
    contrastive::{ContrastMasks, ContrastiveObjective, neighbourhood_embedding, scatter_mean},
    data::{NodeDataset, SplitMasks},
    error::{self, Error},
    evaluate::{SplitAccuracy, evaluate_splits},
    graph::{Csr, index_tensor},
    model::{BlockAdj, Sage, SageConfig, nll_loss, normalize},
    report::{EpochRecord, RateLog, plot_history},
    sampler::{
        SubgraphBatch, batch_features,
        cluster::{BfsPartitioner, ClusterData, ClusterLoader},
        neighbor::{Adj, Fanout, NeighborBatch, NeighborBatcher, NeighborSampler, SeedNodes},
        saint::RandomWalkSampler,
    },
};
use burn::{
    data::dataloader::DataLoaderBuilder,
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    record::CompactRecorder,
    tensor::{ElementConversion, TensorData, backend::AutodiffBackend},
};
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::Path, sync::Arc};
use tracing::{debug, info, warn};

/// How training batches are drawn from the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Groups of graph partitions (Cluster-GCN).
    Cluster,
    /// Layer-wise neighbour sampling (GraphSAGE).
    Neighbor,
    /// Random-walk induced subgraphs (GraphSAINT).
    Saint,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Cluster => "cluster",
            Strategy::Neighbor => "neighbor",
            Strategy::Saint => "saint",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Config, Debug)]
pub struct ClusterConfig {
    #[config(default = 15000)]
    pub num_partitions: usize,
    /// Partitions per batch.
    #[config(default = 32)]
    pub batch_size: usize,
}

#[derive(Config, Debug)]
pub struct NeighborConfig {
    /// Fan-out per hop; `sizes[0]` applies to the seed hop.
    #[config(default = "vec![Fanout::Sample(24), Fanout::Sample(8), Fanout::Sample(4)]")]
    pub sizes: Vec<Fanout>,
    #[config(default = 1024)]
    pub batch_size: usize,
    #[config(default = 4)]
    pub num_workers: usize,
}

#[derive(Config, Debug)]
pub struct SaintConfig {
    /// Walk roots per batch.
    #[config(default = 20000)]
    pub batch_size: usize,
    #[config(default = 3)]
    pub walk_length: usize,
    #[config(default = 40)]
    pub num_steps: usize,
    /// Highest-degree training nodes contrasted per batch.
    #[config(default = 1024)]
    pub top_k: usize,
}

#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub strategy: Strategy,
    #[config(default = 777)]
    pub seed: u64,
    #[config(default = 60)]
    pub epochs: usize,
    #[config(default = 2)]
    pub runs: usize,
    #[config(default = 1e-3)]
    pub lr: f64,
    #[config(default = 256)]
    pub hidden_channels: usize,
    #[config(default = 3)]
    pub num_layers: usize,
    #[config(default = 0.5)]
    pub dropout: f64,
    /// Weight of the contrastive term.
    #[config(default = 1.0)]
    pub par: f64,
    /// Initial augmentation rate of every run.
    #[config(default = 0.2)]
    pub rate: f64,
    /// Step of the rate controller.
    #[config(default = 0.004)]
    pub limit: f64,
    #[config(default = "RateRule::Sigmoid")]
    pub rule: RateRule,
    #[config(default = 0.0)]
    pub rate_min: f64,
    #[config(default = 1.0)]
    pub rate_max: f64,
    /// Supervised-only epochs before contrast starts.
    #[config(default = 0)]
    pub warmup_epochs: usize,
    #[config(default = 1)]
    pub test_freq: usize,
    /// Periodic evaluation starts after this epoch; the last epoch is always evaluated.
    #[config(default = 100)]
    pub eval_start: usize,
    #[config(default = "ContrastiveObjective::Jsd")]
    pub objective: ContrastiveObjective,
    #[config(default = 4096)]
    pub inference_chunk: usize,
    #[config(default = "ClusterConfig::new()")]
    pub cluster: ClusterConfig,
    #[config(default = "NeighborConfig::new()")]
    pub neighbor: NeighborConfig,
    #[config(default = "SaintConfig::new()")]
    pub saint: SaintConfig,
}

impl TrainingConfig {
    /// Tuned defaults for `strategy`.
    pub fn for_strategy(strategy: Strategy) -> Self {
        let base = Self::new(strategy);
        match strategy {
            Strategy::Cluster => base.with_test_freq(2),
            Strategy::Neighbor => base
                .with_epochs(80)
                .with_lr(5e-4)
                .with_rate(0.5)
                .with_limit(1e-4)
                .with_rule(RateRule::Linear),
            Strategy::Saint => base
                .with_epochs(50)
                .with_hidden_channels(512)
                .with_par(0.8)
                .with_limit(1e-3),
        }
    }

    pub fn validate(&self) -> error::Result<()> {
        let fail = |msg: String| Err(Error::Config(msg));
        if self.num_layers < 2 {
            return fail(format!("num_layers must be at least 2, got {}", self.num_layers));
        }
        if self.strategy == Strategy::Neighbor && self.neighbor.sizes.len() != self.num_layers {
            return fail(format!(
                "neighbour sampling needs one fan-out per layer ({} sizes for {} layers)",
                self.neighbor.sizes.len(),
                self.num_layers
            ));
        }
        if self.rate_min > self.rate_max {
            return fail(format!("rate bounds are reversed: [{}, {}]", self.rate_min, self.rate_max));
        }
        if self.epochs == 0 || self.runs == 0 || self.test_freq == 0 {
            return fail("epochs, runs and test_freq must be positive".into());
        }
        let batch_size = match self.strategy {
            Strategy::Cluster => self.cluster.batch_size.min(self.cluster.num_partitions),
            Strategy::Neighbor => self.neighbor.batch_size,
            Strategy::Saint => self.saint.batch_size.min(self.saint.num_steps),
        };
        if batch_size == 0 {
            return fail(format!("{} sampler has an empty batch", self.strategy));
        }
        Ok(())
    }

    fn should_evaluate(&self, epoch: usize) -> bool {
        (epoch > self.eval_start && epoch % self.test_freq == 0) || epoch == self.epochs
    }
}

/// Summary of one training epoch.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub loss: f64,
    /// Seed accuracy of the clean view, neighbour sampling only.
    pub approx_acc: Option<f64>,
    /// Augmentation rate carried into the next epoch.
    pub rate: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunResult {
    pub run: usize,
    pub best_val: f64,
    pub final_test: f64,
    pub history: Vec<EpochStats>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExperimentSummary {
    pub strategy: Strategy,
    pub runs: Vec<RunResult>,
    pub val_mean: f64,
    pub val_std: f64,
    pub test_mean: f64,
    pub test_std: f64,
}

/// Mean and population standard deviation.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

fn progress_bar(len: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    let template = format!(
        "{{spinner:.green}} {label} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} ({{eta}}) Loss: {{msg}}"
    );
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

fn scalar<B: Backend>(t: &Tensor<B, 1>) -> f64 {
    t.clone().into_scalar().elem::<f64>()
}

fn feature_tensor<B: Backend>(features: Vec<f32>, num_features: usize, device: &B::Device) -> Tensor<B, 2> {
    let n = features.len() / num_features.max(1);
    Tensor::from_data(TensorData::new(features, [n, num_features]), device)
}

fn to_blocks<B: Backend>(adjs: &[Adj], device: &B::Device) -> Vec<BlockAdj<B>> {
    adjs.iter()
        .map(|adj| BlockAdj {
            src: index_tensor(&adj.src, device),
            dst: index_tensor(&adj.dst, device),
            num_dst: adj.size.1,
        })
        .collect()
}

fn step<B: AutodiffBackend, O: Optimizer<Sage<B>, B>>(
    model: Sage<B>,
    optim: &mut O,
    lr: f64,
    loss: Tensor<B, 1>,
) -> Sage<B> {
    let grads = loss.backward();
    let grads = GradientsParams::from_grads(grads, &model);
    optim.step(lr, model, grads)
}

/// Edges feeding training nodes of a random-walk batch, and the `top_k`
/// training nodes with the most such edges.
struct AnchorPlan {
    /// Source of every edge into a training node.
    neighbor: Vec<usize>,
    /// Position (among training nodes) of that edge's target.
    cluster: Vec<usize>,
    /// Anchor positions among training nodes, highest degree first.
    positions: Vec<usize>,
    /// Local ids of the anchors.
    locals: Vec<usize>,
}

impl AnchorPlan {
    fn new(batch: &SubgraphBatch, train_local: &[usize], top_k: usize) -> Self {
        let mut position = vec![None; batch.num_nodes()];
        for (p, &l) in train_local.iter().enumerate() {
            position[l] = Some(p);
        }
        let mut degree = vec![0usize; train_local.len()];
        let (mut neighbor, mut cluster) = (Vec::new(), Vec::new());
        for (u, v) in batch.edges.edges() {
            if let Some(p) = position[v] {
                neighbor.push(u);
                cluster.push(p);
                degree[p] += 1;
            }
        }
        let mut positions: Vec<usize> = (0..train_local.len()).collect();
        positions.sort_by(|&a, &b| degree[b].cmp(&degree[a]).then(a.cmp(&b)));
        positions.truncate(top_k);
        let locals = positions.iter().map(|&p| train_local[p]).collect();
        Self {
            neighbor,
            cluster,
            positions,
            locals,
        }
    }
}

/// Per-run training state shared by every strategy.
pub struct Trainer<'a, B: AutodiffBackend> {
    config: &'a TrainingConfig,
    dataset: &'a NodeDataset,
    csr: Arc<Csr>,
    masks: SplitMasks,
    cluster: Option<ClusterData>,
    controller: RateController,
    sample_rng: ChaCha8Rng,
    aug_rng: ChaCha8Rng,
    device: B::Device,
}

impl<'a, B: AutodiffBackend> Trainer<'a, B> {
    /// Adds self loops where the strategy trains on them and partitions the
    /// graph once for cluster training.
    pub fn new(config: &'a TrainingConfig, dataset: &'a NodeDataset, device: B::Device) -> error::Result<Self> {
        config.validate()?;
        let mut graph = dataset.graph.clone();
        if config.strategy == Strategy::Neighbor || config.warmup_epochs == 0 {
            graph.add_remaining_self_loops();
        }
        let csr = Arc::new(Csr::from_coo(&graph));
        let mut sample_rng = ChaCha8Rng::seed_from_u64(config.seed);
        let aug_rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(1));

        let cluster = match config.strategy {
            Strategy::Cluster => {
                let data = ClusterData::new(&csr, &BfsPartitioner, config.cluster.num_partitions, &mut sample_rng);
                info!(parts = data.num_parts(), "graph partitioned");
                Some(data)
            }
            _ => None,
        };

        Ok(Self {
            config,
            dataset,
            masks: dataset.split.masks(dataset.num_nodes()),
            csr,
            cluster,
            controller: RateController::new(
                config.rate,
                config.limit,
                config.rule,
                (config.rate_min, config.rate_max),
            ),
            sample_rng,
            aug_rng,
            device,
        })
    }

    pub fn csr(&self) -> &Csr {
        &self.csr
    }

    pub fn init_model(&self) -> Sage<B> {
        SageConfig::new(self.dataset.num_features, self.config.hidden_channels, self.dataset.num_classes)
            .with_num_layers(self.config.num_layers)
            .with_dropout(self.config.dropout)
            .with_project_logits(self.config.strategy == Strategy::Neighbor)
            .init(&self.device)
    }

    /// Trains one epoch; warm-up epochs use the supervised loss only.
    pub fn train_epoch<O: Optimizer<Sage<B>, B>>(
        &mut self,
        model: Sage<B>,
        optim: &mut O,
        epoch: usize,
    ) -> error::Result<(Sage<B>, EpochStats)> {
        let warmup = epoch <= self.config.warmup_epochs;
        let (model, loss, approx_acc) = match self.config.strategy {
            Strategy::Cluster => self.cluster_epoch(model, optim, warmup)?,
            Strategy::Neighbor => self.neighbor_epoch(model, optim, warmup),
            Strategy::Saint => self.saint_epoch(model, optim, warmup),
        };
        debug!(epoch, observed = self.controller.losses().len(), "rate controller updates");
        let rate = self.controller.end_epoch();
        Ok((
            model,
            EpochStats {
                epoch,
                loss,
                approx_acc,
                rate,
            },
        ))
    }

    fn cluster_epoch<O: Optimizer<Sage<B>, B>>(
        &mut self,
        mut model: Sage<B>,
        optim: &mut O,
        warmup: bool,
    ) -> error::Result<(Sage<B>, f64, Option<f64>)> {
        let data = self
            .cluster
            .as_ref()
            .ok_or_else(|| Error::Config("cluster training without a partition".into()))?;
        let loader = ClusterLoader::new(&self.csr, data, &self.masks.train, self.config.cluster.batch_size);
        let pb = progress_bar(loader.len() as u64, "Cluster");
        let num_features = self.dataset.num_features;
        let device = &self.device;
        let (mut total, mut batches) = (0.0, 0usize);

        for batch in loader.epoch(&mut self.sample_rng) {
            pb.inc(1);
            let train_local = batch.train_nodes();
            let Some(node_cluster) = batch.node_cluster.as_ref() else {
                continue;
            };
            if train_local.is_empty() {
                continue;
            }
            let features = batch_features(self.dataset, &batch);
            let train_idx = index_tensor::<B>(&train_local, device);
            let targets = self.dataset.gather_labels::<B>(&batch.train_globals(), device);

            let (loss, loss_train) = if warmup {
                let edges = drop_edges(&batch.edges, self.config.rate, &mut self.aug_rng);
                let (src, dst) = edges.to_tensors::<B>(device);
                let out = model.forward_subgraph(feature_tensor(features, num_features, device), src, dst);
                let loss = nll_loss(out.log_probs.select(0, train_idx), targets);
                let value = scalar(&loss);
                (loss, value)
            } else {
                let view = augment_subgraph(
                    &features,
                    num_features,
                    &batch.edges,
                    self.controller.rate(),
                    &mut self.aug_rng,
                );
                let (src, dst) = batch.edges.to_tensors::<B>(device);
                let (aug_src, aug_dst) = view.edges.to_tensors::<B>(device);
                let aug = model.forward_subgraph(feature_tensor(view.features, num_features, device), aug_src, aug_dst);
                let clean = model.forward_subgraph(feature_tensor(features, num_features, device), src, dst);

                let num_clusters = batch.num_clusters();
                let cluster_idx = index_tensor::<B>(node_cluster, device);
                let g1 = scatter_mean(aug.hidden, cluster_idx.clone(), num_clusters);
                let g2 = scatter_mean(clean.hidden, cluster_idx, num_clusters);
                let masks = ContrastMasks::from_assignment(node_cluster, num_clusters, device);
                let loss_cl = self
                    .config
                    .objective
                    .two_view((aug.node_repr, g1), (clean.node_repr, g2), &masks);

                let loss_train = nll_loss(aug.log_probs.select(0, train_idx), targets);
                let value = scalar(&loss_train);
                let loss = loss_train + loss_cl.mul_scalar(self.config.par);
                self.controller.observe(scalar(&loss));
                (loss, value)
            };
            model = step(model, optim, self.config.lr, loss);

            debug!(nodes = batch.num_nodes(), loss = loss_train, rate = self.controller.rate(), "cluster batch");
            pb.set_message(format!("{loss_train:.4}"));
            total += loss_train;
            batches += 1;
        }
        pb.finish_and_clear();
        Ok((model, total / batches.max(1) as f64, None))
    }

    fn neighbor_epoch<O: Optimizer<Sage<B>, B>>(
        &mut self,
        mut model: Sage<B>,
        optim: &mut O,
        warmup: bool,
    ) -> (Sage<B>, f64, Option<f64>) {
        let cfg = &self.config.neighbor;
        let sampler = NeighborSampler::new(self.csr.clone(), cfg.sizes.clone());
        let mut builder = DataLoaderBuilder::<B, usize, NeighborBatch>::new(NeighborBatcher::new(sampler))
            .batch_size(cfg.batch_size)
            .shuffle(self.config.seed.wrapping_add(self.controller.history().len() as u64));
        if cfg.num_workers > 0 {
            builder = builder.num_workers(cfg.num_workers);
        }
        let loader = builder.build(SeedNodes::new(self.dataset.split.train.clone()));

        let pb = progress_bar(loader.num_items() as u64, "Neighbor");
        let device = &self.device;
        let (mut total, mut batches, mut correct) = (0.0, 0usize, 0i64);

        for batch in loader.iter() {
            let seeds = &batch.n_id[..batch.batch_size];
            let labels: Vec<u32> = seeds.iter().map(|&n| self.dataset.labels[n]).collect();
            let targets = self.dataset.gather_labels::<B>(seeds, device);
            let x = self.dataset.gather_features::<B>(&batch.n_id, device);
            let clean = model.forward_blocks(x.clone(), &to_blocks::<B>(&batch.adjs, device));

            let (loss, loss_train) = if warmup {
                let loss = nll_loss(clean.log_probs.clone(), targets.clone());
                let value = scalar(&loss);
                (loss, value)
            } else {
                let adjs_aug = augment_adjs(&batch.adjs, self.controller.rate(), &mut self.aug_rng);
                let aug = model.forward_blocks(x, &to_blocks::<B>(&adjs_aug, device));

                let (neighbor, cluster) = match batch.adjs.last() {
                    Some(adj) => (index_tensor::<B>(&adj.src, device), index_tensor::<B>(&adj.dst, device)),
                    None => (index_tensor::<B>(&[], device), index_tensor::<B>(&[], device)),
                };
                let g1 = neighbourhood_embedding(clean.hidden, neighbor.clone(), cluster.clone(), batch.batch_size);
                let g2 = neighbourhood_embedding(aug.hidden, neighbor, cluster, batch.batch_size);
                let h1 = normalize(model.project(clean.node_repr));
                let h2 = normalize(model.project(aug.node_repr));
                let masks = ContrastMasks::from_labels(&labels, device);
                let loss_cl = self.config.objective.two_view((h1, g1), (h2, g2), &masks);

                let loss_train = nll_loss(aug.log_probs, targets.clone());
                let value = scalar(&loss_train);
                let loss = loss_train + loss_cl.mul_scalar(self.config.par);
                self.controller.observe(scalar(&loss));
                (loss, value)
            };
            correct += clean
                .log_probs
                .argmax(1)
                .reshape([batch.batch_size])
                .equal(targets)
                .int()
                .sum()
                .into_scalar()
                .elem::<i64>();
            model = step(model, optim, self.config.lr, loss);

            debug!(seeds = batch.batch_size, nodes = batch.n_id.len(), loss = loss_train, "neighbour batch");
            pb.inc(batch.batch_size as u64);
            pb.set_message(format!("{loss_train:.4}"));
            total += loss_train;
            batches += 1;
        }
        pb.finish_and_clear();
        let approx_acc = correct as f64 / self.dataset.split.train.len().max(1) as f64;
        (model, total / batches.max(1) as f64, Some(approx_acc))
    }

    fn saint_epoch<O: Optimizer<Sage<B>, B>>(
        &mut self,
        mut model: Sage<B>,
        optim: &mut O,
        warmup: bool,
    ) -> (Sage<B>, f64, Option<f64>) {
        let cfg = &self.config.saint;
        let sampler = RandomWalkSampler::new(
            &self.csr,
            &self.masks.train,
            cfg.batch_size,
            cfg.walk_length,
            cfg.num_steps,
        );
        let pb = progress_bar(sampler.len() as u64, "Saint");
        let num_features = self.dataset.num_features;
        let device = &self.device;
        let (mut total, mut batches) = (0.0, 0usize);

        for _ in 0..sampler.len() {
            let batch = sampler.sample(&mut self.sample_rng);
            pb.inc(1);
            let train_local = batch.train_nodes();
            if train_local.is_empty() {
                continue;
            }
            let features = batch_features(self.dataset, &batch);
            let train_idx = index_tensor::<B>(&train_local, device);
            let train_globals = batch.train_globals();
            let targets = self.dataset.gather_labels::<B>(&train_globals, device);
            let (src, dst) = batch.edges.to_tensors::<B>(device);

            let loss = if warmup {
                let out = model.forward_subgraph(feature_tensor(features, num_features, device), src, dst);
                nll_loss(out.log_probs.select(0, train_idx), targets)
            } else {
                let plan = AnchorPlan::new(&batch, &train_local, cfg.top_k);
                let rate = self.controller.rate();
                let view = augment_anchored(&features, &batch.edges, rate, &plan.locals, &mut self.aug_rng);
                let (aug_src, aug_dst) = view.edges.to_tensors::<B>(device);
                let aug = model.forward_subgraph(feature_tensor(view.features, num_features, device), aug_src, aug_dst);
                let clean = model.forward_subgraph(feature_tensor(features, num_features, device), src, dst);
                let loss_train = nll_loss(aug.log_probs.select(0, train_idx), targets);

                let loss = if plan.neighbor.is_empty() {
                    loss_train
                } else {
                    let neighbor = index_tensor::<B>(&plan.neighbor, device);
                    let cluster = index_tensor::<B>(&plan.cluster, device);
                    let anchor_pos = index_tensor::<B>(&plan.positions, device);
                    let anchor_local = index_tensor::<B>(&plan.locals, device);
                    let g1 = neighbourhood_embedding(aug.hidden, neighbor.clone(), cluster.clone(), train_local.len())
                        .select(0, anchor_pos.clone());
                    let g2 = neighbourhood_embedding(clean.hidden, neighbor, cluster, train_local.len())
                        .select(0, anchor_pos);
                    let x1 = aug.node_repr.select(0, anchor_local.clone());
                    let x2 = clean.node_repr.select(0, anchor_local);
                    let labels: Vec<u32> =
                        plan.positions.iter().map(|&p| self.dataset.labels[train_globals[p]]).collect();
                    let masks = ContrastMasks::from_labels(&labels, device);
                    let loss_cl = self.config.objective.two_view((x1, g1), (x2, g2), &masks);
                    loss_train + loss_cl.mul_scalar(self.config.par)
                };
                self.controller.observe(scalar(&loss));
                loss
            };
            let value = scalar(&loss);
            model = step(model, optim, self.config.lr, loss);

            debug!(nodes = batch.num_nodes(), train = train_local.len(), loss = value, "random-walk batch");
            pb.set_message(format!("{value:.4}"));
            total += value;
            batches += 1;
        }
        pb.finish_and_clear();
        (model, total / batches.max(1) as f64, None)
    }

    pub fn evaluate(&self, model: &Sage<B>) -> error::Result<SplitAccuracy> {
        let model = model.valid();
        evaluate_splits(&model, self.dataset, &self.csr, self.config.inference_chunk, &self.device)
    }

    /// One independent run: fresh model and optimizer, rate reset.
    pub fn run(&mut self, run: usize, artifact_dir: &Path, log: &RateLog) -> error::Result<RunResult> {
        self.controller.reset(self.config.rate);
        let mut model = self.init_model();
        let mut optim = AdamConfig::new().init();
        let (mut best_val, mut final_test) = (0.0, 0.0);
        let mut history = Vec::with_capacity(self.config.epochs);

        for epoch in 1..=self.config.epochs {
            let (next, stats) = self.train_epoch(model, &mut optim, epoch)?;
            model = next;
            info!(
                run,
                epoch,
                loss = stats.loss,
                approx_acc = stats.approx_acc,
                rate = stats.rate,
                "epoch finished"
            );
            log.append(&EpochRecord {
                run,
                epoch,
                loss: stats.loss,
                rate: stats.rate,
                approx_acc: stats.approx_acc,
            })?;
            history.push(stats);

            if self.config.should_evaluate(epoch) {
                let acc = self.evaluate(&model)?;
                info!(run, epoch, train = acc.train, valid = acc.valid, test = acc.test, "evaluated");
                if acc.valid > best_val {
                    best_val = acc.valid;
                    final_test = acc.test;
                    model
                        .valid()
                        .save_file(artifact_dir.join(format!("model-run{run}")), &CompactRecorder::new())
                        .map_err(|e| Error::Checkpoint(e.to_string()))?;
                }
            }
        }

        let records: Vec<EpochRecord> = history
            .iter()
            .map(|s| EpochRecord {
                run,
                epoch: s.epoch,
                loss: s.loss,
                rate: s.rate,
                approx_acc: s.approx_acc,
            })
            .collect();
        if let Err(e) = plot_history(&artifact_dir.join(format!("history-run{run}.png")), &records) {
            warn!(run, error = %e, "could not draw training history");
        }
        info!(run, best_val, final_test, "run finished");
        Ok(RunResult {
            run,
            best_val,
            final_test,
            history,
        })
    }
}

/// Trains `config.runs` independent models and reports best-validation /
/// final-test accuracy as mean ± std. The config, per-epoch rates, the best
/// model of every run and the summary are written to `artifact_dir`.
pub fn run_experiment<B: AutodiffBackend>(
    artifact_dir: &Path,
    dataset: &NodeDataset,
    config: &TrainingConfig,
    device: B::Device,
) -> error::Result<ExperimentSummary> {
    fs::create_dir_all(artifact_dir)?;
    config.save(artifact_dir.join("config.json"))?;
    let log = RateLog::for_strategy(artifact_dir, config.strategy.name());
    if log.path().exists() {
        fs::remove_file(log.path())?;
    }

    let mut trainer = Trainer::<B>::new(config, dataset, device)?;
    info!(
        strategy = %config.strategy,
        nodes = dataset.num_nodes(),
        edges = trainer.csr().num_edges(),
        runs = config.runs,
        "starting experiment"
    );

    let mut runs = Vec::with_capacity(config.runs);
    for run in 0..config.runs {
        runs.push(trainer.run(run, artifact_dir, &log)?);
    }

    let vals: Vec<f64> = runs.iter().map(|r| r.best_val).collect();
    let tests: Vec<f64> = runs.iter().map(|r| r.final_test).collect();
    let (val_mean, val_std) = mean_std(&vals);
    let (test_mean, test_std) = mean_std(&tests);
    info!(
        "val: {:.2} ± {:.2}, test: {:.2} ± {:.2}",
        100.0 * val_mean,
        100.0 * val_std,
        100.0 * test_mean,
        100.0 * test_std
    );
    let summary = ExperimentSummary {
        strategy: config.strategy,
        runs,
        val_mean,
        val_std,
        test_mean,
        test_std,
    };
    fs::write(artifact_dir.join("summary.json"), serde_json::to_string_pretty(&summary)?)?;
    Ok(summary)
}
