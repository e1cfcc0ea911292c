use anyhow::{Context, Result, anyhow};
use burn::{config::Config, tensor::backend::Backend};
use clap::{Parser, Subcommand, ValueEnum};
use sage_contrast::{
    contrastive::ContrastiveObjective,
    data::{NodeDataset, SyntheticConfig},
    training::{Strategy, TrainingConfig, run_experiment},
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(not(feature = "cuda"))]
type TrainBackend = burn_autodiff::Autodiff<burn_ndarray::NdArray>;
#[cfg(feature = "cuda")]
type TrainBackend = burn_autodiff::Autodiff<burn_cuda::Cuda>;

#[derive(Parser)]
#[command(name = "sage-contrast")]
#[command(about = "Contrastive GraphSAGE training on large graphs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train and evaluate a model with one batching strategy
    Train(TrainArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Cluster,
    Neighbor,
    Saint,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Cluster => Strategy::Cluster,
            StrategyArg::Neighbor => Strategy::Neighbor,
            StrategyArg::Saint => Strategy::Saint,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ObjectiveArg {
    Jsd,
    Temperature,
}

#[derive(clap::Args)]
struct TrainArgs {
    /// Batching strategy
    #[arg(value_enum)]
    strategy: StrategyArg,

    /// OGB node-property dataset directory (containing raw/ and split/)
    #[arg(long, required_unless_present = "synthetic")]
    data_root: Option<PathBuf>,

    /// Split directory name under split/
    #[arg(long, default_value = "sales_ranking")]
    split: String,

    /// Train on a generated planted-partition graph instead
    #[arg(long)]
    synthetic: bool,

    /// Output directory for config, rates, plots and models
    #[arg(short, long, default_value = "artifacts")]
    artifact_dir: PathBuf,

    /// JSON training config; strategy defaults otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    runs: Option<usize>,

    #[arg(long)]
    lr: Option<f64>,

    /// Initial augmentation rate
    #[arg(long)]
    rate: Option<f64>,

    /// Weight of the contrastive loss
    #[arg(long)]
    par: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,

    /// Supervised-only epochs before contrast starts
    #[arg(long)]
    warmup_epochs: Option<usize>,

    #[arg(long)]
    eval_start: Option<usize>,

    #[arg(long, value_enum)]
    objective: Option<ObjectiveArg>,

    /// Temperature of the temperature objective
    #[arg(long, default_value = "0.4")]
    tau: f64,
}

impl TrainArgs {
    fn training_config(&self) -> Result<TrainingConfig> {
        let strategy = Strategy::from(self.strategy);
        let mut config = match &self.config {
            Some(path) => TrainingConfig::load(path)
                .map_err(|e| anyhow!("{e}"))
                .with_context(|| format!("could not load config {}", path.display()))?,
            None => TrainingConfig::for_strategy(strategy),
        };
        config.strategy = strategy;
        if let Some(v) = self.epochs {
            config.epochs = v;
        }
        if let Some(v) = self.runs {
            config.runs = v;
        }
        if let Some(v) = self.lr {
            config.lr = v;
        }
        if let Some(v) = self.rate {
            config.rate = v;
        }
        if let Some(v) = self.par {
            config.par = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = self.warmup_epochs {
            config.warmup_epochs = v;
        }
        if let Some(v) = self.eval_start {
            config.eval_start = v;
        }
        match self.objective {
            Some(ObjectiveArg::Jsd) => config.objective = ContrastiveObjective::Jsd,
            Some(ObjectiveArg::Temperature) => config.objective = ContrastiveObjective::Temperature { tau: self.tau },
            None => {}
        }
        config.validate()?;
        Ok(config)
    }

    fn dataset(&self) -> Result<NodeDataset> {
        match (&self.data_root, self.synthetic) {
            (_, true) => Ok(NodeDataset::synthetic(&SyntheticConfig::new())?),
            (Some(root), false) => NodeDataset::load_ogb(root, &self.split)
                .with_context(|| format!("could not load dataset from {}", root.display())),
            (None, false) => Err(anyhow!("either --data-root or --synthetic is required")),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Train(args) => {
            let config = args.training_config()?;
            let dataset = args.dataset()?;
            info!(
                nodes = dataset.num_nodes(),
                edges = dataset.graph.num_edges,
                features = dataset.num_features,
                classes = dataset.num_classes,
                "dataset ready"
            );
            let device = <TrainBackend as Backend>::Device::default();
            let summary = run_experiment::<TrainBackend>(&args.artifact_dir, &dataset, &config, device)
                .context("training failed")?;
            println!(
                "{} val: {:.2} ± {:.2}, test: {:.2} ± {:.2}",
                summary.strategy,
                100.0 * summary.val_mean,
                100.0 * summary.val_std,
                100.0 * summary.test_mean,
                100.0 * summary.test_std
            );
        }
    }
    Ok(())
}
