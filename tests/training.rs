use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use sage_contrast::{
    contrastive::ContrastiveObjective,
    data::{NodeDataset, SyntheticConfig},
    report::RateLog,
    sampler::neighbor::Fanout,
    training::{
        ClusterConfig, ExperimentSummary, NeighborConfig, SaintConfig, Strategy, TrainingConfig, run_experiment,
    },
};

type TestBackend = Autodiff<NdArray>;

fn dataset() -> NodeDataset {
    NodeDataset::synthetic(&SyntheticConfig::new().with_num_nodes(240).with_seed(7)).unwrap()
}

fn small(strategy: Strategy) -> TrainingConfig {
    TrainingConfig::for_strategy(strategy)
        .with_epochs(2)
        .with_runs(1)
        .with_hidden_channels(16)
        .with_eval_start(0)
        .with_test_freq(1)
        .with_inference_chunk(64)
        .with_cluster(ClusterConfig::new().with_num_partitions(12).with_batch_size(3))
        .with_saint(
            SaintConfig::new()
                .with_batch_size(30)
                .with_walk_length(2)
                .with_num_steps(3)
                .with_top_k(16),
        )
}

fn check(strategy: Strategy, config: TrainingConfig) -> ExperimentSummary {
    let dir = tempfile::tempdir().unwrap();
    let summary = run_experiment::<TestBackend>(dir.path(), &dataset(), &config, NdArrayDevice::Cpu).unwrap();

    assert_eq!(summary.strategy, strategy);
    assert_eq!(summary.runs.len(), config.runs);
    for run in &summary.runs {
        assert_eq!(run.history.len(), config.epochs);
        for stats in &run.history {
            assert!(stats.loss.is_finite(), "{strategy}: loss {}", stats.loss);
            assert!((config.rate_min..=config.rate_max).contains(&stats.rate));
        }
        assert!((0.0..=1.0).contains(&run.best_val));
        assert!((0.0..=1.0).contains(&run.final_test));
    }
    assert!((0.0..=1.0).contains(&summary.val_mean));

    let log = RateLog::for_strategy(dir.path(), strategy.name());
    assert_eq!(log.read().unwrap().len(), config.runs * config.epochs);
    assert!(dir.path().join("config.json").exists());
    assert!(dir.path().join("summary.json").exists());
    summary
}

#[test]
fn cluster_training_runs() {
    let config = small(Strategy::Cluster);
    let summary = check(Strategy::Cluster, config.clone());
    assert_ne!(summary.runs[0].history[0].rate, config.rate);
}

#[test]
fn cluster_training_with_warmup() {
    let config = small(Strategy::Cluster).with_warmup_epochs(1);
    let summary = check(Strategy::Cluster, config.clone());
    let history = &summary.runs[0].history;
    assert_eq!(history[0].rate, config.rate);
    assert_ne!(history[1].rate, config.rate);
}

#[test]
fn neighbor_training_reports_approx_accuracy() {
    let config = small(Strategy::Neighbor).with_num_layers(2).with_neighbor(
        NeighborConfig::new()
            .with_sizes(vec![Fanout::Sample(5), Fanout::All])
            .with_batch_size(32)
            .with_num_workers(0),
    );
    check(Strategy::Neighbor, config.clone());

    let dir = tempfile::tempdir().unwrap();
    let summary = run_experiment::<TestBackend>(dir.path(), &dataset(), &config, NdArrayDevice::Cpu).unwrap();
    for stats in &summary.runs[0].history {
        let acc = stats.approx_acc.unwrap();
        assert!((0.0..=1.0).contains(&acc));
    }
}

#[test]
fn saint_training_with_temperature_objective() {
    let config = small(Strategy::Saint).with_objective(ContrastiveObjective::Temperature { tau: 0.4 });
    let summary = check(Strategy::Saint, config.clone());
    assert_ne!(summary.runs[0].history[0].rate, config.rate);
}

#[test]
fn two_runs_restart_the_rate() {
    let config = small(Strategy::Saint).with_runs(2);
    let dir = tempfile::tempdir().unwrap();
    let summary = run_experiment::<TestBackend>(dir.path(), &dataset(), &config, NdArrayDevice::Cpu).unwrap();
    assert_eq!(summary.runs.len(), 2);
    // Each run starts again from the configured rate, not the previous end.
    let first = summary.runs[0].history[0].rate;
    let second = summary.runs[1].history[0].rate;
    assert!((first - config.rate).abs() <= config.limit * 3.0 + 1e-12);
    assert!((second - config.rate).abs() <= config.limit * 3.0 + 1e-12);
    assert_ne!(first, config.rate);
    assert_ne!(second, config.rate);
}

#[cfg(feature = "cuda")]
#[test]
#[ignore = "requires a CUDA device"]
fn cluster_training_on_cuda() {
    type CudaBackend = Autodiff<burn_cuda::Cuda>;
    let dir = tempfile::tempdir().unwrap();
    let config = small(Strategy::Cluster);
    let summary =
        run_experiment::<CudaBackend>(dir.path(), &dataset(), &config, burn_cuda::CudaDevice::default()).unwrap();
    assert_eq!(summary.runs[0].history.len(), config.epochs);
}
