use crate::{
    data::NodeDataset,
    error::{self, Error},
    graph::Csr,
    model::Sage,
};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

/// Accuracy on the train / validation / test splits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitAccuracy {
    pub train: f64,
    pub valid: f64,
    pub test: f64,
}

/// OGB-style node classification evaluator.
#[derive(Clone, Copy, Debug, Default)]
pub struct Evaluator;

impl Evaluator {
    /// Fraction of `idx` whose prediction equals the label. Empty sets score 0.
    pub fn accuracy(&self, y_true: &[u32], y_pred: &[u32], idx: &[usize]) -> f64 {
        if idx.is_empty() {
            return 0.0;
        }
        let correct = idx.iter().filter(|&&i| y_true[i] == y_pred[i]).count();
        correct as f64 / idx.len() as f64
    }
}

/// Arg-max class of every node from full-graph inference.
pub fn predict<B: Backend>(
    model: &Sage<B>,
    dataset: &NodeDataset,
    csr: &Csr,
    chunk: usize,
    device: &B::Device,
) -> error::Result<Vec<u32>> {
    let logits = model.inference(&dataset.features, dataset.num_features, csr, chunk, device)?;
    let classes = logits
        .argmax(1)
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| Error::Tensor(format!("{e:?}")))?;
    Ok(classes.into_iter().map(|c| c as u32).collect())
}

pub fn evaluate_splits<B: Backend>(
    model: &Sage<B>,
    dataset: &NodeDataset,
    csr: &Csr,
    chunk: usize,
    device: &B::Device,
) -> error::Result<SplitAccuracy> {
    let y_pred = predict(model, dataset, csr, chunk, device)?;
    let evaluator = Evaluator;
    Ok(SplitAccuracy {
        train: evaluator.accuracy(&dataset.labels, &y_pred, &dataset.split.train),
        valid: evaluator.accuracy(&dataset.labels, &y_pred, &dataset.split.valid),
        test: evaluator.accuracy(&dataset.labels, &y_pred, &dataset.split.test),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data::SyntheticConfig, model::SageConfig};
    use burn_ndarray::{NdArray, NdArrayDevice};

    #[test]
    fn accuracy_over_index_set() {
        let y_true = [0, 1, 2, 1];
        let y_pred = [0, 2, 2, 0];
        assert_eq!(Evaluator.accuracy(&y_true, &y_pred, &[0, 1, 2]), 2.0 / 3.0);
        assert_eq!(Evaluator.accuracy(&y_true, &y_pred, &[3]), 0.0);
        assert_eq!(Evaluator.accuracy(&y_true, &y_pred, &[]), 0.0);
    }

    #[test]
    fn predictions_cover_every_node() {
        let device = NdArrayDevice::Cpu;
        let config = SyntheticConfig::new()
            .with_num_nodes(30)
            .with_num_classes(3)
            .with_num_features(4)
            .with_seed(5);
        let dataset = NodeDataset::synthetic(&config).unwrap();
        let csr = Csr::from_coo(&dataset.graph);
        let model: Sage<NdArray> = SageConfig::new(4, 8, 3).with_dropout(0.0).init(&device);

        let y_pred = predict(&model, &dataset, &csr, 7, &device).unwrap();
        assert_eq!(y_pred.len(), 30);
        assert!(y_pred.iter().all(|&c| c < 3));

        let acc = evaluate_splits(&model, &dataset, &csr, 7, &device).unwrap();
        let expected = Evaluator.accuracy(&dataset.labels, &y_pred, &dataset.split.test);
        assert_eq!(acc.test, expected);
        for a in [acc.train, acc.valid, acc.test] {
            assert!((0.0..=1.0).contains(&a));
        }
    }
}
