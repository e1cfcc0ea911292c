//! GraphSAGE node classification with node-vs-neighbourhood contrast between a
//! clean and an augmented view of every batch. The augmentation rate adapts
//! to the training loss while the model trains.
//!
//! Three batching strategies share the model and the losses: graph partitions
//! ([`sampler::cluster`]), layer-wise neighbour sampling ([`sampler::neighbor`])
//! and random-walk subgraphs ([`sampler::saint`]).

pub mod augment;
pub mod contrastive;
pub mod data;
pub mod error;
pub mod evaluate;
pub mod graph;
pub mod model;
pub mod report;
pub mod sampler;
pub mod training;

pub use error::{Error, Result};
