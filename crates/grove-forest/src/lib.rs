//! Random decision trees: batch ensembles, multi-label chain ensembles and
//! online quantile trees.
//!
//! Trees pick their splits at random and keep class or label statistics in
//! leaf collectors. Predictions route a record to the leaves, splitting its
//! weight evenly wherever a value is missing, and fall back to neighbouring
//! subtrees when a leaf has seen no data.

mod builder;
mod chain;
mod collector;
mod config;
mod ensemble;
mod error;
mod node;
mod online;
mod powerset;
mod quantile;
mod serialize;
mod splitter;
mod tree;

pub use builder::{SplitStrategy, TreeConfig};
pub use chain::{ChainEnsemble, ChainType, PredictType, PredictionMode};
pub use collector::{
    ClassCounts, Collector, CollectorSchema, CollectorSpec, Combination, LabelCounts, PowersetCounts,
};
pub use config::{ChainConfig, EnsembleConfig, QuantileConfig};
pub use ensemble::{Ensemble, TrainingMode};
pub use error::ForestError;
pub use node::{Node, NodeIndex};
pub use online::{Level, QuantileEnsemble, QuantileTree};
pub use powerset::LabelCombination;
pub use quantile::QuantileSplitter;
pub use serialize::{FORMAT_VERSION, SavedModel};
pub use splitter::Splitter;
pub use tree::Tree;
