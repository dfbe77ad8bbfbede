use std::path::PathBuf;

use grove_data::DataError;

/// Errors from tree construction, prediction, merging and persistence.
#[derive(Debug, thiserror::Error)]
pub enum ForestError {
    /// Returned when n_trees is zero.
    #[error("n_trees must be at least 1, got {n_trees}")]
    InvalidTreeCount {
        /// The invalid n_trees value provided.
        n_trees: usize,
    },

    /// Returned when a quantile lies outside [0, 1].
    #[error("quantile must be in [0.0, 1.0], got {quantile}")]
    InvalidQuantile {
        /// The invalid quantile.
        quantile: f64,
    },

    /// Returned when a fraction parameter lies outside [0, 1].
    #[error("{name} must be in [0.0, 1.0], got {value}")]
    InvalidFraction {
        /// Name of the parameter.
        name: &'static str,
        /// The invalid value.
        value: f64,
    },

    /// Returned when the quantile sample bound is zero.
    #[error("max_values must be at least 1, got {max_values}")]
    InvalidMaxValues {
        /// The invalid bound.
        max_values: usize,
    },

    /// Returned when an attribute id is outside the schema.
    #[error("attribute {attribute} is out of range for a schema of {n_attributes} attributes")]
    AttributeOutOfRange {
        /// The offending attribute index.
        attribute: usize,
        /// Number of attributes in the schema.
        n_attributes: usize,
    },

    /// Returned when a collector targets an attribute it cannot predict.
    #[error("collector cannot predict attribute {attribute}: {reason}")]
    InvalidTarget {
        /// The offending attribute index.
        attribute: usize,
        /// Why the attribute is unsuitable.
        reason: String,
    },

    /// Returned when a learning task defines no collectors.
    #[error("at least one collector is required")]
    NoCollectors,

    /// Returned when a GIVEN_CHAIN order is not a permutation of the label positions.
    #[error("chain order {order:?} is not a permutation of 0..{n_labels}")]
    InvalidChainOrder {
        /// The rejected order.
        order: Vec<usize>,
        /// Number of labels it must cover.
        n_labels: usize,
    },

    /// Returned when collectors of different kinds or targets are combined.
    #[error("cannot combine collectors: {reason}")]
    CollectorMismatch {
        /// What differed.
        reason: String,
    },

    /// Returned when splitters on different attributes, kinds or quantiles are merged.
    #[error("cannot merge splitters: {reason}")]
    IncompatibleSplitters {
        /// What differed.
        reason: String,
    },

    /// Returned when online trees or ensembles with different level plans are merged.
    #[error("cannot merge trees: {reason}")]
    IncompatibleTrees {
        /// What differed.
        reason: String,
    },

    /// Returned when a collector slot cannot be used for the requested task.
    #[error("collector slot {slot} is unusable: {reason}")]
    UnsupportedCollector {
        /// Position of the collector in the schema.
        slot: usize,
        /// Why the collector is unusable.
        reason: String,
    },

    /// Returned when the training dataset has zero records.
    #[error("training dataset has zero records")]
    EmptyDataset,

    /// Returned when a record does not match the schema the model was trained on.
    #[error("record has {got} values, expected {expected}")]
    RecordLengthMismatch {
        /// Number of attributes in the training schema.
        expected: usize,
        /// Number of values in the record.
        got: usize,
    },

    /// Returned when no leaf anywhere in the tree can predict a collector slot.
    #[error("no valid prediction for collector slot {slot}; was the model trained?")]
    NoValidPrediction {
        /// Position of the collector in the schema.
        slot: usize,
    },

    /// Returned when a prediction is requested from a collector that has seen no data.
    #[error("collector has seen no instances")]
    EmptyCollector,

    /// Returned when record or schema validation fails.
    #[error(transparent)]
    Data(#[from] DataError),

    /// Returned when model serialization fails.
    #[error("failed to serialize model")]
    SerializeModel {
        /// The underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when model deserialization fails.
    #[error("failed to deserialize model from {path}")]
    DeserializeModel {
        /// Path to the model file that could not be deserialized.
        path: PathBuf,
        /// The underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when writing the model file fails.
    #[error("failed to write model to {path}")]
    WriteModel {
        /// Path to the file that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when reading the model file fails.
    #[error("failed to read model from {path}")]
    ReadModel {
        /// Path to the file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when loading a model with an incompatible format version.
    #[error("incompatible model version in {path}: expected {expected}, found {found}")]
    IncompatibleModelVersion {
        /// The model format version this build expects.
        expected: u32,
        /// The model format version found in the file.
        found: u32,
        /// Path to the model file with the incompatible version.
        path: PathBuf,
    },

    /// Returned when a model file holds a different kind of ensemble than requested.
    #[error("model in {path} is a {found} ensemble, expected {expected}")]
    UnexpectedModelKind {
        /// Path to the model file.
        path: PathBuf,
        /// The kind the caller asked for.
        expected: &'static str,
        /// The kind stored in the file.
        found: &'static str,
    },
}
