//! Configuration builders for batch, chain and online ensembles.

use grove_data::{AttributeId, Dataset, Schema};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{info, instrument};

use crate::ForestError;
use crate::builder::{SplitStrategy, TreeBuilder, TreeConfig, target_attributes, validate_training_input};
use crate::chain::{ChainEnsemble, ChainSettings, ChainType, PredictType, PredictionMode};
use crate::collector::CollectorSchema;
use crate::ensemble::{Ensemble, TrainingMode, grow_trees};
use crate::online::{OnlineSettings, QuantileEnsemble, QuantileTree, plan_levels};

/// Configuration for a batch ensemble of random trees.
///
/// Construct via [`EnsembleConfig::new`], then chain `with_*` methods.
///
/// # Defaults
///
/// | Parameter        | Default      |
/// |------------------|--------------|
/// | `max_depth`      | 10           |
/// | `min_split_size` | 2            |
/// | `split_strategy` | `Random`     |
/// | `seed`           | 42           |
/// | `training_mode`  | `Sequential` |
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleConfig {
    pub(crate) n_trees: usize,
    pub(crate) max_depth: usize,
    pub(crate) min_split_size: usize,
    pub(crate) split_strategy: SplitStrategy,
    pub(crate) seed: u64,
    pub(crate) training_mode: TrainingMode,
}

impl EnsembleConfig {
    /// Create a new config with the given number of trees.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidTreeCount`] if `n_trees` is zero.
    pub fn new(n_trees: usize) -> Result<Self, ForestError> {
        if n_trees == 0 {
            return Err(ForestError::InvalidTreeCount { n_trees });
        }
        Ok(Self {
            n_trees,
            max_depth: 10,
            min_split_size: 2,
            split_strategy: SplitStrategy::Random,
            seed: 42,
            training_mode: TrainingMode::Sequential,
        })
    }

    // --- Setters ---

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    #[must_use]
    pub fn with_min_split_size(mut self, min_split_size: usize) -> Self {
        self.min_split_size = min_split_size;
        self
    }

    #[must_use]
    pub fn with_split_strategy(mut self, split_strategy: SplitStrategy) -> Self {
        self.split_strategy = split_strategy;
        self
    }

    /// Set the random seed for reproducibility.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn with_training_mode(mut self, training_mode: TrainingMode) -> Self {
        self.training_mode = training_mode;
        self
    }

    // --- Getters ---

    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.n_trees
    }

    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    #[must_use]
    pub fn min_split_size(&self) -> usize {
        self.min_split_size
    }

    #[must_use]
    pub fn split_strategy(&self) -> SplitStrategy {
        self.split_strategy
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    #[must_use]
    pub fn training_mode(&self) -> TrainingMode {
        self.training_mode
    }

    fn tree_config(&self) -> TreeConfig {
        TreeConfig::new()
            .with_max_depth(self.max_depth)
            .with_min_split_size(self.min_split_size)
            .with_split_strategy(self.split_strategy)
            .with_seed(self.seed)
    }

    /// Train an ensemble; every tree sees the full dataset.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---|---|
    /// | [`ForestError::EmptyDataset`] | `dataset` has no records |
    /// | [`ForestError::AttributeOutOfRange`] | a collector targets an unknown attribute |
    /// | [`ForestError::InvalidTarget`] | a collector target has the wrong kind |
    /// | [`ForestError::UnsupportedCollector`] | a label collector has no labels |
    #[instrument(skip_all, fields(n_trees = self.n_trees, n_records = dataset.len()))]
    pub fn fit(&self, dataset: &Dataset, collectors: &CollectorSchema) -> Result<Ensemble, ForestError> {
        validate_training_input(dataset, collectors)?;
        info!(mode = ?self.training_mode, "training ensemble");

        let tree_config = self.tree_config();
        let builder = TreeBuilder::new(dataset, collectors, &tree_config);
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let trees = grow_trees(self.n_trees, self.training_mode, &mut rng, |r| builder.build(r));

        let schema = dataset.schema().clone();
        let targets = target_attributes(&schema, collectors);
        info!(
            n_nodes = trees.iter().map(|t| t.n_nodes()).sum::<usize>(),
            "ensemble trained"
        );
        Ok(Ensemble {
            trees,
            schema,
            collectors: collectors.clone(),
            targets,
        })
    }
}

/// Configuration for a multi-label chain ensemble.
///
/// Construct via [`ChainConfig::new`], then chain `with_*` methods.
///
/// # Defaults
///
/// | Parameter               | Default      |
/// |-------------------------|--------------|
/// | `max_depth`             | 10           |
/// | `min_split_size`        | 2            |
/// | `split_strategy`        | `Random`     |
/// | `seed`                  | 42           |
/// | `training_mode`         | `Sequential` |
/// | `label_fraction`        | 0.1          |
/// | `active_label_fraction` | 1.0          |
/// | `chain_type`            | `Hybrid`     |
/// | `predict_type`          | `Percentage` |
/// | `prediction_mode`       | `Chain`      |
/// | `max_chain_rounds`      | unbounded    |
/// | `chain_order`           | identity     |
#[derive(Debug, Clone, PartialEq)]
pub struct ChainConfig {
    pub(crate) ensemble: EnsembleConfig,
    pub(crate) label_fraction: f64,
    pub(crate) active_label_fraction: f64,
    pub(crate) chain_type: ChainType,
    pub(crate) predict_type: PredictType,
    pub(crate) prediction_mode: PredictionMode,
    pub(crate) max_chain_rounds: usize,
    pub(crate) chain_order: Option<Vec<usize>>,
}

impl ChainConfig {
    /// Create a new config with the given number of trees.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidTreeCount`] if `n_trees` is zero.
    pub fn new(n_trees: usize) -> Result<Self, ForestError> {
        Ok(Self {
            ensemble: EnsembleConfig::new(n_trees)?,
            label_fraction: 0.1,
            active_label_fraction: 1.0,
            chain_type: ChainType::Hybrid,
            predict_type: PredictType::Percentage,
            prediction_mode: PredictionMode::Chain,
            max_chain_rounds: usize::MAX,
            chain_order: None,
        })
    }

    // --- Setters ---

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.ensemble.max_depth = max_depth;
        self
    }

    #[must_use]
    pub fn with_min_split_size(mut self, min_split_size: usize) -> Self {
        self.ensemble.min_split_size = min_split_size;
        self
    }

    #[must_use]
    pub fn with_split_strategy(mut self, split_strategy: SplitStrategy) -> Self {
        self.ensemble.split_strategy = split_strategy;
        self
    }

    /// Set the random seed for reproducibility.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.ensemble.seed = seed;
        self
    }

    #[must_use]
    pub fn with_training_mode(mut self, training_mode: TrainingMode) -> Self {
        self.ensemble.training_mode = training_mode;
        self
    }

    /// Probability that a node tries a label splitter before a feature splitter.
    #[must_use]
    pub fn with_label_fraction(mut self, label_fraction: f64) -> Self {
        self.label_fraction = label_fraction;
        self
    }

    /// Share of label splitters left active after training.
    #[must_use]
    pub fn with_active_label_fraction(mut self, active_label_fraction: f64) -> Self {
        self.active_label_fraction = active_label_fraction;
        self
    }

    #[must_use]
    pub fn with_chain_type(mut self, chain_type: ChainType) -> Self {
        self.chain_type = chain_type;
        self
    }

    #[must_use]
    pub fn with_predict_type(mut self, predict_type: PredictType) -> Self {
        self.predict_type = predict_type;
        self
    }

    #[must_use]
    pub fn with_prediction_mode(mut self, prediction_mode: PredictionMode) -> Self {
        self.prediction_mode = prediction_mode;
        self
    }

    /// Stop resolving labels one by one after this many rounds.
    #[must_use]
    pub fn with_max_chain_rounds(mut self, max_chain_rounds: usize) -> Self {
        self.max_chain_rounds = max_chain_rounds;
        self
    }

    /// Label positions in the order [`ChainType::GivenChain`] fixes them.
    #[must_use]
    pub fn with_chain_order(mut self, chain_order: Vec<usize>) -> Self {
        self.chain_order = Some(chain_order);
        self
    }

    // --- Getters ---

    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.ensemble.n_trees
    }

    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.ensemble.max_depth
    }

    #[must_use]
    pub fn min_split_size(&self) -> usize {
        self.ensemble.min_split_size
    }

    #[must_use]
    pub fn split_strategy(&self) -> SplitStrategy {
        self.ensemble.split_strategy
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.ensemble.seed
    }

    #[must_use]
    pub fn training_mode(&self) -> TrainingMode {
        self.ensemble.training_mode
    }

    #[must_use]
    pub fn label_fraction(&self) -> f64 {
        self.label_fraction
    }

    #[must_use]
    pub fn active_label_fraction(&self) -> f64 {
        self.active_label_fraction
    }

    #[must_use]
    pub fn chain_type(&self) -> ChainType {
        self.chain_type
    }

    #[must_use]
    pub fn predict_type(&self) -> PredictType {
        self.predict_type
    }

    #[must_use]
    pub fn prediction_mode(&self) -> PredictionMode {
        self.prediction_mode
    }

    #[must_use]
    pub fn max_chain_rounds(&self) -> usize {
        self.max_chain_rounds
    }

    #[must_use]
    pub fn chain_order(&self) -> Option<&[usize]> {
        self.chain_order.as_deref()
    }

    /// Train a chain ensemble with one collector per label group.
    ///
    /// The collector kind of every group follows the predict type.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---|---|
    /// | [`ForestError::InvalidFraction`] | a fraction is outside [0, 1] |
    /// | [`ForestError::NoCollectors`] | `groups` is empty |
    /// | [`ForestError::InvalidChainOrder`] | the chain order is not a permutation of the label positions |
    /// | [`ForestError::EmptyDataset`] | `dataset` has no records |
    /// | [`ForestError::AttributeOutOfRange`] | a label is not in the schema |
    /// | [`ForestError::InvalidTarget`] | a label is not binary nominal |
    /// | [`ForestError::UnsupportedCollector`] | a group has no labels |
    #[instrument(skip_all, fields(n_trees = self.ensemble.n_trees, n_records = dataset.len()))]
    pub fn fit(&self, dataset: &Dataset, groups: &[Vec<AttributeId>]) -> Result<ChainEnsemble, ForestError> {
        check_fraction("label_fraction", self.label_fraction)?;
        check_fraction("active_label_fraction", self.active_label_fraction)?;
        let collectors = CollectorSchema::new(
            groups
                .iter()
                .map(|labels| self.predict_type.collector_spec(labels.clone()))
                .collect(),
        )?;
        let most_labels = groups.iter().map(Vec::len).max().unwrap_or(0);
        let order = self.resolve_order(most_labels)?;
        validate_training_input(dataset, &collectors)?;
        info!(
            chain_type = ?self.chain_type,
            predict_type = ?self.predict_type,
            "training chain ensemble"
        );

        let tree_config = self.ensemble.tree_config();
        let builder = TreeBuilder::new(dataset, &collectors, &tree_config).with_label_splits(self.label_fraction);
        let mut rng = ChaCha8Rng::seed_from_u64(self.ensemble.seed);
        let trees = grow_trees(self.ensemble.n_trees, self.ensemble.training_mode, &mut rng, |r| {
            builder.build(r)
        });

        let schema = dataset.schema().clone();
        let targets = target_attributes(&schema, &collectors);
        let settings = ChainSettings {
            chain_type: self.chain_type,
            predict_type: self.predict_type,
            mode: self.prediction_mode,
            max_chain_rounds: self.max_chain_rounds,
            order,
            active_label_fraction: self.active_label_fraction,
        };
        let ensemble = ChainEnsemble::assemble(trees, schema, collectors, targets, settings, &mut rng);
        info!(
            n_label_splitters = ensemble.n_label_splitters(),
            n_active = ensemble.n_active_label_splitters(),
            "chain ensemble trained"
        );
        Ok(ensemble)
    }

    /// The configured order, or the identity over `0..n_labels`.
    fn resolve_order(&self, n_labels: usize) -> Result<Vec<usize>, ForestError> {
        let Some(order) = &self.chain_order else {
            return Ok((0..n_labels).collect());
        };
        let mut sorted = order.clone();
        sorted.sort_unstable();
        if !sorted.iter().copied().eq(0..n_labels) {
            return Err(ForestError::InvalidChainOrder {
                order: order.clone(),
                n_labels,
            });
        }
        Ok(order.clone())
    }
}

/// Configuration for an ensemble of online quantile trees.
///
/// Construct via [`QuantileConfig::new`], then chain `with_*` methods.
///
/// # Defaults
///
/// | Parameter         | Default      |
/// |-------------------|--------------|
/// | `max_depth`       | 10           |
/// | `max_values`      | 10           |
/// | `concept_drift`   | `false`      |
/// | `interpolate`     | `false`      |
/// | `random_quantile` | `false`      |
/// | `seed`            | 42           |
/// | `training_mode`   | `Sequential` |
#[derive(Debug, Clone, PartialEq)]
pub struct QuantileConfig {
    pub(crate) n_trees: usize,
    pub(crate) max_depth: usize,
    pub(crate) max_values: usize,
    pub(crate) concept_drift: bool,
    pub(crate) interpolate: bool,
    pub(crate) random_quantile: bool,
    pub(crate) seed: u64,
    pub(crate) training_mode: TrainingMode,
}

impl QuantileConfig {
    /// Create a new config with the given number of trees.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidTreeCount`] if `n_trees` is zero.
    pub fn new(n_trees: usize) -> Result<Self, ForestError> {
        if n_trees == 0 {
            return Err(ForestError::InvalidTreeCount { n_trees });
        }
        Ok(Self {
            n_trees,
            max_depth: 10,
            max_values: 10,
            concept_drift: false,
            interpolate: false,
            random_quantile: false,
            seed: 42,
            training_mode: TrainingMode::Sequential,
        })
    }

    // --- Setters ---

    /// Number of levels; online trees never grow deeper.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Bound on the sample each quantile splitter keeps.
    #[must_use]
    pub fn with_max_values(mut self, max_values: usize) -> Self {
        self.max_values = max_values;
        self
    }

    #[must_use]
    pub fn with_concept_drift(mut self, concept_drift: bool) -> Self {
        self.concept_drift = concept_drift;
        self
    }

    #[must_use]
    pub fn with_interpolation(mut self, interpolate: bool) -> Self {
        self.interpolate = interpolate;
        self
    }

    /// Draw each level's quantile from U[0, 1) instead of using the median.
    #[must_use]
    pub fn with_random_quantile(mut self, random_quantile: bool) -> Self {
        self.random_quantile = random_quantile;
        self
    }

    /// Set the random seed for reproducibility.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Parallel mode updates trees concurrently in [`QuantileConfig::fit`].
    #[must_use]
    pub fn with_training_mode(mut self, training_mode: TrainingMode) -> Self {
        self.training_mode = training_mode;
        self
    }

    // --- Getters ---

    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.n_trees
    }

    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    #[must_use]
    pub fn max_values(&self) -> usize {
        self.max_values
    }

    #[must_use]
    pub fn concept_drift(&self) -> bool {
        self.concept_drift
    }

    #[must_use]
    pub fn interpolate(&self) -> bool {
        self.interpolate
    }

    #[must_use]
    pub fn random_quantile(&self) -> bool {
        self.random_quantile
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    #[must_use]
    pub fn training_mode(&self) -> TrainingMode {
        self.training_mode
    }

    /// Plan the levels of every tree; the trees start as empty leaves.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---|---|
    /// | [`ForestError::InvalidMaxValues`] | `max_values` is zero |
    /// | [`ForestError::AttributeOutOfRange`] | a collector targets an unknown attribute |
    /// | [`ForestError::InvalidTarget`] | a collector target has the wrong kind |
    /// | [`ForestError::UnsupportedCollector`] | a label collector has no labels |
    #[instrument(skip_all, fields(n_trees = self.n_trees))]
    pub fn build(&self, schema: &Schema, collectors: &CollectorSchema) -> Result<QuantileEnsemble, ForestError> {
        if self.max_values == 0 {
            return Err(ForestError::InvalidMaxValues {
                max_values: self.max_values,
            });
        }
        collectors.validate(schema)?;
        let targets = target_attributes(schema, collectors);
        let settings = OnlineSettings {
            max_values: self.max_values,
            concept_drift: self.concept_drift,
            interpolate: self.interpolate,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let trees = (0..self.n_trees)
            .map(|_| {
                let plan = plan_levels(schema, &targets, self.max_depth, self.random_quantile, &mut rng);
                let tree_rng = ChaCha8Rng::seed_from_u64(rng.r#gen());
                QuantileTree::new(plan, settings, collectors.clone(), tree_rng)
            })
            .collect();
        Ok(QuantileEnsemble {
            trees,
            schema: schema.clone(),
            collectors: collectors.clone(),
            targets,
        })
    }

    /// Build, then feed every record of `dataset` to every tree.
    ///
    /// # Errors
    ///
    /// [`ForestError::EmptyDataset`] if `dataset` has no records, and
    /// every error of [`QuantileConfig::build`].
    #[instrument(skip_all, fields(n_trees = self.n_trees, n_records = dataset.len()))]
    pub fn fit(&self, dataset: &Dataset, collectors: &CollectorSchema) -> Result<QuantileEnsemble, ForestError> {
        if dataset.is_empty() {
            return Err(ForestError::EmptyDataset);
        }
        let mut ensemble = self.build(dataset.schema(), collectors)?;
        info!(mode = ?self.training_mode, "training online ensemble");
        ensemble.train(dataset.records(), self.training_mode);
        info!(
            n_nodes = ensemble.trees().iter().map(|t| t.tree().n_nodes()).sum::<usize>(),
            "online ensemble trained"
        );
        Ok(ensemble)
    }
}

fn check_fraction(name: &'static str, value: f64) -> Result<(), ForestError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ForestError::InvalidFraction { name, value })
    }
}
