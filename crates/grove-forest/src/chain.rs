//! Multi-label chain prediction: labels are fixed one per round and fed
//! back into the label splitters of later rounds.

use std::collections::{BTreeMap, BTreeSet};

use grove_data::{AttributeId, FeatureRecord, Schema};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing::debug;

use crate::ForestError;
use crate::collector::{Collector, CollectorSchema, CollectorSpec, Combination, combine_slots};
use crate::ensemble::check_record_length;
use crate::node::{Node, NodeIndex};
use crate::tree::Tree;

/// Order in which the labels of a group are fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum ChainType {
    /// Always the label with the lowest positive rate.
    Lowest,
    /// Always the label with the highest positive rate.
    Highest,
    /// Whichever of the highest and lowest rates is closer to 1 or 0.
    #[default]
    Hybrid,
    /// A fixed order of label positions.
    GivenChain,
}

/// Collector kind per label group, and the matching value-assignment rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum PredictType {
    /// Probability collectors; a label becomes 1 when its rate is at least 0.5.
    #[default]
    Percentage,
    /// Count collectors; positives are budgeted by the estimated label count.
    LabelCount,
    /// Powerset collectors; positive and negative candidates are compared by count.
    Powerset,
}

impl PredictType {
    /// Collector spec used for one label group.
    #[must_use]
    pub fn collector_spec(self, labels: Vec<AttributeId>) -> CollectorSpec {
        match self {
            PredictType::Percentage => CollectorSpec::ProbabilityMultilabel { labels },
            PredictType::LabelCount => CollectorSpec::Multilabel { labels },
            PredictType::Powerset => CollectorSpec::LabelPowerset { labels },
        }
    }
}

/// Whether a chain ensemble resolves labels jointly or one by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum PredictionMode {
    /// One ensemble prediction; label splitters fan out.
    Independent,
    /// Round-by-round resolution.
    #[default]
    Chain,
}

/// Prediction parameters of a [`ChainEnsemble`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub(crate) struct ChainSettings {
    pub(crate) chain_type: ChainType,
    pub(crate) predict_type: PredictType,
    pub(crate) mode: PredictionMode,
    pub(crate) max_chain_rounds: usize,
    /// Permutation of `0..longest group`; used by [`ChainType::GivenChain`].
    pub(crate) order: Vec<usize>,
    pub(crate) active_label_fraction: f64,
}

/// A fitted ensemble of chain trees.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChainEnsemble {
    pub(crate) trees: Vec<Tree>,
    pub(crate) schema: Schema,
    pub(crate) collectors: CollectorSchema,
    pub(crate) targets: Vec<AttributeId>,
    /// Every label splitter as `(tree, node)`, in shuffled order.
    pub(crate) label_splitters: Vec<(usize, NodeIndex)>,
    /// Trees whose active label splitters test each attribute.
    pub(crate) dependents: BTreeMap<AttributeId, Vec<usize>>,
    pub(crate) settings: ChainSettings,
}

impl ChainEnsemble {
    /// Shuffle the label splitters of `trees` and enable the configured share.
    pub(crate) fn assemble(
        trees: Vec<Tree>,
        schema: Schema,
        collectors: CollectorSchema,
        targets: Vec<AttributeId>,
        settings: ChainSettings,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let mut label_splitters: Vec<(usize, NodeIndex)> = trees
            .iter()
            .enumerate()
            .flat_map(|(t, tree)| tree.label_splitters().into_iter().map(move |n| (t, n)))
            .collect();
        label_splitters.shuffle(rng);

        let mut ensemble = Self {
            trees,
            schema,
            collectors,
            targets,
            label_splitters,
            dependents: BTreeMap::new(),
            settings,
        };
        ensemble.apply_active_fraction();
        ensemble
    }

    // --- Setters ---

    /// Enable the first `floor(n * fraction)` label splitters of the shuffled
    /// order and disable the rest.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidFraction`] if `fraction` is outside [0, 1].
    pub fn set_active_label_fraction(&mut self, fraction: f64) -> Result<(), ForestError> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(ForestError::InvalidFraction {
                name: "active_label_fraction",
                value: fraction,
            });
        }
        self.settings.active_label_fraction = fraction;
        self.apply_active_fraction();
        Ok(())
    }

    pub fn set_chain_type(&mut self, chain_type: ChainType) {
        self.settings.chain_type = chain_type;
    }

    pub fn set_prediction_mode(&mut self, mode: PredictionMode) {
        self.settings.mode = mode;
    }

    /// Round after which the remaining labels are taken from the plain
    /// ensemble prediction.
    pub fn set_max_chain_rounds(&mut self, max_chain_rounds: usize) {
        self.settings.max_chain_rounds = max_chain_rounds;
    }

    // --- Getters ---

    #[must_use]
    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub fn collector_schema(&self) -> &CollectorSchema {
        &self.collectors
    }

    #[must_use]
    pub fn targets(&self) -> &[AttributeId] {
        &self.targets
    }

    #[must_use]
    pub fn chain_type(&self) -> ChainType {
        self.settings.chain_type
    }

    #[must_use]
    pub fn predict_type(&self) -> PredictType {
        self.settings.predict_type
    }

    #[must_use]
    pub fn prediction_mode(&self) -> PredictionMode {
        self.settings.mode
    }

    #[must_use]
    pub fn max_chain_rounds(&self) -> usize {
        self.settings.max_chain_rounds
    }

    #[must_use]
    pub fn active_label_fraction(&self) -> f64 {
        self.settings.active_label_fraction
    }

    /// Number of label splitters across all trees.
    #[must_use]
    pub fn n_label_splitters(&self) -> usize {
        self.label_splitters.len()
    }

    /// Number of label splitters currently taking part in routing.
    #[must_use]
    pub fn n_active_label_splitters(&self) -> usize {
        self.trees
            .iter()
            .flat_map(|t| t.nodes().iter().filter_map(Node::splitter))
            .filter(|s| s.is_label() && s.is_active())
            .count()
    }

    fn apply_active_fraction(&mut self) {
        let n_active =
            (self.label_splitters.len() as f64 * self.settings.active_label_fraction) as usize;
        for (i, &(tree, node)) in self.label_splitters.iter().enumerate() {
            self.trees[tree].set_label_active(node, i < n_active);
        }
        let mut dependents: BTreeMap<AttributeId, Vec<usize>> = BTreeMap::new();
        for (t, tree) in self.trees.iter().enumerate() {
            for attribute in tree.label_dependencies() {
                dependents.entry(attribute).or_default().push(t);
            }
        }
        debug!(
            n_label_splitters = self.label_splitters.len(),
            n_active,
            "label splitters activated"
        );
        self.dependents = dependents;
    }

    // --- Prediction ---

    /// Predict every label group for one record.
    ///
    /// In [`PredictionMode::Chain`] the output collectors hold exactly one
    /// instance whose labels are the resolved values.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---|---|
    /// | [`ForestError::RecordLengthMismatch`] | `record` does not match the training schema |
    /// | [`ForestError::NoValidPrediction`] | a tree has no trained leaf for some slot |
    pub fn predict(&self, record: &FeatureRecord) -> Result<Vec<Collector>, ForestError> {
        check_record_length(&self.schema, record)?;
        let query = record.masked(&self.targets);
        match self.settings.mode {
            PredictionMode::Independent => {
                let outputs = self.predict_trees(&query)?;
                combine_slots(Combination::Merge, &outputs)
            }
            PredictionMode::Chain => self.predict_chain(query),
        }
    }

    /// Predict many records in parallel.
    ///
    /// # Errors
    ///
    /// Returns the first error from [`ChainEnsemble::predict`].
    pub fn predict_batch(
        &self,
        records: &[FeatureRecord],
    ) -> Result<Vec<Vec<Collector>>, ForestError> {
        records.par_iter().map(|r| self.predict(r)).collect()
    }

    /// Unresolved label splitters fan out and their children are added.
    fn predict_trees(&self, query: &FeatureRecord) -> Result<Vec<Vec<Collector>>, ForestError> {
        self.trees
            .iter()
            .map(|t| t.predict_with(query, Combination::Add))
            .collect()
    }

    fn predict_chain(&self, mut query: FeatureRecord) -> Result<Vec<Collector>, ForestError> {
        let specs = self.collectors.specs();
        let most_labels = specs.iter().map(|s| s.attributes().len()).max().unwrap_or(0);
        let cutoff = self.settings.max_chain_rounds;
        let mut positives = vec![0usize; specs.len()];
        let mut cached = self.predict_trees(&query)?;

        let mut round = 0;
        while round < most_labels && round <= cutoff {
            let combined = combine_slots(Combination::Merge, &cached)?;
            let mut fixed = BTreeSet::new();
            for (slot, collector) in combined.iter().enumerate() {
                let labels = collector.used_attributes();
                if round < labels.len()
                    && let Some((position, value)) =
                        self.next_step(slot, collector, &query, round, positives[slot])?
                {
                    query.set_value(labels[position], value);
                    fixed.insert(labels[position]);
                    if value == 1.0 {
                        positives[slot] += 1;
                    }
                }
                if round == cutoff && round + 1 < labels.len() {
                    let values = collector.prediction()?;
                    for (&label, &value) in labels.iter().zip(&values) {
                        if query.is_missing(label) {
                            query.set_value(label, value);
                        }
                    }
                }
            }
            round += 1;

            if round < most_labels && round <= cutoff {
                let stale: BTreeSet<usize> = fixed
                    .iter()
                    .filter_map(|a| self.dependents.get(a))
                    .flatten()
                    .copied()
                    .collect();
                for t in stale {
                    cached[t] = self.trees[t].predict_with(&query, Combination::Add)?;
                }
            }
        }

        Ok(specs
            .iter()
            .map(|spec| {
                let labels = spec.attributes().to_vec();
                let values: Vec<f64> = labels.iter().map(|&l| query.value(l).unwrap_or(0.0)).collect();
                Collector::from_assignment(labels, &values)
            })
            .collect())
    }

    /// Label position and value to fix next for one collector slot.
    fn next_step(
        &self,
        slot: usize,
        collector: &Collector,
        query: &FeatureRecord,
        resolved: usize,
        positives: usize,
    ) -> Result<Option<(usize, f64)>, ForestError> {
        let counts = collector
            .label_counts()
            .ok_or_else(|| ForestError::UnsupportedCollector {
                slot,
                reason: "chain prediction needs a label collector".into(),
            })?;
        let unresolved: Vec<bool> = collector
            .used_attributes()
            .iter()
            .map(|&l| query.is_missing(l))
            .collect();
        let n = collector.instance_count();

        if self.settings.predict_type == PredictType::Powerset {
            let predicted = collector.prediction()?;
            return Ok(next_powerset_assignment(counts, n, &predicted, &unresolved));
        }

        let order: Vec<usize> = self
            .settings
            .order
            .iter()
            .copied()
            .filter(|&p| p < counts.len())
            .collect();
        let state = LabelState {
            counts,
            n,
            unresolved: &unresolved,
            estimated_positives: collector.estimated_label_count().unwrap_or(0),
            resolved,
            positives,
        };
        Ok(next_assignment(
            self.settings.chain_type,
            self.settings.predict_type,
            &state,
            &order,
        ))
    }
}

/// Merged label statistics of one group at the start of a round.
#[derive(Debug)]
pub(crate) struct LabelState<'a> {
    /// Weighted positive count per label.
    pub(crate) counts: &'a [f64],
    /// Instance count of the merged collector.
    pub(crate) n: f64,
    /// Labels not yet fixed.
    pub(crate) unresolved: &'a [bool],
    /// `round(sum(counts) / n)`.
    pub(crate) estimated_positives: usize,
    /// Labels of this group fixed so far.
    pub(crate) resolved: usize,
    /// Labels of this group fixed to 1 so far.
    pub(crate) positives: usize,
}

impl LabelState<'_> {
    fn rate(&self, position: usize) -> f64 {
        if self.n > 0.0 { self.counts[position] / self.n } else { 0.0 }
    }
}

/// Next `(position, value)` for count and probability collectors.
///
/// Among unresolved labels the highest count wins ties by position (last),
/// the lowest by position (first).
pub(crate) fn next_assignment(
    chain_type: ChainType,
    predict_type: PredictType,
    state: &LabelState<'_>,
    order: &[usize],
) -> Option<(usize, f64)> {
    let mut highest: Option<usize> = None;
    let mut lowest: Option<usize> = None;
    for (i, &open) in state.unresolved.iter().enumerate() {
        if !open {
            continue;
        }
        if highest.is_none_or(|h| state.counts[i] >= state.counts[h]) {
            highest = Some(i);
        }
        if lowest.is_none_or(|l| state.counts[i] < state.counts[l]) {
            lowest = Some(i);
        }
    }
    let (high, low) = (highest?, lowest?);
    let threshold = |position: usize| if state.rate(position) >= 0.5 { 1.0 } else { 0.0 };
    let label_count = predict_type == PredictType::LabelCount;
    let remaining = state.counts.len().saturating_sub(state.resolved);

    let step = match chain_type {
        ChainType::GivenChain => {
            let position = *order.get(state.resolved)?;
            (position, threshold(position))
        }
        ChainType::Highest => {
            let take_high = if label_count {
                state.positives < state.estimated_positives
            } else {
                state.rate(high) >= 0.5
            };
            if take_high { (high, 1.0) } else { (low, 0.0) }
        }
        ChainType::Lowest => {
            let take_low = if label_count {
                remaining > state.estimated_positives
            } else {
                state.rate(low) < 0.5
            };
            if take_low { (low, 0.0) } else { (high, 1.0) }
        }
        ChainType::Hybrid => {
            let toward_one = 1.0 - state.rate(high) < state.rate(low);
            if label_count {
                if toward_one {
                    let value = if state.positives < state.estimated_positives { 1.0 } else { 0.0 };
                    (high, value)
                } else {
                    let budget = state.estimated_positives as i64 - state.positives as i64;
                    let value = if remaining as i64 > budget { 0.0 } else { 1.0 };
                    (low, value)
                }
            } else if toward_one {
                (high, threshold(high))
            } else {
                (low, threshold(low))
            }
        }
    };
    Some(step)
}

/// Next `(position, value)` for a powerset collector.
///
/// Among unresolved labels, the heaviest one the powerset predicts positive
/// is compared with the lightest one it predicts negative: if `n - high <= low`
/// the former becomes 1, otherwise the latter becomes 0.
pub(crate) fn next_powerset_assignment(
    counts: &[f64],
    n: f64,
    predicted: &[f64],
    unresolved: &[bool],
) -> Option<(usize, f64)> {
    let mut positive: Option<usize> = None;
    let mut negative: Option<usize> = None;
    for (i, &open) in unresolved.iter().enumerate() {
        if !open {
            continue;
        }
        if predicted[i] == 1.0 {
            if positive.is_none_or(|p| counts[i] > counts[p]) {
                positive = Some(i);
            }
        } else if negative.is_none_or(|q| counts[i] < counts[q]) {
            negative = Some(i);
        }
    }
    match (positive, negative) {
        (Some(p), Some(q)) => {
            if n - counts[p] <= counts[q] {
                Some((p, 1.0))
            } else {
                Some((q, 0.0))
            }
        }
        (Some(p), None) => Some((p, 1.0)),
        (None, Some(q)) => Some((q, 0.0)),
        (None, None) => None,
    }
}
