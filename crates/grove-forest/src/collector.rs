//! Per-leaf statistics for each learning task, and their two combination rules.

use std::collections::BTreeMap;

use grove_data::{Attribute, AttributeId, FeatureRecord, Schema};

use crate::ForestError;
use crate::powerset::LabelCombination;

/// Instance counts below this are treated as zero after removals.
const COUNT_EPSILON: f64 = 1e-12;

/// How several collectors for the same slot are combined into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum Combination {
    /// Normalize every source by its own instance count, average, then
    /// rescale by the average instance count. Each source weighs the same.
    #[default]
    Merge,
    /// Raw sum of statistics and instance counts. Larger sources dominate.
    Add,
}

/// Description of one learning task, used to create empty collectors.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CollectorSpec {
    /// Single nominal target; predicts the heaviest class.
    Classification {
        /// Nominal target attribute.
        target: AttributeId,
    },
    /// Binary labels; predicts the `round(sum / n)` heaviest labels.
    Multilabel {
        /// Binary label attributes.
        labels: Vec<AttributeId>,
    },
    /// Binary labels; predicts every label with positive rate >= 0.5.
    ProbabilityMultilabel {
        /// Binary label attributes.
        labels: Vec<AttributeId>,
    },
    /// Binary labels treated as one class per observed combination.
    LabelPowerset {
        /// Binary label attributes.
        labels: Vec<AttributeId>,
    },
}

impl CollectorSpec {
    /// Attributes predicted by collectors of this spec.
    #[must_use]
    pub fn attributes(&self) -> &[AttributeId] {
        match self {
            CollectorSpec::Classification { target } => std::slice::from_ref(target),
            CollectorSpec::Multilabel { labels }
            | CollectorSpec::ProbabilityMultilabel { labels }
            | CollectorSpec::LabelPowerset { labels } => labels,
        }
    }

    /// Create a collector that has seen no instances.
    #[must_use]
    pub fn empty_collector(&self) -> Collector {
        match self {
            CollectorSpec::Classification { target } => Collector::Classification(ClassCounts {
                target: *target,
                counts: BTreeMap::new(),
                n: 0.0,
            }),
            CollectorSpec::Multilabel { labels } => {
                Collector::Multilabel(LabelCounts::empty(labels.clone()))
            }
            CollectorSpec::ProbabilityMultilabel { labels } => {
                Collector::ProbabilityMultilabel(LabelCounts::empty(labels.clone()))
            }
            CollectorSpec::LabelPowerset { labels } => Collector::LabelPowerset(PowersetCounts {
                label_counts: vec![0.0; labels.len()],
                labels: labels.clone(),
                counts: BTreeMap::new(),
                n: 0.0,
            }),
        }
    }

    fn validate(&self, slot: usize, schema: &Schema) -> Result<(), ForestError> {
        match self {
            CollectorSpec::Classification { target } => {
                let attr = check_attribute(schema, *target)?;
                if !attr.is_nominal() {
                    return Err(ForestError::InvalidTarget {
                        attribute: target.index(),
                        reason: "classification target must be nominal".into(),
                    });
                }
            }
            CollectorSpec::Multilabel { labels }
            | CollectorSpec::ProbabilityMultilabel { labels }
            | CollectorSpec::LabelPowerset { labels } => {
                if labels.is_empty() {
                    return Err(ForestError::UnsupportedCollector {
                        slot,
                        reason: "label list is empty".into(),
                    });
                }
                for &label in labels {
                    check_attribute(schema, label)?;
                    if !schema.is_binary(label) {
                        return Err(ForestError::InvalidTarget {
                            attribute: label.index(),
                            reason: "labels must be binary nominal attributes".into(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Look up an attribute, mapping a missing id to [`ForestError::AttributeOutOfRange`].
pub(crate) fn check_attribute(schema: &Schema, id: AttributeId) -> Result<&Attribute, ForestError> {
    schema.get(id).ok_or(ForestError::AttributeOutOfRange {
        attribute: id.index(),
        n_attributes: schema.len(),
    })
}

/// Ordered collector slots shared by every leaf of a tree.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CollectorSchema {
    specs: Vec<CollectorSpec>,
}

impl CollectorSchema {
    /// # Errors
    ///
    /// Returns [`ForestError::NoCollectors`] if `specs` is empty.
    pub fn new(specs: Vec<CollectorSpec>) -> Result<Self, ForestError> {
        if specs.is_empty() {
            return Err(ForestError::NoCollectors);
        }
        Ok(Self { specs })
    }

    /// Check every spec against the attribute metadata of a dataset.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::AttributeOutOfRange`] | a target id is outside the schema |
    /// | [`ForestError::InvalidTarget`] | a target has the wrong kind |
    /// | [`ForestError::UnsupportedCollector`] | a label list is empty |
    pub fn validate(&self, schema: &Schema) -> Result<(), ForestError> {
        for (slot, spec) in self.specs.iter().enumerate() {
            spec.validate(slot, schema)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn specs(&self) -> &[CollectorSpec] {
        &self.specs
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// One empty collector per slot.
    #[must_use]
    pub fn new_collectors(&self) -> Vec<Collector> {
        self.specs.iter().map(CollectorSpec::empty_collector).collect()
    }

    /// Every attribute predicted by some slot, ascending and deduplicated.
    #[must_use]
    pub fn target_attributes(&self) -> Vec<AttributeId> {
        let mut ids: Vec<AttributeId> = self
            .specs
            .iter()
            .flat_map(|s| s.attributes().iter().copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Weighted class histogram.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ClassCounts {
    target: AttributeId,
    counts: BTreeMap<usize, f64>,
    n: f64,
}

/// Weighted positive count per label.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LabelCounts {
    labels: Vec<AttributeId>,
    counts: Vec<f64>,
    n: f64,
}

impl LabelCounts {
    fn empty(labels: Vec<AttributeId>) -> Self {
        Self {
            counts: vec![0.0; labels.len()],
            labels,
            n: 0.0,
        }
    }
}

/// Weighted count per observed label combination, plus per-label counts.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PowersetCounts {
    labels: Vec<AttributeId>,
    counts: BTreeMap<LabelCombination, f64>,
    label_counts: Vec<f64>,
    n: f64,
}

/// Statistics for one learning task at one leaf.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Collector {
    /// See [`CollectorSpec::Classification`].
    Classification(ClassCounts),
    /// See [`CollectorSpec::Multilabel`].
    Multilabel(LabelCounts),
    /// See [`CollectorSpec::ProbabilityMultilabel`].
    ProbabilityMultilabel(LabelCounts),
    /// See [`CollectorSpec::LabelPowerset`].
    LabelPowerset(PowersetCounts),
}

impl Collector {
    /// Multilabel collector holding exactly one instance with the given label values.
    pub(crate) fn from_assignment(labels: Vec<AttributeId>, values: &[f64]) -> Self {
        let counts = values.iter().map(|&v| if v == 1.0 { 1.0 } else { 0.0 }).collect();
        Collector::Multilabel(LabelCounts {
            labels,
            counts,
            n: 1.0,
        })
    }

    /// Attributes this collector predicts, aligned with [`Collector::prediction`].
    #[must_use]
    pub fn used_attributes(&self) -> &[AttributeId] {
        match self {
            Collector::Classification(c) => std::slice::from_ref(&c.target),
            Collector::Multilabel(c) | Collector::ProbabilityMultilabel(c) => &c.labels,
            Collector::LabelPowerset(c) => &c.labels,
        }
    }

    /// Sum of instance weights seen.
    #[must_use]
    pub fn instance_count(&self) -> f64 {
        match self {
            Collector::Classification(c) => c.n,
            Collector::Multilabel(c) | Collector::ProbabilityMultilabel(c) => c.n,
            Collector::LabelPowerset(c) => c.n,
        }
    }

    #[must_use]
    pub fn can_make_prediction(&self) -> bool {
        match self {
            Collector::LabelPowerset(c) => c.n > 0.0 && !c.counts.is_empty(),
            other => other.instance_count() > 0.0,
        }
    }

    /// Add `record` with its own weight.
    pub fn add_instance(&mut self, record: &FeatureRecord) {
        self.add_weighted(record, record.weight());
    }

    /// Remove `record` with its own weight.
    pub fn remove_instance(&mut self, record: &FeatureRecord) {
        self.remove_weighted(record, record.weight());
    }

    /// Add `record` with an explicit weight.
    ///
    /// A classification collector ignores records whose target is missing.
    /// Label collectors count the instance and skip missing labels.
    pub fn add_weighted(&mut self, record: &FeatureRecord, weight: f64) {
        match self {
            Collector::Classification(c) => {
                if let Some(value) = record.value(c.target) {
                    *c.counts.entry(value as usize).or_insert(0.0) += weight;
                    c.n += weight;
                }
            }
            Collector::Multilabel(c) | Collector::ProbabilityMultilabel(c) => {
                add_label_values(&c.labels, &mut c.counts, record, weight);
                c.n += weight;
            }
            Collector::LabelPowerset(c) => {
                let key = LabelCombination::from_record(record, &c.labels);
                *c.counts.entry(key).or_insert(0.0) += weight;
                add_label_values(&c.labels, &mut c.label_counts, record, weight);
                c.n += weight;
            }
        }
    }

    /// Remove `record` with an explicit weight. Counts never drop below zero.
    pub fn remove_weighted(&mut self, record: &FeatureRecord, weight: f64) {
        match self {
            Collector::Classification(c) => {
                if let Some(value) = record.value(c.target) {
                    let class = value as usize;
                    if let Some(count) = c.counts.get_mut(&class) {
                        *count -= weight;
                        if *count <= COUNT_EPSILON {
                            c.counts.remove(&class);
                        }
                    }
                    c.n = clamp_count(c.n - weight);
                }
            }
            Collector::Multilabel(c) | Collector::ProbabilityMultilabel(c) => {
                remove_label_values(&c.labels, &mut c.counts, record, weight);
                c.n = clamp_count(c.n - weight);
            }
            Collector::LabelPowerset(c) => {
                let key = LabelCombination::from_record(record, &c.labels);
                if let Some(count) = c.counts.get_mut(&key) {
                    if *count > weight + COUNT_EPSILON {
                        *count -= weight;
                    } else {
                        c.counts.remove(&key);
                    }
                }
                remove_label_values(&c.labels, &mut c.label_counts, record, weight);
                c.n = clamp_count(c.n - weight);
            }
        }
    }

    /// Predicted values, aligned with [`Collector::used_attributes`].
    ///
    /// A classification collector predicts its most frequent class; when
    /// several classes share the highest count the lowest class index wins.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::EmptyCollector`] if no instance has been seen.
    pub fn prediction(&self) -> Result<Vec<f64>, ForestError> {
        if !self.can_make_prediction() {
            return Err(ForestError::EmptyCollector);
        }
        let values = match self {
            Collector::Classification(c) => {
                let mut best: Option<(usize, f64)> = None;
                for (&class, &count) in &c.counts {
                    if best.is_none_or(|(_, b)| count > b) {
                        best = Some((class, count));
                    }
                }
                vec![best.map_or(0.0, |(class, _)| class as f64)]
            }
            Collector::Multilabel(c) => {
                let k = predicted_label_count(&c.counts, c.n).min(c.counts.len());
                let mut order: Vec<usize> = (0..c.counts.len()).collect();
                order.sort_by(|&a, &b| c.counts[a].total_cmp(&c.counts[b]));
                let mut values = vec![0.0; c.counts.len()];
                for &i in order.iter().rev().take(k) {
                    values[i] = 1.0;
                }
                values
            }
            Collector::ProbabilityMultilabel(c) => c
                .counts
                .iter()
                .map(|&count| if count / c.n >= 0.5 { 1.0 } else { 0.0 })
                .collect(),
            Collector::LabelPowerset(c) => {
                let mut best: Option<(&LabelCombination, f64)> = None;
                for (key, &count) in &c.counts {
                    if best.is_none_or(|(_, b)| count > b) {
                        best = Some((key, count));
                    }
                }
                best.map_or_else(
                    || vec![0.0; c.labels.len()],
                    |(key, _)| key.to_values(c.labels.len()),
                )
            }
        };
        Ok(values)
    }

    /// Weighted positive count per label, for label collectors.
    #[must_use]
    pub fn label_counts(&self) -> Option<&[f64]> {
        match self {
            Collector::Multilabel(c) | Collector::ProbabilityMultilabel(c) => Some(&c.counts),
            Collector::LabelPowerset(c) => Some(&c.label_counts),
            Collector::Classification(_) => None,
        }
    }

    /// Positive rate per label (`count / n`), for label collectors that have seen data.
    #[must_use]
    pub fn label_probabilities(&self) -> Option<Vec<f64>> {
        let n = self.instance_count();
        if n <= 0.0 {
            return None;
        }
        self.label_counts()
            .map(|counts| counts.iter().map(|c| c / n).collect())
    }

    /// Estimated number of positive labels, `round(sum(label counts) / n)`.
    #[must_use]
    pub fn estimated_label_count(&self) -> Option<usize> {
        let counts = self.label_counts()?;
        Some(predicted_label_count(counts, self.instance_count()))
    }

    /// Accumulated weight of one class; zero for unseen classes and non-classification collectors.
    #[must_use]
    pub fn class_weight(&self, class: usize) -> f64 {
        match self {
            Collector::Classification(c) => c.counts.get(&class).copied().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// Weight of one label combination; zero unless this is a powerset collector.
    #[must_use]
    pub fn combination_weight(&self, key: &LabelCombination) -> f64 {
        match self {
            Collector::LabelPowerset(c) => c.counts.get(key).copied().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// [`Combination::Merge`] of `self` with `others` into a new collector.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::CollectorMismatch`] if kinds or attributes differ.
    pub fn merge(&self, others: &[&Collector]) -> Result<Collector, ForestError> {
        let mut sources = Vec::with_capacity(others.len() + 1);
        sources.push(self);
        sources.extend_from_slice(others);
        Self::combine(Combination::Merge, &sources)
    }

    /// [`Combination::Add`] of `self` with `others` into a new collector.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::CollectorMismatch`] if kinds or attributes differ.
    pub fn add(&self, others: &[&Collector]) -> Result<Collector, ForestError> {
        let mut sources = Vec::with_capacity(others.len() + 1);
        sources.push(self);
        sources.extend_from_slice(others);
        Self::combine(Combination::Add, &sources)
    }

    /// Combine collectors of one slot. Inputs are never modified.
    ///
    /// Under [`Combination::Merge`], sources without instances contribute
    /// nothing; if all are empty the result is empty.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::CollectorMismatch`] if `sources` is empty or
    /// kinds or attributes differ.
    pub fn combine(mode: Combination, sources: &[&Collector]) -> Result<Collector, ForestError> {
        let Some(first) = sources.first() else {
            return Err(ForestError::CollectorMismatch {
                reason: "no collectors to combine".into(),
            });
        };
        for other in &sources[1..] {
            first.check_compatible(other)?;
        }

        let mut combined = first.empty_like();
        match mode {
            Combination::Add => {
                let mut n = 0.0;
                for source in sources {
                    combined.accumulate(source, 1.0);
                    n += source.instance_count();
                }
                combined.set_instance_count(n);
            }
            Combination::Merge => {
                let active: Vec<&Collector> = sources
                    .iter()
                    .copied()
                    .filter(|s| s.instance_count() > 0.0)
                    .collect();
                if active.is_empty() {
                    return Ok(combined);
                }
                let m = active.len() as f64;
                let mean_n = active.iter().map(|s| s.instance_count()).sum::<f64>() / m;
                for source in &active {
                    combined.accumulate(source, 1.0 / source.instance_count());
                }
                combined.scale(mean_n / m);
                combined.set_instance_count(mean_n);
            }
        }
        Ok(combined)
    }

    fn check_compatible(&self, other: &Collector) -> Result<(), ForestError> {
        if std::mem::discriminant(self) != std::mem::discriminant(other) {
            return Err(ForestError::CollectorMismatch {
                reason: format!("{} vs {}", self.kind_name(), other.kind_name()),
            });
        }
        if self.used_attributes() != other.used_attributes() {
            return Err(ForestError::CollectorMismatch {
                reason: format!(
                    "attributes {:?} vs {:?}",
                    self.used_attributes(),
                    other.used_attributes()
                ),
            });
        }
        Ok(())
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Collector::Classification(_) => "classification",
            Collector::Multilabel(_) => "multilabel",
            Collector::ProbabilityMultilabel(_) => "probability multilabel",
            Collector::LabelPowerset(_) => "label powerset",
        }
    }

    /// Same kind and attributes, no instances.
    pub(crate) fn empty_like(&self) -> Collector {
        match self {
            Collector::Classification(c) => Collector::Classification(ClassCounts {
                target: c.target,
                counts: BTreeMap::new(),
                n: 0.0,
            }),
            Collector::Multilabel(c) => Collector::Multilabel(LabelCounts::empty(c.labels.clone())),
            Collector::ProbabilityMultilabel(c) => {
                Collector::ProbabilityMultilabel(LabelCounts::empty(c.labels.clone()))
            }
            Collector::LabelPowerset(c) => Collector::LabelPowerset(PowersetCounts {
                labels: c.labels.clone(),
                counts: BTreeMap::new(),
                label_counts: vec![0.0; c.labels.len()],
                n: 0.0,
            }),
        }
    }

    /// Add `factor` times the statistics of a compatible collector.
    fn accumulate(&mut self, source: &Collector, factor: f64) {
        match (self, source) {
            (Collector::Classification(acc), Collector::Classification(src)) => {
                for (&class, &count) in &src.counts {
                    *acc.counts.entry(class).or_insert(0.0) += count * factor;
                }
            }
            (Collector::Multilabel(acc), Collector::Multilabel(src))
            | (Collector::ProbabilityMultilabel(acc), Collector::ProbabilityMultilabel(src)) => {
                for (a, s) in acc.counts.iter_mut().zip(&src.counts) {
                    *a += s * factor;
                }
            }
            (Collector::LabelPowerset(acc), Collector::LabelPowerset(src)) => {
                for (key, &count) in &src.counts {
                    *acc.counts.entry(key.clone()).or_insert(0.0) += count * factor;
                }
                for (a, s) in acc.label_counts.iter_mut().zip(&src.label_counts) {
                    *a += s * factor;
                }
            }
            _ => unreachable!("accumulate is only called on compatible collectors"),
        }
    }

    fn scale(&mut self, factor: f64) {
        match self {
            Collector::Classification(c) => c.counts.values_mut().for_each(|v| *v *= factor),
            Collector::Multilabel(c) | Collector::ProbabilityMultilabel(c) => {
                c.counts.iter_mut().for_each(|v| *v *= factor);
            }
            Collector::LabelPowerset(c) => {
                c.counts.values_mut().for_each(|v| *v *= factor);
                c.label_counts.iter_mut().for_each(|v| *v *= factor);
            }
        }
    }

    fn set_instance_count(&mut self, n: f64) {
        match self {
            Collector::Classification(c) => c.n = n,
            Collector::Multilabel(c) | Collector::ProbabilityMultilabel(c) => c.n = n,
            Collector::LabelPowerset(c) => c.n = n,
        }
    }
}

/// Combine the collector arrays of several predictions slot by slot.
pub(crate) fn combine_slots(
    mode: Combination,
    outputs: &[Vec<Collector>],
) -> Result<Vec<Collector>, ForestError> {
    let Some(first) = outputs.first() else {
        return Err(ForestError::CollectorMismatch {
            reason: "no predictions to combine".into(),
        });
    };
    (0..first.len())
        .map(|slot| {
            let sources: Vec<&Collector> = outputs.iter().map(|o| &o[slot]).collect();
            Collector::combine(mode, &sources)
        })
        .collect()
}

fn predicted_label_count(counts: &[f64], n: f64) -> usize {
    if n <= 0.0 {
        return 0;
    }
    (counts.iter().sum::<f64>() / n).round() as usize
}

fn add_label_values(labels: &[AttributeId], counts: &mut [f64], record: &FeatureRecord, weight: f64) {
    for (count, &label) in counts.iter_mut().zip(labels) {
        if let Some(value) = record.value(label) {
            *count += value * weight;
        }
    }
}

fn remove_label_values(
    labels: &[AttributeId],
    counts: &mut [f64],
    record: &FeatureRecord,
    weight: f64,
) {
    for (count, &label) in counts.iter_mut().zip(labels) {
        if let Some(value) = record.value(label) {
            *count = clamp_count(*count - value * weight);
        }
    }
}

fn clamp_count(value: f64) -> f64 {
    if value < COUNT_EPSILON { 0.0 } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grove_data::Attribute;

    fn attr(i: usize) -> AttributeId {
        AttributeId::new(i)
    }

    fn class_record(class: usize) -> FeatureRecord {
        FeatureRecord::from_values(&[class as f64])
    }

    fn classification(counts: &[(usize, usize)]) -> Collector {
        let mut c = CollectorSpec::Classification { target: attr(0) }.empty_collector();
        for &(class, times) in counts {
            for _ in 0..times {
                c.add_instance(&class_record(class));
            }
        }
        c
    }

    fn labels(n: usize) -> Vec<AttributeId> {
        (0..n).map(attr).collect()
    }

    // --- Merge vs add ---

    #[test]
    fn merge_normalizes_and_add_sums() {
        let a = classification(&[(0, 3), (1, 1)]);
        let b = classification(&[(1, 4)]);
        let a_before = a.clone();
        let b_before = b.clone();

        let merged = a.merge(&[&b]).unwrap();
        assert!((merged.instance_count() - 4.0).abs() < 1e-12);
        assert!((merged.class_weight(0) / 4.0 - 0.375).abs() < 1e-12);
        assert!((merged.class_weight(1) / 4.0 - 0.625).abs() < 1e-12);
        assert_eq!(merged.prediction().unwrap(), vec![1.0]);

        let added = a.add(&[&b]).unwrap();
        assert!((added.instance_count() - 8.0).abs() < 1e-12);
        assert!((added.class_weight(0) - 3.0).abs() < 1e-12);
        assert!((added.class_weight(1) - 5.0).abs() < 1e-12);
        assert_eq!(added.prediction().unwrap(), vec![1.0]);

        assert_eq!(a, a_before);
        assert_eq!(b, b_before);
    }

    #[test]
    fn merge_weighs_sources_equally() {
        // 100 instances of class 0 against 1 instance of class 1.
        let big = classification(&[(0, 100)]);
        let small = classification(&[(1, 1)]);
        let merged = big.merge(&[&small]).unwrap();
        let share0 = merged.class_weight(0) / merged.instance_count();
        let share1 = merged.class_weight(1) / merged.instance_count();
        assert!((share0 - 0.5).abs() < 1e-12);
        assert!((share1 - 0.5).abs() < 1e-12);

        let added = big.add(&[&small]).unwrap();
        assert_eq!(added.prediction().unwrap(), vec![0.0]);
    }

    #[test]
    fn merge_skips_empty_sources() {
        let trained = classification(&[(2, 2)]);
        let empty = classification(&[]);
        let merged = trained.merge(&[&empty]).unwrap();
        assert!((merged.instance_count() - 2.0).abs() < 1e-12);
        assert!((merged.class_weight(2) - 2.0).abs() < 1e-12);

        let all_empty = empty.merge(&[&empty]).unwrap();
        assert!(!all_empty.can_make_prediction());
    }

    #[test]
    fn combining_different_kinds_fails() {
        let a = classification(&[(0, 1)]);
        let b = CollectorSpec::Multilabel { labels: labels(1) }.empty_collector();
        let err = a.merge(&[&b]).unwrap_err();
        assert!(matches!(err, ForestError::CollectorMismatch { .. }));

        let c = CollectorSpec::Classification { target: attr(4) }.empty_collector();
        let err = a.add(&[&c]).unwrap_err();
        assert!(matches!(err, ForestError::CollectorMismatch { .. }));
    }

    // --- Add / remove ---

    #[test]
    fn add_remove_round_trip_every_kind() {
        let specs = [
            CollectorSpec::Classification { target: attr(0) },
            CollectorSpec::Multilabel { labels: labels(3) },
            CollectorSpec::ProbabilityMultilabel { labels: labels(3) },
            CollectorSpec::LabelPowerset { labels: labels(3) },
        ];
        let seed_record = FeatureRecord::from_values(&[1.0, 0.0, 1.0]).with_weight(2.0);
        let probe = FeatureRecord::from_values(&[0.0, 1.0, 1.0]).with_weight(0.75);
        for spec in &specs {
            let mut c = spec.empty_collector();
            c.add_instance(&seed_record);
            let before = c.clone();
            c.add_instance(&probe);
            c.remove_instance(&probe);
            assert!((c.instance_count() - before.instance_count()).abs() < 1e-9, "{spec:?}");
            if let (Some(after), Some(orig)) = (c.label_counts(), before.label_counts()) {
                for (x, y) in after.iter().zip(orig) {
                    assert!((x - y).abs() < 1e-9, "{spec:?}");
                }
            }
            assert!((c.class_weight(0) - before.class_weight(0)).abs() < 1e-9);
            assert_eq!(c.prediction().unwrap(), before.prediction().unwrap(), "{spec:?}");
        }
    }

    #[test]
    fn remove_never_goes_negative() {
        let mut c = CollectorSpec::Multilabel { labels: labels(2) }.empty_collector();
        c.remove_instance(&FeatureRecord::from_values(&[1.0, 1.0]));
        assert!(c.instance_count().abs() < f64::EPSILON);
        assert!(c.label_counts().unwrap().iter().all(|&v| v == 0.0));
        assert!(!c.can_make_prediction());

        let mut k = classification(&[(0, 1)]);
        k.remove_weighted(&class_record(0), 5.0);
        assert!(k.instance_count().abs() < f64::EPSILON);
        assert!(!k.can_make_prediction());
    }

    #[test]
    fn classification_ignores_missing_target() {
        let mut c = classification(&[]);
        c.add_instance(&FeatureRecord::missing(1));
        assert!(!c.can_make_prediction());
        assert!(matches!(c.prediction(), Err(ForestError::EmptyCollector)));
    }

    // --- Predictions ---

    #[test]
    fn classification_tie_goes_to_lowest_class() {
        let c = classification(&[(2, 2), (1, 2), (3, 1)]);
        assert_eq!(c.prediction().unwrap(), vec![1.0]);
    }

    #[test]
    fn multilabel_predicts_top_k() {
        let mut c = CollectorSpec::Multilabel { labels: labels(4) }.empty_collector();
        c.add_instance(&FeatureRecord::from_values(&[1.0, 1.0, 0.0, 0.0]));
        c.add_instance(&FeatureRecord::from_values(&[1.0, 0.0, 1.0, 0.0]));
        c.add_instance(&FeatureRecord::from_values(&[1.0, 1.0, 0.0, 0.0]));
        // sum = 6, n = 3 -> two labels; counts [3, 2, 1, 0].
        assert_eq!(c.estimated_label_count(), Some(2));
        assert_eq!(c.prediction().unwrap(), vec![1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn probability_multilabel_thresholds_at_half() {
        let mut c = CollectorSpec::ProbabilityMultilabel { labels: labels(3) }.empty_collector();
        c.add_instance(&FeatureRecord::from_values(&[1.0, 1.0, 0.0]));
        c.add_instance(&FeatureRecord::from_values(&[1.0, 0.0, 0.0]));
        assert_eq!(c.prediction().unwrap(), vec![1.0, 1.0, 0.0]);
        assert_eq!(c.label_probabilities().unwrap(), vec![1.0, 0.5, 0.0]);
    }

    #[test]
    fn powerset_predicts_most_frequent_combination() {
        let mut c = CollectorSpec::LabelPowerset { labels: labels(3) }.empty_collector();
        c.add_instance(&FeatureRecord::from_values(&[1.0, 0.0, 1.0]));
        c.add_instance(&FeatureRecord::from_values(&[0.0, 1.0, 0.0]));
        c.add_instance(&FeatureRecord::from_values(&[1.0, 0.0, 1.0]));
        assert_eq!(c.prediction().unwrap(), vec![1.0, 0.0, 1.0]);
        let key = LabelCombination::from_flags([true, false, true]);
        assert!((c.combination_weight(&key) - 2.0).abs() < 1e-12);

        c.remove_instance(&FeatureRecord::from_values(&[1.0, 0.0, 1.0]));
        c.remove_instance(&FeatureRecord::from_values(&[1.0, 0.0, 1.0]));
        assert_eq!(c.prediction().unwrap(), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn from_assignment_predicts_exactly_the_positives() {
        let c = Collector::from_assignment(labels(3), &[0.0, 1.0, 1.0]);
        assert_eq!(c.prediction().unwrap(), vec![0.0, 1.0, 1.0]);
    }

    // --- Schema ---

    #[test]
    fn schema_validation() {
        let schema = Schema::new(vec![
            Attribute::numeric("x"),
            Attribute::nominal("class", ["a", "b", "c"]),
            Attribute::binary("l0"),
            Attribute::binary("l1"),
        ]);
        let ok = CollectorSchema::new(vec![
            CollectorSpec::Classification { target: attr(1) },
            CollectorSpec::LabelPowerset { labels: vec![attr(2), attr(3)] },
        ])
        .unwrap();
        ok.validate(&schema).unwrap();
        assert_eq!(ok.target_attributes(), vec![attr(1), attr(2), attr(3)]);

        let numeric_target =
            CollectorSchema::new(vec![CollectorSpec::Classification { target: attr(0) }]).unwrap();
        assert!(matches!(
            numeric_target.validate(&schema),
            Err(ForestError::InvalidTarget { attribute: 0, .. })
        ));

        let non_binary =
            CollectorSchema::new(vec![CollectorSpec::Multilabel { labels: vec![attr(1)] }]).unwrap();
        assert!(matches!(
            non_binary.validate(&schema),
            Err(ForestError::InvalidTarget { attribute: 1, .. })
        ));

        let out_of_range =
            CollectorSchema::new(vec![CollectorSpec::Classification { target: attr(9) }]).unwrap();
        assert!(matches!(
            out_of_range.validate(&schema),
            Err(ForestError::AttributeOutOfRange { attribute: 9, n_attributes: 4 })
        ));

        assert!(matches!(CollectorSchema::new(Vec::new()), Err(ForestError::NoCollectors)));
    }
}
