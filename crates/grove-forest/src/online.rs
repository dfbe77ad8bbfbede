//! Online trees with one fixed attribute per level, trained a record at a
//! time and mergeable across disjoint shards.

use grove_data::{AttributeId, FeatureRecord, Schema, validate_record};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rayon::iter::{IntoParallelRefIterator, IntoParallelRefMutIterator, ParallelIterator};
use tracing::{debug, info, instrument};

use crate::ForestError;
use crate::collector::{Collector, CollectorSchema, Combination, combine_slots};
use crate::ensemble::{TrainingMode, check_record_length};
use crate::node::{Node, NodeIndex};
use crate::quantile::QuantileSplitter;
use crate::splitter::Splitter;
use crate::tree::Tree;

/// The attribute tested at one depth of an online tree.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Level {
    attribute: AttributeId,
    /// Split quantile for numeric attributes, `None` for nominal ones.
    quantile: Option<f64>,
}

impl Level {
    #[must_use]
    pub fn attribute(&self) -> AttributeId {
        self.attribute
    }

    #[must_use]
    pub fn quantile(&self) -> Option<f64> {
        self.quantile
    }
}

/// Quantile sampling parameters shared by every splitter of a tree.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub(crate) struct OnlineSettings {
    pub(crate) max_values: usize,
    pub(crate) concept_drift: bool,
    pub(crate) interpolate: bool,
}

/// Draw one attribute per level.
///
/// Targets are never used. Numeric attributes may appear twice, nominal ones
/// once. Each level starts scanning at a random candidate; planning stops at
/// `max_depth` or when no candidate has uses left.
pub(crate) fn plan_levels(
    schema: &Schema,
    targets: &[AttributeId],
    max_depth: usize,
    random_quantile: bool,
    rng: &mut ChaCha8Rng,
) -> Vec<Level> {
    let candidates: Vec<(AttributeId, bool)> = schema
        .attributes()
        .iter()
        .filter(|a| !targets.contains(&a.id()))
        .map(|a| (a.id(), a.is_numeric()))
        .collect();
    let mut uses: Vec<usize> = candidates
        .iter()
        .map(|&(_, numeric)| if numeric { 2 } else { 1 })
        .collect();

    let mut plan = Vec::with_capacity(max_depth);
    while plan.len() < max_depth && !candidates.is_empty() {
        let start = rng.gen_range(0..candidates.len());
        let Some(i) = (0..candidates.len())
            .map(|offset| (start + offset) % candidates.len())
            .find(|&i| uses[i] > 0)
        else {
            break;
        };
        uses[i] -= 1;
        let (attribute, numeric) = candidates[i];
        let quantile = numeric.then(|| if random_quantile { rng.r#gen::<f64>() } else { 0.5 });
        plan.push(Level { attribute, quantile });
    }
    plan
}

/// A single online tree.
///
/// Nodes start as leaves and turn into inner nodes with the level's splitter
/// the first time a record reaches them above the last level.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QuantileTree {
    tree: Tree,
    plan: Vec<Level>,
    settings: OnlineSettings,
    /// Randomness for concept-drift eviction.
    rng: ChaCha8Rng,
}

impl QuantileTree {
    pub(crate) fn new(
        plan: Vec<Level>,
        settings: OnlineSettings,
        collectors: CollectorSchema,
        rng: ChaCha8Rng,
    ) -> Self {
        Self {
            tree: Tree::single_leaf(collectors),
            plan,
            settings,
            rng,
        }
    }

    #[must_use]
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Attribute per depth.
    #[must_use]
    pub fn plan(&self) -> &[Level] {
        &self.plan
    }

    /// Feed one record.
    ///
    /// A missing numeric value sends the record to both children with half
    /// the weight; a missing nominal value goes to the reserved child 0.
    pub fn update(&mut self, record: &FeatureRecord) {
        let mut updater = Updater {
            tree: &mut self.tree,
            plan: &self.plan,
            settings: self.settings,
            rng: &mut self.rng,
        };
        updater.update_at(NodeIndex::ROOT, 0, record, record.weight());
    }

    /// # Errors
    ///
    /// Returns [`ForestError::NoValidPrediction`] if the tree has seen no data.
    pub fn predict(&self, record: &FeatureRecord) -> Result<Vec<Collector>, ForestError> {
        self.tree.predict(record)
    }

    /// Untrained tree with the same level plan, for training another shard.
    #[must_use]
    pub fn replica(&self) -> Self {
        Self {
            tree: Tree::single_leaf(self.tree.collectors.clone()),
            plan: self.plan.clone(),
            settings: self.settings,
            rng: self.rng.clone(),
        }
    }

    /// Fold a tree trained on another shard into this one.
    ///
    /// Nodes are matched by position. Two inner nodes merge their splitters
    /// and the shorter child list is widened; two leaves add their
    /// collectors; an inner node wins over a leaf.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---|---|
    /// | [`ForestError::IncompatibleTrees`] | level plans or collector schemas differ |
    /// | [`ForestError::IncompatibleSplitters`] | splitters at one position cannot merge |
    pub fn merge(&mut self, other: &QuantileTree) -> Result<(), ForestError> {
        if self.plan != other.plan {
            return Err(ForestError::IncompatibleTrees {
                reason: "level plans differ".into(),
            });
        }
        if self.tree.collectors != other.tree.collectors {
            return Err(ForestError::IncompatibleTrees {
                reason: "collector schemas differ".into(),
            });
        }
        self.tree.merge_from(NodeIndex::ROOT, &other.tree, NodeIndex::ROOT)
    }
}

/// Mutable view used while routing one record.
struct Updater<'a> {
    tree: &'a mut Tree,
    plan: &'a [Level],
    settings: OnlineSettings,
    rng: &'a mut ChaCha8Rng,
}

impl Updater<'_> {
    fn update_at(&mut self, at: NodeIndex, depth: usize, record: &FeatureRecord, weight: f64) {
        if self.tree.nodes[at.index()].is_leaf() {
            if depth >= self.plan.len() {
                if let Node::Leaf { collectors, .. } = &mut self.tree.nodes[at.index()] {
                    for collector in collectors {
                        collector.add_weighted(record, weight);
                    }
                }
                return;
            }
            self.expand(at, depth);
        }

        let Node::Inner { splitter, .. } = &mut self.tree.nodes[at.index()] else {
            unreachable!("node {at} was expanded above");
        };
        let grew = splitter.update(record, &mut *self.rng);
        let n_children = splitter.n_children();
        let child = if matches!(splitter, Splitter::UpdateableNominal { .. }) {
            Some(splitter.determine_child(record).unwrap_or(0))
        } else {
            splitter.determine_child(record)
        };
        if grew {
            self.grow_children(at, n_children);
        }

        let children = self.tree.nodes[at.index()].children().to_vec();
        match child {
            Some(c) => self.update_at(children[c], depth + 1, record, weight),
            None => {
                let share = weight / children.len() as f64;
                for c in children {
                    self.update_at(c, depth + 1, record, share);
                }
            }
        }
    }

    /// Replace the leaf at `at` with an inner node testing the level's attribute.
    fn expand(&mut self, at: NodeIndex, depth: usize) {
        let level = &self.plan[depth];
        let splitter = match level.quantile {
            Some(quantile) => Splitter::Quantile(QuantileSplitter::from_parts(
                level.attribute,
                quantile,
                self.settings.max_values,
                self.settings.concept_drift,
                self.settings.interpolate,
            )),
            None => Splitter::UpdateableNominal {
                attribute: level.attribute,
                n_children: 0,
            },
        };
        let n_children = splitter.n_children();
        let parent = self.tree.nodes[at.index()].parent();
        self.tree.nodes[at.index()] = Node::Inner {
            splitter,
            children: Vec::new(),
            parent,
        };
        self.grow_children(at, n_children);
    }

    /// Append empty leaves under `at` until it has `n_children` children.
    fn grow_children(&mut self, at: NodeIndex, n_children: usize) {
        let have = self.tree.nodes[at.index()].children().len();
        let mut added = Vec::with_capacity(n_children.saturating_sub(have));
        for _ in have..n_children {
            added.push(NodeIndex::new(self.tree.nodes.len()));
            self.tree.nodes.push(Node::Leaf {
                collectors: self.tree.collectors.new_collectors(),
                parent: Some(at),
            });
        }
        if let Node::Inner { children, .. } = &mut self.tree.nodes[at.index()] {
            children.extend(added);
        }
    }
}

// --- Structural merge ---

impl Tree {
    /// Copy the subtree of `source` at `from` into this arena.
    ///
    /// With `slot` the subtree root overwrites that node; otherwise it is
    /// appended. Returns the index of the copied root.
    fn graft(
        &mut self,
        source: &Tree,
        from: NodeIndex,
        parent: Option<NodeIndex>,
        slot: Option<NodeIndex>,
    ) -> NodeIndex {
        let index = slot.unwrap_or_else(|| {
            self.nodes.push(Node::Leaf {
                collectors: Vec::new(),
                parent,
            });
            NodeIndex::new(self.nodes.len() - 1)
        });
        match &source.nodes[from.index()] {
            Node::Leaf { collectors, .. } => {
                self.nodes[index.index()] = Node::Leaf {
                    collectors: collectors.clone(),
                    parent,
                };
            }
            Node::Inner {
                splitter, children, ..
            } => {
                let copied = children
                    .iter()
                    .map(|&child| self.graft(source, child, Some(index), None))
                    .collect();
                self.nodes[index.index()] = Node::Inner {
                    splitter: splitter.clone(),
                    children: copied,
                    parent,
                };
            }
        }
        index
    }

    fn merge_from(&mut self, at: NodeIndex, other: &Tree, other_at: NodeIndex) -> Result<(), ForestError> {
        match (&other.nodes[other_at.index()], self.nodes[at.index()].is_leaf()) {
            (Node::Leaf { collectors: theirs, .. }, true) => {
                if let Node::Leaf { collectors, .. } = &mut self.nodes[at.index()] {
                    for (mine, their) in collectors.iter_mut().zip(theirs) {
                        let added = mine.add(&[their])?;
                        *mine = added;
                    }
                }
                Ok(())
            }
            (Node::Leaf { .. }, false) => Ok(()),
            (Node::Inner { .. }, true) => {
                let parent = self.nodes[at.index()].parent();
                self.graft(other, other_at, parent, Some(at));
                Ok(())
            }
            (
                Node::Inner {
                    splitter: theirs,
                    children: their_children,
                    ..
                },
                false,
            ) => {
                if let Node::Inner { splitter, .. } = &mut self.nodes[at.index()] {
                    splitter.merge(theirs)?;
                }
                let ours = self.nodes[at.index()].children().to_vec();
                for (i, &their_child) in their_children.iter().enumerate() {
                    if let Some(&our_child) = ours.get(i) {
                        self.merge_from(our_child, other, their_child)?;
                    } else {
                        let copied = self.graft(other, their_child, Some(at), None);
                        if let Node::Inner { children, .. } = &mut self.nodes[at.index()] {
                            children.push(copied);
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

/// An ensemble of online trees.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QuantileEnsemble {
    pub(crate) trees: Vec<QuantileTree>,
    pub(crate) schema: Schema,
    pub(crate) collectors: CollectorSchema,
    pub(crate) targets: Vec<AttributeId>,
}

impl QuantileEnsemble {
    #[must_use]
    pub fn trees(&self) -> &[QuantileTree] {
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

    /// Feed one record to every tree.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::Data`] if the record does not fit the schema.
    pub fn update(&mut self, record: &FeatureRecord) -> Result<(), ForestError> {
        validate_record(&self.schema, record, 0)?;
        for tree in &mut self.trees {
            tree.update(record);
        }
        Ok(())
    }

    /// Feed already validated records to every tree.
    pub(crate) fn train(&mut self, records: &[FeatureRecord], mode: TrainingMode) {
        match mode {
            TrainingMode::Sequential => {
                for record in records {
                    for tree in &mut self.trees {
                        tree.update(record);
                    }
                }
            }
            TrainingMode::Parallel => self.trees.par_iter_mut().for_each(|tree| {
                for record in records {
                    tree.update(record);
                }
            }),
        }
        debug!(n_records = records.len(), "online trees updated");
    }

    /// Predict with targets masked, combining trees with [`Combination::Merge`].
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---|---|
    /// | [`ForestError::RecordLengthMismatch`] | `record` does not match the schema |
    /// | [`ForestError::NoValidPrediction`] | a tree has seen no data |
    pub fn predict(&self, record: &FeatureRecord) -> Result<Vec<Collector>, ForestError> {
        check_record_length(&self.schema, record)?;
        let query = record.masked(&self.targets);
        let outputs = self
            .trees
            .iter()
            .map(|t| t.predict(&query))
            .collect::<Result<Vec<_>, _>>()?;
        combine_slots(Combination::Merge, &outputs)
    }

    /// Predict many records in parallel.
    ///
    /// # Errors
    ///
    /// Returns the first error from [`QuantileEnsemble::predict`].
    pub fn predict_batch(
        &self,
        records: &[FeatureRecord],
    ) -> Result<Vec<Vec<Collector>>, ForestError> {
        records.par_iter().map(|r| self.predict(r)).collect()
    }

    /// Untrained ensemble with the same level plans.
    #[must_use]
    pub fn replica(&self) -> Self {
        Self {
            trees: self.trees.iter().map(QuantileTree::replica).collect(),
            schema: self.schema.clone(),
            collectors: self.collectors.clone(),
            targets: self.targets.clone(),
        }
    }

    /// Merge tree by tree with an ensemble trained on another shard.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::IncompatibleTrees`] if tree counts or schemas
    /// differ, or any error from [`QuantileTree::merge`].
    #[instrument(skip_all, fields(n_trees = self.trees.len()))]
    pub fn merge(&mut self, other: &QuantileEnsemble) -> Result<(), ForestError> {
        if self.trees.len() != other.trees.len() {
            return Err(ForestError::IncompatibleTrees {
                reason: format!("{} trees vs {} trees", self.trees.len(), other.trees.len()),
            });
        }
        if self.schema != other.schema {
            return Err(ForestError::IncompatibleTrees {
                reason: "attribute schemas differ".into(),
            });
        }
        for (ours, theirs) in self.trees.iter_mut().zip(&other.trees) {
            ours.merge(theirs)?;
        }
        info!(
            n_nodes = self.trees.iter().map(|t| t.tree().n_nodes()).sum::<usize>(),
            "online ensembles merged"
        );
        Ok(())
    }
}
