//! Arena-backed decision tree: instance updates, prediction with fallback search, statistics.

use std::collections::{BTreeSet, HashSet};

use grove_data::{AttributeId, FeatureRecord};
use tracing::debug;

use crate::ForestError;
use crate::collector::{Collector, CollectorSchema, Combination};
use crate::node::{Node, NodeIndex};
use crate::splitter::Splitter;

/// A decision tree stored as a `Vec<Node>` arena rooted at [`NodeIndex::ROOT`].
///
/// Every leaf holds one collector per slot of the tree's [`CollectorSchema`].
/// Trees grown with [`SplitStrategy::InstanceTagged`](crate::SplitStrategy)
/// also support leave-one-out prediction through [`Tree::predict_excluding`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Tree {
    pub(crate) nodes: Vec<Node>,
    pub(crate) collectors: CollectorSchema,
}

/// Where a record goes from one node.
enum Route {
    Leaf,
    One(NodeIndex),
    All(Vec<NodeIndex>),
}

impl Tree {
    /// A tree made of a single empty leaf.
    #[must_use]
    pub fn single_leaf(collectors: CollectorSchema) -> Self {
        Self {
            nodes: vec![Node::Leaf {
                collectors: collectors.new_collectors(),
                parent: None,
            }],
            collectors,
        }
    }

    /// Assemble a tree from an arena whose root is at index 0.
    pub(crate) fn from_arena(nodes: Vec<Node>, collectors: CollectorSchema) -> Self {
        Self { nodes, collectors }
    }

    #[must_use]
    pub fn collector_schema(&self) -> &CollectorSchema {
        &self.collectors
    }

    /// All nodes in arena order; index 0 is the root.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    #[must_use]
    pub fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.nodes.get(index.index())
    }

    // --- Instance updates ---

    /// Route `record` to the leaves and add it with its own weight.
    ///
    /// Where a splitter cannot handle the record, it goes to every child
    /// with its weight divided evenly.
    pub fn add_instance(&mut self, record: &FeatureRecord) {
        self.apply(NodeIndex::ROOT, record, record.weight(), Collector::add_weighted);
    }

    /// Inverse of [`Tree::add_instance`].
    pub fn remove_instance(&mut self, record: &FeatureRecord) {
        self.apply(NodeIndex::ROOT, record, record.weight(), Collector::remove_weighted);
    }

    fn apply(
        &mut self,
        at: NodeIndex,
        record: &FeatureRecord,
        weight: f64,
        op: fn(&mut Collector, &FeatureRecord, f64),
    ) {
        match self.route(at, record, None) {
            Route::Leaf => {
                if let Node::Leaf { collectors, .. } = &mut self.nodes[at.index()] {
                    for collector in collectors {
                        op(collector, record, weight);
                    }
                }
            }
            Route::One(child) => self.apply(child, record, weight, op),
            Route::All(children) => {
                let share = weight / children.len() as f64;
                for child in children {
                    self.apply(child, record, share, op);
                }
            }
        }
    }

    fn route(&self, at: NodeIndex, record: &FeatureRecord, exclude: Option<usize>) -> Route {
        match &self.nodes[at.index()] {
            Node::Leaf { .. } => Route::Leaf,
            Node::Inner {
                splitter, children, ..
            } => match routed_child(splitter, record, exclude) {
                Some(child) => Route::One(children[child]),
                None => Route::All(children.clone()),
            },
        }
    }

    // --- Prediction ---

    /// Predict with [`Combination::Merge`] at fan-out points.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::NoValidPrediction`] if no leaf in the tree can
    /// predict some collector slot.
    pub fn predict(&self, record: &FeatureRecord) -> Result<Vec<Collector>, ForestError> {
        self.predict_with(record, Combination::Merge)
    }

    /// Predict, combining the outputs of fanned-out children with `mode`.
    ///
    /// A leaf whose collector has no data borrows a prediction from its
    /// siblings, then from its ancestors' other subtrees.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::NoValidPrediction`] if no leaf in the tree can
    /// predict some collector slot.
    pub fn predict_with(
        &self,
        record: &FeatureRecord,
        mode: Combination,
    ) -> Result<Vec<Collector>, ForestError> {
        Search::new(self, mode, None).run(record)
    }

    /// Leave-one-out prediction for trees built with instance-tagged splitters.
    ///
    /// Splitters whose threshold came from training row `source` are treated
    /// as unable to handle the record; their children are combined with
    /// [`Combination::Add`].
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::NoValidPrediction`] if no leaf in the tree can
    /// predict some collector slot.
    pub fn predict_excluding(
        &self,
        record: &FeatureRecord,
        source: usize,
    ) -> Result<Vec<Collector>, ForestError> {
        Search::new(self, Combination::Merge, Some(source)).run(record)
    }

    // --- Statistics ---

    #[must_use]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Length of the longest root-to-leaf path; a single leaf has depth 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut max_depth = 0;
        let mut stack = vec![(NodeIndex::ROOT, 0usize)];
        while let Some((at, depth)) = stack.pop() {
            max_depth = max_depth.max(depth);
            for &child in self.nodes[at.index()].children() {
                stack.push((child, depth + 1));
            }
        }
        max_depth
    }

    /// Arena positions of every label splitter.
    #[must_use]
    pub fn label_splitters(&self) -> Vec<NodeIndex> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.splitter().is_some_and(Splitter::is_label))
            .map(|(i, _)| NodeIndex::new(i))
            .collect()
    }

    /// Attributes tested by the active label splitters of this tree.
    #[must_use]
    pub fn label_dependencies(&self) -> BTreeSet<AttributeId> {
        self.nodes
            .iter()
            .filter_map(Node::splitter)
            .filter(|s| s.is_label() && s.is_active())
            .map(Splitter::attribute)
            .collect()
    }

    /// Enable or disable the label splitter at `index`. Returns false if
    /// there is no label splitter there.
    pub fn set_label_active(&mut self, index: NodeIndex, active: bool) -> bool {
        match self.nodes.get_mut(index.index()) {
            Some(Node::Inner { splitter, .. }) if splitter.is_label() => splitter.set_active(active),
            _ => false,
        }
    }
}

/// Child chosen by `splitter`, or `None` when the record must fan out.
fn routed_child(splitter: &Splitter, record: &FeatureRecord, exclude: Option<usize>) -> Option<usize> {
    if exclude.is_some() && splitter.source() == exclude {
        return None;
    }
    splitter.determine_child(record)
}

/// State of one prediction call.
struct Search<'a> {
    tree: &'a Tree,
    mode: Combination,
    exclude: Option<usize>,
    /// Nodes already explored by the current fallback search. Cleared at the
    /// start of every search, so one prediction call may revisit a node from
    /// several empty leaves.
    visited: HashSet<NodeIndex>,
}

impl<'a> Search<'a> {
    fn new(tree: &'a Tree, mode: Combination, exclude: Option<usize>) -> Self {
        Self {
            tree,
            mode,
            exclude,
            visited: HashSet::new(),
        }
    }

    fn run(mut self, record: &FeatureRecord) -> Result<Vec<Collector>, ForestError> {
        self.descend(NodeIndex::ROOT, record)?
            .into_iter()
            .enumerate()
            .map(|(slot, c)| c.ok_or(ForestError::NoValidPrediction { slot }))
            .collect()
    }

    /// Fan-out combination for a splitter; excluded tagged splitters always add.
    fn fan_out_mode(&self, splitter: &Splitter) -> Combination {
        if self.exclude.is_some() && splitter.source() == self.exclude {
            Combination::Add
        } else {
            self.mode
        }
    }

    fn descend(
        &mut self,
        at: NodeIndex,
        record: &FeatureRecord,
    ) -> Result<Vec<Option<Collector>>, ForestError> {
        let tree = self.tree;
        match &tree.nodes[at.index()] {
            Node::Leaf { collectors, .. } => {
                let mut out = Vec::with_capacity(collectors.len());
                for (slot, collector) in collectors.iter().enumerate() {
                    if collector.can_make_prediction() {
                        out.push(Some(collector.clone()));
                    } else {
                        out.push(self.fallback(at, slot, record)?);
                    }
                }
                Ok(out)
            }
            Node::Inner {
                splitter, children, ..
            } => match routed_child(splitter, record, self.exclude) {
                Some(child) => self.descend(children[child], record),
                None => {
                    let mode = self.fan_out_mode(splitter);
                    let mut outputs = Vec::with_capacity(children.len());
                    for &child in children {
                        outputs.push(self.descend(child, record)?);
                    }
                    combine_optional(mode, &outputs, tree.collectors.len())
                }
            },
        }
    }

    /// Look for a valid prediction of `slot` in the siblings of `leaf`, then
    /// in the other subtrees of each ancestor in turn.
    ///
    /// Each search visits a node at most once, so one search is linear in the
    /// tree size. The bound holds per search: a prediction that fans out to
    /// `k` empty leaves runs `k` independent searches.
    fn fallback(
        &mut self,
        leaf: NodeIndex,
        slot: usize,
        record: &FeatureRecord,
    ) -> Result<Option<Collector>, ForestError> {
        let tree = self.tree;
        self.visited.clear();
        self.visited.insert(leaf);
        let mut current = leaf;
        while let Some(parent) = tree.nodes[current.index()].parent() {
            self.visited.insert(parent);
            let mut found = Vec::new();
            for &sibling in tree.nodes[parent.index()].children() {
                if let Some(c) = self.collect_slot(sibling, slot, record)? {
                    found.push(c);
                }
            }
            if !found.is_empty() {
                let refs: Vec<&Collector> = found.iter().collect();
                return Collector::combine(self.mode, &refs).map(Some);
            }
            current = parent;
        }
        debug!(slot, leaf = %leaf, "fallback search found no trained leaf");
        Ok(None)
    }

    /// Valid prediction for `slot` from an unexplored subtree, following the
    /// record where possible and widening to all children otherwise.
    fn collect_slot(
        &mut self,
        at: NodeIndex,
        slot: usize,
        record: &FeatureRecord,
    ) -> Result<Option<Collector>, ForestError> {
        if !self.visited.insert(at) {
            return Ok(None);
        }
        let tree = self.tree;
        match &tree.nodes[at.index()] {
            Node::Leaf { collectors, .. } => {
                let collector = &collectors[slot];
                Ok(collector.can_make_prediction().then(|| collector.clone()))
            }
            Node::Inner {
                splitter, children, ..
            } => {
                if let Some(child) = routed_child(splitter, record, self.exclude)
                    && let Some(c) = self.collect_slot(children[child], slot, record)?
                {
                    return Ok(Some(c));
                }
                let mut found = Vec::new();
                for &child in children {
                    if let Some(c) = self.collect_slot(child, slot, record)? {
                        found.push(c);
                    }
                }
                if found.is_empty() {
                    return Ok(None);
                }
                let refs: Vec<&Collector> = found.iter().collect();
                Collector::combine(self.fan_out_mode(splitter), &refs).map(Some)
            }
        }
    }
}

/// Slot-wise combination of child outputs, skipping slots a child could not fill.
fn combine_optional(
    mode: Combination,
    outputs: &[Vec<Option<Collector>>],
    n_slots: usize,
) -> Result<Vec<Option<Collector>>, ForestError> {
    (0..n_slots)
        .map(|slot| {
            let sources: Vec<&Collector> = outputs.iter().filter_map(|o| o[slot].as_ref()).collect();
            if sources.is_empty() {
                Ok(None)
            } else {
                Collector::combine(mode, &sources).map(Some)
            }
        })
        .collect()
}
