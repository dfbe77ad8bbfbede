//! Recursive batch construction of random trees.

use grove_data::{AttributeId, Dataset, FeatureRecord, Schema};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, instrument};

use crate::ForestError;
use crate::collector::CollectorSchema;
use crate::node::{Node, NodeIndex};
use crate::splitter::Splitter;
use crate::tree::Tree;

/// How the batch builder picks the splitter of an inner node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum SplitStrategy {
    /// A random unused attribute; numeric thresholds come from a random record.
    #[default]
    Random,
    /// A random set (value 1) attribute of a random record, for 0/1 data.
    Sparse,
    /// Like [`SplitStrategy::Random`], but numeric splitters remember their
    /// source record for leave-one-out prediction.
    InstanceTagged,
}

/// Configuration for a single random tree.
///
/// Construct via [`TreeConfig::new`], then chain `with_*` methods.
///
/// # Defaults
///
/// | Parameter        | Default  |
/// |------------------|----------|
/// | `max_depth`      | 10       |
/// | `min_split_size` | 2        |
/// | `split_strategy` | `Random` |
/// | `seed`           | 42       |
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TreeConfig {
    pub(crate) max_depth: usize,
    pub(crate) min_split_size: usize,
    pub(crate) split_strategy: SplitStrategy,
    pub(crate) seed: u64,
}

impl TreeConfig {
    /// Create a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_depth: 10,
            min_split_size: 2,
            split_strategy: SplitStrategy::Random,
            seed: 42,
        }
    }

    // --- Setters ---

    /// Set the maximum depth. Depth 0 always yields a single leaf.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Nodes with at most this many records become leaves.
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

    // --- Getters ---

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

    /// Build one tree over the full dataset.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---|---|
    /// | [`ForestError::EmptyDataset`] | `dataset` has no records |
    /// | [`ForestError::AttributeOutOfRange`] | a collector targets an unknown attribute |
    /// | [`ForestError::InvalidTarget`] | a collector target has the wrong kind |
    /// | [`ForestError::UnsupportedCollector`] | a label collector has no labels |
    #[instrument(skip_all, fields(n_records = dataset.len()))]
    pub fn fit(&self, dataset: &Dataset, collectors: &CollectorSchema) -> Result<Tree, ForestError> {
        validate_training_input(dataset, collectors)?;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        Ok(TreeBuilder::new(dataset, collectors, self).build(&mut rng))
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks shared by every batch training entry point.
pub(crate) fn validate_training_input(
    dataset: &Dataset,
    collectors: &CollectorSchema,
) -> Result<(), ForestError> {
    if dataset.is_empty() {
        return Err(ForestError::EmptyDataset);
    }
    collectors.validate(dataset.schema())
}

/// Restricted attributes plus every attribute a collector predicts, ascending.
pub(crate) fn target_attributes(schema: &Schema, collectors: &CollectorSchema) -> Vec<AttributeId> {
    let mut targets = schema.restricted_attributes();
    targets.extend(collectors.target_attributes());
    targets.sort_unstable();
    targets.dedup();
    targets
}

/// One record reaching a node, with its effective weight there.
type Item = (usize, f64);

/// Recursive builder over a borrowed dataset.
///
/// Holds no randomness itself; every [`TreeBuilder::build`] call consumes
/// draws from the RNG it is given, so successive builds differ.
#[derive(Debug)]
pub(crate) struct TreeBuilder<'a> {
    records: &'a [FeatureRecord],
    schema: &'a Schema,
    collectors: &'a CollectorSchema,
    max_depth: usize,
    min_split_size: usize,
    strategy: SplitStrategy,
    /// Probability of trying a label splitter first; `None` disables label splits.
    label_fraction: Option<f64>,
    free: Vec<AttributeId>,
    labels: Vec<AttributeId>,
}

impl<'a> TreeBuilder<'a> {
    pub(crate) fn new(dataset: &'a Dataset, collectors: &'a CollectorSchema, config: &TreeConfig) -> Self {
        let schema = dataset.schema();
        let targets = target_attributes(schema, collectors);
        let free = schema
            .attributes()
            .iter()
            .map(|a| a.id())
            .filter(|id| targets.binary_search(id).is_err())
            .collect();
        Self {
            records: dataset.records(),
            schema,
            collectors,
            max_depth: config.max_depth,
            min_split_size: config.min_split_size,
            strategy: config.split_strategy,
            label_fraction: None,
            free,
            labels: Vec::new(),
        }
    }

    /// Allow splits on binary target labels, tried first with probability `fraction`.
    pub(crate) fn with_label_splits(mut self, fraction: f64) -> Self {
        self.labels = self
            .collectors
            .target_attributes()
            .into_iter()
            .filter(|&id| self.schema.is_binary(id))
            .collect();
        self.label_fraction = Some(fraction);
        self
    }

    pub(crate) fn build(&self, rng: &mut ChaCha8Rng) -> Tree {
        let items: Vec<Item> = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (i, r.weight()))
            .collect();
        let mut arena = Vec::new();
        let mut path = Vec::new();
        self.build_node(&items, 0, None, &mut path, &mut arena, rng);
        let tree = Tree::from_arena(arena, self.collectors.clone());
        debug!(
            n_nodes = tree.n_nodes(),
            n_leaves = tree.n_leaves(),
            depth = tree.depth(),
            "tree built"
        );
        tree
    }

    /// Build the subtree for `items` and return its arena index.
    ///
    /// `path` holds the non-numeric attributes tested between the root and
    /// this node; they are not tested again below it.
    fn build_node(
        &self,
        items: &[Item],
        depth: usize,
        parent: Option<NodeIndex>,
        path: &mut Vec<AttributeId>,
        arena: &mut Vec<Node>,
        rng: &mut ChaCha8Rng,
    ) -> NodeIndex {
        if depth >= self.max_depth || items.len() <= self.min_split_size {
            return self.push_leaf(items, parent, arena);
        }
        let Some(splitter) = self.choose_splitter(items, path, rng) else {
            return self.push_leaf(items, parent, arena);
        };

        let n_children = splitter.n_children();
        let mut partitions: Vec<Vec<Item>> = vec![Vec::new(); n_children];
        for &(i, weight) in items {
            match splitter.determine_child(&self.records[i]) {
                Some(child) => partitions[child].push((i, weight)),
                None => {
                    let share = weight / n_children as f64;
                    for part in &mut partitions {
                        part.push((i, share));
                    }
                }
            }
        }

        // Reserve the slot so children can refer to it, then overwrite.
        let index = NodeIndex::new(arena.len());
        arena.push(Node::Leaf {
            collectors: Vec::new(),
            parent,
        });

        let remembered = !matches!(
            splitter,
            Splitter::Numeric { .. } | Splitter::InstanceTagged { .. }
        );
        if remembered {
            path.push(splitter.attribute());
        }
        let children = partitions
            .iter()
            .map(|part| self.build_node(part, depth + 1, Some(index), path, arena, rng))
            .collect();
        if remembered {
            path.pop();
        }

        arena[index.index()] = Node::Inner {
            splitter,
            children,
            parent,
        };
        index
    }

    fn push_leaf(&self, items: &[Item], parent: Option<NodeIndex>, arena: &mut Vec<Node>) -> NodeIndex {
        let mut collectors = self.collectors.new_collectors();
        for &(i, weight) in items {
            for collector in &mut collectors {
                collector.add_weighted(&self.records[i], weight);
            }
        }
        let index = NodeIndex::new(arena.len());
        arena.push(Node::Leaf { collectors, parent });
        index
    }

    fn choose_splitter(
        &self,
        items: &[Item],
        path: &[AttributeId],
        rng: &mut ChaCha8Rng,
    ) -> Option<Splitter> {
        match self.label_fraction {
            None => self.feature_splitter(items, path, rng),
            Some(fraction) => {
                if rng.r#gen::<f64>() < fraction {
                    self.label_splitter(items, path, rng)
                        .or_else(|| self.feature_splitter(items, path, rng))
                } else {
                    self.feature_splitter(items, path, rng)
                        .or_else(|| self.label_splitter(items, path, rng))
                }
            }
        }
    }

    fn feature_splitter(
        &self,
        items: &[Item],
        path: &[AttributeId],
        rng: &mut ChaCha8Rng,
    ) -> Option<Splitter> {
        let candidates: Vec<AttributeId> = self
            .free
            .iter()
            .copied()
            .filter(|id| !path.contains(id))
            .collect();
        match self.strategy {
            SplitStrategy::Sparse => {
                let attribute = self.pick_set_attribute(&candidates, items, rng)?;
                Some(Splitter::Sparse { attribute })
            }
            SplitStrategy::Random | SplitStrategy::InstanceTagged => {
                self.random_splitter(&candidates, items, rng)
            }
        }
    }

    fn label_splitter(
        &self,
        items: &[Item],
        path: &[AttributeId],
        rng: &mut ChaCha8Rng,
    ) -> Option<Splitter> {
        let candidates: Vec<AttributeId> = self
            .labels
            .iter()
            .copied()
            .filter(|id| !path.contains(id))
            .collect();
        let attribute = self.pick_set_attribute(&candidates, items, rng)?;
        Some(Splitter::Label {
            attribute,
            n_children: 2,
            active: true,
        })
    }

    /// Scan candidates cyclically from a random start and return the first
    /// that yields a working splitter.
    fn random_splitter(
        &self,
        candidates: &[AttributeId],
        items: &[Item],
        rng: &mut ChaCha8Rng,
    ) -> Option<Splitter> {
        if candidates.is_empty() {
            return None;
        }
        let start = rng.gen_range(0..candidates.len());
        for offset in 0..candidates.len() {
            let attribute = candidates[(start + offset) % candidates.len()];
            let Some(meta) = self.schema.get(attribute) else {
                continue;
            };
            if let Some(cardinality) = meta.cardinality() {
                if cardinality >= 2 {
                    return Some(Splitter::FullNominal {
                        attribute,
                        n_children: cardinality,
                    });
                }
                continue;
            }
            if let Some((source, threshold)) = self.sample_threshold(attribute, items, rng) {
                return Some(match self.strategy {
                    SplitStrategy::InstanceTagged => Splitter::InstanceTagged {
                        attribute,
                        threshold,
                        source,
                    },
                    SplitStrategy::Random | SplitStrategy::Sparse => Splitter::Numeric {
                        attribute,
                        threshold,
                    },
                });
            }
        }
        None
    }

    /// Value of `attribute` in a random record of `items`, skipping records
    /// where it is missing. Returns the record index with the value.
    fn sample_threshold(
        &self,
        attribute: AttributeId,
        items: &[Item],
        rng: &mut ChaCha8Rng,
    ) -> Option<(usize, f64)> {
        if items.is_empty() {
            return None;
        }
        let start = rng.gen_range(0..items.len());
        (0..items.len()).find_map(|offset| {
            let (i, _) = items[(start + offset) % items.len()];
            self.records[i].value(attribute).map(|v| (i, v))
        })
    }

    /// Starting at a random record, find the first record with at least one
    /// candidate attribute set to 1 and pick one of those uniformly.
    fn pick_set_attribute(
        &self,
        candidates: &[AttributeId],
        items: &[Item],
        rng: &mut ChaCha8Rng,
    ) -> Option<AttributeId> {
        if candidates.is_empty() || items.is_empty() {
            return None;
        }
        let start = rng.gen_range(0..items.len());
        for offset in 0..items.len() {
            let (i, _) = items[(start + offset) % items.len()];
            let record = &self.records[i];
            let set: Vec<AttributeId> = candidates
                .iter()
                .copied()
                .filter(|&id| record.value(id) == Some(1.0))
                .collect();
            if !set.is_empty() {
                return Some(set[rng.gen_range(0..set.len())]);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectorSpec;
    use grove_data::Attribute;

    fn attr(i: usize) -> AttributeId {
        AttributeId::new(i)
    }

    /// Two numeric features, one nominal feature, class target at 3.
    fn mixed_dataset() -> Dataset {
        let schema = Schema::new(vec![
            Attribute::numeric("x"),
            Attribute::numeric("y"),
            Attribute::nominal("colour", ["red", "green", "blue"]),
            Attribute::nominal("class", ["a", "b"]),
        ])
        .restrict(&[attr(3)])
        .unwrap();
        let records = (0..40)
            .map(|i| {
                let x = f64::from(i) / 4.0;
                let y = if i % 7 == 0 { None } else { Some(f64::from(i % 5)) };
                let colour = f64::from(i % 3);
                let class = if x > 5.0 { 1.0 } else { 0.0 };
                FeatureRecord::new(vec![Some(x), y, Some(colour), Some(class)])
            })
            .collect();
        Dataset::new(schema, records).unwrap()
    }

    fn class_schema() -> CollectorSchema {
        CollectorSchema::new(vec![CollectorSpec::Classification { target: attr(3) }]).unwrap()
    }

    fn leaf_weight(tree: &Tree) -> f64 {
        tree.nodes()
            .iter()
            .filter_map(Node::collectors)
            .map(|c| c[0].instance_count())
            .sum()
    }

    #[test]
    fn depth_zero_is_single_leaf() {
        let data = mixed_dataset();
        let tree = TreeConfig::new().with_max_depth(0).fit(&data, &class_schema()).unwrap();
        assert_eq!(tree.n_nodes(), 1);
        assert!(tree.nodes()[0].is_leaf());
        assert!((leaf_weight(&tree) - 40.0).abs() < 1e-9);
    }

    #[test]
    fn leaves_account_for_every_record() {
        let data = mixed_dataset();
        let tree = TreeConfig::new().fit(&data, &class_schema()).unwrap();
        assert!(tree.n_nodes() > 1);
        assert!((leaf_weight(&tree) - 40.0).abs() < 1e-9);
    }

    #[test]
    fn same_seed_same_tree() {
        let data = mixed_dataset();
        let a = TreeConfig::new().with_seed(5).fit(&data, &class_schema()).unwrap();
        let b = TreeConfig::new().with_seed(5).fit(&data, &class_schema()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn targets_and_repeated_nominals_are_never_split() {
        let data = mixed_dataset();
        let tree = TreeConfig::new().with_max_depth(8).fit(&data, &class_schema()).unwrap();

        let mut stack = vec![(NodeIndex::ROOT, Vec::<AttributeId>::new())];
        while let Some((at, mut seen)) = stack.pop() {
            if let Node::Inner {
                splitter, children, ..
            } = &tree.nodes()[at.index()]
            {
                assert_ne!(splitter.attribute(), attr(3));
                if let Splitter::FullNominal { attribute, .. } = splitter {
                    assert!(!seen.contains(attribute), "nominal retested on a path");
                    seen.push(*attribute);
                }
                for &child in children {
                    stack.push((child, seen.clone()));
                }
            }
        }
    }

    #[test]
    fn sparse_strategy_splits_on_set_attributes() {
        let schema = Schema::new(vec![
            Attribute::binary("w0"),
            Attribute::binary("w1"),
            Attribute::binary("w2"),
            Attribute::nominal("class", ["a", "b"]),
        ]);
        let records = (0..12)
            .map(|i| {
                let w0 = f64::from(i % 2);
                let w1 = f64::from(u8::from(i % 3 == 0));
                FeatureRecord::from_values(&[w0, w1, 0.0, w0])
            })
            .collect();
        let data = Dataset::new(schema, records).unwrap();
        let tree = TreeConfig::new()
            .with_split_strategy(SplitStrategy::Sparse)
            .fit(&data, &class_schema())
            .unwrap();
        for splitter in tree.nodes().iter().filter_map(Node::splitter) {
            assert!(matches!(splitter, Splitter::Sparse { .. }));
            // w2 is never set, the target is excluded.
            assert!(splitter.attribute() == attr(0) || splitter.attribute() == attr(1));
        }
        assert!(tree.n_nodes() > 1);
    }

    #[test]
    fn tagged_splitters_point_at_their_source_record() {
        let data = mixed_dataset();
        let tree = TreeConfig::new()
            .with_split_strategy(SplitStrategy::InstanceTagged)
            .fit(&data, &class_schema())
            .unwrap();
        let mut tagged = 0;
        for splitter in tree.nodes().iter().filter_map(Node::splitter) {
            if let Splitter::InstanceTagged {
                attribute,
                threshold,
                source,
            } = splitter
            {
                tagged += 1;
                assert_eq!(data.records()[*source].value(*attribute), Some(*threshold));
            }
        }
        assert!(tagged > 0);
    }

    #[test]
    fn label_splits_use_binary_targets() {
        let schema = Schema::new(vec![
            Attribute::numeric("x"),
            Attribute::binary("l0"),
            Attribute::binary("l1"),
        ]);
        let records = (0..30)
            .map(|i| {
                let x = f64::from(i);
                FeatureRecord::from_values(&[x, f64::from(i % 2), f64::from(u8::from(i > 15))])
            })
            .collect();
        let data = Dataset::new(schema, records).unwrap();
        let collectors = CollectorSchema::new(vec![CollectorSpec::ProbabilityMultilabel {
            labels: vec![attr(1), attr(2)],
        }])
        .unwrap();
        let config = TreeConfig::new();
        let builder = TreeBuilder::new(&data, &collectors, &config).with_label_splits(1.0);
        let tree = builder.build(&mut ChaCha8Rng::seed_from_u64(3));
        let labels = tree.label_dependencies();
        assert!(!labels.is_empty());
        assert!(labels.iter().all(|&l| l == attr(1) || l == attr(2)));
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let schema = Schema::new(vec![Attribute::numeric("x"), Attribute::nominal("class", ["a", "b"])]);
        let data = Dataset::new(schema, Vec::new()).unwrap();
        let collectors =
            CollectorSchema::new(vec![CollectorSpec::Classification { target: attr(1) }]).unwrap();
        let err = TreeConfig::new().fit(&data, &collectors).unwrap_err();
        assert!(matches!(err, ForestError::EmptyDataset));
    }
}
