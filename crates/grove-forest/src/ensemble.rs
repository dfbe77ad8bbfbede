//! Batch ensembles of random trees sharing one collector schema.

use grove_data::{AttributeId, FeatureRecord, Schema};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::iter::{IntoParallelIterator, IntoParallelRefIterator, ParallelIterator};

use crate::ForestError;
use crate::collector::{Collector, CollectorSchema, Combination, combine_slots};
use crate::tree::Tree;

/// How the trees of an ensemble are grown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum TrainingMode {
    /// One RNG threaded through every build, in order.
    #[default]
    Sequential,
    /// One seed per tree drawn from the master RNG; trees grown with rayon.
    Parallel,
}

/// A fitted ensemble of batch trees.
///
/// Every tree is built from the full training set; trees differ only in the
/// random draws their builds consumed.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Ensemble {
    pub(crate) trees: Vec<Tree>,
    pub(crate) schema: Schema,
    pub(crate) collectors: CollectorSchema,
    pub(crate) targets: Vec<AttributeId>,
}

impl Ensemble {
    #[must_use]
    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Attribute metadata of the training data.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub fn collector_schema(&self) -> &CollectorSchema {
        &self.collectors
    }

    /// Attributes hidden from the trees at prediction time.
    #[must_use]
    pub fn targets(&self) -> &[AttributeId] {
        &self.targets
    }

    /// Predict every collector slot for one record.
    ///
    /// Target attributes are masked on a copy of `record`; every tree is
    /// queried and the outputs are combined with [`Combination::Merge`].
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
    /// Returns the first error from [`Ensemble::predict`].
    pub fn predict_batch(
        &self,
        records: &[FeatureRecord],
    ) -> Result<Vec<Vec<Collector>>, ForestError> {
        records.par_iter().map(|r| self.predict(r)).collect()
    }
}

/// Reject records whose length differs from the training schema.
pub(crate) fn check_record_length(schema: &Schema, record: &FeatureRecord) -> Result<(), ForestError> {
    if record.len() != schema.len() {
        return Err(ForestError::RecordLengthMismatch {
            expected: schema.len(),
            got: record.len(),
        });
    }
    Ok(())
}

/// Grow `n_trees` trees with `build`, drawing randomness from `rng`.
///
/// Sequential mode hands `rng` itself to every build in turn. Parallel mode
/// first draws one seed per tree, so results depend only on the seed.
pub(crate) fn grow_trees<T, F>(
    n_trees: usize,
    mode: TrainingMode,
    rng: &mut ChaCha8Rng,
    build: F,
) -> Vec<T>
where
    T: Send,
    F: Fn(&mut ChaCha8Rng) -> T + Sync,
{
    match mode {
        TrainingMode::Sequential => (0..n_trees).map(|_| build(rng)).collect(),
        TrainingMode::Parallel => {
            let seeds: Vec<u64> = (0..n_trees).map(|_| rng.r#gen()).collect();
            seeds
                .into_par_iter()
                .map(|seed| build(&mut ChaCha8Rng::seed_from_u64(seed)))
                .collect()
        }
    }
}
