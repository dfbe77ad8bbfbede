//! Label-powerset keys: a whole label assignment encoded as one class.

use grove_data::{AttributeId, FeatureRecord};

/// Packed bit-set of a binary label assignment.
///
/// Bit `i` is set when label `i` is positive. Missing labels count as
/// negative. The encoding is injective for a fixed label list, so decoding
/// needs no lookup table.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
pub struct LabelCombination(Vec<u64>);

impl LabelCombination {
    /// Encode the labels of `record`, in the order of `labels`.
    #[must_use]
    pub fn from_record(record: &FeatureRecord, labels: &[AttributeId]) -> Self {
        Self::from_flags(labels.iter().map(|&l| record.value(l).is_some_and(|v| v != 0.0)))
    }

    /// Encode an explicit sequence of label flags.
    pub fn from_flags(flags: impl IntoIterator<Item = bool>) -> Self {
        let mut words: Vec<u64> = Vec::new();
        for (i, set) in flags.into_iter().enumerate() {
            if i % 64 == 0 {
                words.push(0);
            }
            if set {
                words[i / 64] |= 1u64 << (i % 64);
            }
        }
        Self(words)
    }

    /// Whether label `i` is positive.
    #[must_use]
    pub fn contains(&self, i: usize) -> bool {
        self.0.get(i / 64).is_some_and(|w| *w & (1u64 << (i % 64)) != 0)
    }

    /// Decode into `n_labels` values of `0.0` / `1.0`.
    #[must_use]
    pub fn to_values(&self, n_labels: usize) -> Vec<f64> {
        (0..n_labels)
            .map(|i| if self.contains(i) { 1.0 } else { 0.0 })
            .collect()
    }

    /// Number of positive labels.
    #[must_use]
    pub fn n_positive(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_recovers_assignment() {
        let record = FeatureRecord::new(vec![Some(1.0), Some(0.0), None, Some(1.0)]);
        let labels: Vec<_> = (0..4).map(AttributeId::new).collect();
        let key = LabelCombination::from_record(&record, &labels);
        assert_eq!(key.to_values(4), vec![1.0, 0.0, 0.0, 1.0]);
        assert_eq!(key.n_positive(), 2);
    }

    #[test]
    fn distinct_assignments_get_distinct_keys() {
        let a = LabelCombination::from_flags([true, false, true]);
        let b = LabelCombination::from_flags([true, true, false]);
        assert_ne!(a, b);
        assert_eq!(a, LabelCombination::from_flags([true, false, true]));
    }

    #[test]
    fn wide_label_sets_span_words() {
        let flags: Vec<bool> = (0..130).map(|i| i % 64 == 3).collect();
        let key = LabelCombination::from_flags(flags);
        assert!(key.contains(3));
        assert!(key.contains(67));
        assert!(!key.contains(4));
        assert!(!key.contains(129));
        assert_eq!(key.n_positive(), 2);
        assert_eq!(key.to_values(130).len(), 130);
    }
}
