//! Feature records: one value slot per attribute plus a weight.

use crate::AttributeId;

/// A single weighted observation.
///
/// Values are stored per attribute position; `None` marks a missing value.
/// Nominal values are stored as their integral code.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FeatureRecord {
    values: Vec<Option<f64>>,
    weight: f64,
}

impl FeatureRecord {
    /// Create a record with weight 1.0.
    #[must_use]
    pub fn new(values: Vec<Option<f64>>) -> Self {
        Self {
            values,
            weight: 1.0,
        }
    }

    /// Create a record where every value is present.
    #[must_use]
    pub fn from_values(values: &[f64]) -> Self {
        Self::new(values.iter().copied().map(Some).collect())
    }

    /// Create a record with every value missing.
    #[must_use]
    pub fn missing(len: usize) -> Self {
        Self::new(vec![None; len])
    }

    /// Set the weight, returning the record.
    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Value of an attribute, `None` when missing or out of range.
    #[must_use]
    pub fn value(&self, id: AttributeId) -> Option<f64> {
        self.values.get(id.index()).copied().flatten()
    }

    /// Whether the attribute is missing. Out-of-range ids count as missing.
    #[must_use]
    pub fn is_missing(&self, id: AttributeId) -> bool {
        self.value(id).is_none()
    }

    /// Overwrite the value of an attribute.
    ///
    /// # Panics
    ///
    /// Panics if `id` is outside the record.
    pub fn set_value(&mut self, id: AttributeId, value: f64) {
        self.values[id.index()] = Some(value);
    }

    /// Mark an attribute as missing.
    ///
    /// # Panics
    ///
    /// Panics if `id` is outside the record.
    pub fn set_missing(&mut self, id: AttributeId) {
        self.values[id.index()] = None;
    }

    #[must_use]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }

    /// Number of value slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    /// Copy of this record with the given attributes set missing.
    #[must_use]
    pub fn masked(&self, ids: &[AttributeId]) -> Self {
        let mut copy = self.clone();
        for &id in ids {
            if let Some(slot) = copy.values.get_mut(id.index()) {
                *slot = None;
            }
        }
        copy
    }
}
