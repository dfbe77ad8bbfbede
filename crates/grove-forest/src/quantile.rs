//! Online quantile estimate backing the numeric splitter of online trees.

use grove_data::AttributeId;
use rand::Rng;

use crate::ForestError;

/// Bounded, ascending sample of one numeric attribute with a derived threshold.
///
/// The threshold is the sample value at position `floor(quantile * len)`
/// (clamped to the last element). With interpolation enabled and an even
/// sample size, it is interpolated between the two values around that
/// position. An empty sample has threshold `0.0`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QuantileSplitter {
    attribute: AttributeId,
    quantile: f64,
    max_values: usize,
    concept_drift: bool,
    interpolate: bool,
    sample: Vec<f64>,
    threshold: f64,
}

impl QuantileSplitter {
    /// Create an empty splitter on `attribute`.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::InvalidQuantile`] | `quantile` is outside [0, 1] or NaN |
    /// | [`ForestError::InvalidMaxValues`] | `max_values` is zero |
    pub fn new(attribute: AttributeId, quantile: f64, max_values: usize) -> Result<Self, ForestError> {
        if !(0.0..=1.0).contains(&quantile) {
            return Err(ForestError::InvalidQuantile { quantile });
        }
        if max_values == 0 {
            return Err(ForestError::InvalidMaxValues { max_values });
        }
        Ok(Self::from_parts(attribute, quantile, max_values, false, false))
    }

    /// Construct from already validated parts.
    pub(crate) fn from_parts(
        attribute: AttributeId,
        quantile: f64,
        max_values: usize,
        concept_drift: bool,
        interpolate: bool,
    ) -> Self {
        Self {
            attribute,
            quantile,
            max_values,
            concept_drift,
            interpolate,
            sample: Vec::with_capacity(max_values),
            threshold: 0.0,
        }
    }

    /// Replace a random sampled value once the sample is full.
    #[must_use]
    pub fn with_concept_drift(mut self, concept_drift: bool) -> Self {
        self.concept_drift = concept_drift;
        self
    }

    /// Interpolate between neighbours when the sample size is even.
    #[must_use]
    pub fn with_interpolation(mut self, interpolate: bool) -> Self {
        self.interpolate = interpolate;
        self
    }

    #[must_use]
    pub fn attribute(&self) -> AttributeId {
        self.attribute
    }

    #[must_use]
    pub fn quantile(&self) -> f64 {
        self.quantile
    }

    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Current sample in ascending order.
    #[must_use]
    pub fn sample(&self) -> &[f64] {
        &self.sample
    }

    /// Feed one observed value.
    ///
    /// While the sample has room the value is inserted in order. Once full,
    /// the value is ignored unless concept drift is enabled, in which case a
    /// uniformly chosen sampled value is evicted first.
    pub fn update(&mut self, value: f64, rng: &mut impl Rng) {
        if self.sample.len() < self.max_values {
            self.insert(value);
        } else if self.concept_drift {
            let evict = rng.gen_range(0..self.sample.len());
            self.sample.remove(evict);
            self.insert(value);
        } else {
            return;
        }
        self.recompute();
    }

    /// Absorb the sample of another splitter on the same attribute and quantile.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::IncompatibleSplitters`] when attribute or quantile differ.
    pub fn merge(&mut self, other: &QuantileSplitter) -> Result<(), ForestError> {
        if self.attribute != other.attribute {
            return Err(ForestError::IncompatibleSplitters {
                reason: format!(
                    "quantile splitters on attributes {} and {}",
                    self.attribute, other.attribute
                ),
            });
        }
        if (self.quantile - other.quantile).abs() > f64::EPSILON {
            return Err(ForestError::IncompatibleSplitters {
                reason: format!(
                    "quantile splitters with quantiles {} and {}",
                    self.quantile, other.quantile
                ),
            });
        }
        self.sample.extend_from_slice(&other.sample);
        self.sample.sort_by(f64::total_cmp);
        self.recompute();
        Ok(())
    }

    fn insert(&mut self, value: f64) {
        let at = self.sample.partition_point(|&v| v <= value);
        self.sample.insert(at, value);
    }

    fn recompute(&mut self) {
        let n = self.sample.len();
        if n == 0 {
            self.threshold = 0.0;
            return;
        }
        let pos = ((n as f64 * self.quantile) as usize).min(n - 1);
        self.threshold = if self.interpolate && n % 2 == 0 {
            let lower = ((n as f64 * self.quantile) as usize).saturating_sub(1).min(n - 1);
            let upper = (lower + 1).min(n - 1);
            let (lo, hi) = (self.sample[lower], self.sample[upper]);
            (hi - lo) * self.quantile + lo
        } else {
            self.sample[pos]
        };
    }
}
