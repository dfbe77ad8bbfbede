//! Decision rules at inner nodes.

use grove_data::{AttributeId, FeatureRecord};
use rand::Rng;

use crate::ForestError;
use crate::quantile::QuantileSplitter;

/// Rule routing a record to one child of an inner node.
///
/// Every variant tests a single attribute. [`Splitter::can_handle`] is false
/// whenever that attribute is missing; the caller then sends the record to
/// every child with its weight divided evenly.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Splitter {
    /// Child 0 when `value <= threshold`, else child 1.
    Numeric {
        /// Tested attribute.
        attribute: AttributeId,
        /// Value taken from a sampled training record.
        threshold: f64,
    },
    /// One child per nominal value.
    FullNominal {
        /// Tested attribute.
        attribute: AttributeId,
        /// Cardinality of the attribute.
        n_children: usize,
    },
    /// Binary attribute chosen from a record's set (value 1) attributes.
    /// Child 1 when the attribute is set, else child 0.
    Sparse {
        /// Tested attribute.
        attribute: AttributeId,
    },
    /// Test on a prediction target, used by chain trees. A disabled label
    /// splitter cannot handle any record.
    Label {
        /// Tested label attribute.
        attribute: AttributeId,
        /// Cardinality of the label.
        n_children: usize,
        /// Whether the test takes part in routing.
        active: bool,
    },
    /// Numeric split remembering which training record supplied its threshold.
    InstanceTagged {
        /// Tested attribute.
        attribute: AttributeId,
        /// Value taken from the source record.
        threshold: f64,
        /// Position of the source record in the training set.
        source: usize,
    },
    /// Online numeric split on a running quantile.
    Quantile(QuantileSplitter),
    /// Online nominal split growing its children on demand. Child 0 is
    /// reserved for missing values and the last child for values not yet
    /// seen; value `v` otherwise goes to child `v + 1`.
    UpdateableNominal {
        /// Tested attribute.
        attribute: AttributeId,
        /// Current number of children.
        n_children: usize,
    },
}

impl Splitter {
    /// The attribute this splitter tests.
    #[must_use]
    pub fn attribute(&self) -> AttributeId {
        match self {
            Splitter::Numeric { attribute, .. }
            | Splitter::FullNominal { attribute, .. }
            | Splitter::Sparse { attribute }
            | Splitter::Label { attribute, .. }
            | Splitter::InstanceTagged { attribute, .. }
            | Splitter::UpdateableNominal { attribute, .. } => *attribute,
            Splitter::Quantile(q) => q.attribute(),
        }
    }

    /// Attributes consumed by this splitter.
    #[must_use]
    pub fn used_attributes(&self) -> Vec<AttributeId> {
        vec![self.attribute()]
    }

    #[must_use]
    pub fn n_children(&self) -> usize {
        match self {
            Splitter::Numeric { .. }
            | Splitter::Sparse { .. }
            | Splitter::InstanceTagged { .. }
            | Splitter::Quantile(_) => 2,
            Splitter::FullNominal { n_children, .. }
            | Splitter::Label { n_children, .. }
            | Splitter::UpdateableNominal { n_children, .. } => *n_children,
        }
    }

    /// Whether the record can be routed to a single child.
    #[must_use]
    pub fn can_handle(&self, record: &FeatureRecord) -> bool {
        self.determine_child(record).is_some()
    }

    /// Child index for the record, `None` exactly when [`Splitter::can_handle`] is false.
    #[must_use]
    pub fn determine_child(&self, record: &FeatureRecord) -> Option<usize> {
        let value = record.value(self.attribute())?;
        match self {
            Splitter::Numeric { threshold, .. } | Splitter::InstanceTagged { threshold, .. } => {
                Some(usize::from(value > *threshold))
            }
            Splitter::Quantile(q) => Some(usize::from(value > q.threshold())),
            Splitter::FullNominal { n_children, .. } => nominal_child(value, *n_children),
            Splitter::Sparse { .. } => Some(usize::from(value == 1.0)),
            Splitter::Label {
                n_children, active, ..
            } => {
                if *active {
                    nominal_child(value, *n_children)
                } else {
                    None
                }
            }
            Splitter::UpdateableNominal { n_children, .. } => {
                if *n_children == 0 {
                    return None;
                }
                let code = value as usize;
                if code + 3 > *n_children {
                    Some(n_children - 1)
                } else {
                    Some(code + 1)
                }
            }
        }
    }

    #[must_use]
    pub fn is_label(&self) -> bool {
        matches!(self, Splitter::Label { .. })
    }

    /// Whether the splitter takes part in routing. Only label splitters can be disabled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        match self {
            Splitter::Label { active, .. } => *active,
            _ => true,
        }
    }

    /// Enable or disable a label splitter. Returns false for other variants.
    pub fn set_active(&mut self, enabled: bool) -> bool {
        match self {
            Splitter::Label { active, .. } => {
                *active = enabled;
                true
            }
            _ => false,
        }
    }

    /// Source record of a leave-one-out tagged splitter.
    #[must_use]
    pub fn source(&self) -> Option<usize> {
        match self {
            Splitter::InstanceTagged { source, .. } => Some(*source),
            _ => None,
        }
    }

    /// Feed one record to an online splitter.
    ///
    /// Returns whether the number of children grew. Quantile splitters never
    /// grow; batch splitters ignore updates.
    pub fn update(&mut self, record: &FeatureRecord, rng: &mut impl Rng) -> bool {
        match self {
            Splitter::Quantile(q) => {
                if let Some(value) = record.value(q.attribute()) {
                    q.update(value, rng);
                }
                false
            }
            Splitter::UpdateableNominal {
                attribute,
                n_children,
            } => match record.value(*attribute) {
                None if *n_children == 0 => {
                    *n_children = 2;
                    true
                }
                None => false,
                Some(value) => {
                    let needed = value as usize + 3;
                    if needed > *n_children {
                        *n_children = needed;
                        true
                    } else {
                        false
                    }
                }
            },
            _ => false,
        }
    }

    /// Merge the state of an online splitter at the same position of another tree.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::IncompatibleSplitters`] when the splitters differ in
    /// kind, attribute or quantile, or are not online splitters.
    pub fn merge(&mut self, other: &Splitter) -> Result<(), ForestError> {
        match (self, other) {
            (Splitter::Quantile(ours), Splitter::Quantile(theirs)) => ours.merge(theirs),
            (
                Splitter::UpdateableNominal {
                    attribute,
                    n_children,
                },
                Splitter::UpdateableNominal {
                    attribute: other_attribute,
                    n_children: other_children,
                },
            ) if attribute == other_attribute => {
                *n_children = (*n_children).max(*other_children);
                Ok(())
            }
            (ours, theirs) => Err(ForestError::IncompatibleSplitters {
                reason: format!(
                    "cannot merge {} on attribute {} with {} on attribute {}",
                    ours.kind_name(),
                    ours.attribute(),
                    theirs.kind_name(),
                    theirs.attribute()
                ),
            }),
        }
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Splitter::Numeric { .. } => "numeric",
            Splitter::FullNominal { .. } => "nominal",
            Splitter::Sparse { .. } => "sparse",
            Splitter::Label { .. } => "label",
            Splitter::InstanceTagged { .. } => "instance-tagged",
            Splitter::Quantile(_) => "quantile",
            Splitter::UpdateableNominal { .. } => "updateable nominal",
        }
    }
}

/// Child for a nominal code, clamped into the available children.
fn nominal_child(value: f64, n_children: usize) -> Option<usize> {
    if n_children == 0 {
        return None;
    }
    Some((value.max(0.0) as usize).min(n_children - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn attr(i: usize) -> AttributeId {
        AttributeId::new(i)
    }

    // --- Routing ---

    #[test]
    fn numeric_routes_by_threshold() {
        let s = Splitter::Numeric {
            attribute: attr(0),
            threshold: 2.0,
        };
        assert_eq!(s.determine_child(&FeatureRecord::from_values(&[2.0])), Some(0));
        assert_eq!(s.determine_child(&FeatureRecord::from_values(&[2.5])), Some(1));
        assert!(!s.can_handle(&FeatureRecord::missing(1)));
    }

    #[test]
    fn full_nominal_routes_by_code() {
        let s = Splitter::FullNominal {
            attribute: attr(1),
            n_children: 3,
        };
        let record = FeatureRecord::from_values(&[0.0, 2.0]);
        assert_eq!(s.determine_child(&record), Some(2));
        assert_eq!(s.n_children(), 3);
    }

    #[test]
    fn sparse_routes_set_attribute_right() {
        let s = Splitter::Sparse { attribute: attr(0) };
        assert_eq!(s.determine_child(&FeatureRecord::from_values(&[1.0])), Some(1));
        assert_eq!(s.determine_child(&FeatureRecord::from_values(&[0.0])), Some(0));
    }

    #[test]
    fn disabled_label_splitter_cannot_handle() {
        let mut s = Splitter::Label {
            attribute: attr(0),
            n_children: 2,
            active: true,
        };
        let record = FeatureRecord::from_values(&[1.0]);
        assert_eq!(s.determine_child(&record), Some(1));
        assert!(s.set_active(false));
        assert!(!s.can_handle(&record));
        assert!(!s.is_active());
    }

    #[test]
    fn set_active_is_noop_for_other_kinds() {
        let mut s = Splitter::Sparse { attribute: attr(0) };
        assert!(!s.set_active(false));
        assert!(s.is_active());
    }

    // --- Updateable nominal ---

    #[test]
    fn updateable_nominal_grows_on_demand() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut s = Splitter::UpdateableNominal {
            attribute: attr(0),
            n_children: 0,
        };
        assert!(!s.can_handle(&FeatureRecord::from_values(&[0.0])));

        assert!(s.update(&FeatureRecord::from_values(&[1.0]), &mut rng));
        assert_eq!(s.n_children(), 4);
        assert_eq!(s.determine_child(&FeatureRecord::from_values(&[1.0])), Some(2));
        assert_eq!(s.determine_child(&FeatureRecord::from_values(&[0.0])), Some(1));
        // Unseen value goes to the overflow child.
        assert_eq!(s.determine_child(&FeatureRecord::from_values(&[5.0])), Some(3));

        assert!(!s.update(&FeatureRecord::from_values(&[0.0]), &mut rng));
        assert!(s.update(&FeatureRecord::from_values(&[4.0]), &mut rng));
        assert_eq!(s.n_children(), 7);
    }

    #[test]
    fn updateable_nominal_missing_first_creates_two_children() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut s = Splitter::UpdateableNominal {
            attribute: attr(0),
            n_children: 0,
        };
        assert!(s.update(&FeatureRecord::missing(1), &mut rng));
        assert_eq!(s.n_children(), 2);
        assert!(!s.update(&FeatureRecord::missing(1), &mut rng));
    }

    // --- Merge ---

    #[test]
    fn merge_takes_larger_nominal_width() {
        let mut a = Splitter::UpdateableNominal {
            attribute: attr(0),
            n_children: 3,
        };
        let b = Splitter::UpdateableNominal {
            attribute: attr(0),
            n_children: 6,
        };
        a.merge(&b).unwrap();
        assert_eq!(a.n_children(), 6);
    }

    #[test]
    fn merge_rejects_mixed_kinds() {
        let mut a = Splitter::UpdateableNominal {
            attribute: attr(0),
            n_children: 3,
        };
        let b = Splitter::Quantile(QuantileSplitter::new(attr(0), 0.5, 4).unwrap());
        let err = a.merge(&b).unwrap_err();
        assert!(matches!(err, ForestError::IncompatibleSplitters { .. }));
    }
}
