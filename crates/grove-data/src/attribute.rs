//! Attribute metadata and the schema shared by every record of a dataset.

use std::fmt;

use crate::DataError;

/// Zero-based attribute position within a [`Schema`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
pub struct AttributeId(usize);

impl AttributeId {
    /// Create an attribute id from a zero-based column position.
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the zero-based column position.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value domain of an attribute.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AttributeKind {
    /// Real-valued attribute.
    Numeric,
    /// Categorical attribute; a record stores the index into `values`.
    Nominal {
        /// Display names of the admissible values, indexed by code.
        values: Vec<String>,
    },
}

/// A single column of a [`Schema`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Attribute {
    pub(crate) id: AttributeId,
    pub(crate) name: String,
    pub(crate) kind: AttributeKind,
    pub(crate) restricted: bool,
}

impl Attribute {
    /// Create an unrestricted numeric attribute. The id is assigned by [`Schema::new`].
    #[must_use]
    pub fn numeric(name: impl Into<String>) -> Self {
        Self {
            id: AttributeId(0),
            name: name.into(),
            kind: AttributeKind::Numeric,
            restricted: false,
        }
    }

    /// Create an unrestricted nominal attribute with the given value names.
    #[must_use]
    pub fn nominal<S: Into<String>>(name: impl Into<String>, values: impl IntoIterator<Item = S>) -> Self {
        Self {
            id: AttributeId(0),
            name: name.into(),
            kind: AttributeKind::Nominal {
                values: values.into_iter().map(Into::into).collect(),
            },
            restricted: false,
        }
    }

    /// Create a binary `0`/`1` nominal attribute, the usual shape of a label.
    #[must_use]
    pub fn binary(name: impl Into<String>) -> Self {
        Self::nominal(name, ["0", "1"])
    }

    #[must_use]
    pub fn id(&self) -> AttributeId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> &AttributeKind {
        &self.kind
    }

    /// Whether the attribute is a prediction target.
    #[must_use]
    pub fn is_restricted(&self) -> bool {
        self.restricted
    }

    #[must_use]
    pub fn is_nominal(&self) -> bool {
        matches!(self.kind, AttributeKind::Nominal { .. })
    }

    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self.kind, AttributeKind::Numeric)
    }

    /// Number of admissible values of a nominal attribute; `None` for numeric ones.
    #[must_use]
    pub fn cardinality(&self) -> Option<usize> {
        match &self.kind {
            AttributeKind::Nominal { values } => Some(values.len()),
            AttributeKind::Numeric => None,
        }
    }
}

/// Ordered attribute metadata. Attribute ids are positions in this list.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Schema {
    attributes: Vec<Attribute>,
}

impl Schema {
    /// Build a schema, assigning ids by position.
    #[must_use]
    pub fn new(attributes: Vec<Attribute>) -> Self {
        let attributes = attributes
            .into_iter()
            .enumerate()
            .map(|(i, mut attr)| {
                attr.id = AttributeId(i);
                attr
            })
            .collect();
        Self { attributes }
    }

    /// Mark the given attributes as prediction targets.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::AttributeOutOfRange`] if any id is outside the schema.
    pub fn restrict(mut self, ids: &[AttributeId]) -> Result<Self, DataError> {
        for &id in ids {
            self.check(id)?;
        }
        for &id in ids {
            self.attributes[id.0].restricted = true;
        }
        Ok(self)
    }

    /// Return an error unless `id` names an attribute of this schema.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::AttributeOutOfRange`] if `id` is outside the schema.
    pub fn check(&self, id: AttributeId) -> Result<&Attribute, DataError> {
        self.attributes
            .get(id.0)
            .ok_or(DataError::AttributeOutOfRange {
                attribute: id.0,
                n_attributes: self.attributes.len(),
            })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    #[must_use]
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Look up an attribute. Returns `None` when the id is outside the schema.
    #[must_use]
    pub fn get(&self, id: AttributeId) -> Option<&Attribute> {
        self.attributes.get(id.0)
    }

    /// Find an attribute by column name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Ids of attributes available for ordinary splits, ascending.
    #[must_use]
    pub fn free_attributes(&self) -> Vec<AttributeId> {
        self.attributes
            .iter()
            .filter(|a| !a.restricted)
            .map(|a| a.id)
            .collect()
    }

    /// Ids of prediction targets, ascending.
    #[must_use]
    pub fn restricted_attributes(&self) -> Vec<AttributeId> {
        self.attributes
            .iter()
            .filter(|a| a.restricted)
            .map(|a| a.id)
            .collect()
    }

    /// Whether `id` is a nominal attribute with exactly two values.
    #[must_use]
    pub fn is_binary(&self, id: AttributeId) -> bool {
        self.get(id).and_then(Attribute::cardinality) == Some(2)
    }

    /// Column names in schema order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.attributes.iter().map(|a| a.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        Schema::new(vec![
            Attribute::numeric("x"),
            Attribute::nominal("colour", ["red", "green", "blue"]),
            Attribute::binary("label_a"),
            Attribute::binary("label_b"),
        ])
    }

    #[test]
    fn ids_follow_position() {
        let schema = sample_schema();
        for (i, attr) in schema.attributes().iter().enumerate() {
            assert_eq!(attr.id().index(), i);
        }
        assert_eq!(schema.find("colour").unwrap().cardinality(), Some(3));
        assert!(schema.get(AttributeId::new(0)).unwrap().is_numeric());
    }

    #[test]
    fn restrict_splits_free_and_restricted() {
        let schema = sample_schema()
            .restrict(&[AttributeId::new(2), AttributeId::new(3)])
            .unwrap();
        assert_eq!(schema.free_attributes(), vec![AttributeId::new(0), AttributeId::new(1)]);
        assert_eq!(
            schema.restricted_attributes(),
            vec![AttributeId::new(2), AttributeId::new(3)]
        );
        assert!(schema.is_binary(AttributeId::new(2)));
        assert!(!schema.is_binary(AttributeId::new(1)));
    }

    #[test]
    fn restrict_out_of_range_is_rejected() {
        let err = sample_schema().restrict(&[AttributeId::new(9)]).unwrap_err();
        assert!(matches!(
            err,
            DataError::AttributeOutOfRange { attribute: 9, n_attributes: 4 }
        ));
    }
}
