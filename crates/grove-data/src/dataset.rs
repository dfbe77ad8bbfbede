use crate::{AttributeId, AttributeKind, DataError, FeatureRecord, Schema};

/// A validated collection of records sharing one [`Schema`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Dataset {
    schema: Schema,
    records: Vec<FeatureRecord>,
}

impl Dataset {
    /// Validate `records` against `schema` and wrap them.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`DataError::RecordLengthMismatch`] | record length differs from the schema |
    /// | [`DataError::NonFiniteRecordValue`] | a numeric value is NaN or infinite |
    /// | [`DataError::InvalidNominalValue`] | a nominal value is fractional, negative or too large |
    /// | [`DataError::InvalidWeight`] | a weight is negative or not finite |
    pub fn new(schema: Schema, records: Vec<FeatureRecord>) -> Result<Self, DataError> {
        for (record_index, record) in records.iter().enumerate() {
            validate_record(&schema, record, record_index)?;
        }
        Ok(Self { schema, records })
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub fn records(&self) -> &[FeatureRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Ids of attributes available for ordinary splits.
    #[must_use]
    pub fn free_attributes(&self) -> Vec<AttributeId> {
        self.schema.free_attributes()
    }

    /// Ids of prediction targets.
    #[must_use]
    pub fn restricted_attributes(&self) -> Vec<AttributeId> {
        self.schema.restricted_attributes()
    }

    /// Split into schema and records.
    #[must_use]
    pub fn into_parts(self) -> (Schema, Vec<FeatureRecord>) {
        (self.schema, self.records)
    }

    /// Dataset over the records whose position satisfies `keep`.
    #[must_use]
    pub fn filter_by_index(&self, mut keep: impl FnMut(usize) -> bool) -> Self {
        let records = self
            .records
            .iter()
            .enumerate()
            .filter(|(i, _)| keep(*i))
            .map(|(_, r)| r.clone())
            .collect();
        Self {
            schema: self.schema.clone(),
            records,
        }
    }
}

/// Check a single record against a schema.
///
/// # Errors
///
/// See [`Dataset::new`].
pub fn validate_record(
    schema: &Schema,
    record: &FeatureRecord,
    record_index: usize,
) -> Result<(), DataError> {
    if record.len() != schema.len() {
        return Err(DataError::RecordLengthMismatch {
            record_index,
            expected: schema.len(),
            got: record.len(),
        });
    }
    let weight = record.weight();
    if !weight.is_finite() || weight < 0.0 {
        return Err(DataError::InvalidWeight {
            record_index,
            weight,
        });
    }
    for attr in schema.attributes() {
        let Some(value) = record.value(attr.id()) else {
            continue;
        };
        match attr.kind() {
            AttributeKind::Numeric => {
                if !value.is_finite() {
                    return Err(DataError::NonFiniteRecordValue {
                        record_index,
                        attribute: attr.id().index(),
                    });
                }
            }
            AttributeKind::Nominal { values } => {
                let valid = value.is_finite()
                    && value >= 0.0
                    && value.fract() == 0.0
                    && (value as usize) < values.len();
                if !valid {
                    return Err(DataError::InvalidNominalValue {
                        record_index,
                        attribute: attr.id().index(),
                        value,
                        cardinality: values.len(),
                    });
                }
            }
        }
    }
    Ok(())
}
