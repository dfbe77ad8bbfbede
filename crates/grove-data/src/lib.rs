//! Attribute schema, weighted feature records and CSV loading.
//!
//! Records store one optional value per attribute (nominal values as their
//! integral code) and a weight used for fractional routing through trees.

mod attribute;
mod dataset;
mod error;
mod reader;
mod record;

pub use attribute::{Attribute, AttributeId, AttributeKind, Schema};
pub use dataset::{Dataset, validate_record};
pub use error::DataError;
pub use reader::DatasetReader;
pub use record::FeatureRecord;
