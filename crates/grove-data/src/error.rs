//! Error types for grove-data.

use std::path::PathBuf;

/// Errors from schema construction, record validation and CSV loading.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    /// Returned when the input file does not exist or is unreadable.
    #[error("file not found: {path}")]
    FileNotFound {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when the CSV parser encounters a malformed record.
    #[error("CSV parse error in {path} at byte offset {offset}")]
    CsvParse {
        /// Path to the CSV file.
        path: PathBuf,
        /// Byte offset where the error occurred.
        offset: u64,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// Returned when the CSV file contains a header but zero data rows.
    #[error("empty dataset (no data rows) in {path}")]
    EmptyDataset {
        /// Path to the CSV file.
        path: PathBuf,
    },

    /// Returned when a data row has a different number of columns than the header.
    #[error("inconsistent row length in {path}: row {row_index} has {got} columns, expected {expected}")]
    InconsistentRowLength {
        /// Path to the CSV file.
        path: PathBuf,
        /// Zero-based row index (excluding header).
        row_index: usize,
        /// Expected number of columns (from header).
        expected: usize,
        /// Actual number of columns in this row.
        got: usize,
    },

    /// Returned when a numeric cell is NaN, Inf, or not a float at all.
    #[error("non-finite value in {path}: row {row_index}, column \"{column}\", raw value \"{raw}\"")]
    NonFiniteValue {
        /// Path to the CSV file.
        path: PathBuf,
        /// Zero-based row index (excluding header).
        row_index: usize,
        /// Column name.
        column: String,
        /// The raw string value that failed to parse.
        raw: String,
    },

    /// Returned when a nominal cell holds a value the schema does not know.
    #[error("unknown nominal value \"{raw}\" for column \"{column}\" in {path}, row {row_index}")]
    UnknownNominalValue {
        /// Path to the CSV file.
        path: PathBuf,
        /// Zero-based row index (excluding header).
        row_index: usize,
        /// Column name.
        column: String,
        /// The unrecognised value.
        raw: String,
    },

    /// Returned when a column named in the reader options is absent from the header.
    #[error("unknown column \"{column}\" in {path}")]
    UnknownColumn {
        /// Path to the CSV file.
        path: PathBuf,
        /// The column name that was requested.
        column: String,
    },

    /// Returned when a file header does not match the schema it is read against.
    #[error("header mismatch in {path}: expected {expected:?}, found {found:?}")]
    HeaderMismatch {
        /// Path to the CSV file.
        path: PathBuf,
        /// Column names in schema order.
        expected: Vec<String>,
        /// Column names found in the file.
        found: Vec<String>,
    },

    /// Returned when an attribute id is outside the schema.
    #[error("attribute {attribute} is out of range for a schema of {n_attributes} attributes")]
    AttributeOutOfRange {
        /// The offending attribute index.
        attribute: usize,
        /// Number of attributes in the schema.
        n_attributes: usize,
    },

    /// Returned when a record carries a different number of values than the schema.
    #[error("record {record_index} has {got} values, expected {expected}")]
    RecordLengthMismatch {
        /// The zero-based index of the offending record.
        record_index: usize,
        /// Number of attributes in the schema.
        expected: usize,
        /// Number of values in the record.
        got: usize,
    },

    /// Returned when a numeric value in a record is NaN or infinite.
    #[error("record {record_index} has a non-finite value for attribute {attribute}")]
    NonFiniteRecordValue {
        /// The zero-based index of the offending record.
        record_index: usize,
        /// The attribute holding the value.
        attribute: usize,
    },

    /// Returned when a nominal value is fractional, negative or not below the cardinality.
    #[error("record {record_index} has value {value} for nominal attribute {attribute} with {cardinality} values")]
    InvalidNominalValue {
        /// The zero-based index of the offending record.
        record_index: usize,
        /// The attribute holding the value.
        attribute: usize,
        /// The offending value.
        value: f64,
        /// Number of values the attribute admits.
        cardinality: usize,
    },

    /// Returned when a record weight is negative or not finite.
    #[error("record {record_index} has invalid weight {weight}")]
    InvalidWeight {
        /// The zero-based index of the offending record.
        record_index: usize,
        /// The offending weight.
        weight: f64,
    },
}
