//! CSV dataset reader with schema inference and validation.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::{Attribute, AttributeKind, DataError, Dataset, FeatureRecord, Schema};

/// Cell contents treated as a missing value (after trimming).
const MISSING_MARKERS: [&str; 2] = ["", "?"];

/// Reads a [`Dataset`] from a CSV file.
///
/// Expected CSV format:
/// - Header row required, one column per attribute
/// - `?` or an empty cell marks a missing value
/// - Columns whose present cells all parse as floats are numeric unless
///   listed via [`DatasetReader::with_nominal`]; all others are nominal,
///   with codes assigned in first-seen order (numeric order when every
///   value looks like a number)
///
/// # Errors
///
/// | Variant | Condition |
/// |---|---|
/// | [`DataError::FileNotFound`] | File doesn't exist or is unreadable |
/// | [`DataError::CsvParse`] | Malformed CSV record |
/// | [`DataError::EmptyDataset`] | Zero data rows after header |
/// | [`DataError::InconsistentRowLength`] | Row has different column count than header |
/// | [`DataError::UnknownColumn`] | A target or nominal column is not in the header |
/// | [`DataError::HeaderMismatch`] | Header differs from the schema given via `with_schema` |
/// | [`DataError::NonFiniteValue`] | Numeric cell is NaN, Inf, or unparseable |
/// | [`DataError::UnknownNominalValue`] | Nominal cell not present in the given schema |
pub struct DatasetReader {
    path: PathBuf,
    targets: Vec<String>,
    nominal: Vec<String>,
    schema: Option<Schema>,
}

impl DatasetReader {
    /// Create a new reader for the given CSV file path.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            targets: Vec::new(),
            nominal: Vec::new(),
            schema: None,
        }
    }

    /// Mark the named columns as prediction targets.
    #[must_use]
    pub fn with_targets<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.targets = names.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    /// Force the named columns to be nominal even if they look numeric.
    #[must_use]
    pub fn with_nominal<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.nominal = names.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    /// Encode the file against an existing schema instead of inferring one.
    #[must_use]
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Read and validate the CSV file.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn read(&self) -> Result<Dataset, DataError> {
        let file = std::fs::File::open(&self.path).map_err(|e| DataError::FileNotFound {
            path: self.path.clone(),
            source: e,
        })?;

        // flexible(true) lets our own InconsistentRowLength check fire.
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let header: Vec<String> = rdr
            .headers()
            .map_err(|e| self.csv_error(e))?
            .iter()
            .map(String::from)
            .collect();
        debug!(n_columns = header.len(), "read CSV header");

        let mut rows: Vec<csv::StringRecord> = Vec::new();
        for (row_index, result) in rdr.records().enumerate() {
            let row = result.map_err(|e| self.csv_error(e))?;
            if row.len() != header.len() {
                return Err(DataError::InconsistentRowLength {
                    path: self.path.clone(),
                    row_index,
                    expected: header.len(),
                    got: row.len(),
                });
            }
            rows.push(row);
        }

        if rows.is_empty() {
            return Err(DataError::EmptyDataset {
                path: self.path.clone(),
            });
        }

        let schema = match &self.schema {
            Some(schema) => {
                if schema.names() != header {
                    return Err(DataError::HeaderMismatch {
                        path: self.path.clone(),
                        expected: schema.names(),
                        found: header,
                    });
                }
                schema.clone()
            }
            None => self.infer_schema(&header, &rows)?,
        };

        let records = self.encode_rows(&schema, &header, &rows)?;

        let dataset = Dataset::new(schema, records)?;
        info!(
            n_records = dataset.len(),
            n_attributes = dataset.schema().len(),
            n_targets = dataset.restricted_attributes().len(),
            "dataset loaded"
        );
        Ok(dataset)
    }

    fn infer_schema(
        &self,
        header: &[String],
        rows: &[csv::StringRecord],
    ) -> Result<Schema, DataError> {
        for name in self.targets.iter().chain(&self.nominal) {
            if !header.contains(name) {
                return Err(DataError::UnknownColumn {
                    path: self.path.clone(),
                    column: name.clone(),
                });
            }
        }
        let forced: HashSet<&str> = self.nominal.iter().map(String::as_str).collect();

        let attributes = header
            .iter()
            .enumerate()
            .map(|(col, name)| {
                let cells = rows.iter().filter_map(|r| r.get(col)).filter(|c| !is_missing(c));
                let looks_numeric = cells.clone().all(|c| c.parse::<f64>().is_ok());
                if looks_numeric && !forced.contains(name.as_str()) {
                    Attribute::numeric(name.as_str())
                } else {
                    let mut seen: Vec<&str> = Vec::new();
                    for cell in cells {
                        if !seen.contains(&cell) {
                            seen.push(cell);
                        }
                    }
                    // Numeric-looking codes keep their numeric order so "1" stays positive.
                    if seen.iter().all(|c| c.parse::<f64>().is_ok()) {
                        seen.sort_by(|a, b| {
                            let (a, b) = (a.parse::<f64>().unwrap_or(0.0), b.parse::<f64>().unwrap_or(0.0));
                            a.total_cmp(&b)
                        });
                    }
                    Attribute::nominal(name.as_str(), seen)
                }
            })
            .collect();

        let schema = Schema::new(attributes);
        let targets: Vec<_> = self
            .targets
            .iter()
            .filter_map(|name| schema.find(name).map(Attribute::id))
            .collect();
        schema.restrict(&targets)
    }

    fn encode_rows(
        &self,
        schema: &Schema,
        header: &[String],
        rows: &[csv::StringRecord],
    ) -> Result<Vec<FeatureRecord>, DataError> {
        let lookups: Vec<Option<HashMap<&str, usize>>> = schema
            .attributes()
            .iter()
            .map(|attr| match attr.kind() {
                AttributeKind::Nominal { values } => Some(
                    values
                        .iter()
                        .enumerate()
                        .map(|(code, v)| (v.as_str(), code))
                        .collect(),
                ),
                AttributeKind::Numeric => None,
            })
            .collect();

        let mut records = Vec::with_capacity(rows.len());
        for (row_index, row) in rows.iter().enumerate() {
            let mut values = Vec::with_capacity(header.len());
            for (col, cell) in row.iter().enumerate() {
                if is_missing(cell) {
                    values.push(None);
                    continue;
                }
                let value = match &lookups[col] {
                    Some(codes) => {
                        let code = codes.get(cell).copied().ok_or_else(|| {
                            DataError::UnknownNominalValue {
                                path: self.path.clone(),
                                row_index,
                                column: header[col].clone(),
                                raw: cell.to_string(),
                            }
                        })?;
                        code as f64
                    }
                    None => self.parse_numeric(cell, row_index, &header[col])?,
                };
                values.push(Some(value));
            }
            records.push(FeatureRecord::new(values));
        }
        Ok(records)
    }

    fn parse_numeric(&self, cell: &str, row_index: usize, column: &str) -> Result<f64, DataError> {
        let error = || DataError::NonFiniteValue {
            path: self.path.clone(),
            row_index,
            column: column.to_string(),
            raw: cell.to_string(),
        };
        let value: f64 = cell.parse().map_err(|_| error())?;
        if !value.is_finite() {
            return Err(error());
        }
        Ok(value)
    }

    fn csv_error(&self, e: csv::Error) -> DataError {
        DataError::CsvParse {
            path: self.path.clone(),
            offset: e.position().map_or(0, |p| p.byte()),
            source: e,
        }
    }
}

fn is_missing(cell: &str) -> bool {
    MISSING_MARKERS.contains(&cell)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AttributeId;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn infers_numeric_and_nominal_columns() {
        let f = write_csv("x,colour,label\n1.5,red,0\n2.0,blue,1\n?,red,1\n");
        let ds = DatasetReader::new(f.path())
            .with_targets(&["label"])
            .with_nominal(&["label"])
            .read()
            .unwrap();

        let schema = ds.schema();
        assert!(schema.attributes()[0].is_numeric());
        assert_eq!(schema.attributes()[1].cardinality(), Some(2));
        assert!(schema.attributes()[2].is_restricted());
        assert!(schema.is_binary(AttributeId::new(2)));

        let records = ds.records();
        assert!(records[2].is_missing(AttributeId::new(0)));
        assert_eq!(records[1].value(AttributeId::new(1)), Some(1.0));
        assert_eq!(records[0].value(AttributeId::new(2)), Some(0.0));
    }

    #[test]
    fn reads_against_existing_schema() {
        let train = write_csv("x,colour\n1.0,red\n2.0,blue\n");
        let schema = DatasetReader::new(train.path()).read().unwrap().schema().clone();

        let test = write_csv("x,colour\n3.0,blue\n4.0,?\n");
        let ds = DatasetReader::new(test.path()).with_schema(schema.clone()).read().unwrap();
        assert_eq!(ds.records()[0].value(AttributeId::new(1)), Some(1.0));
        assert!(ds.records()[1].is_missing(AttributeId::new(1)));

        let unknown = write_csv("x,colour\n3.0,green\n");
        let err = DatasetReader::new(unknown.path()).with_schema(schema).read().unwrap_err();
        assert!(matches!(err, DataError::UnknownNominalValue { .. }));
    }

    #[test]
    fn header_mismatch_error() {
        let train = write_csv("x,y\n1.0,2.0\n");
        let schema = DatasetReader::new(train.path()).read().unwrap().schema().clone();
        let other = write_csv("y,x\n1.0,2.0\n");
        let err = DatasetReader::new(other.path()).with_schema(schema).read().unwrap_err();
        assert!(matches!(err, DataError::HeaderMismatch { .. }));
    }

    #[test]
    fn empty_dataset_error() {
        let f = write_csv("x,y\n");
        let err = DatasetReader::new(f.path()).read().unwrap_err();
        assert!(matches!(err, DataError::EmptyDataset { .. }));
    }

    #[test]
    fn inconsistent_row_length_error() {
        let f = write_csv("x,y\n1.0,2.0\n3.0\n");
        let err = DatasetReader::new(f.path()).read().unwrap_err();
        assert!(matches!(
            err,
            DataError::InconsistentRowLength { row_index: 1, expected: 2, got: 1, .. }
        ));
    }

    #[test]
    fn unknown_target_column_error() {
        let f = write_csv("x,y\n1.0,2.0\n");
        let err = DatasetReader::new(f.path()).with_targets(&["z"]).read().unwrap_err();
        assert!(matches!(err, DataError::UnknownColumn { .. }));
    }

    #[test]
    fn file_not_found_error() {
        let err = DatasetReader::new(Path::new("/nonexistent/grove_data.csv"))
            .read()
            .unwrap_err();
        assert!(matches!(err, DataError::FileNotFound { .. }));
    }
}
