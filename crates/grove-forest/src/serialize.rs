//! Model persistence via bincode.

use std::path::Path;

use tracing::{debug, info, instrument};

use crate::ForestError;
use crate::chain::ChainEnsemble;
use crate::ensemble::Ensemble;
use crate::online::QuantileEnsemble;

/// Current binary format version.
pub const FORMAT_VERSION: u32 = 1;

/// Any fitted ensemble.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum SavedModel {
    Batch(Ensemble),
    Chain(ChainEnsemble),
    Online(QuantileEnsemble),
}

impl SavedModel {
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            SavedModel::Batch(_) => "batch",
            SavedModel::Chain(_) => "chain",
            SavedModel::Online(_) => "online",
        }
    }

    #[must_use]
    pub fn n_trees(&self) -> usize {
        match self {
            SavedModel::Batch(e) => e.n_trees(),
            SavedModel::Chain(e) => e.n_trees(),
            SavedModel::Online(e) => e.n_trees(),
        }
    }

    /// Save to a binary file inside a versioned envelope.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::SerializeModel`] | bincode encoding failed |
    /// | [`ForestError::WriteModel`] | file write failed |
    #[instrument(skip_all, fields(path = %path.as_ref().display(), kind = self.kind_name()))]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ForestError> {
        let path = path.as_ref();
        let envelope = ModelEnvelope {
            format_version: FORMAT_VERSION,
            model: self,
        };
        let bytes = bincode::serialize(&envelope).map_err(|e| ForestError::SerializeModel { source: e })?;
        std::fs::write(path, &bytes).map_err(|e| ForestError::WriteModel {
            path: path.to_path_buf(),
            source: e,
        })?;
        info!(size_bytes = bytes.len(), n_trees = self.n_trees(), "model saved");
        Ok(())
    }

    /// Load a model of any kind.
    ///
    /// The format version is checked before the model itself is decoded.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::ReadModel`] | file read failed |
    /// | [`ForestError::DeserializeModel`] | bincode decoding failed |
    /// | [`ForestError::IncompatibleModelVersion`] | format version mismatch |
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ForestError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| ForestError::ReadModel {
            path: path.to_path_buf(),
            source: e,
        })?;
        let decode_error = |e| ForestError::DeserializeModel {
            path: path.to_path_buf(),
            source: e,
        };

        let format_version: u32 = bincode::deserialize(&bytes).map_err(decode_error)?;
        if format_version != FORMAT_VERSION {
            return Err(ForestError::IncompatibleModelVersion {
                expected: FORMAT_VERSION,
                found: format_version,
                path: path.to_path_buf(),
            });
        }
        let envelope: OwnedEnvelope = bincode::deserialize(&bytes).map_err(decode_error)?;
        debug!(
            format_version = envelope.format_version,
            kind = envelope.model.kind_name(),
            n_trees = envelope.model.n_trees(),
            "model loaded"
        );
        Ok(envelope.model)
    }
}

#[derive(serde::Serialize)]
struct ModelEnvelope<'a> {
    format_version: u32,
    model: &'a SavedModel,
}

#[derive(serde::Deserialize)]
struct OwnedEnvelope {
    format_version: u32,
    model: SavedModel,
}

fn unexpected_kind(path: &Path, expected: &'static str, found: &SavedModel) -> ForestError {
    ForestError::UnexpectedModelKind {
        path: path.to_path_buf(),
        expected,
        found: found.kind_name(),
    }
}

impl Ensemble {
    /// Save as a [`SavedModel::Batch`].
    ///
    /// # Errors
    ///
    /// See [`SavedModel::save`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ForestError> {
        SavedModel::Batch(self.clone()).save(path)
    }

    /// # Errors
    ///
    /// See [`SavedModel::load`]; [`ForestError::UnexpectedModelKind`] if the
    /// file holds another kind of ensemble.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ForestError> {
        match SavedModel::load(path.as_ref())? {
            SavedModel::Batch(e) => Ok(e),
            other => Err(unexpected_kind(path.as_ref(), "batch", &other)),
        }
    }
}

impl ChainEnsemble {
    /// Save as a [`SavedModel::Chain`].
    ///
    /// # Errors
    ///
    /// See [`SavedModel::save`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ForestError> {
        SavedModel::Chain(self.clone()).save(path)
    }

    /// # Errors
    ///
    /// See [`SavedModel::load`]; [`ForestError::UnexpectedModelKind`] if the
    /// file holds another kind of ensemble.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ForestError> {
        match SavedModel::load(path.as_ref())? {
            SavedModel::Chain(e) => Ok(e),
            other => Err(unexpected_kind(path.as_ref(), "chain", &other)),
        }
    }
}

impl QuantileEnsemble {
    /// Save as a [`SavedModel::Online`]. Training can resume after loading.
    ///
    /// # Errors
    ///
    /// See [`SavedModel::save`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ForestError> {
        SavedModel::Online(self.clone()).save(path)
    }

    /// # Errors
    ///
    /// See [`SavedModel::load`]; [`ForestError::UnexpectedModelKind`] if the
    /// file holds another kind of ensemble.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ForestError> {
        match SavedModel::load(path.as_ref())? {
            SavedModel::Online(e) => Ok(e),
            other => Err(unexpected_kind(path.as_ref(), "online", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use grove_data::{Attribute, AttributeId, Dataset, FeatureRecord, Schema};
    use tempfile::TempDir;

    use super::*;
    use crate::collector::{CollectorSchema, CollectorSpec};
    use crate::config::{ChainConfig, EnsembleConfig, QuantileConfig};

    fn dataset() -> Dataset {
        let schema = Schema::new(vec![
            Attribute::numeric("x"),
            Attribute::binary("a"),
            Attribute::binary("b"),
        ]);
        let records = (0..30)
            .map(|i| {
                let x = f64::from(i);
                let a = f64::from(u8::from(i >= 15));
                FeatureRecord::from_values(&[x, a, 1.0 - a])
            })
            .collect();
        Dataset::new(schema, records).unwrap()
    }

    fn collectors() -> CollectorSchema {
        CollectorSchema::new(vec![CollectorSpec::Classification {
            target: AttributeId::new(1),
        }])
        .unwrap()
    }

    fn queries() -> Vec<FeatureRecord> {
        [2.0, 14.5, 27.0]
            .iter()
            .map(|&x| FeatureRecord::new(vec![Some(x), None, None]))
            .collect()
    }

    #[test]
    fn batch_round_trip_identical_predictions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("batch.bin");
        let ensemble = EnsembleConfig::new(5).unwrap().fit(&dataset(), &collectors()).unwrap();
        ensemble.save(&path).unwrap();

        let loaded = Ensemble::load(&path).unwrap();
        assert_eq!(loaded, ensemble);
        for query in &queries() {
            assert_eq!(loaded.predict(query).unwrap(), ensemble.predict(query).unwrap());
        }
    }

    #[test]
    fn chain_round_trip_keeps_settings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chain.bin");
        let groups = vec![vec![AttributeId::new(1), AttributeId::new(2)]];
        let ensemble = ChainConfig::new(4)
            .unwrap()
            .with_active_label_fraction(0.5)
            .fit(&dataset(), &groups)
            .unwrap();
        ensemble.save(&path).unwrap();

        let loaded = ChainEnsemble::load(&path).unwrap();
        assert_eq!(loaded, ensemble);
        assert_eq!(loaded.n_active_label_splitters(), ensemble.n_active_label_splitters());
    }

    #[test]
    fn online_model_resumes_training_after_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("online.bin");
        let data = dataset();
        let ensemble = QuantileConfig::new(3).unwrap().fit(&data, &collectors()).unwrap();
        ensemble.save(&path).unwrap();

        let mut loaded = QuantileEnsemble::load(&path).unwrap();
        for (a, b) in loaded.trees().iter().zip(ensemble.trees()) {
            assert_eq!(a.tree(), b.tree());
        }
        loaded.update(&data.records()[0]).unwrap();
    }

    #[test]
    fn loading_the_wrong_kind_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("batch.bin");
        EnsembleConfig::new(2)
            .unwrap()
            .fit(&dataset(), &collectors())
            .unwrap()
            .save(&path)
            .unwrap();
        let err = ChainEnsemble::load(&path).unwrap_err();
        assert!(matches!(
            err,
            ForestError::UnexpectedModelKind {
                expected: "chain",
                found: "batch",
                ..
            }
        ));
    }

    #[test]
    fn newer_format_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("future.bin");
        std::fs::write(&path, bincode::serialize(&(FORMAT_VERSION + 1, 0u8)).unwrap()).unwrap();
        let err = SavedModel::load(&path).unwrap_err();
        assert!(matches!(
            err,
            ForestError::IncompatibleModelVersion { found: 2, .. }
        ));
    }

    #[test]
    fn load_nonexistent_file_error() {
        let dir = TempDir::new().unwrap();
        let err = SavedModel::load(dir.path().join("missing.bin")).unwrap_err();
        assert!(matches!(err, ForestError::ReadModel { .. }));
    }

    #[test]
    fn load_corrupt_file_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corrupt.bin");
        std::fs::write(&path, [1u8, 0, 0, 0, 0xff, 0xff, 0xff, 0x7f]).unwrap();
        let err = SavedModel::load(&path).unwrap_err();
        assert!(matches!(err, ForestError::DeserializeModel { .. }));
    }
}
