//! Artifact persistence
//!
//! Trained models are stored as opaque bincode blobs addressable by name
//! (`<learner-name>_fold_<i>`, `meta_model`); tabular outputs go to CSV.

use crate::error::Result;
use crate::learners::TrainedArtifact;
use polars::prelude::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Directory-backed store for run outputs
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Store root
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a trained model blob as `<name>.bin`
    pub fn save_model(&self, name: &str, artifact: &TrainedArtifact) -> Result<PathBuf> {
        let path = self.dir.join(format!("{}.bin", name));
        fs::write(&path, artifact.to_bytes()?)?;
        Ok(path)
    }

    /// Load a trained model blob
    pub fn load_model(&self, name: &str) -> Result<TrainedArtifact> {
        let bytes = fs::read(self.dir.join(format!("{}.bin", name)))?;
        TrainedArtifact::from_bytes(&bytes)
    }

    /// Persist any serializable value as `<name>.bin`
    pub fn save_blob<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let path = self.dir.join(format!("{}.bin", name));
        fs::write(&path, bincode::serialize(value)?)?;
        Ok(path)
    }

    /// Load a serialized value
    pub fn load_blob<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let bytes = fs::read(self.dir.join(format!("{}.bin", name)))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Persist a DataFrame as `<name>.csv`
    pub fn save_table(&self, name: &str, df: &mut DataFrame) -> Result<PathBuf> {
        let path = self.dir.join(format!("{}.csv", name));
        let file = File::create(&path)?;
        CsvWriter::new(file).finish(df)?;
        Ok(path)
    }
}
