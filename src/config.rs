//! Converter settings threaded through the pipeline, importer and store

use crate::error::{ConvertError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_INDEX: &str = "index.docker.io";
pub const DEFAULT_TAG: &str = "latest";
pub const DEFAULT_STORE_DIR: &str = "/var/lib/rkt";
pub const SCHEMA_VERSION: &str = "0.1.1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Index host used when the reference names none
    pub default_index: String,
    /// Tag used when the reference names none
    pub default_tag: String,
    /// Root of the content-addressable store
    pub store_dir: PathBuf,
    /// ACI schema version written into every manifest
    pub schema_version: String,
    /// Parent directory for per-layer staging trees; system temp dir if unset
    pub staging_dir: Option<PathBuf>,
    pub verbose: bool,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            default_index: DEFAULT_INDEX.to_string(),
            default_tag: DEFAULT_TAG.to_string(),
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            schema_version: SCHEMA_VERSION.to_string(),
            staging_dir: None,
            verbose: false,
        }
    }
}

impl ConverterConfig {
    /// Defaults overlaid with `DOCKER2ACI_*` environment variables
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    pub fn with_env(mut self) -> Self {
        if let Ok(index) = env::var("DOCKER2ACI_INDEX") {
            self.default_index = index;
        }

        if let Ok(tag) = env::var("DOCKER2ACI_TAG") {
            self.default_tag = tag;
        }

        if let Ok(dir) = env::var("DOCKER2ACI_STORE_DIR") {
            self.store_dir = PathBuf::from(dir);
        }

        if let Ok(version) = env::var("DOCKER2ACI_SCHEMA_VERSION") {
            self.schema_version = version;
        }

        if let Ok(dir) = env::var("DOCKER2ACI_TMPDIR") {
            self.staging_dir = Some(PathBuf::from(dir));
        }

        if env::var("DOCKER2ACI_VERBOSE").is_ok() {
            self.verbose = true;
        }

        self
    }

    pub fn with_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = dir.into();
        self
    }

    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_index.trim().is_empty() {
            return Err(ConvertError::Configuration("default index cannot be empty".to_string()));
        }

        if self.default_tag.trim().is_empty() {
            return Err(ConvertError::Configuration("default tag cannot be empty".to_string()));
        }

        let parts: Vec<&str> = self.schema_version.split('.').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit())) {
            return Err(ConvertError::Configuration(format!(
                "schema version must be MAJOR.MINOR.PATCH, got '{}'",
                self.schema_version
            )));
        }

        Ok(())
    }
}
