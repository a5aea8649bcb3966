//! Docker v1 per-layer JSON metadata

use crate::error::{ConvertError, Result};
use serde::{Deserialize, Serialize};

/// The JSON document served at `images/{id}/json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerMetadata {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub docker_version: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub config: Option<ContainerConfig>,
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default, rename = "Size")]
    pub size: Option<u64>,
}

/// Subset of the Docker run config that feeds the ACI app section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    #[serde(default)]
    pub cmd: Option<Vec<String>>,
    #[serde(default)]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default)]
    pub env: Option<Vec<String>>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

impl LayerMetadata {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| ConvertError::Parse(format!("Error unmarshaling layer data: {}", e)))
    }

    /// The Docker command, if the layer carries a non-empty one.
    /// `Entrypoint` is not consulted.
    pub fn command(&self) -> Option<&[String]> {
        self.config
            .as_ref()
            .and_then(|c| c.cmd.as_deref())
            .filter(|cmd| !cmd.is_empty())
    }
}

/// Docker v1 image IDs are plain alphanumerics (hex in practice). IDs end up
/// in URL paths and staging file names, so nothing else is accepted.
pub fn validate_image_id(id: &str) -> Result<()> {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ConvertError::InvalidName(format!("'{}' is not a Docker image ID", id)));
    }
    Ok(())
}
