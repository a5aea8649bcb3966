//! Image model types
//!
//! Both sides of the conversion live here: the Docker side ([`ImageReference`]
//! naming what to fetch and [`LayerMetadata`] describing each layer) and the
//! ACI side ([`ImageManifest`] written into every produced archive).

pub mod manifest;
pub mod metadata;
pub mod reference;

pub use manifest::{ImageManifest, MANIFEST_FILE, ROOTFS_DIR};
pub use metadata::{ContainerConfig, LayerMetadata, validate_image_id};
pub use reference::ImageReference;
