//! docker2aci library
//!
//! Converts an image hosted on a Docker v1 registry into a chain of App
//! Container Images, one per Docker layer, each depending on the ACI of the
//! layer below it, and ingests them into a content-addressable store.

pub mod archive;
pub mod cli;
pub mod config;
pub mod convert;
pub mod error;
pub mod image;
pub mod logging;
pub mod registry;
pub mod store;

pub use config::ConverterConfig;
pub use convert::{ConversionPipeline, LayerImporter};
pub use error::{ConvertError, Result};
pub use image::{ImageManifest, ImageReference};
pub use logging::Logger;
pub use registry::{RegistryClient, RegistryTransport};
pub use store::{ContentStore, DiskStore, MemoryStore};
