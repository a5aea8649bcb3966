//! Docker image to ACI conversion

pub mod importer;
pub mod pipeline;

pub use importer::{LayerImporter, StagingTree};
pub use pipeline::{ConversionPipeline, PipelineState};
