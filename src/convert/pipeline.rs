//! Whole-image conversion: resolve a reference to its layer ancestry and
//! import the layers oldest first, chaining each onto its parent's key.

use crate::config::ConverterConfig;
use crate::convert::importer::LayerImporter;
use crate::error::{ConvertError, Result};
use crate::image::ImageReference;
use crate::logging::Logger;
use crate::registry::RegistryClient;
use crate::store::ContentStore;
use std::fmt;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Resolving,
    AncestryFetched { layers: usize },
    Importing { index: usize, layers: usize },
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Resolving => write!(f, "resolving"),
            PipelineState::AncestryFetched { layers } => write!(f, "ancestry fetched ({} layers)", layers),
            PipelineState::Importing { index, layers } => write!(f, "importing layer {}/{}", index + 1, layers),
            PipelineState::Done => write!(f, "done"),
            PipelineState::Failed => write!(f, "failed"),
        }
    }
}

pub struct ConversionPipeline {
    client: RegistryClient,
    store: Arc<dyn ContentStore>,
    config: ConverterConfig,
    logger: Logger,
    state: Mutex<PipelineState>,
}

impl ConversionPipeline {
    pub fn new(
        client: RegistryClient,
        store: Arc<dyn ContentStore>,
        config: ConverterConfig,
        logger: Logger,
    ) -> Self {
        Self {
            client,
            store,
            config,
            logger,
            state: Mutex::new(PipelineState::Resolving),
        }
    }

    /// State reached by the most recent `run`
    pub fn state(&self) -> PipelineState {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or(PipelineState::Failed)
    }

    fn transition(&self, next: PipelineState) {
        self.logger.debug(&format!("pipeline: {}", next));
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }

    /// Convert `reference` and return the store key of the image it names
    pub async fn run(&self, reference: &str) -> Result<String> {
        self.transition(PipelineState::Resolving);
        let result = self.convert(reference).await;
        match &result {
            Ok(_) => self.transition(PipelineState::Done),
            Err(_) => self.transition(PipelineState::Failed),
        }
        result
    }

    async fn convert(&self, reference: &str) -> Result<String> {
        let reference =
            ImageReference::parse_with_defaults(reference, &self.config.default_index, &self.config.default_tag)?;
        self.logger.section(&format!("Converting {}", reference));

        let repo_data = self
            .client
            .get_repo_data(&reference.index_host, &reference.image_name)
            .await?;
        let endpoint = repo_data.primary_endpoint()?;

        let image_id = self
            .client
            .get_image_id_from_tag(endpoint, &reference.image_name, &reference.tag, &repo_data.tokens)
            .await?;
        self.logger
            .info(&format!("{} resolves to {}", reference, self.logger.short_id(&image_id)));

        let mut ancestry = self
            .client
            .get_ancestry(&image_id, endpoint, &repo_data.tokens)
            .await?;
        if ancestry.is_empty() {
            return Err(ConvertError::Parse(format!("empty ancestry for image {}", image_id)));
        }
        ancestry.reverse();

        let layers = ancestry.len();
        self.transition(PipelineState::AncestryFetched { layers });

        let importer = LayerImporter::new(self.client.clone(), self.config.clone(), self.logger.clone());
        let mut parent_id = String::new();
        let mut converted = None;

        for (index, layer_id) in ancestry.iter().enumerate() {
            self.transition(PipelineState::Importing { index, layers });
            self.logger.step(&format!(
                "Layer {}/{}: {}",
                index + 1,
                layers,
                self.logger.short_id(layer_id)
            ));

            let key = importer
                .import(layer_id, &repo_data, &reference, self.store.as_ref(), &parent_id)
                .await?;

            if *layer_id == image_id {
                converted = Some(key.clone());
            }
            parent_id = key;
        }

        let converted = converted.ok_or_else(|| {
            ConvertError::Parse(format!("image {} missing from its own ancestry", image_id))
        })?;

        self.logger.success(&format!(
            "Converted {} layers in {}",
            layers,
            self.logger.format_duration(self.logger.elapsed())
        ));
        Ok(converted)
    }
}
