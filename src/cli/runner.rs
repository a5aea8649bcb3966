//! Runs one conversion from parsed arguments

use crate::cli::args::Args;
use crate::config::ConverterConfig;
use crate::convert::ConversionPipeline;
use crate::error::Result;
use crate::logging::Logger;
use crate::registry::RegistryClient;
use crate::store::DiskStore;
use std::sync::Arc;

pub struct Runner {
    args: Args,
    config: ConverterConfig,
    logger: Logger,
}

impl Runner {
    pub fn new(args: Args, config: ConverterConfig) -> Self {
        let logger = Logger::new(config.verbose);
        Self { args, config, logger }
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Convert the requested image, returning the key of its top ACI
    pub async fn run(&self) -> Result<String> {
        self.config.validate()?;
        self.logger.debug(&format!("Store: {}", self.config.store_dir.display()));

        let store = DiskStore::open(&self.config.store_dir)?;
        let client = RegistryClient::https(self.logger.clone())?;
        let pipeline = ConversionPipeline::new(client, Arc::new(store), self.config.clone(), self.logger.clone());

        pipeline.run(&self.args.reference).await
    }
}
