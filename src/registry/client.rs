//! Docker Registry v1 client: token/endpoint discovery against the index,
//! then tag resolution, ancestry, layer JSON and layer blobs against the
//! first discovered endpoint.
//!
//! Image IDs coming from or going to the registry are checked with
//! [`validate_image_id`] before they are spliced into a URL.

use crate::error::{ConvertError, Result};
use crate::image::validate_image_id;
use crate::logging::Logger;
use crate::registry::auth::{
    self, DOCKER_ENDPOINTS_HEADER, DOCKER_SIZE_HEADER, DOCKER_TOKEN_HEADER, RepoData,
};
use crate::registry::transport::{BodyStream, HttpTransport, RegistryTransport, TransportResponse};
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use url::Url;

#[derive(Clone)]
pub struct RegistryClient {
    transport: Arc<dyn RegistryTransport>,
    logger: Logger,
}

impl RegistryClient {
    pub fn new(transport: Arc<dyn RegistryTransport>, logger: Logger) -> Self {
        Self { transport, logger }
    }

    /// Client over the standard HTTPS transport
    pub fn https(logger: Logger) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new()?), logger))
    }

    /// Ask the index for tokens and registry endpoints for `repository`
    pub async fn get_repo_data(&self, index_host: &str, repository: &str) -> Result<RepoData> {
        let url = Url::parse(&format!(
            "https://{}/v1/repositories/{}/images",
            index_host, repository
        ))?;
        self.logger.detail(&format!("Discovering repository data: {}", url));

        let response = self.send(&url, auth::token_discovery_headers()).await?;

        let tokens = response.header_values(DOCKER_TOKEN_HEADER);
        let endpoints = match response.header_values(DOCKER_ENDPOINTS_HEADER) {
            values if !values.is_empty() => auth::endpoints_from_headers(&values),
            _ => vec![format!("https://{}/v1/", index_host)],
        };

        self.logger.detail(&format!(
            "Received {} token(s), endpoints: {}",
            tokens.len(),
            endpoints.join(", ")
        ));

        Ok(RepoData { tokens, endpoints })
    }

    /// Resolve a tag to the image ID it points at
    pub async fn get_image_id_from_tag(
        &self,
        endpoint: &str,
        repository: &str,
        tag: &str,
        tokens: &[String],
    ) -> Result<String> {
        let url = endpoint_url(endpoint, &format!("repositories/{}/tags/{}", repository, tag))?;
        let image_id: String = self.get_json(&url, tokens).await?;
        validate_image_id(&image_id)?;
        Ok(image_id)
    }

    /// Lineage of `image_id`, newest first: the image itself, then each
    /// parent down to the base layer
    pub async fn get_ancestry(&self, image_id: &str, endpoint: &str, tokens: &[String]) -> Result<Vec<String>> {
        validate_image_id(image_id)?;
        let url = endpoint_url(endpoint, &format!("images/{}/ancestry", image_id))?;
        let ancestry: Vec<String> = self.get_json(&url, tokens).await?;
        for id in &ancestry {
            validate_image_id(id)?;
        }
        Ok(ancestry)
    }

    /// Raw layer JSON plus the layer size advertised in `X-Docker-Size`
    pub async fn get_remote_image_json(
        &self,
        image_id: &str,
        endpoint: &str,
        tokens: &[String],
    ) -> Result<(Vec<u8>, Option<u64>)> {
        validate_image_id(image_id)?;
        let url = endpoint_url(endpoint, &format!("images/{}/json", image_id))?;
        let response = self.send_authenticated(&url, tokens).await?;

        let size = match response.header(DOCKER_SIZE_HEADER) {
            Some(value) => Some(value.trim().parse::<u64>().map_err(|e| {
                ConvertError::Parse(format!("invalid {} header '{}': {}", DOCKER_SIZE_HEADER, value, e))
            })?),
            None => None,
        };

        let body = response.bytes().await?;
        Ok((body, size))
    }

    /// Open the layer blob as a stream; the caller drains or drops it
    pub async fn get_remote_layer(
        &self,
        image_id: &str,
        endpoint: &str,
        tokens: &[String],
        size_hint: Option<u64>,
    ) -> Result<BodyStream> {
        validate_image_id(image_id)?;
        let url = endpoint_url(endpoint, &format!("images/{}/layer", image_id))?;

        match size_hint {
            Some(size) => self.logger.step(&format!(
                "{}: Downloading layer ({})",
                self.logger.short_id(image_id),
                self.logger.format_size(size)
            )),
            None => self
                .logger
                .step(&format!("{}: Downloading layer", self.logger.short_id(image_id))),
        }

        let response = self.send_authenticated(&url, tokens).await?;
        Ok(response.body)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &Url, tokens: &[String]) -> Result<T> {
        let response = self.send_authenticated(url, tokens).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| ConvertError::Parse(format!("Error unmarshaling response from {}: {}", url, e)))
    }

    async fn send_authenticated(&self, url: &Url, tokens: &[String]) -> Result<TransportResponse> {
        let mut headers = HeaderMap::new();
        auth::set_auth_token(&mut headers, tokens)?;
        self.send(url, headers).await
    }

    async fn send(&self, url: &Url, headers: HeaderMap) -> Result<TransportResponse> {
        self.logger.debug(&format!("GET {}", url));
        let response = self.transport.get(url, headers).await?;

        if !response.status.is_success() {
            return Err(ConvertError::from_status(response.status, url.as_str()));
        }

        Ok(response)
    }
}

/// Resolve `path` against a v1 base URL such as `https://host/v1/`
fn endpoint_url(endpoint: &str, path: &str) -> Result<Url> {
    let mut base = endpoint.to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Ok(Url::parse(&base)?.join(path)?)
}
