//! Registry module for Docker registry interactions
//!
//! This module provides token discovery and the client logic for reading
//! images from a Docker Registry HTTP API v1 endpoint.

pub mod auth;
pub mod client;
pub mod transport;

pub use auth::RepoData;
pub use client::RegistryClient;
pub use transport::{
    BodyStream, CannedResponse, HttpTransport, RegistryTransport, ReplayTransport, TransportResponse,
};
