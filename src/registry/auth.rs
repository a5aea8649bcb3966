//! Token handling for Docker Registry v1 access
//!
//! The index hands out opaque tokens during repository discovery; every later
//! request passes them back verbatim in an `Authorization: Token ...` header.

use crate::error::{ConvertError, Result};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};

/// Request header asking the index to issue tokens and endpoints
pub const DOCKER_TOKEN_HEADER: &str = "x-docker-token";
/// Response header listing registry hosts, comma separated
pub const DOCKER_ENDPOINTS_HEADER: &str = "x-docker-endpoints";
/// Response header carrying a layer's size in bytes
pub const DOCKER_SIZE_HEADER: &str = "x-docker-size";

/// Tokens and registry base URLs discovered for one repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoData {
    pub tokens: Vec<String>,
    pub endpoints: Vec<String>,
}

impl RepoData {
    /// The endpoint every request is sent to. Later entries are never tried.
    pub fn primary_endpoint(&self) -> Result<&str> {
        self.endpoints
            .first()
            .map(String::as_str)
            .ok_or_else(|| ConvertError::Parse("registry returned no endpoints".to_string()))
    }
}

/// Headers for the discovery request
pub fn token_discovery_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(DOCKER_TOKEN_HEADER, HeaderValue::from_static("true"));
    headers
}

/// Set `Authorization` from the token list unless the caller already set one.
/// Without tokens nothing is added.
pub fn set_auth_token(headers: &mut HeaderMap, tokens: &[String]) -> Result<()> {
    if headers.contains_key(AUTHORIZATION) || tokens.is_empty() {
        return Ok(());
    }

    let value = HeaderValue::from_str(&format!("Token {}", tokens.join(",")))
        .map_err(|e| ConvertError::Parse(format!("registry token is not a valid header value: {}", e)))?;
    headers.insert(AUTHORIZATION, value);
    Ok(())
}

/// Turn `X-Docker-Endpoints` header values into v1 base URLs
pub fn endpoints_from_headers(values: &[String]) -> Vec<String> {
    values
        .iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(|host| format!("https://{}/v1/", host))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sets_joined_tokens() {
        let mut headers = HeaderMap::new();
        set_auth_token(&mut headers, &["signature=abc".into(), "repository=\"foo/bar\"".into()]).unwrap();
        assert_eq!(
            headers.get(AUTHORIZATION).unwrap(),
            "Token signature=abc,repository=\"foo/bar\""
        );
    }

    #[test]
    fn test_existing_authorization_is_kept() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Token preset"));
        set_auth_token(&mut headers, &["other".into()]).unwrap();
        set_auth_token(&mut headers, &["again".into()]).unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Token preset");
        assert_eq!(headers.get_all(AUTHORIZATION).iter().count(), 1);
    }

    #[test]
    fn test_no_tokens_no_header() {
        let mut headers = HeaderMap::new();
        set_auth_token(&mut headers, &[]).unwrap();
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_endpoint_list() {
        let values = vec![
            "registry-1.docker.io, registry-2.docker.io".to_string(),
            "mirror.example.com".to_string(),
        ];
        assert_eq!(
            endpoints_from_headers(&values),
            vec![
                "https://registry-1.docker.io/v1/",
                "https://registry-2.docker.io/v1/",
                "https://mirror.example.com/v1/",
            ]
        );
    }

    #[test]
    fn test_primary_endpoint() {
        let data = RepoData {
            tokens: vec![],
            endpoints: vec!["https://a/v1/".into(), "https://b/v1/".into()],
        };
        assert_eq!(data.primary_endpoint().unwrap(), "https://a/v1/");

        let empty = RepoData { tokens: vec![], endpoints: vec![] };
        assert!(empty.primary_endpoint().is_err());
    }
}
