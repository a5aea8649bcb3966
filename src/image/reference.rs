//! Parsing of `[REGISTRYURL/]IMAGE_NAME[:TAG]` references

use crate::config::{DEFAULT_INDEX, DEFAULT_TAG};
use crate::error::{ConvertError, Result};
use std::fmt;
use std::str::FromStr;

/// A Docker image named by index host, repository name and tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub index_host: String,
    pub image_name: String,
    pub tag: String,
}

impl ImageReference {
    /// Parse with the built-in default index and tag
    pub fn parse(reference: &str) -> Result<Self> {
        Self::parse_with_defaults(reference, DEFAULT_INDEX, DEFAULT_TAG)
    }

    /// Parse, filling in `default_index` / `default_tag` for missing parts.
    ///
    /// The leading component is an index host when it looks like one: it
    /// contains a `.` or a `:` (port), or is `localhost`. The tag is whatever
    /// follows the last `:` after the final `/`.
    pub fn parse_with_defaults(reference: &str, default_index: &str, default_tag: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ConvertError::Reference("reference is empty".to_string()));
        }

        let (index_host, remainder) = match reference.split_once('/') {
            Some((first, rest)) if is_index_host(first) => (first.to_string(), rest),
            _ => (default_index.to_string(), reference),
        };

        let name_start = remainder.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (image_name, tag) = match remainder[name_start..].rfind(':') {
            Some(pos) => {
                let split = name_start + pos;
                (&remainder[..split], &remainder[split + 1..])
            }
            None => (remainder, default_tag),
        };

        if image_name.is_empty() || image_name.split('/').any(str::is_empty) {
            return Err(ConvertError::Reference(format!(
                "'{}' does not name an image",
                reference
            )));
        }

        if tag.is_empty() {
            return Err(ConvertError::Reference(format!("'{}' has an empty tag", reference)));
        }

        Ok(ImageReference {
            index_host,
            image_name: image_name.to_string(),
            tag: tag.to_string(),
        })
    }

    /// `{indexHost}/{imageName}`, the basis of the ACI name
    pub fn app_name(&self) -> String {
        format!("{}/{}", self.index_host, self.image_name)
    }
}

fn is_index_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

impl FromStr for ImageReference {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.index_host, self.image_name, self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(r: &ImageReference) -> (&str, &str, &str) {
        (&r.index_host, &r.image_name, &r.tag)
    }

    #[test]
    fn test_parse_full_reference() {
        let r = ImageReference::parse("quay.io/foo/bar:v1").unwrap();
        assert_eq!(parts(&r), ("quay.io", "foo/bar", "v1"));
    }

    #[test]
    fn test_parse_namespaced_without_index() {
        let r = ImageReference::parse("foo/bar").unwrap();
        assert_eq!(parts(&r), ("index.docker.io", "foo/bar", "latest"));
    }

    #[test]
    fn test_parse_bare_name() {
        let r = ImageReference::parse("busybox").unwrap();
        assert_eq!(parts(&r), ("index.docker.io", "busybox", "latest"));
    }

    #[test]
    fn test_parse_bare_name_with_tag() {
        let r = ImageReference::parse("busybox:1.36").unwrap();
        assert_eq!(parts(&r), ("index.docker.io", "busybox", "1.36"));
    }

    #[test]
    fn test_parse_host_with_port() {
        let r = ImageReference::parse("localhost:5000/app:dev").unwrap();
        assert_eq!(parts(&r), ("localhost:5000", "app", "dev"));

        let r = ImageReference::parse("localhost/app").unwrap();
        assert_eq!(parts(&r), ("localhost", "app", "latest"));
    }

    #[test]
    fn test_parse_uses_supplied_defaults() {
        let r = ImageReference::parse_with_defaults("busybox", "registry.example.com", "stable").unwrap();
        assert_eq!(parts(&r), ("registry.example.com", "busybox", "stable"));
    }

    #[test]
    fn test_parse_is_deterministic() {
        let a = ImageReference::parse("quay.io/foo/bar:v1").unwrap();
        let b: ImageReference = "quay.io/foo/bar:v1".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "quay.io/foo/bar:v1");
        assert_eq!(a.app_name(), "quay.io/foo/bar");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("busybox:").is_err());
        assert!(ImageReference::parse("quay.io/").is_err());
        assert!(ImageReference::parse("foo//bar").is_err());
    }
}
