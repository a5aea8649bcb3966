//! ACI image manifest types and synthesis from Docker layer metadata

use crate::error::{ConvertError, Result};
use crate::image::metadata::LayerMetadata;
use crate::image::reference::ImageReference;
use serde::{Deserialize, Serialize};

/// Name of the manifest entry at the root of an ACI
pub const MANIFEST_FILE: &str = "manifest";
/// Directory holding the image filesystem inside an ACI
pub const ROOTFS_DIR: &str = "rootfs";

pub const IMAGE_MANIFEST_KIND: &str = "ImageManifest";
pub const LAYER_LABEL: &str = "layer";
pub const VERSION_LABEL: &str = "version";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub ac_kind: String,
    pub ac_version: String,
    pub name: String,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<App>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub exec: Vec<String>,
    pub user: String,
    pub group: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub app: String,
    #[serde(rename = "imageID")]
    pub image_id: String,
}

impl ImageManifest {
    /// Synthesize the manifest for one converted layer.
    ///
    /// `parent_id` is the store key of the previously converted layer, empty
    /// for the base layer.
    pub fn for_layer(
        layer: &LayerMetadata,
        reference: &ImageReference,
        parent_id: &str,
        schema_version: &str,
    ) -> Result<Self> {
        let name = reference.app_name();
        validate_ac_name(&name)?;

        let labels = vec![
            Label {
                name: LAYER_LABEL.to_string(),
                value: layer.id.clone(),
            },
            Label {
                name: VERSION_LABEL.to_string(),
                value: reference.tag.clone(),
            },
        ];

        let app = layer.command().map(|cmd| App {
            exec: cmd.to_vec(),
            user: "0".to_string(),
            group: "0".to_string(),
        });

        let mut dependencies = Vec::new();
        if !parent_id.is_empty() {
            validate_image_hash(parent_id)?;
            dependencies.push(Dependency {
                app: name.clone(),
                image_id: parent_id.to_string(),
            });
        }

        Ok(ImageManifest {
            ac_kind: IMAGE_MANIFEST_KIND.to_string(),
            ac_version: schema_version.to_string(),
            name,
            labels,
            app,
            dependencies,
        })
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let manifest: ImageManifest = serde_json::from_slice(bytes)
            .map_err(|e| ConvertError::Parse(format!("Unable to load image manifest: {}", e)))?;
        if manifest.ac_kind != IMAGE_MANIFEST_KIND {
            return Err(ConvertError::Parse(format!(
                "unexpected acKind '{}'",
                manifest.ac_kind
            )));
        }
        Ok(manifest)
    }
}

/// AC names are lowercase alphanumerics separated by single `-`, `.` or `/`
pub fn validate_ac_name(name: &str) -> Result<()> {
    let bad = || ConvertError::InvalidName(format!("'{}' is not a valid AC name", name));

    let is_sep = |c: char| matches!(c, '-' | '.' | '/');
    let is_word = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();

    let mut prev_sep = true;
    for c in name.chars() {
        if is_sep(c) {
            if prev_sep {
                return Err(bad());
            }
            prev_sep = true;
        } else if is_word(c) {
            prev_sep = false;
        } else {
            return Err(bad());
        }
    }

    if prev_sep {
        return Err(bad());
    }
    Ok(())
}

/// Image IDs in dependencies are `sha512-<hex>`
pub fn validate_image_hash(id: &str) -> Result<()> {
    match id.split_once('-') {
        Some(("sha512", hex))
            if !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) =>
        {
            Ok(())
        }
        _ => Err(ConvertError::InvalidName(format!(
            "'{}' is not a sha512 image hash",
            id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(json: &str) -> LayerMetadata {
        LayerMetadata::from_json(json.as_bytes()).unwrap()
    }

    fn busybox() -> ImageReference {
        ImageReference::parse("busybox:1.36").unwrap()
    }

    #[test]
    fn test_base_layer_manifest() {
        let m = ImageManifest::for_layer(&layer(r#"{"id":"aaa"}"#), &busybox(), "", "0.1.1").unwrap();
        assert_eq!(m.ac_kind, "ImageManifest");
        assert_eq!(m.ac_version, "0.1.1");
        assert_eq!(m.name, "index.docker.io/busybox");
        assert_eq!(m.label("layer"), Some("aaa"));
        assert_eq!(m.label("version"), Some("1.36"));
        assert!(m.app.is_none());
        assert!(m.dependencies.is_empty());
    }

    #[test]
    fn test_child_layer_depends_on_parent() {
        let parent = "sha512-0123abcd";
        let m = ImageManifest::for_layer(
            &layer(r#"{"id":"bbb","config":{"Cmd":["/bin/sh","-c","echo hi"]}}"#),
            &busybox(),
            parent,
            "0.1.1",
        )
        .unwrap();

        assert_eq!(
            m.dependencies,
            vec![Dependency {
                app: "index.docker.io/busybox".to_string(),
                image_id: parent.to_string(),
            }]
        );
        let app = m.app.unwrap();
        assert_eq!(app.exec, vec!["/bin/sh", "-c", "echo hi"]);
        assert_eq!((app.user.as_str(), app.group.as_str()), ("0", "0"));
    }

    #[test]
    fn test_entrypoint_alone_yields_no_app() {
        let m = ImageManifest::for_layer(
            &layer(r#"{"id":"ccc","config":{"Entrypoint":["/init"]}}"#),
            &busybox(),
            "",
            "0.1.1",
        )
        .unwrap();
        assert!(m.app.is_none());
    }

    #[test]
    fn test_manifest_json_field_names() {
        let m = ImageManifest::for_layer(&layer(r#"{"id":"ddd"}"#), &busybox(), "sha512-ff", "0.1.1").unwrap();
        let value: serde_json::Value = serde_json::from_slice(&m.to_json().unwrap()).unwrap();
        assert_eq!(value["acKind"], "ImageManifest");
        assert_eq!(value["acVersion"], "0.1.1");
        assert_eq!(value["labels"][0]["name"], "layer");
        assert_eq!(value["labels"][1]["name"], "version");
        assert_eq!(value["dependencies"][0]["imageID"], "sha512-ff");
        assert!(value.get("app").is_none());

        assert_eq!(ImageManifest::from_json(&m.to_json().unwrap()).unwrap(), m);
    }

    #[test]
    fn test_labels_are_stable_across_runs() {
        let meta = layer(r#"{"id":"eee","config":{"Cmd":["sh"]}}"#);
        let a = ImageManifest::for_layer(&meta, &busybox(), "", "0.1.1").unwrap();
        let b = ImageManifest::for_layer(&meta, &busybox(), "", "0.1.1").unwrap();
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    }

    #[test]
    fn test_invalid_names_rejected() {
        let upper = ImageReference::parse("quay.io/Foo/bar").unwrap();
        let err = ImageManifest::for_layer(&layer(r#"{"id":"x"}"#), &upper, "", "0.1.1").unwrap_err();
        assert!(matches!(err, ConvertError::InvalidName(_)));

        assert!(validate_ac_name("example.com/app-1").is_ok());
        assert!(validate_ac_name("example.com//app").is_err());
        assert!(validate_ac_name("-app").is_err());
        assert!(validate_ac_name("app_name").is_err());
        assert!(validate_ac_name("localhost:5000/app").is_err());
    }

    #[test]
    fn test_parent_hash_validated() {
        assert!(validate_image_hash("sha512-deadbeef").is_ok());
        assert!(validate_image_hash("sha256-deadbeef").is_err());
        assert!(validate_image_hash("sha512-").is_err());
        assert!(validate_image_hash("sha512-XYZ").is_err());

        let err = ImageManifest::for_layer(&layer(r#"{"id":"x"}"#), &busybox(), "not-a-hash", "0.1.1").unwrap_err();
        assert!(matches!(err, ConvertError::InvalidName(_)));
    }
}
