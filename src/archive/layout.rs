//! Precondition check for a staged ACI layout
//!
//! A layout directory holds exactly a `rootfs/` directory and, optionally, the
//! `manifest` file. Anything else at the top level is rejected, as is a
//! `manifest` whose bytes differ from the one the builder is about to write.

use crate::error::{ConvertError, Result};
use crate::image::{MANIFEST_FILE, ROOTFS_DIR};
use std::fs;
use std::path::Path;

pub fn validate_layout(layer_root: &Path, manifest_json: &[u8]) -> Result<()> {
    let rootfs = layer_root.join(ROOTFS_DIR);
    let rootfs_meta = fs::symlink_metadata(&rootfs)
        .map_err(|_| ConvertError::Layout(format!("no {} directory in {}", ROOTFS_DIR, layer_root.display())))?;
    if !rootfs_meta.is_dir() {
        return Err(ConvertError::Layout(format!("{} is not a directory", rootfs.display())));
    }

    let entries = fs::read_dir(layer_root).map_err(|e| ConvertError::io_at("reading", layer_root, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| ConvertError::io_at("reading", layer_root, e))?;
        let name = entry.file_name();

        match name.to_str() {
            Some(ROOTFS_DIR) => {}
            Some(MANIFEST_FILE) => {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .map_err(|e| ConvertError::io_at("inspecting", &path, e))?;
                if !file_type.is_file() {
                    return Err(ConvertError::Layout(format!("{} is not a regular file", path.display())));
                }
                let on_disk = fs::read(&path).map_err(|e| ConvertError::io_at("reading", &path, e))?;
                if on_disk != manifest_json {
                    return Err(ConvertError::Layout(format!(
                        "{} does not match the manifest being written",
                        path.display()
                    )));
                }
            }
            _ => {
                return Err(ConvertError::Layout(format!(
                    "unrecognized file path in layout: {:?}",
                    name
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_rootfs_only_is_valid() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("rootfs")).unwrap();
        assert!(validate_layout(dir.path(), b"{}").is_ok());
    }

    #[test]
    fn test_matching_manifest_is_valid() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("rootfs")).unwrap();
        fs::write(dir.path().join("manifest"), b"{\"a\":1}").unwrap();
        assert!(validate_layout(dir.path(), b"{\"a\":1}").is_ok());
    }

    #[test]
    fn test_stale_manifest_rejected() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("rootfs")).unwrap();
        fs::write(dir.path().join("manifest"), b"{\"a\":0}").unwrap();
        let err = validate_layout(dir.path(), b"{\"a\":1}").unwrap_err();
        assert!(matches!(err, ConvertError::Layout(_)));
    }

    #[test]
    fn test_missing_rootfs_rejected() {
        let dir = tempdir().unwrap();
        assert!(matches!(validate_layout(dir.path(), b"{}"), Err(ConvertError::Layout(_))));

        fs::write(dir.path().join("rootfs"), b"").unwrap();
        assert!(matches!(validate_layout(dir.path(), b"{}"), Err(ConvertError::Layout(_))));
    }

    #[test]
    fn test_unknown_entry_rejected() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("rootfs")).unwrap();
        fs::write(dir.path().join("layer.tar"), b"").unwrap();
        assert!(matches!(validate_layout(dir.path(), b"{}"), Err(ConvertError::Layout(_))));
    }
}
