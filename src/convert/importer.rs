//! Per-layer conversion: fetch, extract, synthesize a manifest, archive,
//! ingest.

use crate::archive::{build_aci_file, spool_blob, unpack_layer};
use crate::config::ConverterConfig;
use crate::error::{ConvertError, Result};
use crate::image::{ImageManifest, ImageReference, LayerMetadata, MANIFEST_FILE, ROOTFS_DIR, validate_image_id};
use crate::logging::Logger;
use crate::registry::{RegistryClient, RepoData};
use crate::store::ContentStore;
use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const STAGING_PREFIX: &str = "docker2aci-";
const LAYER_DIR: &str = "layer";
const BLOB_FILE: &str = "layer.blob";

/// Scratch directory for one layer import.
///
/// ```text
/// {root}/
///   layer.blob       // spooled registry blob
///   layer/           // ACI layout handed to the archive builder
///     manifest
///     rootfs/
///   {layer_id}.aci   // built archive, read back for ingestion
/// ```
///
/// Extraction restores directory modes from the layer, so the tree can hold
/// read-only directories an unprivileged user cannot delete from. [`close`]
/// makes every directory owner-writable before removing the tree. Dropping
/// an unclosed tree does the same but can only discard the error.
///
/// [`close`]: StagingTree::close
pub struct StagingTree {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl StagingTree {
    pub fn create(parent: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(STAGING_PREFIX);
        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(|e| ConvertError::io("Error creating dir", e))?;

        let tree = Self {
            path: dir.path().to_path_buf(),
            dir: Some(dir),
        };
        fs::create_dir_all(tree.rootfs()).map_err(|e| ConvertError::io_at("creating", &tree.rootfs(), e))?;
        Ok(tree)
    }

    pub fn root(&self) -> &Path {
        &self.path
    }

    pub fn layer_root(&self) -> PathBuf {
        self.root().join(LAYER_DIR)
    }

    pub fn rootfs(&self) -> PathBuf {
        self.layer_root().join(ROOTFS_DIR)
    }

    pub fn blob_path(&self) -> PathBuf {
        self.root().join(BLOB_FILE)
    }

    pub fn aci_path(&self, layer_id: &str) -> PathBuf {
        self.root().join(format!("{}.aci", layer_id))
    }

    /// Remove the tree, reporting anything left behind
    pub fn close(mut self) -> Result<()> {
        match self.dir.take() {
            Some(dir) => remove_tree(dir),
            None => Ok(()),
        }
    }
}

impl Drop for StagingTree {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let _ = remove_tree(dir);
        }
    }
}

fn remove_tree(dir: TempDir) -> Result<()> {
    let path = dir.path().to_path_buf();
    make_owner_writable(&path);
    dir.close()
        .map_err(|e| ConvertError::io_at("Error removing staging dir", &path, e))
}

/// Add `u+rwx` to `dir` and every directory below it. Each directory is
/// fixed before it is listed, so unreadable ones are reached too.
fn make_owner_writable(dir: &Path) {
    let Ok(meta) = fs::symlink_metadata(dir) else {
        return;
    };
    if !meta.is_dir() {
        return;
    }

    let mode = meta.permissions().mode();
    if mode & 0o700 != 0o700 {
        let _ = fs::set_permissions(dir, fs::Permissions::from_mode(mode | 0o700));
    }

    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                make_owner_writable(&entry.path());
            }
        }
    }
}

pub struct LayerImporter {
    client: RegistryClient,
    config: ConverterConfig,
    logger: Logger,
}

impl LayerImporter {
    pub fn new(client: RegistryClient, config: ConverterConfig, logger: Logger) -> Self {
        Self { client, config, logger }
    }

    /// Convert one Docker layer into an ACI and ingest it, returning the
    /// store key. `parent_id` is the key of the previously imported layer,
    /// empty for the base layer.
    pub async fn import(
        &self,
        layer_id: &str,
        repo_data: &RepoData,
        reference: &ImageReference,
        store: &dyn ContentStore,
        parent_id: &str,
    ) -> Result<String> {
        validate_image_id(layer_id)?;
        let staging = StagingTree::create(self.config.staging_dir.as_deref())?;
        self.logger
            .debug(&format!("Staging {} in {}", layer_id, staging.root().display()));

        let result = self
            .import_staged(&staging, layer_id, repo_data, reference, store, parent_id)
            .await;

        match (result, staging.close()) {
            (Ok(key), Ok(())) => Ok(key),
            (Ok(_), Err(cleanup)) => Err(cleanup),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup)) => {
                self.logger.warning(&cleanup.to_string());
                Err(e)
            }
        }
    }

    async fn import_staged(
        &self,
        staging: &StagingTree,
        layer_id: &str,
        repo_data: &RepoData,
        reference: &ImageReference,
        store: &dyn ContentStore,
        parent_id: &str,
    ) -> Result<String> {
        let endpoint = repo_data.primary_endpoint()?;
        let short = self.logger.short_id(layer_id);

        let (json, size) = self
            .client
            .get_remote_image_json(layer_id, endpoint, &repo_data.tokens)
            .await?;
        let layer = LayerMetadata::from_json(&json)?;
        if layer.id != layer_id {
            self.logger.warning(&format!(
                "{}: layer JSON reports id {}",
                short,
                self.logger.short_id(&layer.id)
            ));
        }

        let stream = self
            .client
            .get_remote_layer(layer_id, endpoint, &repo_data.tokens, size)
            .await?;
        let downloaded = spool_blob(stream, &staging.blob_path()).await?;
        self.logger
            .detail(&format!("{}: downloaded {}", short, self.logger.format_size(downloaded)));

        unpack_layer(&staging.blob_path(), &staging.rootfs(), &self.logger)?;

        let manifest = ImageManifest::for_layer(&layer, reference, parent_id, &self.config.schema_version)?;
        let manifest_path = staging.layer_root().join(MANIFEST_FILE);
        fs::write(&manifest_path, manifest.to_json()?)
            .map_err(|e| ConvertError::io_at("Error writing manifest", &manifest_path, e))?;

        self.logger.step(&format!("{}: Generating ACI", short));
        let aci_path = build_aci_file(&manifest, &staging.layer_root(), &staging.aci_path(layer_id))?;

        let mut aci = File::open(&aci_path).map_err(|e| ConvertError::io_at("opening", &aci_path, e))?;
        let key = store.write_aci(&mut aci)?;

        self.logger
            .success(&format!("{}: Imported as {}", short, self.logger.short_id(&key)));
        Ok(key)
    }
}
