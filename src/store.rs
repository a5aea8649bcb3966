//! Content-addressable storage for converted ACIs
//!
//! Archives are keyed by the SHA-512 of their (uncompressed) tar bytes, in
//! the `sha512-<hex>` form ACI dependencies use. Layout on disk:
//!
//! ```text
//! {root}/cas/
//!   blob/sha512/{hex}            // the archive
//!   imageManifest/sha512/{hex}   // its manifest, for lookups without untarring
//!   tmp/                         // in-flight ingests
//! ```
//!
//! A blob becomes visible only when it is renamed into place, after its
//! manifest has been written. An interrupted ingest can leave a stray file in
//! `tmp/`; cleaning that up is the store's business, not the pipeline's.

use crate::archive::is_gzipped;
use crate::error::{ConvertError, Result};
use crate::image::{ImageManifest, MANIFEST_FILE};
use flate2::read::GzDecoder;
use sha2::{Digest, Sha512};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const CAS_DIR: &str = "cas";
pub const BLOB_DIR: &str = "blob";
pub const MANIFEST_DIR: &str = "imageManifest";
pub const TMP_DIR: &str = "tmp";
pub const HASH_ALGORITHM: &str = "sha512";

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Where converted archives go. Ingestion either returns the archive's key
/// or fails; there are no partial results.
pub trait ContentStore: Send + Sync {
    fn write_aci(&self, aci: &mut dyn Read) -> Result<String>;
}

/// Filesystem-backed store
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Open (creating if needed) a store under `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            root: root.as_ref().join(CAS_DIR),
        };

        for dir in [
            store.root.join(BLOB_DIR).join(HASH_ALGORITHM),
            store.root.join(MANIFEST_DIR).join(HASH_ALGORITHM),
            store.root.join(TMP_DIR),
        ] {
            fs::create_dir_all(&dir)
                .map_err(|e| ConvertError::Store(format!("Cannot open store at {}: {}", dir.display(), e)))?;
        }

        Ok(store)
    }

    pub fn blob_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(BLOB_DIR).join(HASH_ALGORITHM).join(hex_part(key)?))
    }

    fn manifest_path(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(MANIFEST_DIR).join(HASH_ALGORITHM).join(hex_part(key)?))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blob_path(key).map(|p| p.is_file()).unwrap_or(false)
    }

    pub fn read_manifest(&self, key: &str) -> Result<ImageManifest> {
        let path = self.manifest_path(key)?;
        let bytes = fs::read(&path)
            .map_err(|e| ConvertError::Store(format!("No manifest for {}: {}", key, e)))?;
        ImageManifest::from_json(&bytes)
    }

    pub fn read_aci(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(key)?;
        fs::read(&path).map_err(|e| ConvertError::Store(format!("No image {}: {}", key, e)))
    }
}

impl ContentStore for DiskStore {
    fn write_aci(&self, aci: &mut dyn Read) -> Result<String> {
        let mut spool = tempfile::NamedTempFile::new_in(self.root.join(TMP_DIR))
            .map_err(|e| ConvertError::Store(format!("Cannot create temporary file: {}", e)))?;

        let key = {
            let mut reader = decompressed(aci)?;
            let mut hasher = Sha512::new();
            let mut buf = vec![0u8; COPY_BUFFER_SIZE];
            loop {
                let n = reader
                    .read(&mut buf)
                    .map_err(|e| ConvertError::Store(format!("Error reading ACI: {}", e)))?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                spool
                    .write_all(&buf[..n])
                    .map_err(|e| ConvertError::Store(format!("Error writing ACI: {}", e)))?;
            }
            format!("{}-{}", HASH_ALGORITHM, hex::encode(hasher.finalize()))
        };

        spool
            .as_file()
            .sync_all()
            .map_err(|e| ConvertError::Store(format!("Error writing ACI: {}", e)))?;

        let blob_path = self.blob_path(&key)?;
        if blob_path.is_file() {
            return Ok(key);
        }

        let spooled = File::open(spool.path())
            .map_err(|e| ConvertError::Store(format!("Error reopening ACI: {}", e)))?;
        let manifest = manifest_from_archive(spooled)?;
        fs::write(self.manifest_path(&key)?, manifest.to_json()?)
            .map_err(|e| ConvertError::Store(format!("Error writing manifest for {}: {}", key, e)))?;

        spool
            .persist(&blob_path)
            .map_err(|e| ConvertError::Store(format!("Error storing {}: {}", key, e.error)))?;

        Ok(key)
    }
}

/// In-process store with the same addressing as [`DiskStore`]
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    order: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.lock().ok()?.get(key).cloned()
    }

    /// Keys in the order they were first ingested
    pub fn keys(&self) -> Vec<String> {
        self.order.lock().map(|o| o.clone()).unwrap_or_default()
    }

    pub fn read_manifest(&self, key: &str) -> Result<ImageManifest> {
        let aci = self
            .get(key)
            .ok_or_else(|| ConvertError::Store(format!("No image {}", key)))?;
        manifest_from_archive(&aci[..])
    }
}

impl ContentStore for MemoryStore {
    fn write_aci(&self, aci: &mut dyn Read) -> Result<String> {
        let mut data = Vec::new();
        decompressed(aci)?
            .read_to_end(&mut data)
            .map_err(|e| ConvertError::Store(format!("Error reading ACI: {}", e)))?;

        // Reject archives the disk store would reject
        manifest_from_archive(&data[..])?;

        let key = format!("{}-{}", HASH_ALGORITHM, hex::encode(Sha512::digest(&data)));

        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| ConvertError::Store("memory store poisoned".to_string()))?;
        if !blobs.contains_key(&key) {
            blobs.insert(key.clone(), data);
            if let Ok(mut order) = self.order.lock() {
                order.push(key.clone());
            }
        }

        Ok(key)
    }
}

/// Pull the `manifest` entry out of an ACI tar stream
pub fn manifest_from_archive<R: Read>(aci: R) -> Result<ImageManifest> {
    let mut archive = tar::Archive::new(aci);
    let entries = archive
        .entries()
        .map_err(|e| ConvertError::Store(format!("Error reading ACI: {}", e)))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| ConvertError::Store(format!("Error reading ACI: {}", e)))?;
        let is_manifest = entry
            .path()
            .map(|p| p.as_os_str() == MANIFEST_FILE)
            .unwrap_or(false);
        if is_manifest {
            let mut bytes = Vec::new();
            entry
                .read_to_end(&mut bytes)
                .map_err(|e| ConvertError::Store(format!("Error reading ACI manifest: {}", e)))?;
            return ImageManifest::from_json(&bytes);
        }
    }

    Err(ConvertError::Store("ACI has no manifest".to_string()))
}

fn decompressed(aci: &mut dyn Read) -> Result<Box<dyn Read + '_>> {
    let mut reader = BufReader::new(aci);
    let head = reader
        .fill_buf()
        .map_err(|e| ConvertError::Store(format!("Error reading ACI: {}", e)))?;

    if is_gzipped(head) {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

fn hex_part(key: &str) -> Result<&str> {
    match key.split_once('-') {
        Some((HASH_ALGORITHM, hex)) if !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()) => Ok(hex),
        _ => Err(ConvertError::Store(format!("'{}' is not a store key", key))),
    }
}
