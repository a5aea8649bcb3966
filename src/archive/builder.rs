//! ACI archive writer
//!
//! Serializes a manifest plus a staged layout directory into a plain tar
//! stream. The manifest is always the first entry. The tree is walked in
//! lexicographic order so identical trees give identical archives.

use crate::archive::layout::validate_layout;
use crate::error::{ConvertError, Result};
use crate::image::{ImageManifest, MANIFEST_FILE};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use tar::{EntryType, Header, HeaderMode};
use walkdir::WalkDir;

pub struct ArchiveBuilder<W: Write> {
    builder: tar::Builder<W>,
    /// inode -> archive path it was first written under
    inodes: HashMap<u64, PathBuf>,
    entries: usize,
}

impl<W: Write> ArchiveBuilder<W> {
    pub fn new(out: W) -> Self {
        let mut builder = tar::Builder::new(out);
        builder.mode(HeaderMode::Complete);
        Self {
            builder,
            inodes: HashMap::new(),
            entries: 0,
        }
    }

    pub fn append_manifest(&mut self, manifest_json: &[u8]) -> Result<()> {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(manifest_json.len() as u64);
        header.set_mtime(0);
        self.builder
            .append_data(&mut header, MANIFEST_FILE, manifest_json)
            .map_err(|e| ConvertError::io("writing manifest entry", e))?;
        self.entries += 1;
        Ok(())
    }

    /// Append every entry under `root` except `root` itself and a top-level
    /// `manifest` file, named by their path relative to `root`
    pub fn append_tree(&mut self, root: &Path) -> Result<()> {
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .min_depth(1);

        for entry in walker {
            let entry = entry?;
            let rel = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| ConvertError::Internal(format!("walked outside {}: {}", root.display(), e)))?
                .to_path_buf();

            if entry.depth() == 1 && rel.as_os_str() == MANIFEST_FILE {
                continue;
            }

            let meta = entry.metadata()?;
            self.append_entry(entry.path(), &rel, &meta)?;
        }

        Ok(())
    }

    fn append_entry(&mut self, path: &Path, rel: &Path, meta: &fs::Metadata) -> Result<()> {
        let file_type = meta.file_type();
        if file_type.is_socket() {
            return Err(ConvertError::Internal(format!(
                "cannot archive socket {}",
                path.display()
            )));
        }

        let mut header = Header::new_gnu();
        header.set_metadata_in_mode(meta, HeaderMode::Complete);

        let result = if file_type.is_symlink() {
            let target = fs::read_link(path).map_err(|e| ConvertError::io_at("reading link", path, e))?;
            header.set_size(0);
            self.builder.append_link(&mut header, rel, &target)
        } else if file_type.is_file() {
            if meta.nlink() > 1 {
                if let Some(first) = self.inodes.get(&meta.ino()) {
                    let first = first.clone();
                    header.set_entry_type(EntryType::Link);
                    header.set_size(0);
                    let linked = self.builder.append_link(&mut header, rel, &first);
                    return self.finish_entry(linked, rel);
                }
                self.inodes.insert(meta.ino(), rel.to_path_buf());
            }
            let file = File::open(path).map_err(|e| ConvertError::io_at("opening", path, e))?;
            self.builder.append_data(&mut header, rel, file)
        } else if file_type.is_char_device() || file_type.is_block_device() {
            // set_metadata_in_mode zeroes the device numbers
            let rdev = meta.rdev();
            header.set_size(0);
            header
                .set_device_major(dev_major(rdev))
                .and_then(|_| header.set_device_minor(dev_minor(rdev)))
                .map_err(|e| ConvertError::io(format!("archiving {}", rel.display()), e))?;
            self.builder.append_data(&mut header, rel, io::empty())
        } else if file_type.is_dir() || file_type.is_fifo() {
            header.set_size(0);
            self.builder.append_data(&mut header, rel, io::empty())
        } else {
            return Err(ConvertError::Internal(format!(
                "unrepresentable file type at {}",
                path.display()
            )));
        };

        self.finish_entry(result, rel)
    }

    fn finish_entry(&mut self, result: io::Result<()>, rel: &Path) -> Result<()> {
        result.map_err(|e| ConvertError::io(format!("archiving {}", rel.display()), e))?;
        self.entries += 1;
        Ok(())
    }

    /// Number of entries written so far, manifest included
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Write the tar trailer and hand back the underlying writer
    pub fn finish(self) -> Result<W> {
        self.builder
            .into_inner()
            .map_err(|e| ConvertError::io("finishing archive", e))
    }
}

/// Major number of a Linux `dev_t`
fn dev_major(rdev: u64) -> u32 {
    (((rdev >> 32) & 0xffff_f000) | ((rdev >> 8) & 0x0000_0fff)) as u32
}

/// Minor number of a Linux `dev_t`
fn dev_minor(rdev: u64) -> u32 {
    (((rdev >> 12) & 0xffff_ff00) | (rdev & 0x0000_00ff)) as u32
}

/// Build a complete ACI from a staged layout into `out`.
/// The layout is validated before anything is written.
pub fn build_aci<W: Write>(manifest: &ImageManifest, layer_root: &Path, out: W) -> Result<W> {
    let manifest_json = manifest.to_json()?;
    validate_layout(layer_root, &manifest_json)?;
    write_aci(&manifest_json, layer_root, out)
}

fn write_aci<W: Write>(manifest_json: &[u8], layer_root: &Path, out: W) -> Result<W> {
    let mut archive = ArchiveBuilder::new(out);
    archive.append_manifest(manifest_json)?;
    archive.append_tree(layer_root)?;
    archive.finish()
}

/// Build an ACI file at `target`; the file is removed if the build fails
pub fn build_aci_file(manifest: &ImageManifest, layer_root: &Path, target: &Path) -> Result<PathBuf> {
    let manifest_json = manifest.to_json()?;
    validate_layout(layer_root, &manifest_json)?;

    let file = File::create(target)
        .map_err(|e| ConvertError::io_at("Unable to open target", target, e))?;

    let result = write_aci(&manifest_json, layer_root, BufWriter::new(file)).and_then(|mut w| {
        w.flush().map_err(|e| ConvertError::io_at("flushing", target, e))?;
        w.into_inner()
            .map_err(|e| ConvertError::io_at("flushing", target, e.into_error()))?
            .sync_all()
            .map_err(|e| ConvertError::io_at("syncing", target, e))
    });

    if let Err(err) = result {
        let _ = fs::remove_file(target);
        return Err(err);
    }

    Ok(target.to_path_buf())
}
