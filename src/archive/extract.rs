//! Layer blob spooling and extraction into a staging rootfs

use crate::error::{ConvertError, Result};
use crate::logging::Logger;
use crate::registry::BodyStream;
use flate2::read::GzDecoder;
use futures::StreamExt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use tokio::io::AsyncWriteExt;

/// Counters from one extraction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpackStats {
    pub entries: usize,
    pub skipped_devices: usize,
    pub skipped_paths: usize,
}

/// Write a blob stream to `dest`, returning the number of bytes written
pub async fn spool_blob(mut stream: BodyStream, dest: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| ConvertError::io_at("creating", dest, e))?;

    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)
            .await
            .map_err(|e| ConvertError::io_at("writing", dest, e))?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(|e| ConvertError::io_at("flushing", dest, e))?;
    Ok(written)
}

/// Check if data is in gzip format by examining the gzip magic number (0x1f 0x8b)
pub fn is_gzipped(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

/// Open a layer blob as a tar stream, decompressing gzip transparently
fn open_layer(blob: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(blob).map_err(|e| ConvertError::io_at("opening", blob, e))?;
    let mut reader = BufReader::new(file);
    let head = reader
        .fill_buf()
        .map_err(|e| ConvertError::io_at("reading", blob, e))?;

    if is_gzipped(head) {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

/// Unpack a Docker layer tarball into `rootfs`.
///
/// Ownership recorded in the archive is never applied, so extracted files
/// belong to the current user. Device nodes that need privileges to create
/// are skipped. Directory permissions are applied after all entries are in
/// place so read-only directories can still be populated.
pub fn unpack_layer(blob: &Path, rootfs: &Path, logger: &Logger) -> Result<UnpackStats> {
    let mut archive = Archive::new(open_layer(blob)?);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_preserve_ownerships(false);
    archive.set_unpack_xattrs(false);
    archive.set_overwrite(true);

    let mut stats = UnpackStats::default();
    let mut dir_modes: Vec<(PathBuf, u32)> = Vec::new();

    let entries = archive
        .entries()
        .map_err(|e| ConvertError::io("Error untaring image", e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| ConvertError::io("Error untaring image", e))?;
        let path = entry
            .path()
            .map_err(|e| ConvertError::io("Error reading entry path", e))?
            .into_owned();
        stats.entries += 1;

        match entry.header().entry_type() {
            EntryType::Directory => {
                let Some(rel) = contained_path(&path) else {
                    logger.warning(&format!("Skipping entry outside rootfs: {}", path.display()));
                    stats.skipped_paths += 1;
                    continue;
                };
                let dir = rootfs.join(&rel);
                fs::create_dir_all(&dir).map_err(|e| ConvertError::io_at("creating", &dir, e))?;
                if let Ok(mode) = entry.header().mode() {
                    dir_modes.push((dir, mode & 0o7777));
                }
            }
            EntryType::Char | EntryType::Block => match entry.unpack_in(rootfs) {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                    logger.warning(&format!(
                        "Skipping device node {} (requires privileges)",
                        path.display()
                    ));
                    stats.skipped_devices += 1;
                }
                Err(e) => {
                    return Err(ConvertError::io(format!("Error untaring {}", path.display()), e));
                }
            },
            _ => {
                let unpacked = entry
                    .unpack_in(rootfs)
                    .map_err(|e| ConvertError::io(format!("Error untaring {}", path.display()), e))?;
                if !unpacked {
                    logger.warning(&format!("Skipping entry outside rootfs: {}", path.display()));
                    stats.skipped_paths += 1;
                }
            }
        }
    }

    // Deepest first so a parent's mode never blocks a child's chmod
    dir_modes.sort_by(|a, b| b.0.components().count().cmp(&a.0.components().count()));
    for (dir, mode) in dir_modes {
        fs::set_permissions(&dir, fs::Permissions::from_mode(mode))
            .map_err(|e| ConvertError::io_at("setting permissions on", &dir, e))?;
    }

    logger.detail(&format!(
        "Extracted {} entries ({} device nodes skipped)",
        stats.entries, stats.skipped_devices
    ));
    Ok(stats)
}

/// Relative form of an archive path, or `None` if it would escape the root
fn contained_path(path: &Path) -> Option<PathBuf> {
    let mut rel = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => rel.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => return None,
        }
    }
    Some(rel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::tempdir;

    fn layer_tar() -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());

        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(EntryType::Directory);
        dir.set_mode(0o555);
        dir.set_size(0);
        builder.append_data(&mut dir, "etc", std::io::empty()).unwrap();

        let data = b"root:x:0:0:root:/root:/bin/sh\n";
        let mut file = tar::Header::new_gnu();
        file.set_size(data.len() as u64);
        file.set_mode(0o644);
        file.set_uid(0);
        file.set_gid(0);
        builder.append_data(&mut file, "etc/passwd", &data[..]).unwrap();

        let mut link = tar::Header::new_gnu();
        link.set_entry_type(EntryType::Symlink);
        link.set_size(0);
        builder.append_link(&mut link, "passwd-link", "etc/passwd").unwrap();

        let mut hard = tar::Header::new_gnu();
        hard.set_entry_type(EntryType::Link);
        hard.set_size(0);
        builder.append_link(&mut hard, "passwd-hard", "etc/passwd").unwrap();

        builder.into_inner().unwrap()
    }

    #[test]
    fn test_is_gzipped() {
        assert!(is_gzipped(&[0x1f, 0x8b, 0x08]));
        assert!(!is_gzipped(&[0x00, 0x00, 0x00]));
        assert!(!is_gzipped(&[0x1f]));
    }

    #[test]
    fn test_unpack_plain_tar() {
        let dir = tempdir().unwrap();
        let blob = dir.path().join("layer.tar");
        fs::write(&blob, layer_tar()).unwrap();
        let rootfs = dir.path().join("rootfs");
        fs::create_dir(&rootfs).unwrap();

        let stats = unpack_layer(&blob, &rootfs, &Logger::new_quiet()).unwrap();
        assert_eq!(stats.entries, 4);

        assert_eq!(
            fs::read_to_string(rootfs.join("etc/passwd")).unwrap(),
            "root:x:0:0:root:/root:/bin/sh\n"
        );
        assert_eq!(fs::read_link(rootfs.join("passwd-link")).unwrap(), Path::new("etc/passwd"));
        assert_eq!(fs::read_to_string(rootfs.join("passwd-hard")).unwrap().len(), 30);

        let mode = fs::metadata(rootfs.join("etc")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o555);
        fs::set_permissions(rootfs.join("etc"), fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_unpack_gzipped_tar() {
        let dir = tempdir().unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&layer_tar()).unwrap();
        let blob = dir.path().join("layer.tar.gz");
        fs::write(&blob, encoder.finish().unwrap()).unwrap();
        let rootfs = dir.path().join("rootfs");
        fs::create_dir(&rootfs).unwrap();

        unpack_layer(&blob, &rootfs, &Logger::new_quiet()).unwrap();
        assert!(rootfs.join("etc/passwd").is_file());
        fs::set_permissions(rootfs.join("etc"), fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_unpack_garbage_fails() {
        let dir = tempdir().unwrap();
        let blob = dir.path().join("layer.tar");
        fs::write(&blob, vec![0x42u8; 1024]).unwrap();
        let rootfs = dir.path().join("rootfs");
        fs::create_dir(&rootfs).unwrap();

        assert!(unpack_layer(&blob, &rootfs, &Logger::new_quiet()).is_err());
    }

    #[test]
    fn test_contained_path() {
        assert_eq!(contained_path(Path::new("./usr/bin")), Some(PathBuf::from("usr/bin")));
        assert_eq!(contained_path(Path::new("/etc")), Some(PathBuf::from("etc")));
        assert_eq!(contained_path(Path::new("../etc")), None);
    }

    #[tokio::test]
    async fn test_spool_blob() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("blob");
        let chunks: Vec<Result<Bytes>> = vec![Ok(Bytes::from_static(b"abc")), Ok(Bytes::from_static(b"def"))];
        let stream: BodyStream = Box::pin(futures::stream::iter(chunks));

        let written = spool_blob(stream, &dest).await.unwrap();
        assert_eq!(written, 6);
        assert_eq!(fs::read(&dest).unwrap(), b"abcdef");
    }
}
