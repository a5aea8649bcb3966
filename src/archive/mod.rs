//! Tar handling on both sides of a conversion: unpacking Docker layer blobs
//! into a staging rootfs, and writing ACI archives from a staged layout.

pub mod builder;
pub mod extract;
pub mod layout;

pub use builder::{ArchiveBuilder, build_aci, build_aci_file};
pub use extract::{UnpackStats, is_gzipped, spool_blob, unpack_layer};
pub use layout::validate_layout;
