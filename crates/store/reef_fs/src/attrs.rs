//! Named attribute blobs attached to content units.
//!
//! Attributes are persisted as hidden sidecar files next to the content
//! unit (`<dir>/.<file>.#<name>`), written atomically via rename. Walkers
//! must skip sidecar names — see [`is_sidecar`].

use std::io;
use std::path::{Path, PathBuf};

/// Packed object metadata.
pub const LOM_ATTR: &str = "lmd";

/// Access time, big-endian `i64` nanoseconds.
pub const ATIME_ATTR: &str = "atime";

pub fn sidecar_path(fqn: &Path, name: &str) -> PathBuf {
    let file = fqn
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    fqn.with_file_name(format!(".{file}.#{name}"))
}

/// Whether a directory entry is an attribute sidecar.
pub fn is_sidecar(file_name: &str) -> bool {
    file_name.starts_with('.') && file_name.contains(".#")
}

pub fn set_attr(fqn: &Path, name: &str, data: &[u8]) -> io::Result<()> {
    let dst = sidecar_path(fqn, name);
    let tmp = PathBuf::from(format!("{}.partial", dst.display()));
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, &dst)
}

/// `Ok(None)` when the attribute was never written.
pub fn get_attr(fqn: &Path, name: &str) -> io::Result<Option<Vec<u8>>> {
    match std::fs::read(sidecar_path(fqn, name)) {
        Ok(data) => Ok(Some(data)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

pub fn remove_attr(fqn: &Path, name: &str) -> io::Result<()> {
    match std::fs::remove_file(sidecar_path(fqn, name)) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

// ----------------------------------------------------------------------------
