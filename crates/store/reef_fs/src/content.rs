//! Content kinds: 2-char tags selecting a family of files.

/// A finished object.
pub const OBJECT: &str = "ob";

/// In-flight temporary; never visible to clients.
pub const WORKFILE: &str = "wk";

/// One erasure-coded slice.
pub const EC_SLICE: &str = "ec";

/// Erasure-coding metadata for an object.
pub const EC_META: &str = "mt";

/// The kinds registered at startup, in registration order.
pub const CONTENT_KINDS: [&str; 4] = [OBJECT, WORKFILE, EC_SLICE, EC_META];

pub(crate) fn is_valid_tag(tag: &str) -> bool {
    tag.len() == 2 && tag.bytes().all(|b| b.is_ascii_lowercase())
}
