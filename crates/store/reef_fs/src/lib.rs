//! Mountpaths, content kinds, and the FQN on-disk naming scheme.
//!
//! An FQN ("fully qualified name") is the absolute path of one content
//! unit:
//!
//! ```text
//! <mountpath>/@<provider>/[@<uuid>][#<ns>/]<bucket>/%<kind>/<object-name>
//! ```
//!
//! Mountpath registration is prefix-monotone: no registered mountpath may
//! be a path prefix of another, which keeps [`MountedFs::parse_fqn`]
//! unambiguous.

pub mod attrs;
mod content;
mod fqn;
mod mountpath;

pub use content::{CONTENT_KINDS, EC_META, EC_SLICE, OBJECT, WORKFILE};
pub use fqn::ParsedFqn;
pub use mountpath::{FsError, MountedFs, Mountpath};
