//! Action and route constants shared with the HTTP edge.

use serde::{Deserialize, Serialize};

/// The control envelope of bucket-level requests.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActMsg<T> {
    pub action: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub value: T,
}

// Activity kinds. Also the keys of the per-bucket activity tables: at most
// one unfinished activity per (bucket, kind).
pub const ACT_EC_GET: &str = "ec-get";
pub const ACT_EC_PUT: &str = "ec-put";
pub const ACT_EC_RESPOND: &str = "ec-respond";
pub const ACT_MAKE_N_COPIES: &str = "make-n-copies";
pub const ACT_LOAD_LOM_CACHE: &str = "load-lom-cache";
pub const ACT_PUT_COPIES: &str = "put-copies";
pub const ACT_COPY_BCK: &str = "copy-bucket";
pub const ACT_ETL_BCK: &str = "etl-bucket";
pub const ACT_COPY_OBJECTS: &str = "copy-objects";
pub const ACT_ETL_OBJECTS: &str = "etl-objects";
pub const ACT_ARCHIVE: &str = "archive";
pub const ACT_LIST: &str = "list-objects";
pub const ACT_PREFETCH: &str = "prefetch";
pub const ACT_EVICT_OBJECTS: &str = "evict-objects";
pub const ACT_DELETE_OBJECTS: &str = "delete-objects";
pub const ACT_BCK_RENAME: &str = "bucket-rename";
pub const ACT_NS_SUMMARY: &str = "namespace-summary";
pub const ACT_RESILVER: &str = "resilver";
pub const ACT_REBALANCE: &str = "rebalance";
pub const ACT_ELECTION: &str = "election";
pub const ACT_BLOB_DOWNLOAD: &str = "blob-download";

// Routes (the edge owns dispatch; these are the paths the storage plane
// is reachable under).
pub const URL_PATH_BUCKETS: &str = "/v1/buckets";
pub const URL_PATH_OBJECTS: &str = "/v1/objects";
pub const URL_PATH_DAEMON_UNSAFE: &str = "/v1/daemon/unsafe";

// Content types.
pub const CONTENT_JSON: &str = "application/json";
pub const CONTENT_MSGPACK: &str = "application/msgpack";

pub const HDR_ACCEPT: &str = "Accept";
pub const HDR_CONTENT_TYPE: &str = "Content-Type";
