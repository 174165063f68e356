//! Client-side API over the cluster's HTTP edge.
//!
//! The heart of it is the paged listing iterator: continuation-token
//! pagination with a bounded, timeout-escalating retry, and an optional
//! progress callback for very large buckets.

mod client;
mod http;
mod lso;

pub use client::{ListError, MAX_LIST_PAGE_RETRIES, PageClient};
pub use http::HttpClient;
pub use lso::{ListArgs, LsoCounter, list_objects, list_objects_page};
