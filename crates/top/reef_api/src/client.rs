//! The page-fetching contract and its bounded retry.

use std::time::Duration;

use reef_types::{Bck, LsoMsg, LsoRes};

pub const MAX_LIST_PAGE_RETRIES: usize = 3;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ListError {
    #[error("client timeout: {0}")]
    Timeout(String),

    #[error("http status {status}: {msg}")]
    Status { status: u16, msg: String },

    #[error("transport: {0}")]
    Transport(String),

    #[error("failed to decode page: {0}")]
    Decode(String),

    #[error("page uuid changed mid-listing ({was:?} -> {got:?})")]
    UuidChanged { was: String, got: String },
}

impl ListError {
    pub fn is_client_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// One HTTP(ish) client able to fetch a single listing page.
///
/// Escalation clones the client rather than mutating it: an in-flight
/// listing must not change the timeout other callers see.
pub trait PageClient: Send + Sync {
    fn fetch_page(&self, bck: &Bck, msg: &LsoMsg) -> Result<LsoRes, ListError>;

    fn timeout(&self) -> Duration;

    fn clone_with_timeout(&self, timeout: Duration) -> Box<dyn PageClient>;
}

/// Fetch one page with limited retry and increasing timeout.
///
/// Only client timeouts are retried; each retry runs on a clone with
/// `timeout += timeout/2`. Any other error aborts immediately.
pub(crate) fn lso_page(
    client: &mut Box<dyn PageClient>,
    bck: &Bck,
    msg: &LsoMsg,
) -> Result<LsoRes, ListError> {
    let mut last_err = None;
    for _ in 0..MAX_LIST_PAGE_RETRIES {
        match client.fetch_page(bck, msg) {
            Ok(page) => return Ok(page),
            Err(err) if err.is_client_timeout() => {
                let timeout = client.timeout();
                *client = client.clone_with_timeout(timeout + timeout / 2);
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_err.unwrap_or_else(|| ListError::Transport("no attempts made".to_owned())))
}
