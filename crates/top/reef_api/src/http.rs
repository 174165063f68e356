//! The real HTTP client over `ureq`.
//!
//! Listing responses are msgpack (significant at scale); control
//! requests and responses are json.

use std::io::Read as _;
use std::time::Duration;

use reef_types::{Bck, LsoMsg, LsoRes, PropsDelta, apc};

use crate::client::{ListError, PageClient};

pub struct HttpClient {
    agent: ureq::Agent,
    base_url: String,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into();
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            base_url,
            timeout,
        }
    }

    fn bucket_url(&self, bck: &Bck) -> String {
        format!("{}{}/{}", self.base_url, apc::URL_PATH_BUCKETS, bck.name)
    }

    /// Apply a validated property delta to a bucket.
    pub fn set_bucket_props(&self, bck: &Bck, delta: &PropsDelta) -> Result<(), ListError> {
        let msg = apc::ActMsg {
            action: "set-bprops".to_owned(),
            name: Some(bck.name.clone()),
            value: delta,
        };
        let body = serde_json::to_string(&msg).map_err(|err| ListError::Decode(err.to_string()))?;
        self.agent
            .put(&self.bucket_url(bck))
            .query("provider", bck.provider.as_str())
            .set(apc::HDR_CONTENT_TYPE, apc::CONTENT_JSON)
            .send_string(&body)
            .map_err(map_err)?;
        Ok(())
    }

    /// Admin-only: force-remove a node from the cluster.
    pub fn force_remove_node(&self, node_id: &str) -> Result<(), ListError> {
        let url = format!("{}{}/{node_id}", self.base_url, apc::URL_PATH_DAEMON_UNSAFE);
        self.agent.delete(&url).call().map_err(map_err)?;
        Ok(())
    }
}

impl PageClient for HttpClient {
    fn fetch_page(&self, bck: &Bck, msg: &LsoMsg) -> Result<LsoRes, ListError> {
        let act = apc::ActMsg {
            action: apc::ACT_LIST.to_owned(),
            name: Some(bck.name.clone()),
            value: msg,
        };
        let body = serde_json::to_string(&act).map_err(|err| ListError::Decode(err.to_string()))?;

        let resp = self
            .agent
            .request("GET", &self.bucket_url(bck))
            .query("provider", bck.provider.as_str())
            .set(apc::HDR_ACCEPT, apc::CONTENT_MSGPACK)
            .set(apc::HDR_CONTENT_TYPE, apc::CONTENT_JSON)
            .send_string(&body)
            .map_err(map_err)?;

        let mut bytes = Vec::new();
        resp.into_reader()
            .read_to_end(&mut bytes)
            .map_err(|err| ListError::Transport(err.to_string()))?;
        rmp_serde::from_slice(&bytes).map_err(|err| ListError::Decode(err.to_string()))
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clone_with_timeout(&self, timeout: Duration) -> Box<dyn PageClient> {
        Box::new(Self::new(self.base_url.clone(), timeout))
    }
}

fn map_err(err: ureq::Error) -> ListError {
    match err {
        ureq::Error::Status(status, resp) => ListError::Status {
            status,
            msg: resp.status_text().to_owned(),
        },
        ureq::Error::Transport(transport) => {
            if transport.kind() == ureq::ErrorKind::Io {
                ListError::Timeout(transport.to_string())
            } else {
                ListError::Transport(transport.to_string())
            }
        }
    }
}
