//! The cluster map: a versioned membership snapshot.

use ahash::HashMap;
use serde::{Deserialize, Serialize};

/// One storage target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tsi {
    pub id: String,

    /// Intra-cluster endpoint, opaque to the storage plane.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

impl Tsi {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: String::new(),
        }
    }
}

impl std::fmt::Display for Tsi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t[{}]", self.id)
    }
}

/// `t[<id>]`, for log lines that only have the id.
pub fn tname(id: &str) -> String {
    format!("t[{id}]")
}

// ----------------------------------------------------------------------------

/// Membership snapshot. Distribution and consensus live elsewhere; the
/// storage plane only ever reads these.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Smap {
    pub version: i64,
    pub tmap: HashMap<String, Tsi>,
}

impl Smap {
    pub fn get_target(&self, id: &str) -> Option<&Tsi> {
        self.tmap.get(id)
    }

    pub fn count_targets(&self) -> usize {
        self.tmap.len()
    }

    /// All targets except `self_id`, sorted by id for deterministic
    /// fan-out order.
    pub fn remote_targets(&self, self_id: &str) -> Vec<&Tsi> {
        let mut out: Vec<&Tsi> = self.tmap.values().filter(|t| t.id != self_id).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

impl std::fmt::Display for Smap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Smap v{}[t={}]", self.version, self.tmap.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_targets_excludes_self_and_sorts() {
        let mut smap = Smap {
            version: 3,
            ..Default::default()
        };
        for id in ["t3", "t1", "t2"] {
            smap.tmap.insert(id.to_owned(), Tsi::new(id));
        }
        let ids: Vec<&str> = smap
            .remote_targets("t2")
            .into_iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(ids, ["t1", "t3"]);
        assert!(smap.get_target("t9").is_none());
    }
}
