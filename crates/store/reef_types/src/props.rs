//! Bucket properties and the validated property-delta path.

use serde::{Deserialize, Serialize};

use crate::config::{EcConf, MirrorConf};

/// When (if ever) object metadata is written back to disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WritePolicy {
    #[default]
    Immediate,
    Delayed,
    Never,
}

/// Hard cap on EC parity slices; more parity than this reads as a typo.
pub const MAX_PARITY_SLICES: usize = 12;

pub const MAX_DATA_SLICES: usize = 32;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid mirror copies {copies} (have {mountpaths} mountpaths)")]
    MirrorCopies { copies: usize, mountpaths: usize },

    #[error("invalid EC config: {0} parity slices exceeds the {MAX_PARITY_SLICES} maximum")]
    ParitySlices(usize),

    #[error("invalid EC config: {0} data slices exceeds the {MAX_DATA_SLICES} maximum")]
    DataSlices(usize),

    #[error("invalid EC config: zero {0} slices")]
    ZeroSlices(&'static str),

    #[error("mirroring and erasure coding are mutually exclusive")]
    MirrorAndEc,

    #[error("invalid utilization threshold {0} (expecting 0..=100)")]
    UtilThreshold(i64),
}

// ----------------------------------------------------------------------------

/// Per-bucket properties, applied via validated deltas.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BckProps {
    #[serde(default)]
    pub mirror: MirrorConf,
    #[serde(default)]
    pub ec: EcConf,
    #[serde(default)]
    pub write_policy: WritePolicy,

    /// Serial number the bucket id is minted from (native buckets only).
    #[serde(default)]
    pub serial: u64,
}

/// A partial update to [`BckProps`]; `None` fields are left alone.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PropsDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror_copies: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror_util_threshold: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ec_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ec_data_slices: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ec_parity_slices: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ec_obj_size_limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_policy: Option<WritePolicy>,
}

impl BckProps {
    /// Apply a delta, validating the result against the current number of
    /// available mountpaths. The receiver is unchanged on error.
    pub fn apply(&self, delta: &PropsDelta, num_mountpaths: usize) -> Result<Self, ValidationError> {
        let mut next = self.clone();
        if let Some(enabled) = delta.mirror_enabled {
            next.mirror.enabled = enabled;
        }
        if let Some(copies) = delta.mirror_copies {
            next.mirror.copies = copies;
        }
        if let Some(thr) = delta.mirror_util_threshold {
            next.mirror.util_threshold = thr;
        }
        if let Some(enabled) = delta.ec_enabled {
            next.ec.enabled = enabled;
        }
        if let Some(d) = delta.ec_data_slices {
            next.ec.data_slices = d;
        }
        if let Some(p) = delta.ec_parity_slices {
            next.ec.parity_slices = p;
        }
        if let Some(lim) = delta.ec_obj_size_limit {
            next.ec.obj_size_limit = lim;
        }
        if let Some(wp) = delta.write_policy {
            next.write_policy = wp;
        }
        next.validate(num_mountpaths)?;
        Ok(next)
    }

    pub fn validate(&self, num_mountpaths: usize) -> Result<(), ValidationError> {
        if self.mirror.enabled && self.ec.enabled {
            return Err(ValidationError::MirrorAndEc);
        }
        if self.mirror.enabled {
            if self.mirror.copies < 2 || self.mirror.copies > num_mountpaths {
                return Err(ValidationError::MirrorCopies {
                    copies: self.mirror.copies,
                    mountpaths: num_mountpaths,
                });
            }
            if !(0..=100).contains(&self.mirror.util_threshold) {
                return Err(ValidationError::UtilThreshold(self.mirror.util_threshold));
            }
        }
        if self.ec.enabled {
            if self.ec.parity_slices == 0 {
                return Err(ValidationError::ZeroSlices("parity"));
            }
            if self.ec.data_slices == 0 {
                return Err(ValidationError::ZeroSlices("data"));
            }
            if self.ec.parity_slices > MAX_PARITY_SLICES {
                return Err(ValidationError::ParitySlices(self.ec.parity_slices));
            }
            if self.ec.data_slices > MAX_DATA_SLICES {
                return Err(ValidationError::DataSlices(self.ec.data_slices));
            }
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> BckProps {
        BckProps::default()
    }

    #[test]
    fn mirror_copies_bounded_by_mountpaths() {
        let delta = PropsDelta {
            mirror_enabled: Some(true),
            mirror_copies: Some(4),
            ..Default::default()
        };
        assert_eq!(
            props().apply(&delta, 3).unwrap_err(),
            ValidationError::MirrorCopies {
                copies: 4,
                mountpaths: 3
            }
        );
        assert!(props().apply(&delta, 4).is_ok());
    }

    #[test]
    fn parity_slice_cap() {
        let delta = PropsDelta {
            ec_enabled: Some(true),
            ec_data_slices: Some(4),
            ec_parity_slices: Some(13),
            ..Default::default()
        };
        assert_eq!(
            props().apply(&delta, 8).unwrap_err(),
            ValidationError::ParitySlices(13)
        );
    }

    #[test]
    fn mirror_and_ec_are_exclusive() {
        let delta = PropsDelta {
            mirror_enabled: Some(true),
            mirror_copies: Some(2),
            ec_enabled: Some(true),
            ec_data_slices: Some(2),
            ec_parity_slices: Some(2),
            ..Default::default()
        };
        assert_eq!(
            props().apply(&delta, 8).unwrap_err(),
            ValidationError::MirrorAndEc
        );
    }

    #[test]
    fn error_leaves_current_props_intact() {
        let cur = props();
        let delta = PropsDelta {
            ec_enabled: Some(true),
            ec_parity_slices: Some(99),
            ..Default::default()
        };
        let _ = cur.apply(&delta, 8).unwrap_err();
        assert_eq!(cur, props());
    }
}
