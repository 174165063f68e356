//! Buckets: named containers of objects, native or cloud-backed.

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------

/// Storage backends. `Reef` is the cluster-native provider; the rest are
/// remote clouds a bucket may be backed by.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Reef,
    #[serde(rename = "aws")]
    Amazon,
    #[serde(rename = "gcp")]
    Google,
    Azure,
    Oci,
    #[serde(rename = "ht")]
    Http,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown storage provider {0:?}")]
pub struct UnknownProvider(pub String);

impl Provider {
    /// The on-disk / on-wire tag, as it appears after `@` in an FQN.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reef => "reef",
            Self::Amazon => "aws",
            Self::Google => "gcp",
            Self::Azure => "azure",
            Self::Oci => "oci",
            Self::Http => "ht",
        }
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, Self::Reef)
    }
}

impl std::str::FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reef" => Ok(Self::Reef),
            "aws" => Ok(Self::Amazon),
            "gcp" => Ok(Self::Google),
            "azure" => Ok(Self::Azure),
            "oci" => Ok(Self::Oci),
            "ht" => Ok(Self::Http),
            _ => Err(UnknownProvider(s.to_owned())),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------

/// Bucket namespace. The global namespace is the empty one.
///
/// A remote cluster's namespace additionally carries that cluster's uuid.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ns {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

impl Ns {
    pub const GLOBAL: Self = Self {
        uuid: String::new(),
        name: String::new(),
    };

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            uuid: String::new(),
            name: name.into(),
        }
    }

    pub fn is_global(&self) -> bool {
        self.uuid.is_empty() && self.name.is_empty()
    }

    /// `#` for global, `#name`, or `@uuid#name`.
    pub fn uname(&self) -> String {
        if self.uuid.is_empty() {
            format!("#{}", self.name)
        } else {
            format!("@{}#{}", self.uuid, self.name)
        }
    }

    pub fn parse_uname(s: &str) -> Option<Self> {
        if let Some(rest) = s.strip_prefix('@') {
            let (uuid, name) = rest.split_once('#')?;
            (!uuid.is_empty()).then(|| Self {
                uuid: uuid.to_owned(),
                name: name.to_owned(),
            })
        } else {
            let name = s.strip_prefix('#')?;
            Some(Self::named(name))
        }
    }
}

// ----------------------------------------------------------------------------

/// A bucket: `(provider, namespace, name)`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bck {
    pub name: String,
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Ns::is_global")]
    pub ns: Ns,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid unique name {0:?}")]
pub struct ParseUnameError(pub String);

impl Bck {
    pub fn new(name: impl Into<String>, provider: Provider) -> Self {
        Self {
            name: name.into(),
            provider,
            ns: Ns::GLOBAL,
        }
    }

    pub fn with_ns(name: impl Into<String>, provider: Provider, ns: Ns) -> Self {
        Self {
            name: name.into(),
            provider,
            ns,
        }
    }

    pub fn is_native(&self) -> bool {
        !self.provider.is_remote()
    }

    /// Unique name of an object in this bucket:
    /// `<provider>/<ns-uname>/<bucket>/<object>`.
    ///
    /// Object names may contain `/`; parsing splits on the first three
    /// separators only.
    pub fn make_uname(&self, obj_name: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.provider.as_str(),
            self.ns.uname(),
            self.name,
            obj_name
        )
    }

    pub fn parse_uname(uname: &str) -> Result<(Self, String), ParseUnameError> {
        let err = || ParseUnameError(uname.to_owned());

        let mut it = uname.splitn(4, '/');
        let provider: Provider = it.next().ok_or_else(err)?.parse().map_err(|_| err())?;
        let ns = Ns::parse_uname(it.next().ok_or_else(err)?).ok_or_else(err)?;
        let name = it.next().ok_or_else(err)?;
        let obj = it.next().ok_or_else(err)?;
        if name.is_empty() || obj.is_empty() {
            return Err(err());
        }
        Ok((
            Self {
                name: name.to_owned(),
                provider,
                ns,
            },
            obj.to_owned(),
        ))
    }
}

impl std::fmt::Display for Bck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.ns.is_global() {
            write!(f, "{}://{}", self.provider, self.name)
        } else {
            write!(f, "{}://{}/{}", self.provider, self.ns.uname(), self.name)
        }
    }
}

// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_tags_roundtrip() {
        for p in [
            Provider::Reef,
            Provider::Amazon,
            Provider::Google,
            Provider::Azure,
            Provider::Oci,
            Provider::Http,
        ] {
            assert_eq!(p.as_str().parse::<Provider>().unwrap(), p);
        }
        assert!("s3".parse::<Provider>().is_err());
    }

    #[test]
    fn uname_roundtrip() {
        let cases = [
            Bck::new("bkt", Provider::Reef),
            Bck::with_ns("bkt", Provider::Amazon, Ns::named("prod")),
            Bck::with_ns(
                "b",
                Provider::Reef,
                Ns {
                    uuid: "u1".into(),
                    name: "remote".into(),
                },
            ),
        ];
        for bck in cases {
            let uname = bck.make_uname("a/b/c");
            let (back, obj) = Bck::parse_uname(&uname).unwrap();
            assert_eq!(back, bck, "{uname}");
            assert_eq!(obj, "a/b/c");
        }
    }

    #[test]
    fn uname_rejects_garbage() {
        for bad in ["", "reef", "reef/#", "reef/#/b", "reef/#/b/", "s3/#/b/o", "reef/ns/b/o"] {
            assert!(Bck::parse_uname(bad).is_err(), "{bad:?}");
        }
    }
}
