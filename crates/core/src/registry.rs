//! Registry and upstream enumerations.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a registry sources its content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryType {
    /// Stores content pushed to it directly.
    Virtual,
    /// Proxy façade over one configured remote, caching into its own storage.
    Upstream,
}

impl RegistryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Virtual => "virtual",
            Self::Upstream => "upstream",
        }
    }
}

impl FromStr for RegistryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "virtual" => Ok(Self::Virtual),
            "upstream" => Ok(Self::Upstream),
            other => Err(Error::InvalidState(format!("unknown registry type: {other}"))),
        }
    }
}

impl fmt::Display for RegistryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Artifact format served by a registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    Docker,
    Helm,
    Generic,
}

impl PackageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Helm => "helm",
            Self::Generic => "generic",
        }
    }
}

impl FromStr for PackageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "docker" => Ok(Self::Docker),
            "helm" => Ok(Self::Helm),
            "generic" => Ok(Self::Generic),
            other => Err(Error::InvalidState(format!("unknown package type: {other}"))),
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How to authenticate against an upstream remote.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamAuthMode {
    Anonymous,
    Basic,
    /// Challenge-driven bearer token exchange (Docker Hub, GHCR, ...).
    Token,
}

impl UpstreamAuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Basic => "basic",
            Self::Token => "token",
        }
    }
}

impl FromStr for UpstreamAuthMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "anonymous" => Ok(Self::Anonymous),
            "basic" => Ok(Self::Basic),
            "token" => Ok(Self::Token),
            other => Err(Error::InvalidState(format!("unknown auth mode: {other}"))),
        }
    }
}

impl fmt::Display for UpstreamAuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_roundtrips() {
        for t in [RegistryType::Virtual, RegistryType::Upstream] {
            assert_eq!(t.as_str().parse::<RegistryType>().unwrap(), t);
        }
        for t in [PackageType::Docker, PackageType::Helm, PackageType::Generic] {
            assert_eq!(t.as_str().parse::<PackageType>().unwrap(), t);
        }
        for t in [
            UpstreamAuthMode::Anonymous,
            UpstreamAuthMode::Basic,
            UpstreamAuthMode::Token,
        ] {
            assert_eq!(t.as_str().parse::<UpstreamAuthMode>().unwrap(), t);
        }
        assert!("bogus".parse::<RegistryType>().is_err());
    }
}
