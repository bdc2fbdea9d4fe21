//! Upload session lifecycle.
//!
//! Sessions move `Open -> Receiving -> Committed | Cancelled | Expired`.
//! Terminal states are immutable; offsets only grow.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Upload session identifier, surfaced as `Docker-Upload-UUID`.
pub type UploadId = Uuid;

/// Upload session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadState {
    Open,
    Receiving,
    Committed,
    Cancelled,
    Expired,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Receiving => "receiving",
            Self::Committed => "committed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Cancelled | Self::Expired)
    }

    /// Whether this session can still accept bytes or a commit.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Open | Self::Receiving)
    }

    /// Validate a transition to `next`.
    pub fn transition(&self, next: UploadState) -> Result<UploadState> {
        let ok = match (self, next) {
            (Self::Open, Self::Receiving) => true,
            (Self::Open | Self::Receiving, Self::Committed) => true,
            (Self::Open | Self::Receiving, Self::Cancelled) => true,
            (Self::Open | Self::Receiving, Self::Expired) => true,
            _ => false,
        };
        if ok {
            Ok(next)
        } else {
            Err(Error::InvalidState(format!(
                "upload transition {self} -> {next} not allowed"
            )))
        }
    }
}

impl FromStr for UploadState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(Self::Open),
            "receiving" => Ok(Self::Receiving),
            "committed" => Ok(Self::Committed),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            other => Err(Error::InvalidState(format!("unknown upload state: {other}"))),
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
