//! Platform feed messages (NDJSON, one message per line)

use curfew_util::PackageId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Messages delivered by the platform integration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    /// An application came to the foreground
    Foreground { package: PackageId },

    /// The user-authored selection set changed (full replacement)
    Selection { packages: Vec<PackageId> },
}

/// Errors decoding a feed line
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Malformed feed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Empty package id")]
    EmptyPackage,
}

impl FeedMessage {
    /// Decode one NDJSON line
    pub fn parse_line(line: &str) -> Result<Self, FeedError> {
        let msg: FeedMessage = serde_json::from_str(line.trim())?;
        match &msg {
            FeedMessage::Foreground { package } if package.as_str().is_empty() => {
                Err(FeedError::EmptyPackage)
            }
            _ => Ok(msg),
        }
    }
}
