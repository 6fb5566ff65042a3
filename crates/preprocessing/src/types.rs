//! Shared preprocessing types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Output of one conditioning step; never mutated after creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreprocessedImageData {
    /// Locator of the derived guide image
    pub artifact_url: String,
    /// Operator that produced it (e.g. "pose", "depth")
    pub operator: String,
    /// Source node the input came from, when known
    #[serde(default)]
    pub source_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PreprocessedImageData {
    pub fn new(artifact_url: impl Into<String>, operator: impl Into<String>) -> Self {
        Self {
            artifact_url: artifact_url.into(),
            operator: operator.into(),
            source_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// Approximate memory footprint
    ///
    /// Dominated by the artifact locator, which may be an inline data URL.
    pub fn size_bytes(&self) -> usize {
        self.artifact_url.len()
            + self.operator.len()
            + self.source_id.as_ref().map_or(0, String::len)
            + std::mem::size_of::<Self>()
    }
}

/// Change to a canvas node's data, reported upstream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDataPatch {
    /// New preprocessed artifact; `None` clears it
    pub preprocessed_url: Option<String>,
    /// Last preprocessing error shown on the node
    pub error: Option<String>,
}

impl NodeDataPatch {
    pub fn preprocessed(url: impl Into<String>) -> Self {
        Self {
            preprocessed_url: Some(url.into()),
            error: None,
        }
    }

    pub fn cleared() -> Self {
        Self::default()
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            preprocessed_url: None,
            error: Some(error.into()),
        }
    }
}
