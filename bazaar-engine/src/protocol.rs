//! Messages exchanged with the calling layer.
//!
//! ```text
//! {"type":"SEARCH","query":"...","criteria":{...}}
//!   -> {"success":true,"results":[...],"referencePriceItems":[...],"completedSites":[...]}
//!   -> {"success":false,"error":"..."}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::SearchError;
use crate::types::{AggregatedResponse, SearchRequest};

/// Request from the calling layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SearchMessage {
    #[serde(rename = "SEARCH")]
    Search(SearchRequest),
}

impl SearchMessage {
    /// # Errors
    ///
    /// Returns [`SearchError::Parse`] if `value` is not a known message.
    pub fn parse(value: serde_json::Value) -> Result<Self, SearchError> {
        serde_json::from_value(value)
            .map_err(|e| SearchError::Parse(format!("invalid search message: {e}")))
    }
}

/// Response to a [`SearchMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SearchResponse {
    Failure {
        success: bool,
        error: String,
    },
    Success {
        success: bool,
        #[serde(flatten)]
        response: AggregatedResponse,
    },
}

impl SearchResponse {
    pub fn success(response: AggregatedResponse) -> Self {
        Self::Success {
            success: true,
            response,
        }
    }

    pub fn failure(error: &SearchError) -> Self {
        Self::Failure {
            success: false,
            error: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn response(&self) -> Option<&AggregatedResponse> {
        match self {
            Self::Success { response, .. } => Some(response),
            Self::Failure { .. } => None,
        }
    }
}

impl From<Result<AggregatedResponse, SearchError>> for SearchResponse {
    fn from(result: Result<AggregatedResponse, SearchError>) -> Self {
        match result {
            Ok(response) => Self::success(response),
            Err(err) => Self::failure(&err),
        }
    }
}
