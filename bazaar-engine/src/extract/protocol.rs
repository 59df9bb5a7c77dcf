//! Wire messages exchanged with the extraction collaborator.
//!
//! ```text
//! pull:  {"type":"EXTRACT"}  ->  {"success":true,"results":[...]}
//!                                {"success":false,"error":"..."}
//! push:  {"type":"<SITE>_RESULTS","results":[...]}
//! ```
//!
//! Replies and pushes arrive as raw JSON so a malformed payload is
//! reported as [`SearchError::Extraction`] at the correlation point rather
//! than by the platform. Inside a well-formed payload, a listing that does
//! not parse is dropped on its own.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::SearchError;
use crate::types::{ResultItem, Site};

/// Request sent to a worker's extraction collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExtractRequest {
    #[serde(rename = "EXTRACT")]
    Extract,
}

/// Direct reply to an [`ExtractRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractReply {
    Success(Vec<ResultItem>),
    Failure(String),
}

#[derive(Serialize, Deserialize)]
struct RawReply<T> {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    results: Option<Vec<T>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Deserialize)]
struct RawPush {
    #[serde(rename = "type")]
    message_type: String,
    results: Vec<Value>,
}

/// Parse listings one by one, dropping those that do not parse.
fn parse_items(values: Vec<Value>) -> Vec<ResultItem> {
    let total = values.len();
    let items: Vec<ResultItem> = values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(item) => Some(item),
            Err(e) => {
                debug!(error = %e, "dropping unparseable listing");
                None
            }
        })
        .collect();
    if items.len() < total {
        debug!(kept = items.len(), dropped = total - items.len(), "listings dropped");
    }
    items
}

impl ExtractReply {
    /// Parse a raw reply.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Extraction`] if the payload does not follow the
    /// reply shape, including a success reply without `results`. Individual
    /// listings that do not parse are dropped instead.
    pub fn parse(value: Value) -> Result<Self, SearchError> {
        let raw: RawReply<Value> = serde_json::from_value(value)
            .map_err(|e| SearchError::Extraction(format!("malformed extract reply: {e}")))?;
        match (raw.success, raw.results) {
            (true, Some(results)) => Ok(Self::Success(parse_items(results))),
            (true, None) => Err(SearchError::Extraction(
                "extract reply reported success without results".into(),
            )),
            (false, _) => Ok(Self::Failure(
                raw.error.unwrap_or_else(|| "unspecified extraction failure".into()),
            )),
        }
    }

    /// Serialise into the wire shape.
    pub fn to_value(&self) -> Value {
        let raw = match self {
            Self::Success(results) => RawReply {
                success: true,
                results: Some(results.clone()),
                error: None,
            },
            Self::Failure(error) => RawReply {
                success: false,
                results: None,
                error: Some(error.clone()),
            },
        };
        serde_json::to_value(raw).unwrap_or(Value::Null)
    }

    /// Turn the reply into results, mapping a failure reply to an error.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Extraction`] carrying the collaborator's message.
    pub fn into_results(self) -> Result<Vec<ResultItem>, SearchError> {
        match self {
            Self::Success(results) => Ok(results),
            Self::Failure(error) => Err(SearchError::Extraction(error)),
        }
    }
}

/// Results pushed by a collaborator without being asked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushNotification {
    #[serde(rename = "type")]
    pub message_type: String,
    pub results: Vec<ResultItem>,
}

impl PushNotification {
    pub fn new(site: Site, results: Vec<ResultItem>) -> Self {
        Self {
            message_type: site.push_message_type(),
            results,
        }
    }

    /// Parse a raw push message.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Extraction`] if the message is not a results
    /// push. Individual listings that do not parse are dropped instead.
    pub fn parse(value: Value) -> Result<Self, SearchError> {
        let raw: RawPush = serde_json::from_value(value)
            .map_err(|e| SearchError::Extraction(format!("malformed push message: {e}")))?;
        let push = Self {
            message_type: raw.message_type,
            results: parse_items(raw.results),
        };
        if push.site().is_none() {
            return Err(SearchError::Extraction(format!(
                "unknown push message type `{}`",
                push.message_type
            )));
        }
        Ok(push)
    }

    /// Site named by the message type.
    pub fn site(&self) -> Option<Site> {
        Site::all()
            .iter()
            .copied()
            .find(|site| site.push_message_type() == self.message_type)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
