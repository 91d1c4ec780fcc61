//! Cross-node messaging envelope

use chakra_relay::{SessionDescription, StreamId};
use serde::{Deserialize, Serialize};

/// Channel prefix; each node listens on `chakra.<node_id>`
pub const CHANNEL_PREFIX: &str = "chakra.";

#[must_use]
pub fn node_channel(node_id: &str) -> String {
    format!("{CHANNEL_PREFIX}{node_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeType {
    CreatePeer,
    CreatePeerResult,
}

impl EnvelopeType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreatePeer => "create-peer",
            Self::CreatePeerResult => "create-peer-result",
        }
    }
}

/// Message published on a node channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    pub target_node_id: String,
    /// Node the response is addressed to
    pub source_node_id: String,
    pub correlation_id: String,
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Dedup key; a request and its response share a correlation id
    #[must_use]
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.correlation_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePeerRequest {
    pub stream_id: StreamId,
    pub offer: SessionDescription,
}

/// Error carried back to the requesting node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub code: String,
    pub message: String,
}

impl From<&chakra_core::Error> for RemoteError {
    fn from(err: &chakra_core::Error) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<RemoteError> for chakra_core::Error {
    fn from(err: RemoteError) -> Self {
        Self::from_code(&err.code, err.message)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePeerResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

impl CreatePeerResponse {
    #[must_use]
    pub fn from_result(result: &chakra_core::Result<SessionDescription>) -> Self {
        match result {
            Ok(answer) => Self {
                answer: Some(answer.clone()),
                error: None,
            },
            Err(e) => Self {
                answer: None,
                error: Some(RemoteError::from(e)),
            },
        }
    }

    pub fn into_result(self) -> chakra_core::Result<SessionDescription> {
        match (self.answer, self.error) {
            (_, Some(error)) => Err(error.into()),
            (Some(answer), None) => Ok(answer),
            (None, None) => Err(chakra_core::Error::Internal(
                "remote response carried neither answer nor error".to_string(),
            )),
        }
    }
}
