//! Wire message types

use crate::codec::MAX_MESSAGE_SIZE;
use crate::error::{ProtocolError, ProtocolResult};
use cowrite_core::{Node, OperationKind};
use serde::{Deserialize, Serialize};

/// What a request does to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Set,
    Add,
    Insert,
    Update,
    Remove,
    Replace,
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RequestType::Set => "set",
            RequestType::Add => "add",
            RequestType::Insert => "insert",
            RequestType::Update => "update",
            RequestType::Remove => "remove",
            RequestType::Replace => "replace",
        };
        f.write_str(name)
    }
}

/// An operation as it travels on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOperation {
    /// Kind dependent payload, always transported as a string
    #[serde(default)]
    pub data: String,
    /// Text range start
    #[serde(default)]
    pub location: usize,
    /// Text range end, defaults to `location`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<usize>,
    pub kind: OperationKind,
    #[serde(default)]
    pub target_path: String,
    #[serde(default)]
    pub base_history_index: usize,
}

/// A request read from a client socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRequest {
    pub request_type: RequestType,
    pub operation: WireOperation,
}

impl ClientRequest {
    /// Decode a text frame
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        if text.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: text.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages a document server sends to its clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Initial state, sent once right after connecting
    #[serde(rename_all = "camelCase")]
    Init { contents: Node, history_index: usize },

    /// The originator's last operation was applied at `history_index`
    #[serde(rename_all = "camelCase")]
    Acknowledged { history_index: usize },

    /// The originator's last operation was refused; the session stays open
    Rejected { reason: String },

    /// Another client's operation, already transformed
    #[serde(rename_all = "camelCase")]
    Operation {
        history_index: usize,
        request_type: RequestType,
        operation: WireOperation,
    },
}

impl ServerMessage {
    pub fn init(contents: Node, history_index: usize) -> Self {
        ServerMessage::Init {
            contents,
            history_index,
        }
    }

    pub fn acknowledged(history_index: usize) -> Self {
        ServerMessage::Acknowledged { history_index }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        ServerMessage::Rejected {
            reason: reason.into(),
        }
    }

    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Reason attached to the close frame that ends a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The document is held by another editor
    Locked,
    /// The session broke the protocol or its transport failed
    Error,
    /// Orderly shutdown
    Terminating,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Locked => "locked",
            CloseReason::Error => "error",
            CloseReason::Terminating => "terminating",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
