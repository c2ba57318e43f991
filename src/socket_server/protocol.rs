//! Socket server protocol message types
//!
//! Defines the JSON envelopes exchanged over the WebSocket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::watcher::FileData;

/// Inbound message types understood by the router
pub const ROOT_SUBSCRIBE: &str = "root_subscribe";
pub const FILE_SUBSCRIBE: &str = "file_subscribe";

/// Type used for replies that are not tied to a known request type
pub const ERROR: &str = "error";

/// Fixed error strings sent back to clients
pub mod errors {
    pub const BAD_EVENT_DATA_FORMAT: &str = "bad event data format";
    pub const UNKNOWN_MESSAGE_TYPE: &str = "unknown message type";
    pub const PARSING_PARAMS_FAILED: &str = "parsing params failed";
    pub const READING_FILE_FAILED: &str = "reading file failed";
}

/// Client-to-server envelope: `{"type": ..., "data": ...}`
///
/// Both fields are optional on the wire; a missing type routes to the
/// unknown-type reply and a missing payload is `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl ClientMessage {
    /// Parse one frame. Anything that is not a JSON object shaped like the
    /// envelope is rejected.
    pub fn parse(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

/// Payload of `file_subscribe`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FileSubscribeParams {
    pub name: String,
}

/// Server-to-client message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// `{"type": ..., "data": ...}`
    Data {
        #[serde(rename = "type")]
        kind: &'static str,
        data: Payload,
    },
    /// `{"type": ..., "success": false, "request_data": ..., "error": ...}`
    Error {
        #[serde(rename = "type")]
        kind: &'static str,
        success: bool,
        request_data: Value,
        error: String,
    },
}

/// Data carried by a normal server message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// Known file names
    Listing(Vec<String>),
    /// Parsed file content
    Points(FileData),
}

impl ServerMessage {
    /// Root snapshot or broadcast
    pub fn listing(names: Vec<String>) -> Self {
        Self::Data {
            kind: ROOT_SUBSCRIBE,
            data: Payload::Listing(names),
        }
    }

    /// File snapshot or broadcast
    pub fn file_content(data: FileData) -> Self {
        Self::Data {
            kind: FILE_SUBSCRIBE,
            data: Payload::Points(data),
        }
    }

    pub fn error(kind: &'static str, request_data: Value, message: &str) -> Self {
        Self::Error {
            kind,
            success: false,
            request_data,
            error: message.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Data { kind, .. } | Self::Error { kind, .. } => kind,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
