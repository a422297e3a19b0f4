//! Wire format of the permission socket: one JSON object per line.
//!
//! ```text
//! → {"type":"permission_request","requestId":"7f..","tool_name":"Bash","input":{"command":"ls"}}
//! ← {"type":"permission_response","requestId":"7f..","approved":true}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::PermissionError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    PermissionRequest(PermissionRequest),
    PermissionResponse(PermissionResponse),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionResponse {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub approved: bool,
}

impl PermissionRequest {
    /// The `command` field of a shell tool request.
    pub fn command(&self) -> Option<&str> {
        self.input.get("command").and_then(|v| v.as_str())
    }
}

impl GatewayMessage {
    pub fn parse(line: &str) -> Result<Self, PermissionError> {
        serde_json::from_str(line.trim()).map_err(|e| PermissionError::Protocol(e.to_string()))
    }

    /// Serialize as one newline-terminated line.
    pub fn to_line(&self) -> Result<String, PermissionError> {
        let mut line =
            serde_json::to_string(self).map_err(|e| PermissionError::Protocol(e.to_string()))?;
        line.push('\n');
        Ok(line)
    }
}
