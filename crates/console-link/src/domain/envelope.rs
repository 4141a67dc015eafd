//! Wire envelopes exchanged with the management server.
//!
//! Every frame is one JSON object in a text frame.
//!
//! ```text
//! request:  {"action": "<name>", "id": "<uuid>", ...action-specific fields}
//! response: {"success": true|false, "id": "<uuid>", "data": ..., "error": "..."}
//! ```
//!
//! The login request carries no `id`; its reply is recognised by position
//! (see [`crate::login`]).

use crate::domain::correlation::RequestId;
use crate::domain::credential::Credential;
use crate::domain::error::{ClientError, ProtocolError, RemoteError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Action names understood by the server.
///
/// The client treats every action uniformly; these exist so callers do not
/// scatter string literals.
pub mod actions {
    pub const AUTH_LOGIN: &str = "auth_login";
    pub const FILE_GET: &str = "file_get";
    pub const CSV_READ: &str = "csv_read";
    pub const CSV_WRITE: &str = "csv_write";
    pub const LIST_MODELS: &str = "list_models";
    pub const LIST_MNGMT_VLAN: &str = "list_mngmt_vlan";
    pub const LIST_MASTERS: &str = "list_masters";
    pub const LIST_FIRMWARES: &str = "list_firmwares";
    pub const PING: &str = "ping";
    pub const DOWNLOAD_IMAGE: &str = "download_image";
    pub const SAVE_MNGMT_VLAN: &str = "save_mngmt_vlan";
    pub const SAVE_FIRMWARES: &str = "save_firmwares";

    /// Every known action, login included
    pub const ALL: &[&str] = &[
        AUTH_LOGIN,
        FILE_GET,
        CSV_READ,
        CSV_WRITE,
        LIST_MODELS,
        LIST_MNGMT_VLAN,
        LIST_MASTERS,
        LIST_FIRMWARES,
        PING,
        DOWNLOAD_IMAGE,
        SAVE_MNGMT_VLAN,
        SAVE_FIRMWARES,
    ];

    pub fn is_known(action: &str) -> bool {
        ALL.contains(&action)
    }
}

/// Keys the envelope itself owns; params may not shadow them.
const RESERVED_KEYS: [&str; 2] = ["action", "id"];

/// Outgoing envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl Request {
    /// Build a correlated request from any serialisable params.
    ///
    /// Params must serialise to a JSON object (or `null` for none).
    pub fn new(
        action: impl Into<String>,
        id: RequestId,
        params: impl Serialize,
    ) -> Result<Self, ClientError> {
        let action = action.into();
        if action.is_empty() {
            return Err(ClientError::InvalidParams("action name is empty".into()));
        }
        Ok(Self {
            action,
            id: Some(id),
            params: params_to_map(params)?,
        })
    }

    /// The uncorrelated login request.
    pub fn login(credential: &Credential) -> Self {
        let mut params = Map::new();
        params.insert("login".into(), Value::String(credential.login().to_owned()));
        params.insert(
            "password_hash".into(),
            Value::String(credential.password_hash().to_owned()),
        );
        Self {
            action: actions::AUTH_LOGIN.to_owned(),
            id: None,
            params,
        }
    }

    /// Serialise to the text carried in one frame.
    pub fn encode(&self) -> Result<String, ClientError> {
        serde_json::to_string(self).map_err(|e| ClientError::Encode(e.to_string()))
    }
}

/// Convert caller params into the flattened field map.
fn params_to_map(params: impl Serialize) -> Result<Map<String, Value>, ClientError> {
    let value = serde_json::to_value(params).map_err(|e| ClientError::Encode(e.to_string()))?;
    let map = match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(ClientError::InvalidParams(format!(
                "params must be a JSON object, got {}",
                json_kind(&other)
            )))
        }
    };
    if let Some(key) = RESERVED_KEYS.iter().find(|k| map.contains_key(**k)) {
        return Err(ClientError::InvalidParams(format!(
            "params may not contain the reserved key {key:?}"
        )));
    }
    Ok(map)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A decoded reply, minus its correlation id.
///
/// Fields the envelope does not name (for example the login reply's `user`)
/// are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            extra: Map::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            extra: Map::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Look up a field outside `data`/`error`.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Split into the payload or the server's error message.
    pub fn into_result(self) -> Result<Option<Value>, RemoteError> {
        if self.success {
            Ok(self.data)
        } else {
            Err(RemoteError::new(
                self.error.unwrap_or_else(|| "unspecified error".to_owned()),
            ))
        }
    }
}

/// One inbound frame: the raw correlation id (if any) and the response.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    pub id: Option<String>,
    pub response: Response,
}

impl InboundFrame {
    /// Decode a text frame.
    ///
    /// Non-string ids are kept in their JSON text form; they will not match
    /// any pending request and are treated as orphans by the caller.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;
        let Value::Object(mut map) = value else {
            return Err(ProtocolError::NotAnObject);
        };
        let id = match map.remove("id") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
        };
        let response =
            serde_json::from_value(Value::Object(map)).map_err(ProtocolError::InvalidShape)?;
        Ok(Self { id, response })
    }

    /// Decode a binary frame that carries UTF-8 JSON.
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::NotUtf8)?;
        Self::decode(text)
    }
}
