use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub type ClientId = u32;

/// Id used by the shell hook and manual debugging; never evicted once seen.
pub const DEBUG_CLIENT_ID: ClientId = 0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("malformed request body: {0}")]
    Malformed(String),
    #[error("request is missing `{0}`")]
    MissingField(&'static str),
    #[error("unknown method `{0}`")]
    UnknownMethod(String),
}

/// Raw request envelope as it arrives on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Option<ClientId>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub editor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcCall {
    SetPath {
        client_id: ClientId,
        path: String,
        editor: Option<String>,
    },
    GetPath,
    IsRunning,
    Ping { client_id: ClientId },
    GitChange { name: String },
    Leave { client_id: ClientId },
    GetInfo,
    Shutdown,
}

impl RpcCall {
    pub fn method(&self) -> &'static str {
        match self {
            RpcCall::SetPath { .. } => "set_path",
            RpcCall::GetPath => "get_path",
            RpcCall::IsRunning => "is_running",
            RpcCall::Ping { .. } => "ping",
            RpcCall::GitChange { .. } => "git_change",
            RpcCall::Leave { .. } => "im_leaving",
            RpcCall::GetInfo => "get_info",
            RpcCall::Shutdown => "shutdown",
        }
    }
}

impl RpcRequest {
    pub fn parse(body: &[u8]) -> Result<Self, RpcError> {
        serde_json::from_slice(body).map_err(|err| RpcError::Malformed(err.to_string()))
    }

    fn client_id(&self) -> Result<ClientId, RpcError> {
        self.id.ok_or(RpcError::MissingField("id"))
    }

    fn param_str(&self, key: &'static str) -> Result<String, RpcError> {
        self.params
            .as_ref()
            .and_then(|params| params.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(RpcError::MissingField(key))
    }

    /// Resolves the envelope into a typed call, validating only the fields the
    /// chosen method actually needs.
    pub fn into_call(self) -> Result<RpcCall, RpcError> {
        let method = self
            .method
            .clone()
            .ok_or(RpcError::MissingField("method"))?;
        let call = match method.as_str() {
            "set_path" => RpcCall::SetPath {
                client_id: self.client_id()?,
                path: self.param_str("path")?,
                editor: self.editor.clone().filter(|name| !name.trim().is_empty()),
            },
            "get_path" => RpcCall::GetPath,
            "is_running" => RpcCall::IsRunning,
            "ping" => RpcCall::Ping {
                client_id: self.client_id()?,
            },
            "git_change" => RpcCall::GitChange {
                name: self.param_str("name")?,
            },
            "im_leaving" | "leave" => RpcCall::Leave {
                client_id: self.client_id()?,
            },
            "get_info" | "handle_get_info" => RpcCall::GetInfo,
            "shutdown" => RpcCall::Shutdown,
            _ => return Err(RpcError::UnknownMethod(method)),
        };
        Ok(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(body: &str) -> Result<RpcCall, RpcError> {
        RpcRequest::parse(body.as_bytes())?.into_call()
    }

    #[test]
    fn set_path_carries_editor_and_path() {
        let parsed = call(
            r#"{"id":42,"method":"set_path","params":{"path":"/work/app/src/main.rs"},"editor":"Neovim"}"#,
        )
        .expect("set_path");
        assert_eq!(
            parsed,
            RpcCall::SetPath {
                client_id: 42,
                path: "/work/app/src/main.rs".to_string(),
                editor: Some("Neovim".to_string()),
            }
        );
    }

    #[test]
    fn aliases_resolve_to_the_same_call() {
        assert_eq!(
            call(r#"{"id":3,"method":"leave"}"#),
            call(r#"{"id":3,"method":"im_leaving"}"#)
        );
        assert_eq!(
            call(r#"{"id":3,"method":"handle_get_info"}"#),
            Ok(RpcCall::GetInfo)
        );
    }

    #[test]
    fn missing_fields_are_reported_by_name() {
        assert_eq!(
            call(r#"{"method":"ping"}"#),
            Err(RpcError::MissingField("id"))
        );
        assert_eq!(
            call(r#"{"id":1,"method":"set_path","params":{}}"#),
            Err(RpcError::MissingField("path"))
        );
        assert_eq!(call(r#"{"id":1}"#), Err(RpcError::MissingField("method")));
        assert!(matches!(call("{nope"), Err(RpcError::Malformed(_))));
        assert_eq!(
            call(r#"{"id":1,"method":"launch"}"#),
            Err(RpcError::UnknownMethod("launch".to_string()))
        );
    }
}
