//! JSON-RPC 2.0 over `Content-Length` framed byte streams.

use crate::errors::ExtensionError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const JSONRPC_VERSION: &str = "2.0";
pub const MAX_FRAME_BYTES: usize = 256 * 1024 * 1024;

pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Methods implemented by the extension.
pub const GET_PLUGIN_NAMES: &str = "GetPluginNames";
pub const PROCESS: &str = "Process";

/// Methods implemented by the host, scoped to a session.
pub const READ_FILE: &str = "ReadFile";
pub const GET_VALUE: &str = "GetValue";
pub const LIST_INPUTS: &str = "ListInputs";
pub const WRITE_FILE: &str = "WriteFile";
pub const MESSAGE: &str = "Message";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("unknown method '{method}'"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }
}

impl From<RpcError> for ExtensionError {
    fn from(error: RpcError) -> Self {
        Self::Remote {
            code: error.code,
            message: error.message,
        }
    }
}

/// Wire shape shared by requests, notifications and responses.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RawMessage {
    pub fn request(id: u64, method: &str, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(Value::from(id)),
            method: Some(method.to_string()),
            params: Some(Value::Array(params)),
            ..Self::default()
        }
    }

    pub fn notification(method: &str, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: Some(method.to_string()),
            params: Some(Value::Array(params)),
            ..Self::default()
        }
    }

    pub fn response(id: Value, result: Result<Value, RpcError>) -> Self {
        let (result, error) = match result {
            Ok(value) => (Some(value), None),
            Err(error) => (None, Some(error)),
        };
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result,
            error,
            ..Self::default()
        }
    }

    pub fn classify(self) -> Result<Incoming, ExtensionError> {
        match (self.id, self.method) {
            (Some(id), Some(method)) => Ok(Incoming::Request {
                id,
                method,
                params: positional(self.params),
            }),
            (None, Some(method)) => Ok(Incoming::Notification {
                method,
                params: positional(self.params),
            }),
            (Some(id), None) => Ok(Incoming::Response {
                id,
                result: match self.error {
                    Some(error) => Err(error),
                    None => Ok(self.result.unwrap_or(Value::Null)),
                },
            }),
            (None, None) => Err(ExtensionError::Protocol(
                "message has neither an id nor a method".to_string(),
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Incoming {
    Request {
        id: Value,
        method: String,
        params: Vec<Value>,
    },
    Notification {
        method: String,
        params: Vec<Value>,
    },
    Response {
        id: Value,
        result: Result<Value, RpcError>,
    },
}

fn positional(params: Option<Value>) -> Vec<Value> {
    match params {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items,
        Some(other) => vec![other],
    }
}

/// Reads one frame body. `None` on a clean end of stream between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, ExtensionError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            if saw_header {
                return Err(ExtensionError::Protocol(
                    "stream ended inside a frame header".to_string(),
                ));
            }
            return Ok(None);
        }
        let header = line.trim_end_matches(['\r', '\n']);
        if header.is_empty() {
            if saw_header {
                break;
            }
            continue;
        }
        saw_header = true;
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| ExtensionError::Protocol(format!("malformed frame header '{header}'")))?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            let length = value.trim().parse::<usize>().map_err(|_| {
                ExtensionError::Protocol(format!("invalid Content-Length '{}'", value.trim()))
            })?;
            content_length = Some(length);
        }
    }

    let length = content_length
        .ok_or_else(|| ExtensionError::Protocol("frame is missing Content-Length".to_string()))?;
    if length > MAX_FRAME_BYTES {
        return Err(ExtensionError::Protocol(format!(
            "frame of {length} bytes exceeds the {MAX_FRAME_BYTES} byte limit"
        )));
    }
    let mut body = vec![0; length];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<(), ExtensionError>
where
    W: AsyncWrite + Unpin,
{
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_message<R>(reader: &mut R) -> Result<Option<RawMessage>, ExtensionError>
where
    R: AsyncBufRead + Unpin,
{
    let Some(body) = read_frame(reader).await? else {
        return Ok(None);
    };
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|err| ExtensionError::Protocol(format!("invalid JSON-RPC message: {err}")))
}

pub async fn write_message<W>(writer: &mut W, message: &RawMessage) -> Result<(), ExtensionError>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(message)
        .map_err(|err| ExtensionError::Protocol(format!("message is not serializable: {err}")))?;
    write_frame(writer, &body).await
}

/// String parameter at `index`.
pub fn string_param(params: &[Value], index: usize) -> Result<String, RpcError> {
    match params.get(index) {
        Some(Value::String(text)) => Ok(text.clone()),
        _ => Err(RpcError::invalid_params(format!(
            "parameter {index} must be a string"
        ))),
    }
}

/// Optional string parameter at `index`; `null` and absent are `None`.
pub fn optional_string_param(params: &[Value], index: usize) -> Option<String> {
    params.get(index).and_then(Value::as_str).map(ToOwned::to_owned)
}
