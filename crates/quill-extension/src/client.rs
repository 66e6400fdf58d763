use crate::errors::ExtensionError;
use crate::protocol::{Incoming, RawMessage, RpcError, read_message, write_message};
use serde_json::Value;
use std::collections::VecDeque;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, Stdin, Stdout};

/// Extension side of the protocol, for writing extensions in Rust.
///
/// Calls are sequential: `request` waits for its own response, and any other
/// message read meanwhile is queued for `next_message`.
#[derive(Debug)]
pub struct PluginConnection<R, W> {
    reader: BufReader<R>,
    writer: W,
    next_id: u64,
    backlog: VecDeque<Incoming>,
}

impl PluginConnection<Stdin, Stdout> {
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> PluginConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            next_id: 1,
            backlog: VecDeque::new(),
        }
    }

    /// Next inbound request or notification; `None` once the host hangs up.
    pub async fn next_message(&mut self) -> Result<Option<Incoming>, ExtensionError> {
        if let Some(message) = self.backlog.pop_front() {
            return Ok(Some(message));
        }
        match read_message(&mut self.reader).await? {
            Some(message) => message.classify().map(Some),
            None => Ok(None),
        }
    }

    pub async fn respond(&mut self, id: Value, result: Result<Value, RpcError>) -> Result<(), ExtensionError> {
        write_message(&mut self.writer, &RawMessage::response(id, result)).await
    }

    pub async fn notify(&mut self, method: &str, params: Vec<Value>) -> Result<(), ExtensionError> {
        write_message(&mut self.writer, &RawMessage::notification(method, params)).await
    }

    pub async fn request(&mut self, method: &str, params: Vec<Value>) -> Result<Value, ExtensionError> {
        let id = self.next_id;
        self.next_id += 1;
        write_message(&mut self.writer, &RawMessage::request(id, method, params)).await?;
        loop {
            let Some(message) = read_message(&mut self.reader).await? else {
                return Err(ExtensionError::ChannelClosed);
            };
            match message.classify()? {
                Incoming::Response { id: answered, result } if answered.as_u64() == Some(id) => {
                    return result.map_err(ExtensionError::from);
                }
                other => self.backlog.push_back(other),
            }
        }
    }
}
