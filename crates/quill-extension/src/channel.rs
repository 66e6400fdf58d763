use crate::errors::ExtensionError;
use crate::protocol::{Incoming, RawMessage, RpcError, read_message, write_message};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type PendingResponse = oneshot::Sender<Result<Value, RpcError>>;

/// Receives the requests and notifications the remote side sends us.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle_request(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError>;

    async fn handle_notification(&self, method: &str, params: Vec<Value>);
}

/// Handler for channels that never expect inbound calls.
#[derive(Debug, Default)]
pub struct RejectInbound;

#[async_trait]
impl InboundHandler for RejectInbound {
    async fn handle_request(&self, method: &str, _params: Vec<Value>) -> Result<Value, RpcError> {
        Err(RpcError::method_not_found(method))
    }

    async fn handle_notification(&self, method: &str, _params: Vec<Value>) {
        tracing::warn!(method, "dropping unexpected notification");
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    Errored(String),
    Closed,
}

impl ChannelState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

struct ChannelShared {
    name: String,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingResponse>>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<RawMessage>>>,
    state: watch::Sender<ChannelState>,
}

impl ChannelShared {
    fn send(&self, message: RawMessage) -> Result<(), ExtensionError> {
        match lock(&self.outgoing).as_ref() {
            Some(sender) => sender.send(message).map_err(|_| ExtensionError::ChannelClosed),
            None => Err(ExtensionError::ChannelClosed),
        }
    }

    /// Moves an open channel into `next`. Later transitions are ignored.
    fn finish(&self, next: ChannelState) {
        let changed = self.state.send_if_modified(|state| {
            if state.is_open() {
                *state = next.clone();
                true
            } else {
                false
            }
        });
        if changed {
            tracing::debug!(channel = %self.name, state = ?next, "extension channel finished");
        }
        lock(&self.pending).clear();
    }

    fn failure(&self) -> ExtensionError {
        match &*self.state.borrow() {
            ChannelState::Errored(reason) => ExtensionError::ChannelFailed(reason.clone()),
            ChannelState::Open | ChannelState::Closed => ExtensionError::ChannelClosed,
        }
    }

    fn resolve(&self, id: &Value, result: Result<Value, RpcError>) {
        let pending = id.as_u64().and_then(|id| lock(&self.pending).remove(&id));
        match pending {
            Some(sender) => {
                let _ = sender.send(result);
            }
            None => tracing::warn!(channel = %self.name, id = %id, "response for unknown request"),
        }
    }
}

/// Bidirectional JSON-RPC endpoint over a pair of byte streams.
///
/// Outbound requests are correlated by id and race their response against
/// the channel closing or erroring, so a dead peer surfaces as an error
/// instead of a hang.
pub struct ExtensionChannel {
    shared: Arc<ChannelShared>,
    state: watch::Receiver<ChannelState>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl ExtensionChannel {
    pub fn connect<R, W>(
        name: impl Into<String>,
        reader: R,
        writer: W,
        handler: Arc<dyn InboundHandler>,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::Open);
        let shared = Arc::new(ChannelShared {
            name: name.into(),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            outgoing: Mutex::new(Some(outgoing_tx)),
            state: state_tx,
        });

        tokio::spawn(write_loop(Arc::clone(&shared), writer, outgoing_rx));
        let reader_task = tokio::spawn(read_loop(Arc::clone(&shared), reader, handler));

        Self {
            shared,
            state: state_rx,
            reader_task: Mutex::new(Some(reader_task)),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> ChannelState {
        self.state.borrow().clone()
    }

    pub async fn request(
        &self,
        method: &str,
        params: Vec<Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, ExtensionError> {
        if !self.state().is_open() {
            return Err(self.shared.failure());
        }
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (response_tx, response_rx) = oneshot::channel();
        lock(&self.shared.pending).insert(id, response_tx);
        if let Err(err) = self.shared.send(RawMessage::request(id, method, params)) {
            lock(&self.shared.pending).remove(&id);
            return Err(err);
        }

        let mut state = self.state.clone();
        let result = tokio::select! {
            biased;
            response = response_rx => match response {
                Ok(result) => result.map_err(ExtensionError::from),
                Err(_) => Err(self.shared.failure()),
            },
            _ = state.wait_for(|state| !state.is_open()) => Err(self.shared.failure()),
            _ = cancel.cancelled() => Err(ExtensionError::Cancelled),
        };
        lock(&self.shared.pending).remove(&id);
        result
    }

    pub fn notify(&self, method: &str, params: Vec<Value>) -> Result<(), ExtensionError> {
        self.shared.send(RawMessage::notification(method, params))
    }

    /// Stops reading, lets queued writes drain, then closes the write side.
    pub fn close(&self) {
        lock(&self.shared.outgoing).take();
        if let Some(task) = lock(&self.reader_task).take() {
            task.abort();
        }
        self.shared.finish(ChannelState::Closed);
    }
}

impl Drop for ExtensionChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ExtensionChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionChannel")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

async fn write_loop<W>(
    shared: Arc<ChannelShared>,
    mut writer: W,
    mut outgoing: mpsc::UnboundedReceiver<RawMessage>,
) where
    W: AsyncWrite + Send + Unpin,
{
    while let Some(message) = outgoing.recv().await {
        if let Err(err) = write_message(&mut writer, &message).await {
            shared.finish(ChannelState::Errored(err.to_string()));
            return;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop<R>(shared: Arc<ChannelShared>, reader: R, handler: Arc<dyn InboundHandler>)
where
    R: AsyncRead + Send + Unpin,
{
    let mut reader = BufReader::new(reader);
    loop {
        let message = match read_message(&mut reader).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                shared.finish(ChannelState::Closed);
                return;
            }
            Err(err) => {
                shared.finish(ChannelState::Errored(err.to_string()));
                return;
            }
        };
        match message.classify() {
            Ok(Incoming::Response { id, result }) => shared.resolve(&id, result),
            // Handled in read order; session-level chaining keeps delivery ordered.
            Ok(Incoming::Notification { method, params }) => {
                handler.handle_notification(&method, params).await;
            }
            Ok(Incoming::Request { id, method, params }) => {
                let shared = Arc::clone(&shared);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    let result = handler.handle_request(&method, params).await;
                    if shared.send(RawMessage::response(id, result)).is_err() {
                        tracing::debug!(channel = %shared.name, method = %method, "response dropped, channel closed");
                    }
                });
            }
            Err(err) => {
                tracing::warn!(channel = %shared.name, error = %err, "ignoring malformed message");
            }
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{GET_PLUGIN_NAMES, METHOD_NOT_FOUND};
    use serde_json::json;
    use tokio::io::{AsyncBufRead, BufReader, duplex};

    async fn next<R: AsyncBufRead + Unpin>(reader: &mut R) -> RawMessage {
        read_message(reader)
            .await
            .expect("read should succeed")
            .expect("a message")
    }

    #[tokio::test(flavor = "current_thread")]
    async fn request_answered_expected_result_returned() {
        let (host, remote) = duplex(4096);
        let (host_read, host_write) = tokio::io::split(host);
        let (remote_read, mut remote_write) = tokio::io::split(remote);
        let channel = ExtensionChannel::connect("test", host_read, host_write, Arc::new(RejectInbound));

        let responder = tokio::spawn(async move {
            let mut remote_read = BufReader::new(remote_read);
            let request = next(&mut remote_read).await;
            assert_eq!(request.method.as_deref(), Some(GET_PLUGIN_NAMES));
            let id = request.id.expect("request id");
            write_message(&mut remote_write, &RawMessage::response(id, Ok(json!(["a"]))))
                .await
                .expect("write response");
            remote_write
        });

        let result = channel
            .request(GET_PLUGIN_NAMES, Vec::new(), &CancellationToken::new())
            .await
            .expect("request should succeed");
        assert_eq!(result, json!(["a"]));
        let _keep_open = responder.await.expect("responder");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn request_peer_closed_expected_channel_closed() {
        let (host, remote) = duplex(4096);
        let (host_read, host_write) = tokio::io::split(host);
        let channel = ExtensionChannel::connect("test", host_read, host_write, Arc::new(RejectInbound));
        drop(remote);

        let error = channel
            .request(GET_PLUGIN_NAMES, Vec::new(), &CancellationToken::new())
            .await
            .expect_err("request should fail");
        assert!(matches!(
            error,
            ExtensionError::ChannelClosed | ExtensionError::ChannelFailed(_)
        ));
        assert!(!channel.state().is_open());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn request_cancelled_expected_cancelled_error() {
        let (host, _remote) = duplex(4096);
        let (host_read, host_write) = tokio::io::split(host);
        let channel = ExtensionChannel::connect("test", host_read, host_write, Arc::new(RejectInbound));
        let token = CancellationToken::new();
        token.cancel();

        let error = channel
            .request(GET_PLUGIN_NAMES, Vec::new(), &token)
            .await
            .expect_err("request should be cancelled");
        assert_eq!(error, ExtensionError::Cancelled);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn inbound_unknown_method_expected_error_response() {
        let (host, remote) = duplex(4096);
        let (host_read, host_write) = tokio::io::split(host);
        let (remote_read, mut remote_write) = tokio::io::split(remote);
        let _channel = ExtensionChannel::connect("test", host_read, host_write, Arc::new(RejectInbound));

        write_message(&mut remote_write, &RawMessage::request(9, "Nope", vec![json!("s")]))
            .await
            .expect("write request");
        let mut remote_read = BufReader::new(remote_read);
        let response = next(&mut remote_read).await;
        assert_eq!(response.id, Some(json!(9)));
        assert_eq!(response.error.expect("error").code, METHOD_NOT_FOUND);
    }
}
