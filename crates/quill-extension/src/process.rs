use crate::channel::{ExtensionChannel, InboundHandler, lock};
use crate::errors::ExtensionError;
use crate::protocol::{GET_PLUGIN_NAMES, PROCESS};
use crate::session::{SessionContext, SessionTable};
use quill_pipeline::ConfigurationView;
use quill_store::{DataHandle, DataSink, SharedDataSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtensionState {
    Spawned,
    Handshaking,
    Ready,
    Killed,
}

impl ExtensionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spawned => "SPAWNED",
            Self::Handshaking => "HANDSHAKING",
            Self::Ready => "READY",
            Self::Killed => "KILLED",
        }
    }

    pub fn can_transition_to(&self, next: &ExtensionState) -> bool {
        if *next == ExtensionState::Killed {
            return true;
        }

        match self {
            ExtensionState::Spawned => matches!(next, ExtensionState::Handshaking),
            ExtensionState::Handshaking => matches!(next, ExtensionState::Ready),
            ExtensionState::Ready | ExtensionState::Killed => false,
        }
    }
}

impl Display for ExtensionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How to launch an extension, as declared under the `extensions` key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionCommand {
    #[serde(rename = "command")]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl ExtensionCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// One running extension: the channel to it, the sessions currently open on
/// it, and the child process behind it when there is one.
pub struct ExtensionProcess {
    name: String,
    state: Mutex<ExtensionState>,
    channel: ExtensionChannel,
    sessions: Arc<SessionTable>,
    plugin_names: Mutex<Vec<String>>,
    child: tokio::sync::Mutex<Option<Child>>,
}

impl ExtensionProcess {
    /// Launches `command` with piped stdin/stdout; stderr is inherited.
    pub fn spawn(name: &str, command: &ExtensionCommand) -> Result<Arc<Self>, ExtensionError> {
        let spawn_error = |reason: String| ExtensionError::Spawn {
            name: name.to_string(),
            reason,
        };
        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(cwd) = &command.cwd {
            process.current_dir(cwd);
        }
        let mut child = process
            .spawn()
            .map_err(|err| spawn_error(format!("failed to launch '{}': {err}", command.program)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("child has no stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("child has no stdout".to_string()))?;

        tracing::info!(extension = name, program = %command.program, pid = ?child.id(), "extension spawned");
        Ok(Self::build(name, stdout, stdin, Some(child)))
    }

    /// Binds to an already connected peer with no child process to manage.
    pub fn connect<R, W>(name: &str, reader: R, writer: W) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::build(name, reader, writer, None)
    }

    fn build<R, W>(name: &str, reader: R, writer: W, child: Option<Child>) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let sessions = Arc::new(SessionTable::new());
        let handler: Arc<dyn InboundHandler> = Arc::clone(&sessions) as _;
        let channel = ExtensionChannel::connect(name, reader, writer, handler);
        Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(ExtensionState::Spawned),
            channel,
            sessions,
            plugin_names: Mutex::new(Vec::new()),
            child: tokio::sync::Mutex::new(child),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ExtensionState {
        *lock(&self.state)
    }

    pub fn plugin_names(&self) -> Vec<String> {
        lock(&self.plugin_names).clone()
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    fn transition(&self, next: ExtensionState) -> Result<(), ExtensionError> {
        let mut state = lock(&self.state);
        if !state.can_transition_to(&next) {
            return Err(ExtensionError::InvalidState {
                from: state.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        *state = next;
        Ok(())
    }

    /// Asks the extension which plugins it provides. Anything but a list of
    /// names is a protocol violation.
    pub async fn handshake(&self, cancel: &CancellationToken) -> Result<Vec<String>, ExtensionError> {
        self.transition(ExtensionState::Handshaking)?;
        let response = self.channel.request(GET_PLUGIN_NAMES, Vec::new(), cancel).await?;
        let names = match response {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(name) => Ok(name),
                    other => Err(ExtensionError::Protocol(format!(
                        "{GET_PLUGIN_NAMES} returned a non-string entry {other}"
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            other => {
                return Err(ExtensionError::Protocol(format!(
                    "{GET_PLUGIN_NAMES} returned {other} instead of a list"
                )));
            }
        };
        self.transition(ExtensionState::Ready)?;
        *lock(&self.plugin_names) = names.clone();
        tracing::info!(extension = %self.name, plugins = ?names, "extension ready");
        Ok(names)
    }

    /// Runs `plugin_name` in a fresh session and returns the documents the
    /// plugin wrote. Notifications sent before the reply are fully delivered
    /// before this returns.
    pub async fn process(
        &self,
        plugin_name: &str,
        config: ConfigurationView,
        input: SharedDataSource,
        sink: DataSink,
    ) -> Result<Vec<DataHandle>, ExtensionError> {
        match self.state() {
            ExtensionState::Ready => {}
            ExtensionState::Killed => return Err(ExtensionError::ChannelClosed),
            state => {
                return Err(ExtensionError::Protocol(format!(
                    "extension '{}' is {state}, not ready",
                    self.name
                )));
            }
        }
        if !lock(&self.plugin_names).iter().any(|name| name == plugin_name) {
            return Err(ExtensionError::UnknownPlugin(plugin_name.to_string()));
        }

        let cancel = config.cancellation_token().clone();
        let session = SessionContext::open(plugin_name, config, input, sink).await?;
        self.sessions.insert(Arc::clone(&session));
        let params = vec![Value::from(plugin_name), Value::from(session.id())];
        let response = self.channel.request(PROCESS, params, &cancel).await;
        session.finish_notifications().await;
        self.sessions.remove(session.id());
        tracing::debug!(extension = %self.name, session = %session.id(), "session closed");

        match response? {
            Value::Bool(true) => Ok(session.results()),
            Value::Bool(false) => Err(ExtensionError::ProcessFailed(plugin_name.to_string())),
            other => Err(ExtensionError::Protocol(format!(
                "{PROCESS} returned {other} instead of a boolean"
            ))),
        }
    }

    /// Closes the channel and terminates the child. A child that already
    /// exited is left alone.
    pub async fn kill(&self) -> Result<(), ExtensionError> {
        self.transition(ExtensionState::Killed)?;
        self.channel.close();
        let mut child = self.child.lock().await;
        if let Some(mut running) = child.take() {
            match running.try_wait()? {
                Some(status) => {
                    tracing::debug!(extension = %self.name, %status, "extension already exited");
                }
                None => {
                    running.kill().await?;
                    tracing::info!(extension = %self.name, "extension killed");
                }
            }
        }
        Ok(())
    }

    pub async fn is_alive(&self) -> bool {
        if self.state() == ExtensionState::Killed || !self.channel.state().is_open() {
            return false;
        }
        match self.child.lock().await.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => true,
        }
    }
}

impl fmt::Debug for ExtensionProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionProcess")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("plugin_names", &self.plugin_names())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
