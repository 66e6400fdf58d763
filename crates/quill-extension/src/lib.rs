//! Out-of-process plugins for quill.
//!
//! An extension is a child process speaking JSON-RPC over stdin/stdout with
//! `Content-Length` framing. The host asks it for its plugin names, then
//! drives each plugin invocation as a session: the extension calls back to
//! list and read inputs, and streams written files and diagnostics as
//! notifications that are delivered in the order it sent them.

pub mod channel;
pub mod client;
pub mod engine;
pub mod errors;
pub mod manager;
pub mod plugin;
pub mod process;
pub mod protocol;
pub mod session;

pub use channel::{ChannelState, ExtensionChannel, InboundHandler, RejectInbound};
pub use client::PluginConnection;
pub use engine::{EXTENSIONS_KEY, Engine};
pub use errors::ExtensionError;
pub use manager::{ExtensionManager, register_plugins};
pub use plugin::ExternalPlugin;
pub use process::{ExtensionCommand, ExtensionProcess, ExtensionState};
pub use protocol::{Incoming, RawMessage, RpcError};
pub use session::{FileLookup, SessionContext, SessionTable};
