//! Pipeline engine for quill.
//!
//! A configuration declares named stages; the graph builder turns them into
//! concrete nodes (expanding fan-out scopes), the scheduler runs those nodes
//! as memoized concurrent tasks, and every diagnostic raised along the way
//! goes through the message pipeline: blame back to the original inputs,
//! directive-based suppression, formatting and dispatch.

pub mod config;
pub mod diagnostics;
pub mod directives;
pub mod errors;
pub mod events;
pub mod format;
pub mod graph;
pub mod jsonpath;
pub mod message;
pub mod plugins;
pub mod runner;
pub mod suppression;

pub use config::*;
pub use diagnostics::*;
pub use directives::*;
pub use errors::*;
pub use events::*;
pub use format::*;
pub use graph::*;
pub use jsonpath::*;
pub use message::*;
pub use plugins::{
    Plugin, PluginRegistry, SharedPlugin, builtin_registry, create_per_file_plugin,
};
pub use runner::*;
pub use suppression::*;
