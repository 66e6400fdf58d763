//! In-memory, content-addressed document store for the quill pipeline engine.
//!
//! Documents flow between pipeline stages as [`DataHandle`]s read from a
//! [`DataSource`] and written through a [`DataSink`]. Every written document
//! may carry source mappings back to the documents it was derived from, which
//! [`Blame`] walks to recover original input locations.

pub mod blame;
pub mod fs;
pub mod memory;
pub mod sink;
pub mod source;
pub mod store;
pub mod types;

pub use blame::BlameTree;
pub use fs::{FsDataSource, INPUT_FILE_ARTIFACT};
pub use memory::DataStore;
pub use sink::DataSink;
pub use source::QuickDataSource;
pub use store::{Blame, DataSource, SharedDataSource, StoreError, StoreResult};
pub use types::{
    DataHandle, Document, DocumentKey, JsonPath, Mapping, PathComponent, Position, json_path,
    stringify_path,
};
