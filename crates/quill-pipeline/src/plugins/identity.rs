use super::{SharedPlugin, create_per_file_plugin};
use crate::errors::PipelineError;
use quill_store::{DataHandle, DataSink};

/// Forwards every input document unchanged.
pub fn identity_plugin() -> SharedPlugin {
    create_per_file_plugin(|_config, handle: DataHandle, sink: DataSink| async move {
        let forwarded = sink.forward(handle.description(), &handle)?;
        Ok::<_, PipelineError>(forwarded)
    })
}
