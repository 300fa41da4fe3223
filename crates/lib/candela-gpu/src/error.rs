use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("allocation failed for {name}: {reason}")]
    Allocation { name: String, reason: String },

    #[error("shader compilation failed: {}:{entry}\n{log}", path.display())]
    ShaderCompile {
        path: PathBuf,
        entry: String,
        log: String,
    },

    #[error("pipeline creation failed for {name}: {reason}")]
    PipelineCreation { name: String, reason: String },

    #[error("device lost: fence wait exceeded {timeout:?}")]
    DeviceLost { timeout: Duration },

    #[error("stale or destroyed handle: {info}")]
    StaleHandle { info: String },

    #[error("buffer access out of bounds: {info}")]
    OutOfBounds { info: String },

    #[error("readback from non-host-visible memory: {name}")]
    NotHostVisible { name: String },
}

impl GpuError {
    pub fn allocation(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Allocation {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
