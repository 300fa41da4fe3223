pub mod backend;
pub mod barrier;
pub mod desc;
pub mod dynamic_constants;
pub mod error;
pub mod handles;
pub mod mock;
pub mod shader;

pub use backend::{BindlessSlots, BlasGeometry, GpuBackend};
pub use barrier::{AccessKind, BarrierScope};
pub use desc::{BufferDesc, BufferUsage, MemoryKind, TextureDesc, TextureFormat, TextureUsage};
pub use dynamic_constants::{
    DynamicConstants, DYNAMIC_CONSTANTS_ALIGNMENT, DYNAMIC_CONSTANTS_BUFFER_COUNT,
    DYNAMIC_CONSTANTS_SIZE_BYTES,
};
pub use error::GpuError;
pub use handles::{
    AccelHandle, BufferHandle, ComputePipelineHandle, RtPipelineHandle, ShaderHandle,
    ShaderTableHandle, TextureHandle,
};
pub use shader::{RtPipelineDesc, ShaderSource, ShaderTableDesc};
