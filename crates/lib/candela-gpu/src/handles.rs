//! Plain index handles into backend-owned tables. A handle never frees
//! anything by itself; ownership lives with the struct that created it,
//! and destruction goes back through the backend.

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ComputePipelineHandle(pub usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RtPipelineHandle(pub usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct AccelHandle(pub usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShaderTableHandle(pub usize);
