use std::time::Duration;

use crate::barrier::BarrierScope;
use crate::desc::{BufferDesc, TextureDesc};
use crate::error::GpuError;
use crate::handles::{
    AccelHandle, BufferHandle, ComputePipelineHandle, RtPipelineHandle, ShaderHandle,
    ShaderTableHandle, TextureHandle,
};
use crate::shader::{RtPipelineDesc, ShaderSource, ShaderTableDesc};

/// Geometry for a one-time bottom-level acceleration structure build.
#[derive(Clone, Debug)]
pub struct BlasGeometry {
    pub vertices: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

/// Bindless slots a texture occupies, reported at creation so callers
/// can mirror them into GPU-visible resource-index records.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BindlessSlots {
    pub storage: u32,
    pub sampled: u32,
}

/// The capability surface the probe engine records against. One
/// implementation per graphics API; the engine's sequencing logic is
/// written once against this trait.
///
/// Recording methods (`dispatch`, `trace_rays`, `barrier`, `copy_*`)
/// append to the current frame's command stream and cannot fail;
/// structural methods (create/compile) return errors that callers treat
/// as fatal to initialization.
pub trait GpuBackend {
    // --- resources -------------------------------------------------------

    fn create_texture(&mut self, desc: TextureDesc, name: &str) -> Result<TextureHandle, GpuError>;
    fn destroy_texture(&mut self, handle: TextureHandle);
    fn texture_slots(&self, handle: TextureHandle) -> BindlessSlots;

    fn create_buffer(&mut self, desc: BufferDesc, name: &str) -> Result<BufferHandle, GpuError>;
    fn destroy_buffer(&mut self, handle: BufferHandle);

    // --- shaders and pipelines ------------------------------------------

    fn compile_shader(&mut self, source: &ShaderSource) -> Result<ShaderHandle, GpuError>;
    fn destroy_shader(&mut self, handle: ShaderHandle);

    fn create_compute_pipeline(
        &mut self,
        shader: ShaderHandle,
        name: &str,
    ) -> Result<ComputePipelineHandle, GpuError>;
    fn destroy_compute_pipeline(&mut self, handle: ComputePipelineHandle);

    fn create_rt_pipeline(
        &mut self,
        desc: &RtPipelineDesc,
        name: &str,
    ) -> Result<RtPipelineHandle, GpuError>;
    fn destroy_rt_pipeline(&mut self, handle: RtPipelineHandle);

    fn create_shader_table(
        &mut self,
        pipeline: RtPipelineHandle,
        desc: &ShaderTableDesc,
    ) -> Result<ShaderTableHandle, GpuError>;
    fn destroy_shader_table(&mut self, handle: ShaderTableHandle);

    // --- acceleration structures ----------------------------------------

    fn build_blas(&mut self, geometry: &BlasGeometry, name: &str) -> Result<AccelHandle, GpuError>;
    fn create_tlas(&mut self, max_instances: u32, name: &str) -> Result<AccelHandle, GpuError>;
    /// Records a rebuild of a TLAS from its instance buffer contents.
    fn rebuild_tlas(&mut self, handle: AccelHandle, instance_count: u32);
    fn destroy_accel(&mut self, handle: AccelHandle);
    /// The instance buffer backing a TLAS, for the per-frame rewrite.
    fn tlas_instance_buffer(&self, handle: AccelHandle) -> BufferHandle;

    // --- data movement ---------------------------------------------------

    /// CPU write into upload memory. Immediate, not recorded.
    fn write_buffer(
        &mut self,
        handle: BufferHandle,
        offset: usize,
        bytes: &[u8],
    ) -> Result<(), GpuError>;

    /// CPU read from upload or readback memory. Immediate, not recorded,
    /// and deliberately unsynchronized with in-flight GPU work.
    fn read_buffer(
        &self,
        handle: BufferHandle,
        offset: usize,
        len: usize,
    ) -> Result<Vec<u8>, GpuError>;

    /// CPU read of full texture contents, for debug dumps only.
    fn read_texture(&self, handle: TextureHandle) -> Result<Vec<u8>, GpuError>;

    /// Records a buffer-to-buffer copy.
    fn copy_buffer(
        &mut self,
        src: BufferHandle,
        src_offset: usize,
        dst: BufferHandle,
        dst_offset: usize,
        len: usize,
    );

    /// Records a copy of a texel region (starting at the origin of layer
    /// 0) into a buffer.
    fn copy_texture_to_buffer(&mut self, src: TextureHandle, dst: BufferHandle, len: usize);

    /// Records a full clear of a texture to zero.
    fn clear_texture(&mut self, handle: TextureHandle);

    // --- execution -------------------------------------------------------

    fn dispatch(&mut self, pipeline: ComputePipelineHandle, label: &str, groups: [u32; 3]);

    fn trace_rays(
        &mut self,
        pipeline: RtPipelineHandle,
        table: ShaderTableHandle,
        tlas: AccelHandle,
        label: &str,
        dims: [u32; 3],
    );

    fn barrier(&mut self, scopes: &[BarrierScope]);

    // --- frame sequencing ------------------------------------------------

    fn begin_frame(&mut self);

    /// Submits the recorded stream and signals the frame fence.
    fn submit_and_fence(&mut self);

    /// Blocks until at most `frame_offset - 1` submitted frames remain
    /// unsignaled. A timeout means the device is lost; fatal.
    fn wait_for_fence(&mut self, frame_offset: u64, timeout: Duration) -> Result<(), GpuError>;

    /// Full drain, used for one-time initialization uploads.
    fn wait_idle(&mut self);
}
