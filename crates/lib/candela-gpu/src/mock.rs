//! CPU-only backend that records every call into an op log. Buffers and
//! textures get real byte storage so copies and readbacks move data, but
//! dispatches do not execute shaders. Used by the engine's tests and by
//! anything that wants to assert on recorded command sequences.

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::{BindlessSlots, BlasGeometry, GpuBackend};
use crate::barrier::BarrierScope;
use crate::desc::{BufferDesc, MemoryKind, TextureDesc};
use crate::error::GpuError;
use crate::handles::{
    AccelHandle, BufferHandle, ComputePipelineHandle, RtPipelineHandle, ShaderHandle,
    ShaderTableHandle, TextureHandle,
};
use crate::shader::{RtPipelineDesc, ShaderSource, ShaderTableDesc};

#[derive(Clone, Debug, PartialEq)]
pub enum GpuOp {
    CreateTexture { handle: TextureHandle, name: String },
    DestroyTexture { handle: TextureHandle },
    CreateBuffer { handle: BufferHandle, name: String },
    DestroyBuffer { handle: BufferHandle },
    CompileShader { handle: ShaderHandle, path: String, entry: String },
    DestroyShader { handle: ShaderHandle },
    CreateComputePipeline { handle: ComputePipelineHandle, name: String },
    DestroyComputePipeline { handle: ComputePipelineHandle },
    CreateRtPipeline { handle: RtPipelineHandle, name: String },
    DestroyRtPipeline { handle: RtPipelineHandle },
    CreateShaderTable { handle: ShaderTableHandle },
    DestroyShaderTable { handle: ShaderTableHandle },
    BuildBlas { handle: AccelHandle, name: String },
    CreateTlas { handle: AccelHandle, max_instances: u32 },
    RebuildTlas { handle: AccelHandle, instance_count: u32 },
    DestroyAccel { handle: AccelHandle },
    WriteBuffer { handle: BufferHandle, offset: usize, len: usize },
    CopyBuffer { src: BufferHandle, dst: BufferHandle, len: usize },
    CopyTextureToBuffer { src: TextureHandle, dst: BufferHandle, len: usize },
    ClearTexture { handle: TextureHandle },
    Dispatch { pipeline: ComputePipelineHandle, label: String, groups: [u32; 3] },
    TraceRays { pipeline: RtPipelineHandle, label: String, dims: [u32; 3] },
    Barrier { scope_count: usize },
    BeginFrame,
    SubmitAndFence { frame: u64 },
    /// `blocked` is true when the wait found the fence unsignaled and had
    /// to stall for the simulated GPU.
    FenceWait { frame_offset: u64, blocked: bool },
    WaitIdle,
}

/// Shared fence state; tests hold a clone to stage unsignaled fences.
#[derive(Debug)]
pub struct FenceState {
    pub submitted: u64,
    pub signaled: u64,
    /// When true (default), submission signals immediately, modeling a
    /// GPU that keeps up with the CPU.
    pub auto_signal: bool,
    /// When true, every fence wait times out; models device loss.
    pub device_lost: bool,
}

impl Default for FenceState {
    fn default() -> Self {
        Self {
            submitted: 0,
            signaled: 0,
            auto_signal: true,
            device_lost: false,
        }
    }
}

struct MockTexture {
    desc: TextureDesc,
    data: Vec<u8>,
    slots: BindlessSlots,
}

struct MockBuffer {
    desc: BufferDesc,
    name: String,
    data: Vec<u8>,
}

struct MockAccel {
    instance_buffer: Option<BufferHandle>,
}

#[derive(Default)]
pub struct RecordingBackend {
    ops: Vec<GpuOp>,
    textures: Vec<Option<MockTexture>>,
    buffers: Vec<Option<MockBuffer>>,
    shaders: Vec<Option<ShaderSource>>,
    compute_pipelines: Vec<Option<String>>,
    rt_pipelines: Vec<Option<String>>,
    shader_tables: Vec<Option<ShaderTableDesc>>,
    accels: Vec<Option<MockAccel>>,
    next_bindless_slot: u32,
    fence: Arc<Mutex<FenceState>>,
    /// When set, the next matching shader compilation fails; for testing
    /// the abort-on-failure initialization path.
    fail_compile_containing: Option<String>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> &[GpuOp] {
        &self.ops
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    pub fn fence(&self) -> Arc<Mutex<FenceState>> {
        self.fence.clone()
    }

    pub fn fail_shader_compiles_containing(&mut self, needle: impl Into<String>) {
        self.fail_compile_containing = Some(needle.into());
    }

    pub fn dispatch_count(&self, label_prefix: &str) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, GpuOp::Dispatch { label, .. } if label.starts_with(label_prefix)))
            .count()
    }

    pub fn trace_dims(&self) -> Vec<[u32; 3]> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                GpuOp::TraceRays { dims, .. } => Some(*dims),
                _ => None,
            })
            .collect()
    }

    pub fn destroys_of_texture(&self, handle: TextureHandle) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, GpuOp::DestroyTexture { handle: h } if *h == handle))
            .count()
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.iter().filter(|t| t.is_some()).count()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.iter().filter(|b| b.is_some()).count()
    }

    /// Direct storage access for staging test inputs (e.g. preloading a
    /// readback buffer with a known value).
    pub fn buffer_data_mut(&mut self, handle: BufferHandle) -> &mut Vec<u8> {
        &mut self
            .buffers[handle.0]
            .as_mut()
            .unwrap_or_else(|| panic!("buffer {handle:?} is destroyed"))
            .data
    }

    pub fn texture_data_mut(&mut self, handle: TextureHandle) -> &mut Vec<u8> {
        &mut self
            .textures[handle.0]
            .as_mut()
            .unwrap_or_else(|| panic!("texture {handle:?} is destroyed"))
            .data
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&MockBuffer, GpuError> {
        self.buffers
            .get(handle.0)
            .and_then(|b| b.as_ref())
            .ok_or_else(|| GpuError::StaleHandle {
                info: format!("{handle:?}"),
            })
    }
}

impl GpuBackend for RecordingBackend {
    fn create_texture(&mut self, desc: TextureDesc, name: &str) -> Result<TextureHandle, GpuError> {
        let handle = TextureHandle(self.textures.len());
        let slots = BindlessSlots {
            storage: self.next_bindless_slot,
            sampled: self.next_bindless_slot + 1,
        };
        self.next_bindless_slot += 2;
        self.textures.push(Some(MockTexture {
            data: vec![0u8; desc.total_bytes()],
            desc,
            slots,
        }));
        self.ops.push(GpuOp::CreateTexture {
            handle,
            name: name.to_owned(),
        });
        Ok(handle)
    }

    fn destroy_texture(&mut self, handle: TextureHandle) {
        match self.textures.get_mut(handle.0) {
            Some(slot @ Some(_)) => {
                *slot = None;
                self.ops.push(GpuOp::DestroyTexture { handle });
            }
            _ => warn!("destroy of dead texture {handle:?} ignored"),
        }
    }

    fn texture_slots(&self, handle: TextureHandle) -> BindlessSlots {
        self.textures
            .get(handle.0)
            .and_then(|t| t.as_ref())
            .map(|t| t.slots)
            .unwrap_or_default()
    }

    fn create_buffer(&mut self, desc: BufferDesc, name: &str) -> Result<BufferHandle, GpuError> {
        let handle = BufferHandle(self.buffers.len());
        self.buffers.push(Some(MockBuffer {
            data: vec![0u8; desc.size_bytes],
            desc,
            name: name.to_owned(),
        }));
        self.ops.push(GpuOp::CreateBuffer {
            handle,
            name: name.to_owned(),
        });
        Ok(handle)
    }

    fn destroy_buffer(&mut self, handle: BufferHandle) {
        match self.buffers.get_mut(handle.0) {
            Some(slot @ Some(_)) => {
                *slot = None;
                self.ops.push(GpuOp::DestroyBuffer { handle });
            }
            _ => warn!("destroy of dead buffer {handle:?} ignored"),
        }
    }

    fn compile_shader(&mut self, source: &ShaderSource) -> Result<ShaderHandle, GpuError> {
        let path_str = source.path.display().to_string();
        if let Some(needle) = &self.fail_compile_containing {
            if path_str.contains(needle.as_str()) {
                return Err(GpuError::ShaderCompile {
                    path: source.path.clone(),
                    entry: source.entry.clone(),
                    log: "forced failure".to_owned(),
                });
            }
        }

        let handle = ShaderHandle(self.shaders.len());
        self.shaders.push(Some(source.clone()));
        self.ops.push(GpuOp::CompileShader {
            handle,
            path: path_str,
            entry: source.entry.clone(),
        });
        Ok(handle)
    }

    fn destroy_shader(&mut self, handle: ShaderHandle) {
        match self.shaders.get_mut(handle.0) {
            Some(slot @ Some(_)) => {
                *slot = None;
                self.ops.push(GpuOp::DestroyShader { handle });
            }
            _ => warn!("destroy of dead shader {handle:?} ignored"),
        }
    }

    fn create_compute_pipeline(
        &mut self,
        shader: ShaderHandle,
        name: &str,
    ) -> Result<ComputePipelineHandle, GpuError> {
        if self.shaders.get(shader.0).and_then(|s| s.as_ref()).is_none() {
            return Err(GpuError::PipelineCreation {
                name: name.to_owned(),
                reason: format!("stale shader {shader:?}"),
            });
        }
        let handle = ComputePipelineHandle(self.compute_pipelines.len());
        self.compute_pipelines.push(Some(name.to_owned()));
        self.ops.push(GpuOp::CreateComputePipeline {
            handle,
            name: name.to_owned(),
        });
        Ok(handle)
    }

    fn destroy_compute_pipeline(&mut self, handle: ComputePipelineHandle) {
        match self.compute_pipelines.get_mut(handle.0) {
            Some(slot @ Some(_)) => {
                *slot = None;
                self.ops.push(GpuOp::DestroyComputePipeline { handle });
            }
            _ => warn!("destroy of dead compute pipeline {handle:?} ignored"),
        }
    }

    fn create_rt_pipeline(
        &mut self,
        desc: &RtPipelineDesc,
        name: &str,
    ) -> Result<RtPipelineHandle, GpuError> {
        if let Some(needle) = &self.fail_compile_containing {
            let all = std::iter::once(&desc.raygen)
                .chain(desc.miss.iter())
                .chain(desc.hit.iter());
            for source in all {
                if source.path.display().to_string().contains(needle.as_str()) {
                    return Err(GpuError::ShaderCompile {
                        path: source.path.clone(),
                        entry: source.entry.clone(),
                        log: "forced failure".to_owned(),
                    });
                }
            }
        }

        let handle = RtPipelineHandle(self.rt_pipelines.len());
        self.rt_pipelines.push(Some(name.to_owned()));
        self.ops.push(GpuOp::CreateRtPipeline {
            handle,
            name: name.to_owned(),
        });
        Ok(handle)
    }

    fn destroy_rt_pipeline(&mut self, handle: RtPipelineHandle) {
        match self.rt_pipelines.get_mut(handle.0) {
            Some(slot @ Some(_)) => {
                *slot = None;
                self.ops.push(GpuOp::DestroyRtPipeline { handle });
            }
            _ => warn!("destroy of dead rt pipeline {handle:?} ignored"),
        }
    }

    fn create_shader_table(
        &mut self,
        pipeline: RtPipelineHandle,
        desc: &ShaderTableDesc,
    ) -> Result<ShaderTableHandle, GpuError> {
        if self
            .rt_pipelines
            .get(pipeline.0)
            .and_then(|p| p.as_ref())
            .is_none()
        {
            return Err(GpuError::StaleHandle {
                info: format!("{pipeline:?}"),
            });
        }
        let handle = ShaderTableHandle(self.shader_tables.len());
        self.shader_tables.push(Some(desc.clone()));
        self.ops.push(GpuOp::CreateShaderTable { handle });
        Ok(handle)
    }

    fn destroy_shader_table(&mut self, handle: ShaderTableHandle) {
        match self.shader_tables.get_mut(handle.0) {
            Some(slot @ Some(_)) => {
                *slot = None;
                self.ops.push(GpuOp::DestroyShaderTable { handle });
            }
            _ => warn!("destroy of dead shader table {handle:?} ignored"),
        }
    }

    fn build_blas(&mut self, _geometry: &BlasGeometry, name: &str) -> Result<AccelHandle, GpuError> {
        let handle = AccelHandle(self.accels.len());
        self.accels.push(Some(MockAccel {
            instance_buffer: None,
        }));
        self.ops.push(GpuOp::BuildBlas {
            handle,
            name: name.to_owned(),
        });
        Ok(handle)
    }

    fn create_tlas(&mut self, max_instances: u32, name: &str) -> Result<AccelHandle, GpuError> {
        // 64 bytes per instance record, matching common API instance sizes.
        let instance_buffer = self.create_buffer(
            BufferDesc::device_local(max_instances as usize * 64),
            &format!("{name} instances"),
        )?;
        let handle = AccelHandle(self.accels.len());
        self.accels.push(Some(MockAccel {
            instance_buffer: Some(instance_buffer),
        }));
        self.ops.push(GpuOp::CreateTlas {
            handle,
            max_instances,
        });
        Ok(handle)
    }

    fn rebuild_tlas(&mut self, handle: AccelHandle, instance_count: u32) {
        self.ops.push(GpuOp::RebuildTlas {
            handle,
            instance_count,
        });
    }

    fn destroy_accel(&mut self, handle: AccelHandle) {
        match self.accels.get_mut(handle.0) {
            Some(slot @ Some(_)) => {
                let instance_buffer = slot.as_ref().and_then(|a| a.instance_buffer);
                *slot = None;
                self.ops.push(GpuOp::DestroyAccel { handle });
                if let Some(buffer) = instance_buffer {
                    self.destroy_buffer(buffer);
                }
            }
            _ => warn!("destroy of dead accel {handle:?} ignored"),
        }
    }

    fn tlas_instance_buffer(&self, handle: AccelHandle) -> BufferHandle {
        self.accels
            .get(handle.0)
            .and_then(|a| a.as_ref())
            .and_then(|a| a.instance_buffer)
            .unwrap_or(BufferHandle(usize::MAX))
    }

    fn write_buffer(
        &mut self,
        handle: BufferHandle,
        offset: usize,
        bytes: &[u8],
    ) -> Result<(), GpuError> {
        let buffer = self
            .buffers
            .get_mut(handle.0)
            .and_then(|b| b.as_mut())
            .ok_or_else(|| GpuError::StaleHandle {
                info: format!("{handle:?}"),
            })?;

        if offset + bytes.len() > buffer.data.len() {
            return Err(GpuError::OutOfBounds {
                info: format!(
                    "write of {} bytes at {} into '{}' ({} bytes)",
                    bytes.len(),
                    offset,
                    buffer.name,
                    buffer.data.len()
                ),
            });
        }

        buffer.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.ops.push(GpuOp::WriteBuffer {
            handle,
            offset,
            len: bytes.len(),
        });
        Ok(())
    }

    fn read_buffer(
        &self,
        handle: BufferHandle,
        offset: usize,
        len: usize,
    ) -> Result<Vec<u8>, GpuError> {
        let buffer = self.buffer(handle)?;
        if buffer.desc.memory == MemoryKind::DeviceLocal {
            return Err(GpuError::NotHostVisible {
                name: buffer.name.clone(),
            });
        }
        if offset + len > buffer.data.len() {
            return Err(GpuError::OutOfBounds {
                info: format!("read of {len} bytes at {offset} from '{}'", buffer.name),
            });
        }
        Ok(buffer.data[offset..offset + len].to_vec())
    }

    fn read_texture(&self, handle: TextureHandle) -> Result<Vec<u8>, GpuError> {
        self.textures
            .get(handle.0)
            .and_then(|t| t.as_ref())
            .map(|t| t.data.clone())
            .ok_or_else(|| GpuError::StaleHandle {
                info: format!("{handle:?}"),
            })
    }

    fn copy_buffer(
        &mut self,
        src: BufferHandle,
        src_offset: usize,
        dst: BufferHandle,
        dst_offset: usize,
        len: usize,
    ) {
        let data = match self.buffer(src) {
            Ok(b) if src_offset + len <= b.data.len() => {
                b.data[src_offset..src_offset + len].to_vec()
            }
            _ => {
                warn!("copy_buffer with bad source {src:?} ignored");
                return;
            }
        };
        if let Some(dst_buf) = self.buffers.get_mut(dst.0).and_then(|b| b.as_mut()) {
            if dst_offset + len <= dst_buf.data.len() {
                dst_buf.data[dst_offset..dst_offset + len].copy_from_slice(&data);
            }
        }
        self.ops.push(GpuOp::CopyBuffer { src, dst, len });
    }

    fn copy_texture_to_buffer(&mut self, src: TextureHandle, dst: BufferHandle, len: usize) {
        let data = match self.textures.get(src.0).and_then(|t| t.as_ref()) {
            Some(t) => t.data[..len.min(t.data.len())].to_vec(),
            None => {
                warn!("copy_texture_to_buffer with dead texture {src:?} ignored");
                return;
            }
        };
        if let Some(dst_buf) = self.buffers.get_mut(dst.0).and_then(|b| b.as_mut()) {
            let n = data.len().min(dst_buf.data.len());
            dst_buf.data[..n].copy_from_slice(&data[..n]);
        }
        self.ops.push(GpuOp::CopyTextureToBuffer { src, dst, len });
    }

    fn clear_texture(&mut self, handle: TextureHandle) {
        if let Some(t) = self.textures.get_mut(handle.0).and_then(|t| t.as_mut()) {
            t.data.fill(0);
        }
        self.ops.push(GpuOp::ClearTexture { handle });
    }

    fn dispatch(&mut self, pipeline: ComputePipelineHandle, label: &str, groups: [u32; 3]) {
        trace!("dispatch '{label}' groups {groups:?}");
        self.ops.push(GpuOp::Dispatch {
            pipeline,
            label: label.to_owned(),
            groups,
        });
    }

    fn trace_rays(
        &mut self,
        pipeline: RtPipelineHandle,
        _table: ShaderTableHandle,
        _tlas: AccelHandle,
        label: &str,
        dims: [u32; 3],
    ) {
        trace!("trace '{label}' dims {dims:?}");
        self.ops.push(GpuOp::TraceRays {
            pipeline,
            label: label.to_owned(),
            dims,
        });
    }

    fn barrier(&mut self, scopes: &[BarrierScope]) {
        self.ops.push(GpuOp::Barrier {
            scope_count: scopes.len(),
        });
    }

    fn begin_frame(&mut self) {
        self.ops.push(GpuOp::BeginFrame);
    }

    fn submit_and_fence(&mut self) {
        let mut fence = self.fence.lock();
        fence.submitted += 1;
        if fence.auto_signal {
            fence.signaled = fence.submitted;
        }
        let frame = fence.submitted;
        drop(fence);
        self.ops.push(GpuOp::SubmitAndFence { frame });
    }

    fn wait_for_fence(&mut self, frame_offset: u64, timeout: Duration) -> Result<(), GpuError> {
        let mut fence = self.fence.lock();
        if fence.device_lost {
            return Err(GpuError::DeviceLost { timeout });
        }

        let needed = (fence.submitted + 1).saturating_sub(frame_offset);
        let blocked = fence.signaled < needed;
        if blocked {
            // The simulated GPU completes the outstanding frames; the call
            // models a blocking wait, not a poll.
            fence.signaled = needed;
        }
        drop(fence);

        self.ops.push(GpuOp::FenceWait {
            frame_offset,
            blocked,
        });
        Ok(())
    }

    fn wait_idle(&mut self) {
        let mut fence = self.fence.lock();
        fence.signaled = fence.submitted;
        drop(fence);
        self.ops.push(GpuOp::WaitIdle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::TextureFormat;

    #[test]
    fn copies_move_real_bytes() {
        let mut b = RecordingBackend::new();
        let src = b
            .create_buffer(BufferDesc::upload(16), "src")
            .unwrap();
        let dst = b
            .create_buffer(BufferDesc::readback(16), "dst")
            .unwrap();

        b.write_buffer(src, 4, &[1, 2, 3, 4]).unwrap();
        b.copy_buffer(src, 4, dst, 0, 4);
        assert_eq!(b.read_buffer(dst, 0, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn device_local_readback_is_rejected() {
        let mut b = RecordingBackend::new();
        let buf = b
            .create_buffer(BufferDesc::device_local(16), "dl")
            .unwrap();
        assert!(matches!(
            b.read_buffer(buf, 0, 4),
            Err(GpuError::NotHostVisible { .. })
        ));
    }

    #[test]
    fn double_destroy_records_once() {
        let mut b = RecordingBackend::new();
        let tex = b
            .create_texture(
                TextureDesc::new_2d_array(4, 4, 1, TextureFormat::R32Float),
                "t",
            )
            .unwrap();
        b.destroy_texture(tex);
        b.destroy_texture(tex);
        assert_eq!(b.destroys_of_texture(tex), 1);
    }

    #[test]
    fn fence_wait_blocks_when_gpu_is_behind() {
        let mut b = RecordingBackend::new();
        b.fence().lock().auto_signal = false;

        b.submit_and_fence();
        b.submit_and_fence();
        b.wait_for_fence(2, Duration::from_secs(1)).unwrap();

        assert!(matches!(
            b.ops().last(),
            Some(GpuOp::FenceWait { blocked: true, .. })
        ));
        assert_eq!(b.fence().lock().signaled, 1);
    }

    #[test]
    fn fence_wait_passes_when_gpu_keeps_up() {
        let mut b = RecordingBackend::new();
        b.submit_and_fence();
        b.wait_for_fence(2, Duration::from_secs(1)).unwrap();
        assert!(matches!(
            b.ops().last(),
            Some(GpuOp::FenceWait { blocked: false, .. })
        ));
    }
}
