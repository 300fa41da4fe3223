//! Probe ray tracing: `rays_per_probe x probe_count` work items per
//! selected volume against the scene TLAS. One ray-tracing pipeline and
//! shader table shared by all volumes; the volume index rides in push
//! constants.

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use std::path::Path;

use anyhow::{Context, Result};

use candela_gpu::{
    AccelHandle, BarrierScope, GpuBackend, RtPipelineDesc, RtPipelineHandle, ShaderSource,
    ShaderTableDesc, ShaderTableHandle,
};

use crate::registry::VolumeRegistry;

pub struct ProbeTraceStage {
    pipeline: RtPipelineHandle,
    shader_table: ShaderTableHandle,
}

impl ProbeTraceStage {
    pub fn new(backend: &mut dyn GpuBackend, shader_dir: &Path) -> Result<Self> {
        let (pipeline, shader_table) = Self::build_pipeline(backend, shader_dir)?;
        Ok(Self {
            pipeline,
            shader_table,
        })
    }

    fn build_pipeline(
        backend: &mut dyn GpuBackend,
        shader_dir: &Path,
    ) -> Result<(RtPipelineHandle, ShaderTableHandle)> {
        let desc = RtPipelineDesc {
            raygen: ShaderSource::compute(shader_dir.join("probe_trace.rgen")),
            miss: vec![ShaderSource::compute(shader_dir.join("probe_trace.rmiss"))],
            hit: vec![ShaderSource::compute(shader_dir.join("probe_trace.rchit"))],
            max_recursion_depth: 1,
        };
        let pipeline = backend
            .create_rt_pipeline(&desc, "probe trace")
            .context("probe trace pipeline")?;

        // One shared raygen record; per-volume data arrives through the
        // constants buffer, so the table never changes with volume count.
        let table = ShaderTableDesc::with_record_size(1, 1, 1, 32);
        let shader_table = backend
            .create_shader_table(pipeline, &table)
            .context("probe trace shader table")?;

        Ok((pipeline, shader_table))
    }

    /// Hot reload: build the replacement first, swap only on success.
    pub fn reload(&mut self, backend: &mut dyn GpuBackend, shader_dir: &Path) -> Result<()> {
        let (pipeline, shader_table) = Self::build_pipeline(backend, shader_dir)?;
        backend.destroy_shader_table(self.shader_table);
        backend.destroy_rt_pipeline(self.pipeline);
        self.pipeline = pipeline;
        self.shader_table = shader_table;
        Ok(())
    }

    pub fn record(
        &self,
        backend: &mut dyn GpuBackend,
        scene_tlas: AccelHandle,
        registry: &VolumeRegistry,
        selected: &[u32],
    ) {
        let mut gates = Vec::new();

        for &index in selected {
            let Some(volume) = registry.volume(index) else {
                continue;
            };

            backend.trace_rays(
                self.pipeline,
                self.shader_table,
                scene_tlas,
                "probe trace",
                [volume.desc.probe_num_rays, volume.probe_count(), 1],
            );
            gates.push(BarrierScope::RayData(volume.textures.ray_data));
        }

        // The blend passes read what the trace just wrote.
        if !gates.is_empty() {
            backend.barrier(&gates);
        }
    }

    pub fn destroy(self, backend: &mut dyn GpuBackend) {
        backend.destroy_shader_table(self.shader_table);
        backend.destroy_rt_pipeline(self.pipeline);
    }
}
