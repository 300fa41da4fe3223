//! Debug overlay: ray-traced probe-proxy spheres and a raw atlas
//! viewer. Fully decoupled from the update pipeline; nothing here feeds
//! back into probe state.

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use std::path::Path;

use anyhow::{bail, Context, Result};

use candela_gpu::{
    AccelHandle, BarrierScope, BlasGeometry, ComputePipelineHandle, GpuBackend, RtPipelineDesc,
    RtPipelineHandle, ShaderHandle, ShaderSource, ShaderTableDesc, ShaderTableHandle,
};

use crate::registry::VolumeRegistry;

const SPHERE_LATITUDES: u32 = 16;
const SPHERE_LONGITUDES: u32 = 32;
const INSTANCE_GROUP_SIZE: u32 = 32;

/// Fixed lat/long tessellation used as the probe proxy shape.
pub fn sphere_mesh(latitudes: u32, longitudes: u32) -> BlasGeometry {
    let mut vertices = Vec::new();
    let mut indices = Vec::new();

    for lat in 0..=latitudes {
        let theta = std::f32::consts::PI * lat as f32 / latitudes as f32;
        let (sin_t, cos_t) = theta.sin_cos();
        for lon in 0..=longitudes {
            let phi = std::f32::consts::TAU * lon as f32 / longitudes as f32;
            let (sin_p, cos_p) = phi.sin_cos();
            vertices.push([sin_t * cos_p, cos_t, sin_t * sin_p]);
        }
    }

    let stride = longitudes + 1;
    for lat in 0..latitudes {
        for lon in 0..longitudes {
            let a = lat * stride + lon;
            let b = a + stride;
            indices.extend_from_slice(&[a, b, a + 1, b, b + 1, a + 1]);
        }
    }

    BlasGeometry { vertices, indices }
}

struct VisPipelines {
    instance_update: ComputePipelineHandle,
    instance_update_shader: ShaderHandle,
    texture_view: ComputePipelineHandle,
    texture_view_shader: ShaderHandle,
    rt_pipeline: RtPipelineHandle,
    shader_table: ShaderTableHandle,
}

impl VisPipelines {
    fn build(backend: &mut dyn GpuBackend, shader_dir: &Path) -> Result<Self> {
        let instance_update_shader = backend
            .compile_shader(&ShaderSource::compute(
                shader_dir.join("vis_instance_update.comp"),
            ))
            .context("instance update shader")?;
        let instance_update = match backend
            .create_compute_pipeline(instance_update_shader, "vis instance update")
        {
            Ok(p) => p,
            Err(err) => {
                backend.destroy_shader(instance_update_shader);
                return Err(err).context("instance update pipeline");
            }
        };

        let partial = |backend: &mut dyn GpuBackend| {
            backend.destroy_compute_pipeline(instance_update);
            backend.destroy_shader(instance_update_shader);
        };

        let texture_view_shader = match backend.compile_shader(&ShaderSource::compute(
            shader_dir.join("vis_texture_view.comp"),
        )) {
            Ok(s) => s,
            Err(err) => {
                partial(backend);
                return Err(err).context("texture view shader");
            }
        };
        let texture_view = match backend
            .create_compute_pipeline(texture_view_shader, "vis texture view")
        {
            Ok(p) => p,
            Err(err) => {
                backend.destroy_shader(texture_view_shader);
                partial(backend);
                return Err(err).context("texture view pipeline");
            }
        };

        let rt_pipeline = match backend.create_rt_pipeline(
            &RtPipelineDesc {
                raygen: ShaderSource::compute(shader_dir.join("vis_probes.rgen")),
                miss: vec![ShaderSource::compute(shader_dir.join("vis_probes.rmiss"))],
                hit: vec![ShaderSource::compute(shader_dir.join("vis_probes.rchit"))],
                max_recursion_depth: 1,
            },
            "probe visualization",
        ) {
            Ok(p) => p,
            Err(err) => {
                backend.destroy_compute_pipeline(texture_view);
                backend.destroy_shader(texture_view_shader);
                partial(backend);
                return Err(err).context("visualization rt pipeline");
            }
        };
        let shader_table = match backend
            .create_shader_table(rt_pipeline, &ShaderTableDesc::with_record_size(1, 1, 1, 32))
        {
            Ok(t) => t,
            Err(err) => {
                backend.destroy_rt_pipeline(rt_pipeline);
                backend.destroy_compute_pipeline(texture_view);
                backend.destroy_shader(texture_view_shader);
                partial(backend);
                return Err(err).context("visualization shader table");
            }
        };

        Ok(Self {
            instance_update,
            instance_update_shader,
            texture_view,
            texture_view_shader,
            rt_pipeline,
            shader_table,
        })
    }

    fn destroy(self, backend: &mut dyn GpuBackend) {
        backend.destroy_shader_table(self.shader_table);
        backend.destroy_rt_pipeline(self.rt_pipeline);
        backend.destroy_compute_pipeline(self.instance_update);
        backend.destroy_shader(self.instance_update_shader);
        backend.destroy_compute_pipeline(self.texture_view);
        backend.destroy_shader(self.texture_view_shader);
    }
}

pub struct ProbeVisualization {
    pipelines: VisPipelines,
    sphere_blas: AccelHandle,
    tlas: AccelHandle,
    /// Instance capacity fixed at creation from the volumes existing
    /// then. Growing probe counts later needs destroy-and-recreate.
    max_instances: u32,
    pub show_texture_atlases: bool,
}

impl ProbeVisualization {
    pub fn new(
        backend: &mut dyn GpuBackend,
        shader_dir: &Path,
        max_instances: u32,
    ) -> Result<Self> {
        let pipelines = VisPipelines::build(backend, shader_dir)?;

        let sphere_blas = match backend.build_blas(
            &sphere_mesh(SPHERE_LATITUDES, SPHERE_LONGITUDES),
            "probe sphere",
        ) {
            Ok(b) => b,
            Err(err) => {
                pipelines.destroy(backend);
                return Err(err).context("probe sphere blas");
            }
        };
        let tlas = match backend.create_tlas(max_instances.max(1), "probe visualization") {
            Ok(t) => t,
            Err(err) => {
                backend.destroy_accel(sphere_blas);
                pipelines.destroy(backend);
                return Err(err).context("probe visualization tlas");
            }
        };

        info!("probe visualization: capacity for {max_instances} sphere instances");

        Ok(Self {
            pipelines,
            sphere_blas,
            tlas,
            max_instances,
            show_texture_atlases: false,
        })
    }

    /// Hot reload: build the replacement pipeline set first, swap only
    /// on success. Acceleration structures survive.
    pub fn reload(&mut self, backend: &mut dyn GpuBackend, shader_dir: &Path) -> Result<()> {
        let pipelines = VisPipelines::build(backend, shader_dir)?;
        let old = std::mem::replace(&mut self.pipelines, pipelines);
        old.destroy(backend);
        Ok(())
    }

    pub fn max_instances(&self) -> u32 {
        self.max_instances
    }

    /// Records the overlay for this frame: rewrite every instance
    /// transform (one thread per probe), rebuild the TLAS, trace.
    ///
    /// Fails if probe counts have grown past the capacity fixed at
    /// creation time; callers must recreate the subsystem to grow it.
    pub fn record(
        &self,
        backend: &mut dyn GpuBackend,
        registry: &VolumeRegistry,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let total: u32 = registry
            .iter_live()
            .filter(|(_, v)| v.desc.show_probes)
            .map(|(_, v)| v.probe_count())
            .sum();
        if total == 0 {
            return Ok(());
        }
        if total > self.max_instances {
            bail!(
                "probe visualization capacity exceeded: {total} probes > {} instances; \
                 recreate the visualization subsystem",
                self.max_instances
            );
        }

        backend.dispatch(
            self.pipelines.instance_update,
            "vis instance update",
            [total.div_ceil(INSTANCE_GROUP_SIZE), 1, 1],
        );
        backend.barrier(&[BarrierScope::Instances(
            backend.tlas_instance_buffer(self.tlas),
        )]);
        backend.rebuild_tlas(self.tlas, total);

        backend.trace_rays(
            self.pipelines.rt_pipeline,
            self.pipelines.shader_table,
            self.tlas,
            "vis probes",
            [width, height, 1],
        );

        if self.show_texture_atlases {
            backend.dispatch(
                self.pipelines.texture_view,
                "vis texture view",
                [width.div_ceil(8), height.div_ceil(8), 1],
            );
        }
        Ok(())
    }

    pub fn destroy(self, backend: &mut dyn GpuBackend) {
        backend.destroy_accel(self.tlas);
        backend.destroy_accel(self.sphere_blas);
        self.pipelines.destroy(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::desc::ProbeVolumeDesc;
    use candela_gpu::mock::{GpuOp, RecordingBackend};
    use glam::UVec3;

    #[test]
    fn sphere_mesh_is_closed() {
        let mesh = sphere_mesh(4, 8);
        assert_eq!(mesh.vertices.len(), 5 * 9);
        assert_eq!(mesh.indices.len(), (4 * 8 * 6) as usize);
        let max = *mesh.indices.iter().max().unwrap();
        assert!((max as usize) < mesh.vertices.len());
    }

    fn registry_with_probes(backend: &mut RecordingBackend, show: bool) -> VolumeRegistry {
        let mut registry = VolumeRegistry::new();
        registry
            .create_or_replace(
                backend,
                Path::new("shaders"),
                ProbeVolumeDesc {
                    probe_counts: UVec3::new(4, 4, 4),
                    show_probes: show,
                    ..Default::default()
                },
            )
            .unwrap();
        registry
    }

    #[test]
    fn rewrites_all_instances_then_rebuilds() {
        let mut backend = RecordingBackend::new();
        let registry = registry_with_probes(&mut backend, true);
        let vis = ProbeVisualization::new(&mut backend, Path::new("shaders"), 64).unwrap();

        vis.record(&mut backend, &registry, 640, 480).unwrap();

        assert_eq!(backend.dispatch_count("vis instance update"), 1);
        assert!(backend
            .ops()
            .iter()
            .any(|op| matches!(op, GpuOp::RebuildTlas { instance_count: 64, .. })));
        vis.destroy(&mut backend);
    }

    #[test]
    fn reload_swaps_pipelines_and_keeps_acceleration_structures() {
        let mut backend = RecordingBackend::new();
        let mut vis = ProbeVisualization::new(&mut backend, Path::new("shaders"), 64).unwrap();
        let old_rt = vis.pipelines.rt_pipeline;
        let tlas = vis.tlas;

        vis.reload(&mut backend, Path::new("shaders")).unwrap();
        assert_ne!(vis.pipelines.rt_pipeline, old_rt);
        assert_eq!(vis.tlas, tlas);
        assert!(backend
            .ops()
            .iter()
            .any(|op| matches!(op, GpuOp::DestroyRtPipeline { handle } if *handle == old_rt)));
        assert!(!backend
            .ops()
            .iter()
            .any(|op| matches!(op, GpuOp::DestroyAccel { .. })));

        // A broken shader leaves the current set in place.
        backend.fail_shader_compiles_containing("vis_probes");
        let current = vis.pipelines.rt_pipeline;
        assert!(vis.reload(&mut backend, Path::new("shaders")).is_err());
        assert_eq!(vis.pipelines.rt_pipeline, current);
        vis.destroy(&mut backend);
    }

    #[test]
    fn capacity_overflow_is_an_error_not_a_resize() {
        let mut backend = RecordingBackend::new();
        let registry = registry_with_probes(&mut backend, true);
        let vis = ProbeVisualization::new(&mut backend, Path::new("shaders"), 63).unwrap();

        assert!(vis.record(&mut backend, &registry, 640, 480).is_err());
        assert_eq!(backend.dispatch_count("vis instance update"), 0);
        vis.destroy(&mut backend);
    }

    #[test]
    fn hidden_volumes_record_nothing() {
        let mut backend = RecordingBackend::new();
        let registry = registry_with_probes(&mut backend, false);
        let vis = ProbeVisualization::new(&mut backend, Path::new("shaders"), 64).unwrap();

        vis.record(&mut backend, &registry, 640, 480).unwrap();
        assert!(!backend
            .ops()
            .iter()
            .any(|op| matches!(op, GpuOp::RebuildTlas { .. })));
        vis.destroy(&mut backend);
    }
}
