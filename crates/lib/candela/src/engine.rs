//! The probe engine: owns the registry, stages, visualization, and the
//! double-buffered constants upload, and drives the fixed per-frame
//! sequence trace -> blend -> relocate -> classify -> variability ->
//! gather -> visualization.

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use glam::Vec3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use candela_gpu::{AccelHandle, DynamicConstants, GpuBackend, TextureHandle};

use crate::dump;
use crate::registry::VolumeRegistry;
use crate::stages::{blend, classify, gather::IndirectGatherStage, relocate, trace::ProbeTraceStage, variability};
use crate::visualize::ProbeVisualization;
use crate::volume::desc::ProbeVolumeDesc;
use crate::volume::textures;

/// CPU runs at most one frame ahead of the GPU.
pub const NUM_BUFFERED_FRAMES: u64 = 2;

/// A fence wait longer than this means the device is gone; fatal.
const FENCE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    pub render_width: u32,
    pub render_height: u32,
    pub shader_dir: PathBuf,
    pub volumes: Vec<ProbeVolumeDesc>,
    pub visualization_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            render_width: 1920,
            render_height: 1080,
            shader_dir: PathBuf::from("shaders"),
            volumes: Vec::new(),
            visualization_enabled: false,
        }
    }
}

/// Mutable per-frame inputs; everything else about a volume is fixed at
/// creation.
#[derive(Clone, Debug, Default)]
pub struct VolumeUpdate {
    pub index: u32,
    pub origin: Option<Vec3>,
    pub clear_probes: bool,
    pub clear_variability: bool,
    pub show_probes: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct FrameUpdate {
    pub volumes: Vec<VolumeUpdate>,
    /// Lights or geometry changed: convergence is invalid everywhere.
    pub scene_changed: bool,
    /// Toggle the raw-atlas overlay; `None` leaves it as is.
    pub show_texture_atlases: Option<bool>,
}

pub struct ProbeEngine {
    registry: VolumeRegistry,
    dynamic_constants: Option<DynamicConstants>,
    trace_stage: Option<ProbeTraceStage>,
    gather_stage: Option<IndirectGatherStage>,
    visualization: Option<ProbeVisualization>,
    scene_tlas: AccelHandle,
    shader_dir: PathBuf,
    render_width: u32,
    render_height: u32,
    selected: Vec<u32>,
    frame_index: u64,
    rng: StdRng,
}

impl ProbeEngine {
    /// Builds every volume and stage. Any failure aborts the whole
    /// startup; no partially initialized engine is ever returned.
    pub fn initialize(
        backend: &mut dyn GpuBackend,
        scene_tlas: AccelHandle,
        config: &EngineConfig,
    ) -> Result<Self> {
        let mut registry = VolumeRegistry::new();

        let dynamic_constants = match DynamicConstants::new(backend).context("dynamic constants") {
            Ok(dc) => dc,
            Err(err) => {
                registry.destroy_all(backend);
                return Err(err);
            }
        };

        for desc in &config.volumes {
            if let Err(err) = registry.create_or_replace(backend, &config.shader_dir, desc.clone())
            {
                registry.destroy_all(backend);
                dynamic_constants.destroy(backend);
                return Err(err.context("creating probe volumes"));
            }
        }

        let trace_stage = match ProbeTraceStage::new(backend, &config.shader_dir) {
            Ok(s) => s,
            Err(err) => {
                registry.destroy_all(backend);
                dynamic_constants.destroy(backend);
                return Err(err.context("probe trace stage"));
            }
        };

        let gather_stage = match IndirectGatherStage::new(
            backend,
            &config.shader_dir,
            config.render_width,
            config.render_height,
        ) {
            Ok(s) => s,
            Err(err) => {
                trace_stage.destroy(backend);
                registry.destroy_all(backend);
                dynamic_constants.destroy(backend);
                return Err(err.context("indirect gather stage"));
            }
        };

        let visualization = if config.visualization_enabled {
            let capacity: u32 = registry.iter_live().map(|(_, v)| v.probe_count()).sum();
            match ProbeVisualization::new(backend, &config.shader_dir, capacity) {
                Ok(v) => Some(v),
                Err(err) => {
                    gather_stage.destroy(backend);
                    trace_stage.destroy(backend);
                    registry.destroy_all(backend);
                    dynamic_constants.destroy(backend);
                    return Err(err.context("probe visualization"));
                }
            }
        } else {
            None
        };

        // One-time clears of every atlas; block until the device drains.
        for (_, volume) in registry.iter_live() {
            backend.clear_texture(volume.textures.ray_data);
            backend.clear_texture(volume.textures.irradiance);
            backend.clear_texture(volume.textures.distance);
            backend.clear_texture(volume.textures.probe_data);
            if let Some(t) = volume.textures.variability {
                backend.clear_texture(t);
            }
            if let Some(t) = volume.textures.variability_average {
                backend.clear_texture(t);
            }
        }
        backend.wait_idle();

        info!(
            "probe engine initialized: {} volumes, {}x{}",
            registry.live_count(),
            config.render_width,
            config.render_height
        );

        Ok(Self {
            registry,
            dynamic_constants: Some(dynamic_constants),
            trace_stage: Some(trace_stage),
            gather_stage: Some(gather_stage),
            visualization,
            scene_tlas,
            shader_dir: config.shader_dir.clone(),
            render_width: config.render_width,
            render_height: config.render_height,
            selected: Vec::new(),
            frame_index: 0,
            rng: StdRng::seed_from_u64(0x9e3779b97f4a7c15),
        })
    }

    pub fn registry(&self) -> &VolumeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut VolumeRegistry {
        &mut self.registry
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn indirect_output(&self) -> Option<TextureHandle> {
        self.gather_stage.as_ref().map(|g| g.output())
    }

    /// Hot reload: recompile every volume's shader permutations and the
    /// stage pipelines. Volume atlases and all update state survive; a
    /// failure leaves the previous pipelines in place.
    pub fn reload(&mut self, backend: &mut dyn GpuBackend) -> Result<()> {
        use crate::shaders::VolumePipelines;

        // Compile all replacements before destroying anything.
        let mut replacements = Vec::new();
        for (index, volume) in self.registry.iter_live() {
            let pipelines = VolumePipelines::compile(backend, &self.shader_dir, &volume.desc)
                .with_context(|| format!("reloading pipelines for '{}'", volume.desc.name))?;
            replacements.push((index, pipelines));
        }

        for (index, pipelines) in replacements {
            if let Some(volume) = self.registry.volume_mut(index) {
                let old = std::mem::replace(&mut volume.pipelines, pipelines);
                old.destroy(backend);
            } else {
                pipelines.destroy(backend);
            }
        }

        if let Some(stage) = self.trace_stage.as_mut() {
            stage.reload(backend, &self.shader_dir)?;
        }
        if let Some(stage) = self.gather_stage.as_mut() {
            stage.reload(backend, &self.shader_dir)?;
        }
        if let Some(vis) = self.visualization.as_mut() {
            vis.reload(backend, &self.shader_dir)?;
        }

        info!("reloaded shader pipelines for {} volumes", self.registry.live_count());
        Ok(())
    }

    /// Screen-space resources only; volume atlases are untouched.
    pub fn resize(&mut self, backend: &mut dyn GpuBackend, width: u32, height: u32) -> Result<()> {
        self.render_width = width;
        self.render_height = height;
        if let Some(gather) = self.gather_stage.as_mut() {
            gather.resize(backend, width, height)?;
        }
        Ok(())
    }

    /// CPU-side frame preparation; records no GPU commands. Applies the
    /// mutable config, reads the stale variability averages, reseeds the
    /// per-volume ray rotations, and selects this frame's volumes.
    pub fn update(&mut self, backend: &mut dyn GpuBackend, frame: &FrameUpdate) {
        for change in &frame.volumes {
            let Some(volume) = self.registry.volume_mut(change.index) else {
                warn!("frame update for missing volume index {}", change.index);
                continue;
            };
            if let Some(origin) = change.origin {
                volume.move_to(origin);
            }
            if change.clear_probes {
                volume.request_clear_probes();
            }
            if change.clear_variability {
                volume.request_clear_variability();
            }
            if let Some(show) = change.show_probes {
                volume.desc.show_probes = show;
            }
        }

        if let Some(show) = frame.show_texture_atlases {
            if let Some(vis) = self.visualization.as_mut() {
                vis.show_texture_atlases = show;
            }
        }

        if frame.scene_changed {
            for (_, volume) in self.registry.iter_live_mut() {
                volume.request_clear_variability();
            }
        }

        // Stale by design: whatever the readback holds is from an earlier
        // frame's reduction.
        for (_, volume) in self.registry.iter_live_mut() {
            if let Some(value) = variability::read_stale_average(backend, volume) {
                volume.average_variability = value;
            }
        }

        for (_, volume) in self.registry.iter_live_mut() {
            volume.update_ray_rotation(&mut self.rng);
        }

        self.selected = self.registry.select_active();
    }

    /// Records the full frame. The fence gate at the top is what makes
    /// the double-buffered upload safe: the slot this frame writes was
    /// last read two submissions ago.
    pub fn execute(&mut self, backend: &mut dyn GpuBackend) -> Result<()> {
        let dynamic_constants = self
            .dynamic_constants
            .as_mut()
            .context("engine has been shut down")?;

        backend.begin_frame();
        backend
            .wait_for_fence(NUM_BUFFERED_FRAMES, FENCE_TIMEOUT)
            .context("frame fence wait")?;

        self.registry
            .upload_frame_constants(backend, dynamic_constants)?;

        // Pending soft clears, recorded before any tracing touches the
        // atlases.
        for (_, volume) in self.registry.iter_live_mut() {
            if !volume.clear_probes {
                continue;
            }
            backend.clear_texture(volume.textures.irradiance);
            backend.clear_texture(volume.textures.distance);
            backend.clear_texture(volume.textures.probe_data);
            volume.clear_probes = false;
        }

        if let Some(trace_stage) = &self.trace_stage {
            trace_stage.record(backend, self.scene_tlas, &self.registry, &self.selected);
        }
        blend::record(backend, &self.registry, &self.selected);
        relocate::record(backend, &mut self.registry, &self.selected);
        classify::record(backend, &mut self.registry, &self.selected);
        variability::record(backend, &self.registry, &self.selected);

        if let Some(gather) = &self.gather_stage {
            gather.record(backend);
        }

        if let Some(vis) = &self.visualization {
            vis.record(backend, &self.registry, self.render_width, self.render_height)?;
        }

        backend.submit_and_fence();
        dynamic_constants.advance_frame();
        self.frame_index += 1;
        trace!("frame {} submitted", self.frame_index);
        Ok(())
    }

    /// Destroys everything. Idempotent: a second call finds only empty
    /// slots and does nothing.
    pub fn cleanup(&mut self, backend: &mut dyn GpuBackend) {
        self.registry.destroy_all(backend);
        if let Some(dc) = self.dynamic_constants.take() {
            dc.destroy(backend);
        }
        if let Some(stage) = self.trace_stage.take() {
            stage.destroy(backend);
        }
        if let Some(stage) = self.gather_stage.take() {
            stage.destroy(backend);
        }
        if let Some(vis) = self.visualization.take() {
            vis.destroy(backend);
        }
        self.selected.clear();
    }

    /// Debug dump of the irradiance, probe-data, and variability-average
    /// atlases for every live volume.
    pub fn write_volumes_to_disk(&self, backend: &dyn GpuBackend, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating dump directory {}", dir.display()))?;

        for (_, volume) in self.registry.iter_live() {
            let stem = volume.desc.name.replace([' ', '/'], "_");

            dump::write_texture_layers(
                backend,
                volume.textures.irradiance,
                &textures::irradiance_desc(&volume.desc),
                dir,
                &format!("{stem}_irradiance"),
            )?;
            dump::write_texture_layers(
                backend,
                volume.textures.probe_data,
                &textures::probe_data_desc(&volume.desc),
                dir,
                &format!("{stem}_probe_data"),
            )?;
            if let Some(average) = volume.textures.variability_average {
                dump::write_texture_layers(
                    backend,
                    average,
                    &textures::variability_average_desc(&volume.desc),
                    dir,
                    &format!("{stem}_variability_average"),
                )?;
            }
        }
        Ok(())
    }
}
