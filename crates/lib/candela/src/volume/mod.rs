pub mod constants;
pub mod desc;
pub mod textures;

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use std::f32::consts::TAU;
use std::path::Path;

use anyhow::{Context, Result};
use glam::{IVec3, Quat, Vec3};
use rand::Rng;

use candela_gpu::GpuBackend;

use crate::shaders::VolumePipelines;
use constants::{VolumeConstants, VolumeResourceIndices};
use desc::{ProbeVolumeDesc, ProbeVolumeMovement};
use textures::VolumeTextures;

/// The live probe-volume entity: descriptor, GPU atlases, compiled
/// pipeline permutations, and the mutable update state the per-frame
/// sequence reads and writes.
pub struct ProbeVolume {
    pub desc: ProbeVolumeDesc,
    pub textures: VolumeTextures,
    pub pipelines: VolumePipelines,

    /// Rolling volume-average variability, fed by the stale readback.
    pub average_variability: f32,
    /// Frames of variability accumulated since the last clear.
    pub variability_samples: u32,

    /// Pending soft clear: zero the probe atlases and reset
    /// relocation/classification without reallocating anything.
    pub clear_probes: bool,
    pub relocation_needs_reset: bool,
    pub classification_needs_reset: bool,

    /// Fresh uniform random rotation applied to ray directions each
    /// frame, so fixed ray patterns do not alias.
    pub probe_ray_rotation: Quat,

    scroll_anchor: Vec3,
    pub scroll_offsets: IVec3,
    pub scroll_clear: [bool; 3],
}

impl ProbeVolume {
    pub fn create(
        backend: &mut dyn GpuBackend,
        shader_dir: &Path,
        desc: ProbeVolumeDesc,
    ) -> Result<Self> {
        let pipelines = VolumePipelines::compile(backend, shader_dir, &desc)
            .with_context(|| format!("compiling pipelines for volume '{}'", desc.name))?;

        let textures = match VolumeTextures::create(backend, &desc) {
            Ok(t) => t,
            Err(err) => {
                pipelines.destroy(backend);
                return Err(err)
                    .with_context(|| format!("allocating atlases for volume '{}'", desc.name));
            }
        };

        info!(
            "volume '{}': {} probes, {} rays/probe, {:.1} MiB",
            desc.name,
            desc.probe_count(),
            desc.probe_num_rays,
            textures.gpu_bytes as f64 / (1024.0 * 1024.0)
        );

        Ok(Self {
            scroll_anchor: desc.origin,
            desc,
            textures,
            pipelines,
            average_variability: f32::MAX,
            variability_samples: 0,
            clear_probes: true,
            relocation_needs_reset: true,
            classification_needs_reset: true,
            probe_ray_rotation: Quat::IDENTITY,
            scroll_offsets: IVec3::ZERO,
            scroll_clear: [false; 3],
        })
    }

    pub fn destroy(self, backend: &mut dyn GpuBackend) {
        self.pipelines.destroy(backend);
        self.textures.destroy(backend);
    }

    pub fn probe_count(&self) -> u32 {
        self.desc.probe_count()
    }

    /// Soft clear: schedules atlas clears and reset passes, zeroes the
    /// convergence counter. No GPU memory is touched until the next
    /// recorded frame.
    pub fn request_clear_probes(&mut self) {
        self.clear_probes = true;
        self.relocation_needs_reset = true;
        self.classification_needs_reset = true;
        self.variability_samples = 0;
        self.average_variability = f32::MAX;
    }

    /// Invalidate convergence without touching probe data; used when
    /// lights or geometry changed.
    pub fn request_clear_variability(&mut self) {
        self.variability_samples = 0;
        self.average_variability = f32::MAX;
    }

    /// Moves the volume. Fixed volumes teleport (and owe a probe clear);
    /// scrolling volumes wrap whole probe planes and only clear those.
    pub fn move_to(&mut self, origin: Vec3) {
        match self.desc.movement {
            ProbeVolumeMovement::Fixed => {
                if origin != self.desc.origin {
                    self.desc.origin = origin;
                    self.request_clear_probes();
                }
            }
            ProbeVolumeMovement::Scrolling => {
                self.desc.origin = origin;
                self.compute_scrolling();
            }
        }
    }

    fn compute_scrolling(&mut self) {
        let translation = self.desc.origin - self.scroll_anchor;
        let counts = self.desc.probe_counts.as_ivec3();
        let mut cleared = [false; 3];

        for axis in 0..3 {
            let spacing = self.desc.probe_spacing[axis];
            if spacing <= 0.0 {
                continue;
            }
            let planes = (translation[axis] / spacing).trunc() as i32;
            if planes == 0 {
                continue;
            }

            self.scroll_anchor[axis] += planes as f32 * spacing;
            self.scroll_offsets[axis] =
                (self.scroll_offsets[axis] + planes).rem_euclid(counts[axis]);
            cleared[axis] = true;
            self.request_clear_variability();
        }

        self.scroll_clear = cleared;
    }

    /// Snaps scroll offsets back to zero; the wrapped planes all need a
    /// clear afterwards.
    pub fn scroll_reset(&mut self) {
        if self.scroll_offsets != IVec3::ZERO {
            self.scroll_offsets = IVec3::ZERO;
            self.scroll_anchor = self.desc.origin;
            self.request_clear_probes();
        }
    }

    pub fn update_ray_rotation(&mut self, rng: &mut impl Rng) {
        self.probe_ray_rotation = uniform_random_rotation(rng);
    }

    pub fn constants(&self) -> VolumeConstants {
        VolumeConstants::pack(
            &self.desc,
            self.probe_ray_rotation,
            self.scroll_offsets,
            self.scroll_clear,
        )
    }

    pub fn resource_indices(&self, backend: &dyn GpuBackend) -> VolumeResourceIndices {
        let ray_data = backend.texture_slots(self.textures.ray_data);
        let irradiance = backend.texture_slots(self.textures.irradiance);
        let distance = backend.texture_slots(self.textures.distance);
        let probe_data = backend.texture_slots(self.textures.probe_data);
        let variability = self
            .textures
            .variability
            .map(|t| backend.texture_slots(t))
            .unwrap_or_default();
        let average = self
            .textures
            .variability_average
            .map(|t| backend.texture_slots(t))
            .unwrap_or_default();

        VolumeResourceIndices {
            ray_data_storage: ray_data.storage,
            ray_data_sampled: ray_data.sampled,
            irradiance_storage: irradiance.storage,
            irradiance_sampled: irradiance.sampled,
            distance_storage: distance.storage,
            distance_sampled: distance.sampled,
            probe_data_storage: probe_data.storage,
            probe_data_sampled: probe_data.sampled,
            variability_storage: variability.storage,
            variability_average_storage: average.storage,
            _pad: [0; 2],
        }
    }

    pub fn gpu_memory_used_bytes(&self) -> usize {
        self.textures.gpu_bytes
    }
}

/// Uniformly distributed random rotation (Shoemake's subgroup method).
pub fn uniform_random_rotation(rng: &mut impl Rng) -> Quat {
    let u1: f32 = rng.gen();
    let u2: f32 = rng.gen();
    let u3: f32 = rng.gen();

    let a = (1.0 - u1).sqrt();
    let b = u1.sqrt();
    Quat::from_xyzw(
        a * (TAU * u2).sin(),
        a * (TAU * u2).cos(),
        b * (TAU * u3).sin(),
        b * (TAU * u3).cos(),
    )
}
