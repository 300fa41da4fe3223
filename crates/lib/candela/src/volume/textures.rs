//! Atlas allocation and sizing. All atlases are 2D texture arrays: one
//! layer per vertical probe plane, probes packed in X/Z within a layer.

use candela_gpu::{
    BufferDesc, BufferHandle, GpuBackend, GpuError, TextureDesc, TextureFormat, TextureHandle,
    TextureUsage,
};

use super::desc::ProbeVolumeDesc;
use crate::stages::variability::REDUCTION_DIMENSION_SCALE;

pub const RAY_DATA_FORMAT: TextureFormat = TextureFormat::R32G32B32A32Float;
pub const IRRADIANCE_FORMAT: TextureFormat = TextureFormat::R16G16B16A16Float;
pub const DISTANCE_FORMAT: TextureFormat = TextureFormat::R16G16Float;
pub const PROBE_DATA_FORMAT: TextureFormat = TextureFormat::R16G16B16A16Float;
pub const VARIABILITY_FORMAT: TextureFormat = TextureFormat::R16Float;
pub const VARIABILITY_AVERAGE_FORMAT: TextureFormat = TextureFormat::R32G32Float;

/// One texel of radiance/distance per ray per probe.
pub fn ray_data_desc(desc: &ProbeVolumeDesc) -> TextureDesc {
    TextureDesc::new_2d_array(
        desc.probe_num_rays,
        desc.probes_per_plane(),
        desc.probe_counts.y,
        RAY_DATA_FORMAT,
    )
}

/// Interior texels plus a one-texel border ring on every probe tile.
pub fn irradiance_desc(desc: &ProbeVolumeDesc) -> TextureDesc {
    let tile = desc.probe_num_irradiance_texels + 2;
    TextureDesc::new_2d_array(
        desc.probe_counts.x * tile,
        desc.probe_counts.z * tile,
        desc.probe_counts.y,
        IRRADIANCE_FORMAT,
    )
    .usage(TextureUsage::STORAGE_SAMPLED.with_copy())
}

pub fn distance_desc(desc: &ProbeVolumeDesc) -> TextureDesc {
    let tile = desc.probe_num_distance_texels + 2;
    TextureDesc::new_2d_array(
        desc.probe_counts.x * tile,
        desc.probe_counts.z * tile,
        desc.probe_counts.y,
        DISTANCE_FORMAT,
    )
}

/// One texel per probe: relocation offset in xyz, classification state
/// in w.
pub fn probe_data_desc(desc: &ProbeVolumeDesc) -> TextureDesc {
    TextureDesc::new_2d_array(
        desc.probe_counts.x,
        desc.probe_counts.z,
        desc.probe_counts.y,
        PROBE_DATA_FORMAT,
    )
    .usage(TextureUsage::STORAGE_SAMPLED.with_copy())
}

/// Irradiance interior texels only; no border ring.
pub fn variability_desc(desc: &ProbeVolumeDesc) -> TextureDesc {
    TextureDesc::new_2d_array(
        desc.probe_counts.x * desc.probe_num_irradiance_texels,
        desc.probe_counts.z * desc.probe_num_irradiance_texels,
        desc.probe_counts.y,
        VARIABILITY_FORMAT,
    )
}

/// The first reduction pass writes one value per thread group; the
/// average texture is the variability dimensions divided by the
/// per-group sample footprint.
pub fn variability_average_desc(desc: &ProbeVolumeDesc) -> TextureDesc {
    let v = variability_desc(desc);
    TextureDesc::new_2d_array(
        v.width.div_ceil(REDUCTION_DIMENSION_SCALE[0]),
        v.height.div_ceil(REDUCTION_DIMENSION_SCALE[1]),
        v.array_layers.div_ceil(REDUCTION_DIMENSION_SCALE[2]),
        VARIABILITY_AVERAGE_FORMAT,
    )
    .usage(TextureUsage::STORAGE_SAMPLED.with_copy())
}

pub struct VolumeTextures {
    pub ray_data: TextureHandle,
    pub irradiance: TextureHandle,
    pub distance: TextureHandle,
    pub probe_data: TextureHandle,
    pub variability: Option<TextureHandle>,
    pub variability_average: Option<TextureHandle>,
    pub variability_readback: Option<BufferHandle>,
    /// Total device memory behind the atlases, for logging.
    pub gpu_bytes: usize,
}

impl VolumeTextures {
    pub fn create(backend: &mut dyn GpuBackend, desc: &ProbeVolumeDesc) -> Result<Self, GpuError> {
        let name = |suffix: &str| format!("{} {suffix}", desc.name);

        let ray_data = ray_data_desc(desc);
        let irradiance = irradiance_desc(desc);
        let distance = distance_desc(desc);
        let probe_data = probe_data_desc(desc);

        let mut gpu_bytes = ray_data.total_bytes()
            + irradiance.total_bytes()
            + distance.total_bytes()
            + probe_data.total_bytes();

        let ray_data = backend.create_texture(ray_data, &name("ray data"))?;
        let irradiance = backend.create_texture(irradiance, &name("irradiance"))?;
        let distance = backend.create_texture(distance, &name("distance"))?;
        let probe_data = backend.create_texture(probe_data, &name("probe data"))?;

        let (variability, variability_average, variability_readback) =
            if desc.probe_variability_enabled {
                let variability = variability_desc(desc);
                let average = variability_average_desc(desc);
                gpu_bytes += variability.total_bytes() + average.total_bytes();

                let variability = backend.create_texture(variability, &name("variability"))?;
                let average = backend.create_texture(average, &name("variability average"))?;
                let readback = backend.create_buffer(
                    BufferDesc::readback(VARIABILITY_AVERAGE_FORMAT.block_bytes()),
                    &name("variability readback"),
                )?;
                (Some(variability), Some(average), Some(readback))
            } else {
                (None, None, None)
            };

        Ok(Self {
            ray_data,
            irradiance,
            distance,
            probe_data,
            variability,
            variability_average,
            variability_readback,
            gpu_bytes,
        })
    }

    pub fn destroy(self, backend: &mut dyn GpuBackend) {
        backend.destroy_texture(self.ray_data);
        backend.destroy_texture(self.irradiance);
        backend.destroy_texture(self.distance);
        backend.destroy_texture(self.probe_data);
        if let Some(t) = self.variability {
            backend.destroy_texture(t);
        }
        if let Some(t) = self.variability_average {
            backend.destroy_texture(t);
        }
        if let Some(b) = self.variability_readback {
            backend.destroy_buffer(b);
        }
    }
}
