//! Per-volume shader permutation set. Between 4 and 10 compute programs
//! depending on feature toggles; each permutation is keyed by its
//! defines, so volumes with different texel counts get distinct
//! pipelines.

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use std::path::Path;

use candela_gpu::{ComputePipelineHandle, GpuBackend, GpuError, ShaderHandle, ShaderSource};

use crate::volume::desc::ProbeVolumeDesc;

pub struct VolumePipelines {
    pub blend_irradiance: ComputePipelineHandle,
    pub blend_distance: ComputePipelineHandle,
    pub border_rows: ComputePipelineHandle,
    pub border_columns: ComputePipelineHandle,
    pub relocation_update: Option<ComputePipelineHandle>,
    pub relocation_reset: Option<ComputePipelineHandle>,
    pub classification_update: Option<ComputePipelineHandle>,
    pub classification_reset: Option<ComputePipelineHandle>,
    pub variability_reduction: Option<ComputePipelineHandle>,
    pub variability_extra_reduction: Option<ComputePipelineHandle>,
    shaders: Vec<ShaderHandle>,
}

impl VolumePipelines {
    /// Compiles the full permutation set. On any failure the shaders and
    /// pipelines already created are destroyed again before the error
    /// propagates, matching `ProbeVolume::create`'s unwind order.
    pub fn compile(
        backend: &mut dyn GpuBackend,
        shader_dir: &Path,
        desc: &ProbeVolumeDesc,
    ) -> Result<Self, GpuError> {
        let mut shaders = Vec::new();
        let mut pipelines = Vec::new();

        match Self::compile_all(backend, shader_dir, desc, &mut shaders, &mut pipelines) {
            Ok(set) => Ok(set),
            Err(err) => {
                for pipeline in pipelines {
                    backend.destroy_compute_pipeline(pipeline);
                }
                for shader in shaders {
                    backend.destroy_shader(shader);
                }
                Err(err)
            }
        }
    }

    fn compile_all(
        backend: &mut dyn GpuBackend,
        shader_dir: &Path,
        desc: &ProbeVolumeDesc,
        shaders: &mut Vec<ShaderHandle>,
        pipelines: &mut Vec<ComputePipelineHandle>,
    ) -> Result<Self, GpuError> {
        let compile = |backend: &mut dyn GpuBackend,
                           shaders: &mut Vec<ShaderHandle>,
                           pipelines: &mut Vec<ComputePipelineHandle>,
                           source: ShaderSource,
                           name: &str|
         -> Result<ComputePipelineHandle, GpuError> {
            let shader = backend.compile_shader(&source)?;
            shaders.push(shader);
            let pipeline = backend.create_compute_pipeline(shader, name)?;
            pipelines.push(pipeline);
            Ok(pipeline)
        };

        let blending = shader_dir.join("probe_blending.comp");
        let blend_irradiance = compile(
            backend,
            shaders,
            pipelines,
            ShaderSource::compute(&blending)
                .define("PROBE_BLEND_RADIANCE", 1)
                .define("PROBE_NUM_TEXELS", desc.probe_num_irradiance_texels)
                .define("PROBE_SHARED_MEMORY", 1),
            &format!("{} blend irradiance", desc.name),
        )?;
        let blend_distance = compile(
            backend,
            shaders,
            pipelines,
            ShaderSource::compute(&blending)
                .define("PROBE_BLEND_RADIANCE", 0)
                .define("PROBE_NUM_TEXELS", desc.probe_num_distance_texels)
                .define("PROBE_SHARED_MEMORY", 1),
            &format!("{} blend distance", desc.name),
        )?;

        let border = shader_dir.join("probe_border_update.comp");
        let border_rows = compile(
            backend,
            shaders,
            pipelines,
            ShaderSource::compute(&border).entry("rows"),
            &format!("{} border rows", desc.name),
        )?;
        let border_columns = compile(
            backend,
            shaders,
            pipelines,
            ShaderSource::compute(&border).entry("columns"),
            &format!("{} border columns", desc.name),
        )?;

        let mut relocation_update = None;
        let mut relocation_reset = None;
        if desc.probe_relocation_enabled {
            let relocation = shader_dir.join("probe_relocation.comp");
            relocation_update = Some(compile(
                backend,
                shaders,
                pipelines,
                ShaderSource::compute(&relocation).entry("update"),
                &format!("{} relocation update", desc.name),
            )?);
            relocation_reset = Some(compile(
                backend,
                shaders,
                pipelines,
                ShaderSource::compute(&relocation).entry("reset"),
                &format!("{} relocation reset", desc.name),
            )?);
        }

        let mut classification_update = None;
        let mut classification_reset = None;
        if desc.probe_classification_enabled {
            let classification = shader_dir.join("probe_classification.comp");
            classification_update = Some(compile(
                backend,
                shaders,
                pipelines,
                ShaderSource::compute(&classification).entry("update"),
                &format!("{} classification update", desc.name),
            )?);
            classification_reset = Some(compile(
                backend,
                shaders,
                pipelines,
                ShaderSource::compute(&classification).entry("reset"),
                &format!("{} classification reset", desc.name),
            )?);
        }

        let mut variability_reduction = None;
        let mut variability_extra_reduction = None;
        if desc.probe_variability_enabled {
            let reduction = shader_dir.join("probe_variability_reduction.comp");
            variability_reduction = Some(compile(
                backend,
                shaders,
                pipelines,
                ShaderSource::compute(&reduction)
                    .entry("reduce")
                    .define("PROBE_NUM_TEXELS", desc.probe_num_irradiance_texels),
                &format!("{} variability reduction", desc.name),
            )?);
            variability_extra_reduction = Some(compile(
                backend,
                shaders,
                pipelines,
                ShaderSource::compute(&reduction).entry("extra_reduce"),
                &format!("{} variability extra reduction", desc.name),
            )?);
        }

        debug!(
            "compiled {} shader permutations for volume '{}'",
            shaders.len(),
            desc.name
        );

        Ok(Self {
            blend_irradiance,
            blend_distance,
            border_rows,
            border_columns,
            relocation_update,
            relocation_reset,
            classification_update,
            classification_reset,
            variability_reduction,
            variability_extra_reduction,
            shaders: std::mem::take(shaders),
        })
    }

    pub fn destroy(self, backend: &mut dyn GpuBackend) {
        let pipelines = [
            Some(self.blend_irradiance),
            Some(self.blend_distance),
            Some(self.border_rows),
            Some(self.border_columns),
            self.relocation_update,
            self.relocation_reset,
            self.classification_update,
            self.classification_reset,
            self.variability_reduction,
            self.variability_extra_reduction,
        ];
        for pipeline in pipelines.into_iter().flatten() {
            backend.destroy_compute_pipeline(pipeline);
        }
        for shader in self.shaders {
            backend.destroy_shader(shader);
        }
    }
}
