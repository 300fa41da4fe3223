//! Indirect lighting gather: one full-screen compute dispatch sampling
//! the blended atlases into an output texture the composite pass reads.
//! Requires this frame's constants upload to be recorded first.

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use std::path::Path;

use anyhow::{Context, Result};

use candela_gpu::{
    BarrierScope, ComputePipelineHandle, GpuBackend, ShaderSource, TextureDesc, TextureFormat,
    TextureHandle,
};

const GATHER_GROUP_SIZE: u32 = 8;

pub struct IndirectGatherStage {
    pipeline: ComputePipelineHandle,
    shader: candela_gpu::ShaderHandle,
    output: TextureHandle,
    width: u32,
    height: u32,
}

impl IndirectGatherStage {
    pub fn new(
        backend: &mut dyn GpuBackend,
        shader_dir: &Path,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let (shader, pipeline) = Self::build_pipeline(backend, shader_dir)?;
        let output = match Self::create_output(backend, width, height) {
            Ok(o) => o,
            Err(err) => {
                backend.destroy_compute_pipeline(pipeline);
                backend.destroy_shader(shader);
                return Err(err);
            }
        };

        Ok(Self {
            pipeline,
            shader,
            output,
            width,
            height,
        })
    }

    fn build_pipeline(
        backend: &mut dyn GpuBackend,
        shader_dir: &Path,
    ) -> Result<(candela_gpu::ShaderHandle, ComputePipelineHandle)> {
        let shader = backend
            .compile_shader(&ShaderSource::compute(
                shader_dir.join("indirect_gather.comp"),
            ))
            .context("indirect gather shader")?;
        let pipeline = match backend.create_compute_pipeline(shader, "indirect gather") {
            Ok(p) => p,
            Err(err) => {
                backend.destroy_shader(shader);
                return Err(err).context("indirect gather pipeline");
            }
        };
        Ok((shader, pipeline))
    }

    /// Hot reload: build the replacement first, swap only on success.
    /// The output texture is untouched.
    pub fn reload(&mut self, backend: &mut dyn GpuBackend, shader_dir: &Path) -> Result<()> {
        let (shader, pipeline) = Self::build_pipeline(backend, shader_dir)?;
        backend.destroy_compute_pipeline(self.pipeline);
        backend.destroy_shader(self.shader);
        self.shader = shader;
        self.pipeline = pipeline;
        Ok(())
    }

    fn create_output(
        backend: &mut dyn GpuBackend,
        width: u32,
        height: u32,
    ) -> Result<TextureHandle> {
        backend
            .create_texture(
                TextureDesc::new_2d_array(width, height, 1, TextureFormat::R16G16B16A16Float),
                "indirect lighting",
            )
            .context("indirect lighting output")
    }

    /// Screen-space-only resize; probe atlases are untouched.
    pub fn resize(&mut self, backend: &mut dyn GpuBackend, width: u32, height: u32) -> Result<()> {
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }
        let output = Self::create_output(backend, width, height)?;
        backend.destroy_texture(self.output);
        self.output = output;
        self.width = width;
        self.height = height;
        debug!("indirect gather resized to {width}x{height}");
        Ok(())
    }

    pub fn output(&self) -> TextureHandle {
        self.output
    }

    pub fn record(&self, backend: &mut dyn GpuBackend) {
        backend.dispatch(
            self.pipeline,
            "indirect gather",
            [
                self.width.div_ceil(GATHER_GROUP_SIZE),
                self.height.div_ceil(GATHER_GROUP_SIZE),
                1,
            ],
        );
        backend.barrier(&[BarrierScope::GatherOutput(self.output)]);
    }

    pub fn destroy(self, backend: &mut dyn GpuBackend) {
        backend.destroy_texture(self.output);
        backend.destroy_compute_pipeline(self.pipeline);
        backend.destroy_shader(self.shader);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candela_gpu::mock::{GpuOp, RecordingBackend};

    #[test]
    fn dispatch_covers_the_screen_in_8x8_groups() {
        let mut backend = RecordingBackend::new();
        let stage =
            IndirectGatherStage::new(&mut backend, Path::new("shaders"), 1920, 1080).unwrap();
        stage.record(&mut backend);

        assert!(backend.ops().iter().any(|op| matches!(
            op,
            GpuOp::Dispatch { label, groups, .. }
                if label == "indirect gather" && *groups == [240, 135, 1]
        )));
        stage.destroy(&mut backend);
    }

    #[test]
    fn reload_swaps_the_pipeline_and_keeps_the_output() {
        let mut backend = RecordingBackend::new();
        let mut stage =
            IndirectGatherStage::new(&mut backend, Path::new("shaders"), 800, 600).unwrap();
        let old_output = stage.output();
        let old_pipeline = stage.pipeline;

        stage.reload(&mut backend, Path::new("shaders")).unwrap();
        assert_ne!(stage.pipeline, old_pipeline);
        assert_eq!(stage.output(), old_output);
        assert!(backend
            .ops()
            .iter()
            .any(|op| matches!(op, GpuOp::DestroyComputePipeline { handle } if *handle == old_pipeline)));

        // A broken shader leaves the current pipeline in place.
        backend.fail_shader_compiles_containing("indirect_gather");
        let current = stage.pipeline;
        assert!(stage.reload(&mut backend, Path::new("shaders")).is_err());
        assert_eq!(stage.pipeline, current);
        stage.destroy(&mut backend);
    }

    #[test]
    fn resize_recreates_only_the_output() {
        let mut backend = RecordingBackend::new();
        let mut stage =
            IndirectGatherStage::new(&mut backend, Path::new("shaders"), 800, 600).unwrap();
        let old = stage.output();

        stage.resize(&mut backend, 1024, 768).unwrap();
        assert_ne!(stage.output(), old);
        assert_eq!(backend.destroys_of_texture(old), 1);

        // Same size is a no-op.
        let current = stage.output();
        stage.resize(&mut backend, 1024, 768).unwrap();
        assert_eq!(stage.output(), current);
        stage.destroy(&mut backend);
    }
}
