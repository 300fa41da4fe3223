//! Barrier gates recorded between sub-passes. The update sequence is a
//! linear command stream on one queue; every write that a later pass
//! reads needs a gate naming the resource class it covers.

use crate::handles::{BufferHandle, TextureHandle};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BarrierScope {
    /// Ray-data atlas: trace writes, blend reads.
    RayData(TextureHandle),
    /// Irradiance atlas: blend/border write, gather reads.
    IrradianceAtlas(TextureHandle),
    /// Distance atlas: blend/border write, gather and relocation read.
    DistanceAtlas(TextureHandle),
    /// Probe data atlas: relocation/classification write, everyone reads.
    ProbeData(TextureHandle),
    /// Variability atlas between reduction passes.
    Variability(TextureHandle),
    /// Variability average between reduction passes and the readback copy.
    VariabilityAverage(TextureHandle),
    /// Device-local constants after the upload copy, before any dispatch
    /// that binds them.
    Constants(BufferHandle),
    /// TLAS instance buffer after the per-frame rewrite, before rebuild.
    Instances(BufferHandle),
    /// Gather output between the gather dispatch and the composite read.
    GatherOutput(TextureHandle),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessKind {
    UavReadWrite,
    CopySrc,
    CopyDst,
}

impl BarrierScope {
    /// Access transition implied by the gate, in (before, after) order.
    pub fn access(self) -> (AccessKind, AccessKind) {
        match self {
            Self::VariabilityAverage(_) => (AccessKind::UavReadWrite, AccessKind::CopySrc),
            Self::Constants(_) => (AccessKind::CopyDst, AccessKind::UavReadWrite),
            _ => (AccessKind::UavReadWrite, AccessKind::UavReadWrite),
        }
    }
}
