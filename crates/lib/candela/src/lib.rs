//! Dynamic diffuse global illumination probe volumes: lattice tracing,
//! hysteresis blending, adaptive relocation/classification, and a
//! convergence-driven update scheduler, recorded against a pluggable
//! GPU backend.

pub mod dump;
pub mod engine;
pub mod registry;
pub mod shaders;
pub mod stages;
pub mod visualize;
pub mod volume;

pub use engine::{EngineConfig, FrameUpdate, ProbeEngine, VolumeUpdate, NUM_BUFFERED_FRAMES};
pub use registry::{VolumeRegistry, MIN_VARIABILITY_SAMPLES};
pub use visualize::ProbeVisualization;
pub use volume::desc::{ProbeVolumeDesc, ProbeVolumeMovement};
pub use volume::ProbeVolume;

pub use candela_gpu as gpu;
