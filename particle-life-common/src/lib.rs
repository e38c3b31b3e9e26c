pub mod config;
pub mod sim_params;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{
    ExecutionConfig, ExecutionMode, ForceConfig, InitialConditions, OutputConfig,
    SimulationConfig, TimingConfig, UniverseConfig,
};
pub use sim_params::{NeighborScan, SimParams};
pub use snapshot::{write_snapshot_stream, ParticleSample, Snapshot, SnapshotReader};
pub use vecmath::{clamp, lerp, min_image, toroidal_delta, wrap_coord, Vec2};
