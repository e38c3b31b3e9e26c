//! CPU engine for a typed-particle ("particle life") simulation on a torus.
//!
//! Each step rebuilds a uniform bucket grid, queries every particle against a
//! frozen snapshot of the previous state and writes the integrated result into
//! a second buffer that becomes the new state once the whole phase completes.

pub mod cpu_state;
pub mod export;
pub mod force;
pub mod grid;
pub mod integrator;
pub mod neighbor;
pub mod setup;
pub mod simulation;
pub mod wire;

pub use cpu_state::{CpuState, Particle};
pub use force::ForceModel;
pub use grid::SpatialGrid;
pub use neighbor::{NeighborSum, ParticleView};
pub use simulation::CpuSimulation;
pub use wire::WireParticle;
