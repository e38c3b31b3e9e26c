use crate::grid::SpatialGrid;
use crate::neighbor::ParticleView;
use anyhow::Result;
use particle_life_common::{SimParams, Vec2};
use serde::{Deserialize, Serialize};

/// One particle as exchanged with the setup collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub position: Vec2,
    pub velocity: Vec2,
    pub ptype: u32,
}

impl Particle {
    pub fn new(position: Vec2, velocity: Vec2, ptype: u32) -> Self {
        Self { position, velocity, ptype }
    }
}

/// Holds the simulation state vectors on the CPU.
#[derive(Debug)]
pub struct CpuState {
    pub params: SimParams,
    pub num_particles: u32,

    // --- Ping-Pong Buffers for Parallel Update ---
    // Current step's input (the frozen snapshot every query reads)
    pub positions_x_in: Vec<f32>,
    pub positions_y_in: Vec<f32>,
    pub velocities_x_in: Vec<f32>,
    pub velocities_y_in: Vec<f32>,

    // Current step's output, next step's input
    pub positions_x_out: Vec<f32>,
    pub positions_y_out: Vec<f32>,
    pub velocities_x_out: Vec<f32>,
    pub velocities_y_out: Vec<f32>,

    // Types never change after creation, so they are not double buffered.
    pub types: Vec<u32>,

    // Rebuilt at the start of every step from the _in positions.
    pub grid: SpatialGrid,
}

impl CpuState {
    /// Creates a new CpuState from an initial particle buffer.
    ///
    /// Every position must be finite and lie inside the domain.
    pub fn new(particles: &[Particle], params: SimParams) -> Result<Self> {
        let grid = SpatialGrid::new(&params);
        let mut state = Self {
            params,
            num_particles: 0,
            positions_x_in: Vec::new(),
            positions_y_in: Vec::new(),
            velocities_x_in: Vec::new(),
            velocities_y_in: Vec::new(),
            positions_x_out: Vec::new(),
            positions_y_out: Vec::new(),
            velocities_x_out: Vec::new(),
            velocities_y_out: Vec::new(),
            types: Vec::new(),
            grid,
        };
        state.set_particles(particles)?;
        Ok(state)
    }

    /// Replaces the whole particle buffer. Only valid between steps.
    pub fn set_particles(&mut self, particles: &[Particle]) -> Result<()> {
        for (idx, p) in particles.iter().enumerate() {
            check_particle(idx, p, &self.params)?;
        }
        let count = u32::try_from(particles.len())
            .map_err(|_| anyhow::anyhow!("Too many particles ({}).", particles.len()))?;

        self.positions_x_in = particles.iter().map(|p| p.position.x).collect();
        self.positions_y_in = particles.iter().map(|p| p.position.y).collect();
        self.velocities_x_in = particles.iter().map(|p| p.velocity.x).collect();
        self.velocities_y_in = particles.iter().map(|p| p.velocity.y).collect();
        self.types = particles.iter().map(|p| p.ptype).collect();

        let n = particles.len();
        self.positions_x_out = vec![0.0; n];
        self.positions_y_out = vec![0.0; n];
        self.velocities_x_out = vec![0.0; n];
        self.velocities_y_out = vec![0.0; n];
        self.num_particles = count;
        Ok(())
    }

    /// Swaps the input and output buffers for position and velocity.
    pub fn swap_buffers(&mut self) {
        std::mem::swap(&mut self.positions_x_in, &mut self.positions_x_out);
        std::mem::swap(&mut self.positions_y_in, &mut self.positions_y_out);
        std::mem::swap(&mut self.velocities_x_in, &mut self.velocities_x_out);
        std::mem::swap(&mut self.velocities_y_in, &mut self.velocities_y_out);
    }

    /// Read-only view of the committed state.
    pub fn view(&self) -> ParticleView<'_> {
        ParticleView {
            positions_x: &self.positions_x_in,
            positions_y: &self.positions_y_in,
            types: &self.types,
        }
    }

    /// Copies the committed state out as particle records.
    pub fn particles(&self) -> Vec<Particle> {
        (0..self.num_particles as usize)
            .map(|i| {
                Particle::new(
                    Vec2::new(self.positions_x_in[i], self.positions_y_in[i]),
                    Vec2::new(self.velocities_x_in[i], self.velocities_y_in[i]),
                    self.types[i],
                )
            })
            .collect()
    }
}

fn check_particle(idx: usize, p: &Particle, params: &SimParams) -> Result<()> {
    if !p.position.is_finite() || !p.velocity.is_finite() {
        anyhow::bail!("Particle {} has a non-finite position or velocity.", idx);
    }
    let inside_x = p.position.x >= 0.0 && p.position.x < params.domain_width;
    let inside_y = p.position.y >= 0.0 && p.position.y < params.domain_height;
    if !inside_x || !inside_y {
        anyhow::bail!(
            "Particle {} at ({}, {}) lies outside the {} x {} domain.",
            idx,
            p.position.x,
            p.position.y,
            params.domain_width,
            params.domain_height
        );
    }
    Ok(())
}
