use crate::cpu_state::{CpuState, Particle};
use crate::force::ForceModel;
use crate::grid::SpatialGrid;
use crate::integrator::integrate;
use crate::neighbor::{accumulate_forces, count_neighbors, ParticleView};
use crate::setup::{build_force_model, place_initial_particles};
use anyhow::Result;
use log::{debug, info, trace, warn};
use particle_life_common::{ExecutionMode, ParticleSample, SimParams, SimulationConfig, Snapshot, Vec2};
use rand::prelude::*;
use rayon::prelude::*;

/// Manages the state and execution of the particle simulation on the CPU.
pub struct CpuSimulation {
    /// The simulation configuration, including initial conditions and parameters.
    pub config: SimulationConfig,
    /// The simulation state stored in CPU memory (vectors).
    pub state: CpuState,
    /// Affinity table and radius scaling, read-only while stepping.
    model: ForceModel,
    mode: ExecutionMode,
    /// The number of completed steps.
    pub current_time_step: u32,
    /// Stores collected simulation data snapshots at record intervals.
    recorded_snapshots: Vec<Snapshot>,
}

impl CpuSimulation {
    /// Creates a new `CpuSimulation` from configuration, placing the initial population randomly.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.initial_conditions.placement_seed);
        let particles = place_initial_particles(&config, &mut rng)?;
        let model = build_force_model(&config)?;
        Self::from_particles(config, model, &particles)
    }

    /// Creates a simulation from an explicit particle buffer and force model.
    pub fn from_particles(config: SimulationConfig, model: ForceModel, particles: &[Particle]) -> Result<Self> {
        config.validate()?;
        let params = config.get_sim_params();
        model.check_params(&params)?;

        let state = CpuState::new(particles, params)?;
        let mode = config.execution.mode;
        let sim = Self {
            config,
            state,
            model,
            mode,
            current_time_step: 0,
            recorded_snapshots: Vec::new(),
        };
        sim.warn_unknown_types();
        info!(
            "Simulation ready: {} particles, {} types, {}x{} grid ({:?} scan, {:?} execution).",
            sim.state.num_particles,
            sim.params().num_types,
            sim.params().grid_dim_x,
            sim.params().grid_dim_y,
            sim.params().neighbor_scan,
            sim.mode
        );
        if sim.params().radius_ratio > 0.0 && sim.model.radius_by_type().iter().any(|&r| r > 0.0) {
            debug!("Effective radii exceed the grid cell size; the 3x3 scan only covers one cell around each particle.");
        }
        Ok(sim)
    }

    /// Advances the simulation by one time step.
    ///
    /// The grid is rebuilt from the committed positions, then every particle is
    /// queried against that frozen snapshot and written to the output buffers.
    /// The buffers swap only after the whole phase has finished.
    pub fn step(&mut self) -> Result<()> {
        // --- 1. Build Spatial Grid (barrier: completes before any query) ---
        self.build_grid()?;

        // --- 2. Query + Integrate into the _out buffers ---
        match self.mode {
            ExecutionMode::Parallel => self.update_physics_parallel(),
            ExecutionMode::Serial => self.update_physics_serial(),
        }

        // --- 3. Swap Buffers: Output becomes Input for next step ---
        self.state.swap_buffers();

        self.current_time_step += 1;
        trace!("Step {} committed.", self.current_time_step);
        Ok(())
    }

    fn build_grid(&mut self) -> Result<()> {
        let state = &mut self.state;
        match self.mode {
            ExecutionMode::Parallel => state.grid.build_parallel(&state.positions_x_in, &state.positions_y_in, &state.params),
            ExecutionMode::Serial => state.grid.build_serial(&state.positions_x_in, &state.positions_y_in, &state.params),
        }
    }

    /// One task per particle; reads only the _in buffers.
    fn update_physics_parallel(&mut self) {
        let num_particles = self.state.num_particles as usize;
        let model = &self.model;
        let state = &mut self.state;
        let view = ParticleView {
            positions_x: &state.positions_x_in,
            positions_y: &state.positions_y_in,
            types: &state.types,
        };
        let vel_x_in = &state.velocities_x_in;
        let vel_y_in = &state.velocities_y_in;
        let params = &state.params;
        let grid = &state.grid;

        state.positions_x_out[..num_particles]
            .par_iter_mut()
            .zip(state.positions_y_out[..num_particles].par_iter_mut())
            .zip(state.velocities_x_out[..num_particles].par_iter_mut())
            .zip(state.velocities_y_out[..num_particles].par_iter_mut())
            .enumerate()
            .for_each(|(idx, (((pos_x_out, pos_y_out), vel_x_out), vel_y_out))| {
                let velocity = Vec2::new(vel_x_in[idx], vel_y_in[idx]);
                let (pos, vel) = advance_particle(idx as u32, velocity, &view, params, model, grid);
                *pos_x_out = pos.x;
                *pos_y_out = pos.y;
                *vel_x_out = vel.x;
                *vel_y_out = vel.y;
            });
    }

    /// Reference path with a fixed summation order.
    fn update_physics_serial(&mut self) {
        let num_particles = self.state.num_particles as usize;
        let model = &self.model;
        let state = &mut self.state;
        let view = ParticleView {
            positions_x: &state.positions_x_in,
            positions_y: &state.positions_y_in,
            types: &state.types,
        };

        for idx in 0..num_particles {
            let velocity = Vec2::new(state.velocities_x_in[idx], state.velocities_y_in[idx]);
            let (pos, vel) = advance_particle(idx as u32, velocity, &view, &state.params, model, &state.grid);
            state.positions_x_out[idx] = pos.x;
            state.positions_y_out[idx] = pos.y;
            state.velocities_x_out[idx] = vel.x;
            state.velocities_y_out[idx] = vel.y;
        }
    }

    /// Replaces the particle buffer between steps (explicit reconfiguration).
    pub fn set_particles(&mut self, particles: &[Particle]) -> Result<()> {
        self.state.set_particles(particles)?;
        self.warn_unknown_types();
        Ok(())
    }

    /// Copies out the committed particle state.
    pub fn particles(&self) -> Vec<Particle> {
        self.state.particles()
    }

    /// Returns the current number of active particles in the simulation.
    pub fn current_particle_count(&self) -> u32 {
        self.state.num_particles
    }

    /// Provides access to the simulation parameters.
    pub fn params(&self) -> &SimParams {
        &self.state.params
    }

    /// Provides access to the simulation configuration.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Number of particles whose type has no entry in the force table.
    pub fn unknown_type_count(&self) -> usize {
        self.state.types.iter().filter(|&&t| !self.model.is_known_type(t)).count()
    }

    fn warn_unknown_types(&self) {
        let unknown = self.unknown_type_count();
        if unknown > 0 {
            warn!(
                "{} particles have a type >= num_types ({}); they neither feel nor exert forces.",
                unknown,
                self.params().num_types
            );
        }
    }

    /// Calculates the number of neighbors within the effective radius for each particle in parallel.
    /// Rebuilds the grid so the counts reflect the committed positions.
    pub fn calculate_neighbor_counts_parallel(&mut self) -> Result<Vec<u32>> {
        let state = &mut self.state;
        state.grid.build_serial(&state.positions_x_in, &state.positions_y_in, &state.params)?;

        let view = state.view();
        let params = &state.params;
        let model = &self.model;
        Ok((0..state.num_particles)
            .into_par_iter()
            .map(|idx| count_neighbors(idx, &view, params, model, &state.grid))
            .collect())
    }

    /// Collects metrics for the committed state.
    pub fn take_snapshot(&mut self) -> Result<Snapshot> {
        let num_particles = self.state.num_particles as usize;
        let num_types = self.params().num_types;
        let particle_neighbor_counts = self.calculate_neighbor_counts_parallel()?;

        // Bins run up to the largest count seen, capped at twice the expected density.
        let density_cap = (f64::from(self.params().max_expected_neighbors).ceil() * 2.0).max(1.0);
        let max_seen = particle_neighbor_counts.iter().copied().max().unwrap_or(0);
        let last_bin = f64::from(max_seen).min(density_cap) as usize;
        let bins = last_bin + 1;
        let mut neighbor_counts_distribution = vec![0u32; bins];
        let mut overflow = 0;
        let mut total_neighbors = 0u64;
        for &count in &particle_neighbor_counts {
            total_neighbors += count as u64;
            let bin = (count as usize).min(bins - 1);
            if bin != count as usize {
                overflow += 1;
            }
            neighbor_counts_distribution[bin] += 1;
        }
        if overflow > 0 {
            debug!("{} particles exceed {} neighbors; counted in the last bin.", overflow, bins - 1);
        }

        let mut type_counts = vec![0u32; num_types as usize + 1];
        for &t in &self.state.types {
            type_counts[(t as usize).min(num_types as usize)] += 1;
        }

        let speed_sum: f32 = self.state.velocities_x_in[..num_particles]
            .iter()
            .zip(self.state.velocities_y_in[..num_particles].iter())
            .map(|(&vx, &vy)| Vec2::new(vx, vy).length())
            .sum();
        let (mean_speed, mean_neighbor_count) = if num_particles > 0 {
            (speed_sum / num_particles as f32, total_neighbors as f32 / num_particles as f32)
        } else {
            (0.0, 0.0)
        };

        let positions = if self.config.output.save_positions_in_snapshot {
            Some(
                (0..num_particles)
                    .map(|i| ParticleSample {
                        x: self.state.positions_x_in[i],
                        y: self.state.positions_y_in[i],
                        ptype: self.state.types[i],
                    })
                    .collect(),
            )
        } else {
            None
        };

        Ok(Snapshot {
            step: self.current_time_step,
            time: self.current_time_step as f32 * self.params().time_step,
            domain_width: self.params().domain_width,
            domain_height: self.params().domain_height,
            num_types,
            total_particle_count: num_particles as u32,
            type_counts,
            mean_speed,
            mean_neighbor_count,
            neighbor_counts_distribution,
            positions,
        })
    }

    /// Collects metrics and stores them as a Snapshot.
    pub fn record_snapshot(&mut self) -> Result<()> {
        let snapshot = self.take_snapshot()?;
        debug!(
            "Snapshot at step {}: mean speed {:.4}, mean neighbors {:.2}",
            snapshot.step, snapshot.mean_speed, snapshot.mean_neighbor_count
        );
        self.recorded_snapshots.push(snapshot);
        Ok(())
    }

    /// Provides access to the recorded snapshots.
    pub fn get_recorded_snapshots(&self) -> &[Snapshot] {
        &self.recorded_snapshots
    }
}

/// Query + integrate for one particle against the frozen snapshot.
#[inline(always)]
fn advance_particle(
    idx: u32,
    velocity: Vec2,
    view: &ParticleView<'_>,
    params: &SimParams,
    model: &ForceModel,
    grid: &SpatialGrid,
) -> (Vec2, Vec2) {
    let interaction = accumulate_forces(idx, view, params, model, grid);
    integrate(view.position(idx), velocity, interaction, params)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[universe]
width = 400.0
height = 300.0

[timing]
time_step = 0.05
total_steps = 20
record_interval_steps = 5

[initial_conditions]
num_particles = 600
placement_seed = 21
initial_speed_stddev = 1.0

[forces]
num_types = 4
base_radius = 25.0
radius_ratio = 0.0
force_seed = 4

[output]
base_filename = "test"
save_final_state = false
save_snapshots = true
save_positions_in_snapshot = true
"#;

    fn sim(mode: ExecutionMode) -> CpuSimulation {
        let mut config = SimulationConfig::from_toml_str(CONFIG).unwrap();
        config.execution.mode = mode;
        CpuSimulation::new(config).unwrap()
    }

    #[test]
    fn serial_runs_are_bit_identical() {
        let mut a = sim(ExecutionMode::Serial);
        let mut b = sim(ExecutionMode::Serial);
        for _ in 0..15 {
            a.step().unwrap();
            b.step().unwrap();
            assert_eq!(a.particles(), b.particles());
        }
    }

    #[test]
    fn parallel_agrees_with_serial_within_epsilon() {
        let mut serial = sim(ExecutionMode::Serial);
        let mut parallel = sim(ExecutionMode::Parallel);
        for _ in 0..5 {
            serial.step().unwrap();
            parallel.step().unwrap();
        }
        let w = serial.params().domain_width;
        let h = serial.params().domain_height;
        for (s, p) in serial.particles().iter().zip(parallel.particles().iter()) {
            let d = particle_life_common::toroidal_delta(s.position, p.position, w, h);
            assert!(d.length() < 1e-3, "positions diverged: {:?} vs {:?}", s, p);
            assert!((s.velocity - p.velocity).length() < 1e-3);
            assert_eq!(s.ptype, p.ptype);
        }
    }

    #[test]
    fn positions_stay_in_domain() {
        let mut s = sim(ExecutionMode::Parallel);
        for _ in 0..20 {
            s.step().unwrap();
        }
        assert_eq!(s.current_time_step, 20);
        for p in s.particles() {
            assert!((0.0..400.0).contains(&p.position.x), "{:?}", p);
            assert!((0.0..300.0).contains(&p.position.y), "{:?}", p);
        }
    }

    #[test]
    fn snapshot_accounts_for_every_particle() {
        let mut s = sim(ExecutionMode::Serial);
        s.step().unwrap();
        s.record_snapshot().unwrap();
        let snap = &s.get_recorded_snapshots()[0];
        assert_eq!(snap.step, 1);
        assert_eq!(snap.total_particle_count, 600);
        assert_eq!(snap.type_counts.iter().sum::<u32>(), 600);
        assert_eq!(snap.type_counts[4], 0);
        assert_eq!(snap.neighbor_counts_distribution.iter().sum::<u32>(), 600);
        assert_eq!(snap.positions.as_ref().map(|p| p.len()), Some(600));
        assert!((snap.time - 0.05).abs() < 1e-6);
    }

    #[test]
    fn rejects_model_with_wrong_type_count() {
        let config = SimulationConfig::from_toml_str(CONFIG).unwrap();
        let params = config.get_sim_params();
        let mut other = params.clone();
        other.num_types = 2;
        let model = ForceModel::new(vec![1.0; 4], vec![0.0; 2], &other).unwrap();
        assert!(CpuSimulation::from_particles(config, model, &[]).is_err());
    }

    #[test]
    fn rejects_model_built_for_another_radius() {
        let config = SimulationConfig::from_toml_str(CONFIG).unwrap();
        let mut other = config.get_sim_params();
        other.base_radius = 50.0;
        let model = ForceModel::new(vec![1.0; 16], vec![0.0; 4], &other).unwrap();
        let err = CpuSimulation::from_particles(config, model, &[]).err().unwrap();
        assert!(err.to_string().contains("base_radius"), "{}", err);
    }

    #[test]
    fn histogram_is_sized_by_observed_counts() {
        let text = CONFIG.replace("force_seed = 4", "force_seed = 4\nmax_expected_neighbors = 1e20");
        let config = SimulationConfig::from_toml_str(&text).unwrap();
        let mut s = CpuSimulation::new(config).unwrap();
        s.step().unwrap();
        let counts = s.calculate_neighbor_counts_parallel().unwrap();
        let max_seen = *counts.iter().max().unwrap() as usize;

        let snap = s.take_snapshot().unwrap();
        assert_eq!(snap.neighbor_counts_distribution.len(), max_seen + 1);
        assert_eq!(snap.neighbor_counts_distribution.iter().sum::<u32>(), 600);
        assert!(snap.neighbor_counts_distribution[max_seen] > 0);
    }

    #[test]
    fn histogram_overflow_lands_in_last_bin() {
        let text = CONFIG.replace("force_seed = 4", "force_seed = 4\nmax_expected_neighbors = 0.5");
        let config = SimulationConfig::from_toml_str(&text).unwrap();
        let mut s = CpuSimulation::new(config).unwrap();
        let snap = s.take_snapshot().unwrap();
        // Cap is 2 * ceil(0.5) = 2, and this population averages far more neighbors.
        assert_eq!(snap.neighbor_counts_distribution.len(), 3);
        assert_eq!(snap.neighbor_counts_distribution.iter().sum::<u32>(), 600);
    }

    #[test]
    fn set_particles_replaces_population_between_steps() {
        let mut s = sim(ExecutionMode::Serial);
        s.step().unwrap();
        let replacement = [
            Particle::new(Vec2::new(100.0, 100.0), Vec2::zero(), 1),
            Particle::new(Vec2::new(110.0, 100.0), Vec2::zero(), 6),
        ];
        s.set_particles(&replacement).unwrap();
        assert_eq!(s.current_particle_count(), 2);
        assert_eq!(s.unknown_type_count(), 1);
        s.step().unwrap();
        assert_eq!(s.particles().len(), 2);

        let outside = [Particle::new(Vec2::new(400.0, 0.0), Vec2::zero(), 0)];
        assert!(s.set_particles(&outside).is_err());
    }

    #[test]
    fn unknown_types_are_counted() {
        let config = SimulationConfig::from_toml_str(CONFIG).unwrap();
        let model = build_force_model(&config).unwrap();
        let particles = [
            Particle::new(Vec2::new(10.0, 10.0), Vec2::zero(), 0),
            Particle::new(Vec2::new(20.0, 10.0), Vec2::zero(), 9),
        ];
        let mut s = CpuSimulation::from_particles(config, model, &particles).unwrap();
        assert_eq!(s.unknown_type_count(), 1);
        let snap = s.take_snapshot().unwrap();
        assert_eq!(snap.type_counts[4], 1);
    }
}
