use crate::cpu_state::Particle;
use crate::force::ForceModel;
use anyhow::Result;
use log::{debug, info};
use particle_life_common::{SimulationConfig, Vec2};
use rand::distr::Uniform;
use rand::prelude::*;
use rand_distr::Normal;

/// Scatters the initial population uniformly over the domain with random types.
///
/// Velocities start at rest unless `initial_speed_stddev` asks for Gaussian jitter.
pub fn place_initial_particles(config: &SimulationConfig, rng: &mut StdRng) -> Result<Vec<Particle>> {
    let count = config.initial_conditions.num_particles as usize;
    let num_types = config.forces.num_types;
    let stddev = config.initial_conditions.initial_speed_stddev;

    let dist_x = Uniform::new(0.0f32, config.universe.width)?;
    let dist_y = Uniform::new(0.0f32, config.universe.height)?;
    let dist_type = Uniform::new(0u32, num_types)?;
    let jitter = if stddev > 0.0 { Some(Normal::new(0.0f32, stddev)?) } else { None };

    let particles = (0..count)
        .map(|_| {
            let position = Vec2::new(rng.sample(dist_x), rng.sample(dist_y));
            let ptype = rng.sample(dist_type);
            let velocity = match &jitter {
                Some(normal) => Vec2::new(rng.sample(normal), rng.sample(normal)),
                None => Vec2::zero(),
            };
            Particle::new(position, velocity, ptype)
        })
        .collect();
    Ok(particles)
}

/// Builds the force model from the configured tables, randomizing whichever
/// table is missing from `force_seed`.
pub fn build_force_model(config: &SimulationConfig) -> Result<ForceModel> {
    let params = config.get_sim_params();
    let mut rng = StdRng::seed_from_u64(config.forces.force_seed);
    let random = ForceModel::random(&params, &mut rng)?;

    let affinity = match config.flat_force_table() {
        Some(table) => table,
        None => {
            info!("No force_table configured; using random affinities (seed {}).", config.forces.force_seed);
            random.affinity_table().to_vec()
        }
    };
    let radius_by_type = match &config.forces.radius_by_type {
        Some(radii) => radii.clone(),
        None => {
            debug!("No radius_by_type configured; using random radius scales.");
            random.radius_by_type().to_vec()
        }
    };
    ForceModel::new(affinity, radius_by_type, &params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(extra_forces: &str, jitter: f32) -> SimulationConfig {
        let text = format!(
            r#"
[universe]
width = 300.0
height = 200.0

[timing]
time_step = 0.1
total_steps = 10

[initial_conditions]
num_particles = 400
placement_seed = 9
initial_speed_stddev = {jitter:.1}

[forces]
num_types = 3
base_radius = 25.0
{extra_forces}

[output]
base_filename = "t"
save_final_state = false
save_snapshots = false
save_positions_in_snapshot = false
"#
        );
        SimulationConfig::from_toml_str(&text).unwrap()
    }

    #[test]
    fn placement_stays_in_domain_and_uses_all_types() {
        let cfg = config("", 0.0);
        let mut rng = StdRng::seed_from_u64(cfg.initial_conditions.placement_seed);
        let particles = place_initial_particles(&cfg, &mut rng).unwrap();
        assert_eq!(particles.len(), 400);
        assert!(particles.iter().all(|p| (0.0..300.0).contains(&p.position.x)));
        assert!(particles.iter().all(|p| (0.0..200.0).contains(&p.position.y)));
        assert!(particles.iter().all(|p| p.velocity == Vec2::zero()));
        for t in 0..3 {
            assert!(particles.iter().any(|p| p.ptype == t));
        }
    }

    #[test]
    fn placement_is_seeded_and_jitter_moves_particles() {
        let cfg = config("", 2.0);
        let a = place_initial_particles(&cfg, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = place_initial_particles(&cfg, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(a, b);
        assert!(a.iter().any(|p| p.velocity.length() > 0.0));
    }

    #[test]
    fn configured_tables_win_over_random_ones() {
        let cfg = config(
            "force_table = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, -1.0]]\nradius_by_type = [0.0, 0.5, 1.0]",
            0.0,
        );
        let model = build_force_model(&cfg).unwrap();
        assert_eq!(model.affinity(2, 2), -1.0);
        assert_eq!(model.radius_by_type(), &[0.0, 0.5, 1.0]);

        let random = build_force_model(&config("", 0.0)).unwrap();
        assert_eq!(random.affinity_table().len(), 9);
    }
}
