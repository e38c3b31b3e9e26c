use serde::{Deserialize, Serialize};
use anyhow::Result;
use log::warn;
use crate::sim_params::{grid_cell_count, grid_dims, NeighborScan, SimParams, MAX_GRID_CELLS};
use std::path::Path;

// Configuration for the periodic domain
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct UniverseConfig {
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub neighbor_scan: NeighborScan,
}

// Configuration for timing
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimingConfig {
    pub time_step: f32,
    pub total_steps: u32,
    #[serde(default = "default_record_interval")]
    pub record_interval_steps: u32,
}

// Initial conditions for the simulation, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct InitialConditions {
    pub num_particles: u32,
    pub placement_seed: u64,
    /// Standard deviation of the Gaussian initial velocity per axis (0 = start at rest).
    #[serde(default)]
    pub initial_speed_stddev: f32,
}

// Interaction parameters, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ForceConfig {
    pub num_types: u32,
    pub base_radius: f32,
    #[serde(default = "default_repulsion")]
    pub repulsion: f32,
    #[serde(default = "default_attraction")]
    pub attraction: f32,
    #[serde(default = "default_decay_sharpness")]
    pub decay_sharpness: f32,
    #[serde(default = "default_density_balance")]
    pub density_balance: f32,
    #[serde(default = "default_friction")]
    pub friction: f32,
    #[serde(default = "default_radius_ratio")]
    pub radius_ratio: f32,
    #[serde(default = "default_force_multiplier")]
    pub force_multiplier: f32,
    #[serde(default = "default_max_expected_neighbors")]
    pub max_expected_neighbors: f32,
    /// Affinity rows indexed `[subject][neighbor]`. Randomized from `force_seed` when absent.
    #[serde(default)]
    pub force_table: Option<Vec<Vec<f32>>>,
    /// Per-type radius scale. Randomized from `force_seed` when absent.
    #[serde(default)]
    pub radius_by_type: Option<Vec<f32>>,
    #[serde(default = "default_force_seed")]
    pub force_seed: u64,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Rayon across particles, atomic scatter during grid build.
    #[default]
    Parallel,
    /// Single-threaded with a fixed summation order; bit-reproducible.
    Serial,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Size of the global rayon pool (None = rayon's default).
    #[serde(default)]
    pub threads: Option<usize>,
}

// Configuration for output settings, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    pub save_final_state: bool,
    pub save_snapshots: bool,
    pub save_positions_in_snapshot: bool,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
    #[serde(default)]
    pub save_wire_buffer: bool,
}

fn default_record_interval() -> u32 {
    10
}

fn default_repulsion() -> f32 {
    1.0
}

fn default_attraction() -> f32 {
    0.5
}

fn default_decay_sharpness() -> f32 {
    4.0
}

fn default_density_balance() -> f32 {
    0.5
}

fn default_friction() -> f32 {
    0.9
}

fn default_radius_ratio() -> f32 {
    0.0
}

fn default_force_multiplier() -> f32 {
    10.0
}

fn default_max_expected_neighbors() -> f32 {
    20.0
}

fn default_force_seed() -> u64 {
    1
}

// Main simulation configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    pub universe: UniverseConfig,
    pub timing: TimingConfig,
    pub initial_conditions: InitialConditions,
    pub forces: ForceConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    pub output: OutputConfig,
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: SimulationConfig = toml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the kernel cannot step.
    ///
    /// `friction` and `density_balance` outside [0, 1] are allowed: they only
    /// produce amplifying dynamics, so they are logged rather than refused.
    pub fn validate(&self) -> Result<()> {
        let u = &self.universe;
        let f = &self.forces;

        if !(u.width.is_finite() && u.width > 0.0) || !(u.height.is_finite() && u.height > 0.0) {
            anyhow::bail!("universe width and height must be positive (got {} x {}).", u.width, u.height);
        }
        if !(self.timing.time_step.is_finite() && self.timing.time_step > 0.0) {
            anyhow::bail!("time_step must be positive (got {}).", self.timing.time_step);
        }
        if f.num_types == 0 {
            anyhow::bail!("num_types must be greater than 0.");
        }
        if !(f.base_radius.is_finite() && f.base_radius > 0.0) {
            anyhow::bail!("base_radius must be positive (got {}).", f.base_radius);
        }
        if grid_cell_count(u.width, u.height, f.base_radius).is_none() {
            let (dim_x, dim_y) = grid_dims(u.width, u.height, f.base_radius);
            anyhow::bail!(
                "base_radius {} over a {} x {} universe (width x height) gives a {} x {} grid, more than {} cells.",
                f.base_radius,
                u.width,
                u.height,
                dim_x,
                dim_y,
                MAX_GRID_CELLS
            );
        }
        if !(f.max_expected_neighbors.is_finite() && f.max_expected_neighbors > 0.0) {
            anyhow::bail!("max_expected_neighbors must be positive (got {}).", f.max_expected_neighbors);
        }
        let scalars = [
            ("repulsion", f.repulsion),
            ("attraction", f.attraction),
            ("decay_sharpness", f.decay_sharpness),
            ("density_balance", f.density_balance),
            ("friction", f.friction),
            ("radius_ratio", f.radius_ratio),
            ("force_multiplier", f.force_multiplier),
        ];
        for (name, value) in scalars {
            if !value.is_finite() {
                anyhow::bail!("{} must be finite (got {}).", name, value);
            }
        }
        if let Some(rows) = &f.force_table {
            if rows.len() != f.num_types as usize {
                anyhow::bail!(
                    "force_table has {} rows, expected num_types = {}.",
                    rows.len(),
                    f.num_types
                );
            }
            for (i, row) in rows.iter().enumerate() {
                if row.len() != f.num_types as usize {
                    anyhow::bail!(
                        "force_table row {} has {} entries, expected {}.",
                        i,
                        row.len(),
                        f.num_types
                    );
                }
            }
        }
        if let Some(radii) = &f.radius_by_type {
            if radii.len() != f.num_types as usize {
                anyhow::bail!(
                    "radius_by_type has {} entries, expected num_types = {}.",
                    radii.len(),
                    f.num_types
                );
            }
            if radii.iter().any(|r| !r.is_finite() || *r < 0.0) {
                anyhow::bail!("radius_by_type entries must be finite and non-negative.");
            }
        }
        if self.timing.record_interval_steps == 0 {
            anyhow::bail!("record_interval_steps must be greater than 0.");
        }

        if !(0.0..=1.0).contains(&f.friction) {
            warn!("friction {} is outside [0, 1]; velocities will not decay as expected.", f.friction);
        }
        if !(0.0..=1.0).contains(&f.density_balance) {
            warn!("density_balance {} is outside [0, 1]; adaptive damping may amplify forces.", f.density_balance);
        }
        Ok(())
    }

    /// Converts the configuration into simulation parameters used at runtime.
    pub fn get_sim_params(&self) -> SimParams {
        let f = &self.forces;
        SimParams::new(
            self.universe.width,
            self.universe.height,
            self.universe.neighbor_scan,
            self.timing.time_step,
            f.num_types,
            f.base_radius,
            f.radius_ratio,
            f.repulsion,
            f.attraction,
            f.decay_sharpness,
            f.force_multiplier,
            f.friction,
            f.density_balance,
            f.max_expected_neighbors,
        )
    }

    /// Row-major `[subject * num_types + neighbor]` affinity table, if configured.
    pub fn flat_force_table(&self) -> Option<Vec<f32>> {
        self.forces
            .force_table
            .as_ref()
            .map(|rows| rows.iter().flat_map(|row| row.iter().copied()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
[universe]
width = 800.0
height = 600.0

[timing]
time_step = 0.1
total_steps = 100

[initial_conditions]
num_particles = 500
placement_seed = 7

[forces]
num_types = 2
base_radius = 20.0
force_table = [[1.0, -0.5], [0.25, 1.0]]

[output]
base_filename = "run"
save_final_state = true
save_snapshots = false
save_positions_in_snapshot = false
"#;

    #[test]
    fn parses_with_defaults() {
        let config = SimulationConfig::from_toml_str(BASE).unwrap();
        assert_eq!(config.universe.neighbor_scan, NeighborScan::Clipped);
        assert_eq!(config.execution.mode, ExecutionMode::Parallel);
        assert_eq!(config.timing.record_interval_steps, 10);
        assert_eq!(config.flat_force_table().unwrap(), vec![1.0, -0.5, 0.25, 1.0]);

        let params = config.get_sim_params();
        assert_eq!(params.grid_dim_x, 40);
        assert_eq!(params.grid_dim_y, 30);
        assert_eq!(params.num_types, 2);
    }

    #[test]
    fn parses_modes() {
        let text = BASE.replace("height = 600.0", "height = 600.0\nneighbor_scan = \"wrapped\"")
            + "\n[execution]\nmode = \"serial\"\n";
        let config = SimulationConfig::from_toml_str(&text).unwrap();
        assert_eq!(config.universe.neighbor_scan, NeighborScan::Wrapped);
        assert_eq!(config.execution.mode, ExecutionMode::Serial);
    }

    #[test]
    fn rejects_force_table_dimension_mismatch() {
        let text = BASE.replace("[[1.0, -0.5], [0.25, 1.0]]", "[[1.0, -0.5]]");
        let err = SimulationConfig::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("force_table"), "{}", err);

        let text = BASE.replace("[[1.0, -0.5], [0.25, 1.0]]", "[[1.0], [0.25, 1.0]]");
        assert!(SimulationConfig::from_toml_str(&text).is_err());
    }

    #[test]
    fn rejects_radius_length_mismatch() {
        let text = BASE.replace("base_radius = 20.0", "base_radius = 20.0\nradius_by_type = [0.5]");
        let err = SimulationConfig::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("radius_by_type"), "{}", err);
    }

    #[test]
    fn rejects_non_positive_scalars() {
        for (from, to) in [
            ("width = 800.0", "width = 0.0"),
            ("height = 600.0", "height = -5.0"),
            ("time_step = 0.1", "time_step = 0.0"),
            ("num_types = 2", "num_types = 0"),
            ("base_radius = 20.0", "base_radius = 0.0"),
            ("base_radius = 20.0", "base_radius = 20.0\nmax_expected_neighbors = 0.0"),
        ] {
            let text = BASE.replace(from, to);
            assert!(SimulationConfig::from_toml_str(&text).is_err(), "accepted {}", to);
        }
    }

    #[test]
    fn rejects_grid_too_large_to_index() {
        let text = BASE
            .replace("width = 800.0", "width = 100000.0")
            .replace("height = 600.0", "height = 100000.0")
            .replace("base_radius = 20.0", "base_radius = 1.0");
        let err = SimulationConfig::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("base_radius"), "{}", err);
        assert!(err.to_string().contains("width x height"), "{}", err);
    }

    #[test]
    fn permits_out_of_range_friction_and_balance() {
        let text = BASE.replace(
            "base_radius = 20.0",
            "base_radius = 20.0\nfriction = 1.2\ndensity_balance = -0.5",
        );
        let config = SimulationConfig::from_toml_str(&text).unwrap();
        assert_eq!(config.forces.friction, 1.2);
        assert_eq!(config.forces.density_balance, -0.5);
    }
}
