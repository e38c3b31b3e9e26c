use serde::{Deserialize, Serialize};

/// How the 3x3 neighbor cell scan treats cells beyond the grid edge.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NeighborScan {
    /// Out-of-grid cells are skipped. Pairs that are close only through the
    /// periodic boundary are missed when their cells lie on opposite edges.
    #[default]
    Clipped,
    /// Cell coordinates wrap around, matching the toroidal distance metric.
    Wrapped,
}

/// Simulation parameters derived from the configuration, used frequently during simulation steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    // World & Grid
    pub domain_width: f32,
    pub domain_height: f32,
    pub grid_cell_size: f32,
    pub inv_grid_cell_size: f32,
    pub grid_dim_x: u32,
    pub grid_dim_y: u32,
    pub num_grid_cells: u32,
    pub neighbor_scan: NeighborScan,

    // Time
    pub time_step: f32,

    // Interaction
    pub num_types: u32,
    pub base_radius: f32,
    pub radius_ratio: f32,
    pub repulsion: f32,
    pub attraction: f32,
    pub decay_sharpness: f32, // k in the repulsion falloff
    pub force_multiplier: f32,

    // Damping
    pub friction: f32,
    pub density_balance: f32,
    pub max_expected_neighbors: f32,
}

/// Upper bound on the number of grid cells (per-cell arrays stay addressable with `u32`).
pub const MAX_GRID_CELLS: u64 = 1 << 26;

/// Grid dimensions `(x, y)` for a domain tiled with square cells, at least one per axis.
#[inline]
pub fn grid_dims(domain_width: f32, domain_height: f32, cell_size: f32) -> (u32, u32) {
    let inv = if cell_size > 1e-9 { 1.0 / cell_size } else { 0.0 };
    let dim_x = ((domain_width * inv).floor() as u32).max(1);
    let dim_y = ((domain_height * inv).floor() as u32).max(1);
    (dim_x, dim_y)
}

/// Total cell count of the grid, or `None` when it exceeds [`MAX_GRID_CELLS`].
pub fn grid_cell_count(domain_width: f32, domain_height: f32, cell_size: f32) -> Option<u32> {
    let (dim_x, dim_y) = grid_dims(domain_width, domain_height, cell_size);
    u64::from(dim_x)
        .checked_mul(u64::from(dim_y))
        .filter(|&cells| cells <= MAX_GRID_CELLS)
        .map(|cells| cells as u32)
}

impl SimParams {
    /// Builds the runtime parameters, deriving the uniform grid from `base_radius`.
    ///
    /// The grid always has at least one cell per axis. Configurations whose grid
    /// exceeds [`MAX_GRID_CELLS`] are refused by `SimulationConfig::validate`; when
    /// called directly with such values each axis is clamped so indices stay in bounds.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        domain_width: f32,
        domain_height: f32,
        neighbor_scan: NeighborScan,
        time_step: f32,
        num_types: u32,
        base_radius: f32,
        radius_ratio: f32,
        repulsion: f32,
        attraction: f32,
        decay_sharpness: f32,
        force_multiplier: f32,
        friction: f32,
        density_balance: f32,
        max_expected_neighbors: f32,
    ) -> Self {
        let grid_cell_size = base_radius;
        let inv_grid_cell_size = if grid_cell_size > 1e-9 { 1.0 / grid_cell_size } else { 0.0 };
        let (mut grid_dim_x, mut grid_dim_y) = grid_dims(domain_width, domain_height, grid_cell_size);
        if grid_cell_count(domain_width, domain_height, grid_cell_size).is_none() {
            let max_axis = (MAX_GRID_CELLS as f64).sqrt() as u32;
            grid_dim_x = grid_dim_x.min(max_axis);
            grid_dim_y = grid_dim_y.min(max_axis);
        }

        SimParams {
            domain_width,
            domain_height,
            grid_cell_size,
            inv_grid_cell_size,
            grid_dim_x,
            grid_dim_y,
            num_grid_cells: grid_dim_x * grid_dim_y,
            neighbor_scan,
            time_step,
            num_types,
            base_radius,
            radius_ratio,
            repulsion,
            attraction,
            decay_sharpness,
            force_multiplier,
            friction,
            density_balance,
            max_expected_neighbors,
        }
    }
}
