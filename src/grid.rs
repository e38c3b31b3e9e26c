use anyhow::Result;
use log::trace;
use particle_life_common::{NeighborScan, SimParams, Vec2};
use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};

/// Cell coordinates of a position, clamped onto the grid.
///
/// Positions are expected in `[0, width) x [0, height)`; the last partial
/// row/column of a domain that is not a whole multiple of the cell size is
/// folded into the last full cell.
#[inline(always)]
pub fn get_grid_cell_coords(pos: Vec2, params: &SimParams) -> (u32, u32) {
    // Float-to-int casts saturate, so negative or NaN inputs land in cell 0.
    let grid_x = (pos.x * params.inv_grid_cell_size).floor() as u32;
    let grid_y = (pos.y * params.inv_grid_cell_size).floor() as u32;
    (grid_x.min(params.grid_dim_x - 1), grid_y.min(params.grid_dim_y - 1))
}

/// Calculates the 1D grid cell index for a given position.
#[inline(always)]
pub fn get_grid_cell_idx(pos: Vec2, params: &SimParams) -> u32 {
    let (grid_x, grid_y) = get_grid_cell_coords(pos, params);
    grid_y * params.grid_dim_x + grid_x
}

/// Cells of the 3x3 block centred on `(center_x, center_y)`, per the scan mode.
///
/// Returns the cell indices and how many of them are valid. In wrapped mode a
/// grid narrower than three cells would revisit cells, so duplicates are dropped.
#[inline(always)]
pub fn neighbor_cells(center_x: u32, center_y: u32, params: &SimParams) -> ([u32; 9], usize) {
    let mut cells = [0u32; 9];
    let mut len = 0;
    let dim_x = params.grid_dim_x as i32;
    let dim_y = params.grid_dim_y as i32;

    for dy in -1..=1 {
        for dx in -1..=1 {
            let mut check_x = center_x as i32 + dx;
            let mut check_y = center_y as i32 + dy;
            match params.neighbor_scan {
                NeighborScan::Clipped => {
                    if check_x < 0 || check_x >= dim_x || check_y < 0 || check_y >= dim_y {
                        continue;
                    }
                }
                NeighborScan::Wrapped => {
                    check_x = check_x.rem_euclid(dim_x);
                    check_y = check_y.rem_euclid(dim_y);
                }
            }
            let grid_idx = check_y as u32 * params.grid_dim_x + check_x as u32;
            if !cells[..len].contains(&grid_idx) {
                cells[len] = grid_idx;
                len += 1;
            }
        }
    }
    (cells, len)
}

/// Uniform bucket-sort grid, rebuilt from scratch every step.
#[derive(Debug)]
pub struct SpatialGrid {
    /// Grid cell index for each particle.
    pub particle_grid_indices: Vec<u32>,
    /// Number of particles in each grid cell.
    pub cell_counts: Vec<u32>,
    /// Start index in `cell_particle_indices` for each grid cell (exclusive prefix sum).
    pub cell_starts: Vec<u32>,
    /// Particle indices grouped by cell.
    pub cell_particle_indices: Vec<u32>,
    /// Per-cell write cursors for the parallel scatter.
    atomic_cell_write_offsets: Vec<AtomicU32>,
}

impl SpatialGrid {
    pub fn new(params: &SimParams) -> Self {
        let num_grid_cells = params.num_grid_cells as usize;
        Self {
            particle_grid_indices: Vec::new(),
            cell_counts: vec![0; num_grid_cells],
            cell_starts: vec![0; num_grid_cells],
            cell_particle_indices: Vec::new(),
            atomic_cell_write_offsets: (0..num_grid_cells).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    /// Number of particles indexed by the last build.
    pub fn num_particles(&self) -> usize {
        self.cell_particle_indices.len()
    }

    /// Particle indices stored in `grid_idx`.
    #[inline(always)]
    pub fn cell(&self, grid_idx: u32) -> &[u32] {
        let start = self.cell_starts[grid_idx as usize] as usize;
        let count = self.cell_counts[grid_idx as usize] as usize;
        &self.cell_particle_indices[start..start + count]
    }

    /// Single-threaded build. Indices inside each cell are in ascending order,
    /// which fixes the neighbor summation order.
    pub fn build_serial(&mut self, positions_x: &[f32], positions_y: &[f32], params: &SimParams) -> Result<()> {
        let num_particles = self.prepare(positions_x, positions_y, params)?;

        for (idx, grid_idx_out) in self.particle_grid_indices.iter_mut().enumerate() {
            *grid_idx_out = get_grid_cell_idx(Vec2::new(positions_x[idx], positions_y[idx]), params);
        }
        self.count_and_scan(num_particles)?;

        // Scatter using the atomic cursors as plain counters.
        for (particle_idx, &grid_idx) in self.particle_grid_indices.iter().enumerate() {
            let slot = self.atomic_cell_write_offsets[grid_idx as usize].get_mut();
            let write_idx = (self.cell_starts[grid_idx as usize] + *slot) as usize;
            *slot += 1;
            self.cell_particle_indices[write_idx] = particle_idx as u32;
        }
        Ok(())
    }

    /// Parallel build. Order inside a cell depends on thread scheduling.
    pub fn build_parallel(&mut self, positions_x: &[f32], positions_y: &[f32], params: &SimParams) -> Result<()> {
        let num_particles = self.prepare(positions_x, positions_y, params)?;

        // Phase 1: Assign grid indices to each particle (Parallel).
        self.particle_grid_indices
            .par_iter_mut()
            .enumerate()
            .for_each(|(idx, grid_idx_out)| {
                let pos = Vec2::new(positions_x[idx], positions_y[idx]);
                *grid_idx_out = get_grid_cell_idx(pos, params);
            });

        // Phases 2 + 3: count and prefix sum (Serial).
        self.count_and_scan(num_particles)?;

        // Phase 4: write slots claimed atomically (Parallel), then written serially.
        let particle_grid_indices_slice = &self.particle_grid_indices;
        let cell_starts_slice = &self.cell_starts;
        let atomic_offsets_slice = &self.atomic_cell_write_offsets;
        let write_data: Vec<(usize, u32)> = (0..num_particles)
            .into_par_iter()
            .map(|particle_idx| {
                let grid_idx = particle_grid_indices_slice[particle_idx] as usize;
                let write_offset_in_cell = atomic_offsets_slice[grid_idx].fetch_add(1, Ordering::Relaxed);
                ((cell_starts_slice[grid_idx] + write_offset_in_cell) as usize, particle_idx as u32)
            })
            .collect();

        for (final_write_idx, particle_idx) in write_data {
            self.cell_particle_indices[final_write_idx] = particle_idx;
        }
        Ok(())
    }

    /// Resizes per-particle buffers and resets per-cell state.
    fn prepare(&mut self, positions_x: &[f32], positions_y: &[f32], params: &SimParams) -> Result<usize> {
        if positions_x.len() != positions_y.len() {
            anyhow::bail!(
                "Position buffer length mismatch in grid build ({} x vs {} y).",
                positions_x.len(),
                positions_y.len()
            );
        }
        let num_grid_cells = params.num_grid_cells as usize;
        if self.cell_counts.len() != num_grid_cells {
            // Grid geometry changed through reconfiguration.
            *self = Self::new(params);
        }
        let num_particles = positions_x.len();
        if u32::try_from(num_particles).is_err() {
            anyhow::bail!("Particle count {} exceeds the grid index range.", num_particles);
        }
        self.particle_grid_indices.resize(num_particles, 0);
        self.cell_particle_indices.resize(num_particles, 0);
        self.cell_counts.iter_mut().for_each(|c| *c = 0);
        self.atomic_cell_write_offsets.iter_mut().for_each(|a| *a.get_mut() = 0);
        Ok(num_particles)
    }

    /// Counts particles per cell and computes cell start indices.
    fn count_and_scan(&mut self, num_particles: usize) -> Result<()> {
        for &grid_idx in &self.particle_grid_indices {
            self.cell_counts[grid_idx as usize] += 1;
        }

        let mut total_sum = 0u32;
        for (start, &count) in self.cell_starts.iter_mut().zip(self.cell_counts.iter()) {
            *start = total_sum;
            total_sum += count;
        }
        if total_sum as usize != num_particles {
            anyhow::bail!(
                "Grid build prefix sum total ({}) does not match particle count ({}).",
                total_sum,
                num_particles
            );
        }
        trace!("Grid rebuilt: {} particles in {} cells.", num_particles, self.cell_counts.len());
        Ok(())
    }
}

/// Calls `f` for every particle found in the 3x3 cell block around `pos`, except `particle_idx` itself.
///
/// No distance filtering happens here; callers apply their own metric.
#[inline(always)]
pub fn for_each_candidate<F>(particle_idx: u32, pos: Vec2, params: &SimParams, grid: &SpatialGrid, mut f: F)
where
    F: FnMut(u32),
{
    let (center_x, center_y) = get_grid_cell_coords(pos, params);
    let (cells, len) = neighbor_cells(center_x, center_y, params);
    for &grid_idx in &cells[..len] {
        for &neighbor_idx in grid.cell(grid_idx) {
            // Don't compare particle to itself
            if neighbor_idx == particle_idx {
                continue;
            }
            f(neighbor_idx);
        }
    }
}
