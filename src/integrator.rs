use crate::neighbor::NeighborSum;
use particle_life_common::{clamp, lerp, wrap_coord, SimParams, Vec2};

/// Force-response multiplier for a neighborhood of `neighbor_count` particles.
///
/// Sparse neighborhoods are boosted up to `lerp(1, 4, balance)`, crowded ones
/// damped down to `lerp(1, 0.01, balance)`. A balance of 0 always yields 1.
#[inline(always)]
pub fn adaptive_multiplier(neighbor_count: u32, params: &SimParams) -> f32 {
    let normalized_density = neighbor_count as f32 / params.max_expected_neighbors;
    let clamped_density = clamp(normalized_density, 0.0, 1.0);

    let min_force_mult = lerp(1.0, 0.01, params.density_balance);
    let max_force_mult = lerp(1.0, 4.0, params.density_balance);
    lerp(max_force_mult, min_force_mult, clamped_density)
}

/// Advances one particle by a single time step and wraps it onto the torus.
///
/// Returns `(position, velocity)` for the next-state buffer.
#[inline(always)]
pub fn integrate(position: Vec2, velocity: Vec2, interaction: NeighborSum, params: &SimParams) -> (Vec2, Vec2) {
    let dt = params.time_step;
    let multiplier = adaptive_multiplier(interaction.count, params);

    let new_velocity = velocity * params.friction + interaction.force * (dt * multiplier);
    let raw_position = position + new_velocity * dt;
    let wrapped = Vec2::new(
        wrap_coord(raw_position.x, params.domain_width),
        wrap_coord(raw_position.y, params.domain_height),
    );
    (wrapped, new_velocity)
}
