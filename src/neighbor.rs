use crate::force::ForceModel;
use crate::grid::{for_each_candidate, SpatialGrid};
use particle_life_common::{toroidal_delta, SimParams, Vec2};

/// Read-only view of the particle snapshot shared by every query in a step.
#[derive(Debug, Clone, Copy)]
pub struct ParticleView<'a> {
    pub positions_x: &'a [f32],
    pub positions_y: &'a [f32],
    pub types: &'a [u32],
}

impl<'a> ParticleView<'a> {
    #[inline(always)]
    pub fn position(&self, idx: u32) -> Vec2 {
        Vec2::new(self.positions_x[idx as usize], self.positions_y[idx as usize])
    }

    #[inline(always)]
    pub fn ptype(&self, idx: u32) -> u32 {
        self.types[idx as usize]
    }
}

/// Aggregate interaction of one particle with its neighborhood.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NeighborSum {
    pub force: Vec2,
    pub count: u32,
}

/// Calls `f(neighbor_idx, delta, dist)` for every neighbor of `particle_idx`
/// within its effective radius.
///
/// `delta` points from the particle to the neighbor along the shortest path on
/// the torus. Coincident particles (`dist == 0`) are not neighbors.
#[inline(always)]
pub fn for_each_neighbor<F>(
    particle_idx: u32,
    view: &ParticleView<'_>,
    params: &SimParams,
    model: &ForceModel,
    grid: &SpatialGrid,
    mut f: F,
) where
    F: FnMut(u32, Vec2, f32),
{
    let pos = view.position(particle_idx);
    let effective_radius = model.effective_radius(view.ptype(particle_idx));

    for_each_candidate(particle_idx, pos, params, grid, |neighbor_idx| {
        let delta = toroidal_delta(pos, view.position(neighbor_idx), params.domain_width, params.domain_height);
        let dist = delta.length();
        if dist == 0.0 || dist > effective_radius {
            return;
        }
        f(neighbor_idx, delta, dist);
    });
}

/// Sums the pairwise forces acting on `particle_idx` and counts its neighbors.
///
/// Summation follows the grid's cell order, so a stable grid gives a stable result.
#[inline(always)]
pub fn accumulate_forces(
    particle_idx: u32,
    view: &ParticleView<'_>,
    params: &SimParams,
    model: &ForceModel,
    grid: &SpatialGrid,
) -> NeighborSum {
    let my_type = view.ptype(particle_idx);
    let effective_radius = model.effective_radius(my_type);
    let mut sum = NeighborSum::default();

    for_each_neighbor(particle_idx, view, params, model, grid, |neighbor_idx, delta, dist| {
        sum.count += 1;
        let r = dist / effective_radius;
        let magnitude = model.magnitude(my_type, view.ptype(neighbor_idx), r);
        // Positive magnitude pushes away from the neighbor.
        sum.force += (delta / dist) * -magnitude;
    });
    sum
}

/// Neighbor count of `particle_idx` only.
pub fn count_neighbors(
    particle_idx: u32,
    view: &ParticleView<'_>,
    params: &SimParams,
    model: &ForceModel,
    grid: &SpatialGrid,
) -> u32 {
    let mut count = 0;
    for_each_neighbor(particle_idx, view, params, model, grid, |_, _, _| count += 1);
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use particle_life_common::NeighborScan;
    use rand::prelude::*;

    struct Scene {
        xs: Vec<f32>,
        ys: Vec<f32>,
        types: Vec<u32>,
    }

    impl Scene {
        fn view(&self) -> ParticleView<'_> {
            ParticleView { positions_x: &self.xs, positions_y: &self.ys, types: &self.types }
        }
    }

    fn params(scan: NeighborScan) -> SimParams {
        SimParams::new(200.0, 160.0, scan, 0.1, 2, 20.0, 0.0, 1.0, 0.5, 2.0, 1.0, 1.0, 0.0, 10.0)
    }

    fn random_scene(n: usize, p: &SimParams, seed: u64) -> Scene {
        let mut rng = StdRng::seed_from_u64(seed);
        Scene {
            xs: (0..n).map(|_| rng.random_range(0.0..p.domain_width)).collect(),
            ys: (0..n).map(|_| rng.random_range(0.0..p.domain_height)).collect(),
            types: (0..n).map(|_| rng.random_range(0..p.num_types)).collect(),
        }
    }

    fn brute_force(i: u32, scene: &Scene, p: &SimParams, model: &ForceModel) -> Vec<u32> {
        let view = scene.view();
        let radius = model.effective_radius(view.ptype(i));
        let mut out: Vec<u32> = (0..scene.types.len() as u32)
            .filter(|&j| j != i)
            .filter(|&j| {
                let d = toroidal_delta(view.position(i), view.position(j), p.domain_width, p.domain_height);
                let dist = d.length();
                dist > 0.0 && dist <= radius
            })
            .collect();
        out.sort_unstable();
        out
    }

    fn grid_neighbors(i: u32, scene: &Scene, p: &SimParams, model: &ForceModel, grid: &SpatialGrid) -> Vec<u32> {
        let mut out = Vec::new();
        for_each_neighbor(i, &scene.view(), p, model, grid, |j, _, _| out.push(j));
        out.sort_unstable();
        out
    }

    #[test]
    fn interior_neighbors_match_brute_force() {
        let p = params(NeighborScan::Clipped);
        let model = ForceModel::new(vec![1.0, -0.5, 0.3, 1.0], vec![0.0, 0.0], &p).unwrap();
        let scene = random_scene(1500, &p, 5);
        let mut grid = SpatialGrid::new(&p);
        grid.build_serial(&scene.xs, &scene.ys, &p).unwrap();

        let cell = p.grid_cell_size;
        let mut checked = 0;
        for i in 0..scene.types.len() as u32 {
            let pos = scene.view().position(i);
            let interior = pos.x >= cell
                && pos.x < p.domain_width - cell
                && pos.y >= cell
                && pos.y < p.domain_height - cell;
            if !interior {
                continue;
            }
            checked += 1;
            assert_eq!(grid_neighbors(i, &scene, &p, &model, &grid), brute_force(i, &scene, &p, &model));
        }
        assert!(checked > 500);
    }

    #[test]
    fn wrapped_scan_matches_brute_force_everywhere() {
        let p = params(NeighborScan::Wrapped);
        let model = ForceModel::new(vec![1.0; 4], vec![0.0, 0.0], &p).unwrap();
        let scene = random_scene(800, &p, 6);
        let mut grid = SpatialGrid::new(&p);
        grid.build_parallel(&scene.xs, &scene.ys, &p).unwrap();
        for i in 0..scene.types.len() as u32 {
            assert_eq!(grid_neighbors(i, &scene, &p, &model, &grid), brute_force(i, &scene, &p, &model));
        }
    }

    #[test]
    fn clipped_scan_misses_neighbors_across_the_seam() {
        let scene = Scene { xs: vec![1.0, 199.0], ys: vec![80.0, 80.0], types: vec![0, 0] };
        for (scan, expected) in [(NeighborScan::Clipped, 0), (NeighborScan::Wrapped, 1)] {
            let p = params(scan);
            let model = ForceModel::new(vec![1.0; 4], vec![0.0, 0.0], &p).unwrap();
            let mut grid = SpatialGrid::new(&p);
            grid.build_serial(&scene.xs, &scene.ys, &p).unwrap();
            assert_eq!(count_neighbors(0, &scene.view(), &p, &model, &grid), expected, "{:?}", scan);
        }
    }

    #[test]
    fn minimum_image_direction_inside_one_edge_cell() {
        // Both particles share the last column; distance stays the direct one.
        let p = params(NeighborScan::Clipped);
        let model = ForceModel::new(vec![1.0; 4], vec![0.0, 0.0], &p).unwrap();
        let scene = Scene { xs: vec![185.0, 195.0], ys: vec![80.0, 80.0], types: vec![0, 0] };
        let mut grid = SpatialGrid::new(&p);
        grid.build_serial(&scene.xs, &scene.ys, &p).unwrap();
        let sum = accumulate_forces(0, &scene.view(), &p, &model, &grid);
        assert_eq!(sum.count, 1);
        assert!(sum.force.x < 0.0, "repulsion pushes particle 0 left, got {:?}", sum.force);
        assert_eq!(sum.force.y, 0.0);
    }

    #[test]
    fn coincident_and_self_are_not_neighbors() {
        let p = params(NeighborScan::Clipped);
        let model = ForceModel::new(vec![1.0; 4], vec![0.0, 0.0], &p).unwrap();
        let scene = Scene { xs: vec![50.0, 50.0, 60.0], ys: vec![50.0, 50.0, 50.0], types: vec![0, 0, 0] };
        let mut grid = SpatialGrid::new(&p);
        grid.build_serial(&scene.xs, &scene.ys, &p).unwrap();
        let mut seen = Vec::new();
        for_each_neighbor(0, &scene.view(), &p, &model, &grid, |j, _, _| seen.push(j));
        assert_eq!(seen, vec![2]);
    }

    #[test]
    fn asymmetric_affinity_gives_chase() {
        // Type 0 is pulled towards type 1, type 1 is pushed away from type 0.
        let p = SimParams::new(200.0, 160.0, NeighborScan::Clipped, 0.1, 2, 20.0, 0.0, 1.0, 0.0, 1.0, 1.0, 1.0, 0.0, 10.0);
        let model = ForceModel::new(vec![0.0, -1.0, 1.0, 0.0], vec![0.0, 0.0], &p).unwrap();
        let scene = Scene { xs: vec![100.0, 110.0], ys: vec![80.0, 80.0], types: vec![0, 1] };
        let mut grid = SpatialGrid::new(&p);
        grid.build_serial(&scene.xs, &scene.ys, &p).unwrap();
        let a = accumulate_forces(0, &scene.view(), &p, &model, &grid);
        let b = accumulate_forces(1, &scene.view(), &p, &model, &grid);
        assert!(a.force.x > 0.0, "type 0 should move towards type 1");
        assert!(b.force.x > 0.0, "type 1 should move away from type 0");
    }

    #[test]
    fn out_of_range_type_counts_but_exerts_nothing() {
        let p = params(NeighborScan::Clipped);
        let model = ForceModel::new(vec![1.0; 4], vec![0.0, 0.0], &p).unwrap();
        let scene = Scene { xs: vec![100.0, 105.0], ys: vec![80.0, 80.0], types: vec![0, 7] };
        let mut grid = SpatialGrid::new(&p);
        grid.build_serial(&scene.xs, &scene.ys, &p).unwrap();
        for i in 0..2 {
            let sum = accumulate_forces(i, &scene.view(), &p, &model, &grid);
            assert_eq!(sum.count, 1);
            assert_eq!(sum.force, Vec2::zero());
        }
    }
}
