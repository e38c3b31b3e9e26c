use anyhow::Result;
use particle_life_common::SimParams;
use rand::distr::Uniform;
use rand::prelude::*;

/// Type-pair affinity table and per-type radius scaling.
///
/// Affinity is indexed `[subject][neighbor]` and is deliberately not symmetric:
/// type A may chase type B while B flees from A.
#[derive(Debug, Clone)]
pub struct ForceModel {
    num_types: u32,
    /// Row-major `num_types * num_types` affinity coefficients.
    affinity: Vec<f32>,
    radius_by_type: Vec<f32>,
    base_radius: f32,
    radius_ratio: f32,
    repulsion: f32,
    attraction: f32,
    decay_sharpness: f32,
    force_multiplier: f32,
}

impl ForceModel {
    /// Builds a model from a row-major affinity table and per-type radius scales.
    pub fn new(affinity: Vec<f32>, radius_by_type: Vec<f32>, params: &SimParams) -> Result<Self> {
        let n = params.num_types as usize;
        if n == 0 {
            anyhow::bail!("num_types must be greater than 0.");
        }
        if affinity.len() != n * n {
            anyhow::bail!(
                "Force table has {} entries, expected num_types^2 = {}.",
                affinity.len(),
                n * n
            );
        }
        if radius_by_type.len() != n {
            anyhow::bail!(
                "radius_by_type has {} entries, expected num_types = {}.",
                radius_by_type.len(),
                n
            );
        }
        if radius_by_type.iter().any(|r| !r.is_finite() || *r < 0.0) {
            anyhow::bail!("radius_by_type entries must be finite and non-negative.");
        }
        if affinity.iter().any(|a| !a.is_finite()) {
            anyhow::bail!("Force table entries must be finite.");
        }

        Ok(Self {
            num_types: params.num_types,
            affinity,
            radius_by_type,
            base_radius: params.base_radius,
            radius_ratio: params.radius_ratio,
            repulsion: params.repulsion,
            attraction: params.attraction,
            decay_sharpness: params.decay_sharpness,
            force_multiplier: params.force_multiplier,
        })
    }

    /// Random affinities in [-1, 1] and radius scales in [0, 1].
    pub fn random(params: &SimParams, rng: &mut StdRng) -> Result<Self> {
        let n = params.num_types as usize;
        let affinity_dist = Uniform::new_inclusive(-1.0f32, 1.0f32)?;
        let radius_dist = Uniform::new_inclusive(0.0f32, 1.0f32)?;
        let affinity = (0..n * n).map(|_| rng.sample(affinity_dist)).collect();
        let radius_by_type = (0..n).map(|_| rng.sample(radius_dist)).collect();
        Self::new(affinity, radius_by_type, params)
    }

    /// Fails unless the model was built from parameters equal to `params`.
    ///
    /// The grid cell size is `params.base_radius`, so a model with another base
    /// radius or scalar set would evaluate a different interaction than the stepper indexes.
    pub fn check_params(&self, params: &SimParams) -> Result<()> {
        if self.num_types != params.num_types {
            anyhow::bail!(
                "Force model covers {} types but the configuration has num_types = {}.",
                self.num_types,
                params.num_types
            );
        }
        let scalars = [
            ("base_radius", self.base_radius, params.base_radius),
            ("radius_ratio", self.radius_ratio, params.radius_ratio),
            ("repulsion", self.repulsion, params.repulsion),
            ("attraction", self.attraction, params.attraction),
            ("decay_sharpness", self.decay_sharpness, params.decay_sharpness),
            ("force_multiplier", self.force_multiplier, params.force_multiplier),
        ];
        for (name, model_value, param_value) in scalars {
            if model_value != param_value {
                anyhow::bail!(
                    "Force model was built with {} = {} but the configuration has {}.",
                    name,
                    model_value,
                    param_value
                );
            }
        }
        Ok(())
    }

    pub fn num_types(&self) -> u32 {
        self.num_types
    }

    pub fn affinity_table(&self) -> &[f32] {
        &self.affinity
    }

    pub fn radius_by_type(&self) -> &[f32] {
        &self.radius_by_type
    }

    /// Whether `ptype` indexes the configured tables.
    #[inline(always)]
    pub fn is_known_type(&self, ptype: u32) -> bool {
        ptype < self.num_types
    }

    /// Affinity of `subject` towards `neighbor`. Zero when either type is out of range.
    #[inline(always)]
    pub fn affinity(&self, subject: u32, neighbor: u32) -> f32 {
        if !self.is_known_type(subject) || !self.is_known_type(neighbor) {
            return 0.0;
        }
        self.affinity[(subject * self.num_types + neighbor) as usize]
    }

    /// Interaction cutoff for a particle of type `ptype`.
    ///
    /// Out-of-range types use a scale of 0, i.e. the base radius.
    #[inline(always)]
    pub fn effective_radius(&self, ptype: u32) -> f32 {
        let scale = if self.is_known_type(ptype) {
            self.radius_by_type[ptype as usize]
        } else {
            0.0
        };
        self.base_radius * (1.0 + scale * self.radius_ratio)
    }

    /// Signed force magnitude along the separation direction, for normalized distance `r`.
    ///
    /// Positive values push the subject away from the neighbor, negative values pull it in.
    /// `accumulate_forces` therefore adds `-magnitude` along the direction to the neighbor
    /// (see "Sign convention of the force" in DESIGN.md), so a pair with positive affinity
    /// and no attraction separates.
    #[inline(always)]
    pub fn magnitude(&self, subject: u32, neighbor: u32, r: f32) -> f32 {
        let a = self.affinity(subject, neighbor);
        let rep_decay = r * self.decay_sharpness;
        let repulsion = self.repulsion / (1.0 + rep_decay * rep_decay);
        let attraction = self.attraction * r * r;
        a * (repulsion - attraction) * self.force_multiplier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use particle_life_common::NeighborScan;

    fn params(num_types: u32) -> SimParams {
        SimParams::new(
            100.0, 100.0, NeighborScan::Clipped, 0.1, num_types, 20.0, 0.5, 2.0, 1.0, 3.0, 1.5,
            1.0, 0.0, 10.0,
        )
    }

    #[test]
    fn magnitude_matches_formula() {
        let model = ForceModel::new(vec![0.8], vec![0.0], &params(1)).unwrap();
        let r = 0.4f32;
        let expected = 0.8 * (2.0 / (1.0 + (r * 3.0) * (r * 3.0)) - 1.0 * r * r) * 1.5;
        assert!((model.magnitude(0, 0, r) - expected).abs() < 1e-6);
    }

    #[test]
    fn affinity_is_not_symmetrized() {
        let model = ForceModel::new(vec![0.0, 1.0, -1.0, 0.0], vec![0.0, 0.0], &params(2)).unwrap();
        assert_eq!(model.affinity(0, 1), 1.0);
        assert_eq!(model.affinity(1, 0), -1.0);
        let r = 0.3;
        assert!(model.magnitude(0, 1, r) > 0.0);
        assert!(model.magnitude(1, 0, r) < 0.0);
        assert_eq!(model.magnitude(0, 1, r), -model.magnitude(1, 0, r));
    }

    #[test]
    fn effective_radius_scales_by_type() {
        let model = ForceModel::new(vec![1.0; 4], vec![0.0, 1.0], &params(2)).unwrap();
        assert_eq!(model.effective_radius(0), 20.0);
        assert_eq!(model.effective_radius(1), 30.0);
    }

    #[test]
    fn out_of_range_types_are_inert() {
        let model = ForceModel::new(vec![1.0; 4], vec![1.0, 1.0], &params(2)).unwrap();
        assert_eq!(model.affinity(5, 0), 0.0);
        assert_eq!(model.affinity(0, 2), 0.0);
        assert_eq!(model.magnitude(2, 0, 0.5), 0.0);
        assert_eq!(model.effective_radius(9), 20.0);
    }

    #[test]
    fn rejects_mismatched_tables() {
        assert!(ForceModel::new(vec![1.0; 3], vec![0.0, 0.0], &params(2)).is_err());
        assert!(ForceModel::new(vec![1.0; 4], vec![0.0], &params(2)).is_err());
        assert!(ForceModel::new(vec![1.0; 4], vec![0.0, -0.1], &params(2)).is_err());
    }

    #[test]
    fn check_params_names_the_mismatched_scalar() {
        let model = ForceModel::new(vec![1.0; 4], vec![0.0, 0.0], &params(2)).unwrap();
        assert!(model.check_params(&params(2)).is_ok());
        assert!(model.check_params(&params(3)).is_err());

        let mut wider = params(2);
        wider.base_radius = 40.0;
        let err = model.check_params(&wider).unwrap_err();
        assert!(err.to_string().contains("base_radius"), "{}", err);

        let mut stronger = params(2);
        stronger.force_multiplier = 3.0;
        let err = model.check_params(&stronger).unwrap_err();
        assert!(err.to_string().contains("force_multiplier"), "{}", err);
    }

    #[test]
    fn random_model_is_seeded_and_in_range() {
        let p = params(4);
        let a = ForceModel::random(&p, &mut StdRng::seed_from_u64(3)).unwrap();
        let b = ForceModel::random(&p, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(a.affinity_table(), b.affinity_table());
        assert_eq!(a.affinity_table().len(), 16);
        assert!(a.affinity_table().iter().all(|v| (-1.0..=1.0).contains(v)));
        assert!(a.radius_by_type().iter().all(|v| (0.0..=1.0).contains(v)));
    }
}
