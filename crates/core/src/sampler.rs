//! Stochastic pose sampling for a batch session.
//!
//! [`ParameterSampler::sample`] turns an [`InputParameters`] record into a
//! [`PoseSequence`] of exactly `num_samples` poses. The random source is
//! always supplied by the caller: production code passes a thread-local
//! generator, tests pass a seeded `StdRng` and can assert exact values.
//!
//! Stochastic sampling is triggered only by the presence of a dispersion
//! parameter (`std_dev` or `concentration`). The axis mean never affects
//! whether an axis is sampled.

use std::f64::consts::PI;

use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::parameters::{AngularAxis, InputParameters, LinearAxis};

/// Above this concentration the wrapped normal approximation is used.
const VON_MISES_NORMAL_APPROX_KAPPA: f64 = 1e6;

/// Below this concentration the distribution is indistinguishable from uniform.
const VON_MISES_UNIFORM_KAPPA: f64 = 1e-8;

// ---------------------------------------------------------------------------
// Pose
// ---------------------------------------------------------------------------

/// One viewpoint of the virtual imaging device relative to the volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// mm
    pub push_pull: f64,
    /// mm
    pub head_foot: f64,
    /// mm
    pub raise_lower: f64,
    /// degrees
    pub alpha: f64,
    /// degrees
    pub beta: f64,
}

/// Per-axis value sequences, all of the same length.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PoseSequence {
    pub push_pull: Vec<f64>,
    pub head_foot: Vec<f64>,
    pub raise_lower: Vec<f64>,
    pub alpha: Vec<f64>,
    pub beta: Vec<f64>,
}

impl PoseSequence {
    pub fn len(&self) -> usize {
        self.alpha.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alpha.is_empty()
    }

    /// The pose at `index`, or `None` past the end.
    pub fn get(&self, index: usize) -> Option<Pose> {
        Some(Pose {
            push_pull: *self.push_pull.get(index)?,
            head_foot: *self.head_foot.get(index)?,
            raise_lower: *self.raise_lower.get(index)?,
            alpha: *self.alpha.get(index)?,
            beta: *self.beta.get(index)?,
        })
    }

    /// Iterate poses in sample order.
    pub fn poses(&self) -> impl Iterator<Item = Pose> + '_ {
        (0..self.len()).filter_map(|i| self.get(i))
    }
}

// ---------------------------------------------------------------------------
// ParameterSampler
// ---------------------------------------------------------------------------

pub struct ParameterSampler;

impl ParameterSampler {
    /// Draw `params.num_samples` poses using `rng`.
    pub fn sample<R: Rng + ?Sized>(params: &InputParameters, rng: &mut R) -> PoseSequence {
        let n = params.sample_count();
        PoseSequence {
            push_pull: sample_linear(&params.push_pull, n, rng),
            head_foot: sample_linear(&params.head_foot, n, rng),
            raise_lower: sample_linear(&params.raise_lower, n, rng),
            alpha: sample_angular(&params.alpha, n, rng),
            beta: sample_angular(&params.beta, n, rng),
        }
    }
}

/// Gaussian around the mean when `std_dev` is set, otherwise constant.
pub fn sample_linear<R: Rng + ?Sized>(axis: &LinearAxis, n: usize, rng: &mut R) -> Vec<f64> {
    match axis.std_dev {
        Some(std_dev) => (0..n)
            .map(|_| axis.mean + std_dev * standard_normal(rng))
            .collect(),
        None => vec![axis.mean; n],
    }
}

/// Von Mises around the mean, reduced into `[0, 360)`, when `concentration`
/// is set; otherwise the mean repeated as given.
pub fn sample_angular<R: Rng + ?Sized>(axis: &AngularAxis, n: usize, rng: &mut R) -> Vec<f64> {
    match axis.concentration {
        Some(kappa) => {
            let mu = axis.mean_degrees.to_radians();
            (0..n)
                .map(|_| reduce_degrees(von_mises(mu, kappa, rng).to_degrees()))
                .collect()
        }
        None => vec![axis.mean_degrees; n],
    }
}

/// Reduce an angle in degrees into `[0, 360)`.
pub fn reduce_degrees(degrees: f64) -> f64 {
    let reduced = degrees.rem_euclid(360.0);
    // rem_euclid of a tiny negative value rounds up to exactly 360.
    if reduced >= 360.0 {
        0.0
    } else {
        reduced
    }
}

// ---------------------------------------------------------------------------
// Distributions
// ---------------------------------------------------------------------------

fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.sample(StandardNormal)
}

/// Best & Fisher (1979) rejection sampler. Returns radians, not wrapped.
fn von_mises<R: Rng + ?Sized>(mu: f64, kappa: f64, rng: &mut R) -> f64 {
    if kappa < VON_MISES_UNIFORM_KAPPA {
        return mu + PI * (2.0 * rng.random::<f64>() - 1.0);
    }
    if kappa > VON_MISES_NORMAL_APPROX_KAPPA {
        return mu + standard_normal(rng) / kappa.sqrt();
    }

    let r = 1.0 + (1.0 + 4.0 * kappa * kappa).sqrt();
    let rho = (r - (2.0 * r).sqrt()) / (2.0 * kappa);
    let s = (1.0 + rho * rho) / (2.0 * rho);

    let w = loop {
        let u: f64 = rng.random();
        let z = (PI * u).cos();
        let w = (1.0 + s * z) / (s + z);
        let y = kappa * (s - w);
        let v: f64 = 1.0 - rng.random::<f64>();
        if y * (2.0 - y) - v >= 0.0 || (y / v).ln() + 1.0 - y >= 0.0 {
            break w;
        }
    };

    let theta = w.clamp(-1.0, 1.0).acos();
    if rng.random::<f64>() < 0.5 {
        mu - theta
    } else {
        mu + theta
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn rng(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }

    fn dispersed_params(n: i32) -> InputParameters {
        let mut params = InputParameters::new(1000.0, n);
        params.push_pull = LinearAxis::gaussian(5.0, 2.0);
        params.head_foot = LinearAxis::gaussian(-3.0, 10.0);
        params.raise_lower = LinearAxis::gaussian(0.0, 1.0);
        params.alpha = AngularAxis::von_mises(15.0, 4.0);
        params.beta = AngularAxis::von_mises(-5.0, 0.5);
        params
    }

    #[test]
    fn every_axis_has_num_samples_values() {
        for n in [0, 1, 7, 100] {
            let seq = ParameterSampler::sample(&dispersed_params(n), &mut rng(1));
            let n = n as usize;
            assert_eq!(seq.push_pull.len(), n);
            assert_eq!(seq.head_foot.len(), n);
            assert_eq!(seq.raise_lower.len(), n);
            assert_eq!(seq.alpha.len(), n);
            assert_eq!(seq.beta.len(), n);
            assert_eq!(seq.poses().count(), n);
        }
    }

    #[test]
    fn axes_without_dispersion_repeat_the_mean_exactly() {
        let mut params = InputParameters::new(1000.0, 5);
        params.push_pull = LinearAxis::fixed(12.5);
        params.alpha = AngularAxis::fixed(-5.0);
        params.beta = AngularAxis::fixed(370.0);

        let seq = ParameterSampler::sample(&params, &mut rng(9));
        assert!(seq.push_pull.iter().all(|v| *v == 12.5));
        assert!(seq.head_foot.iter().all(|v| *v == 0.0));
        assert!(seq.raise_lower.iter().all(|v| *v == 0.0));
        // Constant angles are passed through unreduced.
        assert!(seq.alpha.iter().all(|v| *v == -5.0));
        assert!(seq.beta.iter().all(|v| *v == 370.0));
    }

    #[test]
    fn sampled_angles_lie_in_zero_to_360() {
        let mut params = InputParameters::new(1000.0, 100);
        params.alpha = AngularAxis::von_mises(0.0, 0.01);
        params.beta = AngularAxis::von_mises(359.0, 50.0);

        for seed in 0..20 {
            let seq = ParameterSampler::sample(&params, &mut rng(seed));
            for v in seq.alpha.iter().chain(seq.beta.iter()) {
                assert!((0.0..360.0).contains(v), "angle {v} out of range");
            }
        }
    }

    #[test]
    fn nonzero_mean_does_not_suppress_sampling() {
        let mut params = InputParameters::new(1000.0, 50);
        params.alpha = AngularAxis::von_mises(30.0, 2.0);

        let seq = ParameterSampler::sample(&params, &mut rng(3));
        let first = seq.alpha[0];
        assert!(seq.alpha.iter().any(|v| *v != first));
    }

    #[test]
    fn same_seed_gives_identical_sequences() {
        let params = dispersed_params(25);
        let a = ParameterSampler::sample(&params, &mut rng(42));
        let b = ParameterSampler::sample(&params, &mut rng(42));
        assert_eq!(a, b);

        let c = ParameterSampler::sample(&params, &mut rng(43));
        assert_ne!(a, c);
    }

    #[test]
    fn gaussian_matches_requested_moments() {
        let axis = LinearAxis::gaussian(10.0, 3.0);
        let values = sample_linear(&axis, 20_000, &mut rng(11));

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        assert!((mean - 10.0).abs() < 0.1, "mean was {mean}");
        assert!((var.sqrt() - 3.0).abs() < 0.1, "std dev was {}", var.sqrt());
    }

    #[test]
    fn unit_gaussian_axis_draws_standard_normal_deviates() {
        let axis = LinearAxis::gaussian(0.0, 1.0);
        let values = sample_linear(&axis, 5, &mut rng(23));

        let mut reference = rng(23);
        let expected: Vec<f64> = (0..5).map(|_| reference.sample(StandardNormal)).collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn high_concentration_clusters_near_mean() {
        let axis = AngularAxis::von_mises(350.0, 400.0);
        let values = sample_angular(&axis, 2_000, &mut rng(5));

        for v in values {
            // Circular distance to 350 degrees.
            let d = (v - 350.0).rem_euclid(360.0);
            let d = d.min(360.0 - d);
            assert!(d < 20.0, "{v} too far from mean");
        }
    }

    #[test]
    fn reduce_degrees_wraps_into_range() {
        assert_eq!(reduce_degrees(-10.0), 350.0);
        assert_eq!(reduce_degrees(360.0), 0.0);
        assert_eq!(reduce_degrees(725.0), 5.0);
        assert_eq!(reduce_degrees(-1e-300), 0.0);
    }

    #[test]
    fn pose_sequence_get_out_of_range() {
        let seq = ParameterSampler::sample(&InputParameters::new(1000.0, 2), &mut rng(0));
        assert!(seq.get(1).is_some());
        assert!(seq.get(2).is_none());
    }
}
