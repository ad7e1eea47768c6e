//! Input parameters for a batch session and their validation.
//!
//! A session carries exactly one [`InputParameters`] record. Each linear
//! axis has a mean offset and an optional standard deviation; each angular
//! axis has a mean angle in degrees and an optional von Mises
//! concentration. A missing dispersion parameter means the axis is held
//! constant at its mean for every sample.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Upper bound on samples per session.
pub const MAX_NUM_SAMPLES: i32 = 100;

/// Default detector diameter in mm (a 9" image intensifier).
pub const DEFAULT_DETECTOR_DIAMETER: f64 = 228.6;

fn default_detector_diameter() -> f64 {
    DEFAULT_DETECTOR_DIAMETER
}

// ---------------------------------------------------------------------------
// Axis configuration
// ---------------------------------------------------------------------------

/// A translation axis, in mm.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, Validate)]
pub struct LinearAxis {
    #[serde(default)]
    pub mean: f64,
    #[validate(range(exclusive_min = 0.0, message = "std_dev must be greater than 0"))]
    pub std_dev: Option<f64>,
}

impl LinearAxis {
    pub fn fixed(mean: f64) -> Self {
        Self { mean, std_dev: None }
    }

    pub fn gaussian(mean: f64, std_dev: f64) -> Self {
        Self {
            mean,
            std_dev: Some(std_dev),
        }
    }
}

/// A rotation axis, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, Validate)]
pub struct AngularAxis {
    #[serde(default)]
    pub mean_degrees: f64,
    /// Von Mises kappa; higher means a tighter spread around the mean.
    #[validate(range(exclusive_min = 0.0, message = "concentration must be greater than 0"))]
    pub concentration: Option<f64>,
}

impl AngularAxis {
    pub fn fixed(mean_degrees: f64) -> Self {
        Self {
            mean_degrees,
            concentration: None,
        }
    }

    pub fn von_mises(mean_degrees: f64, concentration: f64) -> Self {
        Self {
            mean_degrees,
            concentration: Some(concentration),
        }
    }
}

// ---------------------------------------------------------------------------
// InputParameters
// ---------------------------------------------------------------------------

/// Everything the render loop needs to generate a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct InputParameters {
    /// Source to detector distance in mm.
    #[validate(range(
        exclusive_min = 0.0,
        message = "source_to_detector_distance must be greater than 0"
    ))]
    pub source_to_detector_distance: f64,

    #[serde(default = "default_detector_diameter")]
    #[validate(range(exclusive_min = 0.0, message = "detector_diameter must be greater than 0"))]
    pub detector_diameter: f64,

    #[validate(range(min = 0, max = 100, message = "num_samples must be between 0 and 100"))]
    pub num_samples: i32,

    #[serde(default)]
    #[validate(nested)]
    pub push_pull: LinearAxis,

    #[serde(default)]
    #[validate(nested)]
    pub head_foot: LinearAxis,

    #[serde(default)]
    #[validate(nested)]
    pub raise_lower: LinearAxis,

    #[serde(default)]
    #[validate(nested)]
    pub alpha: AngularAxis,

    #[serde(default)]
    #[validate(nested)]
    pub beta: AngularAxis,
}

impl InputParameters {
    /// Parameters with every axis fixed at zero.
    pub fn new(source_to_detector_distance: f64, num_samples: i32) -> Self {
        Self {
            source_to_detector_distance,
            detector_diameter: DEFAULT_DETECTOR_DIAMETER,
            num_samples,
            push_pull: LinearAxis::default(),
            head_foot: LinearAxis::default(),
            raise_lower: LinearAxis::default(),
            alpha: AngularAxis::default(),
            beta: AngularAxis::default(),
        }
    }

    /// Run declarative range checks plus a finiteness check on every float.
    pub fn check(&self) -> Result<(), CoreError> {
        self.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;

        let floats = [
            ("source_to_detector_distance", Some(self.source_to_detector_distance)),
            ("detector_diameter", Some(self.detector_diameter)),
            ("push_pull.mean", Some(self.push_pull.mean)),
            ("push_pull.std_dev", self.push_pull.std_dev),
            ("head_foot.mean", Some(self.head_foot.mean)),
            ("head_foot.std_dev", self.head_foot.std_dev),
            ("raise_lower.mean", Some(self.raise_lower.mean)),
            ("raise_lower.std_dev", self.raise_lower.std_dev),
            ("alpha.mean_degrees", Some(self.alpha.mean_degrees)),
            ("alpha.concentration", self.alpha.concentration),
            ("beta.mean_degrees", Some(self.beta.mean_degrees)),
            ("beta.concentration", self.beta.concentration),
        ];
        for (name, value) in floats {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(CoreError::Validation(format!("{name} must be a finite number")));
                }
            }
        }
        Ok(())
    }

    /// Sample count as a `usize`. Negative values never pass [`check`](Self::check).
    pub fn sample_count(&self) -> usize {
        self.num_samples.max(0) as usize
    }

    /// Imaging device geometry handed to the renderer.
    pub fn geometry(&self) -> DeviceGeometry {
        DeviceGeometry {
            source_to_detector_distance: self.source_to_detector_distance,
            detector_diameter: self.detector_diameter,
        }
    }
}

/// Fixed device geometry for one session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceGeometry {
    pub source_to_detector_distance: f64,
    pub detector_diameter: f64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(InputParameters::new(1000.0, 10).check().is_ok());
    }

    #[test]
    fn sample_count_bounds_are_inclusive() {
        assert!(InputParameters::new(1000.0, 0).check().is_ok());
        assert!(InputParameters::new(1000.0, MAX_NUM_SAMPLES).check().is_ok());
        assert_matches!(
            InputParameters::new(1000.0, MAX_NUM_SAMPLES + 1).check(),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            InputParameters::new(1000.0, -1).check(),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn distance_must_be_positive() {
        assert!(InputParameters::new(0.0, 1).check().is_err());
        assert!(InputParameters::new(-5.0, 1).check().is_err());
    }

    #[test]
    fn dispersion_must_be_positive() {
        let mut params = InputParameters::new(1000.0, 1);
        params.head_foot = LinearAxis::gaussian(0.0, 0.0);
        assert!(params.check().is_err());

        let mut params = InputParameters::new(1000.0, 1);
        params.beta = AngularAxis::von_mises(0.0, -1.0);
        assert!(params.check().is_err());
    }

    #[test]
    fn non_finite_values_rejected() {
        let mut params = InputParameters::new(1000.0, 1);
        params.alpha = AngularAxis::fixed(f64::NAN);
        assert_matches!(params.check(), Err(CoreError::Validation(msg)) if msg.contains("alpha"));
    }

    #[test]
    fn deserialize_applies_defaults() {
        let params: InputParameters = serde_json::from_value(serde_json::json!({
            "source_to_detector_distance": 1000.0,
            "num_samples": 3,
            "alpha": { "mean_degrees": 10.0 },
        }))
        .unwrap();

        assert_eq!(params.detector_diameter, DEFAULT_DETECTOR_DIAMETER);
        assert_eq!(params.alpha, AngularAxis::fixed(10.0));
        assert_eq!(params.beta, AngularAxis::default());
        assert_eq!(params.push_pull, LinearAxis::default());
    }

    #[test]
    fn deserialize_requires_distance() {
        let result: Result<InputParameters, _> =
            serde_json::from_value(serde_json::json!({ "num_samples": 3 }));
        assert!(result.is_err());
    }

    #[test]
    fn geometry_copies_device_fields() {
        let geometry = InputParameters::new(950.0, 1).geometry();
        assert_eq!(geometry.source_to_detector_distance, 950.0);
        assert_eq!(geometry.detector_diameter, DEFAULT_DETECTOR_DIAMETER);
    }
}
