//! Row mapping for the `input_parameters` table.

use sqlx::FromRow;
use xraygen_core::parameters::{AngularAxis, InputParameters, LinearAxis};
use xraygen_core::types::SessionId;

/// A row from the `input_parameters` table (one per session).
#[derive(Debug, Clone, FromRow)]
pub struct InputParametersRow {
    pub session_id: SessionId,
    pub source_to_detector_distance: f64,
    pub detector_diameter: f64,
    pub num_samples: i32,
    pub push_pull_mean: f64,
    pub push_pull_std_dev: Option<f64>,
    pub head_foot_mean: f64,
    pub head_foot_std_dev: Option<f64>,
    pub raise_lower_mean: f64,
    pub raise_lower_std_dev: Option<f64>,
    pub alpha_mean: f64,
    pub alpha_concentration: Option<f64>,
    pub beta_mean: f64,
    pub beta_concentration: Option<f64>,
}

impl From<InputParametersRow> for InputParameters {
    fn from(row: InputParametersRow) -> Self {
        Self {
            source_to_detector_distance: row.source_to_detector_distance,
            detector_diameter: row.detector_diameter,
            num_samples: row.num_samples,
            push_pull: LinearAxis {
                mean: row.push_pull_mean,
                std_dev: row.push_pull_std_dev,
            },
            head_foot: LinearAxis {
                mean: row.head_foot_mean,
                std_dev: row.head_foot_std_dev,
            },
            raise_lower: LinearAxis {
                mean: row.raise_lower_mean,
                std_dev: row.raise_lower_std_dev,
            },
            alpha: AngularAxis {
                mean_degrees: row.alpha_mean,
                concentration: row.alpha_concentration,
            },
            beta: AngularAxis {
                mean_degrees: row.beta_mean,
                concentration: row.beta_concentration,
            },
        }
    }
}
