//! Optimization submission request and its validation.

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Smallest budget the dashboard accepts, in its currency units.
pub const DEFAULT_MIN_BUDGET: f64 = 500_000.0;

/// Raw submission as sent by a client (JSON body or query string).
///
/// Every field is optional at this level so that a missing field is reported
/// as a validation error rather than a deserialization failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationRequest {
    #[serde(default)]
    pub domain: Option<String>,

    #[serde(default)]
    pub budget: Option<f64>,

    #[serde(default)]
    pub max_locations: Option<u32>,

    #[serde(default)]
    pub min_distance_between_banks: Option<f64>,
}

/// A submission that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub domain: String,
    pub budget: f64,
    pub max_locations: Option<u32>,
    pub min_distance_between_banks: Option<f64>,
}

impl OptimizationRequest {
    /// Validate required fields and thresholds.
    pub fn validate(&self, min_budget: f64) -> Result<ValidatedRequest, CoreError> {
        let domain = self
            .domain
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or(CoreError::MissingField("domain"))?;

        let budget = self.budget.ok_or(CoreError::MissingField("budget"))?;
        if !budget.is_finite() {
            return Err(CoreError::InvalidField {
                field: "budget",
                message: "must be a finite number".to_string(),
            });
        }
        if budget < min_budget {
            return Err(CoreError::InvalidField {
                field: "budget",
                message: format!("must be at least {}", min_budget),
            });
        }

        if self.max_locations == Some(0) {
            return Err(CoreError::InvalidField {
                field: "maxLocations",
                message: "must be greater than 0".to_string(),
            });
        }

        if let Some(distance) = self.min_distance_between_banks {
            if !distance.is_finite() || distance < 0.0 {
                return Err(CoreError::InvalidField {
                    field: "minDistanceBetweenBanks",
                    message: "must be a non-negative number".to_string(),
                });
            }
        }

        Ok(ValidatedRequest {
            domain: domain.to_string(),
            budget,
            max_locations: self.max_locations,
            min_distance_between_banks: self.min_distance_between_banks,
        })
    }
}
