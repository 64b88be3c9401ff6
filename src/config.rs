//! Analysis configuration
//!
//! Significance level, cost-effectiveness threshold, measured step pairs and
//! compared client attributes. Loaded from JSON on top of the defaults.

use crate::error::AnalysisError;
use crate::types::{ClientAttribute, StepPair};
use serde::{Deserialize, Serialize};

/// Default significance level for all hypothesis tests
pub const DEFAULT_ALPHA: f64 = 0.05;

/// Default lift over Control required to call the redesign cost-effective
pub const DEFAULT_COST_THRESHOLD: f64 = 0.05;

/// Settings for one experiment evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Significance level (0-1, exclusive)
    pub alpha: f64,
    /// Required completion-rate lift over Control, as a fraction of Control's visits
    pub cost_effectiveness_threshold: f64,
    /// Step pairs whose transition time is measured
    pub step_pairs: Vec<StepPair>,
    /// Client attributes compared between arms
    pub attributes: Vec<ClientAttribute>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            cost_effectiveness_threshold: DEFAULT_COST_THRESHOLD,
            step_pairs: StepPair::funnel(),
            attributes: ClientAttribute::ALL.to_vec(),
        }
    }
}

impl AnalysisConfig {
    /// Load a configuration from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, AnalysisError> {
        let config: AnalysisConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to pretty JSON
    pub fn to_json(&self) -> Result<String, AnalysisError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(AnalysisError::Config(format!(
                "alpha must be in (0, 1), got {}",
                self.alpha
            )));
        }
        if !(0.0..1.0).contains(&self.cost_effectiveness_threshold) {
            return Err(AnalysisError::Config(format!(
                "cost_effectiveness_threshold must be in [0, 1), got {}",
                self.cost_effectiveness_threshold
            )));
        }
        if self.step_pairs.is_empty() {
            return Err(AnalysisError::Config("step_pairs is empty".to_string()));
        }
        if let Some(pair) = self.step_pairs.iter().find(|p| p.from == p.to) {
            return Err(AnalysisError::Config(format!(
                "step pair {} repeats the same step",
                pair
            )));
        }
        if self.attributes.is_empty() {
            return Err(AnalysisError::Config("attributes is empty".to_string()));
        }
        Ok(())
    }
}
