//! funnelscope - Funnel metrics and A/B-test evaluation engine
//!
//! funnelscope evaluates a web process redesign experiment through a
//! deterministic pipeline: source tables → cleaned, joined records → funnel
//! metrics per arm → hypothesis tests → experiment report.
//!
//! ## Modules
//!
//! - **Loader** (`schema`): Roster, demographics and web log partitions into typed records
//! - **Funnel engine** (`funnel`): Completion rate, step durations and error rate per arm
//! - **Statistics** (`stats`): Two-proportion z-test and two-sample t-test
//! - **Evaluation** (`experiment`): Arm comparisons and the redesign decision

pub mod config;
pub mod error;
pub mod experiment;
pub mod funnel;
pub mod pipeline;
pub mod report;
pub mod schema;
pub mod stats;
pub mod types;

pub use config::AnalysisConfig;
pub use error::AnalysisError;
pub use funnel::{completion_rate, error_rate, mean_step_durations, FunnelEngine};
pub use pipeline::{analyze_dataset, analyze_experiment};
pub use schema::{DatasetLoader, DatasetPaths, ExperimentDataset};
pub use stats::{compare_means, compare_proportions, TestOutcome};

/// Crate version embedded in every report
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for reports
pub const PRODUCER_NAME: &str = "funnelscope";
