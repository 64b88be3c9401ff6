//! Core types for the funnelscope pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: typed client and event records produced by the loader, per-arm
//! funnel aggregates, and the experiment report.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::AnalysisError;
use crate::stats::TestOutcome;

/// Stage of the online process, ordered from entry to completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProcessStep {
    #[serde(rename = "start")]
    Start,
    #[serde(rename = "step_1")]
    Step1,
    #[serde(rename = "step_2")]
    Step2,
    #[serde(rename = "step_3")]
    Step3,
    #[serde(rename = "confirm")]
    Confirm,
}

impl ProcessStep {
    /// All steps in funnel order
    pub const ALL: [ProcessStep; 5] = [
        ProcessStep::Start,
        ProcessStep::Step1,
        ProcessStep::Step2,
        ProcessStep::Step3,
        ProcessStep::Confirm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStep::Start => "start",
            ProcessStep::Step1 => "step_1",
            ProcessStep::Step2 => "step_2",
            ProcessStep::Step3 => "step_3",
            ProcessStep::Confirm => "confirm",
        }
    }

    /// Position in the funnel (start = 0, confirm = 4)
    pub fn rank(&self) -> i32 {
        match self {
            ProcessStep::Start => 0,
            ProcessStep::Step1 => 1,
            ProcessStep::Step2 => 2,
            ProcessStep::Step3 => 3,
            ProcessStep::Confirm => 4,
        }
    }
}

impl fmt::Display for ProcessStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessStep {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProcessStep::ALL
            .iter()
            .copied()
            .find(|step| step.as_str() == s.trim())
            .ok_or_else(|| AnalysisError::Schema(format!("unknown process step '{}'", s)))
    }
}

/// Experiment group a client was assigned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Arm {
    /// Redesigned experience
    Test,
    /// Legacy experience
    Control,
}

impl Arm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arm::Test => "Test",
            Arm::Control => "Control",
        }
    }
}

impl fmt::Display for Arm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arm {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Test" => Ok(Arm::Test),
            "Control" => Ok(Arm::Control),
            other => Err(AnalysisError::Schema(format!(
                "unknown experiment group '{}'",
                other
            ))),
        }
    }
}

/// One observed step visit, joined with the owning client's arm
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    pub client_id: u64,
    pub visitor_id: String,
    pub visit_id: String,
    pub process_step: ProcessStep,
    #[serde(rename = "date_time")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "experiment_group")]
    pub arm: Arm,
}

/// Cleaned client demographics joined with the experiment roster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientProfile {
    pub client_id: u64,
    #[serde(rename = "client_tenure_in_years")]
    pub tenure_years: u32,
    #[serde(rename = "client_age")]
    pub age: f64,
    pub gender: String,
    pub number_of_accounts: u32,
    pub balance: f64,
    pub calls_per_year: u32,
    pub logons_per_year: u32,
    #[serde(rename = "experiment_group")]
    pub arm: Arm,
}

/// Numeric client attribute compared between arms
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAttribute {
    Age,
    TenureYears,
    NumberOfAccounts,
    Balance,
    CallsPerYear,
    LogonsPerYear,
}

impl ClientAttribute {
    pub const ALL: [ClientAttribute; 6] = [
        ClientAttribute::Age,
        ClientAttribute::TenureYears,
        ClientAttribute::NumberOfAccounts,
        ClientAttribute::Balance,
        ClientAttribute::CallsPerYear,
        ClientAttribute::LogonsPerYear,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientAttribute::Age => "age",
            ClientAttribute::TenureYears => "tenure_years",
            ClientAttribute::NumberOfAccounts => "number_of_accounts",
            ClientAttribute::Balance => "balance",
            ClientAttribute::CallsPerYear => "calls_per_year",
            ClientAttribute::LogonsPerYear => "logons_per_year",
        }
    }

    /// Read the attribute from a profile
    pub fn value(&self, profile: &ClientProfile) -> f64 {
        match self {
            ClientAttribute::Age => profile.age,
            ClientAttribute::TenureYears => profile.tenure_years as f64,
            ClientAttribute::NumberOfAccounts => profile.number_of_accounts as f64,
            ClientAttribute::Balance => profile.balance,
            ClientAttribute::CallsPerYear => profile.calls_per_year as f64,
            ClientAttribute::LogonsPerYear => profile.logons_per_year as f64,
        }
    }
}

/// Ordered pair of steps whose transition time is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepPair {
    pub from: ProcessStep,
    pub to: ProcessStep,
}

impl StepPair {
    pub fn new(from: ProcessStep, to: ProcessStep) -> Self {
        Self { from, to }
    }

    /// Adjacent pairs of the full funnel: start→step_1 … step_3→confirm
    pub fn funnel() -> Vec<StepPair> {
        ProcessStep::ALL
            .windows(2)
            .map(|w| StepPair::new(w[0], w[1]))
            .collect()
    }
}

impl fmt::Display for StepPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// Completion counts for one arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionSummary {
    /// Distinct visits that reached `confirm`
    pub completed_sessions: usize,
    /// Distinct visits observed
    pub total_sessions: usize,
    /// Raw number of `confirm` events, repeated confirms included
    pub confirm_events: usize,
    /// confirm_events / total_sessions
    pub rate: f64,
}

/// Mean transition time for one step pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDuration {
    pub pair: StepPair,
    /// Mean time from `from` to `to` (seconds)
    pub mean_seconds: f64,
    /// Number of transitions averaged
    pub transitions: usize,
}

impl StepDuration {
    pub fn mean(&self) -> Duration {
        Duration::nanoseconds((self.mean_seconds * 1e9).round() as i64)
    }
}

/// Per-pair mean durations and the total journey estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDurations {
    pub pairs: Vec<StepDuration>,
    /// Sum of the per-pair means (seconds)
    pub total_mean_seconds: f64,
}

impl StepDurations {
    pub fn get(&self, pair: StepPair) -> Option<&StepDuration> {
        self.pairs.iter().find(|d| d.pair == pair)
    }
}

/// Backward-navigation summary for one arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRateSummary {
    /// Sessions with at least one backward transition
    pub erroneous_sessions: usize,
    pub total_sessions: usize,
    /// erroneous_sessions / total_sessions
    pub rate: f64,
    /// Backward transitions keyed by the step landed on
    pub backward_by_step: BTreeMap<ProcessStep, usize>,
}

/// Funnel aggregates for one arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmMetrics {
    pub arm: Arm,
    pub completion: CompletionSummary,
    pub durations: StepDurations,
    pub errors: ErrorRateSummary,
}

/// Outcome of the completion-rate hypothesis test and cost threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedesignDecision {
    pub test: TestOutcome,
    pub alpha: f64,
    /// Completion-rate difference is statistically significant
    pub significant: bool,
    /// Control completion rate lifted by the cost-effectiveness threshold
    pub adjusted_control_rate: f64,
    /// Test completion rate exceeds the adjusted Control rate
    pub exceeds_threshold: bool,
    /// Both conditions hold
    pub cost_effective: bool,
}

/// Error-rate hypothesis test between arms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRateComparison {
    pub test: TestOutcome,
    pub significant: bool,
}

/// Two-sample comparison of one client attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeComparison {
    pub attribute: ClientAttribute,
    pub test_mean: f64,
    pub control_mean: f64,
    pub test: TestOutcome,
    pub significant: bool,
}

/// Descriptive statistics of one arm's clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub arm: Arm,
    pub clients: usize,
    pub attribute_means: BTreeMap<ClientAttribute, f64>,
    pub gender_counts: BTreeMap<String, usize>,
}

/// Sample balance and span of the experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentHealth {
    pub test_visits: usize,
    pub control_visits: usize,
    /// |n_test - n_control| / mean(n_test, n_control)
    pub balance: f64,
    pub first_event_utc: String,
    pub last_event_utc: String,
    pub duration_days: i64,
}

/// Report producer metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
    pub computed_at_utc: String,
}

/// Complete evaluation of one experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub producer: ReportProducer,
    pub test: ArmMetrics,
    pub control: ArmMetrics,
    pub completion: RedesignDecision,
    pub error_rate: ErrorRateComparison,
    pub attributes: Vec<AttributeComparison>,
    pub profiles: Vec<ProfileSummary>,
    pub health: ExperimentHealth,
}
