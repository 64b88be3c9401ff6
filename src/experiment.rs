//! Experiment evaluation
//!
//! Compares the Test and Control arms: completion and error rates via the
//! two-proportion z-test, client attributes via the two-sample t-test, and the
//! cost-effectiveness decision for the redesign.

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::stats::{compare_means, compare_proportions, mean};
use crate::types::{
    Arm, ArmMetrics, AttributeComparison, ClientProfile, ErrorRateComparison, Event,
    ExperimentHealth, ProfileSummary, RedesignDecision,
};
use std::collections::{BTreeMap, BTreeSet};

/// Completion-rate z-test plus the cost-effectiveness threshold.
///
/// The redesign is cost-effective only when the difference is significant at
/// `alpha` and Test's rate exceeds Control's rate lifted by the threshold.
pub fn evaluate_redesign(
    test: &ArmMetrics,
    control: &ArmMetrics,
    config: &AnalysisConfig,
) -> Result<RedesignDecision, AnalysisError> {
    let t = &test.completion;
    let c = &control.completion;

    let outcome = compare_proportions(
        t.confirm_events,
        t.total_sessions,
        c.confirm_events,
        c.total_sessions,
    )?;
    let significant = outcome.is_significant(config.alpha);

    let n_control = c.total_sessions as f64;
    let adjusted_control_rate = (c.confirm_events as f64
        + config.cost_effectiveness_threshold * n_control)
        / n_control;
    let exceeds_threshold = t.rate > adjusted_control_rate;

    Ok(RedesignDecision {
        test: outcome,
        alpha: config.alpha,
        significant,
        adjusted_control_rate,
        exceeds_threshold,
        cost_effective: significant && exceeds_threshold,
    })
}

/// Error-rate z-test between arms
pub fn compare_error_rates(
    test: &ArmMetrics,
    control: &ArmMetrics,
    config: &AnalysisConfig,
) -> Result<ErrorRateComparison, AnalysisError> {
    let outcome = compare_proportions(
        test.errors.erroneous_sessions,
        test.errors.total_sessions,
        control.errors.erroneous_sessions,
        control.errors.total_sessions,
    )?;
    Ok(ErrorRateComparison {
        test: outcome,
        significant: outcome.is_significant(config.alpha),
    })
}

/// t-test of every configured client attribute between arms
pub fn compare_attributes(
    profiles: &[ClientProfile],
    config: &AnalysisConfig,
) -> Result<Vec<AttributeComparison>, AnalysisError> {
    config
        .attributes
        .iter()
        .map(|&attribute| {
            let test: Vec<f64> = values_for(profiles, Arm::Test, |p| attribute.value(p));
            let control: Vec<f64> = values_for(profiles, Arm::Control, |p| attribute.value(p));
            let outcome = compare_means(&test, &control)?;
            Ok(AttributeComparison {
                attribute,
                test_mean: mean(&test),
                control_mean: mean(&control),
                test: outcome,
                significant: outcome.is_significant(config.alpha),
            })
        })
        .collect()
}

/// Client counts, attribute means and gender mix per arm
pub fn summarize_profiles(
    profiles: &[ClientProfile],
    config: &AnalysisConfig,
) -> Vec<ProfileSummary> {
    [Arm::Test, Arm::Control]
        .into_iter()
        .filter_map(|arm| {
            let clients: Vec<&ClientProfile> = profiles.iter().filter(|p| p.arm == arm).collect();
            if clients.is_empty() {
                return None;
            }

            let attribute_means = config
                .attributes
                .iter()
                .map(|&attribute| {
                    let values: Vec<f64> = clients.iter().map(|p| attribute.value(p)).collect();
                    (attribute, mean(&values))
                })
                .collect();

            let mut gender_counts: BTreeMap<String, usize> = BTreeMap::new();
            for profile in &clients {
                *gender_counts.entry(profile.gender.clone()).or_insert(0) += 1;
            }

            Some(ProfileSummary {
                arm,
                clients: clients.len(),
                attribute_means,
                gender_counts,
            })
        })
        .collect()
}

/// Visit balance between arms and the span of the event log
pub fn experiment_health(events: &[Event]) -> Result<ExperimentHealth, AnalysisError> {
    let first = events
        .iter()
        .map(|e| e.timestamp)
        .min()
        .ok_or_else(|| AnalysisError::EmptyInput("no events in experiment".to_string()))?;
    let last = events.iter().map(|e| e.timestamp).max().unwrap_or(first);

    let mut visits: BTreeMap<Arm, BTreeSet<&str>> = BTreeMap::new();
    for event in events {
        visits.entry(event.arm).or_default().insert(event.visit_id.as_str());
    }
    let test_visits = visits.get(&Arm::Test).map_or(0, BTreeSet::len);
    let control_visits = visits.get(&Arm::Control).map_or(0, BTreeSet::len);

    let total = (test_visits + control_visits) as f64;
    let balance = (test_visits as f64 - control_visits as f64).abs() / (total / 2.0);

    Ok(ExperimentHealth {
        test_visits,
        control_visits,
        balance,
        first_event_utc: first.to_rfc3339(),
        last_event_utc: last.to_rfc3339(),
        duration_days: (last - first).num_days(),
    })
}

fn values_for(profiles: &[ClientProfile], arm: Arm, f: impl Fn(&ClientProfile) -> f64) -> Vec<f64> {
    profiles.iter().filter(|p| p.arm == arm).map(f).collect()
}
