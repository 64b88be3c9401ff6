//! Funnel metrics engine
//!
//! Computes, for the events of a single experiment arm:
//! - Completion rate (`confirm` events per visit)
//! - Mean transition time per step pair, and the total journey estimate
//! - Error rate (sessions with backward navigation)
//!
//! Every function is a pure read over an immutable slice and fails closed when
//! the slice mixes experiment arms.

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::types::{
    Arm, ArmMetrics, CompletionSummary, ErrorRateSummary, Event, ProcessStep, StepDuration,
    StepDurations, StepPair,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Engine bundling the three funnel metrics for one arm
pub struct FunnelEngine;

impl FunnelEngine {
    /// Compute all funnel metrics for one arm's events
    pub fn evaluate(events: &[Event], config: &AnalysisConfig) -> Result<ArmMetrics, AnalysisError> {
        let arm = single_arm(events)?;
        let completion = completion_rate(events)?;
        let durations = mean_step_durations(events, &config.step_pairs)?;
        let errors = error_rate(events)?;

        debug!(
            arm = %arm,
            sessions = completion.total_sessions,
            completion_rate = completion.rate,
            error_rate = errors.rate,
            "evaluated funnel"
        );

        Ok(ArmMetrics {
            arm,
            completion,
            durations,
            errors,
        })
    }
}

/// `confirm` events over distinct visits.
///
/// Repeated confirms within one visit all count; `completed_sessions` keeps
/// the distinct-visit tally.
pub fn completion_rate(events: &[Event]) -> Result<CompletionSummary, AnalysisError> {
    single_arm(events)?;

    let mut visits: BTreeSet<&str> = BTreeSet::new();
    let mut completed: BTreeSet<&str> = BTreeSet::new();
    let mut confirm_events = 0;

    for event in events {
        visits.insert(event.visit_id.as_str());
        if event.process_step == ProcessStep::Confirm {
            completed.insert(event.visit_id.as_str());
            confirm_events += 1;
        }
    }

    if confirm_events > visits.len() {
        return Err(AnalysisError::DegenerateInput(format!(
            "{} confirm events across only {} visits",
            confirm_events,
            visits.len()
        )));
    }

    Ok(CompletionSummary {
        completed_sessions: completed.len(),
        total_sessions: visits.len(),
        confirm_events,
        rate: confirm_events as f64 / visits.len() as f64,
    })
}

/// Mean transition time for every pair, plus their sum as the journey total
pub fn mean_step_durations(
    events: &[Event],
    step_pairs: &[StepPair],
) -> Result<StepDurations, AnalysisError> {
    single_arm(events)?;

    let mut pairs = Vec::with_capacity(step_pairs.len());
    let mut total_mean_seconds = 0.0;

    for &pair in step_pairs {
        let duration = mean_transition_duration(events, pair)?;
        total_mean_seconds += duration.mean_seconds;
        pairs.push(duration);
    }

    Ok(StepDurations {
        pairs,
        total_mean_seconds,
    })
}

/// Mean time between `pair.from` and `pair.to` across visits.
///
/// Events are reduced to the two steps of the pair before ordering, so
/// adjacency is judged inside that filtered subsequence rather than the full
/// session: `from, step_x, to` still counts, while `from, to, to` only counts
/// its first transition.
pub fn mean_transition_duration(
    events: &[Event],
    pair: StepPair,
) -> Result<StepDuration, AnalysisError> {
    single_arm(events)?;

    let mut by_visit: BTreeMap<&str, Vec<&Event>> = BTreeMap::new();
    for event in events
        .iter()
        .filter(|e| e.process_step == pair.from || e.process_step == pair.to)
    {
        by_visit.entry(event.visit_id.as_str()).or_default().push(event);
    }

    let mut total_nanos: i128 = 0;
    let mut transitions = 0usize;

    for visit_events in by_visit.values_mut() {
        // Stable: equal timestamps keep input order
        visit_events.sort_by_key(|e| e.timestamp);

        for w in visit_events.windows(2) {
            let (prev, curr) = (w[0], w[1]);
            if prev.process_step == pair.from && curr.process_step == pair.to {
                let delta = curr.timestamp - prev.timestamp;
                total_nanos += delta
                    .num_nanoseconds()
                    .map(i128::from)
                    .unwrap_or_else(|| i128::from(delta.num_milliseconds()) * 1_000_000);
                transitions += 1;
            }
        }
    }

    if transitions == 0 {
        return Err(AnalysisError::NoData {
            from: pair.from,
            to: pair.to,
        });
    }

    let mean_seconds = (total_nanos as f64 / transitions as f64) / 1e9;
    debug!(pair = %pair, transitions, mean_seconds, "measured transition");

    Ok(StepDuration {
        pair,
        mean_seconds,
        transitions,
    })
}

/// Fraction of sessions with at least one backward step
pub fn error_rate(events: &[Event]) -> Result<ErrorRateSummary, AnalysisError> {
    single_arm(events)?;

    let mut sessions: BTreeMap<(u64, &str), Vec<&Event>> = BTreeMap::new();
    for event in events {
        sessions
            .entry((event.client_id, event.visit_id.as_str()))
            .or_default()
            .push(event);
    }

    let mut erroneous_sessions = 0;
    let mut backward_by_step: BTreeMap<ProcessStep, usize> = BTreeMap::new();

    for session in sessions.values_mut() {
        session.sort_by_key(|e| e.timestamp);

        let mut erroneous = false;
        for w in session.windows(2) {
            if w[1].process_step.rank() - w[0].process_step.rank() < 0 {
                erroneous = true;
                *backward_by_step.entry(w[1].process_step).or_insert(0) += 1;
            }
        }
        if erroneous {
            erroneous_sessions += 1;
        }
    }

    Ok(ErrorRateSummary {
        erroneous_sessions,
        total_sessions: sessions.len(),
        rate: erroneous_sessions as f64 / sessions.len() as f64,
        backward_by_step,
    })
}

/// Split events into per-arm sets, preserving input order
pub fn partition_by_arm(events: &[Event]) -> BTreeMap<Arm, Vec<Event>> {
    let mut by_arm: BTreeMap<Arm, Vec<Event>> = BTreeMap::new();
    for event in events {
        by_arm.entry(event.arm).or_default().push(event.clone());
    }
    by_arm
}

/// The arm shared by every event; empty or mixed input is rejected
fn single_arm(events: &[Event]) -> Result<Arm, AnalysisError> {
    let first = events
        .first()
        .ok_or_else(|| AnalysisError::EmptyInput("no sessions in event set".to_string()))?;

    if let Some(other) = events.iter().find(|e| e.arm != first.arm) {
        return Err(AnalysisError::Schema(format!(
            "event set mixes experiment groups {} and {} (visit {})",
            first.arm, other.arm, other.visit_id
        )));
    }

    Ok(first.arm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 4, 17, 15, 0, 0).unwrap()
    }

    fn ev(client_id: u64, visit: &str, step: ProcessStep, secs: i64) -> Event {
        Event {
            client_id,
            visitor_id: format!("visitor-{}", client_id),
            visit_id: visit.to_string(),
            process_step: step,
            timestamp: t0() + Duration::seconds(secs),
            arm: Arm::Test,
        }
    }

    fn sample_events() -> Vec<Event> {
        use ProcessStep::*;
        vec![
            // Complete, no errors
            ev(1, "v1", Start, 0),
            ev(1, "v1", Step1, 30),
            ev(1, "v1", Step2, 90),
            ev(1, "v1", Step3, 150),
            ev(1, "v1", Confirm, 200),
            // Backtracks step_2 -> step_1, never confirms
            ev(2, "v2", Start, 0),
            ev(2, "v2", Step1, 50),
            ev(2, "v2", Step2, 100),
            ev(2, "v2", Step1, 120),
            // Confirms twice
            ev(3, "v3", Start, 0),
            ev(3, "v3", Step1, 10),
            ev(3, "v3", Step2, 20),
            ev(3, "v3", Step3, 30),
            ev(3, "v3", Confirm, 40),
            ev(3, "v3", Confirm, 60),
        ]
    }

    #[test]
    fn test_completion_rate() {
        let summary = completion_rate(&sample_events()).unwrap();
        assert_eq!(summary.total_sessions, 3);
        assert_eq!(summary.completed_sessions, 2);
        assert_eq!(summary.confirm_events, 3);
        assert_eq!(summary.rate, 1.0);
    }

    #[test]
    fn test_completion_rate_counts_repeated_confirms() {
        use ProcessStep::*;
        let events = vec![
            ev(1, "a", Start, 0),
            ev(1, "a", Confirm, 10),
            ev(1, "a", Confirm, 20),
            ev(2, "b", Start, 0),
        ];
        let summary = completion_rate(&events).unwrap();
        assert_eq!(summary.completed_sessions, 1);
        assert_eq!(summary.confirm_events, 2);
        assert_eq!(summary.rate, 1.0);
    }

    #[test]
    fn test_completion_rate_more_confirms_than_visits() {
        use ProcessStep::*;
        let events = vec![ev(1, "a", Confirm, 0), ev(1, "a", Confirm, 5)];
        assert!(matches!(
            completion_rate(&events),
            Err(AnalysisError::DegenerateInput(_))
        ));
    }

    #[test]
    fn test_completion_rate_empty_input() {
        assert!(matches!(
            completion_rate(&[]),
            Err(AnalysisError::EmptyInput(_))
        ));
    }

    #[test]
    fn test_rates_stay_within_bounds() {
        use ProcessStep::*;
        let cases = vec![
            sample_events(),
            vec![ev(1, "a", Start, 0)],
            vec![ev(1, "a", Confirm, 0), ev(1, "a", Start, 5)],
            vec![ev(1, "a", Confirm, 0), ev(1, "a", Confirm, 5), ev(2, "b", Start, 0)],
        ];
        for events in cases {
            let completion = completion_rate(&events).unwrap();
            let errors = error_rate(&events).unwrap();
            assert!((0.0..=1.0).contains(&completion.rate));
            assert!((0.0..=1.0).contains(&errors.rate));
        }
    }

    #[test]
    fn test_mixed_arms_rejected() {
        let mut events = sample_events();
        events[3].arm = Arm::Control;
        assert!(matches!(completion_rate(&events), Err(AnalysisError::Schema(_))));
        assert!(matches!(error_rate(&events), Err(AnalysisError::Schema(_))));
        assert!(matches!(
            mean_step_durations(&events, &StepPair::funnel()),
            Err(AnalysisError::Schema(_))
        ));
    }

    #[test]
    fn test_backward_navigation_detected() {
        use ProcessStep::*;
        let events = vec![
            ev(7, "s", Start, 0),
            ev(7, "s", Step1, 10),
            ev(7, "s", Step2, 20),
            ev(7, "s", Step1, 30),
        ];
        let summary = error_rate(&events).unwrap();
        assert_eq!(summary.erroneous_sessions, 1);
        assert_eq!(summary.total_sessions, 1);
        assert_eq!(summary.rate, 1.0);
        assert_eq!(summary.backward_by_step.get(&Step1), Some(&1));
    }

    #[test]
    fn test_error_rate_orders_by_timestamp() {
        use ProcessStep::*;
        // Arrives out of order but is forward-only once sorted
        let events = vec![
            ev(1, "s", Step2, 20),
            ev(1, "s", Start, 0),
            ev(1, "s", Step1, 10),
        ];
        let summary = error_rate(&events).unwrap();
        assert_eq!(summary.erroneous_sessions, 0);
        assert!(summary.backward_by_step.is_empty());
    }

    #[test]
    fn test_error_rate_sessions_keyed_by_client_and_visit() {
        use ProcessStep::*;
        // Same visit id under two clients is two sessions
        let events = vec![
            ev(1, "shared", Step2, 0),
            ev(2, "shared", Step1, 5),
        ];
        let summary = error_rate(&events).unwrap();
        assert_eq!(summary.total_sessions, 2);
        assert_eq!(summary.erroneous_sessions, 0);
    }

    #[test]
    fn test_error_rate_sample() {
        let summary = error_rate(&sample_events()).unwrap();
        assert_eq!(summary.erroneous_sessions, 1);
        assert_eq!(summary.total_sessions, 3);
        let expected: BTreeMap<ProcessStep, usize> =
            [(ProcessStep::Step1, 1)].into_iter().collect();
        assert_eq!(summary.backward_by_step, expected);
    }

    #[test]
    fn test_mean_duration_two_sessions() {
        use ProcessStep::*;
        let events = vec![
            ev(1, "a", Start, 0),
            ev(1, "a", Step1, 60),
            ev(2, "b", Start, 0),
            ev(2, "b", Step1, 120),
        ];
        let d = mean_transition_duration(&events, StepPair::new(Start, Step1)).unwrap();
        assert_eq!(d.mean_seconds, 90.0);
        assert_eq!(d.transitions, 2);
        assert_eq!(d.mean(), Duration::seconds(90));
    }

    #[test]
    fn test_mean_duration_uses_filtered_adjacency() {
        use ProcessStep::*;
        // step_1 sits between start and step_2; the (start, step_2) pair still
        // measures start -> step_2 because step_1 is filtered out first
        let events = vec![
            ev(1, "a", Start, 0),
            ev(1, "a", Step1, 40),
            ev(1, "a", Step2, 100),
        ];
        let d = mean_transition_duration(&events, StepPair::new(Start, Step2)).unwrap();
        assert_eq!(d.mean_seconds, 100.0);
    }

    #[test]
    fn test_mean_duration_repeated_target_counts_once() {
        use ProcessStep::*;
        let events = vec![
            ev(1, "a", Start, 0),
            ev(1, "a", Step1, 30),
            ev(1, "a", Step1, 300),
        ];
        let d = mean_transition_duration(&events, StepPair::new(Start, Step1)).unwrap();
        assert_eq!(d.transitions, 1);
        assert_eq!(d.mean_seconds, 30.0);
    }

    #[test]
    fn test_mean_duration_no_data() {
        use ProcessStep::*;
        let events = vec![ev(1, "a", Start, 0), ev(2, "b", Step1, 10)];
        let err = mean_transition_duration(&events, StepPair::new(Start, Step1)).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::NoData {
                from: Start,
                to: Step1
            }
        ));
    }

    #[test]
    fn test_mean_step_durations_total() {
        let durations = mean_step_durations(&sample_events(), &StepPair::funnel()).unwrap();
        assert_eq!(durations.pairs.len(), 4);

        // start->step_1: 30, 50, 10
        let first = durations
            .get(StepPair::new(ProcessStep::Start, ProcessStep::Step1))
            .unwrap();
        assert!((first.mean_seconds - 30.0).abs() < 1e-9);

        // step_3->confirm: v1 50, v3 10 (second confirm follows a confirm)
        let last = durations
            .get(StepPair::new(ProcessStep::Step3, ProcessStep::Confirm))
            .unwrap();
        assert_eq!(last.transitions, 2);
        assert!((last.mean_seconds - 30.0).abs() < 1e-9);

        let sum: f64 = durations.pairs.iter().map(|d| d.mean_seconds).sum();
        assert!((durations.total_mean_seconds - sum).abs() < 1e-9);
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let events = sample_events();
        let config = AnalysisConfig::default();
        let first = FunnelEngine::evaluate(&events, &config).unwrap();
        let second = FunnelEngine::evaluate(&events, &config).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.arm, Arm::Test);
    }

    #[test]
    fn test_partition_by_arm() {
        let mut events = sample_events();
        events[0].arm = Arm::Control;
        let parts = partition_by_arm(&events);
        assert_eq!(parts[&Arm::Control].len(), 1);
        assert_eq!(parts[&Arm::Test].len(), events.len() - 1);
    }
}
