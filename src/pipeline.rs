//! Pipeline orchestration
//!
//! This module provides the public API for funnelscope.
//! It runs the full evaluation from source tables to the experiment report.

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::experiment::{
    compare_attributes, compare_error_rates, evaluate_redesign, experiment_health,
    summarize_profiles,
};
use crate::funnel::{partition_by_arm, FunnelEngine};
use crate::report::ReportEncoder;
use crate::schema::{DatasetLoader, DatasetPaths, ExperimentDataset};
use crate::types::{Arm, ExperimentReport};
use tracing::info;

/// Load the source tables and evaluate the experiment.
///
/// Pipeline stages:
/// 1. DatasetLoader - Clean and join roster, demographics and web logs
/// 2. FunnelEngine - Completion, step durations and error rate per arm
/// 3. Hypothesis tests - Completion, error rate and client attributes
/// 4. ReportEncoder - Stamp producer metadata
pub fn analyze_experiment(
    paths: &DatasetPaths,
    config: &AnalysisConfig,
) -> Result<ExperimentReport, AnalysisError> {
    config.validate()?;
    let dataset = DatasetLoader::load(paths)?;
    analyze_dataset(&dataset, config, &ReportEncoder::new())
}

/// Evaluate an already loaded dataset
pub fn analyze_dataset(
    dataset: &ExperimentDataset,
    config: &AnalysisConfig,
    encoder: &ReportEncoder,
) -> Result<ExperimentReport, AnalysisError> {
    let by_arm = partition_by_arm(&dataset.events);
    let arm_events = |arm: Arm| {
        by_arm.get(&arm).ok_or_else(|| {
            AnalysisError::EmptyInput(format!("no events for the {} group", arm))
        })
    };

    let test = FunnelEngine::evaluate(arm_events(Arm::Test)?, config)?;
    let control = FunnelEngine::evaluate(arm_events(Arm::Control)?, config)?;

    let completion = evaluate_redesign(&test, &control, config)?;
    let error_rate = compare_error_rates(&test, &control, config)?;
    let attributes = compare_attributes(&dataset.profiles, config)?;
    let profiles = summarize_profiles(&dataset.profiles, config);
    let health = experiment_health(&dataset.events)?;

    info!(
        test_completion = test.completion.rate,
        control_completion = control.completion.rate,
        p_value = completion.test.p_value,
        cost_effective = completion.cost_effective,
        "evaluated experiment"
    );

    Ok(ExperimentReport {
        producer: encoder.producer(),
        test,
        control,
        completion,
        error_rate,
        attributes,
        profiles,
        health,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::render_text;
    use crate::types::{ProcessStep, StepPair};
    use std::fmt::Write as _;

    /// Two arms of 40 clients; Test completes more often and backtracks more
    fn sample_tables() -> (String, String, String) {
        let mut roster = String::from("client_id,Variation\n");
        let mut demo = String::from(
            "client_id,clnt_tenure_yr,clnt_tenure_mnth,clnt_age,gendr,num_accts,bal,calls_6_mnth,logons_6_mnth\n",
        );
        let mut web = String::from("client_id,visitor_id,visit_id,process_step,date_time\n");

        for id in 1..=80u64 {
            let test = id <= 40;
            let variation = if test { "Test" } else { "Control" };
            writeln!(roster, "{},{}", id, variation).unwrap();
            writeln!(
                demo,
                "{},{}.0,{}.0,{}.0,{},{}.0,{}.5,{}.0,{}.0",
                id,
                id % 20 + 1,
                (id % 20 + 1) * 12,
                25 + id % 50,
                if id % 2 == 0 { "F" } else { "M" },
                id % 3 + 1,
                10_000 + id * 997,
                id % 7,
                id % 9 + 3
            )
            .unwrap();

            let completes = if test { id % 10 < 8 } else { id % 10 < 5 };
            let backtracks = if test { id % 4 == 0 } else { id % 8 == 0 };
            let mut steps = vec!["start", "step_1", "step_2"];
            if backtracks {
                steps.push("step_1");
                steps.push("step_2");
            }
            steps.push("step_3");
            if completes {
                steps.push("confirm");
            }
            for (i, step) in steps.iter().enumerate() {
                writeln!(
                    web,
                    "{},vis-{},visit-{},{},2017-04-{:02} 10:{:02}:00",
                    id,
                    id,
                    id,
                    step,
                    1 + id % 28,
                    i * 2
                )
                .unwrap();
            }
        }
        (roster, demo, web)
    }

    fn sample_dataset() -> ExperimentDataset {
        let (roster, demo, web) = sample_tables();
        DatasetLoader::from_readers(roster.as_bytes(), demo.as_bytes(), vec![web.as_bytes()])
            .unwrap()
    }

    #[test]
    fn test_analyze_dataset() {
        let dataset = sample_dataset();
        let report = analyze_dataset(
            &dataset,
            &AnalysisConfig::default(),
            &ReportEncoder::with_instance_id("test".to_string()),
        )
        .unwrap();

        assert_eq!(report.test.completion.total_sessions, 40);
        assert_eq!(report.test.completion.completed_sessions, 32);
        assert_eq!(report.control.completion.completed_sessions, 20);
        assert!(report.completion.significant);
        assert!(report.completion.exceeds_threshold);
        assert!(report.completion.cost_effective);

        assert_eq!(report.test.errors.erroneous_sessions, 10);
        assert_eq!(report.control.errors.erroneous_sessions, 5);
        assert_eq!(
            report.test.errors.backward_by_step.get(&ProcessStep::Step1),
            Some(&10)
        );

        // start -> step_1 is always two minutes
        let first = report
            .test
            .durations
            .get(StepPair::new(ProcessStep::Start, ProcessStep::Step1))
            .unwrap();
        assert_eq!(first.mean_seconds, 120.0);

        assert_eq!(report.attributes.len(), 6);
        assert_eq!(report.profiles.len(), 2);
        assert_eq!(report.health.test_visits, 40);
        assert_eq!(report.health.balance, 0.0);
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let dataset = sample_dataset();
        let encoder = ReportEncoder::with_instance_id("fixed".to_string());
        let config = AnalysisConfig::default();
        let a = analyze_dataset(&dataset, &config, &encoder).unwrap();
        let b = analyze_dataset(&dataset, &config, &encoder).unwrap();

        assert_eq!(a.test, b.test);
        assert_eq!(a.control, b.control);
        assert_eq!(a.completion, b.completion);
        assert_eq!(a.attributes, b.attributes);
    }

    #[test]
    fn test_report_renders() {
        let dataset = sample_dataset();
        let encoder = ReportEncoder::new();
        let report = analyze_dataset(&dataset, &AnalysisConfig::default(), &encoder).unwrap();

        let text = render_text(&report);
        assert!(text.contains("Completion rate"));
        assert!(text.contains("Redesign cost-effective: yes"));
        assert!(text.contains("start -> step_1"));

        let json = encoder.encode_to_json(&report).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["producer"]["name"], "funnelscope");
        assert_eq!(value["test"]["arm"], "Test");
        assert_eq!(value["test"]["errors"]["backward_by_step"]["step_1"], 10);
    }

    #[test]
    fn test_single_arm_dataset_fails() {
        let mut dataset = sample_dataset();
        dataset.events.retain(|e| e.arm == Arm::Test);
        let result = analyze_dataset(&dataset, &AnalysisConfig::default(), &ReportEncoder::new());
        assert!(matches!(result, Err(AnalysisError::EmptyInput(_))));
    }

    #[test]
    fn test_missing_pair_fails_whole_analysis() {
        let dataset = sample_dataset();
        // Nobody ever goes from confirm back to start
        let config = AnalysisConfig {
            step_pairs: vec![StepPair::new(ProcessStep::Confirm, ProcessStep::Start)],
            ..Default::default()
        };
        let result = analyze_dataset(&dataset, &config, &ReportEncoder::new());
        assert!(matches!(result, Err(AnalysisError::NoData { .. })));
    }

    #[test]
    fn test_analyze_experiment_from_files() {
        let (roster, demo, web) = sample_tables();
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, body: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, body).unwrap();
            path
        };

        // Split the web log into two partitions at a line boundary
        let lines: Vec<&str> = web.lines().collect();
        let header = lines[0];
        let mid = lines.len() / 2;
        let pt1 = format!("{}\n", lines[..mid].join("\n"));
        let pt2 = format!("{}\n{}\n", header, lines[mid..].join("\n"));

        let paths = DatasetPaths {
            roster: write("roster.txt", &roster),
            demographics: write("demo.txt", &demo),
            web_logs: vec![write("web_pt_1.txt", &pt1), write("web_pt_2.txt", &pt2)],
        };

        let report = analyze_experiment(&paths, &AnalysisConfig::default()).unwrap();
        assert_eq!(report.test.completion.completed_sessions, 32);
        assert_eq!(report.control.completion.total_sessions, 40);
    }
}
