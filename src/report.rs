//! Report encoding
//!
//! Stamps experiment results with producer metadata and renders them as JSON
//! or as a plain-text summary.

use crate::error::AnalysisError;
use crate::types::{ArmMetrics, ExperimentReport, ReportProducer};
use crate::{PRODUCER_NAME, VERSION};
use chrono::Utc;
use std::fmt::Write as _;
use uuid::Uuid;

/// Encoder producing experiment reports
pub struct ReportEncoder {
    instance_id: String,
}

impl Default for ReportEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    /// Producer metadata for a report computed now
    pub fn producer(&self) -> ReportProducer {
        ReportProducer {
            name: PRODUCER_NAME.to_string(),
            version: VERSION.to_string(),
            instance_id: self.instance_id.clone(),
            computed_at_utc: Utc::now().to_rfc3339(),
        }
    }

    pub fn encode_to_json(&self, report: &ExperimentReport) -> Result<String, AnalysisError> {
        Ok(serde_json::to_string(report)?)
    }

    pub fn encode_to_json_pretty(&self, report: &ExperimentReport) -> Result<String, AnalysisError> {
        Ok(serde_json::to_string_pretty(report)?)
    }
}

/// Format seconds as `Xm Ys`, minutes including whole hours
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).trunc() as u64;
    format!("{}m {}s", total / 60, total % 60)
}

fn pct(rate: f64) -> String {
    format!("{:.2}%", rate * 100.0)
}

fn verdict(significant: bool) -> &'static str {
    if significant {
        "reject H0"
    } else {
        "fail to reject H0"
    }
}

/// Render the report as plain text
pub fn render_text(report: &ExperimentReport) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail
    let _ = write_text(&mut out, report);
    out
}

fn write_text(out: &mut String, report: &ExperimentReport) -> std::fmt::Result {
    writeln!(out, "Experiment Report")?;
    writeln!(out, "=================")?;
    writeln!(
        out,
        "Producer: {} {} ({})",
        report.producer.name, report.producer.version, report.producer.computed_at_utc
    )?;

    writeln!(out, "\nCompletion rate")?;
    for arm in [&report.test, &report.control] {
        writeln!(
            out,
            "  {:<8} {} ({} confirms over {} visits; {} visits completed)",
            arm.arm.as_str(),
            pct(arm.completion.rate),
            arm.completion.confirm_events,
            arm.completion.total_sessions,
            arm.completion.completed_sessions
        )?;
    }

    writeln!(out, "\nMean time per step")?;
    for pair in &report.test.durations.pairs {
        let control = report
            .control
            .durations
            .get(pair.pair)
            .map(|d| format_duration(d.mean_seconds))
            .unwrap_or_else(|| "no data".to_string());
        writeln!(
            out,
            "  {:<20} Test {:>8}   Control {:>8}",
            pair.pair.to_string(),
            format_duration(pair.mean_seconds),
            control
        )?;
    }
    writeln!(
        out,
        "  {:<20} Test {:>8}   Control {:>8}",
        "total journey",
        format_duration(report.test.durations.total_mean_seconds),
        format_duration(report.control.durations.total_mean_seconds)
    )?;

    writeln!(out, "\nError rate (sessions with backward steps)")?;
    for arm in [&report.test, &report.control] {
        write_errors(out, arm)?;
    }

    let c = &report.completion;
    writeln!(out, "\nCompletion rate test")?;
    writeln!(
        out,
        "  z = {:.2}, p = {:.4} -> {} at alpha {}",
        c.test.statistic,
        c.test.p_value,
        verdict(c.significant),
        c.alpha
    )?;
    writeln!(
        out,
        "  Test {} vs Control + threshold {} -> {}",
        pct(report.test.completion.rate),
        pct(c.adjusted_control_rate),
        if c.exceeds_threshold { "exceeds" } else { "does not exceed" }
    )?;
    writeln!(
        out,
        "  Redesign cost-effective: {}",
        if c.cost_effective { "yes" } else { "no" }
    )?;

    let e = &report.error_rate;
    writeln!(out, "\nError rate test")?;
    writeln!(
        out,
        "  z = {:.2}, p = {:.4} -> {}",
        e.test.statistic,
        e.test.p_value,
        verdict(e.significant)
    )?;

    writeln!(out, "\nClient attributes (t-test)")?;
    for a in &report.attributes {
        writeln!(
            out,
            "  {:<20} Test {:>12.3}   Control {:>12.3}   t = {:>7.3}, p = {:.3} -> {}",
            a.attribute.as_str(),
            a.test_mean,
            a.control_mean,
            a.test.statistic,
            a.test.p_value,
            verdict(a.significant)
        )?;
    }

    writeln!(out, "\nClients")?;
    for summary in &report.profiles {
        let genders: Vec<String> = summary
            .gender_counts
            .iter()
            .map(|(g, n)| format!("{}={}", g, n))
            .collect();
        writeln!(
            out,
            "  {:<8} {} clients ({})",
            summary.arm.as_str(),
            summary.clients,
            genders.join(", ")
        )?;
    }

    let h = &report.health;
    writeln!(out, "\nExperiment health")?;
    writeln!(
        out,
        "  Visits: Test {}, Control {} (balance {:.2})",
        h.test_visits, h.control_visits, h.balance
    )?;
    writeln!(
        out,
        "  Duration: {} days ({} to {})",
        h.duration_days, h.first_event_utc, h.last_event_utc
    )?;
    Ok(())
}

fn write_errors(out: &mut String, arm: &ArmMetrics) -> std::fmt::Result {
    let by_step: Vec<String> = arm
        .errors
        .backward_by_step
        .iter()
        .map(|(step, n)| format!("{}={}", step, n))
        .collect();
    writeln!(
        out,
        "  {:<8} {} ({} of {} sessions; back to {})",
        arm.arm.as_str(),
        pct(arm.errors.rate),
        arm.errors.erroneous_sessions,
        arm.errors.total_sessions,
        if by_step.is_empty() {
            "none".to_string()
        } else {
            by_step.join(", ")
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(59.9), "0m 59s");
        assert_eq!(format_duration(3725.0), "62m 5s");
        assert_eq!(format_duration(-3.0), "0m 0s");
    }

    #[test]
    fn test_producer_metadata() {
        let encoder = ReportEncoder::with_instance_id("fixed-id".to_string());
        let producer = encoder.producer();
        assert_eq!(producer.name, PRODUCER_NAME);
        assert_eq!(producer.version, VERSION);
        assert_eq!(producer.instance_id, "fixed-id");
    }

    #[test]
    fn test_unique_instance_ids() {
        assert_ne!(
            ReportEncoder::new().producer().instance_id,
            ReportEncoder::new().producer().instance_id
        );
    }
}
