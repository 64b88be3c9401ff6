//! Source table rows
//!
//! Row layouts of the four delimited inputs, using the source column names.
//! Conversion into the typed records of [`crate::types`] happens here, once,
//! so nothing downstream sees the source naming.

use crate::error::AnalysisError;
use crate::types::{Arm, ClientProfile, Event, ProcessStep};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp layout of the web logs
pub const WEB_LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Experiment roster row (`client_id,Variation`)
#[derive(Debug, Clone, Deserialize)]
pub struct RosterRow {
    pub client_id: u64,
    #[serde(rename = "Variation")]
    pub variation: Option<String>,
}

impl RosterRow {
    /// The assigned arm, or `None` if the client was never assigned
    pub fn arm(&self) -> Result<Option<Arm>, AnalysisError> {
        match self.variation.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(label) => label.parse().map(Some),
        }
    }
}

/// Client demographics row
#[derive(Debug, Clone, Deserialize)]
pub struct DemographicsRow {
    pub client_id: u64,
    pub clnt_tenure_yr: Option<f64>,
    /// Redundant with `clnt_tenure_yr`; dropped at conversion
    pub clnt_tenure_mnth: Option<f64>,
    pub clnt_age: Option<f64>,
    pub gendr: Option<String>,
    pub num_accts: Option<f64>,
    pub bal: Option<f64>,
    pub calls_6_mnth: Option<f64>,
    pub logons_6_mnth: Option<f64>,
}

impl DemographicsRow {
    /// Build a profile when every retained field is present.
    ///
    /// Count fields are truncated to integers; six-monthly calls and logons
    /// are annualized.
    pub fn into_profile(self, arm: Arm) -> Option<ClientProfile> {
        let gender = self.gendr.filter(|g| !g.trim().is_empty())?;
        Some(ClientProfile {
            client_id: self.client_id,
            tenure_years: self.clnt_tenure_yr? as u32,
            age: self.clnt_age?,
            gender: gender.trim().to_string(),
            number_of_accounts: self.num_accts? as u32,
            balance: self.bal?,
            calls_per_year: (self.calls_6_mnth? as u32).saturating_mul(2),
            logons_per_year: (self.logons_6_mnth? as u32).saturating_mul(2),
            arm,
        })
    }
}

/// Web interaction log row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WebLogRow {
    pub client_id: u64,
    pub visitor_id: String,
    pub visit_id: String,
    pub process_step: String,
    pub date_time: String,
}

impl WebLogRow {
    /// Convert to a typed event for a client whose arm is known
    pub fn into_event(self, arm: Arm) -> Result<Event, AnalysisError> {
        let process_step: ProcessStep = self.process_step.parse()?;
        let timestamp = parse_timestamp(&self.date_time)?;
        Ok(Event {
            client_id: self.client_id,
            visitor_id: self.visitor_id,
            visit_id: self.visit_id,
            process_step,
            timestamp,
            arm,
        })
    }
}

/// Cleaned event row written by the exporter
#[derive(Debug, Clone, Serialize)]
pub struct CleanEventRow<'a> {
    pub client_id: u64,
    pub visitor_id: &'a str,
    pub visit_id: &'a str,
    pub process_step: &'static str,
    pub date_time: String,
    pub experiment_group: &'static str,
}

impl<'a> From<&'a Event> for CleanEventRow<'a> {
    fn from(event: &'a Event) -> Self {
        Self {
            client_id: event.client_id,
            visitor_id: &event.visitor_id,
            visit_id: &event.visit_id,
            process_step: event.process_step.as_str(),
            date_time: event.timestamp.format(WEB_LOG_TIME_FORMAT).to_string(),
            experiment_group: event.arm.as_str(),
        }
    }
}

/// Parse a web log timestamp (`YYYY-MM-DD HH:MM:SS`, or RFC 3339) as UTC
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, AnalysisError> {
    let value = value.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, WEB_LOG_TIME_FORMAT) {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AnalysisError::DateParse(format!("'{}': {}", value, e)))
}
