//! Dataset loader
//!
//! Reads the roster, demographics and web log partitions, cleans them and joins
//! them on `client_id` so that every event and profile carries its arm.

use crate::error::AnalysisError;
use crate::schema::raw_record::{CleanEventRow, DemographicsRow, RosterRow, WebLogRow};
use crate::types::{Arm, ClientProfile, Event};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Locations of the four source tables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetPaths {
    pub roster: PathBuf,
    pub demographics: PathBuf,
    /// Web log partitions, concatenated in order
    pub web_logs: Vec<PathBuf>,
}

/// Row accounting for one load
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadStats {
    pub roster_rows: usize,
    /// Roster rows without an experiment group
    pub roster_unassigned: usize,
    pub demographics_rows: usize,
    /// Demographic rows with a missing field
    pub demographics_incomplete: usize,
    /// Complete demographic rows whose client is not on the roster
    pub demographics_unassigned: usize,
    pub web_rows: usize,
    /// Web rows whose client has no profile
    pub web_unassigned: usize,
    /// Exact duplicate web rows
    pub web_duplicates: usize,
    pub clients: usize,
    pub events: usize,
}

/// Cleaned, joined tables ready for analysis
#[derive(Debug, Clone)]
pub struct ExperimentDataset {
    pub profiles: Vec<ClientProfile>,
    pub events: Vec<Event>,
    pub stats: LoadStats,
}

/// Loader for the experiment tables
pub struct DatasetLoader;

impl DatasetLoader {
    /// Load and join all tables from disk
    pub fn load(paths: &DatasetPaths) -> Result<ExperimentDataset, AnalysisError> {
        if paths.web_logs.is_empty() {
            return Err(AnalysisError::EmptyInput(
                "no web log partitions given".to_string(),
            ));
        }

        let roster = open(&paths.roster)?;
        let demographics = open(&paths.demographics)?;
        let web_logs = paths
            .web_logs
            .iter()
            .map(|p| open(p))
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_readers(roster, demographics, web_logs)
    }

    /// Load and join all tables from readers
    pub fn from_readers<R1, R2, R3>(
        roster: R1,
        demographics: R2,
        web_logs: impl IntoIterator<Item = R3>,
    ) -> Result<ExperimentDataset, AnalysisError>
    where
        R1: Read,
        R2: Read,
        R3: Read,
    {
        let mut stats = LoadStats::default();

        let arms = Self::read_roster(roster, &mut stats)?;
        let profiles = Self::read_profiles(demographics, &arms, &mut stats)?;

        let profile_arms: HashMap<u64, Arm> =
            profiles.iter().map(|p| (p.client_id, p.arm)).collect();
        let events = Self::read_events(web_logs, &profile_arms, &mut stats)?;
        Self::validate_session_arms(&events)?;

        stats.clients = profiles.len();
        stats.events = events.len();
        info!(
            clients = stats.clients,
            events = stats.events,
            "loaded experiment dataset"
        );

        Ok(ExperimentDataset {
            profiles,
            events,
            stats,
        })
    }

    /// Read the roster into a client → arm map, dropping unassigned clients
    pub fn read_roster<R: Read>(
        reader: R,
        stats: &mut LoadStats,
    ) -> Result<BTreeMap<u64, Arm>, AnalysisError> {
        let mut arms: BTreeMap<u64, Arm> = BTreeMap::new();

        for row in csv_reader(reader).deserialize::<RosterRow>() {
            let row = row?;
            stats.roster_rows += 1;

            let Some(arm) = row.arm()? else {
                stats.roster_unassigned += 1;
                continue;
            };

            match arms.get(&row.client_id) {
                Some(existing) if *existing != arm => {
                    return Err(AnalysisError::Schema(format!(
                        "client {} assigned to both {} and {}",
                        row.client_id, existing, arm
                    )));
                }
                Some(_) => {}
                None => {
                    arms.insert(row.client_id, arm);
                }
            }
        }

        if stats.roster_unassigned > 0 {
            warn!(
                dropped = stats.roster_unassigned,
                "dropped roster rows without an experiment group"
            );
        }
        debug!(clients = arms.len(), "read roster");
        Ok(arms)
    }

    /// Read demographics, keep complete rows and join the arm from the roster
    pub fn read_profiles<R: Read>(
        reader: R,
        arms: &BTreeMap<u64, Arm>,
        stats: &mut LoadStats,
    ) -> Result<Vec<ClientProfile>, AnalysisError> {
        let mut profiles: Vec<ClientProfile> = Vec::new();
        let mut index: HashMap<u64, usize> = HashMap::new();

        for row in csv_reader(reader).deserialize::<DemographicsRow>() {
            let row: DemographicsRow = row?;
            stats.demographics_rows += 1;

            let client_id = row.client_id;
            let Some(&arm) = arms.get(&client_id) else {
                if is_complete(&row) {
                    stats.demographics_unassigned += 1;
                } else {
                    stats.demographics_incomplete += 1;
                }
                continue;
            };

            let Some(profile) = row.into_profile(arm) else {
                stats.demographics_incomplete += 1;
                continue;
            };

            match index.get(&client_id) {
                Some(&i) if profiles[i] != profile => {
                    return Err(AnalysisError::Schema(format!(
                        "conflicting demographic rows for client {}",
                        client_id
                    )));
                }
                Some(_) => {}
                None => {
                    index.insert(client_id, profiles.len());
                    profiles.push(profile);
                }
            }
        }

        if stats.demographics_incomplete > 0 {
            warn!(
                dropped = stats.demographics_incomplete,
                "dropped demographic rows with missing fields"
            );
        }
        if stats.demographics_unassigned > 0 {
            warn!(
                dropped = stats.demographics_unassigned,
                "dropped demographic rows for clients outside the experiment"
            );
        }
        debug!(profiles = profiles.len(), "read demographics");
        Ok(profiles)
    }

    /// Concatenate web log partitions, join arms and drop duplicates
    pub fn read_events<R: Read>(
        partitions: impl IntoIterator<Item = R>,
        arms: &HashMap<u64, Arm>,
        stats: &mut LoadStats,
    ) -> Result<Vec<Event>, AnalysisError> {
        let mut events: Vec<Event> = Vec::new();
        let mut seen: HashSet<WebLogRow> = HashSet::new();

        for (partition, reader) in partitions.into_iter().enumerate() {
            let before = stats.web_rows;
            for row in csv_reader(reader).deserialize::<WebLogRow>() {
                let row: WebLogRow = row?;
                stats.web_rows += 1;

                let Some(&arm) = arms.get(&row.client_id) else {
                    stats.web_unassigned += 1;
                    continue;
                };

                if !seen.insert(row.clone()) {
                    stats.web_duplicates += 1;
                    continue;
                }

                events.push(row.into_event(arm)?);
            }
            debug!(partition, rows = stats.web_rows - before, "read web log partition");
        }

        if stats.web_unassigned > 0 {
            warn!(
                dropped = stats.web_unassigned,
                "dropped web events for clients without a profile"
            );
        }
        if stats.web_duplicates > 0 {
            warn!(dropped = stats.web_duplicates, "dropped duplicate web events");
        }
        Ok(events)
    }

    /// Reject sessions, keyed by (client_id, visit_id), whose events span more than one arm
    pub fn validate_session_arms(events: &[Event]) -> Result<(), AnalysisError> {
        let mut session_arms: HashMap<(u64, &str), Arm> = HashMap::new();
        for event in events {
            let arm = *session_arms
                .entry((event.client_id, event.visit_id.as_str()))
                .or_insert(event.arm);
            if arm != event.arm {
                return Err(AnalysisError::Schema(format!(
                    "visit {} of client {} has events from both {} and {}",
                    event.visit_id, event.client_id, arm, event.arm
                )));
            }
        }
        Ok(())
    }

    /// Write cleaned profiles as CSV
    pub fn write_profiles_csv<W: Write>(
        profiles: &[ClientProfile],
        writer: W,
    ) -> Result<(), AnalysisError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for profile in profiles {
            csv_writer.serialize(profile)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Write cleaned events as CSV, in the web log timestamp layout
    pub fn write_events_csv<W: Write>(events: &[Event], writer: W) -> Result<(), AnalysisError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for event in events {
            csv_writer.serialize(CleanEventRow::from(event))?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Write both cleaned tables into a directory
    pub fn export(dataset: &ExperimentDataset, dir: &Path) -> Result<(), AnalysisError> {
        std::fs::create_dir_all(dir)?;
        Self::write_profiles_csv(&dataset.profiles, File::create(dir.join(PROFILES_FILE))?)?;
        Self::write_events_csv(&dataset.events, File::create(dir.join(EVENTS_FILE))?)?;
        info!(dir = %dir.display(), "exported cleaned tables");
        Ok(())
    }
}

/// File name of the exported profile table
pub const PROFILES_FILE: &str = "client_profiles.csv";

/// File name of the exported event table
pub const EVENTS_FILE: &str = "web_events.csv";

fn open(path: &Path) -> Result<File, AnalysisError> {
    File::open(path).map_err(|e| {
        AnalysisError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", path.display(), e),
        ))
    })
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader)
}

fn is_complete(row: &DemographicsRow) -> bool {
    row.clnt_tenure_yr.is_some()
        && row.clnt_age.is_some()
        && row.gendr.as_deref().is_some_and(|g| !g.trim().is_empty())
        && row.num_accts.is_some()
        && row.bal.is_some()
        && row.calls_6_mnth.is_some()
        && row.logons_6_mnth.is_some()
}
