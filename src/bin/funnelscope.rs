//! funnelscope CLI - Command-line interface for funnelscope
//!
//! Commands:
//! - analyze: Evaluate the experiment and write the report
//! - validate: Load and check the source tables
//! - export: Write the cleaned, joined tables as CSV
//! - config: Print the default analysis configuration

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use funnelscope::report::{render_text, ReportEncoder};
use funnelscope::schema::{DatasetLoader, DatasetPaths, LoadStats};
use funnelscope::{analyze_dataset, AnalysisConfig, AnalysisError, PRODUCER_NAME, VERSION};

/// funnelscope - Funnel metrics and A/B-test evaluation
#[derive(Parser)]
#[command(name = "funnelscope")]
#[command(version = VERSION)]
#[command(about = "Evaluate a web process redesign experiment", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate the experiment and write the report
    Analyze {
        #[command(flatten)]
        dataset: DatasetArgs,

        /// Analysis configuration file (JSON); defaults apply to missing fields
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },

    /// Load and check the source tables
    Validate {
        #[command(flatten)]
        dataset: DatasetArgs,

        /// Output load statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write the cleaned, joined tables as CSV
    Export {
        #[command(flatten)]
        dataset: DatasetArgs,

        /// Output directory
        #[arg(long)]
        out_dir: PathBuf,
    },

    /// Print the default analysis configuration
    Config,
}

#[derive(Args)]
struct DatasetArgs {
    /// Experiment roster (client_id, Variation)
    #[arg(long)]
    roster: PathBuf,

    /// Client demographics
    #[arg(long)]
    demographics: PathBuf,

    /// Web log partition; repeat for each part
    #[arg(long = "web-log", required = true)]
    web_logs: Vec<PathBuf>,
}

impl From<DatasetArgs> for DatasetPaths {
    fn from(args: DatasetArgs) -> Self {
        DatasetPaths {
            roster: args.roster,
            demographics: args.demographics,
            web_logs: args.web_logs,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Plain-text summary
    Text,
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("{}=info", PRODUCER_NAME))),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), AnalysisError> {
    match cli.command {
        Commands::Analyze {
            dataset,
            config,
            output,
            format,
        } => cmd_analyze(dataset.into(), config.as_deref(), &output, format),

        Commands::Validate { dataset, json } => cmd_validate(dataset.into(), json),

        Commands::Export { dataset, out_dir } => cmd_export(dataset.into(), &out_dir),

        Commands::Config => {
            println!("{}", AnalysisConfig::default().to_json()?);
            Ok(())
        }
    }
}

fn cmd_analyze(
    paths: DatasetPaths,
    config_path: Option<&Path>,
    output: &Path,
    format: OutputFormat,
) -> Result<(), AnalysisError> {
    let config = match config_path {
        Some(path) => AnalysisConfig::from_json(&fs::read_to_string(path)?)?,
        None => AnalysisConfig::default(),
    };

    let dataset = DatasetLoader::load(&paths)?;
    let encoder = ReportEncoder::new();
    let report = analyze_dataset(&dataset, &config, &encoder)?;

    let rendered = match format {
        OutputFormat::Text => render_text(&report),
        OutputFormat::Json => encoder.encode_to_json(&report)? + "\n",
        OutputFormat::JsonPretty => encoder.encode_to_json_pretty(&report)? + "\n",
    };

    if output.to_string_lossy() == "-" {
        print!("{}", rendered);
    } else {
        fs::write(output, rendered)?;
        info!(output = %output.display(), "wrote report");
    }

    Ok(())
}

fn cmd_validate(paths: DatasetPaths, json: bool) -> Result<(), AnalysisError> {
    let dataset = DatasetLoader::load(&paths)?;
    let stats = &dataset.stats;

    if json {
        println!("{}", serde_json::to_string_pretty(stats)?);
    } else {
        print_stats(stats);
    }

    if stats.events == 0 {
        return Err(AnalysisError::EmptyInput(
            "no events remain after cleaning".to_string(),
        ));
    }
    Ok(())
}

fn cmd_export(paths: DatasetPaths, out_dir: &Path) -> Result<(), AnalysisError> {
    let dataset = DatasetLoader::load(&paths)?;
    DatasetLoader::export(&dataset, out_dir)
}

fn print_stats(stats: &LoadStats) {
    println!("Validation Report");
    println!("=================");
    println!("Roster rows:          {}", stats.roster_rows);
    println!("  without group:      {}", stats.roster_unassigned);
    println!("Demographic rows:     {}", stats.demographics_rows);
    println!("  incomplete:         {}", stats.demographics_incomplete);
    println!("  not in experiment:  {}", stats.demographics_unassigned);
    println!("Web log rows:         {}", stats.web_rows);
    println!("  without profile:    {}", stats.web_unassigned);
    println!("  duplicates:         {}", stats.web_duplicates);
    println!("Clients kept:         {}", stats.clients);
    println!("Events kept:          {}", stats.events);
}

// Error reporting

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<AnalysisError> for CliError {
    fn from(e: AnalysisError) -> Self {
        let (code, hint) = match &e {
            AnalysisError::EmptyInput(_) => ("EMPTY_INPUT", "Check that every group has sessions after cleaning"),
            AnalysisError::NoData { .. } => ("NO_DATA", "Remove the step pair from the configuration or check the web logs"),
            AnalysisError::Schema(_) => ("SCHEMA_ERROR", "Run 'funnelscope validate' for details"),
            AnalysisError::DegenerateInput(_) => ("DEGENERATE_INPUT", "Each group needs at least two varied observations"),
            AnalysisError::DateParse(_) => ("DATE_PARSE_ERROR", "Timestamps must look like 2017-04-17 15:27:07"),
            AnalysisError::Config(_) => ("CONFIG_ERROR", "Run 'funnelscope config' for a valid template"),
            AnalysisError::Csv(_) => ("CSV_ERROR", "Check column headers and delimiters"),
            AnalysisError::Json(_) => ("JSON_ERROR", "Check JSON syntax"),
            AnalysisError::Io(_) => ("IO_ERROR", "Check file paths and permissions"),
        };
        CliError {
            code: code.to_string(),
            message: e.to_string(),
            hint: Some(hint.to_string()),
        }
    }
}
