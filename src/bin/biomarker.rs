//! Biomarker CLI - Command-line interface for biomarker-flux
//!
//! Commands:
//! - stats: AGP statistics for one user
//! - population: Time-in-range comparison across a cohort
//! - ranges: Reference ranges that apply to one user
//! - doctor: Diagnose store and configuration health

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use biomarker_flux::config::{EngineConfig, PercentileFallback};
use biomarker_flux::pipeline::BiomarkerProcessor;
use biomarker_flux::population::CohortFilter;
use biomarker_flux::store::{Identity, MemoryStore, Role};
use biomarker_flux::types::{Biomarker, Condition};
use biomarker_flux::{ComputeError, FLUX_VERSION, PRODUCER_NAME};

/// Biomarker - AGP statistics and range classification for sensor data
#[derive(Parser)]
#[command(name = "biomarker")]
#[command(version = FLUX_VERSION)]
#[command(about = "Compute biomarker statistics from sensor records", long_about = None)]
struct Cli {
    /// Engine configuration (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// AGP statistics and hourly percentiles for one user
    Stats {
        /// Store fixture path (use - for stdin)
        #[arg(short, long)]
        store: PathBuf,

        /// Username
        #[arg(short, long)]
        user: String,

        /// Biomarker name
        #[arg(short, long, default_value = "glucose")]
        biomarker: Biomarker,

        /// How empty hours are filled
        #[arg(long, default_value = "interpolated")]
        mode: PercentileMode,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Cohort time-in-range comparison
    Population {
        /// Store fixture path (use - for stdin)
        #[arg(short, long)]
        store: PathBuf,

        /// Caller username
        #[arg(long, default_value = "admin")]
        identity: String,

        /// Caller role
        #[arg(long, default_value = "admin")]
        role: CliRole,

        /// Biomarker name
        #[arg(short, long, default_value = "glucose")]
        biomarker: Biomarker,

        /// Minimum age (inclusive)
        #[arg(long)]
        min_age: Option<i64>,

        /// Maximum age (inclusive)
        #[arg(long)]
        max_age: Option<i64>,

        /// Gender
        #[arg(long)]
        gender: Option<String>,

        /// Condition flag, e.g. pregnancy=false (repeatable)
        #[arg(long = "condition", value_parser = parse_condition_flag)]
        conditions: Vec<(Condition, bool)>,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Reference ranges applied to one user
    Ranges {
        /// Store fixture path (use - for stdin)
        #[arg(short, long)]
        store: PathBuf,

        /// Username
        #[arg(short, long)]
        user: String,

        /// Biomarker name
        #[arg(short, long, default_value = "glucose")]
        biomarker: Biomarker,
    },

    /// Diagnose store and configuration health
    Doctor {
        /// Check a store fixture
        #[arg(long)]
        store: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PercentileMode {
    /// Empty hours are null
    Interpolated,
    /// Empty hours are scaled from the overall mean
    DefaultScaled,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliRole {
    Patient,
    Doctor,
    Admin,
}

impl From<CliRole> for Role {
    fn from(role: CliRole) -> Self {
        match role {
            CliRole::Patient => Role::Patient,
            CliRole::Doctor => Role::Doctor,
            CliRole::Admin => Role::Admin,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), BiomarkerCliError> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Stats {
            store,
            user,
            biomarker,
            mode,
            output_format,
        } => cmd_stats(config, &store, &user, biomarker, mode, output_format),

        Commands::Population {
            store,
            identity,
            role,
            biomarker,
            min_age,
            max_age,
            gender,
            conditions,
            output_format,
        } => {
            let filters = CohortFilter {
                min_age,
                max_age,
                gender,
                conditions: conditions.into_iter().collect(),
            };
            let identity = Identity::new(identity, role.into());
            cmd_population(config, &store, &identity, biomarker, &filters, output_format)
        }

        Commands::Ranges {
            store,
            user,
            biomarker,
        } => cmd_ranges(config, &store, &user, biomarker),

        Commands::Doctor { store, json } => cmd_doctor(cli.config.as_deref(), store.as_deref(), json),
    }
}

fn cmd_stats(
    config: EngineConfig,
    store_path: &Path,
    username: &str,
    biomarker: Biomarker,
    mode: PercentileMode,
    output_format: OutputFormat,
) -> Result<(), BiomarkerCliError> {
    let store = load_store(store_path)?;
    let processor = BiomarkerProcessor::new(config);

    let fallback = match mode {
        PercentileMode::Interpolated => processor.config().percentile_fallback,
        PercentileMode::DefaultScaled => PercentileFallback::MeanScaled,
    };
    let (report, audit) = processor.report_with_ranges(&store, &store, username, biomarker, fallback)?;
    let payload = processor.encoder().encode_report(username, &report, Some(audit));

    write_stdout(&format_output(&payload, output_format)?)
}

fn cmd_population(
    config: EngineConfig,
    store_path: &Path,
    identity: &Identity,
    biomarker: Biomarker,
    filters: &CohortFilter,
    output_format: OutputFormat,
) -> Result<(), BiomarkerCliError> {
    let store = load_store(store_path)?;
    let processor = BiomarkerProcessor::new(config);

    let report = processor.population(&store, &store, &store, identity, biomarker, filters)?;
    let payload = processor.encoder().encode_population(report);

    write_stdout(&format_output(&payload, output_format)?)
}

fn cmd_ranges(
    config: EngineConfig,
    store_path: &Path,
    username: &str,
    biomarker: Biomarker,
) -> Result<(), BiomarkerCliError> {
    let store = load_store(store_path)?;
    let resolved = BiomarkerProcessor::new(config).resolve_ranges(&store, &store, username, biomarker)?;
    write_stdout(&format_output(&resolved, OutputFormat::JsonPretty)?)
}

fn cmd_doctor(config: Option<&Path>, store: Option<&Path>, json: bool) -> Result<(), BiomarkerCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("{} version {}", PRODUCER_NAME, FLUX_VERSION),
    });

    checks.push(DoctorCheck {
        name: "parallel".to_string(),
        status: CheckStatus::Ok,
        message: if cfg!(feature = "parallel") {
            "Population requests use a worker pool".to_string()
        } else {
            "Population requests run sequentially".to_string()
        },
    });

    if let Some(config_path) = config {
        checks.push(match EngineConfig::load(config_path) {
            Ok(cfg) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "{} min/reading, floor {} observations, fallback {:?}",
                    cfg.minutes_per_reading, cfg.min_observations, cfg.percentile_fallback
                ),
            },
            Err(e) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: format!("Invalid configuration: {}", e),
            },
        });
    }

    if let Some(store_path) = store {
        let check = if !store_path.exists() {
            DoctorCheck {
                name: "store".to_string(),
                status: CheckStatus::Warning,
                message: "Store file does not exist".to_string(),
            }
        } else {
            match load_store(store_path) {
                Ok(store) => {
                    let records: usize = store.records.values().map(Vec::len).sum();
                    DoctorCheck {
                        name: "store".to_string(),
                        status: CheckStatus::Ok,
                        message: format!(
                            "{} users, {} records, {} configured ranges",
                            store.users.len(),
                            records,
                            store.ranges.len()
                        ),
                    }
                }
                Err(e) => DoctorCheck {
                    name: "store".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot load store: {}", CliError::from(e).message),
                },
            }
        };
        checks.push(check);
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass --store with a file path)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (--store - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: FLUX_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Biomarker Doctor Report");
        println!("=======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(BiomarkerCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn load_store(path: &Path) -> Result<MemoryStore, BiomarkerCliError> {
    let contents = if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(path)?
    };
    Ok(MemoryStore::from_json(&contents)?)
}

fn format_output<T: Serialize>(payload: &T, format: OutputFormat) -> Result<String, BiomarkerCliError> {
    let text = match format {
        OutputFormat::Json => serde_json::to_string(payload)?,
        OutputFormat::JsonPretty => serde_json::to_string_pretty(payload)?,
    };
    Ok(text)
}

fn write_stdout(text: &str) -> Result<(), BiomarkerCliError> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", text)?;
    stdout.flush()?;
    Ok(())
}

fn parse_condition_flag(s: &str) -> Result<(Condition, bool), String> {
    let (name, flag) = s.split_once('=').unwrap_or((s, "true"));
    let condition = Condition::ALL
        .into_iter()
        .find(|c| c.as_str() == name.trim())
        .ok_or_else(|| format!("unknown condition '{}'", name))?;
    let required = flag
        .trim()
        .parse::<bool>()
        .map_err(|_| format!("expected true or false, got '{}'", flag))?;
    Ok((condition, required))
}

// Error types

#[derive(Debug, thiserror::Error)]
enum BiomarkerCliError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Compute(#[from] ComputeError),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("doctor found errors")]
    DoctorFailed,
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<BiomarkerCliError> for CliError {
    fn from(e: BiomarkerCliError) -> Self {
        match e {
            BiomarkerCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            BiomarkerCliError::Compute(ComputeError::Upstream(message)) => CliError {
                code: "UPSTREAM_ERROR".to_string(),
                message,
                hint: None,
            },
            BiomarkerCliError::Compute(e) => CliError {
                code: "COMPUTE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check the store fixture and configuration".to_string()),
            },
            BiomarkerCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            BiomarkerCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more checks failed".to_string(),
                hint: Some("Review the doctor report above".to_string()),
            },
        }
    }
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
