use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};

use loone_prep::analysis::{interpolate, physics};
use loone_prep::config::{Endpoints, Registry};
use loone_prep::datasets::{self, forecast, Context};
use loone_prep::logging::{self, DataSource, LogLevel};
use loone_prep::report::RunResult;
use loone_prep::verify;

#[derive(Parser)]
#[command(name = "loone_prep")]
#[command(author, version, about = "Prepare and update LOONE model input data", long_about = None)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Args)]
struct CommonArgs {
    /// Workspace directory holding the dataset CSV files
    #[arg(global = true, short, long, default_value = ".", env = "LOONE_WORKSPACE")]
    workspace: PathBuf,

    /// Dataset registry (TOML); the built-in tables are used when omitted
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Treat this date as today (YYYY-MM-DD)
    #[arg(global = true, long)]
    date_max: Option<NaiveDate>,

    /// Append log lines to this file
    #[arg(global = true, long)]
    log_file: Option<String>,

    /// Enable debug logging with timestamps
    #[arg(global = true, short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Update the water level datasets and merge the lake stage
    WaterLevel,

    /// Update the water quality datasets
    WaterQuality,

    /// Update the structure outflow datasets
    Flow,

    /// Download the closed S65E total discharge record
    S65eTotal,

    /// Download the weekly Palmer drought index
    PalmerIndex,

    /// Update the weather datasets and lake-wide averages
    Weather,

    /// Download GEOGLOWS flow forecasts for structures and inflow reaches
    ForecastFlows {
        /// Forecast issue date (defaults to two days before today)
        #[arg(long)]
        forecast_date: Option<NaiveDate>,
    },

    /// Sum one ensemble member over the inflow forecasts
    Netflows {
        /// Directory holding the inflow forecast files
        input_dir: PathBuf,
        /// Directory to write Netflows_acft_geoglows.csv to
        output_dir: PathBuf,
        /// Ensemble member (1-51)
        #[arg(short, long, default_value = "1")]
        ensemble: u32,
    },

    /// Download the bias-corrected weather forecast for the lake
    WeatherForecast {
        /// Output CSV path
        file_path: PathBuf,
    },

    /// Interpolate sparse water quality and radiation records to daily values
    Interpolate,

    /// Compute wave and current bottom shear stress
    ShearStress,

    /// Compute the kinematic viscosity of lake water
    Viscosity {
        /// Input file with `date` and `Water_T` columns
        input: String,
        /// Output file name
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Check every expected dataset file in the workspace
    Verify {
        /// Files whose latest row is older than this are reported stale
        #[arg(long, default_value = "7")]
        max_age_days: i64,

        /// Print the report as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let common = &cli.common;

    let level = if common.verbose { LogLevel::Debug } else { LogLevel::Info };
    logging::init_logger(level, common.log_file.as_deref(), common.verbose);

    let today = common.date_max.unwrap_or_else(|| Utc::now().date_naive());
    let registry = match Registry::load_or_default(common.config.as_deref()) {
        Ok(registry) => registry,
        Err(e) => {
            finish(RunResult::Error(format!("Could not load the dataset registry: {}", e)));
            return;
        }
    };

    let result = match cli.command {
        Commands::Netflows { input_dir, output_dir, ensemble } => forecast::run_netflows(
            &input_dir,
            &output_dir,
            ensemble,
            &registry.forecast.inflow_reach_ids,
        ),
        Commands::Interpolate => interpolate::interpolate_all(&registry, &common.workspace),
        Commands::ShearStress => physics::run_shear_stress(&common.workspace),
        Commands::Viscosity { input, output } => {
            physics::run_viscosity(&common.workspace, &input, output.as_deref())
        }
        Commands::Verify { max_age_days, json } => {
            let report = verify::run_verification(&registry, &common.workspace, today, max_age_days);
            if json {
                match serde_json::to_string_pretty(&report) {
                    Ok(text) => println!("{}", text),
                    Err(e) => logging::error(DataSource::System, None, &e.to_string()),
                }
            } else {
                verify::print_summary(&report);
            }
            return;
        }
        command => match context(&common.workspace, registry, today) {
            Ok(ctx) => run_remote(&ctx, command),
            Err(result) => result,
        },
    };

    finish(result);
}

fn context(workspace: &Path, registry: Registry, today: NaiveDate) -> Result<Context, RunResult> {
    let endpoints = Endpoints::from_env()
        .map_err(|e| RunResult::Error(format!("Invalid endpoint configuration: {}", e)))?;
    Context::new(workspace, registry, endpoints, today)
        .map_err(|e| RunResult::Error(format!("Could not create the HTTP client: {}", e)))
}

fn run_remote(ctx: &Context, command: Commands) -> RunResult {
    match command {
        Commands::WaterLevel => datasets::water_level::run(ctx),
        Commands::WaterQuality => datasets::water_quality::run(ctx),
        Commands::Flow => datasets::flow::run(ctx),
        Commands::S65eTotal => datasets::flow::run_s65e_total(ctx),
        Commands::PalmerIndex => datasets::drought::run_palmer_index(ctx),
        Commands::Weather => datasets::weather::run(ctx),
        Commands::ForecastFlows { forecast_date } => forecast::forecast_flows(ctx, forecast_date),
        Commands::WeatherForecast { file_path } => forecast::run_weather_forecast(ctx, &file_path),
        Commands::Netflows { .. }
        | Commands::Interpolate
        | Commands::ShearStress
        | Commands::Viscosity { .. }
        | Commands::Verify { .. } => RunResult::Error("Command does not use remote services".to_string()),
    }
}

fn finish(result: RunResult) {
    match &result {
        RunResult::Success(message) => logging::info(DataSource::System, None, message),
        RunResult::Error(message) => logging::error(DataSource::System, None, message),
    }
    println!("{}", result.to_json());
}
