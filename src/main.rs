mod config;
mod constants;
mod data;
mod error;
mod holidays;
mod model;
mod pipeline;
mod report;
mod season;
mod series;
mod validation;

use clap::{CommandFactory, Parser, Subcommand};
use std::fs::{self, File};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use crate::config::{DEFAULT_CONFIG_PATH, ImageFormat, PipelineConfig, load_config};
use crate::constants::DATE_FORMAT;
use crate::error::PipelineError;
use crate::season::{season_window, write_season_summary};
use chrono::NaiveDate;
use clap_complete::{Shell, generate};
use tracing_subscriber::EnvFilter;

const APP_ABOUT: &str = "Ski ticket forecast for the winter season";

#[derive(Parser, Debug)]
#[command(name = "ski-forecast", about = APP_ABOUT)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Полный режим: загрузить историю, обучить модель, сохранить прогноз и графики.
    Run {
        /// TOML-файл конфигурации.
        #[arg(
            short = 'c',
            long = "config",
            value_name = "PATH",
            default_value = DEFAULT_CONFIG_PATH
        )]
        config: PathBuf,
        /// Источник данных (SQLite или CSV), переопределяет конфигурацию.
        #[arg(short = 's', long = "source", value_name = "PATH")]
        source: Option<PathBuf>,
        /// Каталог для CSV и графиков.
        #[arg(short = 'o', long = "output-dir", value_name = "PATH")]
        output_dir: Option<PathBuf>,
        /// Формат графиков.
        #[arg(long = "image-format", value_enum)]
        image_format: Option<ImageFormat>,
    },
    /// Показать даты сезонного окна прогноза.
    Season {
        /// TOML-файл конфигурации.
        #[arg(
            short = 'c',
            long = "config",
            value_name = "PATH",
            default_value = DEFAULT_CONFIG_PATH
        )]
        config: PathBuf,
        /// Первый день окна (YYYY-MM-DD).
        #[arg(long = "start", value_name = "DATE", value_parser = parse_cli_date)]
        start: Option<NaiveDate>,
        /// Последний день окна (YYYY-MM-DD).
        #[arg(long = "end", value_name = "DATE", value_parser = parse_cli_date)]
        end: Option<NaiveDate>,
    },
    /// Сгенерировать файлы автодополнения для shell.
    Completions {
        /// Целевой shell.
        #[arg(value_enum)]
        shell: Shell,
        /// Куда сохранить файл (по умолчанию stdout).
        #[arg(short = 'o', long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

fn parse_cli_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|err| format!("expected YYYY-MM-DD, got '{raw}': {err}"))
}

fn generate_completions(shell: Shell, output: Option<PathBuf>) -> Result<(), PipelineError> {
    let mut cmd = Args::command();
    let bin_name = cmd.get_name().to_string();
    if let Some(path) = output {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| PipelineError::io(parent, err))?;
        }
        let mut file = File::create(&path).map_err(|err| PipelineError::io(&path, err))?;
        generate(shell, &mut cmd, bin_name, &mut file);
    } else {
        let mut stdout = std::io::stdout();
        generate(shell, &mut cmd, bin_name, &mut stdout);
    }
    Ok(())
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ski_forecast=info"));
    let ansi = std::io::stdout().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(ansi)
        .compact()
        .init();
}

fn headline(message: &str) {
    tracing::info!(status = "start", "{message}");
}

fn info(message: &str) {
    tracing::info!(status = "info", "{message}");
}

fn success(message: &str) {
    tracing::info!(status = "ok", "{message}");
}

fn error(message: &str) {
    tracing::error!(status = "err", "{message}");
}

fn run_forecast(
    config_path: &std::path::Path,
    source: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    image_format: Option<ImageFormat>,
) -> Result<(), PipelineError> {
    let mut config: PipelineConfig = load_config(config_path)?;
    if let Some(source) = source {
        config.source = source;
    }
    if let Some(output_dir) = output_dir {
        config.output_dir = output_dir;
    }
    if let Some(image_format) = image_format {
        config.image_format = image_format;
    }
    config.validate()?;

    tracing::info!(
        mode = "run",
        config = %config_path.display(),
        source = %config.source.display(),
        output_dir = %config.output_dir.display(),
        cutoff = %config.training_cutoff,
        season_start = %config.season.start,
        season_end = %config.season.end,
        holidays = config.holiday_region.code(),
        image_format = config.image_format.extension(),
        "Starting forecast pipeline"
    );

    let loader = data::loader_for(&config);
    let model = pipeline::default_model(&config);
    let mut stdout = std::io::stdout();
    let summary = pipeline::run(&config, loader.as_ref(), &model, &mut stdout)?;

    let failed = summary.verdicts.iter().filter(|v| !v.passed).count();
    if failed > 0 {
        info(&format!("{failed} validation check(s) reported warnings"));
    }
    success(&format!(
        "Forecast for {} days from {} training rows written to {} ({} charts)",
        summary.forecast_rows,
        summary.training_rows,
        summary.csv_path.display(),
        summary.charts.len()
    ));
    Ok(())
}

fn print_season(
    config_path: &std::path::Path,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<(), PipelineError> {
    let config = load_config(config_path)?;
    let start = start.unwrap_or(config.season.start);
    let end = end.unwrap_or(config.season.end);
    let window = season_window(start, end, config.season.months);
    write_season_summary(start, end, &window, &mut std::io::stdout())
        .map_err(|err| PipelineError::io("<stdout>", err))
}

fn main() -> ExitCode {
    let args = Args::parse();
    let result = match args.command {
        Command::Completions { shell, output } => {
            if let Err(err) = generate_completions(shell, output) {
                eprintln!("{err}");
                return ExitCode::FAILURE;
            }
            return ExitCode::SUCCESS;
        }
        Command::Run {
            config,
            source,
            output_dir,
            image_format,
        } => {
            init_logging();
            headline(APP_ABOUT);
            run_forecast(&config, source, output_dir, image_format)
        }
        Command::Season { config, start, end } => {
            init_logging();
            print_season(&config, start, end)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error(&err.to_string());
            ExitCode::FAILURE
        }
    }
}
