//! Конфигурация запуска: TOML-файл с необязательными полями поверх встроенных значений.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::constants::DATE_FORMAT;
use crate::error::PipelineError;
use crate::holidays::HolidayRegion;
use crate::model::ModelConfig;
use crate::season::SeasonMonths;
use crate::validation::CheckKind;

pub const DEFAULT_CONFIG_PATH: &str = "config/forecast.toml";
const DEFAULT_SOURCE: &str = "data/tickets.db";
const DEFAULT_TABLE: &str = "tickets";
const DEFAULT_DATE_COLUMN: &str = "Ski Day";
const DEFAULT_VALUE_COLUMN: &str = "valid_tickets";
const DEFAULT_OUTPUT_DIR: &str = "forecast_output";
const DEFAULT_TRAINING_CUTOFF: (i32, u32, u32) = (2020, 6, 1);
const DEFAULT_SEASON_START: (i32, u32, u32) = (2022, 12, 10);
const DEFAULT_SEASON_END: (i32, u32, u32) = (2023, 4, 15);

/// Что делать со строками истории, дату которых не удалось разобрать.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnparseableDates {
    #[default]
    Drop,
    Fail,
}

impl FromStr for UnparseableDates {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "drop" => Ok(Self::Drop),
            "fail" => Ok(Self::Fail),
            other => Err(format!("unparseable_dates must be 'drop' or 'fail', got '{other}'")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ImageFormat {
    #[default]
    Png,
    Html,
}

impl ImageFormat {
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Png => "png",
        }
    }
}

impl FromStr for ImageFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "html" => Ok(Self::Html),
            "png" => Ok(Self::Png),
            other => Err(format!("image_format must be 'html' or 'png', got '{other}'")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SeasonConfig {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub months: SeasonMonths,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub source: PathBuf,
    pub table: String,
    pub date_column: String,
    pub value_column: String,
    /// Строки истории с этой даты и позже исключаются.
    pub training_cutoff: NaiveDate,
    pub unparseable_dates: UnparseableDates,
    pub season: SeasonConfig,
    pub output_dir: PathBuf,
    pub image_format: ImageFormat,
    pub holiday_region: HolidayRegion,
    pub checks: Vec<CheckKind>,
    pub model: ModelConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from(DEFAULT_SOURCE),
            table: DEFAULT_TABLE.to_string(),
            date_column: DEFAULT_DATE_COLUMN.to_string(),
            value_column: DEFAULT_VALUE_COLUMN.to_string(),
            training_cutoff: ymd(DEFAULT_TRAINING_CUTOFF),
            unparseable_dates: UnparseableDates::default(),
            season: SeasonConfig {
                start: ymd(DEFAULT_SEASON_START),
                end: ymd(DEFAULT_SEASON_END),
                months: SeasonMonths::default(),
            },
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            image_format: ImageFormat::default(),
            holiday_region: HolidayRegion::Germany,
            checks: CheckKind::ALL.to_vec(),
            model: ModelConfig::default(),
        }
    }
}

fn ymd((year, month, day): (i32, u32, u32)) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    source: Option<PathBuf>,
    table: Option<String>,
    date_column: Option<String>,
    value_column: Option<String>,
    training_cutoff: Option<String>,
    unparseable_dates: Option<String>,
    output_dir: Option<PathBuf>,
    image_format: Option<String>,
    holiday_region: Option<String>,
    checks: Option<Vec<String>>,
    season: Option<SeasonFile>,
    model: Option<ModelFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SeasonFile {
    start: Option<String>,
    end: Option<String>,
    months: Option<Vec<u32>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelFile {
    yearly_seasonality: Option<bool>,
    weekly_seasonality: Option<bool>,
    daily_seasonality: Option<bool>,
    n_changepoints: Option<usize>,
    changepoint_range: Option<f64>,
    changepoint_prior_scale: Option<f64>,
    seasonality_prior_scale: Option<f64>,
    holidays_prior_scale: Option<f64>,
    interval_width: Option<f64>,
    max_iters: Option<u64>,
}

fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, PipelineError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|err| {
        PipelineError::Config(format!("{field} must be a YYYY-MM-DD date, got '{raw}': {err}"))
    })
}

fn resolve_model(base: ModelConfig, overrides: Option<ModelFile>) -> ModelConfig {
    let mut cfg = base;
    if let Some(overrides) = overrides {
        if let Some(value) = overrides.yearly_seasonality {
            cfg.yearly_seasonality = value;
        }
        if let Some(value) = overrides.weekly_seasonality {
            cfg.weekly_seasonality = value;
        }
        if let Some(value) = overrides.daily_seasonality {
            cfg.daily_seasonality = value;
        }
        if let Some(value) = overrides.n_changepoints {
            cfg.n_changepoints = value;
        }
        if let Some(value) = overrides.changepoint_range {
            cfg.changepoint_range = value;
        }
        if let Some(value) = overrides.changepoint_prior_scale {
            cfg.changepoint_prior_scale = value;
        }
        if let Some(value) = overrides.seasonality_prior_scale {
            cfg.seasonality_prior_scale = value;
        }
        if let Some(value) = overrides.holidays_prior_scale {
            cfg.holidays_prior_scale = value;
        }
        if let Some(value) = overrides.interval_width {
            cfg.interval_width = value;
        }
        if let Some(value) = overrides.max_iters {
            cfg.max_iters = value;
        }
    }
    cfg
}

fn resolve(file: ConfigFile) -> Result<PipelineConfig, PipelineError> {
    let mut cfg = PipelineConfig::default();
    if let Some(source) = file.source {
        cfg.source = source;
    }
    if let Some(table) = file.table {
        cfg.table = table;
    }
    if let Some(column) = file.date_column {
        cfg.date_column = column;
    }
    if let Some(column) = file.value_column {
        cfg.value_column = column;
    }
    if let Some(raw) = file.training_cutoff {
        cfg.training_cutoff = parse_date("training_cutoff", &raw)?;
    }
    if let Some(raw) = file.unparseable_dates {
        cfg.unparseable_dates = raw.parse().map_err(PipelineError::Config)?;
    }
    if let Some(dir) = file.output_dir {
        cfg.output_dir = dir;
    }
    if let Some(raw) = file.image_format {
        cfg.image_format = raw.parse().map_err(PipelineError::Config)?;
    }
    if let Some(raw) = file.holiday_region {
        cfg.holiday_region = raw.parse().map_err(PipelineError::Config)?;
    }
    if let Some(names) = file.checks {
        cfg.checks = names
            .iter()
            .map(|name| name.parse::<CheckKind>())
            .collect::<Result<_, _>>()
            .map_err(PipelineError::Config)?;
    }
    if let Some(season) = file.season {
        if let Some(raw) = season.start {
            cfg.season.start = parse_date("season.start", &raw)?;
        }
        if let Some(raw) = season.end {
            cfg.season.end = parse_date("season.end", &raw)?;
        }
        if let Some(months) = season.months {
            cfg.season.months = SeasonMonths::new(&months).map_err(PipelineError::Config)?;
        }
    }
    cfg.model = resolve_model(cfg.model, file.model);
    Ok(cfg)
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.date_column.trim().is_empty() || self.value_column.trim().is_empty() {
            return Err(PipelineError::Config(
                "date_column and value_column must not be empty".to_string(),
            ));
        }
        if self.table.trim().is_empty() {
            return Err(PipelineError::Config("table must not be empty".to_string()));
        }
        if self.image_format == ImageFormat::Png && !cfg!(feature = "static-images") {
            return Err(PipelineError::Config(
                "image_format = 'png' requires the `static-images` feature, use 'html' instead"
                    .to_string(),
            ));
        }
        self.model.validate().map_err(PipelineError::Config)
    }
}

/// Читает TOML-конфигурацию. Отсутствие файла по пути по умолчанию даёт
/// встроенные значения, любой другой отсутствующий путь является ошибкой.
pub fn load_config(path: &Path) -> Result<PipelineConfig, PipelineError> {
    if !path.exists() {
        if path == Path::new(DEFAULT_CONFIG_PATH) {
            tracing::info!(
                "Config {} not found, using built-in defaults",
                path.display()
            );
            return Ok(PipelineConfig::default());
        }
        return Err(PipelineError::Config(format!(
            "config {} does not exist",
            path.display()
        )));
    }

    let raw = fs::read_to_string(path).map_err(|err| PipelineError::io(path, err))?;
    parse_config(&raw)
        .map_err(|err| PipelineError::Config(format!("{}: {err}", path.display())))
}

pub fn parse_config(raw: &str) -> Result<PipelineConfig, PipelineError> {
    let file: ConfigFile =
        toml::from_str(raw).map_err(|err| PipelineError::Config(err.to_string()))?;
    let cfg = resolve(file)?;
    cfg.validate()?;
    Ok(cfg)
}
