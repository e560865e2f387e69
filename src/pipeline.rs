//! Полный прогон: загрузка, обучение, прогноз на сезон, проверки, экспорт.

use std::io::Write;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::constants::{FORECAST_CSV_NAME, PREVIEW_ROWS};
use crate::data::TicketLoader;
use crate::error::PipelineError;
use crate::model::{AdditiveModel, FittedModel, Forecaster};
use crate::report::{self, ChartInputs};
use crate::season::season_window;
use crate::series::{PredictionFrame, build_training_frame};
use crate::validation::{Verdict, run_checks};

const STDOUT_LABEL: &str = "<stdout>";

#[derive(Clone, Debug)]
pub struct RunSummary {
    pub training_rows: usize,
    pub forecast_rows: usize,
    pub verdicts: Vec<Verdict>,
    pub csv_path: PathBuf,
    pub charts: Vec<PathBuf>,
}

/// Модель по умолчанию для конфигурации: параметры и праздники региона.
pub fn default_model(config: &PipelineConfig) -> AdditiveModel {
    AdditiveModel::new(config.model).with_country_holidays(config.holiday_region)
}

fn console(err: std::io::Error) -> PipelineError {
    PipelineError::io(STDOUT_LABEL, err)
}

pub fn run<F: Forecaster>(
    config: &PipelineConfig,
    loader: &dyn TicketLoader,
    forecaster: &F,
    out: &mut impl Write,
) -> Result<RunSummary, PipelineError> {
    let records = loader.load(&config.source)?;
    let (history, report) =
        build_training_frame(&records, config.training_cutoff, config.unparseable_dates)?;
    if history.is_empty() {
        return Err(PipelineError::Model(format!(
            "no usable training rows before {}",
            config.training_cutoff
        )));
    }

    let fitted = forecaster
        .fit(&history)
        .map_err(|err| PipelineError::Model(err.to_string()))?;
    info!(rows = report.kept, "Model fitted");

    let horizon = season_window(config.season.start, config.season.end, config.season.months);
    let forecast = fitted
        .predict(&horizon)
        .map_err(|err| PipelineError::Model(err.to_string()))?;
    let frame = PredictionFrame::from_forecast(&forecast)?;
    if frame.is_empty() {
        warn!(
            start = %config.season.start,
            end = %config.season.end,
            "Season window is empty"
        );
    }
    info!(rows = frame.len(), "Forecast generated");

    let verdicts = run_checks(&config.checks, &frame);
    for verdict in &verdicts {
        writeln!(out, "{}", verdict.message).map_err(console)?;
    }

    let csv_path = config.output_dir.join(FORECAST_CSV_NAME);
    report::write_forecast_csv(&frame, &csv_path)?;
    writeln!(out, "Forecast saved to {FORECAST_CSV_NAME}").map_err(console)?;
    report::write_preview(&frame, PREVIEW_ROWS, out).map_err(console)?;

    let charts = report::render_charts(
        &ChartInputs {
            history: &history,
            forecast: &forecast,
            frame: &frame,
        },
        &config.output_dir,
        config.image_format,
    )?;

    Ok(RunSummary {
        training_rows: history.len(),
        forecast_rows: frame.len(),
        verdicts,
        csv_path,
        charts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImageFormat;
    use crate::data::{CsvTicketLoader, RawTicketRecord};
    use crate::model::RawForecast;
    use crate::series::TrainingFrame;
    use chrono::{Duration, NaiveDate};
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::error::Error;
    use std::fs;
    use std::path::Path;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct VecLoader(Vec<RawTicketRecord>);

    impl TicketLoader for VecLoader {
        fn load(&self, _source: &Path) -> Result<Vec<RawTicketRecord>, PipelineError> {
            Ok(self.0.clone())
        }
    }

    struct FailingLoader;

    impl TicketLoader for FailingLoader {
        fn load(&self, source: &Path) -> Result<Vec<RawTicketRecord>, PipelineError> {
            Err(PipelineError::load(source, "no such table: tickets"))
        }
    }

    /// Детерминированная модель: прогноз `offset + i`, интервал +-10.
    struct FixedModel {
        offset: f64,
        seen: RefCell<Option<TrainingFrame>>,
    }

    impl FixedModel {
        fn new(offset: f64) -> Self {
            Self {
                offset,
                seen: RefCell::new(None),
            }
        }
    }

    struct FixedFit(f64);

    impl Forecaster for FixedModel {
        type Fitted = FixedFit;

        fn fit(&self, frame: &TrainingFrame) -> Result<FixedFit, Box<dyn Error>> {
            self.seen.replace(Some(frame.clone()));
            Ok(FixedFit(self.offset))
        }
    }

    impl FittedModel for FixedFit {
        fn predict(&self, horizon: &[NaiveDate]) -> Result<RawForecast, Box<dyn Error>> {
            let yhat: Vec<f64> = (0..horizon.len()).map(|i| self.0 + i as f64).collect();
            Ok(RawForecast {
                ds: horizon.to_vec(),
                yhat_lower: yhat.iter().map(|v| v - 10.0).collect(),
                yhat_upper: yhat.iter().map(|v| v + 10.0).collect(),
                trend: yhat.clone(),
                yhat,
                components: Vec::new(),
            })
        }
    }

    fn records() -> Vec<RawTicketRecord> {
        let mut out: Vec<_> = (0..40)
            .rev()
            .map(|i| RawTicketRecord {
                ski_day: Some((date(2019, 12, 1) + Duration::days(i)).to_string()),
                valid_tickets: Some(500.0 + i as f64),
            })
            .collect();
        out.push(RawTicketRecord {
            ski_day: Some("2021-01-01".to_string()),
            valid_tickets: Some(9999.0),
        });
        out
    }

    fn config(output_dir: &Path) -> PipelineConfig {
        PipelineConfig {
            output_dir: output_dir.to_path_buf(),
            image_format: ImageFormat::Html,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn export_is_byte_identical_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let loader = VecLoader(records());

        let first = run(&cfg, &loader, &FixedModel::new(100.0), &mut Vec::new()).unwrap();
        let first_bytes = fs::read(&first.csv_path).unwrap();
        let second = run(&cfg, &loader, &FixedModel::new(100.0), &mut Vec::new()).unwrap();
        let second_bytes = fs::read(&second.csv_path).unwrap();

        assert_eq!(first_bytes, second_bytes);
        let text = String::from_utf8(first_bytes).unwrap();
        assert_eq!(
            text.lines().next(),
            Some("date,forecasted_tickets,upper_confidence,lower_confidence")
        );
        assert_eq!(text.lines().nth(1), Some("2022-12-10,100.000000,90.000000,110.000000"));
        assert_eq!(text.lines().count(), first.forecast_rows + 1);
    }

    #[test]
    fn model_sees_filtered_sorted_history() {
        let dir = tempfile::tempdir().unwrap();
        let model = FixedModel::new(1.0);
        let summary = run(
            &config(dir.path()),
            &VecLoader(records()),
            &model,
            &mut Vec::new(),
        )
        .unwrap();

        let seen = model.seen.borrow().clone().unwrap();
        assert_eq!(summary.training_rows, 40);
        assert_eq!(seen.len(), 40);
        assert!(seen.ds.iter().all(|d| *d < date(2020, 6, 1)));
        assert!(seen.ds.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn console_output_has_verdicts_confirmation_and_preview() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = Vec::new();
        run(
            &config(dir.path()),
            &VecLoader(records()),
            &FixedModel::new(100.0),
            &mut out,
        )
        .unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines[0], "[OK] NEGATIVE PREDICTION VALIDATION PASSED");
        assert_eq!(lines[3], "Forecast saved to prophet_forecast.csv");
        assert!(lines[4].contains("forecasted_tickets"));
        assert_eq!(lines.len(), 3 + 1 + 1 + PREVIEW_ROWS);
        assert!(lines[5].contains("2022-12-10"));
    }

    #[test]
    fn negative_forecast_warns_but_still_exports() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = Vec::new();
        let summary = run(
            &config(dir.path()),
            &VecLoader(records()),
            &FixedModel::new(-50.0),
            &mut out,
        )
        .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("[X] WARNING! The predicted numbers of tickets have negative values!"));
        assert!(!summary.verdicts[0].passed);
        assert!(summary.csv_path.exists());
        assert_eq!(summary.charts.len(), 3);
        assert!(summary.charts.iter().all(|path| path.exists()));
    }

    #[test]
    fn forecast_covers_the_season_window() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run(
            &config(dir.path()),
            &VecLoader(records()),
            &FixedModel::new(0.0),
            &mut Vec::new(),
        )
        .unwrap();
        assert_eq!(summary.forecast_rows, 22 + 31 + 28 + 31 + 15);
    }

    #[test]
    fn load_failure_aborts_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir.path().join("out"));
        let err = run(&cfg, &FailingLoader, &FixedModel::new(0.0), &mut Vec::new()).unwrap_err();

        assert!(matches!(err, PipelineError::Load { .. }));
        assert!(!cfg.output_dir.exists());
    }

    #[test]
    fn history_entirely_after_cutoff_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = VecLoader(vec![RawTicketRecord {
            ski_day: Some("2021-01-01".to_string()),
            valid_tickets: Some(5.0),
        }]);
        let err = run(
            &config(dir.path()),
            &loader,
            &FixedModel::new(0.0),
            &mut Vec::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("no usable training rows before 2020-06-01"));
    }

    #[test]
    fn too_little_history_is_a_model_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = VecLoader(vec![RawTicketRecord {
            ski_day: Some("2020-01-01".to_string()),
            valid_tickets: Some(5.0),
        }]);
        let cfg = config(dir.path());
        let err = run(&cfg, &loader, &default_model(&cfg), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, PipelineError::Model(_)));
    }

    #[test]
    fn end_to_end_with_bundled_model_and_csv_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("tickets.csv");
        let mut body = String::from("Ski Day,valid_tickets\n");
        for i in 0..150 {
            let day = date(2019, 12, 1) + Duration::days(i);
            let weekend = matches!(
                chrono::Datelike::weekday(&day),
                chrono::Weekday::Sat | chrono::Weekday::Sun
            );
            let tickets = if weekend { 900 } else { 600 } + (i * 37 % 50);
            body.push_str(&format!("{day},{tickets}\n"));
        }
        body.push_str("2020-12-24,100000\n");
        fs::write(&source, body).unwrap();

        let mut cfg = config(&dir.path().join("out"));
        cfg.source = source;
        cfg.season.start = date(2022, 12, 10);
        cfg.season.end = date(2023, 1, 10);

        let loader = CsvTicketLoader {
            date_column: cfg.date_column.clone(),
            value_column: cfg.value_column.clone(),
        };
        let summary = run(&cfg, &loader, &default_model(&cfg), &mut Vec::new()).unwrap();

        assert_eq!(summary.training_rows, 150);
        assert_eq!(summary.forecast_rows, 32);
        assert_eq!(summary.verdicts.len(), 3);
        assert!(summary.verdicts.iter().skip(1).all(|v| v.passed));
        let csv = fs::read_to_string(&summary.csv_path).unwrap();
        assert_eq!(csv.lines().count(), 33);
        assert!(csv.lines().nth(1).unwrap().starts_with("2022-12-10,"));
    }
}
