//! Экспорт прогноза: CSV, консольный предпросмотр и графики.

mod chart;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use plotly::Plot;
use tracing::{debug, info};

use crate::config::ImageFormat;
use crate::constants::{
    COMPONENTS_CHART_STEM, DATE_FORMAT, FORECAST_CHART_STEM, OVERLAY_CHART_STEM,
};
use crate::error::PipelineError;
use crate::model::RawForecast;
use crate::series::{PredictionFrame, TrainingFrame};

pub const CSV_HEADER: [&str; 4] = [
    "date",
    "forecasted_tickets",
    "upper_confidence",
    "lower_confidence",
];
const PREVIEW_GAP: &str = "  ";
#[cfg(feature = "static-images")]
const PNG_SCALE: f64 = 1.0;

fn ensure_parent(path: &Path) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|err| PipelineError::io(parent, err))?;
    }
    Ok(())
}

fn format_row(row: &crate::series::PredictionRow) -> [String; 4] {
    [
        row.date.format(DATE_FORMAT).to_string(),
        format!("{:.6}", row.forecasted_tickets),
        format!("{:.6}", row.upper_confidence),
        format!("{:.6}", row.lower_confidence),
    ]
}

/// Ячейка CSV: шесть знаков после запятой, NaN пишется пустой ячейкой.
fn csv_cell(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        format!("{value:.6}")
    }
}

/// Пишет таблицу прогноза без индекса, с фиксированным заголовком.
pub fn write_forecast_csv(frame: &PredictionFrame, path: &Path) -> Result<(), PipelineError> {
    ensure_parent(path)?;
    let csv_err = |source: csv::Error| PipelineError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    writer.write_record(CSV_HEADER).map_err(csv_err)?;
    for row in &frame.rows {
        writer
            .write_record([
                row.date.format(DATE_FORMAT).to_string(),
                csv_cell(row.forecasted_tickets),
                csv_cell(row.upper_confidence),
                csv_cell(row.lower_confidence),
            ])
            .map_err(csv_err)?;
    }
    writer.flush().map_err(|err| PipelineError::io(path, err))?;
    debug!(rows = frame.len(), path = %path.display(), "Wrote forecast CSV");
    Ok(())
}

/// Табличный вывод первых `limit` строк с индексом, колонки выровнены вправо.
pub fn write_preview(frame: &PredictionFrame, limit: usize, out: &mut impl Write) -> io::Result<()> {
    let cells: Vec<[String; 4]> = frame.rows.iter().take(limit).map(format_row).collect();
    let index_width = cells.len().saturating_sub(1).to_string().len();
    let widths: Vec<usize> = CSV_HEADER
        .iter()
        .enumerate()
        .map(|(col, header)| {
            cells
                .iter()
                .map(|row| row[col].len())
                .fold(header.len(), usize::max)
        })
        .collect();

    write!(out, "{:index_width$}", "")?;
    for (header, width) in CSV_HEADER.iter().zip(&widths) {
        write!(out, "{PREVIEW_GAP}{header:>width$}")?;
    }
    writeln!(out)?;
    for (idx, row) in cells.iter().enumerate() {
        write!(out, "{idx:<index_width$}")?;
        for (cell, width) in row.iter().zip(&widths) {
            write!(out, "{PREVIEW_GAP}{cell:>width$}")?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Входные данные для трёх графиков.
pub struct ChartInputs<'a> {
    pub history: &'a TrainingFrame,
    pub forecast: &'a RawForecast,
    pub frame: &'a PredictionFrame,
}

/// Строит и сохраняет все три графика; возвращает пути в порядке записи.
pub fn render_charts(
    inputs: &ChartInputs<'_>,
    output_dir: &Path,
    format: ImageFormat,
) -> Result<Vec<PathBuf>, PipelineError> {
    let figures = [
        (
            FORECAST_CHART_STEM,
            chart::forecast_figure(inputs.history, inputs.forecast),
        ),
        (
            COMPONENTS_CHART_STEM,
            chart::components_figure(inputs.forecast),
        ),
        (
            OVERLAY_CHART_STEM,
            chart::overlay_figure(inputs.history, inputs.frame),
        ),
    ];

    let mut written = Vec::with_capacity(figures.len());
    for (stem, plot) in figures {
        let path = output_dir.join(format!("{stem}.{}", format.extension()));
        save_figure(plot, &path, format)?;
        written.push(path);
    }
    info!(charts = written.len(), dir = %output_dir.display(), "Rendered charts");
    Ok(written)
}

/// Сохраняет фигуру; она принимается по значению и освобождается на любом выходе.
fn save_figure(plot: Plot, path: &Path, format: ImageFormat) -> Result<(), PipelineError> {
    ensure_parent(path)?;
    match format {
        ImageFormat::Html => {
            fs::write(path, plot.to_html()).map_err(|err| PipelineError::io(path, err))?;
        }
        ImageFormat::Png => write_png(&plot, path)?,
    }
    debug!(path = %path.display(), "Saved chart");
    Ok(())
}

#[cfg(feature = "static-images")]
fn write_png(plot: &Plot, path: &Path) -> Result<(), PipelineError> {
    plot.write_image(
        path,
        plotly::ImageFormat::PNG,
        chart::FIGURE_WIDTH,
        chart::FIGURE_HEIGHT,
        PNG_SCALE,
    )
    .map_err(|err| PipelineError::Render {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

#[cfg(not(feature = "static-images"))]
fn write_png(_plot: &Plot, path: &Path) -> Result<(), PipelineError> {
    Err(PipelineError::Render {
        path: path.to_path_buf(),
        message: "PNG output requires the `static-images` feature".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Component;
    use crate::series::PredictionRow;
    use chrono::{Duration, NaiveDate};
    use pretty_assertions::assert_eq;

    fn frame(n: usize) -> PredictionFrame {
        let start = NaiveDate::from_ymd_opt(2022, 12, 10).unwrap();
        PredictionFrame {
            rows: (0..n)
                .map(|i| PredictionRow {
                    date: start + Duration::days(i as i64),
                    forecasted_tickets: 100.0 + i as f64 / 3.0,
                    upper_confidence: 90.0,
                    lower_confidence: 110.25,
                })
                .collect(),
        }
    }

    #[test]
    fn csv_has_fixed_header_and_no_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prophet_forecast.csv");
        write_forecast_csv(&frame(2), &path).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "date,forecasted_tickets,upper_confidence,lower_confidence\n\
             2022-12-10,100.000000,90.000000,110.250000\n\
             2022-12-11,100.333333,90.000000,110.250000\n"
        );
    }

    #[test]
    fn empty_frame_writes_only_the_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prophet_forecast.csv");
        write_forecast_csv(&PredictionFrame::default(), &path).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "date,forecasted_tickets,upper_confidence,lower_confidence\n"
        );
    }

    #[test]
    fn preview_is_limited_and_aligned() {
        let mut out = Vec::new();
        write_preview(&frame(25), 10, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines.len(), 11);
        assert!(lines[0].contains("forecasted_tickets"));
        assert!(lines[1].starts_with("0 "));
        assert!(lines[10].starts_with("9 "));
        assert!(lines.iter().all(|line| line.len() == lines[0].len()));
    }

    #[test]
    fn preview_of_short_frame_shows_all_rows() {
        let mut out = Vec::new();
        write_preview(&frame(3), 10, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 4);
    }

    #[test]
    fn html_charts_are_written_with_stems() {
        let dir = tempfile::tempdir().unwrap();
        let history = TrainingFrame {
            ds: vec![NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()],
            y: vec![10.0],
        };
        let frame = frame(3);
        let forecast = RawForecast {
            ds: frame.dates(),
            yhat: vec![1.0; 3],
            yhat_lower: vec![0.0; 3],
            yhat_upper: vec![2.0; 3],
            trend: vec![1.0; 3],
            components: vec![Component {
                name: "weekly".to_string(),
                values: vec![0.0; 3],
            }],
        };
        let inputs = ChartInputs {
            history: &history,
            forecast: &forecast,
            frame: &frame,
        };
        let written = render_charts(&inputs, dir.path(), ImageFormat::Html).unwrap();

        let names: Vec<_> = written
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "prophet_forecast.html",
                "prophet_components.html",
                "historical_vs_forecast.html"
            ]
        );
        for path in &written {
            let html = fs::read_to_string(path).unwrap();
            assert!(html.contains("plotly"));
        }
    }

    #[test]
    fn nan_is_written_as_an_empty_cell() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prophet_forecast.csv");
        let mut frame = frame(1);
        frame.rows[0].forecasted_tickets = f64::NAN;
        frame.rows[0].lower_confidence = f64::INFINITY;
        write_forecast_csv(&frame, &path).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written.lines().nth(1), Some("2022-12-10,,90.000000,inf"));

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let record = reader.records().next().unwrap().unwrap();
        assert_eq!(&record[1], "");
    }

    #[test]
    fn default_format_writes_png_stems() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join(format!("{FORECAST_CHART_STEM}.{}", ImageFormat::default().extension()));
        assert_eq!(path.file_name().unwrap(), "prophet_forecast.png");
    }

    #[cfg(feature = "static-images")]
    #[test]
    fn png_export_failure_is_a_render_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prophet_forecast.png");
        match save_figure(Plot::new(), &path, ImageFormat::Png) {
            Ok(()) => assert!(path.exists()),
            Err(err) => assert!(matches!(err, PipelineError::Render { .. }), "{err}"),
        }
    }

    #[cfg(not(feature = "static-images"))]
    #[test]
    fn png_without_feature_is_a_render_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = save_figure(Plot::new(), &dir.path().join("x.png"), ImageFormat::Png)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Render { .. }));
    }
}
