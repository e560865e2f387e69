//! Построение Plotly-графиков прогноза.

use itertools::Itertools;
use plotly::color::{Rgb, Rgba};
use plotly::common::{Anchor, DashType, Fill, Font, Line, Marker, Mode, Orientation, Title};
use plotly::layout::{
    Axis, GridPattern, ItemClick, Layout, LayoutGrid, Legend, Margin, RowOrder, TicksDirection,
};
use plotly::{Configuration, Plot, Scatter};

use crate::constants::DATE_FORMAT;
use crate::model::{HOLIDAYS_COMPONENT, RawForecast};
use crate::series::{PredictionFrame, TrainingFrame};

const MAX_PLOT_POINTS: usize = 1500;
const AXIS_REF_X: &str = "x";
const LABEL_ACTUAL: &str = "Actual";
const LABEL_FORECAST: &str = "Forecast";
const LABEL_INTERVAL: &str = "Uncertainty interval";
const LABEL_TRAINING: &str = "Training data";
const LABEL_TICKETS: &str = "Valid tickets";
const LABEL_DATE: &str = "Date";
const TITLE_FORECAST: &str = "Ski ticket forecast";
const TITLE_COMPONENTS: &str = "Forecast components";
const TITLE_OVERLAY: &str = "Historical vs forecasted tickets";
const FONT_FAMILY: &str = "PT Sans, Arial, sans-serif";
const TICK_FORMAT_MONTH_YEAR: &str = "%b\n%Y";
const FONT_SIZE_BASE: usize = 12;
const FONT_SIZE_TITLE: usize = 16;
const FONT_SIZE_AXIS_TITLE: usize = 13;
const FONT_SIZE_AXIS_TICK: usize = 11;
const LINE_WIDTH_MAIN: f64 = 1.6;
const LINE_WIDTH_FORECAST: f64 = 2.2;
const LINE_WIDTH_COMPONENT: f64 = 1.8;
const MARKER_SIZE_HISTORY: usize = 3;
const LEGEND_X: f64 = 0.5;
const LEGEND_Y: f64 = 1.02;
const LEGEND_FONT_SIZE: usize = 12;
const LEGEND_BORDER_WIDTH: usize = 1;
const MARGIN_LEFT: usize = 80;
const MARGIN_RIGHT: usize = 40;
const MARGIN_TOP: usize = 80;
const MARGIN_BOTTOM: usize = 60;
const MARGIN_PAD: usize = 8;
const TICK_LENGTH: usize = 6;
const AXIS_GRID_WIDTH: usize = 1;
const COMPONENT_ROW_HEIGHT: usize = 260;
pub(super) const FIGURE_WIDTH: usize = 1200;
pub(super) const FIGURE_HEIGHT: usize = 600;
const COLOR_HISTORY: (u8, u8, u8) = (20, 20, 20);
const COLOR_HISTORY_LINE: (u8, u8, u8) = (90, 90, 90);
const COLOR_FORECAST: (u8, u8, u8) = (36, 100, 166);
const COLOR_TRANSPARENT: (u8, u8, u8, f64) = (36, 100, 166, 0.0);
const COLOR_BAND: (u8, u8, u8, f64) = (36, 100, 166, 0.2);
const COLOR_OVERLAY_FORECAST: (u8, u8, u8) = (200, 67, 46);
const COLOR_OVERLAY_BAND: (u8, u8, u8, f64) = (220, 82, 60, 0.2);
const COLOR_TEXT_BASE: (u8, u8, u8) = (40, 40, 40);
const COLOR_AXIS_TICK: (u8, u8, u8, f64) = (0, 0, 0, 0.45);
const COLOR_AXIS_LINE: (u8, u8, u8, f64) = (0, 0, 0, 0.35);
const COLOR_AXIS_GRID: (u8, u8, u8, f64) = (0, 0, 0, 0.08);
const COLOR_LEGEND_BG: (u8, u8, u8, f64) = (255, 255, 255, 0.75);
const COLOR_LEGEND_BORDER: (u8, u8, u8, f64) = (210, 210, 210, 0.8);

fn rgb(color: (u8, u8, u8)) -> Rgb {
    Rgb::new(color.0, color.1, color.2)
}

fn rgba(color: (u8, u8, u8, f64)) -> Rgba {
    Rgba::new(color.0, color.1, color.2, color.3)
}

fn date_labels(dates: &[chrono::NaiveDate]) -> Vec<String> {
    dates
        .iter()
        .map(|date| date.format(DATE_FORMAT).to_string())
        .collect_vec()
}

fn axis() -> Axis {
    Axis::new()
        .tick_font(Font::new().size(FONT_SIZE_AXIS_TICK))
        .ticks(TicksDirection::Outside)
        .tick_length(TICK_LENGTH)
        .tick_color(rgba(COLOR_AXIS_TICK))
        .show_line(true)
        .line_color(rgba(COLOR_AXIS_LINE))
        .grid_color(rgba(COLOR_AXIS_GRID))
        .grid_width(AXIS_GRID_WIDTH)
        .auto_margin(true)
}

fn axis_title(text: &str) -> Title {
    Title::with_text(text).font(Font::new().size(FONT_SIZE_AXIS_TITLE))
}

fn base_layout(title: &str) -> Layout {
    Layout::new()
        .title(Title::with_text(title).font(Font::new().size(FONT_SIZE_TITLE)))
        .font(
            Font::new()
                .family(FONT_FAMILY)
                .size(FONT_SIZE_BASE)
                .color(rgb(COLOR_TEXT_BASE)),
        )
        .width(FIGURE_WIDTH)
        .height(FIGURE_HEIGHT)
        .margin(
            Margin::new()
                .left(MARGIN_LEFT)
                .right(MARGIN_RIGHT)
                .top(MARGIN_TOP)
                .bottom(MARGIN_BOTTOM)
                .pad(MARGIN_PAD),
        )
        .show_legend(true)
        .legend(
            Legend::new()
                .orientation(Orientation::Horizontal)
                .item_click(ItemClick::False)
                .item_double_click(ItemClick::False)
                .x(LEGEND_X)
                .x_anchor(Anchor::Center)
                .y(LEGEND_Y)
                .y_anchor(Anchor::Bottom)
                .font(Font::new().size(LEGEND_FONT_SIZE))
                .background_color(rgba(COLOR_LEGEND_BG))
                .border_color(rgba(COLOR_LEGEND_BORDER))
                .border_width(LEGEND_BORDER_WIDTH),
        )
        .x_axis(
            axis()
                .title(axis_title(LABEL_DATE))
                .tick_format(TICK_FORMAT_MONTH_YEAR),
        )
        .y_axis(
            axis()
                .title(axis_title(LABEL_TICKETS))
                .separate_thousands(true),
        )
}

/// Полоса неопределённости: прозрачная нижняя граница и заливка до верхней.
fn add_band(
    plot: &mut Plot,
    dates: &[String],
    lower: &[f64],
    upper: &[f64],
    fill: (u8, u8, u8, f64),
) {
    plot.add_trace(
        Scatter::new(dates.to_vec(), lower.to_vec())
            .mode(Mode::Lines)
            .line(Line::new().color(rgba(COLOR_TRANSPARENT)))
            .show_legend(false),
    );
    plot.add_trace(
        Scatter::new(dates.to_vec(), upper.to_vec())
            .mode(Mode::Lines)
            .fill(Fill::ToNextY)
            .fill_color(rgba(fill))
            .line(Line::new().color(rgba(COLOR_TRANSPARENT)))
            .name(LABEL_INTERVAL),
    );
}

/// Стандартный график модели: точки истории, линия прогноза и интервал.
pub(super) fn forecast_figure(history: &TrainingFrame, forecast: &RawForecast) -> Plot {
    let (history_dates, history_values) =
        downsample_min_max(&date_labels(&history.ds), &history.y, MAX_PLOT_POINTS);
    let forecast_dates = date_labels(&forecast.ds);

    let mut plot = Plot::new();
    plot.add_trace(
        Scatter::new(history_dates, history_values)
            .mode(Mode::Markers)
            .marker(Marker::new().size(MARKER_SIZE_HISTORY).color(rgb(COLOR_HISTORY)))
            .name(LABEL_ACTUAL),
    );
    add_band(
        &mut plot,
        &forecast_dates,
        &forecast.yhat_lower,
        &forecast.yhat_upper,
        COLOR_BAND,
    );
    plot.add_trace(
        Scatter::new(forecast_dates, forecast.yhat.clone())
            .mode(Mode::Lines)
            .line(
                Line::new()
                    .color(rgb(COLOR_FORECAST))
                    .width(LINE_WIDTH_FORECAST),
            )
            .name(LABEL_FORECAST),
    );

    plot.set_layout(base_layout(TITLE_FORECAST));
    plot.set_configuration(Configuration::new().responsive(true));
    plot
}

fn component_axes(layout: Layout, row: usize, y_axis: Axis, x_axis: Axis) -> Layout {
    match row {
        1 => layout.x_axis(x_axis).y_axis(y_axis),
        2 => layout.x_axis2(x_axis).y_axis2(y_axis),
        3 => layout.x_axis3(x_axis).y_axis3(y_axis),
        4 => layout.x_axis4(x_axis).y_axis4(y_axis),
        5 => layout.x_axis5(x_axis).y_axis5(y_axis),
        _ => layout,
    }
}

/// Компоненты прогноза по отдельным строкам: тренд, праздники, сезонности.
pub(super) fn components_figure(forecast: &RawForecast) -> Plot {
    let dates = date_labels(&forecast.ds);
    let mut panels: Vec<(&str, &[f64])> = vec![("trend", forecast.trend.as_slice())];
    if let Some(values) = forecast.component(HOLIDAYS_COMPONENT) {
        panels.push((HOLIDAYS_COMPONENT, values));
    }
    panels.extend(
        forecast
            .components
            .iter()
            .filter(|component| component.name != HOLIDAYS_COMPONENT)
            .map(|component| (component.name.as_str(), component.values.as_slice())),
    );

    let mut plot = Plot::new();
    let mut layout = base_layout(TITLE_COMPONENTS)
        .height(COMPONENT_ROW_HEIGHT * panels.len())
        .show_legend(false)
        .grid(
            LayoutGrid::new()
                .rows(panels.len())
                .columns(1)
                .pattern(GridPattern::Independent)
                .row_order(RowOrder::TopToBottom),
        );
    for (idx, (name, values)) in panels.iter().enumerate() {
        let row = idx + 1;
        plot.add_trace(
            Scatter::new(dates.clone(), values.to_vec())
                .mode(Mode::Lines)
                .line(
                    Line::new()
                        .color(rgb(COLOR_FORECAST))
                        .width(LINE_WIDTH_COMPONENT),
                )
                .name(*name)
                .x_axis(&format!("x{row}"))
                .y_axis(&format!("y{row}")),
        );
        let x_axis = if row == 1 {
            axis().tick_format(TICK_FORMAT_MONTH_YEAR)
        } else {
            axis().matches(AXIS_REF_X).tick_format(TICK_FORMAT_MONTH_YEAR)
        };
        layout = component_axes(layout, row, axis().title(axis_title(name)), x_axis);
    }

    plot.set_layout(layout);
    plot.set_configuration(Configuration::new().responsive(true));
    plot
}

/// Наложение истории и итоговой таблицы прогноза.
pub(super) fn overlay_figure(history: &TrainingFrame, frame: &PredictionFrame) -> Plot {
    let (history_dates, history_values) =
        downsample_min_max(&date_labels(&history.ds), &history.y, MAX_PLOT_POINTS);
    let forecast_dates = date_labels(&frame.dates());
    let (point, (model_lower, model_upper)): (Vec<f64>, (Vec<f64>, Vec<f64>)) = frame
        .rows
        .iter()
        .map(|row| {
            (
                row.forecasted_tickets,
                (row.upper_confidence, row.lower_confidence),
            )
        })
        .unzip();

    let mut plot = Plot::new();
    plot.add_trace(
        Scatter::new(history_dates, history_values)
            .mode(Mode::Lines)
            .line(
                Line::new()
                    .color(rgb(COLOR_HISTORY_LINE))
                    .width(LINE_WIDTH_MAIN)
                    .simplify(true),
            )
            .name(LABEL_TRAINING),
    );
    add_band(
        &mut plot,
        &forecast_dates,
        &model_lower,
        &model_upper,
        COLOR_OVERLAY_BAND,
    );
    plot.add_trace(
        Scatter::new(forecast_dates, point)
            .mode(Mode::Lines)
            .line(
                Line::new()
                    .color(rgb(COLOR_OVERLAY_FORECAST))
                    .width(LINE_WIDTH_FORECAST)
                    .dash(DashType::Dash),
            )
            .name(LABEL_FORECAST),
    );

    plot.set_layout(base_layout(TITLE_OVERLAY));
    plot.set_configuration(Configuration::new().responsive(true));
    plot
}

/// Даунсемплит ряд, сохраняя минимум/максимум в бакетах, чтобы ускорить отрисовку.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn downsample_min_max<X: Clone>(x: &[X], y: &[f64], max_points: usize) -> (Vec<X>, Vec<f64>) {
    if x.len() <= max_points || x.len() != y.len() || max_points < 3 {
        return (x.to_vec(), y.to_vec());
    }

    let len = y.len();
    let bucket_count = (max_points.saturating_sub(2) / 2).max(1);
    let bucket_size = ((len - 2) as f64 / bucket_count as f64).ceil() as usize;

    let mut indices = vec![0];
    for (start, end) in (1..len - 1)
        .step_by(bucket_size.max(1))
        .map(|start| (start, (start + bucket_size).min(len - 1)))
    {
        let bucket = start..end;
        let min_idx = bucket
            .clone()
            .min_by(|a, b| y[*a].total_cmp(&y[*b]))
            .unwrap_or(start);
        let max_idx = bucket
            .max_by(|a, b| y[*a].total_cmp(&y[*b]))
            .unwrap_or(start);
        indices.push(min_idx.min(max_idx));
        indices.push(min_idx.max(max_idx));
    }
    indices.push(len - 1);
    indices.dedup();

    indices
        .into_iter()
        .map(|idx| (x[idx].clone(), y[idx]))
        .unzip()
}
