//! Общие константы форматирования и имена выходных файлов.

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub const FORECAST_CSV_NAME: &str = "prophet_forecast.csv";
pub const FORECAST_CHART_STEM: &str = "prophet_forecast";
pub const COMPONENTS_CHART_STEM: &str = "prophet_components";
pub const OVERLAY_CHART_STEM: &str = "historical_vs_forecast";

pub const PREVIEW_ROWS: usize = 10;
