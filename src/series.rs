//! Обучающая выборка и итоговая таблица прогноза.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::{info, warn};

use crate::config::UnparseableDates;
use crate::data::RawTicketRecord;
use crate::error::PipelineError;
use crate::model::RawForecast;

const DATE_FORMAT_ISO: &str = "%Y-%m-%d";
const DATE_FORMAT_SLASH: &str = "%Y/%m/%d";
const DATE_FORMAT_DOTTED: &str = "%d.%m.%Y";
const DATETIME_FORMAT_SPACE: &str = "%Y-%m-%d %H:%M:%S";
const DATETIME_FORMAT_T: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Clone, Copy, Debug)]
enum DateFormatHint {
    Iso,
    DateTimeSpace,
    DateTimeT,
    Rfc3339,
    Dotted,
    Slash,
}

impl DateFormatHint {
    const ALL: [Self; 6] = [
        Self::Iso,
        Self::DateTimeSpace,
        Self::DateTimeT,
        Self::Rfc3339,
        Self::Dotted,
        Self::Slash,
    ];

    fn parse(self, raw: &str) -> Option<NaiveDate> {
        match self {
            Self::Iso => NaiveDate::parse_from_str(raw, DATE_FORMAT_ISO).ok(),
            Self::DateTimeSpace => NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT_SPACE)
                .ok()
                .map(|dt| dt.date()),
            Self::DateTimeT => NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT_T)
                .ok()
                .map(|dt| dt.date()),
            Self::Rfc3339 => DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.naive_local().date()),
            Self::Dotted => NaiveDate::parse_from_str(raw, DATE_FORMAT_DOTTED).ok(),
            Self::Slash => NaiveDate::parse_from_str(raw, DATE_FORMAT_SLASH).ok(),
        }
    }
}

/// Разбирает сырую дату; `None` вместо ошибки, если ни один формат не подошёл.
/// Последний удачный формат пробуется первым.
fn coerce_date(raw: &str, hint: &mut Option<DateFormatHint>) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(known) = *hint
        && let Some(parsed) = known.parse(trimmed)
    {
        return Some(parsed);
    }
    DateFormatHint::ALL.into_iter().find_map(|candidate| {
        let parsed = candidate.parse(trimmed)?;
        *hint = Some(candidate);
        Some(parsed)
    })
}

/// Вход модели: `ds` по возрастанию, `y` выровнен по нему.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrainingFrame {
    pub ds: Vec<NaiveDate>,
    pub y: Vec<f64>,
}

impl TrainingFrame {
    pub fn len(&self) -> usize {
        self.ds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ds.is_empty()
    }
}

/// Учёт строк при построении выборки.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub total: usize,
    pub kept: usize,
    pub after_cutoff: usize,
    pub unparseable: usize,
    pub missing_target: usize,
}

/// Строит обучающую выборку из сырых записей.
///
/// Строки с датой `cutoff` и позже исключаются. Строки с неразборчивой датой
/// отбрасываются или прерывают сборку в зависимости от `policy`. Строки без
/// числа билетов отбрасываются. Сортировка по дате устойчивая, дубликаты
/// дней сохраняют исходный порядок.
pub fn build_training_frame(
    records: &[RawTicketRecord],
    cutoff: NaiveDate,
    policy: UnparseableDates,
) -> Result<(TrainingFrame, FrameReport), PipelineError> {
    let mut report = FrameReport {
        total: records.len(),
        ..FrameReport::default()
    };
    let mut hint = None;
    let mut rows: Vec<(NaiveDate, f64)> = Vec::with_capacity(records.len());

    for record in records {
        let raw = record.ski_day.as_deref().unwrap_or_default();
        let Some(ds) = coerce_date(raw, &mut hint) else {
            if policy == UnparseableDates::Fail {
                return Err(PipelineError::UnparseableDate {
                    raw: raw.to_string(),
                });
            }
            report.unparseable += 1;
            continue;
        };
        if ds >= cutoff {
            report.after_cutoff += 1;
            continue;
        }
        let Some(y) = record.valid_tickets.filter(|value| value.is_finite()) else {
            report.missing_target += 1;
            continue;
        };
        rows.push((ds, y));
    }

    rows.sort_by_key(|(ds, _)| *ds);
    report.kept = rows.len();
    let (ds, y) = rows.into_iter().unzip();

    if report.unparseable > 0 {
        warn!(
            rows = report.unparseable,
            "Dropped training rows with unparseable dates"
        );
    }
    if report.missing_target > 0 {
        warn!(
            rows = report.missing_target,
            "Dropped training rows without a ticket count"
        );
    }
    info!(
        total = report.total,
        kept = report.kept,
        after_cutoff = report.after_cutoff,
        cutoff = %cutoff,
        "Built training frame"
    );

    Ok((TrainingFrame { ds, y }, report))
}

/// Одна строка итоговой таблицы прогноза.
///
/// Имена границ перекрёстные: `upper_confidence` берётся из нижней границы
/// модели, `lower_confidence` из верхней. Порядок колонок совпадает с CSV.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PredictionRow {
    pub date: NaiveDate,
    pub forecasted_tickets: f64,
    pub upper_confidence: f64,
    pub lower_confidence: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PredictionFrame {
    pub rows: Vec<PredictionRow>,
}

impl PredictionFrame {
    /// Переименовывает и отбирает четыре колонки, сохраняя порядок строк модели.
    pub fn from_forecast(forecast: &RawForecast) -> Result<Self, PipelineError> {
        let n = forecast.ds.len();
        if forecast.yhat.len() != n || forecast.yhat_lower.len() != n || forecast.yhat_upper.len() != n
        {
            return Err(PipelineError::Model(format!(
                "prediction columns have mismatched lengths: ds={n}, yhat={}, yhat_lower={}, yhat_upper={}",
                forecast.yhat.len(),
                forecast.yhat_lower.len(),
                forecast.yhat_upper.len()
            )));
        }
        let rows = (0..n)
            .map(|idx| PredictionRow {
                date: forecast.ds[idx],
                forecasted_tickets: forecast.yhat[idx],
                upper_confidence: forecast.yhat_lower[idx],
                lower_confidence: forecast.yhat_upper[idx],
            })
            .collect();
        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.rows.iter().map(|row| row.date).collect()
    }
}
