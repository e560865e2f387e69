//! Сезонное окно: ежедневные даты повторяющегося многомесячного сезона.

use std::fmt;
use std::io::{self, Write};

use chrono::{Datelike, Duration, NaiveDate};
use itertools::Itertools;

/// С декабря по апрель.
pub const DEFAULT_SEASON_MONTHS: [u32; 5] = [12, 1, 2, 3, 4];

/// Множество номеров месяцев (1..=12), входящих в сезон.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SeasonMonths(u16);

impl SeasonMonths {
    pub fn new(months: &[u32]) -> Result<Self, String> {
        if months.is_empty() {
            return Err("season.months must not be empty".to_string());
        }
        let mut mask = 0u16;
        for &month in months {
            if !(1..=12).contains(&month) {
                return Err(format!("season.months contains invalid month {month}"));
            }
            mask |= 1 << month;
        }
        Ok(Self(mask))
    }

    pub const fn contains(self, month: u32) -> bool {
        month <= 12 && self.0 & (1 << month) != 0
    }

    pub fn iter(self) -> impl Iterator<Item = u32> {
        (1..=12).filter(move |month| self.contains(*month))
    }
}

impl Default for SeasonMonths {
    fn default() -> Self {
        let mask = DEFAULT_SEASON_MONTHS
            .iter()
            .fold(0u16, |mask, month| mask | (1 << month));
        Self(mask)
    }
}

impl fmt::Debug for SeasonMonths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Все даты из `[start, end]`, месяц которых входит в `months`, по возрастанию.
///
/// Диапазон строится целиком и затем фильтруется, поэтому набор месяцев
/// зависит только от покрытия `start..=end`. Перевёрнутый диапазон даёт
/// пустое окно.
pub fn season_window(start: NaiveDate, end: NaiveDate, months: SeasonMonths) -> Vec<NaiveDate> {
    if start > end {
        return Vec::new();
    }
    let span_days = (end - start).num_days();
    (0..=span_days)
        .map(|offset| start + Duration::days(offset))
        .filter(|date| months.contains(date.month()))
        .collect()
}

/// Сводка окна для консоли: число дней, первая и последняя дата, дни по месяцам.
pub fn write_season_summary(
    start: NaiveDate,
    end: NaiveDate,
    window: &[NaiveDate],
    out: &mut impl Write,
) -> io::Result<()> {
    writeln!(out, "Season window {start} .. {end}: {} days", window.len())?;
    if let (Some(first), Some(last)) = (window.first(), window.last()) {
        writeln!(out, "first: {first}")?;
        writeln!(out, "last:  {last}")?;
    }
    for ((year, month), days) in &window.iter().chunk_by(|date| (date.year(), date.month())) {
        writeln!(out, "{year}-{month:02}: {}", days.count())?;
    }
    Ok(())
}
