//! Календари государственных праздников для регрессоров модели.

use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HolidayRegion {
    Germany,
    Austria,
}

impl HolidayRegion {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Germany => "DE",
            Self::Austria => "AT",
        }
    }
}

impl FromStr for HolidayRegion {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "DE" | "GERMANY" => Ok(Self::Germany),
            "AT" | "AUSTRIA" => Ok(Self::Austria),
            other => Err(format!("unsupported holiday region: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Holiday {
    pub name: &'static str,
    pub date: NaiveDate,
}

/// Переходящие праздники как смещение в днях от Пасхи.
const GOOD_FRIDAY: i64 = -2;
const EASTER_MONDAY: i64 = 1;
const ASCENSION_DAY: i64 = 39;
const WHIT_MONDAY: i64 = 50;
const CORPUS_CHRISTI: i64 = 60;

const DE_FIXED: &[(&str, u32, u32)] = &[
    ("New Year's Day", 1, 1),
    ("Labour Day", 5, 1),
    ("German Unity Day", 10, 3),
    ("Christmas Day", 12, 25),
    ("Second Day of Christmas", 12, 26),
];

const DE_MOVABLE: &[(&str, i64)] = &[
    ("Good Friday", GOOD_FRIDAY),
    ("Easter Monday", EASTER_MONDAY),
    ("Ascension Day", ASCENSION_DAY),
    ("Whit Monday", WHIT_MONDAY),
];

const AT_FIXED: &[(&str, u32, u32)] = &[
    ("New Year's Day", 1, 1),
    ("Epiphany", 1, 6),
    ("Labour Day", 5, 1),
    ("Assumption Day", 8, 15),
    ("National Day", 10, 26),
    ("All Saints' Day", 11, 1),
    ("Immaculate Conception", 12, 8),
    ("Christmas Day", 12, 25),
    ("St. Stephen's Day", 12, 26),
];

const AT_MOVABLE: &[(&str, i64)] = &[
    ("Easter Monday", EASTER_MONDAY),
    ("Ascension Day", ASCENSION_DAY),
    ("Whit Monday", WHIT_MONDAY),
    ("Corpus Christi", CORPUS_CHRISTI),
];

/// Григорианская Пасха (анонимный григорианский алгоритм).
pub fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year.rem_euclid(19);
    let b = year.div_euclid(100);
    let c = year.rem_euclid(100);
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15).rem_euclid(30);
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k).rem_euclid(7);
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, u32::try_from(month).ok()?, u32::try_from(day).ok()?)
}

/// Праздники региона за годы `first_year..=last_year`, по возрастанию даты.
pub fn holidays(region: HolidayRegion, first_year: i32, last_year: i32) -> Vec<Holiday> {
    let (fixed, movable) = match region {
        HolidayRegion::Germany => (DE_FIXED, DE_MOVABLE),
        HolidayRegion::Austria => (AT_FIXED, AT_MOVABLE),
    };

    let mut out = Vec::new();
    for year in first_year..=last_year {
        for &(name, month, day) in fixed {
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                out.push(Holiday { name, date });
            }
        }
        if let Some(easter) = easter_sunday(year) {
            for &(name, offset) in movable {
                out.push(Holiday {
                    name,
                    date: easter + Duration::days(offset),
                });
            }
        }
    }
    out.sort_by_key(|holiday| holiday.date);
    out
}

/// Праздники за все годы, которые задевают `dates`.
pub fn holidays_for_dates(region: HolidayRegion, dates: &[NaiveDate]) -> Vec<Holiday> {
    let years = dates.iter().map(Datelike::year);
    match (years.clone().min(), years.max()) {
        (Some(first), Some(last)) => holidays(region, first, last),
        _ => Vec::new(),
    }
}
