//! Проверки прогноза. Любая проверка только сообщает результат и никогда не
//! прерывает экспорт.

use std::str::FromStr;

use crate::series::PredictionFrame;

pub const NON_NEGATIVE_PASSED: &str = "[OK] NEGATIVE PREDICTION VALIDATION PASSED";
pub const NON_NEGATIVE_WARNING: &str =
    "[X] WARNING! The predicted numbers of tickets have negative values!";
pub const FINITE_PASSED: &str = "[OK] FINITE PREDICTION VALIDATION PASSED";
pub const FINITE_WARNING: &str = "[X] WARNING! The forecast contains NaN or infinite values!";
pub const INTERVAL_PASSED: &str = "[OK] CONFIDENCE INTERVAL VALIDATION PASSED";
pub const INTERVAL_WARNING: &str =
    "[X] WARNING! The confidence interval does not contain the forecast!";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub name: &'static str,
    pub passed: bool,
    pub message: &'static str,
}

impl Verdict {
    const fn from_outcome(
        name: &'static str,
        passed: bool,
        ok: &'static str,
        warn: &'static str,
    ) -> Self {
        Self {
            name,
            passed,
            message: if passed { ok } else { warn },
        }
    }
}

pub trait ForecastCheck {
    fn name(&self) -> &'static str;
    fn check(&self, frame: &PredictionFrame) -> Verdict;
}

/// Ноль считается допустимым значением.
pub fn check_non_negative(frame: &PredictionFrame) -> Verdict {
    let passed = !frame.rows.iter().any(|row| row.forecasted_tickets < 0.0);
    Verdict::from_outcome(
        CheckKind::NonNegative.name(),
        passed,
        NON_NEGATIVE_PASSED,
        NON_NEGATIVE_WARNING,
    )
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NonNegative;

#[derive(Clone, Copy, Debug, Default)]
pub struct Finite;

#[derive(Clone, Copy, Debug, Default)]
pub struct IntervalBrackets;

impl ForecastCheck for NonNegative {
    fn name(&self) -> &'static str {
        CheckKind::NonNegative.name()
    }

    fn check(&self, frame: &PredictionFrame) -> Verdict {
        check_non_negative(frame)
    }
}

impl ForecastCheck for Finite {
    fn name(&self) -> &'static str {
        CheckKind::Finite.name()
    }

    fn check(&self, frame: &PredictionFrame) -> Verdict {
        let passed = frame.rows.iter().all(|row| {
            row.forecasted_tickets.is_finite()
                && row.upper_confidence.is_finite()
                && row.lower_confidence.is_finite()
        });
        Verdict::from_outcome(self.name(), passed, FINITE_PASSED, FINITE_WARNING)
    }
}

impl ForecastCheck for IntervalBrackets {
    fn name(&self) -> &'static str {
        CheckKind::Interval.name()
    }

    fn check(&self, frame: &PredictionFrame) -> Verdict {
        // upper_confidence хранит нижнюю границу модели, lower_confidence верхнюю.
        let passed = frame.rows.iter().all(|row| {
            row.upper_confidence <= row.forecasted_tickets
                && row.forecasted_tickets <= row.lower_confidence
        });
        Verdict::from_outcome(self.name(), passed, INTERVAL_PASSED, INTERVAL_WARNING)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckKind {
    NonNegative,
    Finite,
    Interval,
}

impl CheckKind {
    pub const ALL: [Self; 3] = [Self::NonNegative, Self::Finite, Self::Interval];

    pub const fn name(self) -> &'static str {
        match self {
            Self::NonNegative => "non-negative",
            Self::Finite => "finite",
            Self::Interval => "interval",
        }
    }

    pub fn build(self) -> Box<dyn ForecastCheck> {
        match self {
            Self::NonNegative => Box::new(NonNegative),
            Self::Finite => Box::new(Finite),
            Self::Interval => Box::new(IntervalBrackets),
        }
    }
}

impl FromStr for CheckKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == normalized)
            .ok_or_else(|| {
                format!(
                    "unknown check '{raw}', expected one of: {}",
                    Self::ALL.map(Self::name).join(", ")
                )
            })
    }
}

/// Прогоняет проверки в заданном порядке; результат каждой возвращается отдельно.
pub fn run_checks(kinds: &[CheckKind], frame: &PredictionFrame) -> Vec<Verdict> {
    kinds
        .iter()
        .map(|kind| {
            let verdict = kind.build().check(frame);
            if verdict.passed {
                tracing::debug!(check = verdict.name, "Validation passed");
            } else {
                tracing::warn!(check = verdict.name, "Validation failed");
            }
            verdict
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::PredictionRow;
    use chrono::{Duration, NaiveDate};

    fn frame(points: &[f64]) -> PredictionFrame {
        let start = NaiveDate::from_ymd_opt(2022, 12, 10).unwrap();
        PredictionFrame {
            rows: points
                .iter()
                .enumerate()
                .map(|(idx, value)| PredictionRow {
                    date: start + Duration::days(idx as i64),
                    forecasted_tickets: *value,
                    upper_confidence: value - 10.0,
                    lower_confidence: value + 10.0,
                })
                .collect(),
        }
    }

    #[test]
    fn non_negative_passes_for_positive_values() {
        let verdict = check_non_negative(&frame(&[1.0, 250.0, 3000.5]));
        assert!(verdict.passed);
        assert_eq!(verdict.message, "[OK] NEGATIVE PREDICTION VALIDATION PASSED");
    }

    #[test]
    fn non_negative_warns_on_any_negative_value() {
        let verdict = check_non_negative(&frame(&[10.0, -0.5, 20.0]));
        assert!(!verdict.passed);
        assert_eq!(
            verdict.message,
            "[X] WARNING! The predicted numbers of tickets have negative values!"
        );
    }

    #[test]
    fn zero_is_not_negative() {
        assert!(check_non_negative(&frame(&[0.0, 0.0])).passed);
        assert!(check_non_negative(&frame(&[-0.0])).passed);
    }

    #[test]
    fn empty_frame_passes_every_check() {
        let empty = PredictionFrame::default();
        assert!(run_checks(&CheckKind::ALL, &empty).iter().all(|v| v.passed));
    }

    #[test]
    fn finite_check_flags_nan() {
        let mut bad = frame(&[1.0, 2.0]);
        bad.rows[1].lower_confidence = f64::NAN;
        assert!(!Finite.check(&bad).passed);
        assert!(Finite.check(&frame(&[1.0])).passed);
    }

    #[test]
    fn interval_check_uses_crossed_names() {
        assert!(IntervalBrackets.check(&frame(&[5.0, -5.0])).passed);

        let mut swapped = frame(&[5.0]);
        let row = &mut swapped.rows[0];
        std::mem::swap(&mut row.upper_confidence, &mut row.lower_confidence);
        let verdict = IntervalBrackets.check(&swapped);
        assert!(!verdict.passed);
        assert_eq!(verdict.message, INTERVAL_WARNING);
    }

    #[test]
    fn checks_run_in_configured_order() {
        let verdicts = run_checks(
            &[CheckKind::Interval, CheckKind::NonNegative],
            &frame(&[-1.0]),
        );
        let names: Vec<_> = verdicts.iter().map(|v| v.name).collect();
        assert_eq!(names, vec!["interval", "non-negative"]);
        assert!(verdicts[0].passed);
        assert!(!verdicts[1].passed);
    }

    #[test]
    fn check_names_parse() {
        assert_eq!("non-negative".parse(), Ok(CheckKind::NonNegative));
        assert_eq!("Non_Negative".parse(), Ok(CheckKind::NonNegative));
        assert_eq!(" finite ".parse(), Ok(CheckKind::Finite));
        assert_eq!("interval".parse(), Ok(CheckKind::Interval));
        let err = "monotonic".parse::<CheckKind>().unwrap_err();
        assert!(err.contains("non-negative, finite, interval"));
    }
}
