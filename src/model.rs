use std::collections::HashMap;
use std::error::Error;
use std::f64::consts::TAU;

use argmin::core::{CostFunction, Error as ArgminError, Executor, Gradient, State};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use chrono::NaiveDate;
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::debug;

use crate::holidays::{HolidayRegion, holidays_for_dates};
use crate::series::TrainingFrame;

const DEFAULT_MAX_ITERS: u64 = 400;
const DEFAULT_HISTORY: usize = 10;
const DEFAULT_TOL_GRAD: f64 = 1e-8;
const DEFAULT_TOL_COST: f64 = 1e-10;
const DEFAULT_N_CHANGEPOINTS: usize = 25;
const DEFAULT_CHANGEPOINT_RANGE: f64 = 0.8;
const DEFAULT_CHANGEPOINT_PRIOR: f64 = 0.05;
const DEFAULT_SEASONALITY_PRIOR: f64 = 10.0;
const DEFAULT_HOLIDAYS_PRIOR: f64 = 10.0;
const DEFAULT_INTERVAL_WIDTH: f64 = 0.8;
const TREND_PRIOR: f64 = 5.0;
const LAPLACE_EPS: f64 = 1e-4;
const MIN_VARIANCE: f64 = 1e-8;
const MIN_OBSERVATIONS: usize = 2;

const YEARLY: (&str, f64, usize) = ("yearly", 365.25, 10);
const WEEKLY: (&str, f64, usize) = ("weekly", 7.0, 3);
const DAILY: (&str, f64, usize) = ("daily", 1.0, 4);
pub const HOLIDAYS_COMPONENT: &str = "holidays";

/// Настроенная модель, которую можно обучить на выборке.
pub trait Forecaster {
    type Fitted: FittedModel;

    fn fit(&self, frame: &TrainingFrame) -> Result<Self::Fitted, Box<dyn Error>>;
}

/// Обученная модель: прогноз на произвольные даты в заданном порядке.
pub trait FittedModel {
    fn predict(&self, horizon: &[NaiveDate]) -> Result<RawForecast, Box<dyn Error>>;
}

/// Выход модели, выровненный по запрошенному горизонту.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawForecast {
    pub ds: Vec<NaiveDate>,
    pub yhat: Vec<f64>,
    pub yhat_lower: Vec<f64>,
    pub yhat_upper: Vec<f64>,
    pub trend: Vec<f64>,
    /// Аддитивные компоненты кроме тренда: сезонности и праздники.
    pub components: Vec<Component>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Component {
    pub name: String,
    pub values: Vec<f64>,
}

impl RawForecast {
    pub fn component(&self, name: &str) -> Option<&[f64]> {
        self.components
            .iter()
            .find(|component| component.name == name)
            .map(|component| component.values.as_slice())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModelConfig {
    pub yearly_seasonality: bool,
    pub weekly_seasonality: bool,
    pub daily_seasonality: bool,
    pub n_changepoints: usize,
    /// Доля истории, в которой допускаются точки излома.
    pub changepoint_range: f64,
    pub changepoint_prior_scale: f64,
    pub seasonality_prior_scale: f64,
    pub holidays_prior_scale: f64,
    pub interval_width: f64,
    pub max_iters: u64,
    pub history: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            yearly_seasonality: false,
            weekly_seasonality: true,
            daily_seasonality: false,
            n_changepoints: DEFAULT_N_CHANGEPOINTS,
            changepoint_range: DEFAULT_CHANGEPOINT_RANGE,
            changepoint_prior_scale: DEFAULT_CHANGEPOINT_PRIOR,
            seasonality_prior_scale: DEFAULT_SEASONALITY_PRIOR,
            holidays_prior_scale: DEFAULT_HOLIDAYS_PRIOR,
            interval_width: DEFAULT_INTERVAL_WIDTH,
            max_iters: DEFAULT_MAX_ITERS,
            history: DEFAULT_HISTORY,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.changepoint_range.is_finite()
            || self.changepoint_range <= 0.0
            || self.changepoint_range > 1.0
        {
            return Err("model.changepoint_range must be within (0, 1]".to_string());
        }
        for (name, value) in [
            ("changepoint_prior_scale", self.changepoint_prior_scale),
            ("seasonality_prior_scale", self.seasonality_prior_scale),
            ("holidays_prior_scale", self.holidays_prior_scale),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(format!("model.{name} must be > 0"));
            }
        }
        if !self.interval_width.is_finite()
            || self.interval_width <= 0.0
            || self.interval_width >= 1.0
        {
            return Err("model.interval_width must be within (0, 1)".to_string());
        }
        if self.max_iters == 0 {
            return Err("model.max_iters must be > 0".to_string());
        }
        Ok(())
    }

    fn seasonalities(&self) -> Vec<Seasonality> {
        [
            (self.yearly_seasonality, YEARLY),
            (self.weekly_seasonality, WEEKLY),
            (self.daily_seasonality, DAILY),
        ]
        .into_iter()
        .filter(|(enabled, _)| *enabled)
        .map(|(_, (name, period, order))| Seasonality {
            name,
            period,
            order,
        })
        .collect()
    }
}

/// Аддитивная модель: кусочно-линейный тренд с точками излома, сезонности
/// Фурье и индикатор на каждый праздник. Параметры берутся как MAP-оценка.
#[derive(Clone, Debug, Default)]
pub struct AdditiveModel {
    config: ModelConfig,
    holiday_region: Option<HolidayRegion>,
}

impl AdditiveModel {
    pub const fn new(config: ModelConfig) -> Self {
        Self {
            config,
            holiday_region: None,
        }
    }

    #[must_use]
    pub const fn with_country_holidays(mut self, region: HolidayRegion) -> Self {
        self.holiday_region = Some(region);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Seasonality {
    name: &'static str,
    period: f64,
    order: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Penalty {
    Gaussian(f64),
    Laplace(f64),
}

impl Penalty {
    fn cost(self, value: f64) -> f64 {
        match self {
            Self::Gaussian(scale) => 0.5 * (value / scale).powi(2),
            Self::Laplace(scale) => value.mul_add(value, LAPLACE_EPS * LAPLACE_EPS).sqrt() / scale,
        }
    }

    fn grad(self, value: f64) -> f64 {
        match self {
            Self::Gaussian(scale) => value / (scale * scale),
            Self::Laplace(scale) => {
                value / (value.mul_add(value, LAPLACE_EPS * LAPLACE_EPS).sqrt() * scale)
            }
        }
    }
}

/// Раскладка признаков, общая для обучения и прогноза.
#[derive(Clone, Debug)]
struct Design {
    start: NaiveDate,
    span_days: f64,
    changepoints: Vec<f64>,
    seasonalities: Vec<Seasonality>,
    holiday_region: Option<HolidayRegion>,
    holiday_names: Vec<&'static str>,
}

impl Design {
    fn trend_columns(&self) -> usize {
        2 + self.changepoints.len()
    }

    fn width(&self) -> usize {
        self.trend_columns()
            + self
                .seasonalities
                .iter()
                .map(|season| 2 * season.order)
                .sum::<usize>()
            + self.holiday_names.len()
    }

    #[allow(clippy::cast_precision_loss)]
    fn scaled_time(&self, date: NaiveDate) -> f64 {
        (date - self.start).num_days() as f64 / self.span_days
    }

    /// Индексы праздничных колонок, активных в каждую дату.
    fn holiday_lookup(&self, dates: &[NaiveDate]) -> HashMap<NaiveDate, Vec<usize>> {
        let mut lookup: HashMap<NaiveDate, Vec<usize>> = HashMap::new();
        let Some(region) = self.holiday_region else {
            return lookup;
        };
        for holiday in holidays_for_dates(region, dates) {
            if let Some(idx) = self.holiday_names.iter().position(|name| *name == holiday.name) {
                lookup.entry(holiday.date).or_default().push(idx);
            }
        }
        lookup
    }

    #[allow(clippy::cast_precision_loss)]
    fn row(&self, date: NaiveDate, active_holidays: &[usize]) -> Vec<f64> {
        let t = self.scaled_time(date);
        let mut row = Vec::with_capacity(self.width());
        row.push(1.0);
        row.push(t);
        row.extend(self.changepoints.iter().map(|cp| (t - cp).max(0.0)));

        // Абсолютные дни: недельная фаза привязана к календарю.
        let epoch_days = (date - NaiveDate::default()).num_days() as f64;
        for season in &self.seasonalities {
            for n in 1..=season.order {
                let angle = TAU * n as f64 * epoch_days / season.period;
                row.push(angle.sin());
                row.push(angle.cos());
            }
        }

        let offset = row.len();
        row.resize(offset + self.holiday_names.len(), 0.0);
        for idx in active_holidays {
            row[offset + idx] = 1.0;
        }
        row
    }

    fn matrix(&self, dates: &[NaiveDate]) -> Vec<Vec<f64>> {
        let lookup = self.holiday_lookup(dates);
        dates
            .iter()
            .map(|date| {
                let active = lookup.get(date).map_or(&[][..], Vec::as_slice);
                self.row(*date, active)
            })
            .collect()
    }

    fn penalties(&self, config: &ModelConfig) -> Vec<Penalty> {
        let mut penalties = vec![Penalty::Gaussian(TREND_PRIOR); 2];
        penalties.extend(
            self.changepoints
                .iter()
                .map(|_| Penalty::Laplace(config.changepoint_prior_scale)),
        );
        let seasonal_columns = self.width() - self.trend_columns() - self.holiday_names.len();
        penalties.extend(std::iter::repeat_n(
            Penalty::Gaussian(config.seasonality_prior_scale),
            seasonal_columns,
        ));
        penalties.extend(std::iter::repeat_n(
            Penalty::Gaussian(config.holidays_prior_scale),
            self.holiday_names.len(),
        ));
        penalties
    }
}

/// Точки излома в масштабированном времени: равномерно по первой доле
/// `range` строк истории, без первой строки.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn select_changepoints(t: &[f64], n_changepoints: usize, range: f64) -> Vec<f64> {
    let hist_size = (t.len() as f64 * range).floor() as usize;
    let n = n_changepoints.min(hist_size.saturating_sub(1));
    if n == 0 {
        return Vec::new();
    }
    let last = (hist_size - 1) as f64;
    let mut points: Vec<f64> = (1..=n)
        .map(|i| t[(last * i as f64 / n as f64).round() as usize])
        .collect();
    points.dedup();
    points
}

#[derive(Clone)]
struct AdditiveProblem {
    x: Vec<Vec<f64>>,
    y: Vec<f64>,
    penalties: Vec<Penalty>,
}

impl AdditiveProblem {
    fn residuals(&self, param: &[f64]) -> Vec<f64> {
        self.x
            .iter()
            .zip(&self.y)
            .map(|(row, y)| y - dot(row, param))
            .collect()
    }

    #[allow(clippy::cast_precision_loss)]
    fn variance(&self, residuals: &[f64]) -> f64 {
        let ssr: f64 = residuals.iter().map(|r| r * r).sum();
        (ssr / residuals.len() as f64).max(MIN_VARIANCE)
    }
}

impl CostFunction for AdditiveProblem {
    type Param = Vec<f64>;
    type Output = f64;

    #[allow(clippy::cast_precision_loss)]
    fn cost(&self, param: &Self::Param) -> Result<Self::Output, ArgminError> {
        // Шум наблюдений исключён профилированием: n/2 * ln(SSR / n).
        let residuals = self.residuals(param);
        let n = residuals.len() as f64;
        let mut cost = 0.5 * n * self.variance(&residuals).ln();
        for (value, penalty) in param.iter().zip(&self.penalties) {
            cost += penalty.cost(*value);
        }
        Ok(cost)
    }
}

impl Gradient for AdditiveProblem {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, param: &Self::Param) -> Result<Self::Gradient, ArgminError> {
        let residuals = self.residuals(param);
        let inv_var = 1.0 / self.variance(&residuals);
        let mut grad: Vec<f64> = param
            .iter()
            .zip(&self.penalties)
            .map(|(value, penalty)| penalty.grad(*value))
            .collect();
        for (row, r) in self.x.iter().zip(&residuals) {
            for (g, x) in grad.iter_mut().zip(row) {
                *g -= inv_var * r * x;
            }
        }
        Ok(grad)
    }
}

fn dot(row: &[f64], param: &[f64]) -> f64 {
    row.iter().zip(param).map(|(x, p)| x * p).sum()
}

#[derive(Clone, Debug)]
pub struct FittedAdditiveModel {
    design: Design,
    params: Vec<f64>,
    y_scale: f64,
    resid_std: f64,
    /// Ожидаемое число изломов на единицу масштабированного времени.
    changepoint_rate: f64,
    /// Средний модуль изменения наклона, масштаб будущих изломов.
    changepoint_scale: f64,
    z: f64,
}

impl Forecaster for AdditiveModel {
    type Fitted = FittedAdditiveModel;

    #[allow(clippy::cast_precision_loss)]
    fn fit(&self, frame: &TrainingFrame) -> Result<FittedAdditiveModel, Box<dyn Error>> {
        self.config.validate()?;
        if frame.ds.len() != frame.y.len() {
            return Err("ds/y must be the same length".into());
        }
        if frame.len() < MIN_OBSERVATIONS {
            return Err(format!(
                "need at least {MIN_OBSERVATIONS} observations, got {}",
                frame.len()
            )
            .into());
        }
        if frame.y.iter().any(|value| !value.is_finite()) {
            return Err("training target contains non-finite values".into());
        }

        let start = frame.ds[0];
        let end = frame.ds[frame.len() - 1];
        let span_days = ((end - start).num_days() as f64).max(1.0);
        let y_max = frame.y.iter().fold(0.0f64, |acc, value| acc.max(value.abs()));
        let y_scale = if y_max > 0.0 { y_max } else { 1.0 };
        let y: Vec<f64> = frame.y.iter().map(|value| value / y_scale).collect();

        let mut design = Design {
            start,
            span_days,
            changepoints: Vec::new(),
            seasonalities: self.config.seasonalities(),
            holiday_region: self.holiday_region,
            holiday_names: Vec::new(),
        };
        let t: Vec<f64> = frame.ds.iter().map(|d| design.scaled_time(*d)).collect();
        design.changepoints = select_changepoints(
            &t,
            self.config.n_changepoints,
            self.config.changepoint_range,
        );
        if let Some(region) = self.holiday_region {
            for holiday in holidays_for_dates(region, &frame.ds) {
                if !design.holiday_names.contains(&holiday.name) {
                    design.holiday_names.push(holiday.name);
                }
            }
        }

        let x = design.matrix(&frame.ds);
        let penalties = design.penalties(&self.config);

        // Старт с прямой через первое и последнее наблюдение.
        let mut init = vec![0.0; design.width()];
        let t_last = t[t.len() - 1];
        init[1] = if t_last > 0.0 {
            (y[y.len() - 1] - y[0]) / t_last
        } else {
            0.0
        };
        init[0] = y[0];

        let problem = AdditiveProblem { x, y, penalties };
        let linesearch = MoreThuenteLineSearch::new().with_c(1e-4, 0.9)?;
        let solver = LBFGS::new(linesearch, self.config.history)
            .with_tolerance_grad(DEFAULT_TOL_GRAD)?
            .with_tolerance_cost(DEFAULT_TOL_COST)?;
        let result = Executor::new(problem.clone(), solver)
            .configure(|state| state.param(init).max_iters(self.config.max_iters))
            .run()?;

        let params = result
            .state
            .get_best_param()
            .or_else(|| result.state.get_param())
            .ok_or("no parameters returned from optimizer")?
            .clone();
        if params.iter().any(|value| !value.is_finite()) {
            return Err("optimizer returned non-finite parameters".into());
        }

        let residuals = problem.residuals(&params);
        let resid_std = problem.variance(&residuals).sqrt();
        let deltas = &params[2..design.trend_columns()];
        let changepoint_scale = if deltas.is_empty() {
            0.0
        } else {
            deltas.iter().map(|delta| delta.abs()).sum::<f64>() / deltas.len() as f64
        };
        let changepoint_rate = deltas.len() as f64;
        let z = Normal::new(0.0, 1.0)?.inverse_cdf(0.5 + self.config.interval_width / 2.0);

        debug!(
            iterations = result.state.get_iter(),
            columns = design.width(),
            changepoints = design.changepoints.len(),
            holidays = design.holiday_names.len(),
            resid_std = resid_std * y_scale,
            "Fitted additive model"
        );

        Ok(FittedAdditiveModel {
            design,
            params,
            y_scale,
            resid_std,
            changepoint_rate,
            changepoint_scale,
            z,
        })
    }
}

impl FittedAdditiveModel {
    /// Стандартное отклонение прогноза (в масштабе модели) в момент `t`.
    ///
    /// После конца истории (`t > 1`) изломы появляются с исторической
    /// частотой и лапласовской величиной; накопленное отклонение тренда
    /// имеет дисперсию `rate * 2b^2 * h^3 / 3`.
    fn predictive_std(&self, t: f64) -> f64 {
        let h = (t - 1.0).max(0.0);
        let laplace_var = 2.0 * self.changepoint_scale * self.changepoint_scale;
        let trend_var = self.changepoint_rate * laplace_var * h.powi(3) / 3.0;
        self.resid_std.mul_add(self.resid_std, trend_var).sqrt()
    }
}

impl FittedModel for FittedAdditiveModel {
    fn predict(&self, horizon: &[NaiveDate]) -> Result<RawForecast, Box<dyn Error>> {
        let x = self.design.matrix(horizon);
        let trend_end = self.design.trend_columns();
        let partial = |row: &[f64], range: std::ops::Range<usize>| {
            dot(&row[range.clone()], &self.params[range]) * self.y_scale
        };

        let mut forecast = RawForecast {
            ds: horizon.to_vec(),
            ..RawForecast::default()
        };
        for (date, row) in horizon.iter().zip(&x) {
            let yhat = dot(row, &self.params) * self.y_scale;
            let margin = self.z * self.predictive_std(self.design.scaled_time(*date)) * self.y_scale;
            forecast.yhat.push(yhat);
            forecast.yhat_lower.push(yhat - margin);
            forecast.yhat_upper.push(yhat + margin);
            forecast.trend.push(partial(row, 0..trend_end));
        }

        let mut col = trend_end;
        for season in &self.design.seasonalities {
            let range = col..col + 2 * season.order;
            forecast.components.push(Component {
                name: season.name.to_string(),
                values: x.iter().map(|row| partial(row, range.clone())).collect(),
            });
            col = range.end;
        }
        if self.design.holiday_region.is_some() {
            let range = col..col + self.design.holiday_names.len();
            forecast.components.push(Component {
                name: HOLIDAYS_COMPONENT.to_string(),
                values: x.iter().map(|row| partial(row, range.clone())).collect(),
            });
        }
        Ok(forecast)
    }
}
