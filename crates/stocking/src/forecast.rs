//! Daily demand forecasting with additive exponential smoothing.
//!
//! Interaction values are summed per UTC calendar date into a contiguous
//! daily series (missing days are zero). With at least two full seasons the
//! series is fit with additive Holt-Winters (level, trend, seasonality);
//! shorter series fall back to Holt's linear trend. Smoothing parameters are
//! picked by grid search on in-sample one-step-ahead squared error. Only the
//! most recent `max_history_days` of the series are fitted.

use chrono::{Days, NaiveDate};
use market_core::config::ForecastConfig;
use market_core::types::Interaction;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

const SMOOTHING_GRID: [f64; 5] = [0.1, 0.3, 0.5, 0.7, 0.9];
/// Two-sided 80% normal interval.
const INTERVAL_Z: f64 = 1.2816;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
    /// False for fitted historical days, true for the projected horizon.
    pub projected: bool,
}

pub struct DemandForecaster {
    horizon: usize,
    season_length: usize,
    max_history_days: usize,
}

struct Fit {
    fitted: Vec<f64>,
    level: f64,
    trend: f64,
    season: Option<Vec<f64>>,
    sse: f64,
    residual_count: usize,
}

impl Fit {
    fn project(&self, steps_ahead: usize, observed: usize) -> f64 {
        let base = self.level + steps_ahead as f64 * self.trend;
        match &self.season {
            Some(season) => base + season[(observed + steps_ahead - 1) % season.len()],
            None => base,
        }
    }

    fn sigma(&self) -> f64 {
        (self.sse / self.residual_count.max(1) as f64).sqrt()
    }
}

impl DemandForecaster {
    pub fn new(config: &ForecastConfig) -> Self {
        Self {
            horizon: config.horizon_days,
            season_length: config.season_length.max(2),
            max_history_days: config.max_history_days.max(2),
        }
    }

    /// Contiguous daily totals over the fitted window, ending at the last
    /// observed date.
    pub fn daily_series(&self, interactions: &[Interaction]) -> Vec<(NaiveDate, f64)> {
        densify(&self.recent_totals(interactions))
    }

    fn recent_totals(&self, interactions: &[Interaction]) -> BTreeMap<NaiveDate, f64> {
        let mut totals = aggregate(interactions);
        let Some((&last, _)) = totals.last_key_value() else {
            return totals;
        };
        let span = Days::new(self.max_history_days as u64 - 1);
        if let Some(cutoff) = last.checked_sub_days(span) {
            let dropped = totals.range(..cutoff).count();
            if dropped > 0 {
                debug!(dropped, %cutoff, "Dates outside the forecast window ignored");
                totals = totals.split_off(&cutoff);
            }
        }
        totals
    }

    /// Fitted history followed by `horizon` projected days. Empty when fewer
    /// than two distinct dates carry data. Dates are strictly increasing and
    /// every value is finite and non-negative.
    pub fn forecast(&self, interactions: &[Interaction]) -> Vec<ForecastPoint> {
        let totals = self.recent_totals(interactions);
        if totals.len() < 2 {
            debug!(dates = totals.len(), "Not enough distinct dates to forecast");
            return Vec::new();
        }

        let series = densify(&totals);
        let y: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
        let fit = if y.len() >= 2 * self.season_length {
            self.best_holt_winters(&y)
        } else {
            best_holt(&y)
        };
        let sigma = fit.sigma();

        let mut points = Vec::with_capacity(series.len() + self.horizon);
        for ((date, _), fitted) in series.iter().zip(&fit.fitted) {
            points.push(point(*date, *fitted, sigma, false));
        }

        if let Some(&(last, _)) = series.last() {
            for h in 1..=self.horizon {
                let Some(date) = last.checked_add_days(Days::new(h as u64)) else {
                    break;
                };
                let spread = sigma * (h as f64).sqrt();
                points.push(point(date, fit.project(h, y.len()), spread, true));
            }
        }

        debug!(
            history = series.len(),
            horizon = self.horizon,
            seasonal = fit.season.is_some(),
            sse = fit.sse,
            "Demand forecast fitted"
        );
        points
    }

    fn best_holt_winters(&self, y: &[f64]) -> Fit {
        let mut best: Option<Fit> = None;
        for &alpha in &SMOOTHING_GRID {
            for &beta in &SMOOTHING_GRID {
                for &gamma in &SMOOTHING_GRID {
                    let fit = holt_winters(y, self.season_length, alpha, beta, gamma);
                    if best.as_ref().map_or(true, |b| fit.sse < b.sse) {
                        best = Some(fit);
                    }
                }
            }
        }
        best.unwrap_or_else(|| holt_winters(y, self.season_length, 0.5, 0.1, 0.1))
    }
}

fn aggregate(interactions: &[Interaction]) -> BTreeMap<NaiveDate, f64> {
    let mut totals = BTreeMap::new();
    for interaction in interactions.iter().filter(|i| i.value.is_finite()) {
        *totals
            .entry(interaction.timestamp.date_naive())
            .or_insert(0.0) += interaction.value;
    }
    totals
}

fn densify(totals: &BTreeMap<NaiveDate, f64>) -> Vec<(NaiveDate, f64)> {
    let (Some((&first, _)), Some((&last, _))) = (totals.first_key_value(), totals.last_key_value())
    else {
        return Vec::new();
    };

    let mut series = Vec::new();
    let mut day = first;
    while day <= last {
        series.push((day, totals.get(&day).copied().unwrap_or(0.0)));
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    series
}

fn best_holt(y: &[f64]) -> Fit {
    let mut best: Option<Fit> = None;
    for &alpha in &SMOOTHING_GRID {
        for &beta in &SMOOTHING_GRID {
            let fit = holt(y, alpha, beta);
            if best.as_ref().map_or(true, |b| fit.sse < b.sse) {
                best = Some(fit);
            }
        }
    }
    best.unwrap_or_else(|| holt(y, 0.5, 0.1))
}

/// Holt's linear trend. Requires `y.len() >= 2`.
fn holt(y: &[f64], alpha: f64, beta: f64) -> Fit {
    let mut level = y[0];
    let mut trend = y[1] - y[0];
    let mut fitted = Vec::with_capacity(y.len());
    fitted.push(y[0]);
    let mut sse = 0.0;

    for &observed in &y[1..] {
        let forecast = level + trend;
        fitted.push(forecast);
        sse += (observed - forecast).powi(2);

        let next_level = alpha * observed + (1.0 - alpha) * (level + trend);
        trend = beta * (next_level - level) + (1.0 - beta) * trend;
        level = next_level;
    }

    Fit {
        fitted,
        level,
        trend,
        season: None,
        sse,
        residual_count: y.len() - 1,
    }
}

/// Additive Holt-Winters. Requires `y.len() >= 2 * m`; the first two
/// seasons seed level, trend and seasonal offsets.
fn holt_winters(y: &[f64], m: usize, alpha: f64, beta: f64, gamma: f64) -> Fit {
    let first_mean = mean(&y[..m]);
    let second_mean = mean(&y[m..2 * m]);
    let mut level = first_mean;
    let mut trend = (second_mean - first_mean) / m as f64;
    let mut season: Vec<f64> = y[..m].iter().map(|v| v - first_mean).collect();

    let mut fitted = Vec::with_capacity(y.len());
    let mut sse = 0.0;
    for (t, &observed) in y.iter().enumerate() {
        let offset = season[t % m];
        let forecast = level + trend + offset;
        fitted.push(forecast);
        sse += (observed - forecast).powi(2);

        let next_level = alpha * (observed - offset) + (1.0 - alpha) * (level + trend);
        trend = beta * (next_level - level) + (1.0 - beta) * trend;
        season[t % m] = gamma * (observed - next_level) + (1.0 - gamma) * offset;
        level = next_level;
    }

    Fit {
        fitted,
        level,
        trend,
        season: Some(season),
        sse,
        residual_count: y.len(),
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len().max(1) as f64
}

fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

/// Demand is never negative, so values and bounds are floored at zero.
fn point(date: NaiveDate, value: f64, spread: f64, projected: bool) -> ForecastPoint {
    let value = finite_or_zero(value).max(0.0);
    let spread = finite_or_zero(spread);
    ForecastPoint {
        date,
        value,
        lower: (value - INTERVAL_Z * spread).max(0.0),
        upper: value + INTERVAL_Z * spread,
        projected,
    }
}
