//! Least-squares fit of consumption on temperature

use serde::Serialize;

/// Shape of the fitted relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FitKind {
    /// Ordinary least squares line
    Linear,
    /// One usable point; its consumption is the prediction
    SinglePoint,
    /// All temperatures identical; mean consumption is the prediction
    Flat,
}

/// Fitted model over `(temperature, consumption)` points
#[derive(Debug, Clone, PartialEq)]
pub struct Fit {
    pub kind: FitKind,
    pub slope: f64,
    pub intercept: f64,
    /// Residual standard deviation; `None` with two points or fewer
    pub residual_sd: Option<f64>,
    pub n: usize,
}

impl Fit {
    pub fn predict(&self, temperature: f64) -> f64 {
        self.intercept + self.slope * temperature
    }
}

/// Fit `consumption = intercept + slope * temperature`
///
/// Returns `None` for an empty series.
pub fn fit(points: &[(f64, f64)]) -> Option<Fit> {
    let n = points.len();
    if n == 0 {
        return None;
    }
    if n == 1 {
        return Some(Fit {
            kind: FitKind::SinglePoint,
            slope: 0.0,
            intercept: points[0].1,
            residual_sd: None,
            n,
        });
    }

    let nf = n as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / nf;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / nf;

    let sxx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    let sxy: f64 = points
        .iter()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();

    if sxx <= f64::EPSILON * nf {
        // Identical temperatures: the slope is undefined
        let ss: f64 = points.iter().map(|(_, y)| (y - mean_y).powi(2)).sum();
        return Some(Fit {
            kind: FitKind::Flat,
            slope: 0.0,
            intercept: mean_y,
            residual_sd: (n > 2).then(|| (ss / (nf - 1.0)).sqrt()),
            n,
        });
    }

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let ssr: f64 = points
        .iter()
        .map(|(x, y)| (y - (intercept + slope * x)).powi(2))
        .sum();

    Some(Fit {
        kind: FitKind::Linear,
        slope,
        intercept,
        residual_sd: (n > 2).then(|| (ssr / (nf - 2.0)).sqrt()),
        n,
    })
}
