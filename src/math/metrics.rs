//! Regression quality metrics reported after training and evaluation.

use serde::{Deserialize, Serialize};

/// RMSE / MAE / R² / MAPE over a set of (observed, predicted) prices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub n: usize,
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
    /// Mean absolute percentage error, in percent.
    pub mape: f64,
}

impl RegressionMetrics {
    /// Returns `None` when the inputs are empty or of different lengths.
    pub fn compute(observed: &[f64], predicted: &[f64]) -> Option<Self> {
        let n = observed.len();
        if n == 0 || n != predicted.len() {
            return None;
        }
        let n_f = n as f64;
        let y_bar = observed.iter().sum::<f64>() / n_f;

        let mut sse = 0.0;
        let mut sae = 0.0;
        let mut sst = 0.0;
        let mut ape = 0.0;
        let mut ape_n = 0usize;
        for (&y, &p) in observed.iter().zip(predicted) {
            let r = y - p;
            sse += r * r;
            sae += r.abs();
            sst += (y - y_bar) * (y - y_bar);
            if y != 0.0 {
                ape += (r / y).abs();
                ape_n += 1;
            }
        }

        // A constant target has no variance to explain.
        let r2 = if sst > 0.0 { 1.0 - sse / sst } else { 0.0 };
        let mape = if ape_n > 0 { ape / ape_n as f64 * 100.0 } else { 0.0 };

        Some(Self {
            n,
            rmse: (sse / n_f).sqrt(),
            mae: sae / n_f,
            r2,
            mape,
        })
    }

    pub fn mse(&self) -> f64 {
        self.rmse * self.rmse
    }
}
