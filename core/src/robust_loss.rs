//! Robust kernels for iteratively reweighted least squares.
//!
//! Registration residuals are reweighted with `weight(r) = ρ'(r) / r` so that
//! correspondences far from the current estimate pull less on the update.

/// Robust kernel applied to a scalar residual magnitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RobustLoss {
    /// Plain least squares: ρ(r) = r² / 2
    L2,
    /// Huber: ρ(r) = { r²/2 if |r|≤k, k(|r| - k/2) otherwise }
    Huber { k: f64 },
    /// Cauchy: ρ(r) = (k²/2) log(1 + (r/k)²)
    Cauchy { k: f64 },
    /// Geman-McClure: ρ(r) = (r²/2) / (1 + (r/k)²)
    GemanMcClure { k: f64 },
    /// Tukey biweight: ρ(r) = { (k²/6)(1 - (1-(r/k)²)³) if |r|≤k, k²/6 otherwise }
    Tukey { k: f64 },
}

impl Default for RobustLoss {
    fn default() -> Self {
        RobustLoss::L2
    }
}

impl RobustLoss {
    pub fn evaluate(&self, residual: f64) -> f64 {
        let r = residual.abs();
        match *self {
            RobustLoss::L2 => 0.5 * r * r,
            RobustLoss::Huber { k } => {
                if r <= k {
                    0.5 * r * r
                } else {
                    k * (r - 0.5 * k)
                }
            }
            RobustLoss::Cauchy { k } => 0.5 * k * k * (1.0 + (r / k).powi(2)).ln(),
            RobustLoss::GemanMcClure { k } => 0.5 * r * r / (1.0 + (r / k).powi(2)),
            RobustLoss::Tukey { k } => {
                if r <= k {
                    let t = 1.0 - (r / k).powi(2);
                    (k * k / 6.0) * (1.0 - t.powi(3))
                } else {
                    k * k / 6.0
                }
            }
        }
    }

    /// IRLS weight ρ'(r) / r, equal to 1 at r = 0 for every kernel.
    pub fn weight(&self, residual: f64) -> f64 {
        let r = residual.abs();
        match *self {
            RobustLoss::L2 => 1.0,
            RobustLoss::Huber { k } => {
                if r <= k {
                    1.0
                } else {
                    k / r
                }
            }
            RobustLoss::Cauchy { k } => 1.0 / (1.0 + (r / k).powi(2)),
            RobustLoss::GemanMcClure { k } => {
                let d = 1.0 + (r / k).powi(2);
                1.0 / (d * d)
            }
            RobustLoss::Tukey { k } => {
                if r <= k {
                    let t = 1.0 - (r / k).powi(2);
                    t * t
                } else {
                    0.0
                }
            }
        }
    }
}
