//! Multinomial logit likelihood, gradient and information matrix.
//!
//! With design rows `x_nj` and coefficients `β`, the utility of alternative
//! `j` for case `n` is `V_nj = x_nj·β` and
//! `P_nj = exp(V_nj) / Σ_k exp(V_nk)`.
//!
//! - log-likelihood: `Σ_n ln P_n,c(n)`
//! - gradient: `Σ_n Σ_j (y_nj − P_nj) x_nj`
//! - Hessian: `−Σ_n Σ_j P_nj (x_nj − x̄_n)(x_nj − x̄_n)ᵀ` with `x̄_n = Σ_j P_nj x_nj`

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use thiserror::Error;

/// Utilities are clamped to this magnitude after centring so `exp` stays finite.
pub const UTILITY_CLAMP: f64 = 700.0;

#[derive(Error, Debug)]
pub enum LikelihoodError {
    #[error(
        "Design matrix has {rows} rows, expected {n_cases} cases x {n_alternatives} alternatives."
    )]
    ShapeMismatch {
        rows: usize,
        n_cases: usize,
        n_alternatives: usize,
    },
    #[error("Case {case} chose alternative {chosen}, but only {n_alternatives} exist.")]
    ChoiceOutOfRange {
        case: usize,
        chosen: usize,
        n_alternatives: usize,
    },
    #[error("Coefficient vector has length {found}, expected {expected}.")]
    CoefficientLength { expected: usize, found: usize },
}

/// Row-wise softmax with the row maximum subtracted and the result clamped
/// to `±UTILITY_CLAMP`. Every output row sums to one.
pub fn stable_softmax_rows(utilities: ArrayView2<f64>) -> Array2<f64> {
    let mut probs = utilities.to_owned();
    for mut row in probs.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
        let shift = if max.is_finite() { max } else { 0.0 };
        row.mapv_inplace(|v| (v - shift).clamp(-UTILITY_CLAMP, UTILITY_CLAMP).exp());
        let total = row.sum();
        row.mapv_inplace(|v| v / total);
    }
    probs
}

/// Log-likelihood of a model with equal utilities for every alternative.
pub fn null_log_likelihood(n_cases: usize, n_alternatives: usize) -> f64 {
    n_cases as f64 * (1.0 / n_alternatives as f64).ln()
}

/// The observed choices and design matrix of an MNL estimation problem.
#[derive(Debug, Clone)]
pub struct MnlProblem<'a> {
    x: ArrayView2<'a, f64>,
    chosen: Vec<usize>,
    n_alternatives: usize,
}

impl<'a> MnlProblem<'a> {
    pub fn new(
        x: ArrayView2<'a, f64>,
        chosen: Vec<usize>,
        n_alternatives: usize,
    ) -> Result<Self, LikelihoodError> {
        if x.nrows() != chosen.len() * n_alternatives {
            return Err(LikelihoodError::ShapeMismatch {
                rows: x.nrows(),
                n_cases: chosen.len(),
                n_alternatives,
            });
        }
        if let Some((case, &c)) = chosen.iter().enumerate().find(|(_, c)| **c >= n_alternatives) {
            return Err(LikelihoodError::ChoiceOutOfRange {
                case,
                chosen: c,
                n_alternatives,
            });
        }
        Ok(Self {
            x,
            chosen,
            n_alternatives,
        })
    }

    pub fn n_cases(&self) -> usize {
        self.chosen.len()
    }

    pub fn n_alternatives(&self) -> usize {
        self.n_alternatives
    }

    pub fn n_coefficients(&self) -> usize {
        self.x.ncols()
    }

    fn check_beta(&self, beta: ArrayView1<f64>) -> Result<(), LikelihoodError> {
        if beta.len() != self.x.ncols() {
            return Err(LikelihoodError::CoefficientLength {
                expected: self.x.ncols(),
                found: beta.len(),
            });
        }
        Ok(())
    }

    /// Utilities reshaped to `[cases, alternatives]`.
    pub fn utilities(&self, beta: ArrayView1<f64>) -> Result<Array2<f64>, LikelihoodError> {
        self.check_beta(beta)?;
        let flat = self.x.dot(&beta);
        let n_cases = self.n_cases();
        let n_alt = self.n_alternatives;
        Ok(Array2::from_shape_fn((n_cases, n_alt), |(n, j)| {
            flat[n * n_alt + j]
        }))
    }

    pub fn probabilities(&self, beta: ArrayView1<f64>) -> Result<Array2<f64>, LikelihoodError> {
        let v = self.utilities(beta)?;
        Ok(stable_softmax_rows(v.view()))
    }

    pub fn log_likelihood(&self, beta: ArrayView1<f64>) -> Result<f64, LikelihoodError> {
        let v = self.utilities(beta)?;
        let mut ll = 0.0;
        for (row, &c) in v.rows().into_iter().zip(&self.chosen) {
            let max = row.fold(f64::NEG_INFINITY, |acc, &u| acc.max(u));
            let log_denom = max + row.iter().map(|&u| (u - max).exp()).sum::<f64>().ln();
            ll += row[c] - log_denom;
        }
        Ok(ll)
    }

    /// Score vector `Σ (y − P) x`.
    pub fn gradient(&self, beta: ArrayView1<f64>) -> Result<Array1<f64>, LikelihoodError> {
        let probs = self.probabilities(beta)?;
        Ok(self.gradient_from_probabilities(&probs))
    }

    fn gradient_from_probabilities(&self, probs: &Array2<f64>) -> Array1<f64> {
        let n_alt = self.n_alternatives;
        let mut residual = Array1::from_iter(probs.iter().map(|&p| -p));
        for (case, &c) in self.chosen.iter().enumerate() {
            residual[case * n_alt + c] += 1.0;
        }
        self.x.t().dot(&residual)
    }

    /// Log-likelihood and its gradient from a single utility evaluation.
    pub fn value_and_gradient(
        &self,
        beta: ArrayView1<f64>,
    ) -> Result<(f64, Array1<f64>), LikelihoodError> {
        let ll = self.log_likelihood(beta)?;
        let probs = self.probabilities(beta)?;
        Ok((ll, self.gradient_from_probabilities(&probs)))
    }

    /// Observed information, the negated Hessian of the log-likelihood.
    pub fn information(&self, beta: ArrayView1<f64>) -> Result<Array2<f64>, LikelihoodError> {
        let probs = self.probabilities(beta)?;
        let k = self.x.ncols();
        let n_alt = self.n_alternatives;
        let mut info = Array2::<f64>::zeros((k, k));
        for (case, p) in probs.rows().into_iter().enumerate() {
            let start = case * n_alt;
            let block = self.x.slice(s![start..start + n_alt, ..]);
            let xbar = block.t().dot(&p);
            let centered = &block - &xbar.view().insert_axis(Axis(0));
            let weighted = &centered * &p.view().insert_axis(Axis(1));
            info += &centered.t().dot(&weighted);
        }
        Ok(info)
    }

    pub fn hessian(&self, beta: ArrayView1<f64>) -> Result<Array2<f64>, LikelihoodError> {
        Ok(-self.information(beta)?)
    }
}
