//! # Maximum-Likelihood Estimation
//!
//! Fits MNL coefficients in two tiers:
//!
//! 1.  **Full estimation:** BFGS on the negative log-likelihood (analytic
//!     gradient), followed by the covariance matrix from the inverse of the
//!     observed information. This yields standard errors, z statistics and
//!     p-values.
//!
//! 2.  **Point-only estimation:** if any part of the full path fails (the
//!     optimizer gives up, a value goes non-finite, or the information matrix
//!     is not positive definite), the fit is retried with a damped
//!     Newton-Raphson solve on a ridged information matrix. Only the
//!     coefficient values are reported in this mode.
//!
//! Both tiers start from the zero vector, whose log-likelihood is the null
//! log-likelihood used for McFadden's R².

use wolfe_bfgs::{Bfgs, BfgsSolution};

use crate::likelihood::{LikelihoodError, MnlProblem, null_log_likelihood};
use crate::long_form::{LongFormData, LongFormError};
use crate::model::{CoefficientEstimate, EstimationMode, FittedModel};
use crate::spec::{ModelSpecification, SpecError};

use ndarray::{Array1, Array2};
use ndarray_linalg::{InverseC, Solve};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use thiserror::Error;

/// Relative ridge added to the information diagonal in the Newton fallback.
const NEWTON_RIDGE: f64 = 1e-8;
/// Maximum number of step halvings per Newton iteration.
const MAX_STEP_HALVINGS: usize = 40;
/// Largest accepted `Var(β_i) · I_ii`; larger values mean a near-singular information matrix.
const MAX_VARIANCE_INFLATION: f64 = 1e10;
/// Cost returned to the optimizer when the likelihood cannot be evaluated.
const FAILED_COST: f64 = 1e10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationOptions {
    /// Iteration cap for the BFGS optimizer.
    pub max_iterations: usize,
    /// Tolerance on the norm of the per-case mean gradient, for BFGS and the Newton fallback.
    pub tolerance: f64,
    /// Iteration cap for the Newton fallback.
    pub newton_max_iterations: usize,
    /// Log the estimation summary once fitting finishes.
    pub display: bool,
}

impl Default for EstimationOptions {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            tolerance: 1e-6,
            newton_max_iterations: 100,
            display: true,
        }
    }
}

#[derive(Error, Debug)]
pub enum EstimationError {
    #[error("Invalid model specification: {0}")]
    Spec(#[from] SpecError),
    #[error("Invalid long-form data: {0}")]
    LongForm(#[from] LongFormError),
    #[error("Likelihood evaluation failed: {0}")]
    Likelihood(#[from] LikelihoodError),
    #[error("There are no cases to estimate the model on.")]
    NoCases,
    #[error("BFGS optimization failed: {0}")]
    OptimizationFailed(String),
    #[error("Non-finite value encountered during estimation: {0}")]
    NonFinite(String),
    #[error("The information matrix could not be factorized. It may be singular. Error: {0}")]
    SingularInformation(ndarray_linalg::error::LinalgError),
    #[error("The estimated covariance matrix is invalid: {0}")]
    InvalidCovariance(String),
}

/// Estimates the coefficients of `spec` on `data`.
pub fn estimate(
    spec: &ModelSpecification,
    data: &LongFormData,
    options: &EstimationOptions,
) -> Result<FittedModel, EstimationError> {
    let x = spec.design_matrix(data)?;
    let chosen = data.chosen_alternatives()?;
    if chosen.is_empty() {
        return Err(EstimationError::NoCases);
    }
    let problem = MnlProblem::new(x.view(), chosen, data.n_alternatives())?;
    log::info!(
        "Estimating MNL model: {} cases, {} alternatives, {} coefficients.",
        problem.n_cases(),
        problem.n_alternatives(),
        problem.n_coefficients()
    );

    let fit = match internal::fit_full(&problem, options) {
        Ok(fit) => fit,
        Err(e) => {
            log::warn!("Full estimation failed ({e}); retrying with a point estimate only.");
            internal::fit_point_only(&problem, options)?
        }
    };

    let model = internal::assemble_model(spec, &problem, fit);
    if options.display {
        log::info!("\n{model}");
    }
    Ok(model)
}

mod internal {
    use super::*;

    pub(super) struct RawFit {
        pub beta: Array1<f64>,
        pub log_likelihood: f64,
        pub iterations: usize,
        pub converged: bool,
        pub covariance: Option<Array2<f64>>,
    }

    pub(super) fn fit_full(
        problem: &MnlProblem<'_>,
        options: &EstimationOptions,
    ) -> Result<RawFit, EstimationError> {
        let k = problem.n_coefficients();
        // The mean keeps the gradient tolerance independent of the sample size.
        let scale = problem.n_cases() as f64;
        let cost_and_grad = |beta: &Array1<f64>| -> (f64, Array1<f64>) {
            match problem.value_and_gradient(beta.view()) {
                Ok((ll, grad)) if ll.is_finite() && grad.iter().all(|g| g.is_finite()) => {
                    (-ll / scale, grad / -scale)
                }
                Ok((ll, _)) => {
                    log::warn!("Non-finite log-likelihood {ll}; returning a large finite cost");
                    (FAILED_COST, Array1::zeros(k))
                }
                Err(e) => {
                    log::warn!("Likelihood evaluation failed: {e}; returning a large finite cost");
                    (FAILED_COST, Array1::zeros(k))
                }
            }
        };

        let BfgsSolution {
            final_point,
            final_value,
            iterations,
            ..
        } = Bfgs::new(Array1::zeros(k), cost_and_grad)
            .with_tolerance(options.tolerance)
            .with_max_iterations(options.max_iterations)
            .run()
            .map_err(|e| EstimationError::OptimizationFailed(format!("{e:?}")))?;
        log::debug!("BFGS finished after {iterations} iterations with cost {final_value:.6}");

        let log_likelihood = problem.log_likelihood(final_point.view())?;
        if !log_likelihood.is_finite() || final_point.iter().any(|b| !b.is_finite()) {
            return Err(EstimationError::NonFinite(
                "coefficients or log-likelihood at the BFGS solution".to_string(),
            ));
        }

        let information = problem.information(final_point.view())?;
        let covariance = information
            .invc()
            .map_err(EstimationError::SingularInformation)?;
        for (idx, (&var, &info)) in covariance
            .diag()
            .iter()
            .zip(information.diag().iter())
            .enumerate()
        {
            if !var.is_finite() || var <= 0.0 {
                return Err(EstimationError::InvalidCovariance(format!(
                    "variance of coefficient {idx} is {var}"
                )));
            }
            if var * info > MAX_VARIANCE_INFLATION {
                return Err(EstimationError::InvalidCovariance(format!(
                    "coefficient {idx} is not identified (variance inflation {:.3e})",
                    var * info
                )));
            }
        }

        Ok(RawFit {
            beta: final_point,
            log_likelihood,
            iterations,
            converged: true,
            covariance: Some(covariance),
        })
    }

    pub(super) fn fit_point_only(
        problem: &MnlProblem<'_>,
        options: &EstimationOptions,
    ) -> Result<RawFit, EstimationError> {
        let k = problem.n_coefficients();
        let mut beta = Array1::<f64>::zeros(k);
        let mut ll = problem.log_likelihood(beta.view())?;
        let mut converged = false;
        let mut iterations = 0;
        let n_cases = problem.n_cases() as f64;

        while iterations < options.newton_max_iterations {
            let grad = problem.gradient(beta.view())?;
            let grad_norm = grad.dot(&grad).sqrt() / n_cases;
            if grad_norm <= options.tolerance {
                converged = true;
                break;
            }
            iterations += 1;

            let mut information = problem.information(beta.view())?;
            let scale = information
                .diag()
                .iter()
                .fold(1.0_f64, |acc, &d| acc.max(d.abs()));
            for i in 0..k {
                information[[i, i]] += NEWTON_RIDGE * scale;
            }
            let step = information
                .solve_into(grad)
                .map_err(EstimationError::SingularInformation)?;

            let mut t = 1.0;
            let mut accepted = false;
            for _ in 0..MAX_STEP_HALVINGS {
                let candidate = &beta + &(&step * t);
                let candidate_ll = problem.log_likelihood(candidate.view())?;
                if candidate_ll.is_finite() && candidate_ll >= ll {
                    beta = candidate;
                    ll = candidate_ll;
                    accepted = true;
                    break;
                }
                t *= 0.5;
            }
            if !accepted {
                log::debug!("Newton line search stalled after {iterations} iterations");
                converged = grad_norm <= options.tolerance.sqrt();
                break;
            }
        }

        if !ll.is_finite() {
            return Err(EstimationError::NonFinite(
                "log-likelihood of the point estimate".to_string(),
            ));
        }
        if !converged {
            log::warn!(
                "Point estimate did not reach the tolerance after {iterations} Newton iterations."
            );
        }

        Ok(RawFit {
            beta,
            log_likelihood: ll,
            iterations,
            converged,
            covariance: None,
        })
    }

    pub(super) fn assemble_model(
        spec: &ModelSpecification,
        problem: &MnlProblem<'_>,
        fit: RawFit,
    ) -> FittedModel {
        let normal = Normal::new(0.0, 1.0).ok();
        let std_errs: Option<Vec<f64>> = fit
            .covariance
            .as_ref()
            .map(|cov| cov.diag().iter().map(|v| v.sqrt()).collect());

        let coefficients = spec
            .coefficient_names()
            .into_iter()
            .enumerate()
            .map(|(idx, name)| {
                let value = fit.beta[idx];
                let std_err = std_errs.as_ref().map(|se| se[idx]);
                let z_value = std_err.map(|se| value / se);
                let p_value = match (z_value, &normal) {
                    (Some(z), Some(dist)) => Some(2.0 * dist.sf(z.abs())),
                    _ => None,
                };
                CoefficientEstimate {
                    name,
                    value,
                    std_err,
                    z_value,
                    p_value,
                }
            })
            .collect();

        FittedModel {
            alternatives: spec.alternatives().clone(),
            reference: spec.reference(),
            mode: if fit.covariance.is_some() {
                EstimationMode::Full
            } else {
                EstimationMode::PointOnly
            },
            converged: fit.converged,
            n_cases: problem.n_cases(),
            iterations: fit.iterations,
            null_log_likelihood: null_log_likelihood(problem.n_cases(), problem.n_alternatives()),
            log_likelihood: fit.log_likelihood,
            coefficients,
        }
    }
}
