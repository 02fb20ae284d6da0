use crate::likelihood::null_log_likelihood;
use crate::long_form::LongFormData;
use crate::predict::{PredictError, Prediction, PredictionMethod, predict_choices};
use crate::spec::Alternatives;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use thiserror::Error;

// --- Public Data Structures ---
// These structs define the human-readable format of a fitted model when it
// is serialized to a TOML file.

/// Whether the fit produced a covariance matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationMode {
    /// Maximum likelihood with standard errors, z statistics and p-values.
    Full,
    /// Coefficient values only; produced when full estimation failed.
    PointOnly,
}

/// One fitted coefficient. Inference fields are present only for `EstimationMode::Full`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientEstimate {
    pub name: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std_err: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_value: Option<f64>,
}

/// The self-contained fitted model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub alternatives: Alternatives,
    /// Index of the reference alternative used for case-specific terms and constants.
    pub reference: usize,
    pub mode: EstimationMode,
    pub converged: bool,
    pub n_cases: usize,
    pub iterations: usize,
    pub null_log_likelihood: f64,
    pub log_likelihood: f64,
    pub coefficients: Vec<CoefficientEstimate>,
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Prediction failed: {0}")]
    Predict(#[from] PredictError),
    #[error(
        "The model file is inconsistent: null log-likelihood {stored} does not match {n_cases} cases over {n_alternatives} alternatives."
    )]
    Inconsistent {
        stored: f64,
        n_cases: usize,
        n_alternatives: usize,
    },
}

impl FittedModel {
    /// McFadden's pseudo R², `1 − LL(β̂) / LL(0)`.
    pub fn mcfadden_r2(&self) -> f64 {
        1.0 - self.log_likelihood / self.null_log_likelihood
    }

    /// Coefficient names and values in estimation order.
    pub fn params(&self) -> Vec<(String, f64)> {
        self.coefficients
            .iter()
            .map(|c| (c.name.clone(), c.value))
            .collect()
    }

    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.coefficients
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value)
    }

    /// Predicts choice probabilities (and optionally choices) for long-form data.
    pub fn predict(
        &self,
        data: &LongFormData,
        method: PredictionMethod,
        seed: Option<u64>,
    ) -> Result<Prediction, ModelError> {
        Ok(predict_choices(
            data,
            &self.params(),
            &self.alternatives,
            method,
            seed,
        )?)
    }

    /// Saves the model to a file in a human-readable TOML format.
    pub fn save(&self, path: &str) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads a model from a TOML file.
    pub fn load(path: &str) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model: FittedModel = toml::from_str(&toml_string)?;
        let expected = null_log_likelihood(model.n_cases, model.alternatives.len());
        if (expected - model.null_log_likelihood).abs() > 1e-6 * (1.0 + expected.abs()) {
            return Err(ModelError::Inconsistent {
                stored: model.null_log_likelihood,
                n_cases: model.n_cases,
                n_alternatives: model.alternatives.len(),
            });
        }
        Ok(model)
    }
}

impl fmt::Display for FittedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Logit model summary")?;
        writeln!(f, "---------------------------")?;
        let mode = match self.mode {
            EstimationMode::Full => "full maximum likelihood",
            EstimationMode::PointOnly => "point estimate only",
        };
        writeln!(f, "estimation: {mode}")?;
        if !self.converged {
            writeln!(f, "warning: the optimizer did not reach its tolerance")?;
        }
        writeln!(f, "number of cases: {}", self.n_cases)?;
        writeln!(f, "Initial Log-likelihood: {:.6}", self.null_log_likelihood)?;
        writeln!(f, "Final Log-likelihood: {:.6}", self.log_likelihood)?;
        writeln!(f, "McFadden R2: {:.4}", self.mcfadden_r2())?;
        writeln!(f)?;
        writeln!(f, "Logit model parameters:")?;
        writeln!(f, "---------------------------")?;
        let width = self
            .coefficients
            .iter()
            .map(|c| c.name.len())
            .max()
            .unwrap_or(0);
        for c in &self.coefficients {
            match (c.std_err, c.z_value, c.p_value) {
                (Some(se), Some(z), Some(p)) => writeln!(
                    f,
                    "{:<width$}  {:>12.6}  se {:>10.6}  z {:>8.3}  p {:>6.4}",
                    c.name, c.value, se, z, p
                )?,
                _ => writeln!(f, "{}: {:.6}", c.name, c.value)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sample_model(mode: EstimationMode) -> FittedModel {
        let with_se = mode == EstimationMode::Full;
        FittedModel {
            alternatives: Alternatives::default(),
            reference: 0,
            mode,
            converged: true,
            n_cases: 10,
            iterations: 7,
            null_log_likelihood: null_log_likelihood(10, 4),
            log_likelihood: -9.5,
            coefficients: vec![
                CoefficientEstimate {
                    name: "time".to_string(),
                    value: -0.05,
                    std_err: with_se.then_some(0.01),
                    z_value: with_se.then_some(-5.0),
                    p_value: with_se.then_some(5.7e-7),
                },
                CoefficientEstimate {
                    name: "ASC for walk".to_string(),
                    value: 0.4,
                    std_err: with_se.then_some(0.2),
                    z_value: with_se.then_some(2.0),
                    p_value: with_se.then_some(0.0455),
                },
            ],
        }
    }

    #[test]
    fn mcfadden_r2_uses_null_log_likelihood() {
        let model = sample_model(EstimationMode::Full);
        let expected = 1.0 - (-9.5) / (10.0 * 0.25_f64.ln());
        assert_abs_diff_eq!(model.mcfadden_r2(), expected, epsilon = 1e-12);
    }

    #[test]
    fn toml_round_trip_preserves_full_and_point_models() {
        let dir = tempfile::tempdir().unwrap();
        for mode in [EstimationMode::Full, EstimationMode::PointOnly] {
            let model = sample_model(mode);
            let path = dir.path().join("model.toml");
            let path = path.to_str().unwrap();
            model.save(path).unwrap();
            let loaded = FittedModel::load(path).unwrap();
            assert_eq!(loaded, model);
        }
    }

    #[test]
    fn load_rejects_inconsistent_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = sample_model(EstimationMode::PointOnly);
        model.null_log_likelihood = -1.0;
        let path = dir.path().join("broken.toml");
        let path = path.to_str().unwrap();
        model.save(path).unwrap();
        assert!(matches!(
            FittedModel::load(path),
            Err(ModelError::Inconsistent { .. })
        ));
    }

    #[test]
    fn load_rejects_invalid_alternative_lists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.toml");
        let path = path.to_str().unwrap();
        sample_model(EstimationMode::Full).save(path).unwrap();
        let saved: toml::Table = toml::from_str(&fs::read_to_string(path).unwrap()).unwrap();

        for names in [vec!["car", "car"], vec!["car"], vec!["car", ""]] {
            let mut table = saved.clone();
            let list = names.into_iter().map(toml::Value::from).collect();
            table.insert("alternatives".to_string(), toml::Value::Array(list));
            fs::write(path, toml::to_string(&table).unwrap()).unwrap();
            assert!(matches!(
                FittedModel::load(path),
                Err(ModelError::TomlParseError(_))
            ));
        }
    }

    #[test]
    fn summary_lists_every_coefficient() {
        let text = sample_model(EstimationMode::PointOnly).to_string();
        assert!(text.contains("number of cases: 10"));
        assert!(text.contains("McFadden R2:"));
        assert!(text.contains("time: -0.050000"));
        assert!(text.contains("ASC for walk: 0.400000"));

        let full = sample_model(EstimationMode::Full).to_string();
        assert!(full.contains("se"));
        assert!(full.contains("full maximum likelihood"));
    }

    #[test]
    fn params_keep_estimation_order() {
        let model = sample_model(EstimationMode::Full);
        let params = model.params();
        assert_eq!(params[0].0, "time");
        assert_eq!(params[1].0, "ASC for walk");
        assert_eq!(model.coefficient("ASC for walk"), Some(0.4));
        assert_eq!(model.coefficient("cost"), None);
    }
}
