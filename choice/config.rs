//! TOML configuration for a mode-choice model and its experiments.
//!
//! ```toml
//! alternatives = ["drive", "cycle", "walk", "PT"]
//! reference = 0
//! constant = true
//! case_id_column = "id"
//! mode_column = "mode"
//! generic_attributes = ["income"]
//!
//! [alternative_attributes]
//! time = ["drive_time", "cycle_time", "walk_time", "pt_time"]
//!
//! [upsample]
//! cycle = "+20"
//! walk = "*1.5"
//!
//! [cv]
//! n_folds = 5
//! seed = 42
//! ```
//!
//! Upsampling keys are alternative names or indices.

use crate::cross_validate::CrossValidationConfig;
use crate::data::TableSchema;
use crate::estimate::EstimationOptions;
use crate::long_form::AltAttributes;
use crate::predict::PredictionMethod;
use crate::spec::{Alternatives, ModelSpecification, SpecError};
use crate::upsample::UpsampleRule;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML config: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Invalid model configuration: {0}")]
    Spec(#[from] SpecError),
    #[error(
        "Alternative attribute '{variable}' lists {found} columns, one per alternative is required ({expected})."
    )]
    AttributeArity {
        variable: String,
        expected: usize,
        found: usize,
    },
    #[error("Upsampling refers to unknown alternative '{0}'.")]
    UnknownAlternative(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CvSettings {
    pub n_folds: usize,
    pub seed: Option<u64>,
    pub method: PredictionMethod,
}

impl Default for CvSettings {
    fn default() -> Self {
        Self {
            n_folds: 5,
            seed: None,
            method: PredictionMethod::Max,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChoiceConfig {
    /// Case identifier column; row positions are used when unset.
    pub case_id_column: Option<String>,
    pub mode_column: String,
    pub alternatives: Alternatives,
    pub reference: usize,
    pub constant: bool,
    pub alternative_attributes: AltAttributes,
    pub generic_attributes: Vec<String>,
    pub estimation: EstimationOptions,
    pub upsample: BTreeMap<String, UpsampleRule>,
    pub cv: CvSettings,
}

impl Default for ChoiceConfig {
    fn default() -> Self {
        Self {
            case_id_column: None,
            mode_column: "mode".to_string(),
            alternatives: Alternatives::default(),
            reference: 0,
            constant: true,
            alternative_attributes: AltAttributes::new(),
            generic_attributes: Vec::new(),
            estimation: EstimationOptions::default(),
            upsample: BTreeMap::new(),
            cv: CvSettings::default(),
        }
    }
}

impl ChoiceConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: ChoiceConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let n_alt = self.alternatives.len();
        for (variable, columns) in &self.alternative_attributes {
            if columns.len() != n_alt {
                return Err(ConfigError::AttributeArity {
                    variable: variable.clone(),
                    expected: n_alt,
                    found: columns.len(),
                });
            }
        }
        self.specification()?;
        self.upsample_rules()?;
        Ok(())
    }

    /// Long-form names of the alternative-specific attributes.
    pub fn alt_attr_vars(&self) -> Vec<String> {
        self.alternative_attributes.keys().cloned().collect()
    }

    pub fn specification(&self) -> Result<ModelSpecification, SpecError> {
        ModelSpecification::new(
            self.alternatives.clone(),
            &self.alt_attr_vars(),
            &self.generic_attributes,
            self.constant,
            self.reference,
        )
    }

    /// Upsampling rules keyed by alternative index.
    pub fn upsample_rules(&self) -> Result<BTreeMap<usize, UpsampleRule>, ConfigError> {
        self.upsample
            .iter()
            .map(|(key, rule)| {
                self.alternatives
                    .resolve_label(key)
                    .map(|idx| (idx, *rule))
                    .ok_or_else(|| ConfigError::UnknownAlternative(key.clone()))
            })
            .collect()
    }

    /// Columns to read from a mode table. Per-alternative columns are optional.
    pub fn schema(&self, with_modes: bool) -> TableSchema {
        let mut optional: Vec<String> = self
            .alternative_attributes
            .values()
            .flatten()
            .cloned()
            .collect();
        optional.sort();
        optional.dedup();
        TableSchema {
            case_id_column: self.case_id_column.clone(),
            mode_column: with_modes.then(|| self.mode_column.clone()),
            required_columns: self.generic_attributes.clone(),
            optional_columns: optional,
        }
    }

    pub fn cross_validation(&self) -> Result<CrossValidationConfig, ConfigError> {
        Ok(CrossValidationConfig {
            n_folds: self.cv.n_folds,
            seed: self.cv.seed,
            upsample: self.upsample_rules()?,
            method: self.cv.method,
            constant: self.constant,
            reference: self.reference,
            estimation: EstimationOptions {
                display: false,
                ..self.estimation.clone()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EXAMPLE: &str = r#"
alternatives = ["drive", "cycle", "walk", "PT"]
reference = 3
case_id_column = "id"
generic_attributes = ["income"]

[alternative_attributes]
time = ["drive_time", "cycle_time", "walk_time", "pt_time"]
cost = ["drive_cost", "", "", "pt_cost"]

[estimation]
max_iterations = 200

[upsample]
cycle = "+20"
2 = "*1.5"

[cv]
n_folds = 4
seed = 42
method = "random"
"#;

    #[test]
    fn parses_a_full_document() {
        let config = ChoiceConfig::from_toml(EXAMPLE).unwrap();
        assert_eq!(config.reference, 3);
        assert!(config.constant);
        assert_eq!(config.mode_column, "mode");
        assert_eq!(config.estimation.max_iterations, 200);
        assert_eq!(config.estimation.tolerance, 1e-6);
        assert_eq!(config.alt_attr_vars(), vec!["cost", "time"]);

        let rules = config.upsample_rules().unwrap();
        assert_eq!(rules.get(&1), Some(&UpsampleRule::Add(20)));
        assert_eq!(rules.get(&2), Some(&UpsampleRule::Scale(1.5)));

        let cv = config.cross_validation().unwrap();
        assert_eq!(cv.n_folds, 4);
        assert_eq!(cv.seed, Some(42));
        assert_eq!(cv.method, PredictionMethod::Random);
        assert_eq!(cv.reference, 3);
        assert!(!cv.estimation.display);
    }

    #[test]
    fn specification_names_follow_the_reference() {
        let config = ChoiceConfig::from_toml(EXAMPLE).unwrap();
        let names = config.specification().unwrap().coefficient_names();
        assert_eq!(names[0], "cost");
        assert_eq!(names[1], "time");
        assert!(names.contains(&"income for drive".to_string()));
        assert!(!names.contains(&"income for PT".to_string()));
        assert_eq!(names.last().map(String::as_str), Some("ASC for walk"));
    }

    #[test]
    fn schema_marks_wide_columns_optional() {
        let config = ChoiceConfig::from_toml(EXAMPLE).unwrap();
        let schema = config.schema(true);
        assert_eq!(schema.case_id_column.as_deref(), Some("id"));
        assert_eq!(schema.mode_column.as_deref(), Some("mode"));
        assert_eq!(schema.required_columns, vec!["income"]);
        assert!(schema.optional_columns.contains(&"pt_cost".to_string()));
        assert_eq!(
            schema
                .optional_columns
                .iter()
                .filter(|c| c.as_str() == "drive_time")
                .count(),
            1
        );
        assert!(config.schema(false).mode_column.is_none());
    }

    #[test]
    fn defaults_apply_to_an_empty_document() {
        let config: ChoiceConfig = toml::from_str("").unwrap();
        assert_eq!(config, ChoiceConfig::default());
        assert_eq!(config.alternatives.names(), ["drive", "cycle", "walk", "PT"]);
        assert_eq!(config.cv.n_folds, 5);
    }

    #[test]
    fn invalid_documents_are_rejected() {
        let bad_arity = r#"
[alternative_attributes]
time = ["a", "b"]
"#;
        assert!(matches!(
            ChoiceConfig::from_toml(bad_arity),
            Err(ConfigError::AttributeArity { expected: 4, found: 2, .. })
        ));

        let bad_reference = "reference = 9\nconstant = true\n";
        assert!(matches!(
            ChoiceConfig::from_toml(bad_reference),
            Err(ConfigError::Spec(SpecError::ReferenceOutOfRange { .. }))
        ));

        let bad_upsample = "[upsample]\nboat = \"+1\"\n";
        assert!(matches!(
            ChoiceConfig::from_toml(bad_upsample),
            Err(ConfigError::UnknownAlternative(_))
        ));

        let bad_rule = "[upsample]\nwalk = \"1\"\n";
        assert!(matches!(
            ChoiceConfig::from_toml(bad_rule),
            Err(ConfigError::TomlParseError(_))
        ));

        let repeated_alternative = "alternatives = [\"car\", \"car\"]\n";
        assert!(matches!(
            ChoiceConfig::from_toml(repeated_alternative),
            Err(ConfigError::TomlParseError(_))
        ));
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(EXAMPLE.as_bytes()).unwrap();
        let path = file.path().to_str().unwrap();
        assert_eq!(
            ChoiceConfig::load(path).unwrap(),
            ChoiceConfig::from_toml(EXAMPLE).unwrap()
        );
    }
}
