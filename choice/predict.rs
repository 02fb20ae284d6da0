//! Choice probabilities and predicted choices from fitted coefficients.
//!
//! Utilities are rebuilt directly from coefficient names, so a model fitted
//! elsewhere can be applied as long as it follows the naming scheme of
//! [`crate::spec`]:
//!
//! - `"ASC for <alt>"` adds the constant to rows of `<alt>`;
//! - `"<var> for <alt>"` adds `var · β` to rows of `<alt>`;
//! - any other name must be a data column and adds `var · β` to every row.

use crate::likelihood::stable_softmax_rows;
use crate::long_form::LongFormData;
use crate::spec::{ASC_NAME, Alternatives, FOR_SEPARATOR};
use clap::ValueEnum;
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How probabilities are turned into a single predicted alternative per case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PredictionMethod {
    /// The most probable alternative; the lowest index wins ties.
    #[default]
    Max,
    /// One draw from each case's predicted distribution.
    Random,
    /// Probabilities only.
    None,
}

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("Can not find variable for coefficient '{0}' in the prediction data.")]
    UnknownVariable(String),
    #[error(
        "The data has {found} alternatives per case but the model was fitted with {expected}."
    )]
    AlternativeCountMismatch { expected: usize, found: usize },
    #[error("Sampling a predicted choice failed for case {case_id}: {reason}")]
    Sampling { case_id: i64, reason: String },
}

/// Predictions for every case, in the block order of the input data.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub case_ids: Vec<i64>,
    /// `[cases, alternatives]`, each row sums to one.
    pub probabilities: Array2<f64>,
    /// Predicted alternative indices; `None` for `PredictionMethod::None`.
    pub choices: Option<Vec<usize>>,
    /// `[cases, alternatives]` systematic utilities before centring.
    pub utilities: Array2<f64>,
}

pub fn predict_choices(
    data: &LongFormData,
    params: &[(String, f64)],
    alternatives: &Alternatives,
    method: PredictionMethod,
    seed: Option<u64>,
) -> Result<Prediction, PredictError> {
    let n_alt = alternatives.len();
    if data.n_alternatives() != n_alt {
        return Err(PredictError::AlternativeCountMismatch {
            expected: n_alt,
            found: data.n_alternatives(),
        });
    }

    let mut flat = Array1::<f64>::zeros(data.n_rows());
    for (name, beta) in params {
        match internal::split_alternative(name, alternatives) {
            Some((main, alt_idx)) => {
                let column = if main == ASC_NAME {
                    None
                } else {
                    Some(
                        data.column(main)
                            .ok_or_else(|| PredictError::UnknownVariable(name.clone()))?,
                    )
                };
                for (row, &alt) in data.alts().iter().enumerate() {
                    if alt == alt_idx {
                        flat[row] += column.map_or(1.0, |c| c[row]) * beta;
                    }
                }
            }
            None => {
                let column = data
                    .column(name)
                    .ok_or_else(|| PredictError::UnknownVariable(name.clone()))?;
                flat.scaled_add(*beta, column);
            }
        }
    }

    let n_cases = data.n_cases();
    let utilities = Array2::from_shape_fn((n_cases, n_alt), |(n, j)| flat[n * n_alt + j]);
    let probabilities = stable_softmax_rows(utilities.view());
    let case_ids = data.case_ids();

    let choices = match method {
        PredictionMethod::Max => Some(internal::argmax_rows(&probabilities)),
        PredictionMethod::Random => Some(internal::sample_rows(&probabilities, &case_ids, seed)?),
        PredictionMethod::None => None,
    };

    Ok(Prediction {
        case_ids,
        probabilities,
        choices,
        utilities,
    })
}

mod internal {
    use super::*;

    /// Splits `"<main> for <alt>"` when `<alt>` is a known alternative.
    pub(super) fn split_alternative<'a>(
        name: &'a str,
        alternatives: &Alternatives,
    ) -> Option<(&'a str, usize)> {
        alternatives
            .names()
            .iter()
            .enumerate()
            .find_map(|(idx, alt)| {
                name.strip_suffix(alt.as_str())
                    .and_then(|head| head.strip_suffix(FOR_SEPARATOR))
                    .map(|main| (main, idx))
            })
    }

    pub(super) fn argmax_rows(probabilities: &Array2<f64>) -> Vec<usize> {
        probabilities
            .rows()
            .into_iter()
            .map(|row| {
                let mut best = 0;
                for (j, &p) in row.iter().enumerate() {
                    if p > row[best] {
                        best = j;
                    }
                }
                best
            })
            .collect()
    }

    pub(super) fn sample_rows(
        probabilities: &Array2<f64>,
        case_ids: &[i64],
        seed: Option<u64>,
    ) -> Result<Vec<usize>, PredictError> {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        probabilities
            .rows()
            .into_iter()
            .zip(case_ids)
            .map(|(row, &case_id)| {
                let dist = WeightedIndex::new(row.iter()).map_err(|e| PredictError::Sampling {
                    case_id,
                    reason: e.to_string(),
                })?;
                Ok(dist.sample(&mut rng))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ModeTable;
    use crate::long_form::{AltAttributes, build_long_form};
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::collections::BTreeMap;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn two_case_data() -> (LongFormData, Alternatives) {
        let mut columns = BTreeMap::new();
        columns.insert("car_time".to_string(), array![10.0, 30.0]);
        columns.insert("bus_time".to_string(), array![20.0, 15.0]);
        columns.insert("income".to_string(), array![1.0, 4.0]);
        let table = ModeTable::from_columns(vec![100, 200], None, columns).unwrap();
        let alts = Alternatives::new(strings(&["car", "bus"])).unwrap();
        let mut attrs = AltAttributes::new();
        attrs.insert("time".to_string(), strings(&["car_time", "bus_time"]));
        let long = build_long_form(&table, &attrs, &strings(&["income"]), &alts, false).unwrap();
        (long, alts)
    }

    fn params() -> Vec<(String, f64)> {
        vec![
            ("time".to_string(), -0.1),
            ("income for bus".to_string(), 0.5),
            ("ASC for bus".to_string(), -1.0),
        ]
    }

    #[test]
    fn utilities_follow_coefficient_names() {
        let (long, alts) = two_case_data();
        let pred = predict_choices(&long, &params(), &alts, PredictionMethod::Max, None).unwrap();

        let expected = array![[-1.0, -2.0 + 0.5 - 1.0], [-3.0, -1.5 + 2.0 - 1.0]];
        for (a, b) in pred.utilities.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
        let p_bus = 1.0 / (1.0 + (-1.0_f64 - (-2.5)).exp());
        assert_abs_diff_eq!(pred.probabilities[[0, 1]], p_bus, epsilon = 1e-12);
        assert_eq!(pred.choices, Some(vec![0, 1]));
        assert_eq!(pred.case_ids, vec![100, 200]);
    }

    #[test]
    fn unknown_variables_are_reported() {
        let (long, alts) = two_case_data();
        let bad = vec![("age for bus".to_string(), 0.1)];
        assert!(matches!(
            predict_choices(&long, &bad, &alts, PredictionMethod::None, None),
            Err(PredictError::UnknownVariable(ref n)) if n == "age for bus"
        ));
        let bad = vec![("cost".to_string(), 0.1)];
        assert!(matches!(
            predict_choices(&long, &bad, &alts, PredictionMethod::None, None),
            Err(PredictError::UnknownVariable(_))
        ));
    }

    #[test]
    fn none_method_returns_probabilities_only() {
        let (long, alts) = two_case_data();
        let pred = predict_choices(&long, &params(), &alts, PredictionMethod::None, None).unwrap();
        assert!(pred.choices.is_none());
        for row in pred.probabilities.rows() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn seeded_random_draws_are_reproducible() {
        let (long, alts) = two_case_data();
        let draw = |seed| {
            predict_choices(&long, &params(), &alts, PredictionMethod::Random, Some(seed))
                .unwrap()
                .choices
                .unwrap()
        };
        assert_eq!(draw(11), draw(11));
        assert!(draw(3).iter().all(|&c| c < 2));
    }

    #[test]
    fn random_draws_follow_the_predicted_shares() {
        let n = 5000;
        let mut columns = BTreeMap::new();
        columns.insert("car_time".to_string(), Array1::zeros(n));
        columns.insert("bus_time".to_string(), Array1::zeros(n));
        let table = ModeTable::from_columns((0..n as i64).collect(), None, columns).unwrap();
        let alts = Alternatives::new(strings(&["car", "bus"])).unwrap();
        let mut attrs = AltAttributes::new();
        attrs.insert("time".to_string(), strings(&["car_time", "bus_time"]));
        let long = build_long_form(&table, &attrs, &[], &alts, false).unwrap();

        // Odds of 4 to 1 for the bus.
        let params = vec![("ASC for bus".to_string(), 4.0_f64.ln())];
        let pred = predict_choices(&long, &params, &alts, PredictionMethod::Random, Some(17))
            .unwrap();
        assert_abs_diff_eq!(pred.probabilities[[0, 1]], 0.8, epsilon = 1e-12);

        let choices = pred.choices.unwrap();
        let bus_share = choices.iter().filter(|&&c| c == 1).count() as f64 / n as f64;
        assert!((bus_share - 0.8).abs() < 0.03, "bus share {bus_share}");
    }

    #[test]
    fn degenerate_probabilities_always_draw_the_certain_alternative() {
        let (long, alts) = two_case_data();
        let certain = vec![("ASC for bus".to_string(), 1000.0)];
        let pred =
            predict_choices(&long, &certain, &alts, PredictionMethod::Random, Some(1)).unwrap();
        assert_eq!(pred.choices, Some(vec![1, 1]));
    }

    #[test]
    fn argmax_breaks_ties_towards_lower_index() {
        let probs = array![[0.5, 0.5], [0.2, 0.8]];
        assert_eq!(internal::argmax_rows(&probs), vec![0, 1]);
    }

    #[test]
    fn alternative_suffix_is_split_only_for_known_alternatives() {
        let alts = Alternatives::default();
        assert_eq!(
            internal::split_alternative("income for PT", &alts),
            Some(("income", 3))
        );
        assert_eq!(internal::split_alternative("ASC for walk", &alts), Some(("ASC", 2)));
        assert_eq!(internal::split_alternative("income for boat", &alts), None);
        assert_eq!(internal::split_alternative("time", &alts), None);
    }
}
