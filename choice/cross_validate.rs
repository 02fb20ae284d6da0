//! # K-Fold Cross-Validation
//!
//! Cases (never individual long rows) are assigned to folds: the sorted case
//! identifiers are shuffled with the configured seed and cut into `k` folds
//! of `⌊n / k⌋` cases each. Cases left over after the last full fold are not
//! used. Each fold is held out once while a model is fitted on the remaining
//! folds, optionally after upsampling, and scored on the holdout.
//!
//! Folds are independent and run in parallel; the report lists them in fold
//! order regardless of completion order.

use crate::estimate::{EstimationError, EstimationOptions, estimate};
use crate::long_form::{LongFormData, LongFormError};
use crate::metrics::{ConfusionMatrix, MetricsError, accuracy, f1_macro};
use crate::model::{EstimationMode, ModelError};
use crate::predict::PredictionMethod;
use crate::spec::{Alternatives, ModelSpecification, SpecError};
use crate::upsample::{UpsampleError, UpsampleRule, upsample};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct CrossValidationConfig {
    pub n_folds: usize,
    /// Seeds the fold shuffle, upsampling and random prediction draws.
    pub seed: Option<u64>,
    /// Upsampling applied to each training split, keyed by alternative index.
    pub upsample: BTreeMap<usize, UpsampleRule>,
    pub method: PredictionMethod,
    pub constant: bool,
    pub reference: usize,
    pub estimation: EstimationOptions,
}

impl Default for CrossValidationConfig {
    fn default() -> Self {
        Self {
            n_folds: 5,
            seed: None,
            upsample: BTreeMap::new(),
            method: PredictionMethod::Max,
            constant: true,
            reference: 0,
            estimation: EstimationOptions {
                display: false,
                ..EstimationOptions::default()
            },
        }
    }
}

#[derive(Error, Debug)]
pub enum CvError {
    #[error("Cross-validation needs at least 2 folds, got {0}.")]
    TooFewFolds(usize),
    #[error("{n_cases} cases cannot be split into {n_folds} non-empty folds.")]
    NotEnoughCases { n_cases: usize, n_folds: usize },
    #[error("Prediction method 'none' yields no choices to score.")]
    MethodWithoutChoices,
    #[error(transparent)]
    LongForm(#[from] LongFormError),
    #[error(transparent)]
    Upsample(#[from] UpsampleError),
    #[error(transparent)]
    Spec(#[from] SpecError),
    #[error(transparent)]
    Estimation(#[from] EstimationError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FoldMetrics {
    pub fold: usize,
    pub n_train_cases: usize,
    pub n_test_cases: usize,
    pub estimation_mode: EstimationMode,
    pub accuracy: f64,
    pub f1_macro: f64,
    pub confusion: ConfusionMatrix,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrossValidationReport {
    pub mean_accuracy: f64,
    pub mean_f1_macro: f64,
    pub folds: Vec<FoldMetrics>,
}

impl fmt::Display for CrossValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for fold in &self.folds {
            writeln!(
                f,
                "Fold {}: accuracy {:.4}, macro-F1 {:.4} ({} train / {} test cases)",
                fold.fold + 1,
                fold.accuracy,
                fold.f1_macro,
                fold.n_train_cases,
                fold.n_test_cases
            )?;
            write!(f, "{}", fold.confusion)?;
        }
        writeln!(f, "Mean accuracy: {:.4}", self.mean_accuracy)?;
        writeln!(f, "Mean macro-F1: {:.4}", self.mean_f1_macro)
    }
}

/// Runs k-fold cross-validation of an MNL specification.
pub fn cross_validate(
    data: &LongFormData,
    alternatives: &Alternatives,
    alt_attr_vars: &[String],
    generic_attrs: &[String],
    config: &CrossValidationConfig,
) -> Result<CrossValidationReport, CvError> {
    cross_validate_with_progress(data, alternatives, alt_attr_vars, generic_attrs, config, |_| {})
}

/// Like [`cross_validate`], calling `on_fold_done` as each fold finishes.
pub fn cross_validate_with_progress<F>(
    data: &LongFormData,
    alternatives: &Alternatives,
    alt_attr_vars: &[String],
    generic_attrs: &[String],
    config: &CrossValidationConfig,
    on_fold_done: F,
) -> Result<CrossValidationReport, CvError>
where
    F: Fn(&FoldMetrics) + Sync,
{
    if config.n_folds < 2 {
        return Err(CvError::TooFewFolds(config.n_folds));
    }
    if config.method == PredictionMethod::None {
        return Err(CvError::MethodWithoutChoices);
    }
    // Build once up front so a bad specification fails before any fold runs.
    let spec = ModelSpecification::new(
        alternatives.clone(),
        alt_attr_vars,
        generic_attrs,
        config.constant,
        config.reference,
    )?;

    let folds = assign_folds(data.case_ids(), config.n_folds, config.seed)?;
    log::info!(
        "Cross-validating over {} folds of {} cases each.",
        folds.len(),
        folds[0].len()
    );

    let results: Vec<FoldMetrics> = (0..folds.len())
        .into_par_iter()
        .map(|fold| -> Result<FoldMetrics, CvError> {
            let metrics = run_fold(data, &spec, &folds, fold, config)?;
            on_fold_done(&metrics);
            Ok(metrics)
        })
        .collect::<Result<_, CvError>>()?;

    let k = results.len() as f64;
    let report = CrossValidationReport {
        mean_accuracy: results.iter().map(|m| m.accuracy).sum::<f64>() / k,
        mean_f1_macro: results.iter().map(|m| m.f1_macro).sum::<f64>() / k,
        folds: results,
    };
    log::info!(
        "Mean accuracy {:.4}, mean macro-F1 {:.4}",
        report.mean_accuracy,
        report.mean_f1_macro
    );
    Ok(report)
}

/// Shuffles the sorted case ids and cuts `n_folds` equal folds.
fn assign_folds(
    mut case_ids: Vec<i64>,
    n_folds: usize,
    seed: Option<u64>,
) -> Result<Vec<HashSet<i64>>, CvError> {
    let n_cases = case_ids.len();
    let fold_size = n_cases / n_folds;
    if fold_size == 0 {
        return Err(CvError::NotEnoughCases { n_cases, n_folds });
    }
    case_ids.sort_unstable();
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    case_ids.shuffle(&mut rng);
    if n_cases % n_folds != 0 {
        log::debug!(
            "{} cases do not fill a fold and are left out.",
            n_cases % n_folds
        );
    }
    Ok(case_ids
        .chunks_exact(fold_size)
        .take(n_folds)
        .map(|chunk| chunk.iter().copied().collect())
        .collect())
}

fn run_fold(
    data: &LongFormData,
    spec: &ModelSpecification,
    folds: &[HashSet<i64>],
    holdout: usize,
    config: &CrossValidationConfig,
) -> Result<FoldMetrics, CvError> {
    let train_ids: HashSet<i64> = folds
        .iter()
        .enumerate()
        .filter(|&(idx, _)| idx != holdout)
        .flat_map(|(_, ids)| ids.iter().copied())
        .collect();
    let train = data.select_cases(&train_ids).sort_by_case();
    let test = data.select_cases(&folds[holdout]);

    let (train, _) = upsample(&train, &config.upsample, config.seed)?;
    let model = estimate(spec, &train, &config.estimation)?;
    let prediction = model.predict(&test, config.method, config.seed)?;

    let y_true = test.chosen_alternatives()?;
    let y_pred = prediction.choices.unwrap_or_default();
    let fold = FoldMetrics {
        fold: holdout,
        n_train_cases: train.n_cases(),
        n_test_cases: test.n_cases(),
        estimation_mode: model.mode,
        accuracy: accuracy(&y_true, &y_pred)?,
        f1_macro: f1_macro(&y_true, &y_pred)?,
        confusion: ConfusionMatrix::new(&y_true, &y_pred, data.n_alternatives())?,
    };
    log::info!(
        "Fold {}: accuracy {:.4}, macro-F1 {:.4}",
        holdout + 1,
        fold.accuracy,
        fold.f1_macro
    );
    Ok(fold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ModeTable;
    use crate::long_form::{AltAttributes, build_long_form};
    use rand::Rng;
    use rand_distr::{Distribution, Gumbel};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    /// Choices drawn from a three-mode logit with a time coefficient of -0.3.
    fn simulated(n: usize, seed: u64) -> (LongFormData, Alternatives) {
        let alts = Alternatives::new(strings(&["car", "bus", "walk"])).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        let gumbel = Gumbel::new(0.0, 1.0).unwrap();
        let asc = [0.0, 0.5, -0.5];
        let mut times = vec![Vec::with_capacity(n); 3];
        let mut modes = Vec::with_capacity(n);
        for _ in 0..n {
            let mut best = (0, f64::NEG_INFINITY);
            for (j, column) in times.iter_mut().enumerate() {
                let t: f64 = rng.gen_range(0.0..20.0);
                column.push(t);
                let u = -0.3 * t + asc[j] + gumbel.sample(&mut rng);
                if u > best.1 {
                    best = (j, u);
                }
            }
            modes.push(alts.names()[best.0].clone());
        }
        let wide = strings(&["car_time", "bus_time", "walk_time"]);
        let columns = wide
            .iter()
            .cloned()
            .zip(times.into_iter().map(ndarray::Array1::from))
            .collect();
        let table = ModeTable::from_columns((0..n as i64).collect(), Some(modes), columns).unwrap();
        let mut attrs = AltAttributes::new();
        attrs.insert("time".to_string(), wide);
        let long = build_long_form(&table, &attrs, &[], &alts, true).unwrap();
        (long, alts)
    }

    fn config(n_folds: usize) -> CrossValidationConfig {
        CrossValidationConfig {
            n_folds,
            seed: Some(17),
            ..CrossValidationConfig::default()
        }
    }

    #[test]
    fn folds_partition_cases_and_drop_the_remainder() {
        let folds = assign_folds((0..11).collect(), 3, Some(2)).unwrap();
        assert_eq!(folds.len(), 3);
        assert!(folds.iter().all(|f| f.len() == 3));
        let all: HashSet<i64> = folds.iter().flatten().copied().collect();
        assert_eq!(all.len(), 9);

        let again = assign_folds((0..11).rev().collect(), 3, Some(2)).unwrap();
        assert_eq!(folds, again);
    }

    #[test]
    fn recovers_predictive_model_on_simulated_data() {
        let (long, alts) = simulated(300, 3);
        let calls = AtomicUsize::new(0);
        let report = cross_validate_with_progress(
            &long,
            &alts,
            &strings(&["time"]),
            &[],
            &config(3),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.folds.len(), 3);
        for (idx, fold) in report.folds.iter().enumerate() {
            assert_eq!(fold.fold, idx);
            assert_eq!(fold.n_test_cases, 100);
            assert_eq!(fold.n_train_cases, 200);
            assert_eq!(fold.estimation_mode, EstimationMode::Full);
            assert_eq!(fold.confusion.rows().iter().flatten().sum::<usize>(), 100);
        }
        assert!(report.mean_accuracy > 0.5, "accuracy {}", report.mean_accuracy);
        assert!(report.mean_f1_macro > 0.3);
        assert!(report.to_string().contains("Mean accuracy"));
    }

    #[test]
    fn upsampling_grows_every_training_split() {
        let (long, alts) = simulated(60, 8);
        let mut cfg = config(2);
        cfg.upsample.insert(2, UpsampleRule::Add(5));
        let report = cross_validate(&long, &alts, &strings(&["time"]), &[], &cfg).unwrap();
        assert!(report.folds.iter().all(|f| f.n_train_cases == 35));
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let (long, alts) = simulated(90, 5);
        let a = cross_validate(&long, &alts, &strings(&["time"]), &[], &config(3)).unwrap();
        let b = cross_validate(&long, &alts, &strings(&["time"]), &[], &config(3)).unwrap();
        let accs = |r: &CrossValidationReport| r.folds.iter().map(|f| f.accuracy).collect::<Vec<_>>();
        assert_eq!(accs(&a), accs(&b));
        assert_eq!(a.folds[0].confusion, b.folds[0].confusion);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let (long, alts) = simulated(10, 1);
        let vars = strings(&["time"]);
        assert!(matches!(
            cross_validate(&long, &alts, &vars, &[], &config(1)),
            Err(CvError::TooFewFolds(1))
        ));
        assert!(matches!(
            cross_validate(&long, &alts, &vars, &[], &config(11)),
            Err(CvError::NotEnoughCases { n_cases: 10, n_folds: 11 })
        ));
        let mut cfg = config(2);
        cfg.method = PredictionMethod::None;
        assert!(matches!(
            cross_validate(&long, &alts, &vars, &[], &cfg),
            Err(CvError::MethodWithoutChoices)
        ));
    }
}
