//! Classification scores for predicted choices.

use itertools::Itertools;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MetricsError {
    #[error("Label vectors differ in length: {true_len} true vs {pred_len} predicted.")]
    LengthMismatch { true_len: usize, pred_len: usize },
    #[error("Cannot score an empty set of predictions.")]
    Empty,
    #[error("Label {label} is outside the {n_labels} known labels.")]
    LabelOutOfRange { label: usize, n_labels: usize },
}

fn check_lengths(y_true: &[usize], y_pred: &[usize]) -> Result<(), MetricsError> {
    if y_true.len() != y_pred.len() {
        return Err(MetricsError::LengthMismatch {
            true_len: y_true.len(),
            pred_len: y_pred.len(),
        });
    }
    if y_true.is_empty() {
        return Err(MetricsError::Empty);
    }
    Ok(())
}

/// Fraction of cases whose predicted alternative equals the chosen one.
pub fn accuracy(y_true: &[usize], y_pred: &[usize]) -> Result<f64, MetricsError> {
    check_lengths(y_true, y_pred)?;
    let hits = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    Ok(hits as f64 / y_true.len() as f64)
}

/// Unweighted mean of per-label F1 over every label seen in either vector.
///
/// A label with zero precision and zero recall contributes an F1 of 0.
pub fn f1_macro(y_true: &[usize], y_pred: &[usize]) -> Result<f64, MetricsError> {
    check_lengths(y_true, y_pred)?;
    let labels: BTreeSet<usize> = y_true.iter().chain(y_pred).copied().collect();

    let total: f64 = labels
        .iter()
        .map(|&label| {
            let mut tp = 0usize;
            let mut fp = 0usize;
            let mut fn_count = 0usize;
            for (&t, &p) in y_true.iter().zip(y_pred) {
                match (t == label, p == label) {
                    (true, true) => tp += 1,
                    (false, true) => fp += 1,
                    (true, false) => fn_count += 1,
                    (false, false) => {}
                }
            }
            let denom = 2 * tp + fp + fn_count;
            if denom == 0 {
                0.0
            } else {
                2.0 * tp as f64 / denom as f64
            }
        })
        .sum();
    Ok(total / labels.len() as f64)
}

/// Counts indexed `[true label][predicted label]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(y_true: &[usize], y_pred: &[usize], n_labels: usize) -> Result<Self, MetricsError> {
        check_lengths(y_true, y_pred)?;
        let mut counts = vec![vec![0usize; n_labels]; n_labels];
        for (&t, &p) in y_true.iter().zip(y_pred) {
            let out_of_range = if t >= n_labels { Some(t) } else { (p >= n_labels).then_some(p) };
            if let Some(label) = out_of_range {
                return Err(MetricsError::LabelOutOfRange { label, n_labels });
            }
            counts[t][p] += 1;
        }
        Ok(Self { counts })
    }

    pub fn count(&self, true_label: usize, predicted: usize) -> usize {
        self.counts[true_label][predicted]
    }

    pub fn n_labels(&self) -> usize {
        self.counts.len()
    }

    pub fn rows(&self) -> &[Vec<usize>] {
        &self.counts
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .counts
            .iter()
            .flatten()
            .map(|c| c.to_string().len())
            .max()
            .unwrap_or(1);
        for row in &self.counts {
            writeln!(
                f,
                "[{}]",
                row.iter().map(|c| format!("{c:>width$}")).join(" ")
            )?;
        }
        Ok(())
    }
}
