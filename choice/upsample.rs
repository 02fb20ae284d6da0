//! Class rebalancing by duplicating cases of under-represented alternatives.
//!
//! Each rule names an alternative and how many extra cases it should get:
//! `"+N"` adds `N` cases, `"*F"` grows the alternative to roughly `F` times
//! its current count. Extra cases are drawn uniformly with replacement from
//! the cases that chose the alternative and are appended after the original
//! data under fresh identifiers above the current maximum.

use crate::long_form::{LongFormData, LongFormError};
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpsampleError {
    #[error(
        "Invalid upsampling rule '{0}'. Use '+N' to add N cases or '*F' with F >= 1 to scale."
    )]
    InvalidRule(String),
    #[error("Upsampling rule for alternative {index}, but there are only {n_alternatives}.")]
    AlternativeOutOfRange { index: usize, n_alternatives: usize },
    #[error("Cannot upsample alternative {0}: no case chose it.")]
    NoCasesForAlternative(usize),
    #[error("Upsampling rule '{rule}' asks for more cases than can be held for alternative {alternative}.")]
    TooManyCases { rule: String, alternative: usize },
    #[error(transparent)]
    LongForm(#[from] LongFormError),
}

/// How many cases to add for one alternative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum UpsampleRule {
    Add(usize),
    Scale(f64),
}

impl Default for UpsampleRule {
    fn default() -> Self {
        UpsampleRule::Add(0)
    }
}

impl UpsampleRule {
    /// Number of cases to draw for an alternative currently chosen `count` times.
    ///
    /// `None` when a scale factor asks for more cases than fit in a `usize`.
    pub fn num_new(&self, count: usize) -> Option<usize> {
        match *self {
            UpsampleRule::Add(n) => Some(n),
            UpsampleRule::Scale(factor) => {
                let extra = (count as f64 * (factor - 1.0)).floor();
                (extra < usize::MAX as f64).then_some(extra as usize)
            }
        }
    }
}

impl FromStr for UpsampleRule {
    type Err = UpsampleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || UpsampleError::InvalidRule(s.to_string());
        let trimmed = s.trim();
        if let Some(count) = trimmed.strip_prefix('+') {
            count.parse().map(UpsampleRule::Add).map_err(|_| invalid())
        } else if let Some(factor) = trimmed.strip_prefix('*') {
            let factor: f64 = factor.parse().map_err(|_| invalid())?;
            if factor.is_finite() && factor >= 1.0 {
                Ok(UpsampleRule::Scale(factor))
            } else {
                Err(invalid())
            }
        } else {
            Err(invalid())
        }
    }
}

impl TryFrom<String> for UpsampleRule {
    type Error = UpsampleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UpsampleRule> for String {
    fn from(rule: UpsampleRule) -> Self {
        rule.to_string()
    }
}

impl fmt::Display for UpsampleRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpsampleRule::Add(n) => write!(f, "+{n}"),
            UpsampleRule::Scale(factor) => write!(f, "*{factor}"),
        }
    }
}

/// Cases per chosen alternative before and after upsampling, as `(alt, count)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsampleSummary {
    pub before: Vec<(usize, usize)>,
    pub after: Vec<(usize, usize)>,
}

fn format_counts(counts: &[(usize, usize)]) -> String {
    counts
        .iter()
        .map(|(alt, count)| format!("{alt}-{count}"))
        .join(", ")
}

impl fmt::Display for UpsampleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Before: {}; After: {}",
            format_counts(&self.before),
            format_counts(&self.after)
        )
    }
}

fn class_counts(chosen: &[usize], n_alternatives: usize) -> Vec<(usize, usize)> {
    let mut counts = vec![0usize; n_alternatives];
    for &c in chosen {
        counts[c] += 1;
    }
    counts.into_iter().enumerate().collect()
}

/// Appends resampled cases according to `rules`, keyed by alternative index.
pub fn upsample(
    data: &LongFormData,
    rules: &BTreeMap<usize, UpsampleRule>,
    seed: Option<u64>,
) -> Result<(LongFormData, UpsampleSummary), UpsampleError> {
    let n_alt = data.n_alternatives();
    let chosen = data.chosen_alternatives()?;
    let before = class_counts(&chosen, n_alt);
    log::info!("Before: {}", format_counts(&before));

    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };

    let mut drawn: Vec<usize> = Vec::new();
    for (&alt, rule) in rules {
        if alt >= n_alt {
            return Err(UpsampleError::AlternativeOutOfRange {
                index: alt,
                n_alternatives: n_alt,
            });
        }
        let pool: Vec<usize> = chosen
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c == alt)
            .map(|(case_idx, _)| case_idx)
            .collect();
        let too_many = || UpsampleError::TooManyCases {
            rule: rule.to_string(),
            alternative: alt,
        };
        let num_new = rule.num_new(pool.len()).ok_or_else(too_many)?;
        if num_new == 0 {
            continue;
        }
        if pool.is_empty() {
            return Err(UpsampleError::NoCasesForAlternative(alt));
        }
        drawn.try_reserve(num_new).map_err(|_| too_many())?;
        drawn.extend((0..num_new).map(|_| pool[rng.gen_range(0..pool.len())]));
    }

    let output = if drawn.is_empty() {
        data.clone()
    } else {
        let max_id = data.case_ids().into_iter().max().unwrap_or(-1);
        let new_ids: Vec<i64> = (0..drawn.len()).map(|k| max_id + k as i64 + 1).collect();
        let extra = data.take_cases(&drawn).with_group_ids(&new_ids);
        LongFormData::concat(&[data.clone(), extra])?
    };

    let after = class_counts(&output.chosen_alternatives()?, n_alt);
    log::info!("After: {}", format_counts(&after));
    Ok((output, UpsampleSummary { before, after }))
}
