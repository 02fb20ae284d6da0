//! # Model Specification
//!
//! Declares how each variable enters the systematic utility of each
//! alternative and names every coefficient the estimator will fit.
//!
//! Three kinds of term exist:
//!
//! * **Alternative-specific attributes** (travel time, cost) vary across the
//!   alternatives of a case and share a single coefficient.
//! * **Case-specific attributes** (income, age) are constant within a case, so
//!   they are identified only relative to a reference alternative. Each
//!   non-reference alternative gets its own coefficient, named
//!   `"<variable> for <alternative>"`.
//! * **Alternative-specific constants** (ASCs), one per non-reference
//!   alternative, named `"ASC for <alternative>"`.
//!
//! The coefficient order is fixed: alternative-specific terms, then
//! case-specific terms (variable major, alternative minor), then constants.

use crate::long_form::LongFormData;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Separator between a variable and the alternative it interacts with.
pub const FOR_SEPARATOR: &str = " for ";
/// Variable name used for alternative-specific constants.
pub const ASC_NAME: &str = "ASC";

/// Ordered alternative names; the position of a name is its alternative index.
///
/// Deserialized values go through [`Alternatives::new`], so a model or config
/// file cannot smuggle in duplicate or missing names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Alternatives(Vec<String>);

impl Default for Alternatives {
    fn default() -> Self {
        Self(
            ["drive", "cycle", "walk", "PT"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }
}

impl Alternatives {
    pub fn new(names: Vec<String>) -> Result<Self, SpecError> {
        if names.len() < 2 {
            return Err(SpecError::TooFewAlternatives(names.len()));
        }
        let mut seen = HashSet::new();
        for name in &names {
            if name.trim().is_empty() {
                return Err(SpecError::EmptyAlternativeName);
            }
            if !seen.insert(name.as_str()) {
                return Err(SpecError::DuplicateName(name.clone()));
            }
        }
        Ok(Self(names))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|n| n == name)
    }

    /// Resolves an observed mode label: an exact name, or an in-range integer index.
    pub fn resolve_label(&self, label: &str) -> Option<usize> {
        self.index_of(label).or_else(|| {
            label
                .parse::<usize>()
                .ok()
                .filter(|&idx| idx < self.0.len())
        })
    }
}

impl TryFrom<Vec<String>> for Alternatives {
    type Error = SpecError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(names)
    }
}

impl From<Alternatives> for Vec<String> {
    fn from(alternatives: Alternatives) -> Self {
        alternatives.0
    }
}

#[derive(Error, Debug)]
pub enum SpecError {
    #[error("A choice model needs at least two alternatives, but {0} were given.")]
    TooFewAlternatives(usize),
    #[error("Alternative names must not be empty.")]
    EmptyAlternativeName,
    #[error("The name '{0}' is used more than once in the specification.")]
    DuplicateName(String),
    #[error("Reference alternative index {index} is out of range for {n_alternatives} alternatives.")]
    ReferenceOutOfRange {
        index: usize,
        n_alternatives: usize,
    },
    #[error("The variable '{0}' is not a column of the long-form data.")]
    UnknownColumn(String),
    #[error("The specification has no coefficients to estimate.")]
    NoCoefficients,
    #[error(
        "The long-form data has {found} alternatives per case but the specification declares {expected}."
    )]
    AlternativeCountMismatch { expected: usize, found: usize },
}

/// How a variable enters the utilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermKind {
    /// One coefficient shared by all alternatives.
    Generic,
    /// One coefficient per non-reference alternative.
    CaseSpecific,
    /// Alternative-specific constants for the non-reference alternatives.
    Constant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub variable: String,
    pub kind: TermKind,
}

/// One column of the design matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoefficientSlot {
    pub name: String,
    /// Data column read for this coefficient; `None` for constants.
    pub column: Option<String>,
    /// Alternative this coefficient is restricted to; `None` when it applies to all.
    pub alternative: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpecification {
    alternatives: Alternatives,
    reference: usize,
    terms: Vec<Term>,
    slots: Vec<CoefficientSlot>,
}

impl ModelSpecification {
    pub fn new(
        alternatives: Alternatives,
        alt_attr_vars: &[String],
        generic_attrs: &[String],
        constant: bool,
        reference: usize,
    ) -> Result<Self, SpecError> {
        let n_alt = alternatives.len();
        if n_alt < 2 {
            return Err(SpecError::TooFewAlternatives(n_alt));
        }
        if reference >= n_alt {
            return Err(SpecError::ReferenceOutOfRange {
                index: reference,
                n_alternatives: n_alt,
            });
        }

        let mut terms = Vec::new();
        let mut slots = Vec::new();

        for var in alt_attr_vars {
            terms.push(Term {
                variable: var.clone(),
                kind: TermKind::Generic,
            });
            slots.push(CoefficientSlot {
                name: var.clone(),
                column: Some(var.clone()),
                alternative: None,
            });
        }

        let non_reference: Vec<(usize, &String)> = alternatives
            .names()
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != reference)
            .collect();

        for var in generic_attrs {
            terms.push(Term {
                variable: var.clone(),
                kind: TermKind::CaseSpecific,
            });
            for &(idx, alt_name) in &non_reference {
                slots.push(CoefficientSlot {
                    name: format!("{var}{FOR_SEPARATOR}{alt_name}"),
                    column: Some(var.clone()),
                    alternative: Some(idx),
                });
            }
        }

        if constant {
            terms.push(Term {
                variable: ASC_NAME.to_string(),
                kind: TermKind::Constant,
            });
            for &(idx, alt_name) in &non_reference {
                slots.push(CoefficientSlot {
                    name: format!("{ASC_NAME}{FOR_SEPARATOR}{alt_name}"),
                    column: None,
                    alternative: Some(idx),
                });
            }
        }

        if slots.is_empty() {
            return Err(SpecError::NoCoefficients);
        }

        let mut seen = HashSet::new();
        for slot in &slots {
            if !seen.insert(slot.name.as_str()) {
                return Err(SpecError::DuplicateName(slot.name.clone()));
            }
        }

        Ok(Self {
            alternatives,
            reference,
            terms,
            slots,
        })
    }

    pub fn alternatives(&self) -> &Alternatives {
        &self.alternatives
    }

    pub fn reference(&self) -> usize {
        self.reference
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn slots(&self) -> &[CoefficientSlot] {
        &self.slots
    }

    pub fn num_coefficients(&self) -> usize {
        self.slots.len()
    }

    pub fn coefficient_names(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.name.clone()).collect()
    }

    /// Builds the `[rows, num_coefficients]` design matrix for long-form data.
    pub fn design_matrix(&self, data: &LongFormData) -> Result<Array2<f64>, SpecError> {
        if data.n_alternatives() != self.alternatives.len() {
            return Err(SpecError::AlternativeCountMismatch {
                expected: self.alternatives.len(),
                found: data.n_alternatives(),
            });
        }

        let n_rows = data.n_rows();
        let mut x = Array2::zeros((n_rows, self.slots.len()));
        for (col_idx, slot) in self.slots.iter().enumerate() {
            let values = match &slot.column {
                Some(name) => Some(
                    data.column(name)
                        .ok_or_else(|| SpecError::UnknownColumn(name.clone()))?,
                ),
                None => None,
            };
            let mut target = x.column_mut(col_idx);
            for (row, &alt) in data.alts().iter().enumerate() {
                if slot.alternative.is_some_and(|a| a != alt) {
                    continue;
                }
                target[row] = values.map_or(1.0, |v| v[row]);
            }
        }
        Ok(x)
    }
}

impl fmt::Display for ModelSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "MNL specification: {} alternatives (reference: {}), {} coefficients",
            self.alternatives.len(),
            self.alternatives.name(self.reference).unwrap_or("?"),
            self.slots.len()
        )?;
        for slot in &self.slots {
            writeln!(f, "  {}", slot.name)?;
        }
        Ok(())
    }
}
