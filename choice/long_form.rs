//! # Long-Form Choice Data
//!
//! Choice-model estimation works on one row per (case, alternative) pair. A
//! wide mode table with one row per decision-maker is expanded so that each
//! case contributes exactly `N` consecutive rows, one for each alternative in
//! index order. Every row carries:
//!
//! - `group`: the case identifier,
//! - `alt`: the alternative index,
//! - `choice`: a one-hot indicator of the chosen alternative,
//! - the alternative-specific attributes, read from the per-alternative wide
//!   columns (zero when a wide column is absent),
//! - the case-specific attributes, repeated on all `N` rows.
//!
//! The case-major block layout is an invariant every consumer relies on: a
//! case's rows are contiguous and ordered by alternative index.

use crate::data::ModeTable;
use crate::spec::Alternatives;
use ndarray::Array1;
use std::collections::{BTreeMap, HashSet};
use std::ops::Range;
use thiserror::Error;

/// Long-form variable name → wide column name for each alternative, by index.
pub type AltAttributes = BTreeMap<String, Vec<String>>;

#[derive(Error, Debug)]
pub enum LongFormError {
    #[error(
        "Alternative attribute '{variable}' lists {found} wide columns but there are {expected} alternatives."
    )]
    AltAttributeArity {
        variable: String,
        expected: usize,
        found: usize,
    },
    #[error("Case-specific attribute '{0}' is not a column of the mode table.")]
    MissingGenericColumn(String),
    #[error("The mode table has no chosen-mode column, so choices cannot be encoded.")]
    MissingModes,
    #[error("Case {case_id} chose '{label}', which is not one of the configured alternatives.")]
    UnknownMode { case_id: i64, label: String },
    #[error("Case {0} has no chosen alternative.")]
    MissingChoice(i64),
    #[error("Long-form data sets disagree: {0}")]
    Incompatible(String),
    #[error("Malformed long-form data: {0}")]
    Malformed(String),
    #[error("A variable name is used both as an alternative attribute and a case attribute: '{0}'")]
    NameClash(String),
}

/// Case-major long-form data, `n_alternatives` rows per case.
#[derive(Debug, Clone, PartialEq)]
pub struct LongFormData {
    n_alternatives: usize,
    groups: Vec<i64>,
    alts: Vec<usize>,
    choice: Vec<u8>,
    columns: BTreeMap<String, Array1<f64>>,
}

/// Expands a wide mode table into long form.
///
/// With `with_choice` unset (prediction data) every `choice` entry is zero and
/// the mode column is not consulted.
pub fn build_long_form(
    table: &ModeTable,
    alt_attrs: &AltAttributes,
    generic_attrs: &[String],
    alternatives: &Alternatives,
    with_choice: bool,
) -> Result<LongFormData, LongFormError> {
    let n_alt = alternatives.len();
    let n_cases = table.n_rows();
    let n_rows = n_cases * n_alt;

    for (variable, wide_cols) in alt_attrs {
        if wide_cols.len() != n_alt {
            return Err(LongFormError::AltAttributeArity {
                variable: variable.clone(),
                expected: n_alt,
                found: wide_cols.len(),
            });
        }
        if generic_attrs.contains(variable) {
            return Err(LongFormError::NameClash(variable.clone()));
        }
    }

    let mut groups = Vec::with_capacity(n_rows);
    let mut alts = Vec::with_capacity(n_rows);
    for &case_id in &table.case_ids {
        groups.extend(std::iter::repeat_n(case_id, n_alt));
        alts.extend(0..n_alt);
    }

    let mut choice = vec![0u8; n_rows];
    if with_choice {
        let labels = table.modes.as_ref().ok_or(LongFormError::MissingModes)?;
        for (case_idx, label) in labels.iter().enumerate() {
            let alt = alternatives
                .resolve_label(label)
                .ok_or_else(|| LongFormError::UnknownMode {
                    case_id: table.case_ids[case_idx],
                    label: label.clone(),
                })?;
            choice[case_idx * n_alt + alt] = 1;
        }
    }

    let mut columns = BTreeMap::new();
    for (variable, wide_cols) in alt_attrs {
        let mut values = Array1::zeros(n_rows);
        for (alt, wide_name) in wide_cols.iter().enumerate() {
            if let Some(wide) = table.column(wide_name) {
                for case_idx in 0..n_cases {
                    values[case_idx * n_alt + alt] = wide[case_idx];
                }
            }
        }
        columns.insert(variable.clone(), values);
    }

    for variable in generic_attrs {
        let wide = table
            .column(variable)
            .ok_or_else(|| LongFormError::MissingGenericColumn(variable.clone()))?;
        let values = Array1::from_shape_fn(n_rows, |row| wide[row / n_alt]);
        columns.insert(variable.clone(), values);
    }

    let data = LongFormData {
        n_alternatives: n_alt,
        groups,
        alts,
        choice,
        columns,
    };
    log::debug!(
        "Built long-form data: {} cases x {} alternatives, {} variables",
        n_cases,
        n_alt,
        data.columns.len()
    );
    Ok(data)
}

impl LongFormData {
    /// Assembles long-form data from raw parts and checks the block layout.
    pub fn from_parts(
        n_alternatives: usize,
        groups: Vec<i64>,
        alts: Vec<usize>,
        choice: Vec<u8>,
        columns: BTreeMap<String, Array1<f64>>,
    ) -> Result<Self, LongFormError> {
        let data = Self {
            n_alternatives,
            groups,
            alts,
            choice,
            columns,
        };
        data.validate()?;
        Ok(data)
    }

    /// Checks the case-major layout invariants.
    pub fn validate(&self) -> Result<(), LongFormError> {
        let n_alt = self.n_alternatives;
        let n_rows = self.groups.len();
        if n_alt == 0 {
            return Err(LongFormError::Malformed(
                "zero alternatives per case".to_string(),
            ));
        }
        if self.alts.len() != n_rows || self.choice.len() != n_rows {
            return Err(LongFormError::Malformed(format!(
                "group/alt/choice lengths differ ({}, {}, {})",
                n_rows,
                self.alts.len(),
                self.choice.len()
            )));
        }
        if n_rows % n_alt != 0 {
            return Err(LongFormError::Malformed(format!(
                "{n_rows} rows is not a multiple of {n_alt} alternatives"
            )));
        }
        for (name, values) in &self.columns {
            if values.len() != n_rows {
                return Err(LongFormError::Malformed(format!(
                    "column '{name}' has {} rows, expected {n_rows}",
                    values.len()
                )));
            }
        }
        let mut seen = HashSet::new();
        for case_idx in 0..self.n_cases() {
            let rows = self.case_rows(case_idx);
            let id = self.groups[rows.start];
            if !seen.insert(id) {
                return Err(LongFormError::Malformed(format!(
                    "case {id} appears in more than one block"
                )));
            }
            for (offset, row) in rows.clone().enumerate() {
                if self.groups[row] != id || self.alts[row] != offset {
                    return Err(LongFormError::Malformed(format!(
                        "case {id} is not a contiguous block ordered by alternative"
                    )));
                }
            }
            let chosen: u32 = self.choice[rows].iter().map(|&c| u32::from(c)).sum();
            if chosen > 1 {
                return Err(LongFormError::Malformed(format!(
                    "case {id} has {chosen} chosen alternatives"
                )));
            }
        }
        Ok(())
    }

    pub fn n_alternatives(&self) -> usize {
        self.n_alternatives
    }

    pub fn n_rows(&self) -> usize {
        self.groups.len()
    }

    pub fn n_cases(&self) -> usize {
        self.groups.len() / self.n_alternatives
    }

    pub fn groups(&self) -> &[i64] {
        &self.groups
    }

    pub fn alts(&self) -> &[usize] {
        &self.alts
    }

    pub fn choice(&self) -> &[u8] {
        &self.choice
    }

    pub fn columns(&self) -> &BTreeMap<String, Array1<f64>> {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Array1<f64>> {
        self.columns.get(name)
    }

    pub fn case_rows(&self, case_idx: usize) -> Range<usize> {
        let start = case_idx * self.n_alternatives;
        start..start + self.n_alternatives
    }

    /// Case identifiers in block order.
    pub fn case_ids(&self) -> Vec<i64> {
        self.groups
            .iter()
            .step_by(self.n_alternatives)
            .copied()
            .collect()
    }

    /// The chosen alternative of every case, in block order.
    pub fn chosen_alternatives(&self) -> Result<Vec<usize>, LongFormError> {
        (0..self.n_cases())
            .map(|case_idx| {
                let rows = self.case_rows(case_idx);
                self.choice[rows.clone()]
                    .iter()
                    .position(|&c| c == 1)
                    .ok_or(LongFormError::MissingChoice(self.groups[rows.start]))
            })
            .collect()
    }

    /// Copies the given case blocks, in the given order, into a data set.
    pub(crate) fn take_cases(&self, case_indices: &[usize]) -> LongFormData {
        let n_alt = self.n_alternatives;
        let rows: Vec<usize> = case_indices
            .iter()
            .flat_map(|&case_idx| self.case_rows(case_idx))
            .collect();

        let columns = self
            .columns
            .iter()
            .map(|(name, values)| {
                let taken: Array1<f64> = rows.iter().map(|&r| values[r]).collect();
                (name.clone(), taken)
            })
            .collect();

        LongFormData {
            n_alternatives: n_alt,
            groups: rows.iter().map(|&r| self.groups[r]).collect(),
            alts: rows.iter().map(|&r| self.alts[r]).collect(),
            choice: rows.iter().map(|&r| self.choice[r]).collect(),
            columns,
        }
    }

    /// Renumbers the cases, in block order.
    pub(crate) fn with_group_ids(mut self, case_ids: &[i64]) -> LongFormData {
        let n_alt = self.n_alternatives;
        for (case_idx, &id) in case_ids.iter().enumerate() {
            let start = case_idx * n_alt;
            self.groups[start..start + n_alt].fill(id);
        }
        self
    }

    /// Keeps the cases whose identifier is in `ids`, preserving the current order.
    pub fn select_cases(&self, ids: &HashSet<i64>) -> LongFormData {
        let keep: Vec<usize> = (0..self.n_cases())
            .filter(|&case_idx| ids.contains(&self.groups[case_idx * self.n_alternatives]))
            .collect();
        self.take_cases(&keep)
    }

    /// Stable sort of the case blocks by identifier.
    pub fn sort_by_case(&self) -> LongFormData {
        let mut order: Vec<usize> = (0..self.n_cases()).collect();
        order.sort_by_key(|&case_idx| self.groups[case_idx * self.n_alternatives]);
        self.take_cases(&order)
    }

    /// Stacks data sets with matching alternatives and variables.
    pub fn concat(parts: &[LongFormData]) -> Result<LongFormData, LongFormError> {
        let first = parts
            .first()
            .ok_or_else(|| LongFormError::Incompatible("nothing to concatenate".to_string()))?;
        let names: Vec<&String> = first.columns.keys().collect();

        let mut out = LongFormData {
            n_alternatives: first.n_alternatives,
            groups: Vec::new(),
            alts: Vec::new(),
            choice: Vec::new(),
            columns: BTreeMap::new(),
        };
        let mut buffers: BTreeMap<String, Vec<f64>> = names
            .iter()
            .map(|name| ((*name).clone(), Vec::new()))
            .collect();

        for part in parts {
            if part.n_alternatives != first.n_alternatives {
                return Err(LongFormError::Incompatible(format!(
                    "{} vs {} alternatives",
                    first.n_alternatives, part.n_alternatives
                )));
            }
            if part.columns.keys().collect::<Vec<_>>() != names {
                return Err(LongFormError::Incompatible(
                    "variable sets differ".to_string(),
                ));
            }
            out.groups.extend_from_slice(&part.groups);
            out.alts.extend_from_slice(&part.alts);
            out.choice.extend_from_slice(&part.choice);
            for (name, values) in &part.columns {
                if let Some(buffer) = buffers.get_mut(name) {
                    buffer.extend(values.iter().copied());
                }
            }
        }

        out.columns = buffers
            .into_iter()
            .map(|(name, values)| (name, Array1::from(values)))
            .collect();
        out.validate()?;
        Ok(out)
    }
}
