#![deny(unused_variables)]
#![deny(dead_code)]

//! Multinomial logit tooling for transport mode choice.
//!
//! The pipeline runs leaf first: a wide survey table ([`data`]) is reshaped
//! into long form ([`long_form`]), optionally rebalanced ([`upsample`]),
//! described by a [`spec::ModelSpecification`], fitted by maximum likelihood
//! ([`estimate`]) and applied to new cases ([`predict`]). [`cross_validate`]
//! ties the stages together for k-fold evaluation.

pub mod config;
pub mod cross_validate;
pub mod data;
pub mod estimate;
pub mod likelihood;
pub mod long_form;
pub mod metrics;
pub mod model;
pub mod predict;
pub mod spec;
pub mod upsample;
