//! Rule DSL evaluator.
//!
//! This crate provides:
//! - Dot-path field resolution over nested JSON event records
//! - The twelve comparison operators of [`sluice_core::Operator`]
//! - AND/OR rule matching and OR-across-rules event filtering

pub mod evaluator;

pub use evaluator::{check_condition, get_field_value, RuleEvaluator};
