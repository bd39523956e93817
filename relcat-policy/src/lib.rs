//! Rights Engine and Policy-to-SQL Compiler
//!
//! Decides static rights of a requester on catalog entities and compiles
//! row-level (dynamic) policy into SQL fragments for statement builders.
//!
//! # Example
//!
//! ```ignore
//! let ctx = EvaluationContext::new(["alice"]);
//! let engine = RightsEngine::new(&model, &ctx);
//! let column = model.column("s", "people", "ssn")?;
//! if engine.enumerable(Target::Column(column)) {
//!     let item = select_item(&engine, column, Some("t0"), Right::Select)?;
//! }
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod binding;
pub mod compiler;
pub mod context;
pub mod evaluator;
pub mod render;

pub use binding::{compile_binding, validate_condition};
pub use compiler::{compile_column, compile_table, select_item, Mode};
pub use context::{Decision, EntityKey, EvaluationContext};
pub use evaluator::{RightsEngine, Target};
