//! Relational Catalog Common Types
//!
//! Shared error taxonomy and configuration for the catalog model, rights
//! engine, policy compiler and introspector.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;

pub use config::{CatalogConfig, TypeAliases, TypePolicy};
pub use error::{Error, Result};
