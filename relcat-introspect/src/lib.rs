//! Introspector
//!
//! Builds a catalog model from the structural catalog of a relational
//! backend: schemas, tables, columns, unique and foreign keys, plus the
//! annotation, ACL and binding overlays stored in the system schema.
//!
//! Backends are reached through the [`CatalogReader`] trait. [`DumpReader`]
//! serves a JSON snapshot of the same query results.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod dump;
pub mod introspect;
pub mod reader;

pub use dump::{CatalogDump, DumpReader};
pub use introspect::{introspect, introspect_with_report, IntrospectionReport};
pub use reader::{
    AclRow, AnnotationRow, CatalogReader, ColumnsRow, DynaclRow, ForeignKeyRow, SchemaRow, TableRow, UniqueRow,
};
