//! Relational Catalog Model
//!
//! The in-memory entity graph of a catalog: schemas, tables, columns,
//! keys and foreign-key references, each carrying annotations, static
//! ACLs and dynamic ACL bindings. Also home to SQL quoting, column type
//! handling and the DDL builders that consume the model.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod acl;
pub mod annotation;
pub mod cell;
pub mod column;
pub mod ddl;
pub mod document;
pub mod ident;
pub mod key;
pub mod model;
pub mod storage;
pub mod table;
pub mod types;

pub use acl::{AclBinding, AclKind, Acls, Binding, Dynacls, HasAcls, PathElement, Projection, ProjectionType, Right};
pub use annotation::{Annotations, HasAnnotations};
pub use cell::CatalogCell;
pub use column::{Column, ColumnKind, FULLTEXT_COLUMN};
pub use key::{ColumnSet, ConstraintName, ForeignKey, KeyRefId, KeyReference, RefAction, ReferenceMap, Unique};
pub use model::{Model, Schema};
pub use storage::{StorageKey, StorageKind, StoredTarget};
pub use table::{Table, TableKind, TablePath};
pub use types::{ColumnType, TypeDoc};
