//! Backend catalog reader interface
//!
//! Row shapes mirror what the PostgreSQL catalog queries return, one
//! struct per query. Columns arrive aggregated per table, with parallel
//! arrays indexed by column position.

use relcat_common::Result;
use relcat_model::{AclBinding, StorageKind, StoredTarget};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRow {
    pub schema_name: String,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Columns of one table, in position order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnsRow {
    pub table_schema: String,
    pub table_name: String,
    pub table_kind: String,
    pub table_comment: Option<String>,
    pub column_names: Vec<String>,
    pub default_values: Vec<Option<String>>,
    /// Backend type name; `ARRAY` defers to `element_types`.
    pub data_types: Vec<String>,
    pub element_types: Vec<Option<String>>,
    /// Base type of domain-typed columns.
    pub domain_bases: Vec<Option<String>>,
    pub comments: Vec<Option<String>>,
    pub not_nulls: Vec<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRow {
    pub table_schema: String,
    pub table_name: String,
    pub table_kind: String,
    #[serde(default)]
    pub comment: Option<String>,
}

/// One primary key or unique constraint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniqueRow {
    pub constraint_schema: String,
    pub constraint_name: String,
    pub table_schema: String,
    pub table_name: String,
    pub column_names: Vec<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// One foreign key constraint. Column arrays correspond by index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyRow {
    pub fk_constraint_schema: String,
    pub fk_constraint_name: String,
    pub fk_table_schema: String,
    pub fk_table_name: String,
    pub fk_column_names: Vec<String>,
    pub uq_table_schema: String,
    pub uq_table_name: String,
    pub uq_column_names: Vec<String>,
    pub rc_delete_rule: String,
    pub rc_update_rule: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationRow {
    #[serde(flatten)]
    pub target: StoredTarget,
    pub annotation_uri: String,
    pub annotation_value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclRow {
    #[serde(flatten)]
    pub target: StoredTarget,
    pub acl: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynaclRow {
    #[serde(flatten)]
    pub target: StoredTarget,
    pub binding_name: String,
    pub binding: AclBinding,
}

/// Read-only structural queries against a backend, plus statement
/// execution for repairs introspection performs.
///
/// Implementations own their connection for the duration of one
/// introspection run. Catalog reads that fail should surface as
/// `Error::Introspection`, lost connections as `Error::BackendUnavailable`.
pub trait CatalogReader {
    /// User-visible schemas, excluded schemas included.
    fn schemas(&self) -> Result<Vec<SchemaRow>>;

    fn columns(&self) -> Result<Vec<ColumnsRow>>;

    /// Every table, including those without columns.
    fn tables(&self) -> Result<Vec<TableRow>>;

    fn uniques(&self) -> Result<Vec<UniqueRow>>;

    fn foreign_keys(&self) -> Result<Vec<ForeignKeyRow>>;

    fn table_exists(&self, schema: &str, table: &str) -> Result<bool>;

    fn annotations(&self, kind: StorageKind) -> Result<Vec<AnnotationRow>>;

    fn acls(&self, kind: StorageKind) -> Result<Vec<AclRow>>;

    fn dynacls(&self, kind: StorageKind) -> Result<Vec<DynaclRow>>;

    fn execute(&self, sql: &str) -> Result<()>;
}
