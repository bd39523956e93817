//! Tables

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use relcat_common::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::acl::{AclKind, Acls, Dynacls, HasAcls};
use crate::annotation::{Annotations, HasAnnotations};
use crate::column::Column;
use crate::ident::qualified_name;
use crate::key::{ColumnSet, ForeignKey, KeyReference, Unique};
use crate::storage::{StorageKey, StorageKind};

/// Non-owning `(schema, table)` back-reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TablePath {
    pub schema: String,
    pub table: String,
}

impl TablePath {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    pub fn sql(&self) -> String {
        qualified_name(&self.schema, &self.table)
    }
}

impl fmt::Display for TablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.schema, self.table)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TableKind {
    #[default]
    Table,
    View,
    ForeignTable,
    MaterializedView,
}

impl TableKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TableKind::Table => "table",
            TableKind::View => "view",
            TableKind::ForeignTable => "foreign_table",
            TableKind::MaterializedView => "materialized_view",
        }
    }
}

impl FromStr for TableKind {
    type Err = Error;

    /// Accepts backend relkind codes and the document spelling.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "r" | "t" | "table" => Ok(TableKind::Table),
            "v" | "view" => Ok(TableKind::View),
            "f" | "foreign_table" => Ok(TableKind::ForeignTable),
            "m" | "materialized_view" => Ok(TableKind::MaterializedView),
            other => Err(Error::bad_data(format!("Unknown table kind {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub schema: String,
    pub kind: TableKind,
    pub comment: Option<String>,
    /// Physical columns in position order.
    columns: Vec<Column>,
    pub uniques: BTreeMap<ColumnSet, Unique>,
    pub fkeys: BTreeMap<ColumnSet, ForeignKey>,
    pub annotations: Annotations,
    pub acls: Acls,
    pub dynacls: Dynacls,
}

impl Table {
    pub fn new(schema: impl Into<String>, name: impl Into<String>, kind: TableKind) -> Self {
        Self {
            name: name.into(),
            schema: schema.into(),
            kind,
            comment: None,
            columns: Vec::new(),
            uniques: BTreeMap::new(),
            fkeys: BTreeMap::new(),
            annotations: Annotations::new(),
            acls: Acls::new(),
            dynacls: Dynacls::new(),
        }
    }

    pub fn path(&self) -> TablePath {
        TablePath::new(&self.schema, &self.name)
    }

    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }

    pub fn columns_mut(&mut self) -> impl Iterator<Item = &mut Column> {
        self.columns.iter_mut()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::not_found(format!("column {name} in table {}", self.path())))
    }

    pub fn column_mut(&mut self, name: &str) -> Result<&mut Column> {
        let path = self.path();
        self.columns
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::not_found(format!("column {name} in table {path}")))
    }

    /// Add a physical column, keeping position order.
    pub fn add_column(&mut self, column: Column) -> Result<()> {
        if column.is_fulltext() {
            return Err(Error::conflict("Full-text columns are derived, not stored"));
        }
        if self.has_column(&column.name) {
            return Err(Error::conflict(format!(
                "Column {} already exists in table {}",
                column.name,
                self.path()
            )));
        }
        let at = self
            .columns
            .iter()
            .position(|c| c.position() > column.position())
            .unwrap_or(self.columns.len());
        self.columns.insert(at, column);
        Ok(())
    }

    /// Next free ordinal for an appended column.
    pub fn next_position(&self) -> usize {
        self.columns
            .iter()
            .filter_map(Column::position)
            .max()
            .map_or(0, |p| p + 1)
    }

    pub(crate) fn take_column(&mut self, name: &str) -> Result<Column> {
        let idx = self
            .columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| Error::not_found(format!("column {name} in table {}", self.path())))?;
        Ok(self.columns.remove(idx))
    }

    pub fn unique(&self, columns: &ColumnSet) -> Result<&Unique> {
        self.uniques.get(columns).ok_or_else(|| {
            Error::not_found(format!("key {columns} in table {}", self.path()))
        })
    }

    pub fn foreign_key(&self, columns: &ColumnSet) -> Result<&ForeignKey> {
        self.fkeys.get(columns).ok_or_else(|| {
            Error::not_found(format!("foreign key {columns} in table {}", self.path()))
        })
    }

    /// Every outbound key reference of this table.
    pub fn references(&self) -> impl Iterator<Item = &KeyReference> {
        self.fkeys.values().flat_map(|fk| fk.references.values())
    }

    pub fn references_mut(&mut self) -> impl Iterator<Item = &mut KeyReference> {
        self.fkeys
            .values_mut()
            .flat_map(|fk| fk.references.values_mut())
    }

    /// Outbound reference backed by the named constraint.
    pub fn reference_by_constraint(&self, schema: &str, name: &str) -> Option<&KeyReference> {
        self.references().find(|kr| {
            kr.constraint_names
                .iter()
                .any(|c| c.schema() == schema && c.name() == name)
        })
    }

    pub fn storage_key(&self) -> StorageKey {
        StorageKey::new(StorageKind::Table)
            .text("schema_name", &self.schema)
            .text("table_name", &self.name)
    }

    /// Release overlay state of the table and everything it owns.
    pub fn pre_delete(&mut self, system_schema: &str) -> Vec<String> {
        let mut sql = Vec::new();
        for fk in self.fkeys.values_mut() {
            for kr in fk.references.values_mut() {
                sql.extend(kr.pre_delete(system_schema));
            }
        }
        for unique in self.uniques.values_mut() {
            sql.extend(unique.pre_delete(system_schema));
        }
        for column in &mut self.columns {
            sql.extend(column.pre_delete(system_schema));
        }
        self.annotations.clear();
        self.acls.clear();
        self.dynacls.clear();
        sql.extend(self.storage_key().purge_sql(system_schema));
        sql
    }
}

impl HasAcls for Table {
    const KIND: AclKind = AclKind::Table;

    fn acls(&self) -> &Acls {
        &self.acls
    }

    fn acls_mut(&mut self) -> &mut Acls {
        &mut self.acls
    }

    fn dynacls(&self) -> Option<&Dynacls> {
        Some(&self.dynacls)
    }
}

impl HasAnnotations for Table {
    fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    fn annotations_mut(&mut self) -> &mut Annotations {
        &mut self.annotations
    }
}
