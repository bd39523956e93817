//! Table columns

use relcat_common::{Error, Result};
use serde_json::Value;

use crate::acl::{AclKind, Acls, Dynacls, HasAcls};
use crate::annotation::{Annotations, HasAnnotations};
use crate::ident::sql_identifier;
use crate::storage::{StorageKey, StorageKind};
use crate::table::TablePath;
use crate::types::ColumnType;

/// Name of the synthetic full-text column.
pub const FULLTEXT_COLUMN: &str = "*";

/// Physical attribute or synthetic full-text vector.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnKind {
    Physical {
        position: usize,
        ctype: ColumnType,
        default: Option<Value>,
    },
    /// Enumerable text columns of the table, in position order.
    FullText { sources: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub table: TablePath,
    pub kind: ColumnKind,
    pub nullok: bool,
    pub comment: Option<String>,
    pub annotations: Annotations,
    pub acls: Acls,
    pub dynacls: Dynacls,
}

impl Column {
    pub fn new(
        table: TablePath,
        name: impl Into<String>,
        position: usize,
        ctype: ColumnType,
        default: Option<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            table,
            kind: ColumnKind::Physical {
                position,
                ctype,
                default,
            },
            nullok: true,
            comment: None,
            annotations: Annotations::new(),
            acls: Acls::new(),
            dynacls: Dynacls::new(),
        }
    }

    /// Full-text column over `sources`. Carries no policy of its own.
    pub fn fulltext(table: TablePath, sources: Vec<String>) -> Self {
        Self {
            name: FULLTEXT_COLUMN.to_string(),
            table,
            kind: ColumnKind::FullText { sources },
            nullok: true,
            comment: None,
            annotations: Annotations::new(),
            acls: Acls::new(),
            dynacls: Dynacls::new(),
        }
    }

    pub fn with_nullok(mut self, nullok: bool) -> Self {
        self.nullok = nullok;
        self
    }

    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment;
        self
    }

    pub fn is_fulltext(&self) -> bool {
        matches!(self.kind, ColumnKind::FullText { .. })
    }

    pub fn position(&self) -> Option<usize> {
        match &self.kind {
            ColumnKind::Physical { position, .. } => Some(*position),
            ColumnKind::FullText { .. } => None,
        }
    }

    pub fn ctype(&self) -> ColumnType {
        match &self.kind {
            ColumnKind::Physical { ctype, .. } => ctype.clone(),
            ColumnKind::FullText { .. } => ColumnType::tsvector(),
        }
    }

    pub fn default_value(&self) -> Option<&Value> {
        match &self.kind {
            ColumnKind::Physical { default, .. } => default.as_ref(),
            ColumnKind::FullText { .. } => None,
        }
    }

    pub fn is_text(&self) -> bool {
        match &self.kind {
            ColumnKind::Physical { ctype, .. } => ctype.is_text(),
            ColumnKind::FullText { .. } => false,
        }
    }

    pub fn is_indexable(&self) -> bool {
        match &self.kind {
            ColumnKind::Physical { ctype, .. } => ctype.name() != "json",
            ColumnKind::FullText { .. } => false,
        }
    }

    /// Column reference, qualified by `alias` when one is given.
    pub fn sql_name(&self, alias: Option<&str>) -> String {
        match alias.filter(|a| !a.is_empty()) {
            Some(alias) => format!("{}.{}", sql_identifier(alias), sql_identifier(&self.name)),
            None => sql_identifier(&self.name),
        }
    }

    /// Column clause for managed table DDL.
    pub fn sql_def(&self) -> Result<String> {
        let ColumnKind::Physical { ctype, default, .. } = &self.kind else {
            return Err(Error::conflict(format!(
                "Column {} of {} has no physical definition",
                self.name, self.table
            )));
        };
        let mut parts = vec![sql_identifier(&self.name), ctype.sql(false)];
        if let Some(default) = default.as_ref().filter(|d| !d.is_null()) {
            parts.push(format!("DEFAULT {}", ctype.sql_literal(default)?));
        }
        if !self.nullok {
            parts.push("NOT NULL".to_string());
        }
        Ok(parts.join(" "))
    }

    /// Column clause for a temporary input table.
    pub fn input_ddl(&self, alias: Option<&str>) -> String {
        format!(
            "{} {}",
            sql_identifier(alias.unwrap_or(&self.name)),
            self.ctype().sql(true)
        )
    }

    pub fn storage_key(&self) -> StorageKey {
        StorageKey::new(StorageKind::Column)
            .text("schema_name", &self.table.schema)
            .text("table_name", &self.table.table)
            .text("column_name", &self.name)
    }

    /// Release stored overlay state before the column is removed.
    pub fn pre_delete(&mut self, system_schema: &str) -> Vec<String> {
        self.annotations.clear();
        self.acls.clear();
        self.dynacls.clear();
        self.storage_key().purge_sql(system_schema)
    }
}

impl HasAcls for Column {
    const KIND: AclKind = AclKind::Column;

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

impl HasAnnotations for Column {
    fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    fn annotations_mut(&mut self) -> &mut Annotations {
        &mut self.annotations
    }
}
