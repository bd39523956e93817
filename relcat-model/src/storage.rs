//! Backend storage keying for annotations, ACLs and bindings

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ident::{qualified_name, sql_identifier, sql_literal, sql_text_array};

/// Resource kinds with stored model overlays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Catalog,
    Schema,
    Table,
    Column,
    Key,
    Keyref,
}

impl StorageKind {
    pub const ALL: [StorageKind; 6] = [
        StorageKind::Catalog,
        StorageKind::Schema,
        StorageKind::Table,
        StorageKind::Column,
        StorageKind::Key,
        StorageKind::Keyref,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::Catalog => "catalog",
            StorageKind::Schema => "schema",
            StorageKind::Table => "table",
            StorageKind::Column => "column",
            StorageKind::Key => "key",
            StorageKind::Keyref => "keyref",
        }
    }

    pub fn has_acls(self) -> bool {
        !matches!(self, StorageKind::Key)
    }

    pub fn has_dynacls(self) -> bool {
        matches!(
            self,
            StorageKind::Table | StorageKind::Column | StorageKind::Keyref
        )
    }

    pub fn annotation_table(self) -> String {
        format!("model_{}_annotation", self.as_str())
    }

    pub fn acl_table(self) -> String {
        format!("model_{}_acl", self.as_str())
    }

    pub fn dynacl_table(self) -> String {
        format!("model_{}_dynacl", self.as_str())
    }

    /// Every storage table holding rows for this kind.
    pub fn storage_tables(self) -> Vec<String> {
        let mut tables = vec![self.annotation_table()];
        if self.has_acls() {
            tables.push(self.acl_table());
        }
        if self.has_dynacls() {
            tables.push(self.dynacl_table());
        }
        tables
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One keying column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValue {
    Text(String),
    TextArray(Vec<String>),
}

impl KeyValue {
    fn sql(&self) -> String {
        match self {
            KeyValue::Text(s) => sql_literal(s),
            KeyValue::TextArray(items) => sql_text_array(items),
        }
    }
}

/// Storage keying of one entity: kind plus named key columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKey {
    pub kind: StorageKind,
    pub columns: Vec<(&'static str, KeyValue)>,
}

impl StorageKey {
    pub fn new(kind: StorageKind) -> Self {
        Self {
            kind,
            columns: Vec::new(),
        }
    }

    pub fn text(mut self, column: &'static str, value: impl Into<String>) -> Self {
        self.columns.push((column, KeyValue::Text(value.into())));
        self
    }

    pub fn text_array(mut self, column: &'static str, values: Vec<String>) -> Self {
        self.columns.push((column, KeyValue::TextArray(values)));
        self
    }

    fn where_clause(&self) -> String {
        if self.columns.is_empty() {
            return "True".to_string();
        }
        self.columns
            .iter()
            .map(|(col, value)| format!("{} = {}", sql_identifier(col), value.sql()))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Statements removing every stored overlay row of this entity.
    pub fn purge_sql(&self, system_schema: &str) -> Vec<String> {
        let condition = self.where_clause();
        self.kind
            .storage_tables()
            .into_iter()
            .map(|table| {
                format!(
                    "DELETE FROM {} WHERE {};",
                    qualified_name(system_schema, &table),
                    condition
                )
            })
            .collect()
    }
}

/// Row keying as read back from storage; unused fields stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredTarget {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_schema_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_table_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_column_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_schema_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_table_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_column_names: Option<Vec<String>>,
}
