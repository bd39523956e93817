//! In-memory catalog reader backed by a JSON dump
//!
//! Serves the same row shapes a live backend would, for offline tools and
//! tests. Executed statements are recorded rather than applied.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use relcat_common::{Error, Result};
use relcat_model::StorageKind;
use serde::{Deserialize, Serialize};

use crate::reader::{
    AclRow, AnnotationRow, CatalogReader, ColumnsRow, DynaclRow, ForeignKeyRow, SchemaRow, TableRow, UniqueRow,
};

/// Snapshot of the catalog query results of one backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogDump {
    pub schemas: Vec<SchemaRow>,
    pub columns: Vec<ColumnsRow>,
    pub tables: Vec<TableRow>,
    pub uniques: Vec<UniqueRow>,
    pub foreign_keys: Vec<ForeignKeyRow>,
    pub annotations: HashMap<StorageKind, Vec<AnnotationRow>>,
    pub acls: HashMap<StorageKind, Vec<AclRow>>,
    pub dynacls: HashMap<StorageKind, Vec<DynaclRow>>,
}

impl CatalogDump {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Introspection(format!("cannot read catalog dump {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }
}

/// `CatalogReader` over a `CatalogDump`.
pub struct DumpReader {
    dump: CatalogDump,
    executed: RwLock<Vec<String>>,
}

impl DumpReader {
    pub fn new(dump: CatalogDump) -> Self {
        Self {
            dump,
            executed: RwLock::new(Vec::new()),
        }
    }

    pub fn dump(&self) -> &CatalogDump {
        &self.dump
    }

    /// Statements passed to `execute`, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.read().clone()
    }
}

impl From<CatalogDump> for DumpReader {
    fn from(dump: CatalogDump) -> Self {
        Self::new(dump)
    }
}

impl CatalogReader for DumpReader {
    fn schemas(&self) -> Result<Vec<SchemaRow>> {
        Ok(self.dump.schemas.clone())
    }

    fn columns(&self) -> Result<Vec<ColumnsRow>> {
        Ok(self.dump.columns.clone())
    }

    fn tables(&self) -> Result<Vec<TableRow>> {
        Ok(self.dump.tables.clone())
    }

    fn uniques(&self) -> Result<Vec<UniqueRow>> {
        Ok(self.dump.uniques.clone())
    }

    fn foreign_keys(&self) -> Result<Vec<ForeignKeyRow>> {
        Ok(self.dump.foreign_keys.clone())
    }

    fn table_exists(&self, schema: &str, table: &str) -> Result<bool> {
        let listed = self
            .dump
            .tables
            .iter()
            .any(|t| t.table_schema == schema && t.table_name == table);
        let with_columns = self
            .dump
            .columns
            .iter()
            .any(|t| t.table_schema == schema && t.table_name == table);
        Ok(listed || with_columns)
    }

    fn annotations(&self, kind: StorageKind) -> Result<Vec<AnnotationRow>> {
        Ok(self.dump.annotations.get(&kind).cloned().unwrap_or_default())
    }

    fn acls(&self, kind: StorageKind) -> Result<Vec<AclRow>> {
        Ok(self.dump.acls.get(&kind).cloned().unwrap_or_default())
    }

    fn dynacls(&self, kind: StorageKind) -> Result<Vec<DynaclRow>> {
        Ok(self.dump.dynacls.get(&kind).cloned().unwrap_or_default())
    }

    fn execute(&self, sql: &str) -> Result<()> {
        self.executed.write().push(sql.to_string());
        Ok(())
    }
}
