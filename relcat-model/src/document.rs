//! Declarative model documents

use std::collections::BTreeMap;

use relcat_common::{CatalogConfig, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::acl::{AclKind, Acls, Dynacls};
use crate::annotation::Annotations;
use crate::column::Column;
use crate::ident::enforce_identifier_length;
use crate::key::{ColumnSet, ConstraintName, RefAction, ReferenceMap};
use crate::model::{Model, Schema};
use crate::table::{Table, TableKind, TablePath};
use crate::types::TypeDoc;

fn required<'a, T>(field: &'a Option<T>, what: &str, name: &str) -> Result<&'a T> {
    field
        .as_ref()
        .ok_or_else(|| Error::bad_data(format!("{what} document missing required field \"{name}\"")))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnDoc {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub ctype: Option<TypeDoc>,
    pub default: Option<Value>,
    pub nullok: Option<bool>,
    pub comment: Option<String>,
    pub annotations: Annotations,
    pub acls: Acls,
    pub acl_bindings: Dynacls,
}

impl ColumnDoc {
    pub fn build(&self, table: &TablePath, position: usize, config: &CatalogConfig) -> Result<Column> {
        let name = required(&self.name, "Column", "name")?;
        enforce_identifier_length(name, "Column")?;
        let ctype = required(&self.ctype, "Column", "type")?.build(config, false)?;

        let default = self.default.clone().filter(|d| !d.is_null());
        if let Some(value) = &default {
            ctype.sql_literal(value)?;
        }
        self.acls.validate(AclKind::Column)?;
        self.acl_bindings.validate(AclKind::Column)?;

        let mut column = Column::new(table.clone(), name, position, ctype, default)
            .with_nullok(self.nullok.unwrap_or(true))
            .with_comment(self.comment.clone());
        column.annotations = self.annotations.clone();
        column.acls = self.acls.clone();
        column.dynacls = self.acl_bindings.clone();
        Ok(column)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyDoc {
    pub unique_columns: Option<Vec<String>>,
    pub names: Vec<ConstraintName>,
    pub comment: Option<String>,
    pub annotations: Annotations,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnRef {
    #[serde(default)]
    pub schema_name: Option<String>,
    #[serde(default)]
    pub table_name: Option<String>,
    pub column_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForeignKeyDoc {
    pub foreign_key_columns: Option<Vec<ColumnRef>>,
    pub referenced_columns: Option<Vec<ColumnRef>>,
    pub names: Vec<ConstraintName>,
    pub on_delete: Option<RefAction>,
    pub on_update: Option<RefAction>,
    pub comment: Option<String>,
    pub annotations: Annotations,
    pub acls: Acls,
    pub acl_bindings: Dynacls,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TableDoc {
    pub table_name: Option<String>,
    pub schema_name: Option<String>,
    pub kind: Option<String>,
    pub comment: Option<String>,
    pub column_definitions: Vec<ColumnDoc>,
    pub keys: Vec<KeyDoc>,
    pub foreign_keys: Vec<ForeignKeyDoc>,
    pub annotations: Annotations,
    pub acls: Acls,
    pub acl_bindings: Dynacls,
}

impl TableDoc {
    /// Build the table and its keys. Foreign keys need the model.
    pub fn build(&self, schema: &str, config: &CatalogConfig) -> Result<Table> {
        let name = required(&self.table_name, "Table", "table_name")?;
        enforce_identifier_length(name, "Table")?;
        if let Some(sname) = &self.schema_name {
            if sname != schema {
                return Err(Error::conflict(format!(
                    "Table document schema {sname} does not match {schema}"
                )));
            }
        }
        let kind = match &self.kind {
            Some(kind) => kind.parse()?,
            None => TableKind::Table,
        };
        self.acls.validate(AclKind::Table)?;
        self.acl_bindings.validate(AclKind::Table)?;

        let mut table = Table::new(schema, name, kind);
        table.comment = self.comment.clone();
        table.annotations = self.annotations.clone();
        table.acls = self.acls.clone();
        table.dynacls = self.acl_bindings.clone();

        let path = table.path();
        for (position, coldoc) in self.column_definitions.iter().enumerate() {
            table.add_column(coldoc.build(&path, position, config)?)?;
        }

        for keydoc in &self.keys {
            let names = required(&keydoc.unique_columns, "Key", "unique_columns")?;
            for cname in names {
                if !table.has_column(cname) {
                    return Err(Error::conflict(format!(
                        "Key column {cname} does not exist in table {path}"
                    )));
                }
            }
            for constraint in &keydoc.names {
                enforce_identifier_length(constraint.name(), "Key constraint")?;
            }
            let columns: ColumnSet = names.iter().cloned().collect();
            let unique = table
                .uniques
                .entry(columns.clone())
                .or_insert_with(|| crate::key::Unique::new(path.clone(), columns));
            unique.constraint_names.extend(keydoc.names.iter().cloned());
            unique.comment = keydoc.comment.clone().or(unique.comment.take());
            for (uri, value) in keydoc.annotations.iter() {
                unique.annotations.set(uri.clone(), value.clone());
            }
        }
        Ok(table)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaDoc {
    pub schema_name: Option<String>,
    pub comment: Option<String>,
    pub annotations: Annotations,
    pub acls: Acls,
    pub tables: BTreeMap<String, TableDoc>,
}

impl Model {
    /// Add a table from its document. Nothing changes on failure.
    pub fn apply_table_doc(&mut self, schema: &str, doc: &TableDoc, config: &CatalogConfig) -> Result<TablePath> {
        let mut staged = self.clone();
        let table = doc.build(schema, config)?;
        let path = table.path();
        staged.schema_mut(schema)?.add_table(table)?;
        for fkdoc in &doc.foreign_keys {
            staged.apply_foreign_key_doc(&path, fkdoc)?;
        }
        *self = staged;
        Ok(path)
    }

    fn apply_foreign_key_doc(&mut self, from: &TablePath, doc: &ForeignKeyDoc) -> Result<()> {
        let fk_cols = required(&doc.foreign_key_columns, "Foreign key", "foreign_key_columns")?;
        let pk_cols = required(&doc.referenced_columns, "Foreign key", "referenced_columns")?;
        if fk_cols.len() != pk_cols.len() || fk_cols.is_empty() {
            return Err(Error::bad_data(
                "Foreign key and referenced column lists must be non-empty and equal length",
            ));
        }

        let target_of = |r: &ColumnRef| {
            TablePath::new(
                r.schema_name.clone().unwrap_or_else(|| from.schema.clone()),
                r.table_name.clone().unwrap_or_else(|| from.table.clone()),
            )
        };
        let to_table = target_of(&pk_cols[0]);
        if pk_cols.iter().any(|r| target_of(r) != to_table) {
            return Err(Error::bad_data("Referenced columns must belong to one table"));
        }
        if fk_cols.iter().any(|r| target_of(r) != *from) {
            return Err(Error::bad_data("Foreign key columns must belong to the new table"));
        }
        for constraint in &doc.names {
            enforce_identifier_length(constraint.name(), "Foreign-key constraint")?;
        }
        doc.acls.validate(AclKind::KeyReference)?;
        doc.acl_bindings.validate(AclKind::KeyReference)?;

        let pairs = fk_cols
            .iter()
            .zip(pk_cols)
            .map(|(f, p)| (f.column_name.clone(), p.column_name.clone()))
            .collect();
        let reference = ReferenceMap::new(to_table, pairs)?;
        let id = self.add_reference(
            from,
            reference,
            None,
            doc.on_delete.unwrap_or_default(),
            doc.on_update.unwrap_or_default(),
        )?;
        let keyref = self.keyref_mut(&id)?;
        keyref.constraint_names.extend(doc.names.iter().cloned());
        keyref.comment = doc.comment.clone();
        keyref.annotations = doc.annotations.clone();
        keyref.acls = doc.acls.clone();
        keyref.dynacls = doc.acl_bindings.clone();
        Ok(())
    }

    /// Add a schema and its tables from a document. Nothing changes on failure.
    pub fn apply_schema_doc(&mut self, doc: &SchemaDoc, config: &CatalogConfig) -> Result<()> {
        let name = required(&doc.schema_name, "Schema", "schema_name")?;
        enforce_identifier_length(name, "Schema")?;
        doc.acls.validate(AclKind::Schema)?;

        let mut staged = self.clone();
        let mut schema = Schema::new(name);
        schema.comment = doc.comment.clone();
        schema.annotations = doc.annotations.clone();
        schema.acls = doc.acls.clone();
        staged.add_schema(schema)?;

        // tables first so intra-schema foreign keys resolve in any order
        let mut deferred = Vec::new();
        for (tname, tdoc) in &doc.tables {
            let mut tdoc = tdoc.clone();
            tdoc.table_name.get_or_insert_with(|| tname.clone());
            let fkeys = std::mem::take(&mut tdoc.foreign_keys);
            let path = staged.apply_table_doc(name, &tdoc, config)?;
            deferred.push((path, fkeys));
        }
        for (path, fkeys) in deferred {
            for fkdoc in &fkeys {
                staged.apply_foreign_key_doc(&path, fkdoc)?;
            }
        }
        *self = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> CatalogConfig {
        CatalogConfig::default()
    }

    #[test]
    fn test_column_doc_missing_fields() {
        let doc: ColumnDoc = serde_json::from_value(json!({"type": {"typename": "text"}})).unwrap();
        let err = doc.build(&TablePath::new("s", "t"), 0, &config()).unwrap_err();
        assert!(matches!(err, Error::BadData(_)));

        let doc: ColumnDoc = serde_json::from_value(json!({"name": "c"})).unwrap();
        assert!(matches!(
            doc.build(&TablePath::new("s", "t"), 0, &config()),
            Err(Error::BadData(_))
        ));
    }

    #[test]
    fn test_column_doc_unsupported_type() {
        let doc: ColumnDoc =
            serde_json::from_value(json!({"name": "c", "type": {"typename": "tsvector"}})).unwrap();
        assert!(matches!(
            doc.build(&TablePath::new("s", "t"), 0, &config()),
            Err(Error::ConflictData(_))
        ));
    }

    #[test]
    fn test_column_doc_bad_default() {
        let doc: ColumnDoc = serde_json::from_value(
            json!({"name": "c", "type": {"typename": "int4"}, "default": "x"}),
        )
        .unwrap();
        assert!(matches!(
            doc.build(&TablePath::new("s", "t"), 0, &config()),
            Err(Error::BadData(_))
        ));
    }

    #[test]
    fn test_long_identifier_rejected() {
        let doc: ColumnDoc = serde_json::from_value(
            json!({"name": "c".repeat(64), "type": {"typename": "text"}}),
        )
        .unwrap();
        assert!(matches!(
            doc.build(&TablePath::new("s", "t"), 0, &config()),
            Err(Error::BadData(_))
        ));
    }

    #[test]
    fn test_schema_doc_with_foreign_keys() {
        let doc: SchemaDoc = serde_json::from_value(json!({
            "schema_name": "lab",
            "tables": {
                "people": {
                    "column_definitions": [
                        {"name": "id", "type": {"typename": "serial4"}, "nullok": false},
                        {"name": "dept_id", "type": {"typename": "int4"}}
                    ],
                    "keys": [{"unique_columns": ["id"]}],
                    "foreign_keys": [{
                        "foreign_key_columns": [{"column_name": "dept_id"}],
                        "referenced_columns": [{"table_name": "departments", "column_name": "id"}],
                        "on_delete": "CASCADE"
                    }]
                },
                "departments": {
                    "column_definitions": [{"name": "id", "type": {"typename": "int4"}}],
                    "keys": [{"unique_columns": ["id"], "names": [["lab", "departments_pkey"]]}]
                }
            }
        }))
        .unwrap();

        let mut model = Model::new("_ermrest");
        model.apply_schema_doc(&doc, &config()).unwrap();
        let people = model.table("lab", "people").unwrap();
        let kr = people.references().next().unwrap();
        assert_eq!(kr.to_table(), &TablePath::new("lab", "departments"));
        assert_eq!(kr.on_delete, RefAction::Cascade);
    }

    #[test]
    fn test_failed_table_doc_leaves_model_untouched() {
        let mut model = Model::new("_ermrest");
        model.ensure_schema("s");
        let doc: TableDoc = serde_json::from_value(json!({
            "table_name": "t",
            "column_definitions": [{"name": "a", "type": {"typename": "int4"}}],
            "foreign_keys": [{
                "foreign_key_columns": [{"column_name": "a"}],
                "referenced_columns": [{"table_name": "missing", "column_name": "id"}]
            }]
        }))
        .unwrap();
        assert!(model.apply_table_doc("s", &doc, &config()).is_err());
        assert!(model.table("s", "t").is_err());
    }
}
