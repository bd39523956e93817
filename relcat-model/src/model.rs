//! Model root and schemas

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use relcat_common::{Error, Result};
use tracing::debug;

use crate::acl::{AclKind, Acls, HasAcls};
use crate::annotation::{Annotations, HasAnnotations};
use crate::column::Column;
use crate::key::{ColumnSet, ConstraintName, ForeignKey, KeyRefId, KeyReference, RefAction, ReferenceMap, Unique};
use crate::storage::{StorageKey, StorageKind};
use crate::table::{Table, TablePath};

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub name: String,
    pub comment: Option<String>,
    pub tables: BTreeMap<String, Table>,
    pub annotations: Annotations,
    pub acls: Acls,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            comment: None,
            tables: BTreeMap::new(),
            annotations: Annotations::new(),
            acls: Acls::new(),
        }
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::not_found(format!("table {name} in schema {}", self.name)))
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        let schema = &self.name;
        self.tables
            .get_mut(name)
            .ok_or_else(|| Error::not_found(format!("table {name} in schema {schema}")))
    }

    pub fn add_table(&mut self, table: Table) -> Result<()> {
        if self.tables.contains_key(&table.name) {
            return Err(Error::conflict(format!(
                "Table {} already exists in schema {}",
                table.name, self.name
            )));
        }
        self.tables.insert(table.name.clone(), table);
        Ok(())
    }

    pub fn storage_key(&self) -> StorageKey {
        StorageKey::new(StorageKind::Schema).text("schema_name", &self.name)
    }
}

impl HasAcls for Schema {
    const KIND: AclKind = AclKind::Schema;

    fn acls(&self) -> &Acls {
        &self.acls
    }

    fn acls_mut(&mut self) -> &mut Acls {
        &mut self.acls
    }
}

impl HasAnnotations for Schema {
    fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    fn annotations_mut(&mut self) -> &mut Annotations {
        &mut self.annotations
    }
}

static NEXT_STAMP: AtomicU64 = AtomicU64::new(1);

/// Identity of one model value. Every constructed or cloned model gets a
/// fresh stamp; stamps never take part in equality.
#[derive(Debug)]
struct Stamp(u64);

impl Stamp {
    fn next() -> Self {
        Self(NEXT_STAMP.fetch_add(1, Ordering::Relaxed))
    }
}

impl Clone for Stamp {
    fn clone(&self) -> Self {
        Self::next()
    }
}

impl PartialEq for Stamp {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

/// Root of the catalog entity graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    schemas: BTreeMap<String, Schema>,
    system_schema: Schema,
    pub annotations: Annotations,
    pub acls: Acls,
    stamp: Stamp,
}

impl Model {
    pub fn new(system_schema: impl Into<String>) -> Self {
        Self {
            schemas: BTreeMap::new(),
            system_schema: Schema::new(system_schema),
            annotations: Annotations::new(),
            acls: Acls::new(),
            stamp: Stamp::next(),
        }
    }

    /// Process-unique identity of this model value. Published snapshots
    /// always differ; in-place edits keep the stamp.
    pub fn stamp(&self) -> u64 {
        self.stamp.0
    }

    pub fn system_schema(&self) -> &Schema {
        &self.system_schema
    }

    pub fn system_schema_mut(&mut self) -> &mut Schema {
        &mut self.system_schema
    }

    pub fn set_system_schema(&mut self, schema: Schema) {
        self.system_schema = schema;
    }

    pub fn system_schema_name(&self) -> &str {
        &self.system_schema.name
    }

    pub fn schemas(&self) -> impl Iterator<Item = &Schema> {
        self.schemas.values()
    }

    pub fn schemas_mut(&mut self) -> impl Iterator<Item = &mut Schema> {
        self.schemas.values_mut()
    }

    pub fn has_schema(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn schema(&self, name: &str) -> Result<&Schema> {
        self.schemas
            .get(name)
            .ok_or_else(|| Error::not_found(format!("schema {name}")))
    }

    pub fn schema_mut(&mut self, name: &str) -> Result<&mut Schema> {
        self.schemas
            .get_mut(name)
            .ok_or_else(|| Error::not_found(format!("schema {name}")))
    }

    pub fn add_schema(&mut self, schema: Schema) -> Result<()> {
        if schema.name == self.system_schema.name {
            return Err(Error::conflict(format!(
                "Requested schema {} is a reserved schema name",
                schema.name
            )));
        }
        if self.schemas.contains_key(&schema.name) {
            return Err(Error::conflict(format!(
                "Requested schema {} already exists",
                schema.name
            )));
        }
        self.schemas.insert(schema.name.clone(), schema);
        Ok(())
    }

    /// Materialize an empty schema unless it exists.
    pub fn ensure_schema(&mut self, name: &str) -> &mut Schema {
        self.schemas
            .entry(name.to_string())
            .or_insert_with(|| Schema::new(name))
    }

    /// Detach a schema from the user-visible mapping.
    pub fn take_schema(&mut self, name: &str) -> Option<Schema> {
        self.schemas.remove(name)
    }

    pub fn table(&self, schema: &str, table: &str) -> Result<&Table> {
        self.schema(schema)?.table(table)
    }

    pub fn table_mut(&mut self, schema: &str, table: &str) -> Result<&mut Table> {
        self.schema_mut(schema)?.table_mut(table)
    }

    pub fn table_at(&self, path: &TablePath) -> Result<&Table> {
        self.table(&path.schema, &path.table)
    }

    pub fn table_at_mut(&mut self, path: &TablePath) -> Result<&mut Table> {
        self.table_mut(&path.schema, &path.table)
    }

    pub fn column(&self, schema: &str, table: &str, column: &str) -> Result<&Column> {
        self.table(schema, table)?.column(column)
    }

    /// Find a table by unqualified name if it is unambiguous.
    pub fn lookup_table(&self, name: &str) -> Result<&Table> {
        let mut found = self.schemas.values().filter_map(|s| s.tables.get(name));
        match (found.next(), found.next()) {
            (Some(table), None) => Ok(table),
            (None, _) => Err(Error::not_found(format!("table {name}"))),
            (Some(_), Some(_)) => Err(Error::conflict(format!("Table name {name} is ambiguous"))),
        }
    }

    pub fn keyref(&self, id: &KeyRefId) -> Result<&KeyReference> {
        self.table_at(&id.from_table)?
            .fkeys
            .get(&id.from_columns())
            .and_then(|fk| fk.references.get(&id.reference))
            .ok_or_else(|| Error::not_found(format!("foreign key reference {id}")))
    }

    pub fn keyref_mut(&mut self, id: &KeyRefId) -> Result<&mut KeyReference> {
        self.table_at_mut(&id.from_table)?
            .fkeys
            .get_mut(&id.from_columns())
            .and_then(|fk| fk.references.get_mut(&id.reference))
            .ok_or_else(|| Error::not_found(format!("foreign key reference {id}")))
    }

    /// Unique key a reference binds to.
    pub fn referenced_key(&self, keyref: &KeyReference) -> Result<&Unique> {
        self.table_at(keyref.to_table())?.unique(&keyref.to_columns())
    }

    /// Key references pointing into `table` from anywhere in the model.
    pub fn inbound_references(&self, table: &TablePath) -> Result<Vec<&KeyReference>> {
        let target = self.table_at(table)?;
        target
            .uniques
            .values()
            .flat_map(|u| u.referenced_by.iter())
            .map(|id| self.keyref(id))
            .collect()
    }

    /// Create the unique key over `columns`, or record `constraint` as an alias.
    pub fn add_unique(
        &mut self,
        table: &TablePath,
        columns: ColumnSet,
        constraint: Option<ConstraintName>,
    ) -> Result<&mut Unique> {
        let t = self.table_at_mut(table)?;
        for name in columns.iter() {
            t.column(name)?;
        }
        let unique = t
            .uniques
            .entry(columns.clone())
            .or_insert_with(|| Unique::new(table.clone(), columns));
        if let Some(constraint) = constraint {
            unique.constraint_names.insert(constraint);
        }
        Ok(unique)
    }

    /// Create the reference for `reference`, or merge `constraint` into it.
    ///
    /// The referenced column set must already be a unique key.
    pub fn add_reference(
        &mut self,
        from: &TablePath,
        reference: ReferenceMap,
        constraint: Option<ConstraintName>,
        on_delete: RefAction,
        on_update: RefAction,
    ) -> Result<KeyRefId> {
        let to_columns = reference.to_columns();
        {
            let target = self.table_at(&reference.to_table)?;
            target.unique(&to_columns).map_err(|_| {
                Error::conflict(format!(
                    "Referenced columns {to_columns} of {} are not a key",
                    reference.to_table
                ))
            })?;
        }

        let from_columns = reference.from_columns();
        let source = self.table_at_mut(from)?;
        for name in from_columns.iter() {
            source.column(name)?;
        }
        let fk = source
            .fkeys
            .entry(from_columns.clone())
            .or_insert_with(|| ForeignKey::new(from.clone(), from_columns));
        let keyref = fk.references.entry(reference.clone()).or_insert_with(|| {
            let mut kr = KeyReference::new(from.clone(), reference.clone());
            kr.on_delete = on_delete;
            kr.on_update = on_update;
            kr
        });
        if let Some(constraint) = constraint {
            keyref.constraint_names.insert(constraint);
        }
        let id = keyref.id();

        if let Some(unique) = self
            .table_at_mut(&reference.to_table)?
            .uniques
            .get_mut(&to_columns)
        {
            unique.referenced_by.insert(id.clone());
        }
        Ok(id)
    }

    /// Remove one key reference, returning its purge statements.
    pub fn drop_reference(&mut self, id: &KeyRefId) -> Result<Vec<String>> {
        let system = self.system_schema.name.clone();
        let from_columns = id.from_columns();
        let table = self.table_at_mut(&id.from_table)?;
        let fk = table
            .fkeys
            .get_mut(&from_columns)
            .ok_or_else(|| Error::not_found(format!("foreign key reference {id}")))?;
        let mut keyref = fk
            .references
            .remove(&id.reference)
            .ok_or_else(|| Error::not_found(format!("foreign key reference {id}")))?;
        if fk.references.is_empty() {
            table.fkeys.remove(&from_columns);
        }
        let sql = keyref.pre_delete(&system);

        if let Ok(target) = self.table_at_mut(&id.reference.to_table) {
            if let Some(unique) = target.uniques.get_mut(&id.reference.to_columns()) {
                unique.referenced_by.remove(id);
            }
        }
        debug!(keyref = %id, "dropped key reference");
        Ok(sql)
    }

    /// Remove a unique key and every reference bound to it.
    pub fn drop_unique(&mut self, table: &TablePath, columns: &ColumnSet) -> Result<Vec<String>> {
        let inbound: Vec<KeyRefId> = self
            .table_at(table)?
            .unique(columns)?
            .referenced_by
            .iter()
            .cloned()
            .collect();
        let mut sql = Vec::new();
        for id in &inbound {
            sql.extend(self.drop_reference(id)?);
        }
        let system = self.system_schema.name.clone();
        let t = self.table_at_mut(table)?;
        if let Some(mut unique) = t.uniques.remove(columns) {
            sql.extend(unique.pre_delete(&system));
        }
        Ok(sql)
    }

    /// Remove a column with the keys and references that cover it.
    pub fn drop_column(&mut self, schema: &str, table: &str, column: &str) -> Result<Vec<String>> {
        let path = TablePath::new(schema, table);
        let t = self.table_at(&path)?;
        t.column(column)?;

        let uniques: Vec<ColumnSet> = t
            .uniques
            .keys()
            .filter(|cols| cols.contains(column))
            .cloned()
            .collect();
        let outbound: Vec<KeyRefId> = t
            .fkeys
            .iter()
            .filter(|(cols, _)| cols.contains(column))
            .flat_map(|(_, fk)| fk.references.values().map(KeyReference::id))
            .collect();

        let mut sql = Vec::new();
        for id in &outbound {
            sql.extend(self.drop_reference(id)?);
        }
        for cols in &uniques {
            sql.extend(self.drop_unique(&path, cols)?);
        }

        let system = self.system_schema.name.clone();
        let mut removed = self.table_at_mut(&path)?.take_column(column)?;
        sql.extend(removed.pre_delete(&system));
        debug!(table = %path, column, "dropped column");
        Ok(sql)
    }

    /// Remove a table, its keys, and references into or out of it.
    pub fn drop_table(&mut self, schema: &str, table: &str) -> Result<Vec<String>> {
        let path = TablePath::new(schema, table);
        let t = self.table_at(&path)?;
        let mut related: BTreeSet<KeyRefId> = t.references().map(KeyReference::id).collect();
        related.extend(t.uniques.values().flat_map(|u| u.referenced_by.iter().cloned()));

        let mut sql = Vec::new();
        for id in &related {
            sql.extend(self.drop_reference(id)?);
        }

        let system = self.system_schema.name.clone();
        let mut removed = self
            .schema_mut(schema)?
            .tables
            .remove(table)
            .ok_or_else(|| Error::not_found(format!("table {path}")))?;
        sql.extend(removed.pre_delete(&system));
        debug!(table = %path, "dropped table");
        Ok(sql)
    }

    /// Remove a schema and all of its tables.
    pub fn drop_schema(&mut self, schema: &str) -> Result<Vec<String>> {
        let names: Vec<String> = self.schema(schema)?.tables.keys().cloned().collect();
        let mut sql = Vec::new();
        for name in names {
            sql.extend(self.drop_table(schema, &name)?);
        }
        if let Some(mut removed) = self.schemas.remove(schema) {
            removed.annotations.clear();
            removed.acls.clear();
            sql.extend(removed.storage_key().purge_sql(&self.system_schema.name));
        }
        debug!(schema, "dropped schema");
        Ok(sql)
    }

    pub fn storage_key(&self) -> StorageKey {
        StorageKey::new(StorageKind::Catalog)
    }
}

impl HasAcls for Model {
    const KIND: AclKind = AclKind::Catalog;

    fn acls(&self) -> &Acls {
        &self.acls
    }

    fn acls_mut(&mut self) -> &mut Acls {
        &mut self.acls
    }
}

impl HasAnnotations for Model {
    fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    fn annotations_mut(&mut self) -> &mut Annotations {
        &mut self.annotations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TableKind;
    use crate::types::ColumnType;

    fn sample() -> Model {
        let mut model = Model::new("_ermrest");
        let schema = model.ensure_schema("s");
        let mut depts = Table::new("s", "departments", TableKind::Table);
        depts
            .add_column(Column::new(depts.path(), "id", 0, ColumnType::scalar("int4"), None))
            .unwrap();
        let mut people = Table::new("s", "people", TableKind::Table);
        let p = people.path();
        people
            .add_column(Column::new(p.clone(), "id", 0, ColumnType::scalar("int4"), None))
            .unwrap();
        people
            .add_column(Column::new(p, "dept_id", 1, ColumnType::scalar("int4"), None))
            .unwrap();
        schema.add_table(depts).unwrap();
        schema.add_table(people).unwrap();

        let d = TablePath::new("s", "departments");
        model
            .add_unique(&d, ["id"].into_iter().collect(), Some(ConstraintName::new("s", "departments_pkey")))
            .unwrap();
        let map = ReferenceMap::new(d, vec![("dept_id".into(), "id".into())]).unwrap();
        model
            .add_reference(
                &TablePath::new("s", "people"),
                map,
                Some(ConstraintName::new("s", "fk_a")),
                RefAction::Cascade,
                RefAction::NoAction,
            )
            .unwrap();
        model
    }

    #[test]
    fn test_lookups_not_found() {
        let model = sample();
        assert!(model.table("s", "people").is_ok());
        assert!(matches!(model.schema("x"), Err(Error::NotFound(_))));
        assert!(matches!(model.table("s", "x"), Err(Error::NotFound(_))));
        assert!(matches!(model.column("s", "people", "x"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_lookup_table_unqualified() {
        let mut model = sample();
        assert_eq!(model.lookup_table("people").unwrap().schema, "s");
        model
            .ensure_schema("t")
            .add_table(Table::new("t", "people", TableKind::Table))
            .unwrap();
        assert!(matches!(model.lookup_table("people"), Err(Error::ConflictModel(_))));
        assert!(matches!(model.lookup_table("nobody"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_reserved_schema_rejected() {
        let mut model = sample();
        assert!(model.add_schema(Schema::new("_ermrest")).is_err());
        assert!(model.add_schema(Schema::new("s")).is_err());
    }

    #[test]
    fn test_reference_merges_aliases() {
        let mut model = sample();
        let map = ReferenceMap::new(
            TablePath::new("s", "departments"),
            vec![("dept_id".into(), "id".into())],
        )
        .unwrap();
        let id = model
            .add_reference(
                &TablePath::new("s", "people"),
                map,
                Some(ConstraintName::new("s", "fk_a_legacy")),
                RefAction::NoAction,
                RefAction::NoAction,
            )
            .unwrap();
        let kr = model.keyref(&id).unwrap();
        assert_eq!(kr.constraint_names.len(), 2);
        assert_eq!(kr.on_delete, RefAction::Cascade);
        assert_eq!(model.inbound_references(&TablePath::new("s", "departments")).unwrap().len(), 1);
    }

    #[test]
    fn test_reference_requires_key() {
        let mut model = sample();
        let map = ReferenceMap::new(
            TablePath::new("s", "people"),
            vec![("dept_id".into(), "dept_id".into())],
        )
        .unwrap();
        let err = model
            .add_reference(&TablePath::new("s", "people"), map, None, RefAction::NoAction, RefAction::NoAction)
            .unwrap_err();
        assert!(matches!(err, Error::ConflictModel(_)));
    }

    #[test]
    fn test_drop_column_removes_dependents() {
        let mut model = sample();
        let sql = model.drop_column("s", "people", "dept_id").unwrap();
        let people = model.table("s", "people").unwrap();
        assert!(people.fkeys.is_empty());
        assert!(!people.has_column("dept_id"));
        let depts = model.table("s", "departments").unwrap();
        assert!(depts.uniques.values().all(|u| u.referenced_by.is_empty()));
        assert!(sql.iter().any(|s| s.contains("model_keyref_annotation")));
        assert!(sql.iter().any(|s| s.contains("model_column_acl")));
    }

    #[test]
    fn test_drop_referenced_table_cleans_inbound() {
        let mut model = sample();
        model.drop_table("s", "departments").unwrap();
        assert!(model.table("s", "people").unwrap().fkeys.is_empty());
        model.drop_schema("s").unwrap();
        assert!(!model.has_schema("s"));
    }

    #[test]
    fn test_clone_gets_new_stamp() {
        let model = sample();
        let copy = model.clone();
        assert_ne!(model.stamp(), copy.stamp());
        assert_eq!(model, copy);
    }
}
