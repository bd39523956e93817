//! Model construction from backend catalogs

use relcat_common::{CatalogConfig, Error, Result};
use relcat_model::ddl::{value_map_sql, value_map_table, VALUE_MAP_TABLE};
use relcat_model::{
    AclKind, Acls, Annotations, Column, ColumnSet, ColumnType, ConstraintName, Dynacls, HasAcls, HasAnnotations,
    KeyRefId, KeyReference, Model, RefAction, ReferenceMap, Right, Schema, StorageKind, StoredTarget, Table,
    TableKind, TablePath, Unique,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::reader::{CatalogReader, ColumnsRow, ForeignKeyRow, UniqueRow};

/// Lossy recoveries made while building a model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntrospectionReport {
    pub skipped_annotations: usize,
    pub skipped_acls: usize,
    pub skipped_bindings: usize,
    /// `schema:table:column` of columns whose default did not parse.
    pub dropped_defaults: Vec<String>,
    pub value_map_created: bool,
}

/// Build a model snapshot from the backend behind `reader`.
pub fn introspect<R: CatalogReader + ?Sized>(reader: &R, config: &CatalogConfig) -> Result<Model> {
    introspect_with_report(reader, config).map(|(model, _)| model)
}

/// Like `introspect`, also returning what was dropped along the way.
///
/// Nothing is returned unless every step succeeds.
pub fn introspect_with_report<R: CatalogReader + ?Sized>(
    reader: &R,
    config: &CatalogConfig,
) -> Result<(Model, IntrospectionReport)> {
    let mut builder = Builder::new(config);

    builder.load_schemas(reader)?;
    builder.load_columns(reader)?;
    builder.load_tables(reader)?;
    builder.load_uniques(reader)?;
    builder.load_foreign_keys(reader)?;
    builder.load_storage(reader)?;
    builder.split_system_schema();
    builder.ensure_value_map(reader)?;

    let Builder { model, report, .. } = builder;
    info!(
        schemas = model.schemas().count(),
        skipped_annotations = report.skipped_annotations,
        dropped_defaults = report.dropped_defaults.len(),
        "introspected catalog model"
    );
    Ok((model, report))
}

struct Builder<'c> {
    config: &'c CatalogConfig,
    model: Model,
    report: IntrospectionReport,
}

impl<'c> Builder<'c> {
    fn new(config: &'c CatalogConfig) -> Self {
        Self {
            config,
            model: Model::new(config.catalog.system_schema.clone()),
            report: IntrospectionReport::default(),
        }
    }

    fn system(&self) -> &str {
        &self.config.catalog.system_schema
    }

    fn load_schemas<R: CatalogReader + ?Sized>(&mut self, reader: &R) -> Result<()> {
        let rows = reader.schemas()?;
        debug!(rows = rows.len(), "read schemas");
        let config = self.config;
        for row in rows.into_iter().filter(|r| !excluded(config, &r.schema_name)) {
            let schema = self.model.ensure_schema(&row.schema_name);
            schema.comment = row.comment;
        }
        Ok(())
    }

    fn table_entry(&mut self, schema: &str, name: &str, kind: &str) -> Result<&mut Table> {
        let kind: TableKind = kind.parse()?;
        Ok(self
            .model
            .ensure_schema(schema)
            .tables
            .entry(name.to_string())
            .or_insert_with(|| Table::new(schema, name, kind)))
    }

    fn load_columns<R: CatalogReader + ?Sized>(&mut self, reader: &R) -> Result<()> {
        let rows = reader.columns()?;
        debug!(rows = rows.len(), "read columns");
        let config = self.config;
        for row in rows.iter().filter(|r| !excluded(config, &r.table_schema)) {
            self.load_table_columns(row)?;
        }
        Ok(())
    }

    fn load_table_columns(&mut self, row: &ColumnsRow) -> Result<()> {
        let path = TablePath::new(&row.table_schema, &row.table_name);
        let mut columns = Vec::with_capacity(row.column_names.len());
        for (position, name) in row.column_names.iter().enumerate() {
            let data_type = row
                .data_types
                .get(position)
                .ok_or_else(|| Error::Inconsistent(format!("column {path}:{name} has no type")))?;
            let raw_default = nth(&row.default_values, position);
            let ctype = column_type(
                data_type,
                nth(&row.element_types, position),
                nth(&row.domain_bases, position),
                raw_default,
                self.config,
            )?;
            let default = match ctype.default_value(raw_default) {
                Ok(value) => value,
                Err(e) => {
                    warn!(table = %path, column = %name, error = %e, "dropping unparsable column default");
                    self.report.dropped_defaults.push(format!("{path}:{name}"));
                    None
                }
            };
            let not_null = row.not_nulls.get(position).copied().unwrap_or(false);
            columns.push(
                Column::new(path.clone(), name, position, ctype, default)
                    .with_nullok(!not_null)
                    .with_comment(nth(&row.comments, position).map(str::to_string)),
            );
        }

        let table = self.table_entry(&row.table_schema, &row.table_name, &row.table_kind)?;
        if row.table_comment.is_some() {
            table.comment.clone_from(&row.table_comment);
        }
        for column in columns {
            table.add_column(column)?;
        }
        Ok(())
    }

    fn load_tables<R: CatalogReader + ?Sized>(&mut self, reader: &R) -> Result<()> {
        let rows = reader.tables()?;
        debug!(rows = rows.len(), "read tables");
        let config = self.config;
        for row in rows.iter().filter(|r| !excluded(config, &r.table_schema)) {
            let table = self.table_entry(&row.table_schema, &row.table_name, &row.table_kind)?;
            if table.comment.is_none() {
                table.comment.clone_from(&row.comment);
            }
        }
        Ok(())
    }

    fn load_uniques<R: CatalogReader + ?Sized>(&mut self, reader: &R) -> Result<()> {
        let rows = reader.uniques()?;
        debug!(rows = rows.len(), "read unique constraints");
        let config = self.config;
        let mut ordered: Vec<(ConstraintName, TablePath, &UniqueRow)> = rows
            .iter()
            .filter(|r| !excluded(config, &r.table_schema))
            .map(|r| {
                (
                    ConstraintName::new(&r.constraint_schema, &r.constraint_name),
                    TablePath::new(&r.table_schema, &r.table_name),
                    r,
                )
            })
            .collect();
        ordered.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

        for (name, path, row) in ordered {
            let columns = self.resolve_columns(&path, &row.column_names, &name)?;
            let unique = self.model.add_unique(&path, columns, Some(name))?;
            if unique.comment.is_none() {
                unique.comment.clone_from(&row.comment);
            }
        }
        Ok(())
    }

    fn load_foreign_keys<R: CatalogReader + ?Sized>(&mut self, reader: &R) -> Result<()> {
        let rows = reader.foreign_keys()?;
        debug!(rows = rows.len(), "read foreign key constraints");
        let config = self.config;
        let mut ordered: Vec<(ConstraintName, TablePath, &ForeignKeyRow)> = rows
            .iter()
            .filter(|r| !excluded(config, &r.fk_table_schema) && !excluded(config, &r.uq_table_schema))
            .map(|r| {
                (
                    ConstraintName::new(&r.fk_constraint_schema, &r.fk_constraint_name),
                    TablePath::new(&r.fk_table_schema, &r.fk_table_name),
                    r,
                )
            })
            .collect();
        // names are only unique per table
        ordered.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

        for (name, _, row) in ordered {
            self.load_foreign_key(name, row)?;
        }
        Ok(())
    }

    fn load_foreign_key(&mut self, name: ConstraintName, row: &ForeignKeyRow) -> Result<()> {
        let from = TablePath::new(&row.fk_table_schema, &row.fk_table_name);
        let to = TablePath::new(&row.uq_table_schema, &row.uq_table_name);
        if row.fk_column_names.len() != row.uq_column_names.len() {
            return Err(Error::Inconsistent(format!(
                "foreign key {}:{} maps {} columns to {}",
                name.schema(),
                name.name(),
                row.fk_column_names.len(),
                row.uq_column_names.len()
            )));
        }
        self.resolve_columns(&from, &row.fk_column_names, &name)?;
        let to_columns = self.resolve_columns(&to, &row.uq_column_names, &name)?;
        if self.model.table_at(&to)?.unique(&to_columns).is_err() {
            return Err(Error::Inconsistent(format!(
                "foreign key {}:{} references {to}{to_columns}, which is not a key",
                name.schema(),
                name.name()
            )));
        }

        let pairs = row
            .fk_column_names
            .iter()
            .cloned()
            .zip(row.uq_column_names.iter().cloned())
            .collect();
        let reference =
            ReferenceMap::new(to, pairs).map_err(|e| Error::Inconsistent(format!("foreign key {}: {e}", name.name())))?;
        let on_delete = referential_action(&row.rc_delete_rule)?;
        let on_update = referential_action(&row.rc_update_rule)?;
        let id = self
            .model
            .add_reference(&from, reference, Some(name), on_delete, on_update)?;
        if row.comment.is_some() {
            let keyref = self.model.keyref_mut(&id)?;
            if keyref.comment.is_none() {
                keyref.comment.clone_from(&row.comment);
            }
        }
        Ok(())
    }

    /// Constraint columns come from the same snapshot as the column list,
    /// so anything unresolved is fatal.
    fn resolve_columns(&self, path: &TablePath, names: &[String], constraint: &ConstraintName) -> Result<ColumnSet> {
        let inconsistent = |what: String| {
            Error::Inconsistent(format!(
                "constraint {}:{} references {what}",
                constraint.schema(),
                constraint.name()
            ))
        };
        let table = self
            .model
            .table_at(path)
            .map_err(|_| inconsistent(format!("missing table {path}")))?;
        for name in names {
            if !table.has_column(name) {
                return Err(inconsistent(format!("missing column {path}:{name}")));
            }
        }
        Ok(names.iter().cloned().collect())
    }

    fn load_storage<R: CatalogReader + ?Sized>(&mut self, reader: &R) -> Result<()> {
        let system = self.system().to_string();
        for kind in StorageKind::ALL {
            if reader.table_exists(&system, &kind.annotation_table())? {
                for row in reader.annotations(kind)? {
                    match resolve(&mut self.model, kind, &row.target) {
                        Some(mut entity) => {
                            entity.annotations().set(row.annotation_uri, row.annotation_value);
                        }
                        None => {
                            debug!(%kind, uri = %row.annotation_uri, "skipping orphaned annotation");
                            self.report.skipped_annotations += 1;
                        }
                    }
                }
            }
            if !self.config.introspection.load_policy {
                continue;
            }
            if kind.has_acls() && reader.table_exists(&system, &kind.acl_table())? {
                for row in reader.acls(kind)? {
                    let applied = row.acl.parse::<Right>().ok().and_then(|right| {
                        let mut entity = resolve(&mut self.model, kind, &row.target)?;
                        let (acl_kind, acls) = entity.acls()?;
                        acls.set(acl_kind, right, row.members.clone()).ok()
                    });
                    if applied.is_none() {
                        debug!(%kind, acl = %row.acl, "skipping orphaned or invalid ACL");
                        self.report.skipped_acls += 1;
                    }
                }
            }
            if kind.has_dynacls() && reader.table_exists(&system, &kind.dynacl_table())? {
                for row in reader.dynacls(kind)? {
                    let applied = resolve(&mut self.model, kind, &row.target).and_then(|mut entity| {
                        let (acl_kind, dynacls) = entity.dynacls()?;
                        dynacls.set(acl_kind, row.binding_name.clone(), row.binding.clone()).ok()
                    });
                    if applied.is_none() {
                        debug!(%kind, binding = %row.binding_name, "skipping orphaned or invalid binding");
                        self.report.skipped_bindings += 1;
                    }
                }
            }
        }
        Ok(())
    }

    fn split_system_schema(&mut self) {
        let system = self.system().to_string();
        match self.model.take_schema(&system) {
            Some(schema) => self.model.set_system_schema(schema),
            None => warn!(schema = %system, "system schema not found, using an empty one"),
        }
    }

    fn ensure_value_map<R: CatalogReader + ?Sized>(&mut self, reader: &R) -> Result<()> {
        if self.model.system_schema().tables.contains_key(VALUE_MAP_TABLE)
            || !self.config.introspection.create_missing_value_map
        {
            return Ok(());
        }
        for sql in value_map_sql(&self.model, true) {
            reader.execute(&sql)?;
        }
        let table = value_map_table(self.system())?;
        self.model.system_schema_mut().add_table(table)?;
        self.report.value_map_created = true;
        info!(schema = %self.system(), "created missing value map");
        Ok(())
    }
}

fn excluded(config: &CatalogConfig, schema: &str) -> bool {
    config.catalog.excluded_schemas.iter().any(|s| s == schema)
}

fn nth(values: &[Option<String>], position: usize) -> Option<&str> {
    values.get(position).and_then(|v| v.as_deref())
}

fn column_type(
    data_type: &str,
    element_type: Option<&str>,
    domain_base: Option<&str>,
    default: Option<&str>,
    config: &CatalogConfig,
) -> Result<ColumnType> {
    if data_type == "ARRAY" {
        let element = element_type.ok_or_else(|| Error::Inconsistent("array column without element type".into()))?;
        return Ok(ColumnType::array_of(ColumnType::resolve(element, None, config, true)?));
    }
    if let Some(base) = domain_base {
        return Ok(ColumnType::Domain {
            name: data_type.to_string(),
            base: Box::new(ColumnType::resolve(base, default, config, true)?),
        });
    }
    ColumnType::resolve(data_type, default, config, true)
}

fn referential_action(rule: &str) -> Result<RefAction> {
    rule.parse()
        .map_err(|_| Error::Inconsistent(format!("unknown referential action {rule}")))
}

/// Mutable handle on an entity named by a storage row.
enum Entity<'m> {
    Catalog(&'m mut Model),
    Schema(&'m mut Schema),
    Table(&'m mut Table),
    Column(&'m mut Column),
    Key(&'m mut Unique),
    Keyref(&'m mut KeyReference),
}

impl Entity<'_> {
    fn annotations(&mut self) -> &mut Annotations {
        match self {
            Entity::Catalog(m) => m.annotations_mut(),
            Entity::Schema(s) => s.annotations_mut(),
            Entity::Table(t) => t.annotations_mut(),
            Entity::Column(c) => c.annotations_mut(),
            Entity::Key(u) => u.annotations_mut(),
            Entity::Keyref(k) => k.annotations_mut(),
        }
    }

    fn acls(&mut self) -> Option<(AclKind, &mut Acls)> {
        match self {
            Entity::Catalog(m) => Some((Model::KIND, m.acls_mut())),
            Entity::Schema(s) => Some((Schema::KIND, s.acls_mut())),
            Entity::Table(t) => Some((Table::KIND, t.acls_mut())),
            Entity::Column(c) => Some((Column::KIND, c.acls_mut())),
            Entity::Keyref(k) => Some((KeyReference::KIND, k.acls_mut())),
            Entity::Key(_) => None,
        }
    }

    fn dynacls(&mut self) -> Option<(AclKind, &mut Dynacls)> {
        match self {
            Entity::Table(t) => Some((Table::KIND, &mut t.dynacls)),
            Entity::Column(c) => Some((Column::KIND, &mut c.dynacls)),
            Entity::Keyref(k) => Some((KeyReference::KIND, &mut k.dynacls)),
            Entity::Catalog(_) | Entity::Schema(_) | Entity::Key(_) => None,
        }
    }
}

fn resolve<'m>(model: &'m mut Model, kind: StorageKind, target: &StoredTarget) -> Option<Entity<'m>> {
    let schema = target.schema_name.as_deref();
    let table = target.table_name.as_deref();
    match kind {
        StorageKind::Catalog => Some(Entity::Catalog(model)),
        StorageKind::Schema => model.schema_mut(schema?).ok().map(Entity::Schema),
        StorageKind::Table => model.table_mut(schema?, table?).ok().map(Entity::Table),
        StorageKind::Column => model
            .table_mut(schema?, table?)
            .ok()?
            .column_mut(target.column_name.as_deref()?)
            .ok()
            .map(Entity::Column),
        StorageKind::Key => {
            let columns: ColumnSet = target.column_names.as_ref()?.iter().cloned().collect();
            model
                .table_mut(schema?, table?)
                .ok()?
                .uniques
                .get_mut(&columns)
                .map(Entity::Key)
        }
        StorageKind::Keyref => {
            let from = TablePath::new(target.from_schema_name.as_deref()?, target.from_table_name.as_deref()?);
            let to = TablePath::new(target.to_schema_name.as_deref()?, target.to_table_name.as_deref()?);
            let from_columns = target.from_column_names.as_ref()?;
            let to_columns = target.to_column_names.as_ref()?;
            if from_columns.len() != to_columns.len() {
                return None;
            }
            let pairs = from_columns.iter().cloned().zip(to_columns.iter().cloned()).collect();
            let id = KeyRefId {
                from_table: from,
                reference: ReferenceMap::new(to, pairs).ok()?,
            };
            model.keyref_mut(&id).ok().map(Entity::Keyref)
        }
    }
}
