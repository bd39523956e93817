//! Relational Catalog Core
//!
//! Ties the catalog model, introspector, rights engine and policy compiler
//! together behind one [`Catalog`] handle.
//!
//! - **Catalog Model** - schemas, tables, columns, keys and references
//! - **Introspector** - model snapshots from backend catalogs
//! - **Rights Engine** - static rights with dynamic (row-level) fallbacks
//! - **Policy Compiler** - row-level policy as SQL fragments

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub use relcat_common as common;
pub use relcat_introspect as introspect;
pub use relcat_model as model;
pub use relcat_policy as policy;

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};

use relcat_common::{CatalogConfig, Error, Result};
use relcat_introspect::{introspect_with_report, CatalogReader, IntrospectionReport};
use relcat_model::ident::sql_identifier;
use relcat_model::{CatalogCell, Model, Right, Table};
use relcat_policy::{
    compile_column, compile_table, render::render_model, select_item, EvaluationContext, Mode, RightsEngine, Target,
};

/// A catalog instance: configuration plus the published model snapshot.
pub struct Catalog {
    config: CatalogConfig,
    cell: CatalogCell,
    last_report: RwLock<Option<IntrospectionReport>>,
}

impl Catalog {
    /// Create a catalog with an empty model.
    #[must_use]
    pub fn new(config: CatalogConfig) -> Self {
        let model = Model::new(config.catalog.system_schema.clone());
        Self {
            config,
            cell: CatalogCell::new(model),
            last_report: RwLock::new(None),
        }
    }

    /// Create a catalog and introspect it from `reader`.
    ///
    /// # Errors
    /// Returns an error if introspection fails.
    pub fn open<R: CatalogReader + ?Sized>(config: CatalogConfig, reader: &R) -> Result<Self> {
        info!(system_schema = %config.catalog.system_schema, "Opening catalog");
        let catalog = Self::new(config);
        catalog.refresh(reader)?;
        Ok(catalog)
    }

    #[must_use]
    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Current model snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<Model> {
        self.cell.snapshot()
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.cell.version()
    }

    /// Report of the last successful introspection
    #[must_use]
    pub fn last_report(&self) -> Option<IntrospectionReport> {
        self.last_report.read().clone()
    }

    /// Re-introspect and publish a new snapshot. The previous snapshot stays
    /// published if anything fails.
    ///
    /// # Errors
    /// Returns the introspection error.
    pub fn refresh<R: CatalogReader + ?Sized>(&self, reader: &R) -> Result<Arc<Model>> {
        self.cell.refresh(|| {
            let (model, report) = introspect_with_report(reader, &self.config)?;
            *self.last_report.write() = Some(report);
            Ok(model)
        })
    }

    /// The model document as seen by `ctx`.
    #[must_use]
    pub fn render(&self, ctx: &EvaluationContext) -> Value {
        let model = self.snapshot();
        render_model(&RightsEngine::new(&model, ctx))
    }

    /// A `SELECT` over one table with row-level policy applied for `ctx`.
    ///
    /// Columns the requester cannot select are left out of the projection.
    ///
    /// # Errors
    /// `NotFound` if the table does not exist or is hidden from `ctx`,
    /// `ConflictModel` if the requester may not select from it at all.
    pub fn select_sql(&self, ctx: &EvaluationContext, schema: &str, table: &str) -> Result<String> {
        let model = self.snapshot();
        let engine = RightsEngine::new(&model, ctx);
        let table = selectable_table(&engine, schema, table)?;

        let items = table
            .columns()
            .filter(|c| !engine.has_right(Target::Column(c), Right::Select).is_deny())
            .map(|c| select_item(&engine, c, Some(ALIAS), Right::Select))
            .collect::<Result<Vec<_>>>()?;
        if items.is_empty() {
            return Err(Error::conflict(format!("No selectable columns in {}", table.path())));
        }
        let filter = compile_table(&engine, table, Some(ALIAS), Right::Select)?;
        debug!(table = %table.path(), columns = items.len(), "compiled select");

        Ok(format!(
            "SELECT {} FROM {} AS {} WHERE {filter}",
            items.join(", "),
            table.path().sql(),
            sql_identifier(ALIAS),
        ))
    }

    /// Projection and predicate fragments guarding `select` on one column.
    ///
    /// # Errors
    /// `NotFound` if the column does not exist or is hidden from `ctx`,
    /// `ConflictModel` if the requester may not select it.
    pub fn column_sql(
        &self,
        ctx: &EvaluationContext,
        schema: &str,
        table: &str,
        column: &str,
    ) -> Result<(String, String)> {
        let model = self.snapshot();
        let engine = RightsEngine::new(&model, ctx);
        let table = selectable_table(&engine, schema, table)?;

        let hidden = || Error::not_found(format!("Column {schema}:{}:{column}", table.name));
        let column = table.column(column).map_err(|_| hidden())?;
        if !engine.enumerable(Target::Column(column)) {
            return Err(hidden());
        }
        if engine.has_right(Target::Column(column), Right::Select).is_deny() {
            return Err(Error::conflict(format!("Select denied on column {}:{}", column.table, column.name)));
        }
        Ok((
            compile_column(&engine, column, Some(ALIAS), Mode::Projection, Right::Select)?,
            compile_column(&engine, column, Some(ALIAS), Mode::Predicate, Right::Select)?,
        ))
    }
}

const ALIAS: &str = "t0";

fn selectable_table<'m>(engine: &RightsEngine<'m>, schema: &str, table: &str) -> Result<&'m Table> {
    let hidden = || Error::not_found(format!("Table {schema}:{table}"));
    let table = engine.model().table(schema, table).map_err(|_| hidden())?;
    if !engine.enumerable(Target::Table(table)) {
        return Err(hidden());
    }
    if engine.has_right(Target::Table(table), Right::Select).is_deny() {
        return Err(Error::conflict(format!("Select denied on table {}", table.path())));
    }
    Ok(table)
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(CatalogConfig::default())
    }
}
