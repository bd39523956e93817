//! Policy-to-SQL compiler
//!
//! Turns rights decisions plus the effective dynamic bindings of a column
//! into SQL fragments for the statement builder. Nothing here touches the
//! backend; the output depends only on the model snapshot, the requester's
//! roles, the alias and the mode.

use relcat_common::Result;
use relcat_model::ident::sql_identifier;
use relcat_model::{Column, Dynacls, Right, Table};
use tracing::debug;

use crate::binding::compile_binding;
use crate::context::Decision;
use crate::evaluator::{RightsEngine, Target};

/// How a column fragment is used by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A value expression in the select list, redacted per row if needed.
    Projection,
    /// A boolean expression that holds when access to the row is denied.
    Predicate,
}

/// Compile access to `column` for `right`.
///
/// # Panics
///
/// When the requester is statically denied `right` on `column`. Callers
/// must exclude such columns before asking for a fragment.
pub fn compile_column(
    engine: &RightsEngine<'_>,
    column: &Column,
    alias: Option<&str>,
    mode: Mode,
    right: Right,
) -> Result<String> {
    let decision = engine.has_right(Target::Column(column), right);
    assert!(
        decision != Decision::Deny,
        "policy compiler invoked for {right} on denied column {}:{}",
        column.table,
        column.name
    );

    match (decision, mode) {
        (Decision::Allow, Mode::Projection) => Ok(column.sql_name(alias)),
        (Decision::Allow, Mode::Predicate) => Ok("True".to_string()),
        (_, Mode::Projection) => {
            if !engine.dynauthz_restricted(column, right) {
                return Ok(column.sql_name(alias));
            }
            let clauses = column_clauses(engine, column, alias, right)?;
            let null = format!("NULL::{}", column.ctype().sql(true));
            if clauses.is_empty() {
                return Ok(null);
            }
            debug!(column = %column.name, clauses = clauses.len(), "redacting column per row");
            Ok(format!(
                "CASE WHEN {} THEN {} ELSE {null} END",
                clauses.join(" OR "),
                column.sql_name(alias)
            ))
        }
        (_, Mode::Predicate) => {
            let clauses = column_clauses(engine, column, alias, right)?;
            if clauses.is_empty() {
                return Ok("True".to_string());
            }
            let denied: Vec<String> = clauses
                .iter()
                .map(|c| format!("COALESCE(NOT {c}, True)"))
                .collect();
            Ok(format!("({})", denied.join(" AND ")))
        }
    }
}

/// `compile_column` in projection mode, named after the column.
pub fn select_item(engine: &RightsEngine<'_>, column: &Column, alias: Option<&str>, right: Right) -> Result<String> {
    let expr = compile_column(engine, column, alias, Mode::Projection, right)?;
    Ok(format!("{expr} AS {}", sql_identifier(&column.name)))
}

/// Row filter for `table`: true for rows the requester may access.
pub fn compile_table(engine: &RightsEngine<'_>, table: &Table, alias: Option<&str>, right: Right) -> Result<String> {
    match engine.has_right(Target::Table(table), right) {
        Decision::Allow => Ok("True".to_string()),
        Decision::Deny => Ok("False".to_string()),
        Decision::Indeterminate => {
            let clauses = granting_clauses(engine, table, &table.dynacls, alias, right)?;
            if clauses.is_empty() {
                return Ok("False".to_string());
            }
            Ok(format!("({})", clauses.join(" OR ")))
        }
    }
}

/// Compiled conditions of the column's effective bindings for `right`.
fn column_clauses(engine: &RightsEngine<'_>, column: &Column, alias: Option<&str>, right: Right) -> Result<Vec<String>> {
    let Some(table) = engine.table_of(&column.table) else {
        return Ok(Vec::new());
    };
    let effective = table.dynacls.overlay(&column.dynacls);
    granting_clauses(engine, table, &effective, alias, right)
}

fn granting_clauses(
    engine: &RightsEngine<'_>,
    table: &Table,
    dynacls: &Dynacls,
    alias: Option<&str>,
    right: Right,
) -> Result<Vec<String>> {
    let roles = engine.context().roles();
    dynacls
        .iter()
        .filter_map(|(_, binding)| binding.as_enabled())
        .filter(|b| b.grants(right) && b.in_scope(roles))
        .map(|b| compile_binding(engine, table, alias, b))
        .collect()
}
