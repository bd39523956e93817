//! Compilation of dynamic ACL bindings into SQL conditions

use relcat_common::{Error, Result};
use relcat_model::ident::{sql_identifier, sql_literal};
use relcat_model::{Binding, Column, KeyReference, PathElement, ProjectionType, Table};
use serde_json::Value;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

use crate::context::EvaluationContext;
use crate::evaluator::RightsEngine;

/// Placeholder for the row source in raw clauses.
pub const ALIAS_PLACEHOLDER: &str = "{alias}";

/// Reference to the governed row source: the quoted alias, or the table's
/// qualified name when unaliased.
pub fn row_reference(table: &Table, alias: Option<&str>) -> String {
    match alias.filter(|a| !a.is_empty()) {
        Some(alias) => sql_identifier(alias),
        None => table.path().sql(),
    }
}

/// Compile `binding` for rows of `table` into a parenthesized condition
/// that holds when the binding authorizes the row.
pub fn compile_binding(engine: &RightsEngine<'_>, table: &Table, alias: Option<&str>, binding: &Binding) -> Result<String> {
    let outer = row_reference(table, alias);
    if let Some(clause) = &binding.clause {
        let sql = clause.replace(ALIAS_PLACEHOLDER, &outer);
        validate_condition(&sql)?;
        return Ok(format!("({sql})"));
    }
    let projection = binding
        .projection
        .as_ref()
        .ok_or_else(|| Error::bad_data("ACL binding has neither projection nor clause"))?;
    let (steps, column) = projection.split()?;

    let mut path = PathCompiler::new(engine, table, outer);
    for step in steps {
        path.step(step)?;
    }
    let target = path.column(column)?;
    let colref = format!("{}.{}", path.current_ref, sql_identifier(&target.name));
    let condition = match binding.projection_type {
        ProjectionType::Nonnull => format!("{colref} IS NOT NULL"),
        ProjectionType::Acl => acl_condition(&colref, target, engine.context()),
    };
    Ok(path.finish(condition))
}

fn acl_condition(colref: &str, column: &Column, ctx: &EvaluationContext) -> String {
    if column.ctype().is_array() {
        format!("{colref} && {}", ctx.roles_sql())
    } else {
        format!("{colref} = ANY({})", ctx.roles_sql())
    }
}

/// Reject clause text that is not exactly one SQL expression.
pub fn validate_condition(sql: &str) -> Result<()> {
    let dialect = PostgreSqlDialect {};
    let mut parser = Parser::new(&dialect)
        .try_with_sql(sql)
        .map_err(|e| Error::conflict(format!("Invalid ACL binding clause {sql:?}: {e}")))?;
    parser
        .parse_expr()
        .map_err(|e| Error::conflict(format!("Invalid ACL binding clause {sql:?}: {e}")))?;
    if parser.peek_token().token != Token::EOF {
        return Err(Error::conflict(format!(
            "Invalid ACL binding clause {sql:?}: trailing input"
        )));
    }
    Ok(())
}

/// Walks a projection path, joining one aliased table per traversal.
struct PathCompiler<'e, 'a> {
    engine: &'e RightsEngine<'a>,
    current: &'e Table,
    current_ref: String,
    from: Vec<String>,
    conditions: Vec<String>,
}

impl<'e, 'a> PathCompiler<'e, 'a> {
    fn new(engine: &'e RightsEngine<'a>, table: &'e Table, outer: String) -> Self {
        Self {
            engine,
            current: table,
            current_ref: outer,
            from: Vec::new(),
            conditions: Vec::new(),
        }
    }

    fn next_alias(&self) -> String {
        sql_identifier(&format!("_dyn{}", self.from.len() + 1))
    }

    fn step(&mut self, element: &PathElement) -> Result<()> {
        match element {
            PathElement::Outbound { outbound: [schema, name] } => {
                let keyref = self
                    .current
                    .reference_by_constraint(schema, name)
                    .ok_or_else(|| self.unknown_constraint(schema, name, "outbound"))?;
                self.join(keyref, true)
            }
            PathElement::Inbound { inbound: [schema, name] } => {
                let model = self.engine.model();
                let keyref = model
                    .inbound_references(&self.current.path())
                    .map_err(|e| Error::conflict(e.to_string()))?
                    .into_iter()
                    .find(|kr| {
                        kr.constraint_names
                            .iter()
                            .any(|c| c.schema() == schema && c.name() == name)
                    })
                    .ok_or_else(|| self.unknown_constraint(schema, name, "inbound"))?;
                self.join(keyref, false)
            }
            PathElement::Filter { filter, operand, operator } => {
                let column = self.column(filter)?;
                let colref = format!("{}.{}", self.current_ref, sql_identifier(&column.name));
                let condition = filter_condition(&colref, column, operand, operator.as_deref())?;
                self.conditions.push(condition);
                Ok(())
            }
            PathElement::Column(name) => Err(Error::bad_data(format!(
                "Column {name} may only appear at the end of a projection path"
            ))),
        }
    }

    fn join(&mut self, keyref: &'e KeyReference, outbound: bool) -> Result<()> {
        let next_path = if outbound { keyref.to_table() } else { &keyref.from_table };
        let next = self
            .engine
            .table_of(next_path)
            .ok_or_else(|| Error::conflict(format!("Projection path table {next_path} does not exist")))?;
        let alias = self.next_alias();
        self.from.push(format!("{} AS {alias}", next.path().sql()));
        for (from_col, to_col) in keyref.reference.pairs() {
            let (here, there) = if outbound { (from_col, to_col) } else { (to_col, from_col) };
            self.conditions.push(format!(
                "{}.{} = {alias}.{}",
                self.current_ref,
                sql_identifier(here),
                sql_identifier(there)
            ));
        }
        self.current = next;
        self.current_ref = alias;
        Ok(())
    }

    fn column(&self, name: &str) -> Result<&'e Column> {
        self.current.column(name).map_err(|_| {
            Error::conflict(format!(
                "Projection column {name} does not exist in {}",
                self.current.path()
            ))
        })
    }

    fn unknown_constraint(&self, schema: &str, name: &str, direction: &str) -> Error {
        Error::conflict(format!(
            "No {direction} foreign key {schema}:{name} from {}",
            self.current.path()
        ))
    }

    fn finish(mut self, condition: String) -> String {
        self.conditions.push(condition);
        let conditions = self.conditions.join(" AND ");
        if self.from.is_empty() {
            format!("({conditions})")
        } else {
            format!(
                "(EXISTS (SELECT 1 FROM {} WHERE {conditions}))",
                self.from.join(", ")
            )
        }
    }
}

fn filter_condition(colref: &str, column: &Column, operand: &Value, operator: Option<&str>) -> Result<String> {
    let comparison = match operator.unwrap_or("=") {
        "=" => "=",
        "::null::" => return Ok(format!("{colref} IS NULL")),
        "::lt::" => "<",
        "::leq::" => "<=",
        "::gt::" => ">",
        "::geq::" => ">=",
        "::regexp::" | "::ciregexp::" => {
            let pattern = operand
                .as_str()
                .ok_or_else(|| Error::bad_data("Regular expression filter operand must be a string"))?;
            let op = if operator == Some("::regexp::") { "~" } else { "~*" };
            return Ok(format!("{colref}::text {op} {}", sql_literal(pattern)));
        }
        other => return Err(Error::bad_data(format!("Unsupported filter operator {other}"))),
    };
    let literal = column.ctype().sql_literal(operand)?;
    Ok(format!("{colref} {comparison} {literal}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relcat_model::{
        AclKind, ColumnType, ConstraintName, Model, PathElement, Projection, RefAction, ReferenceMap, Right, TableKind,
        TablePath,
    };
    use serde_json::json;

    fn sample() -> Model {
        let mut model = Model::new("_ermrest");
        model.acls.set(AclKind::Catalog, Right::Enumerate, vec!["*".into()]).unwrap();
        let schema = model.ensure_schema("s");
        let mut people = Table::new("s", "people", TableKind::Table);
        let p = people.path();
        people.add_column(Column::new(p.clone(), "id", 0, ColumnType::scalar("int4"), None)).unwrap();
        people.add_column(Column::new(p.clone(), "owner", 1, ColumnType::text(), None)).unwrap();
        people.add_column(Column::new(p.clone(), "dept_id", 2, ColumnType::scalar("int4"), None)).unwrap();
        people
            .add_column(Column::new(p, "readers", 3, ColumnType::array_of(ColumnType::text()), None))
            .unwrap();
        let mut depts = Table::new("s", "departments", TableKind::Table);
        let d = depts.path();
        depts.add_column(Column::new(d.clone(), "id", 0, ColumnType::scalar("int4"), None)).unwrap();
        depts.add_column(Column::new(d.clone(), "manager", 1, ColumnType::text(), None)).unwrap();
        depts.add_column(Column::new(d, "open", 2, ColumnType::scalar("boolean"), None)).unwrap();
        schema.add_table(people).unwrap();
        schema.add_table(depts).unwrap();

        let d = TablePath::new("s", "departments");
        model.add_unique(&d, ["id"].into_iter().collect(), None).unwrap();
        let map = ReferenceMap::new(d, vec![("dept_id".into(), "id".into())]).unwrap();
        model
            .add_reference(
                &TablePath::new("s", "people"),
                map,
                Some(ConstraintName::new("s", "people_dept_fkey")),
                RefAction::NoAction,
                RefAction::NoAction,
            )
            .unwrap();
        model
    }

    fn compile(model: &Model, table: &str, alias: Option<&str>, binding: &Binding) -> Result<String> {
        let ctx = EvaluationContext::new(["bob", "alice"]);
        let engine = RightsEngine::new(model, &ctx);
        compile_binding(&engine, model.table("s", table).unwrap(), alias, binding)
    }

    #[test]
    fn test_clause_alias_substitution() {
        let model = sample();
        let b = Binding::clause(vec![Right::Select], "{alias}.\"owner\" = current_user");
        assert_eq!(
            compile(&model, "people", Some("t0"), &b).unwrap(),
            "(\"t0\".\"owner\" = current_user)"
        );
        assert_eq!(
            compile(&model, "people", None, &b).unwrap(),
            "(\"s\".\"people\".\"owner\" = current_user)"
        );
    }

    #[test]
    fn test_clause_rejects_bad_sql() {
        let model = sample();
        let b = Binding::clause(vec![Right::Select], "owner = ");
        assert!(matches!(compile(&model, "people", None, &b), Err(Error::ConflictModel(_))));
        let b = Binding::clause(vec![Right::Select], "true; DROP TABLE x");
        assert!(matches!(compile(&model, "people", None, &b), Err(Error::ConflictModel(_))));
    }

    #[test]
    fn test_direct_acl_projection() {
        let model = sample();
        let b = Binding::projection(vec![Right::Select], Projection::Column("owner".into()), ProjectionType::Acl);
        assert_eq!(
            compile(&model, "people", Some("t0"), &b).unwrap(),
            "(\"t0\".\"owner\" = ANY(ARRAY['alice', 'bob']::text[]))"
        );
        let b = Binding::projection(vec![Right::Select], Projection::Column("readers".into()), ProjectionType::Acl);
        assert_eq!(
            compile(&model, "people", Some("t0"), &b).unwrap(),
            "(\"t0\".\"readers\" && ARRAY['alice', 'bob']::text[])"
        );
    }

    #[test]
    fn test_outbound_path_projection() {
        let model = sample();
        let b = Binding::projection(
            vec![Right::Select],
            Projection::Path(vec![
                PathElement::Outbound { outbound: ["s".into(), "people_dept_fkey".into()] },
                PathElement::Filter { filter: "open".into(), operand: json!(true), operator: None },
                PathElement::Column("manager".into()),
            ]),
            ProjectionType::Nonnull,
        );
        assert_eq!(
            compile(&model, "people", Some("t0"), &b).unwrap(),
            "(EXISTS (SELECT 1 FROM \"s\".\"departments\" AS \"_dyn1\" WHERE \"t0\".\"dept_id\" = \"_dyn1\".\"id\" \
             AND \"_dyn1\".\"open\" = 'true'::boolean AND \"_dyn1\".\"manager\" IS NOT NULL))"
        );
    }

    #[test]
    fn test_inbound_path_projection() {
        let model = sample();
        let b = Binding::projection(
            vec![Right::Select],
            Projection::Path(vec![
                PathElement::Inbound { inbound: ["s".into(), "people_dept_fkey".into()] },
                PathElement::Column("owner".into()),
            ]),
            ProjectionType::Acl,
        );
        let sql = compile(&model, "departments", Some("d"), &b).unwrap();
        assert!(sql.starts_with("(EXISTS (SELECT 1 FROM \"s\".\"people\" AS \"_dyn1\" WHERE \"d\".\"id\" = \"_dyn1\".\"dept_id\""));
        assert!(sql.contains("\"_dyn1\".\"owner\" = ANY("));
    }

    #[test]
    fn test_wrong_side_constraint_is_conflict() {
        let model = sample();
        let b = Binding::projection(
            vec![Right::Select],
            Projection::Path(vec![
                PathElement::Inbound { inbound: ["s".into(), "people_dept_fkey".into()] },
                PathElement::Column("owner".into()),
            ]),
            ProjectionType::Acl,
        );
        assert!(matches!(compile(&model, "people", None, &b), Err(Error::ConflictModel(_))));

        let b = Binding::projection(vec![Right::Select], Projection::Column("nobody".into()), ProjectionType::Acl);
        assert!(matches!(compile(&model, "people", None, &b), Err(Error::ConflictModel(_))));
    }

    #[test]
    fn test_filter_operators() {
        let model = sample();
        let b = Binding::projection(
            vec![Right::Select],
            Projection::Path(vec![
                PathElement::Filter { filter: "owner".into(), operand: json!("^a"), operator: Some("::regexp::".into()) },
                PathElement::Filter { filter: "id".into(), operand: json!(10), operator: Some("::lt::".into()) },
                PathElement::Column("owner".into()),
            ]),
            ProjectionType::Nonnull,
        );
        assert_eq!(
            compile(&model, "people", Some("t"), &b).unwrap(),
            "(\"t\".\"owner\"::text ~ '^a' AND \"t\".\"id\" < 10 AND \"t\".\"owner\" IS NOT NULL)"
        );

        let bad = Binding::projection(
            vec![Right::Select],
            Projection::Path(vec![
                PathElement::Filter { filter: "id".into(), operand: json!(1), operator: Some("::ts::".into()) },
                PathElement::Column("owner".into()),
            ]),
            ProjectionType::Nonnull,
        );
        assert!(matches!(compile(&model, "people", None, &bad), Err(Error::BadData(_))));
    }
}
