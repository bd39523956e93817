//! DDL statement builders

use relcat_common::Result;

use crate::column::Column;
use crate::ident::{derived_identifier, qualified_name, sql_identifier, sql_literal};
use crate::key::ColumnSet;
use crate::model::Model;
use crate::table::{Table, TableKind};
use crate::types::ColumnType;

pub const VALUE_MAP_TABLE: &str = "valuemap";
const VALUE_MAP_COLUMNS: [&str; 4] = ["schema", "table", "column", "value"];

/// CREATE TABLE for a managed table. Derived columns are skipped.
pub fn create_table_sql(table: &Table) -> Result<String> {
    let mut clauses = table
        .columns()
        .filter(|c| !c.is_fulltext())
        .map(Column::sql_def)
        .collect::<Result<Vec<_>>>()?;
    for unique in table.uniques.values() {
        let cols: Vec<String> = unique.columns.iter().map(|c| sql_identifier(c)).collect();
        clauses.push(format!("UNIQUE({})", cols.join(", ")));
    }
    Ok(format!(
        "CREATE TABLE {} (\n  {}\n);",
        table.path().sql(),
        clauses.join(",\n  ")
    ))
}

/// Single-column btree index, unless a single-column key already provides one.
pub fn btree_index_sql(table: &Table, column: &Column, maxlen: usize) -> Option<String> {
    let single: ColumnSet = std::iter::once(column.name.clone()).collect();
    if column.is_fulltext() || !column.is_indexable() || table.uniques.contains_key(&single) {
        return None;
    }
    let index = derived_identifier(&[table.name.as_str(), column.name.as_str()], "idx", maxlen);
    Some(format!(
        "DROP INDEX IF EXISTS {schema}.{index} ;\nCREATE INDEX {index} ON {table} ( {column} ) ;",
        schema = sql_identifier(&table.schema),
        index = sql_identifier(&index),
        table = table.path().sql(),
        column = sql_identifier(&column.name),
    ))
}

/// Single-column trigram index over the text rendering of a column.
pub fn trgm_index_sql(table: &Table, column: &Column, system_schema: &str, maxlen: usize) -> Option<String> {
    if column.is_fulltext() || !column.is_text() {
        return None;
    }
    let index = derived_identifier(&[table.name.as_str(), column.name.as_str()], "pgtrgm_idx", maxlen);
    Some(format!(
        "DROP INDEX IF EXISTS {schema}.{index} ;\nCREATE INDEX {index} ON {table} USING gin ( {astext} gin_trgm_ops ) ;",
        schema = sql_identifier(&table.schema),
        index = sql_identifier(&index),
        table = table.path().sql(),
        astext = astext_sql(column, None, system_schema),
    ))
}

/// `<system>.astext(col)`: text rendering used by search.
pub fn astext_sql(column: &Column, alias: Option<&str>, system_schema: &str) -> String {
    format!("{}.astext({})", sql_identifier(system_schema), column.sql_name(alias))
}

/// SELECT feeding the value map for one textual column.
fn value_map_part(table: &Table, column: &Column, system_schema: &str) -> Option<String> {
    if !column.is_text() {
        return None;
    }
    Some(format!(
        "SELECT DISTINCT {}::text, {}::text, {}::text, {} FROM {}",
        sql_literal(&table.schema),
        sql_literal(&table.name),
        sql_literal(&column.name),
        astext_sql(column, None, system_schema),
        table.path().sql(),
    ))
}

/// Statements rebuilding the value map; empty when `empty` or no sources exist.
pub fn value_map_sql(model: &Model, empty: bool) -> Vec<String> {
    let system = model.system_schema_name();
    let mut parts: Vec<String> = if empty {
        Vec::new()
    } else {
        model
            .schemas()
            .flat_map(|s| s.tables.values())
            .flat_map(|t| t.columns().filter_map(move |c| value_map_part(t, c, system)))
            .collect()
    };
    if parts.is_empty() {
        parts.push("SELECT 's'::text, 't'::text, 'c'::text, 'v'::text WHERE False".to_string());
    }

    let vmap = qualified_name(system, VALUE_MAP_TABLE);
    let cols: Vec<String> = VALUE_MAP_COLUMNS.iter().map(|c| sql_identifier(c)).collect();
    vec![
        format!("DROP TABLE IF EXISTS {vmap} ;"),
        format!("CREATE TABLE {vmap} ({}) AS {} ;", cols.join(", "), parts.join(" UNION ")),
        format!(
            "CREATE INDEX {} ON {vmap} ({}, {}, {}) ;",
            sql_identifier(&format!("{system}_valuemap_cluster_idx")),
            cols[0],
            cols[1],
            cols[2]
        ),
        format!(
            "CREATE INDEX {} ON {vmap} USING gin ( {} gin_trgm_ops ) ;",
            sql_identifier(&format!("{system}_valuemap_value_idx")),
            cols[3]
        ),
    ]
}

/// In-memory shape of the value map table.
pub fn value_map_table(system_schema: &str) -> Result<Table> {
    let mut table = Table::new(system_schema, VALUE_MAP_TABLE, TableKind::Table);
    let path = table.path();
    for (position, name) in VALUE_MAP_COLUMNS.iter().enumerate() {
        table.add_column(Column::new(path.clone(), *name, position, ColumnType::text(), None))?;
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::MAX_IDENTIFIER_BYTES;

    fn people() -> Table {
        let mut t = Table::new("s", "people", TableKind::Table);
        let p = t.path();
        t.add_column(Column::new(p.clone(), "id", 0, ColumnType::scalar("serial4"), None).with_nullok(false))
            .unwrap();
        t.add_column(Column::new(p.clone(), "name", 1, ColumnType::text(), None))
            .unwrap();
        t.add_column(Column::new(p, "doc", 2, ColumnType::scalar("json"), None))
            .unwrap();
        let id: ColumnSet = ["id"].into_iter().collect();
        let unique = crate::key::Unique::new(t.path(), id.clone());
        t.uniques.insert(id, unique);
        t
    }

    #[test]
    fn test_create_table_sql() {
        let sql = create_table_sql(&people()).unwrap();
        assert!(sql.starts_with("CREATE TABLE \"s\".\"people\" ("));
        assert!(sql.contains("\"id\" serial4 NOT NULL"));
        assert!(sql.contains("UNIQUE(\"id\")"));
    }

    #[test]
    fn test_btree_index_skips_keys_and_json() {
        let t = people();
        assert!(btree_index_sql(&t, t.column("id").unwrap(), MAX_IDENTIFIER_BYTES).is_none());
        assert!(btree_index_sql(&t, t.column("doc").unwrap(), MAX_IDENTIFIER_BYTES).is_none());
        let sql = btree_index_sql(&t, t.column("name").unwrap(), MAX_IDENTIFIER_BYTES).unwrap();
        let index = derived_identifier(&["people", "name"], "idx", MAX_IDENTIFIER_BYTES);
        assert!(sql.contains(&format!("CREATE INDEX \"{index}\" ON")));
        assert!(sql.contains(&format!("DROP INDEX IF EXISTS \"s\".\"{index}\"")));
    }

    #[test]
    fn test_index_names_do_not_collide() {
        let mut ab = Table::new("s", "a_b", TableKind::Table);
        ab.add_column(Column::new(ab.path(), "c", 0, ColumnType::text(), None)).unwrap();
        let mut a = Table::new("s", "a", TableKind::Table);
        a.add_column(Column::new(a.path(), "b_c", 0, ColumnType::text(), None)).unwrap();

        let first = btree_index_sql(&ab, ab.column("c").unwrap(), MAX_IDENTIFIER_BYTES).unwrap();
        let second = btree_index_sql(&a, a.column("b_c").unwrap(), MAX_IDENTIFIER_BYTES).unwrap();
        assert_ne!(first.lines().next(), second.lines().next());

        let first = trgm_index_sql(&ab, ab.column("c").unwrap(), "_ermrest", MAX_IDENTIFIER_BYTES).unwrap();
        let second = trgm_index_sql(&a, a.column("b_c").unwrap(), "_ermrest", MAX_IDENTIFIER_BYTES).unwrap();
        assert_ne!(first.lines().next(), second.lines().next());
    }

    #[test]
    fn test_trgm_index_text_only() {
        let t = people();
        assert!(trgm_index_sql(&t, t.column("id").unwrap(), "_ermrest", 63).is_none());
        let sql = trgm_index_sql(&t, t.column("name").unwrap(), "_ermrest", 63).unwrap();
        assert!(sql.contains("\"_ermrest\".astext(\"name\") gin_trgm_ops"));
    }

    #[test]
    fn test_value_map_sql() {
        let mut model = Model::new("_ermrest");
        model.ensure_schema("s").add_table(people()).unwrap();
        let sql = value_map_sql(&model, false);
        assert_eq!(sql.len(), 4);
        assert!(sql[1].contains("'people'::text, 'name'::text"));
        assert!(!sql[1].contains("'id'::text"));

        let empty = value_map_sql(&model, true);
        assert!(empty[1].contains("WHERE False"));
    }

    #[test]
    fn test_value_map_table_shape() {
        let t = value_map_table("_ermrest").unwrap();
        let names: Vec<&str> = t.columns().map(|c| c.name.as_str()).collect();
        assert_eq!(names, VALUE_MAP_COLUMNS);
        assert!(t.columns().all(Column::is_text));
    }
}
