//! Rights-filtered model documents
//!
//! Entities the requester cannot enumerate are left out. ACLs and
//! bindings are only shown to owners.

use relcat_model::{Column, KeyReference, Model, Right, Schema, Table, Unique};
use serde_json::{json, Map, Value};

use crate::evaluator::{RightsEngine, Target};

fn rights(engine: &RightsEngine<'_>, target: Target<'_>) -> Value {
    let summary: Map<String, Value> = engine
        .rights_summary(target)
        .into_iter()
        .map(|(right, decision)| (right.as_str().to_string(), json!(decision.as_tristate())))
        .collect();
    Value::Object(summary)
}

fn is_owner(engine: &RightsEngine<'_>, target: Target<'_>) -> bool {
    engine.has_right(target, Right::Owner).is_allow()
}

pub fn render_model(engine: &RightsEngine<'_>) -> Value {
    let model: &Model = engine.model();
    let schemas: Map<String, Value> = model
        .schemas()
        .filter(|s| engine.enumerable(Target::Schema(s)))
        .map(|s| (s.name.clone(), render_schema(engine, s)))
        .collect();
    let mut doc = json!({
        "schemas": schemas,
        "annotations": model.annotations,
        "rights": rights(engine, Target::Catalog),
    });
    if is_owner(engine, Target::Catalog) {
        doc["acls"] = json!(model.acls);
    }
    doc
}

pub fn render_schema(engine: &RightsEngine<'_>, schema: &Schema) -> Value {
    let tables: Map<String, Value> = schema
        .tables
        .values()
        .filter(|t| engine.enumerable(Target::Table(t)))
        .map(|t| (t.name.clone(), render_table(engine, t)))
        .collect();
    let mut doc = json!({
        "schema_name": schema.name,
        "comment": schema.comment,
        "annotations": schema.annotations,
        "rights": rights(engine, Target::Schema(schema)),
        "tables": tables,
    });
    if is_owner(engine, Target::Schema(schema)) {
        doc["acls"] = json!(schema.acls);
    }
    doc
}

pub fn render_table(engine: &RightsEngine<'_>, table: &Table) -> Value {
    let columns: Vec<Value> = table
        .columns()
        .filter(|c| engine.enumerable(Target::Column(c)))
        .map(|c| render_column(engine, c))
        .collect();
    let keys: Vec<Value> = table
        .uniques
        .values()
        .filter(|u| engine.enumerable(Target::Unique(u)))
        .map(render_key)
        .collect();
    let foreign_keys: Vec<Value> = table
        .fkeys
        .values()
        .filter(|fk| engine.enumerable(Target::ForeignKey(fk)))
        .flat_map(|fk| fk.references.values())
        .filter(|kr| engine.enumerable(Target::KeyReference(kr)))
        .map(|kr| render_keyref(engine, kr))
        .collect();

    let mut doc = json!({
        "schema_name": table.schema,
        "table_name": table.name,
        "kind": table.kind.as_str(),
        "comment": table.comment,
        "column_definitions": columns,
        "keys": keys,
        "foreign_keys": foreign_keys,
        "annotations": table.annotations,
        "rights": rights(engine, Target::Table(table)),
    });
    if is_owner(engine, Target::Table(table)) {
        doc["acls"] = json!(table.acls);
        doc["acl_bindings"] = json!(table.dynacls);
    }
    doc
}

pub fn render_column(engine: &RightsEngine<'_>, column: &Column) -> Value {
    let mut doc = json!({
        "name": column.name,
        "type": column.ctype(),
        "default": column.default_value(),
        "nullok": column.nullok,
        "comment": column.comment,
        "annotations": column.annotations,
        "rights": rights(engine, Target::Column(column)),
    });
    let owner = engine
        .table_of(&column.table)
        .is_some_and(|t| is_owner(engine, Target::Table(t)));
    if owner {
        doc["acls"] = json!(column.acls);
        doc["acl_bindings"] = json!(column.dynacls);
    }
    doc
}

pub fn render_key(unique: &Unique) -> Value {
    json!({
        "unique_columns": unique.columns,
        "names": unique.constraint_names,
        "comment": unique.comment,
        "annotations": unique.annotations,
    })
}

pub fn render_keyref(engine: &RightsEngine<'_>, keyref: &KeyReference) -> Value {
    let (from, to): (Vec<&String>, Vec<&String>) = keyref.reference.pairs().iter().map(|(f, t)| (f, t)).unzip();
    let from_refs: Vec<Value> = from
        .into_iter()
        .map(|c| {
            json!({
                "schema_name": keyref.from_table.schema,
                "table_name": keyref.from_table.table,
                "column_name": c,
            })
        })
        .collect();
    let to_table = keyref.to_table();
    let to_refs: Vec<Value> = to
        .into_iter()
        .map(|c| {
            json!({
                "schema_name": to_table.schema,
                "table_name": to_table.table,
                "column_name": c,
            })
        })
        .collect();

    let mut doc = json!({
        "foreign_key_columns": from_refs,
        "referenced_columns": to_refs,
        "names": keyref.constraint_names,
        "on_delete": keyref.on_delete,
        "on_update": keyref.on_update,
        "comment": keyref.comment,
        "annotations": keyref.annotations,
        "rights": rights(engine, Target::KeyReference(keyref)),
    });
    if is_owner(engine, Target::KeyReference(keyref)) {
        doc["acls"] = json!(keyref.acls);
        doc["acl_bindings"] = json!(keyref.dynacls);
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EvaluationContext;
    use relcat_model::{AclKind, ColumnType, RefAction, ReferenceMap, TableKind, TablePath};

    fn model() -> Model {
        let mut model = Model::new("_ermrest");
        model.acls.set(AclKind::Catalog, Right::Enumerate, vec!["*".into()]).unwrap();
        model.acls.set(AclKind::Catalog, Right::Owner, vec!["admin".into()]).unwrap();
        model.acls.set(AclKind::Catalog, Right::Select, vec!["*".into()]).unwrap();
        let schema = model.ensure_schema("s");
        let mut t = Table::new("s", "items", TableKind::Table);
        let p = t.path();
        t.add_column(Column::new(p.clone(), "id", 0, ColumnType::scalar("int4"), None)).unwrap();
        t.add_column(Column::new(p.clone(), "parent", 1, ColumnType::scalar("int4"), None)).unwrap();
        t.add_column(Column::new(p, "hidden", 2, ColumnType::text(), None)).unwrap();
        let hidden = t.column_mut("hidden").unwrap();
        for right in [Right::Enumerate, Right::Select, Right::Write, Right::Insert, Right::Update] {
            hidden.acls.set(AclKind::Column, right, vec!["admin".into()]).unwrap();
        }
        schema.add_table(t).unwrap();
        let path = TablePath::new("s", "items");
        model.add_unique(&path, ["id"].into_iter().collect(), None).unwrap();
        model.add_unique(&path, ["hidden"].into_iter().collect(), None).unwrap();
        let map = ReferenceMap::new(path.clone(), vec![("parent".into(), "id".into())]).unwrap();
        model.add_reference(&path, map, None, RefAction::Cascade, RefAction::NoAction).unwrap();
        model
    }

    #[test]
    fn test_hidden_column_omitted() {
        let model = model();
        let ctx = EvaluationContext::new(["reader"]);
        let engine = RightsEngine::new(&model, &ctx);
        let doc = render_model(&engine);
        let table = &doc["schemas"]["s"]["tables"]["items"];
        let names: Vec<&str> = table["column_definitions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["id", "parent"]);
        assert_eq!(table["keys"].as_array().unwrap().len(), 1);
        assert_eq!(table["foreign_keys"].as_array().unwrap().len(), 1);
        assert_eq!(table["foreign_keys"][0]["on_delete"], json!("CASCADE"));
        assert!(table.get("acls").is_none());
        assert!(doc.get("acls").is_none());
        assert_eq!(table["rights"]["select"], json!(true));
        assert_eq!(table["rights"]["delete"], json!(false));
    }

    #[test]
    fn test_owner_sees_acls() {
        let model = model();
        let ctx = EvaluationContext::new(["admin"]);
        let engine = RightsEngine::new(&model, &ctx);
        let doc = render_model(&engine);
        let table = &doc["schemas"]["s"]["tables"]["items"];
        assert_eq!(table["column_definitions"].as_array().unwrap().len(), 3);
        assert_eq!(doc["acls"]["owner"], json!(["admin"]));
        assert!(table["column_definitions"][2].get("acl_bindings").is_some());
        assert_eq!(table["column_definitions"][0]["type"]["typename"], json!("int4"));
    }
}
