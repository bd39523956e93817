//! Introspection over catalog dumps

use proptest::prelude::*;
use relcat_common::{CatalogConfig, Error, Result};
use relcat_introspect::{
    introspect, introspect_with_report, AclRow, AnnotationRow, CatalogDump, CatalogReader, ColumnsRow, DynaclRow,
    DumpReader, ForeignKeyRow, SchemaRow, TableRow, UniqueRow,
};
use relcat_model::{AclBinding, ColumnSet, ColumnType, RefAction, Right, StorageKind, TablePath};
use serde_json::json;

fn lab_dump() -> CatalogDump {
    serde_json::from_value(json!({
        "schemas": [{"schema_name": "lab"}, {"schema_name": "_ermrest"}],
        "columns": [{
            "table_schema": "lab",
            "table_name": "a",
            "table_kind": "r",
            "column_names": ["id", "label"],
            "data_types": ["int8", "text"],
            "not_nulls": [true, false]
        }, {
            "table_schema": "lab",
            "table_name": "b",
            "table_kind": "r",
            "table_comment": "samples",
            "column_names": ["id", "a_id", "weight"],
            "data_types": ["int8", "int8", "weight_t"],
            "domain_bases": [null, null, "float8"],
            "not_nulls": [true, false, false]
        }],
        "tables": [
            {"table_schema": "lab", "table_name": "a", "table_kind": "r"},
            {"table_schema": "lab", "table_name": "b", "table_kind": "r"},
            {"table_schema": "lab", "table_name": "empty", "table_kind": "r", "comment": "no columns yet"},
            {"table_schema": "_ermrest", "table_name": "model_keyref_annotation", "table_kind": "r"},
            {"table_schema": "_ermrest", "table_name": "model_column_acl", "table_kind": "r"},
            {"table_schema": "_ermrest", "table_name": "model_table_dynacl", "table_kind": "r"}
        ],
        "uniques": [
            {"constraint_schema": "lab", "constraint_name": "a_pkey", "table_schema": "lab", "table_name": "a",
             "column_names": ["id"]},
            {"constraint_schema": "lab", "constraint_name": "b_pkey", "table_schema": "lab", "table_name": "b",
             "column_names": ["id"]},
            {"constraint_schema": "lab", "constraint_name": "a_id_key", "table_schema": "lab", "table_name": "a",
             "column_names": ["id"]}
        ],
        "foreign_keys": [
            {"fk_constraint_schema": "lab", "fk_constraint_name": "fk_a",
             "fk_table_schema": "lab", "fk_table_name": "b", "fk_column_names": ["a_id"],
             "uq_table_schema": "lab", "uq_table_name": "a", "uq_column_names": ["id"],
             "rc_delete_rule": "CASCADE", "rc_update_rule": "NO ACTION"},
            {"fk_constraint_schema": "lab", "fk_constraint_name": "fk_a_legacy",
             "fk_table_schema": "lab", "fk_table_name": "b", "fk_column_names": ["a_id"],
             "uq_table_schema": "lab", "uq_table_name": "a", "uq_column_names": ["id"],
             "rc_delete_rule": "CASCADE", "rc_update_rule": "NO ACTION"}
        ],
        "annotations": {
            "keyref": [{
                "from_schema_name": "lab", "from_table_name": "b", "from_column_names": ["a_id"],
                "to_schema_name": "lab", "to_table_name": "a", "to_column_names": ["id"],
                "annotation_uri": "tag:display", "annotation_value": {"name": "Parent"}
            }]
        },
        "acls": {
            "column": [
                {"schema_name": "lab", "table_name": "a", "column_name": "label", "acl": "select",
                 "members": ["curators"]},
                {"schema_name": "lab", "table_name": "a", "column_name": "label", "acl": "bogus",
                 "members": ["curators"]}
            ]
        },
        "dynacls": {
            "table": [{
                "schema_name": "lab", "table_name": "b", "binding_name": "owner",
                "binding": {"types": ["select"], "projection": "a_id", "projection_type": "nonnull"}
            }]
        }
    }))
    .unwrap()
}

fn config() -> CatalogConfig {
    let mut config = CatalogConfig::default();
    config.introspection.create_missing_value_map = false;
    config
}

#[test]
fn test_duplicate_constraints_merge() {
    let model = introspect(&DumpReader::new(lab_dump()), &config()).unwrap();

    let a = model.table("lab", "a").unwrap();
    let key = a.unique(&ColumnSet::from_iter(["id"])).unwrap();
    assert_eq!(a.uniques.len(), 1);
    assert_eq!(key.constraint_names.len(), 2);

    let b = model.table("lab", "b").unwrap();
    let refs: Vec<_> = b.references().collect();
    assert_eq!(refs.len(), 1);
    let names: Vec<_> = refs[0].constraint_names.iter().map(|c| c.name().to_string()).collect();
    assert_eq!(names, vec!["fk_a".to_string(), "fk_a_legacy".to_string()]);
    assert_eq!(refs[0].on_delete, RefAction::Cascade);
    assert_eq!(refs[0].on_update, RefAction::NoAction);
    assert_eq!(refs[0].to_table(), &TablePath::new("lab", "a"));
    assert!(key.referenced_by.contains(&refs[0].id()));
}

#[test]
fn test_constraint_names_scoped_per_table() {
    let mut dump = lab_dump();
    dump.columns.push(
        serde_json::from_value(json!({
            "table_schema": "lab",
            "table_name": "c",
            "table_kind": "r",
            "column_names": ["id", "a_id"],
            "data_types": ["int8", "int8"],
            "not_nulls": [true, false]
        }))
        .unwrap(),
    );
    dump.uniques.push(
        serde_json::from_value(json!({
            "constraint_schema": "lab", "constraint_name": "b_pkey", "table_schema": "lab", "table_name": "c",
            "column_names": ["id"]
        }))
        .unwrap(),
    );
    dump.foreign_keys.push(
        serde_json::from_value(json!({
            "fk_constraint_schema": "lab", "fk_constraint_name": "fk_a",
            "fk_table_schema": "lab", "fk_table_name": "c", "fk_column_names": ["a_id"],
            "uq_table_schema": "lab", "uq_table_name": "a", "uq_column_names": ["id"],
            "rc_delete_rule": "SET NULL", "rc_update_rule": "NO ACTION"
        }))
        .unwrap(),
    );
    let model = introspect(&DumpReader::new(dump), &config()).unwrap();

    let b = model.table("lab", "b").unwrap();
    let refs: Vec<_> = b.references().collect();
    assert_eq!(refs.len(), 1);
    let names: Vec<_> = refs[0].constraint_names.iter().map(|c| c.name().to_string()).collect();
    assert_eq!(names, vec!["fk_a".to_string(), "fk_a_legacy".to_string()]);
    assert!(b.unique(&ColumnSet::from_iter(["id"])).is_ok());

    let c = model.table("lab", "c").unwrap();
    assert!(c.unique(&ColumnSet::from_iter(["id"])).is_ok());
    let refs: Vec<_> = c.references().collect();
    assert_eq!(refs.len(), 1);
    let names: Vec<_> = refs[0].constraint_names.iter().map(|c| c.name().to_string()).collect();
    assert_eq!(names, vec!["fk_a".to_string()]);
    assert_eq!(refs[0].on_delete, RefAction::SetNull);

    let key = model.table("lab", "a").unwrap().unique(&ColumnSet::from_iter(["id"])).unwrap();
    assert_eq!(key.referenced_by.len(), 2);
}

#[test]
fn test_zero_column_table_and_domains() {
    let model = introspect(&DumpReader::new(lab_dump()), &config()).unwrap();
    let empty = model.table("lab", "empty").unwrap();
    assert_eq!(empty.column_count(), 0);
    assert_eq!(empty.comment.as_deref(), Some("no columns yet"));

    let b = model.table("lab", "b").unwrap();
    assert_eq!(b.comment.as_deref(), Some("samples"));
    let weight = b.column("weight").unwrap().ctype();
    assert!(weight.is_domain());
    assert_eq!(
        weight,
        ColumnType::Domain {
            name: "weight_t".into(),
            base: Box::new(ColumnType::scalar("float8")),
        }
    );
}

#[test]
fn test_stored_overlays_loaded() {
    let (model, report) = introspect_with_report(&DumpReader::new(lab_dump()), &config()).unwrap();

    let b = model.table("lab", "b").unwrap();
    let keyref = b.references().next().unwrap();
    assert_eq!(keyref.annotations.get("tag:display").unwrap(), &json!({"name": "Parent"}));

    let label = model.column("lab", "a", "label").unwrap();
    assert_eq!(label.acls.get(Right::Select), Some(&["curators".to_string()][..]));
    assert_eq!(report.skipped_acls, 1);

    assert!(matches!(b.dynacls.get("owner"), Some(AclBinding::Enabled(_))));
    assert_eq!(report.skipped_bindings, 0);
}

#[test]
fn test_policy_loading_can_be_disabled() {
    let mut config = config();
    config.introspection.load_policy = false;
    let (model, report) = introspect_with_report(&DumpReader::new(lab_dump()), &config).unwrap();
    assert!(model.column("lab", "a", "label").unwrap().acls.is_empty());
    assert!(model.table("lab", "b").unwrap().dynacls.is_empty());
    assert_eq!(report.skipped_acls, 0);
}

#[test]
fn test_storage_without_table_is_ignored() {
    let mut dump = lab_dump();
    dump.tables.retain(|t| t.table_schema != "_ermrest");
    let model = introspect(&DumpReader::new(dump), &config()).unwrap();
    let keyref = model.table("lab", "b").unwrap().references().next().unwrap();
    assert!(keyref.annotations.is_empty());
}

#[test]
fn test_foreign_key_to_missing_column_is_inconsistent() {
    let mut dump = lab_dump();
    dump.foreign_keys[0].uq_column_names = vec!["nope".into()];
    let err = introspect(&DumpReader::new(dump), &config()).unwrap_err();
    assert!(matches!(err, Error::Inconsistent(_)), "{err}");
}

#[test]
fn test_foreign_key_to_non_key_is_inconsistent() {
    let mut dump = lab_dump();
    dump.foreign_keys[0].uq_column_names = vec!["label".into()];
    dump.foreign_keys.truncate(1);
    let err = introspect(&DumpReader::new(dump), &config()).unwrap_err();
    assert!(matches!(err, Error::Inconsistent(_)), "{err}");
}

#[test]
fn test_unknown_referential_action_is_inconsistent() {
    let mut dump = lab_dump();
    dump.foreign_keys[1].rc_delete_rule = "EXPLODE".into();
    let err = introspect(&DumpReader::new(dump), &config()).unwrap_err();
    assert!(matches!(err, Error::Inconsistent(_)), "{err}");
}

#[test]
fn test_value_map_created_through_reader() {
    let reader = DumpReader::new(lab_dump());
    let (model, report) = introspect_with_report(&reader, &CatalogConfig::default()).unwrap();
    assert!(report.value_map_created);
    assert!(model.system_schema().tables.contains_key("valuemap"));
    assert!(reader.executed()[0].starts_with("DROP TABLE IF EXISTS \"_ermrest\".\"valuemap\""));
}

/// Fails one catalog query, as a dropped connection would.
struct FlakyReader(DumpReader);

impl CatalogReader for FlakyReader {
    fn schemas(&self) -> Result<Vec<SchemaRow>> {
        self.0.schemas()
    }

    fn columns(&self) -> Result<Vec<ColumnsRow>> {
        self.0.columns()
    }

    fn tables(&self) -> Result<Vec<TableRow>> {
        self.0.tables()
    }

    fn uniques(&self) -> Result<Vec<UniqueRow>> {
        Err(Error::BackendUnavailable("connection reset".into()))
    }

    fn foreign_keys(&self) -> Result<Vec<ForeignKeyRow>> {
        self.0.foreign_keys()
    }

    fn table_exists(&self, schema: &str, table: &str) -> Result<bool> {
        self.0.table_exists(schema, table)
    }

    fn annotations(&self, kind: StorageKind) -> Result<Vec<AnnotationRow>> {
        self.0.annotations(kind)
    }

    fn acls(&self, kind: StorageKind) -> Result<Vec<AclRow>> {
        self.0.acls(kind)
    }

    fn dynacls(&self, kind: StorageKind) -> Result<Vec<DynaclRow>> {
        self.0.dynacls(kind)
    }

    fn execute(&self, sql: &str) -> Result<()> {
        self.0.execute(sql)
    }
}

#[test]
fn test_backend_failure_yields_no_model() {
    let reader = FlakyReader(DumpReader::new(lab_dump()));
    let err = introspect(&reader, &CatalogConfig::default()).unwrap_err();
    assert!(matches!(err, Error::BackendUnavailable(_)));
    assert!(reader.0.executed().is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_row_order_does_not_matter(
        uniques in Just(lab_dump().uniques).prop_shuffle(),
        foreign_keys in Just(lab_dump().foreign_keys).prop_shuffle(),
        columns in Just(lab_dump().columns).prop_shuffle(),
    ) {
        let expected = introspect(&DumpReader::new(lab_dump()), &config()).unwrap();
        let mut dump = lab_dump();
        dump.uniques = uniques;
        dump.foreign_keys = foreign_keys;
        dump.columns = columns;
        let actual = introspect(&DumpReader::new(dump), &config()).unwrap();
        prop_assert_eq!(actual, expected);
    }
}
