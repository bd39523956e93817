//! Unique keys, foreign keys and key references

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use relcat_common::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::acl::{AclKind, Acls, Dynacls, HasAcls};
use crate::annotation::{Annotations, HasAnnotations};
use crate::ident::sql_identifier;
use crate::storage::{StorageKey, StorageKind};
use crate::table::TablePath;

/// Frozen set of column names within one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnSet(BTreeSet<String>);

impl ColumnSet {
    pub fn contains(&self, column: &str) -> bool {
        self.0.contains(column)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for ColumnSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for ColumnSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(String::as_str).collect();
        write!(f, "({})", names.join(","))
    }
}

/// `(schema, name)` of a backend constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConstraintName(pub String, pub String);

impl ConstraintName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self(schema.into(), name.into())
    }

    pub fn schema(&self) -> &str {
        &self.0
    }

    pub fn name(&self) -> &str {
        &self.1
    }
}

/// Canonical column-to-column mapping of one reference.
///
/// Pairs are kept sorted by referencing column so equal mappings compare
/// and hash equal no matter the order they were read in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceMap {
    pub to_table: TablePath,
    pairs: Vec<(String, String)>,
}

impl ReferenceMap {
    pub fn new(to_table: TablePath, mut pairs: Vec<(String, String)>) -> Result<Self> {
        if pairs.is_empty() {
            return Err(Error::bad_data("Foreign key reference maps no columns"));
        }
        pairs.sort();
        if pairs.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(Error::bad_data(format!(
                "Foreign key reference to {to_table} repeats a referencing column"
            )));
        }
        Ok(Self { to_table, pairs })
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn from_columns(&self) -> ColumnSet {
        self.pairs.iter().map(|(f, _)| f.clone()).collect()
    }

    pub fn to_columns(&self) -> ColumnSet {
        self.pairs.iter().map(|(_, t)| t.clone()).collect()
    }

    /// Referenced column for a referencing column.
    pub fn target_of(&self, from: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(f, _)| f == from)
            .map(|(_, t)| t.as_str())
    }
}

/// Referential action for ON DELETE / ON UPDATE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RefAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl RefAction {
    pub fn sql(self) -> &'static str {
        match self {
            RefAction::NoAction => "NO ACTION",
            RefAction::Restrict => "RESTRICT",
            RefAction::Cascade => "CASCADE",
            RefAction::SetNull => "SET NULL",
            RefAction::SetDefault => "SET DEFAULT",
        }
    }
}

impl FromStr for RefAction {
    type Err = Error;

    /// Accepts backend one-letter codes and SQL words.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" | "NO ACTION" => Ok(RefAction::NoAction),
            "R" | "RESTRICT" => Ok(RefAction::Restrict),
            "C" | "CASCADE" => Ok(RefAction::Cascade),
            "N" | "SET NULL" => Ok(RefAction::SetNull),
            "D" | "SET DEFAULT" => Ok(RefAction::SetDefault),
            other => Err(Error::bad_data(format!("Unknown referential action {other}"))),
        }
    }
}

impl Serialize for RefAction {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.sql())
    }
}

impl<'de> Deserialize<'de> for RefAction {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Identity of a key reference within a model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyRefId {
    pub from_table: TablePath,
    pub reference: ReferenceMap,
}

impl KeyRefId {
    pub fn from_columns(&self) -> ColumnSet {
        self.reference.from_columns()
    }
}

impl fmt::Display for KeyRefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (from, to): (Vec<&str>, Vec<&str>) = self
            .reference
            .pairs()
            .iter()
            .map(|(a, b)| (a.as_str(), b.as_str()))
            .unzip();
        write!(
            f,
            "{}({}) -> {}({})",
            self.from_table,
            from.join(","),
            self.reference.to_table,
            to.join(",")
        )
    }
}

/// A logical unique key: one per distinct column set.
#[derive(Debug, Clone, PartialEq)]
pub struct Unique {
    pub table: TablePath,
    pub columns: ColumnSet,
    pub constraint_names: BTreeSet<ConstraintName>,
    pub comment: Option<String>,
    pub annotations: Annotations,
    /// Key references that target this key.
    pub referenced_by: BTreeSet<KeyRefId>,
}

impl Unique {
    pub fn new(table: TablePath, columns: ColumnSet) -> Self {
        Self {
            table,
            columns,
            constraint_names: BTreeSet::new(),
            comment: None,
            annotations: Annotations::new(),
            referenced_by: BTreeSet::new(),
        }
    }

    pub fn with_constraint(mut self, name: ConstraintName) -> Self {
        self.constraint_names.insert(name);
        self
    }

    pub fn storage_key(&self) -> StorageKey {
        StorageKey::new(StorageKind::Key)
            .text("schema_name", &self.table.schema)
            .text("table_name", &self.table.table)
            .text_array("column_names", self.columns.names())
    }

    pub fn pre_delete(&mut self, system_schema: &str) -> Vec<String> {
        self.annotations.clear();
        self.storage_key().purge_sql(system_schema)
    }
}

impl HasAnnotations for Unique {
    fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    fn annotations_mut(&mut self) -> &mut Annotations {
        &mut self.annotations
    }
}

/// A logical foreign key: one per distinct referencing column set.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub table: TablePath,
    pub columns: ColumnSet,
    pub references: BTreeMap<ReferenceMap, KeyReference>,
}

impl ForeignKey {
    pub fn new(table: TablePath, columns: ColumnSet) -> Self {
        Self {
            table,
            columns,
            references: BTreeMap::new(),
        }
    }
}

/// One concrete binding of a foreign key to a unique key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyReference {
    pub from_table: TablePath,
    pub reference: ReferenceMap,
    pub on_delete: RefAction,
    pub on_update: RefAction,
    pub constraint_names: BTreeSet<ConstraintName>,
    pub comment: Option<String>,
    pub annotations: Annotations,
    pub acls: Acls,
    pub dynacls: Dynacls,
}

impl KeyReference {
    pub fn new(from_table: TablePath, reference: ReferenceMap) -> Self {
        Self {
            from_table,
            reference,
            on_delete: RefAction::default(),
            on_update: RefAction::default(),
            constraint_names: BTreeSet::new(),
            comment: None,
            annotations: Annotations::new(),
            acls: Acls::new(),
            dynacls: Dynacls::new(),
        }
    }

    pub fn id(&self) -> KeyRefId {
        KeyRefId {
            from_table: self.from_table.clone(),
            reference: self.reference.clone(),
        }
    }

    pub fn to_table(&self) -> &TablePath {
        &self.reference.to_table
    }

    pub fn from_columns(&self) -> ColumnSet {
        self.reference.from_columns()
    }

    pub fn to_columns(&self) -> ColumnSet {
        self.reference.to_columns()
    }

    /// `from_alias.fc = to_alias.tc AND ...` for every mapped pair.
    pub fn join_condition(&self, from_alias: &str, to_alias: &str) -> String {
        self.reference
            .pairs()
            .iter()
            .map(|(f, t)| {
                format!(
                    "{}.{} = {}.{}",
                    sql_identifier(from_alias),
                    sql_identifier(f),
                    sql_identifier(to_alias),
                    sql_identifier(t)
                )
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    pub fn storage_key(&self) -> StorageKey {
        let (from, to): (Vec<String>, Vec<String>) =
            self.reference.pairs().iter().cloned().unzip();
        StorageKey::new(StorageKind::Keyref)
            .text("from_schema_name", &self.from_table.schema)
            .text("from_table_name", &self.from_table.table)
            .text_array("from_column_names", from)
            .text("to_schema_name", &self.reference.to_table.schema)
            .text("to_table_name", &self.reference.to_table.table)
            .text_array("to_column_names", to)
    }

    pub fn pre_delete(&mut self, system_schema: &str) -> Vec<String> {
        self.annotations.clear();
        self.acls.clear();
        self.dynacls.clear();
        self.storage_key().purge_sql(system_schema)
    }
}

impl HasAcls for KeyReference {
    const KIND: AclKind = AclKind::KeyReference;

    fn acls(&self) -> &Acls {
        &self.acls
    }

    fn acls_mut(&mut self) -> &mut Acls {
        &mut self.acls
    }

    fn dynacls(&self) -> Option<&Dynacls> {
        Some(&self.dynacls)
    }
}

impl HasAnnotations for KeyReference {
    fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    fn annotations_mut(&mut self) -> &mut Annotations {
        &mut self.annotations
    }
}
