//! Static ACLs and dynamic ACL bindings

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use relcat_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Right {
    Owner,
    Create,
    Enumerate,
    Write,
    Insert,
    Update,
    Delete,
    Select,
    Reference,
}

impl Right {
    pub const ALL: [Right; 9] = [
        Right::Owner,
        Right::Create,
        Right::Enumerate,
        Right::Write,
        Right::Insert,
        Right::Update,
        Right::Delete,
        Right::Select,
        Right::Reference,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Right::Owner => "owner",
            Right::Create => "create",
            Right::Enumerate => "enumerate",
            Right::Write => "write",
            Right::Insert => "insert",
            Right::Update => "update",
            Right::Delete => "delete",
            Right::Select => "select",
            Right::Reference => "reference",
        }
    }

    /// Rights that each imply `self`, including `self`.
    pub fn sufficient(self) -> &'static [Right] {
        match self {
            Right::Owner => &[Right::Owner],
            Right::Enumerate => &Right::ALL,
            Right::Insert => &[Right::Insert, Right::Write, Right::Owner],
            Right::Update => &[Right::Update, Right::Write, Right::Owner],
            Right::Delete => &[Right::Delete, Right::Write, Right::Owner],
            Right::Create => &[Right::Create, Right::Owner],
            Right::Write => &[Right::Write, Right::Owner],
            Right::Select => &[Right::Select, Right::Owner],
            Right::Reference => &[Right::Reference, Right::Owner],
        }
    }

    pub fn is_implied_by(self, granted: Right) -> bool {
        self.sufficient().contains(&granted)
    }
}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Right {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Right::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| Error::not_found(format!("ACL {s}")))
    }
}

/// Kinds of entity that carry ACLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AclKind {
    Catalog,
    Schema,
    Table,
    Column,
    KeyReference,
}

impl AclKind {
    /// Rights that may hold a static ACL on this kind.
    pub fn static_rights(self) -> &'static [Right] {
        match self {
            AclKind::Catalog | AclKind::Schema | AclKind::Table => &Right::ALL,
            AclKind::Column => &[
                Right::Enumerate,
                Right::Write,
                Right::Insert,
                Right::Update,
                Right::Select,
            ],
            AclKind::KeyReference => &[Right::Write, Right::Insert, Right::Update, Right::Enumerate],
        }
    }

    /// Rights a dynamic binding may grant on this kind.
    pub fn dynamic_rights(self) -> &'static [Right] {
        match self {
            AclKind::Catalog | AclKind::Schema => &[],
            AclKind::Table | AclKind::Column => {
                &[Right::Owner, Right::Update, Right::Delete, Right::Select]
            }
            AclKind::KeyReference => &[Right::Owner, Right::Insert, Right::Update],
        }
    }

    pub fn supports(self, right: Right) -> bool {
        self.static_rights().contains(&right)
    }
}

/// True when `acl` names one of `roles` or the wildcard role.
pub fn roles_match(acl: &[String], roles: &BTreeSet<String>) -> bool {
    acl.iter().any(|member| member == "*" || roles.contains(member))
}

/// Static ACLs: right → closed allow-list. A missing right defers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Acls(BTreeMap<Right, Vec<String>>);

impl Acls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, right: Right) -> Option<&[String]> {
        self.0.get(&right).map(Vec::as_slice)
    }

    /// Set an ACL, rejecting rights this kind does not carry.
    pub fn set(&mut self, kind: AclKind, right: Right, members: Vec<String>) -> Result<()> {
        if !kind.supports(right) {
            return Err(Error::bad_data(format!(
                "ACL name {right} not supported on {kind:?}"
            )));
        }
        self.0.insert(right, members);
        Ok(())
    }

    pub fn remove(&mut self, right: Right) -> Option<Vec<String>> {
        self.0.remove(&right)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Right, &Vec<String>)> {
        self.0.iter().map(|(r, m)| (*r, m))
    }

    /// Validate every entry against `kind`.
    pub fn validate(&self, kind: AclKind) -> Result<()> {
        for right in self.0.keys() {
            if !kind.supports(*right) {
                return Err(Error::bad_data(format!(
                    "ACL name {right} not supported on {kind:?}"
                )));
            }
        }
        Ok(())
    }
}

/// How a projected value authorizes a row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionType {
    /// Projected value is a role or role array that must match a requester.
    #[default]
    Acl,
    /// Any non-null projected value authorizes.
    Nonnull,
}

/// One step of a projection path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    Outbound {
        outbound: [String; 2],
    },
    Inbound {
        inbound: [String; 2],
    },
    Filter {
        filter: String,
        operand: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        operator: Option<String>,
    },
    Column(String),
}

/// What a binding projects from the governed row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Projection {
    Column(String),
    Path(Vec<PathElement>),
}

impl Projection {
    /// Split into the traversal steps and the terminal column.
    pub fn split(&self) -> Result<(&[PathElement], &str)> {
        match self {
            Projection::Column(name) => Ok((&[], name)),
            Projection::Path(elements) => match elements.split_last() {
                Some((PathElement::Column(name), steps)) => Ok((steps, name)),
                _ => Err(Error::bad_data(
                    "Projection path must end with a column name",
                )),
            },
        }
    }
}

fn default_scope() -> Vec<String> {
    vec!["*".to_string()]
}

/// A row-level policy granting `types` when its condition holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub types: Vec<Right>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<Projection>,
    #[serde(default)]
    pub projection_type: ProjectionType,
    /// Raw SQL condition with `{alias}` standing for the row source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clause: Option<String>,
    #[serde(default = "default_scope")]
    pub scope_acl: Vec<String>,
}

impl Binding {
    pub fn projection(types: Vec<Right>, projection: Projection, projection_type: ProjectionType) -> Self {
        Self {
            types,
            projection: Some(projection),
            projection_type,
            clause: None,
            scope_acl: default_scope(),
        }
    }

    pub fn clause(types: Vec<Right>, clause: impl Into<String>) -> Self {
        Self {
            types,
            projection: None,
            projection_type: ProjectionType::default(),
            clause: Some(clause.into()),
            scope_acl: default_scope(),
        }
    }

    pub fn with_scope(mut self, scope: Vec<String>) -> Self {
        self.scope_acl = scope;
        self
    }

    /// Whether this binding grants `right`, directly or through a sufficient type.
    pub fn grants(&self, right: Right) -> bool {
        self.types.iter().any(|t| right.is_implied_by(*t))
    }

    pub fn in_scope(&self, roles: &BTreeSet<String>) -> bool {
        roles_match(&self.scope_acl, roles)
    }

    pub fn validate(&self, kind: AclKind) -> Result<()> {
        if self.types.is_empty() {
            return Err(Error::bad_data("ACL binding requires at least one type"));
        }
        for t in &self.types {
            if !kind.dynamic_rights().contains(t) {
                return Err(Error::bad_data(format!(
                    "ACL binding type {t} not supported on {kind:?}"
                )));
            }
        }
        match (&self.projection, &self.clause) {
            (Some(projection), None) => projection.split().map(|_| ()),
            (None, Some(_)) => Ok(()),
            _ => Err(Error::bad_data(
                "ACL binding requires exactly one of projection or clause",
            )),
        }
    }
}

/// A dynacl entry: a binding, or `false` to suppress an inherited one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBinding", into = "RawBinding")]
pub enum AclBinding {
    Disabled,
    Enabled(Binding),
}

impl AclBinding {
    pub fn as_enabled(&self) -> Option<&Binding> {
        match self {
            AclBinding::Enabled(b) => Some(b),
            AclBinding::Disabled => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawBinding {
    Flag(bool),
    Binding(Binding),
}

impl TryFrom<RawBinding> for AclBinding {
    type Error = String;

    fn try_from(raw: RawBinding) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawBinding::Flag(false) => Ok(AclBinding::Disabled),
            RawBinding::Flag(true) => Err("ACL binding must be an object or false".to_string()),
            RawBinding::Binding(b) => Ok(AclBinding::Enabled(b)),
        }
    }
}

impl From<AclBinding> for RawBinding {
    fn from(binding: AclBinding) -> Self {
        match binding {
            AclBinding::Disabled => RawBinding::Flag(false),
            AclBinding::Enabled(b) => RawBinding::Binding(b),
        }
    }
}

/// Dynamic ACL bindings keyed by binding name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dynacls(BTreeMap<String, AclBinding>);

impl Dynacls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&AclBinding> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn set(&mut self, kind: AclKind, name: impl Into<String>, binding: AclBinding) -> Result<()> {
        if let AclBinding::Enabled(b) = &binding {
            b.validate(kind)?;
        }
        self.0.insert(name.into(), binding);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<AclBinding> {
        self.0.remove(name)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AclBinding)> {
        self.0.iter()
    }

    /// `self` overlaid by `overrides`, key for key.
    pub fn overlay(&self, overrides: &Dynacls) -> Dynacls {
        let mut merged = self.0.clone();
        merged.extend(overrides.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Dynacls(merged)
    }

    pub fn validate(&self, kind: AclKind) -> Result<()> {
        for binding in self.0.values().filter_map(AclBinding::as_enabled) {
            binding.validate(kind)?;
        }
        Ok(())
    }
}

/// Shared ACL surface of governed entities.
pub trait HasAcls {
    const KIND: AclKind;

    fn acls(&self) -> &Acls;
    fn acls_mut(&mut self) -> &mut Acls;

    fn dynacls(&self) -> Option<&Dynacls> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roles(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_sufficient_rights() {
        assert!(Right::Select.is_implied_by(Right::Owner));
        assert!(Right::Insert.is_implied_by(Right::Write));
        assert!(Right::Enumerate.is_implied_by(Right::Select));
        assert!(!Right::Select.is_implied_by(Right::Write));
        assert!(!Right::Owner.is_implied_by(Right::Write));
    }

    #[test]
    fn test_right_parse() {
        assert_eq!("select".parse::<Right>().unwrap(), Right::Select);
        assert!(matches!("bogus".parse::<Right>(), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_roles_match_wildcard() {
        assert!(roles_match(&["*".to_string()], &roles(&[])));
        assert!(roles_match(&["a".to_string()], &roles(&["a", "b"])));
        assert!(!roles_match(&["c".to_string()], &roles(&["a"])));
        assert!(!roles_match(&[], &roles(&["a"])));
    }

    #[test]
    fn test_acl_kind_support() {
        let mut acls = Acls::new();
        assert!(acls.set(AclKind::Column, Right::Select, vec!["a".into()]).is_ok());
        let err = acls
            .set(AclKind::Column, Right::Delete, vec!["a".into()])
            .unwrap_err();
        assert!(matches!(err, Error::BadData(_)));
        assert!(acls.set(AclKind::Table, Right::Delete, vec![]).is_ok());
    }

    #[test]
    fn test_acls_json_shape() {
        let acls: Acls = serde_json::from_value(json!({"select": ["*"], "owner": ["admin"]})).unwrap();
        assert_eq!(acls.get(Right::Select), Some(&["*".to_string()][..]));
        assert_eq!(acls.get(Right::Update), None);
        assert!(acls.validate(AclKind::Table).is_ok());
        assert!(acls.validate(AclKind::Column).is_err());
    }

    #[test]
    fn test_binding_document_forms() {
        let dynacls: Dynacls = serde_json::from_value(json!({
            "owner_rows": {
                "types": ["select", "update"],
                "projection": "owner",
                "projection_type": "acl"
            },
            "via_dept": {
                "types": ["select"],
                "projection": [{"outbound": ["s", "people_dept_fkey"]}, {"filter": "open", "operand": true}, "id"],
                "projection_type": "nonnull"
            },
            "raw": {"types": ["select"], "clause": "{alias}.\"owner_id\" = current_user_id()"},
            "inherited": false
        }))
        .unwrap();

        assert!(dynacls.validate(AclKind::Table).is_ok());
        assert_eq!(dynacls.get("inherited"), Some(&AclBinding::Disabled));

        let via = dynacls.get("via_dept").and_then(AclBinding::as_enabled).unwrap();
        let (steps, column) = via.projection.as_ref().unwrap().split().unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(column, "id");
        assert_eq!(via.scope_acl, vec!["*".to_string()]);
    }

    #[test]
    fn test_binding_true_rejected() {
        let result: std::result::Result<Dynacls, _> = serde_json::from_value(json!({"x": true}));
        assert!(result.is_err());
    }

    #[test]
    fn test_binding_validation() {
        let both = Binding {
            clause: Some("true".to_string()),
            ..Binding::projection(vec![Right::Select], Projection::Column("c".into()), ProjectionType::Acl)
        };
        assert!(both.validate(AclKind::Table).is_err());

        let enumerate = Binding::clause(vec![Right::Enumerate], "true");
        assert!(enumerate.validate(AclKind::Table).is_err());

        let keyref_insert = Binding::clause(vec![Right::Insert], "true");
        assert!(keyref_insert.validate(AclKind::KeyReference).is_ok());
        assert!(keyref_insert.validate(AclKind::Column).is_err());
    }

    #[test]
    fn test_overlay_column_wins() {
        let mut table = Dynacls::new();
        table
            .set(AclKind::Table, "a", AclBinding::Enabled(Binding::clause(vec![Right::Select], "t")))
            .unwrap();
        table
            .set(AclKind::Table, "b", AclBinding::Enabled(Binding::clause(vec![Right::Select], "t")))
            .unwrap();
        let mut column = Dynacls::new();
        column.set(AclKind::Column, "a", AclBinding::Disabled).unwrap();

        let merged = table.overlay(&column);
        assert_eq!(merged.get("a"), Some(&AclBinding::Disabled));
        assert!(merged.get("b").and_then(AclBinding::as_enabled).is_some());
    }
}
