//! Rights engine
//!
//! Static ACLs are resolved through the inheritance chain
//! column → table → schema → catalog. A right that no static ACL grants
//! is `Indeterminate` when an in-scope dynamic binding could grant it
//! row by row, and `Deny` otherwise.

use std::collections::BTreeMap;

use relcat_model::acl::roles_match;
use relcat_model::{
    Column, Dynacls, ForeignKey, HasAcls, KeyReference, Model, Right, Schema, Table, TablePath, Unique,
};
use tracing::warn;

use crate::context::{Decision, EntityKey, EvaluationContext};

/// A governed entity of the model.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Catalog,
    Schema(&'a Schema),
    Table(&'a Table),
    Column(&'a Column),
    Unique(&'a Unique),
    ForeignKey(&'a ForeignKey),
    KeyReference(&'a KeyReference),
}

impl Target<'_> {
    fn key(&self) -> EntityKey {
        match self {
            Target::Catalog => EntityKey::Catalog,
            Target::Schema(s) => EntityKey::Schema(s.name.clone()),
            Target::Table(t) => EntityKey::Table(t.path()),
            Target::Column(c) => EntityKey::Column(c.table.clone(), c.name.clone()),
            Target::Unique(u) => EntityKey::Unique(u.table.clone(), u.columns.clone()),
            Target::ForeignKey(fk) => EntityKey::ForeignKey(fk.table.clone(), fk.columns.clone()),
            Target::KeyReference(kr) => EntityKey::KeyReference(kr.id()),
        }
    }
}

/// Evaluates rights of one requester against one model snapshot.
pub struct RightsEngine<'a> {
    model: &'a Model,
    ctx: &'a EvaluationContext,
}

impl<'a> RightsEngine<'a> {
    pub fn new(model: &'a Model, ctx: &'a EvaluationContext) -> Self {
        ctx.bind(model.stamp());
        Self { model, ctx }
    }

    pub fn model(&self) -> &'a Model {
        self.model
    }

    pub fn context(&self) -> &'a EvaluationContext {
        self.ctx
    }

    /// Decide `right` on `target`, memoized in the evaluation context.
    pub fn has_right(&self, target: Target<'_>, right: Right) -> Decision {
        let key = (self.model.stamp(), target.key(), right);
        if let Some(decision) = self.ctx.cached(&key) {
            return decision;
        }
        let decision = match target {
            Target::Catalog => self.catalog_right(right),
            Target::Schema(schema) => self.schema_right(schema, right),
            Target::Table(table) => self.table_right(table, right),
            Target::Column(column) => self.column_right(column, right),
            Target::Unique(unique) => self.unique_right(unique, right),
            Target::ForeignKey(fk) => self.foreign_key_right(fk, right),
            Target::KeyReference(kr) => self.keyref_right(kr, right),
        };
        self.ctx.remember(key, decision)
    }

    /// Visible to the requester at all.
    pub fn enumerable(&self, target: Target<'_>) -> bool {
        !self.has_right(target, Right::Enumerate).is_deny()
    }

    fn catalog_right(&self, right: Right) -> Decision {
        self.static_decision(right, |r| self.catalog_acl(r))
    }

    fn schema_right(&self, schema: &Schema, right: Right) -> Decision {
        self.static_decision(right, |r| self.schema_acl(schema, r))
    }

    fn table_right(&self, table: &Table, right: Right) -> Decision {
        let Some(schema) = self.schema_of(&table.schema) else {
            warn!(table = %table.path(), "table without schema, denying");
            return Decision::Deny;
        };
        if self.has_right(Target::Schema(schema), Right::Enumerate).is_deny() {
            return Decision::Deny;
        }
        let granted = self.static_decision(right, |r| self.table_acl(table, r));
        if granted.is_allow() {
            return granted;
        }
        self.dynamic_decision(&table.dynacls, right)
    }

    fn column_right(&self, column: &Column, right: Right) -> Decision {
        let Some(table) = self.table_of(&column.table) else {
            warn!(table = %column.table, column = %column.name, "column without table, denying");
            return Decision::Deny;
        };
        if self.has_right(Target::Table(table), right).is_deny() {
            return Decision::Deny;
        }
        let granted = self.static_decision(right, |r| self.column_acl(table, column, r));
        if granted.is_allow() {
            return granted;
        }
        self.dynamic_decision(&table.dynacls.overlay(&column.dynacls), right)
    }

    /// All key columns must carry the right.
    fn unique_right(&self, unique: &Unique, right: Right) -> Decision {
        let Some(table) = self.table_of(&unique.table) else {
            warn!(table = %unique.table, key = %unique.columns, "key without table, denying");
            return Decision::Deny;
        };
        self.columns_right(table, unique.columns.iter(), right)
    }

    /// Columns must carry the right and at least one reference must too.
    fn foreign_key_right(&self, fk: &ForeignKey, right: Right) -> Decision {
        let Some(table) = self.table_of(&fk.table) else {
            warn!(table = %fk.table, key = %fk.columns, "foreign key without table, denying");
            return Decision::Deny;
        };
        let columns = self.columns_right(table, fk.columns.iter(), right);
        let references = fk
            .references
            .values()
            .map(|kr| self.has_right(Target::KeyReference(kr), right))
            .fold(Decision::Deny, Decision::or);
        columns.and(references)
    }

    fn keyref_right(&self, keyref: &KeyReference, right: Right) -> Decision {
        let Ok(referenced) = self.model.referenced_key(keyref) else {
            warn!(keyref = %keyref.id(), "reference to missing key, denying");
            return Decision::Deny;
        };
        if self.has_right(Target::Unique(referenced), Right::Enumerate).is_deny() {
            return Decision::Deny;
        }
        let Some(table) = self.table_of(&keyref.from_table) else {
            warn!(keyref = %keyref.id(), "reference from missing table, denying");
            return Decision::Deny;
        };
        for name in keyref.from_columns().iter() {
            let denied = table
                .column(name)
                .map_or(true, |c| self.has_right(Target::Column(c), right).is_deny());
            if denied {
                return Decision::Deny;
            }
        }
        let granted = self.static_decision(right, |r| self.keyref_acl(table, keyref, r));
        if granted.is_allow() {
            return granted;
        }
        self.dynamic_decision(&keyref.dynacls, right)
    }

    fn columns_right<'n>(&self, table: &Table, names: impl Iterator<Item = &'n String>, right: Right) -> Decision {
        names
            .map(|name| match table.column(name) {
                Ok(column) => self.has_right(Target::Column(column), right),
                Err(_) => Decision::Deny,
            })
            .fold(Decision::Allow, Decision::and)
    }

    /// Allow when any sufficient right's inherited ACL matches a role.
    fn static_decision<'s>(&self, right: Right, acl: impl Fn(Right) -> Option<&'s [String]>) -> Decision {
        let granted = right
            .sufficient()
            .iter()
            .any(|r| acl(*r).is_some_and(|members| roles_match(members, self.ctx.roles())));
        if granted {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }

    fn dynamic_decision(&self, dynacls: &Dynacls, right: Right) -> Decision {
        let possible = dynacls
            .iter()
            .filter_map(|(_, binding)| binding.as_enabled())
            .any(|b| b.grants(right) && b.in_scope(self.ctx.roles()));
        if possible {
            Decision::Indeterminate
        } else {
            Decision::Deny
        }
    }

    fn catalog_acl(&self, right: Right) -> Option<&'a [String]> {
        self.model.acls().get(right)
    }

    fn schema_acl<'s>(&'s self, schema: &'s Schema, right: Right) -> Option<&'s [String]> {
        own_acl(schema, right).or_else(|| self.catalog_acl(right))
    }

    fn table_acl<'s>(&'s self, table: &'s Table, right: Right) -> Option<&'s [String]> {
        own_acl(table, right).or_else(|| {
            self.schema_of(&table.schema)
                .and_then(|schema| self.schema_acl(schema, right))
        })
    }

    fn column_acl<'s>(&'s self, table: &'s Table, column: &'s Column, right: Right) -> Option<&'s [String]> {
        own_acl(column, right).or_else(|| self.table_acl(table, right))
    }

    fn keyref_acl<'s>(&'s self, table: &'s Table, keyref: &'s KeyReference, right: Right) -> Option<&'s [String]> {
        own_acl(keyref, right).or_else(|| self.table_acl(table, right))
    }

    fn schema_of(&self, name: &str) -> Option<&'a Schema> {
        if name == self.model.system_schema_name() {
            return Some(self.model.system_schema());
        }
        self.model.schema(name).ok()
    }

    pub(crate) fn table_of(&self, path: &TablePath) -> Option<&'a Table> {
        self.schema_of(&path.schema)
            .and_then(|schema| schema.tables.get(&path.table))
    }

    /// Whether a column needs its own per-row guard beyond table filtering.
    ///
    /// True when the column does not statically allow `right` and either
    /// the table does, or the column replaces any same-named table binding.
    /// A replacement can narrow or disable what the table filter grants, so
    /// the table filter alone no longer covers the column.
    pub fn dynauthz_restricted(&self, column: &Column, right: Right) -> bool {
        if self.has_right(Target::Column(column), right).is_allow() {
            return false;
        }
        let Some(table) = self.table_of(&column.table) else {
            return true;
        };
        if self.has_right(Target::Table(table), right).is_allow() {
            return true;
        }
        column.dynacls.iter().any(|(name, _)| table.dynacls.contains(name))
    }

    /// Rights reported alongside an entity when it is rendered.
    pub fn rights_summary(&self, target: Target<'_>) -> BTreeMap<Right, Decision> {
        let rights: &[Right] = match target {
            Target::Catalog | Target::Schema(_) => &[Right::Owner, Right::Create],
            Target::Table(_) => &[Right::Owner, Right::Insert, Right::Update, Right::Delete, Right::Select],
            Target::Column(_) => &[Right::Insert, Right::Update, Right::Delete, Right::Select],
            Target::KeyReference(_) => &[Right::Insert, Right::Update],
            Target::Unique(_) | Target::ForeignKey(_) => &[],
        };
        rights.iter().map(|r| (*r, self.has_right(target, *r))).collect()
    }

    /// Derived full-text column over the text columns the requester can
    /// see without row-level checks, in position order.
    pub fn freetext_column(&self, table: &Table) -> Column {
        let sources = table
            .columns()
            .filter(|c| c.is_text())
            .filter(|c| self.has_right(Target::Column(c), Right::Enumerate).is_allow())
            .map(|c| c.name.clone())
            .collect();
        Column::fulltext(table.path(), sources)
    }
}

fn own_acl<E: HasAcls>(entity: &E, right: Right) -> Option<&[String]> {
    if E::KIND.supports(right) {
        entity.acls().get(right)
    } else {
        None
    }
}
