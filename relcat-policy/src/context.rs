//! Request-scoped evaluation context

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use relcat_model::ident::sql_text_array;
use relcat_model::{ColumnSet, KeyRefId, Right, TablePath};

/// Decision of the rights engine for one entity and right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    Allow,
    Deny,
    /// Only row-level policy can decide.
    Indeterminate,
}

impl Decision {
    pub fn is_allow(self) -> bool {
        self == Decision::Allow
    }

    pub fn is_deny(self) -> bool {
        self == Decision::Deny
    }

    /// Weaker of two decisions.
    pub fn and(self, other: Decision) -> Decision {
        match (self, other) {
            (Decision::Deny, _) | (_, Decision::Deny) => Decision::Deny,
            (Decision::Allow, Decision::Allow) => Decision::Allow,
            _ => Decision::Indeterminate,
        }
    }

    /// Stronger of two decisions.
    pub fn or(self, other: Decision) -> Decision {
        match (self, other) {
            (Decision::Allow, _) | (_, Decision::Allow) => Decision::Allow,
            (Decision::Deny, Decision::Deny) => Decision::Deny,
            _ => Decision::Indeterminate,
        }
    }

    /// `true`, `false`, or `None` for row-dependent.
    pub fn as_tristate(self) -> Option<bool> {
        match self {
            Decision::Allow => Some(true),
            Decision::Deny => Some(false),
            Decision::Indeterminate => None,
        }
    }
}

/// Memo identity of a governed entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Catalog,
    Schema(String),
    Table(TablePath),
    Column(TablePath, String),
    Unique(TablePath, ColumnSet),
    ForeignKey(TablePath, ColumnSet),
    KeyReference(KeyRefId),
}

type MemoKey = (u64, EntityKey, Right);

/// Requesting roles plus a private decision memo.
///
/// Decisions are keyed by the model stamp, so a context reused across
/// snapshots never answers from an older model. Switching snapshots drops
/// the older entries. In-place edits to a model keep its stamp and need
/// [`EvaluationContext::reset`].
#[derive(Debug, Default)]
pub struct EvaluationContext {
    roles: BTreeSet<String>,
    memo: DashMap<MemoKey, Decision>,
    bound: AtomicU64,
}

impl EvaluationContext {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            memo: DashMap::new(),
            bound: AtomicU64::new(0),
        }
    }

    /// Context with no roles; only wildcard ACLs match.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    /// Requesting roles as a `text[]` literal.
    pub fn roles_sql(&self) -> String {
        let roles: Vec<String> = self.roles.iter().cloned().collect();
        sql_text_array(&roles)
    }

    /// Attach the context to the model with `stamp`.
    pub(crate) fn bind(&self, stamp: u64) {
        let previous = self.bound.swap(stamp, Ordering::AcqRel);
        if previous != stamp {
            self.memo.retain(|(s, _, _), _| *s == stamp);
        }
    }

    pub(crate) fn cached(&self, key: &MemoKey) -> Option<Decision> {
        self.memo.get(key).map(|d| *d)
    }

    pub(crate) fn remember(&self, key: MemoKey, decision: Decision) -> Decision {
        self.memo.insert(key, decision);
        decision
    }

    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }

    /// Drop memoized decisions, e.g. after the model snapshot changed.
    pub fn reset(&self) {
        self.memo.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_sql() {
        let ctx = EvaluationContext::new(["b", "a'x"]);
        assert_eq!(ctx.roles_sql(), "ARRAY['a''x', 'b']::text[]");
        assert_eq!(EvaluationContext::anonymous().roles_sql(), "ARRAY[]::text[]");
    }

    #[test]
    fn test_memo_roundtrip() {
        let ctx = EvaluationContext::new(["a"]);
        let key = (1, EntityKey::Catalog, Right::Select);
        assert_eq!(ctx.cached(&key), None);
        ctx.remember(key.clone(), Decision::Allow);
        assert_eq!(ctx.cached(&key), Some(Decision::Allow));
        ctx.reset();
        assert_eq!(ctx.memo_len(), 0);
    }

    #[test]
    fn test_rebinding_drops_other_models() {
        let ctx = EvaluationContext::new(["a"]);
        ctx.bind(1);
        ctx.remember((1, EntityKey::Catalog, Right::Select), Decision::Allow);
        ctx.bind(1);
        assert_eq!(ctx.memo_len(), 1);
        ctx.bind(2);
        assert_eq!(ctx.memo_len(), 0);
        assert_eq!(ctx.cached(&(2, EntityKey::Catalog, Right::Select)), None);
    }

    #[test]
    fn test_tristate() {
        assert_eq!(Decision::Allow.as_tristate(), Some(true));
        assert_eq!(Decision::Indeterminate.as_tristate(), None);
    }
}
