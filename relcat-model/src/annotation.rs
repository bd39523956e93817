//! URI-keyed annotations

use std::collections::BTreeMap;

use relcat_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Annotations(BTreeMap<String, Value>);

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, uri: &str) -> Result<&Value> {
        self.0
            .get(uri)
            .ok_or_else(|| Error::not_found(format!("annotation \"{uri}\"")))
    }

    /// Set an annotation, returning the previous value.
    pub fn set(&mut self, uri: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(uri.into(), value)
    }

    pub fn remove(&mut self, uri: &str) -> Result<Value> {
        self.0
            .remove(uri)
            .ok_or_else(|| Error::not_found(format!("annotation \"{uri}\"")))
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl FromIterator<(String, Value)> for Annotations {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

pub trait HasAnnotations {
    fn annotations(&self) -> &Annotations;
    fn annotations_mut(&mut self) -> &mut Annotations;
}
