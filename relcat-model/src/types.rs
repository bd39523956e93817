//! Column type representation

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use relcat_common::{CatalogConfig, Error, Result, TypePolicy};
use serde::{Deserialize, Serialize};
use serde_json::Value;

static SERIAL_DEFAULT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^nextval[(]'[^']+'::regclass[)]$").expect("static pattern")
});
static NULL_DEFAULT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^NULL::[a-z ]*").expect("static pattern"));
static CAST_DEFAULT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^['(](?P<val>.*)[')]::[a-z ]*").expect("static pattern"));

const INT_NAMES: &[&str] = &["int2", "int4", "int8", "smallint", "bigint", "integer", "int"];
const SERIAL_NAMES: &[&str] = &["serial2", "serial4", "serial8"];
const FLOAT_NAMES: &[&str] = &["float", "float4", "float8", "real", "double precision"];
const TEXT_NAMES: &[&str] = &["text", "character varying", "varchar", "char", "bpchar"];

/// Whether the default expression draws from a sequence.
pub fn is_serial_default(raw: &str) -> bool {
    SERIAL_DEFAULT.is_match(raw)
}

/// A column's logical type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "TypeDoc", try_from = "TypeDoc")]
pub enum ColumnType {
    Scalar { name: String },
    Array { base: Box<ColumnType> },
    Domain { name: String, base: Box<ColumnType> },
}

impl ColumnType {
    pub fn scalar(name: impl Into<String>) -> Self {
        Self::Scalar { name: name.into() }
    }

    pub fn array_of(base: ColumnType) -> Self {
        Self::Array {
            base: Box::new(base),
        }
    }

    pub fn text() -> Self {
        Self::scalar("text")
    }

    pub fn tsvector() -> Self {
        Self::scalar("tsvector")
    }

    /// Canonicalize a backend type spelling against the configured policy.
    ///
    /// `readonly` admits types that exist in a database but may not be
    /// requested for new columns.
    pub fn resolve(
        typename: &str,
        default: Option<&str>,
        config: &CatalogConfig,
        readonly: bool,
    ) -> Result<Self> {
        canonicalize_column_type(typename, default, config, readonly).map(Self::scalar)
    }

    pub fn name(&self) -> String {
        match self {
            Self::Scalar { name } | Self::Domain { name, .. } => name.clone(),
            Self::Array { base } => format!("{}[]", base.name()),
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array { .. })
    }

    pub fn is_domain(&self) -> bool {
        matches!(self, Self::Domain { .. })
    }

    /// Innermost non-domain scalar name.
    fn storage_name(&self) -> Option<&str> {
        match self {
            Self::Scalar { name } => Some(name),
            Self::Domain { base, .. } => base.storage_name(),
            Self::Array { .. } => None,
        }
    }

    pub fn is_text(&self) -> bool {
        self.storage_name()
            .is_some_and(|name| TEXT_NAMES.contains(&name) || name.starts_with("character"))
    }

    /// Type name for SQL. With `basic_storage`, serial types map to
    /// their integer storage type.
    pub fn sql(&self, basic_storage: bool) -> String {
        match self {
            Self::Scalar { name } if basic_storage => match name.as_str() {
                "serial2" => "int2".to_string(),
                "serial4" => "int4".to_string(),
                "serial8" => "int8".to_string(),
                other => other.to_string(),
            },
            Self::Scalar { name } | Self::Domain { name, .. } => name.clone(),
            Self::Array { base } => format!("{}[]", base.sql(basic_storage)),
        }
    }

    /// Render a JSON value as a SQL literal of this type.
    pub fn sql_literal(&self, value: &Value) -> Result<String> {
        let invalid = || Error::bad_data(format!("Invalid {}: \"{}\"", self.name(), value));
        if let Self::Array { base } = self {
            let items = value.as_array().ok_or_else(invalid)?;
            let parts = items
                .iter()
                .map(|item| base.sql_literal(item))
                .collect::<Result<Vec<_>>>()?;
            return Ok(format!("ARRAY[{}]::{}", parts.join(", "), self.sql(false)));
        }

        let name = self.name();
        if INT_NAMES.contains(&name.as_str()) || SERIAL_NAMES.contains(&name.as_str()) {
            let n = match value {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            };
            return n.map(|n| n.to_string()).ok_or_else(invalid);
        }
        if FLOAT_NAMES.contains(&name.as_str()) {
            let f = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            return f.map(|f| format!("{f:?}")).ok_or_else(invalid);
        }

        let text = match value {
            Value::String(s) if name != "json" && name != "jsonb" => s.clone(),
            other if name == "json" || name == "jsonb" => other.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            _ => return Err(invalid()),
        };
        Ok(format!(
            "{}::{}",
            crate::ident::sql_literal(&text),
            self.sql(false)
        ))
    }

    /// Translate a raw backend default expression into a logical value.
    ///
    /// Returns `Ok(None)` for absent, null, and sequence defaults. An
    /// expression that does not parse as this type is a `BadData` error.
    pub fn default_value(&self, raw: Option<&str>) -> Result<Option<Value>> {
        let Some(raw) = raw.filter(|r| !r.is_empty()) else {
            return Ok(None);
        };
        match self {
            Self::Array { base } => {
                if let Some(inner) = raw.strip_prefix("ARRAY[").and_then(|r| r.strip_suffix(']'))
                {
                    let items = inner
                        .split(',')
                        .map(|part| base.default_value(Some(part.trim())))
                        .collect::<Result<Vec<_>>>()?;
                    Ok(Some(Value::Array(
                        items.into_iter().map(|v| v.unwrap_or(Value::Null)).collect(),
                    )))
                } else {
                    base.default_value(Some(raw))
                }
            }
            Self::Domain { base, .. } => base.default_value(Some(raw)),
            Self::Scalar { name } => scalar_default(name, raw),
        }
    }
}

fn scalar_default(name: &str, raw: &str) -> Result<Option<Value>> {
    if is_serial_default(raw) && name.contains("serial") {
        return Ok(None);
    }
    if NULL_DEFAULT.is_match(raw) {
        return Ok(None);
    }

    let unwrapped = CAST_DEFAULT
        .captures(raw)
        .and_then(|caps| caps.name("val"))
        .map_or_else(|| raw.to_string(), |m| m.as_str().replace("''", "'"));
    let bad = || Error::bad_data(format!("Invalid {name} default: {raw}"));

    let value = if INT_NAMES.contains(&name) {
        Value::from(unwrapped.trim().parse::<i64>().map_err(|_| bad())?)
    } else if FLOAT_NAMES.contains(&name) {
        let f = unwrapped.trim().parse::<f64>().map_err(|_| bad())?;
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(bad)?
    } else if name == "bool" || name == "boolean" {
        Value::Bool(unwrapped.eq_ignore_ascii_case("true"))
    } else if name == "json" || name == "jsonb" {
        serde_json::from_str(&unwrapped).map_err(|_| bad())?
    } else {
        Value::String(unwrapped)
    };
    Ok(Some(value))
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Resolve `typename` to its preferred spelling, or `ConflictData`.
pub fn canonicalize_column_type(
    typename: &str,
    default: Option<&str>,
    config: &CatalogConfig,
    readonly: bool,
) -> Result<String> {
    if let Some(name) = match_type(typename, default, &config.column_types) {
        return Ok(name);
    }
    if readonly {
        if let Some(name) = match_type(typename, default, &config.column_types_readonly) {
            return Ok(name);
        }
    }
    Err(Error::ConflictData(format!("Unsupported type \"{typename}\"")))
}

fn match_type(typename: &str, default: Option<&str>, policy: &TypePolicy) -> Option<String> {
    let preferred = policy.canonical(typename)?;
    // integer columns fed by a sequence are reported as serial types
    if default.is_some_and(is_serial_default) {
        let serial = match preferred {
            "int2" | "smallint" => Some("serial2"),
            "int4" | "integer" | "int" => Some("serial4"),
            "int8" | "bigint" => Some("serial8"),
            _ => None,
        };
        if let Some(serial) = serial {
            return policy.canonical(serial).map(str::to_string);
        }
    }
    Some(preferred.to_string())
}

/// Declarative type document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDoc {
    pub typename: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_array: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_domain: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_type: Option<Box<TypeDoc>>,
}

impl TypeDoc {
    /// Build a type from a client document, canonicalizing every scalar.
    pub fn build(&self, config: &CatalogConfig, readonly: bool) -> Result<ColumnType> {
        if self.is_array {
            let base = self
                .base_type
                .as_ref()
                .ok_or_else(|| Error::bad_data("Array type document missing base_type"))?;
            return Ok(ColumnType::array_of(base.build(config, readonly)?));
        }
        let name = canonicalize_column_type(&self.typename, None, config, readonly)?;
        if self.is_domain {
            let base = self
                .base_type
                .as_ref()
                .ok_or_else(|| Error::bad_data("Domain type document missing base_type"))?;
            return Ok(ColumnType::Domain {
                name,
                base: Box::new(base.build(config, readonly)?),
            });
        }
        Ok(ColumnType::scalar(name))
    }
}

impl From<ColumnType> for TypeDoc {
    fn from(ctype: ColumnType) -> Self {
        let typename = ctype.name();
        match ctype {
            ColumnType::Scalar { .. } => Self {
                typename,
                is_array: false,
                is_domain: false,
                base_type: None,
            },
            ColumnType::Array { base } => Self {
                typename,
                is_array: true,
                is_domain: false,
                base_type: Some(Box::new((*base).into())),
            },
            ColumnType::Domain { base, .. } => Self {
                typename,
                is_array: false,
                is_domain: true,
                base_type: Some(Box::new((*base).into())),
            },
        }
    }
}

impl TryFrom<TypeDoc> for ColumnType {
    type Error = String;

    fn try_from(doc: TypeDoc) -> std::result::Result<Self, Self::Error> {
        let base = match doc.base_type {
            Some(base) => Some(Box::new(ColumnType::try_from(*base)?)),
            None => None,
        };
        match (doc.is_array, doc.is_domain, base) {
            (true, _, Some(base)) => Ok(Self::Array { base }),
            (false, true, Some(base)) => Ok(Self::Domain {
                name: doc.typename,
                base,
            }),
            (false, false, _) => Ok(Self::Scalar { name: doc.typename }),
            _ => Err(format!("type {} missing base_type", doc.typename)),
        }
    }
}
