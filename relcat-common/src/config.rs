//! Configuration types for the relational catalog core

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration for a catalog instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Catalog naming configuration
    pub catalog: CatalogSection,
    /// Introspection behaviour
    pub introspection: IntrospectionConfig,
    /// Column types accepted for new and introspected columns
    pub column_types: TypePolicy,
    /// Column types accepted only for introspected columns
    pub column_types_readonly: TypePolicy,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            catalog: CatalogSection::default(),
            introspection: IntrospectionConfig::default(),
            column_types: TypePolicy::default(),
            column_types_readonly: TypePolicy::readonly(),
            logging: LoggingConfig::default(),
        }
    }
}

impl CatalogConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.catalog.system_schema.is_empty() {
            return Err(Error::Config("catalog.system_schema must not be empty".into()));
        }
        if self.catalog.max_identifier_length < 16 {
            return Err(Error::Config(format!(
                "catalog.max_identifier_length {} is too small",
                self.catalog.max_identifier_length
            )));
        }
        for (name, alias) in self
            .column_types
            .iter()
            .chain(self.column_types_readonly.iter())
        {
            for pattern in &alias.regexps {
                regex::Regex::new(pattern).map_err(|e| {
                    Error::Config(format!("bad type pattern for {name}: {e}"))
                })?;
            }
        }
        Ok(())
    }
}

/// Catalog naming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSection {
    /// Schema holding annotation, ACL and value-map storage
    pub system_schema: String,
    /// Backend-internal schemas never exposed in the model
    pub excluded_schemas: Vec<String>,
    /// Maximum identifier length of the backend, in bytes
    pub max_identifier_length: usize,
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self {
            system_schema: "_ermrest".to_string(),
            excluded_schemas: vec![
                "pg_catalog".to_string(),
                "information_schema".to_string(),
                "pg_toast".to_string(),
            ],
            max_identifier_length: 63,
        }
    }
}

/// Introspection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntrospectionConfig {
    /// Synthesize the value map when the backend lacks it
    pub create_missing_value_map: bool,
    /// Read stored ACL and dynacl tables in addition to annotations
    pub load_policy: bool,
}

impl Default for IntrospectionConfig {
    fn default() -> Self {
        Self {
            create_missing_value_map: true,
            load_policy: true,
        }
    }
}

/// Aliases for one canonical type name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeAliases {
    pub aliases: Vec<String>,
    pub regexps: Vec<String>,
}

impl TypeAliases {
    fn of(aliases: &[&str]) -> Self {
        Self {
            aliases: aliases.iter().map(|s| (*s).to_string()).collect(),
            regexps: Vec::new(),
        }
    }
}

/// Canonical type name → accepted spellings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypePolicy(pub BTreeMap<String, TypeAliases>);

impl TypePolicy {
    pub fn iter(&self) -> impl Iterator<Item = (&String, &TypeAliases)> {
        self.0.iter()
    }

    /// Resolve a backend type spelling to its canonical name.
    pub fn canonical(&self, typename: &str) -> Option<&str> {
        if let Some((name, _)) = self.0.get_key_value(typename) {
            return Some(name.as_str());
        }
        self.0.iter().find_map(|(name, alias)| {
            let matched = alias.aliases.iter().any(|a| a == typename)
                || alias.regexps.iter().any(|pattern| {
                    regex::Regex::new(pattern)
                        .map(|re| re.is_match(typename))
                        .unwrap_or(false)
                });
            matched.then_some(name.as_str())
        })
    }

    /// Types the read-only policy accepts for introspected columns.
    pub fn readonly() -> Self {
        let mut map = BTreeMap::new();
        map.insert("json".to_string(), TypeAliases::default());
        map.insert("tsvector".to_string(), TypeAliases::default());
        map.insert(
            "text".to_string(),
            TypeAliases {
                aliases: ["char", "bpchar", "varchar"]
                    .iter()
                    .map(|s| (*s).to_string())
                    .collect(),
                regexps: vec!["^(text|character)( +varying)?( *[(][0-9]+[)])?$".to_string()],
            },
        );
        map.insert(
            "timestamp".to_string(),
            TypeAliases::of(&["timestamp without time zone"]),
        );
        Self(map)
    }
}

impl Default for TypePolicy {
    fn default() -> Self {
        let entries: [(&str, &[&str]); 15] = [
            ("boolean", &["bool"]),
            ("date", &[]),
            ("float4", &["real"]),
            ("float8", &["double precision"]),
            ("int2", &["smallint"]),
            ("int4", &["integer", "int"]),
            ("int8", &["bigint"]),
            ("interval", &[]),
            ("jsonb", &[]),
            ("serial2", &["smallserial"]),
            ("serial4", &["serial"]),
            ("serial8", &["bigserial"]),
            ("text", &["character varying"]),
            ("timestamptz", &["timestamp with time zone"]),
            ("uuid", &[]),
        ];
        Self(
            entries
                .iter()
                .map(|(name, aliases)| ((*name).to_string(), TypeAliases::of(aliases)))
                .collect(),
        )
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
