//! Route registry.
//!
//! Binds reference templates to the entity (table or collection) that backs
//! them. The registry is built once from configuration and is read-only
//! afterwards.
//!
//! Entries live in an arena (`Vec<RouteEntry>`) and are reached through two
//! lookup tables:
//!
//! - short-ref → entry index, used when resolving queries
//! - (connection, entity) → collection-level templates, used when fanning
//!   out changes of realtime entities. Two connections may each have a table
//!   of the same name with unrelated templates.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LivequeryError, Result};
use crate::reference::{expand_paths, strip_mount_prefix, ConcreteRef, Template};
use crate::{Row, IDENTITY_FIELD};

/// Storage family backing a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbFamily {
    /// Relational table (PostgreSQL)
    #[serde(alias = "postgresql", alias = "sql")]
    Relational,
    /// Document collection (MongoDB)
    #[serde(alias = "mongodb")]
    Document,
}

impl DbFamily {
    /// Prefix used in family-specific error codes.
    pub fn code(&self) -> &'static str {
        match self {
            DbFamily::Relational => "SQL",
            DbFamily::Document => "MONGODB",
        }
    }
}

impl fmt::Display for DbFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbFamily::Relational => f.write_str("relational"),
            DbFamily::Document => f.write_str("document"),
        }
    }
}

/// How `search` is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// One `like` alternative per search field, each ANDed with the other
    /// conditions and ORed with each other
    FanOut,
    /// The store's own full-text predicate
    Native,
}

/// Default applied to a field when a row is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    /// Random v4 UUID rendered as a string
    Uuid,
    /// Current time in epoch milliseconds
    Now,
    /// Literal value
    Value(Value),
}

impl DefaultValue {
    fn materialize(&self) -> Value {
        match self {
            DefaultValue::Uuid => Value::String(uuid::Uuid::new_v4().to_string()),
            DefaultValue::Now => Value::from(chrono::Utc::now().timestamp_millis()),
            DefaultValue::Value(v) => v.clone(),
        }
    }
}

/// Field defaults of one entity, built at registration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityDefaults {
    fields: BTreeMap<String, DefaultValue>,
}

impl EntityDefaults {
    pub fn new(mut fields: BTreeMap<String, DefaultValue>) -> Self {
        fields
            .entry(IDENTITY_FIELD.to_string())
            .or_insert(DefaultValue::Uuid);
        Self { fields }
    }

    /// A fresh row holding every default.
    pub fn materialize(&self) -> Row {
        self.fields
            .iter()
            .map(|(field, default)| (field.clone(), default.materialize()))
            .collect()
    }

    pub fn fields(&self) -> &BTreeMap<String, DefaultValue> {
        &self.fields
    }
}

fn resolve_search_mode(config: &RouteConfig) -> SearchMode {
    config.search_mode.unwrap_or(if config.search_fields.is_empty() {
        SearchMode::Native
    } else {
        SearchMode::FanOut
    })
}

fn default_connection() -> String {
    "default".to_string()
}

/// Static route configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Reference templates (possibly mounted paths)
    pub refs: Vec<String>,

    /// Path prefixes combined with every ref
    #[serde(default)]
    pub prefixes: Vec<String>,

    /// Backing table or collection name
    pub entity: String,

    /// Logical connection name
    #[serde(default = "default_connection")]
    pub connection: String,

    /// Publish change events for this entity
    #[serde(default)]
    pub realtime: bool,

    /// Only reads are executed by the engine
    #[serde(default)]
    pub query_mapper_only: bool,

    /// Fields matched by `search`
    #[serde(default)]
    pub search_fields: Vec<String>,

    #[serde(default)]
    pub search_mode: Option<SearchMode>,

    /// Field defaults applied on `post`
    #[serde(default)]
    pub defaults: BTreeMap<String, DefaultValue>,
}

impl RouteConfig {
    pub fn new(refs: &[&str], entity: &str) -> Self {
        Self {
            refs: refs.iter().map(|r| r.to_string()).collect(),
            prefixes: Vec::new(),
            entity: entity.to_string(),
            connection: default_connection(),
            realtime: false,
            query_mapper_only: false,
            search_fields: Vec::new(),
            search_mode: None,
            defaults: BTreeMap::new(),
        }
    }

    pub fn realtime(mut self) -> Self {
        self.realtime = true;
        self
    }

    pub fn connection(mut self, connection: &str) -> Self {
        self.connection = connection.to_string();
        self
    }

    pub fn search_fields(mut self, fields: &[&str]) -> Self {
        self.search_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }
}

/// One registered route.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub short_ref: String,
    /// Every template registered under this short-ref, registration order
    pub templates: Vec<Template>,
    /// Backing table or collection name
    pub entity: String,
    pub family: DbFamily,
    pub connection: String,
    pub realtime: bool,
    pub query_mapper_only: bool,
    pub search_fields: Vec<String>,
    pub search_mode: SearchMode,
    pub defaults: EntityDefaults,
}

/// A concrete reference resolved against the registry.
#[derive(Debug, Clone)]
pub struct ResolvedRef<'a> {
    pub entry: &'a RouteEntry,
    pub keys: Row,
    pub is_collection: bool,
}

#[derive(Debug, Default)]
pub struct RouteRegistry {
    entries: Vec<RouteEntry>,
    by_short_ref: HashMap<String, usize>,
    realtime_by_entity: HashMap<(String, String), Vec<Template>>,
}

impl RouteRegistry {
    /// Build the registry.
    ///
    /// `connections` maps each logical connection name to the family of the
    /// store behind it. Fails on the first invalid template, unknown
    /// connection or conflicting short-ref.
    pub fn register(
        configs: &[RouteConfig],
        connections: &HashMap<String, DbFamily>,
        mount_prefix: &str,
    ) -> Result<Self> {
        let mut registry = RouteRegistry::default();

        for config in configs {
            let family = *connections
                .get(&config.connection)
                .ok_or_else(|| LivequeryError::ConnectionNotFound(config.connection.clone()))?;

            for path in expand_paths(&config.prefixes, &config.refs) {
                let template = Template::parse(strip_mount_prefix(&path, mount_prefix))?;
                registry.insert(config, family, template)?;
            }
        }

        tracing::debug!(
            "Registered {} routes, {} realtime entities",
            registry.entries.len(),
            registry.realtime_by_entity.len()
        );
        Ok(registry)
    }

    fn insert(&mut self, config: &RouteConfig, family: DbFamily, template: Template) -> Result<()> {
        let short_ref = template.short_ref();

        let index = match self.by_short_ref.get(&short_ref) {
            Some(&index) => {
                let entry = &mut self.entries[index];
                if entry.entity != config.entity || entry.connection != config.connection {
                    return Err(LivequeryError::DuplicateRoute {
                        short_ref,
                        existing: format!("{}@{}", entry.entity, entry.connection),
                        entity: format!("{}@{}", config.entity, config.connection),
                    });
                }
                let search_mode = resolve_search_mode(config);
                let conflict = if entry.query_mapper_only != config.query_mapper_only {
                    Some("query_mapper_only")
                } else if entry.search_fields != config.search_fields {
                    Some("search_fields")
                } else if entry.search_mode != search_mode {
                    Some("search_mode")
                } else if entry.defaults != EntityDefaults::new(config.defaults.clone()) {
                    Some("defaults")
                } else {
                    None
                };
                if let Some(setting) = conflict {
                    return Err(LivequeryError::ConflictingRoute {
                        short_ref,
                        setting: setting.to_string(),
                    });
                }
                if !entry.templates.contains(&template) {
                    entry.templates.push(template.clone());
                }
                // Realtime is the only setting merged across configs
                entry.realtime |= config.realtime;
                index
            }
            None => {
                let search_mode = resolve_search_mode(config);
                self.entries.push(RouteEntry {
                    short_ref: short_ref.clone(),
                    templates: vec![template.clone()],
                    entity: config.entity.clone(),
                    family,
                    connection: config.connection.clone(),
                    realtime: config.realtime,
                    query_mapper_only: config.query_mapper_only,
                    search_fields: config.search_fields.clone(),
                    search_mode,
                    defaults: EntityDefaults::new(config.defaults.clone()),
                });
                let index = self.entries.len() - 1;
                self.by_short_ref.insert(short_ref, index);
                index
            }
        };

        if config.realtime {
            let collection = template.parent_collection();
            let entry = &self.entries[index];
            let key = (entry.connection.clone(), entry.entity.clone());
            let templates = self.realtime_by_entity.entry(key).or_default();
            if !templates.contains(&collection) {
                templates.push(collection);
            }
        }

        Ok(())
    }

    pub fn resolve(&self, short_ref: &str) -> Result<&RouteEntry> {
        self.by_short_ref
            .get(short_ref)
            .map(|&index| &self.entries[index])
            .ok_or_else(|| LivequeryError::RefNotFound(short_ref.to_string()))
    }

    /// Resolve a concrete path and bind its key values.
    pub fn match_ref(&self, path: &str) -> Result<ResolvedRef<'_>> {
        let concrete = ConcreteRef::parse(path)?;
        let entry = self.resolve(&concrete.short_ref())?;
        let keys = entry
            .templates
            .iter()
            .find_map(|t| t.bind(&concrete))
            .ok_or_else(|| LivequeryError::RefNotFound(path.to_string()))?;
        Ok(ResolvedRef {
            entry,
            keys,
            is_collection: concrete.is_collection(),
        })
    }

    /// Collection-level templates of a realtime entity on one connection, in
    /// registration order.
    pub fn realtime_templates(&self, connection: &str, entity: &str) -> &[Template] {
        self.realtime_by_entity
            .get(&(connection.to_string(), entity.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Realtime entities served by one connection, each listed once.
    pub fn realtime_entities(&self, connection: &str) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for entry in self.entries.iter().filter(|e| e.realtime && e.connection == connection) {
            if !out.contains(&entry.entity.as_str()) {
                out.push(&entry.entity);
            }
        }
        out
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }
}
