use crate::error::{JsonDbError, Result};
use crate::schema::{parse_schema, Schema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Body written to a collection file that does not exist yet.
pub fn default_body() -> Value {
    json!({ "rows": [] })
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

/// Everything needed to open a [`Store`](crate::Store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding one `<name>.json` file per collection.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Initial body for collections that declare no `default` of their own.
    #[serde(default = "default_body")]
    pub default_body: Value,
    #[serde(default)]
    pub collections: Vec<CollectionConfig>,
}

/// Declaration of a single collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
    /// Load the schema from a JSON or YAML file instead of inlining it.
    /// Relative paths resolve against the config file's directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_file: Option<PathBuf>,
    /// Initial file body, overriding the store-wide `default_body`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub physical_deletion: bool,
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StoreConfig {
            root: root.into(),
            default_body: default_body(),
            collections: Vec::new(),
        }
    }

    pub fn collection(mut self, collection: CollectionConfig) -> Self {
        self.collections.push(collection);
        self
    }

    pub fn with_default_body(mut self, body: Value) -> Self {
        self.default_body = body;
        self
    }

    /// Parse a config from a YAML string. Relative paths are kept as-is.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: StoreConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Parse a config file. The root directory and schema files resolve
    /// relative to the file's directory, and schema files are loaded.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            JsonDbError::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        let mut config = Self::from_yaml_str(&content)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        if config.root.is_relative() {
            config.root = base.join(&config.root);
        }
        for collection in &mut config.collections {
            collection.resolve_schema_file(base)?;
        }
        Ok(config)
    }

    /// Check collection declarations before anything touches disk.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for collection in &self.collections {
            validate_name(&collection.name)?;
            if !seen.insert(collection.name.as_str()) {
                return Err(JsonDbError::Config(format!(
                    "Collection '{}' is declared more than once",
                    collection.name
                )));
            }
            if collection.schema.is_some() && collection.schema_file.is_some() {
                return Err(JsonDbError::Config(format!(
                    "Collection '{}' sets both schema and schema_file",
                    collection.name
                )));
            }
        }
        Ok(())
    }
}

impl CollectionConfig {
    pub fn new(name: impl Into<String>) -> Self {
        CollectionConfig {
            name: name.into(),
            ..CollectionConfig::default()
        }
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_default(mut self, body: Value) -> Self {
        self.default = Some(body);
        self
    }

    pub fn physical_deletion(mut self, enabled: bool) -> Self {
        self.physical_deletion = enabled;
        self
    }

    fn resolve_schema_file(&mut self, base: &Path) -> Result<()> {
        let Some(file) = &self.schema_file else {
            return Ok(());
        };
        if self.schema.is_some() {
            // Reported by validate()
            return Ok(());
        }
        let file = if file.is_relative() { base.join(file) } else { file.clone() };
        let schema = parse_schema(&file).map_err(|e| {
            JsonDbError::Config(format!(
                "Failed to load schema for '{}' from {}: {e}",
                self.name,
                file.display()
            ))
        })?;
        self.schema = Some(schema);
        self.schema_file = None;
        Ok(())
    }
}

/// Collection names become file names, so they must stay inside the root.
fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(JsonDbError::Config(format!("Invalid collection name '{name}'")));
    }
    Ok(())
}
