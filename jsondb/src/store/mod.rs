use crate::collection::{encode_rows, parse_rows, Collection};
use crate::config::{CollectionConfig, StoreConfig};
use crate::error::{JsonDbError, Result};
use crate::fs::{run_blocking, Filesystem, LocalFs};
use crate::validation::{SchemaValidator, Validator};
use crate::writer::WriteQueue;
use chrono::Utc;
use futures_util::future::try_join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The main entry point: a root directory of collection files.
///
/// Every declared collection is loaded before [`Store::open`] returns, so
/// a `Store` value always holds ready collections.
pub struct Store {
    root: PathBuf,
    collections: HashMap<String, Collection>,
    writer: WriteQueue,
}

impl Store {
    /// Open a store on the local disk with the built-in schema validator.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        Self::open_with(config, Arc::new(LocalFs), Arc::new(SchemaValidator)).await
    }

    /// Open a store with an explicit filesystem and validator.
    ///
    /// Creates the root directory if needed, then loads every declared
    /// collection concurrently, creating missing files from their default
    /// body.
    pub async fn open_with(
        config: StoreConfig,
        fs: Arc<dyn Filesystem>,
        validator: Arc<dyn Validator>,
    ) -> Result<Self> {
        config.validate()?;
        let root = config.root.clone();
        log::info!("Opening store at {}", root.display());

        {
            let fs = Arc::clone(&fs);
            let root = root.clone();
            run_blocking(move || {
                if fs.exists(&root) {
                    Ok(())
                } else {
                    fs.make_directory(&root)
                }
            })
            .await?;
        }

        let writer = WriteQueue::new(fs);
        let loaded = try_join_all(config.collections.iter().map(|declared| {
            load_collection(&root, &config.default_body, declared, &writer, &validator)
        }))
        .await?;

        let collections = loaded
            .into_iter()
            .map(|collection| (collection.name().to_string(), collection))
            .collect();

        Ok(Store {
            root,
            collections,
            writer,
        })
    }

    /// Get a collection by name.
    pub fn collection(&self, name: &str) -> Result<&Collection> {
        self.collections
            .get(name)
            .ok_or_else(|| JsonDbError::CollectionNotFound(name.to_string()))
    }

    /// Names of all loaded collections, sorted.
    pub fn collection_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.collections.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Get the root data directory path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Wait until every write queued so far, in every collection, has
    /// completed.
    pub async fn flush_all(&self) -> Result<()> {
        try_join_all(self.collections.values().map(Collection::flush)).await?;
        Ok(())
    }

    /// Copy a collection's backing file to `destination` once its queued
    /// writes have landed.
    pub async fn backup(&self, name: &str, destination: &Path) -> Result<()> {
        let collection = self.collection(name)?;
        collection.flush().await?;

        let fs = Arc::clone(self.writer.filesystem());
        let source = collection.path().to_path_buf();
        let destination = destination.to_path_buf();
        log::info!("Backing up {} to {}", source.display(), destination.display());
        run_blocking(move || fs.copy_file(&destination, &source)).await
    }

    /// Detach a collection and delete its backing file.
    pub async fn drop_collection(&mut self, name: &str) -> Result<()> {
        let collection = self
            .collections
            .remove(name)
            .ok_or_else(|| JsonDbError::CollectionNotFound(name.to_string()))?;
        collection.flush().await?;

        let fs = Arc::clone(self.writer.filesystem());
        let path = collection.path().to_path_buf();
        log::info!("Dropping collection '{name}' ({})", path.display());
        run_blocking(move || fs.remove_file(&path)).await
    }

    /// Root path, per-collection row counts and delete policy.
    pub fn status(&self) -> Value {
        let mut collections = serde_json::Map::new();
        for name in self.collection_names() {
            let collection = &self.collections[name];
            let rows = collection.rows();
            let deleted = rows
                .iter()
                .filter(|row| row.get(crate::collection::DELETED_FIELD) == Some(&Value::Bool(true)))
                .count();
            collections.insert(
                name.to_string(),
                serde_json::json!({
                    "file": collection.path().display().to_string(),
                    "rows": rows.len(),
                    "deleted": deleted,
                    "physical_deletion": collection.physical_deletion(),
                    "schema": collection.schema().is_some(),
                }),
            );
        }

        serde_json::json!({
            "root": self.root.display().to_string(),
            "collections": collections,
        })
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("root", &self.root)
            .field("collections", &self.collection_names())
            .finish()
    }
}

/// Backing file of collection `name`.
pub fn collection_path(root: &Path, name: &str) -> PathBuf {
    root.join(format!("{name}.json"))
}

/// Ensure the file exists, read it, and build the in-memory collection.
async fn load_collection(
    root: &Path,
    default_body: &Value,
    declared: &CollectionConfig,
    writer: &WriteQueue,
    validator: &Arc<dyn Validator>,
) -> Result<Collection> {
    let path = collection_path(root, &declared.name);
    let fs = Arc::clone(writer.filesystem());

    let existed = {
        let fs = Arc::clone(&fs);
        let path = path.clone();
        run_blocking(move || Ok(fs.exists(&path))).await?
    };

    let bytes = if existed {
        let fs = Arc::clone(&fs);
        let path = path.clone();
        run_blocking(move || fs.read_file(&path)).await?
    } else {
        let body = serde_json::to_vec(declared.default.as_ref().unwrap_or(default_body))?;
        log::info!("Creating collection file {}", path.display());
        writer.enqueue_write(path.clone(), body.clone()).await?;
        body
    };

    let rows = match parse_rows(&bytes) {
        Ok(rows) => rows,
        Err(e) => {
            log::warn!(
                "{} is not a valid collection file ({e}); resetting it to an empty collection",
                path.display()
            );
            if existed {
                preserve_unparseable(&fs, root, &declared.name, &path).await?;
            }
            writer.enqueue_write(path.clone(), encode_rows(&[])?).await?;
            Vec::new()
        }
    };

    log::debug!("Loaded collection '{}' with {} rows", declared.name, rows.len());
    Ok(Collection::new(&declared.name, path, rows, writer.clone(), Arc::clone(validator))
        .with_schema(declared.schema.clone())
        .with_physical_deletion(declared.physical_deletion))
}

/// Copy an unparseable collection file aside before it is reset.
async fn preserve_unparseable(
    fs: &Arc<dyn Filesystem>,
    root: &Path,
    name: &str,
    path: &Path,
) -> Result<()> {
    let backup = root.join(format!("{name}.corrupt-{}.json", Utc::now().timestamp()));
    log::warn!("Preserving unparseable {} as {}", path.display(), backup.display());

    let fs = Arc::clone(fs);
    let source = path.to_path_buf();
    run_blocking(move || fs.copy_file(&backup, &source)).await
}
