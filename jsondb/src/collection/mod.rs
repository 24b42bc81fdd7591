use crate::error::{JsonDbError, Result, ValidationErrors};
use crate::filter::Filter;
use crate::schema::Schema;
use crate::validation::{ValidationMode, Validator};
use crate::writer::{WriteQueue, WriteTicket};
use chrono::Utc;
use futures_util::future::{self, BoxFuture, FutureExt};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One document in a collection: an open JSON object.
pub type Record = Map<String, Value>;

/// Result of a mutating collection operation. The in-memory change has
/// already happened when the future is returned; it resolves once the
/// change reached disk.
pub type Pending<T> = BoxFuture<'static, Result<T>>;

/// Insert timestamp (seconds since the Unix epoch), added by the engine.
pub const CREATED_FIELD: &str = "created";
/// Soft-delete marker, added by the engine as `false`.
pub const DELETED_FIELD: &str = "isDelete";

#[derive(Deserialize)]
struct RowsFile {
    rows: Vec<Record>,
}

#[derive(Serialize)]
struct RowsFileRef<'a> {
    rows: &'a [Record],
}

/// Decode a backing file body of the form `{"rows": [...]}`.
pub fn parse_rows(bytes: &[u8]) -> Result<Vec<Record>> {
    let file: RowsFile = serde_json::from_slice(bytes)?;
    Ok(file.rows)
}

/// Encode rows as a backing file body.
pub fn encode_rows(rows: &[Record]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&RowsFileRef { rows })?)
}

/// A named, file-backed, ordered set of records.
///
/// Mutations apply to the in-memory rows synchronously, then queue a
/// rewrite of the whole backing file. Reads return owned snapshots of the
/// stored records.
pub struct Collection {
    name: String,
    path: PathBuf,
    schema: Option<Schema>,
    physical_deletion: bool,
    rows: RwLock<Vec<Record>>,
    writer: WriteQueue,
    validator: Arc<dyn Validator>,
}

impl Collection {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        rows: Vec<Record>,
        writer: WriteQueue,
        validator: Arc<dyn Validator>,
    ) -> Self {
        Collection {
            name: name.into(),
            path: path.into(),
            schema: None,
            physical_deletion: false,
            rows: RwLock::new(rows),
            writer,
            validator,
        }
    }

    pub fn with_schema(mut self, schema: Option<Schema>) -> Self {
        self.schema = schema;
        self
    }

    /// When set, removals excise records instead of marking them deleted.
    pub fn with_physical_deletion(mut self, physical_deletion: bool) -> Self {
        self.physical_deletion = physical_deletion;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    pub fn physical_deletion(&self) -> bool {
        self.physical_deletion
    }

    /// Number of rows, soft-deleted ones included.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// A snapshot of every row in order.
    pub fn rows(&self) -> Vec<Record> {
        self.rows.read().clone()
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// The first record matching `filter`, in insertion order.
    pub fn find(&self, filter: impl Into<Filter>) -> Option<Record> {
        let filter = filter.into();
        self.rows.read().iter().find(|row| filter.matches(row)).cloned()
    }

    /// Every record matching `filter`, in insertion order.
    pub fn find_all(&self, filter: impl Into<Filter>) -> Vec<Record> {
        let filter = filter.into();
        self.rows
            .read()
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect()
    }

    /// Index of the first record matching `filter`.
    ///
    /// Records carry no identity of their own, so an index is the only
    /// way to address one of several equal records. Indexes shift when a
    /// record is excised; use them before the next removal.
    pub fn position(&self, filter: impl Into<Filter>) -> Option<usize> {
        let filter = filter.into();
        self.rows.read().iter().position(|row| filter.matches(row))
    }

    /// Indexes of every record matching `filter`, ascending.
    pub fn positions(&self, filter: impl Into<Filter>) -> Vec<usize> {
        let filter = filter.into();
        self.rows
            .read()
            .iter()
            .enumerate()
            .filter(|(_, row)| filter.matches(row))
            .map(|(index, _)| index)
            .collect()
    }

    /// Like [`find`](Self::find), deserialized into `T`.
    pub fn find_as<T: DeserializeOwned>(&self, filter: impl Into<Filter>) -> Result<Option<T>> {
        self.find(filter)
            .map(|row| serde_json::from_value(Value::Object(row)))
            .transpose()
            .map_err(JsonDbError::from)
    }

    /// Like [`find_all`](Self::find_all), deserialized into `T`.
    pub fn find_all_as<T: DeserializeOwned>(&self, filter: impl Into<Filter>) -> Result<Vec<T>> {
        self.find_all(filter)
            .into_iter()
            .map(|row| serde_json::from_value(Value::Object(row)).map_err(JsonDbError::from))
            .collect()
    }

    // ── Inserts ────────────────────────────────────────────────────

    /// Validate and append one record. Resolves with `value` as given.
    pub fn insert(&self, value: Value) -> Pending<Value> {
        let record = match self.prepare_insert(&value) {
            Ok(record) => record,
            Err(e) => return rejected(e),
        };

        let ticket = {
            let mut rows = self.rows.write();
            rows.push(record);
            self.persist(&rows)
        };

        async move {
            ticket.await?;
            Ok::<_, JsonDbError>(value)
        }
        .boxed()
    }

    /// Serialize `value` and insert it.
    pub fn insert_typed<T: Serialize>(&self, value: &T) -> Pending<Value> {
        match serde_json::to_value(value) {
            Ok(value) => self.insert(value),
            Err(e) => rejected(e.into()),
        }
    }

    /// Validate every value, then append them all with a single flush.
    /// If any value fails, nothing is appended and the error lists the
    /// issues of every failing value under `[index]`.
    pub fn insert_many(&self, values: Vec<Value>) -> Pending<Vec<Value>> {
        let mut records = Vec::with_capacity(values.len());
        let mut errors = ValidationErrors::new();
        for (i, value) in values.iter().enumerate() {
            match self.prepare_insert(value) {
                Ok(record) => records.push(record),
                Err(JsonDbError::Validation(e)) => errors.extend(e.prefixed(&format!("[{i}]"))),
                Err(e) => return rejected(e),
            }
        }
        if !errors.is_empty() {
            return rejected(errors.into());
        }
        if records.is_empty() {
            return resolved(values);
        }

        let ticket = {
            let mut rows = self.rows.write();
            rows.extend(records);
            self.persist(&rows)
        };

        async move {
            ticket.await?;
            Ok::<_, JsonDbError>(values)
        }
        .boxed()
    }

    fn prepare_insert(&self, value: &Value) -> Result<Record> {
        if let Some(schema) = &self.schema {
            self.validator.validate(schema, value, ValidationMode::Full)?;
        }
        let fields = as_record(value)?;

        let mut record = self
            .schema
            .as_ref()
            .map(Schema::record_defaults)
            .unwrap_or_default();
        for (key, field) in fields {
            record.insert(key.clone(), field.clone());
        }
        record.insert(CREATED_FIELD.to_string(), Value::from(Utc::now().timestamp()));
        record.insert(DELETED_FIELD.to_string(), Value::Bool(false));
        Ok(record)
    }

    // ── Removals ───────────────────────────────────────────────────

    /// Delete the first record matching `filter`.
    ///
    /// The record is excised when the collection uses physical deletion
    /// or `physical_deletion` is true; otherwise it is marked
    /// `isDelete: true` and stays in place. Resolves with the record, or
    /// `None` without touching disk if nothing matched.
    pub fn remove(&self, filter: impl Into<Filter>, physical_deletion: bool) -> Pending<Option<Record>> {
        let filter = filter.into();
        self.remove_located(physical_deletion, |rows| {
            rows.iter().position(|row| filter.matches(row))
        })
    }

    /// Delete the record at `index`, with the same policy as
    /// [`remove`](Self::remove). Resolves with `None` without touching
    /// disk if `index` is out of range.
    pub fn remove_at(&self, index: usize, physical_deletion: bool) -> Pending<Option<Record>> {
        self.remove_located(physical_deletion, |rows| (index < rows.len()).then_some(index))
    }

    fn remove_located<F>(&self, physical_deletion: bool, locate: F) -> Pending<Option<Record>>
    where
        F: FnOnce(&[Record]) -> Option<usize>,
    {
        let excise = self.physical_deletion || physical_deletion;

        let (removed, ticket) = {
            let mut rows = self.rows.write();
            let Some(index) = locate(&rows) else {
                return resolved(None);
            };
            let removed = if excise {
                rows.remove(index)
            } else {
                mark_deleted(&mut rows[index]);
                rows[index].clone()
            };
            (removed, self.persist(&rows))
        };

        async move {
            ticket.await?;
            Ok::<_, JsonDbError>(Some(removed))
        }
        .boxed()
    }

    /// Delete every record matching `filter`, with the same policy as
    /// [`remove`](Self::remove). Resolves with the affected records.
    pub fn remove_all(&self, filter: impl Into<Filter>, physical_deletion: bool) -> Pending<Vec<Record>> {
        let filter = filter.into();
        let excise = self.physical_deletion || physical_deletion;

        let (removed, ticket) = {
            let mut rows = self.rows.write();
            let removed = if excise {
                let (removed, kept): (Vec<Record>, Vec<Record>) =
                    std::mem::take(&mut *rows).into_iter().partition(|row| filter.matches(row));
                *rows = kept;
                removed
            } else {
                let mut marked = Vec::new();
                for row in rows.iter_mut() {
                    if filter.matches(row) {
                        mark_deleted(row);
                        marked.push(row.clone());
                    }
                }
                marked
            };
            if removed.is_empty() {
                return resolved(removed);
            }
            (removed, self.persist(&rows))
        };

        async move {
            ticket.await?;
            Ok::<_, JsonDbError>(removed)
        }
        .boxed()
    }

    // ── Updates ────────────────────────────────────────────────────

    /// Merge `patch` into the first record matching `filter`, in place.
    ///
    /// The patch is validated with required fields relaxed. Resolves with
    /// the updated record, or `None` without touching disk if nothing
    /// matched.
    pub fn update(&self, filter: impl Into<Filter>, patch: Value) -> Pending<Option<Record>> {
        let filter = filter.into();
        self.update_located(patch, |rows| rows.iter().position(|row| filter.matches(row)))
    }

    /// Merge `patch` into the record at `index`, validated like
    /// [`update`](Self::update). Resolves with `None` without touching
    /// disk if `index` is out of range.
    pub fn update_at(&self, index: usize, patch: Value) -> Pending<Option<Record>> {
        self.update_located(patch, |rows| (index < rows.len()).then_some(index))
    }

    fn update_located<F>(&self, patch: Value, locate: F) -> Pending<Option<Record>>
    where
        F: FnOnce(&[Record]) -> Option<usize>,
    {
        let patch = match self.prepare_patch(&patch) {
            Ok(patch) => patch,
            Err(e) => return rejected(e),
        };

        let (updated, ticket) = {
            let mut rows = self.rows.write();
            let Some(index) = locate(&rows) else {
                return resolved(None);
            };
            let row = &mut rows[index];
            merge(row, &patch);
            let updated = row.clone();
            (updated, self.persist(&rows))
        };

        async move {
            ticket.await?;
            Ok::<_, JsonDbError>(Some(updated))
        }
        .boxed()
    }

    /// Merge `patch` into every record matching `filter` with a single
    /// flush. Resolves with the updated records.
    pub fn update_all(&self, filter: impl Into<Filter>, patch: Value) -> Pending<Vec<Record>> {
        let patch = match self.prepare_patch(&patch) {
            Ok(patch) => patch,
            Err(e) => return rejected(e),
        };
        let filter = filter.into();

        let (updated, ticket) = {
            let mut rows = self.rows.write();
            let mut updated = Vec::new();
            for row in rows.iter_mut() {
                if filter.matches(row) {
                    merge(row, &patch);
                    updated.push(row.clone());
                }
            }
            if updated.is_empty() {
                return resolved(updated);
            }
            (updated, self.persist(&rows))
        };

        async move {
            ticket.await?;
            Ok::<_, JsonDbError>(updated)
        }
        .boxed()
    }

    fn prepare_patch(&self, patch: &Value) -> Result<Record> {
        if let Some(schema) = &self.schema {
            self.validator.validate(schema, patch, ValidationMode::Partial)?;
        }
        Ok(as_record(patch)?.clone())
    }

    // ── Persistence ────────────────────────────────────────────────

    /// Resolves once every write queued for this collection so far has
    /// completed.
    pub fn flush(&self) -> WriteTicket {
        self.writer.flush(&self.path)
    }

    /// Queue a rewrite of the backing file with `rows`. Called with the
    /// rows lock held so queued payloads follow mutation order.
    fn persist(&self, rows: &[Record]) -> WriteTicket {
        match encode_rows(rows) {
            Ok(payload) => self.writer.enqueue_write(self.path.clone(), payload),
            Err(e) => WriteTicket::ready(self.path.clone(), Err(e)),
        }
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("rows", &self.len())
            .field("physical_deletion", &self.physical_deletion)
            .finish()
    }
}

fn as_record(value: &Value) -> Result<&Record> {
    value.as_object().ok_or_else(|| {
        JsonDbError::InvalidRecord(format!("expected a JSON object, got {value}"))
    })
}

fn mark_deleted(row: &mut Record) {
    row.insert(DELETED_FIELD.to_string(), Value::Bool(true));
}

fn merge(row: &mut Record, patch: &Record) {
    for (key, value) in patch {
        row.insert(key.clone(), value.clone());
    }
}

fn rejected<T: Send + 'static>(err: JsonDbError) -> Pending<T> {
    future::ready(Err(err)).boxed()
}

fn resolved<T: Send + 'static>(value: T) -> Pending<T> {
    future::ready(Ok(value)).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{Filesystem, LocalFs};
    use crate::schema::parse_schema_str;
    use crate::validation::SchemaValidator;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io;
    use tempfile::TempDir;

    fn open(tmp: &TempDir, schema: Option<Schema>, physical_deletion: bool) -> Collection {
        Collection::new(
            "test",
            tmp.path().join("test.json"),
            Vec::new(),
            WriteQueue::new(Arc::new(LocalFs)),
            Arc::new(SchemaValidator),
        )
        .with_schema(schema)
        .with_physical_deletion(physical_deletion)
    }

    fn user_schema() -> Schema {
        parse_schema_str(
            r#"
type: object
properties:
  a: { type: number }
  b: { type: string }
  role: { type: string, default: member }
required: [a, b]
"#,
        )
        .unwrap()
    }

    fn on_disk(collection: &Collection) -> Vec<Record> {
        parse_rows(&std::fs::read(collection.path()).unwrap()).unwrap()
    }

    fn strip_created(mut rows: Vec<Record>) -> Vec<Record> {
        for row in &mut rows {
            row.remove(CREATED_FIELD);
        }
        rows
    }

    #[tokio::test]
    async fn test_insert_adds_engine_fields() {
        let tmp = TempDir::new().unwrap();
        let col = open(&tmp, None, false);

        let before = Utc::now().timestamp();
        let returned = col.insert(json!({ "a": 233 })).await.unwrap();
        assert_eq!(returned, json!({ "a": 233 }));

        let row = col.find(json!({ "a": 233 })).unwrap();
        assert_eq!(row[DELETED_FIELD], json!(false));
        let created = row[CREATED_FIELD].as_i64().unwrap();
        assert!(created >= before && created <= Utc::now().timestamp());

        assert_eq!(on_disk(&col), col.rows());
    }

    #[tokio::test]
    async fn test_insert_merge_order() {
        let tmp = TempDir::new().unwrap();
        let col = open(&tmp, Some(user_schema()), false);

        col.insert(json!({ "a": 1, "b": "x" })).await.unwrap();
        col.insert(json!({ "a": 2, "b": "y", "role": "admin", "isDelete": true }))
            .await
            .unwrap();

        let rows = strip_created(col.rows());
        assert_eq!(
            rows,
            vec![
                as_record(&json!({ "a": 1, "b": "x", "role": "member", "isDelete": false }))
                    .unwrap()
                    .clone(),
                as_record(&json!({ "a": 2, "b": "y", "role": "admin", "isDelete": false }))
                    .unwrap()
                    .clone(),
            ]
        );
    }

    #[tokio::test]
    async fn test_insert_validation_gate() {
        let tmp = TempDir::new().unwrap();
        let col = open(&tmp, Some(user_schema()), false);
        col.insert(json!({ "a": 1, "b": "x" })).await.unwrap();
        let before = col.rows();

        let err = col.insert(json!({ "a": 2 })).await.unwrap_err();
        match err {
            JsonDbError::Validation(errors) => {
                assert_eq!(errors.len(), 1);
                assert!(errors.issues[0].message.contains("'b'"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(col.rows(), before);
        assert_eq!(on_disk(&col), before);
    }

    #[tokio::test]
    async fn test_insert_rejects_non_object() {
        let tmp = TempDir::new().unwrap();
        let col = open(&tmp, None, false);

        let err = col.insert(json!([1, 2, 3])).await.unwrap_err();
        assert!(matches!(err, JsonDbError::InvalidRecord(_)));
        assert!(col.is_empty());
        assert!(!col.path().exists());
    }

    #[tokio::test]
    async fn test_mutation_is_visible_before_flush() {
        let tmp = TempDir::new().unwrap();
        let col = open(&tmp, None, false);

        let first = col.insert(json!({ "a": 233 }));
        let second = col.insert(json!({ "a": 666 }));
        // Nothing polled yet, but memory already reflects both inserts
        assert_eq!(col.len(), 2);
        assert!(col.find(json!({ "a": 666 })).is_some());

        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(on_disk(&col).len(), 2);
    }

    #[tokio::test]
    async fn test_unawaited_operations_land_in_order() {
        let tmp = TempDir::new().unwrap();
        let col = open(&tmp, None, false);

        for i in 0..25 {
            let _ = col.insert(json!({ "i": i }));
        }
        let _ = col.update(json!({ "i": 3 }), json!({ "tag": "three" }));
        let _ = col.remove(json!({ "i": 4 }), true);
        col.flush().await.unwrap();

        let disk = on_disk(&col);
        assert_eq!(disk.len(), 24);
        assert_eq!(disk, col.rows());
        assert_eq!(disk[3]["tag"], json!("three"));
        assert_eq!(disk[4]["i"], json!(5));
    }

    #[tokio::test]
    async fn test_insert_many() {
        let tmp = TempDir::new().unwrap();
        let col = open(&tmp, None, false);

        let values = vec![json!({ "a": 1 }), json!({ "a": 2 }), json!({ "a": 3 })];
        let returned = col.insert_many(values.clone()).await.unwrap();
        assert_eq!(returned, values);
        assert_eq!(col.len(), 3);
        assert_eq!(on_disk(&col).len(), 3);
    }

    #[tokio::test]
    async fn test_insert_many_appends_nothing_on_invalid_item() {
        let tmp = TempDir::new().unwrap();
        let col = open(&tmp, Some(user_schema()), false);

        let err = col
            .insert_many(vec![
                json!({ "a": 1, "b": "ok" }),
                json!({ "a": "bad", "b": "x" }),
                json!({ "a": 3 }),
            ])
            .await
            .unwrap_err();

        let JsonDbError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        let paths: Vec<&str> = errors.issues.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["[1].a", "[2]"]);
        assert!(col.is_empty());
    }

    #[tokio::test]
    async fn test_find_order_and_snapshots() {
        let tmp = TempDir::new().unwrap();
        let col = open(&tmp, None, false);
        col.insert_many(vec![
            json!({ "k": "x", "n": 1 }),
            json!({ "k": "y", "n": 2 }),
            json!({ "k": "x", "n": 3 }),
        ])
        .await
        .unwrap();

        assert_eq!(col.find(json!({ "k": "x" })).unwrap()["n"], json!(1));
        assert!(col.find(json!({ "k": "z" })).is_none());

        let mut all = col.find_all(json!({ "k": "x" }));
        let ns: Vec<&Value> = all.iter().map(|r| &r["n"]).collect();
        assert_eq!(ns, vec![&json!(1), &json!(3)]);

        // Returned records are snapshots
        all[0].insert("n".into(), json!(100));
        all.clear();
        assert_eq!(col.len(), 3);
        assert_eq!(col.find(json!({ "k": "x" })).unwrap()["n"], json!(1));

        let big = col.find_all(Filter::predicate(|r| r["n"].as_i64().unwrap_or(0) >= 2));
        assert_eq!(big.len(), 2);
    }

    #[tokio::test]
    async fn test_typed_access() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct Note {
            title: String,
            created: i64,
            #[serde(rename = "isDelete")]
            is_delete: bool,
        }

        #[derive(Serialize)]
        struct NewNote<'a> {
            title: &'a str,
        }

        let tmp = TempDir::new().unwrap();
        let col = open(&tmp, None, false);
        col.insert_typed(&NewNote { title: "hello" }).await.unwrap();

        let note: Note = col.find_as(json!({ "title": "hello" })).unwrap().unwrap();
        assert_eq!(note.title, "hello");
        assert!(!note.is_delete);

        let notes: Vec<Note> = col.find_all_as(Filter::All).unwrap();
        assert_eq!(notes.len(), 1);
    }

    #[tokio::test]
    async fn test_soft_delete() {
        let tmp = TempDir::new().unwrap();
        let col = open(&tmp, None, false);
        col.insert(json!({ "a": 1 })).await.unwrap();

        let removed = col.remove(json!({ "a": 1 }), false).await.unwrap().unwrap();
        assert_eq!(removed[DELETED_FIELD], json!(true));
        assert_eq!(col.len(), 1);
        assert_eq!(col.find(json!({ "a": 1 })).unwrap()[DELETED_FIELD], json!(true));
        assert_eq!(on_disk(&col)[0][DELETED_FIELD], json!(true));
    }

    #[tokio::test]
    async fn test_hard_delete_by_collection_policy() {
        let tmp = TempDir::new().unwrap();
        let col = open(&tmp, None, true);
        col.insert_many(vec![json!({ "a": 1 }), json!({ "a": 2 })]).await.unwrap();

        let removed = col.remove(json!({ "a": 1 }), false).await.unwrap().unwrap();
        assert_eq!(removed["a"], json!(1));
        assert_eq!(col.len(), 1);
        assert!(col.find(json!({ "a": 1 })).is_none());
        assert_eq!(on_disk(&col).len(), 1);
    }

    #[tokio::test]
    async fn test_hard_delete_by_call_override() {
        let tmp = TempDir::new().unwrap();
        let col = open(&tmp, None, false);
        col.insert(json!({ "a": 1 })).await.unwrap();

        col.remove(json!({ "a": 1 }), true).await.unwrap();
        assert!(col.is_empty());
    }

    #[tokio::test]
    async fn test_remove_without_match_skips_write() {
        let tmp = TempDir::new().unwrap();
        let col = open(&tmp, None, false);

        assert!(col.remove(json!({ "a": 1 }), false).await.unwrap().is_none());
        assert!(col.remove_all(json!({ "a": 1 }), true).await.unwrap().is_empty());
        assert!(col.update(json!({ "a": 1 }), json!({ "b": 2 })).await.unwrap().is_none());
        assert!(col.update_all(json!({ "a": 1 }), json!({ "b": 2 })).await.unwrap().is_empty());
        assert!(!col.path().exists());
    }

    #[tokio::test]
    async fn test_remove_all_soft_scenario() {
        let tmp = TempDir::new().unwrap();
        let col = open(&tmp, None, false);
        let _ = col.insert(json!({ "a": 233 }));
        let _ = col.insert(json!({ "a": 666 }));
        let _ = col.insert(json!({ "a": 7777 }));
        let removed = col.remove_all(json!({ "a": 233 }), false).await.unwrap();

        assert_eq!(removed.len(), 1);
        assert_eq!(col.len(), 3);
        assert_eq!(col.find(json!({ "a": 233 })).unwrap()[DELETED_FIELD], json!(true));

        let live = col.find_all(json!({ "isDelete": false }));
        let values: Vec<&Value> = live.iter().map(|r| &r["a"]).collect();
        assert_eq!(values, vec![&json!(666), &json!(7777)]);
    }

    #[tokio::test]
    async fn test_remove_all_hard() {
        let tmp = TempDir::new().unwrap();
        let col = open(&tmp, None, false);
        col.insert_many(vec![json!({ "a": 1 }), json!({ "a": 2 }), json!({ "a": 1 })])
            .await
            .unwrap();

        let removed = col.remove_all(json!({ "a": 1 }), true).await.unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(col.len(), 1);
        assert_eq!(on_disk(&col)[0]["a"], json!(2));
    }

    #[tokio::test]
    async fn test_partial_update_skips_required() {
        let tmp = TempDir::new().unwrap();
        let col = open(&tmp, Some(user_schema()), false);
        col.insert(json!({ "a": 1, "b": "x" })).await.unwrap();

        let updated = col.update(json!({ "a": 1 }), json!({ "c": 2 })).await.unwrap().unwrap();
        assert_eq!(updated["c"], json!(2));
        assert_eq!(updated["b"], json!("x"));
        assert_eq!(on_disk(&col)[0]["c"], json!(2));
    }

    #[tokio::test]
    async fn test_update_validation_failure_leaves_rows() {
        let tmp = TempDir::new().unwrap();
        let col = open(&tmp, Some(user_schema()), false);
        col.insert(json!({ "a": 1, "b": "x" })).await.unwrap();
        let before = col.rows();

        let err = col.update(json!({ "a": 1 }), json!({ "b": 5 })).await.unwrap_err();
        assert!(matches!(err, JsonDbError::Validation(_)));
        assert_eq!(col.rows(), before);
    }

    #[tokio::test]
    async fn test_update_keeps_position() {
        let tmp = TempDir::new().unwrap();
        let col = open(&tmp, None, false);
        col.insert_many(vec![json!({ "a": 1 }), json!({ "a": 2 }), json!({ "a": 3 })])
            .await
            .unwrap();

        col.update(json!({ "a": 2 }), json!({ "a": 20, "extra": true })).await.unwrap();
        let values: Vec<Value> = col.rows().iter().map(|r| r["a"].clone()).collect();
        assert_eq!(values, vec![json!(1), json!(20), json!(3)]);
    }

    #[tokio::test]
    async fn test_float_record_found_by_integer_value() {
        let tmp = TempDir::new().unwrap();
        let col = open(&tmp, None, false);
        col.insert(json!({ "a": 1.0 })).await.unwrap();

        let reloaded = parse_rows(&std::fs::read(col.path()).unwrap()).unwrap();
        assert_eq!(reloaded[0]["a"], json!(1.0));

        assert!(col.find(json!({ "a": 1 })).is_some());
        assert!(col.find(json!({ "a": 1.0 })).is_some());
        assert!(col.find(json!({ "a": 2 })).is_none());
    }

    #[tokio::test]
    async fn test_duplicate_rows_addressed_by_index() {
        let tmp = TempDir::new().unwrap();
        let col = open(&tmp, Some(user_schema()), false);
        col.insert_many(vec![
            json!({ "a": 1, "b": "dup" }),
            json!({ "a": 1, "b": "dup" }),
            json!({ "a": 2, "b": "other" }),
        ])
        .await
        .unwrap();

        assert_eq!(col.position(json!({ "b": "dup" })), Some(0));
        assert_eq!(col.positions(json!({ "b": "dup" })), vec![0, 1]);
        assert_eq!(col.position(json!({ "b": "none" })), None);

        let updated = col.update_at(1, json!({ "b": "second" })).await.unwrap().unwrap();
        assert_eq!(updated["b"], json!("second"));
        let bs: Vec<Value> = col.rows().iter().map(|r| r["b"].clone()).collect();
        assert_eq!(bs, vec![json!("dup"), json!("second"), json!("other")]);

        // Partial validation still applies
        let err = col.update_at(0, json!({ "a": "one" })).await.unwrap_err();
        assert!(matches!(err, JsonDbError::Validation(_)));
        assert_eq!(col.rows()[0]["a"], json!(1));

        let removed = col.remove_at(1, false).await.unwrap().unwrap();
        assert_eq!(removed[DELETED_FIELD], json!(true));
        assert_eq!(col.rows()[0][DELETED_FIELD], json!(false));

        col.remove_at(0, true).await.unwrap();
        assert_eq!(col.len(), 2);
        assert_eq!(col.positions(json!({ "b": "dup" })), Vec::<usize>::new());
        assert_eq!(on_disk(&col), col.rows());
    }

    #[tokio::test]
    async fn test_index_out_of_range_skips_write() {
        let tmp = TempDir::new().unwrap();
        let col = open(&tmp, None, false);

        assert!(col.update_at(0, json!({ "a": 1 })).await.unwrap().is_none());
        assert!(col.remove_at(3, true).await.unwrap().is_none());
        assert!(!col.path().exists());
    }

    #[tokio::test]
    async fn test_update_all() {
        let tmp = TempDir::new().unwrap();
        let col = open(&tmp, None, false);
        col.insert_many(vec![
            json!({ "group": "a" }),
            json!({ "group": "b" }),
            json!({ "group": "a" }),
        ])
        .await
        .unwrap();

        let updated = col
            .update_all(json!({ "group": "a" }), json!({ "seen": true }))
            .await
            .unwrap();
        assert_eq!(updated.len(), 2);
        assert_eq!(col.find_all(json!({ "seen": true })).len(), 2);
        assert_eq!(on_disk(&col).iter().filter(|r| r.contains_key("seen")).count(), 2);
    }

    struct BrokenDisk;

    impl Filesystem for BrokenDisk {
        fn exists(&self, _path: &Path) -> bool {
            true
        }
        fn make_directory(&self, _path: &Path) -> io::Result<()> {
            Ok(())
        }
        fn read_file(&self, _path: &Path) -> io::Result<Vec<u8>> {
            Err(io::Error::new(io::ErrorKind::Other, "broken"))
        }
        fn write_file(&self, _path: &Path, _bytes: &[u8]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
        }
        fn remove_file(&self, _path: &Path) -> io::Result<()> {
            Ok(())
        }
        fn copy_file(&self, _destination: &Path, _source: &Path) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_write_failure_keeps_memory_change() {
        let col = Collection::new(
            "test",
            "/virtual/test.json",
            Vec::new(),
            WriteQueue::new(Arc::new(BrokenDisk)),
            Arc::new(SchemaValidator),
        );

        let err = col.insert(json!({ "a": 1 })).await.unwrap_err();
        assert!(matches!(err, JsonDbError::Io(_)));
        // Memory and disk diverge on write failure
        assert_eq!(col.len(), 1);
    }
}
