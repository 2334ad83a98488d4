//! Metadata sink: the file-record store paired with its search index.
//!
//! A record and its index document are written together or not at all.
//! Multi-step writes go through a [`FileTransaction`]; the sink's own helpers
//! (`delete_file`, `set_tags`) follow the same pattern internally.

use crate::error::SinkError;
use crate::index::{SearchIndex, TaskHandle};
use crate::models::{Category, FileRecord, IndexDocument, ScannedFile};
use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::sync::Arc;
use std::time::Duration;
use storage::models::FileRow;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

/// Result of an upsert: the stored record and, for updates, the row it replaced.
#[derive(Debug, Clone)]
pub struct Upserted {
    pub record: FileRecord,
    pub previous: Option<FileRecord>,
}

/// An open unit of work on the record store.
///
/// Dropping it without `commit` discards the writes.
#[async_trait::async_trait]
pub trait FileTransaction: Send {
    async fn upsert_file(&mut self, file: &ScannedFile) -> Result<Upserted, SinkError>;
    async fn commit(self: Box<Self>) -> Result<(), SinkError>;
    async fn rollback(self: Box<Self>) -> Result<(), SinkError>;
}

#[async_trait::async_trait]
pub trait MetadataSink: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn FileTransaction>, SinkError>;
    /// Removes the record and its document. Returns false if no record existed.
    async fn delete_file(&self, path: &str) -> Result<bool, SinkError>;
    /// Records whose path starts with `prefix`, in id order.
    async fn query_by_path_prefix(&self, prefix: &str) -> Result<Vec<FileRecord>, SinkError>;
    async fn all_files(&self) -> Result<Vec<FileRecord>, SinkError>;
    /// Replaces the tag list of an existing record and its document.
    async fn set_tags(&self, path: &str, tags: &[String]) -> Result<Option<FileRecord>, SinkError>;
    async fn category_counts(&self) -> Result<Vec<(Category, i64)>, SinkError>;
    fn index(&self) -> &dyn SearchIndex;
    /// How long to wait for an index write to be acknowledged.
    fn task_timeout(&self) -> Duration;

    async fn index_document(&self, doc: &IndexDocument) -> Result<TaskHandle, SinkError> {
        self.index().index_documents(std::slice::from_ref(doc)).await
    }

    async fn await_task(&self, task: TaskHandle, timeout: Duration) -> Result<(), SinkError> {
        self.index().await_task(task, timeout).await
    }
}

/// SQLite-backed sink. SQLite allows one writer at a time, so write units
/// queue on an internal gate instead of racing for the database lock.
pub struct SqliteSink {
    pool: SqlitePool,
    index: Arc<dyn SearchIndex>,
    write_gate: Arc<Mutex<()>>,
    task_timeout: Duration,
}

impl SqliteSink {
    pub fn new(pool: SqlitePool, index: Arc<dyn SearchIndex>, task_timeout: Duration) -> Self {
        Self {
            pool,
            index,
            write_gate: Arc::new(Mutex::new(())),
            task_timeout,
        }
    }

    async fn open_tx(&self) -> Result<SqliteFileTx, SinkError> {
        let gate = self.write_gate.clone().lock_owned().await;
        let tx = self.pool.begin().await?;
        Ok(SqliteFileTx { tx, _gate: gate })
    }

    async fn sync_index(&self, task: Result<TaskHandle, SinkError>) -> Result<(), SinkError> {
        self.index.await_task(task?, self.task_timeout).await
    }

    /// Puts `doc` back after the store refused a change the index already took.
    async fn restore_document(&self, doc: &IndexDocument) {
        if let Err(err) = self.sync_index(self.index_document(doc).await).await {
            warn!(path = %doc.path, "failed to restore index document: {err}");
        }
    }
}

const SELECT_FILE: &str = "SELECT id, path, hash, size, mime_type, category, tags, created_at, updated_at FROM files";

pub struct SqliteFileTx {
    tx: Transaction<'static, Sqlite>,
    _gate: OwnedMutexGuard<()>,
}

impl SqliteFileTx {
    async fn abort(self, path: &str) {
        if let Err(err) = self.tx.rollback().await {
            warn!(path, "rollback after index failure also failed: {err}");
        }
    }
}

#[async_trait::async_trait]
impl FileTransaction for SqliteFileTx {
    async fn upsert_file(&mut self, file: &ScannedFile) -> Result<Upserted, SinkError> {
        let previous = sqlx::query_as::<_, FileRow>(&format!("{SELECT_FILE} WHERE path = ?1"))
            .bind(&file.path)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(FileRecord::from);

        let now = Utc::now();
        let row = sqlx::query_as::<_, FileRow>(
            r#"
            INSERT INTO files (path, hash, size, mime_type, category, tags, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, '', ?6, ?6)
            ON CONFLICT(path) DO UPDATE SET
                hash = excluded.hash,
                size = excluded.size,
                mime_type = excluded.mime_type,
                category = excluded.category,
                updated_at = excluded.updated_at
            RETURNING id, path, hash, size, mime_type, category, tags, created_at, updated_at
            "#,
        )
        .bind(&file.path)
        .bind(&file.hash)
        .bind(i64::try_from(file.size).unwrap_or(i64::MAX))
        .bind(&file.mime_type)
        .bind(file.category.as_str())
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(Upserted {
            record: row.into(),
            previous,
        })
    }

    async fn commit(self: Box<Self>) -> Result<(), SinkError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), SinkError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl MetadataSink for SqliteSink {
    async fn begin(&self) -> Result<Box<dyn FileTransaction>, SinkError> {
        Ok(Box::new(self.open_tx().await?))
    }

    async fn delete_file(&self, path: &str) -> Result<bool, SinkError> {
        let mut unit = self.open_tx().await?;
        let deleted = sqlx::query_as::<_, FileRow>(
            r#"
            DELETE FROM files WHERE path = ?1
            RETURNING id, path, hash, size, mime_type, category, tags, created_at, updated_at
            "#,
        )
        .bind(path)
        .fetch_optional(&mut *unit.tx)
        .await?;
        let Some(row) = deleted else {
            unit.tx.rollback().await?;
            return Ok(false);
        };
        let removed = FileRecord::from(row);
        let task = match self.index.delete_document(removed.id).await {
            Ok(task) => task,
            Err(err) => {
                unit.abort(path).await;
                return Err(err);
            }
        };
        if let Err(err) = self.index.await_task(task, self.task_timeout).await {
            self.restore_document(&IndexDocument::from(&removed)).await;
            unit.abort(path).await;
            return Err(err);
        }
        if let Err(err) = unit.tx.commit().await {
            self.restore_document(&IndexDocument::from(&removed)).await;
            return Err(err.into());
        }
        Ok(true)
    }

    async fn query_by_path_prefix(&self, prefix: &str) -> Result<Vec<FileRecord>, SinkError> {
        let rows = sqlx::query_as::<_, FileRow>(&format!(
            "{SELECT_FILE} WHERE substr(path, 1, length(?1)) = ?1 ORDER BY id"
        ))
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FileRecord::from).collect())
    }

    async fn all_files(&self) -> Result<Vec<FileRecord>, SinkError> {
        let rows = sqlx::query_as::<_, FileRow>(&format!("{SELECT_FILE} ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(FileRecord::from).collect())
    }

    async fn set_tags(&self, path: &str, tags: &[String]) -> Result<Option<FileRecord>, SinkError> {
        let mut unit = self.open_tx().await?;
        let previous = sqlx::query_as::<_, FileRow>(&format!("{SELECT_FILE} WHERE path = ?1"))
            .bind(path)
            .fetch_optional(&mut *unit.tx)
            .await?;
        let Some(previous) = previous.map(FileRecord::from) else {
            unit.tx.rollback().await?;
            return Ok(None);
        };
        let row = sqlx::query_as::<_, FileRow>(
            r#"
            UPDATE files SET tags = ?2, updated_at = ?3 WHERE path = ?1
            RETURNING id, path, hash, size, mime_type, category, tags, created_at, updated_at
            "#,
        )
        .bind(path)
        .bind(tags.join(","))
        .bind(Utc::now())
        .fetch_one(&mut *unit.tx)
        .await?;
        let record = FileRecord::from(row);
        let doc = IndexDocument::from(&record);
        let task = match self.index_document(&doc).await {
            Ok(task) => task,
            Err(err) => {
                unit.abort(path).await;
                return Err(err);
            }
        };
        if let Err(err) = self.index.await_task(task, self.task_timeout).await {
            self.restore_document(&IndexDocument::from(&previous)).await;
            unit.abort(path).await;
            return Err(err);
        }
        if let Err(err) = unit.tx.commit().await {
            self.restore_document(&IndexDocument::from(&previous)).await;
            return Err(err.into());
        }
        Ok(Some(record))
    }

    async fn category_counts(&self) -> Result<Vec<(Category, i64)>, SinkError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT category, COUNT(*) FROM files GROUP BY category ORDER BY category",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(category, count)| (Category::from_label(&category), count))
            .collect())
    }

    fn index(&self) -> &dyn SearchIndex {
        self.index.as_ref()
    }

    fn task_timeout(&self) -> Duration {
        self.task_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;
    use crate::models::Category;

    async fn open(dir: &std::path::Path) -> (SqliteSink, SqlitePool, Arc<MemoryIndex>) {
        let pool = storage::connect(&dir.join("smartdir.db").to_string_lossy())
            .await
            .unwrap();
        storage::migrate(&pool).await.unwrap();
        let index = Arc::new(MemoryIndex::new());
        let sink = SqliteSink::new(pool.clone(), index.clone(), Duration::from_secs(5));
        (sink, pool, index)
    }

    async fn seed(sink: &SqliteSink, path: &str) -> FileRecord {
        let mut tx = sink.begin().await.unwrap();
        let upserted = tx
            .upsert_file(&ScannedFile {
                path: path.into(),
                hash: "ab".repeat(32),
                size: 3,
                mime_type: "application/pdf".into(),
                category: Category::Documents,
            })
            .await
            .unwrap();
        let task = sink
            .index_document(&IndexDocument::from(&upserted.record))
            .await
            .unwrap();
        sink.await_task(task, Duration::from_secs(1)).await.unwrap();
        tx.commit().await.unwrap();
        upserted.record
    }

    /// A deferred reference to `files(path)`; violations only surface at COMMIT.
    async fn add_deferred_pins(pool: &SqlitePool) {
        sqlx::query(
            "CREATE TABLE pins (path TEXT NOT NULL REFERENCES files(path) DEFERRABLE INITIALLY DEFERRED)",
        )
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn failed_delete_commit_restores_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, pool, index) = open(dir.path()).await;
        let record = seed(&sink, "/data/report.pdf").await;
        add_deferred_pins(&pool).await;
        sqlx::query("INSERT INTO pins (path) VALUES (?1)")
            .bind(&record.path)
            .execute(&pool)
            .await
            .unwrap();

        let err = sink.delete_file(&record.path).await.unwrap_err();
        assert!(matches!(err, SinkError::Database(_)));

        assert_eq!(sink.all_files().await.unwrap().len(), 1);
        let doc = index.get(record.id).expect("document restored");
        assert_eq!(doc.path, record.path);
    }

    #[tokio::test]
    async fn failed_tag_commit_restores_the_previous_tags() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, pool, index) = open(dir.path()).await;
        let record = seed(&sink, "/data/report.pdf").await;
        add_deferred_pins(&pool).await;
        sqlx::query(
            "CREATE TRIGGER tag_guard AFTER UPDATE OF tags ON files \
             BEGIN INSERT INTO pins (path) VALUES ('/nowhere'); END",
        )
        .execute(&pool)
        .await
        .unwrap();

        let tags = vec!["finance".to_string()];
        let err = sink.set_tags(&record.path, &tags).await.unwrap_err();
        assert!(matches!(err, SinkError::Database(_)));

        let stored = sink.all_files().await.unwrap();
        assert!(stored[0].tags.is_empty());
        assert!(index.get(record.id).unwrap().tags.is_empty());
    }

    #[tokio::test]
    async fn delete_and_tag_keep_store_and_index_paired() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, _pool, index) = open(dir.path()).await;
        let record = seed(&sink, "/data/report.pdf").await;

        let tags = vec!["finance".to_string(), "q3".to_string()];
        let tagged = sink.set_tags(&record.path, &tags).await.unwrap().unwrap();
        assert_eq!(tagged.id, record.id);
        assert_eq!(index.get(record.id).unwrap().tags, tags);
        assert!(sink.set_tags("/data/missing", &tags).await.unwrap().is_none());

        assert!(sink.delete_file(&record.path).await.unwrap());
        assert!(index.get(record.id).is_none());
        assert!(!sink.delete_file(&record.path).await.unwrap());
    }
}
