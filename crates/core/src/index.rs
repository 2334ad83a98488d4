//! Search index surface of the metadata sink.

use crate::error::SinkError;
use crate::models::IndexDocument;
use providers::meili::MeiliClient;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const PRIMARY_KEY: &str = "id";
pub const SEARCHABLE_FIELDS: [&str; 3] = ["path", "category", "tags"];

/// Identifies an index write so callers can wait for it to be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(pub u64);

#[async_trait::async_trait]
pub trait SearchIndex: Send + Sync {
    /// Creates the index if it is missing. Returns true when it was created.
    async fn ensure_index(&self) -> Result<bool, SinkError>;
    async fn configure_searchable(&self, fields: &[&str]) -> Result<TaskHandle, SinkError>;
    /// Adds or replaces documents by id.
    async fn index_documents(&self, docs: &[IndexDocument]) -> Result<TaskHandle, SinkError>;
    async fn delete_document(&self, id: i64) -> Result<TaskHandle, SinkError>;
    async fn await_task(&self, task: TaskHandle, timeout: Duration) -> Result<(), SinkError>;
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<IndexDocument>, SinkError>;
}

pub struct MeiliIndex {
    client: MeiliClient,
    task_timeout: Duration,
}

impl MeiliIndex {
    /// `task_timeout` bounds the wait for index creation.
    pub fn new(client: MeiliClient, task_timeout: Duration) -> Self {
        Self {
            client,
            task_timeout,
        }
    }
}

#[async_trait::async_trait]
impl SearchIndex for MeiliIndex {
    async fn ensure_index(&self) -> Result<bool, SinkError> {
        if self.client.index_exists().await? {
            return Ok(false);
        }
        let task = self.client.create_index(PRIMARY_KEY).await?;
        self.client
            .wait_for_task(task.task_uid, self.task_timeout)
            .await?;
        Ok(true)
    }

    async fn configure_searchable(&self, fields: &[&str]) -> Result<TaskHandle, SinkError> {
        let task = self.client.update_searchable_attributes(fields).await?;
        Ok(TaskHandle(task.task_uid))
    }

    async fn index_documents(&self, docs: &[IndexDocument]) -> Result<TaskHandle, SinkError> {
        let task = self.client.add_documents(docs, PRIMARY_KEY).await?;
        Ok(TaskHandle(task.task_uid))
    }

    async fn delete_document(&self, id: i64) -> Result<TaskHandle, SinkError> {
        let task = self.client.delete_document(&id.to_string()).await?;
        Ok(TaskHandle(task.task_uid))
    }

    async fn await_task(&self, task: TaskHandle, timeout: Duration) -> Result<(), SinkError> {
        self.client.wait_for_task(task.0, timeout).await?;
        Ok(())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<IndexDocument>, SinkError> {
        let hits = self.client.search(query, limit).await?;
        hits.into_iter()
            .map(|hit| {
                serde_json::from_value(hit)
                    .map_err(|e| SinkError::Index(format!("malformed hit: {e}")))
            })
            .collect()
    }
}

/// Process-local index. Writes apply immediately, so every task is already
/// finished when its handle is returned.
#[derive(Default)]
pub struct MemoryIndex {
    docs: Mutex<BTreeMap<i64, IndexDocument>>,
    next_task: AtomicU64,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn task(&self) -> TaskHandle {
        TaskHandle(self.next_task.fetch_add(1, Ordering::Relaxed))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<i64, IndexDocument>>, SinkError> {
        self.docs
            .lock()
            .map_err(|_| SinkError::Index("memory index poisoned".into()))
    }

    pub fn get(&self, id: i64) -> Option<IndexDocument> {
        self.docs.lock().ok()?.get(&id).cloned()
    }

    pub fn documents(&self) -> Vec<IndexDocument> {
        self.docs
            .lock()
            .map(|d| d.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl SearchIndex for MemoryIndex {
    async fn ensure_index(&self) -> Result<bool, SinkError> {
        Ok(false)
    }

    async fn configure_searchable(&self, _fields: &[&str]) -> Result<TaskHandle, SinkError> {
        Ok(self.task())
    }

    async fn index_documents(&self, docs: &[IndexDocument]) -> Result<TaskHandle, SinkError> {
        let mut map = self.lock()?;
        for doc in docs {
            map.insert(doc.id, doc.clone());
        }
        Ok(self.task())
    }

    async fn delete_document(&self, id: i64) -> Result<TaskHandle, SinkError> {
        self.lock()?.remove(&id);
        Ok(self.task())
    }

    async fn await_task(&self, _task: TaskHandle, _timeout: Duration) -> Result<(), SinkError> {
        Ok(())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<IndexDocument>, SinkError> {
        let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        let map = self.lock()?;
        Ok(map
            .values()
            .filter(|doc| {
                let haystack = format!(
                    "{} {} {}",
                    doc.path.to_lowercase(),
                    doc.category,
                    doc.tags.join(" ")
                );
                terms.iter().all(|t| haystack.contains(t.as_str()))
            })
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(feature = "keyword-index")]
pub use keyword::TantivyIndex;

#[cfg(feature = "keyword-index")]
mod keyword {
    use super::{SearchIndex, TaskHandle};
    use crate::error::SinkError;
    use crate::models::{Category, IndexDocument};
    use std::path::Path;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;
    use tantivy::collector::TopDocs;
    use tantivy::schema::{Field, Schema, INDEXED, STORED, STRING, TEXT};
    use tantivy::{doc, Document, Index, IndexReader, IndexWriter, ReloadPolicy, Term};
    use tokio::sync::Mutex;

    const WRITER_HEAP: usize = 50_000_000;

    fn index_err(err: impl std::fmt::Display) -> SinkError {
        SinkError::Index(err.to_string())
    }

    #[derive(Clone, Copy)]
    struct Fields {
        id: Field,
        path: Field,
        category: Field,
        hash: Field,
        tags: Field,
    }

    /// On-disk index. Commits are synchronous, so tasks are finished on return.
    pub struct TantivyIndex {
        index: Index,
        reader: IndexReader,
        writer: Mutex<IndexWriter>,
        fields: Fields,
        next_task: AtomicU64,
    }

    impl TantivyIndex {
        pub fn open(path: &Path) -> Result<Self, SinkError> {
            std::fs::create_dir_all(path).map_err(index_err)?;
            let index = Index::open_in_dir(path).or_else(|_| {
                let mut schema_builder = Schema::builder();
                schema_builder.add_u64_field("id", INDEXED | STORED);
                schema_builder.add_text_field("path", TEXT | STORED);
                schema_builder.add_text_field("category", TEXT | STORED);
                schema_builder.add_text_field("hash", STRING | STORED);
                schema_builder.add_text_field("tags", TEXT | STORED);
                Index::create_in_dir(path, schema_builder.build())
            })
            .map_err(index_err)?;
            let schema = index.schema();
            let field = |name: &str| {
                schema
                    .get_field(name)
                    .map_err(|_| SinkError::Index(format!("{name} field missing in index schema")))
            };
            let fields = Fields {
                id: field("id")?,
                path: field("path")?,
                category: field("category")?,
                hash: field("hash")?,
                tags: field("tags")?,
            };
            let writer = index.writer(WRITER_HEAP).map_err(index_err)?;
            let reader = index
                .reader_builder()
                .reload_policy(ReloadPolicy::OnCommit)
                .try_into()
                .map_err(index_err)?;
            Ok(Self {
                index,
                reader,
                writer: Mutex::new(writer),
                fields,
                next_task: AtomicU64::new(0),
            })
        }

        fn task(&self) -> TaskHandle {
            TaskHandle(self.next_task.fetch_add(1, Ordering::Relaxed))
        }

        fn text(&self, doc: &Document, field: Field) -> String {
            doc.get_first(field)
                .and_then(|v| v.as_text())
                .unwrap_or_default()
                .to_string()
        }
    }

    #[async_trait::async_trait]
    impl SearchIndex for TantivyIndex {
        async fn ensure_index(&self) -> Result<bool, SinkError> {
            Ok(false)
        }

        async fn configure_searchable(&self, _fields: &[&str]) -> Result<TaskHandle, SinkError> {
            Ok(self.task())
        }

        async fn index_documents(&self, docs: &[IndexDocument]) -> Result<TaskHandle, SinkError> {
            let f = self.fields;
            let mut writer = self.writer.lock().await;
            for d in docs {
                writer.delete_term(Term::from_field_u64(f.id, d.id as u64));
                writer
                    .add_document(doc!(
                        f.id => d.id as u64,
                        f.path => d.path.as_str(),
                        f.category => d.category.as_str(),
                        f.hash => d.hash.as_str(),
                        f.tags => d.tags.join(" "),
                    ))
                    .map_err(index_err)?;
            }
            writer.commit().map_err(index_err)?;
            self.reader.reload().map_err(index_err)?;
            Ok(self.task())
        }

        async fn delete_document(&self, id: i64) -> Result<TaskHandle, SinkError> {
            let mut writer = self.writer.lock().await;
            writer.delete_term(Term::from_field_u64(self.fields.id, id as u64));
            writer.commit().map_err(index_err)?;
            self.reader.reload().map_err(index_err)?;
            Ok(self.task())
        }

        async fn await_task(&self, _task: TaskHandle, _timeout: Duration) -> Result<(), SinkError> {
            Ok(())
        }

        async fn search(&self, query: &str, limit: usize) -> Result<Vec<IndexDocument>, SinkError> {
            let f = self.fields;
            let searcher = self.reader.searcher();
            let parser = tantivy::query::QueryParser::for_index(
                &self.index,
                vec![f.path, f.category, f.tags],
            );
            let query = parser.parse_query(query).map_err(index_err)?;
            let top_docs = searcher
                .search(&query, &TopDocs::with_limit(limit.max(1)))
                .map_err(index_err)?;
            let mut results = Vec::with_capacity(top_docs.len());
            for (_score, addr) in top_docs {
                let doc: Document = searcher.doc(addr).map_err(index_err)?;
                let id = doc
                    .get_first(f.id)
                    .and_then(|v| v.as_u64())
                    .unwrap_or_default() as i64;
                let tags = self.text(&doc, f.tags);
                results.push(IndexDocument {
                    id,
                    path: self.text(&doc, f.path),
                    category: Category::from_label(&self.text(&doc, f.category)),
                    hash: self.text(&doc, f.hash),
                    tags: tags.split_whitespace().map(str::to_string).collect(),
                });
            }
            Ok(results)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;

    fn doc(id: i64, path: &str, category: Category, tags: &[&str]) -> IndexDocument {
        IndexDocument {
            id,
            path: path.into(),
            category,
            hash: format!("h{id}"),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn memory_index_replaces_by_id_and_searches_all_terms() {
        let index = MemoryIndex::new();
        index
            .index_documents(&[
                doc(1, "/home/u/Report.pdf", Category::Documents, &["finance"]),
                doc(2, "/home/u/cat.jpg", Category::Images, &[]),
            ])
            .await
            .unwrap();
        index
            .index_documents(&[doc(2, "/home/u/dog.jpg", Category::Images, &["pet"])])
            .await
            .unwrap();

        assert_eq!(index.documents().len(), 2);
        assert_eq!(index.get(2).unwrap().path, "/home/u/dog.jpg");

        let hits = index.search("report finance", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
        assert!(index.search("images pet", 10).await.unwrap()[0].path.ends_with("dog.jpg"));
        assert!(index.search("cat", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_index_delete_and_limit() {
        let index = MemoryIndex::new();
        let docs: Vec<_> = (1..=5)
            .map(|i| doc(i, &format!("/d/{i}.txt"), Category::Documents, &[]))
            .collect();
        index.index_documents(&docs).await.unwrap();
        let task = index.delete_document(3).await.unwrap();
        index.await_task(task, Duration::from_secs(1)).await.unwrap();
        assert!(index.get(3).is_none());
        assert_eq!(index.search("documents", 2).await.unwrap().len(), 2);
    }
}
