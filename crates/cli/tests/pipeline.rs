use smartdir_core::classifier::{AiClassifier, ClassificationPort};
use smartdir_core::error::{PipelineError, ProcessError, SinkError};
use smartdir_core::index::{MemoryIndex, SearchIndex, TaskHandle};
use smartdir_core::models::{Category, IndexDocument};
use smartdir_core::sink::{MetadataSink, SqliteSink};
use smartdir_core::{Pipeline, PipelineSettings};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storage::{connect, migrate};
use tempfile::tempdir;

/// Memory index that can be told to reject writes, or to accept a write and
/// then report its task as failed. Setup can be made to fail as well.
#[derive(Default)]
struct FlakyIndex {
    inner: MemoryIndex,
    fail_ensure: AtomicBool,
    report_created: AtomicBool,
    fail_configure: AtomicBool,
    reject_writes_for: Mutex<Option<String>>,
    fail_tasks_for: Mutex<Option<String>>,
    poisoned: Mutex<HashSet<u64>>,
}

impl FlakyIndex {
    fn reject_writes_for(&self, needle: &str) {
        *self.reject_writes_for.lock().unwrap() = Some(needle.to_string());
    }

    fn fail_tasks_for(&self, needle: &str) {
        *self.fail_tasks_for.lock().unwrap() = Some(needle.to_string());
    }

    fn matches(slot: &Mutex<Option<String>>, docs: &[IndexDocument]) -> bool {
        match slot.lock().unwrap().as_deref() {
            Some(needle) => docs.iter().any(|d| d.path.contains(needle)),
            None => false,
        }
    }
}

#[async_trait::async_trait]
impl SearchIndex for FlakyIndex {
    async fn ensure_index(&self) -> Result<bool, SinkError> {
        if self.fail_ensure.load(Ordering::SeqCst) {
            return Err(SinkError::Index("injected create failure".into()));
        }
        self.inner.ensure_index().await?;
        Ok(self.report_created.load(Ordering::SeqCst))
    }

    async fn configure_searchable(&self, fields: &[&str]) -> Result<TaskHandle, SinkError> {
        if self.fail_configure.load(Ordering::SeqCst) {
            return Err(SinkError::Index("injected settings failure".into()));
        }
        self.inner.configure_searchable(fields).await
    }

    async fn index_documents(&self, docs: &[IndexDocument]) -> Result<TaskHandle, SinkError> {
        if Self::matches(&self.reject_writes_for, docs) {
            return Err(SinkError::Index("injected write failure".into()));
        }
        let task = self.inner.index_documents(docs).await?;
        if Self::matches(&self.fail_tasks_for, docs) {
            self.poisoned.lock().unwrap().insert(task.0);
        }
        Ok(task)
    }

    async fn delete_document(&self, id: i64) -> Result<TaskHandle, SinkError> {
        self.inner.delete_document(id).await
    }

    async fn await_task(&self, task: TaskHandle, timeout: Duration) -> Result<(), SinkError> {
        if self.poisoned.lock().unwrap().contains(&task.0) {
            return Err(SinkError::TaskFailed {
                task: task.0,
                reason: "injected task failure".into(),
            });
        }
        self.inner.await_task(task, timeout).await
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<IndexDocument>, SinkError> {
        self.inner.search(query, limit).await
    }
}

struct Harness {
    pipeline: Pipeline,
    sink: Arc<dyn MetadataSink>,
    index: Arc<FlakyIndex>,
}

async fn harness(db_dir: &Path) -> Harness {
    let pool = connect(&db_dir.join("smartdir.db").to_string_lossy())
        .await
        .unwrap();
    migrate(&pool).await.unwrap();
    let index = Arc::new(FlakyIndex::default());
    let sink: Arc<dyn MetadataSink> = Arc::new(SqliteSink::new(
        pool,
        index.clone(),
        Duration::from_secs(5),
    ));
    let classifier: Arc<dyn ClassificationPort> = Arc::new(AiClassifier::offline());
    let pipeline = Pipeline::new(
        classifier,
        sink.clone(),
        PipelineSettings {
            workers: 4,
            queue_capacity: 2,
            ..PipelineSettings::default()
        },
    );
    Harness {
        pipeline,
        sink,
        index,
    }
}

fn seed_tree(root: &Path) {
    fs::create_dir_all(root.join("docs/2024")).unwrap();
    fs::create_dir_all(root.join("media")).unwrap();
    fs::write(root.join("docs/report.pdf"), "quarterly numbers").unwrap();
    fs::write(root.join("docs/2024/notes.txt"), "meeting notes").unwrap();
    fs::write(root.join("media/beach.jpg"), "jpeg bytes").unwrap();
    fs::write(root.join("media/song.mp3"), "mp3 bytes").unwrap();
    fs::write(root.join("main.rs"), "fn main() {}").unwrap();
    fs::write(root.join("README"), "readme").unwrap();
}

#[tokio::test]
async fn every_file_gets_a_record_and_a_matching_document() {
    let tree = tempdir().unwrap();
    let db = tempdir().unwrap();
    seed_tree(tree.path());
    let h = harness(db.path()).await;

    let summary = h.pipeline.run(tree.path()).await.unwrap();
    assert_eq!(summary.discovered, 6);
    assert_eq!(summary.processed, 6);

    let prefix = tree.path().to_string_lossy();
    let records = h.sink.query_by_path_prefix(&prefix).await.unwrap();
    assert_eq!(records.len(), 6);
    for record in &records {
        let doc = h.index.inner.get(record.id).expect("document for record");
        assert_eq!(doc.path, record.path);
        assert_eq!(doc.category, record.category);
        assert_eq!(doc.hash, record.hash);
        assert_eq!(record.hash.len(), 64);
    }

    let by_name = |name: &str| {
        records
            .iter()
            .find(|r| r.path.ends_with(name))
            .unwrap_or_else(|| panic!("missing {name}"))
    };
    assert_eq!(by_name("report.pdf").category, Category::Documents);
    assert_eq!(by_name("report.pdf").mime_type, "application/pdf");
    assert_eq!(by_name("beach.jpg").category, Category::Images);
    assert_eq!(by_name("song.mp3").category, Category::Audio);
    assert_eq!(by_name("main.rs").category, Category::Code);
    assert_eq!(by_name("README").category, Category::Other);
    assert_eq!(by_name("README").size, 6);
}

#[tokio::test]
async fn rerun_updates_in_place() {
    let tree = tempdir().unwrap();
    let db = tempdir().unwrap();
    seed_tree(tree.path());
    let h = harness(db.path()).await;
    let prefix = tree.path().to_string_lossy().into_owned();

    h.pipeline.run(tree.path()).await.unwrap();
    let before = h.sink.query_by_path_prefix(&prefix).await.unwrap();

    fs::write(tree.path().join("README"), "readme, second edition").unwrap();
    h.pipeline.run(tree.path()).await.unwrap();
    let after = h.sink.query_by_path_prefix(&prefix).await.unwrap();

    assert_eq!(after.len(), before.len());
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.id, new.id);
        assert_eq!(old.path, new.path);
        assert_eq!(old.created_at, new.created_at);
    }
    let readme = after.iter().find(|r| r.path.ends_with("README")).unwrap();
    let old_readme = before.iter().find(|r| r.path.ends_with("README")).unwrap();
    assert_ne!(readme.hash, old_readme.hash);
    assert_eq!(h.index.inner.get(readme.id).unwrap().hash, readme.hash);
    assert_eq!(h.index.inner.documents().len(), 6);
}

#[tokio::test]
async fn rejected_index_write_leaves_no_record() {
    let tree = tempdir().unwrap();
    let db = tempdir().unwrap();
    seed_tree(tree.path());
    let h = harness(db.path()).await;
    h.index.reject_writes_for("song.mp3");

    let err = h.pipeline.run(tree.path()).await.unwrap_err();
    match err {
        PipelineError::Process(ProcessError::Sink { path, .. }) => {
            assert!(path.ends_with("song.mp3"))
        }
        other => panic!("unexpected error: {other}"),
    }

    let prefix = tree.path().to_string_lossy();
    let records = h.sink.query_by_path_prefix(&prefix).await.unwrap();
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| !r.path.ends_with("song.mp3")));
    let docs = h.index.inner.documents();
    assert_eq!(docs.len(), 5);
    assert!(docs.iter().all(|d| !d.path.ends_with("song.mp3")));
}

#[tokio::test]
async fn failed_task_on_new_file_removes_the_landed_document() {
    let tree = tempdir().unwrap();
    let db = tempdir().unwrap();
    fs::write(tree.path().join("draft.txt"), "draft").unwrap();
    let h = harness(db.path()).await;
    h.index.fail_tasks_for("draft.txt");

    let err = h
        .pipeline
        .process(&tree.path().join("draft.txt"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProcessError::Sink {
            source: SinkError::TaskFailed { .. },
            ..
        }
    ));
    assert!(h.sink.all_files().await.unwrap().is_empty());
    assert!(h.index.inner.documents().is_empty());
}

#[tokio::test]
async fn failed_task_on_update_restores_the_previous_state() {
    let tree = tempdir().unwrap();
    let db = tempdir().unwrap();
    let file = tree.path().join("plan.txt");
    fs::write(&file, "v1").unwrap();
    let h = harness(db.path()).await;

    let original = h.pipeline.process(&file).await.unwrap();
    fs::write(&file, "v2 with more content").unwrap();
    h.index.fail_tasks_for("plan.txt");
    assert!(h.pipeline.process(&file).await.is_err());

    let stored = h.sink.all_files().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, original.id);
    assert_eq!(stored[0].hash, original.hash);
    assert_eq!(stored[0].size, 2);
    assert_eq!(h.index.inner.get(original.id).unwrap().hash, original.hash);
}

#[tokio::test]
async fn excluded_directories_are_skipped() {
    let tree = tempdir().unwrap();
    let db = tempdir().unwrap();
    seed_tree(tree.path());
    fs::create_dir_all(tree.path().join("node_modules/pkg")).unwrap();
    fs::write(tree.path().join("node_modules/pkg/index.js"), "x").unwrap();

    let h = harness(db.path()).await;
    let pipeline = Pipeline::new(
        Arc::new(AiClassifier::offline()),
        h.sink.clone(),
        PipelineSettings {
            workers: 2,
            excludes: smartdir_core::walker::build_globset(&["**/node_modules".to_string()])
                .unwrap(),
            ..PipelineSettings::default()
        },
    );
    let summary = pipeline.run(tree.path()).await.unwrap();
    assert_eq!(summary.processed, 6);
}

#[tokio::test]
async fn removal_deletes_record_and_document() {
    use smartdir_core::monitor::FileProcessor;

    let tree = tempdir().unwrap();
    let db = tempdir().unwrap();
    let file = tree.path().join("old.log");
    fs::write(&file, "log").unwrap();
    let h = harness(db.path()).await;

    let record = h.pipeline.process(&file).await.unwrap();
    fs::remove_file(&file).unwrap();
    FileProcessor::forget(&h.pipeline, &file).await.unwrap();

    assert!(h.sink.all_files().await.unwrap().is_empty());
    assert!(h.index.inner.get(record.id).is_none());
    // forgetting an unknown path is a no-op
    FileProcessor::forget(&h.pipeline, &file).await.unwrap();
}

#[tokio::test]
async fn directories_are_not_processed_as_files() {
    let tree = tempdir().unwrap();
    let db = tempdir().unwrap();
    let h = harness(db.path()).await;
    let err = h.pipeline.process(tree.path()).await.unwrap_err();
    assert!(matches!(err, ProcessError::NotRegular { .. }));
    assert!(err.to_string().starts_with("not a regular file"));
}

#[tokio::test]
async fn failing_index_creation_aborts_the_run() {
    let tree = tempdir().unwrap();
    let db = tempdir().unwrap();
    seed_tree(tree.path());
    let h = harness(db.path()).await;
    h.index.fail_ensure.store(true, Ordering::SeqCst);

    let err = h.pipeline.run(tree.path()).await.unwrap_err();
    assert!(matches!(err, PipelineError::IndexSetup(_)));
    let prefix = tree.path().to_string_lossy();
    assert!(h.sink.query_by_path_prefix(&prefix).await.unwrap().is_empty());
}

#[tokio::test]
async fn failing_searchable_settings_do_not_abort_the_run() {
    let tree = tempdir().unwrap();
    let db = tempdir().unwrap();
    seed_tree(tree.path());
    let h = harness(db.path()).await;
    h.index.report_created.store(true, Ordering::SeqCst);
    h.index.fail_configure.store(true, Ordering::SeqCst);

    let summary = h.pipeline.run(tree.path()).await.unwrap();
    assert_eq!(summary.processed, 6);
    assert_eq!(h.index.inner.documents().len(), 6);
}

#[tokio::test]
async fn missing_root_is_a_walk_error() {
    let tree = tempdir().unwrap();
    let db = tempdir().unwrap();
    let h = harness(db.path()).await;

    let err = h
        .pipeline
        .run(&tree.path().join("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Walk(_)));
}
