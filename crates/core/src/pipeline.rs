use crate::classifier::{AiClassifier, ClassificationPort};
use crate::config::AppConfig;
use crate::error::{PipelineError, ProcessError, SinkError};
use crate::fingerprint;
use crate::index::{MeiliIndex, MemoryIndex, SearchIndex, SEARCHABLE_FIELDS};
use crate::mime::detect_mime_type;
use crate::models::{FileRecord, IndexDocument, ScannedFile};
use crate::monitor::FileProcessor;
use crate::sink::{FileTransaction, MetadataSink, SqliteSink, Upserted};
use crate::walker::{build_globset, FileWalker};
use globset::GlobSet;
use providers::meili::{MeiliClient, MeiliConfig};
use providers::openai::{OpenAiConfig, OpenAiProvider};
use providers::ProviderRegistry;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::{self, JoinSet};
use tracing::{debug, info, warn};

/// Only the first few failures are kept; the rest are counted and dropped.
const ERROR_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub excludes: GlobSet,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: 100,
            excludes: GlobSet::empty(),
        }
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub discovered: usize,
    pub processed: usize,
}

/// Fingerprints, classifies and persists files. Cheap to clone; every clone
/// shares the same classifier and sink.
#[derive(Clone)]
pub struct Pipeline {
    classifier: Arc<dyn ClassificationPort>,
    sink: Arc<dyn MetadataSink>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        classifier: Arc<dyn ClassificationPort>,
        sink: Arc<dyn MetadataSink>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            classifier,
            sink,
            settings,
        }
    }

    /// Creates the index on first use. Creation failure is fatal; configuring
    /// searchable fields is not.
    pub async fn prepare_index(&self) -> Result<(), PipelineError> {
        let index = self.sink.index();
        let created = index.ensure_index().await.map_err(PipelineError::IndexSetup)?;
        if !created {
            return Ok(());
        }
        info!("created search index");
        let configured = match index.configure_searchable(&SEARCHABLE_FIELDS).await {
            Ok(task) => index.await_task(task, self.sink.task_timeout()).await,
            Err(err) => Err(err),
        };
        if let Err(err) = configured {
            warn!("failed to update searchable attributes: {err}");
        }
        Ok(())
    }

    /// Walks `root` and processes every regular file with a bounded pool of
    /// workers. Succeeds only if no file failed; otherwise returns the first
    /// recorded error.
    pub async fn run(&self, root: &Path) -> Result<PipelineSummary, PipelineError> {
        self.prepare_index().await?;

        let started = Instant::now();
        let workers = self.settings.workers.max(1);
        let (path_tx, path_rx) = mpsc::channel::<PathBuf>(self.settings.queue_capacity.max(1));
        let (err_tx, mut err_rx) = mpsc::channel::<PipelineError>(ERROR_CAPACITY);
        let failed = Arc::new(AtomicUsize::new(0));
        let processed = Arc::new(AtomicUsize::new(0));

        let walker = {
            let root = root.to_path_buf();
            let excludes = self.settings.excludes.clone();
            let err_tx = err_tx.clone();
            let failed = failed.clone();
            task::spawn_blocking(move || {
                let mut discovered = 0usize;
                for entry in FileWalker::with_excludes(&root, excludes) {
                    match entry {
                        Ok(path) => {
                            discovered += 1;
                            if path_tx.blocking_send(path).is_err() {
                                // Every worker is gone.
                                break;
                            }
                        }
                        Err(err) => {
                            warn!(root = %root.display(), "walk aborted: {err}");
                            failed.fetch_add(1, Ordering::Relaxed);
                            let _ = err_tx.try_send(PipelineError::Walk(err));
                        }
                    }
                }
                discovered
            })
        };

        let path_rx = Arc::new(Mutex::new(path_rx));
        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let this = self.clone();
            let path_rx = path_rx.clone();
            let err_tx = err_tx.clone();
            let failed = failed.clone();
            let processed = processed.clone();
            pool.spawn(async move {
                loop {
                    let next = path_rx.lock().await.recv().await;
                    let Some(path) = next else { break };
                    match this.process(&path).await {
                        Ok(record) => {
                            debug!(worker, path = %record.path, category = %record.category, "processed");
                            processed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            warn!(worker, "{err}");
                            failed.fetch_add(1, Ordering::Relaxed);
                            let _ = err_tx.try_send(err.into());
                        }
                    }
                }
            });
        }
        drop(err_tx);

        let discovered = walker.await?;
        let mut join_error = None;
        while let Some(joined) = pool.join_next().await {
            if let Err(err) = joined {
                join_error.get_or_insert(err);
            }
        }

        let summary = PipelineSummary {
            discovered,
            processed: processed.load(Ordering::Relaxed),
        };
        let failed = failed.load(Ordering::Relaxed);
        info!(
            root = %root.display(),
            discovered = summary.discovered,
            processed = summary.processed,
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "categorize finished"
        );

        if let Ok(first) = err_rx.try_recv() {
            return Err(first);
        }
        if let Some(err) = join_error {
            return Err(PipelineError::Worker(err));
        }
        Ok(summary)
    }

    /// Stat, fingerprint, classify and persist one file.
    pub async fn process(&self, path: &Path) -> Result<FileRecord, ProcessError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|source| ProcessError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if !meta.is_file() {
            return Err(ProcessError::NotRegular {
                path: path.to_path_buf(),
            });
        }

        let hash = {
            let owned = path.to_path_buf();
            task::spawn_blocking(move || fingerprint::hash_file(&owned))
                .await
                .map_err(|join| std::io::Error::new(std::io::ErrorKind::Other, join))
                .and_then(|res| res)
                .map_err(|source| ProcessError::Hash {
                    path: path.to_path_buf(),
                    source,
                })?
        };

        let category = self.classifier.classify(path).await;
        let file = ScannedFile {
            path: path.to_string_lossy().into_owned(),
            hash,
            size: meta.len(),
            mime_type: detect_mime_type(path).to_string(),
            category,
        };

        self.persist(&file).await.map_err(|source| ProcessError::Sink {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Record upsert and index write as one unit. Any failure rolls the store
    /// back exactly once before the error is returned; an index write that may
    /// already have landed is compensated first.
    async fn persist(&self, file: &ScannedFile) -> Result<FileRecord, SinkError> {
        let mut tx = self.sink.begin().await?;

        let upserted = match tx.upsert_file(file).await {
            Ok(upserted) => upserted,
            Err(err) => {
                self.rollback(tx, &file.path).await;
                return Err(err);
            }
        };

        let doc = IndexDocument::from(&upserted.record);
        let task = match self.sink.index_document(&doc).await {
            Ok(task) => task,
            Err(err) => {
                self.rollback(tx, &file.path).await;
                return Err(err);
            }
        };

        if let Err(err) = self.sink.await_task(task, self.sink.task_timeout()).await {
            self.compensate_index(&upserted).await;
            self.rollback(tx, &file.path).await;
            return Err(err);
        }

        if let Err(err) = tx.commit().await {
            self.compensate_index(&upserted).await;
            return Err(err);
        }
        Ok(upserted.record)
    }

    async fn rollback(&self, tx: Box<dyn FileTransaction>, path: &str) {
        if let Err(err) = tx.rollback().await {
            warn!(path, "rollback failed: {err}");
        }
    }

    /// Puts the index back to what the store will hold after a rollback.
    async fn compensate_index(&self, upserted: &Upserted) {
        let index = self.sink.index();
        let task = match &upserted.previous {
            Some(previous) => index.index_documents(&[IndexDocument::from(previous)]).await,
            None => index.delete_document(upserted.record.id).await,
        };
        let restored = match task {
            Ok(task) => index.await_task(task, self.sink.task_timeout()).await,
            Err(err) => Err(err),
        };
        if let Err(err) = restored {
            warn!(path = %upserted.record.path, "failed to restore index document: {err}");
        }
    }
}

#[async_trait::async_trait]
impl FileProcessor for Pipeline {
    async fn process(&self, path: &Path) -> Result<(), ProcessError> {
        Pipeline::process(self, path).await.map(|_| ())
    }

    async fn forget(&self, path: &Path) -> Result<(), ProcessError> {
        let key = path.to_string_lossy();
        match self.sink.delete_file(&key).await {
            Ok(removed) => {
                if removed {
                    info!(path = %key, "removed record for deleted file");
                }
                Ok(())
            }
            Err(source) => Err(ProcessError::Sink {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

pub fn build_registry(config: &AppConfig) -> anyhow::Result<ProviderRegistry> {
    let reg = ProviderRegistry::new();
    let classifier = &config.classifier;
    let provider = classifier.provider.to_lowercase();
    if provider == "none" {
        return Ok(reg);
    }
    let Some(api_key) = classifier.resolved_api_key() else {
        warn!("{provider} API key not set, AI categorization will use fallback method");
        return Ok(reg);
    };
    let llm = OpenAiProvider::new(OpenAiConfig {
        api_key,
        base_url: classifier.resolved_base_url(),
        chat_model: classifier.model.clone(),
        timeout: Duration::from_secs(classifier.timeout_secs),
    })?;
    Ok(reg
        .with_llm(&provider, Arc::new(llm))
        .set_preferred_llm(&provider))
}

pub fn build_classifier(config: &AppConfig) -> anyhow::Result<Arc<dyn ClassificationPort>> {
    let registry = build_registry(config)?;
    Ok(Arc::new(AiClassifier::from_registry(&registry)))
}

pub fn build_search_index(config: &AppConfig) -> anyhow::Result<Arc<dyn SearchIndex>> {
    match config.search.provider.as_str() {
        "meilisearch" => Ok(Arc::new(MeiliIndex::new(
            MeiliClient::new(MeiliConfig {
                host: config.search.host.clone(),
                index: config.search.index.clone(),
                api_key: config.search.api_key.clone(),
            }),
            Duration::from_secs(config.search.task_timeout_secs),
        ))),
        "memory" => Ok(Arc::new(MemoryIndex::new())),
        #[cfg(feature = "keyword-index")]
        "tantivy" => Ok(Arc::new(crate::index::TantivyIndex::open(
            &config.search.resolved_path(),
        )?)),
        other => anyhow::bail!("unsupported search provider: {other}"),
    }
}

pub async fn build_sink(config: &AppConfig) -> anyhow::Result<Arc<dyn MetadataSink>> {
    let pool = storage::connect(&config.database.path).await?;
    storage::migrate(&pool).await?;
    let index = build_search_index(config)?;
    Ok(Arc::new(SqliteSink::new(
        pool,
        index,
        Duration::from_secs(config.search.task_timeout_secs),
    )))
}

pub async fn build_pipeline(config: &AppConfig) -> anyhow::Result<Pipeline> {
    let sink = build_sink(config).await?;
    let classifier = build_classifier(config)?;
    let settings = PipelineSettings {
        workers: config.pipeline.workers.unwrap_or_else(default_workers),
        queue_capacity: config.pipeline.queue_capacity,
        excludes: build_globset(&config.scan.exclude)?,
    };
    Ok(Pipeline::new(classifier, sink, settings))
}
