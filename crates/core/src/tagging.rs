use crate::classifier::{derive_tags, ClassificationPort};
use crate::error::SinkError;
use crate::index::SEARCHABLE_FIELDS;
use crate::models::IndexDocument;
use crate::sink::MetadataSink;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

const REINDEX_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TagReport {
    pub tagged: usize,
    /// Records that already carried tags.
    pub skipped: usize,
    pub failed: usize,
}

/// Derives and stores tags for every untagged record under `prefix`. Each
/// record is updated together with its index document; a failure on one
/// record does not stop the rest.
pub async fn tag_files(
    sink: &dyn MetadataSink,
    classifier: &dyn ClassificationPort,
    prefix: &str,
) -> Result<TagReport, SinkError> {
    let mut report = TagReport::default();
    for record in sink.query_by_path_prefix(prefix).await? {
        if !record.tags.is_empty() {
            report.skipped += 1;
            continue;
        }
        let tags = derive_tags(classifier, Path::new(&record.path), record.category).await;
        if tags.is_empty() {
            report.skipped += 1;
            continue;
        }
        match sink.set_tags(&record.path, &tags).await {
            Ok(Some(_)) => {
                info!(path = %record.path, tags = %tags.join(","), "tagged");
                report.tagged += 1;
            }
            Ok(None) => report.skipped += 1,
            Err(err) => {
                warn!(path = %record.path, "failed to store tags: {err}");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

/// Pushes every stored record to the search index and waits for it to apply.
pub async fn reindex_all(sink: &dyn MetadataSink) -> Result<usize, SinkError> {
    let index = sink.index();
    let configured = match index.configure_searchable(&SEARCHABLE_FIELDS).await {
        Ok(task) => index.await_task(task, REINDEX_TIMEOUT).await,
        Err(err) => Err(err),
    };
    if let Err(err) = configured {
        warn!("failed to update searchable attributes: {err}");
    }

    let docs: Vec<IndexDocument> = sink.all_files().await?.iter().map(IndexDocument::from).collect();
    if docs.is_empty() {
        return Ok(0);
    }
    let task = index.index_documents(&docs).await?;
    index.await_task(task, REINDEX_TIMEOUT).await?;
    info!(documents = docs.len(), "reindex complete");
    Ok(docs.len())
}
