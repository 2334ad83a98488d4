use crate::error::SinkError;
use crate::models::{DuplicateGroup, FileRecord};
use crate::sink::MetadataSink;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct DuplicateReport {
    pub groups: Vec<DuplicateGroup>,
    pub reclaimable_bytes: u64,
}

impl DuplicateReport {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn duplicate_files(&self) -> usize {
        self.groups.iter().map(|g| g.extras().len()).sum()
    }
}

#[derive(Debug, Default)]
pub struct RemovalReport {
    pub removed: usize,
    pub freed_bytes: u64,
    pub failures: Vec<(PathBuf, String)>,
}

/// Groups records sharing a hash, keeping groups in order of first
/// appearance and members in record order.
pub fn group_by_hash(records: &[FileRecord]) -> Vec<DuplicateGroup> {
    let mut slots: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<DuplicateGroup> = Vec::new();
    for record in records {
        match slots.get(record.hash.as_str()) {
            Some(&slot) => groups[slot].paths.push(record.path.clone()),
            None => {
                slots.insert(record.hash.as_str(), groups.len());
                groups.push(DuplicateGroup {
                    hash: record.hash.clone(),
                    paths: vec![record.path.clone()],
                    size: record.size,
                });
            }
        }
    }
    groups.retain(|g| g.paths.len() > 1);
    groups
}

/// Duplicate groups among records under `prefix`. Sizes come from the
/// store, not from disk.
pub async fn find_duplicates(
    sink: &dyn MetadataSink,
    prefix: &str,
) -> Result<DuplicateReport, SinkError> {
    let records = sink.query_by_path_prefix(prefix).await?;
    let groups = group_by_hash(&records);
    let reclaimable_bytes = groups.iter().map(DuplicateGroup::reclaimable_bytes).sum();
    Ok(DuplicateReport {
        groups,
        reclaimable_bytes,
    })
}

/// Deletes every member but the first of each group, from disk and then from
/// the store. A member only counts as removed when both steps succeed. A copy
/// already gone from disk is reported as a failure, though its stale record
/// is still dropped.
pub async fn remove_duplicates(sink: &dyn MetadataSink, report: &DuplicateReport) -> RemovalReport {
    let mut out = RemovalReport::default();
    for group in &report.groups {
        for extra in group.extras() {
            let path = PathBuf::from(extra);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    warn!(path = %extra, "duplicate already missing on disk; dropping its record");
                    if let Err(err) = sink.delete_file(extra).await {
                        warn!(path = %extra, "failed to delete stale record: {err}");
                    }
                    out.failures.push((path, err.to_string()));
                    continue;
                }
                Err(err) => {
                    warn!(path = %extra, "failed to remove duplicate: {err}");
                    out.failures.push((path, err.to_string()));
                    continue;
                }
            }
            match sink.delete_file(extra).await {
                Ok(_) => {
                    info!(path = %extra, keep = %group.keep(), "removed duplicate");
                    out.removed += 1;
                    out.freed_bytes += group.size;
                }
                Err(err) => {
                    warn!(path = %extra, "failed to delete record: {err}");
                    out.failures.push((path, err.to_string()));
                }
            }
        }
    }
    out
}
