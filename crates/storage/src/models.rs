use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the `files` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FileRow {
    pub id: i64,
    pub path: String,
    pub hash: String,
    pub size: i64,
    pub mime_type: String,
    pub category: String,
    pub tags: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRow {
    /// Tags are stored comma-joined; empty segments are dropped.
    pub fn tag_list(&self) -> Vec<String> {
        self.tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}
