use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use storage::models::FileRow;

/// Closed set of buckets a file can land in. `Other` is the catch-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Images,
    Documents,
    Videos,
    Audio,
    Code,
    Archives,
    #[default]
    Other,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Images,
        Category::Documents,
        Category::Videos,
        Category::Audio,
        Category::Code,
        Category::Archives,
        Category::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Images => "images",
            Category::Documents => "documents",
            Category::Videos => "videos",
            Category::Audio => "audio",
            Category::Code => "code",
            Category::Archives => "archives",
            Category::Other => "other",
        }
    }

    /// Lenient parse used for stored rows: anything unknown is `Other`.
    pub fn from_label(label: &str) -> Self {
        label.parse().unwrap_or_default()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCategory(pub String);

impl fmt::Display for UnknownCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid category: {}", self.0)
    }
}

impl std::error::Error for UnknownCategory {}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or(UnknownCategory(normalized))
    }
}

/// Everything the per-file routine learned about a file, before it has an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: String,
    pub hash: String,
    pub size: u64,
    pub mime_type: String,
    pub category: Category,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
    pub hash: String,
    pub size: u64,
    pub mime_type: String,
    pub category: Category,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<FileRow> for FileRecord {
    fn from(row: FileRow) -> Self {
        let tags = row.tag_list();
        Self {
            id: row.id,
            category: Category::from_label(&row.category),
            size: u64::try_from(row.size).unwrap_or_default(),
            path: row.path,
            hash: row.hash,
            mime_type: row.mime_type,
            tags,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Shape pushed to the search index, keyed by the record id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub id: i64,
    pub path: String,
    pub category: Category,
    pub hash: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl From<&FileRecord> for IndexDocument {
    fn from(record: &FileRecord) -> Self {
        Self {
            id: record.id,
            path: record.path.clone(),
            category: record.category,
            hash: record.hash.clone(),
            tags: record.tags.clone(),
        }
    }
}

/// Paths that share one content hash. Always has at least two members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub hash: String,
    pub paths: Vec<String>,
    /// Recorded size of the first member.
    pub size: u64,
}

impl DuplicateGroup {
    pub fn keep(&self) -> &str {
        &self.paths[0]
    }

    pub fn extras(&self) -> &[String] {
        &self.paths[1..]
    }

    pub fn reclaimable_bytes(&self) -> u64 {
        self.size * self.extras().len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_through_labels() {
        for c in Category::ALL {
            assert_eq!(c.as_str().parse::<Category>().unwrap(), c);
        }
        assert_eq!(" Images\n".parse::<Category>().unwrap(), Category::Images);
    }

    #[test]
    fn unknown_labels_fall_back_to_other() {
        assert!("spreadsheets".parse::<Category>().is_err());
        assert_eq!(Category::from_label("spreadsheets"), Category::Other);
        assert_eq!(Category::default(), Category::Other);
    }

    #[test]
    fn document_serializes_category_lowercase() {
        let doc = IndexDocument {
            id: 7,
            path: "/tmp/a.pdf".into(),
            category: Category::Documents,
            hash: "ab".into(),
            tags: vec!["report".into()],
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["category"], "documents");
        assert_eq!(json["id"], 7);
    }
}
