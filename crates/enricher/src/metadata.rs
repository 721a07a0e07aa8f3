//! File records and the store the pipeline writes enrichment results to.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{file_repo, Database, DatabaseError};
use crate::error::MetadataError;

/// Lifecycle of an uploaded file: `uploading -> processing -> ready | error`,
/// or straight to `ready` for images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Uploading,
    Processing,
    Ready,
    Error,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Error)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(Self::Uploading),
            "processing" => Ok(Self::Processing),
            "ready" => Ok(Self::Ready),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown file status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub file_path: String,
    pub file_type: String,
    pub file_size: Option<u64>,
    pub mime_type: Option<String>,
    pub status: FileStatus,
    pub tags: Vec<String>,
    pub summary: Option<String>,
    pub keywords: Vec<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// A fresh record with no enrichment data.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        file_path: impl Into<String>,
        file_type: impl Into<String>,
        status: FileStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            file_path: file_path.into(),
            file_type: file_type.into(),
            file_size: None,
            mime_type: None,
            status,
            tags: Vec::new(),
            summary: None,
            keywords: Vec::new(),
            processed_at: (status == FileStatus::Ready).then_some(now),
            created_at: now,
            updated_at: now,
        }
    }

    fn to_row(&self) -> Result<file_repo::FileRow, MetadataError> {
        Ok(file_repo::FileRow {
            id: self.id.clone(),
            name: self.name.clone(),
            file_path: self.file_path.clone(),
            file_type: self.file_type.clone(),
            file_size: self.file_size.map(|s| s.min(i64::MAX as u64) as i64),
            mime_type: self.mime_type.clone(),
            status: self.status.as_str().to_string(),
            tags: serde_json::to_string(&self.tags)?,
            summary: self.summary.clone(),
            keywords: serde_json::to_string(&self.keywords)?,
            processed_at: self.processed_at.map(|t| t.to_rfc3339()),
            created_at: self.created_at.to_rfc3339(),
            updated_at: self.updated_at.to_rfc3339(),
        })
    }

    fn from_row(row: file_repo::FileRow) -> Result<Self, MetadataError> {
        let corrupt = |reason: String| {
            MetadataError::Database(DatabaseError::CorruptRow {
                table: "files",
                reason,
            })
        };
        let timestamp = |value: &str| {
            DateTime::parse_from_rfc3339(value)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| corrupt(format!("bad timestamp '{}': {}", value, e)))
        };

        Ok(Self {
            status: row.status.parse().map_err(corrupt)?,
            tags: serde_json::from_str(&row.tags)?,
            keywords: serde_json::from_str(&row.keywords)?,
            processed_at: row.processed_at.as_deref().map(timestamp).transpose()?,
            created_at: timestamp(&row.created_at)?,
            updated_at: timestamp(&row.updated_at)?,
            file_size: row.file_size.and_then(|s| u64::try_from(s).ok()),
            id: row.id,
            name: row.name,
            file_path: row.file_path,
            file_type: row.file_type,
            mime_type: row.mime_type,
            summary: row.summary,
        })
    }
}

/// A status transition for one file record.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataUpdate {
    Processing,
    /// Terminal success with the enrichment result. A record that is already
    /// ready keeps its first `processed_at`.
    Ready {
        tags: Vec<String>,
        summary: Option<String>,
        keywords: Vec<String>,
        processed_at: DateTime<Utc>,
    },
    /// Terminal failure. Ignored for records that already reached `ready`.
    Error,
}

impl MetadataUpdate {
    pub fn status(&self) -> FileStatus {
        match self {
            Self::Processing => FileStatus::Processing,
            Self::Ready { .. } => FileStatus::Ready,
            Self::Error => FileStatus::Error,
        }
    }
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Inserts the record unless one with the same id exists. Returns
    /// whether it was inserted.
    async fn register(&self, record: &FileRecord) -> Result<bool, MetadataError>;

    /// Applies `update`. Returns false when no record with `file_id` exists,
    /// which is not an error.
    async fn update(&self, file_id: &str, update: MetadataUpdate) -> Result<bool, MetadataError>;

    async fn find(&self, file_id: &str) -> Result<Option<FileRecord>, MetadataError>;
}

/// `files` table in the local SQLite database.
#[derive(Clone)]
pub struct SqliteMetadataStore {
    db: Database,
}

impl SqliteMetadataStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, MetadataError>
    where
        F: FnOnce(&Database) -> Result<T, MetadataError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| MetadataError::Task(e.to_string()))?
    }

    /// Record counts per status, for the CLI.
    pub async fn status_counts(&self) -> Result<Vec<(String, u64)>, MetadataError> {
        self.blocking(|db| Ok(file_repo::count_by_status(db)?)).await
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn register(&self, record: &FileRecord) -> Result<bool, MetadataError> {
        let row = record.to_row()?;
        self.blocking(move |db| Ok(file_repo::insert_if_absent(db, &row)?))
            .await
    }

    async fn update(&self, file_id: &str, update: MetadataUpdate) -> Result<bool, MetadataError> {
        let id = file_id.to_string();
        let status = update.status();

        let applied = self
            .blocking(move |db| {
                let now = Utc::now().to_rfc3339();
                let applied = match update {
                    MetadataUpdate::Processing => file_repo::mark_processing(db, &id, &now)?,
                    MetadataUpdate::Error => file_repo::mark_error(db, &id, &now)?,
                    MetadataUpdate::Ready {
                        tags,
                        summary,
                        keywords,
                        processed_at,
                    } => file_repo::mark_ready(
                        db,
                        &id,
                        &serde_json::to_string(&tags)?,
                        summary.as_deref(),
                        &serde_json::to_string(&keywords)?,
                        &processed_at.to_rfc3339(),
                    )?,
                };
                if applied {
                    return Ok(true);
                }
                // Zero rows: either the record is gone or a guard kept it as is.
                Ok(file_repo::exists(db, &id)?)
            })
            .await?;

        if !applied {
            tracing::warn!(file_id, status = %status, "No file record to update");
        }
        Ok(applied)
    }

    async fn find(&self, file_id: &str) -> Result<Option<FileRecord>, MetadataError> {
        let id = file_id.to_string();
        let row = self
            .blocking(move |db| Ok(file_repo::find_by_id(db, &id)?))
            .await?;
        row.map(FileRecord::from_row).transpose()
    }
}
