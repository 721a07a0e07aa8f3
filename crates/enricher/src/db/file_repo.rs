//! File record repository: operations on the `files` table.
//!
//! Status writes are guarded in SQL so a record never moves backwards:
//! once `ready`, only another `ready` write touches it.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw `files` row. `tags` and `keywords` hold JSON arrays.
#[derive(Debug, Clone)]
pub struct FileRow {
    pub id: String,
    pub name: String,
    pub file_path: String,
    pub file_type: String,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
    pub status: String,
    pub tags: String,
    pub summary: Option<String>,
    pub keywords: String,
    pub processed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl FileRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            file_path: row.get("file_path")?,
            file_type: row.get("file_type")?,
            file_size: row.get("file_size")?,
            mime_type: row.get("mime_type")?,
            status: row.get("status")?,
            tags: row.get("tags")?,
            summary: row.get("summary")?,
            keywords: row.get("keywords")?,
            processed_at: row.get("processed_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a row unless one with the same id exists. Returns whether a row
/// was written.
pub fn insert_if_absent(db: &Database, file: &FileRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "INSERT INTO files (id, name, file_path, file_type, file_size, mime_type, status,
             tags, summary, keywords, processed_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(id) DO NOTHING",
            params![
                file.id,
                file.name,
                file.file_path,
                file.file_type,
                file.file_size,
                file.mime_type,
                file.status,
                file.tags,
                file.summary,
                file.keywords,
                file.processed_at,
                file.created_at,
                file.updated_at,
            ],
        )?;
        Ok(changed > 0)
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<FileRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM files WHERE id = ?1",
                params![id],
                FileRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

pub fn exists(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM files WHERE id = ?1", params![id], |r| r.get(0))
            .optional()?;
        Ok(found.is_some())
    })
}

/// Writes the enrichment result and flips the record to `ready`.
///
/// A record that is already `ready` keeps its original `processed_at`. A
/// record already forced to `error` is left alone.
pub fn mark_ready(
    db: &Database,
    id: &str,
    tags: &str,
    summary: Option<&str>,
    keywords: &str,
    processed_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE files SET
                status = 'ready',
                tags = ?2,
                summary = ?3,
                keywords = ?4,
                processed_at = CASE
                    WHEN status = 'ready' AND processed_at IS NOT NULL THEN processed_at
                    ELSE ?5
                END,
                updated_at = ?5
             WHERE id = ?1 AND status <> 'error'",
            params![id, tags, summary, keywords, processed_at],
        )?;
        Ok(changed > 0)
    })
}

/// Moves a record to `error` unless it already reached `ready`.
pub fn mark_error(db: &Database, id: &str, updated_at: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE files SET status = 'error', updated_at = ?2
             WHERE id = ?1 AND status <> 'ready'",
            params![id, updated_at],
        )?;
        Ok(changed > 0)
    })
}

/// Moves a record to `processing` while it is still `uploading`.
pub fn mark_processing(db: &Database, id: &str, updated_at: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE files SET status = 'processing', updated_at = ?2
             WHERE id = ?1 AND status IN ('uploading', 'processing')",
            params![id, updated_at],
        )?;
        Ok(changed > 0)
    })
}

/// Record counts grouped by status, in lifecycle order.
pub fn count_by_status(db: &Database) -> Result<Vec<(String, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM files GROUP BY status
             ORDER BY CASE status
                WHEN 'uploading' THEN 0 WHEN 'processing' THEN 1
                WHEN 'ready' THEN 2 ELSE 3 END",
        )?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
