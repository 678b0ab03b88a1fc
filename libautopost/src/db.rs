//! Publish history storage

use async_trait::async_trait;
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use crate::error::{DbError, Result};
use crate::types::{PublishRecord, PublishStatus};

/// Where the orchestrator appends finished publish attempts
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn append(&self, record: &PublishRecord) -> Result<()>;
}

/// Summary counts over the whole history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    pub total: u64,
    pub posted: u64,
    pub failed: u64,
    /// Posted share of all attempts, rounded percent
    pub success_rate: u32,
}

impl HistoryStats {
    fn from_counts(total: u64, posted: u64, failed: u64) -> Self {
        let success_rate = if total > 0 {
            ((posted as f64 / total as f64) * 100.0).round() as u32
        } else {
            0
        };
        Self {
            total,
            posted,
            failed,
            success_rate,
        }
    }
}

/// Filters for [`Database::query_records`]
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub status: Option<PublishStatus>,
    pub account_id: Option<String>,
    /// Unix timestamp, inclusive
    pub since: Option<i64>,
    /// Substring of the content
    pub search: Option<String>,
    pub limit: usize,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Forward slashes keep the URL valid on Windows; mode=rwc creates the file
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub async fn append_record(&self, record: &PublishRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO publish_records (id, content, status, timestamp, account_id, failure_detail)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.content)
        .bind(record.status.as_str())
        .bind(record.timestamp)
        .bind(&record.account_id)
        .bind(&record.failure_detail)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Most recent records first, optionally filtered by status
    pub async fn recent_records(
        &self,
        limit: usize,
        status: Option<PublishStatus>,
    ) -> Result<Vec<PublishRecord>> {
        self.query_records(&RecordQuery {
            status,
            limit,
            ..Default::default()
        })
        .await
    }

    pub async fn query_records(&self, query: &RecordQuery) -> Result<Vec<PublishRecord>> {
        let mut where_clauses = vec!["1=1"];
        if query.status.is_some() {
            where_clauses.push("status = ?");
        }
        if query.account_id.is_some() {
            where_clauses.push("account_id = ?");
        }
        if query.since.is_some() {
            where_clauses.push("timestamp >= ?");
        }
        if query.search.is_some() {
            where_clauses.push("content LIKE '%' || ? || '%'");
        }

        let query_str = format!(
            r#"
            SELECT id, content, status, timestamp, account_id, failure_detail
            FROM publish_records
            WHERE {}
            ORDER BY timestamp DESC, rowid DESC
            LIMIT ?
            "#,
            where_clauses.join(" AND ")
        );

        // Bind in the same order as the WHERE clauses
        let mut sql = sqlx::query(&query_str);
        if let Some(status) = query.status {
            sql = sql.bind(status.as_str());
        }
        if let Some(account_id) = &query.account_id {
            sql = sql.bind(account_id);
        }
        if let Some(since) = query.since {
            sql = sql.bind(since);
        }
        if let Some(search) = &query.search {
            sql = sql.bind(search);
        }
        sql = sql.bind(query.limit as i64);

        let rows = sql.fetch_all(&self.pool).await.map_err(DbError::SqlxError)?;

        rows.iter()
            .map(|r| {
                let status: String = r.get("status");
                Ok(PublishRecord {
                    id: r.get("id"),
                    content: r.get("content"),
                    status: PublishStatus::from_str(&status)?,
                    timestamp: r.get("timestamp"),
                    account_id: r.get("account_id"),
                    failure_detail: r.get("failure_detail"),
                })
            })
            .collect()
    }

    pub async fn stats(&self) -> Result<HistoryStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN status = 'posted' THEN 1 ELSE 0 END), 0) AS posted,
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed
            FROM publish_records
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let total: i64 = row.get("total");
        let posted: i64 = row.get("posted");
        let failed: i64 = row.get("failed");
        Ok(HistoryStats::from_counts(
            total as u64,
            posted as u64,
            failed as u64,
        ))
    }
}

#[async_trait]
impl RecordSink for Database {
    async fn append(&self, record: &PublishRecord) -> Result<()> {
        self.append_record(record).await
    }
}

/// Keeps records in memory; used by tests and dry runs
#[derive(Default)]
pub struct MemoryRecordSink {
    records: Mutex<Vec<PublishRecord>>,
    reject: bool,
}

impl MemoryRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every append fails
    pub fn failing() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            reject: true,
        }
    }

    pub fn records(&self) -> Vec<PublishRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl RecordSink for MemoryRecordSink {
    async fn append(&self, record: &PublishRecord) -> Result<()> {
        if self.reject {
            return Err(DbError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "record sink is read-only",
            ))
            .into());
        }
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AutopostError;
    use tempfile::TempDir;

    async fn temp_db() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("autopost.db");
        let db = Database::new(path.to_str().unwrap()).await.unwrap();
        (dir, db)
    }

    fn record_at(status: PublishStatus, timestamp: i64) -> PublishRecord {
        let mut record = match status {
            PublishStatus::Failed => {
                PublishRecord::failed("1", "content", "submit missing".to_string())
            }
            _ => PublishRecord::posted("1", "content"),
        };
        record.timestamp = timestamp;
        record
    }

    #[tokio::test]
    async fn test_database_initialization_with_invalid_path() {
        #[cfg(unix)]
        let invalid_path = "/tmp/test\0invalid.db";

        #[cfg(windows)]
        let invalid_path = "C:\\invalid<>path\\test.db";

        let result = Database::new(invalid_path).await;
        assert!(matches!(result, Err(AutopostError::Database(_))));
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let (_dir, db) = temp_db().await;
        let record = PublishRecord::failed("acc-1", "BTC update", "no submit".to_string());
        db.append_record(&record).await.unwrap();

        let records = db.recent_records(10, None).await.unwrap();
        assert_eq!(records, vec![record]);
    }

    #[tokio::test]
    async fn test_records_are_append_only() {
        let (_dir, db) = temp_db().await;
        let record = PublishRecord::posted("1", "first");
        db.append_record(&record).await.unwrap();

        let mut duplicate = PublishRecord::posted("1", "second");
        duplicate.id = record.id.clone();
        assert!(db.append_record(&duplicate).await.is_err());

        let records = db.recent_records(10, None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "first");
    }

    #[tokio::test]
    async fn test_recent_records_order_limit_and_filter() {
        let (_dir, db) = temp_db().await;
        db.append_record(&record_at(PublishStatus::Posted, 100)).await.unwrap();
        db.append_record(&record_at(PublishStatus::Failed, 200)).await.unwrap();
        db.append_record(&record_at(PublishStatus::Posted, 300)).await.unwrap();

        let all = db.recent_records(10, None).await.unwrap();
        let stamps: Vec<i64> = all.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![300, 200, 100]);

        assert_eq!(db.recent_records(2, None).await.unwrap().len(), 2);

        let failed = db
            .recent_records(10, Some(PublishStatus::Failed))
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].failure_detail.as_deref(), Some("submit missing"));
    }

    #[tokio::test]
    async fn test_query_by_account_since_and_search() {
        let (_dir, db) = temp_db().await;
        let mut old = PublishRecord::posted("a", "old BTC news");
        old.timestamp = 100;
        let mut other = PublishRecord::posted("b", "ETH news");
        other.timestamp = 200;
        let mut recent = PublishRecord::posted("a", "fresh BTC news");
        recent.timestamp = 300;
        for record in [&old, &other, &recent] {
            db.append_record(record).await.unwrap();
        }

        let by_account = db
            .query_records(&RecordQuery {
                account_id: Some("a".to_string()),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_account, vec![recent.clone(), old.clone()]);

        let since = db
            .query_records(&RecordQuery {
                since: Some(200),
                search: Some("BTC".to_string()),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(since, vec![recent]);
    }

    #[tokio::test]
    async fn test_stats() {
        let (_dir, db) = temp_db().await;
        assert_eq!(db.stats().await.unwrap(), HistoryStats::default());

        db.append_record(&record_at(PublishStatus::Posted, 1)).await.unwrap();
        db.append_record(&record_at(PublishStatus::Posted, 2)).await.unwrap();
        db.append_record(&record_at(PublishStatus::Failed, 3)).await.unwrap();

        let stats = db.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.posted, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.success_rate, 67);
    }

    #[tokio::test]
    async fn test_reopen_keeps_history() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("autopost.db");
        let path = path.to_str().unwrap();

        let db = Database::new(path).await.unwrap();
        db.append(&PublishRecord::posted("1", "kept")).await.unwrap();
        drop(db);

        let db = Database::new(path).await.unwrap();
        assert_eq!(db.recent_records(10, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_sink() {
        let sink = MemoryRecordSink::new();
        sink.append(&PublishRecord::posted("1", "a")).await.unwrap();
        assert_eq!(sink.records().len(), 1);

        let failing = MemoryRecordSink::failing();
        assert!(failing.append(&PublishRecord::posted("1", "a")).await.is_err());
        assert!(failing.records().is_empty());
    }
}
