//! 下载记录 SQLite 存储
//!
//! 单表 `download_info`，以 URL 为主键。

use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use super::store::MetadataStore;
use super::types::{DownloadRecord, DownloadStatus};

pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// 打开（或创建）数据库文件
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_tables()?;

        info!("下载记录数据库已打开: {:?}", db_path);
        Ok(store)
    }

    /// 内存数据库，测试使用
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_tables()?;
        Ok(store)
    }

    fn init_tables(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS download_info (
                url TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                save_path TEXT NOT NULL,
                status INTEGER NOT NULL DEFAULT 0,
                total_size INTEGER NOT NULL DEFAULT 0,
                current_size INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_download_info_status ON download_info(status)",
            [],
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow!("获取数据库锁失败: {}", e))
    }

    fn update_column(&self, url: &str, column: &str, value: i64) -> Result<()> {
        let conn = self.lock()?;
        let sql = format!(
            "UPDATE download_info SET {} = ?1, updated_at = ?2 WHERE url = ?3",
            column
        );
        let changed = conn.execute(&sql, params![value, Utc::now().timestamp(), url])?;
        if changed == 0 {
            debug!("记录不存在，忽略更新: url={}, column={}", url, column);
        }
        Ok(())
    }

    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<DownloadRecord> {
        let created_at: i64 = row.get(6)?;
        let updated_at: i64 = row.get(7)?;
        Ok(DownloadRecord {
            url: row.get(0)?,
            name: row.get(1)?,
            save_path: row.get(2)?,
            status: DownloadStatus::from_code(row.get(3)?),
            total_size: row.get::<_, i64>(4)?.max(0) as u64,
            current_size: row.get::<_, i64>(5)?.max(0) as u64,
            created_at: Utc
                .timestamp_opt(created_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
            updated_at: Utc
                .timestamp_opt(updated_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }
}

const SELECT_COLUMNS: &str =
    "url, name, save_path, status, total_size, current_size, created_at, updated_at";

impl MetadataStore for SqliteMetadataStore {
    fn insert(&self, url: &str, name: &str, save_path: &str) -> Result<()> {
        let conn = self.lock()?;
        let now = Utc::now().timestamp();
        conn.execute(
            r#"
            INSERT OR IGNORE INTO download_info (
                url, name, save_path, status, total_size, current_size, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, 0, 0, ?5, ?5)
            "#,
            params![url, name, save_path, DownloadStatus::Default.code(), now],
        )?;
        Ok(())
    }

    fn update_status(&self, url: &str, status: DownloadStatus) -> Result<()> {
        self.update_column(url, "status", status.code())
    }

    fn update_current_size(&self, url: &str, size: u64) -> Result<()> {
        self.update_column(url, "current_size", size as i64)
    }

    fn update_total_size(&self, url: &str, size: u64) -> Result<()> {
        self.update_column(url, "total_size", size as i64)
    }

    fn delete(&self, url: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM download_info WHERE url = ?1", params![url])?;
        Ok(())
    }

    fn get_status(&self, url: &str) -> Result<Option<DownloadStatus>> {
        let conn = self.lock()?;
        let code: Option<i64> = conn
            .query_row(
                "SELECT status FROM download_info WHERE url = ?1",
                params![url],
                |row| row.get(0),
            )
            .optional()?;
        Ok(code.map(DownloadStatus::from_code))
    }

    fn get(&self, url: &str) -> Result<Option<DownloadRecord>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM download_info WHERE url = ?1", SELECT_COLUMNS);
        let record = conn
            .query_row(&sql, params![url], Self::row_to_record)
            .optional()?;
        Ok(record)
    }

    fn list(&self) -> Result<Vec<DownloadRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM download_info ORDER BY created_at ASC",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::row_to_record)?;
        let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}
