//! 注册表持久化（SQLite）
//!
//! 表 `workers(name PRIMARY KEY, description, fingerprint, last_seen)`；
//! 只有同步流程会写入，且一次同步的所有变更在同一事务里提交。

use std::path::Path;

use rusqlite::{params, Connection};

use crate::catalog::{CatalogDiff, WorkerDescriptor};
use crate::core::error::CatalogError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS workers (
    name        TEXT PRIMARY KEY,
    description TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    last_seen   TEXT NOT NULL
);
";

pub struct SqliteCatalog {
    conn: Connection,
}

impl SqliteCatalog {
    /// 打开（必要时创建）数据库文件
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, CatalogError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// 全部条目，按名称排序
    pub fn load_all(&self) -> Result<Vec<WorkerDescriptor>, CatalogError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, description, fingerprint, last_seen FROM workers ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok(WorkerDescriptor {
                name: row.get(0)?,
                description: row.get(1)?,
                fingerprint: row.get(2)?,
                last_seen: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// 按差分写入：新增 / 更新 / 删除，未变化的条目不动
    pub fn apply(&mut self, diff: &CatalogDiff, local: &[WorkerDescriptor]) -> Result<(), CatalogError> {
        if diff.is_empty() {
            return Ok(());
        }
        let find = |name: &str| local.iter().find(|w| w.name == name);

        let tx = self.conn.transaction()?;
        for name in &diff.added {
            if let Some(w) = find(name) {
                tx.execute(
                    "INSERT INTO workers (name, description, fingerprint, last_seen) VALUES (?1, ?2, ?3, ?4)",
                    params![w.name, w.description, w.fingerprint, w.last_seen],
                )?;
            }
        }
        for name in &diff.updated {
            if let Some(w) = find(name) {
                tx.execute(
                    "UPDATE workers SET description = ?2, fingerprint = ?3, last_seen = ?4 WHERE name = ?1",
                    params![w.name, w.description, w.fingerprint, w.last_seen],
                )?;
            }
        }
        for name in &diff.removed {
            tx.execute("DELETE FROM workers WHERE name = ?1", params![name])?;
        }
        tx.commit()?;
        Ok(())
    }
}
