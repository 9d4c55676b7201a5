//! Worker 注册表
//!
//! - scan：扫描本地清单目录，得到 LocalWorker（含内容指纹）
//! - store：SQLite 持久化的注册表
//! - reconcile：本地扫描与持久化注册表的纯集合差分，并把差分写回
//!
//! 路由只读取内存快照 `Catalog`，快照在每次同步后重建。

pub mod reconcile;
pub mod scan;
pub mod store;

use std::path::PathBuf;

use chrono::{DateTime, Utc};

pub use reconcile::{diff, sync_catalog, CatalogDiff, ScanReport};
pub use scan::{fingerprint, scan_workers, WorkerManifest};
pub use store::SqliteCatalog;

/// 注册表条目，name 唯一
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerDescriptor {
    pub name: String,
    pub description: String,
    pub fingerprint: String,
    pub last_seen: DateTime<Utc>,
}

/// 本地可启动的 Worker：注册信息 + 启动清单 + 清单所在目录
#[derive(Debug, Clone)]
pub struct LocalWorker {
    pub descriptor: WorkerDescriptor,
    pub manifest: WorkerManifest,
    pub dir: PathBuf,
}

impl LocalWorker {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

/// 注册表内存快照，保持存储中的顺序（按名称）
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    workers: Vec<WorkerDescriptor>,
}

impl Catalog {
    pub fn new(workers: Vec<WorkerDescriptor>) -> Self {
        Self { workers }
    }

    pub fn get(&self, name: &str) -> Option<&WorkerDescriptor> {
        self.workers.iter().find(|w| w.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn descriptors(&self) -> &[WorkerDescriptor] {
        &self.workers
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
