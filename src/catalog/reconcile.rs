//! 注册表同步
//!
//! diff 是纯集合运算：added = 本地 − 已存，removed = 已存 − 本地，updated = 两边都有且指纹不同。
//! 同步后注册表与本地扫描完全一致；再同步一次差分为空。

use std::collections::BTreeMap;
use std::path::Path;

use crate::catalog::{scan_workers, LocalWorker, SqliteCatalog, WorkerDescriptor};
use crate::core::error::CatalogError;

/// 同步差分，名称均已排序
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogDiff {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl CatalogDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// 一次同步的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanReport {
    Synced(CatalogDiff),
    /// 本地扫描源不可达，注册表未改动
    Unavailable { reason: String },
}

pub fn diff(local: &[WorkerDescriptor], persisted: &[WorkerDescriptor]) -> CatalogDiff {
    let local: BTreeMap<&str, &str> = local
        .iter()
        .map(|w| (w.name.as_str(), w.fingerprint.as_str()))
        .collect();
    let persisted: BTreeMap<&str, &str> = persisted
        .iter()
        .map(|w| (w.name.as_str(), w.fingerprint.as_str()))
        .collect();

    let mut out = CatalogDiff::default();
    for (name, fp) in &local {
        match persisted.get(name) {
            None => out.added.push(name.to_string()),
            Some(old) if old != fp => out.updated.push(name.to_string()),
            Some(_) => {}
        }
    }
    out.removed = persisted
        .keys()
        .filter(|name| !local.contains_key(*name))
        .map(|name| name.to_string())
        .collect();
    out
}

/// 扫描 workers_dir 并把差分写入注册表，同时返回本地可启动的 Worker
pub fn sync_catalog(
    workers_dir: &Path,
    store: &mut SqliteCatalog,
) -> Result<(ScanReport, Vec<LocalWorker>), CatalogError> {
    let local = match scan_workers(workers_dir) {
        Ok(workers) => workers,
        Err(CatalogError::ScanUnavailable(reason)) => {
            tracing::warn!(dir = %workers_dir.display(), %reason, "Worker directory unavailable, catalog left untouched");
            return Ok((ScanReport::Unavailable { reason }, Vec::new()));
        }
        Err(e) => return Err(e),
    };

    let descriptors: Vec<WorkerDescriptor> = local.iter().map(|w| w.descriptor.clone()).collect();
    let persisted = store.load_all()?;
    let changes = diff(&descriptors, &persisted);

    if changes.is_empty() {
        tracing::info!(count = local.len(), "Catalog up-to-date");
    } else {
        tracing::info!(
            added = ?changes.added,
            updated = ?changes.updated,
            removed = ?changes.removed,
            "Reconciling catalog"
        );
        store.apply(&changes, &descriptors)?;
    }
    Ok((ScanReport::Synced(changes), local))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn desc(name: &str, fp: &str) -> WorkerDescriptor {
        WorkerDescriptor {
            name: name.into(),
            description: String::new(),
            fingerprint: fp.into(),
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn test_diff_added_updated_removed() {
        let persisted = vec![desc("A", "h1"), desc("B", "h")];
        let local = vec![desc("A", "h2"), desc("C", "h")];
        let d = diff(&local, &persisted);
        assert_eq!(d.added, vec!["C"]);
        assert_eq!(d.updated, vec!["A"]);
        assert_eq!(d.removed, vec!["B"]);
    }

    #[test]
    fn test_diff_unchanged_is_empty() {
        let both = vec![desc("A", "h1"), desc("B", "h2")];
        assert!(diff(&both, &both).is_empty());
    }

    fn manifest(dir: &Path, name: &str, description: &str) {
        std::fs::write(
            dir.join(format!("{}.toml", name)),
            format!("description = \"{}\"\ncommand = \"true\"\n", description),
        )
        .unwrap();
    }

    #[test]
    fn test_sync_is_idempotent_and_mirrors_scan() {
        let dir = tempfile::tempdir().unwrap();
        manifest(dir.path(), "A", "first");
        manifest(dir.path(), "B", "second");
        let mut store = SqliteCatalog::open_in_memory().unwrap();

        let (report, local) = sync_catalog(dir.path(), &mut store).unwrap();
        assert_eq!(local.len(), 2);
        match report {
            ScanReport::Synced(d) => assert_eq!(d.added, vec!["A", "B"]),
            other => panic!("unexpected {:?}", other),
        }

        let (again, _) = sync_catalog(dir.path(), &mut store).unwrap();
        assert_eq!(again, ScanReport::Synced(CatalogDiff::default()));

        std::fs::remove_file(dir.path().join("B.toml")).unwrap();
        manifest(dir.path(), "A", "first, edited");
        manifest(dir.path(), "C", "third");
        let (report, _) = sync_catalog(dir.path(), &mut store).unwrap();
        assert_eq!(
            report,
            ScanReport::Synced(CatalogDiff {
                added: vec!["C".into()],
                updated: vec!["A".into()],
                removed: vec!["B".into()],
            })
        );
        let names: Vec<_> = store.load_all().unwrap().into_iter().map(|w| w.name).collect();
        assert_eq!(names, vec!["A", "C"]);
    }

    #[test]
    fn test_unavailable_scan_leaves_catalog_untouched() {
        let dir = tempfile::tempdir().unwrap();
        manifest(dir.path(), "A", "first");
        let mut store = SqliteCatalog::open_in_memory().unwrap();
        sync_catalog(dir.path(), &mut store).unwrap();

        let (report, local) = sync_catalog(&dir.path().join("missing"), &mut store).unwrap();
        assert!(matches!(report, ScanReport::Unavailable { .. }));
        assert!(local.is_empty());
        assert_eq!(store.load_all().unwrap().len(), 1);
    }
}
