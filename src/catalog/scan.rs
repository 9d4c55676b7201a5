//! 本地 Worker 扫描
//!
//! workers_dir 下每个 `*.toml` 是一个 Worker 清单，文件名（不含扩展名）即 Worker 名。
//! 指纹 = SHA-256(清单字节 ‖ source 文件字节)，任一改变都会触发注册表更新。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::catalog::{LocalWorker, WorkerDescriptor};
use crate::core::error::CatalogError;

/// Worker 启动清单
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerManifest {
    /// 能力描述，用于相似度路由与仲裁
    pub description: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Worker 实现文件（相对清单目录），参与指纹计算
    #[serde(default)]
    pub source: Option<PathBuf>,
}

pub fn fingerprint(manifest_bytes: &[u8], source_bytes: Option<&[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(manifest_bytes);
    if let Some(src) = source_bytes {
        hasher.update(src);
    }
    hex::encode(hasher.finalize())
}

/// 扫描目录；目录不存在或不可读时返回 ScanUnavailable，单个坏清单只跳过自己
pub fn scan_workers(dir: &Path) -> Result<Vec<LocalWorker>, CatalogError> {
    if !dir.is_dir() {
        return Err(CatalogError::ScanUnavailable(dir.display().to_string()));
    }

    let mut workers = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
    {
        let entry = entry.map_err(|e| CatalogError::ScanUnavailable(e.to_string()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        match load_worker(dir, path) {
            Ok(worker) => workers.push(worker),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping worker manifest"),
        }
    }
    tracing::debug!(dir = %dir.display(), count = workers.len(), "Local workers scanned");
    Ok(workers)
}

fn load_worker(dir: &Path, path: &Path) -> Result<LocalWorker, CatalogError> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| CatalogError::Manifest {
            path: path.display().to_string(),
            reason: "file name is not valid UTF-8".into(),
        })?;
    if name.contains("__") {
        return Err(CatalogError::Manifest {
            path: path.display().to_string(),
            reason: "worker name must not contain '__'".into(),
        });
    }

    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    let manifest: WorkerManifest = toml::from_str(&text).map_err(|e| CatalogError::Manifest {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let source_bytes = match &manifest.source {
        Some(src) => Some(std::fs::read(dir.join(src))?),
        None => None,
    };

    Ok(LocalWorker {
        descriptor: WorkerDescriptor {
            name,
            description: manifest.description.trim().to_string(),
            fingerprint: fingerprint(&bytes, source_bytes.as_deref()),
            last_seen: Utc::now(),
        },
        manifest,
        dir: dir.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn test_scan_reads_manifests_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "todo_service.toml", "description = \"Task list\"\ncommand = \"todo\"\n");
        write(
            dir.path(),
            "billing.toml",
            "description = \"Invoices and payments\"\ncommand = \"python3\"\nargs = [\"billing.py\"]\n\n[env]\nREGION = \"eu\"\n",
        );
        write(dir.path(), "README.md", "not a manifest");

        let workers = scan_workers(dir.path()).unwrap();
        let names: Vec<_> = workers.iter().map(|w| w.name()).collect();
        assert_eq!(names, vec!["billing", "todo_service"]);
        assert_eq!(workers[0].manifest.args, vec!["billing.py"]);
        assert_eq!(workers[0].manifest.env["REGION"], "eu");
        assert_eq!(workers[0].descriptor.fingerprint.len(), 64);
    }

    #[test]
    fn test_fingerprint_tracks_source_file() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "naming.toml",
            "description = \"Naming\"\ncommand = \"python3\"\nsource = \"naming.py\"\n",
        );
        write(dir.path(), "naming.py", "print('v1')");
        let before = scan_workers(dir.path()).unwrap()[0].descriptor.fingerprint.clone();

        write(dir.path(), "naming.py", "print('v2')");
        let after = scan_workers(dir.path()).unwrap()[0].descriptor.fingerprint.clone();
        assert_ne!(before, after);
    }

    #[test]
    fn test_invalid_manifest_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "broken.toml", "command = 1");
        write(dir.path(), "ok.toml", "description = \"ok\"\ncommand = \"true\"\n");
        let workers = scan_workers(dir.path()).unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].name(), "ok");
    }

    #[test]
    fn test_missing_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            scan_workers(&missing),
            Err(CatalogError::ScanUnavailable(_))
        ));
    }
}
