//! Worker 会话管理
//!
//! activate 先无条件拆除所有旧会话，再并发启动本次选中的 Worker；单个 Worker 启动或握手失败
//! 只丢弃它自己。存活会话的操作被展开成 `<worker>__<operation>` 工具列表，没有任何操作的会话
//! 不会保留，保证会话表与工具列表始终一致。

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use serde_json::Value;

use crate::catalog::LocalWorker;
use crate::core::error::{DispatchError, WorkerError};
use crate::llm::ToolSpec;
use crate::workers::transport::{WorkerLauncher, WorkerTransport};

/// 工具名中 Worker 与操作的分隔符
pub const TOOL_NAME_SEPARATOR: &str = "__";

/// 审计日志里参数预览的最大字符数
const AUDIT_ARGS_PREVIEW: usize = 200;

pub fn qualify(worker: &str, operation: &str) -> String {
    format!("{}{}{}", worker, TOOL_NAME_SEPARATOR, operation)
}

/// 按第一个 `__` 拆分，两边都不能为空
pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
    name.split_once(TOOL_NAME_SEPARATOR)
        .filter(|(w, op)| !w.is_empty() && !op.is_empty())
}

/// 一个已激活的 Worker：独占其传输句柄
pub struct ActiveSession {
    pub worker: String,
    pub tools: Vec<ToolSpec>,
    transport: Box<dyn WorkerTransport>,
}

impl std::fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSession")
            .field("worker", &self.worker)
            .field("tools", &self.tools.len())
            .finish()
    }
}

pub struct SessionManager {
    launcher: Arc<dyn WorkerLauncher>,
    /// 保持选择顺序
    sessions: Vec<ActiveSession>,
}

impl SessionManager {
    pub fn new(launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self {
            launcher,
            sessions: Vec::new(),
        }
    }

    /// 拆除旧会话并激活 selected，返回聚合后的工具列表
    pub async fn activate(&mut self, selected: &[LocalWorker]) -> Vec<ToolSpec> {
        self.teardown().await;

        let mut unique: Vec<&LocalWorker> = Vec::new();
        for worker in selected {
            if !unique.iter().any(|w| w.name() == worker.name()) {
                unique.push(worker);
            }
        }

        let launcher = Arc::clone(&self.launcher);
        let attempts = unique.into_iter().map(|worker| {
            let launcher = Arc::clone(&launcher);
            async move { start_session(launcher.as_ref(), worker).await }
        });

        for outcome in join_all(attempts).await {
            match outcome {
                Ok(Some(session)) => {
                    tracing::info!(worker = %session.worker, tools = session.tools.len(), "Worker session active");
                    self.sessions.push(session);
                }
                Ok(None) => {}
                Err((worker, e)) => {
                    tracing::warn!(worker = %worker, error = %e, "Worker activation failed, skipped");
                }
            }
        }
        self.tools()
    }

    /// 关闭并清空所有会话
    pub async fn teardown(&mut self) {
        for session in self.sessions.drain(..) {
            session.transport.close().await;
            tracing::debug!(worker = %session.worker, "Worker session closed");
        }
    }

    pub fn tools(&self) -> Vec<ToolSpec> {
        self.sessions.iter().flat_map(|s| s.tools.iter().cloned()).collect()
    }

    pub fn active_workers(&self) -> Vec<&str> {
        self.sessions.iter().map(|s| s.worker.as_str()).collect()
    }

    pub fn is_active(&self, worker: &str) -> bool {
        self.session(worker).is_some()
    }

    fn session(&self, worker: &str) -> Option<&ActiveSession> {
        self.sessions.iter().find(|s| s.worker == worker)
    }

    fn inactive(&self, worker: &str) -> DispatchError {
        DispatchError::InactiveWorker {
            worker: worker.to_string(),
            available: self.active_workers().join(", "),
        }
    }

    /// 按 `<worker>__<operation>` 分发一次工具调用
    pub async fn dispatch(&self, qualified: &str, arguments: Value) -> Result<String, DispatchError> {
        let (worker, operation) = split_qualified(qualified)
            .ok_or_else(|| DispatchError::MalformedToolName(qualified.to_string()))?;
        self.call(worker, operation, arguments).await
    }

    pub async fn call(&self, worker: &str, operation: &str, arguments: Value) -> Result<String, DispatchError> {
        let session = self.session(worker).ok_or_else(|| self.inactive(worker))?;

        let args_preview: String = arguments.to_string().chars().take(AUDIT_ARGS_PREVIEW).collect();
        let start = Instant::now();
        let result = session.transport.call(operation, arguments).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let (ok, outcome) = match &result {
            Ok(_) => (true, "ok".to_string()),
            Err(e) => (false, e.to_string()),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "worker": worker,
            "operation": operation,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(target: "hive::audit", "{}", audit);

        result.map_err(|source| DispatchError::Worker {
            worker: worker.to_string(),
            source,
        })
    }

    pub async fn read_resource(&self, worker: &str, uri: &str) -> Result<String, DispatchError> {
        let session = self.session(worker).ok_or_else(|| self.inactive(worker))?;
        session
            .transport
            .read_resource(uri)
            .await
            .map_err(|source| DispatchError::Worker {
                worker: worker.to_string(),
                source,
            })
    }
}

/// 启动 + 列操作；没有操作的 Worker 关闭后返回 None
async fn start_session(
    launcher: &dyn WorkerLauncher,
    worker: &LocalWorker,
) -> Result<Option<ActiveSession>, (String, WorkerError)> {
    let name = worker.name().to_string();
    let transport = launcher
        .launch(worker)
        .await
        .map_err(|e| (name.clone(), e))?;

    let operations = match transport.list_operations().await {
        Ok(ops) => ops,
        Err(e) => {
            transport.close().await;
            return Err((name, e));
        }
    };

    if operations.is_empty() {
        tracing::info!(worker = %name, "Worker exposes no operations, closed");
        transport.close().await;
        return Ok(None);
    }

    let tools = operations
        .into_iter()
        .map(|op| ToolSpec {
            name: qualify(&name, &op.name),
            description: op.description.unwrap_or_default(),
            input_schema: op.input_schema,
        })
        .collect();

    Ok(Some(ActiveSession {
        worker: name,
        tools,
        transport,
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::{WorkerDescriptor, WorkerManifest};
    use crate::workers::protocol::OperationDescriptor;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn local_worker(name: &str, description: &str) -> LocalWorker {
        LocalWorker {
            descriptor: WorkerDescriptor {
                name: name.into(),
                description: description.into(),
                fingerprint: "fp".into(),
                last_seen: Utc::now(),
            },
            manifest: WorkerManifest {
                description: description.into(),
                command: "true".into(),
                args: vec![],
                env: HashMap::new(),
                source: None,
            },
            dir: PathBuf::from("."),
        }
    }

    struct FakeTransport {
        worker: String,
        operations: Vec<String>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl WorkerTransport for FakeTransport {
        async fn list_operations(&self) -> Result<Vec<OperationDescriptor>, WorkerError> {
            Ok(self
                .operations
                .iter()
                .map(|op| OperationDescriptor {
                    name: op.clone(),
                    description: Some(format!("{} on {}", op, self.worker)),
                    input_schema: json!({"type": "object"}),
                })
                .collect())
        }

        async fn call(&self, operation: &str, arguments: Value) -> Result<String, WorkerError> {
            if operation == "explode" {
                return Err(WorkerError::Rpc {
                    code: -32000,
                    message: "boom".into(),
                });
            }
            Ok(format!("{}:{}:{}", self.worker, operation, arguments))
        }

        async fn read_resource(&self, uri: &str) -> Result<String, WorkerError> {
            Ok(format!("resource {}", uri))
        }

        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// 按名称配置操作列表；不在表中的 Worker 启动失败
    #[derive(Default)]
    pub(crate) struct FakeLauncher {
        pub operations: HashMap<String, Vec<String>>,
        pub closed: Arc<AtomicUsize>,
        pub launched: Arc<AtomicUsize>,
    }

    impl FakeLauncher {
        pub(crate) fn with(mut self, worker: &str, ops: &[&str]) -> Self {
            self.operations
                .insert(worker.into(), ops.iter().map(|s| s.to_string()).collect());
            self
        }
    }

    #[async_trait]
    impl WorkerLauncher for FakeLauncher {
        async fn launch(&self, worker: &LocalWorker) -> Result<Box<dyn WorkerTransport>, WorkerError> {
            self.launched.fetch_add(1, Ordering::SeqCst);
            let ops = self.operations.get(worker.name()).ok_or_else(|| WorkerError::Spawn {
                worker: worker.name().into(),
                reason: "no such binary".into(),
            })?;
            Ok(Box::new(FakeTransport {
                worker: worker.name().into(),
                operations: ops.clone(),
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    #[test]
    fn test_split_qualified() {
        assert_eq!(split_qualified("billing__get_invoice"), Some(("billing", "get_invoice")));
        assert_eq!(split_qualified("a__b__c"), Some(("a", "b__c")));
        assert_eq!(split_qualified("nodelimiter"), None);
        assert_eq!(split_qualified("__op"), None);
    }

    #[tokio::test]
    async fn test_failed_worker_is_isolated() {
        let launcher = FakeLauncher::default().with("billing", &["get_invoice", "pay"]);
        let mut manager = SessionManager::new(Arc::new(launcher));
        let tools = manager
            .activate(&[local_worker("broken", "x"), local_worker("billing", "y")])
            .await;

        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["billing__get_invoice", "billing__pay"]);
        assert_eq!(manager.active_workers(), vec!["billing"]);
    }

    #[tokio::test]
    async fn test_activate_tears_down_previous_sessions() {
        let launcher = FakeLauncher::default()
            .with("billing", &["get_invoice"])
            .with("naming", &["lookup"]);
        let closed = Arc::clone(&launcher.closed);
        let mut manager = SessionManager::new(Arc::new(launcher));

        manager.activate(&[local_worker("billing", "")]).await;
        manager.activate(&[local_worker("naming", "")]).await;
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(manager.active_workers(), vec!["naming"]);
        assert!(!manager.is_active("billing"));

        manager.teardown().await;
        assert_eq!(closed.load(Ordering::SeqCst), 2);
        assert!(manager.tools().is_empty());
    }

    #[tokio::test]
    async fn test_worker_without_operations_is_dropped() {
        let launcher = FakeLauncher::default().with("empty", &[]).with("naming", &["lookup"]);
        let closed = Arc::clone(&launcher.closed);
        let mut manager = SessionManager::new(Arc::new(launcher));
        manager
            .activate(&[local_worker("empty", ""), local_worker("naming", "")])
            .await;
        assert_eq!(manager.active_workers(), vec!["naming"]);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_selection_launches_once() {
        let launcher = Arc::new(FakeLauncher::default().with("naming", &["lookup"]));
        let mut manager = SessionManager::new(launcher.clone());
        manager
            .activate(&[local_worker("naming", ""), local_worker("naming", "")])
            .await;
        assert_eq!(launcher.launched.load(Ordering::SeqCst), 1);
        assert_eq!(manager.tools().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_routes_and_reports_errors() {
        let launcher = FakeLauncher::default().with("billing", &["get_invoice", "explode"]);
        let mut manager = SessionManager::new(Arc::new(launcher));
        manager.activate(&[local_worker("billing", "")]).await;

        let ok = manager
            .dispatch("billing__get_invoice", json!({"id": "7"}))
            .await
            .unwrap();
        assert_eq!(ok, r#"billing:get_invoice:{"id":"7"}"#);

        let inactive = manager.dispatch("naming__lookup", json!({})).await.unwrap_err();
        assert!(inactive.to_string().contains("not active"));
        assert!(inactive.to_string().contains("billing"));

        assert!(matches!(
            manager.dispatch("nodelimiter", json!({})).await,
            Err(DispatchError::MalformedToolName(_))
        ));
        assert!(matches!(
            manager.dispatch("billing__explode", json!({})).await,
            Err(DispatchError::Worker { .. })
        ));

        let res = manager.read_resource("billing", "memo://all").await.unwrap();
        assert_eq!(res, "resource memo://all");
    }
}
