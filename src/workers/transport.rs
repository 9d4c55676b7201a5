//! Worker 传输层：rmcp 客户端跑在子进程 stdio 上
//!
//! 握手包含 initialize 与一次完整的 tools/list，两步共用同一个握手时限；任一步超时或失败都会
//! 关掉该子进程并只让这一个 Worker 启动失败。子进程以 kill_on_drop 启动，close 时取消服务，
//! 超过宽限期则随句柄丢弃一起强杀。

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use rmcp::service::{Peer, RoleClient, RunningService, ServiceError};
use rmcp::transport::TokioChildProcess;
use rmcp::ServiceExt;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::catalog::LocalWorker;
use crate::config::WorkersSection;
use crate::core::error::WorkerError;
use crate::workers::protocol::{
    self, CallToolResult, OperationDescriptor, ReadResourceResult, METHOD_CALL_TOOL, METHOD_LIST_TOOLS,
    METHOD_READ_RESOURCE,
};

/// 取消服务后等待子进程退出的时长
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// 已完成握手的 Worker 连接
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    async fn list_operations(&self) -> Result<Vec<OperationDescriptor>, WorkerError>;

    /// 调用操作，返回第一条内容的文本
    async fn call(&self, operation: &str, arguments: Value) -> Result<String, WorkerError>;

    async fn read_resource(&self, uri: &str) -> Result<String, WorkerError>;

    /// 关闭连接并回收子进程；可重复调用
    async fn close(&self);
}

/// 启动 Worker 并完成握手
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, worker: &LocalWorker) -> Result<Box<dyn WorkerTransport>, WorkerError>;
}

/// 子进程 stdio 上的 rmcp 客户端会话
pub struct StdioTransport {
    worker: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningService<RoleClient, ()>>>,
    /// 握手阶段拿到的操作列表
    operations: Vec<OperationDescriptor>,
    call_timeout: Option<Duration>,
}

fn handshake_error(worker: &str, reason: impl Into<String>) -> WorkerError {
    WorkerError::Handshake {
        worker: worker.to_string(),
        reason: reason.into(),
    }
}

/// 按清单组装子进程命令（工作目录为清单所在目录）
fn worker_command(worker: &LocalWorker, settings: &WorkersSection) -> Command {
    let manifest = &worker.manifest;
    let mut cmd = Command::new(&manifest.command);
    cmd.args(&manifest.args)
        .current_dir(&worker.dir)
        .kill_on_drop(true);
    if !settings.inherit_env {
        cmd.env_clear();
        if let Ok(path) = std::env::var("PATH") {
            cmd.env("PATH", path);
        }
    }
    cmd.envs(&manifest.env);
    cmd
}

impl StdioTransport {
    /// 启动子进程，在握手时限内完成 initialize 与 tools/list
    pub async fn connect(worker: &LocalWorker, settings: &WorkersSection) -> Result<Self, WorkerError> {
        let name = worker.name().to_string();
        let command = &worker.manifest.command;

        let (process, stderr) = TokioChildProcess::builder(worker_command(worker, settings))
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| WorkerError::Spawn {
                worker: name.clone(),
                reason: format!("'{}': {}", command, e),
            })?;

        // stderr 转进日志，避免管道写满阻塞子进程
        if let Some(stderr) = stderr {
            let worker_name = name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(worker = %worker_name, "stderr: {}", line);
                }
            });
        }
        tracing::info!(worker = %name, command = %command, "Worker spawned");

        let limit = Duration::from_secs(settings.handshake_timeout_secs);
        let service = tokio::time::timeout(limit, ().serve(process))
            .await
            .map_err(|_| handshake_error(&name, format!("no initialize response within {}s", limit.as_secs())))?
            .map_err(|e| handshake_error(&name, e.to_string()))?;
        tracing::debug!(worker = %name, "initialize acknowledged");

        let peer = service.peer().clone();
        let listed = match tokio::time::timeout(limit, peer.list_all_tools()).await {
            Ok(Ok(tools)) => protocol::decode::<_, Vec<OperationDescriptor>>(METHOD_LIST_TOOLS, tools)
                .map_err(|e| handshake_error(&name, e.to_string())),
            Ok(Err(e)) => Err(handshake_error(&name, format!("{} failed: {}", METHOD_LIST_TOOLS, e))),
            Err(_) => Err(handshake_error(
                &name,
                format!("no {} response within {}s", METHOD_LIST_TOOLS, limit.as_secs()),
            )),
        };
        let operations = match listed {
            Ok(ops) => ops,
            Err(e) => {
                let _ = tokio::time::timeout(CLOSE_GRACE, service.cancel()).await;
                return Err(e);
            }
        };

        Ok(Self {
            worker: name,
            peer,
            service: Mutex::new(Some(service)),
            operations,
            call_timeout: settings.call_timeout_secs.map(Duration::from_secs),
        })
    }

    async fn ensure_open(&self) -> Result<(), WorkerError> {
        if self.service.lock().await.is_none() {
            return Err(WorkerError::Closed);
        }
        Ok(())
    }

    async fn limited<T, F>(&self, method: &str, fut: F) -> Result<T, WorkerError>
    where
        F: std::future::Future<Output = Result<T, ServiceError>>,
    {
        let result = match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| WorkerError::Timeout(method.to_string()))?,
            None => fut.await,
        };
        result.map_err(|e| WorkerError::Protocol(format!("{} failed: {}", method, e)))
    }
}

#[async_trait]
impl WorkerTransport for StdioTransport {
    async fn list_operations(&self) -> Result<Vec<OperationDescriptor>, WorkerError> {
        self.ensure_open().await?;
        Ok(self.operations.clone())
    }

    async fn call(&self, operation: &str, arguments: Value) -> Result<String, WorkerError> {
        self.ensure_open().await?;
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Err(WorkerError::Protocol(format!(
                    "arguments for '{}' must be an object, got {}",
                    operation, other
                )))
            }
        };
        let params = serde_json::from_value(json!({ "name": operation, "arguments": arguments }))
            .map_err(|e| WorkerError::Protocol(e.to_string()))?;
        let result = self
            .limited(METHOD_CALL_TOOL, self.peer.call_tool(params))
            .await?;
        let result: CallToolResult = protocol::decode(METHOD_CALL_TOOL, result)?;
        result.into_text()
    }

    async fn read_resource(&self, uri: &str) -> Result<String, WorkerError> {
        self.ensure_open().await?;
        let params = serde_json::from_value(json!({ "uri": uri }))
            .map_err(|e| WorkerError::Protocol(e.to_string()))?;
        let result = self
            .limited(METHOD_READ_RESOURCE, self.peer.read_resource(params))
            .await?;
        let result: ReadResourceResult = protocol::decode(METHOD_READ_RESOURCE, result)?;
        Ok(result.into_text())
    }

    async fn close(&self) {
        let Some(service) = self.service.lock().await.take() else {
            return;
        };
        match tokio::time::timeout(CLOSE_GRACE, service.cancel()).await {
            Ok(Ok(reason)) => {
                tracing::debug!(worker = %self.worker, ?reason, "Worker session cancelled");
            }
            Ok(Err(e)) => {
                tracing::warn!(worker = %self.worker, error = %e, "Worker session task failed");
            }
            Err(_) => {
                tracing::debug!(worker = %self.worker, "Worker killed after grace period");
            }
        }
    }
}

/// 默认启动器：stdio 子进程 + 限时握手
pub struct StdioLauncher {
    settings: WorkersSection,
}

impl StdioLauncher {
    pub fn new(settings: WorkersSection) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl WorkerLauncher for StdioLauncher {
    async fn launch(&self, worker: &LocalWorker) -> Result<Box<dyn WorkerTransport>, WorkerError> {
        let transport = StdioTransport::connect(worker, &self.settings).await?;
        Ok(Box::new(transport))
    }
}
