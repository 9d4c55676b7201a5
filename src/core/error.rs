//! 控制平面错误类型
//!
//! 每一类失败都有明确的降级去向：注册表同步失败 → 沿用旧注册表；Worker 启动失败 → 只丢弃该 Worker；
//! 工具调用失败 → 以文本形式回填给模型；后端失败 → 由调用方映射到各自的兜底结果。

use thiserror::Error;

/// 语言模型后端错误
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Request timed out")]
    Timeout,

    /// 后端返回的 API 错误对象（鉴权、限流、参数错误等）
    #[error("Backend rejected request: {0}")]
    Api(String),

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Empty response")]
    EmptyResponse,

    /// 后端未配置或不可用（如脚本化客户端回复耗尽）
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Worker 子进程与传输层错误
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker '{worker}': {reason}")]
    Spawn { worker: String, reason: String },

    #[error("Handshake with worker '{worker}' failed: {reason}")]
    Handshake { worker: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 对端返回的 JSON-RPC error 对象，或 isError=true 的工具结果
    #[error("Worker error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Worker closed the connection")]
    Closed,

    #[error("Worker request '{0}' timed out")]
    Timeout(String),
}

/// 注册表扫描与持久化错误
#[derive(Error, Debug)]
pub enum CatalogError {
    /// 本地扫描源不可达：不致命，注册表保持原样
    #[error("Worker directory unavailable: {0}")]
    ScanUnavailable(String),

    #[error("Catalog store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid manifest {path}: {reason}")]
    Manifest { path: String, reason: String },
}

/// 工具分发错误（最终以文本回填给模型，不中断循环）
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Malformed tool name '{0}', expected <worker>__<operation>")]
    MalformedToolName(String),

    #[error("Service '{worker}' not active. Available: {available}")]
    InactiveWorker { worker: String, available: String },

    #[error("Tool call failed on '{worker}': {source}")]
    Worker {
        worker: String,
        #[source]
        source: WorkerError,
    },
}
