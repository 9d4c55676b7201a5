//! Worker 层：能力协议结果解读、rmcp 子进程传输与会话管理

pub mod protocol;
pub mod session;
pub mod transport;

pub use protocol::OperationDescriptor;
pub use session::{qualify, split_qualified, ActiveSession, SessionManager, TOOL_NAME_SEPARATOR};
pub use transport::{StdioLauncher, StdioTransport, WorkerLauncher, WorkerTransport};
