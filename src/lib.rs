//! Hive - 对话式 Worker 路由控制平面
//!
//! 模块划分：
//! - **catalog**: Worker 注册表（本地清单扫描、SQLite 持久化、对账）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与请求编排器
//! - **llm**: 后端客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / 脚本化）与嵌入
//! - **memory**: 有界对话历史
//! - **observability**: tracing 初始化与实时状态推送
//! - **react**: 追问判断、ReAct 工具循环、合规审查
//! - **router**: 相似度检索、置信度分层、仲裁与粘滞
//! - **workers**: Worker 进程传输（stdio JSON-RPC）与会话管理

pub mod catalog;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod router;
pub mod workers;
