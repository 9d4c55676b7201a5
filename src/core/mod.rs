//! 核心层：错误类型与请求编排

pub mod error;
pub mod orchestrator;

pub use error::{CatalogError, DispatchError, LlmError, WorkerError};
pub use orchestrator::{
    create_index_from_config, create_llm_from_config, create_orchestrator, Orchestrator,
    OrchestratorParts, StatusReport, NOT_LOCAL, NO_SERVICE,
};
