//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / 脚本化）与文本嵌入

pub mod embedding;
pub mod mock;
pub mod openai;
pub mod traits;

pub use embedding::{create_embedder_from_config, Embedder, OpenAiEmbedder};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT, OPENAI_BASE_URL};
pub use traits::{ChatReply, ChatRequest, LlmClient, LlmError, ToolChoice, ToolSpec};
