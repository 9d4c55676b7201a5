//! 记忆层：进程内短期对话历史（长期记忆由独立的 memory Worker 提供）

pub mod conversation;

pub use conversation::{ConversationMemory, Message, Role, ToolCall};
