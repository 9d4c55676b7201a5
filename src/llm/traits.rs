//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock / 脚本化）实现 LlmClient：chat 支持工具调用，
//! complete 是不带工具的纯文本便捷封装（仲裁、追问判断、改写都走它）。

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

pub use crate::core::error::LlmError;
use crate::memory::{Message, ToolCall};

/// 暴露给模型的一个可调用工具：name 为 `<worker>__<operation>`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// 工具选择策略
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ToolChoice {
    #[default]
    Auto,
    /// 禁止调用工具
    None,
    /// 强制调用指定函数（结构化输出）
    Function(String),
}

/// 一次后端请求
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: ToolChoice,
    pub parallel_tool_calls: bool,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = choice;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// 后端回复：文本与工具调用可能同时出现
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ChatReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            content: None,
            tool_calls: vec![ToolCall {
                id: id.into(),
                name: name.into(),
                arguments: arguments.into(),
            }],
        }
    }

    /// 去除首尾空白后的文本，无内容时为空串
    pub fn text_or_empty(&self) -> &str {
        self.content.as_deref().map(str::trim).unwrap_or("")
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 带工具的完整请求
    async fn chat(&self, request: ChatRequest) -> Result<ChatReply, LlmError>;

    /// 不带工具的纯文本完成
    async fn complete(
        &self,
        messages: &[Message],
        temperature: Option<f32>,
        max_tokens: Option<u32>,
    ) -> Result<String, LlmError> {
        let request = ChatRequest {
            messages: messages.to_vec(),
            tool_choice: ToolChoice::None,
            temperature,
            max_tokens,
            ..ChatRequest::default()
        };
        let reply = self.chat(request).await?;
        Ok(reply.content.unwrap_or_default())
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }

    /// 模型名，仅用于日志与 status
    fn model_name(&self) -> &str {
        "unknown"
    }
}
