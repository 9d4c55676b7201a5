//! OpenAI 兼容 API 客户端
//!
//! 基于 async-openai 的 `Client<OpenAIConfig>` 调用 `/chat/completions`，支持 function calling、
//! 强制工具选择与 `parallel_tool_calls`；DeepSeek、OpenAI、自建代理等任意兼容端点均可用。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls, ChatCompletionNamedToolChoice,
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionToolChoiceOption,
    ChatCompletionTools, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    CreateChatCompletionResponse, FunctionCall, FunctionObjectArgs, ToolChoiceOptions,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{ChatReply, ChatRequest, LlmClient, LlmError, ToolChoice, ToolSpec};
use crate::memory::{Message, Role, ToolCall};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 async-openai Client、端点与 model 名
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    base_url: String,
    model: String,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>, timeout_secs: u64) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let base_url = base_url.unwrap_or(OPENAI_BASE_URL).trim_end_matches('/').to_string();
        let config = OpenAIConfig::new()
            .with_api_base(base_url.as_str())
            .with_api_key(api_key);

        // 超时由底层 reqwest Client 负责，async-openai 复用它发请求
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "HTTP client builder failed, using defaults");
                reqwest::Client::new()
            });

        Self {
            client: Client::with_config(config).with_http_client(http),
            base_url,
            model: model.to_string(),
            usage: TokenUsage::new(),
        }
    }

    /// DeepSeek 兼容端点：Key 取 DEEPSEEK_API_KEY（再退到 OPENAI_API_KEY），
    /// 未给 model 时读 DEEPSEEK_MODEL，缺省 deepseek-chat
    pub fn deepseek(model: Option<&str>, timeout_secs: u64) -> Self {
        let api_key = std::env::var("DEEPSEEK_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok();
        let model = model
            .map(String::from)
            .or_else(|| std::env::var("DEEPSEEK_MODEL").ok())
            .unwrap_or_else(|| DEEPSEEK_CHAT.to_string());
        Self::new(Some(DEEPSEEK_BASE_URL), &model, api_key.as_deref(), timeout_secs)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 组装请求；tools 为空时不携带 tools / tool_choice / parallel_tool_calls
    #[allow(deprecated)]
    pub fn build_request(&self, request: &ChatRequest) -> Result<CreateChatCompletionRequest, LlmError> {
        let messages = request
            .messages
            .iter()
            .map(to_openai_message)
            .collect::<Result<Vec<_>, _>>()?;

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.as_str()).messages(messages);

        if !request.tools.is_empty() {
            let tools = request
                .tools
                .iter()
                .map(to_openai_tool)
                .collect::<Result<Vec<_>, _>>()?;
            args.tools(tools)
                .tool_choice(to_tool_choice(&request.tool_choice))
                .parallel_tool_calls(request.parallel_tool_calls);
        }
        if let Some(t) = request.temperature {
            args.temperature(t);
        }
        // 兼容端点（DeepSeek 等）只认 max_tokens
        if let Some(m) = request.max_tokens {
            args.max_tokens(m);
        }
        args.build().map_err(map_openai_error)
    }
}

fn to_openai_message(m: &Message) -> Result<ChatCompletionRequestMessage, LlmError> {
    let message = match m.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(m.content.as_str())
            .build()
            .map_err(map_openai_error)?
            .into(),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(m.content.as_str())
            .build()
            .map_err(map_openai_error)?
            .into(),
        Role::Assistant => {
            let mut args = ChatCompletionRequestAssistantMessageArgs::default();
            if !m.content.is_empty() || m.tool_calls.is_empty() {
                args.content(m.content.as_str());
            }
            if !m.tool_calls.is_empty() {
                let calls: Vec<ChatCompletionMessageToolCalls> = m
                    .tool_calls
                    .iter()
                    .map(|c| {
                        ChatCompletionMessageToolCall {
                            id: c.id.clone(),
                            function: FunctionCall {
                                name: c.name.clone(),
                                arguments: c.arguments.clone(),
                            },
                        }
                        .into()
                    })
                    .collect();
                args.tool_calls(calls);
            }
            args.build().map_err(map_openai_error)?.into()
        }
        Role::Tool => ChatCompletionRequestToolMessageArgs::default()
            .tool_call_id(m.tool_call_id.clone().unwrap_or_default())
            .content(m.content.as_str())
            .build()
            .map_err(map_openai_error)?
            .into(),
    };
    Ok(message)
}

fn to_openai_tool(tool: &ToolSpec) -> Result<ChatCompletionTools, LlmError> {
    let function = FunctionObjectArgs::default()
        .name(tool.name.as_str())
        .description(tool.description.as_str())
        .parameters(tool.input_schema.clone())
        .build()
        .map_err(map_openai_error)?;
    Ok(ChatCompletionTools::Function(ChatCompletionTool { function }))
}

fn to_tool_choice(choice: &ToolChoice) -> ChatCompletionToolChoiceOption {
    match choice {
        ToolChoice::Auto => ChatCompletionToolChoiceOption::Mode(ToolChoiceOptions::Auto),
        ToolChoice::None => ChatCompletionToolChoiceOption::Mode(ToolChoiceOptions::None),
        ToolChoice::Function(name) => {
            ChatCompletionToolChoiceOption::Function(ChatCompletionNamedToolChoice::from(name.as_str()))
        }
    }
}

/// 取首个 choice，转换为内部回复；同时返回 (prompt, completion) token 数
fn into_reply(response: CreateChatCompletionResponse) -> Result<(ChatReply, Option<(u64, u64)>), LlmError> {
    let usage = response
        .usage
        .map(|u| (u64::from(u.prompt_tokens), u64::from(u.completion_tokens)));
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or(LlmError::EmptyResponse)?;
    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter_map(|c| match c {
            ChatCompletionMessageToolCalls::Function(call) => Some(ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            }),
            ChatCompletionMessageToolCalls::Custom(_) => None,
        })
        .collect();
    Ok((
        ChatReply {
            content: choice.message.content,
            tool_calls,
        },
        usage,
    ))
}

pub(crate) fn map_openai_error(e: OpenAIError) -> LlmError {
    match e {
        OpenAIError::Reqwest(e) if e.is_timeout() => LlmError::Timeout,
        OpenAIError::ApiError(e) => LlmError::Api(e.to_string()),
        OpenAIError::JSONDeserialize(e, _) => LlmError::Decode(e.to_string()),
        other => LlmError::Request(other.to_string()),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatReply, LlmError> {
        let request = self.build_request(&request)?;
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        let (reply, usage) = into_reply(response)?;
        // 提取 token 使用统计
        if let Some((prompt, completion)) = usage {
            self.usage.add(prompt, completion);
        }
        tracing::debug!(
            model = %self.model,
            tool_calls = reply.tool_calls.len(),
            "chat completion received"
        );
        Ok(reply)
    }
}
