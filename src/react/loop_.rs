//! ReAct 主循环
//!
//! 最多 max_iterations 轮带工具的模型调用（关闭并行工具调用）：
//! - 回复不含工具调用 → 以其文本作为草稿结束
//! - 含工具调用 → 按模型给出的顺序逐个分发，结果作为 tool 消息紧跟在触发它的 assistant 消息之后；
//!   Worker 未激活或调用失败时把错误文本当作结果回填，循环继续
//! - 轮数耗尽 → 再追加一次不带工具的强制收尾调用，其内容即草稿
//!
//! 后端调用总数不超过 max_iterations + 1，且总会产出草稿字符串。

use serde_json::Value;

use crate::llm::{ChatRequest, LlmClient};
use crate::memory::{Message, ToolCall};
use crate::observability::{result_preview, Broadcaster, Tag};
use crate::workers::{split_qualified, SessionManager};

pub const DEFAULT_MAX_ITERATIONS: usize = 5;
pub const FINAL_ANSWER_PROMPT: &str = "Provide your final answer now.";
pub const NO_RESPONSE: &str = "I have no response.";
pub const MAX_ITERATIONS_REACHED: &str = "Max iterations reached.";
pub const BACKEND_FAILURE: &str = "I encountered an issue processing your request.";

/// 结果预览行数与字符上限
const PREVIEW_LINES: usize = 3;
const PREVIEW_CHARS: usize = 120;

/// 循环结果：草稿与完整消息序列（供合规改写复用）
#[derive(Debug)]
pub struct ReactResult {
    pub draft: String,
    pub messages: Vec<Message>,
    /// 实际进行的带工具轮数
    pub iterations: usize,
    /// 是否走了强制收尾
    pub forced: bool,
}

/// 一次循环所需的协作者
pub struct ReactSession<'a> {
    pub llm: &'a dyn LlmClient,
    pub sessions: &'a SessionManager,
    pub broadcaster: Option<&'a Broadcaster>,
    pub max_iterations: usize,
}

impl<'a> ReactSession<'a> {
    pub fn new(llm: &'a dyn LlmClient, sessions: &'a SessionManager) -> Self {
        Self {
            llm,
            sessions,
            broadcaster: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: &'a Broadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    fn broadcast(&self, tag: Tag, message: impl Into<String>) {
        if let Some(b) = self.broadcaster {
            b.send(tag, message);
        }
    }
}

/// 执行循环：system + 历史 + 本次用户输入
pub async fn react_loop(
    session: &ReactSession<'_>,
    system_prompt: &str,
    history: &[Message],
    user_input: &str,
) -> ReactResult {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system_prompt));
    messages.extend_from_slice(history);
    messages.push(Message::user(user_input));

    let tools = session.sessions.tools();
    let max = session.max_iterations;

    for iteration in 1..=max {
        session.broadcast(Tag::Agent, format!("Iteration {}/{}", iteration, max));
        let request = ChatRequest::new(messages.clone()).with_tools(tools.clone());

        let reply = match session.llm.chat(request).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(iteration, error = %e, "Backend call failed inside tool loop");
                session.broadcast(Tag::Error, format!("Backend call failed: {}", e));
                return ReactResult {
                    draft: BACKEND_FAILURE.to_string(),
                    messages,
                    iterations: iteration,
                    forced: false,
                };
            }
        };

        if reply.tool_calls.is_empty() {
            session.broadcast(Tag::Agent, "No more tool calls, agent finished");
            let text = reply.text_or_empty();
            let draft = if text.is_empty() { NO_RESPONSE } else { text }.to_string();
            messages.push(Message::assistant(draft.clone()));
            return ReactResult {
                draft,
                messages,
                iterations: iteration,
                forced: false,
            };
        }

        messages.push(Message::assistant_tool_calls(
            reply.content.clone().unwrap_or_default(),
            reply.tool_calls.clone(),
        ));
        for call in &reply.tool_calls {
            let result = execute_tool_call(session, call).await;
            messages.push(Message::tool(call.id.clone(), result));
        }
    }

    tracing::warn!(max_iterations = max, "Max iterations reached, forcing final answer");
    session.broadcast(Tag::Agent, "Max iterations reached, forcing final answer");
    messages.push(Message::user(FINAL_ANSWER_PROMPT));

    let draft = match session.llm.chat(ChatRequest::new(messages.clone())).await {
        Ok(reply) if !reply.text_or_empty().is_empty() => reply.text_or_empty().to_string(),
        Ok(_) => MAX_ITERATIONS_REACHED.to_string(),
        Err(e) => {
            tracing::error!(error = %e, "Forced final call failed");
            MAX_ITERATIONS_REACHED.to_string()
        }
    };
    messages.push(Message::assistant(draft.clone()));
    ReactResult {
        draft,
        messages,
        iterations: max,
        forced: true,
    }
}

/// 分发一个工具调用，任何失败都转成给模型看的错误文本
async fn execute_tool_call(session: &ReactSession<'_>, call: &ToolCall) -> String {
    if let Some((worker, operation)) = split_qualified(&call.name) {
        session.broadcast(Tag::Action, format!("  Service: {}", worker));
        session.broadcast(Tag::Action, format!("  Tool: {}", operation));
    }

    let arguments: Value = if call.arguments.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        match serde_json::from_str(&call.arguments) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "Tool arguments are not valid JSON");
                return format!("Error: invalid JSON arguments for {}: {}", call.name, e);
            }
        }
    };

    match session.sessions.dispatch(&call.name, arguments).await {
        Ok(text) => {
            session.broadcast(Tag::Result, result_preview(&text, PREVIEW_LINES, PREVIEW_CHARS));
            text
        }
        Err(e) => {
            tracing::warn!(tool = %call.name, error = %e, "Tool call failed");
            session.broadcast(Tag::Error, e.to_string());
            format!("Error: {}", e)
        }
    }
}
