//! 无需 API 的客户端
//!
//! - MockLlmClient：没有任何 API Key 时的兜底，回显最后一条用户消息，不调用工具
//! - ScriptedLlmClient：按队列回放预设回复并记录每次请求，路由 / 编排循环 / 合规审查的测试都用它

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{ChatReply, ChatRequest, LlmClient, LlmError};
use crate::memory::Role;

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatReply, LlmError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(ChatReply::text(format!("Echo from Mock: {}", last_user)))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// 脚本化客户端：每次 chat 弹出队首回复；队列耗尽时返回 Unavailable
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<ChatReply, LlmError>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, reply: ChatReply) -> &Self {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Ok(reply));
        }
        self
    }

    pub fn push_text(&self, content: impl Into<String>) -> &Self {
        self.push_reply(ChatReply::text(content))
    }

    /// 追加一条工具调用回复，调用 id 按已排队数量自动编号
    pub fn push_tool_call(&self, name: impl Into<String>, arguments: impl Into<String>) -> &Self {
        let id = format!("call_{}", self.pending() + 1);
        self.push_reply(ChatReply::tool_call(id, name, arguments))
    }

    pub fn push_error(&self, error: LlmError) -> &Self {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Err(error));
        }
        self
    }

    /// 尚未消费的回复数
    pub fn pending(&self) -> usize {
        self.replies.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// 已收到的请求（按时间顺序）
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatReply, LlmError> {
        if let Ok(mut r) = self.requests.lock() {
            r.push(request);
        }
        let next = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        next.unwrap_or_else(|| Err(LlmError::Unavailable("no scripted reply left".into())))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Message;

    #[tokio::test]
    async fn test_mock_echoes_last_user_message() {
        let reply = MockLlmClient
            .complete(&[Message::user("hello")], None, None)
            .await
            .unwrap();
        assert_eq!(reply, "Echo from Mock: hello");
    }

    #[tokio::test]
    async fn test_scripted_replays_in_order_then_fails() {
        let llm = ScriptedLlmClient::new();
        llm.push_text("first").push_tool_call("a__b", "{}");

        let r1 = llm.chat(ChatRequest::new(vec![])).await.unwrap();
        assert_eq!(r1.text_or_empty(), "first");
        let r2 = llm.chat(ChatRequest::new(vec![])).await.unwrap();
        assert_eq!(r2.tool_calls[0].name, "a__b");
        assert!(matches!(
            llm.chat(ChatRequest::new(vec![])).await,
            Err(LlmError::Unavailable(_))
        ));
        assert_eq!(llm.call_count(), 3);
    }
}
