//! 短期记忆：对话历史
//!
//! 保留最近 N 条消息（不是 N 轮），超出时从头部剪枝，剩余部分保持原顺序且连续。
//! 路由层用它判断追问，编排循环把它作为模型上下文。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 模型发起的一次工具调用；arguments 为原始 JSON 字符串
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// 仅 Tool 消息：对应的调用 id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// 仅 Assistant 消息：本轮发起的工具调用
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    /// 工具结果消息，必须紧跟触发它的 assistant 消息
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(Role::Assistant, content)
        }
    }
}

/// 短期记忆：最近 max_entries 条消息
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    messages: Vec<Message>,
    max_entries: usize,
}

impl ConversationMemory {
    pub fn new(max_entries: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_entries,
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
        self.prune();
    }

    /// 一次请求结束后由顶层写入：用户原话 + 最终答复
    pub fn push_exchange(&mut self, user: impl Into<String>, answer: impl Into<String>) {
        self.messages.push(Message::user(user));
        self.messages.push(Message::assistant(answer));
        self.prune();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// 最近 window 条消息中的用户发言，按时间顺序
    pub fn recent_user_queries(&self, window: usize) -> Vec<&str> {
        let start = self.messages.len().saturating_sub(window);
        self.messages[start..]
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .collect()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// 超出 max_entries 时丢弃最旧的消息，保留最近部分
    fn prune(&mut self) {
        if self.messages.len() > self.max_entries {
            let excess = self.messages.len() - self.max_entries;
            self.messages.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_keeps_most_recent_suffix_in_order() {
        let mut mem = ConversationMemory::new(20);
        for i in 0..13 {
            mem.push_exchange(format!("q{}", i), format!("a{}", i));
        }
        assert_eq!(mem.len(), 20);
        // 26 条中保留最后 20 条：从 q3 开始
        assert_eq!(mem.messages()[0].content, "q3");
        assert_eq!(mem.messages()[19].content, "a12");
        for pair in mem.messages().chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
        }
    }

    #[test]
    fn test_prune_by_entries_not_turns() {
        let mut mem = ConversationMemory::new(3);
        mem.push(Message::user("a"));
        mem.push(Message::assistant("b"));
        mem.push(Message::tool("call_1", "c"));
        mem.push(Message::user("d"));
        let contents: Vec<_> = mem.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_recent_user_queries_window() {
        let mut mem = ConversationMemory::new(20);
        mem.push_exchange("first", "one");
        mem.push_exchange("second", "two");
        mem.push_exchange("third", "three");
        assert_eq!(mem.recent_user_queries(4), vec!["second", "third"]);
        assert!(ConversationMemory::new(20).recent_user_queries(4).is_empty());
    }

    #[test]
    fn test_tool_message_carries_call_id() {
        let msg = Message::tool("call_9", "ok");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_9"));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
    }
}
