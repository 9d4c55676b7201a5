//! 追问判断与上下文合并
//!
//! 当前输入很短（少于 5 个词）且最近 4 条历史里有用户发言时，问工具模型这是否是追问。
//! 是 → 路由查询改为 "{上一句}. {当前输入}" 并开启粘滞；否或调用失败 → 原样路由，不开粘滞。

use std::sync::Arc;

use crate::llm::LlmClient;
use crate::memory::{ConversationMemory, Message};

/// 只看最近这么多条历史
const CONTEXT_WINDOW: usize = 4;
/// 少于这么多词才判断
const SHORT_QUERY_WORDS: usize = 5;
const FOLLOW_UP_MAX_TOKENS: u32 = 5;

/// 合并后的路由输入
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextMerge {
    pub query: String,
    pub stickiness: bool,
    pub follow_up: bool,
}

impl ContextMerge {
    fn unchanged(query: &str) -> Self {
        Self {
            query: query.to_string(),
            stickiness: false,
            follow_up: false,
        }
    }
}

pub struct FollowUpDetector {
    llm: Arc<dyn LlmClient>,
}

impl FollowUpDetector {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn merge(&self, query: &str, history: &ConversationMemory) -> ContextMerge {
        let previous = match history.recent_user_queries(CONTEXT_WINDOW).last() {
            Some(p) => p.to_string(),
            None => return ContextMerge::unchanged(query),
        };
        if query.split_whitespace().count() >= SHORT_QUERY_WORDS {
            return ContextMerge::unchanged(query);
        }

        let prompt = format!(
            "Previous query: '{previous}'\n\
             Current query: '{query}'\n\n\
             Is the current query a FOLLOW-UP to the previous one? Answer only 'YES' or 'NO'.\n\n\
             Examples:\n\
             - Previous: 'solana price', Current: 'and now?' -> YES\n\
             - Previous: 'solana price', Current: 'update' -> YES\n\
             - Previous: 'hungry', Current: 'crypto price' -> NO (topic change)\n\
             - Previous: 'restaurant', Current: 'crypto' -> NO (topic change)"
        );

        match self
            .llm
            .complete(&[Message::user(prompt)], Some(0.0), Some(FOLLOW_UP_MAX_TOKENS))
            .await
        {
            Ok(answer) if answer.trim().trim_end_matches('.').eq_ignore_ascii_case("YES") => {
                let merged = format!("{}. {}", previous, query);
                tracing::info!(query = %merged, "Follow-up detected");
                ContextMerge {
                    query: merged,
                    stickiness: true,
                    follow_up: true,
                }
            }
            Ok(_) => ContextMerge::unchanged(query),
            Err(e) => {
                tracing::warn!(error = %e, "Follow-up detection failed, treating as new topic");
                ContextMerge::unchanged(query)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, ScriptedLlmClient};

    fn history() -> ConversationMemory {
        let mut h = ConversationMemory::new(20);
        h.push_exchange("solana price", "Solana trades at 142 USD.");
        h
    }

    #[tokio::test]
    async fn test_short_follow_up_is_merged_with_stickiness() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_text("YES");
        let detector = FollowUpDetector::new(llm.clone());

        let merge = detector.merge("and now?", &history()).await;
        assert_eq!(merge.query, "solana price. and now?");
        assert!(merge.stickiness);

        let req = &llm.requests()[0];
        assert_eq!(req.temperature, Some(0.0));
        assert_eq!(req.max_tokens, Some(5));
    }

    #[tokio::test]
    async fn test_topic_change_or_failure_keeps_query() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_text("NO").push_error(LlmError::Timeout);
        let detector = FollowUpDetector::new(llm);

        let merge = detector.merge("crypto price", &history()).await;
        assert_eq!(merge.query, "crypto price");
        assert!(!merge.stickiness);

        let merge = detector.merge("update", &history()).await;
        assert_eq!(merge.query, "update");
        assert!(!merge.stickiness);
    }

    #[tokio::test]
    async fn test_long_query_or_empty_history_skips_backend() {
        let llm = Arc::new(ScriptedLlmClient::new());
        let detector = FollowUpDetector::new(llm.clone());

        detector
            .merge("please show me the last five invoices", &history())
            .await;
        detector.merge("and now?", &ConversationMemory::new(20)).await;
        assert_eq!(llm.call_count(), 0);
    }
}
