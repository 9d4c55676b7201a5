//! 路由层：查询 → Worker 名单
//!
//! 1. 前置改写（多任务前缀），只用于相似度检索
//! 2. Top-K 相似度候选；无候选 → 空名单
//! 3. 分层：最高分 > 高置信阈值 → 直接取第一；开启粘滞、有上次 Worker 且最高分 < 低置信阈值 →
//!    沿用上次 Worker；其余情况交给工具模型仲裁，仲裁结果只保留候选集内的名字，为空则取第一
//! 4. 注册表里有 memory Worker 且未被选中时追加到末尾
//!
//! 仲裁的任何失败都回退到第一候选，route 本身不返回错误。

pub mod enrich;
pub mod hint;
pub mod index;

use std::sync::Arc;

use crate::catalog::Catalog;
use crate::config::RoutingSection;
use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;
use crate::observability::{Broadcaster, Tag};

pub use enrich::{enrich_for_routing, MULTI_TASK_HINT};
pub use hint::{LastServiceHint, RoutingHint};
pub use index::{EmbeddingIndex, KeywordIndex, RoutingCandidate, SimilarityQuery, VectorIndex};

/// 仲裁回复上限
const ARBITRATION_MAX_TOKENS: u32 = 50;

/// 命中的分层
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTier {
    NoCandidates,
    HighConfidence,
    Sticky,
    Arbitrated,
    /// 仲裁无有效结果或失败，取第一候选
    ArbitrationFallback,
}

/// 仲裁结果
#[derive(Debug)]
pub enum ArbitrationOutcome {
    /// 过滤后非空的有效名字，保持模型给出的顺序
    Named(Vec<String>),
    /// 回复 NONE 或没有任何候选内的名字
    NoneValid { raw: String },
    Failed(LlmError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    pub selected: Vec<String>,
    pub tier: RouteTier,
    pub candidates: Vec<RoutingCandidate>,
    /// memory Worker 是由路由自动追加的（而非候选命中）
    pub memory_appended: bool,
}

impl RouteDecision {
    fn empty(candidates: Vec<RoutingCandidate>) -> Self {
        Self {
            selected: Vec::new(),
            tier: RouteTier::NoCandidates,
            candidates,
            memory_appended: false,
        }
    }

    /// 去掉自动追加的 memory Worker 后的名单
    pub fn primary(&self) -> &[String] {
        if self.memory_appended {
            &self.selected[..self.selected.len().saturating_sub(1)]
        } else {
            &self.selected
        }
    }
}

/// 解析仲裁回复：逗号分隔，过滤到候选集内并去重
pub fn parse_arbitration(raw: &str, candidates: &[RoutingCandidate]) -> Vec<String> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("NONE") {
        return Vec::new();
    }
    let mut out: Vec<String> = Vec::new();
    for part in raw.split(',') {
        let name = part.trim().trim_matches(|c| c == '\'' || c == '"' || c == '`' || c == '.');
        if name.is_empty() || out.iter().any(|n| n == name) {
            continue;
        }
        if candidates.iter().any(|c| c.name == name) {
            out.push(name.to_string());
        }
    }
    out
}

fn truncate_description(description: &str, max_chars: usize) -> String {
    if description.chars().count() > max_chars {
        let head: String = description.chars().take(max_chars).collect();
        format!("{}...", head)
    } else {
        description.to_string()
    }
}

pub struct Router {
    index: Arc<dyn VectorIndex>,
    llm: Arc<dyn LlmClient>,
    hint: Arc<dyn RoutingHint>,
    settings: RoutingSection,
    memory_worker: String,
    broadcaster: Broadcaster,
}

impl Router {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        llm: Arc<dyn LlmClient>,
        hint: Arc<dyn RoutingHint>,
        settings: RoutingSection,
        memory_worker: impl Into<String>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            index,
            llm,
            hint,
            settings,
            memory_worker: memory_worker.into(),
            broadcaster,
        }
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub async fn route(&self, query: &str, stickiness: bool, catalog: &Catalog) -> RouteDecision {
        let routing_query = enrich_for_routing(query);
        if routing_query != query {
            tracing::debug!(query = %routing_query, "Multi-task hint added");
        }

        let search = SimilarityQuery {
            text: routing_query,
            limit: self.settings.top_k,
            num_candidates: self.settings.num_candidates,
        };
        let candidates = match self.index.search(&search).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Similarity search failed");
                Vec::new()
            }
        };

        let Some(top) = candidates.first().cloned() else {
            self.broadcaster
                .send(Tag::Error, "No results from similarity search - is the catalog indexed?");
            return RouteDecision::empty(candidates);
        };

        self.broadcaster.send(Tag::Routing, "Similarity search results:");
        for c in &candidates {
            self.broadcaster
                .send(Tag::Routing, format!("  {}: {:.3}", c.name, c.score));
        }

        let (selected, tier) = if top.score > self.settings.high_confidence {
            self.broadcaster
                .send(Tag::Routing, format!("✓ High confidence, using: {}", top.name));
            (vec![top.name.clone()], RouteTier::HighConfidence)
        } else if let Some(last) = self
            .hint
            .get()
            .filter(|_| stickiness && top.score < self.settings.low_confidence)
        {
            self.broadcaster.send(
                Tag::Routing,
                format!(
                    "⚡ Low confidence ({:.3}), using session stickiness: {}",
                    top.score, last
                ),
            );
            (vec![last], RouteTier::Sticky)
        } else {
            self.broadcaster.send(
                Tag::Routing,
                format!("🤔 Medium confidence ({:.3}), asking LLM to validate...", top.score),
            );
            match self.arbitrate(query, &candidates, catalog).await {
                ArbitrationOutcome::Named(names) => (names, RouteTier::Arbitrated),
                ArbitrationOutcome::NoneValid { raw } => {
                    tracing::info!(reply = %raw, fallback = %top.name, "No valid arbitration choice, using top candidate");
                    (vec![top.name.clone()], RouteTier::ArbitrationFallback)
                }
                ArbitrationOutcome::Failed(e) => {
                    tracing::warn!(error = %e, fallback = %top.name, "Arbitration failed, using top candidate");
                    (vec![top.name.clone()], RouteTier::ArbitrationFallback)
                }
            }
        };

        let mut decision = RouteDecision {
            selected,
            tier,
            candidates,
            memory_appended: false,
        };
        if catalog.contains(&self.memory_worker) && !decision.selected.contains(&self.memory_worker) {
            decision.selected.push(self.memory_worker.clone());
            decision.memory_appended = true;
            self.broadcaster
                .send(Tag::Routing, format!("Added {} to matches", self.memory_worker));
        }
        tracing::info!(tier = ?decision.tier, selected = ?decision.selected, "Routing resolved");
        decision
    }

    /// 把候选（名字、分数、截断描述）交给工具模型选择
    async fn arbitrate(
        &self,
        query: &str,
        candidates: &[RoutingCandidate],
        catalog: &Catalog,
    ) -> ArbitrationOutcome {
        let candidate_list = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let description = catalog
                    .get(&c.name)
                    .map(|w| w.description.as_str())
                    .unwrap_or("No description");
                format!(
                    "{}. {} (score: {:.2})\n   Purpose: {}",
                    i + 1,
                    c.name,
                    c.score,
                    truncate_description(description, self.settings.description_preview_chars)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = format!(
            "User query: '{}'\n\n\
             Top service matches:\n{}\n\n\
             Which service(s) can handle this query?\n\
             Consider the service PURPOSE and user intent.\n\
             Reply with service name(s) only, comma-separated.\n\
             If NONE are relevant, reply 'NONE'.",
            query, candidate_list
        );

        let raw = match self
            .llm
            .complete(&[Message::user(prompt)], Some(0.0), Some(ARBITRATION_MAX_TOKENS))
            .await
        {
            Ok(raw) => raw.trim().to_string(),
            Err(e) => return ArbitrationOutcome::Failed(e),
        };
        self.broadcaster
            .send(Tag::Routing, format!("💡 LLM decision: {}", raw));

        let names = parse_arbitration(&raw, candidates);
        if names.is_empty() {
            ArbitrationOutcome::NoneValid { raw }
        } else {
            ArbitrationOutcome::Named(names)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::WorkerDescriptor;
    use crate::llm::ScriptedLlmClient;
    use async_trait::async_trait;
    use chrono::Utc;

    /// 固定返回给定候选的索引
    struct FixedIndex(Vec<RoutingCandidate>);

    #[async_trait]
    impl VectorIndex for FixedIndex {
        async fn refresh(&self, _workers: &[WorkerDescriptor]) -> Result<(), LlmError> {
            Ok(())
        }

        async fn search(&self, query: &SimilarityQuery) -> Result<Vec<RoutingCandidate>, LlmError> {
            Ok(self.0.iter().take(query.limit).cloned().collect())
        }

        fn kind(&self) -> &'static str {
            "fixed"
        }
    }

    fn cands(pairs: &[(&str, f32)]) -> Vec<RoutingCandidate> {
        pairs
            .iter()
            .map(|(n, s)| RoutingCandidate {
                name: n.to_string(),
                score: *s,
            })
            .collect()
    }

    fn catalog(names: &[&str]) -> Catalog {
        Catalog::new(
            names
                .iter()
                .map(|n| WorkerDescriptor {
                    name: n.to_string(),
                    description: format!("{} capability", n),
                    fingerprint: "fp".into(),
                    last_seen: Utc::now(),
                })
                .collect(),
        )
    }

    fn router(
        candidates: Vec<RoutingCandidate>,
        llm: Arc<ScriptedLlmClient>,
        hint: Arc<LastServiceHint>,
    ) -> Router {
        Router::new(
            Arc::new(FixedIndex(candidates)),
            llm,
            hint,
            RoutingSection::default(),
            "memory_service",
            Broadcaster::disabled(),
        )
    }

    #[tokio::test]
    async fn test_high_confidence_skips_arbitration() {
        let llm = Arc::new(ScriptedLlmClient::new());
        let r = router(
            cands(&[("X", 0.85), ("Y", 0.40), ("Z", 0.30)]),
            llm.clone(),
            Arc::new(LastServiceHint::new()),
        );
        let d = r.route("show my invoice", false, &catalog(&["X", "Y", "Z"])).await;
        assert_eq!(d.selected, vec!["X"]);
        assert_eq!(d.tier, RouteTier::HighConfidence);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_exactly_high_threshold_goes_to_arbitration() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_text("Y");
        let r = router(cands(&[("X", 0.8), ("Y", 0.7)]), llm.clone(), Arc::new(LastServiceHint::new()));
        let d = r.route("q", false, &catalog(&["X", "Y"])).await;
        assert_eq!(d.selected, vec!["Y"]);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_stickiness_uses_hint_on_low_confidence() {
        let llm = Arc::new(ScriptedLlmClient::new());
        let hint = Arc::new(LastServiceHint::new());
        hint.set("billing");
        let r = router(cands(&[("naming", 0.55), ("weather", 0.5)]), llm.clone(), hint.clone());

        let d = r.route("and the other one?", true, &catalog(&["naming", "weather", "billing"])).await;
        assert_eq!(d.selected, vec!["billing"]);
        assert_eq!(d.tier, RouteTier::Sticky);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_stickiness_disabled_or_no_hint_arbitrates() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_text("naming").push_text("weather");
        let hint = Arc::new(LastServiceHint::new());
        let r = router(cands(&[("naming", 0.55), ("weather", 0.5)]), llm.clone(), hint.clone());
        let cat = catalog(&["naming", "weather"]);

        // 有粘滞但没有上次 Worker
        assert_eq!(r.route("q", true, &cat).await.selected, vec!["naming"]);
        // 有上次 Worker 但未开启粘滞
        hint.set("billing");
        assert_eq!(r.route("q", false, &cat).await.selected, vec!["weather"]);
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_arbitration_filters_to_candidates() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_text("Y, Q");
        let r = router(
            cands(&[("X", 0.70), ("Y", 0.65), ("Z", 0.50)]),
            llm.clone(),
            Arc::new(LastServiceHint::new()),
        );
        let d = r.route("q", false, &catalog(&["X", "Y", "Z"])).await;
        assert_eq!(d.selected, vec!["Y"]);
        assert_eq!(d.tier, RouteTier::Arbitrated);

        let req = &llm.requests()[0];
        assert_eq!(req.temperature, Some(0.0));
        assert_eq!(req.max_tokens, Some(50));
        let prompt = &req.messages[0].content;
        assert!(prompt.contains("1. X (score: 0.70)"));
        assert!(prompt.contains("Purpose: Y capability"));
        assert!(prompt.contains("If NONE are relevant, reply 'NONE'."));
    }

    #[tokio::test]
    async fn test_arbitration_keeps_all_valid_names() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_text("Z, X");
        let r = router(cands(&[("X", 0.7), ("Y", 0.65), ("Z", 0.5)]), llm, Arc::new(LastServiceHint::new()));
        let d = r.route("q", false, &catalog(&["X", "Y", "Z"])).await;
        assert_eq!(d.selected, vec!["Z", "X"]);
    }

    #[tokio::test]
    async fn test_arbitration_none_or_failure_falls_back_to_top() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_text("NONE")
            .push_error(LlmError::Timeout)
            .push_text("something else entirely");
        let r = router(cands(&[("X", 0.7), ("Y", 0.65)]), llm, Arc::new(LastServiceHint::new()));
        let cat = catalog(&["X", "Y"]);
        for _ in 0..3 {
            let d = r.route("q", false, &cat).await;
            assert_eq!(d.selected, vec!["X"]);
            assert_eq!(d.tier, RouteTier::ArbitrationFallback);
        }
    }

    #[tokio::test]
    async fn test_memory_worker_appended_when_in_catalog() {
        let llm = Arc::new(ScriptedLlmClient::new());
        let r = router(cands(&[("billing", 0.9)]), llm, Arc::new(LastServiceHint::new()));

        let d = r.route("q", false, &catalog(&["billing", "memory_service"])).await;
        assert_eq!(d.selected, vec!["billing", "memory_service"]);
        assert!(d.memory_appended);
        assert_eq!(d.primary(), &["billing".to_string()]);

        let d = r.route("q", false, &catalog(&["billing"])).await;
        assert_eq!(d.selected, vec!["billing"]);
        assert!(!d.memory_appended);
    }

    #[tokio::test]
    async fn test_memory_not_duplicated_when_selected() {
        let llm = Arc::new(ScriptedLlmClient::new());
        let r = router(cands(&[("memory_service", 0.95)]), llm, Arc::new(LastServiceHint::new()));
        let d = r.route("what do you remember", false, &catalog(&["memory_service"])).await;
        assert_eq!(d.selected, vec!["memory_service"]);
        assert!(!d.memory_appended);
    }

    #[tokio::test]
    async fn test_no_candidates_yields_empty_selection() {
        let llm = Arc::new(ScriptedLlmClient::new());
        let r = router(Vec::new(), llm, Arc::new(LastServiceHint::new()));
        let d = r.route("q", true, &catalog(&["memory_service"])).await;
        assert!(d.selected.is_empty());
        assert_eq!(d.tier, RouteTier::NoCandidates);
    }

    #[test]
    fn test_parse_arbitration_is_order_preserving_and_filtered() {
        let c = cands(&[("a", 0.7), ("b", 0.6)]);
        assert_eq!(parse_arbitration("b, a, b", &c), vec!["b", "a"]);
        assert_eq!(parse_arbitration("'a'", &c), vec!["a"]);
        assert!(parse_arbitration("none", &c).is_empty());
        assert!(parse_arbitration("x, y", &c).is_empty());
    }

    #[test]
    fn test_truncate_description_is_char_safe() {
        assert_eq!(truncate_description("héllo", 3), "hél...");
        assert_eq!(truncate_description("short", 200), "short");
    }
}
