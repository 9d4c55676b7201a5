//! 相似度索引：把查询映射为按分数降序排列的 Worker 候选
//!
//! 分数统一落在 [0,1]；同分时保持注册表顺序（稳定排序）。
//! - EmbeddingIndex：描述向量按指纹缓存，分数为 (1 + cos) / 2
//! - KeywordIndex：词集合 Jaccard，无嵌入 Key 时使用

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::catalog::WorkerDescriptor;
use crate::llm::{Embedder, LlmError};

/// 一次相似度检索
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityQuery {
    pub text: String,
    pub limit: usize,
    /// 近似检索的候选池下限；精确检索实现会扫描全部条目
    pub num_candidates: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoutingCandidate {
    pub name: String,
    pub score: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// 用最新的注册表快照重建索引
    async fn refresh(&self, workers: &[WorkerDescriptor]) -> Result<(), LlmError>;

    async fn search(&self, query: &SimilarityQuery) -> Result<Vec<RoutingCandidate>, LlmError>;

    fn kind(&self) -> &'static str;
}

/// 稳定降序排序并截断
fn rank(mut scored: Vec<RoutingCandidate>, limit: usize) -> Vec<RoutingCandidate> {
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// 余弦 [-1,1] 映射到 [0,1]
pub fn normalized_score(cosine: f32) -> f32 {
    ((1.0 + cosine) / 2.0).clamp(0.0, 1.0)
}

struct IndexEntry {
    name: String,
    fingerprint: String,
    vector: Vec<f32>,
}

pub struct EmbeddingIndex {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<Vec<IndexEntry>>,
}

impl EmbeddingIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl VectorIndex for EmbeddingIndex {
    async fn refresh(&self, workers: &[WorkerDescriptor]) -> Result<(), LlmError> {
        let previous = std::mem::take(&mut *self.entries.write().await);
        let mut next = Vec::with_capacity(workers.len());

        for worker in workers {
            if let Some(pos) = previous
                .iter()
                .position(|e| e.name == worker.name && e.fingerprint == worker.fingerprint)
            {
                let cached = &previous[pos];
                next.push(IndexEntry {
                    name: cached.name.clone(),
                    fingerprint: cached.fingerprint.clone(),
                    vector: cached.vector.clone(),
                });
                continue;
            }
            let text = format!("{}: {}", worker.name, worker.description);
            match self.embedder.embed(&text).await {
                Ok(vector) if !vector.is_empty() => next.push(IndexEntry {
                    name: worker.name.clone(),
                    fingerprint: worker.fingerprint.clone(),
                    vector,
                }),
                Ok(_) => tracing::warn!(worker = %worker.name, "Empty embedding, worker not indexed"),
                Err(e) => tracing::warn!(worker = %worker.name, error = %e, "Embedding failed, worker not indexed"),
            }
        }

        tracing::info!(indexed = next.len(), total = workers.len(), "Embedding index refreshed");
        *self.entries.write().await = next;
        Ok(())
    }

    async fn search(&self, query: &SimilarityQuery) -> Result<Vec<RoutingCandidate>, LlmError> {
        let q = self.embedder.embed(&query.text).await?;
        let entries = self.entries.read().await;
        let scored = entries
            .iter()
            .map(|e| RoutingCandidate {
                name: e.name.clone(),
                score: normalized_score(cosine_similarity(&q, &e.vector)),
            })
            .collect();
        Ok(rank(scored, query.limit))
    }

    fn kind(&self) -> &'static str {
        "embedding"
    }
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "that", "this", "what", "which", "are", "is", "of", "to",
    "in", "on", "my", "me", "a", "an", "or", "it", "be", "can", "you", "your", "i",
];

pub fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

pub fn jaccard_similarity(set1: &HashSet<String>, set2: &HashSet<String>) -> f32 {
    if set1.is_empty() || set2.is_empty() {
        return 0.0;
    }
    let intersection = set1.intersection(set2).count() as f32;
    let union = set1.union(set2).count() as f32;
    intersection / union
}

/// 关键词索引：名称与描述的词集合
#[derive(Default)]
pub struct KeywordIndex {
    entries: RwLock<Vec<(String, HashSet<String>)>>,
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for KeywordIndex {
    async fn refresh(&self, workers: &[WorkerDescriptor]) -> Result<(), LlmError> {
        let next = workers
            .iter()
            .map(|w| {
                let mut tokens = tokenize(&w.description);
                tokens.extend(tokenize(&w.name.replace('_', " ")));
                (w.name.clone(), tokens)
            })
            .collect();
        *self.entries.write().await = next;
        Ok(())
    }

    async fn search(&self, query: &SimilarityQuery) -> Result<Vec<RoutingCandidate>, LlmError> {
        let q = tokenize(&query.text);
        let entries = self.entries.read().await;
        let scored = entries
            .iter()
            .map(|(name, tokens)| RoutingCandidate {
                name: name.clone(),
                score: jaccard_similarity(&q, tokens),
            })
            .collect();
        Ok(rank(scored, query.limit))
    }

    fn kind(&self) -> &'static str {
        "keyword"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn desc(name: &str, description: &str, fp: &str) -> WorkerDescriptor {
        WorkerDescriptor {
            name: name.into(),
            description: description.into(),
            fingerprint: fp.into(),
            last_seen: Utc::now(),
        }
    }

    fn query(text: &str, limit: usize) -> SimilarityQuery {
        SimilarityQuery {
            text: text.into(),
            limit,
            num_candidates: 50,
        }
    }

    #[test]
    fn test_normalized_score_range() {
        assert!((normalized_score(1.0) - 1.0).abs() < 1e-6);
        assert!((normalized_score(-1.0)).abs() < 1e-6);
        assert!((normalized_score(0.0) - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_keyword_index_ranks_and_keeps_catalog_order_on_ties() {
        let index = KeywordIndex::new();
        index
            .refresh(&[
                desc("weather", "weather forecast", "1"),
                desc("billing", "invoice payment billing", "2"),
                desc("tickets", "open support ticket", "3"),
            ])
            .await
            .unwrap();

        let hits = index.search(&query("show my last invoice", 5)).await.unwrap();
        assert_eq!(hits[0].name, "billing");
        assert!(hits[0].score > 0.0 && hits[0].score <= 1.0);
        // 其余两个同为 0 分，保持注册表顺序
        assert_eq!(hits[1].name, "weather");
        assert_eq!(hits[2].name, "tickets");

        let limited = index.search(&query("invoice", 1)).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    /// 以关键字命中位置构造向量的嵌入器，并统计调用次数
    struct AxisEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let t = text.to_lowercase();
            Ok(vec![
                if t.contains("invoice") { 1.0 } else { 0.0 },
                if t.contains("weather") { 1.0 } else { 0.0 },
                0.1,
            ])
        }
    }

    #[tokio::test]
    async fn test_embedding_index_scores_and_caches_by_fingerprint() {
        let embedder = Arc::new(AxisEmbedder {
            calls: AtomicUsize::new(0),
        });
        let index = EmbeddingIndex::new(embedder.clone());
        let workers = vec![
            desc("billing", "invoice lookups", "h1"),
            desc("weather", "weather forecast", "h2"),
        ];
        index.refresh(&workers).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);

        index.refresh(&workers).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);

        let hits = index.search(&query("my invoice", 5)).await.unwrap();
        assert_eq!(hits[0].name, "billing");
        assert!(hits[0].score > 0.9);
        assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.score)));
    }
}
