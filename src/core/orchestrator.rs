//! 编排器：一次请求的完整控制流
//!
//! 追问合并 → 路由 → 激活 Worker 会话并收集工具 → ReAct 循环 → 合规审查 → 写入对话历史。
//! 单请求串行执行；会话保留到下一次激活或 shutdown。

use std::fmt;
use std::sync::Arc;

use serde_json::json;
use tracing::Instrument;

use crate::catalog::{sync_catalog, Catalog, LocalWorker, ScanReport, SqliteCatalog};
use crate::config::AppConfig;
use crate::core::error::CatalogError;
use crate::llm::{create_embedder_from_config, LlmClient, MockLlmClient, OpenAiClient, DEEPSEEK_CHAT};
use crate::memory::ConversationMemory;
use crate::observability::{Broadcaster, Tag};
use crate::react::{
    load_system_prompt, react_loop, ComplianceCritic, FollowUpDetector, GateDecision, ReactSession,
};
use crate::router::{EmbeddingIndex, KeywordIndex, LastServiceHint, Router, RoutingHint, VectorIndex};
use crate::workers::{SessionManager, StdioLauncher, WorkerLauncher};

pub const NO_SERVICE: &str = "I couldn't find relevant services for this request.";
pub const NOT_LOCAL: &str = "Services found in registry but not available locally. \
Please ensure the worker manifests are installed in the workers directory.";

/// 根据配置与环境变量选择后端（DeepSeek / OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig, model: &str) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let has_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok();
    let has_openai = std::env::var("OPENAI_API_KEY").is_ok();
    let timeout = cfg.llm.timeouts.request;

    if provider == "mock" {
        tracing::info!("Using Mock LLM");
        Arc::new(MockLlmClient)
    } else if provider == "deepseek" && (has_deepseek || has_openai) {
        // OpenAI 模型名对 DeepSeek 无意义，交给环境变量或默认值
        let model = Some(model).filter(|m| m.starts_with("deepseek"));
        tracing::info!(model = model.unwrap_or(DEEPSEEK_CHAT), "Using DeepSeek LLM");
        Arc::new(OpenAiClient::deepseek(model, timeout))
    } else if has_openai {
        tracing::info!(%model, "Using OpenAI LLM");
        Arc::new(OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
            timeout,
        ))
    } else if has_deepseek {
        tracing::info!("Using DeepSeek LLM");
        Arc::new(OpenAiClient::deepseek(None, timeout))
    } else {
        tracing::warn!("No API key set, using Mock LLM");
        Arc::new(MockLlmClient)
    }
}

/// 相似度索引：auto / embedding 在有嵌入 Key 时用向量，否则退回关键词
pub fn create_index_from_config(cfg: &AppConfig) -> Arc<dyn VectorIndex> {
    let kind = cfg.routing.index.to_lowercase();
    if kind != "keyword" {
        if let Some(embedder) =
            create_embedder_from_config(cfg.llm.base_url.as_deref(), &cfg.llm.embedding_model, None)
        {
            return Arc::new(EmbeddingIndex::new(embedder));
        }
        if kind == "embedding" {
            tracing::warn!("Embedding index requested but no OPENAI_API_KEY, using keyword index");
        }
    }
    Arc::new(KeywordIndex::new())
}

/// 组装编排器所需的全部协作者；测试可逐个替换
pub struct OrchestratorParts {
    pub config: AppConfig,
    pub store: SqliteCatalog,
    pub index: Arc<dyn VectorIndex>,
    pub launcher: Arc<dyn WorkerLauncher>,
    /// 主模型：ReAct 循环与合规改写
    pub planner_llm: Arc<dyn LlmClient>,
    /// 工具模型：仲裁、追问判断、合规审查
    pub utility_llm: Arc<dyn LlmClient>,
    pub hint: Arc<dyn RoutingHint>,
    pub broadcaster: Broadcaster,
}

/// `status` 命令的输出
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub catalog_size: usize,
    pub local_workers: Vec<String>,
    pub active_workers: Vec<String>,
    pub last_service: Option<String>,
    pub index: &'static str,
    pub planner_model: String,
    pub utility_model: String,
    pub history_entries: usize,
    pub broadcast_url: Option<String>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |items: &[String]| {
            if items.is_empty() {
                "(none)".to_string()
            } else {
                items.join(", ")
            }
        };
        writeln!(f, "Catalog:         {} workers", self.catalog_size)?;
        writeln!(f, "Local workers:   {}", list(&self.local_workers))?;
        writeln!(f, "Active sessions: {}", list(&self.active_workers))?;
        writeln!(
            f,
            "Last service:    {}",
            self.last_service.as_deref().unwrap_or("(none)")
        )?;
        writeln!(f, "Index:           {}", self.index)?;
        writeln!(f, "Models:          {} / {}", self.planner_model, self.utility_model)?;
        writeln!(f, "History:         {} entries", self.history_entries)?;
        write!(
            f,
            "Broadcast:       {}",
            self.broadcast_url.as_deref().unwrap_or("disabled")
        )
    }
}

pub struct Orchestrator {
    config: AppConfig,
    store: SqliteCatalog,
    catalog: Catalog,
    local: Vec<LocalWorker>,
    router: Router,
    sessions: SessionManager,
    planner_llm: Arc<dyn LlmClient>,
    utility_llm: Arc<dyn LlmClient>,
    followup: FollowUpDetector,
    critic: Option<ComplianceCritic>,
    hint: Arc<dyn RoutingHint>,
    history: ConversationMemory,
    broadcaster: Broadcaster,
    system_prompt: String,
}

impl Orchestrator {
    /// 组装但不同步注册表；调用方随后执行 `sync_catalog`
    pub fn from_parts(parts: OrchestratorParts) -> Self {
        let OrchestratorParts {
            config,
            store,
            index,
            launcher,
            planner_llm,
            utility_llm,
            hint,
            broadcaster,
        } = parts;

        let router = Router::new(
            index,
            Arc::clone(&utility_llm),
            Arc::clone(&hint),
            config.routing.clone(),
            config.app.memory_worker.clone(),
            broadcaster.clone(),
        );
        let critic = config
            .critic
            .enabled
            .then(|| ComplianceCritic::new(Arc::clone(&utility_llm)));
        let system_prompt = load_system_prompt(config.app.system_prompt_path.as_deref());

        Self {
            history: ConversationMemory::new(config.app.max_history_entries),
            followup: FollowUpDetector::new(Arc::clone(&utility_llm)),
            sessions: SessionManager::new(launcher),
            catalog: Catalog::default(),
            local: Vec::new(),
            config,
            store,
            router,
            planner_llm,
            utility_llm,
            critic,
            hint,
            broadcaster,
            system_prompt,
        }
    }

    /// 扫描本地 Worker、与持久化注册表对账、重建快照与索引
    pub async fn sync_catalog(&mut self) -> Result<ScanReport, CatalogError> {
        self.broadcaster.send(Tag::Bootstrap, "Syncing worker catalog...");
        let (report, local) = sync_catalog(&self.config.app.workers_dir, &mut self.store)?;

        match &report {
            ScanReport::Synced(diff) if diff.is_empty() => {
                self.broadcaster.send(Tag::Bootstrap, "✓ Catalog up-to-date");
            }
            ScanReport::Synced(diff) => {
                for name in &diff.added {
                    self.broadcaster.send(Tag::Bootstrap, format!("  + {}", name));
                }
                for name in &diff.updated {
                    self.broadcaster.send(Tag::Bootstrap, format!("  ~ {}", name));
                }
                for name in &diff.removed {
                    self.broadcaster.send(Tag::Bootstrap, format!("  - {}", name));
                }
                self.broadcaster.send(
                    Tag::Bootstrap,
                    format!(
                        "✓ Catalog synced: {} added, {} updated, {} removed",
                        diff.added.len(),
                        diff.updated.len(),
                        diff.removed.len()
                    ),
                );
            }
            ScanReport::Unavailable { reason } => {
                self.broadcaster
                    .send(Tag::Error, format!("Workers directory unavailable: {}", reason));
            }
        }

        // 扫描不可达时保留旧的本地列表
        if matches!(report, ScanReport::Synced(_)) {
            self.local = local;
        }
        self.catalog = Catalog::new(self.store.load_all()?);
        if let Err(e) = self.router.index().refresh(self.catalog.descriptors()).await {
            tracing::warn!(error = %e, "Index refresh failed, routing may be stale");
            self.broadcaster
                .send(Tag::Error, format!("Index refresh failed: {}", e));
        }
        tracing::info!(
            catalog = self.catalog.len(),
            local = self.local.len(),
            index = self.router.index().kind(),
            "Catalog ready"
        );
        Ok(report)
    }

    /// 处理一次用户请求，总是返回给用户看的文本
    pub async fn process_query(&mut self, input: &str) -> String {
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("request", request_id = %request_id);
        self.handle(input).instrument(span).await
    }

    async fn handle(&mut self, input: &str) -> String {
        self.broadcaster.separator();
        self.broadcaster.send(Tag::Query, input);
        tracing::info!(query = %input, "Processing query");

        let merge = self.followup.merge(input, &self.history).await;
        if merge.follow_up {
            self.broadcaster
                .send(Tag::Agent, format!("Follow-up detected, routing as: {}", merge.query));
        }

        let decision = self
            .router
            .route(&merge.query, merge.stickiness, &self.catalog)
            .await;
        if decision.selected.is_empty() {
            tracing::info!("No relevant service");
            return NO_SERVICE.to_string();
        }

        let memory_worker = self.config.app.memory_worker.as_str();
        let resolved: Vec<LocalWorker> = decision
            .selected
            .iter()
            .filter_map(|name| self.local.iter().find(|w| w.name() == name).cloned())
            .collect();
        let has_primary = resolved
            .iter()
            .any(|w| decision.primary().iter().any(|n| n == w.name()));
        if !has_primary {
            tracing::warn!(selected = ?decision.selected, "Selected workers not available locally");
            self.broadcaster.send(
                Tag::Error,
                format!("Not available locally: {}", decision.selected.join(", ")),
            );
            return NOT_LOCAL.to_string();
        }

        if let Some(worker) = resolved
            .iter()
            .map(|w| w.name())
            .find(|name| *name != memory_worker)
        {
            self.hint.set(worker);
        }

        let tools = self.sessions.activate(&resolved).await;
        self.broadcaster.send(
            Tag::Agent,
            format!(
                "Active services: {} ({} tools)",
                self.sessions.active_workers().join(", "),
                tools.len()
            ),
        );

        let session = ReactSession::new(self.planner_llm.as_ref(), &self.sessions)
            .with_broadcaster(&self.broadcaster)
            .with_max_iterations(self.config.executor.max_iterations);
        let result = react_loop(&session, &self.system_prompt, self.history.messages(), input).await;
        tracing::info!(
            iterations = result.iterations,
            forced = result.forced,
            "Tool loop finished"
        );

        let answer = match &self.critic {
            Some(critic) => {
                self.broadcaster.send(Tag::Critic, "Reviewing answer...");
                let gate = critic
                    .gate(self.planner_llm.as_ref(), input, &result.draft, result.messages)
                    .await;
                match &gate.decision {
                    GateDecision::Approved => {
                        self.broadcaster.send(Tag::Critic, "✓ Approved");
                    }
                    GateDecision::Rejected(reason) => {
                        self.broadcaster
                            .send(Tag::Critic, format!("✗ Rejected: {}", reason));
                        self.broadcaster.send(Tag::Critic, "Answer rewritten");
                    }
                }
                gate.answer
            }
            None => result.draft,
        };

        self.history.push_exchange(input, answer.clone());
        answer
    }

    /// 激活 memory Worker 并列出全部记忆
    pub async fn list_memories(&mut self) -> String {
        let memory_worker = self.config.app.memory_worker.clone();
        let Some(worker) = self.local.iter().find(|w| w.name() == memory_worker).cloned() else {
            return format!("Memory service '{}' is not available locally.", memory_worker);
        };

        self.sessions.activate(std::slice::from_ref(&worker)).await;
        let operation = self.config.app.memory_list_operation.clone();
        match self.sessions.call(&memory_worker, &operation, json!({})).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "Listing memories failed");
                format!("Error: {}", e)
            }
        }
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            catalog_size: self.catalog.len(),
            local_workers: self.local.iter().map(|w| w.name().to_string()).collect(),
            active_workers: self
                .sessions
                .active_workers()
                .into_iter()
                .map(String::from)
                .collect(),
            last_service: self.hint.get(),
            index: self.router.index().kind(),
            planner_model: self.planner_llm.model_name().to_string(),
            utility_model: self.utility_llm.model_name().to_string(),
            history_entries: self.history.len(),
            broadcast_url: self.broadcaster.url().map(String::from),
        }
    }

    pub fn history(&self) -> &ConversationMemory {
        &self.history
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// 关闭所有 Worker 会话
    pub async fn shutdown(&mut self) {
        self.sessions.teardown().await;
        tracing::info!("Orchestrator shut down");
    }
}

/// 按配置创建编排器并完成首次注册表同步
pub async fn create_orchestrator(cfg: AppConfig) -> anyhow::Result<Orchestrator> {
    let store = SqliteCatalog::open(&cfg.app.catalog_path)?;
    let parts = OrchestratorParts {
        store,
        index: create_index_from_config(&cfg),
        launcher: Arc::new(StdioLauncher::new(cfg.workers.clone())),
        planner_llm: create_llm_from_config(&cfg, &cfg.llm.model),
        utility_llm: create_llm_from_config(&cfg, &cfg.llm.utility_model),
        hint: Arc::new(LastServiceHint::new()),
        broadcaster: Broadcaster::new(cfg.broadcast.url.clone(), cfg.broadcast.timeout_secs),
        config: cfg,
    };

    let mut orchestrator = Orchestrator::from_parts(parts);
    if let Err(e) = orchestrator.sync_catalog().await {
        tracing::error!(error = %e, "Catalog sync failed, continuing with stale catalog");
    }
    Ok(orchestrator)
}
