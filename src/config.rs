//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__LLM__PROVIDER=openai`）。
//! API Key 只从环境变量读取（OPENAI_API_KEY / DEEPSEEK_API_KEY），不进配置文件。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub routing: RoutingSection,
    pub executor: ExecutorSection,
    pub critic: CriticSection,
    pub workers: WorkersSection,
    pub broadcast: BroadcastSection,
}

/// [app] 段：Worker 清单目录、注册表路径、对话历史上限
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    /// Worker 清单目录（每个 *.toml 一个 Worker）
    #[serde(default = "default_workers_dir")]
    pub workers_dir: PathBuf,
    /// Worker 注册表 SQLite 文件
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,
    /// 对话历史保留条数（不是轮数）
    #[serde(default = "default_max_history_entries")]
    pub max_history_entries: usize,
    /// 长期记忆 Worker 名；注册表中存在时自动追加到路由结果
    #[serde(default = "default_memory_worker")]
    pub memory_worker: String,
    /// `memory` 命令调用的操作名
    #[serde(default = "default_memory_list_operation")]
    pub memory_list_operation: String,
    /// 可选系统提示词文件，缺省用内置提示词
    pub system_prompt_path: Option<PathBuf>,
}

fn default_workers_dir() -> PathBuf {
    PathBuf::from("workers")
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from("data/catalog.db")
}

fn default_max_history_entries() -> usize {
    20
}

fn default_memory_worker() -> String {
    "memory_service".to_string()
}

fn default_memory_list_operation() -> String {
    "list_all_memories".to_string()
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            workers_dir: default_workers_dir(),
            catalog_path: default_catalog_path(),
            max_history_entries: default_max_history_entries(),
            memory_worker: default_memory_worker(),
            memory_list_operation: default_memory_list_operation(),
            system_prompt_path: None,
        }
    }
}

/// [llm] 段：后端选择、主模型与工具模型、超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / deepseek；无对应 API Key 时回退到 Mock
    #[serde(default = "default_provider")]
    pub provider: String,
    pub base_url: Option<String>,
    /// 主模型：编排循环与合规改写
    #[serde(default = "default_model")]
    pub model: String,
    /// 工具模型：仲裁、追问判断、合规审查
    #[serde(default = "default_utility_model")]
    pub utility_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_utility_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: None,
            model: default_model(),
            utility_model: default_utility_model(),
            embedding_model: default_embedding_model(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次后端请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

fn default_request_timeout() -> u64 {
    45
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

/// [routing] 段：相似度检索与置信度分层
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingSection {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_num_candidates")]
    pub num_candidates: usize,
    /// 严格大于此分数直接取第一候选
    #[serde(default = "default_high_confidence")]
    pub high_confidence: f32,
    /// 严格小于此分数且开启粘滞时沿用上次 Worker
    #[serde(default = "default_low_confidence")]
    pub low_confidence: f32,
    #[serde(default = "default_description_preview_chars")]
    pub description_preview_chars: usize,
    /// 索引实现：auto / embedding / keyword
    #[serde(default = "default_index")]
    pub index: String,
}

fn default_top_k() -> usize {
    5
}

fn default_num_candidates() -> usize {
    50
}

fn default_high_confidence() -> f32 {
    0.8
}

fn default_low_confidence() -> f32 {
    0.6
}

fn default_description_preview_chars() -> usize {
    200
}

fn default_index() -> String {
    "auto".to_string()
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            num_candidates: default_num_candidates(),
            high_confidence: default_high_confidence(),
            low_confidence: default_low_confidence(),
            description_preview_chars: default_description_preview_chars(),
            index: default_index(),
        }
    }
}

/// [executor] 段：工具循环上限
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

fn default_max_iterations() -> usize {
    5
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

/// [critic] 段：合规审查开关
#[derive(Debug, Clone, Deserialize)]
pub struct CriticSection {
    #[serde(default = "default_critic_enabled")]
    pub enabled: bool,
}

fn default_critic_enabled() -> bool {
    true
}

impl Default for CriticSection {
    fn default() -> Self {
        Self {
            enabled: default_critic_enabled(),
        }
    }
}

/// [workers] 段：子进程握手与调用超时
#[derive(Debug, Clone, Deserialize)]
pub struct WorkersSection {
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// 单次工具调用超时（秒），不设则不限时
    pub call_timeout_secs: Option<u64>,
    /// 子进程是否继承当前环境变量
    #[serde(default = "default_inherit_env")]
    pub inherit_env: bool,
}

fn default_handshake_timeout_secs() -> u64 {
    30
}

fn default_inherit_env() -> bool {
    true
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout_secs(),
            call_timeout_secs: None,
            inherit_env: default_inherit_env(),
        }
    }
}

/// [broadcast] 段：状态推送地址
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastSection {
    /// 不设则只写日志
    pub url: Option<String>,
    #[serde(default = "default_broadcast_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_broadcast_timeout_secs() -> u64 {
    15
}

impl Default for BroadcastSection {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_broadcast_timeout_secs(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, skipped");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
