//! 实时状态推送
//!
//! 每条状态格式化为 `🤖 HH:MM {颜色}[TAG] 消息{复位}` 后 POST 到配置的 URL（如 ntfy 主题）；
//! 空消息用作请求之间的分隔行。所有行经同一个 channel 交给唯一的后台发送任务，按发出顺序逐条
//! POST；调用方从不等待，失败只记 warn。

use std::time::Duration;

use chrono::Local;
use tokio::sync::mpsc;

const RESET: &str = "\x1b[0m";

/// 状态标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Bootstrap,
    Query,
    Agent,
    Routing,
    Action,
    Result,
    Critic,
    Error,
}

impl Tag {
    pub fn as_str(self) -> &'static str {
        match self {
            Tag::Bootstrap => "BOOTSTRAP",
            Tag::Query => "QUERY",
            Tag::Agent => "AGENT",
            Tag::Routing => "ROUTING",
            Tag::Action => "ACTION",
            Tag::Result => "RESULT",
            Tag::Critic => "CRITIC",
            Tag::Error => "ERROR",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Tag::Bootstrap => "\x1b[34m",
            Tag::Query => "\x1b[93m",
            Tag::Agent => "\x1b[96m",
            Tag::Result => "\x1b[92m",
            Tag::Critic => "\x1b[35m",
            Tag::Error => "\x1b[91m",
            Tag::Routing | Tag::Action => RESET,
        }
    }
}

pub fn format_line(tag: Tag, message: &str, time: &str) -> String {
    format!("🤖 {} {}[{}] {}{}", time, tag.color(), tag.as_str(), message, RESET)
}

/// 工具结果预览：前 max_lines 个非空行用 " │ " 连接，超过 max_chars 截断并以 "…" 结尾
pub fn result_preview(text: &str, max_lines: usize, max_chars: usize) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let truncated = lines.len() > max_lines;
    let joined = lines
        .iter()
        .take(max_lines)
        .copied()
        .collect::<Vec<_>>()
        .join(" │ ");

    if joined.chars().count() > max_chars {
        let head: String = joined.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", head)
    } else if truncated {
        format!("{} …", joined)
    } else {
        joined
    }
}

/// 状态推送器；克隆开销小，克隆体共享同一个发送任务
#[derive(Clone)]
pub struct Broadcaster {
    url: Option<String>,
    queue: Option<mpsc::UnboundedSender<String>>,
}

impl Broadcaster {
    /// 有 URL 且处于 tokio 运行时内时启动发送任务；否则只写日志
    pub fn new(url: Option<String>, timeout_secs: u64) -> Self {
        let url = url.filter(|u| !u.trim().is_empty());
        let queue = url.as_ref().and_then(|u| {
            let Ok(handle) = tokio::runtime::Handle::try_current() else {
                tracing::debug!("No runtime, broadcast disabled");
                return None;
            };
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "Broadcast client builder failed, using defaults");
                    reqwest::Client::new()
                });
            let (tx, rx) = mpsc::unbounded_channel();
            handle.spawn(deliver(client, u.clone(), rx));
            Some(tx)
        });
        Self { url, queue }
    }

    /// 只写日志，不推送
    pub fn disabled() -> Self {
        Self {
            url: None,
            queue: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn send(&self, tag: Tag, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(target: "hive::broadcast", tag = tag.as_str(), "{}", message);
        let line = format_line(tag, &message, &Local::now().format("%H:%M").to_string());
        self.post(line);
    }

    /// 请求之间的空行
    pub fn separator(&self) {
        self.post(format!("{}\n", RESET));
    }

    fn post(&self, body: String) {
        if let Some(queue) = &self.queue {
            // 发送任务已退出（运行时关闭）时丢弃
            let _ = queue.send(body);
        }
    }
}

/// 逐条 POST，上一条完成后才发下一条；所有 Broadcaster 克隆都释放后退出
async fn deliver(client: reqwest::Client, url: String, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(body) = rx.recv().await {
        match client.post(&url).body(body).send().await {
            Ok(resp) if !resp.status().is_success() => {
                tracing::warn!(status = %resp.status(), "Broadcast rejected");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Broadcast failed"),
        }
    }
}
