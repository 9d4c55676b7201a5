//! 可观测性：tracing 日志初始化与实时状态推送

pub mod broadcast;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub use broadcast::{result_preview, Broadcaster, Tag};

/// 安装全局订阅者；默认 info，可用 RUST_LOG 覆盖
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
