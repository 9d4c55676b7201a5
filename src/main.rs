//! Hive - 对话式 Worker 路由控制平面
//!
//! 入口：初始化日志、加载配置、同步 Worker 注册表，然后在标准输入上跑逐行 REPL。

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use hive::config::{load_config, AppConfig};
use hive::core::create_orchestrator;
use tokio::io::{AsyncBufReadExt, BufReader};

/// 命令行参数
#[derive(Debug, Parser)]
#[command(name = "hive", version, about = "Conversational worker-routing control plane")]
struct Args {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker 清单目录
    #[arg(long)]
    workers_dir: Option<PathBuf>,
}

const HELP: &str = "Commands: status, memory, exit | quit. Anything else is sent as a query.";

fn prompt() {
    print!("\n> ");
    let _ = std::io::stdout().flush();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();
    let args = Args::parse();

    let mut cfg = load_config(args.config).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    if let Some(dir) = args.workers_dir {
        cfg.app.workers_dir = dir;
    }

    let mut orchestrator = create_orchestrator(cfg)
        .await
        .context("Failed to create orchestrator")?;

    println!("Hive ready. {}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let input = line.trim();
        match input {
            "" => {}
            "exit" | "quit" => break,
            "help" => println!("{}", HELP),
            "status" => println!("{}", orchestrator.status()),
            "memory" => println!("{}", orchestrator.list_memories().await),
            query => {
                let answer = orchestrator.process_query(query).await;
                println!("\n{}", answer);
            }
        }
        prompt();
    }

    orchestrator.shutdown().await;
    println!("Bye.");
    Ok(())
}
