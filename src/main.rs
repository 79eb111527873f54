//! bee-memory：记忆子系统的运维命令行
//!
//! 用法：
//!   bee-memory [--config <path>] stats <conversation>
//!   bee-memory [--config <path>] global-stats
//!   bee-memory [--config <path>] map <conversation>
//!   bee-memory [--config <path>] recall <conversation> <query...>
//!   bee-memory [--config <path>] migrate-legacy <path>
//!
//! 结果以 JSON 输出到 stdout，日志写到 stderr。

use std::path::PathBuf;

use anyhow::{bail, Context};
use bee_memory::config::load_config;
use bee_memory::memory::migrate_legacy_store;
use bee_memory::{observability, MemorySystem};
use serde::Serialize;

const USAGE: &str = "usage: bee-memory [--config <path>] <stats <conversation> | global-stats | map <conversation> | recall <conversation> <query> | migrate-legacy <path>>";

/// 召回结果条数
const RECALL_LIMIT: usize = 5;

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let mut config_path: Option<PathBuf> = None;
    if let Some(pos) = args.iter().position(|a| a == "--config") {
        if pos + 1 >= args.len() {
            bail!("--config requires a path\n{}", USAGE);
        }
        config_path = Some(PathBuf::from(args.remove(pos + 1)));
        args.remove(pos);
    }

    let Some(command) = args.first().cloned() else {
        bail!(USAGE);
    };
    let rest = &args[1..];

    let config = load_config(config_path).context("Failed to load config")?;
    let system = MemorySystem::builder(config).build();

    match (command.as_str(), rest) {
        ("stats", [conversation]) => {
            let stats = system
                .memory()
                .get_memory_statistics(conversation)
                .await
                .context("Failed to read memory statistics")?;
            print_json(&stats)?;
        }
        ("global-stats", []) => {
            let stats = system.memory().get_global_memory_statistics().await;
            print_json(&stats)?;
        }
        ("map", [conversation]) => {
            let map = system
                .archive()
                .get_memory_map(conversation)
                .await
                .context("Failed to build memory map")?;
            print_json(&map)?;
            if let Some(hint) = system.archive().memory_map_hint(conversation).await? {
                tracing::info!(%hint, "memory map hint");
            }
        }
        ("recall", [conversation, query @ ..]) if !query.is_empty() => {
            let query = query.join(" ");
            let chunks = system
                .archive()
                .recall_history(&query, conversation, RECALL_LIMIT)
                .await
                .context("Failed to recall archived history")?;
            print_json(&chunks)?;
        }
        ("migrate-legacy", [path]) => {
            let report = migrate_legacy_store(PathBuf::from(path).as_path(), &system.memory())
                .await
                .with_context(|| format!("Failed to migrate legacy store {}", path))?;
            print_json(&report)?;
        }
        _ => bail!(USAGE),
    }

    system.close().await;
    Ok(())
}
