//! Hive - 检查点管理命令行
//!
//! 运行方式：
//! ```bash
//! cargo run                 # 列出存储根下的全部检查点
//! cargo run -- resume       # 恢复最新检查点并打印恢复报告
//! cargo run -- resume cp1   # 按 id 或名字恢复
//! ```
//!
//! 配置文件路径可通过环境变量 `HIVE_CONFIG` 指定。

use std::path::PathBuf;

use anyhow::Context;
use hive::config::load_config;
use hive::core::Orchestrator;
use hive::state::RestoreReport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let config_path = std::env::var("HIVE_CONFIG").ok().map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let orchestrator = Orchestrator::builder(cfg)
        .build()
        .context("Failed to build orchestrator")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("list") => {
            let checkpoints = orchestrator
                .list_checkpoints()
                .await
                .context("Failed to list checkpoints")?;
            if checkpoints.is_empty() {
                println!("No checkpoints under {}", orchestrator.config().storage.base_dir.display());
            }
            for cp in checkpoints {
                println!(
                    "{}  {}  {}  {} entities",
                    cp.checkpoint_id,
                    cp.created_at.to_rfc3339(),
                    cp.name,
                    cp.entity_count()
                );
            }
        }
        Some("resume") => {
            let report = match args.get(1) {
                Some(id_or_name) => orchestrator.resume_from_checkpoint(id_or_name).await,
                None => orchestrator.resume_latest_checkpoint().await,
            }
            .context("Failed to resume checkpoint")?;
            print_report(&report);
        }
        Some(other) => anyhow::bail!("unknown command '{other}', expected 'list' or 'resume [id]'"),
    }

    Ok(())
}

fn print_report(report: &RestoreReport) {
    println!(
        "Restored {} entities from {} ({} skipped, {} references resolved, {} dangling)",
        report.restored.len(),
        report.checkpoint_id,
        report.skipped.len(),
        report.resolved_references,
        report.dangling_references
    );
    for skipped in &report.skipped {
        println!(
            "  skipped {}/{}: {}",
            skipped.entity_type, skipped.entity_id, skipped.reason
        );
    }
}
