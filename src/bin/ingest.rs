//! Procure Ingest - 未读邮件入库
//!
//! 默认执行一轮；`--loop` 持续运行（默认每 300 秒），Ctrl+C 停止。
//!
//! 运行方式：
//! ```bash
//! cargo run --bin procure-ingest -- [--loop] [--interval <secs>] [--config <path>]
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use procure::config::load_config;
use procure::ingest::Ingestor;
use procure::knowledge::shared_store;
use procure::llm::create_llm_from_config;
use procure::mail::McpMailTransport;
use procure::observability;

/// 未读邮件入库
#[derive(Parser, Debug)]
#[command(name = "procure-ingest", version, about)]
struct Args {
    /// 持续运行，直到 Ctrl+C
    #[arg(long = "loop")]
    looping: bool,

    /// 循环间隔（秒），缺省取配置 ingest.interval_secs
    #[arg(long, value_name = "SECS")]
    interval: Option<u64>,

    /// 配置文件路径
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = load_config(args.config).context("Failed to load config")?;
    observability::init(&cfg.app.log_level);

    std::fs::create_dir_all(cfg.data_dir()).context("Failed to create data dir")?;

    let store = shared_store(&cfg)
        .await
        .context("Failed to open knowledge store")?;
    let ingestor = Ingestor::new(
        Arc::new(McpMailTransport::from_config(&cfg.mail)),
        store,
        create_llm_from_config(&cfg),
        cfg.ingest.clone(),
    );

    if !args.looping {
        tracing::info!("Running single ingestion (use --loop for continuous mode)");
        let report = ingestor.run_once().await.context("Ingestion failed")?;
        tracing::info!(?report, "Ingestion finished");
        return Ok(());
    }

    let interval = Duration::from_secs(args.interval.unwrap_or(cfg.ingest.interval_secs));
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received, stopping after the current cycle");
            on_signal.cancel();
        }
    });

    ingestor.run_loop(interval, cancel).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_loop_flags() {
        let args = Args::try_parse_from(["procure-ingest", "--loop", "--interval", "60"]).unwrap();
        assert!(args.looping);
        assert_eq!(args.interval, Some(60));
        assert!(args.config.is_none());

        assert!(Args::try_parse_from(["procure-ingest", "--interval", "soon"]).is_err());
        assert!(Args::try_parse_from(["procure-ingest", "--bogus"]).is_err());
    }
}
