//! Procure - 交互式采购会话
//!
//! 入口：加载配置、初始化日志、组装监督者，并在 stdin / stdout 上逐行对话。
//! `/reset` 清空会话历史，`/quit` 退出。
//!
//! 运行方式：
//! ```bash
//! cargo run -- [--config <path>]
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use procure::config::load_config;
use procure::knowledge::shared_store;
use procure::llm::create_llm_from_config;
use procure::mail::McpMailTransport;
use procure::{observability, Session, Supervisor};

#[derive(Parser, Debug)]
#[command(name = "procure", version, about)]
struct Cli {
    /// 配置文件路径（缺省 config/default.toml + PROCURE__ 环境变量）
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config).context("Failed to load config")?;
    observability::init(&cfg.app.log_level);

    std::fs::create_dir_all(cfg.data_dir()).context("Failed to create data dir")?;

    let llm = create_llm_from_config(&cfg);
    let mail = Arc::new(McpMailTransport::from_config(&cfg.mail));
    let store = shared_store(&cfg)
        .await
        .context("Failed to open knowledge store")?;

    let supervisor = Arc::new(Supervisor::from_config(&cfg, llm.clone(), mail, store));
    let mut session = Session::new(supervisor);

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    stdout
        .write_all(b"Procurement assistant ready. Ask about orders or place a purchase. /reset, /quit\n")
        .await?;
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                session.reset();
                stdout.write_all(b"Conversation cleared.\n").await?;
                continue;
            }
            _ => {}
        }

        let reply = session.send(input).await;
        stdout.write_all(reply.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
    }

    let (prompt_tokens, completion_tokens, total_tokens) = llm.token_usage();
    tracing::info!(
        turns = session.history().len(),
        prompt_tokens,
        completion_tokens,
        total_tokens,
        "Session ended"
    );
    Ok(())
}
