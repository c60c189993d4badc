//! Armitage CLI entry point.
//!
//! `armitage` starts the polling daemon; `armitage <PR#>` reviews a single
//! PR and exits. `--dry-run` evaluates without mutating anything and
//! `--no-llm` skips the LLM review stage.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use armitage::config::JudgeConfig;
use armitage::forge::github::GithubForge;
use armitage::judge::Judge;
use armitage::llm::anthropic::AnthropicReviewer;
use armitage::policy::ReviewPolicy;
use armitage::store::Store;
use armitage::types::Verdict;

/// Armitage — judge and merge orchestrator for agent-produced changes.
#[derive(Parser)]
#[command(name = "armitage", version, about)]
struct Cli {
    /// Review this single PR and exit instead of polling.
    pr_number: Option<i64>,

    /// Evaluate candidates but mutate nothing.
    #[arg(long)]
    dry_run: bool,

    /// Skip the LLM review stage.
    #[arg(long)]
    no_llm: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Exit code contract: clean runs exit 0, anything escaping to here
    // prints the error chain and exits 1.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = JudgeConfig::from_env().context("failed to load configuration")?;
    if cli.dry_run {
        config.dry_run = true;
    }
    if cli.no_llm {
        config.use_llm = false;
    }

    let one_shot = cli.pr_number.is_some();
    let logging_guard = if one_shot {
        armitage::logging::init_oneshot();
        None
    } else {
        let logs_dir = config
            .database_path
            .parent()
            .map(|p| p.join("logs"))
            .unwrap_or_else(|| std::path::PathBuf::from("logs"));
        Some(armitage::logging::init_daemon(&logs_dir)?)
    };

    let policy = ReviewPolicy::load(config.policy_path.as_deref())
        .context("failed to load review policy")?;

    let store = Store::open(&config.database_path)
        .await
        .with_context(|| format!("failed to open store at {}", config.database_path.display()))?;

    let mut judge = Judge::new(config.clone(), policy, store);

    match (&config.github_repo, &config.github_token) {
        (Some(repo), Some(token)) => {
            let forge = GithubForge::new(repo, token.clone())
                .context("failed to configure GitHub forge")?;
            judge = judge.with_forge(Arc::new(forge));
        }
        _ => {
            tracing::info!("no GITHUB_REPO/GITHUB_TOKEN set, forge surface disabled");
        }
    }

    if let Some(api_key) = &config.anthropic_api_key {
        judge = judge.with_llm(Arc::new(AnthropicReviewer::new(
            config.model.clone(),
            api_key.clone(),
        )));
    } else if config.use_llm {
        tracing::info!("no ANTHROPIC_API_KEY set, LLM review disabled");
    }

    let result = match cli.pr_number {
        Some(pr_number) => {
            let verdict = judge.review_single_pr(pr_number).await?;
            println!(
                "PR #{pr_number}: {} (confidence {:.2})",
                verdict.verdict.as_str(),
                verdict.confidence
            );
            if verdict.verdict == Verdict::RequestChanges {
                for reason in &verdict.reasons {
                    println!("  - {reason}");
                }
            }
            Ok(())
        }
        None => judge.run().await,
    };

    drop(logging_guard);
    result
}
