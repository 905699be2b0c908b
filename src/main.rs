use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use patchwise::ai::ClaudeCliAnalyzer;
use patchwise::config::Config;
use patchwise::github::GhCliHost;
use patchwise::review::store::MemoryStore;
use patchwise::review::{
    OrchestratorConfig, ReviewError, ReviewOrchestrator, ReviewRequest,
};

#[derive(Parser, Debug)]
#[command(name = "patchwise")]
#[command(about = "AI code review for GitHub pull requests via the gh CLI")]
#[command(version)]
struct Args {
    /// Repository name (e.g., "owner/repo")
    #[arg(short, long)]
    repo: String,

    /// Pull request number
    #[arg(short, long)]
    pr: u64,

    /// Head commit SHA to review
    #[arg(short, long)]
    sha: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load()?;

    let store = Arc::new(MemoryStore::new());
    store.register_repository(&args.repo, true);

    let orchestrator = ReviewOrchestrator::new(
        Arc::new(GhCliHost::new()),
        Arc::new(ClaudeCliAnalyzer::new(
            config.analyzer.command.clone(),
            config.analyzer.timeout_secs,
        )),
        store,
        OrchestratorConfig {
            max_tokens_per_chunk: config.review.max_tokens_per_chunk,
        },
    );

    let request = ReviewRequest {
        repository_full_name: args.repo,
        pull_request_number: args.pr,
        commit_sha: args.sha,
    };

    match orchestrator.execute_review(request).await {
        Ok(success) => {
            info!(
                review_id = success.review_id,
                issues = success.issues_found,
                elapsed_ms = success.processing_time_ms,
                "review completed"
            );
            println!("{}", success.summary);
            Ok(())
        }
        Err(ReviewError::AlreadyExists) => {
            println!("A review already exists for this commit; nothing to do.");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
