//! Skillbook maintenance CLI
//!
//! `skillbook` prints catalog stats; `skillbook embed` refreshes stale
//! embeddings; `skillbook cleanup` runs the duplicate/health scan and
//! lets the curator resolve the findings.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use skillbook::claude::ClaudeClient;
use skillbook::config::Config;
use skillbook::embeddings::OllamaEmbedder;
use skillbook::session::SkillSession;
use skillbook::store::SkillStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let command = std::env::args().nth(1).unwrap_or_else(|| "stats".to_string());

    match command.as_str() {
        "stats" => stats(&config).await,
        "embed" => embed(&config).await,
        "cleanup" => cleanup(&config).await,
        "help" | "--help" | "-h" => {
            println!(
                "skillbook [stats|embed|cleanup]\n\n  \
                 stats    print domain and skill counts (default)\n  \
                 embed    refresh stale description embeddings\n  \
                 cleanup  scan for duplicates and unhealthy skills, curate findings"
            );
            Ok(())
        }
        other => anyhow::bail!("unknown command: {} (try 'skillbook help')", other),
    }
}

async fn stats(config: &Config) -> Result<()> {
    let store = SkillStore::new(&config.skills_dir);
    let book = store.load_or_init().await?;

    println!("skill book at {}", config.skills_dir.display());
    println!("{} domains, {} skills", book.get_domain_ids().len(), book.skill_count());
    for domain in book.get_domain_ids() {
        let skills = book.get_domain_skills(&domain)?;
        println!("\n{} ({} skills)", domain, skills.len());
        for skill in skills {
            println!("  {} - {}", skill.id, skill.description);
        }
    }
    Ok(())
}

async fn embed(config: &Config) -> Result<()> {
    let store = SkillStore::new(&config.skills_dir);
    let mut book = store.load_or_init().await?;

    let embedder = OllamaEmbedder::new(config.embedding_config(), config.retry_policy())?;
    let index = skillbook::SimilarityIndex::new(Arc::new(embedder));
    let refreshed = index.ensure_embeddings(&mut book, &store).await?;
    println!("{} embeddings refreshed", refreshed);
    Ok(())
}

async fn cleanup(config: &Config) -> Result<()> {
    let api_key = config
        .anthropic_api_key
        .as_deref()
        .context("ANTHROPIC_API_KEY is required for cleanup")?;

    let store = SkillStore::new(&config.skills_dir);
    let embedder = OllamaEmbedder::new(config.embedding_config(), config.retry_policy())?;
    let model = ClaudeClient::new(api_key, config.model.as_deref(), config.retry_policy());

    let session = SkillSession::open(
        store,
        Arc::new(embedder),
        Arc::new(model),
        config.curation_policy(),
        config.cleanup_policy(),
    )
    .await?;

    let report = session.run_cleanup().await?;
    info!(?report, "cleanup finished");
    println!(
        "{} findings: {} resolved, {} dismissed, {} aborted",
        report.findings, report.mutated, report.no_action, report.aborted
    );
    Ok(())
}
