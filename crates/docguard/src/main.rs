mod cli;
mod sink;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use docguard_core::{
    Analyzer, Blocklist, CompositeExtractor, DocumentId, DocumentMetadata, JobStore,
    LexiconLoader, ModerationConfig, ModerationDecision, ModerationQueue, RuleFilter,
    ToxicityScorer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};
use crate::sink::LogSink;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docguard=info,docguard_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = ModerationConfig::from_env();
    config.validate()?;

    let analyzer = build_analyzer(&config).await?;

    match cli.command {
        Commands::Check { path, file_type } => {
            check(&analyzer, &config, &path, file_type.as_deref()).await
        }
        command => {
            let queue = open_queue(&config, analyzer).await?;
            let outcome = dispatch(command, &queue).await;
            queue.close().await?;
            outcome
        }
    }
}

async fn dispatch(command: Commands, queue: &ModerationQueue) -> Result<()> {
    match command {
        Commands::Moderate { paths, file_type } => {
            for path in &paths {
                let metadata = declared_metadata(path, file_type.as_deref());
                let document_id = DocumentId::new(path.display().to_string());
                queue.enqueue(document_id, path, metadata).await?;
            }
            queue.init().await?;
            queue.wait_idle().await?;
            print_json(&queue.stats().await?)
        }
        Commands::Serve => {
            queue.init().await?;
            tokio::signal::ctrl_c().await?;
            tracing::info!("interrupt received");
            Ok(())
        }
        Commands::Stats => print_json(&queue.stats().await?),
        Commands::Dead => print_json(&queue.dead_jobs().await?),
        Commands::Revive { document_id } => {
            let job_id = queue.revive(&DocumentId::new(document_id)).await?;
            println!("{job_id}");
            Ok(())
        }
        Commands::Cancel { document_id } => {
            let document_id = DocumentId::new(document_id);
            if !queue.cancel(&document_id).await? {
                anyhow::bail!("no waiting job for document {document_id}");
            }
            Ok(())
        }
        Commands::Check { .. } => anyhow::bail!("check runs without the queue"),
    }
}

async fn build_analyzer(config: &ModerationConfig) -> Result<Arc<Analyzer>> {
    let fusion = config.analysis.fusion.clone();
    let scorer = if config.toxicity.enabled {
        let loader = LexiconLoader::new(
            config.toxicity.lexicon_path.clone(),
            config.toxicity.threshold,
        );
        ToxicityScorer::new(Arc::new(loader), fusion)
    } else {
        ToxicityScorer::disabled(fusion)
    };

    let mut rules = RuleFilter::new(config.analysis.min_text_chars);
    if let Some(path) = &config.rules.blocklist_path {
        let blocklist = Blocklist::from_file(path)
            .await
            .with_context(|| format!("failed to read blocklist {}", path.display()))?;
        rules = rules.with_blocklist(blocklist);
    }

    tracing::info!(
        toxicity = scorer.is_enabled(),
        workers = config.queue.worker_count,
        "moderation pipeline configured"
    );

    Ok(Arc::new(Analyzer::new(
        Arc::new(CompositeExtractor::default()),
        rules,
        Arc::new(scorer),
        config.analysis.clone(),
    )))
}

async fn open_queue(
    config: &ModerationConfig,
    analyzer: Arc<Analyzer>,
) -> Result<ModerationQueue> {
    let db_path = config
        .database_path
        .to_str()
        .context("database path is not valid UTF-8")?;
    let store = JobStore::open(db_path).await?;

    Ok(ModerationQueue::new(
        store,
        analyzer,
        Arc::new(LogSink),
        config.queue.clone(),
        config.thresholds.clone(),
    ))
}

async fn check(
    analyzer: &Analyzer,
    config: &ModerationConfig,
    path: &Path,
    file_type: Option<&str>,
) -> Result<()> {
    let metadata = declared_metadata(path, file_type);
    let result = analyzer.analyze(path, &metadata).await?;
    let decision = ModerationDecision::from_score(result.score, &config.thresholds);

    print_json(&serde_json::json!({
        "decision": decision,
        "result": result,
    }))
}

fn declared_metadata(path: &Path, file_type: Option<&str>) -> DocumentMetadata {
    let declared = file_type
        .map(String::from)
        .or_else(|| path.extension().and_then(|e| e.to_str()).map(String::from))
        .unwrap_or_default();
    let metadata = DocumentMetadata::new(declared).or_file_name_from(path);
    match std::fs::metadata(path) {
        Ok(stat) => metadata.with_file_size(stat.len()),
        Err(_) => metadata,
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
