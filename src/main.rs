mod args;

use anyhow::Context;
use args::Args;
use clap::Parser;
use shortsmith::config::{ApiKeys, PipelineConfig};
use shortsmith::pipeline::{CancelToken, Orchestrator, RunEvent, Services, StageStatus};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

fn apply_flags(args: &Args, config: &mut PipelineConfig) {
    if let Some(niche) = args.niche {
        config.niche = niche;
    }
    if let Some(batch) = args.batch {
        config.batch.size = batch;
    }
    if let Some(concurrency) = args.concurrency {
        config.batch.max_concurrency = concurrency;
    }
    if let Some(dir) = &args.out_dir {
        config.output.dir = dir.clone();
    }
    if let Some(voice) = args.voice {
        config.voice.provider = voice;
    }
    if let Some(music) = &args.music {
        config.music.path = Some(music.clone());
    }
    if let Some(chunk) = args.chunk_words {
        config.captions.chunk_words = chunk;
    }
}

fn log_event(event: &RunEvent) {
    let reason = event.reason.as_deref().unwrap_or("");
    match event.status {
        StageStatus::Pending => debug!("[run {:03}] {} started", event.run_id, event.stage),
        StageStatus::Succeeded => info!("[run {:03}] {} done", event.run_id, event.stage),
        StageStatus::Retrying { attempt } => warn!(
            "[run {:03}] {} retrying (attempt {}): {}",
            event.run_id, event.stage, attempt, reason
        ),
        StageStatus::Failed(kind) => error!("[run {:03}] {} failed ({}): {}", event.run_id, event.stage, kind, reason),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    apply_flags(&args, &mut config);
    config.keys = ApiKeys::from_env();
    debug!("Effective configuration: {:?}", config);

    if let Err(problems) = config.validate() {
        for problem in &problems {
            error!("Configuration: {}", problem);
        }
        anyhow::bail!("{} configuration problem(s)", problems.len());
    }

    tokio::fs::create_dir_all(&config.output.dir)
        .await
        .with_context(|| format!("creating output directory {}", config.output.dir.display()))?;

    info!(
        "Generating {} {} video(s) into {}",
        config.batch.size,
        config.niche,
        config.output.dir.display()
    );

    let services = Services::from_config(&config).context("setting up services")?;
    let count = config.batch.size;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let orchestrator = Arc::new(Orchestrator::new(Arc::new(config), services).with_events(tx));

    let reporter = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            log_event(&event);
        }
    });

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; stopping after the current stage");
                cancel.cancel();
            }
        });
    }

    let summary = orchestrator.run_batch(count, args.topic.clone(), &cancel).await;
    drop(orchestrator);
    let _ = reporter.await;

    info!("Batch finished\n{}", summary);
    if summary.succeeded().count() == 0 && count > 0 {
        anyhow::bail!("no video was produced");
    }
    Ok(())
}
