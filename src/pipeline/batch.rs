use super::{CancelToken, Orchestrator, PipelineRun, RunState};
use crate::script::Topic;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info};

/// Final state of every run in a batch, ordered by run id.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub runs: Vec<PipelineRun>,
}

impl BatchSummary {
    pub fn succeeded(&self) -> impl Iterator<Item = &PipelineRun> {
        self.runs.iter().filter(|r| matches!(r.state(), RunState::Done))
    }

    pub fn failed(&self) -> impl Iterator<Item = &PipelineRun> {
        self.runs
            .iter()
            .filter(|r| matches!(r.state(), RunState::Failed { .. }))
    }

    pub fn cancelled(&self) -> impl Iterator<Item = &PipelineRun> {
        self.runs
            .iter()
            .filter(|r| matches!(r.state(), RunState::Cancelled { .. }))
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} runs: {} succeeded, {} failed, {} cancelled",
            self.runs.len(),
            self.succeeded().count(),
            self.failed().count(),
            self.cancelled().count()
        )?;
        for run in &self.runs {
            match run.state() {
                RunState::Done => {
                    if let Some(artifact) = run.artifact() {
                        writeln!(
                            f,
                            "  #{:03} ok      {} ({:.1}s) {}",
                            run.id(),
                            artifact.path.display(),
                            artifact.duration,
                            artifact.title
                        )?;
                    }
                }
                RunState::Failed { stage, reason } => {
                    writeln!(f, "  #{:03} failed  at {}: {}", run.id(), stage, reason)?
                }
                RunState::Cancelled { stage } => writeln!(f, "  #{:03} cancelled before {}", run.id(), stage)?,
                other => writeln!(f, "  #{:03} stopped in {:?}", run.id(), other)?,
            }
        }
        Ok(())
    }
}

impl Orchestrator {
    /// Runs `count` independent videos, at most `batch.max_concurrency` at a
    /// time. A failing run never affects its siblings.
    pub async fn run_batch(self: &Arc<Self>, count: usize, topic: Option<String>, cancel: &CancelToken) -> BatchSummary {
        let permits = Arc::new(Semaphore::new(self.config.batch.max_concurrency.max(1)));
        let niche = self.config.niche;
        let mut tasks = JoinSet::new();

        info!(
            "Starting batch of {} runs, {} at a time",
            count, self.config.batch.max_concurrency
        );
        // Each run lives in its own slot so whatever it reached survives a
        // panic in its task.
        let mut slots = Vec::with_capacity(count);
        let mut task_runs = HashMap::with_capacity(count);
        for id in 0..count {
            let run = match &topic {
                Some(title) => PipelineRun::with_topic(id, Topic::new(title.clone(), niche)),
                None => PipelineRun::new(id),
            };
            let slot = Arc::new(Mutex::new(run));
            slots.push(Arc::clone(&slot));
            let orchestrator = Arc::clone(self);
            let permits = Arc::clone(&permits);
            let cancel = cancel.clone();
            let handle = tasks.spawn(async move {
                // The semaphore is never closed, so acquiring only waits.
                let _permit = permits.acquire_owned().await.ok();
                let mut run = slot.lock().await;
                orchestrator.drive(&mut run, &cancel).await;
            });
            task_runs.insert(handle.id(), id);
        }

        let mut panics = HashMap::new();
        while let Some(joined) = tasks.join_next_with_id().await {
            if let Err(e) = joined {
                let Some(&id) = task_runs.get(&e.id()) else {
                    continue;
                };
                let message = if e.is_panic() {
                    format!("run task panicked: {}", panic_message(e.into_panic()))
                } else {
                    "run task was aborted".to_string()
                };
                error!("Run {}: {}", id, message);
                panics.insert(id, message);
            }
        }

        let mut runs = Vec::with_capacity(count);
        for slot in slots {
            let mut run = slot.lock().await.clone();
            if let Some(message) = panics.remove(&run.id()) {
                run.abandon(message);
            }
            runs.push(run);
        }
        runs.sort_by_key(PipelineRun::id);
        BatchSummary { runs }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map_or_else(|| "unknown cause".to_string(), |s| s.to_string()),
    }
}
