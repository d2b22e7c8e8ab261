//! Submission service
//!
//! Accepts submissions from the chat layer (or the CLI) and starts one
//! independent pipeline run per submission. There is no admission control:
//! every submission gets its own task as soon as it arrives.

use crate::config::Config;
use crate::encode::MediaTools;
use crate::notify::Notifier;
use crate::orchestrator::{Orchestrator, RunOutcome, SourceMedia};
use crate::runner::{CommandRunner, SystemRunner};
use crate::tools::{ToolLocator, Toolchain};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{error, info, warn};

/// One upload plus the channel back to its submitter
pub struct Submission {
    pub source: SourceMedia,
    pub notifier: Arc<dyn Notifier>,
}

/// Terminal outcomes counted by [`ShowcaseService::run`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceSummary {
    pub done: usize,
    pub failed: usize,
}

impl ServiceSummary {
    fn record(&mut self, joined: Result<RunOutcome, JoinError>) {
        match joined {
            Ok(outcome) if outcome.is_done() => self.done += 1,
            Ok(_) => self.failed += 1,
            Err(e) => {
                error!(error = %e, "run task ended abnormally");
                self.failed += 1;
            }
        }
    }

    pub fn all_done(&self) -> bool {
        self.failed == 0
    }
}

pub struct ShowcaseService {
    config: Config,
    orchestrator: Arc<Orchestrator>,
}

impl ShowcaseService {
    /// Resolve the toolchain once and run tools through the system runner.
    ///
    /// Missing tools are only logged here; each run reports them to its
    /// submitter.
    pub fn new(config: Config) -> Self {
        let toolchain = Toolchain::resolve(&config.tools, ToolLocator::global());
        for (tool, path) in toolchain.report() {
            match path {
                Some(path) => info!(tool, path = %path.display(), "tool resolved"),
                None => warn!(tool, "tool not found, submissions will fail until it is installed"),
            }
        }
        Self::with_runner(config, toolchain, Arc::new(SystemRunner))
    }

    pub fn with_runner(config: Config, toolchain: Toolchain, runner: Arc<dyn CommandRunner>) -> Self {
        let tools = MediaTools::new(toolchain, runner, config.encode.clone());
        let orchestrator = Arc::new(Orchestrator::new(tools, &config));
        Self { config, orchestrator }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn toolchain(&self) -> &Toolchain {
        self.orchestrator.tools().toolchain()
    }

    /// Start a run without waiting for it
    pub fn submit(&self, submission: Submission) -> JoinHandle<RunOutcome> {
        info!(owner = %submission.source.owner_id, name = %submission.source.visible_name, "submission accepted");
        tokio::spawn(
            Arc::clone(&self.orchestrator).run(submission.source, submission.notifier),
        )
    }

    /// Start a run for every submission received on `rx`.
    ///
    /// Returns once the channel is closed and every started run has
    /// finished.
    pub async fn run(&self, mut rx: mpsc::Receiver<Submission>) -> ServiceSummary {
        let mut runs = JoinSet::new();
        let mut summary = ServiceSummary::default();

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(submission) => {
                        info!(owner = %submission.source.owner_id, name = %submission.source.visible_name, "submission accepted");
                        runs.spawn(Arc::clone(&self.orchestrator).run(submission.source, submission.notifier));
                    }
                    None => break,
                },
                Some(joined) = runs.join_next(), if !runs.is_empty() => summary.record(joined),
            }
        }

        while let Some(joined) = runs.join_next().await {
            summary.record(joined);
        }

        info!(done = summary.done, failed = summary.failed, "submission queue closed");
        summary
    }
}
