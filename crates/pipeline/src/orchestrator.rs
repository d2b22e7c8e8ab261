//! Pipeline orchestrator
//!
//! Drives one submission through prepare, rescale, slice, render and
//! archive. Every file a run creates is registered in its ledger first, so a
//! failure at any stage can remove exactly what the run produced. The
//! submitter always gets one terminal notification.

use crate::archive::{archive, archive_path_for};
use crate::artifact::{ArtifactId, ArtifactLedger, ArtifactStage};
use crate::config::{Config, Language, RenderConfig};
use crate::encode::{
    copy_source, expected_rescale, is_video_container, render, rescale_in_place, slice, MediaTools,
    SliceSet, WidthPolicy,
};
use crate::error::{FailureKind, PipelineError};
use crate::notify::{failure_message, success_caption, Notifier};
use crate::probe::probe;
use crate::replace::{remove_path, replace_file};
use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// A downloaded submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMedia {
    pub path: PathBuf,
    /// Name the submitter sees, usually the uploaded file name
    pub visible_name: String,
    pub owner_id: String,
    pub received_at: SystemTime,
}

impl SourceMedia {
    pub fn new(path: impl Into<PathBuf>, visible_name: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            visible_name: visible_name.into(),
            owner_id: owner_id.into(),
            received_at: SystemTime::now(),
        }
    }

    pub fn received_at_ms(&self) -> u128 {
        self.received_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0)
    }

    /// Extension of the uploaded file, which decides how the run treats it
    pub fn container_extension(&self) -> Option<String> {
        self.path
            .extension()
            .map(|ext| sanitize_component(&ext.to_string_lossy()).to_lowercase())
    }

    /// `<owner>_<received_at_ms>_<run>_<visible name>.<source ext>`, reduced to
    /// filesystem-safe characters.
    ///
    /// The run id keeps identical submissions apart. The extension always
    /// comes from the uploaded file; a matching suffix on the visible name is
    /// not repeated.
    pub fn working_name(&self, run_id: Uuid) -> String {
        let mut name = sanitize_component(&self.visible_name);
        if let Some(ext) = self.container_extension() {
            let already_named = Path::new(&name)
                .extension()
                .map(|e| e.to_string_lossy().eq_ignore_ascii_case(&ext))
                .unwrap_or(false);
            if !already_named {
                name.push('.');
                name.push_str(&ext);
            }
        }
        format!(
            "{}_{}_{}_{}",
            sanitize_component(&self.owner_id),
            self.received_at_ms(),
            run_id.simple(),
            name
        )
    }
}

fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

fn panic_text(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Received,
    Preparing,
    Rescaling,
    Slicing,
    /// Rendering band `i` (1-based)
    Rendering(u32),
    Archiving,
    Done,
    /// Absorbing; `stage` is the state the failure happened in
    Failed {
        stage: &'static str,
        kind: FailureKind,
    },
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Received => "received",
            RunState::Preparing => "preparing",
            RunState::Rescaling => "rescaling",
            RunState::Slicing => "slicing",
            RunState::Rendering(_) => "rendering",
            RunState::Archiving => "archiving",
            RunState::Done => "done",
            RunState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed { .. })
    }
}

/// What the caller observes once a run is over
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Done {
        run_id: Uuid,
        /// Already removed after delivery unless archives are kept
        archive: PathBuf,
    },
    Failed {
        run_id: Uuid,
        stage: &'static str,
        kind: FailureKind,
        /// Operator-facing detail; never shown to the submitter
        detail: String,
    },
}

impl RunOutcome {
    pub fn run_id(&self) -> Uuid {
        match self {
            RunOutcome::Done { run_id, .. } | RunOutcome::Failed { run_id, .. } => *run_id,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, RunOutcome::Done { .. })
    }
}

/// Per-submission state, owned by exactly one run
pub struct RunContext {
    pub id: Uuid,
    pub source: SourceMedia,
    pub state: RunState,
    pub ledger: ArtifactLedger,
    pub source_artifact: Option<ArtifactId>,
    pub prepared: Option<ArtifactId>,
    pub parts: Option<SliceSet>,
    pub loops: Vec<ArtifactId>,
    pub archive: Option<ArtifactId>,
    pub notifier: Arc<dyn Notifier>,
}

impl RunContext {
    pub fn new(source: SourceMedia, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            state: RunState::Received,
            ledger: ArtifactLedger::new(),
            source_artifact: None,
            prepared: None,
            parts: None,
            loops: Vec::new(),
            archive: None,
            notifier,
        }
    }

    fn transition(&mut self, next: RunState) {
        debug!(from = self.state.as_str(), to = next.as_str(), "run state changed");
        self.state = next;
    }
}

/// Working-area directories shared by all runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingArea {
    pub prepared: PathBuf,
    pub sliced: PathBuf,
    pub archives: PathBuf,
}

impl WorkingArea {
    pub fn from_config(config: &Config) -> Self {
        Self {
            prepared: config.paths.prepared(),
            sliced: config.paths.sliced(),
            archives: config.paths.archives(),
        }
    }
}

/// Runs submissions through the full pipeline
pub struct Orchestrator {
    tools: MediaTools,
    area: WorkingArea,
    render: RenderConfig,
    keep_uploads: bool,
    keep_archives: bool,
    language: Language,
}

impl Orchestrator {
    pub fn new(tools: MediaTools, config: &Config) -> Self {
        Self {
            tools,
            area: WorkingArea::from_config(config),
            render: config.render.clone(),
            keep_uploads: config.pipeline.keep_uploads,
            keep_archives: config.pipeline.keep_archives,
            language: config.pipeline.language,
        }
    }

    pub fn tools(&self) -> &MediaTools {
        &self.tools
    }

    pub fn working_area(&self) -> &WorkingArea {
        &self.area
    }

    /// Run one submission to completion.
    ///
    /// All blocking work happens on the blocking pool. Errors never escape:
    /// the notifier hears about the outcome once and the caller gets the
    /// same outcome back.
    pub async fn run(self: Arc<Self>, source: SourceMedia, notifier: Arc<dyn Notifier>) -> RunOutcome {
        let ctx = RunContext::new(source, Arc::clone(&notifier));
        let run_id = ctx.id;
        let span = info_span!("run", id = %run_id, owner = %ctx.source.owner_id);

        let worker = Arc::clone(&self);
        let worker_span = span.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let _entered = worker_span.enter();
            let mut ctx = ctx;
            let result = panic::catch_unwind(AssertUnwindSafe(|| worker.execute(&mut ctx)))
                .unwrap_or_else(|payload| Err(PipelineError::Panicked(panic_text(payload.as_ref()))));
            if let Err(e) = &result {
                worker.abort(&mut ctx, e);
            }
            (ctx, result)
        })
        .await;

        match joined {
            Ok((ctx, result)) => self.report(ctx, result).instrument(span).await,
            Err(join_error) => {
                // Cleanup itself panicked; the ledger went down with the task.
                error!(id = %run_id, error = %join_error, "pipeline task panicked");
                let text = failure_message(FailureKind::Processing, self.language);
                if let Err(e) = notifier.notify(text).await {
                    warn!(id = %run_id, error = %e, "failed to deliver failure notification");
                }
                RunOutcome::Failed {
                    run_id,
                    stage: "unknown",
                    kind: FailureKind::Processing,
                    detail: join_error.to_string(),
                }
            }
        }
    }

    fn execute(&self, ctx: &mut RunContext) -> Result<PathBuf, PipelineError> {
        info!(name = %ctx.source.visible_name, source = %ctx.source.path.display(), "submission received");
        let source_id = ctx.ledger.adopt(&ctx.source.path, ArtifactStage::Source);
        ctx.source_artifact = Some(source_id);
        self.tools.toolchain().check()?;

        ctx.transition(RunState::Preparing);
        if !is_video_container(&ctx.source.path) {
            let ext = ctx.source.container_extension().unwrap_or_default();
            return Err(PipelineError::UnsupportedFormat(format!("{} ({})", ctx.source.visible_name, ext)));
        }
        let working_name = ctx.source.working_name(ctx.id);
        let prepared_path = self.area.prepared.join(&working_name);
        let prepared = ctx.ledger.register(&prepared_path, ArtifactStage::Prepared);
        ctx.prepared = Some(prepared);
        copy_source(&ctx.source.path, &prepared_path)?;
        ctx.ledger.mark_ready(prepared);

        ctx.transition(RunState::Rescaling);
        let canonical_width = self.tools.settings().canonical_width;
        let original = probe(&self.tools, &prepared_path)?;
        info!(
            original = %original,
            expected = %expected_rescale(original, canonical_width),
            "rescaling"
        );
        rescale_in_place(&self.tools, &prepared_path)?;

        ctx.transition(RunState::Slicing);
        fs::create_dir_all(&self.area.sliced)?;
        let slicing_path = self.area.sliced.join(&working_name);
        replace_file(&prepared_path, &slicing_path)?;
        ctx.ledger.relocate(prepared, &slicing_path);
        let parts = slice(&self.tools, &slicing_path, &mut ctx.ledger)?;
        // Band 1 now owns the prepared copy's path.
        ctx.ledger.consume(prepared);
        ctx.parts = Some(parts.clone());

        let stem = slicing_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| ctx.id.to_string());
        let loop_dir = self.area.sliced.join(format!("{}_loops", stem));
        let loop_dir_id = ctx.ledger.register(&loop_dir, ArtifactStage::LoopDir);
        fs::create_dir_all(&loop_dir)?;
        ctx.ledger.mark_ready(loop_dir_id);

        let width = WidthPolicy::from(self.render.width);
        for part in &parts.parts {
            let index = part.band.index;
            ctx.transition(RunState::Rendering(index));
            let output = loop_dir.join(format!("part{}.gif", index));
            let loop_id = ctx.ledger.register(&output, ArtifactStage::RenderedLoop(index));
            ctx.loops.push(loop_id);
            render(&self.tools, &part.path, &output, self.render.frame_rate, width)?;
            ctx.ledger.mark_ready(loop_id);
            ctx.ledger.release(part.artifact);
        }

        ctx.transition(RunState::Archiving);
        let archive_base = self.area.archives.join(format!("{}_showcase", stem));
        let archive_id = ctx
            .ledger
            .register(archive_path_for(&archive_base), ArtifactStage::Archive);
        ctx.archive = Some(archive_id);
        let archive_path = archive(&loop_dir, &archive_base)?;
        ctx.ledger.mark_ready(archive_id);
        // The archiver already removed the directory; release covers a failed removal.
        for id in &ctx.loops {
            ctx.ledger.release(*id);
        }
        ctx.ledger.release(loop_dir_id);
        // Delivery decides what happens to the archive.
        ctx.ledger.consume(archive_id);

        if self.keep_uploads {
            ctx.ledger.consume(source_id);
        } else {
            ctx.ledger.release(source_id);
        }

        ctx.transition(RunState::Done);
        info!(archive = %archive_path.display(), "run finished");
        Ok(archive_path)
    }

    fn abort(&self, ctx: &mut RunContext, err: &PipelineError) {
        let stage = ctx.state.as_str();
        let kind = err.kind();
        ctx.transition(RunState::Failed { stage, kind });
        error!(stage, kind = %kind, error = %err, "run failed");

        let report = ctx.ledger.abort();
        info!(
            removed = report.removed.len(),
            failed = report.failed.len(),
            "cleanup finished"
        );
    }

    async fn report(&self, ctx: RunContext, result: Result<PathBuf, PipelineError>) -> RunOutcome {
        match result {
            Ok(archive) => {
                let parts = ctx.parts.as_ref().map(|p| p.parts.len()).unwrap_or(0);
                let caption = success_caption(parts, self.language);
                match ctx.notifier.notify_with_attachment(&archive, &caption).await {
                    Ok(()) if !self.keep_archives => match remove_path(&archive) {
                        Ok(()) => debug!(archive = %archive.display(), "delivered archive removed"),
                        Err(e) => warn!(archive = %archive.display(), error = %e, "failed to remove delivered archive"),
                    },
                    Ok(()) => {}
                    Err(e) => warn!(archive = %archive.display(), error = %e, "failed to deliver archive, keeping it"),
                }
                RunOutcome::Done {
                    run_id: ctx.id,
                    archive,
                }
            }
            Err(err) => {
                let (stage, kind) = match ctx.state {
                    RunState::Failed { stage, kind } => (stage, kind),
                    other => (other.as_str(), err.kind()),
                };
                if let Err(e) = ctx.notifier.notify(failure_message(kind, self.language)).await {
                    warn!(error = %e, "failed to deliver failure notification");
                }
                RunOutcome::Failed {
                    run_id: ctx.id,
                    stage,
                    kind,
                    detail: err.to_string(),
                }
            }
        }
    }
}
