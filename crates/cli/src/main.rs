//! CLI entry point for the showcase slicer
//!
//! Runs local files through the pipeline as if they had just been uploaded,
//! printing each run's outcome to the console.

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use showcase_slicer::config::ConfigError;
use showcase_slicer::{
    Config, Notifier, NotifyError, ShowcaseService, SourceMedia, Submission, ToolLocator, Toolchain,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Slice a clip into showcase columns
#[derive(Parser, Debug)]
#[command(name = "showcase-slicer")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run each file through the pipeline concurrently
    Process {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Owner id used to namespace working files
        #[arg(long, default_value = "local")]
        owner: String,
    },
    /// Report where ffmpeg and ffprobe were found
    Check,
}

/// Prints a run's terminal message, tagged with the file it belongs to
struct ConsoleNotifier {
    label: String,
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn notify(&self, text: &str) -> Result<(), NotifyError> {
        println!("[{}] {}", self.label, text);
        Ok(())
    }

    async fn notify_with_attachment(&self, path: &Path, caption: &str) -> Result<(), NotifyError> {
        println!("[{}] {} -> {}", self.label, caption, path.display());
        Ok(())
    }
}

fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    }
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .init();
}

/// Copy `file` into the uploads directory; the pipeline owns (and removes) the copy.
fn stage_upload(file: &Path, uploads: &Path, index: usize, owner: &str) -> io::Result<SourceMedia> {
    let visible_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;

    fs::create_dir_all(uploads)?;
    let staged = uploads.join(format!("{}_{}_{}", std::process::id(), index, visible_name));
    fs::copy(file, &staged)?;

    Ok(SourceMedia::new(staged, visible_name, owner))
}

fn check(config: &Config) -> ExitCode {
    let toolchain = Toolchain::resolve(&config.tools, ToolLocator::global());
    for (tool, path) in toolchain.report() {
        match path {
            Some(path) => println!("{:<8} {}", tool, path.display()),
            None => println!("{:<8} not found", tool),
        }
    }

    match toolchain.check() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn process(mut config: Config, files: Vec<PathBuf>, owner: String) -> ExitCode {
    // The console only prints the archive path, so the file has to stay.
    config.pipeline.keep_archives = true;
    let uploads = config.paths.work_dir.join("uploads");
    let service = ShowcaseService::new(config);

    let (tx, rx) = mpsc::channel(files.len().max(1));
    let mut rejected = 0;
    for (index, file) in files.iter().enumerate() {
        match stage_upload(file, &uploads, index, &owner) {
            Ok(source) => {
                let notifier = Arc::new(ConsoleNotifier {
                    label: source.visible_name.clone(),
                });
                if tx.send(Submission { source, notifier }).await.is_err() {
                    warn!(file = %file.display(), "submission queue closed early");
                    rejected += 1;
                }
            }
            Err(e) => {
                eprintln!("[{}] cannot read input: {}", file.display(), e);
                rejected += 1;
            }
        }
    }
    drop(tx);

    let summary = service.run(rx).await;
    info!(done = summary.done, failed = summary.failed + rejected, "all runs finished");

    if summary.all_done() && rejected == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.logging.level);

    match args.command {
        Command::Check => check(&config),
        Command::Process { files, owner } => process(config, files, owner).await,
    }
}
