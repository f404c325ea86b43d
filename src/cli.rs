//! Command-line driver.
//!
//! A build binary is one line: declare the project, hand it to
//! [`run`]. The driver parses flags, populates params, wires
//! interrupt handling, and maps errors to exit codes (0 success,
//! 1 build failure, 2 configuration error).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use mason_core::Result;
use mason_engine::{BuildOptions, BuildSession};

use crate::project::Project;
use crate::watch;

#[derive(Parser, Debug)]
#[command(name = "mason", about = "Rule-driven build runner")]
pub struct Cli {
    /// Targets to build; empty builds the default task
    pub targets: Vec<String>,

    /// Maximum concurrent handlers
    #[arg(short = 'j', long = "jobs", default_value_t = 1, value_name = "N")]
    pub jobs: usize,

    /// Watch directories and rebuild on change
    #[arg(short = 'w', long = "watch", value_name = "DIR")]
    pub watch: Vec<PathBuf>,

    /// Use commit times for unmodified tracked files
    #[arg(short = 'g', long = "git-timestamps")]
    pub commit_history: bool,

    /// Set a project parameter
    #[arg(short = 'D', long = "define", value_name = "KEY=VAL")]
    pub define: Vec<String>,

    /// Build directory (persisted state lives here)
    #[arg(short = 'C', long = "directory", default_value = ".", value_name = "DIR")]
    pub dir: PathBuf,

    /// List tasks and exit
    #[arg(short = 'l', long = "list")]
    pub list: bool,

    /// Verbose logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Parse the process arguments and drive `setup`'s project.
pub fn run<F>(setup: F) -> ExitCode
where
    F: FnOnce(&mut Project) -> Result<()>,
{
    run_from(Cli::parse(), setup)
}

/// Same as [`run`] with pre-parsed arguments; the seam used by tests.
pub fn run_from<F>(cli: Cli, setup: F) -> ExitCode
where
    F: FnOnce(&mut Project) -> Result<()>,
{
    init_tracing(cli.verbose);

    let mut project = Project::new();
    for pair in &cli.define {
        match pair.split_once('=') {
            Some((key, value)) => project.set_param(key, value),
            None => {
                eprintln!("mason: -D expects KEY=VAL, got '{pair}'");
                return ExitCode::from(2);
            }
        }
    }
    if let Err(e) = setup(&mut project) {
        eprintln!("mason: {e}");
        return ExitCode::from(e.exit_code());
    }

    if cli.list {
        let registry = project.registry();
        let default = registry.default_task().map(str::to_string);
        for name in registry.task_names() {
            if Some(name) == default.as_deref() {
                println!("{name} (default)");
            } else {
                println!("{name}");
            }
        }
        return ExitCode::SUCCESS;
    }

    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let code = runtime.block_on(drive(cli, project));
    ExitCode::from(code)
}

async fn drive(cli: Cli, project: Project) -> u8 {
    let interrupt = CancellationToken::new();
    let kill = CancellationToken::new();
    {
        // First Ctrl-C stops dispatching and lets handlers finish;
        // the second tears them down.
        let interrupt = interrupt.clone();
        let kill = kill.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("mason: interrupt, finishing in-flight work (Ctrl-C again to kill)");
                interrupt.cancel();
            }
            if tokio::signal::ctrl_c().await.is_ok() {
                kill.cancel();
            }
        });
    }

    let options = BuildOptions {
        jobs: cli.jobs,
        commit_history: cli.commit_history,
        build_dir: cli.dir.clone(),
        interrupt: interrupt.clone(),
        kill,
    };
    let session = BuildSession::new(project.into_registry(), options);

    if cli.watch.is_empty() {
        match session.build(&cli.targets).await {
            Ok(report) => {
                if let Some(e) = &report.error {
                    eprintln!("mason: {e}");
                }
                report.exit_code()
            }
            Err(e) => {
                eprintln!("mason: {e}");
                e.exit_code()
            }
        }
    } else {
        watch::watch(&session, &cli.targets, &cli.watch, &interrupt).await
    }
}
