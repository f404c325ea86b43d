//! mason — a rule-driven build runner.
//!
//! A build is an ordinary Rust binary: declare rules, tasks and checks
//! on a [`Project`], then hand it to [`cli::run`].
//!
//! ```no_run
//! use mason::{cli, run_cmd, Invocation};
//!
//! fn main() -> std::process::ExitCode {
//!     cli::run(|p| {
//!         p.rule("%.o").depends(["%.c", "hello.h"]).run(|inv: Invocation| async move {
//!             run_cmd(["cc", "-c", "-o", inv.target.as_str(), inv.dep()]).await
//!         })?;
//!         p.rule("hello.exe").depends(["hello.o", "main.o"]).run(|inv: Invocation| async move {
//!             let mut argv = vec!["cc".to_string(), "-o".into(), inv.target.clone()];
//!             argv.extend(inv.deps.iter().cloned());
//!             run_cmd(argv).await
//!         })?;
//!         p.task("all").default_task().depends("hello.exe").run(|_| async { Ok(()) })?;
//!         Ok(())
//!     })
//! }
//! ```

pub mod cli;
pub mod exec;
pub mod files;
pub mod project;
pub mod watch;

pub use exec::{run_cmd, run_cmd_captured};
pub use files::glob;
pub use project::{IntoNames, Project};

pub use mason_core::{Error, HandlerError, HandlerResult, Invocation, ProbeResult, Result};
pub use mason_engine::{BuildOptions, BuildReport, BuildSession, Event};
