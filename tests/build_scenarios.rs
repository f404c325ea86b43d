//! End-to-end build scenarios over temporary workspaces.
//!
//! Each test declares a project the way a build binary would, runs it
//! through [`BuildSession`], and asserts on the report and the event
//! timeline: what ran, what was skipped, and in which order.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use mason::{BuildOptions, BuildReport, BuildSession, Event, Invocation, Project};
use mason_core::Error;

struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// Absolute name for `rel` inside the workspace.
    fn p(&self, rel: &str) -> String {
        self.dir.path().join(rel).to_str().unwrap().to_string()
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    fn exists(&self, rel: &str) -> bool {
        self.dir.path().join(rel).exists()
    }

    /// Pin a file's mtime, so staleness decisions are deterministic.
    fn set_mtime(&self, rel: &str, t: SystemTime) {
        set_mtime(&self.dir.path().join(rel), t);
    }

    fn options(&self) -> BuildOptions {
        BuildOptions {
            build_dir: self.dir.path().to_path_buf(),
            ..Default::default()
        }
    }
}

fn set_mtime(path: &Path, t: SystemTime) {
    // Directories cannot be opened for writing; a read handle is
    // enough to adjust the timestamp.
    let f = std::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .or_else(|_| std::fs::File::open(path))
        .unwrap();
    f.set_modified(t).unwrap();
}

fn ago(secs: u64) -> SystemTime {
    SystemTime::now() - Duration::from_secs(secs)
}

/// Shared log of handler runs, in completion order.
#[derive(Clone, Default)]
struct RunLog(Arc<Mutex<Vec<String>>>);

impl RunLog {
    fn record(&self, what: &str) {
        self.0.lock().unwrap().push(what.to_string());
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// Index of the first event matching `pred`, panicking when absent.
fn event_index(events: &[Event], pred: impl Fn(&Event) -> bool) -> usize {
    events
        .iter()
        .position(pred)
        .unwrap_or_else(|| panic!("event not found in {events:?}"))
}

fn assert_child_before_parent(report: &BuildReport, child: &str, parent: &str) {
    let child_done = event_index(&report.events, |e| {
        matches!(e, Event::Built(n) | Event::Skipped(n) if n.ends_with(child))
    });
    let parent_started = event_index(&report.events, |e| {
        matches!(e, Event::Started(n) if n.ends_with(parent))
    });
    assert!(
        child_done < parent_started,
        "{child} must be terminal before {parent} starts: {:?}",
        report.events
    );
}

/// The classic C-style project: `%.o` from `%.c` plus a shared header,
/// an executable linked from the objects.
fn c_project(ws: &Workspace, log: &RunLog) -> Project {
    let mut p = Project::new();
    let log_compile = log.clone();
    p.rule(ws.p("%.o"))
        .depends([ws.p("%.c"), ws.p("hello.h")])
        .run(move |inv: Invocation| {
            let log = log_compile.clone();
            async move {
                let src = std::fs::read_to_string(inv.dep())?;
                std::fs::write(&inv.target, format!("obj:{src}"))?;
                log.record(&inv.target);
                Ok(())
            }
        })
        .unwrap();
    let log_link = log.clone();
    p.rule(ws.p("hello.exe"))
        .depends([ws.p("hello.o"), ws.p("main.o")])
        .run(move |inv: Invocation| {
            let log = log_link.clone();
            async move {
                let mut linked = String::new();
                for dep in &inv.deps {
                    linked.push_str(&std::fs::read_to_string(dep)?);
                }
                std::fs::write(&inv.target, linked)?;
                log.record(&inv.target);
                Ok(())
            }
        })
        .unwrap();
    p
}

async fn build(project: Project, options: BuildOptions, targets: &[String]) -> BuildReport {
    BuildSession::new(project.into_registry(), options)
        .build(targets)
        .await
        .unwrap()
}

#[tokio::test]
async fn s1_cold_build_runs_everything_then_nothing() {
    let ws = Workspace::new();
    let log = RunLog::default();
    ws.write("hello.c", "int main;");
    ws.write("main.c", "int other;");
    ws.write("hello.h", "decls");

    let report = build(
        c_project(&ws, &log),
        BuildOptions {
            jobs: 2,
            ..ws.options()
        },
        &[ws.p("hello.exe")],
    )
    .await;

    assert!(report.error.is_none());
    assert_eq!(report.exit_code(), 0);
    assert_eq!(log.count(), 3);
    assert!(ws.exists("hello.exe"));
    assert_child_before_parent(&report, "hello.o", "hello.exe");
    assert_child_before_parent(&report, "main.o", "hello.exe");

    // Second run with no source changes: zero handler invocations.
    let log2 = RunLog::default();
    let report = build(c_project(&ws, &log2), ws.options(), &[ws.p("hello.exe")]).await;
    assert!(report.error.is_none());
    assert_eq!(log2.count(), 0);
    assert!(report.built.is_empty());
}

#[tokio::test]
async fn s2_touching_the_header_rebuilds_both_objects() {
    let ws = Workspace::new();
    let log = RunLog::default();
    ws.write("hello.c", "a");
    ws.write("main.c", "b");
    ws.write("hello.h", "h");
    build(c_project(&ws, &log), ws.options(), &[ws.p("hello.exe")]).await;
    log.take();

    ws.set_mtime("hello.h", SystemTime::now() + Duration::from_secs(5));
    let report = build(c_project(&ws, &log), ws.options(), &[ws.p("hello.exe")]).await;
    assert!(report.error.is_none());
    let ran = log.take();
    assert_eq!(ran.len(), 3, "both objects and the link: {ran:?}");
}

#[tokio::test]
async fn s2_touching_one_source_rebuilds_only_its_object() {
    let ws = Workspace::new();
    let log = RunLog::default();
    ws.write("hello.c", "a");
    ws.write("main.c", "b");
    ws.write("hello.h", "h");
    build(c_project(&ws, &log), ws.options(), &[ws.p("hello.exe")]).await;
    log.take();

    ws.set_mtime("hello.c", SystemTime::now() + Duration::from_secs(5));
    let report = build(c_project(&ws, &log), ws.options(), &[ws.p("hello.exe")]).await;
    assert!(report.error.is_none());
    let ran = log.take();
    assert_eq!(ran.len(), 2, "hello.o and the link: {ran:?}");
    assert!(ran[0].ends_with("hello.o"));
    assert!(ran[1].ends_with("hello.exe"));
}

fn order_only_project(ws: &Workspace, log: &RunLog) -> Project {
    let mut p = Project::new();
    let log_dir = log.clone();
    p.rule(ws.p("build/"))
        .run(move |inv: Invocation| {
            let log = log_dir.clone();
            async move {
                std::fs::create_dir_all(&inv.target)?;
                log.record("mkdir");
                Ok(())
            }
        })
        .unwrap();
    let log_out = log.clone();
    p.rule(ws.p("build/out.txt"))
        .depends(ws.p("in.txt"))
        .uses(ws.p("build/"))
        .run(move |inv: Invocation| {
            let log = log_out.clone();
            async move {
                let content = std::fs::read_to_string(inv.dep())?;
                std::fs::write(&inv.target, content)?;
                log.record("out");
                Ok(())
            }
        })
        .unwrap();
    p
}

#[tokio::test]
async fn s3_order_only_prerequisite_runs_first_and_never_retriggers() {
    let ws = Workspace::new();
    let log = RunLog::default();
    ws.write("in.txt", "payload");

    let report = build(
        order_only_project(&ws, &log),
        ws.options(),
        &[ws.p("build/out.txt")],
    )
    .await;
    assert!(report.error.is_none());
    assert_eq!(log.take(), vec!["mkdir", "out"]);
    assert_child_before_parent(&report, "build/", "build/out.txt");

    // A newer directory mtime must not rebuild: uses edges are not
    // consulted for staleness.
    ws.set_mtime("build", SystemTime::now() + Duration::from_secs(5));
    let report = build(
        order_only_project(&ws, &log),
        ws.options(),
        &[ws.p("build/out.txt")],
    )
    .await;
    assert!(report.error.is_none());
    assert!(log.take().is_empty());
}

fn check_project(ws: &Workspace, log: &RunLog, value: &Arc<Mutex<String>>) -> Project {
    let mut p = Project::new();
    let value = value.clone();
    p.check("https://%")
        .probe(move |_| {
            let value = value.clone();
            async move { Ok(serde_json::Value::String(value.lock().unwrap().clone())) }
        })
        .unwrap();
    let log = log.clone();
    p.rule(ws.p("data.json"))
        .depends("https://x/y")
        .run(move |inv: Invocation| {
            let log = log.clone();
            async move {
                std::fs::write(&inv.target, "{}")?;
                log.record("fetch");
                Ok(())
            }
        })
        .unwrap();
    p
}

#[tokio::test]
async fn s4_check_probe_drives_rebuilds() {
    let ws = Workspace::new();
    let log = RunLog::default();
    let value = Arc::new(Mutex::new("v1".to_string()));

    // First run: no stored value, the resource counts as just changed.
    build(check_project(&ws, &log, &value), ws.options(), &[ws.p("data.json")]).await;
    assert_eq!(log.take(), vec!["fetch"]);

    // Same probe value: up to date.
    build(check_project(&ws, &log, &value), ws.options(), &[ws.p("data.json")]).await;
    assert!(log.take().is_empty());

    // Changed probe value: rebuilt.
    *value.lock().unwrap() = "v2".to_string();
    build(check_project(&ws, &log, &value), ws.options(), &[ws.p("data.json")]).await;
    assert_eq!(log.take(), vec!["fetch"]);
}

#[tokio::test]
async fn s5_cycle_is_a_configuration_error_and_runs_nothing() {
    let ran = RunLog::default();
    let mut p = Project::new();
    for (target, dep) in [("a", "b"), ("b", "c"), ("c", "a")] {
        let ran = ran.clone();
        p.rule(target)
            .depends(dep)
            .run(move |_| {
                let ran = ran.clone();
                async move {
                    ran.record("ran");
                    Ok(())
                }
            })
            .unwrap();
    }

    let ws = Workspace::new();
    let err = BuildSession::new(p.into_registry(), ws.options())
        .build(&["a".to_string()])
        .await
        .unwrap_err();
    match &err {
        Error::CycleDetected { path } => assert_eq!(path, &["a", "b", "c", "a"]),
        other => panic!("expected cycle, got {other}"),
    }
    assert_eq!(err.exit_code(), 2);
    assert_eq!(ran.count(), 0);
}

#[tokio::test]
async fn s6_one_failure_fails_the_parent_and_the_run() {
    let ws = Workspace::new();
    let mut p = Project::new();
    for name in ["x", "z"] {
        p.task(name).run(|_| async { Ok(()) }).unwrap();
    }
    p.task("y")
        .run(|_| async { Err("tool exploded".into()) })
        .unwrap();
    p.task("p")
        .depends(["x", "y", "z"])
        .run(|_| async { Ok(()) })
        .unwrap();

    let report = build(p, BuildOptions { jobs: 3, ..ws.options() }, &["p".to_string()]).await;
    assert_eq!(report.exit_code(), 1);
    assert!(matches!(report.error, Some(Error::HandlerFailed { .. })));
    assert!(report.failed.iter().any(|n| n == "p"));
    assert!(report.failed.iter().any(|n| n == "y"));
}

#[tokio::test]
async fn shared_dependency_builds_exactly_once() {
    let ws = Workspace::new();
    let starts = RunLog::default();
    let mut p = Project::new();
    let s = starts.clone();
    p.rule(ws.p("base.txt"))
        .run(move |inv: Invocation| {
            let s = s.clone();
            async move {
                s.record("base");
                std::fs::write(&inv.target, "base")?;
                Ok(())
            }
        })
        .unwrap();
    for side in ["left.txt", "right.txt"] {
        p.rule(ws.p(side))
            .depends(ws.p("base.txt"))
            .run(|inv: Invocation| async move {
                std::fs::write(&inv.target, "side")?;
                Ok(())
            })
            .unwrap();
    }
    p.rule(ws.p("top.txt"))
        .depends([ws.p("left.txt"), ws.p("right.txt")])
        .run(|inv: Invocation| async move {
            std::fs::write(&inv.target, "top")?;
            Ok(())
        })
        .unwrap();

    let report = build(p, BuildOptions { jobs: 4, ..ws.options() }, &[ws.p("top.txt")]).await;
    assert!(report.error.is_none());
    assert_eq!(starts.count(), 1);
    let started_base = report
        .events
        .iter()
        .filter(|e| matches!(e, Event::Started(n) if n.ends_with("base.txt")))
        .count();
    assert_eq!(started_base, 1);
}

#[tokio::test]
async fn concurrency_stays_within_the_budget() {
    let ws = Workspace::new();
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut p = Project::new();
    for i in 0..6 {
        let current = current.clone();
        let peak = peak.clone();
        p.rule(ws.p(&format!("slot{i}.txt")))
            .run(move |inv: Invocation| {
                let current = current.clone();
                let peak = peak.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    std::fs::write(&inv.target, "x")?;
                    Ok(())
                }
            })
            .unwrap();
    }
    let deps: Vec<String> = (0..6).map(|i| ws.p(&format!("slot{i}.txt"))).collect();
    p.task("all").depends(deps).run(|_| async { Ok(()) }).unwrap();

    build(p, BuildOptions { jobs: 2, ..ws.options() }, &["all".to_string()]).await;
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(peak.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn rebuild_propagates_even_with_backdated_output() {
    let ws = Workspace::new();
    ws.write("src.txt", "v2");
    ws.write("mid.txt", "v1");
    ws.write("top.txt", "v1");
    // Output chain looks fresh except the ultimate source.
    ws.set_mtime("mid.txt", ago(50));
    ws.set_mtime("top.txt", ago(10));
    ws.set_mtime("src.txt", ago(30));

    let log = RunLog::default();
    let mut p = Project::new();
    let log_mid = log.clone();
    let ws_dir: PathBuf = ws.dir.path().to_path_buf();
    p.rule(ws.p("mid.txt"))
        .depends(ws.p("src.txt"))
        .run(move |inv: Invocation| {
            let log = log_mid.clone();
            let dir = ws_dir.clone();
            async move {
                std::fs::write(&inv.target, "mid")?;
                // A handler writing artificially old timestamps must
                // not hide the rebuild from its parents.
                set_mtime(&dir.join("mid.txt"), SystemTime::UNIX_EPOCH);
                log.record("mid");
                Ok(())
            }
        })
        .unwrap();
    let log_top = log.clone();
    p.rule(ws.p("top.txt"))
        .depends(ws.p("mid.txt"))
        .run(move |inv: Invocation| {
            let log = log_top.clone();
            async move {
                std::fs::write(&inv.target, "top")?;
                log.record("top");
                Ok(())
            }
        })
        .unwrap();

    let report = build(p, ws.options(), &[ws.p("top.txt")]).await;
    assert!(report.error.is_none());
    assert_eq!(log.take(), vec!["mid", "top"]);
}

#[tokio::test]
async fn missing_promised_output_is_an_error() {
    let ws = Workspace::new();
    let mut p = Project::new();
    p.rule(ws.p("ghost.txt"))
        .run(|_| async { Ok(()) })
        .unwrap();

    let report = build(p, ws.options(), &[ws.p("ghost.txt")]).await;
    assert_eq!(report.exit_code(), 1);
    assert!(matches!(report.error, Some(Error::TargetNotProduced { .. })));
}

#[tokio::test]
async fn unknown_target_without_file_is_a_configuration_error() {
    let ws = Workspace::new();
    let p = Project::new();
    let err = BuildSession::new(p.into_registry(), ws.options())
        .build(&[ws.p("nowhere.bin")])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoRuleForTarget { .. }));
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn empty_request_builds_the_default_task() {
    let ws = Workspace::new();
    let log = RunLog::default();
    let mut p = Project::new();
    let l = log.clone();
    p.task("all")
        .default_task()
        .run(move |_| {
            let l = l.clone();
            async move {
                l.record("all");
                Ok(())
            }
        })
        .unwrap();

    let report = build(p, ws.options(), &[]).await;
    assert!(report.error.is_none());
    assert_eq!(log.take(), vec!["all"]);

    // Tasks are always stale: a second run executes again.
    let log2 = RunLog::default();
    let mut p = Project::new();
    let l = log2.clone();
    p.task("all")
        .default_task()
        .run(move |_| {
            let l = l.clone();
            async move {
                l.record("all");
                Ok(())
            }
        })
        .unwrap();
    build(p, ws.options(), &[]).await;
    assert_eq!(log2.take(), vec!["all"]);
}

#[tokio::test]
async fn handler_requested_builds_run_after_the_current_wave() {
    let ws = Workspace::new();
    let log = RunLog::default();
    let mut p = Project::new();
    let log_extra = log.clone();
    p.rule(ws.p("extra.txt"))
        .run(move |inv: Invocation| {
            let log = log_extra.clone();
            async move {
                std::fs::write(&inv.target, "extra")?;
                log.record("extra");
                Ok(())
            }
        })
        .unwrap();
    let log_first = log.clone();
    let extra_name = ws.p("extra.txt");
    p.rule(ws.p("first.txt"))
        .run(move |inv: Invocation| {
            let log = log_first.clone();
            let extra = extra_name.clone();
            async move {
                std::fs::write(&inv.target, "first")?;
                inv.build(extra.clone());
                log.record("first");
                Ok(())
            }
        })
        .unwrap();

    let report = build(p, ws.options(), &[ws.p("first.txt")]).await;
    assert!(report.error.is_none());
    assert_eq!(log.take(), vec!["first", "extra"]);
    assert!(ws.exists("extra.txt"));
}

#[tokio::test]
async fn failed_probe_rebuilds_but_fails_the_run() {
    let ws = Workspace::new();
    let log = RunLog::default();
    let mut p = Project::new();
    p.check("https://%")
        .probe(|_| async { Err("connection refused".into()) })
        .unwrap();
    let l = log.clone();
    p.rule(ws.p("data.json"))
        .depends("https://x/y")
        .run(move |inv: Invocation| {
            let l = l.clone();
            async move {
                std::fs::write(&inv.target, "{}")?;
                l.record("fetch");
                Ok(())
            }
        })
        .unwrap();

    let report = build(p, ws.options(), &[ws.p("data.json")]).await;
    // The resource is treated as changed, so the handler ran, but the
    // probe failure still fails the run.
    assert_eq!(log.take(), vec!["fetch"]);
    assert_eq!(report.exit_code(), 1);
    assert!(matches!(report.error, Some(Error::CheckProbeFailed { .. })));
}

#[tokio::test]
async fn commit_history_mode_degrades_to_mtimes_outside_a_repository() {
    let ws = Workspace::new();
    let log = RunLog::default();
    ws.write("hello.c", "a");
    ws.write("main.c", "b");
    ws.write("hello.h", "h");

    let report = build(
        c_project(&ws, &log),
        BuildOptions {
            commit_history: true,
            ..ws.options()
        },
        &[ws.p("hello.exe")],
    )
    .await;
    assert!(report.error.is_none());
    assert_eq!(log.count(), 3);
}
