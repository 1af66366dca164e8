// Runs one generated test class through the project's build tool and
// classifies the result. Exit code first, log markers second.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Case-insensitive substrings that mark a build-time failure.
pub const COMPILE_FAILURE_MARKERS: [&str; 4] = [
    "compilation failed",
    "cannot find symbol",
    "error:",
    "compilation error",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationStatus {
    Pass,
    AssertionFailure,
    CompileFailure,
    ToolingFailure,
}

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub status: ValidationStatus,
    /// stdout followed by stderr.
    pub log: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl ValidationOutcome {
    pub fn tooling_failure(log: impl Into<String>) -> Self {
        Self {
            status: ValidationStatus::ToolingFailure,
            log: log.into(),
            exit_code: -1,
            duration_ms: 0,
        }
    }
}

/// Build-tool collaborator: run exactly one fully qualified test class.
pub trait TestRunner {
    fn run_test(&self, project_root: &Path, namespace: &str, unit_name: &str) -> ValidationOutcome;
}

/* ============================================================
   Classification
   ============================================================ */

pub fn has_compile_marker(log: &str) -> bool {
    let lower = log.to_lowercase();
    COMPILE_FAILURE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Markers are only consulted for non-zero exits.
pub fn classify(exit_code: i32, log: &str) -> ValidationStatus {
    if exit_code == 0 {
        ValidationStatus::Pass
    } else if has_compile_marker(log) {
        ValidationStatus::CompileFailure
    } else {
        ValidationStatus::AssertionFailure
    }
}

/// Keep the last `limit` chars of a build log.
pub fn log_tail(log: &str, limit: usize) -> String {
    let count = log.chars().count();
    if count <= limit {
        return log.to_string();
    }

    let tail: String = log.chars().skip(count - limit).collect();
    format!("...truncated...\n{tail}")
}

/* ============================================================
   Gradle
   ============================================================ */

pub struct GradleRunner {
    build_tool: String,
    timeout: Duration,
}

impl GradleRunner {
    pub fn new(build_tool: impl Into<String>, timeout: Duration) -> Self {
        Self {
            build_tool: build_tool.into(),
            timeout,
        }
    }

    /// Wrapper script inside the project root, `.bat` on Windows.
    pub fn entry_point(&self, project_root: &Path) -> PathBuf {
        if cfg!(windows) {
            project_root.join(format!("{}.bat", self.build_tool))
        } else {
            project_root.join(&self.build_tool)
        }
    }
}

impl TestRunner for GradleRunner {
    fn run_test(&self, project_root: &Path, namespace: &str, unit_name: &str) -> ValidationOutcome {
        let tool = self.entry_point(project_root);
        if !tool.is_file() {
            return ValidationOutcome::tooling_failure(format!(
                "build tool not found: {}",
                tool.display()
            ));
        }

        let target = if namespace.is_empty() {
            unit_name.to_string()
        } else {
            format!("{namespace}.{unit_name}")
        };

        let mut cmd = Command::new(&tool);
        cmd.arg("test")
            .arg("--tests")
            .arg(&target)
            .current_dir(project_root);

        run_with_timeout(cmd, self.timeout)
    }
}

/* ============================================================
   Process execution
   ============================================================ */

fn run_with_timeout(mut cmd: Command, timeout: Duration) -> ValidationOutcome {
    let started = Instant::now();

    let mut child = match cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(c) => c,
        Err(e) => {
            return ValidationOutcome::tooling_failure(format!("failed to launch build tool: {e}"))
        }
    };

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) if started.elapsed() >= timeout => {
                reap(&mut child);
                break None;
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                reap(&mut child);
                return ValidationOutcome::tooling_failure(format!("failed to wait for build tool: {e}"));
            }
        }
    };

    let mut log = collect(stdout);
    let err = collect(stderr);
    if !err.is_empty() {
        if !log.is_empty() && !log.ends_with('\n') {
            log.push('\n');
        }
        log.push_str(&err);
    }

    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    match status {
        Some(status) => {
            let exit_code = status.code().unwrap_or(-1);
            ValidationOutcome {
                status: classify(exit_code, &log),
                log,
                exit_code,
                duration_ms,
            }
        }
        None => {
            if !log.is_empty() && !log.ends_with('\n') {
                log.push('\n');
            }
            log.push_str(&format!("build timed out after {}s, process killed", timeout.as_secs_f32()));

            ValidationOutcome {
                status: ValidationStatus::ToolingFailure,
                log,
                exit_code: -1,
                duration_ms,
            }
        }
    }
}

/// Kill and wait, so no zombie is left behind.
fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Read a pipe to the end on its own thread so the child never blocks on a full buffer.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();

    if let Some(mut pipe) = pipe {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = tx.send(buf);
        });
    }

    rx
}

/// Grandchildren may keep a pipe open after the child exits; don't wait on them forever.
fn collect(rx: mpsc::Receiver<Vec<u8>>) -> String {
    rx.recv_timeout(DRAIN_GRACE)
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_zero_is_pass_even_with_markers() {
        assert_eq!(classify(0, "warning: error: benign"), ValidationStatus::Pass);
    }

    #[test]
    fn non_zero_with_marker_is_compile_failure() {
        assert_eq!(
            classify(1, "Foo.java:12: Cannot Find Symbol\n  symbol: class Bar"),
            ValidationStatus::CompileFailure
        );
        assert_eq!(
            classify(1, "Execution failed for task ':compileTestJava'.\n> Compilation failed; see the compiler error output"),
            ValidationStatus::CompileFailure
        );
    }

    #[test]
    fn non_zero_without_marker_is_assertion_failure() {
        assert_eq!(
            classify(1, "InvoiceTest > totals() FAILED\n    AssertionFailedError at InvoiceTest.java:20"),
            ValidationStatus::AssertionFailure
        );
    }

    #[test]
    fn log_tail_keeps_end() {
        assert_eq!(log_tail("abc", 10), "abc");
        assert_eq!(log_tail("abcdef", 3), "...truncated...\ndef");
    }

    #[test]
    fn missing_build_tool_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let runner = GradleRunner::new("gradlew", Duration::from_secs(1));
        let out = runner.run_test(dir.path(), "a.b", "CTest");

        assert_eq!(out.status, ValidationStatus::ToolingFailure);
        assert!(out.log.contains("build tool not found"));
    }

    #[cfg(unix)]
    #[test]
    fn reap_kills_and_collects_the_child() {
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let started = Instant::now();

        reap(&mut child);

        assert!(matches!(child.try_wait(), Ok(Some(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn scripted_build_tool() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("gradlew");

        let install = |body: &str| {
            fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        };

        let runner = GradleRunner::new("gradlew", Duration::from_secs(10));

        install("echo \"args: $@\"\nexit 0");
        let out = runner.run_test(dir.path(), "a.b", "CTest");
        assert_eq!(out.status, ValidationStatus::Pass);
        assert_eq!(out.exit_code, 0);
        assert!(out.log.contains("args: test --tests a.b.CTest"));

        install("echo 'CTest.java:3: error: cannot find symbol' >&2\nexit 1");
        let out = runner.run_test(dir.path(), "a.b", "CTest");
        assert_eq!(out.status, ValidationStatus::CompileFailure);
        assert_eq!(out.exit_code, 1);
        assert!(out.log.contains("cannot find symbol"));

        install("echo 'expected 3 but was 4'\nexit 1");
        let out = runner.run_test(dir.path(), "a.b", "CTest");
        assert_eq!(out.status, ValidationStatus::AssertionFailure);

        let slow = GradleRunner::new("gradlew", Duration::from_millis(300));
        install("exec sleep 5");
        let out = slow.run_test(dir.path(), "a.b", "CTest");
        assert_eq!(out.status, ValidationStatus::ToolingFailure);
        assert!(out.log.contains("timed out"));
        assert!(out.duration_ms >= 300);
    }
}
