use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use anyhow::Context as _;
use once_cell::sync::Lazy;
use tokio::{io::AsyncWriteExt as _, process::Command};

use super::result::{RunResult, RunStatus};

/// External peak-memory probe (GNU time). Invoked as
/// `time -f '%M' -o <file> -- <shell> -c <command>`; the last line of the
/// side file is the peak resident set size in kilobytes.
const MEMORY_PROBE: &str = "/usr/bin/time";

static MEMORY_PROBE_AVAILABLE: Lazy<bool> = Lazy::new(|| {
    let ok = std::process::Command::new(MEMORY_PROBE)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    if !ok {
        log::warn!(
            "Memory probe '{}' is unavailable; peak memory will not be reported",
            MEMORY_PROBE
        );
    }
    ok
});

/// Runs one shell command against one input stream, with an optional wall
/// clock limit and optional peak-memory probing.
///
/// The child is placed in its own process group so that a timeout can kill
/// the whole tree, including the probe wrapper sitting between us and the
/// real command.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    shell: PathBuf,
    time_limit: Option<Duration>,
    measure_memory: bool,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    pub const DEFAULT_SHELL: &str = "/bin/sh";

    pub fn new() -> Self {
        Self {
            shell: Self::DEFAULT_SHELL.into(),
            time_limit: None,
            measure_memory: false,
        }
    }

    pub fn shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn time_limit(mut self, limit: Option<Duration>) -> Self {
        self.time_limit = limit;
        self
    }

    pub fn measure_memory(mut self, on: bool) -> Self {
        self.measure_memory = on;
        self
    }

    pub fn get_shell(&self) -> &Path {
        &self.shell
    }

    pub fn get_time_limit(&self) -> Option<Duration> {
        self.time_limit
    }

    /// Run `command` with `input` piped to its stdin, stdout captured and
    /// stderr passed through.
    ///
    /// Spawn failures (`NotFound` / `PermissionDenied`) are reported as
    /// `RunStatus::SpawnFailed`; callers decide whether that is fatal.
    pub async fn run(&self, command: &str, input: Option<&[u8]>) -> anyhow::Result<RunResult> {
        let probe_file = if self.measure_memory && *MEMORY_PROBE_AVAILABLE {
            Some(
                tempfile::NamedTempFile::new()
                    .context("Failed to create memory probe side file")?,
            )
        } else {
            None
        };

        let mut cmd = self.build_command(command, probe_file.as_ref().map(|f| f.path()));
        cmd.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let start = tokio::time::Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied) => {
                return Ok(RunResult {
                    status: RunStatus::SpawnFailed(e.to_string()),
                    stdout: Vec::new(),
                    elapsed: Duration::ZERO,
                    peak_memory_mb: None,
                });
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to spawn '{} -c {}'", self.shell.display(), command)
                })
            }
        };

        let mut stdin = child.stdin.take();
        let mut stdout = child.stdout.take().context("Failed to open child stdout")?;
        let mut stdout_buf = Vec::new();

        let communicate = async {
            if let (Some(pipe), Some(data)) = (stdin.as_mut(), input) {
                match pipe.write_all(data).await {
                    Ok(()) => (),
                    // the child is allowed to exit without draining its stdin
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => (),
                    Err(e) => {
                        return Err(anyhow::Error::new(e)
                            .context("Failed to pass input-data to stdin"))
                    }
                }
            }
            drop(stdin.take()); // close the pipe so the child sees EOF
            tokio::io::copy(&mut stdout, &mut stdout_buf)
                .await
                .context("Failed to capture stdout")?;
            child.wait().await.context("Failed to wait for subprocess")
        };

        let res = match self.time_limit {
            Some(limit) => tokio::time::timeout(limit, communicate).await,
            None => Ok(communicate.await),
        };
        let elapsed = start.elapsed();

        let status = match res {
            Err(_) => {
                kill_tree(&mut child).await;
                RunStatus::TimedOut
            }
            Ok(Err(e)) => return Err(e),
            Ok(Ok(exit_status)) => RunStatus::Exited(exit_code_of(exit_status)),
        };

        let peak_memory_mb = probe_file.as_ref().and_then(|f| read_peak_memory_mb(f.path()));

        Ok(RunResult {
            status,
            stdout: stdout_buf,
            elapsed,
            peak_memory_mb,
        })
    }

    fn build_command(&self, command: &str, probe_out: Option<&Path>) -> Command {
        match probe_out {
            Some(out) => {
                let mut cmd = Command::new(MEMORY_PROBE);
                cmd.args(["-f", "%M", "-o"])
                    .arg(out)
                    .arg("--")
                    .arg(&self.shell)
                    .args(["-c", command]);
                cmd
            }
            None => {
                let mut cmd = Command::new(&self.shell);
                cmd.args(["-c", command]);
                cmd
            }
        }
    }
}

/// Kill the child's entire process group, then reap it. The group exists
/// because the runner spawns with `process_group(0)`.
async fn kill_tree(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
    child
        .kill()
        .await
        .unwrap_or_else(|e| log::warn!("Failed to kill timed-out process: {:#}", e));
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt as _;
        if let Some(sig) = status.signal() {
            return 128 + sig;
        }
    }
    status.code().unwrap_or(1)
}

fn read_peak_memory_mb(path: &Path) -> Option<f64> {
    let contents = std::fs::read_to_string(path).ok()?;
    let kilobytes: f64 = contents
        .lines()
        .rev()
        .find_map(|line| line.trim().parse().ok())?;
    Some(kilobytes / 1024.0)
}

#[cfg(test)]
mod test {
    use super::*;

    fn py(script: &str) -> String {
        // terminate '  ->  enclose ' with "  ->  restart '
        format!("python3 -c '{}'", script.replace('\'', r#"'"'"'"#))
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let res = ProcessRunner::new()
            .run(&py(r#"print("hello_" + input())"#), Some(b"123\n"))
            .await
            .unwrap();
        assert_eq!(res.status, RunStatus::Exited(0));
        assert_eq!(res.stdout, b"hello_123\n");
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_with_output() {
        let res = ProcessRunner::new()
            .run(&py(r#"print("boom"); exit(42)"#), None)
            .await
            .unwrap();
        assert_eq!(res.status, RunStatus::Exited(42));
        assert_eq!(res.stdout, b"boom\n");
    }

    #[tokio::test]
    async fn timeout_kills_and_keeps_partial_output() {
        let res = ProcessRunner::new()
            .time_limit(Some(Duration::from_millis(300)))
            .run(
                &py(r#"import sys, time; print("partial"); sys.stdout.flush(); time.sleep(10)"#),
                None,
            )
            .await
            .unwrap();
        assert_eq!(res.status, RunStatus::TimedOut);
        assert_eq!(res.stdout, b"partial\n");
        assert!(res.elapsed >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn missing_shell_is_a_spawn_failure() {
        let res = ProcessRunner::new()
            .shell("/no/such/shell")
            .run("true", None)
            .await
            .unwrap();
        assert!(matches!(res.status, RunStatus::SpawnFailed(_)));
    }

    #[tokio::test]
    async fn unread_stdin_is_not_an_error() {
        let res = ProcessRunner::new()
            .run(&py(r#"print("ok")"#), Some(b"never read\n"))
            .await
            .unwrap();
        assert_eq!(res.status, RunStatus::Exited(0));
        assert_eq!(res.stdout, b"ok\n");
    }

    #[tokio::test]
    async fn memory_probe_degrades_gracefully() {
        let res = ProcessRunner::new()
            .measure_memory(true)
            .run(&py(r#"print("m")"#), None)
            .await
            .unwrap();
        assert_eq!(res.status, RunStatus::Exited(0));
        assert_eq!(res.stdout, b"m\n");
        // Some on hosts with GNU time installed, None elsewhere
        if let Some(mb) = res.peak_memory_mb {
            assert!(mb > 0.0);
        }
    }

    #[test]
    fn peak_memory_parses_last_numeric_line() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "Command exited with non-zero status\n2048\n").unwrap();
        assert_eq!(read_peak_memory_mb(file.path()), Some(2.0));
    }
}
