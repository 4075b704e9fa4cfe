//! Process supervisor for external tool invocations.
//!
//! Every yt-dlp and FFmpeg run goes through [`ProcessSupervisor::run`], which:
//! - streams stdout/stderr lines to caller sinks as they arrive
//! - optionally merges stderr into stdout
//! - enforces a per-invocation timeout
//! - honors a cancellation token
//! - kills and reaps the process (and its process group on unix) on every
//!   early-exit path, so nothing outlives the call

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};
use crate::metrics::record_process_run;

/// How long reader tasks may drain the pipes after a normal exit.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// How long reader tasks may drain the pipes after a forced kill.
const KILL_GRACE: Duration = Duration::from_millis(250);

/// Callback receiving one line of tool output at a time.
pub type LineSink = Arc<dyn Fn(&str) + Send + Sync>;

/// How stderr is combined with stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// stdout and stderr are captured and reported independently
    #[default]
    Separate,
    /// stderr is folded into stdout: the output sink and captured stdout
    /// see both streams
    Merged,
}

/// One external-tool launch. Built once, immutable while running.
#[derive(Clone)]
pub struct ProcessInvocation {
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
    timeout: Duration,
    mode: StreamMode,
    on_output: Option<LineSink>,
    on_error: Option<LineSink>,
}

impl ProcessInvocation {
    /// Create an invocation of `program` that must finish within `timeout`.
    pub fn new(program: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            env: Vec::new(),
            timeout,
            mode: StreamMode::Separate,
            on_output: None,
            on_error: None,
        }
    }

    /// Add one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Override an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stream_mode(mut self, mode: StreamMode) -> Self {
        self.mode = mode;
        self
    }

    /// Receive stdout lines (and stderr lines in merged mode) as they arrive.
    pub fn on_output<F>(mut self, sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_output = Some(Arc::new(sink));
        self
    }

    /// Receive stderr lines as they arrive (ignored in merged mode).
    pub fn on_error<F>(mut self, sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(sink));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Short program name for logs and metrics.
    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.to_string_lossy().into_owned())
    }
}

impl fmt::Debug for ProcessInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessInvocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &self.env)
            .field("timeout", &self.timeout)
            .field("mode", &self.mode)
            .field("on_output", &self.on_output.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Result of a process that ran to exit. Any exit code is a normal outcome.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    /// Exit code; `None` if the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Wall-clock time from spawn to exit
    pub duration: Duration,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// What ended the wait on the child.
enum WaitOutcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Spawns and supervises external tool processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessSupervisor;

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self
    }

    /// Run one invocation to completion.
    ///
    /// # Errors
    /// - [`MediaError::LaunchFailure`] if the program path is empty or cannot be spawned
    /// - [`MediaError::Timeout`] if the invocation exceeds its timeout
    /// - [`MediaError::Cancelled`] if `cancel` fires first
    ///
    /// A non-zero exit code is not an error; callers inspect the outcome.
    pub async fn run(
        &self,
        invocation: &ProcessInvocation,
        cancel: &CancellationToken,
    ) -> MediaResult<ProcessOutcome> {
        let name = invocation.program_name();

        if invocation.program.as_os_str().is_empty() {
            record_process_run("unset", "launch_failure", Duration::ZERO);
            return Err(MediaError::launch_failure("<unset>", "tool path is empty"));
        }
        if cancel.is_cancelled() {
            return Err(MediaError::Cancelled);
        }

        debug!(
            program = %invocation.program.display(),
            args = ?invocation.args,
            timeout_secs = invocation.timeout.as_secs_f64(),
            "Spawning process"
        );

        let started = Instant::now();
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| {
            record_process_run(&name, "launch_failure", started.elapsed());
            MediaError::launch_failure(invocation.program.display().to_string(), e.to_string())
        })?;

        let merged = invocation.mode == StreamMode::Merged;
        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = if merged {
            Arc::clone(&stdout_buf)
        } else {
            Arc::new(Mutex::new(Vec::new()))
        };
        let stderr_sink = if merged {
            invocation.on_output.clone()
        } else {
            invocation.on_error.clone()
        };

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump(
                stdout,
                Arc::clone(&stdout_buf),
                invocation.on_output.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump(
                stderr,
                Arc::clone(&stderr_buf),
                stderr_sink,
            )));
        }

        let outcome = tokio::select! {
            result = tokio::time::timeout(invocation.timeout, child.wait()) => match result {
                Ok(status) => WaitOutcome::Exited(status),
                Err(_) => WaitOutcome::TimedOut,
            },
            _ = cancel.cancelled() => WaitOutcome::Cancelled,
        };

        let status = match outcome {
            WaitOutcome::Exited(Ok(status)) => status,
            WaitOutcome::Exited(Err(e)) => {
                terminate(&mut child, &name).await;
                join_readers(readers, KILL_GRACE).await;
                record_process_run(&name, "io_error", started.elapsed());
                return Err(MediaError::Io(e));
            }
            WaitOutcome::TimedOut => {
                warn!(
                    program = %name,
                    timeout_secs = invocation.timeout.as_secs_f64(),
                    "Process timed out, killing"
                );
                terminate(&mut child, &name).await;
                join_readers(readers, KILL_GRACE).await;
                record_process_run(&name, "timeout", started.elapsed());
                return Err(MediaError::Timeout(invocation.timeout));
            }
            WaitOutcome::Cancelled => {
                debug!(program = %name, "Process cancelled, killing");
                terminate(&mut child, &name).await;
                join_readers(readers, KILL_GRACE).await;
                record_process_run(&name, "cancelled", started.elapsed());
                return Err(MediaError::Cancelled);
            }
        };

        join_readers(readers, DRAIN_GRACE).await;
        let duration = started.elapsed();

        let stdout = take_buffer(&stdout_buf);
        let stderr = if merged { Vec::new() } else { take_buffer(&stderr_buf) };

        let exit_code = status.code();
        record_process_run(
            &name,
            if status.success() { "success" } else { "failure" },
            duration,
        );
        debug!(
            program = %name,
            exit_code = ?exit_code,
            duration_ms = duration.as_millis() as u64,
            "Process exited"
        );

        Ok(ProcessOutcome {
            exit_code,
            stdout,
            stderr,
            duration,
        })
    }
}

/// Kill the child (and its process group) and reap it.
async fn terminate(child: &mut Child, name: &str) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!(program = %name, error = %e, "killpg failed");
        }
    }

    if let Err(e) = child.kill().await {
        debug!(program = %name, error = %e, "kill failed (process already gone?)");
    }
}

/// Wait for reader tasks, aborting any that outlive `grace`.
async fn join_readers(readers: Vec<JoinHandle<std::io::Result<()>>>, grace: Duration) {
    for mut handle in readers {
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => debug!(error = %e, "Pipe reader failed"),
            Ok(Err(e)) => debug!(error = %e, "Pipe reader panicked"),
            Err(_) => {
                debug!("Pipe reader did not finish in time, aborting");
                handle.abort();
            }
        }
    }
}

fn take_buffer(buf: &Arc<Mutex<Vec<u8>>>) -> Vec<u8> {
    let mut guard = buf.lock().unwrap_or_else(|e| e.into_inner());
    std::mem::take(&mut *guard)
}

/// Copy a pipe into `target`, feeding complete lines to `sink` as they arrive.
async fn pump<R>(
    mut reader: R,
    target: Arc<Mutex<Vec<u8>>>,
    sink: Option<LineSink>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];
    let mut pending = Vec::new();

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }

        target
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(&chunk[..n]);

        if let Some(sink) = &sink {
            pending.extend_from_slice(&chunk[..n]);
            emit_lines(&mut pending, sink);
        }
    }

    if let Some(sink) = &sink {
        if !pending.is_empty() {
            sink(&String::from_utf8_lossy(&pending));
        }
    }

    Ok(())
}

/// Emit every complete line in `pending` and keep the unfinished tail.
///
/// Both `\n` and `\r` terminate a line: progress meters redraw in place
/// with carriage returns.
fn emit_lines(pending: &mut Vec<u8>, sink: &LineSink) {
    let mut start = 0;
    for i in 0..pending.len() {
        if pending[i] == b'\n' || pending[i] == b'\r' {
            if i > start {
                sink(&String::from_utf8_lossy(&pending[start..i]));
            }
            start = i + 1;
        }
    }
    pending.drain(..start);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Send + Sync + 'static) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink_lines = Arc::clone(&lines);
        (lines, move |line: &str| {
            sink_lines.lock().unwrap().push(line.to_string())
        })
    }

    #[test]
    fn test_emit_lines_splits_on_cr_and_lf() {
        let (lines, sink) = collector();
        let sink: LineSink = Arc::new(sink);
        let mut pending = b"frame=1\rframe=2\r\nDuration: 00:00:10.00\npart".to_vec();

        emit_lines(&mut pending, &sink);

        assert_eq!(
            *lines.lock().unwrap(),
            vec!["frame=1", "frame=2", "Duration: 00:00:10.00"]
        );
        assert_eq!(pending, b"part");
    }

    #[tokio::test]
    async fn test_empty_program_is_launch_failure() {
        let inv = ProcessInvocation::new("", Duration::from_secs(1));
        let result = ProcessSupervisor::new()
            .run(&inv, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(MediaError::LaunchFailure { .. })));
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_failure() {
        let inv = ProcessInvocation::new("/nonexistent/clipdl-tool", Duration::from_secs(1));
        let result = ProcessSupervisor::new()
            .run(&inv, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(MediaError::LaunchFailure { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_separate_streams() {
        let inv = ProcessInvocation::new("sh", Duration::from_secs(10))
            .args(["-c", "echo out; echo err 1>&2; exit 3"]);

        let outcome = ProcessSupervisor::new()
            .run(&inv, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, Some(3));
        assert!(!outcome.success());
        assert_eq!(outcome.stdout_text(), "out\n");
        assert_eq!(outcome.stderr_text(), "err\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_merged_streams_reach_output_sink() {
        let (lines, sink) = collector();
        let inv = ProcessInvocation::new("sh", Duration::from_secs(10))
            .args(["-c", "echo one; echo two 1>&2"])
            .stream_mode(StreamMode::Merged)
            .on_output(sink);

        let outcome = ProcessSupervisor::new()
            .run(&inv, &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.success());
        assert!(outcome.stderr.is_empty());
        let text = outcome.stdout_text();
        assert!(text.contains("one") && text.contains("two"));

        let mut seen = lines.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["one", "two"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_environment_override() {
        let inv = ProcessInvocation::new("sh", Duration::from_secs(10))
            .args(["-c", "printf %s \"$CLIPDL_TEST_VAR\""])
            .env("CLIPDL_TEST_VAR", "hello");

        let outcome = ProcessSupervisor::new()
            .run(&inv, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.stdout_text(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sink_sees_lines_before_exit() {
        let (lines, sink) = collector();
        let observed = Arc::clone(&lines);
        let inv = ProcessInvocation::new("sh", Duration::from_secs(10))
            .args(["-c", "echo early; sleep 1; echo late"])
            .on_output(sink);

        let run = tokio::spawn(async move {
            ProcessSupervisor::new()
                .run(&inv, &CancellationToken::new())
                .await
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(*observed.lock().unwrap(), vec!["early"]);

        run.await.unwrap().unwrap();
        assert_eq!(*lines.lock().unwrap(), vec!["early", "late"]);
    }

    #[cfg(unix)]
    fn process_alive(pid: &str) -> bool {
        std::process::Command::new("kill")
            .args(["-0", pid])
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_process() {
        let (lines, sink) = collector();
        let inv = ProcessInvocation::new("sh", Duration::from_millis(300))
            .args(["-c", "echo $$; exec sleep 30"])
            .on_output(sink);

        let started = Instant::now();
        let result = ProcessSupervisor::new()
            .run(&inv, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(MediaError::Timeout(d)) if d == Duration::from_millis(300)));
        assert!(started.elapsed() < Duration::from_secs(2));

        let pid = lines.lock().unwrap().first().cloned().expect("pid line");
        assert!(!process_alive(&pid), "process {} survived timeout", pid);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_grandchildren() {
        let (lines, sink) = collector();
        let inv = ProcessInvocation::new("sh", Duration::from_millis(300))
            .args(["-c", "sleep 30 & echo $!; wait"])
            .on_output(sink);

        let started = Instant::now();
        let result = ProcessSupervisor::new()
            .run(&inv, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(MediaError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(2));

        let pid = lines.lock().unwrap().first().cloned().expect("pid line");
        // Give the kernel a moment to deliver SIGKILL to the orphan
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!process_alive(&pid), "grandchild {} survived timeout", pid);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancellation_kills_process() {
        let (lines, sink) = collector();
        let inv = ProcessInvocation::new("sh", Duration::from_secs(30))
            .args(["-c", "echo $$; exec sleep 30"])
            .on_output(sink);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result = ProcessSupervisor::new().run(&inv, &cancel).await;

        assert!(matches!(result, Err(MediaError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2));
        let pid = lines.lock().unwrap().first().cloned().expect("pid line");
        assert!(!process_alive(&pid));
    }

    #[tokio::test]
    async fn test_already_cancelled_does_not_spawn() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let inv = ProcessInvocation::new("/nonexistent/clipdl-tool", Duration::from_secs(1));
        let result = ProcessSupervisor::new().run(&inv, &cancel).await;
        assert!(matches!(result, Err(MediaError::Cancelled)));
    }
}
