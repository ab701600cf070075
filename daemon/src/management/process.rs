use crate::config::ServerSettings;
use log::{debug, warn};
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::select;
use tokio::sync::{Mutex, Notify};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Receives everything the supervised process produces.
pub(super) trait ProcessObserver: Send + Sync + 'static {
    fn on_stdout(&self, line: String);

    fn on_stderr(&self, line: String);

    fn on_exited(&self, status: io::Result<ExitStatus>);
}

/// Shared handle on a running server process.
pub(super) struct ProcessHandle {
    pid: Option<u32>,
    stdin: Mutex<ChildStdin>,
    kill_notify: Notify,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub async fn write_line(&self, line: &str) -> io::Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    }

    /// Asks the reader task to kill the process. A kill requested before the
    /// task polls the notification is kept.
    pub fn kill(&self) {
        self.kill_notify.notify_one();
    }
}

/// The parts of a spawned process only the reader task touches.
pub(super) struct ProcessPipes {
    child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
}

fn missing_pipe(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, format!("child {} was not captured", name))
}

/// Launches the server inside its directory with every stdio stream piped.
pub(super) fn spawn(settings: &ServerSettings) -> io::Result<(ProcessHandle, ProcessPipes)> {
    let mut cmd = Command::new(settings.executable_path());
    cmd.args(&settings.arguments)
        .current_dir(&settings.directory)
        // bedrock ships its shared libraries next to the executable
        .env("LD_LIBRARY_PATH", &settings.directory)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

    let handle = ProcessHandle {
        pid: child.id(),
        stdin: Mutex::new(stdin),
        kill_notify: Notify::new(),
    };
    Ok((handle, ProcessPipes { child, stdout, stderr }))
}

/// Pumps output lines into `observer` until the process exits, then reports
/// the exit exactly once.
pub(super) async fn supervise<O: ProcessObserver>(
    pipes: ProcessPipes,
    handle: &ProcessHandle,
    observer: &O,
) {
    let ProcessPipes {
        mut child,
        stdout,
        stderr,
    } = pipes;
    let mut stdout = BufReader::new(stdout).lines();
    let mut stderr = BufReader::new(stderr).lines();
    let (mut stdout_open, mut stderr_open) = (true, true);

    let killed = loop {
        select! {
            line = stdout.next_line(), if stdout_open => match line {
                Ok(Some(line)) => observer.on_stdout(line),
                Ok(None) => stdout_open = false,
                Err(err) => {
                    warn!("reading server stdout failed: {}", err);
                    stdout_open = false;
                }
            },
            line = stderr.next_line(), if stderr_open => match line {
                Ok(Some(line)) => observer.on_stderr(line),
                Ok(None) => stderr_open = false,
                Err(err) => {
                    warn!("reading server stderr failed: {}", err);
                    stderr_open = false;
                }
            },
            result = child.wait() => break Some(result),
            _ = handle.kill_notify.notified() => break None,
        }
    };

    // whatever the server printed right before exiting still belongs to it
    let drain = async {
        while stdout_open || stderr_open {
            select! {
                line = stdout.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => observer.on_stdout(line),
                    _ => stdout_open = false,
                },
                line = stderr.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => observer.on_stderr(line),
                    _ => stderr_open = false,
                },
            }
        }
    };

    let result = match killed {
        Some(result) => result,
        None => {
            debug!("killing server process (pid={:?})", handle.pid);
            if let Err(err) = child.kill().await {
                warn!("Could not kill process (pid={:?}): {}", handle.pid, err);
            }
            child.wait().await
        }
    };
    if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        debug!("server output still open after exit (pid={:?})", handle.pid);
    }
    observer.on_exited(result);
}
