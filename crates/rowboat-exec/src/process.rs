use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use rowboat_common::config::ProcessConfig;
use rowboat_common::encoding::OutputEncoding;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};

use crate::drain::{EndMark, StreamQueue};
use crate::error::{ExecError, ExecResult};

/// Environment variable carrying the session's end-of-data token, so an
/// interpreter bootstrap can echo it after each unit of work.
pub const END_MARK_ENV: &str = "ROWBOAT_END_MARK";

/// How long a dispatch waits for both reader tasks to come up before the
/// process is declared unusable.
const READER_START_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) type SharedChild = Arc<Mutex<Child>>;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn kill_child(child: &SharedChild) {
    let mut child = lock_unpoisoned(child);
    if let Err(e) = child.start_kill() {
        debug!("failed to kill interpreter process: {e}");
    }
}

/// One live interpreter process with both output streams piped into line
/// queues.
///
/// Each stream gets its own reader task that decodes lines and feeds a
/// bounded queue, applying backpressure to a chatty interpreter while a
/// slow consumer catches up. The child is killed when the handle drops.
#[derive(Debug)]
pub struct InterpreterProcess {
    pub(crate) child: SharedChild,
    pub(crate) stdin: ChildStdin,
    pub(crate) stdout: StreamQueue,
    pub(crate) stderr: StreamQueue,
    pub(crate) end_mark: EndMark,
    pid: Option<u32>,
}

impl InterpreterProcess {
    /// Spawns the interpreter with `script` appended as the final
    /// argument.
    ///
    /// Returns once both reader tasks have signalled readiness, so no
    /// early output can slip by unobserved.
    pub async fn spawn(
        config: &ProcessConfig,
        script: &str,
        end_mark: EndMark,
        queue_capacity: usize,
        encoding: OutputEncoding,
    ) -> ExecResult<Self> {
        let mut command = Command::new(&config.program);
        command
            .args(&config.args)
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(token) = end_mark.token() {
            command.env(END_MARK_ENV, token);
        }
        let mut child = command
            .spawn()
            .map_err(|e| ExecError::process_io(format!("failed to spawn {}", config.program), e))?;
        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExecError::internal("child stdin is not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::internal("child stdout is not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecError::internal("child stderr is not piped"))?;

        let capacity = queue_capacity.max(1);
        let (stdout_queue, stdout_ready) = spawn_reader("stdout", stdout, capacity, encoding);
        let (stderr_queue, stderr_ready) = spawn_reader("stderr", stderr, capacity, encoding);
        let rendezvous = async {
            stdout_ready.await?;
            stderr_ready.await?;
            Ok::<_, oneshot::error::RecvError>(())
        };
        match tokio::time::timeout(READER_START_TIMEOUT, rendezvous).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                let _ = child.start_kill();
                return Err(ExecError::process("reader task stopped before starting"));
            }
            Err(_) => {
                let _ = child.start_kill();
                return Err(ExecError::process("reader tasks did not start in time"));
            }
        }
        debug!("interpreter process started: pid {pid:?}");

        Ok(Self {
            child: Arc::new(Mutex::new(child)),
            stdin,
            stdout: StreamQueue::new(stdout_queue),
            stderr: StreamQueue::new(stderr_queue),
            end_mark,
            pid,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the child has not exited yet. Reaps the exit status as a
    /// side effect once it has.
    pub fn is_alive(&self) -> bool {
        let mut child = lock_unpoisoned(&self.child);
        matches!(child.try_wait(), Ok(None))
    }

    pub fn kill(&self) {
        kill_child(&self.child);
    }

    /// Writes one unit of work to the interpreter's input.
    pub async fn write_script(&mut self, script: &str) -> ExecResult<()> {
        self.write_line(script)
            .await
            .map_err(|e| ExecError::process_io("failed to write script to interpreter", e))
    }

    /// Writes the end-of-data epilogue. Best effort: a one-shot
    /// interpreter may have exited without ever reading its input.
    pub async fn write_epilogue(&mut self, epilogue: &str) {
        if let Err(e) = self.write_line(epilogue).await {
            warn!("failed to write marker epilogue: {e}");
        }
    }

    async fn write_line(&mut self, text: &str) -> std::io::Result<()> {
        self.stdin.write_all(text.as_bytes()).await?;
        if !text.ends_with('\n') {
            self.stdin.write_all(b"\n").await?;
        }
        self.stdin.flush().await
    }
}

/// Starts the reader task for one stream and hands back its line queue
/// plus a readiness signal.
fn spawn_reader<R>(
    stream_name: &'static str,
    stream: R,
    capacity: usize,
    encoding: OutputEncoding,
) -> (mpsc::Receiver<String>, oneshot::Receiver<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (sender, receiver) = mpsc::channel(capacity);
    let (ready_sender, ready_receiver) = oneshot::channel();
    tokio::spawn(async move {
        let _ = ready_sender.send(());
        let mut reader = BufReader::new(stream);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer).await {
                Ok(0) => break,
                Ok(_) => {
                    while buffer.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
                        buffer.pop();
                    }
                    if sender.send(encoding.decode(&buffer)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{stream_name} reader failed: {e}");
                    break;
                }
            }
        }
        debug!("{stream_name} reader ended");
    });
    (receiver, ready_receiver)
}
