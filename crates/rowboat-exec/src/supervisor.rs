use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info};
use rowboat_common::config::CaptureConfig;
use rowboat_common::encoding::OutputEncoding;
use rowboat_grid::error::GridError;
use rowboat_grid::infer::infer_table;
use rowboat_grid::metadata::ColumnMetadata;
use rowboat_grid::table::{Table, TableBuilder, TableOptions};
use rowboat_grid::tokenizer::{AbortFlag, CellWriter};
use rowboat_grid::warning::{Warning, WarningCollector};

use crate::drain::{drain_stream, DrainOptions, EndMark};
use crate::error::{ExecError, ExecResult};
use crate::process::{kill_child, lock_unpoisoned, InterpreterProcess, SharedChild};

/// One table captured from a dispatch, with inferred column metadata.
#[derive(Debug)]
pub struct CapturedTable {
    pub table: Table,
    pub columns: Vec<ColumnMetadata>,
}

/// The result of a query dispatch.
#[derive(Debug)]
pub struct QueryOutput {
    pub tables: Vec<CapturedTable>,
    pub warnings: Option<Warning>,
}

/// The result of a command dispatch.
#[derive(Debug)]
pub struct CommandOutput {
    /// Captured interpreters do not report affected-row counts.
    /// Always zero.
    pub update_count: u64,
    pub warnings: Option<Warning>,
}

#[derive(Debug)]
enum Session {
    NoProcess,
    Running(InterpreterProcess),
}

/// Drives one interpreter session across repeated script dispatches.
///
/// A dispatch reuses the live process when there is one, writing the
/// script to its input; otherwise it spawns a new process with the script
/// as the final argument. A process found dead at dispatch time is
/// discarded and replaced the same way. Each dispatch watches both output
/// streams concurrently and returns once both have concluded.
pub struct Supervisor {
    config: CaptureConfig,
    encoding: OutputEncoding,
    configured_mark: Option<EndMark>,
    session: Session,
    abort: AbortFlag,
    live_child: Arc<Mutex<Option<SharedChild>>>,
    closed: bool,
}

impl Supervisor {
    pub fn new(config: CaptureConfig) -> ExecResult<Self> {
        let encoding = OutputEncoding::for_label(&config.encoding)?;
        config.separator_byte()?;
        let configured_mark = match &config.end_pattern {
            Some(pattern) => Some(EndMark::from_pattern(pattern)?),
            None => None,
        };
        Ok(Self {
            config,
            encoding,
            configured_mark,
            session: Session::NoProcess,
            abort: AbortFlag::new(),
            live_child: Arc::new(Mutex::new(None)),
            closed: false,
        })
    }

    /// A handle that can cancel the in-flight dispatch from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            abort: self.abort.clone(),
            live_child: self.live_child.clone(),
        }
    }

    pub fn has_process(&self) -> bool {
        matches!(self.session, Session::Running(_))
    }

    pub fn pid(&self) -> Option<u32> {
        match &self.session {
            Session::Running(process) => process.pid(),
            Session::NoProcess => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Runs a script whose stdout is captured as one or more tables and
    /// whose stderr is captured as warnings.
    pub async fn dispatch(&mut self, script: &str) -> ExecResult<QueryOutput> {
        let (tables, warnings) = self.run(script, true).await?;
        Ok(QueryOutput { tables, warnings })
    }

    /// Runs a script that must not produce output on stdout. Anything it
    /// prints there fails the dispatch; stderr is still captured as
    /// warnings.
    pub async fn dispatch_command(&mut self, script: &str) -> ExecResult<CommandOutput> {
        let (_, warnings) = self.run(script, false).await?;
        Ok(CommandOutput {
            update_count: 0,
            warnings,
        })
    }

    /// Force-terminates the current process, if any, and poisons the
    /// in-flight invocation's output so it surfaces as aborted.
    pub fn cancel(&mut self) {
        self.abort.abort();
        self.discard_process();
    }

    /// Cancels and permanently closes the session. Closing an already
    /// closed session is a no-op.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.cancel();
        self.closed = true;
        debug!("interpreter session closed");
    }

    async fn run(
        &mut self,
        script: &str,
        with_output: bool,
    ) -> ExecResult<(Vec<CapturedTable>, Option<Warning>)> {
        if self.closed {
            return Err(ExecError::process("session is closed"));
        }
        // A cancellation belongs to the dispatch it interrupted; arm the
        // new one fresh.
        self.abort.clear();
        let result = self.run_unit(script, with_output).await;
        if result.is_err() {
            self.discard_process();
        }
        result
    }

    async fn run_unit(
        &mut self,
        script: &str,
        with_output: bool,
    ) -> ExecResult<(Vec<CapturedTable>, Option<Warning>)> {
        let spawned = self.ensure_process(script).await?;
        let separator = self.config.separator_byte()?;
        let options = TableOptions {
            multi_table: self.config.multi_table,
            skip_first_row: self.config.skip_first_line,
            max_rows: self.config.max_rows,
        };
        let drain_options = DrainOptions {
            quiet_period: self.config.quiet_period(),
            poll_interval: self.config.poll_interval(),
        };
        let epilogue_template = self.config.process.marker_epilogue.clone();
        let abort = self.abort.clone();

        let Session::Running(process) = &mut self.session else {
            return Err(ExecError::internal("dispatch without a process"));
        };
        if !spawned {
            process.write_script(script).await?;
        }
        if let Some(epilogue) = render_epilogue(epilogue_template.as_deref(), &process.end_mark) {
            process.write_epilogue(&epilogue).await;
        }

        let builder = TableBuilder::new(options);
        let mut table_writer = if with_output {
            CellWriter::cells(builder, separator, abort.clone())
        } else {
            CellWriter::disabled(builder, abort.clone())
        };
        let mut warning_writer = CellWriter::lines(WarningCollector::new(), abort.clone());

        let InterpreterProcess {
            stdout,
            stderr,
            end_mark,
            ..
        } = process;
        let end_mark = &*end_mark;
        let stdout_concluded = AtomicBool::new(false);
        let (stdout_result, stderr_result) = tokio::join!(
            async {
                let result = drain_stream(stdout, end_mark, drain_options, &abort, None, |line| {
                    table_writer.write(line.as_bytes())?;
                    table_writer.write(b"\n")
                })
                .await;
                stdout_concluded.store(true, Ordering::Relaxed);
                result
            },
            drain_stream(
                stderr,
                end_mark,
                drain_options,
                &abort,
                Some(&stdout_concluded),
                |line| {
                    warning_writer.write(line.as_bytes())?;
                    warning_writer.write(b"\n")
                },
            ),
        );
        let stdout_outcome = stdout_result?;
        let stderr_outcome = stderr_result?;
        if abort.is_aborted() {
            return Err(GridError::Aborted.into());
        }
        debug!("dispatch concluded: stdout {stdout_outcome:?}, stderr {stderr_outcome:?}");

        table_writer.close();
        warning_writer.close();
        let (tables, header) = table_writer.into_sink().finish();
        let warnings = warning_writer.into_sink().into_chain();
        let tables = tables
            .into_iter()
            .enumerate()
            .map(|(index, table)| {
                let header = if index == 0 { header.as_deref() } else { None };
                let columns = infer_table(&table, header);
                CapturedTable { table, columns }
            })
            .collect();
        Ok((tables, warnings))
    }

    /// Makes sure a live process is available, spawning one with the
    /// script as its final argument when there is none or the previous
    /// one died. Returns whether the script was delivered by spawning.
    async fn ensure_process(&mut self, script: &str) -> ExecResult<bool> {
        if let Session::Running(process) = &self.session {
            if process.is_alive() {
                return Ok(false);
            }
            info!(
                "interpreter process {:?} died; starting a new one",
                process.pid()
            );
            self.discard_process();
        }
        let end_mark = match &self.configured_mark {
            Some(mark) => mark.clone(),
            None => EndMark::random(),
        };
        let process = InterpreterProcess::spawn(
            &self.config.process,
            script,
            end_mark,
            self.config.queue_capacity,
            self.encoding,
        )
        .await?;
        *lock_unpoisoned(&self.live_child) = Some(process.child.clone());
        self.session = Session::Running(process);
        Ok(true)
    }

    fn discard_process(&mut self) {
        *lock_unpoisoned(&self.live_child) = None;
        if let Session::Running(process) = std::mem::replace(&mut self.session, Session::NoProcess)
        {
            process.kill();
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.close();
    }
}

/// Cancels the in-flight invocation from outside the dispatching task.
///
/// Cancelling kills the interpreter process and sets the shared abort
/// flag, so the dispatch fails with an aborted error instead of returning
/// stale output. Cancelling when nothing is in flight only kills the idle
/// process; the next dispatch starts fresh and is unaffected.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    abort: AbortFlag,
    live_child: Arc<Mutex<Option<SharedChild>>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.abort.abort();
        let slot = lock_unpoisoned(&self.live_child);
        if let Some(child) = slot.as_ref() {
            kill_child(child);
        }
        info!("cancel requested: interpreter process killed, output poisoned");
    }
}

fn render_epilogue(template: Option<&str>, end_mark: &EndMark) -> Option<String> {
    let template = template?;
    match end_mark.token() {
        Some(token) => Some(template.replace("{mark}", token)),
        None => Some(template.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_epilogue() {
        let end_mark = EndMark::Token("T-1".to_string());
        assert_eq!(render_epilogue(None, &end_mark), None);
        assert_eq!(
            render_epilogue(Some("echo {mark}\necho {mark} 1>&2"), &end_mark),
            Some("echo T-1\necho T-1 1>&2".to_string())
        );
        let pattern = EndMark::from_pattern("^DONE$").unwrap();
        assert_eq!(
            render_epilogue(Some("echo DONE"), &pattern),
            Some("echo DONE".to_string())
        );
    }

    #[test]
    fn test_new_rejects_bad_configuration() {
        let mut config = CaptureConfig::default();
        config.encoding = "no-such-encoding".to_string();
        assert!(Supervisor::new(config).is_err());

        let mut config = CaptureConfig::default();
        config.end_pattern = Some("(unclosed".to_string());
        assert!(Supervisor::new(config).is_err());

        let mut config = CaptureConfig::default();
        config.cell_separator = 'é';
        assert!(Supervisor::new(config).is_err());
    }

    #[tokio::test]
    async fn test_closed_session_rejects_dispatch() {
        let mut supervisor = Supervisor::new(CaptureConfig::default()).unwrap();
        supervisor.close();
        supervisor.close();
        assert!(supervisor.is_closed());
        let result = supervisor.dispatch("echo hi").await;
        assert!(matches!(result, Err(ExecError::ProcessExecution { .. })));
    }
}
