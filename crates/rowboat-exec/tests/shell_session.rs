#![cfg(unix)]

use std::time::{Duration, Instant};

use rowboat_common::config::CaptureConfig;
use rowboat_exec::error::ExecError;
use rowboat_exec::supervisor::{QueryOutput, Supervisor};
use rowboat_grid::error::GridError;
use rowboat_grid::metadata::{Nullability, SqlType};

/// Evaluates the spawn script, then every further input line, so one
/// shell serves repeated dispatches the way a database REPL would.
const REPL_BOOTSTRAP: &str = "eval \"$1\"\nwhile IFS= read -r line; do eval \"$line\"; done";

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn one_shot_config() -> CaptureConfig {
    let mut config = CaptureConfig::default();
    config.quiet_period_ms = 300;
    config.poll_interval_ms = 25;
    config
}

fn repl_config() -> CaptureConfig {
    let mut config = one_shot_config();
    config.process.args = vec![
        "-c".to_string(),
        REPL_BOOTSTRAP.to_string(),
        "rowboat".to_string(),
    ];
    config.process.marker_epilogue = Some("echo {mark}\necho {mark} 1>&2".to_string());
    config
}

fn cells(output: &QueryOutput, table: usize) -> Vec<Vec<String>> {
    output.tables[table]
        .table
        .rows()
        .map(|row| row.to_vec())
        .collect()
}

#[tokio::test]
async fn test_query_captures_cells_and_rows() {
    init_logging();
    let mut supervisor = Supervisor::new(one_shot_config()).unwrap();
    let output = supervisor
        .dispatch(r"printf 'a,b\nc,d\n'")
        .await
        .unwrap();
    assert_eq!(output.tables.len(), 1);
    assert_eq!(cells(&output, 0), vec![vec!["a", "b"], vec!["c", "d"]]);
    assert_eq!(output.tables[0].columns[0].label, "_c0");
    assert!(output.warnings.is_none());
}

#[tokio::test]
async fn test_multi_table_partitioning() {
    init_logging();
    let mut supervisor = Supervisor::new(one_shot_config()).unwrap();
    let output = supervisor
        .dispatch(r"printf '1,2\n3,4\n5,6,7\n'")
        .await
        .unwrap();
    assert_eq!(output.tables.len(), 2);
    assert_eq!(output.tables[0].table.row_count(), 2);
    assert_eq!(output.tables[0].table.column_count(), 2);
    assert_eq!(output.tables[1].table.row_count(), 1);
    assert_eq!(output.tables[1].table.column_count(), 3);
}

#[tokio::test]
async fn test_header_and_type_inference() {
    init_logging();
    let mut config = one_shot_config();
    config.skip_first_line = true;
    let mut supervisor = Supervisor::new(config).unwrap();
    let output = supervisor
        .dispatch(r"printf 'id,price\n1,0.12\n2,1.2\n'")
        .await
        .unwrap();
    assert_eq!(output.tables.len(), 1);
    let columns = &output.tables[0].columns;
    assert_eq!(columns[0].label, "id");
    assert_eq!(columns[0].sql_type, SqlType::Integer);
    assert_eq!(columns[0].nullability, Nullability::NotNullable);
    assert!(columns[0].first_row_is_header);
    assert_eq!(columns[1].label, "price");
    assert_eq!(columns[1].sql_type, SqlType::Double);
    assert_eq!(columns[1].scale, 2);
    assert_eq!(columns[1].precision, 1);
    assert_eq!(columns[1].display_size, 4);
}

#[tokio::test]
async fn test_row_bound_discards_overflow() {
    init_logging();
    let mut config = one_shot_config();
    config.max_rows = 2;
    let mut supervisor = Supervisor::new(config).unwrap();
    let output = supervisor
        .dispatch(r"printf '1\n2\n3\n4\n'")
        .await
        .unwrap();
    assert_eq!(output.tables.len(), 1);
    assert_eq!(output.tables[0].table.row_count(), 2);
}

#[tokio::test]
async fn test_warnings_captured_from_stderr() {
    init_logging();
    let mut supervisor = Supervisor::new(one_shot_config()).unwrap();
    let output = supervisor
        .dispatch("echo data; echo oops 1>&2; echo worse 1>&2")
        .await
        .unwrap();
    assert_eq!(cells(&output, 0), vec![vec!["data"]]);
    let warnings = output.warnings.expect("two warnings");
    assert_eq!(warnings.iter().collect::<Vec<_>>(), vec!["oops", "worse"]);
}

#[tokio::test]
async fn test_command_dispatch_rejects_stdout() {
    init_logging();
    let mut supervisor = Supervisor::new(one_shot_config()).unwrap();
    let result = supervisor.dispatch_command("echo boom").await;
    assert!(matches!(
        result,
        Err(ExecError::Grid(GridError::OutputDisabled))
    ));
    // The next dispatch starts a fresh process and succeeds.
    let output = supervisor.dispatch("echo ok").await.unwrap();
    assert_eq!(cells(&output, 0), vec![vec!["ok"]]);
}

#[tokio::test]
async fn test_command_dispatch_collects_warnings() {
    init_logging();
    let mut supervisor = Supervisor::new(one_shot_config()).unwrap();
    let output = supervisor
        .dispatch_command("echo note 1>&2")
        .await
        .unwrap();
    assert_eq!(output.update_count, 0);
    let warnings = output.warnings.expect("one warning");
    assert_eq!(warnings.iter().collect::<Vec<_>>(), vec!["note"]);
}

#[tokio::test]
async fn test_repl_process_is_reused() {
    init_logging();
    let mut supervisor = Supervisor::new(repl_config()).unwrap();
    let first = supervisor.dispatch("echo $$,one").await.unwrap();
    let pid = supervisor.pid().expect("live process");
    let second = supervisor.dispatch("echo $$,two").await.unwrap();
    assert_eq!(supervisor.pid(), Some(pid));
    let first_pid = cells(&first, 0)[0][0].clone();
    let second_pid = cells(&second, 0)[0][0].clone();
    assert_eq!(first_pid, second_pid);
    assert_eq!(cells(&first, 0)[0][1], "one");
    assert_eq!(cells(&second, 0)[0][1], "two");
}

#[tokio::test]
async fn test_dead_process_is_replaced() {
    init_logging();
    let mut supervisor = Supervisor::new(repl_config()).unwrap();
    let first = supervisor.dispatch("echo $$").await.unwrap();
    let exited = supervisor.dispatch("exit 0").await.unwrap();
    assert!(exited.tables.is_empty());
    let third = supervisor.dispatch("echo $$").await.unwrap();
    assert_ne!(cells(&first, 0)[0][0], cells(&third, 0)[0][0]);
}

#[tokio::test]
async fn test_cancel_kills_process_and_poisons_output() {
    init_logging();
    let mut supervisor = Supervisor::new(one_shot_config()).unwrap();
    let handle = supervisor.cancel_handle();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.cancel();
    });
    let started = Instant::now();
    let result = supervisor
        .dispatch("while true; do echo tick; sleep 0.05; done")
        .await;
    canceller.await.unwrap();
    let error = result.expect_err("cancelled dispatch fails");
    assert!(error.is_aborted());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!supervisor.has_process());
    // A later dispatch is unaffected by the earlier cancellation.
    let output = supervisor.dispatch("echo ok").await.unwrap();
    assert_eq!(cells(&output, 0), vec![vec!["ok"]]);
}

#[tokio::test]
async fn test_cancel_during_silence_fails_the_dispatch() {
    init_logging();
    let mut supervisor = Supervisor::new(one_shot_config()).unwrap();
    let handle = supervisor.cancel_handle();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();
    });
    // The script prints once and goes quiet; the cancel kills it during
    // the silence, so the watchers wake on stream EOF rather than on a
    // line. The dispatch must still fail instead of returning the
    // partial capture.
    let result = supervisor.dispatch("echo early; sleep 30").await;
    canceller.await.unwrap();
    let error = result.expect_err("cancelled dispatch fails");
    assert!(error.is_aborted());
    assert!(!supervisor.has_process());
}

#[tokio::test]
async fn test_stale_cancel_does_not_poison_next_dispatch() {
    init_logging();
    let mut supervisor = Supervisor::new(one_shot_config()).unwrap();
    supervisor.cancel_handle().cancel();
    let output = supervisor.dispatch("echo ok").await.unwrap();
    assert_eq!(cells(&output, 0), vec![vec!["ok"]]);
}

#[tokio::test]
async fn test_quiet_period_concludes_silent_output() {
    init_logging();
    let mut supervisor = Supervisor::new(one_shot_config()).unwrap();
    let started = Instant::now();
    let output = supervisor.dispatch("sleep 2").await.unwrap();
    let elapsed = started.elapsed();
    assert!(output.tables.is_empty());
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(1900));
}

#[tokio::test]
async fn test_end_pattern_concludes_capture() {
    init_logging();
    let mut config = one_shot_config();
    config.end_pattern = Some("^--END--$".to_string());
    let mut supervisor = Supervisor::new(config).unwrap();
    let output = supervisor
        .dispatch(r"printf 'x\n--END--\ny\n'")
        .await
        .unwrap();
    assert_eq!(cells(&output, 0), vec![vec!["x"]]);
}

#[tokio::test]
async fn test_configured_encoding_decodes_output() {
    init_logging();
    let mut config = one_shot_config();
    config.encoding = "windows-1252".to_string();
    let mut supervisor = Supervisor::new(config).unwrap();
    let output = supervisor.dispatch(r"printf '\351\n'").await.unwrap();
    assert_eq!(cells(&output, 0), vec![vec!["é"]]);
}

#[tokio::test]
async fn test_close_is_idempotent_and_final() {
    init_logging();
    let mut supervisor = Supervisor::new(repl_config()).unwrap();
    supervisor.dispatch("echo warm").await.unwrap();
    assert!(supervisor.has_process());
    supervisor.close();
    supervisor.close();
    assert!(!supervisor.has_process());
    let result = supervisor.dispatch("echo hi").await;
    assert!(matches!(result, Err(ExecError::ProcessExecution { .. })));
}

#[tokio::test]
async fn test_tab_separator() {
    init_logging();
    let mut config = one_shot_config();
    config.cell_separator = '\t';
    let mut supervisor = Supervisor::new(config).unwrap();
    let output = supervisor
        .dispatch(r"printf 'a\tb\nc,d\n'")
        .await
        .unwrap();
    assert_eq!(cells(&output, 0), vec![vec!["a", "b"]]);
    assert_eq!(cells(&output, 1), vec![vec!["c,d"]]);
}
