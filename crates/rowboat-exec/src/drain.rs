use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use regex::Regex;
use rowboat_common::error::CommonError;
use rowboat_grid::error::{GridError, GridResult};
use rowboat_grid::tokenizer::AbortFlag;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use uuid::Uuid;

use crate::error::ExecResult;

/// Marks the end of one unit of work on an output stream.
///
/// With no configured pattern each session uses a random token, expected
/// verbatim on its own line. When output arrives in bursts separated by
/// more than the quiet period, or when a data line happens to match the
/// mark, the capture ends early; both are accepted limitations of
/// line-oriented completion detection.
#[derive(Debug, Clone)]
pub enum EndMark {
    Token(String),
    Pattern(Regex),
}

impl EndMark {
    /// A token unique to one interpreter session.
    pub fn random() -> Self {
        EndMark::Token(Uuid::new_v4().to_string())
    }

    pub fn from_pattern(pattern: &str) -> ExecResult<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| CommonError::invalid(format!("invalid end pattern: {e}")))?;
        Ok(EndMark::Pattern(regex))
    }

    pub fn matches(&self, line: &str) -> bool {
        match self {
            EndMark::Token(token) => line == token,
            EndMark::Pattern(regex) => regex.is_match(line),
        }
    }

    /// The literal token, if this mark is not pattern based.
    pub fn token(&self) -> Option<&str> {
        match self {
            EndMark::Token(token) => Some(token),
            EndMark::Pattern(_) => None,
        }
    }
}

/// The receiving end of one stream's line queue.
///
/// Once the reader task ends and the queue drains, the stream is
/// exhausted for good; later watchers see it as closed immediately.
#[derive(Debug)]
pub struct StreamQueue {
    pub(crate) receiver: mpsc::Receiver<String>,
    exhausted: bool,
}

impl StreamQueue {
    pub fn new(receiver: mpsc::Receiver<String>) -> Self {
        Self {
            receiver,
            exhausted: false,
        }
    }
}

/// Why a stream watcher concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The end-of-data mark was observed.
    Marked,
    /// The reader task ended and the queue is drained.
    Closed,
    /// Nothing arrived for a full quiet period.
    Quiet,
    /// The sibling stream concluded and this one went silent.
    PeerEnded,
}

#[derive(Debug, Clone, Copy)]
pub struct DrainOptions {
    pub quiet_period: Duration,
    pub poll_interval: Duration,
}

/// Watches one stream queue until the current unit of work is over,
/// forwarding every data line to `forward`.
///
/// The deadline starts one quiet period from now and is pushed back each
/// time a line arrives, so the watcher only concludes on a mark, on
/// stream exhaustion, on peer conclusion, or once the stream has been
/// silent for the whole quiet period. A set [`AbortFlag`] fails the
/// watch with [`GridError::Aborted`] at the next poll.
pub async fn drain_stream<F>(
    queue: &mut StreamQueue,
    end_mark: &EndMark,
    options: DrainOptions,
    abort: &AbortFlag,
    peer_concluded: Option<&AtomicBool>,
    mut forward: F,
) -> ExecResult<DrainOutcome>
where
    F: FnMut(&str) -> GridResult<()>,
{
    if queue.exhausted {
        return Ok(DrainOutcome::Closed);
    }
    let mut deadline = Instant::now() + options.quiet_period;
    loop {
        if abort.is_aborted() {
            return Err(GridError::Aborted.into());
        }
        match timeout(options.poll_interval, queue.receiver.recv()).await {
            Ok(Some(line)) => {
                deadline = Instant::now() + options.quiet_period;
                if end_mark.matches(&line) {
                    return Ok(DrainOutcome::Marked);
                }
                forward(&line)?;
            }
            Ok(None) => {
                queue.exhausted = true;
                // A cancel closes the queue by killing the process; the
                // abort must win over the EOF it caused.
                if abort.is_aborted() {
                    return Err(GridError::Aborted.into());
                }
                return Ok(DrainOutcome::Closed);
            }
            Err(_) => {
                if let Some(peer) = peer_concluded {
                    if peer.load(Ordering::Relaxed) {
                        return Ok(DrainOutcome::PeerEnded);
                    }
                }
                if Instant::now() >= deadline {
                    return Ok(DrainOutcome::Quiet);
                }
            }
        }
    }
}
