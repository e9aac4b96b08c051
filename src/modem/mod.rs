//! Exclusive, timeout-bounded AT transactions over the modem UART.

use log::{debug, trace};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Error, Result};

pub mod commands;
pub mod interface;

#[cfg(test)]
pub mod mock;

pub use interface::{SerialInterface, Transport};

/// Default bounded wait on the channel lock
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(3);

/// Default upper bound on a single response
pub const DEFAULT_MAX_RESPONSE: usize = 4096;

/// Leaves the text prompt without submitting
const ESC: u8 = 0x1b;

/// One request/response exchange
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Bytes written to the modem
    pub request: Vec<u8>,

    /// Substring a successful response contains
    pub expected: String,

    /// Read budget
    pub timeout: Duration,
}

impl Transaction {
    pub fn new(request: impl Into<Vec<u8>>, expected: &str, timeout: Duration) -> Self {
        Self {
            request: request.into(),
            expected: expected.to_string(),
            timeout,
        }
    }
}

/// Verdict of a [Transaction]
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Expected pattern found, response captured so far
    Matched(Vec<u8>),

    /// Modem answered (final result code or size bound) without the pattern
    NoMatch(Vec<u8>),

    /// Nothing conclusive within the budget
    Timeout,
}

impl Outcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched(_))
    }

    /// Converts a failed verdict into its [Error]
    pub fn into_result(self) -> Result<Vec<u8>> {
        match self {
            Self::Matched(bytes) => Ok(bytes),
            Self::NoMatch(bytes) => Err(Error::NoMatch(String::from_utf8_lossy(&bytes).to_string())),
            Self::Timeout => Err(Error::Timeout),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Capture {
    /// Stop reading as soon as the pattern shows up
    UntilMatch,
    /// Keep reading until a blank line and the final result code
    Full,
}

/// Sole path to the modem UART.
///
/// Every transaction holds the channel for its own duration only;
/// waiting callers are served in arrival order.
pub struct Modem<T> {
    channel: Arc<Mutex<T>>,
    lock_wait: Duration,
    max_response: usize,
}

impl<T> Clone for Modem<T> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            lock_wait: self.lock_wait,
            max_response: self.max_response,
        }
    }
}

impl<T: Transport> Modem<T> {
    pub fn new(transport: T) -> Self {
        Self {
            channel: Arc::new(Mutex::new(transport)),
            lock_wait: DEFAULT_LOCK_WAIT,
            max_response: DEFAULT_MAX_RESPONSE,
        }
    }

    /// Copies and returns [Modem] with updated lock wait
    pub fn with_lock_wait(&self, lock_wait: Duration) -> Self {
        let mut s = self.clone();
        s.lock_wait = lock_wait;
        s
    }

    /// Copies and returns [Modem] with updated response bound
    pub fn with_max_response(&self, max_response: usize) -> Self {
        let mut s = self.clone();
        s.max_response = max_response.max(1);
        s
    }

    /// Runs a single [Transaction], reading until the pattern is found.
    /// The response body is only what preceded and included the match.
    pub async fn execute(&self, transaction: &Transaction) -> Result<Outcome> {
        self.run(vec![transaction.clone()], Capture::UntilMatch)
            .await
    }

    /// Runs a single [Transaction] and captures the complete response,
    /// up to the final result code.
    pub async fn execute_capturing(&self, transaction: &Transaction) -> Result<Outcome> {
        self.run(vec![transaction.clone()], Capture::Full).await
    }

    /// Runs several steps under a single lock acquisition, stopping
    /// at the first one that does not match. A sequence broken after
    /// its first step is aborted with ESC.
    pub async fn execute_sequence(&self, steps: &[Transaction]) -> Result<Outcome> {
        self.run(steps.to_vec(), Capture::UntilMatch).await
    }

    async fn acquire(&self) -> Result<OwnedMutexGuard<T>> {
        tokio::time::timeout(self.lock_wait, self.channel.clone().lock_owned())
            .await
            .map_err(|_| Error::ChannelBusy)
    }

    async fn run(&self, steps: Vec<Transaction>, capture: Capture) -> Result<Outcome> {
        let mut guard = self.acquire().await?;
        let max_response = self.max_response;

        // the guard moves into the blocking task and is released
        // when it completes, whatever the verdict
        let outcome = tokio::task::spawn_blocking(move || {
            let channel = &mut *guard;
            let mut outcome = Outcome::Matched(Vec::new());

            for (nth, step) in steps.iter().enumerate() {
                outcome = exchange(channel, step, capture, max_response)?;

                if !outcome.is_matched() {
                    if nth > 0 {
                        debug!("aborting sequence at step #{}", nth);
                        channel.write(&[ESC])?;
                    }
                    break;
                }
            }

            Ok::<_, std::io::Error>(outcome)
        })
        .await??;

        Ok(outcome)
    }
}

/// Position of `needle` in `haystack`
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// True when the response is terminated by a final result code
pub(crate) fn ends_with_final_result(bytes: &[u8]) -> bool {
    if !bytes.ends_with(b"\n") {
        return false;
    }

    let text = String::from_utf8_lossy(bytes);

    match text.lines().map(str::trim).rfind(|line| !line.is_empty()) {
        Some(last) => is_final_result(last),
        None => false,
    }
}

/// True when a multi-line response is closed the way the modem closes
/// it: a blank line, then the final result code. A body line reading
/// `OK` does not qualify.
pub(crate) fn ends_with_closing_result(bytes: &[u8]) -> bool {
    let text = String::from_utf8_lossy(bytes);

    let Some(head) = text.strip_suffix("\r\n") else {
        return false;
    };

    match head.rsplit_once("\r\n") {
        Some((before, last)) => before.ends_with("\r\n") && is_final_result(last),
        None => false,
    }
}

pub(crate) fn is_final_result(line: &str) -> bool {
    line == "OK"
        || line == "ERROR"
        || line.starts_with("+CMS ERROR:")
        || line.starts_with("+CME ERROR:")
}

fn exchange<T: Transport>(
    channel: &mut T,
    transaction: &Transaction,
    capture: Capture,
    max_response: usize,
) -> std::io::Result<Outcome> {
    channel.discard_input()?;

    trace!("modem << {:?}", String::from_utf8_lossy(&transaction.request));
    channel.write(&transaction.request)?;

    let expected = transaction.expected.as_bytes();
    let deadline = Instant::now() + transaction.timeout;

    let mut chunk = [0u8; 256];
    let mut response = Vec::with_capacity(256);
    let mut matched_at = None;

    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }

        let size = channel.read(&mut chunk, deadline - now)?;
        if size == 0 {
            continue;
        }

        let room = max_response - response.len();
        response.extend_from_slice(&chunk[..size.min(room)]);

        if matched_at.is_none() {
            matched_at = find(&response, expected);
        }

        match matched_at {
            Some(pos) => {
                if capture == Capture::UntilMatch || ends_with_closing_result(&response[pos..]) {
                    break;
                }
            },
            None => {
                if ends_with_final_result(&response) {
                    trace!("modem >> {:?}", String::from_utf8_lossy(&response));
                    return Ok(Outcome::NoMatch(response));
                }
            },
        }

        if response.len() >= max_response {
            debug!("modem response truncated to {} bytes", max_response);
            break;
        }
    }

    trace!("modem >> {:?}", String::from_utf8_lossy(&response));

    Ok(match matched_at {
        Some(_) => Outcome::Matched(response),
        None if response.len() >= max_response => Outcome::NoMatch(response),
        None => Outcome::Timeout,
    })
}
