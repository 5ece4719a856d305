use crate::cancel::CancelToken;
use crate::control::MAX_CONTROL_VALUE;
use crate::error::Result;
use crate::state::StateHandle;
use std::io::BufRead;
use std::net::TcpStream;

/// Counters for one feed session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub applied: u64,
    pub ignored: u64,
}

/// Parse one feed line into a control value
pub fn parse_control_line(line: &str) -> Option<u8> {
    let value: i64 = line.trim().parse().ok()?;
    u8::try_from(value)
        .ok()
        .filter(|value| *value <= MAX_CONTROL_VALUE)
}

/// Forward control values from `reader` until EOF or cancellation
///
/// Each line holding an integer in 0..=9 becomes a `set` on the state cell;
/// greetings, blank lines and out-of-range numbers are skipped.
pub fn run_feed<R: BufRead>(
    reader: R,
    state: &StateHandle,
    cancel: &CancelToken,
) -> Result<FeedStats> {
    let mut stats = FeedStats::default();
    for line in reader.lines() {
        if cancel.is_cancelled() {
            break;
        }
        let line = line?;
        match parse_control_line(&line) {
            Some(value) => {
                state.set(value);
                stats.applied += 1;
            }
            None => {
                if !line.trim().is_empty() {
                    tracing::debug!(line = %line.trim(), "ignoring non-control feed line");
                }
                stats.ignored += 1;
            }
        }
    }
    tracing::info!(applied = stats.applied, ignored = stats.ignored, "control feed ended");
    Ok(stats)
}

/// Open the TCP connection that carries the feed
pub fn connect(addr: &str) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr)?;
    tracing::info!(addr, "connected to control feed");
    Ok(stream)
}
