//! Diagnostic probe for coordination servers
//!
//! Sends the `stat` four-letter command to a server's client port and reads
//! the text report back. Used by tests and startup tooling to decide when a
//! server is ready; never on the election path.

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// First-line prefix of a healthy `stat` report
pub const READY_PREFIX: &str = "Zookeeper version:";

const STAT_COMMAND: &[u8] = b"stat";

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{host}:{port} not ready after {waited:?}")]
    NotReady {
        host: String,
        port: u16,
        waited: Duration,
    },

    #[error("Empty status response")]
    Empty,
}

pub type Result<T> = std::result::Result<T, ProbeError>;

/// Send `stat` and collect the response lines in order.
///
/// Reads until the peer closes the connection. A peer that accepts the
/// connection but never answers and never closes keeps this call waiting;
/// wrap it in a timeout when that matters.
pub async fn get_status(host: &str, port: u16) -> Result<Vec<String>> {
    let mut stream = TcpStream::connect((host, port)).await?;
    stream.write_all(STAT_COMMAND).await?;
    stream.flush().await?;

    let response = read_lines(BufReader::new(stream)).await?;

    debug!(host, port, lines = response.len(), "Status received");
    Ok(response)
}

/// Read newline-terminated lines until EOF. Bytes that are not valid UTF-8
/// are replaced rather than failing the whole response.
async fn read_lines<R>(mut reader: R) -> Result<Vec<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(lines);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        lines.push(String::from_utf8_lossy(&buf).into_owned());
    }
}

/// Polling parameters for [`wait_until_ready`]
#[derive(Debug, Clone, Copy)]
pub struct ReadinessConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl ReadinessConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Whether a `stat` response comes from a server that is serving requests
pub fn is_ready(lines: &[String]) -> bool {
    lines
        .first()
        .is_some_and(|first| first.starts_with(READY_PREFIX))
}

/// Poll [`get_status`] until the server reports its version line.
///
/// Connection failures and non-ready responses count as "not yet". Returns
/// the first ready response.
pub async fn wait_until_ready(
    host: &str,
    port: u16,
    config: ReadinessConfig,
) -> Result<Vec<String>> {
    let started = Instant::now();
    let deadline = tokio::time::Instant::now() + config.timeout;

    loop {
        let attempt = tokio::time::timeout_at(deadline, get_status(host, port)).await;
        match attempt {
            Ok(Ok(lines)) if is_ready(&lines) => {
                info!(host, port, elapsed = ?started.elapsed(), "Coordination server ready");
                return Ok(lines);
            }
            Ok(Ok(lines)) => {
                debug!(host, port, first = ?lines.first(), "Coordination server not serving yet");
            }
            Ok(Err(e)) => {
                debug!(host, port, error = %e, "Status probe failed");
            }
            Err(_) => break,
        }

        if tokio::time::Instant::now() + config.poll_interval >= deadline {
            break;
        }
        tokio::time::sleep(config.poll_interval).await;
    }

    Err(ProbeError::NotReady {
        host: host.to_string(),
        port,
        waited: config.timeout,
    })
}

/// Like [`get_status`] but rejects an empty response
pub async fn get_status_lines(host: &str, port: u16) -> Result<Vec<String>> {
    let lines = get_status(host, port).await?;
    if lines.is_empty() {
        return Err(ProbeError::Empty);
    }
    Ok(lines)
}
