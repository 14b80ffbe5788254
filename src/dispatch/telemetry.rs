// Inbound line reader for the aux link
//
// Lines are decoded and logged. Read timeouts are routine on an idle link and
// may land mid-line; the partial line is kept until its newline arrives.
// Undecodable lines are protocol errors and are skipped.

use std::io::{self, BufRead};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::run_blocking;
use crate::error::ErrorKind;

const ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub lines: u64,
    pub protocol_errors: u64,
}

/// Assembles complete lines from a blocking reader with a read timeout
pub struct LineReader<R> {
    name: &'static str,
    /// `None` once the blocking worker has died
    reader: Option<R>,
    partial: String,
    stats: ReaderStats,
}

impl<R: BufRead + Send + 'static> LineReader<R> {
    pub fn new(reader: R, name: &'static str) -> Self {
        Self {
            name,
            reader: Some(reader),
            partial: String::new(),
            stats: ReaderStats::default(),
        }
    }

    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    /// Next complete line without its line ending; `None` at end of stream
    pub async fn next_line(&mut self) -> Option<String> {
        let name = self.name;
        loop {
            let reader = self.reader.take()?;
            let buffer = std::mem::take(&mut self.partial);
            let step = run_blocking((reader, buffer), |(r, line)| r.read_line(line)).await;

            let result = match step {
                Ok(((reader, buffer), result)) => {
                    self.reader = Some(reader);
                    self.partial = buffer;
                    result
                }
                Err(e) => {
                    error!("{} reader task failed ({}): {}", name, ErrorKind::Logic, e);
                    return None;
                }
            };

            match result {
                Ok(0) if self.partial.is_empty() => {
                    info!("{} reader reached end of stream", name);
                    self.reader = None;
                    return None;
                }
                Ok(_) => {
                    let complete = std::mem::take(&mut self.partial);
                    self.stats.lines += 1;
                    return Some(complete.trim_end().to_string());
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    debug!("{} idle ({} bytes pending)", name, self.partial.len());
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    self.partial.clear();
                    self.stats.protocol_errors += 1;
                    warn!("{} sent an undecodable line ({}): {}", name, ErrorKind::Protocol, e);
                }
                Err(e) => {
                    self.partial.clear();
                    warn!("{} read failed ({}): {}", name, ErrorKind::Transport, e);
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }
}

/// Read and log lines until the link reports end of stream
pub async fn read_lines<R>(reader: R, name: &'static str) -> ReaderStats
where
    R: BufRead + Send + 'static,
{
    let mut lines = LineReader::new(reader, name);
    info!("{} reader started", name);

    while let Some(line) = lines.next_line().await {
        if !line.is_empty() {
            info!("{} says: {}", name, line);
        }
    }
    lines.stats()
}
