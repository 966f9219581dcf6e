use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Lines of combined output kept for the exit record
pub const OUTPUT_TAIL_LINES: usize = 20;

/// Longest line kept, in bytes; the rest of the line is discarded
pub const MAX_LINE_BYTES: usize = 4096;

const TRUNCATED_MARKER: &str = " [truncated]";

/// Bounded buffer holding the most recent output lines of a run
#[derive(Debug)]
pub(crate) struct OutputTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl OutputTail {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, line: String) {
        if self.capacity == 0 {
            return;
        }
        while self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

pub(crate) type SharedTail = Arc<Mutex<OutputTail>>;

pub(crate) fn shared_tail() -> SharedTail {
    Arc::new(Mutex::new(OutputTail::new(OUTPUT_TAIL_LINES)))
}

pub(crate) fn snapshot(tail: &SharedTail) -> Vec<String> {
    tail.lock().unwrap_or_else(|e| e.into_inner()).lines()
}

/// Forward every line of `stream` to the log and into the shared tail.
///
/// Stdout and stderr readers share one tail, so the tail is their
/// interleaving in arrival order. The pipe is always read to EOF: closing
/// it early would kill the child with SIGPIPE on its next write.
pub(crate) fn spawn_reader<R>(project: String, stream: R, tail: SharedTail) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            match read_capped_line(&mut reader, &mut buf, MAX_LINE_BYTES).await {
                Ok(Some(truncated)) => {
                    let mut line = String::from_utf8_lossy(&buf).into_owned();
                    if truncated {
                        line.push_str(TRUNCATED_MARKER);
                    }
                    debug!(project = %project, "{}", line);
                    tail.lock().unwrap_or_else(|e| e.into_inner()).push(line);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(project = %project, error = %e, "Output stream read failed, discarding the rest");
                    let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                    break;
                }
            }
        }
    })
}

/// Read one `\n`-terminated line into `buf`, keeping at most `max` bytes and
/// consuming the remainder of an overlong line.
///
/// Returns `None` at EOF, otherwise whether the line was truncated. A
/// trailing `\r` is dropped.
async fn read_capped_line<R>(reader: &mut R, buf: &mut Vec<u8>, max: usize) -> io::Result<Option<bool>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let mut read_any = false;
    let mut truncated = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }
        read_any = true;

        let (used, content, done) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (i + 1, &available[..i], true),
            None => (available.len(), available, false),
        };
        let room = max.saturating_sub(buf.len());
        if content.len() > room {
            truncated = true;
        }
        buf.extend_from_slice(&content[..content.len().min(room)]);
        reader.consume(used);
        if done {
            break;
        }
    }

    if !read_any {
        return Ok(None);
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(Some(truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_keeps_most_recent_lines() {
        let mut tail = OutputTail::new(3);
        for i in 0..5 {
            tail.push(format!("line {}", i));
        }
        assert_eq!(tail.lines(), vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_zero_capacity_tail_stays_empty() {
        let mut tail = OutputTail::new(0);
        tail.push("ignored".to_string());
        assert!(tail.lines().is_empty());
    }

    #[tokio::test]
    async fn test_reader_collects_lines() {
        let tail = shared_tail();
        let input: &[u8] = b"first\nsecond\n";
        spawn_reader("mlm".to_string(), input, tail.clone())
            .await
            .unwrap();
        assert_eq!(snapshot(&tail), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_reader_survives_invalid_utf8() {
        let tail = shared_tail();
        let input: &[u8] = b"caf\xe9\r\nstill here\nno newline";
        spawn_reader("mlm".to_string(), input, tail.clone())
            .await
            .unwrap();
        assert_eq!(
            snapshot(&tail),
            vec!["caf\u{FFFD}", "still here", "no newline"]
        );
    }

    #[tokio::test]
    async fn test_reader_caps_oversized_line() {
        let tail = shared_tail();
        let mut input = vec![b'x'; MAX_LINE_BYTES * 3];
        input.extend_from_slice(b"\nafter\n");
        spawn_reader("mlm".to_string(), std::io::Cursor::new(input), tail.clone())
            .await
            .unwrap();

        let lines = snapshot(&tail);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), MAX_LINE_BYTES + TRUNCATED_MARKER.len());
        assert!(lines[0].ends_with(TRUNCATED_MARKER));
        assert_eq!(lines[1], "after");
    }
}
