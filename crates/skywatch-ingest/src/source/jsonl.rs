//! JSONL replay source.
//!
//! Feeds a captured event log (one JSON event per line) through the same
//! pipeline as the live broker. Useful for backfills and local runs without
//! Kafka. Blank lines are skipped; every other line becomes one message whose
//! offset is its 1-based line number, so log lines point straight at the
//! offending input.
//!
//! Lines are read as raw bytes. A line that is not valid UTF-8 is handed on
//! like any other and reported as malformed by the pipeline, so one corrupt
//! line never ends the replay.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::{MessageStream, StreamMessage};
use crate::{Error, Result};

/// Topic name reported for replayed messages.
pub const REPLAY_TOPIC: &str = "replay";

/// JSONL file message source.
pub struct JsonlSource {
    path: PathBuf,
    reader: BufReader<File>,
    buf: Vec<u8>,
    line_number: i64,
    last_acked: Option<i64>,
}

impl JsonlSource {
    /// Open `path` for replay.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("cannot open replay file {}: {e}", path.display()),
            ))
        })?;

        tracing::info!("Replaying events from {}", path.display());

        Ok(Self {
            path,
            reader: BufReader::new(file),
            buf: Vec::new(),
            line_number: 0,
            last_acked: None,
        })
    }

    /// Path being replayed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Line number of the last acknowledged message.
    pub fn last_acked(&self) -> Option<i64> {
        self.last_acked
    }
}

impl MessageStream for JsonlSource {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    async fn next_message(&mut self) -> Result<Option<StreamMessage>> {
        loop {
            self.buf.clear();
            if self.reader.read_until(b'\n', &mut self.buf).await? == 0 {
                return Ok(None);
            }
            self.line_number += 1;

            let line = trim_line_ending(&self.buf);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(StreamMessage::new(
                REPLAY_TOPIC,
                0,
                self.line_number,
                line.to_vec(),
            )));
        }
    }

    fn ack(&mut self, message: &StreamMessage) -> Result<()> {
        self.last_acked = Some(message.offset);
        Ok(())
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
