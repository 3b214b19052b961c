//! NDJSON dump reader.

use anyhow::{Context, Result};
use async_trait::async_trait;
use memchr::memchr_iter;
use tokio::fs::File;
use tokio::io::{self, AsyncBufReadExt, AsyncReadExt};
use tracing::warn;

use crate::backends::Source;
use crate::common::Doc;

/// Reads a dump file written by the file sink (or any newline-delimited
/// stream of encoded records). Lines are counted up front so the read
/// progress bar has a total before the first document moves.
#[derive(Debug)]
pub(crate) struct FileSource {
    reader: io::BufReader<File>,
    path: String,
    batch_size: usize,
    line_no: u64,
    lines_total: u64,
}

impl FileSource {
    pub(crate) async fn open(path: &str, batch_size: usize) -> Result<Self> {
        let lines_total = count_lines(path).await?;
        let file = File::open(path)
            .await
            .with_context(|| format!("could not open dump file '{path}'"))?;
        Ok(Self {
            reader: io::BufReader::new(file),
            path: path.to_owned(),
            batch_size,
            line_no: 0,
            lines_total,
        })
    }

    pub(crate) fn lines_total(&self) -> u64 {
        self.lines_total
    }
}

async fn count_lines(path: &str) -> Result<u64> {
    let mut file = File::open(path)
        .await
        .with_context(|| format!("could not open dump file '{path}'"))?;
    let mut buf = vec![0u8; 64 * 1024];
    let mut count = 0u64;
    let mut last = b'\n';
    loop {
        let n = file
            .read(&mut buf)
            .await
            .with_context(|| format!("read error while sizing '{path}'"))?;
        if n == 0 {
            break;
        }
        count += memchr_iter(b'\n', &buf[..n]).count() as u64;
        last = buf[n - 1];
    }
    // a final line without its newline still counts
    if last != b'\n' {
        count += 1;
    }
    Ok(count)
}

#[async_trait]
impl Source for FileSource {
    async fn next_batch(&mut self) -> Result<Option<Vec<Doc>>> {
        let mut docs = Vec::with_capacity(self.batch_size);
        let mut line = String::new();
        while docs.len() < self.batch_size {
            line.clear();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .with_context(|| format!("read error in '{}'", self.path))?;
            if n == 0 {
                break;
            }
            self.line_no += 1;
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Doc>(trimmed) {
                Ok(doc) => docs.push(doc),
                Err(error) => {
                    warn!("skipping malformed record at {}:{}: {error}", self.path, self.line_no);
                }
            }
        }
        if docs.is_empty() { Ok(None) } else { Ok(Some(docs)) }
    }
}
