//! NDJSON dump writer.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{self, AsyncWriteExt};

use crate::backends::{BatchReport, Sink};
use crate::common::Doc;

/// Appends one JSON-encoded record per line. `File::create` truncates:
/// a dump is always written from scratch.
#[derive(Debug)]
pub(crate) struct FileSink {
    writer: io::BufWriter<File>,
    path: String,
}

impl FileSink {
    pub(crate) async fn create(path: &str) -> Result<Self> {
        let file = File::create(path)
            .await
            .with_context(|| format!("could not create dump file '{path}'"))?;
        Ok(Self {
            writer: io::BufWriter::new(file),
            path: path.to_owned(),
        })
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn write_batch(&mut self, docs: Vec<Doc>) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        for doc in &docs {
            let line = serde_json::to_string(doc)?;
            self.writer
                .write_all(line.as_bytes())
                .await
                .with_context(|| format!("write error in '{}'", self.path))?;
            self.writer
                .write_all(b"\n")
                .await
                .with_context(|| format!("write error in '{}'", self.path))?;
            report.written += 1;
        }
        Ok(report)
    }

    /// Async Drop does not exist; flush explicitly or lose the tail.
    async fn close(&mut self) -> Result<()> {
        self.writer
            .flush()
            .await
            .with_context(|| format!("failed to flush dump file '{}'", self.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::value::RawValue;

    fn doc(id: &str) -> Doc {
        Doc {
            index: "logs".into(),
            doc_type: None,
            id: Some(id.into()),
            routing: None,
            parent: None,
            version: None,
            version_type: None,
            source: RawValue::from_string(format!(r#"{{"n":{id}}}"#)).unwrap(),
        }
    }

    #[tokio::test]
    async fn written_dumps_read_back_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ndjson").to_string_lossy().into_owned();

        let mut sink = FileSink::create(&path).await.unwrap();
        let report = sink.write_batch(vec![doc("1"), doc("2")]).await.unwrap();
        sink.close().await.unwrap();
        assert_eq!(report.written, 2);

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: Doc = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.id.as_deref(), Some("1"));
        assert_eq!(parsed.source.get(), r#"{"n":1}"#);
    }
}
