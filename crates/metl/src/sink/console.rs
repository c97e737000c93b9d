//! Console sink: one JSON object per line.

use std::io::Write;

use async_trait::async_trait;

use super::RowSink;
use crate::core::ProcessedRow;
use crate::error::Result;

/// Writes each row as a single-line JSON object with sorted keys.
pub struct ConsoleSink {
    writer: Box<dyn Write + Send>,
}

impl ConsoleSink {
    /// Sink writing to standard output.
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Sink writing to an arbitrary writer.
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl RowSink for ConsoleSink {
    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    async fn write(&mut self, row: ProcessedRow) -> Result<()> {
        serde_json::to_writer(&mut self.writer, &row)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdout"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_rows_are_json_lines() {
        let buffer = SharedBuffer::default();
        let mut sink = ConsoleSink::new(Box::new(buffer.clone()));

        sink.open().await.unwrap();
        let mut fields = BTreeMap::new();
        fields.insert("b".to_string(), "2".to_string());
        fields.insert("a".to_string(), "x \"y\"".to_string());
        sink.write(ProcessedRow::from_map(fields)).await.unwrap();
        sink.write(ProcessedRow::default()).await.unwrap();
        sink.close().await.unwrap();

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert_eq!(output, "{\"a\":\"x \\\"y\\\"\",\"b\":\"2\"}\n{}\n");
    }
}
